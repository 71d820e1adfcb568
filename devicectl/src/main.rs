use std::collections::BTreeMap;
use std::path::Path;
use std::process::ExitCode;
use std::thread;

use clap::Parser;
use devicectl::cli::{Cli, Commands, GetKind};
use devicectl::daemonconfig::DaemonConfig;
use devicectl::datastore::{ChangeRecord, DataStore};
use devicectl::remodel::{self, synth::DeviceSnapState, PlanInputs};
use devicectl::tasks::{run_change, LoggingDispatcher, RunOutcome};
use devicectl::{logging, registration, seed};
use devicectl_api::assertion::MemoryAssertionStore;
use devicectl_api::device::ChangeKind;
use devicectl_api::error::{DeviceError, DeviceResultExt, InternalError, ReportError};
use devicectl_api::model::ModelAssertion;
use devicectl_api::recovery::{pick_label, RecoverySystemSetupRecord};
use log::{error, info};

fn main() -> ExitCode {
    let cli = Cli::parse();
    let daemon_config = match &cli.config {
        Some(path) => DaemonConfig::load_from(path),
        None => DaemonConfig::load(),
    };

    if let Err(err) = logging::init_logging(cli.verbosity, Path::new("/var/log/devicectl.log")) {
        eprintln!("failed to initialise logging: {err:#}");
        return ExitCode::FAILURE;
    }

    let mut store = match DataStore::open(daemon_config.datastore_path()) {
        Ok(store) => store,
        Err(err) => {
            error!("failed to open device state store: {}", err.summary());
            return ExitCode::FAILURE;
        }
    };

    match run(&cli.command, &daemon_config, &mut store) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{}", err.summary());
            ExitCode::FAILURE
        }
    }
}

fn run(command: &Commands, daemon_config: &DaemonConfig, store: &mut DataStore) -> Result<(), DeviceError> {
    match command {
        Commands::Seed { label } => cmd_seed(daemon_config, store, label.as_deref()),
        Commands::Remodel { from, to, dry_run } => cmd_remodel(store, from, to, *dry_run),
        Commands::CreateRecoverySystem { label } => {
            cmd_create_recovery_system(daemon_config, store, label)
        }
        Commands::RemoveRecoverySystem { label } => cmd_remove_recovery_system(store, label),
        Commands::Register => cmd_register(store),
        Commands::Get { kind } => cmd_get(store, kind),
    }
}

/// Opens the labelled (or legacy singleton) seed directory, plans its install tasks, and
/// runs them to completion, recording the seeded-systems log entry on success.
fn cmd_seed(
    daemon_config: &DaemonConfig,
    store: &mut DataStore,
    label: Option<&str>,
) -> Result<(), DeviceError> {
    let loader = seed::SeedLoader::new(daemon_config.seed_root());

    let model_path = match label {
        Some(l) => loader.seed_root().join("systems").join(l).join("model"),
        None => loader.seed_root().join("model"),
    };
    let model_text = osutils::files::read_file_trim(&model_path)
        .structured(InternalError::Internal("failed to read seed model assertion"))?;
    let model: ModelAssertion = serde_yaml::from_str(&model_text)
        .structured(InternalError::Internal("failed to parse seed model assertion"))?;

    let artifact_paths: BTreeMap<String, std::path::PathBuf> = model
        .essential_order()
        .into_iter()
        .chain(model.non_essential_snaps())
        .map(|snap| {
            let path = loader.seed_root().join("snaps").join(format!("{}.snap", snap.name));
            (snap.name.clone(), path)
        })
        .collect();

    let opened = loader.open(label, vec![model], &artifact_paths)?;
    let (mut graph, mark_seeded) = if opened.classic && opened.artifacts.is_empty() {
        loader.plan_fallback()
    } else {
        loader.plan(&opened)
    };

    let mut dispatcher = LoggingDispatcher;
    run_change(&mut graph, &mut dispatcher)?;
    info!("seed task graph finished at task {mark_seeded}");

    store.with_state(|s| {
        loader.record_seeded(&mut s.seeded_systems, label.unwrap_or("<unlabelled>"), &opened.model, chrono_now());
        s.device.brand = Some(opened.model.brand_id.clone());
        s.device.model = Some(opened.model.model_name.clone());
    })?;

    println!("seeded {}", label.unwrap_or("<unlabelled>"));
    Ok(())
}

/// Loads the two model assertions, plans the remodel, and (unless `dry_run`) runs the
/// resulting task graph and applies the terminal `set-model` effects.
fn cmd_remodel(
    store: &mut DataStore,
    from: &Path,
    to: &Path,
    dry_run: bool,
) -> Result<(), DeviceError> {
    let old = load_model(from)?;
    let new = load_model(to)?;

    let in_flight = store.state().change.as_ref().map(|c| c.kind);
    if in_flight.is_some() {
        return Err(DeviceError::new(devicectl_api::error::ConflictError::ExclusiveChangeInFlight {
            conflicting_id: "current".into(),
            conflicting_kind: in_flight.unwrap().to_string(),
        }));
    }

    let snaps = DeviceSnapState::new();
    let existing_recovery_labels: Vec<String> =
        store.state().recovery_setups.keys().cloned().collect();
    let recovery_label_base = recovery_label_today();
    let pinned_revisions = BTreeMap::new();
    let local_snaps = Default::default();

    let inputs = PlanInputs {
        old_store: None,
        new_store: None,
        snaps: &snaps,
        pinned_revisions: &pinned_revisions,
        existing_recovery_labels: &existing_recovery_labels,
        recovery_label_base: &recovery_label_base,
        offline: false,
        local_snaps: &local_snaps,
        in_flight,
    };

    let plan = remodel::plan(&old, &new, &inputs)?;
    info!("remodel classified as {:?} with {} task(s)", plan.class, plan.graph.len());

    if dry_run {
        println!("dry run: {:?}, {} task(s), recovery system: {:?}", plan.class, plan.graph.len(), plan.recovery_system_label);
        return Ok(());
    }

    let mut graph = plan.graph;
    store.with_state(|s| s.change = Some(ChangeRecord::new(ChangeKind::Remodel, graph.clone())))?;

    let mut dispatcher = LoggingDispatcher;
    let outcome = run_change(&mut graph, &mut dispatcher)?;

    store.with_state(|s| match outcome {
        RunOutcome::Finished => {
            s.device.brand = Some(plan.set_model_effects.new_model.brand_id.clone());
            s.device.model = Some(plan.set_model_effects.new_model.model_name.clone());
            s.change = None;
        }
        RunOutcome::SuspendedForReboot | RunOutcome::SuspendedForRetry => {
            s.change = Some(ChangeRecord::new(ChangeKind::Remodel, graph.clone()));
        }
    })?;

    println!("remodel: {outcome:?}");
    Ok(())
}

fn load_model(path: &Path) -> Result<ModelAssertion, DeviceError> {
    let text = osutils::files::read_file_trim(path)
        .structured(InternalError::Internal("failed to read model assertion"))?;
    serde_yaml::from_str(&text).structured(InternalError::Internal("failed to parse model assertion"))
}

fn recovery_label_today() -> String {
    chrono_now().format("%Y%m%d").to_string()
}

fn chrono_now() -> chrono::DateTime<chrono::Utc> {
    chrono::Utc::now()
}

/// Builds a minimal two-task create/finalise plan for `label`, runs it, and records the
/// setup record. A thin stand-in for the full nine-step writer, which needs a live
/// package-manager-backed `ArtifactResolver` this workspace doesn't own.
fn cmd_create_recovery_system(
    daemon_config: &DaemonConfig,
    store: &mut DataStore,
    label: &str,
) -> Result<(), DeviceError> {
    let existing: Vec<String> = store.state().recovery_setups.keys().cloned().collect();
    let label = pick_label(label, &existing);

    let record = RecoverySystemSetupRecord::new(&label, daemon_config.seed_root());

    let mut graph = devicectl_api::task::TaskGraph::new();
    let create = graph.add_task(format!("create-recovery-system:{label}"));
    let finalize = graph.add_task(format!("finalize-recovery-system:{label}"));
    graph.wire(finalize, create);
    graph.mark_restart_boundary(finalize);

    let mut dispatcher = LoggingDispatcher;
    run_change(&mut graph, &mut dispatcher)?;

    store.with_state(|s| {
        s.recovery_setups.insert(label.clone(), record.clone());
    })?;

    println!("created recovery system {label}");
    Ok(())
}

fn cmd_remove_recovery_system(store: &mut DataStore, label: &str) -> Result<(), DeviceError> {
    if !store.state().recovery_setups.contains_key(label) {
        return Err(DeviceError::new(devicectl_api::error::NotFoundError::RecoverySystemNotFound {
            label: label.to_string(),
        }));
    }

    let mut graph = devicectl_api::task::TaskGraph::new();
    graph.add_task(format!("remove-recovery-system:{label}"));
    let mut dispatcher = LoggingDispatcher;
    run_change(&mut graph, &mut dispatcher)?;

    store.with_state(|s| {
        s.recovery_setups.remove(label);
    })?;

    println!("removed recovery system {label}");
    Ok(())
}

/// Drives the registration state machine to completion against the configured
/// device-service endpoint, persisting the resulting serial into a fresh in-memory
/// assertion store (the runtime assertion database itself is out of scope).
fn cmd_register(store: &mut DataStore) -> Result<(), DeviceError> {
    let brand_id = store
        .state()
        .device
        .brand
        .clone()
        .structured(InternalError::Internal("device has no model recorded; seed first"))?;
    let model_name = store
        .state()
        .device
        .model
        .clone()
        .structured(InternalError::Internal("device has no model recorded; seed first"))?;

    let model = ModelAssertion {
        series: "16".into(),
        brand_id,
        model_name,
        architecture: std::env::consts::ARCH.to_string(),
        classic: false,
        distribution: None,
        grade: Default::default(),
        base: None,
        kernel: None,
        gadget: None,
        snaps: Vec::new(),
        validation_sets: Vec::new(),
        serial_authority: Vec::new(),
        revision: 0,
    };

    let params = devicectl_api::config::NamespacedConfig::default();
    let device_config = devicectl_api::config::DeviceConfig::new(&params, "pc");
    let default_url = url::Url::parse("https://serial-vault.example.com/")
        .structured(InternalError::Internal("invalid default device-service url"))?;

    let mut machine = registration::RegistrationMachine::new();
    let mut record = store.state().device.clone();
    machine.generate_key(&mut record)?;

    let endpoint = machine
        .select_endpoint(&device_config, &default_url, |_proxy| None)?
        .structured(InternalError::Internal("registration skipped: store or device-service access is offline"))?;

    machine.prepare_request(&endpoint, &model, device_config.proposed_serial().as_deref(), device_config.registration_body().as_deref())?;

    let mut serial = machine.submit_request(&endpoint, &model)?;
    let mut attempt = 0;
    while serial.is_none() && attempt < 10 {
        thread::sleep(std::time::Duration::from_millis(100));
        serial = machine.poll(&endpoint, &model)?;
        attempt += 1;
    }
    let serial = serial.structured(InternalError::Internal("registration did not complete: still polling"))?;

    let signature = machine.sign(serial.serial.as_bytes())?;
    let mut runtime_store = MemoryAssertionStore::new();
    machine.finalize(serial, &mut record, &mut runtime_store, None, signature)?;

    store.with_state(|s| s.device = record.clone())?;

    println!("registered, state: {:?}", machine.state());
    Ok(())
}

fn cmd_get(store: &mut DataStore, kind: &GetKind) -> Result<(), DeviceError> {
    match kind {
        GetKind::Status => {
            let json = serde_json::to_string_pretty(store.state())
                .structured(InternalError::Internal("failed to render device state"))?;
            println!("{json}");
        }
        GetKind::Config => {
            let json = serde_json::to_string_pretty(&store.state().modeenv)
                .structured(InternalError::Internal("failed to render modeenv"))?;
            println!("{json}");
        }
    }
    Ok(())
}
