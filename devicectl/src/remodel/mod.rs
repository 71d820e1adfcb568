pub mod classify;
pub mod ordering;
pub mod synth;

use std::collections::BTreeMap;

use devicectl_api::{
    device::{ChangeKind, RemodelClass},
    error::{ConflictError, DeviceError, DeviceResultExt, PolicyError},
    model::{ModelAssertion, SnapEntry, SnapType, ValidationSetRef},
    recovery::pick_label,
    task::{TaskGraph, TaskId},
};
use log::info;

pub use classify::{classify, has_system_seed};
pub use synth::{DeviceSnapState, InstalledSnap};

use synth::PrerequisiteTracker;

/// Everything the terminal `set-model` task (§4.E.6) needs to carry out its six ordered
/// effects and to undo the ones that can be undone.
#[derive(Clone, Debug)]
pub struct SetModelEffects {
    pub new_model: ModelAssertion,
    pub dropped_required: Vec<String>,
    pub old_validation_sets: Vec<ValidationSetRef>,
    pub new_validation_sets: Vec<ValidationSetRef>,
    pub promote_recovery_label: Option<String>,
}

/// The fully wired plan for one remodel: a task graph, the terminal task's id, and the
/// payload the runner hands to the `set-model` task kind when it dispatches that task.
pub struct RemodelPlan {
    pub class: RemodelClass,
    pub graph: TaskGraph,
    pub set_model_task: TaskId,
    pub recovery_system_label: Option<String>,
    pub set_model_effects: SetModelEffects,
}

/// Inputs describing the device's current state that the planner cannot derive from the
/// two model assertions alone.
pub struct PlanInputs<'a> {
    pub old_store: Option<&'a str>,
    pub new_store: Option<&'a str>,
    pub snaps: &'a DeviceSnapState,
    pub pinned_revisions: &'a BTreeMap<String, u32>,
    pub existing_recovery_labels: &'a [String],
    pub recovery_label_base: &'a str,
    pub offline: bool,
    pub local_snaps: &'a std::collections::BTreeSet<String>,
    pub in_flight: Option<ChangeKind>,
}

const ESSENTIAL_SLOTS: [SnapType; 4] = [SnapType::Snapd, SnapType::Kernel, SnapType::Base, SnapType::Gadget];

/// Classifies, synthesises, wires, and finalises the task graph for a remodel from `old`
/// to `new`, per spec §4.E.1–§4.E.6.
pub fn plan(old: &ModelAssertion, new: &ModelAssertion, inputs: &PlanInputs) -> Result<RemodelPlan, DeviceError> {
    let class = classify::classify(old, new, inputs.old_store, inputs.new_store)?;

    if class == RemodelClass::ReregRemodel {
        if inputs.offline {
            return Err(DeviceError::new(PolicyError::ReregRequiresNetwork));
        }
        if let Some(kind) = inputs.in_flight {
            return Err(DeviceError::new(ConflictError::ExclusiveChangeInFlight {
                conflicting_id: "current".into(),
                conflicting_kind: kind.to_string(),
            }));
        }
    }

    if inputs.offline {
        check_offline_local_snaps(old, new, inputs.snaps, inputs.local_snaps)?;
    }

    let mut graph = TaskGraph::new();
    let mut tracker = PrerequisiteTracker::new();
    for entry in new.essential_order() {
        tracker.record_available(entry.name.clone());
    }
    if let Some(base) = &new.base {
        tracker.record_available(base.clone());
    }

    let mut sets = Vec::new();
    for slot in ESSENTIAL_SLOTS {
        if let Some(set) =
            synth::essential_task_set(&mut graph, slot, old, new, inputs.snaps, inputs.pinned_revisions)
        {
            sets.push(set);
        }
    }

    // Base-type (content-providing `os`) snaps must be synthesised before other
    // non-essential snaps so their task sets, and the prerequisites they record, are
    // available to the app snaps that depend on them.
    let mut non_essential: Vec<&SnapEntry> = new.non_essential_snaps().collect();
    non_essential.sort_by_key(|entry| entry.kind != SnapType::Os);

    for entry in non_essential {
        if matches!(entry.kind, SnapType::App | SnapType::Os) {
            let base = new.base.clone().unwrap_or_else(|| "<none>".to_string());
            tracker.require_base(entry.name.clone(), base);
        }
        if let Some(set) =
            synth::non_essential_task_set(&mut graph, entry, inputs.snaps, inputs.pinned_revisions, &mut tracker)
        {
            sets.push(set);
        }
    }

    tracker.finish().message("cannot remodel to model that is not self contained")?;

    let chain = ordering::wire_chain(&mut graph, &sets);

    let mut recovery_system_label = None;
    let mut tail: Option<TaskId> = chain.last_install.or(chain.last_download);

    // A no-op remodel (same model, nothing synthesised) stays a single set-model task;
    // a recovery system is only worth testing when there is something to protect.
    if !sets.is_empty() && has_system_seed(new) {
        let label = pick_label(inputs.recovery_label_base, inputs.existing_recovery_labels);
        let create = graph.add_task(format!("create-recovery-system:{label}"));
        let finalize = graph.add_task(format!("finalize-recovery-system:{label}"));
        graph.wire(finalize, create);
        graph.mark_restart_boundary(finalize);

        if let Some(last_download) = chain.last_download {
            graph.wire(create, last_download);
        }
        match chain.first_install {
            Some(first_install) => graph.wire(first_install, finalize),
            None => tail = Some(finalize),
        }
        recovery_system_label = Some(label);
    }

    let set_model_task = graph.add_task("set-model");
    if let Some(tail) = tail {
        graph.wire(set_model_task, tail);
    }

    let dropped_required: Vec<String> = old
        .snaps
        .iter()
        .filter(|s| matches!(s.kind, SnapType::App | SnapType::Base | SnapType::Kernel) && s.is_required())
        .filter(|s| !new.snaps.iter().any(|n| n.name == s.name))
        .map(|s| s.name.clone())
        .collect();

    let effects = SetModelEffects {
        new_model: new.clone(),
        dropped_required,
        old_validation_sets: old.validation_sets.clone(),
        new_validation_sets: new.validation_sets.clone(),
        promote_recovery_label: recovery_system_label.clone(),
    };

    info!(
        "Remodel planner: classified '{}' -> '{}' as {:?}, {} task(s)",
        old.model_name,
        new.model_name,
        class,
        graph.len()
    );

    Ok(RemodelPlan {
        class,
        graph,
        set_model_task,
        recovery_system_label,
        set_model_effects: effects,
    })
}

/// An offline remodel may not download anything: any snap that would otherwise need a
/// fresh fetch must already be supplied as a local file. Checked before any task is
/// scheduled, per spec §4.E.2/§8 boundary scenario 6.
fn check_offline_local_snaps(
    old: &ModelAssertion,
    new: &ModelAssertion,
    snaps: &DeviceSnapState,
    local_snaps: &std::collections::BTreeSet<String>,
) -> Result<(), DeviceError> {
    let needs_fetch = |name: &str| !snaps.is_installed(name) && !local_snaps.contains(name);

    for slot in ESSENTIAL_SLOTS {
        if let Some(new_entry) = new.essential_snap(slot) {
            let fresh = old.essential_snap(slot).map(|e| e.name != new_entry.name).unwrap_or(true);
            if fresh && needs_fetch(&new_entry.name) {
                return Err(DeviceError::new(PolicyError::OfflineSnapMissing {
                    name: new_entry.name.clone(),
                }));
            }
        }
    }
    for entry in new.non_essential_snaps() {
        if entry.is_required() && needs_fetch(&entry.name) {
            return Err(DeviceError::new(PolicyError::OfflineSnapMissing {
                name: entry.name.clone(),
            }));
        }
    }
    Ok(())
}
