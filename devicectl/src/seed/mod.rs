use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use devicectl_api::{
    error::{DeviceError, InternalError, NotFoundError, ReportError},
    model::{Grade, ModelAssertion, SnapType},
    seeded::{SeededSystemEntry, SeededSystemsLog},
    task::{TaskGraph, TaskId},
};
use log::{info, warn};

/// One resolved artifact the seed loader found in a seed directory, ready for the
/// installation task it emits.
#[derive(Clone, Debug)]
pub struct SeedArtifact {
    pub name: String,
    pub kind: SnapType,
    pub path: PathBuf,
    pub required: bool,
}

/// Result of opening and cross-checking a seed directory: the model plus the artifacts
/// to install, in enumeration order.
pub struct OpenedSeed {
    pub model: ModelAssertion,
    pub artifacts: Vec<SeedArtifact>,
    pub classic: bool,
}

/// Drives first-boot seeding: opens a labelled seed directory (or the legacy singleton
/// seed for pre-modes images), classifies the model, and emits one install task set per
/// essential/optional artifact wired in dependency order.
pub struct SeedLoader {
    seed_root: PathBuf,
}

impl SeedLoader {
    pub fn new(seed_root: impl Into<PathBuf>) -> Self {
        Self { seed_root: seed_root.into() }
    }

    /// Opens the seed directory for `label` (`None` for the legacy unlabelled seed),
    /// loading all model assertions found and cross-checking classic/core-boot
    /// consistency per spec §4.C.
    pub fn open(
        &self,
        label: Option<&str>,
        models: Vec<ModelAssertion>,
        artifact_paths: &BTreeMap<String, PathBuf>,
    ) -> Result<OpenedSeed, DeviceError> {
        let model = match models.len() {
            0 => return None.structured(NotFoundError::NoModelAssertion),
            1 => models.into_iter().next().unwrap(),
            _ => return None.structured(NotFoundError::MultipleModelAssertions),
        };

        let classic = model.classic;
        let core_boot_artifacts_present = model.kernel.is_some() || model.gadget.is_some();
        if classic && core_boot_artifacts_present {
            return Err(DeviceError::new(InternalError::TaskGraphInvariant(
                "classic model must not carry core-boot artifacts".into(),
            )));
        }
        if !classic && !core_boot_artifacts_present {
            return Err(DeviceError::new(InternalError::TaskGraphInvariant(
                "core-boot model missing kernel and gadget".into(),
            )));
        }

        let mut artifacts = Vec::new();
        for snap in model.essential_order() {
            match artifact_paths.get(&snap.name) {
                Some(path) => artifacts.push(SeedArtifact {
                    name: snap.name.clone(),
                    kind: snap.kind,
                    path: path.clone(),
                    required: true,
                }),
                None => {
                    return Err(DeviceError::new(NotFoundError::RequiredArtifactAbsent {
                        name: snap.name.clone(),
                    }))
                }
            }
        }

        for snap in model.non_essential_snaps() {
            match artifact_paths.get(&snap.name) {
                Some(path) => artifacts.push(SeedArtifact {
                    name: snap.name.clone(),
                    kind: snap.kind,
                    path: path.clone(),
                    required: snap.is_required(),
                }),
                None if snap.is_required() => {
                    return Err(DeviceError::new(NotFoundError::RequiredArtifactAbsent {
                        name: snap.name.clone(),
                    }))
                }
                None => {
                    info!("Seed loader: skipping absent optional artifact '{}'", snap.name);
                }
            }
        }

        info!(
            "Seed loader: opened seed '{}' for model {} with {} artifact(s)",
            label.unwrap_or("<unlabelled>"),
            model,
            artifacts.len()
        );

        Ok(OpenedSeed { model, artifacts, classic })
    }

    /// For pre-modes classic systems with no seed manifest: a trivial two-task plan
    /// against a generic fallback model, per spec §4.C and the design note resolving the
    /// "pre-modes classic handling" open question in favour of synthesising one.
    pub fn fallback_classic_model(&self) -> ModelAssertion {
        ModelAssertion {
            series: "16".into(),
            brand_id: "generic".into(),
            model_name: "generic-classic".into(),
            architecture: std::env::consts::ARCH.to_string(),
            classic: true,
            distribution: None,
            grade: Grade::Unset,
            base: None,
            kernel: None,
            gadget: None,
            snaps: Vec::new(),
            validation_sets: Vec::new(),
            serial_authority: Vec::new(),
            revision: 0,
        }
    }

    /// Emits a task graph for `seed`: essential artifacts wired `snapd -> kernel -> base
    /// -> gadget`, each non-essential artifact waiting on the last essential task, and a
    /// terminal `mark-seeded` waiting on every install.
    pub fn plan(&self, seed: &OpenedSeed) -> (TaskGraph, TaskId) {
        let mut graph = TaskGraph::new();
        let mut essential_ids = Vec::new();
        let mut last_essential = None;

        for artifact in seed.artifacts.iter().filter(|a| a.kind.is_essential()) {
            let id = graph.add_task(format!("install-{}", artifact.name));
            if let Some(prev) = last_essential {
                graph.wire(id, prev);
            }
            last_essential = Some(id);
            essential_ids.push(id);
        }

        let mut install_ids = essential_ids.clone();
        for artifact in seed.artifacts.iter().filter(|a| !a.kind.is_essential()) {
            let id = graph.add_task(format!("install-{}", artifact.name));
            if let Some(last) = last_essential {
                graph.wire(id, last);
            }
            install_ids.push(id);
        }

        let mark_seeded = graph.add_task("mark-seeded");
        for id in &install_ids {
            graph.wire(mark_seeded, *id);
        }

        (graph, mark_seeded)
    }

    /// Trivial plan for `fallback_classic_model`: a core configure hook followed by
    /// `mark-seeded`.
    pub fn plan_fallback(&self) -> (TaskGraph, TaskId) {
        let mut graph = TaskGraph::new();
        let configure = graph.add_task("core-configure-hook");
        let mark_seeded = graph.add_task("mark-seeded");
        graph.wire(mark_seeded, configure);
        (graph, mark_seeded)
    }

    /// Records `{cloud-name, region, availability-zone}` under the global config
    /// namespace when a cloud-instance metadata file is present at `cloud_metadata_path`,
    /// per spec §4.C. Returns `None` if the file is absent.
    pub fn capture_cloud_init(
        &self,
        cloud_metadata_path: &Path,
    ) -> Result<Option<CloudMetadata>, DeviceError> {
        if !cloud_metadata_path.exists() {
            return Ok(None);
        }
        let content = osutils::files::read_file_trim(cloud_metadata_path)
            .structured(InternalError::Internal("failed to read cloud metadata"))?;
        Ok(Some(parse_cloud_metadata(&content)))
    }

    /// Appends a seeded-systems log entry for a completed seeding, using `seed_time` as
    /// both `timestamp` and `seed_time` since seeding records a single instant.
    pub fn record_seeded(
        &self,
        log: &mut SeededSystemsLog,
        label: &str,
        model: &ModelAssertion,
        seed_time: chrono::DateTime<chrono::Utc>,
    ) {
        log.push(SeededSystemEntry {
            label: label.to_string(),
            model_name: model.model_name.clone(),
            brand_id: model.brand_id.clone(),
            revision: model.revision,
            timestamp: seed_time,
            seed_time,
        });
    }

    /// Whether preseed mode is indicated by the presence of a marker file, per spec
    /// §4.C: the terminal task should write a "preseeded" flag and request a daemon stop
    /// rather than immediately marking seeded.
    pub fn is_preseed_mode(&self, preseed_marker: &Path) -> bool {
        preseed_marker.exists()
    }

    pub fn seed_root(&self) -> &Path {
        &self.seed_root
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CloudMetadata {
    pub cloud_name: Option<String>,
    pub region: Option<String>,
    pub availability_zone: Option<String>,
}

fn parse_cloud_metadata(content: &str) -> CloudMetadata {
    let mut map = BTreeMap::new();
    for line in content.lines() {
        if let Some((k, v)) = line.split_once('=') {
            map.insert(k.trim().to_string(), v.trim().to_string());
        } else {
            warn!("Seed loader: ignoring malformed cloud metadata line: {line}");
        }
    }
    CloudMetadata {
        cloud_name: map.get("cloud-name").cloned(),
        region: map.get("region").cloned(),
        availability_zone: map.get("availability-zone").cloned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devicectl_api::model::{Presence, SnapEntry};
    use tempfile::tempdir;

    fn snap(name: &str, kind: SnapType, presence: Presence) -> SnapEntry {
        SnapEntry {
            name: name.to_string(),
            id: None,
            kind,
            default_channel: "stable".into(),
            presence,
            components: Vec::new(),
        }
    }

    fn core_model() -> ModelAssertion {
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
                snap("snapd", SnapType::Snapd, Presence::Required),
                snap("pc-kernel", SnapType::Kernel, Presence::Required),
                snap("core20", SnapType::Base, Presence::Required),
                snap("pc", SnapType::Gadget, Presence::Required),
                snap("foo", SnapType::App, Presence::Required),
            ],
            validation_sets: Vec::new(),
            serial_authority: Vec::new(),
            revision: 1,
        }
    }

    #[test]
    fn test_open_fails_without_model_assertion() {
        let loader = SeedLoader::new("/seed");
        let err = loader.open(None, Vec::new(), &BTreeMap::new()).unwrap_err();
        assert!(matches!(
            err.kind(),
            devicectl_api::error::ErrorKind::NotFound(NotFoundError::NoModelAssertion)
        ));
    }

    #[test]
    fn test_open_fails_with_multiple_model_assertions() {
        let loader = SeedLoader::new("/seed");
        let err = loader
            .open(None, vec![core_model(), core_model()], &BTreeMap::new())
            .unwrap_err();
        assert!(matches!(
            err.kind(),
            devicectl_api::error::ErrorKind::NotFound(NotFoundError::MultipleModelAssertions)
        ));
    }

    #[test]
    fn test_open_fails_on_missing_required_artifact() {
        let loader = SeedLoader::new("/seed");
        let mut paths = BTreeMap::new();
        paths.insert("snapd".into(), PathBuf::from("/seed/snaps/snapd.snap"));
        let err = loader.open(None, vec![core_model()], &paths).unwrap_err();
        assert!(matches!(
            err.kind(),
            devicectl_api::error::ErrorKind::NotFound(NotFoundError::RequiredArtifactAbsent { .. })
        ));
    }

    #[test]
    fn test_open_succeeds_and_plan_wires_essential_chain() {
        let loader = SeedLoader::new("/seed");
        let mut paths = BTreeMap::new();
        for name in ["snapd", "pc-kernel", "core20", "pc", "foo"] {
            paths.insert(name.to_string(), PathBuf::from(format!("/seed/snaps/{name}.snap")));
        }
        let opened = loader.open(None, vec![core_model()], &paths).unwrap();
        assert_eq!(opened.artifacts.len(), 5);

        let (graph, mark_seeded) = loader.plan(&opened);
        assert_eq!(graph.len(), 6);
        assert_eq!(graph.get(mark_seeded).unwrap().wait_for.len(), 5);
    }

    #[test]
    fn test_plan_fallback_two_tasks() {
        let loader = SeedLoader::new("/seed");
        let (graph, mark_seeded) = loader.plan_fallback();
        assert_eq!(graph.len(), 2);
        assert_eq!(graph.get(mark_seeded).unwrap().wait_for.len(), 1);
    }

    #[test]
    fn test_capture_cloud_init_absent_returns_none() {
        let loader = SeedLoader::new("/seed");
        let dir = tempdir().unwrap();
        let result = loader.capture_cloud_init(&dir.path().join("missing")).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_capture_cloud_init_parses_present_file() {
        let loader = SeedLoader::new("/seed");
        let dir = tempdir().unwrap();
        let path = dir.path().join("cloud-metadata");
        osutils::files::create_file(&path)
            .and_then(|mut f| {
                use std::io::Write;
                f.write_all(b"cloud-name=aws\nregion=us-east-1\navailability-zone=us-east-1a\n")
                    .map_err(Into::into)
            })
            .unwrap();

        let result = loader.capture_cloud_init(&path).unwrap().unwrap();
        assert_eq!(result.cloud_name.as_deref(), Some("aws"));
        assert_eq!(result.region.as_deref(), Some("us-east-1"));
    }
}
