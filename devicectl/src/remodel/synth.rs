use std::collections::{BTreeMap, BTreeSet};

use devicectl_api::{
    error::{DeviceError, SelfContainmentError},
    model::{ModelAssertion, SnapEntry, SnapType},
    task::{TaskGraph, TaskId, TaskSet},
};

/// What the planner knows about a snap already on the device. Channel and revision are
/// runtime state, not policy, so they live outside the model assertion.
#[derive(Clone, Debug)]
pub struct InstalledSnap {
    pub name: String,
    pub kind: SnapType,
    pub channel: String,
    pub revision: u32,
}

/// The device's current snap inventory, as reported by the package manager (out of
/// scope; supplied here as planner input).
#[derive(Clone, Debug, Default)]
pub struct DeviceSnapState {
    installed: BTreeMap<String, InstalledSnap>,
}

impl DeviceSnapState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, snap: InstalledSnap) {
        self.installed.insert(snap.name.clone(), snap);
    }

    pub fn get(&self, name: &str) -> Option<&InstalledSnap> {
        self.installed.get(name)
    }

    pub fn is_installed(&self, name: &str) -> bool {
        self.installed.contains_key(name)
    }
}

/// Collects base/content-provider dependencies declared by the snaps a remodel plans to
/// carry, and what will actually be available, reporting anything left unsatisfied.
#[derive(Default)]
pub struct PrerequisiteTracker {
    available: BTreeSet<String>,
    required_bases: Vec<(String, String)>,
}

impl PrerequisiteTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_available(&mut self, name: impl Into<String>) {
        self.available.insert(name.into());
    }

    /// `app`/`os` snaps resolve their base implicitly through the model's declared root
    /// filesystem artifact.
    pub fn require_base(&mut self, snap: impl Into<String>, base: impl Into<String>) {
        self.required_bases.push((snap.into(), base.into()));
    }

    pub fn finish(self) -> Result<(), DeviceError> {
        let missing: Vec<String> = self
            .required_bases
            .into_iter()
            .filter(|(_, base)| !self.available.contains(base))
            .map(|(snap, base)| format!("base '{base}' for snap '{snap}'"))
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(DeviceError::new(SelfContainmentError { missing }))
        }
    }
}

/// Adds a download-then-install task chain to the graph, wiring each task to the one
/// before it and marking the boundary between the two phases.
fn emit_task_set(graph: &mut TaskGraph, download: &[String], install: &[String]) -> TaskSet {
    let mut set = TaskSet::new();
    let mut prev: Option<TaskId> = None;

    for kind in download {
        let id = graph.add_task(kind.clone());
        if let Some(p) = prev {
            graph.wire(id, p);
        }
        set.push(id);
        prev = Some(id);
    }
    if let Some(last_download) = prev {
        set.mark_last_before_local_modifications(last_download);
    }
    for kind in install {
        let id = graph.add_task(kind.clone());
        if let Some(p) = prev {
            graph.wire(id, p);
        }
        set.push(id);
        prev = Some(id);
    }

    set
}

fn install_task_set(graph: &mut TaskGraph, name: &str, slot: SnapType) -> TaskSet {
    let download = vec![format!("download-snap:{name}")];
    let mut install = vec![format!("install-snap:{name}")];
    match slot {
        SnapType::Kernel | SnapType::Base => install.push(format!("add-link-new-base-or-kernel:{name}")),
        SnapType::Gadget => install.push(format!("add-gadget-assets-tasks:{name}")),
        _ => {}
    }
    emit_task_set(graph, &download, &install)
}

fn refresh_task_set(graph: &mut TaskGraph, name: &str) -> TaskSet {
    let download = vec![format!("download-snap-refresh:{name}")];
    let install = vec![format!("install-snap-refresh:{name}:no-re-refresh")];
    emit_task_set(graph, &download, &install)
}

fn switch_task_set(graph: &mut TaskGraph, name: &str, slot: SnapType) -> TaskSet {
    let download = vec![format!("download-snap:{name}")];
    let install = match slot {
        SnapType::Gadget => vec![
            format!("switch-to-new-gadget:{name}"),
            format!("add-gadget-assets-tasks:{name}"),
        ],
        SnapType::Kernel | SnapType::Base => vec![format!("add-link-new-base-or-kernel:{name}")],
        _ => vec![format!("install-snap:{name}")],
    };
    emit_task_set(graph, &download, &install)
}

/// Synthesises the task set (if any) for one essential slot, per spec §4.E.2.
/// `pinned_revisions` carries per-snap revisions pinned by an enforced validation set;
/// absence means revision is unconstrained.
pub fn essential_task_set(
    graph: &mut TaskGraph,
    slot: SnapType,
    old: &ModelAssertion,
    new: &ModelAssertion,
    state: &DeviceSnapState,
    pinned_revisions: &BTreeMap<String, u32>,
) -> Option<TaskSet> {
    let new_entry = new.essential_snap(slot)?;
    let old_entry = old.essential_snap(slot);

    match old_entry {
        None => Some(install_task_set(graph, &new_entry.name, slot)),
        Some(old_entry) if old_entry.name == new_entry.name => {
            let installed = state.get(&new_entry.name);
            let channel_changed = installed
                .map(|i| i.channel != new_entry.default_channel)
                .unwrap_or(true);
            let revision_changed = match pinned_revisions.get(&new_entry.name) {
                Some(pinned) => installed.map(|i| i.revision != *pinned).unwrap_or(true),
                None => false,
            };
            if channel_changed || revision_changed {
                Some(refresh_task_set(graph, &new_entry.name))
            } else {
                None
            }
        }
        Some(_) if !state.is_installed(&new_entry.name) => {
            Some(install_task_set(graph, &new_entry.name, slot))
        }
        Some(_) => Some(switch_task_set(graph, &new_entry.name, slot)),
    }
}

/// Synthesises the task set (if any) for one non-essential model snap, per spec §4.E.2.
/// Records the snap with `tracker` in every branch so self-containment can be checked
/// once synthesis over the whole model has completed.
pub fn non_essential_task_set(
    graph: &mut TaskGraph,
    entry: &SnapEntry,
    state: &DeviceSnapState,
    pinned_revisions: &BTreeMap<String, u32>,
    tracker: &mut PrerequisiteTracker,
) -> Option<TaskSet> {
    match state.get(&entry.name) {
        None if entry.is_required() => {
            tracker.record_available(entry.name.clone());
            Some(emit_task_set(
                graph,
                &[format!("download-snap:{}", entry.name)],
                &[format!("install-snap:{}", entry.name)],
            ))
        }
        None => None,
        Some(installed) => {
            tracker.record_available(entry.name.clone());
            let channel_changed = installed.channel != entry.default_channel;
            let revision_changed = pinned_revisions
                .get(&entry.name)
                .map(|pinned| *pinned != installed.revision)
                .unwrap_or(false);
            if channel_changed || revision_changed {
                Some(emit_task_set(
                    graph,
                    &[format!("download-snap-refresh:{}", entry.name)],
                    &[format!("install-snap-refresh:{}", entry.name)],
                ))
            } else {
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devicectl_api::model::{Grade, Presence};

    fn model_with_kernel(name: &str, channel: &str) -> ModelAssertion {
        ModelAssertion {
            series: "16".into(),
            brand_id: "canonical".into(),
            model_name: "pc-model-20".into(),
            architecture: "amd64".into(),
            classic: false,
            distribution: None,
            grade: Grade::Dangerous,
            base: Some("core20".into()),
            kernel: Some(name.into()),
            gadget: Some("pc".into()),
            snaps: vec![SnapEntry {
                name: name.into(),
                id: None,
                kind: SnapType::Kernel,
                default_channel: channel.into(),
                presence: Presence::Required,
                components: Vec::new(),
            }],
            validation_sets: Vec::new(),
            serial_authority: Vec::new(),
            revision: 1,
        }
    }

    #[test]
    fn test_no_change_emits_nothing() {
        let old = model_with_kernel("pc-kernel", "stable");
        let new = model_with_kernel("pc-kernel", "stable");
        let mut state = DeviceSnapState::new();
        state.insert(InstalledSnap {
            name: "pc-kernel".into(),
            kind: SnapType::Kernel,
            channel: "stable".into(),
            revision: 10,
        });
        let mut graph = TaskGraph::new();
        let set = essential_task_set(&mut graph, SnapType::Kernel, &old, &new, &state, &BTreeMap::new());
        assert!(set.is_none());
        assert!(graph.is_empty());
    }

    #[test]
    fn test_kernel_channel_change_emits_refresh() {
        let old = model_with_kernel("pc-kernel", "stable");
        let new = model_with_kernel("pc-kernel", "candidate");
        let mut state = DeviceSnapState::new();
        state.insert(InstalledSnap {
            name: "pc-kernel".into(),
            kind: SnapType::Kernel,
            channel: "stable".into(),
            revision: 10,
        });
        let mut graph = TaskGraph::new();
        let set = essential_task_set(&mut graph, SnapType::Kernel, &old, &new, &state, &BTreeMap::new()).unwrap();
        assert_eq!(set.tasks.len(), 2);
        assert!(graph.get(set.first().unwrap()).unwrap().kind.starts_with("download-snap-refresh"));
        assert!(graph
            .get(set.last().unwrap())
            .unwrap()
            .kind
            .contains("no-re-refresh"));
    }

    #[test]
    fn test_kernel_name_change_while_not_installed_is_install() {
        let old = model_with_kernel("pc-kernel", "stable");
        let new = model_with_kernel("pc-kernel-new", "stable");
        let state = DeviceSnapState::new();
        let mut graph = TaskGraph::new();
        let set = essential_task_set(&mut graph, SnapType::Kernel, &old, &new, &state, &BTreeMap::new()).unwrap();
        let kinds: Vec<&str> = set.tasks.iter().map(|id| graph.get(*id).unwrap().kind.as_str()).collect();
        assert!(kinds.iter().any(|k| k.starts_with("install-snap:")));
        assert!(kinds.iter().any(|k| k.starts_with("add-link-new-base-or-kernel")));
    }

    #[test]
    fn test_non_essential_required_snap_not_installed_emits_install() {
        let entry = SnapEntry {
            name: "htop".into(),
            id: None,
            kind: SnapType::App,
            default_channel: "stable".into(),
            presence: Presence::Required,
            components: Vec::new(),
        };
        let state = DeviceSnapState::new();
        let mut tracker = PrerequisiteTracker::new();
        let mut graph = TaskGraph::new();
        let set = non_essential_task_set(&mut graph, &entry, &state, &BTreeMap::new(), &mut tracker).unwrap();
        assert_eq!(set.tasks.len(), 2);
        tracker.finish().unwrap();
    }

    #[test]
    fn test_non_essential_optional_absent_is_skipped() {
        let entry = SnapEntry {
            name: "htop".into(),
            id: None,
            kind: SnapType::App,
            default_channel: "stable".into(),
            presence: Presence::Optional,
            components: Vec::new(),
        };
        let state = DeviceSnapState::new();
        let mut tracker = PrerequisiteTracker::new();
        let mut graph = TaskGraph::new();
        let set = non_essential_task_set(&mut graph, &entry, &state, &BTreeMap::new(), &mut tracker);
        assert!(set.is_none());
        assert!(graph.is_empty());
    }

    #[test]
    fn test_prerequisite_tracker_reports_missing_base() {
        let mut tracker = PrerequisiteTracker::new();
        tracker.record_available("core20");
        tracker.require_base("my-app", "core22");
        let err = tracker.finish().unwrap_err();
        assert!(err.summary().contains("core22"));
    }

    #[test]
    fn test_prerequisite_tracker_satisfied() {
        let mut tracker = PrerequisiteTracker::new();
        tracker.record_available("core20");
        tracker.require_base("my-app", "core20");
        tracker.finish().unwrap();
    }
}
