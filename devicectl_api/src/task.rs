use std::collections::BTreeSet;
use std::ops::RangeFrom;

use serde::{Deserialize, Serialize};

/// Generates sequential identifiers scoped to one name, the way sequential device indices
/// and task identifiers are produced elsewhere in this workspace.
#[derive(Clone, Debug)]
pub struct IdGenerator {
    name: &'static str,
    range: RangeFrom<u64>,
}

impl IdGenerator {
    pub fn new(name: &'static str) -> Self {
        Self { name, range: 0.. }
    }

    pub fn starting_at(name: &'static str, start: u64) -> Self {
        Self { name, range: start.. }
    }

    pub fn next_id(&mut self) -> u64 {
        self.range
            .next()
            .unwrap_or_else(|| panic!("{} id generator exhausted", self.name))
    }
}

/// Identifies a single task within a change. Tasks are value records; identity is the id,
/// not the struct's address.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Ord, PartialEq, PartialOrd, Serialize, Hash)]
pub struct TaskId(pub u64);

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

/// Lifecycle status of a scheduled task.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    #[default]
    Do,
    Doing,
    Done,
    Error,
    Undoing,
    Undone,
    Hold,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Undone)
    }
}

/// A task as a value record: an identifier, a human-readable kind, a wait-set of
/// predecessor identifiers, and a status. The graph itself is the adjacency implied by
/// every task's wait-set plus each task set's insertion order.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Task {
    pub id: TaskId,
    pub kind: String,
    pub wait_for: BTreeSet<TaskId>,
    pub status: TaskStatus,
    /// Marks this task as the restart boundary described for recovery-system creation:
    /// no task depending on it runs until the device has rebooted into and out of the
    /// tried recovery system.
    #[serde(default)]
    pub restart_boundary: bool,
}

impl Task {
    pub fn new(id: TaskId, kind: impl Into<String>) -> Self {
        Task {
            id,
            kind: kind.into(),
            wait_for: BTreeSet::new(),
            status: TaskStatus::Do,
            restart_boundary: false,
        }
    }

    pub fn waiting_on(mut self, other: TaskId) -> Self {
        self.wait_for.insert(other);
        self
    }

    pub fn as_restart_boundary(mut self) -> Self {
        self.restart_boundary = true;
        self
    }
}

/// A connected sub-graph of tasks treated as a unit by the planner. Tracks the
/// download/install phase split via the "last-before-local-modifications" edge: the
/// marked task is the last download-phase task, and the next task in insertion order (if
/// any) begins the install phase.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct TaskSet {
    pub tasks: Vec<TaskId>,
    pub last_before_local_modifications: Option<TaskId>,
}

impl TaskSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, id: TaskId) {
        self.tasks.push(id);
    }

    pub fn mark_last_before_local_modifications(&mut self, id: TaskId) {
        self.last_before_local_modifications = Some(id);
    }

    pub fn first(&self) -> Option<TaskId> {
        self.tasks.first().copied()
    }

    pub fn last(&self) -> Option<TaskId> {
        self.tasks.last().copied()
    }

    pub fn first_download(&self) -> Option<TaskId> {
        self.first()
    }

    pub fn last_download(&self) -> Option<TaskId> {
        self.last_before_local_modifications.or_else(|| self.last())
    }

    /// The first install-phase task: the task immediately following the
    /// last-before-local-modifications marker, in insertion order. `None` if this set has
    /// no install phase (e.g. a download-only set).
    pub fn first_install(&self) -> Option<TaskId> {
        let marker = self.last_before_local_modifications?;
        let index = self.tasks.iter().position(|t| *t == marker)?;
        self.tasks.get(index + 1).copied()
    }

    pub fn last_install(&self) -> Option<TaskId> {
        if self.last_before_local_modifications.is_none() {
            return None;
        }
        self.last()
    }
}

/// All tasks belonging to one change, keyed by id, plus the generator that minted them.
/// Planners build a graph by repeatedly calling `add_task`/`wire`; the runner walks it by
/// following `wait_for` sets.
#[derive(Clone, Debug, Default)]
pub struct TaskGraph {
    tasks: std::collections::BTreeMap<TaskId, Task>,
    ids: Option<IdGenerator>,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self {
            tasks: std::collections::BTreeMap::new(),
            ids: Some(IdGenerator::new("task")),
        }
    }

    /// Adds a new task of the given kind, returning its freshly minted id.
    pub fn add_task(&mut self, kind: impl Into<String>) -> TaskId {
        let id = TaskId(self.ids.as_mut().expect("TaskGraph ids exhausted").next_id());
        self.tasks.insert(id, Task::new(id, kind));
        id
    }

    /// Adds a wait-edge `dependent -> depends_on`.
    pub fn wire(&mut self, dependent: TaskId, depends_on: TaskId) {
        self.tasks.get_mut(&dependent).expect("unknown task id").wait_for.insert(depends_on);
    }

    pub fn mark_restart_boundary(&mut self, id: TaskId) {
        self.tasks.get_mut(&id).expect("unknown task id").restart_boundary = true;
    }

    pub fn get(&self, id: TaskId) -> Option<&Task> {
        self.tasks.get(&id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    pub fn status(&self, id: TaskId) -> Option<TaskStatus> {
        self.tasks.get(&id).map(|t| t.status)
    }

    pub fn set_status(&mut self, id: TaskId, status: TaskStatus) {
        if let Some(task) = self.tasks.get_mut(&id) {
            task.status = status;
        }
    }

    /// Rebuilds a graph from its serialised parts, continuing id allocation from
    /// `next_id`. Used by the state store to resume a change across a restart.
    pub fn from_parts(tasks: std::collections::BTreeMap<TaskId, Task>, next_id: u64) -> Self {
        Self {
            tasks,
            ids: Some(IdGenerator::starting_at("task", next_id)),
        }
    }

    /// Splits the graph into its serialisable parts: the task map, and the next id the
    /// generator would mint.
    pub fn into_parts(self) -> (std::collections::BTreeMap<TaskId, Task>, u64) {
        let next_id = self.ids.as_ref().map(|g| g.range.start).unwrap_or(0);
        (self.tasks, next_id)
    }

    /// Tasks ready to run: status `Do` with every predecessor `Done`, in id order.
    pub fn ready(&self) -> Vec<TaskId> {
        self.tasks
            .values()
            .filter(|t| t.status == TaskStatus::Do)
            .filter(|t| {
                t.wait_for
                    .iter()
                    .all(|dep| self.tasks.get(dep).map(|d| d.status == TaskStatus::Done).unwrap_or(false))
            })
            .map(|t| t.id)
            .collect()
    }

    /// Whether every task has reached a terminal status.
    pub fn is_finished(&self) -> bool {
        self.tasks.values().all(|t| t.status.is_terminal())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_graph_add_and_wire() {
        let mut graph = TaskGraph::new();
        let a = graph.add_task("download-foo");
        let b = graph.add_task("install-foo");
        graph.wire(b, a);

        assert_eq!(graph.len(), 2);
        assert!(graph.get(b).unwrap().wait_for.contains(&a));
    }

    #[test]
    fn test_id_generator_sequential() {
        let mut gen = IdGenerator::new("task");
        assert_eq!(gen.next_id(), 0);
        assert_eq!(gen.next_id(), 1);
        assert_eq!(gen.next_id(), 2);
    }

    #[test]
    fn test_task_set_phase_split() {
        let mut set = TaskSet::new();
        set.push(TaskId(1));
        set.push(TaskId(2));
        set.mark_last_before_local_modifications(TaskId(2));
        set.push(TaskId(3));
        set.push(TaskId(4));

        assert_eq!(set.first_download(), Some(TaskId(1)));
        assert_eq!(set.last_download(), Some(TaskId(2)));
        assert_eq!(set.first_install(), Some(TaskId(3)));
        assert_eq!(set.last_install(), Some(TaskId(4)));
    }

    #[test]
    fn test_task_set_no_install_phase() {
        let mut set = TaskSet::new();
        set.push(TaskId(1));
        set.push(TaskId(2));

        assert_eq!(set.last_download(), Some(TaskId(2)));
        assert_eq!(set.first_install(), None);
        assert_eq!(set.last_install(), None);
    }

    #[test]
    fn test_task_waiting_on() {
        let task = Task::new(TaskId(2), "install-foo").waiting_on(TaskId(1));
        assert!(task.wait_for.contains(&TaskId(1)));
    }

    #[test]
    fn test_into_parts_and_from_parts_round_trip() {
        let mut graph = TaskGraph::new();
        let a = graph.add_task("download-foo");
        let b = graph.add_task("install-foo");
        graph.wire(b, a);

        let (tasks, next_id) = graph.into_parts();
        assert_eq!(next_id, 2);

        let mut restored = TaskGraph::from_parts(tasks, next_id);
        assert_eq!(restored.len(), 2);
        assert!(restored.get(b).unwrap().wait_for.contains(&a));

        let c = restored.add_task("install-bar");
        assert_eq!(c, TaskId(2));
    }

    #[test]
    fn test_ready_respects_wait_for_and_status() {
        let mut graph = TaskGraph::new();
        let a = graph.add_task("download-foo");
        let b = graph.add_task("install-foo");
        graph.wire(b, a);

        assert_eq!(graph.ready(), vec![a]);
        assert!(!graph.is_finished());

        graph.set_status(a, TaskStatus::Done);
        assert_eq!(graph.ready(), vec![b]);

        graph.set_status(b, TaskStatus::Done);
        assert!(graph.ready().is_empty());
        assert!(graph.is_finished());
    }
}
