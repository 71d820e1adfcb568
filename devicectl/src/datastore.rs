use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use devicectl_api::{
    device::{ChangeKind, DeviceStateRecord},
    error::{DeviceError, InternalError, ReportError},
    recovery::RecoverySystemSetupRecord,
    seeded::SeededSystemsLog,
    task::{Task, TaskGraph, TaskId},
};
use log::info;
use serde::{Deserialize, Serialize};

/// The in-flight change record, persisted so a change survives a daemon restart
/// (including the reboot a restart-boundary task requires). `tasks`/`next_task_id` are
/// a `TaskGraph`'s serialisable parts; `kind` is checked against §5's exclusivity rule
/// before a new change is accepted.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ChangeRecord {
    pub kind: ChangeKind,
    pub tasks: BTreeMap<TaskId, Task>,
    pub next_task_id: u64,
}

impl ChangeRecord {
    pub fn new(kind: ChangeKind, graph: TaskGraph) -> Self {
        let (tasks, next_task_id) = graph.into_parts();
        ChangeRecord { kind, tasks, next_task_id }
    }

    pub fn graph(&self) -> TaskGraph {
        TaskGraph::from_parts(self.tasks.clone(), self.next_task_id)
    }
}

/// Everything the single source of truth holds, per spec §3/§5: the device state
/// record, the seeded-systems log, recovery-system setup records keyed by label, a
/// mirror of the boot-time modeenv contents, and at most one in-flight change.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct DeviceState {
    pub device: DeviceStateRecord,
    pub seeded_systems: SeededSystemsLog,
    pub recovery_setups: BTreeMap<String, RecoverySystemSetupRecord>,
    pub modeenv: BTreeMap<String, String>,
    pub change: Option<ChangeRecord>,
}

/// The `sqlite`-backed, mutex-free single source of truth. Callers serialise access via
/// an external `Mutex<DataStore>`, matching the "one writer at a time via the state
/// lock" rule; this type itself just owns the connection and the in-memory snapshot.
pub struct DataStore {
    db: Option<sqlite::Connection>,
    state: DeviceState,
    temporary: bool,
}

impl DataStore {
    pub fn open_temporary() -> Result<Self, DeviceError> {
        info!("opening temporary in-memory device state store");
        Ok(Self {
            db: Some(Self::make_datastore_in_memory()?),
            state: DeviceState::default(),
            temporary: true,
        })
    }

    pub fn open(path: &Path) -> Result<Self, DeviceError> {
        info!("loading device state store from {}", path.display());
        let db = sqlite::open(path).structured(InternalError::StateStoreWrite)?;
        let state = Self::read_latest(&db)?.unwrap_or_default();
        Ok(Self { db: Some(db), state, temporary: false })
    }

    pub fn is_persistent(&self) -> bool {
        !self.temporary
    }

    fn make_datastore_in_memory() -> Result<sqlite::Connection, DeviceError> {
        let db = sqlite::open(":memory:").structured(InternalError::StateStoreWrite)?;
        Self::create_table(&db)?;
        Ok(db)
    }

    fn make_datastore(path: &Path) -> Result<sqlite::Connection, DeviceError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).structured(InternalError::StateStoreWrite)?;
        }
        let db = sqlite::open(path).structured(InternalError::StateStoreWrite)?;
        Self::create_table(&db)?;
        Ok(db)
    }

    fn create_table(db: &sqlite::Connection) -> Result<(), DeviceError> {
        db.execute(
            "CREATE TABLE IF NOT EXISTS devicestate (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp DATETIME DEFAULT CURRENT_TIMESTAMP,
                contents TEXT NOT NULL
            )",
        )
        .structured(InternalError::StateStoreWrite)
    }

    fn read_latest(db: &sqlite::Connection) -> Result<Option<DeviceState>, DeviceError> {
        let row = db
            .prepare("SELECT contents FROM devicestate ORDER BY id DESC LIMIT 1")
            .structured(InternalError::StateStoreWrite)?
            .into_iter()
            .next()
            .transpose()
            .structured(InternalError::StateStoreWrite)?;

        match row {
            None => Ok(None),
            Some(row) => {
                let contents = row.read::<&str, _>(0);
                serde_json::from_str(contents)
                    .structured(InternalError::SerializeState)
                    .map(Some)
            }
        }
    }

    fn write_state(db: &sqlite::Connection, state: &DeviceState) -> Result<(), DeviceError> {
        let contents = serde_json::to_string(state).structured(InternalError::SerializeState)?;
        let mut statement = db
            .prepare("INSERT INTO devicestate (contents) VALUES (?)")
            .structured(InternalError::StateStoreWrite)?;
        statement.bind((1, contents.as_str())).structured(InternalError::StateStoreWrite)?;
        statement.next().structured(InternalError::StateStoreWrite)?;
        Ok(())
    }

    /// Makes a temporary store durable at `path`: creates the on-disk database, writes
    /// the current snapshot, and switches future writes to it.
    pub fn persist(&mut self, path: &Path) -> Result<(), DeviceError> {
        if self.temporary {
            let db = Self::make_datastore(path)?;
            Self::write_state(&db, &self.state)?;
            self.db = Some(db);
            self.temporary = false;
        }
        Ok(())
    }

    pub fn state(&self) -> &DeviceState {
        &self.state
    }

    /// Applies `f` to a clone of the current state; if it differs, writes the new
    /// snapshot before returning `f`'s result. A no-op write when `f` makes no change,
    /// so read-only callers don't grow the change log.
    pub fn try_with_state<T>(
        &mut self,
        f: impl FnOnce(&mut DeviceState) -> Result<T, DeviceError>,
    ) -> Result<T, DeviceError> {
        let mut updated = self.state.clone();
        let result = f(&mut updated);
        if updated == self.state {
            return result;
        }
        self.state = updated;

        let write_result = Self::write_state(
            self.db.as_ref().ok_or_else(|| DeviceError::new(InternalError::StateStoreWrite))?,
            &self.state,
        );
        if result.is_ok() {
            write_result?;
        }
        result
    }

    pub fn with_state<T>(&mut self, f: impl FnOnce(&mut DeviceState) -> T) -> Result<T, DeviceError> {
        self.try_with_state(|s| Ok(f(s)))
    }

    /// Closes the connection; required before unmounting the partition holding the
    /// store. Any further write attempt fails.
    pub fn close(&mut self) {
        self.db = None;
    }
}
