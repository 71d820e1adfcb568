use std::time::Duration;

use devicectl_api::{
    error::DeviceError,
    task::{Task, TaskGraph, TaskId, TaskStatus},
};
use log::{info, warn};

/// What a dispatched task reported back to the runner, per spec §5's suspension points.
pub enum TaskOutcome {
    Done,
    RetryAfter(Duration),
    WaitForReboot,
}

/// How a `run_change` call ended.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RunOutcome {
    Finished,
    SuspendedForReboot,
    SuspendedForRetry,
}

/// Dispatches one task by kind, and undoes a completed task when a later sibling fails.
/// Stands in for the package manager, bootloader, and assertion-database collaborators
/// that actually own most task kinds (out of scope per spec §1); this trait only carries
/// the shape the runner needs to exercise a plan.
pub trait TaskDispatcher {
    fn dispatch(&mut self, task: &Task) -> Result<TaskOutcome, DeviceError>;

    /// Reverses a completed task's effect during undo. A no-op by default: most task
    /// kinds this controller emits (snap install, recovery-system assembly) delegate
    /// their actual undo to the external subsystem that performed the forward action.
    fn undo(&mut self, task: &Task) {
        let _ = task;
    }
}

/// Drives `graph` to completion or to the next suspension point, one ready task at a
/// time. I/O happens inside `dispatcher.dispatch`; callers hold the state lock for
/// everything except that call, matching spec §5's "lock released during I/O" rule.
pub fn run_change(
    graph: &mut TaskGraph,
    dispatcher: &mut impl TaskDispatcher,
) -> Result<RunOutcome, DeviceError> {
    let mut completed: Vec<TaskId> = Vec::new();

    loop {
        let ready = graph.ready();
        let Some(&next) = ready.first() else {
            return Ok(if graph.is_finished() {
                RunOutcome::Finished
            } else {
                RunOutcome::SuspendedForRetry
            });
        };

        graph.set_status(next, TaskStatus::Doing);
        let task = graph.get(next).expect("ready task must exist").clone();
        info!("Running task {} ({})", task.id, task.kind);

        match dispatcher.dispatch(&task) {
            Ok(TaskOutcome::Done) => {
                graph.set_status(next, TaskStatus::Done);
                completed.push(next);
                if task.restart_boundary {
                    info!("task {} is a restart boundary, suspending change", task.id);
                    return Ok(RunOutcome::SuspendedForReboot);
                }
            }
            Ok(TaskOutcome::WaitForReboot) => {
                graph.set_status(next, TaskStatus::Hold);
                return Ok(RunOutcome::SuspendedForReboot);
            }
            Ok(TaskOutcome::RetryAfter(delay)) => {
                info!("task {} requested retry after {:?}", task.id, delay);
                graph.set_status(next, TaskStatus::Do);
                return Ok(RunOutcome::SuspendedForRetry);
            }
            Err(err) => {
                warn!("task {} failed: {}", task.id, err.summary());
                graph.set_status(next, TaskStatus::Error);
                for id in completed.into_iter().rev() {
                    graph.set_status(id, TaskStatus::Undoing);
                    let undone = graph.get(id).expect("completed task must exist").clone();
                    dispatcher.undo(&undone);
                    graph.set_status(id, TaskStatus::Undone);
                }
                return Err(err);
            }
        }
    }
}

/// Logs every dispatched task and reports it done immediately. Exists so a plan can be
/// driven end-to-end from the CLI and from tests without the external collaborators
/// (package manager, bootloader, assertion database) actually being wired in.
#[derive(Default)]
pub struct LoggingDispatcher;

impl TaskDispatcher for LoggingDispatcher {
    fn dispatch(&mut self, task: &Task) -> Result<TaskOutcome, DeviceError> {
        info!("dispatch: {}", task.kind);
        Ok(TaskOutcome::Done)
    }
}
