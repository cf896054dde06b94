//! Backend-neutral worker contract and the shared execution loop.

use std::sync::Arc;

use crossbeam_channel::Sender;
use serde_json::Value;
use tracing::{debug, warn};

use crate::core::{FailureDisposition, PoolError, PoolState, Task, WorkerId};

/// Notifications a worker sends to the scheduler. Any event wakes the
/// control loop before its cycle interval elapses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    /// A task finished (successfully or with a final error).
    TaskFinished {
        /// Reporting worker.
        worker_id: WorkerId,
    },
    /// A failed task went back onto the retry queue.
    TaskRequeued {
        /// Reporting worker.
        worker_id: WorkerId,
    },
    /// The worker stopped.
    Exited {
        /// Worker that stopped.
        worker_id: WorkerId,
        /// True when it stopped without being retired first.
        crashed: bool,
    },
}

/// Everything a worker is bound to.
#[derive(Clone)]
pub struct WorkerContext {
    /// Identity assigned by the scheduler; already registered in `state`.
    pub worker_id: WorkerId,
    /// Shared queues.
    pub state: Arc<PoolState>,
    /// Channel back to the scheduler.
    pub events: Sender<WorkerEvent>,
}

/// Starts workers of one kind.
pub trait WorkerLauncher: Send {
    /// Start a worker bound to `ctx`. The worker begins withdrawing at once.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::Launch` if the worker could not be started.
    fn launch(&self, ctx: WorkerContext) -> Result<Box<dyn WorkerHandle>, PoolError>;
}

/// Scheduler-side handle to one running worker.
pub trait WorkerHandle: Send {
    /// Scheduler-assigned identity.
    fn id(&self) -> WorkerId;

    /// OS process id, when the worker is a separate process.
    fn pid(&self) -> Option<u32>;

    /// Forcefully stop the worker. The caller retires the worker in
    /// `PoolState` first so its task is already requeued.
    ///
    /// # Errors
    ///
    /// Returns an error if the kill signal could not be delivered.
    fn kill(&mut self) -> Result<(), PoolError>;

    /// Block until the worker has fully stopped.
    fn join(self: Box<Self>);
}

/// Result of executing one task on a backend.
#[derive(Debug)]
pub(crate) enum Execution {
    /// The operation returned a value.
    Completed(Value),
    /// The operation returned an error.
    Failed(String),
    /// The worker was killed while executing.
    Cancelled,
    /// The backend lost contact with the executor.
    Lost(String),
    /// The request never reached the executor, which was already gone.
    Undelivered(String),
}

/// How a worker loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LoopExit {
    /// Retired or pool closed while idle.
    Retired,
    /// Killed while executing.
    Killed,
    /// Executor died on its own.
    Crashed,
}

/// Withdraw, execute, record, repeat; then announce the exit.
///
/// An executor lost without retirement counts as a failed execution of the
/// held task, so a task that reliably kills its worker still terminates
/// under the failure policy. An executor that was already gone before the
/// task reached it never ran the task: the task is requeued untouched.
pub(crate) fn run_worker_loop<F>(ctx: &WorkerContext, mut execute: F) -> LoopExit
where
    F: FnMut(&Task) -> Execution,
{
    let worker_id = ctx.worker_id;
    let exit = loop {
        let Some(task) = ctx.state.withdraw(worker_id) else {
            break LoopExit::Retired;
        };
        debug!(worker_id, task_id = %task.id, operation = %task.operation, "executing task");

        match execute(&task) {
            Execution::Completed(output) => {
                if ctx.state.mark_finished(worker_id, output).is_some() {
                    debug!(worker_id, task_id = %task.id, "task finished");
                    let _ = ctx.events.send(WorkerEvent::TaskFinished { worker_id });
                }
            }
            Execution::Failed(error) => {
                warn!(worker_id, task_id = %task.id, %error, "task failed");
                report_failure(ctx, error);
            }
            Execution::Cancelled => break LoopExit::Killed,
            Execution::Lost(reason) => {
                if !ctx.state.is_registered(worker_id) {
                    break LoopExit::Killed;
                }
                warn!(worker_id, task_id = %task.id, %reason, "worker lost while executing");
                report_failure(ctx, format!("worker exited: {reason}"));
                ctx.state.retire_worker(worker_id);
                break LoopExit::Crashed;
            }
            Execution::Undelivered(reason) => {
                if !ctx.state.is_registered(worker_id) {
                    break LoopExit::Killed;
                }
                warn!(worker_id, task_id = %task.id, %reason, "worker gone before task was delivered");
                ctx.state.mark_interrupted(worker_id);
                ctx.state.retire_worker(worker_id);
                break LoopExit::Crashed;
            }
        }
    };

    debug!(worker_id, ?exit, "worker loop exiting");
    let _ = ctx.events.send(WorkerEvent::Exited {
        worker_id,
        crashed: exit == LoopExit::Crashed,
    });
    exit
}

fn report_failure(ctx: &WorkerContext, error: String) {
    let worker_id = ctx.worker_id;
    match ctx.state.mark_failed(worker_id, error) {
        Some(FailureDisposition::Retried { attempt }) => {
            debug!(worker_id, attempt, "failed task requeued");
            let _ = ctx.events.send(WorkerEvent::TaskRequeued { worker_id });
        }
        Some(FailureDisposition::Finished { attempts }) => {
            debug!(worker_id, attempts, "failed task finished with error");
            let _ = ctx.events.send(WorkerEvent::TaskFinished { worker_id });
        }
        None => {}
    }
}
