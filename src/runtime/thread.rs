//! In-process workers on dedicated OS threads.
//!
//! Each worker thread owns a single-threaded tokio runtime, so operations
//! never block the coordinator. Killing a worker cancels its in-flight
//! operation future at the next await point; synchronous operations run to
//! completion and their late result is discarded.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tokio::sync::Notify;
use tracing::{debug, error, warn};

use crate::core::{OperationRegistry, PoolError, WorkerId};
use crate::runtime::launcher::{
    run_worker_loop, Execution, WorkerContext, WorkerEvent, WorkerHandle, WorkerLauncher,
};

/// Launches workers as threads of the current process.
#[derive(Clone)]
pub struct ThreadLauncher {
    registry: Arc<OperationRegistry>,
    stack_size: usize,
}

impl ThreadLauncher {
    /// Default worker thread stack size.
    pub const DEFAULT_STACK_SIZE: usize = 2 * 1024 * 1024;

    /// Workers resolve operations from `registry`.
    #[must_use]
    pub fn new(registry: OperationRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
            stack_size: Self::DEFAULT_STACK_SIZE,
        }
    }

    /// Override the worker thread stack size.
    #[must_use]
    pub const fn with_stack_size(mut self, stack_size: usize) -> Self {
        self.stack_size = stack_size;
        self
    }
}

impl WorkerLauncher for ThreadLauncher {
    fn launch(&self, ctx: WorkerContext) -> Result<Box<dyn WorkerHandle>, PoolError> {
        let worker_id = ctx.worker_id;
        let registry = Arc::clone(&self.registry);
        let kill = Arc::new(Notify::new());
        let kill_signal = Arc::clone(&kill);

        let thread = thread::Builder::new()
            .name(format!("pool-worker-{worker_id}"))
            .stack_size(self.stack_size)
            .spawn(move || worker_thread(&ctx, &registry, &kill_signal))
            .map_err(|e| PoolError::Launch {
                worker_id,
                reason: e.to_string(),
            })?;

        debug!(worker_id, "worker thread started");
        Ok(Box::new(ThreadWorker {
            worker_id,
            kill,
            thread: Some(thread),
        }))
    }
}

fn worker_thread(ctx: &WorkerContext, registry: &OperationRegistry, kill: &Notify) {
    let rt = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            error!(worker_id = ctx.worker_id, error = %e, "failed to create worker runtime");
            ctx.state.retire_worker(ctx.worker_id);
            let _ = ctx.events.send(WorkerEvent::Exited {
                worker_id: ctx.worker_id,
                crashed: true,
            });
            return;
        }
    };

    run_worker_loop(ctx, |task| {
        let run = async {
            tokio::select! {
                biased;
                () = kill.notified() => None,
                result = registry.execute(task) => Some(result),
            }
        };
        match panic::catch_unwind(AssertUnwindSafe(|| rt.block_on(run))) {
            Ok(Some(Ok(output))) => Execution::Completed(output),
            Ok(Some(Err(e))) => Execution::Failed(format!("{e:#}")),
            Ok(None) => Execution::Cancelled,
            Err(_) => Execution::Failed("operation panicked".into()),
        }
    });
}

struct ThreadWorker {
    worker_id: WorkerId,
    kill: Arc<Notify>,
    thread: Option<JoinHandle<()>>,
}

impl WorkerHandle for ThreadWorker {
    fn id(&self) -> WorkerId {
        self.worker_id
    }

    fn pid(&self) -> Option<u32> {
        None
    }

    fn kill(&mut self) -> Result<(), PoolError> {
        // Stores a permit if no operation is awaiting yet.
        self.kill.notify_one();
        Ok(())
    }

    fn join(mut self: Box<Self>) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!(worker_id = self.worker_id, "worker thread panicked");
            }
        }
    }
}
