//! Worker-process side: execute requests from stdin, reply on stdout.

use std::io::{self, BufRead, Write};
use std::panic::{self, AssertUnwindSafe};

use tracing::{debug, info, warn};

use crate::core::{OperationRegistry, PoolError, Task};
use crate::runtime::protocol::{read_message, write_message, WorkerReply, WorkerRequest};

/// Serve requests until the coordinator closes the input stream.
///
/// Operations run on a single-threaded tokio runtime owned by this loop. A
/// panicking operation is reported as a failure and the loop continues.
/// Returns the number of requests served.
///
/// # Errors
///
/// Returns an error if the runtime cannot be built, the streams fail, or a
/// request is malformed.
pub fn serve<R, W>(mut reader: R, mut writer: W, registry: &OperationRegistry) -> Result<usize, PoolError>
where
    R: BufRead,
    W: Write,
{
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    let mut served = 0;
    while let Some(request) = read_message::<_, WorkerRequest>(&mut reader)? {
        let WorkerRequest::Execute { task } = request;
        let reply = execute(&rt, registry, &task);
        write_message(&mut writer, &reply)?;
        served += 1;
    }

    debug!(served, "input closed, worker exiting");
    Ok(served)
}

/// [`serve`] over the process's stdin and stdout.
///
/// # Errors
///
/// See [`serve`].
pub fn serve_stdio(registry: &OperationRegistry) -> Result<usize, PoolError> {
    info!(pid = std::process::id(), "worker process ready");
    let stdin = io::stdin();
    let stdout = io::stdout();
    serve(stdin.lock(), stdout.lock(), registry)
}

fn execute(rt: &tokio::runtime::Runtime, registry: &OperationRegistry, task: &Task) -> WorkerReply {
    debug!(task_id = %task.id, operation = %task.operation, "executing task");
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| rt.block_on(registry.execute(task))));
    match outcome {
        Ok(Ok(output)) => WorkerReply::Completed {
            task_id: task.id,
            output,
        },
        Ok(Err(e)) => WorkerReply::Failed {
            task_id: task.id,
            error: format!("{e:#}"),
        },
        Err(_) => {
            warn!(task_id = %task.id, "operation panicked");
            WorkerReply::Failed {
                task_id: task.id,
                error: "operation panicked".into(),
            }
        }
    }
}
