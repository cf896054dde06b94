//! Workers as OS child processes.
//!
//! Each worker is a child process speaking the line protocol on its
//! stdin/stdout, paired with a link thread in the coordinator that withdraws
//! tasks from `PoolState` on the child's behalf.
//!
//! On unix each worker leads its own process group, and killing a worker
//! sends SIGKILL to the whole group so programs started by `exec` die with
//! it. The link thread then sees end-of-stream and exits.

use std::ffi::OsString;
use std::io::{BufReader, BufWriter};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::thread::{self, JoinHandle};

use tracing::{debug, info, warn};

use crate::core::{PoolError, WorkerId};
use crate::runtime::launcher::{
    run_worker_loop, Execution, WorkerContext, WorkerHandle, WorkerLauncher,
};
use crate::runtime::protocol::{read_message, write_message, WorkerReply, WorkerRequest};

/// Launches each worker as a separate OS process.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: PathBuf,
    args: Vec<OsString>,
    envs: Vec<(OsString, OsString)>,
}

impl ProcessLauncher {
    /// Launch `program`, which must serve the worker protocol on stdio.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
        }
    }

    /// Launch the running executable with the `worker` subcommand.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::Io` if the current executable cannot be located.
    pub fn current_exe_worker() -> Result<Self, PoolError> {
        Ok(Self::new(std::env::current_exe()?).arg("worker"))
    }

    /// Append a command-line argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Set an environment variable for every worker.
    #[must_use]
    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }
}

impl WorkerLauncher for ProcessLauncher {
    fn launch(&self, ctx: WorkerContext) -> Result<Box<dyn WorkerHandle>, PoolError> {
        let worker_id = ctx.worker_id;
        let launch_error = |reason: String| PoolError::Launch { worker_id, reason };

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .envs(self.envs.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }
        let mut child = command
            .spawn()
            .map_err(|e| launch_error(format!("{}: {e}", self.program.display())))?;

        let pid = child.id();
        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(launch_error("child stdio not captured".into()));
        };

        let link = thread::Builder::new()
            .name(format!("pool-link-{worker_id}"))
            .spawn(move || link_loop(&ctx, stdin, stdout));
        let link = match link {
            Ok(handle) => handle,
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(launch_error(e.to_string()));
            }
        };

        info!(worker_id, pid, "worker process started");
        Ok(Box::new(ProcessWorker {
            worker_id,
            child,
            link: Some(link),
        }))
    }
}

fn link_loop(ctx: &WorkerContext, stdin: ChildStdin, stdout: ChildStdout) {
    let mut writer = BufWriter::new(stdin);
    let mut reader = BufReader::new(stdout);

    run_worker_loop(ctx, |task| {
        let request = WorkerRequest::Execute { task: task.clone() };
        if let Err(e) = write_message(&mut writer, &request) {
            return Execution::Undelivered(e.to_string());
        }
        match read_message::<_, WorkerReply>(&mut reader) {
            Ok(Some(reply)) if reply.task_id() != task.id => Execution::Lost(format!(
                "reply for task {} while running {}",
                reply.task_id(),
                task.id
            )),
            Ok(Some(WorkerReply::Completed { output, .. })) => Execution::Completed(output),
            Ok(Some(WorkerReply::Failed { error, .. })) => Execution::Failed(error),
            Ok(None) => Execution::Lost("worker closed its output".into()),
            Err(e) => Execution::Lost(e.to_string()),
        }
    });
    // Dropping the writer closes the child's stdin, which ends its serve loop.
}

/// SIGKILL the process group led by `pid`. Returns false when the group
/// could not be signalled, leaving the caller to kill the leader alone.
#[cfg(unix)]
fn kill_group(pid: u32) -> bool {
    match Command::new("kill")
        .args(["-KILL", "--", &format!("-{pid}")])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
    {
        Ok(status) if status.success() => true,
        Ok(status) => {
            debug!(pid, %status, "process group kill refused");
            false
        }
        Err(e) => {
            warn!(pid, error = %e, "failed to run kill");
            false
        }
    }
}

#[cfg(not(unix))]
const fn kill_group(_pid: u32) -> bool {
    false
}

struct ProcessWorker {
    worker_id: WorkerId,
    child: Child,
    link: Option<JoinHandle<()>>,
}

impl WorkerHandle for ProcessWorker {
    fn id(&self) -> WorkerId {
        self.worker_id
    }

    fn pid(&self) -> Option<u32> {
        Some(self.child.id())
    }

    fn kill(&mut self) -> Result<(), PoolError> {
        let pid = self.child.id();
        debug!(worker_id = self.worker_id, pid, "killing worker process group");
        if !kill_group(pid) {
            self.child.kill()?;
        }
        Ok(())
    }

    fn join(mut self: Box<Self>) {
        if let Some(link) = self.link.take() {
            if link.join().is_err() {
                warn!(worker_id = self.worker_id, "link thread panicked");
            }
        }
        match self.child.wait() {
            Ok(status) => debug!(worker_id = self.worker_id, %status, "worker process reaped"),
            Err(e) => warn!(worker_id = self.worker_id, error = %e, "failed to reap worker process"),
        }
    }
}
