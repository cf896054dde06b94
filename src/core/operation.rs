//! Task operations and the registry workers resolve them from.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::core::task::Task;

/// The body of work a task performs.
///
/// Operations run on a worker's own single-threaded tokio runtime, so they
/// may block on CPU-bound work without starving the coordinator. Returning
/// an error marks the execution as failed; the pool's failure policy decides
/// what happens next.
///
/// # Example
///
/// ```rust,ignore
/// use async_trait::async_trait;
/// use prometheus_adaptive_pool::core::Operation;
/// use serde_json::Value;
///
/// struct GreensFunction;
///
/// #[async_trait]
/// impl Operation for GreensFunction {
///     async fn run(&self, args: Value) -> anyhow::Result<Value> {
///         let epoch = args["epoch"].as_u64().unwrap_or(0);
///         Ok(serde_json::json!({ "epoch": epoch }))
///     }
/// }
/// ```
#[async_trait]
pub trait Operation: Send + Sync + 'static {
    /// Execute with the task's argument record.
    async fn run(&self, args: Value) -> anyhow::Result<Value>;
}

/// Adapter turning a synchronous closure into an [`Operation`].
pub struct FnOperation<F>(pub F);

#[async_trait]
impl<F> Operation for FnOperation<F>
where
    F: Fn(Value) -> anyhow::Result<Value> + Send + Sync + 'static,
{
    async fn run(&self, args: Value) -> anyhow::Result<Value> {
        (self.0)(args)
    }
}

/// Name-to-operation table shared by every worker of a pool.
#[derive(Clone, Default)]
pub struct OperationRegistry {
    operations: HashMap<String, Arc<dyn Operation>>,
}

impl OperationRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding `sleep`, `echo` and `exec`.
    #[must_use]
    pub fn with_builtins() -> Self {
        Self::new()
            .with("sleep", SleepOperation)
            .with("echo", EchoOperation)
            .with("exec", ExecOperation)
    }

    /// Register `operation` under `name`, replacing any previous entry.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, operation: impl Operation) -> Self {
        self.register(name, operation);
        self
    }

    /// Register `operation` under `name`, replacing any previous entry.
    pub fn register(&mut self, name: impl Into<String>, operation: impl Operation) {
        self.operations.insert(name.into(), Arc::new(operation));
    }

    /// Register a synchronous closure under `name`.
    pub fn register_fn<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(Value) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.register(name, FnOperation(f));
    }

    /// Whether an operation called `name` exists.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.operations.contains_key(name)
    }

    /// Registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.operations.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Run the operation named by `task`.
    ///
    /// # Errors
    ///
    /// Fails if the operation is unknown or the operation itself fails.
    pub async fn execute(&self, task: &Task) -> anyhow::Result<Value> {
        let Some(operation) = self.operations.get(&task.operation) else {
            bail!("unknown operation `{}`", task.operation);
        };
        operation.run(task.args.clone()).await
    }
}

/// `sleep { ms }`: waits, then returns `{ "slept_ms": ms }`.
pub struct SleepOperation;

#[derive(Deserialize)]
struct SleepArgs {
    ms: u64,
}

#[async_trait]
impl Operation for SleepOperation {
    async fn run(&self, args: Value) -> anyhow::Result<Value> {
        let SleepArgs { ms } = serde_json::from_value(args).context("invalid sleep arguments")?;
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(json!({ "slept_ms": ms }))
    }
}

/// `echo`: returns its arguments unchanged.
pub struct EchoOperation;

#[async_trait]
impl Operation for EchoOperation {
    async fn run(&self, args: Value) -> anyhow::Result<Value> {
        Ok(args)
    }
}

/// `exec { program, args?, cwd?, creates?, log? }`: runs an external program.
///
/// When `creates` names a path that already exists the program is not run
/// and `{ "skipped": true }` is returned. A non-zero exit is a failure. The
/// child is killed if the operation is cancelled.
///
/// A worker process talks to the coordinator over its own stdin and stdout,
/// so the program never inherits them: stdin is closed, and stdout goes to
/// `log` (appended) when given, else to the worker's stderr.
pub struct ExecOperation;

#[derive(Deserialize)]
struct ExecArgs {
    program: String,
    #[serde(default)]
    args: Vec<String>,
    cwd: Option<PathBuf>,
    creates: Option<PathBuf>,
    log: Option<PathBuf>,
}

impl ExecArgs {
    fn stdout(&self) -> anyhow::Result<Stdio> {
        let Some(log) = &self.log else {
            return Ok(Stdio::from(std::io::stderr()));
        };
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log)
            .with_context(|| format!("cannot open log {}", log.display()))?;
        Ok(Stdio::from(file))
    }
}

#[async_trait]
impl Operation for ExecOperation {
    async fn run(&self, args: Value) -> anyhow::Result<Value> {
        let exec: ExecArgs = serde_json::from_value(args).context("invalid exec arguments")?;

        if let Some(output) = &exec.creates {
            if output.exists() {
                tracing::info!(output = %output.display(), "output exists, skipping");
                return Ok(json!({ "skipped": true }));
            }
        }

        let mut command = tokio::process::Command::new(&exec.program);
        command
            .args(&exec.args)
            .stdin(Stdio::null())
            .stdout(exec.stdout()?)
            .kill_on_drop(true);
        if let Some(cwd) = &exec.cwd {
            command.current_dir(cwd);
        }

        let status = command
            .status()
            .await
            .with_context(|| format!("failed to start `{}`", exec.program))?;
        if !status.success() {
            bail!("`{}` exited with {status}", exec.program);
        }
        Ok(json!({ "exit_code": status.code() }))
    }
}
