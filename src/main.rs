//! adaptive-pool: run a batch of tasks over an adaptively sized pool of
//! worker processes.
//!
//! ```text
//! adaptive-pool run --tasks tasks.json --policy pool.config
//! ```
//!
//! The policy file is re-read every cycle, so editing it resizes the running
//! pool. The same binary doubles as the worker process (`worker` subcommand).

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use prometheus_adaptive_pool::builders::SchedulerBuilder;
use prometheus_adaptive_pool::config::{FilePolicySource, SchedulerConfig};
use prometheus_adaptive_pool::core::{AppResult, OperationRegistry, RunReport, Task, TaskSpec};
use prometheus_adaptive_pool::runtime::{serve_stdio, ProcessLauncher};
use prometheus_adaptive_pool::util::{init_tracing, init_worker_tracing};

// ── CLI ─────────────────────────────────────────────────────────────

/// Adaptive worker pool: runs long tasks on a pool that grows and shrinks
/// with host load or an operator-edited policy file.
#[derive(Parser, Debug)]
#[command(name = "adaptive-pool", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a batch of tasks to completion.
    Run {
        /// JSON array of tasks: `[{"operation": "sleep", "args": {"ms": 500}}]`.
        #[arg(long, env = "POOL_TASKS")]
        tasks: PathBuf,

        /// Policy file, re-read every cycle (`.json` or `KEY=VALUE`).
        #[arg(long, env = "POOL_POLICY", default_value = "pool.config")]
        policy: PathBuf,

        /// Scheduler configuration (JSON). Defaults apply when omitted.
        #[arg(long, env = "POOL_CONFIG")]
        config: Option<PathBuf>,

        /// Worker executable; defaults to this binary's `worker` subcommand.
        #[arg(long, env = "POOL_WORKER_PROGRAM")]
        worker_program: Option<PathBuf>,

        /// Number of most recently finished tasks to print.
        #[arg(long, default_value_t = 10)]
        show_recent: usize,
    },
    /// Serve the worker protocol on stdin/stdout.
    #[command(hide = true)]
    Worker,
}

// ── main ────────────────────────────────────────────────────────────

fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Worker => run_worker(),
        Command::Run {
            tasks,
            policy,
            config,
            worker_program,
            show_recent,
        } => run_batch(&tasks, policy, config.as_deref(), worker_program, show_recent),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("adaptive-pool: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run_worker() -> AppResult<ExitCode> {
    init_worker_tracing();
    serve_stdio(&OperationRegistry::with_builtins())?;
    Ok(ExitCode::SUCCESS)
}

fn run_batch(
    tasks_path: &std::path::Path,
    policy: PathBuf,
    config_path: Option<&std::path::Path>,
    worker_program: Option<PathBuf>,
    show_recent: usize,
) -> AppResult<ExitCode> {
    init_tracing();

    let config = match config_path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            SchedulerConfig::from_json_str(&raw)
                .map_err(|e| anyhow::anyhow!("config {}: {e}", path.display()))?
        }
        None => SchedulerConfig::default(),
    };

    let raw = std::fs::read_to_string(tasks_path)
        .with_context(|| format!("reading tasks {}", tasks_path.display()))?;
    let specs: Vec<TaskSpec> = serde_json::from_str(&raw)
        .with_context(|| format!("parsing tasks {}", tasks_path.display()))?;
    info!(tasks = specs.len(), policy = %policy.display(), "starting batch");

    let launcher = match worker_program {
        Some(program) => ProcessLauncher::new(program).arg("worker"),
        None => ProcessLauncher::current_exe_worker()?,
    };

    let scheduler = SchedulerBuilder::new()
        .config(config)
        .tasks(specs.into_iter().map(Task::from))
        .launcher(launcher)
        .policy_source(FilePolicySource::new(policy))
        .build()?;
    let state = scheduler.state();
    let report = scheduler.run()?;

    print_summary(&report);
    for finished in state.recent_finished(show_recent) {
        println!(
            "  {} {} by worker {}: {}",
            finished.task.id,
            finished.task.operation,
            finished.worker_id,
            serde_json::to_string(&finished.outcome)?
        );
    }

    let failed = report.failed().count();
    if failed > 0 {
        warn!(failed, "some tasks finished with errors");
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

fn print_summary(report: &RunReport) {
    println!(
        "finished {}/{} tasks ({} failed) in {} cycles",
        report.finished.len(),
        report.total,
        report.failed().count(),
        report.cycles
    );
    println!(
        "workers: {} spawned, {} killed, {} crashed; peak running {}; policy errors {}",
        report.workers_spawned,
        report.workers_killed,
        report.workers_crashed,
        report.peak_running,
        report.policy_errors
    );
}
