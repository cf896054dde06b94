//! # Prometheus Adaptive Pool
//!
//! Runs a batch of independent, long-running tasks across a pool of worker
//! processes whose size adapts to host load or to an operator-edited policy,
//! without ever losing a task when a worker is killed.
//!
//! ## How it works
//!
//! - **Shared pool state**: tasks move between `Waiting`, `Retry`, `Running`
//!   and `Finished` under one lock. Every task is always in exactly one of
//!   them.
//! - **Workers**: each worker withdraws a task (retries first), executes it,
//!   and records the outcome. Workers are real OS processes
//!   ([`runtime::ProcessLauncher`]) or, when embedding, threads
//!   ([`runtime::ThreadLauncher`]).
//! - **Control loop**: once per cycle the [`core::Scheduler`] re-reads its
//!   [`core::Policy`], samples spare CPU when the policy is dynamic, and
//!   spawns or kills workers. A killed worker's task goes back to `Retry`.
//!
//! ```rust,ignore
//! use prometheus_adaptive_pool::builders::SchedulerBuilder;
//! use prometheus_adaptive_pool::config::{FilePolicySource, SchedulerConfig};
//! use prometheus_adaptive_pool::core::{OperationRegistry, Task};
//! use prometheus_adaptive_pool::runtime::ThreadLauncher;
//! use serde_json::json;
//!
//! let report = SchedulerBuilder::new()
//!     .config(SchedulerConfig::new())
//!     .tasks((0..10).map(|epoch| Task::new("sleep", json!({ "ms": 100 * epoch }))))
//!     .launcher(ThreadLauncher::new(OperationRegistry::with_builtins()))
//!     .policy_source(FilePolicySource::new("pool.config"))
//!     .build()?
//!     .run()?;
//! assert_eq!(report.finished.len(), 10);
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Tasks, pool state, scaling policy and the control loop.
pub mod core;
/// Configuration models for the scheduler and its policy source.
pub mod config;
/// Builders to construct a scheduler from configuration.
pub mod builders;
/// Worker backends and the coordinator/worker protocol.
pub mod runtime;
/// Shared utilities.
pub mod util;
