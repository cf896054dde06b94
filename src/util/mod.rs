//! Shared utilities.

pub mod telemetry;

pub use telemetry::{init_tracing, init_worker_tracing};
