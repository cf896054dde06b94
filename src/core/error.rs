//! Error types for pool and scheduler operations.

use thiserror::Error;

use crate::config::PolicyError;

/// Errors produced by pool components.
#[derive(Debug, Error)]
pub enum PoolError {
    /// The waiting queue is at capacity.
    #[error("waiting queue full (capacity {0})")]
    QueueFull(usize),
    /// A batch was larger than the free space of the waiting queue.
    #[error("batch of {batch} tasks exceeds waiting queue capacity {capacity}")]
    BatchTooLarge {
        /// Number of tasks in the rejected batch.
        batch: usize,
        /// Configured waiting capacity.
        capacity: usize,
    },
    /// A task id was submitted twice.
    #[error("duplicate task id {0}")]
    DuplicateTask(crate::core::TaskId),
    /// The pool no longer accepts work.
    #[error("pool has been closed")]
    PoolClosed,
    /// Configuration validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// The policy source could not be read or parsed.
    #[error("policy error: {0}")]
    Policy(#[from] PolicyError),
    /// A worker could not be started.
    #[error("failed to launch worker {worker_id}: {reason}")]
    Launch {
        /// Worker that failed to start.
        worker_id: u64,
        /// Underlying cause.
        reason: String,
    },
    /// Workers kept dying without any task making progress.
    #[error("{crashes} consecutive worker crashes without task progress")]
    CrashLoop {
        /// Length of the crash streak.
        crashes: u32,
    },
    /// A worker sent something that is not a valid protocol message.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// Underlying I/O failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_error_display() {
        let err = PoolError::QueueFull(200);
        assert_eq!(err.to_string(), "waiting queue full (capacity 200)");

        let err = PoolError::BatchTooLarge { batch: 300, capacity: 200 };
        assert_eq!(
            err.to_string(),
            "batch of 300 tasks exceeds waiting queue capacity 200"
        );

        let err = PoolError::Launch { worker_id: 3, reason: "no such file".into() };
        assert_eq!(err.to_string(), "failed to launch worker 3: no such file");
    }

    #[test]
    fn test_policy_error_converts() {
        let err: PoolError = PolicyError::MissingKey("mode").into();
        assert_eq!(err.to_string(), "policy error: missing key `mode`");
    }
}
