//! Task identity, submission records, and completion records.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Stable identity of a task for the lifetime of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    /// Generate a fresh random identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identifier the scheduler assigns to each worker it spawns.
pub type WorkerId = u64;

/// An immutable unit of work: a named operation plus its argument record.
///
/// Tasks are shared as `Arc<Task>` while they move between queues, and are
/// serialized whole when handed to a worker process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Stable identity.
    pub id: TaskId,
    /// Name of the operation to run, resolved by the worker's registry.
    pub operation: String,
    /// Structured arguments passed to the operation.
    #[serde(default)]
    pub args: Value,
}

impl Task {
    /// Create a task with a generated identifier.
    pub fn new(operation: impl Into<String>, args: Value) -> Self {
        Self {
            id: TaskId::new(),
            operation: operation.into(),
            args,
        }
    }
}

/// Caller-facing submission record. The identifier is optional and
/// generated when absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Optional caller-chosen identity.
    #[serde(default)]
    pub id: Option<TaskId>,
    /// Operation name.
    pub operation: String,
    /// Operation arguments.
    #[serde(default)]
    pub args: Value,
}

impl From<TaskSpec> for Task {
    fn from(spec: TaskSpec) -> Self {
        Self {
            id: spec.id.unwrap_or_default(),
            operation: spec.operation,
            args: spec.args,
        }
    }
}

/// Result of one completed execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskOutcome {
    /// The operation returned normally.
    Succeeded {
        /// Value returned by the operation.
        output: Value,
    },
    /// The operation failed and the failure policy gave up on it.
    Failed {
        /// Failure message of the last attempt.
        error: String,
    },
}

impl TaskOutcome {
    /// Whether the task ended in failure.
    #[must_use]
    pub const fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// Entry of the append-only finished log.
#[derive(Debug, Clone)]
pub struct FinishedTask {
    /// The task that finished.
    pub task: std::sync::Arc<Task>,
    /// Worker that produced the final outcome.
    pub worker_id: WorkerId,
    /// Final outcome.
    pub outcome: TaskOutcome,
    /// Number of executions that ended in failure, including the last.
    pub failed_attempts: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_submission_without_id_gets_one() {
        let spec: TaskSpec =
            serde_json::from_value(json!({"operation": "sleep", "args": {"ms": 5}})).unwrap();
        let task = Task::from(spec);
        assert_eq!(task.operation, "sleep");
        assert_eq!(task.args["ms"], 5);
    }

    #[test]
    fn test_spec_keeps_caller_id() {
        let id = TaskId::new();
        let spec = TaskSpec { id: Some(id), operation: "echo".into(), args: Value::Null };
        assert_eq!(Task::from(spec).id, id);
    }

    #[test]
    fn test_outcome_tagging() {
        let outcome = TaskOutcome::Failed { error: "boom".into() };
        let encoded = serde_json::to_value(&outcome).unwrap();
        assert_eq!(encoded, json!({"status": "failed", "error": "boom"}));
        assert!(outcome.is_failed());
    }
}
