//! Wire protocol between the coordinator and a worker process.
//!
//! One JSON object per line. The coordinator writes a request to the
//! worker's stdin and reads exactly one reply from its stdout before sending
//! the next request.

use std::io::{BufRead, Write};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::{PoolError, Task, TaskId};

/// Coordinator to worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerRequest {
    /// Run this task and reply.
    Execute {
        /// Task to run.
        task: Task,
    },
}

/// Worker to coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerReply {
    /// The operation returned normally.
    Completed {
        /// Task the reply belongs to.
        task_id: TaskId,
        /// Returned value.
        output: Value,
    },
    /// The operation failed.
    Failed {
        /// Task the reply belongs to.
        task_id: TaskId,
        /// Failure message.
        error: String,
    },
}

impl WorkerReply {
    /// Task the reply belongs to.
    #[must_use]
    pub const fn task_id(&self) -> TaskId {
        match self {
            Self::Completed { task_id, .. } | Self::Failed { task_id, .. } => *task_id,
        }
    }
}

/// Write one message as a line and flush.
///
/// # Errors
///
/// Returns `PoolError::Io` if the stream is closed.
pub fn write_message<W: Write, T: Serialize>(writer: &mut W, message: &T) -> Result<(), PoolError> {
    let mut line = serde_json::to_vec(message).map_err(|e| PoolError::Protocol(e.to_string()))?;
    line.push(b'\n');
    writer.write_all(&line)?;
    writer.flush()?;
    Ok(())
}

/// Read the next message, skipping blank lines. `Ok(None)` at end of stream.
///
/// # Errors
///
/// Returns `PoolError::Io` on read failure and `PoolError::Protocol` if the
/// line is not a valid message.
pub fn read_message<R: BufRead, T: DeserializeOwned>(reader: &mut R) -> Result<Option<T>, PoolError> {
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        return serde_json::from_str(trimmed)
            .map(Some)
            .map_err(|e| PoolError::Protocol(format!("{e}: {trimmed}")));
    }
}
