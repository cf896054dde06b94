//! Worker backends: how a worker is started, stopped, and fed tasks.
//!
//! Every backend drives the same loop against [`PoolState`](crate::core::PoolState):
//! withdraw, execute, record, repeat, until the worker is retired.

pub mod launcher;
pub mod process;
pub mod protocol;
pub mod serve;
pub mod thread;

pub use launcher::{WorkerContext, WorkerEvent, WorkerHandle, WorkerLauncher};
pub use process::ProcessLauncher;
pub use protocol::{WorkerReply, WorkerRequest};
pub use serve::{serve, serve_stdio};
pub use thread::ThreadLauncher;
