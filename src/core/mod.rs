//! Core scheduling abstractions: tasks, shared pool state, scaling policy and
//! the control loop.

pub mod error;
pub mod load;
pub mod operation;
pub mod policy;
pub mod pool_state;
pub mod scheduler;
pub mod status;
pub mod task;

pub use error::{AppResult, PoolError};
pub use load::{FixedLoadProbe, LoadProbe, SystemLoadProbe};
pub use operation::{
    EchoOperation, ExecOperation, FnOperation, Operation, OperationRegistry, SleepOperation,
};
pub use policy::{Policy, PoolObservation, ScalingDecision};
pub use pool_state::{FailureDisposition, FailurePolicy, PoolCounts, PoolState};
pub use scheduler::{RunReport, Scheduler};
pub use status::{PoolStatus, StatusSink, TracingStatusSink};
pub use task::{FinishedTask, Task, TaskId, TaskOutcome, TaskSpec, WorkerId};
