//! Configuration models for the scheduler and its policy source.

pub mod policy_source;
pub mod scheduler;

pub use policy_source::{FilePolicySource, PolicyError, PolicySource, SharedPolicySource};
pub use scheduler::SchedulerConfig;
