//! Builders to construct a scheduler from configuration and parts.

pub mod scheduler_builder;

pub use scheduler_builder::SchedulerBuilder;
