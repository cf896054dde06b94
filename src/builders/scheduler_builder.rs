//! Builder assembling a [`Scheduler`] from a config, a task batch, a worker
//! backend and a policy source.

use crate::config::{PolicySource, SchedulerConfig};
use crate::core::{LoadProbe, PoolError, Scheduler, StatusSink, Task};
use crate::runtime::WorkerLauncher;

/// Collects the parts of a [`Scheduler`]. The launcher and policy source are
/// required; everything else has a default.
#[derive(Default)]
pub struct SchedulerBuilder {
    config: SchedulerConfig,
    tasks: Vec<Task>,
    launcher: Option<Box<dyn WorkerLauncher>>,
    policy_source: Option<Box<dyn PolicySource>>,
    probe: Option<Box<dyn LoadProbe>>,
    status_sink: Option<Box<dyn StatusSink>>,
}

impl SchedulerBuilder {
    /// Start from the default configuration and an empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the scheduler configuration.
    #[must_use]
    pub fn config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    /// Append one task to the batch.
    #[must_use]
    pub fn task(mut self, task: Task) -> Self {
        self.tasks.push(task);
        self
    }

    /// Append tasks to the batch, preserving their order.
    #[must_use]
    pub fn tasks(mut self, tasks: impl IntoIterator<Item = Task>) -> Self {
        self.tasks.extend(tasks);
        self
    }

    /// Worker backend.
    #[must_use]
    pub fn launcher(mut self, launcher: impl WorkerLauncher + 'static) -> Self {
        self.launcher = Some(Box::new(launcher));
        self
    }

    /// Where the policy is re-read from each cycle.
    #[must_use]
    pub fn policy_source(mut self, source: impl PolicySource + 'static) -> Self {
        self.policy_source = Some(Box::new(source));
        self
    }

    /// Spare-capacity probe; defaults to sampling the host CPU.
    #[must_use]
    pub fn probe(mut self, probe: impl LoadProbe + 'static) -> Self {
        self.probe = Some(Box::new(probe));
        self
    }

    /// Per-cycle status sink; defaults to logging.
    #[must_use]
    pub fn status_sink(mut self, sink: impl StatusSink + 'static) -> Self {
        self.status_sink = Some(Box::new(sink));
        self
    }

    /// Validate and build.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::InvalidConfig` if the launcher or policy source is
    /// missing or the configuration is invalid, and `PoolError::BatchTooLarge`
    /// if the batch exceeds the waiting capacity.
    pub fn build(self) -> Result<Scheduler, PoolError> {
        let launcher = self
            .launcher
            .ok_or_else(|| PoolError::InvalidConfig("a worker launcher is required".into()))?;
        let policy_source = self
            .policy_source
            .ok_or_else(|| PoolError::InvalidConfig("a policy source is required".into()))?;

        let mut scheduler = Scheduler::from_parts(self.config, self.tasks, launcher, policy_source)?;
        if let Some(probe) = self.probe {
            scheduler = scheduler.with_boxed_probe(probe);
        }
        if let Some(sink) = self.status_sink {
            scheduler = scheduler.with_boxed_status_sink(sink);
        }
        Ok(scheduler)
    }
}
