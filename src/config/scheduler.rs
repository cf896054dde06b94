//! Scheduler configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::FailurePolicy;

/// Tuning knobs for one batch run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Upper bound of the waiting queue.
    pub waiting_capacity: usize,
    /// Longest pause between two scheduling cycles, in milliseconds.
    pub cycle_interval_ms: u64,
    /// Window over which spare capacity is sampled, in milliseconds.
    pub load_sample_ms: u64,
    /// What to do with tasks whose operation fails.
    pub failure_policy: FailurePolicy,
    /// Consecutive worker crashes, with no task progress in between, after
    /// which the run is aborted.
    pub max_crash_streak: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            waiting_capacity: 200,
            cycle_interval_ms: 500,
            load_sample_ms: 200,
            failure_policy: FailurePolicy::FinishWithError,
            max_crash_streak: 8,
        }
    }
}

impl SchedulerConfig {
    /// Create a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the waiting queue bound.
    #[must_use]
    pub const fn with_waiting_capacity(mut self, capacity: usize) -> Self {
        self.waiting_capacity = capacity;
        self
    }

    /// Set the longest pause between cycles.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn with_cycle_interval(mut self, interval: Duration) -> Self {
        self.cycle_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Set the spare-capacity sampling window.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn with_load_sample(mut self, window: Duration) -> Self {
        self.load_sample_ms = window.as_millis() as u64;
        self
    }

    /// Set the failure policy.
    #[must_use]
    pub const fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Set the crash streak that aborts a run.
    #[must_use]
    pub const fn with_max_crash_streak(mut self, streak: u32) -> Self {
        self.max_crash_streak = streak;
        self
    }

    /// Longest pause between cycles.
    #[must_use]
    pub const fn cycle_interval(&self) -> Duration {
        Duration::from_millis(self.cycle_interval_ms)
    }

    /// Spare-capacity sampling window.
    #[must_use]
    pub const fn load_sample(&self) -> Duration {
        Duration::from_millis(self.load_sample_ms)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid value.
    pub fn validate(&self) -> Result<(), String> {
        if self.waiting_capacity == 0 {
            return Err("waiting_capacity must be greater than 0".into());
        }
        if self.cycle_interval_ms == 0 {
            return Err("cycle_interval_ms must be greater than 0".into());
        }
        if self.max_crash_streak == 0 {
            return Err("max_crash_streak must be greater than 0".into());
        }
        if let FailurePolicy::Retry { max_attempts: 0 } = self.failure_policy {
            return Err("failure_policy.max_attempts must be at least 1".into());
        }
        Ok(())
    }

    /// Parse configuration from a JSON string and validate. Missing fields
    /// take their default values.
    ///
    /// # Errors
    ///
    /// Returns a description of the parse or validation failure.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = SchedulerConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.waiting_capacity, 200);
        assert_eq!(cfg.cycle_interval(), Duration::from_millis(500));
        assert_eq!(cfg.max_crash_streak, 8);
    }

    #[test]
    fn test_builder_methods() {
        let cfg = SchedulerConfig::new()
            .with_waiting_capacity(16)
            .with_cycle_interval(Duration::from_millis(20))
            .with_failure_policy(FailurePolicy::Retry { max_attempts: 2 });
        assert_eq!(cfg.waiting_capacity, 16);
        assert_eq!(cfg.cycle_interval_ms, 20);
        assert_eq!(cfg.failure_policy, FailurePolicy::Retry { max_attempts: 2 });
    }

    #[test]
    fn test_zero_crash_streak_rejected() {
        let cfg = SchedulerConfig::new().with_max_crash_streak(0);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let cfg = SchedulerConfig::new().with_failure_policy(FailurePolicy::Retry { max_attempts: 0 });
        assert!(cfg.validate().is_err());
    }
}
