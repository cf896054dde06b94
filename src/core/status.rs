//! Read-only pool status published once per scheduling cycle.

use serde::Serialize;
use tracing::info;

use crate::core::{Policy, PoolCounts};

/// What an operator display needs to render the pool.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoolStatus {
    /// Cycle number, starting at 1.
    pub cycle: u64,
    /// Container sizes.
    pub counts: PoolCounts,
    /// Workers alive after this cycle's spawn and kill.
    pub live_workers: usize,
    /// Policy in force, if one has ever loaded.
    pub policy: Option<Policy>,
    /// Spare capacity sampled this cycle (dynamic policies only).
    pub spare_capacity: Option<f64>,
}

/// Receives a status snapshot every cycle.
pub trait StatusSink: Send {
    /// Handle one snapshot.
    fn report(&mut self, status: &PoolStatus);
}

impl<F> StatusSink for F
where
    F: FnMut(&PoolStatus) + Send,
{
    fn report(&mut self, status: &PoolStatus) {
        self(status);
    }
}

/// Logs each snapshot as a structured `info` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingStatusSink;

impl StatusSink for TracingStatusSink {
    fn report(&mut self, status: &PoolStatus) {
        let c = status.counts;
        info!(
            cycle = status.cycle,
            live_workers = status.live_workers,
            waiting = c.waiting,
            retry = c.retry,
            running = c.running,
            finished = c.finished,
            failed = c.failed,
            total = c.total,
            policy = ?status.policy,
            spare_capacity = ?status.spare_capacity,
            "pool status"
        );
    }
}
