//! Desired pool shape and the per-cycle scaling decision.

use serde::{Deserialize, Serialize};

/// Target pool shape supplied by the operator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Policy {
    /// Keep exactly `target` workers alive.
    Static {
        /// Desired worker count.
        target: usize,
    },
    /// Grow while spare capacity is above `grow_threshold`, shrink while it
    /// is below `shrink_threshold`.
    Dynamic {
        /// Spare-capacity level above which workers are added.
        grow_threshold: f64,
        /// Spare-capacity level below which workers are removed.
        shrink_threshold: f64,
    },
}

/// Inputs to one scaling decision.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoolObservation {
    /// Workers currently alive.
    pub live_workers: usize,
    /// Tasks not yet held by any worker.
    pub remaining: usize,
    /// Measured spare capacity; only consulted by dynamic policies.
    pub spare_capacity: f64,
}

/// How many workers to add and remove this cycle. Spawning happens first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScalingDecision {
    /// Workers to start.
    pub spawn: usize,
    /// Workers to kill.
    pub kill: usize,
}

impl Policy {
    /// Whether deciding requires a spare-capacity sample.
    #[must_use]
    pub const fn needs_load(&self) -> bool {
        matches!(self, Self::Dynamic { .. })
    }

    /// Compute the worker delta for one cycle.
    ///
    /// Static: converge on `target`, never starting more workers than there
    /// are remaining tasks. Dynamic: both deltas are derived from spare
    /// capacity, floored at zero and capped at the remaining tasks; they are
    /// not mutually exclusive, so close thresholds can thrash.
    #[must_use]
    pub fn decide(&self, obs: PoolObservation) -> ScalingDecision {
        match *self {
            Self::Static { target } => ScalingDecision {
                spawn: target.saturating_sub(obs.live_workers).min(obs.remaining),
                kill: obs.live_workers.saturating_sub(target),
            },
            Self::Dynamic {
                grow_threshold,
                shrink_threshold,
            } => {
                let spawn = whole_workers(obs.spare_capacity - grow_threshold).min(obs.remaining);
                let kill = whole_workers(shrink_threshold - obs.spare_capacity)
                    .min(obs.remaining)
                    .min(obs.live_workers + spawn);
                ScalingDecision { spawn, kill }
            }
        }
    }
}

/// Truncate a capacity delta to a worker count, treating negatives and NaN
/// as zero.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn whole_workers(delta: f64) -> usize {
    if delta.is_nan() || delta <= 0.0 {
        0
    } else {
        delta.floor() as usize
    }
}
