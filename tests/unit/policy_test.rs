//! Tests for scaling decisions

use prometheus_adaptive_pool::core::{Policy, PoolObservation, ScalingDecision};

fn observe(live_workers: usize, remaining: usize, spare_capacity: f64) -> PoolObservation {
    PoolObservation {
        live_workers,
        remaining,
        spare_capacity,
    }
}

#[test]
fn test_static_policy_converges_from_both_sides() {
    let policy = Policy::Static { target: 4 };
    assert_eq!(
        policy.decide(observe(1, 100, 0.0)),
        ScalingDecision { spawn: 3, kill: 0 }
    );
    assert_eq!(
        policy.decide(observe(6, 100, 0.0)),
        ScalingDecision { spawn: 0, kill: 2 }
    );
    assert_eq!(policy.decide(observe(4, 100, 0.0)), ScalingDecision::default());
}

#[test]
fn test_static_spawn_capped_by_remaining() {
    let policy = Policy::Static { target: 8 };
    assert_eq!(
        policy.decide(observe(0, 3, 0.0)),
        ScalingDecision { spawn: 3, kill: 0 }
    );
    assert_eq!(policy.decide(observe(3, 0, 0.0)), ScalingDecision::default());
}

#[test]
fn test_dynamic_grows_with_spare_capacity() {
    let policy = Policy::Dynamic {
        grow_threshold: 1.0,
        shrink_threshold: 0.25,
    };
    assert_eq!(
        policy.decide(observe(2, 10, 3.7)),
        ScalingDecision { spawn: 2, kill: 0 }
    );
    assert_eq!(policy.decide(observe(2, 10, 0.5)), ScalingDecision::default());
}

#[test]
fn test_dynamic_shrinks_under_load() {
    let policy = Policy::Dynamic {
        grow_threshold: 4.0,
        shrink_threshold: 3.0,
    };
    assert_eq!(
        policy.decide(observe(5, 10, 0.5)),
        ScalingDecision { spawn: 0, kill: 2 }
    );
    // Kill is capped by the remaining work.
    assert_eq!(
        policy.decide(observe(5, 1, 0.0)),
        ScalingDecision { spawn: 0, kill: 1 }
    );
}

#[test]
fn test_only_dynamic_policy_needs_load() {
    assert!(!Policy::Static { target: 1 }.needs_load());
    assert!(Policy::Dynamic {
        grow_threshold: 1.0,
        shrink_threshold: 0.0
    }
    .needs_load());
}
