//! Tests for scheduler configuration and policy files

use prometheus_adaptive_pool::config::{
    FilePolicySource, PolicyError, PolicySource, SchedulerConfig, SharedPolicySource,
};
use prometheus_adaptive_pool::core::{FailurePolicy, Policy};
use std::time::Duration;

#[test]
fn test_scheduler_config_defaults() {
    let cfg = SchedulerConfig::default();
    assert_eq!(cfg.waiting_capacity, 200);
    assert_eq!(cfg.cycle_interval(), Duration::from_millis(500));
    assert_eq!(cfg.failure_policy, FailurePolicy::FinishWithError);
    assert!(cfg.validate().is_ok());
}

#[test]
fn test_scheduler_config_from_json() {
    let cfg = SchedulerConfig::from_json_str(
        r#"{
            "waiting_capacity": 50,
            "failure_policy": { "kind": "retry", "max_attempts": 3 }
        }"#,
    )
    .unwrap();
    assert_eq!(cfg.waiting_capacity, 50);
    assert_eq!(cfg.cycle_interval_ms, 500);
    assert_eq!(cfg.failure_policy, FailurePolicy::Retry { max_attempts: 3 });
}

#[test]
fn test_scheduler_config_rejects_zero_capacity() {
    let err = SchedulerConfig::from_json_str(r#"{ "waiting_capacity": 0 }"#).unwrap_err();
    assert!(err.contains("waiting_capacity"), "{err}");
}

#[test]
fn test_scheduler_config_rejects_zero_retry_budget() {
    let cfg = SchedulerConfig::new().with_failure_policy(FailurePolicy::Retry { max_attempts: 0 });
    assert!(cfg.validate().is_err());
}

#[test]
fn test_policy_file_is_reread_on_every_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pool.config");
    let source = FilePolicySource::new(&path);

    std::fs::write(&path, "mode=static\ntarget=4\n").unwrap();
    assert_eq!(source.load().unwrap(), Policy::Static { target: 4 });

    std::fs::write(&path, "MODE=dynamic\nGROW_THRESHOLD=1.5\nSHRINK_THRESHOLD=0.25\n").unwrap();
    assert_eq!(
        source.load().unwrap(),
        Policy::Dynamic {
            grow_threshold: 1.5,
            shrink_threshold: 0.25
        }
    );
}

#[test]
fn test_json_policy_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("policy.json");
    std::fs::write(&path, r#"{"mode":"static","target":3}"#).unwrap();

    assert_eq!(
        FilePolicySource::new(&path).load().unwrap(),
        Policy::Static { target: 3 }
    );
}

#[test]
fn test_missing_policy_file_is_a_read_error() {
    let dir = tempfile::tempdir().unwrap();
    let source = FilePolicySource::new(dir.path().join("absent.config"));
    assert!(matches!(source.load(), Err(PolicyError::Read { .. })));
}

#[test]
fn test_incomplete_dynamic_policy_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pool.config");
    std::fs::write(&path, "mode=dynamic\ngrow_threshold=2\n").unwrap();

    assert!(matches!(
        FilePolicySource::new(&path).load(),
        Err(PolicyError::MissingKey("shrink_threshold"))
    ));
}

#[test]
fn test_shared_policy_source_tracks_updates() {
    let source = SharedPolicySource::new(Policy::Static { target: 1 });
    let handle = source.clone();

    handle.set(Policy::Static { target: 5 });
    assert_eq!(source.load().unwrap(), Policy::Static { target: 5 });

    handle.clear();
    assert!(matches!(source.load(), Err(PolicyError::Unavailable)));
}
