//! Tests for error types

use prometheus_adaptive_pool::config::PolicyError;
use prometheus_adaptive_pool::core::PoolError;

#[test]
fn test_pool_closed_error() {
    assert_eq!(PoolError::PoolClosed.to_string(), "pool has been closed");
}

#[test]
fn test_launch_error() {
    let err = PoolError::Launch {
        worker_id: 7,
        reason: "No such file or directory".to_string(),
    };
    assert_eq!(err.to_string(), "failed to launch worker 7: No such file or directory");
}

#[test]
fn test_policy_error_converts() {
    let err: PoolError = PolicyError::UnknownMode("turbo".into()).into();
    assert_eq!(
        err.to_string(),
        "policy error: unknown mode `turbo` (expected `static` or `dynamic`)"
    );
}

#[test]
fn test_io_error_converts() {
    let err: PoolError = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed").into();
    assert!(matches!(err, PoolError::Io(_)));
    assert_eq!(err.to_string(), "io error: pipe closed");
}

#[test]
fn test_errors_wrap_into_anyhow() {
    let result: prometheus_adaptive_pool::core::AppResult<()> =
        Err(PoolError::InvalidConfig("cycle_interval_ms must be greater than 0".into()).into());
    let err = result.unwrap_err();
    assert_eq!(
        err.to_string(),
        "invalid configuration: cycle_interval_ms must be greater than 0"
    );
    assert!(err.downcast_ref::<PoolError>().is_some());
}
