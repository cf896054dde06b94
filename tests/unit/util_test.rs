//! Tests for telemetry helpers

use prometheus_adaptive_pool::util::{init_tracing, init_worker_tracing};

#[test]
fn test_tracing_init_is_idempotent() {
    init_tracing();
    init_tracing();
    init_worker_tracing();
    tracing::info!(component = "util_test", "subscriber installed");
    assert!(tracing::dispatcher::has_been_set());
}
