//! Tests for the worker protocol served over in-memory streams

use prometheus_adaptive_pool::core::{OperationRegistry, Task};
use prometheus_adaptive_pool::runtime::protocol::{read_message, write_message};
use prometheus_adaptive_pool::runtime::{serve, WorkerReply, WorkerRequest};
use serde_json::json;
use std::io::Cursor;

#[test]
fn test_serve_runs_builtin_sleep() {
    let task = Task::new("sleep", json!({ "ms": 5 }));
    let mut input = Vec::new();
    write_message(&mut input, &WorkerRequest::Execute { task: task.clone() }).unwrap();

    let mut output = Vec::new();
    let served = serve(Cursor::new(input), &mut output, &OperationRegistry::with_builtins()).unwrap();
    assert_eq!(served, 1);

    let reply: WorkerReply = read_message(&mut Cursor::new(output)).unwrap().unwrap();
    assert_eq!(
        reply,
        WorkerReply::Completed {
            task_id: task.id,
            output: json!({ "slept_ms": 5 })
        }
    );
}

#[test]
fn test_serve_rejects_garbage_input() {
    let mut output = Vec::new();
    let result = serve(
        Cursor::new(b"not json\n".to_vec()),
        &mut output,
        &OperationRegistry::with_builtins(),
    );
    assert!(result.is_err());
    assert!(output.is_empty());
}

#[test]
fn test_empty_input_serves_nothing() {
    let mut output = Vec::new();
    let served = serve(Cursor::new(Vec::new()), &mut output, &OperationRegistry::new()).unwrap();
    assert_eq!(served, 0);
}
