//! Benchmarks for the shared pool state.
//!
//! Benchmarks cover:
//! - Batch submission into the waiting queue
//! - Single-worker withdraw/finish cycles
//! - Contended withdraw/finish across worker threads
//! - Retirement of busy workers (kill and requeue)

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;
use std::sync::Arc;
use std::thread;

use prometheus_adaptive_pool::core::{FailurePolicy, PoolState, Task};
use serde_json::json;

// ============================================================================
// Helper Functions
// ============================================================================

fn build_tasks(count: u64) -> Vec<Task> {
    (0..count)
        .map(|n| Task::new("sleep", json!({ "ms": n, "epoch": n % 10 })))
        .collect()
}

fn filled_state(count: u64) -> Arc<PoolState> {
    let state = Arc::new(PoolState::new(count as usize, FailurePolicy::default()));
    state.submit_batch(build_tasks(count)).unwrap();
    state
}

// ============================================================================
// Queue Benchmarks
// ============================================================================

fn bench_submit_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("submit_batch");

    for size in [100, 1_000, 10_000] {
        group.throughput(Throughput::Elements(size));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter_batched(
                || build_tasks(size),
                |tasks| {
                    let state = PoolState::new(size as usize, FailurePolicy::default());
                    black_box(state.submit_batch(tasks).unwrap());
                },
                criterion::BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

fn bench_withdraw_finish(c: &mut Criterion) {
    let mut group = c.benchmark_group("withdraw_finish");

    for size in [100, 1_000, 10_000] {
        group.throughput(Throughput::Elements(size));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter_batched(
                || filled_state(size),
                |state| {
                    state.register_worker(1);
                    while !state.counts().is_complete() {
                        let task = state.withdraw(1).unwrap();
                        state.mark_finished(1, task.args.clone());
                    }
                    black_box(state.counts());
                },
                criterion::BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

fn bench_contended_workers(c: &mut Criterion) {
    let mut group = c.benchmark_group("contended_workers");
    let size = 5_000u64;
    group.throughput(Throughput::Elements(size));

    for workers in [2u64, 4, 8] {
        group.bench_with_input(BenchmarkId::from_parameter(workers), &workers, |b, &workers| {
            b.iter_batched(
                || filled_state(size),
                |state| {
                    let handles: Vec<_> = (1..=workers)
                        .map(|worker_id| {
                            let state = Arc::clone(&state);
                            state.register_worker(worker_id);
                            thread::spawn(move || {
                                while let Some(task) = state.withdraw(worker_id) {
                                    state.mark_finished(worker_id, task.args.clone());
                                    if state.counts().is_complete() {
                                        state.close();
                                    }
                                }
                            })
                        })
                        .collect();
                    for handle in handles {
                        handle.join().unwrap();
                    }
                    black_box(state.counts());
                },
                criterion::BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

// ============================================================================
// Retirement Benchmarks
// ============================================================================

fn bench_retire_busy_worker(c: &mut Criterion) {
    let mut group = c.benchmark_group("retire_busy_worker");

    group.bench_function("withdraw_then_retire", |b| {
        let state = filled_state(1);
        let mut worker_id = 0;
        b.iter(|| {
            worker_id += 1;
            state.register_worker(worker_id);
            let task = state.withdraw(worker_id).unwrap();
            // The task goes back to retry, ready for the next worker.
            black_box(state.retire_worker(worker_id));
            black_box(task);
        });
    });
    group.finish();
}

// ============================================================================
// Benchmark Groups
// ============================================================================

criterion_group!(queue_benches, bench_submit_batch, bench_withdraw_finish);

criterion_group!(worker_benches, bench_contended_workers, bench_retire_busy_worker);

criterion_main!(queue_benches, worker_benches);
