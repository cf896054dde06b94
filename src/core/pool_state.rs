//! Shared bookkeeping for a batch run: the waiting, retry, running and
//! finished containers behind one lock.
//!
//! Every transition moves a task between containers inside a single
//! critical section, so at any instant a task is in exactly one of them and
//! `waiting + retry + running + finished == total`.
//!
//! Workers must be registered before they can withdraw. Withdrawal assigns
//! the task to the worker's running slot in the same critical section, so a
//! retirement decision always sees a consistent running set.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::core::task::{FinishedTask, Task, TaskId, TaskOutcome, WorkerId};
use crate::core::PoolError;

/// What happens to a task whose operation fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Record the task as finished with an error outcome.
    #[default]
    FinishWithError,
    /// Requeue on the retry queue until it has failed `max_attempts` times,
    /// then record it as finished with an error outcome.
    Retry {
        /// Total executions allowed to fail before giving up.
        max_attempts: u32,
    },
}

/// Where a failed task went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    /// Pushed back onto the retry queue.
    Retried {
        /// Failed attempts so far.
        attempt: u32,
    },
    /// Recorded as finished with an error outcome.
    Finished {
        /// Failed attempts in total.
        attempts: u32,
    },
}

/// Point-in-time container sizes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolCounts {
    /// Tasks never attempted.
    pub waiting: usize,
    /// Interrupted or failed tasks awaiting another attempt.
    pub retry: usize,
    /// Tasks currently held by a worker.
    pub running: usize,
    /// Tasks with a final outcome.
    pub finished: usize,
    /// Subset of `finished` whose outcome is a failure.
    pub failed: usize,
    /// Tasks ever submitted.
    pub total: usize,
}

impl PoolCounts {
    /// Tasks not yet held by any worker.
    #[must_use]
    pub const fn remaining_to_attempt(&self) -> usize {
        self.waiting + self.retry
    }

    /// Tasks without a final outcome.
    #[must_use]
    pub const fn unfinished(&self) -> usize {
        self.total - self.finished
    }

    /// Whether every submitted task has finished.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.finished == self.total
    }
}

struct Queues {
    waiting: VecDeque<Arc<Task>>,
    retry: VecDeque<Arc<Task>>,
    running: HashMap<WorkerId, Arc<Task>>,
    finished: Vec<FinishedTask>,
    workers: HashSet<WorkerId>,
    failures: HashMap<TaskId, u32>,
    ids: HashSet<TaskId>,
    total: usize,
    failed: usize,
    peak_running: usize,
    closed: bool,
}

impl Queues {
    fn assign(&mut self, worker_id: WorkerId, task: Arc<Task>) {
        if let Some(previous) = self.running.insert(worker_id, task) {
            // A worker only withdraws after reporting, so this is a caller bug.
            warn!(worker_id, task_id = %previous.id, "worker withdrew while still holding a task");
            self.retry.push_back(previous);
        }
        self.peak_running = self.peak_running.max(self.running.len());
    }

    fn finish(&mut self, worker_id: WorkerId, task: Arc<Task>, outcome: TaskOutcome) {
        let failed_attempts = self.failures.remove(&task.id).unwrap_or(0);
        if outcome.is_failed() {
            self.failed += 1;
        }
        self.finished.push(FinishedTask {
            task,
            worker_id,
            outcome,
            failed_attempts,
        });
    }

    fn counts(&self) -> PoolCounts {
        PoolCounts {
            waiting: self.waiting.len(),
            retry: self.retry.len(),
            running: self.running.len(),
            finished: self.finished.len(),
            failed: self.failed,
            total: self.total,
        }
    }
}

/// The shared store every worker and the scheduler operate on.
pub struct PoolState {
    queues: Mutex<Queues>,
    work_available: Condvar,
    space_available: Condvar,
    capacity: usize,
    failure_policy: FailurePolicy,
}

impl PoolState {
    /// Create an empty pool whose waiting queue holds at most `capacity` tasks.
    #[must_use]
    pub fn new(capacity: usize, failure_policy: FailurePolicy) -> Self {
        Self {
            queues: Mutex::new(Queues {
                waiting: VecDeque::with_capacity(capacity.min(1024)),
                retry: VecDeque::new(),
                running: HashMap::new(),
                finished: Vec::new(),
                workers: HashSet::new(),
                failures: HashMap::new(),
                ids: HashSet::new(),
                total: 0,
                failed: 0,
                peak_running: 0,
                closed: false,
            }),
            work_available: Condvar::new(),
            space_available: Condvar::new(),
            capacity,
            failure_policy,
        }
    }

    /// Capacity of the waiting queue.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Failure policy applied by [`PoolState::mark_failed`].
    #[must_use]
    pub const fn failure_policy(&self) -> FailurePolicy {
        self.failure_policy
    }

    /// Append a task to the waiting queue, blocking while it is full.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::PoolClosed` if the pool is closed before space
    /// becomes available and `PoolError::DuplicateTask` if a task with the
    /// same id was already submitted.
    pub fn submit(&self, task: Task) -> Result<TaskId, PoolError> {
        let mut queues = self.queues.lock();
        while queues.waiting.len() >= self.capacity && !queues.closed {
            self.space_available.wait(&mut queues);
        }
        if queues.closed {
            return Err(PoolError::PoolClosed);
        }
        self.push_waiting(&mut queues, task)
    }

    /// Append a task to the waiting queue without blocking.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::QueueFull` when the waiting queue is at capacity
    /// and `PoolError::PoolClosed` once the pool is closed. Returns
    /// `PoolError::DuplicateTask` for an id that was already submitted.
    pub fn try_submit(&self, task: Task) -> Result<TaskId, PoolError> {
        let mut queues = self.queues.lock();
        if queues.closed {
            return Err(PoolError::PoolClosed);
        }
        if queues.waiting.len() >= self.capacity {
            return Err(PoolError::QueueFull(self.capacity));
        }
        self.push_waiting(&mut queues, task)
    }

    /// Enqueue a whole batch atomically, preserving its order.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::BatchTooLarge` if the batch does not fit in the
    /// free space of the waiting queue, and `PoolError::DuplicateTask` if an
    /// id repeats within the batch or was submitted before. Nothing is
    /// enqueued in either case.
    pub fn submit_batch(&self, tasks: impl IntoIterator<Item = Task>) -> Result<usize, PoolError> {
        let tasks: Vec<Task> = tasks.into_iter().collect();
        let mut queues = self.queues.lock();
        if queues.closed {
            return Err(PoolError::PoolClosed);
        }
        if queues.waiting.len() + tasks.len() > self.capacity {
            return Err(PoolError::BatchTooLarge {
                batch: tasks.len(),
                capacity: self.capacity,
            });
        }
        let mut batch_ids = HashSet::with_capacity(tasks.len());
        for task in &tasks {
            if queues.ids.contains(&task.id) || !batch_ids.insert(task.id) {
                return Err(PoolError::DuplicateTask(task.id));
            }
        }
        let count = tasks.len();
        queues.ids.extend(batch_ids);
        queues.total += count;
        queues.waiting.extend(tasks.into_iter().map(Arc::new));
        self.work_available.notify_all();
        Ok(count)
    }

    fn push_waiting(&self, queues: &mut Queues, task: Task) -> Result<TaskId, PoolError> {
        let id = task.id;
        if !queues.ids.insert(id) {
            return Err(PoolError::DuplicateTask(id));
        }
        queues.total += 1;
        queues.waiting.push_back(Arc::new(task));
        self.work_available.notify_all();
        Ok(id)
    }

    /// Allow `worker_id` to withdraw tasks.
    pub fn register_worker(&self, worker_id: WorkerId) {
        self.queues.lock().workers.insert(worker_id);
    }

    /// Whether `worker_id` is registered and not retired.
    #[must_use]
    pub fn is_registered(&self, worker_id: WorkerId) -> bool {
        self.queues.lock().workers.contains(&worker_id)
    }

    /// Whether `worker_id` is registered and holds no task.
    #[must_use]
    pub fn is_idle(&self, worker_id: WorkerId) -> bool {
        let queues = self.queues.lock();
        queues.workers.contains(&worker_id) && !queues.running.contains_key(&worker_id)
    }

    /// Take the next task for `worker_id` and record it as running.
    ///
    /// The head of the retry queue always wins over the waiting queue. Blocks
    /// while both are empty. Returns `None` once the worker is retired or the
    /// pool is closed; the worker must then stop.
    pub fn withdraw(&self, worker_id: WorkerId) -> Option<Arc<Task>> {
        let mut queues = self.queues.lock();
        loop {
            if queues.closed || !queues.workers.contains(&worker_id) {
                return None;
            }
            if let Some(task) = queues.retry.pop_front() {
                debug!(worker_id, task_id = %task.id, "withdrew task from retry queue");
                queues.assign(worker_id, Arc::clone(&task));
                return Some(task);
            }
            if let Some(task) = queues.waiting.pop_front() {
                debug!(worker_id, task_id = %task.id, "withdrew task from waiting queue");
                queues.assign(worker_id, Arc::clone(&task));
                self.space_available.notify_one();
                return Some(task);
            }
            self.work_available.wait(&mut queues);
        }
    }

    /// Record a successful completion of the task held by `worker_id`.
    ///
    /// Returns `None` when the worker holds nothing, which happens when it was
    /// retired while its operation was still running; the late result is
    /// dropped because the task already sits on the retry queue.
    pub fn mark_finished(&self, worker_id: WorkerId, output: Value) -> Option<TaskId> {
        let mut queues = self.queues.lock();
        let task = queues.running.remove(&worker_id)?;
        let id = task.id;
        queues.finish(worker_id, task, TaskOutcome::Succeeded { output });
        Some(id)
    }

    /// Record a failed execution of the task held by `worker_id` and apply
    /// the failure policy. Returns `None` when the worker holds nothing.
    pub fn mark_failed(&self, worker_id: WorkerId, error: String) -> Option<FailureDisposition> {
        let mut queues = self.queues.lock();
        let task = queues.running.remove(&worker_id)?;
        let attempts = {
            let counter = queues.failures.entry(task.id).or_insert(0);
            *counter += 1;
            *counter
        };
        match self.failure_policy {
            FailurePolicy::Retry { max_attempts } if attempts < max_attempts => {
                queues.retry.push_back(task);
                self.work_available.notify_all();
                Some(FailureDisposition::Retried { attempt: attempts })
            }
            _ => {
                queues.finish(worker_id, task, TaskOutcome::Failed { error });
                Some(FailureDisposition::Finished { attempts })
            }
        }
    }

    /// Move the task held by `worker_id` onto the retry queue and return it.
    pub fn mark_interrupted(&self, worker_id: WorkerId) -> Option<Arc<Task>> {
        let mut queues = self.queues.lock();
        let task = queues.running.remove(&worker_id)?;
        queues.retry.push_back(Arc::clone(&task));
        self.work_available.notify_all();
        Some(task)
    }

    /// Deregister `worker_id` and requeue whatever it holds, as one step.
    ///
    /// After this returns the worker can neither withdraw nor record a
    /// result, so the caller may kill it without losing its task.
    pub fn retire_worker(&self, worker_id: WorkerId) -> Option<Arc<Task>> {
        let mut queues = self.queues.lock();
        queues.workers.remove(&worker_id);
        let requeued = queues.running.remove(&worker_id);
        if let Some(task) = &requeued {
            queues.retry.push_back(Arc::clone(task));
        }
        // Wakes the retired worker if it is blocked in `withdraw`.
        self.work_available.notify_all();
        requeued
    }

    /// Stop handing out work and reject further submissions.
    pub fn close(&self) {
        let mut queues = self.queues.lock();
        queues.closed = true;
        self.work_available.notify_all();
        self.space_available.notify_all();
    }

    /// Snapshot of every container size, taken under one lock.
    #[must_use]
    pub fn counts(&self) -> PoolCounts {
        self.queues.lock().counts()
    }

    /// Tasks currently held, keyed by worker.
    #[must_use]
    pub fn running_tasks(&self) -> Vec<(WorkerId, Arc<Task>)> {
        self.queues
            .lock()
            .running
            .iter()
            .map(|(worker_id, task)| (*worker_id, Arc::clone(task)))
            .collect()
    }

    /// The finished log in completion order.
    #[must_use]
    pub fn finished(&self) -> Vec<FinishedTask> {
        self.queues.lock().finished.clone()
    }

    /// The `n` most recently finished tasks, newest first.
    #[must_use]
    pub fn recent_finished(&self, n: usize) -> Vec<FinishedTask> {
        self.queues.lock().finished.iter().rev().take(n).cloned().collect()
    }

    /// Highest number of tasks that were ever running at the same time.
    #[must_use]
    pub fn peak_running(&self) -> usize {
        self.queues.lock().peak_running
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::TaskSpec;
    use serde_json::json;
    use std::thread;
    use std::time::Duration;

    fn task(n: u64) -> Task {
        Task::new("echo", json!({ "n": n }))
    }

    fn assert_conserved(state: &PoolState) {
        let c = state.counts();
        assert_eq!(c.waiting + c.retry + c.running + c.finished, c.total);
    }

    #[test]
    fn test_retry_precedes_waiting() {
        let state = PoolState::new(10, FailurePolicy::default());
        state.submit_batch((0..3).map(task)).unwrap();
        state.register_worker(1);
        state.register_worker(2);

        let first = state.withdraw(1).unwrap();
        let requeued = state.mark_interrupted(1).unwrap();
        assert_eq!(first.id, requeued.id);

        let next = state.withdraw(2).unwrap();
        assert_eq!(next.id, first.id);
        assert_conserved(&state);
    }

    #[test]
    fn test_waiting_is_fifo() {
        let state = PoolState::new(10, FailurePolicy::default());
        let tasks: Vec<Task> = (0..4).map(task).collect();
        let ids: Vec<TaskId> = tasks.iter().map(|t| t.id).collect();
        state.submit_batch(tasks).unwrap();
        state.register_worker(7);

        let mut seen = Vec::new();
        for _ in 0..4 {
            let t = state.withdraw(7).unwrap();
            seen.push(t.id);
            state.mark_finished(7, Value::Null);
        }
        assert_eq!(seen, ids);
        assert!(state.counts().is_complete());
    }

    #[test]
    fn test_batch_larger_than_capacity_is_rejected_whole() {
        let state = PoolState::new(2, FailurePolicy::default());
        let err = state.submit_batch((0..3).map(task)).unwrap_err();
        assert!(matches!(err, PoolError::BatchTooLarge { batch: 3, capacity: 2 }));
        assert_eq!(state.counts().total, 0);
    }

    #[test]
    fn test_duplicate_ids_are_rejected() {
        let state = PoolState::new(8, FailurePolicy::default());
        let first = task(0);
        let twin = Task::from(TaskSpec {
            id: Some(first.id),
            operation: "echo".into(),
            args: json!("twin"),
        });

        let err = state.submit_batch([first.clone(), task(1), first.clone()]).unwrap_err();
        assert!(matches!(err, PoolError::DuplicateTask(id) if id == first.id));
        assert_eq!(state.counts().total, 0);

        state.submit_batch([first]).unwrap();
        assert!(matches!(state.try_submit(twin.clone()), Err(PoolError::DuplicateTask(_))));
        assert!(matches!(state.submit_batch([task(2), twin]), Err(PoolError::DuplicateTask(_))));

        let counts = state.counts();
        assert_eq!(counts.total, 1);
        assert_eq!(counts.waiting, 1);
    }

    #[test]
    fn test_try_submit_reports_full() {
        let state = PoolState::new(1, FailurePolicy::default());
        state.try_submit(task(0)).unwrap();
        assert!(matches!(state.try_submit(task(1)), Err(PoolError::QueueFull(1))));
    }

    #[test]
    fn test_retire_requeues_held_task() {
        let state = PoolState::new(4, FailurePolicy::default());
        state.submit_batch([task(0)]).unwrap();
        state.register_worker(1);
        let held = state.withdraw(1).unwrap();

        let requeued = state.retire_worker(1).unwrap();
        assert_eq!(held.id, requeued.id);
        assert_eq!(state.counts().retry, 1);

        // A late report from the retired worker is ignored.
        assert!(state.mark_finished(1, Value::Null).is_none());
        assert_eq!(state.counts().finished, 0);
        assert!(state.withdraw(1).is_none());
        assert_conserved(&state);
    }

    #[test]
    fn test_retire_wakes_blocked_withdraw() {
        let state = Arc::new(PoolState::new(4, FailurePolicy::default()));
        state.register_worker(1);
        let s = Arc::clone(&state);
        let handle = thread::spawn(move || s.withdraw(1));

        thread::sleep(Duration::from_millis(50));
        assert!(state.retire_worker(1).is_none());
        assert!(handle.join().unwrap().is_none());
    }

    #[test]
    fn test_withdraw_blocks_until_submit() {
        let state = Arc::new(PoolState::new(4, FailurePolicy::default()));
        state.register_worker(1);
        let s = Arc::clone(&state);
        let handle = thread::spawn(move || s.withdraw(1).map(|t| t.id));

        thread::sleep(Duration::from_millis(50));
        let id = state.submit(task(9)).unwrap();
        assert_eq!(handle.join().unwrap(), Some(id));
        assert_eq!(state.counts().running, 1);
    }

    #[test]
    fn test_submit_blocks_while_full() {
        let state = Arc::new(PoolState::new(1, FailurePolicy::default()));
        state.submit(task(0)).unwrap();
        state.register_worker(1);

        let s = Arc::clone(&state);
        let submitter = thread::spawn(move || s.submit(task(1)));
        thread::sleep(Duration::from_millis(50));
        assert_eq!(state.counts().total, 1);

        state.withdraw(1).unwrap();
        submitter.join().unwrap().unwrap();
        assert_eq!(state.counts().waiting, 1);
        assert_eq!(state.counts().total, 2);
    }

    #[test]
    fn test_finish_with_error_policy() {
        let state = PoolState::new(4, FailurePolicy::FinishWithError);
        state.submit_batch([task(0)]).unwrap();
        state.register_worker(1);
        state.withdraw(1).unwrap();

        let disposition = state.mark_failed(1, "boom".into()).unwrap();
        assert_eq!(disposition, FailureDisposition::Finished { attempts: 1 });

        let counts = state.counts();
        assert_eq!(counts.finished, 1);
        assert_eq!(counts.failed, 1);
        assert!(counts.is_complete());
        assert_eq!(
            state.finished()[0].outcome,
            TaskOutcome::Failed { error: "boom".into() }
        );
    }

    #[test]
    fn test_retry_policy_gives_up_after_max_attempts() {
        let state = PoolState::new(4, FailurePolicy::Retry { max_attempts: 3 });
        state.submit_batch([task(0)]).unwrap();
        state.register_worker(1);

        for attempt in 1..3 {
            state.withdraw(1).unwrap();
            assert_eq!(
                state.mark_failed(1, "flaky".into()),
                Some(FailureDisposition::Retried { attempt })
            );
            assert_eq!(state.counts().retry, 1);
        }
        state.withdraw(1).unwrap();
        assert_eq!(
            state.mark_failed(1, "flaky".into()),
            Some(FailureDisposition::Finished { attempts: 3 })
        );
        assert_eq!(state.finished()[0].failed_attempts, 3);
        assert_conserved(&state);
    }

    #[test]
    fn test_interruption_does_not_count_as_failure() {
        let state = PoolState::new(4, FailurePolicy::Retry { max_attempts: 2 });
        state.submit_batch([task(0)]).unwrap();
        state.register_worker(1);

        state.withdraw(1).unwrap();
        state.mark_interrupted(1).unwrap();
        state.withdraw(1).unwrap();
        assert_eq!(
            state.mark_failed(1, "x".into()),
            Some(FailureDisposition::Retried { attempt: 1 })
        );
    }

    #[test]
    fn test_close_unblocks_everyone() {
        let state = Arc::new(PoolState::new(4, FailurePolicy::default()));
        state.register_worker(1);
        let s = Arc::clone(&state);
        let handle = thread::spawn(move || s.withdraw(1));
        thread::sleep(Duration::from_millis(20));
        state.close();
        assert!(handle.join().unwrap().is_none());
        assert!(matches!(state.submit(task(0)), Err(PoolError::PoolClosed)));
    }

    #[test]
    fn test_recent_finished_newest_first() {
        let state = PoolState::new(8, FailurePolicy::default());
        state.submit_batch((0..3).map(task)).unwrap();
        state.register_worker(1);
        let mut ids = Vec::new();
        for _ in 0..3 {
            ids.push(state.withdraw(1).unwrap().id);
            state.mark_finished(1, Value::Null);
        }
        let recent: Vec<TaskId> = state.recent_finished(2).iter().map(|f| f.task.id).collect();
        assert_eq!(recent, vec![ids[2], ids[1]]);
    }
}
