//! The control loop: measure, decide, spawn and kill, until every task has
//! finished.
//!
//! Each cycle re-reads the policy, samples spare capacity when the policy is
//! dynamic, and applies the resulting [`ScalingDecision`]. Between cycles the
//! loop sleeps on the worker event channel, so a completion or a worker exit
//! wakes it early and an idle pool does not spin.
//!
//! Killing a worker is always `PoolState::retire_worker` followed by the
//! backend kill. Retirement requeues the held task and deregisters the worker
//! under one lock, so no task can be lost between the two steps; a result the
//! killed worker still manages to report is discarded.

use std::sync::Arc;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use tracing::{debug, error, info, warn};

use crate::config::{PolicySource, SchedulerConfig};
use crate::core::load::{LoadProbe, SystemLoadProbe};
use crate::core::policy::{Policy, PoolObservation, ScalingDecision};
use crate::core::status::{PoolStatus, StatusSink, TracingStatusSink};
use crate::core::task::{FinishedTask, Task, WorkerId};
use crate::core::{PoolCounts, PoolError, PoolState};
use crate::runtime::{WorkerContext, WorkerEvent, WorkerHandle, WorkerLauncher};

/// Summary of a completed batch run.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Tasks submitted.
    pub total: usize,
    /// Finished log in completion order.
    pub finished: Vec<FinishedTask>,
    /// Scheduling cycles executed.
    pub cycles: u64,
    /// Workers started.
    pub workers_spawned: usize,
    /// Workers killed by scaling decisions.
    pub workers_killed: usize,
    /// Workers that exited without being killed.
    pub workers_crashed: usize,
    /// Workers joined before the run returned.
    pub workers_joined: usize,
    /// Highest number of tasks running at once.
    pub peak_running: usize,
    /// Cycles in which the policy could not be loaded.
    pub policy_errors: u64,
}

impl RunReport {
    /// Finished tasks whose outcome is a failure.
    pub fn failed(&self) -> impl Iterator<Item = &FinishedTask> {
        self.finished.iter().filter(|f| f.outcome.is_failed())
    }

    /// Number of tasks that finished successfully.
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.finished.len() - self.failed().count()
    }
}

/// Drives one batch of tasks to completion over an adaptively sized pool.
pub struct Scheduler {
    config: SchedulerConfig,
    state: Arc<PoolState>,
    launcher: Box<dyn WorkerLauncher>,
    policy_source: Box<dyn PolicySource>,
    probe: Box<dyn LoadProbe>,
    status_sink: Box<dyn StatusSink>,
    events_tx: Sender<WorkerEvent>,
    events_rx: Receiver<WorkerEvent>,
    /// Live workers in spawn order.
    live: Vec<Box<dyn WorkerHandle>>,
    /// Killed workers not yet joined.
    killed: Vec<Box<dyn WorkerHandle>>,
    policy: Option<Policy>,
    next_worker_id: WorkerId,
    cycles: u64,
    workers_spawned: usize,
    workers_killed: usize,
    workers_crashed: usize,
    workers_joined: usize,
    policy_errors: u64,
    /// Crashed exits since a task last finished or was requeued on failure.
    crash_streak: u32,
}

impl Scheduler {
    /// Create a scheduler and enqueue `tasks` in order.
    ///
    /// Uses a [`SystemLoadProbe`] and a [`TracingStatusSink`]; replace them
    /// with [`Scheduler::with_probe`] and [`Scheduler::with_status_sink`].
    ///
    /// # Errors
    ///
    /// Returns `PoolError::InvalidConfig` for an invalid configuration and
    /// `PoolError::BatchTooLarge` if the batch exceeds the waiting capacity.
    pub fn new(
        config: SchedulerConfig,
        tasks: impl IntoIterator<Item = Task>,
        launcher: impl WorkerLauncher + 'static,
        policy_source: impl PolicySource + 'static,
    ) -> Result<Self, PoolError> {
        Self::from_parts(config, tasks, Box::new(launcher), Box::new(policy_source))
    }

    pub(crate) fn from_parts(
        config: SchedulerConfig,
        tasks: impl IntoIterator<Item = Task>,
        launcher: Box<dyn WorkerLauncher>,
        policy_source: Box<dyn PolicySource>,
    ) -> Result<Self, PoolError> {
        config.validate().map_err(PoolError::InvalidConfig)?;

        let state = Arc::new(PoolState::new(config.waiting_capacity, config.failure_policy));
        let total = state.submit_batch(tasks)?;
        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        let probe = SystemLoadProbe::new(config.load_sample());

        info!(
            total,
            waiting_capacity = config.waiting_capacity,
            cycle_interval_ms = config.cycle_interval_ms,
            "scheduler initialized"
        );

        Ok(Self {
            config,
            state,
            launcher,
            policy_source,
            probe: Box::new(probe),
            status_sink: Box::new(TracingStatusSink),
            events_tx,
            events_rx,
            live: Vec::new(),
            killed: Vec::new(),
            policy: None,
            next_worker_id: 1,
            cycles: 0,
            workers_spawned: 0,
            workers_killed: 0,
            workers_crashed: 0,
            workers_joined: 0,
            policy_errors: 0,
            crash_streak: 0,
        })
    }

    /// Replace the spare-capacity probe.
    #[must_use]
    pub fn with_probe(self, probe: impl LoadProbe + 'static) -> Self {
        self.with_boxed_probe(Box::new(probe))
    }

    pub(crate) fn with_boxed_probe(mut self, probe: Box<dyn LoadProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Replace the status sink.
    #[must_use]
    pub fn with_status_sink(self, sink: impl StatusSink + 'static) -> Self {
        self.with_boxed_status_sink(Box::new(sink))
    }

    pub(crate) fn with_boxed_status_sink(mut self, sink: Box<dyn StatusSink>) -> Self {
        self.status_sink = sink;
        self
    }

    /// Shared pool state, for concurrent read-only observation of a run.
    #[must_use]
    pub fn state(&self) -> Arc<PoolState> {
        Arc::clone(&self.state)
    }

    /// Run cycles until every task has finished, then stop and join every
    /// worker.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::Launch` if a worker cannot be started and
    /// `PoolError::CrashLoop` once more than `max_crash_streak` workers crash
    /// in a row without a task finishing or failing. All workers are killed
    /// and joined before returning.
    pub fn run(mut self) -> Result<RunReport, PoolError> {
        let result = self.run_cycles();
        self.shutdown(result.is_err());
        result?;

        let counts = self.state.counts();
        info!(
            total = counts.total,
            failed = counts.failed,
            cycles = self.cycles,
            workers_spawned = self.workers_spawned,
            workers_killed = self.workers_killed,
            "run complete"
        );

        Ok(RunReport {
            total: counts.total,
            finished: self.state.finished(),
            cycles: self.cycles,
            workers_spawned: self.workers_spawned,
            workers_killed: self.workers_killed,
            workers_crashed: self.workers_crashed,
            workers_joined: self.workers_joined,
            peak_running: self.state.peak_running(),
            policy_errors: self.policy_errors,
        })
    }

    fn run_cycles(&mut self) -> Result<(), PoolError> {
        loop {
            self.drain_events();
            if self.crash_streak > self.config.max_crash_streak {
                error!(crashes = self.crash_streak, "workers keep crashing; aborting run");
                return Err(PoolError::CrashLoop {
                    crashes: self.crash_streak,
                });
            }
            let counts = self.state.counts();
            if counts.is_complete() {
                return Ok(());
            }
            self.cycles += 1;
            self.reload_policy();

            let spare_capacity = self.apply_policy(counts)?;
            self.publish_status(spare_capacity);
            self.wait_for_event();
        }
    }

    fn reload_policy(&mut self) {
        match self.policy_source.load() {
            Ok(policy) => {
                if self.policy != Some(policy) {
                    info!(?policy, "policy loaded");
                }
                self.policy = Some(policy);
            }
            Err(e) => {
                self.policy_errors += 1;
                error!(error = %e, previous = ?self.policy, "policy reload failed; keeping previous policy");
            }
        }
    }

    fn apply_policy(&mut self, counts: PoolCounts) -> Result<Option<f64>, PoolError> {
        let Some(policy) = self.policy else {
            return Ok(None);
        };
        let spare_capacity = policy.needs_load().then(|| self.probe.spare_capacity());
        let decision = policy.decide(PoolObservation {
            live_workers: self.live.len(),
            remaining: counts.remaining_to_attempt(),
            spare_capacity: spare_capacity.unwrap_or(0.0),
        });

        if decision != ScalingDecision::default() {
            info!(
                spawn = decision.spawn,
                kill = decision.kill,
                live = self.live.len(),
                remaining = counts.remaining_to_attempt(),
                "adjusting pool"
            );
        }
        for _ in 0..decision.spawn {
            self.spawn_worker()?;
        }
        for _ in 0..decision.kill {
            self.kill_worker();
        }
        Ok(spare_capacity)
    }

    fn spawn_worker(&mut self) -> Result<(), PoolError> {
        let worker_id = self.next_worker_id;
        self.next_worker_id += 1;

        self.state.register_worker(worker_id);
        let ctx = WorkerContext {
            worker_id,
            state: Arc::clone(&self.state),
            events: self.events_tx.clone(),
        };
        match self.launcher.launch(ctx) {
            Ok(handle) => {
                self.live.push(handle);
                self.workers_spawned += 1;
                Ok(())
            }
            Err(e) => {
                self.state.retire_worker(worker_id);
                error!(worker_id, error = %e, "failed to launch worker");
                Err(e)
            }
        }
    }

    /// Kill one live worker, preferring idle ones, then the newest.
    fn kill_worker(&mut self) {
        let Some(index) = self
            .live
            .iter()
            .position(|w| self.state.is_idle(w.id()))
            .or_else(|| self.live.len().checked_sub(1))
        else {
            return;
        };

        let mut handle = self.live.remove(index);
        let worker_id = handle.id();
        let requeued = self.state.retire_worker(worker_id);
        if let Err(e) = handle.kill() {
            warn!(worker_id, error = %e, "kill signal failed");
        }
        match requeued {
            Some(task) => info!(worker_id, task_id = %task.id, "killed worker, task requeued"),
            None => info!(worker_id, "killed idle worker"),
        }
        self.workers_killed += 1;
        self.killed.push(handle);
    }

    fn publish_status(&mut self, spare_capacity: Option<f64>) {
        let status = PoolStatus {
            cycle: self.cycles,
            counts: self.state.counts(),
            live_workers: self.live.len(),
            policy: self.policy,
            spare_capacity,
        };
        self.status_sink.report(&status);
    }

    fn wait_for_event(&mut self) {
        match self.events_rx.recv_timeout(self.config.cycle_interval()) {
            Ok(event) => self.handle_event(event),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => {}
        }
    }

    fn drain_events(&mut self) {
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle_event(event);
        }
    }

    fn handle_event(&mut self, event: WorkerEvent) {
        let (worker_id, crashed) = match event {
            WorkerEvent::TaskFinished { .. } | WorkerEvent::TaskRequeued { .. } => {
                self.crash_streak = 0;
                return;
            }
            WorkerEvent::Exited { worker_id, crashed } => (worker_id, crashed),
        };
        if let Some(index) = self.live.iter().position(|w| w.id() == worker_id) {
            let handle = self.live.remove(index);
            if crashed {
                self.workers_crashed += 1;
                self.crash_streak += 1;
                warn!(worker_id, streak = self.crash_streak, "worker exited unexpectedly");
            } else {
                debug!(worker_id, "worker exited");
            }
            self.join(handle);
        } else if let Some(index) = self.killed.iter().position(|w| w.id() == worker_id) {
            let handle = self.killed.remove(index);
            self.join(handle);
        }
    }

    fn join(&mut self, handle: Box<dyn WorkerHandle>) {
        let worker_id = handle.id();
        handle.join();
        self.workers_joined += 1;
        debug!(worker_id, "worker joined");
    }

    fn shutdown(&mut self, abort: bool) {
        info!(live = self.live.len(), abort, "stopping workers");
        if abort {
            for handle in &mut self.live {
                self.state.retire_worker(handle.id());
                if let Err(e) = handle.kill() {
                    warn!(worker_id = handle.id(), error = %e, "kill signal failed");
                }
            }
        }
        self.state.close();

        let handles: Vec<Box<dyn WorkerHandle>> =
            self.live.drain(..).chain(self.killed.drain(..)).collect();
        for handle in handles {
            self.join(handle);
        }
    }
}
