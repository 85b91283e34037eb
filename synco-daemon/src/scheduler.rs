//! Per-job timers, single-flight execution, and retry re-arming.
//!
//! One coordination loop owns every job slot and the [`DaemonState`]; runs
//! execute as spawned tasks and report back over a channel, so state is only
//! ever mutated from the loop.
//!
//! Per-job phases:
//!
//! ```text
//! Idle -> Running -> Idle
//!                 -> Retrying -> Running -> ...
//! (any) -> Cancelled
//! ```

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use synco_core::{JobName, SyncJob};

use crate::record::{OutputSummary, RunOutcome, RunRecord};
use crate::report::RunReporter;
use crate::retry::{RetryDecision, RetryPolicy};
use crate::supervisor::{cancelled, JobRunner};

/// Process-wide view of what the daemon is doing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DaemonState {
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    /// Jobs with a run in flight.
    pub active: BTreeSet<JobName>,
}

impl DaemonState {
    pub fn new(pid: u32) -> Self {
        Self {
            pid,
            started_at: Utc::now(),
            active: BTreeSet::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobPhase {
    Idle,
    Running,
    Retrying,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScheduleMode {
    /// Run every job on its interval until cancelled.
    #[default]
    Continuous,
    /// Run each job's first cycle, retries included, then finish.
    Once,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SchedulerOptions {
    pub mode: ScheduleMode,
    /// Upper bound on the random offset of each job's first tick.
    pub startup_jitter: Duration,
}

struct JobSlot {
    job: Arc<SyncJob>,
    policy: RetryPolicy,
    phase: JobPhase,
    next_tick: Instant,
    retry_at: Option<Instant>,
    /// Retries already made in the current cycle.
    retries: u32,
    cycles: u64,
}

impl JobSlot {
    fn tick_armed(&self, mode: ScheduleMode) -> bool {
        match mode {
            ScheduleMode::Continuous => self.phase != JobPhase::Cancelled,
            ScheduleMode::Once => self.phase == JobPhase::Idle && self.cycles == 0,
        }
    }

    fn next_deadline(&self, mode: ScheduleMode) -> Option<Instant> {
        let tick = self.tick_armed(mode).then_some(self.next_tick);
        let retry = match self.phase {
            JobPhase::Retrying => self.retry_at,
            _ => None,
        };
        match (tick, retry) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Move the cadence past `now`, dropping ticks that were missed.
    fn advance_cadence(&mut self, now: Instant) {
        while self.next_tick <= now {
            self.next_tick += self.job.interval;
        }
    }
}

struct Finished {
    index: usize,
    record: RunRecord,
}

/// Control surface returned alongside a [`Scheduler`].
#[derive(Debug)]
pub struct SchedulerHandle {
    cancel: watch::Sender<bool>,
    state: watch::Receiver<DaemonState>,
}

impl SchedulerHandle {
    /// Cancel every job and interrupt in-flight runs. Idempotent.
    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }

    /// Snapshot of the daemon state as last published by the loop.
    pub fn state(&self) -> DaemonState {
        self.state.borrow().clone()
    }
}

pub struct Scheduler<R: JobRunner> {
    runner: Arc<R>,
    reporter: Arc<dyn RunReporter>,
    slots: Vec<JobSlot>,
    state: DaemonState,
    state_tx: watch::Sender<DaemonState>,
    cancel_rx: watch::Receiver<bool>,
    mode: ScheduleMode,
}

impl<R: JobRunner> Scheduler<R> {
    pub fn new(
        jobs: &[SyncJob],
        runner: Arc<R>,
        reporter: Arc<dyn RunReporter>,
        state: DaemonState,
        options: SchedulerOptions,
    ) -> (Self, SchedulerHandle) {
        let start = Instant::now();
        let mut rng = rand::thread_rng();
        let slots = jobs
            .iter()
            .map(|job| {
                let bound = options.startup_jitter.min(job.interval).as_millis() as u64;
                let jitter = if bound == 0 { 0 } else { rng.gen_range(0..bound) };
                JobSlot {
                    job: Arc::new(job.clone()),
                    policy: RetryPolicy::for_job(job),
                    phase: JobPhase::Idle,
                    next_tick: start + Duration::from_millis(jitter),
                    retry_at: None,
                    retries: 0,
                    cycles: 0,
                }
            })
            .collect();

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (state_tx, state_rx) = watch::channel(state.clone());
        let scheduler = Self {
            runner,
            reporter,
            slots,
            state,
            state_tx,
            cancel_rx,
            mode: options.mode,
        };
        let handle = SchedulerHandle {
            cancel: cancel_tx,
            state: state_rx,
        };
        (scheduler, handle)
    }

    /// Drive every job until cancelled (or, in [`ScheduleMode::Once`], until
    /// each job has finished one cycle). Returns the final state.
    pub async fn run(mut self) -> DaemonState {
        let (done_tx, mut done_rx) = mpsc::channel::<Finished>(self.slots.len().max(1));
        let mut cancel_rx = self.cancel_rx.clone();
        let mut in_flight = 0usize;
        let mut cancelling = false;

        tracing::info!(jobs = self.slots.len(), mode = ?self.mode, "scheduler started");

        loop {
            if cancelling && in_flight == 0 {
                break;
            }
            if self.mode == ScheduleMode::Once
                && in_flight == 0
                && self.slots.iter().all(|s| s.cycles > 0)
            {
                break;
            }

            let deadline = self.next_deadline();
            tokio::select! {
                biased;
                _ = cancelled(&mut cancel_rx), if !cancelling => {
                    cancelling = true;
                    self.cancel_all();
                }
                Some(finished) = done_rx.recv(), if in_flight > 0 => {
                    in_flight -= 1;
                    self.on_finished(finished);
                }
                _ = sleep_until(deadline), if !cancelling => {
                    in_flight += self.fire_due(Instant::now(), &done_tx);
                }
            }
        }

        tracing::info!("scheduler stopped");
        self.state
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.slots
            .iter()
            .filter_map(|slot| slot.next_deadline(self.mode))
            .min()
    }

    /// Start every due retry and cadence tick. Returns the number of runs
    /// started.
    fn fire_due(&mut self, now: Instant, done_tx: &mpsc::Sender<Finished>) -> usize {
        let mut started = 0;
        for index in 0..self.slots.len() {
            let slot = &mut self.slots[index];
            if slot.phase == JobPhase::Cancelled {
                continue;
            }

            if slot.phase == JobPhase::Retrying && slot.retry_at.is_some_and(|at| at <= now) {
                slot.retry_at = None;
                self.start_run(index, done_tx);
                started += 1;
            }

            let mode = self.mode;
            let slot = &mut self.slots[index];
            if !slot.tick_armed(mode) || slot.next_tick > now {
                continue;
            }
            slot.advance_cadence(now);
            let phase = slot.phase;
            match phase {
                JobPhase::Idle => {
                    slot.retries = 0;
                    self.start_run(index, done_tx);
                    started += 1;
                }
                JobPhase::Running | JobPhase::Retrying => {
                    let name = slot.job.name.clone();
                    self.reporter.tick_skipped(&name);
                }
                JobPhase::Cancelled => {}
            }
        }
        started
    }

    fn start_run(&mut self, index: usize, done_tx: &mpsc::Sender<Finished>) {
        let slot = &mut self.slots[index];
        slot.phase = JobPhase::Running;
        let job = slot.job.clone();
        let attempt = slot.retries;

        self.state.active.insert(job.name.clone());
        self.publish();
        self.reporter.run_started(&job.name, attempt);

        let runner = self.runner.clone();
        let cancel = self.cancel_rx.clone();
        let done_tx = done_tx.clone();
        tokio::spawn(async move {
            let name = job.name.clone();
            let started_at = Utc::now();
            // Inner task isolates a panicking runner from the loop.
            let result =
                tokio::spawn(async move { runner.execute(job, attempt, cancel).await }).await;
            let record = match result {
                Ok(record) => record,
                Err(err) => RunRecord {
                    job: name,
                    attempt,
                    started_at,
                    finished_at: Utc::now(),
                    outcome: RunOutcome::FatalFailure,
                    exit_code: None,
                    output: OutputSummary {
                        stderr: format!("run task failed: {err}"),
                        ..OutputSummary::default()
                    },
                },
            };
            let _ = done_tx.send(Finished { index, record }).await;
        });
    }

    fn on_finished(&mut self, finished: Finished) {
        let Finished { index, record } = finished;
        let slot = &mut self.slots[index];
        self.state.active.remove(&slot.job.name);

        if slot.phase == JobPhase::Cancelled {
            self.reporter.run_finished(&record, RetryDecision::GiveUp);
            self.publish();
            return;
        }

        let decision = slot.policy.decide(&record, slot.retries);
        match decision {
            RetryDecision::RetryAfter(delay) => {
                slot.retries += 1;
                slot.retry_at = Some(Instant::now() + delay);
                slot.phase = JobPhase::Retrying;
            }
            RetryDecision::GiveUp => {
                slot.retries = 0;
                slot.cycles += 1;
                slot.phase = JobPhase::Idle;
            }
        }
        self.reporter.run_finished(&record, decision);
        self.publish();
    }

    fn cancel_all(&mut self) {
        for slot in &mut self.slots {
            slot.phase = JobPhase::Cancelled;
            slot.retry_at = None;
        }
        tracing::info!(
            in_flight = self.state.active.len(),
            "scheduler cancelled; waiting for in-flight runs",
        );
    }

    fn publish(&self) {
        self.state_tx.send_replace(self.state.clone());
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending::<()>().await,
    }
}
