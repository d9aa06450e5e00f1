//! Job queue interface and the in-process queue.
//!
//! The in-process queue runs jobs in numbered *passes*. A pass takes every
//! job that is eligible when it starts or that gets enqueued while it runs,
//! steps it until it finishes or asks to be requeued, and moves on. A
//! requeued job is never picked up again in the same pass.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::SchedulerError;
use crate::job::{Job, JobContext, JobId, JobInfo, StepOutcome};
use crate::registry::{JobRegistry, JobResult};

/// Async job queue consumed by processors, commit coordination and
/// reindex handlers.
pub trait JobQueue: Send + Sync {
    /// Queue `job`, optionally not to run before `not_before`.
    fn enqueue(
        &self,
        job: Box<dyn Job>,
        not_before: Option<DateTime<Utc>>,
    ) -> Result<JobId, SchedulerError>;

    /// Remove every pending job matching `predicate`; returns how many.
    fn cancel(&self, predicate: &dyn Fn(&JobInfo) -> bool) -> usize;

    fn pending(&self) -> Vec<JobInfo>;
}

struct QueuedJob {
    info: JobInfo,
    job: Box<dyn Job>,
    eligible_from_pass: u64,
}

impl QueuedJob {
    fn is_due(&self, pass: u64, now: DateTime<Utc>) -> bool {
        self.eligible_from_pass <= pass && self.info.not_before.map_or(true, |t| t <= now)
    }
}

/// A job whose step returned an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedJob {
    pub info: JobInfo,
    pub error: String,
    pub messages: Vec<String>,
}

/// Counters for one pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassReport {
    pub pass: u64,
    pub completed: usize,
    pub discarded: usize,
    pub requeued: usize,
    pub failed: usize,
}

impl PassReport {
    pub fn jobs_run(&self) -> usize {
        self.completed + self.discarded + self.requeued + self.failed
    }

    fn absorb(&mut self, other: &PassReport) {
        self.pass = other.pass;
        self.completed += other.completed;
        self.discarded += other.discarded;
        self.requeued += other.requeued;
        self.failed += other.failed;
    }
}

/// In-process job queue.
pub struct InMemoryJobQueue {
    jobs: Mutex<VecDeque<QueuedJob>>,
    failed: Mutex<Vec<FailedJob>>,
    pass: AtomicU64,
    closed: AtomicBool,
    /// Upper bound on `Continue` steps per job per pass
    max_steps: u64,
    registry: Option<Arc<JobRegistry>>,
}

impl InMemoryJobQueue {
    pub const DEFAULT_MAX_STEPS: u64 = 10_000;

    pub fn new() -> Self {
        Self {
            jobs: Mutex::new(VecDeque::new()),
            failed: Mutex::new(Vec::new()),
            pass: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            max_steps: Self::DEFAULT_MAX_STEPS,
            registry: None,
        }
    }

    pub fn with_registry(mut self, registry: Arc<JobRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_max_steps(mut self, max_steps: u64) -> Self {
        self.max_steps = max_steps.max(1);
        self
    }

    pub fn registry(&self) -> Option<&Arc<JobRegistry>> {
        self.registry.as_ref()
    }

    /// Number of the last started pass (0 before the first).
    pub fn current_pass(&self) -> u64 {
        self.pass.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn failed_jobs(&self) -> Vec<FailedJob> {
        self.failed.lock().unwrap().clone()
    }

    /// Stop accepting new jobs. Pending jobs stay queued.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Earliest `not_before` among pending jobs that have one.
    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        self.jobs
            .lock()
            .unwrap()
            .iter()
            .filter_map(|j| j.info.not_before)
            .min()
    }

    fn take_due(&self, pass: u64, now: DateTime<Utc>) -> Option<QueuedJob> {
        let mut jobs = self.jobs.lock().unwrap();
        let position = jobs.iter().position(|j| j.is_due(pass, now))?;
        jobs.remove(position)
    }

    fn push_back(&self, queued: QueuedJob) {
        self.jobs.lock().unwrap().push_back(queued);
    }

    /// Run one pass at time `now`.
    ///
    /// The queue lock is released while a job runs, so jobs may enqueue
    /// follow-up work. Follow-ups become eligible in the same pass.
    pub fn run_pass(&self, now: DateTime<Utc>) -> PassReport {
        let pass = self.pass.fetch_add(1, Ordering::SeqCst) + 1;
        let ctx = JobContext::new(pass, now);
        let mut report = PassReport {
            pass,
            ..Default::default()
        };

        while let Some(mut queued) = self.take_due(pass, now) {
            let kind = queued.job.kind().to_string();
            if let Some(registry) = &self.registry {
                registry.record_start(&kind);
            }
            let started = Instant::now();

            let (outcome, result) = self.step_until_settled(&mut queued, &ctx);
            let elapsed_ms = started.elapsed().as_millis() as u64;

            match outcome {
                Ok(StepOutcome::Complete) => {
                    debug!(job_id = %queued.info.id, job = %kind, "Job completed");
                    report.completed += 1;
                }
                Ok(StepOutcome::Discard) => {
                    debug!(job_id = %queued.info.id, job = %kind, "Job discarded");
                    report.discarded += 1;
                }
                Ok(StepOutcome::Requeue { delay }) => {
                    let delay = chrono::Duration::from_std(delay)
                        .unwrap_or_else(|_| chrono::Duration::zero());
                    queued.info.not_before = Some(now + delay);
                    queued.eligible_from_pass = pass + 1;
                    debug!(
                        job_id = %queued.info.id,
                        job = %kind,
                        not_before = ?queued.info.not_before,
                        "Job requeued"
                    );
                    report.requeued += 1;
                    self.push_back(queued);
                }
                Ok(StepOutcome::Continue) => {
                    // Step budget exhausted; resume next pass
                    queued.eligible_from_pass = pass + 1;
                    report.requeued += 1;
                    self.push_back(queued);
                }
                Err(e) => {
                    warn!(job_id = %queued.info.id, job = %kind, error = %e, "Job failed");
                    report.failed += 1;
                    self.failed.lock().unwrap().push(FailedJob {
                        info: queued.info.clone(),
                        error: e.to_string(),
                        messages: queued.job.messages().to_vec(),
                    });
                }
            }

            if let Some(registry) = &self.registry {
                registry.record_complete(&kind, result, elapsed_ms);
            }
        }

        if report.jobs_run() > 0 {
            info!(
                pass,
                completed = report.completed,
                discarded = report.discarded,
                requeued = report.requeued,
                failed = report.failed,
                "Queue pass finished"
            );
        }
        report
    }

    fn step_until_settled(
        &self,
        queued: &mut QueuedJob,
        ctx: &JobContext,
    ) -> (Result<StepOutcome, SchedulerError>, JobResult) {
        let mut steps = 0;
        loop {
            match queued.job.process(ctx) {
                Ok(StepOutcome::Continue) => {
                    steps += 1;
                    if steps >= self.max_steps {
                        return (Ok(StepOutcome::Continue), JobResult::Deferred);
                    }
                }
                Ok(StepOutcome::Complete) => return (Ok(StepOutcome::Complete), JobResult::Success),
                Ok(StepOutcome::Discard) => return (Ok(StepOutcome::Discard), JobResult::Discarded),
                Ok(requeue @ StepOutcome::Requeue { .. }) => {
                    return (Ok(requeue), JobResult::Deferred)
                }
                Err(e) => {
                    let message = e.to_string();
                    return (Err(e), JobResult::Failed(message));
                }
            }
        }
    }

    /// Run passes until the queue is empty or `max_passes` is reached.
    ///
    /// When no pending job is due, the clock jumps forward to the earliest
    /// `not_before`, so cooldowns resolve without waiting. Returns the
    /// summed counters and the final clock.
    pub fn drain(&self, mut now: DateTime<Utc>, max_passes: usize) -> (PassReport, DateTime<Utc>) {
        let mut total = PassReport::default();
        for _ in 0..max_passes {
            if self.is_empty() {
                break;
            }
            let next_pass = self.current_pass() + 1;
            let any_due = self
                .jobs
                .lock()
                .unwrap()
                .iter()
                .any(|j| j.is_due(next_pass, now));
            if !any_due {
                if let Some(due) = self.next_due() {
                    now = now.max(due);
                }
            }
            let report = self.run_pass(now);
            total.absorb(&report);
        }
        (total, now)
    }
}

impl Default for InMemoryJobQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl JobQueue for InMemoryJobQueue {
    fn enqueue(
        &self,
        job: Box<dyn Job>,
        not_before: Option<DateTime<Utc>>,
    ) -> Result<JobId, SchedulerError> {
        if self.is_closed() {
            return Err(SchedulerError::QueueClosed);
        }
        let info = JobInfo {
            id: Uuid::new_v4(),
            kind: job.kind().to_string(),
            signature: job.signature(),
            enqueued_at: Utc::now(),
            not_before,
        };
        let id = info.id;
        debug!(job_id = %id, job = %info.kind, signature = %info.signature, "Job enqueued");
        self.push_back(QueuedJob {
            info,
            job,
            eligible_from_pass: self.current_pass(),
        });
        Ok(id)
    }

    fn cancel(&self, predicate: &dyn Fn(&JobInfo) -> bool) -> usize {
        let mut jobs = self.jobs.lock().unwrap();
        let before = jobs.len();
        jobs.retain(|j| !predicate(&j.info));
        let cancelled = before - jobs.len();
        if cancelled > 0 {
            info!(cancelled, "Cancelled pending jobs");
        }
        cancelled
    }

    fn pending(&self) -> Vec<JobInfo> {
        self.jobs.lock().unwrap().iter().map(|j| j.info.clone()).collect()
    }
}
