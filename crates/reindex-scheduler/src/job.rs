//! Queue job interface.
//!
//! A job is processed in steps. Each call to [`Job::process`] does a
//! bounded amount of work and reports whether to continue, finish, drop
//! itself or come back later. Jobs keep their own progress so a runner can
//! re-invoke a step after an interruption.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::error::SchedulerError;

/// Identifier assigned by the queue at enqueue time.
pub type JobId = Uuid;

/// Runner-provided context for one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobContext {
    /// Processing pass the step runs in; increments once per queue run
    pub pass: u64,
    pub now: DateTime<Utc>,
}

impl JobContext {
    pub fn new(pass: u64, now: DateTime<Utc>) -> Self {
        Self { pass, now }
    }
}

/// What the runner should do after a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// More steps remain; call `process` again
    Continue,
    /// Finished successfully
    Complete,
    /// Nothing left to do; drop the job without counting it as work
    Discard,
    /// Put the job back and run it again after `delay`
    Requeue { delay: Duration },
}

/// Resumable progress counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobProgress {
    pub steps_done: u64,
    pub total_steps: u64,
}

impl JobProgress {
    pub fn is_complete(&self) -> bool {
        self.steps_done >= self.total_steps
    }
}

/// Queue-visible description of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobInfo {
    pub id: JobId,
    pub kind: String,
    /// Stable description of the job's target; used by cancel predicates
    pub signature: String,
    pub enqueued_at: DateTime<Utc>,
    pub not_before: Option<DateTime<Utc>>,
}

/// A unit of asynchronous work.
pub trait Job: Send {
    /// Short kind name (`"commit"`, `"reindex-group"`, ...).
    fn kind(&self) -> &str;

    fn signature(&self) -> String;

    fn process(&mut self, ctx: &JobContext) -> Result<StepOutcome, SchedulerError>;

    fn progress(&self) -> JobProgress {
        JobProgress::default()
    }

    /// Messages logged by the job so far.
    fn messages(&self) -> &[String] {
        &[]
    }
}

/// Message log kept by a job and mirrored to tracing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobMessages(Vec<String>);

impl JobMessages {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, kind: &str, message: impl Into<String>) {
        let message = message.into();
        info!(job = kind, "{}", message);
        self.0.push(message);
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
