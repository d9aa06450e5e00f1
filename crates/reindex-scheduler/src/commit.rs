//! Commit coordination.
//!
//! Batches and groups only mark indexes dirty. Commits happen in
//! [`CommitJob`]s, and at most one commit job does real work per queue
//! pass; later commit jobs in the same pass drop themselves if nothing is
//! left or come back after the cooldown.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use reindex_types::SearchEngine;

use crate::cooldown::CooldownPolicy;
use crate::error::SchedulerError;
use crate::job::{Job, JobContext, JobId, JobMessages, StepOutcome};
use crate::queue::JobQueue;

pub const COMMIT_JOB_KIND: &str = "commit";

/// Result of one coordinator invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// Every dirty index was committed
    Complete { committed: Vec<String> },
    /// Nothing was dirty
    Discarded,
    /// Another commit already ran this pass; try again after the delay
    Deferred(Duration),
    /// Some commits failed; they stay dirty
    Retry { failed: Vec<String>, delay: Duration },
}

/// Outcome of committing the current dirty set once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitReport {
    pub committed: Vec<String>,
    pub failed: Vec<String>,
}

#[derive(Default)]
struct CommitState {
    dirty: BTreeSet<String>,
    has_run_pass: Option<u64>,
    commit_counts: BTreeMap<String, u64>,
}

/// Tracks dirty indexes and coalesces their commits.
pub struct CommitCoordinator {
    engines: RwLock<BTreeMap<String, Arc<dyn SearchEngine>>>,
    state: Mutex<CommitState>,
    cooldown: CooldownPolicy,
}

impl CommitCoordinator {
    pub fn new(cooldown: CooldownPolicy) -> Self {
        Self {
            engines: RwLock::new(BTreeMap::new()),
            state: Mutex::new(CommitState::default()),
            cooldown,
        }
    }

    pub fn cooldown(&self) -> CooldownPolicy {
        self.cooldown
    }

    pub fn register_engine(&self, index_name: impl Into<String>, engine: Arc<dyn SearchEngine>) {
        self.engines.write().unwrap().insert(index_name.into(), engine);
    }

    pub fn mark_dirty(&self, index_name: &str) -> Result<(), SchedulerError> {
        if !self.engines.read().unwrap().contains_key(index_name) {
            return Err(SchedulerError::UnknownIndex(index_name.to_string()));
        }
        self.state.lock().unwrap().dirty.insert(index_name.to_string());
        Ok(())
    }

    pub fn mark_all_dirty(&self) {
        let names: Vec<String> = self.engines.read().unwrap().keys().cloned().collect();
        self.state.lock().unwrap().dirty.extend(names);
    }

    pub fn dirty_indexes(&self) -> BTreeSet<String> {
        self.state.lock().unwrap().dirty.clone()
    }

    /// Engine-level commits issued for `index_name` so far.
    pub fn commit_count(&self, index_name: &str) -> u64 {
        self.state
            .lock()
            .unwrap()
            .commit_counts
            .get(index_name)
            .copied()
            .unwrap_or(0)
    }

    /// Whether a commit job already did work in `pass`.
    pub fn has_run_in(&self, pass: u64) -> bool {
        self.state.lock().unwrap().has_run_pass == Some(pass)
    }

    /// Enqueue a commit job.
    pub fn queue(
        self: &Arc<Self>,
        queue: &dyn JobQueue,
        mark_all: bool,
        not_before: Option<DateTime<Utc>>,
    ) -> Result<JobId, SchedulerError> {
        if mark_all {
            self.mark_all_dirty();
        }
        queue.enqueue(Box::new(CommitJob::new(self.clone())), not_before)
    }

    /// Commit every dirty index now, regardless of pass.
    ///
    /// Failed indexes stay dirty. The lock is not held while engines
    /// commit, so new dirt arriving meanwhile is kept.
    pub fn commit_dirty(&self) -> CommitReport {
        let targets: Vec<String> = self.state.lock().unwrap().dirty.iter().cloned().collect();
        let engines = self.engines.read().unwrap().clone();
        let mut report = CommitReport::default();

        for name in targets {
            let Some(engine) = engines.get(&name) else {
                warn!(index = %name, "No engine registered for dirty index");
                report.failed.push(name);
                continue;
            };
            match engine.commit() {
                Ok(()) => {
                    let mut state = self.state.lock().unwrap();
                    state.dirty.remove(&name);
                    *state.commit_counts.entry(name.clone()).or_insert(0) += 1;
                    debug!(index = %name, "Committed index");
                    report.committed.push(name);
                }
                Err(e) => {
                    warn!(index = %name, error = %e, "Commit failed, index stays dirty");
                    report.failed.push(name);
                }
            }
        }

        report
    }

    /// One commit-job invocation in `ctx.pass`.
    pub fn process(&self, ctx: &JobContext) -> CommitOutcome {
        {
            let mut state = self.state.lock().unwrap();
            if state.dirty.is_empty() {
                return CommitOutcome::Discarded;
            }
            if state.has_run_pass == Some(ctx.pass) {
                let delay = self.cooldown.delay();
                debug!(pass = ctx.pass, ?delay, "Commit already ran this pass, deferring");
                return CommitOutcome::Deferred(delay);
            }
            state.has_run_pass = Some(ctx.pass);
        }

        let report = self.commit_dirty();
        if report.failed.is_empty() {
            info!(pass = ctx.pass, committed = ?report.committed, "Commit complete");
            CommitOutcome::Complete {
                committed: report.committed,
            }
        } else {
            CommitOutcome::Retry {
                failed: report.failed,
                delay: self.cooldown.delay(),
            }
        }
    }
}

impl Default for CommitCoordinator {
    fn default() -> Self {
        Self::new(CooldownPolicy::none())
    }
}

/// Queue job wrapping [`CommitCoordinator::process`].
pub struct CommitJob {
    coordinator: Arc<CommitCoordinator>,
    /// Indexes this job has committed
    completed: BTreeSet<String>,
    messages: JobMessages,
}

impl CommitJob {
    pub fn new(coordinator: Arc<CommitCoordinator>) -> Self {
        Self {
            coordinator,
            completed: BTreeSet::new(),
            messages: JobMessages::new(),
        }
    }

    pub fn completed(&self) -> &BTreeSet<String> {
        &self.completed
    }
}

impl Job for CommitJob {
    fn kind(&self) -> &str {
        COMMIT_JOB_KIND
    }

    fn signature(&self) -> String {
        COMMIT_JOB_KIND.to_string()
    }

    fn process(&mut self, ctx: &JobContext) -> Result<StepOutcome, SchedulerError> {
        match self.coordinator.process(ctx) {
            CommitOutcome::Complete { committed } => {
                self.messages
                    .add(COMMIT_JOB_KIND, format!("Committed {}", committed.join(", ")));
                self.completed.extend(committed);
                Ok(StepOutcome::Complete)
            }
            CommitOutcome::Discarded => {
                self.messages
                    .add(COMMIT_JOB_KIND, "Indexes already committed, discarding");
                Ok(StepOutcome::Discard)
            }
            CommitOutcome::Deferred(delay) => {
                self.messages.add(
                    COMMIT_JOB_KIND,
                    format!("Commit already ran this pass, retrying in {}s", delay.as_secs()),
                );
                Ok(StepOutcome::Requeue { delay })
            }
            CommitOutcome::Retry { failed, delay } => {
                self.messages.add(
                    COMMIT_JOB_KIND,
                    format!("Commit failed for {}, retrying", failed.join(", ")),
                );
                Ok(StepOutcome::Requeue { delay })
            }
        }
    }

    fn messages(&self) -> &[String] {
        self.messages.as_slice()
    }
}
