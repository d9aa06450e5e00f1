//! Job registry: execution status per job kind.
//!
//! The queue runner records every job run here, so operators can see how
//! many commits, batches and reindex groups ran and how many failed.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Result of one job run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum JobResult {
    /// Job completed successfully
    Success,
    /// Job failed with an error message
    Failed(String),
    /// Job found nothing to do and dropped itself
    Discarded,
    /// Job put itself back on the queue
    Deferred,
}

/// Status of one job kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatus {
    pub job_kind: String,
    /// When a job of this kind last started
    pub last_run: Option<DateTime<Utc>>,
    pub last_duration_ms: Option<u64>,
    pub last_result: Option<JobResult>,
    /// Total runs, deferrals included
    pub run_count: u64,
    pub error_count: u64,
    /// Number of jobs of this kind currently executing
    pub running: u64,
}

impl JobStatus {
    pub fn new(job_kind: String) -> Self {
        Self {
            job_kind,
            last_run: None,
            last_duration_ms: None,
            last_result: None,
            run_count: 0,
            error_count: 0,
            running: 0,
        }
    }
}

/// Thread-safe registry of job status, keyed by job kind.
///
/// # Example
///
/// ```
/// use reindex_scheduler::{JobRegistry, JobResult};
///
/// let registry = JobRegistry::new();
/// registry.record_start("commit");
/// assert!(registry.is_running("commit"));
///
/// registry.record_complete("commit", JobResult::Success, 12);
/// assert!(!registry.is_running("commit"));
/// ```
pub struct JobRegistry {
    jobs: RwLock<HashMap<String, JobStatus>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
        }
    }

    /// Record that a job of `kind` started. Unknown kinds are registered.
    pub fn record_start(&self, kind: &str) {
        let mut jobs = self.jobs.write().unwrap();
        let status = jobs
            .entry(kind.to_string())
            .or_insert_with(|| JobStatus::new(kind.to_string()));
        status.running += 1;
        status.last_run = Some(Utc::now());
    }

    /// Record that a job of `kind` finished a run.
    pub fn record_complete(&self, kind: &str, result: JobResult, duration_ms: u64) {
        let mut jobs = self.jobs.write().unwrap();
        let status = jobs
            .entry(kind.to_string())
            .or_insert_with(|| JobStatus::new(kind.to_string()));
        status.running = status.running.saturating_sub(1);
        status.last_duration_ms = Some(duration_ms);
        status.run_count += 1;
        if matches!(result, JobResult::Failed(_)) {
            status.error_count += 1;
        }
        status.last_result = Some(result);
    }

    pub fn get_status(&self, kind: &str) -> Option<JobStatus> {
        self.jobs.read().unwrap().get(kind).cloned()
    }

    pub fn get_all_status(&self) -> Vec<JobStatus> {
        let mut all: Vec<JobStatus> = self.jobs.read().unwrap().values().cloned().collect();
        all.sort_by(|a, b| a.job_kind.cmp(&b.job_kind));
        all
    }

    pub fn is_running(&self, kind: &str) -> bool {
        self.jobs
            .read()
            .unwrap()
            .get(kind)
            .map(|s| s.running > 0)
            .unwrap_or(false)
    }

    pub fn job_count(&self) -> usize {
        self.jobs.read().unwrap().len()
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}
