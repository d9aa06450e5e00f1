//! Error types for the scheduler crate.
//!
//! Covers the job queue, job execution and commit coordination.

use thiserror::Error;

use reindex_types::EngineError;

/// Errors that can occur during scheduler operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Job not found in the queue
    #[error("Job not found: {0}")]
    JobNotFound(String),

    /// The queue no longer accepts work
    #[error("Queue is closed")]
    QueueClosed,

    /// A job step failed
    #[error("Job {kind} failed: {message}")]
    JobFailed { kind: String, message: String },

    /// Commit targeted an index nobody registered
    #[error("Unknown index: {0}")]
    UnknownIndex(String),

    /// Search engine error surfaced by a job
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// Worker is already running
    #[error("Worker is already running")]
    AlreadyRunning,

    /// Worker is not running
    #[error("Worker is not running")]
    NotRunning,
}

impl SchedulerError {
    pub fn job_failed(kind: impl Into<String>, message: impl ToString) -> Self {
        SchedulerError::JobFailed {
            kind: kind.into(),
            message: message.to_string(),
        }
    }
}
