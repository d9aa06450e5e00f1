//! Counters for batch processing and full reindexing.

use tracing::info;

/// Outcome of processing one or more batches.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ProcessResult {
    /// Documents added (or replaced)
    pub added: usize,
    /// Documents deleted because the entity was not found
    pub deleted: usize,
    /// Tuples skipped (excluded state, class not covered)
    pub skipped: usize,
    /// Engine or store failures
    pub errors: usize,
    /// Batches processed
    pub batches: usize,
}

impl ProcessResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_add(&mut self) {
        self.added += 1;
    }

    pub fn record_delete(&mut self) {
        self.deleted += 1;
    }

    pub fn record_skip(&mut self) {
        self.skipped += 1;
    }

    pub fn record_error(&mut self) {
        self.errors += 1;
    }

    /// Merge another result into this one.
    pub fn merge(&mut self, other: &ProcessResult) {
        self.added += other.added;
        self.deleted += other.deleted;
        self.skipped += other.skipped;
        self.errors += other.errors;
        self.batches += other.batches;
    }

    pub fn has_errors(&self) -> bool {
        self.errors > 0
    }
}

/// Progress of a full reindex.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReindexProgress {
    /// Groups planned across all classes and states
    pub groups_total: u64,
    pub groups_done: u64,
    pub documents_added: u64,
    /// Documents removed by scoped and obsolete-class deletes
    pub documents_deleted: u64,
    pub errors: u64,
    pub completed: bool,
}

impl ReindexProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_group(&mut self, added: u64, errors: u64) {
        self.groups_done += 1;
        self.documents_added += added;
        self.errors += errors;
    }

    pub fn record_deleted(&mut self, count: u64) {
        self.documents_deleted += count;
    }

    pub fn mark_completed(&mut self) {
        self.completed = true;
    }
}

/// Receives reindex progress updates.
pub trait ProgressCallback: Send {
    /// Called after each group and once more when the run completes.
    fn on_progress(&self, progress: &ReindexProgress);
}

/// A no-op progress callback for when progress reporting isn't needed.
pub struct NoOpProgressCallback;

impl ProgressCallback for NoOpProgressCallback {
    fn on_progress(&self, _progress: &ReindexProgress) {}
}

/// Logs progress at info level every `every` groups.
pub struct LoggingProgressCallback {
    every: u64,
}

impl LoggingProgressCallback {
    pub fn new(every: u64) -> Self {
        Self {
            every: every.max(1),
        }
    }
}

impl ProgressCallback for LoggingProgressCallback {
    fn on_progress(&self, progress: &ReindexProgress) {
        if progress.completed || progress.groups_done.is_multiple_of(self.every) {
            info!(
                groups = progress.groups_done,
                total = progress.groups_total,
                added = progress.documents_added,
                deleted = progress.documents_deleted,
                errors = progress.errors,
                "Reindex progress"
            );
        }
    }
}
