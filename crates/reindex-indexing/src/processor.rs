//! Processing accumulated dirty work.
//!
//! A processor owns the request-scoped [`DirtySet`] and, when triggered,
//! turns every dirty tuple into an engine add (entity found) or delete
//! (entity gone) and marks the touched indexes dirty for commit.
//!
//! Four policies are provided:
//! - [`ImmediateProcessor`]: one inline pass, then commit
//! - [`BatchedProcessor`]: size-bounded batches with a resumable cursor
//! - [`QueuedProcessor`]: batches run as a queue job, then a commit job
//! - [`DiscardProcessor`]: drops everything

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use reindex_scheduler::{
    Job, JobContext, JobId, JobMessages, JobProgress, JobQueue, SchedulerError, StepOutcome,
};
use reindex_schema::Entity;
use reindex_types::{document_id, DirtySet, EntityId, VariantStateVector};

use crate::batch::{segment_batches, Batch, BatchPart};
use crate::context::IndexingContext;
use crate::error::IndexingError;
use crate::progress::ProcessResult;

pub const BATCH_JOB_KIND: &str = "search-batch";

/// Runs of a batch job before work that keeps failing fails the job.
pub const MAX_BATCH_ATTEMPTS: u32 = 3;

/// Delay before a batch job retries failed parts.
pub const BATCH_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Request-scoped dirty work processor.
pub trait Processor: Send {
    /// Merge more dirty work into the pending set.
    fn add_dirty(&mut self, dirty: DirtySet);

    /// Dirty ids not yet handed to processing.
    fn pending(&self) -> usize;

    /// Process (or hand off) everything pending.
    fn trigger_processing(&mut self) -> Result<ProcessResult, IndexingError>;
}

/// Apply one batch part: add found entities, delete missing ones.
///
/// Engine failures are logged per document and counted. The variant
/// state is active only while the part is processed.
pub fn process_part(
    ctx: &IndexingContext,
    part: &BatchPart,
) -> Result<ProcessResult, IndexingError> {
    let mut result = ProcessResult::new();
    let _guard = ctx.variants.activate_scoped(&part.state)?;
    let query_state = ctx.variants.current_state(None);

    let ids: BTreeSet<EntityId> = part.ids.keys().copied().collect();
    let found: BTreeMap<EntityId, Entity> = ctx
        .store
        .get_by_ids(&part.root_type, &ids, &query_state)?
        .into_iter()
        .map(|e| (e.id, e))
        .collect();

    for (id, index_names) in &part.ids {
        for name in index_names {
            let entry = match ctx.index(name) {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(index = %name, error = %e, "Dirty tuple names an unknown index");
                    result.record_error();
                    continue;
                }
            };
            let definition = entry.definition.as_ref();
            if definition.is_excluded(&part.state) {
                result.record_skip();
                continue;
            }

            let covered = found
                .get(id)
                .filter(|entity| definition.covering_class(&entity.type_name).is_some());
            let outcome = match covered {
                Some(entity) => {
                    let doc = definition.build_document(ctx.store.as_ref(), entity, &part.state);
                    entry.engine.add(doc).map(|_| true)
                }
                None => entry
                    .engine
                    .delete(&document_id(*id, &part.root_type, &part.state))
                    .map(|_| false),
            };

            match outcome {
                Ok(true) => result.record_add(),
                Ok(false) => result.record_delete(),
                Err(e) => {
                    warn!(
                        index = %name,
                        root_type = %part.root_type,
                        entity_id = id,
                        state = %part.state,
                        error = %e,
                        "Search engine update failed"
                    );
                    result.record_error();
                }
            }
            if let Err(e) = ctx.commits.mark_dirty(name) {
                warn!(index = %name, error = %e, "Could not mark index dirty");
            }
        }
    }

    debug!(
        root_type = %part.root_type,
        state = %part.state,
        added = result.added,
        deleted = result.deleted,
        "Processed batch part"
    );
    Ok(result)
}

/// Process every part of `batch`.
///
/// A part that fails (store or variant error) does not stop the others:
/// it is logged, counted as one error and its tuples are put into
/// `failed` so they can be retried.
pub fn process_batch(ctx: &IndexingContext, batch: &Batch, failed: &mut DirtySet) -> ProcessResult {
    let mut result = ProcessResult::new();
    for part in &batch.parts {
        match process_part(ctx, part) {
            Ok(part_result) => result.merge(&part_result),
            Err(e) => {
                warn!(
                    root_type = %part.root_type,
                    state = %part.state,
                    ids = part.ids.len(),
                    error = %e,
                    "Batch part failed, kept for retry"
                );
                result.record_error();
                part.restore_into(failed);
            }
        }
    }
    result.batches = 1;
    result
}

/// Segments dirty work into batches and walks them with a cursor.
///
/// Parts that fail are collected in a separate dirty set; the cursor
/// still moves on, so one bad part never blocks the rest of the work.
pub struct BatchedProcessor {
    ctx: IndexingContext,
    dirty: DirtySet,
    batches: Vec<Batch>,
    cursor: usize,
    bound: usize,
    soft_cap: usize,
    result: ProcessResult,
    failed: DirtySet,
}

impl BatchedProcessor {
    pub fn new(ctx: IndexingContext, bound: usize, soft_cap: usize) -> Self {
        Self {
            ctx,
            dirty: DirtySet::new(),
            batches: Vec::new(),
            cursor: 0,
            bound,
            soft_cap,
            result: ProcessResult::new(),
            failed: DirtySet::new(),
        }
    }

    /// Record `(id, state)` pairs of `root_type` as needed by `index_name`.
    pub fn add_dirty_tuples(
        &mut self,
        root_type: &str,
        tuples: impl IntoIterator<Item = (EntityId, VariantStateVector)>,
        index_name: &str,
    ) {
        for (id, state) in tuples {
            self.dirty.add(index_name, root_type, id, &state);
        }
    }

    /// Move pending work into new batches, appended after existing ones.
    pub fn segment_batches(&mut self) -> &[Batch] {
        let dirty = self.dirty.take();
        self.batches
            .extend(segment_batches(&dirty, self.bound, self.soft_cap));
        &self.batches[self.cursor..]
    }

    /// Process the batch under the cursor.
    ///
    /// Returns `Ok(false)` once every batch has been processed; calling
    /// again is a no-op. Failed parts end up in [`failed`](Self::failed).
    pub fn process_next(&mut self) -> Result<bool, IndexingError> {
        Ok(self.step().is_some())
    }

    fn step(&mut self) -> Option<ProcessResult> {
        let batch = self.batches.get(self.cursor)?;
        let result = process_batch(&self.ctx, batch, &mut self.failed);
        self.result.merge(&result);
        self.cursor += 1;
        debug!(
            batch = self.cursor,
            total = self.batches.len(),
            ids = batch.len(),
            errors = result.errors,
            "Batch processed"
        );
        Some(result)
    }

    /// Tuples of parts that failed and have not been taken back.
    pub fn failed(&self) -> &DirtySet {
        &self.failed
    }

    pub fn take_failed(&mut self) -> DirtySet {
        self.failed.take()
    }

    /// Segment failed work into new batches after the cursor. Returns the
    /// number of batches added.
    pub fn retry_failed(&mut self) -> usize {
        let failed = self.failed.take();
        self.dirty.merge(failed);
        let before = self.batches.len();
        self.segment_batches();
        self.batches.len() - before
    }

    pub fn is_complete(&self) -> bool {
        self.cursor >= self.batches.len() && self.dirty.is_empty()
    }

    pub fn batches(&self) -> &[Batch] {
        &self.batches
    }

    pub fn progress(&self) -> JobProgress {
        JobProgress {
            steps_done: self.cursor as u64,
            total_steps: self.batches.len() as u64,
        }
    }

    /// Totals over every batch processed so far.
    pub fn result(&self) -> &ProcessResult {
        &self.result
    }
}

impl Processor for BatchedProcessor {
    fn add_dirty(&mut self, dirty: DirtySet) {
        self.dirty.merge(dirty);
    }

    fn pending(&self) -> usize {
        self.dirty.id_count()
    }

    fn trigger_processing(&mut self) -> Result<ProcessResult, IndexingError> {
        self.segment_batches();
        let mut result = ProcessResult::new();
        while let Some(step) = self.step() {
            result.merge(&step);
        }
        Ok(result)
    }
}

/// Processes everything inline as one batch, then commits.
pub struct ImmediateProcessor {
    inner: BatchedProcessor,
}

impl ImmediateProcessor {
    pub fn new(ctx: IndexingContext) -> Self {
        Self {
            inner: BatchedProcessor::new(ctx, 0, 0),
        }
    }

    /// Tuples of parts that failed during the last trigger.
    pub fn take_failed(&mut self) -> DirtySet {
        self.inner.take_failed()
    }
}

impl Processor for ImmediateProcessor {
    fn add_dirty(&mut self, dirty: DirtySet) {
        self.inner.add_dirty(dirty);
    }

    fn pending(&self) -> usize {
        self.inner.pending()
    }

    fn trigger_processing(&mut self) -> Result<ProcessResult, IndexingError> {
        let mut result = self.inner.trigger_processing()?;
        let report = self.inner.ctx.commits.commit_dirty();
        if !report.failed.is_empty() {
            warn!(failed = ?report.failed, "Commit failed, indexes stay dirty");
            result.errors += report.failed.len();
        }
        info!(
            added = result.added,
            deleted = result.deleted,
            errors = result.errors,
            "Immediate processing complete"
        );
        Ok(result)
    }
}

/// Hands batches to the job queue; a commit job follows the last batch.
pub struct QueuedProcessor {
    ctx: IndexingContext,
    queue: Arc<dyn JobQueue>,
    dirty: DirtySet,
    bound: usize,
    soft_cap: usize,
    jobs: Vec<JobId>,
}

impl QueuedProcessor {
    pub fn new(
        ctx: IndexingContext,
        queue: Arc<dyn JobQueue>,
        bound: usize,
        soft_cap: usize,
    ) -> Self {
        Self {
            ctx,
            queue,
            dirty: DirtySet::new(),
            bound,
            soft_cap,
            jobs: Vec::new(),
        }
    }

    /// Jobs enqueued so far.
    pub fn jobs(&self) -> &[JobId] {
        &self.jobs
    }
}

impl Processor for QueuedProcessor {
    fn add_dirty(&mut self, dirty: DirtySet) {
        self.dirty.merge(dirty);
    }

    fn pending(&self) -> usize {
        self.dirty.id_count()
    }

    /// Enqueue one batch job for everything pending. The returned result
    /// only counts the batches handed off.
    fn trigger_processing(&mut self) -> Result<ProcessResult, IndexingError> {
        let mut processor = BatchedProcessor::new(self.ctx.clone(), self.bound, self.soft_cap);
        processor.add_dirty(self.dirty.take());
        let batches = processor.segment_batches().len();
        if batches == 0 {
            return Ok(ProcessResult::new());
        }

        let job = BatchProcessJob::new(processor, self.queue.clone());
        let id = self.queue.enqueue(Box::new(job), None)?;
        info!(job_id = %id, batches, "Queued search batch job");
        self.jobs.push(id);

        Ok(ProcessResult {
            batches,
            ..ProcessResult::default()
        })
    }
}

/// Drops all dirty work.
#[derive(Default)]
pub struct DiscardProcessor {
    discarded: usize,
}

impl DiscardProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dirty ids dropped so far.
    pub fn discarded(&self) -> usize {
        self.discarded
    }
}

impl Processor for DiscardProcessor {
    fn add_dirty(&mut self, dirty: DirtySet) {
        self.discarded += dirty.id_count();
    }

    fn pending(&self) -> usize {
        0
    }

    fn trigger_processing(&mut self) -> Result<ProcessResult, IndexingError> {
        Ok(ProcessResult::new())
    }
}

/// Queue job running a [`BatchedProcessor`] one batch per step.
///
/// Failed parts are re-batched and the job requeued, up to
/// [`MAX_BATCH_ATTEMPTS`] runs. The commit job is queued either way so the
/// work that did succeed becomes visible.
pub struct BatchProcessJob {
    processor: BatchedProcessor,
    queue: Arc<dyn JobQueue>,
    messages: JobMessages,
    attempts: u32,
}

impl BatchProcessJob {
    pub fn new(processor: BatchedProcessor, queue: Arc<dyn JobQueue>) -> Self {
        Self {
            processor,
            queue,
            messages: JobMessages::new(),
            attempts: 1,
        }
    }

    /// Dirty tuples still failing.
    pub fn failed(&self) -> &DirtySet {
        self.processor.failed()
    }
}

impl Job for BatchProcessJob {
    fn kind(&self) -> &str {
        BATCH_JOB_KIND
    }

    fn signature(&self) -> String {
        let ids: usize = self.processor.batches().iter().map(Batch::len).sum();
        format!("{}:{}", BATCH_JOB_KIND, ids)
    }

    fn process(&mut self, _ctx: &JobContext) -> Result<StepOutcome, SchedulerError> {
        match self.processor.process_next() {
            Ok(true) => return Ok(StepOutcome::Continue),
            Ok(false) => {}
            Err(e) => {
                self.messages
                    .add(BATCH_JOB_KIND, format!("Batch failed: {}", e));
                return Err(SchedulerError::job_failed(BATCH_JOB_KIND, e));
            }
        }

        let failed = self.processor.failed().id_count();
        if failed > 0 && self.attempts < MAX_BATCH_ATTEMPTS {
            self.attempts += 1;
            let batches = self.processor.retry_failed();
            self.messages.add(
                BATCH_JOB_KIND,
                format!(
                    "{} ids failed, retrying as {} batches (attempt {})",
                    failed, batches, self.attempts
                ),
            );
            return Ok(StepOutcome::Requeue {
                delay: BATCH_RETRY_DELAY,
            });
        }

        let result = self.processor.result().clone();
        self.messages.add(
            BATCH_JOB_KIND,
            format!(
                "Processed {} batches: {} added, {} deleted, {} errors",
                result.batches, result.added, result.deleted, result.errors
            ),
        );
        self.processor
            .ctx
            .commits
            .queue(self.queue.as_ref(), false, None)?;

        if failed > 0 {
            return Err(SchedulerError::job_failed(
                BATCH_JOB_KIND,
                format!("{} ids still failing after {} attempts", failed, self.attempts),
            ));
        }
        Ok(StepOutcome::Complete)
    }

    fn progress(&self) -> JobProgress {
        self.processor.progress()
    }

    fn messages(&self) -> &[String] {
        self.messages.as_slice()
    }
}
