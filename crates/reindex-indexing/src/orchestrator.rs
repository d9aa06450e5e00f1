//! Full index rebuilds.
//!
//! A full reindex visits every covered class in every variant state the
//! class can take. Each `(class, state)` is split into id stripes
//! (`id % group_count == group_index`) sized by the batch size, and each
//! stripe is an independent group: clear the stripe's documents, then
//! re-add every entity currently in it. Running a group twice converges to
//! the same index contents, so failed groups can simply be rerun.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use reindex_scheduler::{
    Job, JobContext, JobInfo, JobMessages, JobQueue, SchedulerError, StepOutcome,
};
use reindex_types::{DeleteQuery, Stripe, VariantStateVector};

use crate::context::IndexingContext;
use crate::error::IndexingError;
use crate::progress::{ProcessResult, ProgressCallback, ReindexProgress};

pub const REINDEX_GROUP_JOB_KIND: &str = "reindex-group";

/// One id stripe of one class in one state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupTask {
    pub index: String,
    pub class: String,
    pub state: VariantStateVector,
    pub group_count: u64,
    pub group_index: u64,
}

impl GroupTask {
    pub fn stripe(&self) -> Stripe {
        Stripe::new(self.group_count, self.group_index)
    }

    /// Stable description; starts with `"{index}:"`.
    pub fn signature(&self) -> String {
        format!(
            "{}:{}:{}:{}/{}",
            self.index,
            self.class,
            self.state.state_key(),
            self.group_index,
            self.group_count
        )
    }
}

/// Groups to run for one index, after obsolete documents were removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReindexPlan {
    pub index: String,
    pub tasks: Vec<GroupTask>,
    /// Documents removed while planning
    pub deleted: u64,
}

/// Plans and runs full reindexes.
pub struct ReindexOrchestrator {
    ctx: IndexingContext,
    batch_size: u64,
}

impl ReindexOrchestrator {
    pub fn new(ctx: IndexingContext, batch_size: u64) -> Self {
        Self {
            ctx,
            batch_size: batch_size.max(1),
        }
    }

    pub fn context(&self) -> &IndexingContext {
        &self.ctx
    }

    pub fn batch_size(&self) -> u64 {
        self.batch_size
    }

    /// Plan a full reindex of `index_name`.
    ///
    /// Without a type filter, documents of classes the index no longer
    /// covers are deleted first. Each `(class, state)` with no entities
    /// gets a scoped delete instead of groups. Excluded states are
    /// skipped.
    pub fn plan_full(
        &self,
        index_name: &str,
        type_filter: Option<&[String]>,
    ) -> Result<ReindexPlan, IndexingError> {
        let entry = self.ctx.index(index_name)?;
        let definition = entry.definition.as_ref();
        let variants = &self.ctx.variants;
        let mut plan = ReindexPlan {
            index: index_name.to_string(),
            ..ReindexPlan::default()
        };

        if type_filter.is_none() {
            plan.deleted += entry
                .engine
                .delete_by_query(&DeleteQuery::NotAnyType(definition.class_names()))?;
            self.mark_dirty(index_name);
        }

        for (class, options) in definition.classes() {
            if let Some(filter) = type_filter {
                if !filter.iter().any(|t| t == class) {
                    continue;
                }
            }

            for state in variants.reindex_states(Some(class.as_str()), options.include_children) {
                if definition.is_excluded(&state) {
                    debug!(index = %index_name, class = %class, state = %state, "Excluded state skipped");
                    continue;
                }

                let count = {
                    let _guard = variants.activate_scoped(&state)?;
                    self.ctx
                        .store
                        .count(class, &variants.current_state(None))?
                };

                if count == 0 {
                    plan.deleted += entry.engine.delete_by_query(&DeleteQuery::Scoped {
                        class: class.clone(),
                        state: state.clone(),
                        stripe: None,
                    })?;
                    self.mark_dirty(index_name);
                    continue;
                }

                let group_count = count.div_ceil(self.batch_size);
                info!(
                    index = %index_name,
                    class = %class,
                    state = %state,
                    count,
                    groups = group_count,
                    "Planned reindex groups"
                );
                plan.tasks.extend((0..group_count).map(|group_index| GroupTask {
                    index: index_name.to_string(),
                    class: class.clone(),
                    state: state.clone(),
                    group_count,
                    group_index,
                }));
            }
        }

        Ok(plan)
    }

    /// Rebuild one group: clear its stripe, then re-add current entities.
    ///
    /// The variant state is restored on return. Per-document engine
    /// failures are counted, not raised.
    pub fn run_group(&self, task: &GroupTask) -> Result<ProcessResult, IndexingError> {
        let entry = self.ctx.index(&task.index)?;
        let definition = entry.definition.as_ref();
        let variants = &self.ctx.variants;
        let _guard = variants.activate_scoped(&task.state)?;

        let stripe = task.stripe();
        entry.engine.delete_by_query(&DeleteQuery::Scoped {
            class: task.class.clone(),
            state: task.state.clone(),
            stripe: Some(stripe),
        })?;

        let entities =
            self.ctx
                .store
                .iterate_striped(&task.class, stripe, &variants.current_state(None))?;

        let mut result = ProcessResult::new();
        for entity in &entities {
            if definition.covering_class(&entity.type_name).is_none() {
                result.record_skip();
                continue;
            }
            let doc = definition.build_document(self.ctx.store.as_ref(), entity, &task.state);
            match entry.engine.add(doc) {
                Ok(()) => result.record_add(),
                Err(e) => {
                    warn!(
                        index = %task.index,
                        entity_id = entity.id,
                        error = %e,
                        "Failed to index entity"
                    );
                    result.record_error();
                }
            }
        }
        result.batches = 1;
        self.mark_dirty(&task.index);

        debug!(
            group = %task.signature(),
            added = result.added,
            errors = result.errors,
            "Reindexed group"
        );
        Ok(result)
    }

    /// Plan and run every group of `indexes` inline, then commit.
    pub fn run_full(
        &self,
        indexes: &[String],
        type_filter: Option<&[String]>,
        callback: &dyn ProgressCallback,
    ) -> Result<ReindexProgress, IndexingError> {
        let mut progress = ReindexProgress::new();
        for index_name in indexes {
            let plan = self.plan_full(index_name, type_filter)?;
            progress.groups_total += plan.tasks.len() as u64;
            progress.record_deleted(plan.deleted);

            for task in &plan.tasks {
                let result = self.run_group(task)?;
                progress.record_group(result.added as u64, result.errors as u64);
                callback.on_progress(&progress);
            }
        }

        let report = self.ctx.commits.commit_dirty();
        progress.errors += report.failed.len() as u64;
        progress.mark_completed();
        callback.on_progress(&progress);

        info!(
            indexes = ?indexes,
            groups = progress.groups_done,
            added = progress.documents_added,
            errors = progress.errors,
            "Full reindex complete"
        );
        Ok(progress)
    }

    fn mark_dirty(&self, index_name: &str) {
        if let Err(e) = self.ctx.commits.mark_dirty(index_name) {
            warn!(index = %index_name, error = %e, "Could not mark index dirty");
        }
    }
}

/// How a full reindex is executed.
pub trait ReindexHandler: Send + Sync {
    fn run_full(
        &self,
        indexes: &[String],
        type_filter: Option<&[String]>,
        callback: &dyn ProgressCallback,
    ) -> Result<ReindexProgress, IndexingError>;
}

/// Runs every group in the calling thread.
pub struct ImmediateReindexHandler {
    orchestrator: Arc<ReindexOrchestrator>,
}

impl ImmediateReindexHandler {
    pub fn new(orchestrator: Arc<ReindexOrchestrator>) -> Self {
        Self { orchestrator }
    }
}

impl ReindexHandler for ImmediateReindexHandler {
    fn run_full(
        &self,
        indexes: &[String],
        type_filter: Option<&[String]>,
        callback: &dyn ProgressCallback,
    ) -> Result<ReindexProgress, IndexingError> {
        self.orchestrator.run_full(indexes, type_filter, callback)
    }
}

/// Enqueues one job per group and a final commit job.
///
/// Groups still queued from an earlier run of the same index are
/// cancelled first. The returned progress only has `groups_total` and
/// the planning deletes filled in.
pub struct QueuedReindexHandler {
    orchestrator: Arc<ReindexOrchestrator>,
    queue: Arc<dyn JobQueue>,
}

impl QueuedReindexHandler {
    pub fn new(orchestrator: Arc<ReindexOrchestrator>, queue: Arc<dyn JobQueue>) -> Self {
        Self {
            orchestrator,
            queue,
        }
    }
}

impl ReindexHandler for QueuedReindexHandler {
    fn run_full(
        &self,
        indexes: &[String],
        type_filter: Option<&[String]>,
        callback: &dyn ProgressCallback,
    ) -> Result<ReindexProgress, IndexingError> {
        let mut progress = ReindexProgress::new();

        for index_name in indexes {
            let prefix = format!("{}:", index_name);
            let cancelled = self.queue.cancel(&|info: &JobInfo| {
                info.kind == REINDEX_GROUP_JOB_KIND && info.signature.starts_with(&prefix)
            });
            if cancelled > 0 {
                info!(index = %index_name, cancelled, "Cancelled earlier reindex groups");
            }

            let plan = self.orchestrator.plan_full(index_name, type_filter)?;
            progress.groups_total += plan.tasks.len() as u64;
            progress.record_deleted(plan.deleted);

            for task in plan.tasks {
                let job = ReindexGroupJob::new(self.orchestrator.clone(), task);
                self.queue.enqueue(Box::new(job), None)?;
            }
        }

        self.orchestrator
            .context()
            .commits
            .queue(self.queue.as_ref(), false, None)?;
        callback.on_progress(&progress);
        Ok(progress)
    }
}

/// Queue job running one [`GroupTask`].
pub struct ReindexGroupJob {
    orchestrator: Arc<ReindexOrchestrator>,
    task: GroupTask,
    messages: JobMessages,
}

impl ReindexGroupJob {
    pub fn new(orchestrator: Arc<ReindexOrchestrator>, task: GroupTask) -> Self {
        Self {
            orchestrator,
            task,
            messages: JobMessages::new(),
        }
    }

    pub fn task(&self) -> &GroupTask {
        &self.task
    }
}

impl Job for ReindexGroupJob {
    fn kind(&self) -> &str {
        REINDEX_GROUP_JOB_KIND
    }

    fn signature(&self) -> String {
        self.task.signature()
    }

    fn process(&mut self, _ctx: &JobContext) -> Result<StepOutcome, SchedulerError> {
        let result = self
            .orchestrator
            .run_group(&self.task)
            .map_err(|e| SchedulerError::job_failed(REINDEX_GROUP_JOB_KIND, e))?;

        self.messages.add(
            REINDEX_GROUP_JOB_KIND,
            format!(
                "Group {}: {} added, {} errors",
                self.task.signature(),
                result.added,
                result.errors
            ),
        );
        if result.has_errors() {
            return Err(SchedulerError::job_failed(
                REINDEX_GROUP_JOB_KIND,
                format!("{} documents failed", result.errors),
            ));
        }
        Ok(StepOutcome::Complete)
    }

    fn messages(&self) -> &[String] {
        self.messages.as_slice()
    }
}
