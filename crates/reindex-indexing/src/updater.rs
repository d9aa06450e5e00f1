//! Request-scoped entry point for incremental index updates.
//!
//! The persistence layer calls [`SearchUpdater::on_mutation`] after every
//! durable write and [`SearchUpdater::on_delete`] from its delete path.
//! Dirty work accumulates until [`SearchUpdater::flush`] runs at the end
//! of the unit of work.

use std::sync::Arc;

use tracing::{debug, info, warn};

use reindex_scheduler::JobQueue;
use reindex_types::{
    DirtySet, EntityId, Mutation, ProcessorPolicy, ProcessorSettings, WriteCommand,
    WriteDescriptor,
};

use crate::capture::ChangeCapture;
use crate::context::IndexingContext;
use crate::error::IndexingError;
use crate::processor::{
    BatchedProcessor, DiscardProcessor, ImmediateProcessor, Processor, QueuedProcessor,
};
use crate::progress::ProcessResult;
use crate::resolver::DirtyResolver;

/// What a flush did with the pending work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing was pending
    Empty,
    /// Processed inline and committed
    Processed(ProcessResult),
    /// Handed to the job queue as this many batches
    Queued { batches: usize },
    /// Dropped this many dirty ids
    Discarded(usize),
}

pub struct SearchUpdater {
    ctx: IndexingContext,
    capture: ChangeCapture,
    resolver: DirtyResolver,
    settings: ProcessorSettings,
    queue: Option<Arc<dyn JobQueue>>,
    dirty: DirtySet,
}

impl SearchUpdater {
    pub fn new(ctx: IndexingContext, settings: ProcessorSettings) -> Self {
        Self {
            capture: ChangeCapture::new(ctx.variants.clone()),
            resolver: DirtyResolver::new(ctx.clone()),
            ctx,
            settings,
            queue: None,
            dirty: DirtySet::new(),
        }
    }

    /// Job queue used by the queued policy and the inline-threshold
    /// fallback.
    pub fn with_queue(mut self, queue: Arc<dyn JobQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn settings(&self) -> &ProcessorSettings {
        &self.settings
    }

    /// Mutation hook: capture, resolve and accumulate.
    ///
    /// Returns the number of logical writes captured.
    pub fn on_mutation(&mut self, mutation: &Mutation) -> usize {
        let writes = self.capture.capture(mutation);
        for write in &writes {
            self.dirty.merge(self.resolver.resolve(write));
        }
        writes.len()
    }

    /// Deletion hook for `type_name` #`id` in the current variant state.
    pub fn on_delete(&mut self, type_name: &str, id: EntityId) {
        let catalog = self.ctx.catalog();
        let state = self.ctx.variants.current_state(Some(type_name));
        let mut write = WriteDescriptor::new(
            catalog.base_type(type_name),
            type_name,
            id,
            state,
            WriteCommand::Delete,
        );
        self.ctx.variants.expand_write_states(&mut write);
        debug!(type_name, entity_id = id, "Delete captured");
        self.dirty.merge(self.resolver.resolve(&write));
    }

    /// Mark `type_name` #`id` for reindexing in its current state, as if
    /// it had been written. Returns how many dirty ids this added.
    pub fn trigger_reindex(&mut self, type_name: &str, id: EntityId) -> usize {
        let catalog = self.ctx.catalog();
        let write = WriteDescriptor::new(
            catalog.base_type(type_name),
            type_name,
            id,
            self.ctx.variants.current_state(Some(type_name)),
            WriteCommand::Update,
        );
        let dirty = self.resolver.resolve(&write);
        let added = dirty.id_count();
        self.dirty.merge(dirty);
        added
    }

    /// Merge externally computed dirty work.
    pub fn add_dirty(&mut self, dirty: DirtySet) {
        self.dirty.merge(dirty);
    }

    /// Dirty ids awaiting flush.
    pub fn pending(&self) -> usize {
        self.dirty.id_count()
    }

    pub fn dirty(&self) -> &DirtySet {
        &self.dirty
    }

    /// End-of-work hook: process pending work according to the policy.
    ///
    /// With the immediate policy, more than `inline_threshold` dirty ids
    /// go to the queue instead when one is configured. Tuples whose batch
    /// part failed stay pending for the next flush.
    pub fn flush(&mut self) -> Result<FlushOutcome, IndexingError> {
        if self.dirty.is_empty() {
            return Ok(FlushOutcome::Empty);
        }
        let pending = self.pending();

        let policy = match self.settings.policy {
            ProcessorPolicy::Immediate
                if pending > self.settings.inline_threshold && self.queue.is_some() =>
            {
                info!(
                    pending,
                    threshold = self.settings.inline_threshold,
                    "Dirty set above inline threshold, queueing"
                );
                ProcessorPolicy::Queued
            }
            policy => policy,
        };

        let dirty = self.dirty.take();
        match self.run(policy, dirty.clone()) {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                warn!(pending, error = %e, "Flush failed, dirty work kept");
                self.dirty.merge(dirty);
                Err(e)
            }
        }
    }

    fn run(&mut self, policy: ProcessorPolicy, dirty: DirtySet) -> Result<FlushOutcome, IndexingError> {
        match policy {
            ProcessorPolicy::Discard => {
                let mut processor = DiscardProcessor::new();
                processor.add_dirty(dirty);
                processor.trigger_processing()?;
                info!(discarded = processor.discarded(), "Dirty work discarded");
                Ok(FlushOutcome::Discarded(processor.discarded()))
            }
            ProcessorPolicy::Immediate => {
                let mut processor = ImmediateProcessor::new(self.ctx.clone());
                processor.add_dirty(dirty);
                let result = processor.trigger_processing()?;
                self.keep_failed(processor.take_failed());
                Ok(FlushOutcome::Processed(result))
            }
            ProcessorPolicy::Batched => {
                let mut processor = BatchedProcessor::new(
                    self.ctx.clone(),
                    self.settings.batch_size,
                    self.settings.batch_soft_cap,
                );
                processor.add_dirty(dirty);
                let mut result = processor.trigger_processing()?;
                self.keep_failed(processor.take_failed());
                let report = self.ctx.commits.commit_dirty();
                result.errors += report.failed.len();
                Ok(FlushOutcome::Processed(result))
            }
            ProcessorPolicy::Queued => {
                let queue = self.queue.clone().ok_or(IndexingError::NoQueue)?;
                let mut processor = QueuedProcessor::new(
                    self.ctx.clone(),
                    queue,
                    self.settings.batch_size,
                    self.settings.batch_soft_cap,
                );
                processor.add_dirty(dirty);
                let handed_off = processor.trigger_processing()?;
                Ok(FlushOutcome::Queued {
                    batches: handed_off.batches,
                })
            }
        }
    }

    fn keep_failed(&mut self, failed: DirtySet) {
        if failed.is_empty() {
            return;
        }
        warn!(ids = failed.id_count(), "Failed dirty work kept for the next flush");
        self.dirty.merge(failed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{fixture, live, stage, Fixture};
    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use reindex_scheduler::InMemoryJobQueue;
    use reindex_schema::Entity;
    use reindex_search::EngineOp;
    use reindex_types::{document_id, TableDelta};

    fn settings(policy: ProcessorPolicy) -> ProcessorSettings {
        ProcessorSettings {
            policy,
            ..ProcessorSettings::default()
        }
    }

    fn title_change(id: EntityId, title: &str, command: WriteCommand) -> Mutation {
        Mutation::new()
            .with_delta(TableDelta::new("SiteTree", id, command).with_field("Title", title))
            .with_delta(TableDelta::new("Page", id, command).with_declared_type("Page"))
    }

    #[test]
    fn test_create_update_delete_lifecycle() {
        let Fixture { ctx, store, engine, .. } = fixture();
        let mut updater = SearchUpdater::new(ctx, settings(ProcessorPolicy::Immediate));
        let doc_id = document_id(1, "SiteTree", &stage());

        store.put(Entity::new(1, "Page").with("Title", "x"), stage());
        assert_eq!(updater.on_mutation(&title_change(1, "x", WriteCommand::Insert)), 1);
        assert_eq!(updater.pending(), 1);
        assert!(matches!(updater.flush().unwrap(), FlushOutcome::Processed(_)));
        assert!(engine.document(&doc_id).unwrap().fulltext().contains('x'));

        store.put(Entity::new(1, "Page").with("Title", "y"), stage());
        updater.on_mutation(&title_change(1, "y", WriteCommand::Update));
        updater.flush().unwrap();
        assert!(engine.document(&doc_id).unwrap().fulltext().contains('y'));

        engine.clear_operations();
        store.remove("Page", 1, &stage());
        updater.on_delete("Page", 1);
        updater.flush().unwrap();
        assert_eq!(engine.deleted_ids(), vec![doc_id.clone()]);
        assert!(engine.added_ids().is_empty());
        assert!(engine.document(&doc_id).is_none());
    }

    #[test]
    fn test_flush_with_nothing_pending() {
        let Fixture { ctx, engine, .. } = fixture();
        let mut updater = SearchUpdater::new(ctx, settings(ProcessorPolicy::Immediate));
        assert_eq!(updater.flush().unwrap(), FlushOutcome::Empty);
        assert!(engine.operations().is_empty());
    }

    #[test]
    fn test_threshold_switches_to_queue() {
        let Fixture { ctx, store, engine, .. } = fixture();
        for id in 1..=3 {
            store.put(Entity::new(id, "Page"), stage());
        }
        let queue = Arc::new(InMemoryJobQueue::new());
        let mut updater = SearchUpdater::new(
            ctx,
            ProcessorSettings {
                inline_threshold: 2,
                batch_size: 2,
                batch_soft_cap: 0,
                ..ProcessorSettings::default()
            },
        )
        .with_queue(queue.clone());

        for id in 1..=3 {
            updater.on_mutation(&title_change(id, "t", WriteCommand::Update));
        }
        assert_eq!(updater.flush().unwrap(), FlushOutcome::Queued { batches: 2 });
        assert!(engine.operations().is_empty());

        queue.drain(Utc::now(), 3);
        assert_eq!(engine.len(), 3);
        assert_eq!(engine.operations().last(), Some(&EngineOp::Commit));
    }

    #[test]
    fn test_threshold_without_queue_stays_inline() {
        let Fixture { ctx, engine, .. } = fixture();
        let mut updater = SearchUpdater::new(
            ctx,
            ProcessorSettings {
                inline_threshold: 0,
                ..ProcessorSettings::default()
            },
        );
        updater.on_mutation(&title_change(1, "t", WriteCommand::Update));
        assert!(matches!(updater.flush().unwrap(), FlushOutcome::Processed(_)));
        assert_eq!(engine.commit_count(), 1);
    }

    #[test]
    fn test_queued_policy_requires_queue() {
        let Fixture { ctx, .. } = fixture();
        let mut updater = SearchUpdater::new(ctx, settings(ProcessorPolicy::Queued));
        updater.on_mutation(&title_change(1, "t", WriteCommand::Update));
        assert!(matches!(updater.flush(), Err(IndexingError::NoQueue)));
        assert_eq!(updater.pending(), 1);
    }

    #[test]
    fn test_discard_policy() {
        let Fixture { ctx, engine, .. } = fixture();
        let mut updater = SearchUpdater::new(ctx, settings(ProcessorPolicy::Discard));
        updater.on_mutation(&title_change(1, "t", WriteCommand::Update));
        assert_eq!(updater.flush().unwrap(), FlushOutcome::Discarded(1));
        assert_eq!(updater.pending(), 0);
        assert!(engine.operations().is_empty());
    }

    #[test]
    fn test_batched_policy_commits_once() {
        let Fixture { ctx, store, engine, .. } = fixture();
        for id in 1..=5 {
            store.put(Entity::new(id, "Page"), stage());
        }
        let mut updater = SearchUpdater::new(
            ctx,
            ProcessorSettings {
                policy: ProcessorPolicy::Batched,
                batch_size: 2,
                batch_soft_cap: 0,
                ..ProcessorSettings::default()
            },
        );
        for id in 1..=5 {
            updater.on_mutation(&title_change(id, "t", WriteCommand::Update));
        }
        match updater.flush().unwrap() {
            FlushOutcome::Processed(result) => {
                assert_eq!(result.batches, 3);
                assert_eq!(result.added, 5);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(engine.commit_count(), 1);
    }

    /// One state's part fails: the other part is indexed and committed,
    /// the failed tuple stays pending and the next flush picks it up.
    #[test]
    fn test_failed_part_stays_pending() {
        let Fixture { ctx, store, engine, .. } = fixture();
        store.put(Entity::new(1, "Page").with("Title", "draft"), stage());
        store.put(Entity::new(2, "Page").with("Title", "published"), live());
        store.set_unavailable("Page", Some(&live()));

        let mut updater = SearchUpdater::new(ctx, settings(ProcessorPolicy::Immediate));
        let mut dirty = DirtySet::new();
        dirty.add("Main", "SiteTree", 1, &stage());
        dirty.add("Main", "SiteTree", 2, &live());
        updater.add_dirty(dirty);

        let FlushOutcome::Processed(result) = updater.flush().unwrap() else {
            panic!("immediate policy processes inline");
        };
        assert_eq!(result.added, 1);
        assert_eq!(result.errors, 1);
        assert_eq!(engine.len(), 1);
        assert_eq!(engine.commit_count(), 1);
        assert_eq!(updater.pending(), 1);
        let group = updater.dirty().groups().next().unwrap();
        assert_eq!(group.state, live());

        store.clear_unavailable();
        assert!(matches!(updater.flush().unwrap(), FlushOutcome::Processed(_)));
        assert_eq!(updater.pending(), 0);
        assert_eq!(engine.len(), 2);
    }

    /// Tuples of an unknown root type never block valid ones.
    #[test]
    fn test_unknown_root_type_does_not_drop_other_work() {
        let Fixture { ctx, store, engine, .. } = fixture();
        store.put(Entity::new(2, "Page"), stage());

        let mut updater = SearchUpdater::new(
            ctx,
            ProcessorSettings {
                policy: ProcessorPolicy::Batched,
                batch_size: 1,
                batch_soft_cap: 0,
                ..ProcessorSettings::default()
            },
        );
        let mut dirty = DirtySet::new();
        dirty.add("Main", "Archive", 3, &stage());
        dirty.add("Main", "SiteTree", 2, &stage());
        updater.add_dirty(dirty);

        let FlushOutcome::Processed(result) = updater.flush().unwrap() else {
            panic!("batched policy processes inline");
        };
        assert_eq!(result.batches, 2);
        assert_eq!(result.added, 1);
        assert_eq!(engine.len(), 1);
        assert_eq!(updater.pending(), 1);
        assert_eq!(updater.dirty().groups().next().unwrap().root_type, "Archive");
    }

    #[test]
    fn test_trigger_reindex_uses_current_state() {
        let Fixture { ctx, variants, .. } = fixture();
        let mut updater = SearchUpdater::new(ctx, settings(ProcessorPolicy::Immediate));
        variants.activate_state(&live()).unwrap();

        assert_eq!(updater.trigger_reindex("Page", 9), 1);
        let group = updater.dirty().groups().next().unwrap();
        assert_eq!(group.state, live());
        assert_eq!(group.root_type, "SiteTree");
    }
}
