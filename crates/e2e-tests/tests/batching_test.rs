//! End-to-end tests for batch segmentation and processing policies.

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;

use e2e_tests::{shuffled_ids, TestHarness, CONTAINERS};
use reindex_indexing::{BatchedProcessor, FlushOutcome, Processor, SearchUpdater};
use reindex_scheduler::QueueWorker;
use reindex_types::{
    DirtySet, Mutation, ProcessorPolicy, ProcessorSettings, TableDelta, VariantStateVector,
    WriteCommand,
};

fn settings(policy: ProcessorPolicy, batch_size: usize, batch_soft_cap: usize) -> ProcessorSettings {
    ProcessorSettings {
        policy,
        batch_size,
        batch_soft_cap,
        inline_threshold: 1_000,
    }
}

/// Containers `1..=count` inserted in random order, plus the matching
/// mutation.
fn seed(harness: &TestHarness, count: u64) -> Mutation {
    harness.put_person(9, "Jo");
    let mut mutation = Mutation::new();
    for id in shuffled_ids(count) {
        harness.put_container(id, "crate", 9);
        mutation = mutation.with_delta(
            TableDelta::new("Container", id, WriteCommand::Insert).with_field("Field1", "crate"),
        );
    }
    mutation
}

fn dirty_containers(count: u64) -> DirtySet {
    let mut dirty = DirtySet::new();
    dirty.add_ids(CONTAINERS, "Container", &VariantStateVector::new(), 1..=count);
    dirty
}

/// 42 ids with a bound of 5: the soft cap absorbs the remainder of 2.
#[test]
fn test_batched_flush_soft_cap() {
    let harness = TestHarness::new();
    let mutation = seed(&harness, 42);

    let mut updater = SearchUpdater::new(harness.ctx.clone(), settings(ProcessorPolicy::Batched, 5, 2));
    updater.on_mutation(&mutation);
    assert_eq!(updater.pending(), 42);

    let FlushOutcome::Processed(result) = updater.flush().unwrap() else {
        panic!("batched policy processes inline");
    };
    assert_eq!(result.batches, 8);
    assert_eq!(result.added, 42);
    assert_eq!(harness.containers().len(), 42);
    assert_eq!(harness.containers().commit_count(), 1);
}

/// Without a soft cap the remainder gets its own batch.
#[test]
fn test_batched_flush_without_soft_cap() {
    let harness = TestHarness::new();
    let mutation = seed(&harness, 42);

    let mut updater = SearchUpdater::new(harness.ctx.clone(), settings(ProcessorPolicy::Batched, 5, 0));
    updater.on_mutation(&mutation);
    let FlushOutcome::Processed(result) = updater.flush().unwrap() else {
        panic!("batched policy processes inline");
    };
    assert_eq!(result.batches, 9);
    assert_eq!(harness.containers().len(), 42);
}

/// Each call processes one batch; finished processors ignore further
/// calls.
#[test]
fn test_process_next_walks_batches_once() {
    let harness = TestHarness::new();
    seed(&harness, 6);

    let mut processor = BatchedProcessor::new(harness.ctx.clone(), 3, 0);
    processor.add_dirty(dirty_containers(6));
    assert_eq!(processor.segment_batches().len(), 2);

    assert!(processor.process_next().unwrap());
    assert_eq!(processor.progress().steps_done, 1);

    assert!(processor.process_next().unwrap());
    assert!(!processor.process_next().unwrap());
    assert!(!processor.process_next().unwrap());
    assert!(processor.is_complete());
    assert_eq!(processor.result().added, 6);
    assert_eq!(harness.containers().working_ids().len(), 6);
}

/// Ids missing from the store become deletes inside the same batch.
#[test]
fn test_missing_entities_become_deletes() {
    let harness = TestHarness::new();
    seed(&harness, 3);

    let mut processor = BatchedProcessor::new(harness.ctx.clone(), 0, 0);
    processor.add_dirty(dirty_containers(5));
    let result = processor.trigger_processing().unwrap();

    assert_eq!(result.batches, 1);
    assert_eq!(result.added, 3);
    assert_eq!(result.deleted, 2);
}

/// The discard policy drops everything and touches no engine.
#[test]
fn test_discard_policy() {
    let harness = TestHarness::new();
    let mutation = seed(&harness, 4);

    let mut updater = harness.updater(ProcessorPolicy::Discard);
    updater.on_mutation(&mutation);
    assert_eq!(updater.flush().unwrap(), FlushOutcome::Discarded(4));
    assert_eq!(updater.pending(), 0);
    assert!(harness.containers().operations().is_empty());
    assert_eq!(harness.containers().commit_count(), 0);
}

/// Immediate flushes above the inline threshold go through the queue.
#[test]
fn test_immediate_above_threshold_is_queued() {
    let harness = TestHarness::new();
    let mutation = seed(&harness, 12);

    let mut updater = SearchUpdater::new(
        harness.ctx.clone(),
        ProcessorSettings {
            inline_threshold: 10,
            ..settings(ProcessorPolicy::Immediate, 5, 0)
        },
    )
    .with_queue(harness.queue.clone());
    updater.on_mutation(&mutation);

    assert_eq!(updater.flush().unwrap(), FlushOutcome::Queued { batches: 3 });
    assert!(harness.containers().is_empty());
    assert_eq!(harness.queue.len(), 1);
}

/// The background worker drains queued batches and the commit job.
#[tokio::test]
async fn test_worker_processes_queued_batches() {
    let harness = TestHarness::new();
    let mutation = seed(&harness, 19);

    let mut updater = SearchUpdater::new(harness.ctx.clone(), settings(ProcessorPolicy::Queued, 6, 1))
        .with_queue(harness.queue.clone());
    updater.on_mutation(&mutation);
    assert_eq!(updater.flush().unwrap(), FlushOutcome::Queued { batches: 3 });

    let engine = Arc::clone(harness.containers());
    let mut worker = QueueWorker::new(harness.queue.clone(), Duration::from_millis(5));
    worker.start().unwrap();

    for _ in 0..400 {
        if engine.len() == 19 && harness.queue.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    worker.shutdown().await.unwrap();

    assert_eq!(engine.len(), 19);
    assert_eq!(engine.commit_count(), 1);
    assert!(harness.queue.failed_jobs().is_empty());
}
