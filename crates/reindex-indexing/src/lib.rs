//! Change propagation and reindex scheduling.
//!
//! This crate decides, for every entity write, which index documents in
//! which variant states must be regenerated or removed, and rebuilds
//! whole indexes from the entity store in striped, rerunnable groups.
//!
//! ## Key Components
//!
//! - [`ChangeCapture`]: folds raw per-table deltas into write descriptors
//! - [`DirtyResolver`]: direct and backward-derived dirty tuples per write
//! - [`segment_batches`]: size-bounded batches with a soft cap
//! - [`Processor`]: immediate, batched, queued and discard processing
//! - [`SearchUpdater`]: request-scoped facade with the mutation hook, the
//!   deletion hook and `trigger_reindex`
//! - [`ReindexOrchestrator`]: full reindex planning and group execution,
//!   run inline or through the job queue by a [`ReindexHandler`]
//!
//! ## Flow
//!
//! 1. The persistence layer reports a [`reindex_types::Mutation`]
//! 2. Capture folds it into writes; the resolver turns each write into
//!    dirty tuples accumulated by the updater
//! 3. At flush, a processor adds found entities and deletes missing ones,
//!    marking indexes dirty
//! 4. The commit coordinator commits each dirty index once
//!
//! ## Example
//!
//! ```ignore
//! let ctx = IndexingContext::new(variants, Arc::new(indexes), store, commits);
//! let mut updater = SearchUpdater::new(ctx.clone(), settings.processor.clone());
//!
//! updater.on_mutation(&mutation);
//! updater.flush()?;
//!
//! let orchestrator = ReindexOrchestrator::new(ctx, 500);
//! orchestrator.run_full(&["Main".to_string()], None, &NoOpProgressCallback)?;
//! ```

pub mod batch;
pub mod capture;
pub mod context;
pub mod error;
pub mod orchestrator;
pub mod processor;
pub mod progress;
pub mod resolver;
pub mod updater;

#[cfg(test)]
mod test_support;

pub use batch::{segment_batches, Batch, BatchPart};
pub use capture::ChangeCapture;
pub use context::{IndexRegistry, IndexingContext, RegisteredIndex};
pub use error::IndexingError;
pub use orchestrator::{
    GroupTask, ImmediateReindexHandler, QueuedReindexHandler, ReindexGroupJob, ReindexHandler,
    ReindexOrchestrator, ReindexPlan, REINDEX_GROUP_JOB_KIND,
};
pub use processor::{
    process_batch, process_part, BatchProcessJob, BatchedProcessor, DiscardProcessor,
    ImmediateProcessor, Processor, QueuedProcessor, BATCH_JOB_KIND,
};
pub use progress::{
    LoggingProgressCallback, NoOpProgressCallback, ProcessResult, ProgressCallback,
    ReindexProgress,
};
pub use resolver::{DirtyResolver, DEFAULT_PAGE_SIZE};
pub use updater::{FlushOutcome, SearchUpdater};
