//! Job queue, queue worker and commit coordination for search reindexing.
//!
//! # Key Components
//!
//! - [`Job`] / [`JobQueue`]: resumable, step-wise jobs and the queue that
//!   runs them
//! - [`InMemoryJobQueue`]: pass-based in-process queue with `not_before`
//!   scheduling and predicate cancellation
//! - [`QueueWorker`]: tokio task running queue passes until shut down
//! - [`CommitCoordinator`] / [`CommitJob`]: collapses many batch
//!   completions into one engine commit per index per pass
//! - [`CooldownPolicy`]: commit cooldown with jitter
//! - [`JobRegistry`]: per-kind run status
//!
//! # Example
//!
//! ```ignore
//! let queue = Arc::new(InMemoryJobQueue::new());
//! let commits = Arc::new(CommitCoordinator::new(CooldownPolicy::new(300)));
//! commits.register_engine("Main", engine);
//! commits.queue(queue.as_ref(), true, None)?;
//!
//! let mut worker = QueueWorker::new(queue, Duration::from_secs(1));
//! worker.start()?;
//! ```

pub mod commit;
pub mod cooldown;
pub mod error;
pub mod job;
pub mod queue;
pub mod registry;
pub mod worker;

pub use commit::{CommitCoordinator, CommitJob, CommitOutcome, CommitReport, COMMIT_JOB_KIND};
pub use cooldown::CooldownPolicy;
pub use error::SchedulerError;
pub use job::{Job, JobContext, JobId, JobInfo, JobMessages, JobProgress, StepOutcome};
pub use queue::{FailedJob, InMemoryJobQueue, JobQueue, PassReport};
pub use registry::{JobRegistry, JobResult, JobStatus};
pub use worker::QueueWorker;
