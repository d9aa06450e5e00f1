//! Background worker that runs queue passes on a tokio runtime.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::SchedulerError;
use crate::queue::InMemoryJobQueue;

/// Runs [`InMemoryJobQueue::run_pass`] every `poll_interval` until shut down.
///
/// Passes run on the blocking pool because jobs talk to the entity store
/// and search engine synchronously.
pub struct QueueWorker {
    queue: Arc<InMemoryJobQueue>,
    poll_interval: Duration,
    shutdown_token: CancellationToken,
    is_running: AtomicBool,
    handle: Option<JoinHandle<()>>,
}

impl QueueWorker {
    pub fn new(queue: Arc<InMemoryJobQueue>, poll_interval: Duration) -> Self {
        Self {
            queue,
            poll_interval,
            shutdown_token: CancellationToken::new(),
            is_running: AtomicBool::new(false),
            handle: None,
        }
    }

    /// Start polling.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::AlreadyRunning` if the worker is already started.
    pub fn start(&mut self) -> Result<(), SchedulerError> {
        if self.is_running.swap(true, Ordering::SeqCst) {
            return Err(SchedulerError::AlreadyRunning);
        }

        let queue = self.queue.clone();
        let token = self.shutdown_token.clone();
        let poll_interval = self.poll_interval;

        self.handle = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(poll_interval) => {
                        let queue = queue.clone();
                        if let Err(e) = tokio::task::spawn_blocking(move || queue.run_pass(Utc::now())).await {
                            warn!(error = %e, "Queue pass panicked");
                        }
                    }
                }
            }
        }));

        info!(poll_ms = poll_interval.as_millis() as u64, "Queue worker started");
        Ok(())
    }

    /// Stop polling and wait for the current pass to finish.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::NotRunning` if the worker is not started.
    pub async fn shutdown(&mut self) -> Result<(), SchedulerError> {
        if !self.is_running.load(Ordering::SeqCst) {
            return Err(SchedulerError::NotRunning);
        }

        info!("Initiating queue worker shutdown");
        self.shutdown_token.cancel();

        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!("Error during queue worker shutdown: {}", e);
            }
        }

        self.is_running.store(false, Ordering::SeqCst);
        info!("Queue worker shutdown complete");
        Ok(())
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{Job, JobContext, StepOutcome};
    use crate::queue::JobQueue;
    use std::sync::atomic::AtomicU64;

    struct Tick(Arc<AtomicU64>);

    impl Job for Tick {
        fn kind(&self) -> &str {
            "tick"
        }
        fn signature(&self) -> String {
            "tick".into()
        }
        fn process(&mut self, _ctx: &JobContext) -> Result<StepOutcome, SchedulerError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(StepOutcome::Complete)
        }
    }

    #[tokio::test]
    async fn test_worker_runs_queued_jobs() {
        let queue = Arc::new(InMemoryJobQueue::new());
        let ticks = Arc::new(AtomicU64::new(0));
        queue.enqueue(Box::new(Tick(ticks.clone())), None).unwrap();

        let mut worker = QueueWorker::new(queue.clone(), Duration::from_millis(5));
        worker.start().unwrap();

        for _ in 0..200 {
            if ticks.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        worker.shutdown().await.unwrap();

        assert_eq!(ticks.load(Ordering::SeqCst), 1);
        assert!(queue.is_empty());
        assert!(!worker.is_running());
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let queue = Arc::new(InMemoryJobQueue::new());
        let mut worker = QueueWorker::new(queue, Duration::from_millis(50));
        worker.start().unwrap();
        assert!(matches!(worker.start(), Err(SchedulerError::AlreadyRunning)));
        worker.shutdown().await.unwrap();
        assert!(matches!(worker.shutdown().await, Err(SchedulerError::NotRunning)));
    }
}
