//! Bounded worker pool for hooks and sync jobs.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;

pub const DEFAULT_WORKERS: usize = 8;

/// At most `workers` jobs run at once; the rest queue on the semaphore.
#[derive(Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
    closed: Arc<AtomicBool>,
}

impl WorkerPool {
    pub fn new(workers: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(workers.max(1))),
            tracker: TaskTracker::new(),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Queue a job. Returns false once the pool is draining.
    pub fn spawn<F>(&self, job: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.closed.load(Ordering::SeqCst) {
            tracing::debug!("Worker pool draining, job dropped");
            return false;
        }
        let permits = self.permits.clone();
        self.tracker.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            job.await;
        });
        true
    }

    /// Jobs queued or running.
    pub fn pending(&self) -> usize {
        self.tracker.len()
    }

    /// Wait until every job queued so far has finished.
    pub async fn settle(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        if !self.closed.load(Ordering::SeqCst) {
            self.tracker.reopen();
        }
    }

    /// Refuse new jobs and wait for the queued ones.
    pub async fn drain(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.tracker.close();
        self.tracker.wait().await;
        tracing::debug!("Worker pool drained");
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(DEFAULT_WORKERS)
    }
}
