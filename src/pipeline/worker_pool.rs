//! Bounded worker pool executing pipeline stages

use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Semaphore};
use tracing::{debug, info, warn};

use crate::config::WorkerPoolConfig;
use crate::error::{AppError, Result};

type Job = BoxFuture<'static, ()>;

/// Decrements the pending counter when a job finishes, is dropped or panics.
struct PendingGuard {
    pending: Arc<AtomicU64>,
    processed: Arc<AtomicU64>,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.pending.fetch_sub(1, Ordering::SeqCst);
        self.processed.fetch_add(1, Ordering::Relaxed);
    }
}

/// Runs at most `max_concurrent` stage jobs at a time. Jobs beyond that wait
/// in an unbounded channel; [`WorkerPool::has_capacity`] is the admission
/// check for new work.
pub struct WorkerPool {
    job_tx: mpsc::UnboundedSender<Job>,
    config: WorkerPoolConfig,
    pending_count: Arc<AtomicU64>,
    processed_count: Arc<AtomicU64>,
    accepting: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
}

impl WorkerPool {
    /// Create the pool and start its dispatcher. Must be called inside a tokio runtime.
    pub fn new(config: WorkerPoolConfig) -> Self {
        let (job_tx, job_rx) = mpsc::unbounded_channel();
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        let (shutdown_tx, _) = watch::channel(false);

        tokio::spawn(Self::dispatch(job_rx, semaphore));

        Self {
            job_tx,
            config,
            pending_count: Arc::new(AtomicU64::new(0)),
            processed_count: Arc::new(AtomicU64::new(0)),
            accepting: AtomicBool::new(true),
            shutdown_tx,
        }
    }

    async fn dispatch(mut job_rx: mpsc::UnboundedReceiver<Job>, semaphore: Arc<Semaphore>) {
        while let Some(job) = job_rx.recv().await {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            tokio::spawn(async move {
                let _permit = permit;
                job.await;
            });
        }
        debug!("Worker pool dispatcher stopped");
    }

    /// Queue a job. Rejected once shutdown has begun.
    pub fn spawn<F>(&self, job: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if !self.is_accepting() {
            return Err(AppError::ShuttingDown);
        }

        self.pending_count.fetch_add(1, Ordering::SeqCst);
        let guard = PendingGuard {
            pending: self.pending_count.clone(),
            processed: self.processed_count.clone(),
        };
        let wrapped = async move {
            let _guard = guard;
            job.await;
        }
        .boxed();

        // A failed send drops the job and with it the guard
        self.job_tx
            .send(wrapped)
            .map_err(|_| AppError::ShuttingDown)?;
        Ok(())
    }

    /// Whether new work may be admitted without exceeding the queue bound.
    pub fn has_capacity(&self) -> bool {
        let limit = (self.config.max_concurrent + self.config.max_queue_size) as u64;
        self.is_accepting() && self.pending_count() < limit
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// Receiver flipped to `true` when shutdown begins.
    pub fn subscribe_shutdown(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Stop admitting work, interrupt poll loops, and wait up to `grace` for
    /// in-flight jobs. Returns whether the pool drained in time.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.accepting.store(false, Ordering::SeqCst);
        self.shutdown_tx.send_replace(true);
        info!(pending = self.pending_count(), "Worker pool shutting down");

        let drained = tokio::time::timeout(grace, async {
            while self.pending_count() > 0 {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .is_ok();

        if !drained {
            warn!(pending = self.pending_count(), "Worker pool did not drain within grace period");
        }
        drained
    }

    /// Jobs queued or running
    pub fn pending_count(&self) -> u64 {
        self.pending_count.load(Ordering::SeqCst)
    }

    pub fn processed_count(&self) -> u64 {
        self.processed_count.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            pending: self.pending_count(),
            processed: self.processed_count(),
            max_queue_size: self.config.max_queue_size,
            max_concurrent: self.config.max_concurrent,
        }
    }
}

/// Pool statistics
#[derive(Debug, Clone)]
pub struct PoolStats {
    pub pending: u64,
    pub processed: u64,
    pub max_queue_size: usize,
    pub max_concurrent: usize,
}
