//! Bounded background worker pool for chunk uploads.
//!
//! Jobs go through one `mpsc` queue drained by a fixed number of worker
//! tasks, so however many uploads a filer has open, at most `workers` chunks
//! are in flight at once.  Each job reports through its own `oneshot`
//! channel.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::errors::{FilerError, Result};

type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Shared upload worker pool.
pub struct UploadPool {
    /// `None` once the pool has been shut down.
    queue: Mutex<Option<mpsc::UnboundedSender<Job>>>,
    workers: usize,
}

impl UploadPool {
    /// Start `workers` worker tasks (at least one) on the current tokio runtime.
    pub fn new(workers: usize) -> Self {
        let workers = workers.max(1);
        let (tx, rx) = mpsc::unbounded_channel::<Job>();
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        for id in 0..workers {
            tokio::spawn(run_worker(id, Arc::clone(&rx)));
        }

        debug!("upload pool started with {} workers", workers);

        Self {
            queue: Mutex::new(Some(tx)),
            workers,
        }
    }

    /// Number of worker tasks.
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Queue `task` and return the receiving end of its result.
    ///
    /// Fails once the pool has been shut down.
    pub fn submit<F, T>(&self, task: F) -> Result<oneshot::Receiver<T>>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (result_tx, result_rx) = oneshot::channel();
        let job: Job = Box::pin(async move {
            // The receiver may have been dropped; the result is then unwanted.
            let _ = result_tx.send(task.await);
        });

        let queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
        let sender = queue.as_ref().ok_or_else(pool_closed)?;
        sender.send(job).map_err(|_| pool_closed())?;
        Ok(result_rx)
    }

    /// Stop accepting jobs.  Queued jobs still run; workers exit once the
    /// queue is drained.  Idempotent.
    pub fn shutdown(&self) {
        let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
        if queue.take().is_some() {
            debug!("upload pool shut down");
        }
    }

    /// Whether [`UploadPool::shutdown`] has been called.
    pub fn is_shut_down(&self) -> bool {
        self.queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_none()
    }
}

fn pool_closed() -> FilerError {
    FilerError::Backend(anyhow::anyhow!("upload pool is shut down"))
}

async fn run_worker(id: usize, queue: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Job>>>) {
    loop {
        let job = { queue.lock().await.recv().await };
        let Some(job) = job else {
            break;
        };
        // A panicking job drops its result sender; the worker carries on.
        if let Err(e) = tokio::spawn(job).await {
            warn!("upload worker {} job failed: {}", id, e);
        }
    }
    debug!("upload worker {} stopped", id);
}
