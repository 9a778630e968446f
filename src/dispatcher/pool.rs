//! Fixed-size worker pool for offloaded operations.
//!
//! Jobs enter through a bounded channel shared by a fixed set of OS threads.
//! Each job reports back to the awaiting task through its own oneshot
//! channel, so completions arrive in whatever order the workers finish.

use crate::recovery::extract_panic_message;
use crate::types::{Error, Result};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Bounded pool of worker threads.
#[derive(Debug)]
pub struct WorkerPool {
    tx: mpsc::Sender<Job>,
    size: usize,
}

impl WorkerPool {
    /// Spawn `size` workers fed by a queue of `queue_capacity` jobs.
    pub fn new(size: usize, queue_capacity: usize) -> Result<Self> {
        if size == 0 {
            return Err(Error::configuration("worker pool size must be at least 1"));
        }
        let (tx, rx) = mpsc::channel::<Job>(queue_capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));

        for index in 0..size {
            let rx = rx.clone();
            std::thread::Builder::new()
                .name(format!("dispatch-worker-{}", index))
                .spawn(move || worker_loop(index, rx))?;
        }

        tracing::debug!("Worker pool started size={} queue={}", size, queue_capacity);
        Ok(Self { tx, size })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Run `work` on a worker thread and wait for its output.
    ///
    /// Waits for queue space when all workers are busy and the queue is full.
    pub async fn run<F, T>(&self, work: F) -> Result<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (done_tx, done_rx) = oneshot::channel();
        let job: Job = Box::new(move || {
            // Receiver gone means the caller stopped waiting
            let _ = done_tx.send(work());
        });

        self.tx
            .send(job)
            .await
            .map_err(|_| Error::internal("worker pool is shut down"))?;

        done_rx
            .await
            .map_err(|_| Error::internal("worker dropped job without completing it"))
    }
}

fn worker_loop(index: usize, rx: Arc<Mutex<mpsc::Receiver<Job>>>) {
    loop {
        // Lock is released as soon as a job (or shutdown) is received
        let job = rx.blocking_lock().blocking_recv();
        let Some(job) = job else {
            tracing::debug!("dispatch-worker-{} stopping", index);
            break;
        };
        if let Err(panic_payload) = catch_unwind(AssertUnwindSafe(job)) {
            tracing::error!(
                "dispatch-worker-{} job panicked: {}",
                index,
                extract_panic_message(panic_payload.as_ref())
            );
        }
    }
}
