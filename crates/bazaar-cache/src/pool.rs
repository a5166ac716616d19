//! Bounded pool for background cache rebuilds.
//!
//! A fixed set of worker tasks share one bounded queue. Submission never
//! waits: when the queue is full the caller learns it immediately and skips
//! the rebuild, so request tasks are never held up by rebuild work.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;

use futures_util::FutureExt;
use tokio::sync::{Mutex, mpsc};

type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

#[derive(Debug)]
pub struct RebuildPool {
    sender: mpsc::Sender<Job>,
    workers: usize,
}

impl RebuildPool {
    /// Spawns `workers` tasks on the current runtime.
    pub fn new(workers: usize, capacity: usize) -> Self {
        let workers = workers.max(1);
        let (sender, receiver) = mpsc::channel::<Job>(capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));

        for worker in 0..workers {
            let receiver = receiver.clone();
            tokio::spawn(async move {
                loop {
                    let job = receiver.lock().await.recv().await;
                    let Some(job) = job else { break };
                    if AssertUnwindSafe(job).catch_unwind().await.is_err() {
                        tracing::error!(worker, "cache rebuild panicked");
                    }
                }
                tracing::debug!(worker, "rebuild worker stopped");
            });
        }

        Self { sender, workers }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Reserves a queue slot, or `None` if the queue is full or closed.
    pub fn try_reserve(&self) -> Option<RebuildSlot<'_>> {
        self.sender.try_reserve().ok().map(RebuildSlot)
    }
}

/// A reserved place in the rebuild queue.
pub struct RebuildSlot<'a>(mpsc::Permit<'a, Job>);

impl RebuildSlot<'_> {
    pub fn submit<F>(self, job: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.0.send(Box::pin(job));
    }
}
