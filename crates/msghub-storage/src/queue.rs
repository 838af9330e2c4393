// SPDX-License-Identifier: MIT OR Apache-2.0
//! Serial async operation queue.
//!
//! Submitted operations run strictly in submission order on a single
//! worker task. A failing operation does not stop the chain: its future
//! settles with the failure, and the next operation still runs. There is
//! no cancellation.

use crate::backend::StorageError;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

type Job = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// A strictly-ordered async executor shared by the document storage and
/// the archive so file I/O never overlaps.
///
/// Cloning yields a handle onto the same queue.
#[derive(Clone)]
pub struct OpQueue {
    tx: mpsc::UnboundedSender<Job>,
    pending: Arc<AtomicUsize>,
}

impl std::fmt::Debug for OpQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpQueue")
            .field("pending", &self.pending.load(Ordering::Relaxed))
            .finish()
    }
}

impl OpQueue {
    /// Create a queue and spawn its worker task.
    ///
    /// The worker exits when every handle is dropped and the backlog has
    /// drained.
    #[must_use]
    pub fn new() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        let pending = Arc::new(AtomicUsize::new(0));
        let worker_pending = Arc::clone(&pending);
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                job().await;
                worker_pending.fetch_sub(1, Ordering::Relaxed);
            }
            debug!("op queue worker drained and stopped");
        });
        Self { tx, pending }
    }

    /// Submit an operation; the returned future settles when it has run.
    ///
    /// Operations run in submission order regardless of individual
    /// success or failure.
    pub fn submit<F, Fut, T>(
        &self,
        op: F,
    ) -> impl Future<Output = Result<T, StorageError>> + Send + 'static
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (done_tx, done_rx) = oneshot::channel::<T>();
        let job: Job = Box::new(move || {
            Box::pin(async move {
                let out = op().await;
                // The submitter may have dropped its future; that is fine.
                let _ = done_tx.send(out);
            })
        });
        let sent = self.tx.send(job).is_ok();
        if sent {
            self.pending.fetch_add(1, Ordering::Relaxed);
        }
        async move {
            if !sent {
                return Err(StorageError::QueueClosed);
            }
            done_rx.await.map_err(|_| StorageError::QueueClosed)
        }
    }

    /// Resolve once everything submitted so far has run.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::QueueClosed`] when the worker has shut down.
    pub async fn quiesce(&self) -> Result<(), StorageError> {
        self.submit(|| async {}).await
    }

    /// Number of operations submitted but not yet completed.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Relaxed)
    }
}

impl Default for OpQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    #[tokio::test]
    async fn ops_run_in_submission_order() {
        let queue = OpQueue::new();
        let seen: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(Vec::new()));

        let mut futures = Vec::new();
        for i in 0..5u32 {
            let seen = Arc::clone(&seen);
            futures.push(queue.submit(move || async move {
                // Later ops sleep less; order must still hold.
                tokio::time::sleep(Duration::from_millis(u64::from(5 - i))).await;
                seen.lock().unwrap().push(i);
            }));
        }
        for f in futures {
            f.await.unwrap();
        }
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn failing_op_does_not_stop_the_chain() {
        let queue = OpQueue::new();
        let first = queue.submit(|| async { Err::<(), &str>("boom") });
        let second = queue.submit(|| async { 42u32 });
        assert_eq!(first.await.unwrap(), Err("boom"));
        assert_eq!(second.await.unwrap(), 42);
    }

    #[tokio::test]
    async fn quiesce_waits_for_backlog() {
        let queue = OpQueue::new();
        let seen: Arc<Mutex<Vec<&str>>> = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        let work = queue.submit(move || async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            s.lock().unwrap().push("work");
        });
        queue.quiesce().await.unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["work"]);
        work.await.unwrap();
        assert_eq!(queue.pending(), 0);
    }
}
