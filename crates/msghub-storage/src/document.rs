// SPDX-License-Identifier: MIT OR Apache-2.0
//! Coalescing whole-document JSON persistence.
//!
//! One [`DocumentStorage`] owns one JSON file (the message list, the stats
//! rollup). Writes inside the configured interval coalesce: only the most
//! recent value is retained, a single timer schedules the flush, and every
//! caller of [`write_json`](DocumentStorage::write_json) in that window
//! shares the flush result. Replacement is atomic (tmp + rename) when the
//! backend supports it and degrades to a direct overwrite otherwise; the
//! mode actually used is visible in [`DocStatus`].

use crate::backend::{StorageBackend, StorageError};
use crate::queue::OpQueue;
use futures::future::BoxFuture;
use msghub_core::clock::Clock;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How the last persisted write reached the disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PersistMode {
    /// Direct overwrite (backend has no rename).
    Override,
    /// Atomic tmp-file + rename.
    Rename,
    /// Rename failed mid-way; fell back to a direct overwrite.
    Fallback,
}

/// Live status of a [`DocumentStorage`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocStatus {
    /// Relative path of the document file.
    pub file_path: String,
    /// Epoch ms of the last successful persist.
    pub last_persisted_at: Option<i64>,
    /// Size in bytes of the last successful persist.
    pub last_persisted_bytes: usize,
    /// Mode of the last successful persist.
    pub last_persisted_mode: Option<PersistMode>,
    /// Whether a coalesced write is waiting to flush.
    pub pending: bool,
}

/// Configuration for a [`DocumentStorage`].
#[derive(Debug, Clone)]
pub struct DocumentStorageConfig {
    /// File name under the backend root.
    pub file_name: String,
    /// Coalescing window in ms; `0` enqueues every write immediately.
    pub write_interval_ms: u64,
}

impl DocumentStorageConfig {
    /// Config for the given file with the given coalescing window.
    #[must_use]
    pub fn new(file_name: impl Into<String>, write_interval_ms: u64) -> Self {
        Self {
            file_name: file_name.into(),
            write_interval_ms,
        }
    }
}

#[derive(Default)]
struct PendingState {
    value: Option<Value>,
    waiters: Vec<oneshot::Sender<Result<(), StorageError>>>,
    timer: Option<JoinHandle<()>>,
    epoch: u64,
}

#[derive(Default)]
struct StatusState {
    last_persisted_at: Option<i64>,
    last_persisted_bytes: usize,
    last_persisted_mode: Option<PersistMode>,
}

struct Inner {
    backend: Arc<dyn StorageBackend>,
    queue: OpQueue,
    clock: Arc<dyn Clock>,
    config: DocumentStorageConfig,
    pending: Mutex<PendingState>,
    status: Mutex<StatusState>,
}

/// Single whole-document persistence with write coalescing.
#[derive(Clone)]
pub struct DocumentStorage {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for DocumentStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentStorage")
            .field("file", &self.inner.config.file_name)
            .finish_non_exhaustive()
    }
}

impl DocumentStorage {
    /// Create a document storage over `backend`, serialized through `queue`.
    #[must_use]
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        queue: OpQueue,
        clock: Arc<dyn Clock>,
        config: DocumentStorageConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                backend,
                queue,
                clock,
                config,
                pending: Mutex::new(PendingState::default()),
                status: Mutex::new(StatusState::default()),
            }),
        }
    }

    /// Ensure the backing location exists and log where it is.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] when the root cannot be created.
    pub async fn init(&self) -> Result<(), StorageError> {
        self.inner.backend.ensure_dir("").await?;
        info!(
            file = %self.inner.config.file_name,
            root = %self.inner.backend.describe(),
            "document storage ready"
        );
        Ok(())
    }

    /// Read and decode the document, or return `fallback` when the file is
    /// missing, empty, or unparseable.
    pub async fn read_json<T: DeserializeOwned>(&self, fallback: T) -> T {
        let path = &self.inner.config.file_name;
        match self.inner.backend.read(path).await {
            Ok(Some(bytes)) if !bytes.is_empty() => match serde_json::from_slice(&bytes) {
                Ok(value) => value,
                Err(err) => {
                    warn!(file = %path, error = %err, "document unparseable, using fallback");
                    fallback
                }
            },
            Ok(_) => fallback,
            Err(err) => {
                warn!(file = %path, error = %err, "document unreadable, using fallback");
                fallback
            }
        }
    }

    /// Schedule a write of `value`.
    ///
    /// The write is registered before this returns, so callers may drop
    /// the future for fire-and-forget semantics. With a zero interval the
    /// write is enqueued immediately; otherwise it coalesces with other
    /// writes in the window and the returned future resolves when the
    /// shared flush completes (last value wins).
    pub fn write_json<T: Serialize>(&self, value: &T) -> BoxFuture<'static, Result<(), StorageError>> {
        let value = match serde_json::to_value(value) {
            Ok(value) => value,
            Err(err) => {
                let err = StorageError::Encode {
                    message: err.to_string(),
                };
                return Box::pin(async move { Err(err) });
            }
        };
        let inner = Arc::clone(&self.inner);

        if inner.config.write_interval_ms == 0 {
            let write_inner = Arc::clone(&inner);
            let fut = inner
                .queue
                .submit(move || Inner::perform_write(write_inner, value));
            return Box::pin(async move {
                match fut.await {
                    Ok(result) => result,
                    Err(err) => Err(err),
                }
            });
        }

        let rx = {
            let mut pending = inner.pending.lock().expect("document pending lock");
            pending.value = Some(value);
            let (tx, rx) = oneshot::channel();
            pending.waiters.push(tx);
            if pending.timer.is_none() {
                let epoch = pending.epoch;
                let timer_inner = Arc::clone(&inner);
                let interval = Duration::from_millis(inner.config.write_interval_ms);
                pending.timer = Some(tokio::spawn(async move {
                    tokio::time::sleep(interval).await;
                    Inner::flush_epoch(timer_inner, epoch).await;
                }));
            }
            rx
        };
        Box::pin(async move {
            match rx.await {
                Ok(result) => result,
                Err(_) => Err(StorageError::QueueClosed),
            }
        })
    }

    /// Cancel the flush timer and write the latest pending value now.
    ///
    /// When nothing is pending this resolves with the queue tail, so it
    /// doubles as a quiesce point on shutdown.
    ///
    /// # Errors
    ///
    /// Returns the flush's [`StorageError`] when the write fails.
    pub async fn flush_pending(&self) -> Result<(), StorageError> {
        let (value, waiters) = {
            let mut pending = self.inner.pending.lock().expect("document pending lock");
            if let Some(timer) = pending.timer.take() {
                timer.abort();
            }
            pending.epoch += 1;
            (pending.value.take(), std::mem::take(&mut pending.waiters))
        };
        match value {
            Some(value) => Inner::write_and_notify(Arc::clone(&self.inner), value, waiters).await,
            None => self.inner.queue.quiesce().await,
        }
    }

    /// Current status snapshot.
    #[must_use]
    pub fn status(&self) -> DocStatus {
        let status = self.inner.status.lock().expect("document status lock");
        let pending = self
            .inner
            .pending
            .lock()
            .expect("document pending lock")
            .value
            .is_some();
        DocStatus {
            file_path: self.inner.config.file_name.clone(),
            last_persisted_at: status.last_persisted_at,
            last_persisted_bytes: status.last_persisted_bytes,
            last_persisted_mode: status.last_persisted_mode,
            pending,
        }
    }
}

impl Inner {
    async fn flush_epoch(inner: Arc<Inner>, epoch: u64) {
        let (value, waiters) = {
            let mut pending = inner.pending.lock().expect("document pending lock");
            if pending.epoch != epoch {
                // A flush_pending() beat the timer to it.
                return;
            }
            pending.epoch += 1;
            pending.timer = None;
            (pending.value.take(), std::mem::take(&mut pending.waiters))
        };
        if let Some(value) = value {
            let _ = Self::write_and_notify(inner, value, waiters).await;
        }
    }

    async fn write_and_notify(
        inner: Arc<Inner>,
        value: Value,
        waiters: Vec<oneshot::Sender<Result<(), StorageError>>>,
    ) -> Result<(), StorageError> {
        let write_inner = Arc::clone(&inner);
        let result = match inner
            .queue
            .submit(move || Self::perform_write(write_inner, value))
            .await
        {
            Ok(result) => result,
            Err(err) => Err(err),
        };
        for waiter in waiters {
            let _ = waiter.send(result.clone());
        }
        result
    }

    async fn perform_write(inner: Arc<Inner>, value: Value) -> Result<(), StorageError> {
        let path = inner.config.file_name.clone();
        let bytes = match serde_json::to_vec(&value) {
            Ok(bytes) => bytes,
            Err(err) => {
                return Err(StorageError::Encode {
                    message: err.to_string(),
                });
            }
        };

        let mode = if inner.backend.supports_rename() {
            let tmp = format!("{path}.tmp");
            match Self::atomic_replace(&*inner.backend, &tmp, &path, &bytes).await {
                Ok(()) => PersistMode::Rename,
                Err(err) => {
                    warn!(file = %path, error = %err, "atomic replace failed, overwriting");
                    let _ = inner.backend.delete(&tmp).await;
                    inner.backend.write(&path, &bytes).await?;
                    PersistMode::Fallback
                }
            }
        } else {
            inner.backend.write(&path, &bytes).await?;
            PersistMode::Override
        };

        let mut status = inner.status.lock().expect("document status lock");
        status.last_persisted_at = Some(inner.clock.now_ms());
        status.last_persisted_bytes = bytes.len();
        status.last_persisted_mode = Some(mode);
        debug!(file = %path, bytes = bytes.len(), mode = ?mode, "document persisted");
        Ok(())
    }

    async fn atomic_replace(
        backend: &dyn StorageBackend,
        tmp: &str,
        path: &str,
        bytes: &[u8],
    ) -> Result<(), StorageError> {
        backend.write(tmp, bytes).await?;
        // Some rename implementations refuse to clobber; clearing the
        // target first keeps them on the atomic path.
        let _ = backend.delete(path).await;
        backend.rename(tmp, path).await
    }
}
