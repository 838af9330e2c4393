// SPDX-License-Identifier: MIT OR Apache-2.0

use async_trait::async_trait;
use msghub_core::FixedClock;
use msghub_storage::{
    DocStatus, DocumentStorage, DocumentStorageConfig, FsBackend, MemoryBackend, OpQueue,
    PersistMode, StorageBackend, StorageError,
};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Wraps a backend and counts physical writes.
#[derive(Debug)]
struct CountingBackend {
    inner: MemoryBackend,
    writes: AtomicUsize,
}

impl CountingBackend {
    fn new() -> Self {
        Self {
            inner: MemoryBackend::new(),
            writes: AtomicUsize::new(0),
        }
    }

    fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StorageBackend for CountingBackend {
    async fn read(&self, path: &str) -> Result<Option<Vec<u8>>, StorageError> {
        self.inner.read(path).await
    }

    async fn write(&self, path: &str, bytes: &[u8]) -> Result<(), StorageError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.write(path, bytes).await
    }

    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        self.inner.delete(path).await
    }

    async fn list(&self, dir: &str) -> Result<Vec<String>, StorageError> {
        self.inner.list(dir).await
    }

    async fn ensure_dir(&self, dir: &str) -> Result<(), StorageError> {
        self.inner.ensure_dir(dir).await
    }

    fn describe(&self) -> String {
        "counting-memory".to_string()
    }
}

fn storage_over(
    backend: Arc<dyn StorageBackend>,
    interval_ms: u64,
) -> (DocumentStorage, Arc<FixedClock>) {
    let clock = Arc::new(FixedClock::at_ms(1_700_000_000_000));
    let storage = DocumentStorage::new(
        backend,
        OpQueue::new(),
        clock.clone(),
        DocumentStorageConfig::new("messages.json", interval_ms),
    );
    (storage, clock)
}

#[tokio::test(start_paused = true)]
async fn writes_within_window_coalesce_to_one_flush() {
    let backend = Arc::new(CountingBackend::new());
    let (storage, _clock) = storage_over(backend.clone(), 1_000);

    let first = storage.write_json(&json!({"a": 1}));
    let second = storage.write_json(&json!({"a": 2}));
    let third = storage.write_json(&json!({"a": 3}));
    storage.flush_pending().await.unwrap();

    first.await.unwrap();
    second.await.unwrap();
    third.await.unwrap();

    assert_eq!(backend.write_count(), 1);
    let bytes = backend.read("messages.json").await.unwrap().unwrap();
    let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(value, json!({"a": 3}));
}

#[tokio::test(start_paused = true)]
async fn timer_flushes_without_explicit_flush() {
    let backend = Arc::new(CountingBackend::new());
    let (storage, _clock) = storage_over(backend.clone(), 250);

    let write = storage.write_json(&json!({"x": true}));
    tokio::time::sleep(Duration::from_millis(300)).await;
    write.await.unwrap();

    assert_eq!(backend.write_count(), 1);
    assert!(!storage.status().pending);
}

#[tokio::test]
async fn zero_interval_writes_immediately() {
    let backend = Arc::new(CountingBackend::new());
    let (storage, _clock) = storage_over(backend.clone(), 0);

    storage.write_json(&json!({"n": 1})).await.unwrap();
    storage.write_json(&json!({"n": 2})).await.unwrap();

    assert_eq!(backend.write_count(), 2);
    let bytes = backend.read("messages.json").await.unwrap().unwrap();
    let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(value, json!({"n": 2}));
}

#[tokio::test]
async fn memory_backend_reports_override_mode() {
    let backend = Arc::new(MemoryBackend::new());
    let (storage, _clock) = storage_over(backend, 0);

    storage.write_json(&json!({"m": 1})).await.unwrap();
    let status: DocStatus = storage.status();
    assert_eq!(status.last_persisted_mode, Some(PersistMode::Override));
    assert_eq!(status.last_persisted_at, Some(1_700_000_000_000));
    assert!(status.last_persisted_bytes > 0);
}

#[tokio::test]
async fn fs_backend_uses_rename_and_leaves_no_tmp() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(FsBackend::new(dir.path()));
    let (storage, _clock) = storage_over(backend, 0);

    storage.init().await.unwrap();
    storage.write_json(&json!({"r": 1})).await.unwrap();

    assert_eq!(
        storage.status().last_persisted_mode,
        Some(PersistMode::Rename)
    );
    let persisted = std::fs::read_to_string(dir.path().join("messages.json")).unwrap();
    assert_eq!(persisted, r#"{"r":1}"#);
    assert!(!dir.path().join("messages.json.tmp").exists());
}

#[tokio::test]
async fn read_json_falls_back_on_missing_and_garbage() {
    let backend = Arc::new(MemoryBackend::new());
    let (storage, _clock) = storage_over(backend.clone(), 0);

    let fallback: Vec<String> = storage.read_json(vec!["fallback".to_string()]).await;
    assert_eq!(fallback, vec!["fallback".to_string()]);

    backend.write("messages.json", b"not json").await.unwrap();
    let fallback: Vec<String> = storage.read_json(Vec::new()).await;
    assert!(fallback.is_empty());
}

#[tokio::test]
async fn flush_pending_without_writes_is_a_noop() {
    let backend = Arc::new(CountingBackend::new());
    let (storage, _clock) = storage_over(backend.clone(), 1_000);
    storage.flush_pending().await.unwrap();
    assert_eq!(backend.write_count(), 0);
}
