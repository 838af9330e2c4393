// SPDX-License-Identifier: MIT OR Apache-2.0
//! The archive engine: per-ref batching, weekly segments, retention.
//!
//! Appends enqueue into a per-ref pending slot and resolve once the slot
//! has flushed. Flushes trigger on the batch-size threshold, the flush
//! timer, a zero flush interval, or an explicit [`MsgArchive::flush_now`].
//! Within one ref, entries persist in submission order; at most one flush
//! per ref is in flight, and file I/O across refs is serialized through
//! the shared op queue. Failures default to log-and-resolve; the
//! `throw_on_error` switch surfaces them for tests.

use crate::diff::compute_diff;
use crate::path::{parse_segment_file_name, parse_week_key, segment_path, week_key};
use chrono::Duration;
use msghub_core::clock::Clock;
use msghub_core::model::Message;
use serde::Serialize;
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, OnceLock};
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use msghub_storage::{OpQueue, StorageBackend, StorageError};

/// Schema version written into every archive entry.
pub const ARCHIVE_SCHEMA_VERSION: u32 = 1;

/// Probe file used to test native writability at startup.
const PROBE_FILE: &str = ".msghub-probe";

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Kinds of archive entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveEventKind {
    /// Initial snapshot at creation.
    Create,
    /// A content patch with its structural diff.
    Patch,
    /// An action executed by an engagement plugin.
    Action,
    /// Removal, retaining the final snapshot.
    Delete,
    /// A housekeeping snapshot.
    Snapshot,
    /// Expiry transition, retaining the final snapshot.
    Expired,
}

impl ArchiveEventKind {
    /// The wire string of this event kind.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Patch => "patch",
            Self::Action => "action",
            Self::Delete => "delete",
            Self::Snapshot => "snapshot",
            Self::Expired => "expired",
        }
    }
}

impl fmt::Display for ArchiveEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which storage the archive ended up on after the startup probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageStrategy {
    /// Writing directly to the native filesystem.
    Native,
    /// Writing through the host-file namespace.
    HostFile,
}

/// Errors surfaced by archive operations (only with `throw_on_error`).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArchiveError {
    /// The underlying storage failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// How the archive selects its storage at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArchiveMode {
    /// Probe native storage and fall back to host-file mode on failure.
    #[default]
    Auto,
    /// Skip the probe and use host-file mode unconditionally.
    HostFile,
}

/// Configuration of the archive.
#[derive(Debug, Clone)]
pub struct ArchiveConfig {
    /// Batching window in ms; `0` flushes on every append.
    pub flush_interval_ms: u64,
    /// Flush as soon as a ref has this many pending events.
    pub max_batch_size: usize,
    /// Weekly segments to keep besides the current week.
    pub keep_previous_weeks: u32,
    /// Byte bound for a single path segment.
    pub max_path_segment_length: usize,
    /// Segment file extension.
    pub file_extension: String,
    /// Surface flush failures to append callers instead of logging.
    pub throw_on_error: bool,
    /// Storage selection mode.
    pub mode: ArchiveMode,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: 2_000,
            max_batch_size: 50,
            keep_previous_weeks: 2,
            max_path_segment_length: 120,
            file_extension: "jsonl".to_string(),
            throw_on_error: false,
            mode: ArchiveMode::Auto,
        }
    }
}

/// Live status of the archive.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveStatus {
    /// Refs with unflushed events.
    pub pending_refs: usize,
    /// Total unflushed events.
    pub pending_events: usize,
    /// Epoch ms of the last successful flush.
    pub last_flush_at: Option<i64>,
    /// Entries persisted since startup.
    pub events_written: u64,
    /// Storage the archive writes to.
    pub strategy: StorageStrategy,
    /// Probe failure message when the native probe did not pass.
    pub probe_error: Option<String>,
}

// ---------------------------------------------------------------------------
// Internals
// ---------------------------------------------------------------------------

struct PendingEvent {
    line: Value,
    week: String,
}

#[derive(Default)]
struct PendingRef {
    events: Vec<PendingEvent>,
    waiters: Vec<oneshot::Sender<Result<(), ArchiveError>>>,
    timer: Option<JoinHandle<()>>,
    flushing: bool,
}

struct Resolved {
    backend: Arc<dyn StorageBackend>,
    strategy: StorageStrategy,
    probe_error: Option<String>,
}

#[derive(Default)]
struct FlushStats {
    last_flush_at: Option<i64>,
    events_written: u64,
}

struct Inner {
    native: Option<Arc<dyn StorageBackend>>,
    host: Arc<dyn StorageBackend>,
    resolved: OnceLock<Resolved>,
    queue: OpQueue,
    clock: Arc<dyn Clock>,
    config: ArchiveConfig,
    pending: Mutex<BTreeMap<String, PendingRef>>,
    stats: Mutex<FlushStats>,
}

/// Per-ref append-only event log with weekly segmentation.
#[derive(Clone)]
pub struct MsgArchive {
    inner: Arc<Inner>,
}

impl fmt::Debug for MsgArchive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MsgArchive")
            .field("strategy", &self.inner.resolved.get().map(|r| r.strategy))
            .finish_non_exhaustive()
    }
}

impl MsgArchive {
    /// Create an archive that probes `native` at init and falls back to
    /// `host` when the probe fails or the config locks to host mode.
    #[must_use]
    pub fn new(
        native: Option<Arc<dyn StorageBackend>>,
        host: Arc<dyn StorageBackend>,
        queue: OpQueue,
        clock: Arc<dyn Clock>,
        config: ArchiveConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                native,
                host,
                resolved: OnceLock::new(),
                queue,
                clock,
                config,
                pending: Mutex::new(BTreeMap::new()),
                stats: Mutex::new(FlushStats::default()),
            }),
        }
    }

    /// Archive writing to a single backend, no probe. For embedders that
    /// know their storage is good (and for tests).
    #[must_use]
    pub fn with_backend(
        backend: Arc<dyn StorageBackend>,
        queue: OpQueue,
        clock: Arc<dyn Clock>,
        config: ArchiveConfig,
    ) -> Self {
        let archive = Self::new(None, backend, queue, clock, config);
        let _ = archive.inner.resolved.set(Resolved {
            backend: Arc::clone(&archive.inner.host),
            strategy: StorageStrategy::HostFile,
            probe_error: None,
        });
        archive
    }

    /// Probe storage and fix the effective strategy for the process
    /// lifetime.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] when the chosen backend cannot create
    /// its root. A failed native probe is not an error; it downgrades to
    /// host-file mode and records the cause in the status.
    pub async fn init(&self) -> Result<(), StorageError> {
        if self.inner.resolved.get().is_some() {
            return Ok(());
        }

        let resolved = match (&self.inner.native, self.inner.config.mode) {
            (Some(native), ArchiveMode::Auto) => match Self::probe(native.as_ref()).await {
                Ok(()) => Resolved {
                    backend: Arc::clone(native),
                    strategy: StorageStrategy::Native,
                    probe_error: None,
                },
                Err(err) => {
                    warn!(error = %err, "native archive probe failed, using host-file storage");
                    Resolved {
                        backend: Arc::clone(&self.inner.host),
                        strategy: StorageStrategy::HostFile,
                        probe_error: Some(err.to_string()),
                    }
                }
            },
            _ => Resolved {
                backend: Arc::clone(&self.inner.host),
                strategy: StorageStrategy::HostFile,
                probe_error: None,
            },
        };

        resolved.backend.ensure_dir("").await?;
        info!(
            strategy = ?resolved.strategy,
            root = %resolved.backend.describe(),
            "archive storage ready"
        );
        let _ = self.inner.resolved.set(resolved);
        Ok(())
    }

    async fn probe(backend: &dyn StorageBackend) -> Result<(), StorageError> {
        backend.ensure_dir("").await?;
        backend.write(PROBE_FILE, b"probe").await?;
        let read_back = backend.read(PROBE_FILE).await?;
        if read_back.as_deref() != Some(b"probe".as_slice()) {
            backend.delete(PROBE_FILE).await.ok();
            return Err(StorageError::Io {
                path: PROBE_FILE.to_string(),
                message: "probe read-back mismatch".to_string(),
            });
        }
        backend.append(PROBE_FILE, b"+append").await?;
        let appended = backend.read(PROBE_FILE).await?;
        backend.delete(PROBE_FILE).await.ok();
        if appended.as_deref() != Some(b"probe+append".as_slice()) {
            return Err(StorageError::Io {
                path: PROBE_FILE.to_string(),
                message: "probe append mismatch".to_string(),
            });
        }
        Ok(())
    }

    fn backend(&self) -> Arc<dyn StorageBackend> {
        self.inner
            .resolved
            .get()
            .map_or_else(|| Arc::clone(&self.inner.host), |r| Arc::clone(&r.backend))
    }

    // -- append operations ---------------------------------------------------

    /// Record the creation snapshot of a message.
    pub fn append_create(
        &self,
        message: &Message,
    ) -> impl Future<Output = Result<(), ArchiveError>> + Send + 'static {
        self.append_with_snapshot(ArchiveEventKind::Create, message)
    }

    /// Record a housekeeping snapshot of a message.
    pub fn append_snapshot(
        &self,
        message: &Message,
    ) -> impl Future<Output = Result<(), ArchiveError>> + Send + 'static {
        self.append_with_snapshot(ArchiveEventKind::Snapshot, message)
    }

    /// Record the removal of a message, retaining its final snapshot.
    pub fn append_delete(
        &self,
        message: &Message,
    ) -> impl Future<Output = Result<(), ArchiveError>> + Send + 'static {
        self.append_with_snapshot(ArchiveEventKind::Delete, message)
    }

    /// Record the expiry of a message, retaining its final snapshot.
    pub fn append_expired(
        &self,
        message: &Message,
    ) -> impl Future<Output = Result<(), ArchiveError>> + Send + 'static {
        self.append_with_snapshot(ArchiveEventKind::Expired, message)
    }

    /// Record a patch: the requested change plus the structural diff
    /// between the two snapshots when both are given.
    pub fn append_patch(
        &self,
        ref_key: &str,
        requested: &Value,
        existing: Option<&Message>,
        updated: Option<&Message>,
    ) -> impl Future<Output = Result<(), ArchiveError>> + Send + 'static {
        let mut extra = Map::new();
        extra.insert("requested".to_string(), requested.clone());
        if let (Some(existing), Some(updated)) = (existing, updated) {
            match (serde_json::to_value(existing), serde_json::to_value(updated)) {
                (Ok(before), Ok(after)) => {
                    let diff = compute_diff(&before, &after);
                    if let Some(added) = diff.added {
                        extra.insert("added".to_string(), added);
                    }
                    if let Some(removed) = diff.removed {
                        extra.insert("removed".to_string(), removed);
                    }
                }
                _ => warn!(%ref_key, "snapshot encoding failed, patch entry has no diff"),
            }
        }
        self.append_entry(ref_key, ArchiveEventKind::Patch, extra)
    }

    /// Record an executed action.
    pub fn append_action(
        &self,
        ref_key: &str,
        action_id: &str,
        actor: &str,
        payload: Option<Value>,
    ) -> impl Future<Output = Result<(), ArchiveError>> + Send + 'static {
        let mut extra = Map::new();
        extra.insert("actionId".to_string(), Value::String(action_id.to_string()));
        extra.insert("actor".to_string(), Value::String(actor.to_string()));
        if let Some(payload) = payload {
            extra.insert("payload".to_string(), payload);
        }
        self.append_entry(ref_key, ArchiveEventKind::Action, extra)
    }

    fn append_with_snapshot(
        &self,
        kind: ArchiveEventKind,
        message: &Message,
    ) -> impl Future<Output = Result<(), ArchiveError>> + Send + 'static {
        let mut extra = Map::new();
        match serde_json::to_value(message) {
            Ok(snapshot) => {
                extra.insert("snapshot".to_string(), snapshot);
            }
            Err(err) => {
                warn!(ref_key = %message.ref_key, error = %err, "snapshot encoding failed");
            }
        }
        self.append_entry(&message.ref_key, kind, extra)
    }

    fn append_entry(
        &self,
        ref_key: &str,
        kind: ArchiveEventKind,
        extra: Map<String, Value>,
    ) -> impl Future<Output = Result<(), ArchiveError>> + Send + 'static {
        let now = self.inner.clock.now_ms();
        let week = self
            .inner
            .clock
            .to_local(now)
            .map_or_else(|| week_key(self.inner.clock.now_local()), week_key);

        let mut line = Map::new();
        line.insert("schema_v".to_string(), json!(ARCHIVE_SCHEMA_VERSION));
        line.insert("ts".to_string(), json!(now));
        line.insert("ref".to_string(), Value::String(ref_key.to_string()));
        line.insert("event".to_string(), Value::String(kind.as_str().to_string()));
        line.extend(extra);

        let throw_on_error = self.inner.config.throw_on_error;
        let rx = self.enqueue(
            ref_key,
            PendingEvent {
                line: Value::Object(line),
                week,
            },
        );
        let ref_key = ref_key.to_string();
        async move {
            let outcome = match rx.await {
                Ok(result) => result,
                Err(_) => Err(ArchiveError::Storage(StorageError::QueueClosed)),
            };
            match outcome {
                Ok(()) => Ok(()),
                Err(err) if throw_on_error => Err(err),
                Err(err) => {
                    warn!(%ref_key, error = %err, "archive append failed (best-effort)");
                    Ok(())
                }
            }
        }
    }

    fn enqueue(
        &self,
        ref_key: &str,
        event: PendingEvent,
    ) -> oneshot::Receiver<Result<(), ArchiveError>> {
        let inner = Arc::clone(&self.inner);
        let mut pending = inner.pending.lock().expect("archive pending lock");
        let slot = pending.entry(ref_key.to_string()).or_default();
        slot.events.push(event);
        let (tx, rx) = oneshot::channel();
        slot.waiters.push(tx);

        let flush_now = inner.config.flush_interval_ms == 0
            || slot.events.len() >= inner.config.max_batch_size;
        if flush_now {
            if let Some(timer) = slot.timer.take() {
                timer.abort();
            }
            if !slot.flushing {
                let flush_inner = Arc::clone(&self.inner);
                let key = ref_key.to_string();
                tokio::spawn(async move {
                    Inner::flush_ref(flush_inner, &key).await;
                });
            }
        } else if slot.timer.is_none() && !slot.flushing {
            let flush_inner = Arc::clone(&self.inner);
            let key = ref_key.to_string();
            let interval = std::time::Duration::from_millis(inner.config.flush_interval_ms);
            slot.timer = Some(tokio::spawn(async move {
                tokio::time::sleep(interval).await;
                Inner::flush_ref(flush_inner, &key).await;
            }));
        }
        rx
    }

    /// Flush one ref's pending events immediately.
    pub async fn flush_now(&self, ref_key: &str) {
        Inner::flush_ref(Arc::clone(&self.inner), ref_key).await;
    }

    /// Flush every pending ref and wait for the queue tail. Used on
    /// shutdown.
    pub async fn flush_all(&self) {
        let refs: Vec<String> = {
            let pending = self.inner.pending.lock().expect("archive pending lock");
            pending.keys().cloned().collect()
        };
        for ref_key in refs {
            Inner::flush_ref(Arc::clone(&self.inner), &ref_key).await;
        }
        let _ = self.inner.queue.quiesce().await;
    }

    /// Estimate the total size of the archive tree in bytes.
    ///
    /// Returns `None` when the backend cannot enumerate files.
    pub async fn estimate_size(&self) -> Option<u64> {
        let backend = self.backend();
        let files = backend.walk_files("").await.ok()?;
        let mut total = 0u64;
        for file in files {
            if let Ok(Some(len)) = backend.file_len(&file).await {
                total += len;
            }
        }
        Some(total)
    }

    /// Current status snapshot.
    #[must_use]
    pub fn status(&self) -> ArchiveStatus {
        let pending = self.inner.pending.lock().expect("archive pending lock");
        let stats = self.inner.stats.lock().expect("archive stats lock");
        let (strategy, probe_error) = self.inner.resolved.get().map_or(
            (StorageStrategy::HostFile, None),
            |r| (r.strategy, r.probe_error.clone()),
        );
        ArchiveStatus {
            pending_refs: pending.values().filter(|s| !s.events.is_empty()).count(),
            pending_events: pending.values().map(|s| s.events.len()).sum(),
            last_flush_at: stats.last_flush_at,
            events_written: stats.events_written,
            strategy,
            probe_error,
        }
    }
}

impl Inner {
    fn flush_ref<'a>(
        inner: Arc<Inner>,
        ref_key: &'a str,
    ) -> std::pin::Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(Self::flush_ref_inner(inner, ref_key))
    }

    async fn flush_ref_inner(inner: Arc<Inner>, ref_key: &str) {
        let (events, waiters) = {
            let mut pending = inner.pending.lock().expect("archive pending lock");
            let Some(slot) = pending.get_mut(ref_key) else {
                return;
            };
            if slot.flushing || slot.events.is_empty() {
                return;
            }
            slot.flushing = true;
            if let Some(timer) = slot.timer.take() {
                timer.abort();
            }
            (
                std::mem::take(&mut slot.events),
                std::mem::take(&mut slot.waiters),
            )
        };

        let count = events.len();
        let write_inner = Arc::clone(&inner);
        let key = ref_key.to_string();
        let result = match inner
            .queue
            .submit(move || Self::write_events(write_inner, key, events))
            .await
        {
            Ok(result) => result,
            Err(err) => Err(ArchiveError::Storage(err)),
        };

        if result.is_ok() {
            let mut stats = inner.stats.lock().expect("archive stats lock");
            stats.last_flush_at = Some(inner.clock.now_ms());
            stats.events_written += count as u64;
        }

        {
            let mut pending = inner.pending.lock().expect("archive pending lock");
            if let Some(slot) = pending.get_mut(ref_key) {
                slot.flushing = false;
                let more = !slot.events.is_empty();
                if more {
                    // Events arrived while this flush was running.
                    let flush_inner = Arc::clone(&inner);
                    let key = ref_key.to_string();
                    tokio::spawn(async move {
                        Self::flush_ref(flush_inner, &key).await;
                    });
                } else if slot.waiters.is_empty() && slot.timer.is_none() {
                    pending.remove(ref_key);
                }
            }
        }

        for waiter in waiters {
            let _ = waiter.send(result.clone());
        }
    }

    async fn write_events(
        inner: Arc<Inner>,
        ref_key: String,
        events: Vec<PendingEvent>,
    ) -> Result<(), ArchiveError> {
        let backend = inner
            .resolved
            .get()
            .map_or_else(|| Arc::clone(&inner.host), |r| Arc::clone(&r.backend));

        // Group by week, preserving first-seen order so per-ref ordering
        // holds inside every segment file.
        let mut groups: Vec<(String, Vec<String>)> = Vec::new();
        for event in events {
            let line = event.line.to_string();
            match groups.iter_mut().find(|(week, _)| *week == event.week) {
                Some((_, lines)) => lines.push(line),
                None => groups.push((event.week, vec![line])),
            }
        }

        let mut touched_dirs: Vec<(String, String)> = Vec::new();
        for (week, lines) in groups {
            let segment = segment_path(
                &ref_key,
                &week,
                inner.config.max_path_segment_length,
                &inner.config.file_extension,
            );
            let path = segment.file_path();
            let payload = format!("{}\n", lines.join("\n"));

            if backend.supports_append() {
                backend.append(&path, payload.as_bytes()).await?;
            } else {
                let existing = backend.read(&path).await?.unwrap_or_default();
                let existing = String::from_utf8_lossy(&existing);
                // Legacy files may carry extra trailing newlines; trim so the
                // log never contains blank lines.
                let trimmed = existing.trim_end();
                let content = if trimmed.is_empty() {
                    payload.clone()
                } else {
                    format!("{trimmed}\n{payload}")
                };
                backend.write(&path, content.as_bytes()).await?;
            }
            debug!(%ref_key, %path, lines = lines.len(), "archive segment appended");

            let stem = segment
                .file_name
                .splitn(2, &format!(".{week}."))
                .next()
                .unwrap_or(&segment.file_name)
                .to_string();
            let dir = segment.dir_path();
            if !touched_dirs.iter().any(|(d, s)| *d == dir && *s == stem) {
                touched_dirs.push((dir, stem));
            }
        }

        for (dir, stem) in touched_dirs {
            if let Err(err) =
                Self::apply_retention(&inner, backend.as_ref(), &dir, &stem).await
            {
                warn!(%ref_key, error = %err, "archive retention failed (ignored)");
            }
        }
        Ok(())
    }

    async fn apply_retention(
        inner: &Arc<Inner>,
        backend: &dyn StorageBackend,
        dir: &str,
        stem: &str,
    ) -> Result<(), StorageError> {
        let keep_back = i64::from(inner.config.keep_previous_weeks);
        let current_week = week_key(inner.clock.now_local());
        let Some(current_monday) = parse_week_key(&current_week) else {
            return Ok(());
        };
        let threshold = current_monday - Duration::weeks(keep_back);

        let names = backend.list(dir).await?;
        for name in names {
            let Some((file_stem, week)) =
                parse_segment_file_name(&name, &inner.config.file_extension)
            else {
                continue;
            };
            if file_stem != stem {
                continue;
            }
            let Some(monday) = parse_week_key(week) else {
                continue;
            };
            if monday < threshold {
                let path = if dir.is_empty() {
                    name.clone()
                } else {
                    format!("{dir}/{name}")
                };
                debug!(%path, "deleting expired archive segment");
                backend.delete(&path).await?;
            }
        }
        Ok(())
    }
}
