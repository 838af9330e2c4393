// SPDX-License-Identifier: MIT OR Apache-2.0
//! The authoritative message store.
//!
//! All mutations run behind one async mutex, so public operations appear
//! serialized. Each mutation follows the same shape: validate through the
//! factory, swap the in-memory list, schedule the coalesced document
//! write, record the archive event, and dispatch the lifecycle event to
//! the notifier sink after the lock is released (so plugins observe
//! post-mutation state and can call back in without deadlocking).
//!
//! One timer tracks the nearest `notify_at`/`expires_at` across the list.
//! Quiet hours reschedule repeat notifications via stealth updates, which
//! never bump `updated_at`.

use crate::query::{MessageQuery, QueryResult, run_query};
use msghub_archive::MsgArchive;
use msghub_core::clock::Clock;
use msghub_core::events::{LifecycleEvent, NotificationSink};
use msghub_core::factory::{MessageFactory, NewMessage, OriginInput};
use msghub_core::model::{LifecycleState, Message, MsgKind};
use msghub_core::patch::{
    LifecyclePatch, MessagePatch, MetricsPatch, NotifiedAtPatch, OriginPatch, PatchField,
    ProgressPatch, TimingPatch,
};
use msghub_core::{ValidationError, model};
use msghub_policy::{QuietHours, compute_quiet_reschedule_ts, should_suppress_due};
use msghub_stats::{IoStats, MsgStats, StatsSnapshot};
use msghub_storage::DocumentStorage;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as SyncMutex, Weak};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

// ---------------------------------------------------------------------------
// Errors & config
// ---------------------------------------------------------------------------

/// Errors surfaced by store operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    /// The factory rejected the input.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// No message with the given ref exists.
    #[error("message '{ref_key}' not found")]
    NotFound {
        /// The unknown ref.
        ref_key: String,
    },

    /// A message with the given ref already exists.
    #[error("message '{ref_key}' already exists")]
    Duplicate {
        /// The conflicting ref.
        ref_key: String,
    },

    /// The message offers no action with the given id.
    #[error("action '{action_id}' not found on '{ref_key}'")]
    ActionNotFound {
        /// The target message.
        ref_key: String,
        /// The unknown action id.
        action_id: String,
    },
}

/// Store configuration.
#[derive(Debug, Clone, Default)]
pub struct StoreConfig {
    /// Quiet-hours window applied to repeat `due` notifications.
    pub quiet_hours: QuietHours,
}

/// A request to execute a message action on behalf of an actor.
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteActionRequest {
    /// Target message ref.
    #[serde(rename = "ref")]
    pub ref_key: String,
    /// Id of the action to execute.
    pub action_id: String,
    /// Who triggered the action (plugin id, user, ...).
    pub actor: String,
    /// Optional payload recorded with the action event.
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Default)]
struct StoreState {
    list: Vec<Message>,
    index: HashMap<String, usize>,
}

impl StoreState {
    fn get(&self, ref_key: &str) -> Option<&Message> {
        self.index.get(ref_key).map(|&i| &self.list[i])
    }

    fn insert(&mut self, message: Message) {
        self.index.insert(message.ref_key.clone(), self.list.len());
        self.list.push(message);
    }

    fn replace(&mut self, message: Message) {
        if let Some(&i) = self.index.get(&message.ref_key) {
            self.list[i] = message;
        }
    }

    fn remove(&mut self, ref_key: &str) -> Option<Message> {
        let i = self.index.remove(ref_key)?;
        let removed = self.list.remove(i);
        // Positions after the removed entry shifted down by one.
        for index in self.index.values_mut() {
            if *index > i {
                *index -= 1;
            }
        }
        Some(removed)
    }
}

struct StoreInner {
    state: Mutex<StoreState>,
    factory: MessageFactory,
    storage: DocumentStorage,
    archive: MsgArchive,
    stats: MsgStats,
    sink: Arc<dyn NotificationSink>,
    clock: Arc<dyn Clock>,
    quiet_hours: QuietHours,
    jitter: Arc<dyn Fn() -> f64 + Send + Sync>,
    timer: SyncMutex<Option<JoinHandle<()>>>,
}

enum ArchiveAs {
    Patch(serde_json::Value),
    Action {
        action_id: String,
        actor: String,
        payload: Option<serde_json::Value>,
    },
}

/// The authoritative in-memory message store.
#[derive(Clone)]
pub struct MsgStore {
    inner: Arc<StoreInner>,
}

impl std::fmt::Debug for MsgStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MsgStore").finish_non_exhaustive()
    }
}

impl MsgStore {
    /// Create a store with the default jitter source for quiet-hours
    /// reschedules.
    #[must_use]
    pub fn new(
        factory: MessageFactory,
        storage: DocumentStorage,
        archive: MsgArchive,
        stats: MsgStats,
        sink: Arc<dyn NotificationSink>,
        clock: Arc<dyn Clock>,
        config: StoreConfig,
    ) -> Self {
        Self::with_jitter(
            factory,
            storage,
            archive,
            stats,
            sink,
            clock,
            config,
            Arc::new(rand::random::<f64>),
        )
    }

    /// Create a store with an injected jitter source (`[0, 1)` samples).
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn with_jitter(
        factory: MessageFactory,
        storage: DocumentStorage,
        archive: MsgArchive,
        stats: MsgStats,
        sink: Arc<dyn NotificationSink>,
        clock: Arc<dyn Clock>,
        config: StoreConfig,
        jitter: Arc<dyn Fn() -> f64 + Send + Sync>,
    ) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                state: Mutex::new(StoreState::default()),
                factory,
                storage,
                archive,
                stats,
                sink,
                clock,
                quiet_hours: config.quiet_hours,
                jitter,
                timer: SyncMutex::new(None),
            }),
        }
    }

    /// Initialize storage, load the persisted list, and start the timer.
    ///
    /// # Errors
    ///
    /// Returns a [`msghub_storage::StorageError`] when a storage root
    /// cannot be created.
    pub async fn init(&self) -> Result<(), msghub_storage::StorageError> {
        self.inner.storage.init().await?;
        self.inner.archive.init().await?;
        self.inner.stats.init().await?;

        let loaded: Vec<Message> = self.inner.storage.read_json(Vec::new()).await;
        let mut state = self.inner.state.lock().await;
        *state = StoreState::default();
        for message in loaded {
            if state.get(&message.ref_key).is_some() {
                warn!(ref_key = %message.ref_key, "duplicate ref in persisted list, dropping");
                continue;
            }
            state.insert(message);
        }
        info!(messages = state.list.len(), "message store loaded");
        StoreInner::recompute_timer(&self.inner, &state);
        Ok(())
    }

    /// Cancel the timer and flush every pending write. Call on shutdown.
    pub async fn shutdown(&self) {
        if let Some(handle) = self.inner.timer.lock().expect("timer lock").take() {
            handle.abort();
        }
        if let Err(err) = self.inner.storage.flush_pending().await {
            warn!(error = %err, "message list flush failed on shutdown");
        }
        self.inner.archive.flush_all().await;
        if let Err(err) = self.inner.stats.flush().await {
            warn!(error = %err, "rollup flush failed on shutdown");
        }
    }

    // -- reads ---------------------------------------------------------------

    /// Look up a message by ref. Returns a defensive copy.
    pub async fn get_message(&self, ref_key: &str) -> Option<Message> {
        self.inner.state.lock().await.get(ref_key).cloned()
    }

    /// The full list, as a defensive copy.
    pub async fn get_messages(&self) -> Vec<Message> {
        self.inner.state.lock().await.list.clone()
    }

    /// Run a whitelisted query over the list.
    pub async fn query_messages(&self, query: &MessageQuery) -> QueryResult {
        let state = self.inner.state.lock().await;
        run_query(
            &state.list,
            query,
            self.inner.clock.now_ms(),
            self.inner.clock.local_offset().to_string(),
        )
    }

    /// Build a stats snapshot; optionally include the archive size
    /// estimate (which walks the archive tree).
    pub async fn get_stats(&self, include_archive_size: bool) -> StatsSnapshot {
        let archive_size_bytes = if include_archive_size {
            self.inner.archive.estimate_size().await
        } else {
            None
        };
        let list = { self.inner.state.lock().await.list.clone() };
        self.inner.stats.snapshot(
            &list,
            IoStats {
                document: self.inner.storage.status(),
                archive: self.inner.archive.status(),
                archive_size_bytes,
            },
        )
    }

    // -- mutations -----------------------------------------------------------

    /// Create a message. Fails on validation problems or a known ref.
    ///
    /// # Errors
    ///
    /// [`StoreError::Validation`] or [`StoreError::Duplicate`].
    pub async fn add_message(&self, input: NewMessage) -> Result<Message, StoreError> {
        let message = self.inner.factory.create(input)?;
        {
            let mut state = self.inner.state.lock().await;
            if state.get(&message.ref_key).is_some() {
                return Err(StoreError::Duplicate {
                    ref_key: message.ref_key.clone(),
                });
            }
            state.insert(message.clone());
            StoreInner::schedule_persist(&self.inner, &state);
            StoreInner::spawn_logged(self.inner.archive.append_create(&message));
            StoreInner::recompute_timer(&self.inner, &state);
        }
        debug!(ref_key = %message.ref_key, "message created");
        self.inner
            .sink
            .dispatch(LifecycleEvent::Created, std::slice::from_ref(&message));
        Ok(message)
    }

    /// Patch an existing message.
    ///
    /// A patch that normalizes to a no-op returns the unchanged message
    /// without persisting or dispatching.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] or [`StoreError::Validation`].
    pub async fn update_message(
        &self,
        ref_key: &str,
        patch: MessagePatch,
    ) -> Result<Message, StoreError> {
        let requested =
            serde_json::to_value(&patch).unwrap_or(serde_json::Value::Null);
        self.apply_update(ref_key, &patch, false, ArchiveAs::Patch(requested))
            .await
    }

    /// Create the message when its ref is unknown, otherwise patch the
    /// existing message with the input's content.
    ///
    /// # Errors
    ///
    /// [`StoreError::Validation`] (including immutable-field mismatches on
    /// the update path).
    pub async fn add_or_update_message(&self, input: NewMessage) -> Result<Message, StoreError> {
        let existing = match input.ref_key.as_deref() {
            Some(ref_key) => self.get_message(ref_key).await,
            None => None,
        };
        match existing {
            Some(existing) => {
                let patch = patch_from_new(&input, &existing);
                self.update_message(&existing.ref_key, patch).await
            }
            None => self.add_message(input).await,
        }
    }

    /// Remove a message. Returns `false` for an unknown ref.
    pub async fn remove_message(&self, ref_key: &str) -> bool {
        let removed = {
            let mut state = self.inner.state.lock().await;
            let Some(removed) = state.remove(ref_key) else {
                return false;
            };
            StoreInner::schedule_persist(&self.inner, &state);
            StoreInner::spawn_logged(self.inner.archive.append_delete(&removed));
            StoreInner::recompute_timer(&self.inner, &state);
            removed
        };
        debug!(%ref_key, "message removed");
        self.inner
            .sink
            .dispatch(LifecycleEvent::Deleted, std::slice::from_ref(&removed));
        true
    }

    /// Close tasks (and every other non-status kind) or delete statuses
    /// once their cause is gone.
    ///
    /// Closing clears `notify_at` and sets the progress percentage to
    /// 100; it intentionally leaves `progress.finished_at` untouched.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] or [`StoreError::Validation`].
    pub async fn complete_after_cause_eliminated(
        &self,
        ref_key: &str,
        actor: &str,
    ) -> Result<bool, StoreError> {
        let Some(existing) = self.get_message(ref_key).await else {
            return Ok(false);
        };
        if existing.kind == MsgKind::Status {
            return Ok(self.remove_message(ref_key).await);
        }
        let patch = MessagePatch {
            lifecycle: PatchField::Set(LifecyclePatch {
                state: Some(LifecycleState::Closed),
                state_changed_by: PatchField::Set(actor.to_string()),
                ..LifecyclePatch::default()
            }),
            timing: PatchField::Set(TimingPatch {
                notify_at: PatchField::Remove,
                ..TimingPatch::default()
            }),
            progress: PatchField::Set(ProgressPatch {
                percentage: PatchField::Set(100.0),
                ..ProgressPatch::default()
            }),
            ..MessagePatch::default()
        };
        self.update_message(ref_key, patch).await?;
        Ok(true)
    }

    /// Execute one of a message's offered actions: apply the action's
    /// state transition, record an `action` archive event, and dispatch
    /// `updated`.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`], [`StoreError::ActionNotFound`], or
    /// [`StoreError::Validation`].
    pub async fn execute_action(
        &self,
        request: ExecuteActionRequest,
    ) -> Result<Message, StoreError> {
        let existing =
            self.get_message(&request.ref_key)
                .await
                .ok_or_else(|| StoreError::NotFound {
                    ref_key: request.ref_key.clone(),
                })?;
        let action = existing
            .actions
            .iter()
            .find(|a| a.id == request.action_id)
            .ok_or_else(|| StoreError::ActionNotFound {
                ref_key: request.ref_key.clone(),
                action_id: request.action_id.clone(),
            })?;

        let patch = MessagePatch {
            lifecycle: PatchField::Set(LifecyclePatch {
                state: Some(action.action_type.target_state()),
                state_changed_by: PatchField::Set(request.actor.clone()),
                ..LifecyclePatch::default()
            }),
            ..MessagePatch::default()
        };
        self.apply_update(
            &request.ref_key,
            &patch,
            false,
            ArchiveAs::Action {
                action_id: request.action_id,
                actor: request.actor,
                payload: request.payload,
            },
        )
        .await
    }

    // -- internals -----------------------------------------------------------

    async fn apply_update(
        &self,
        ref_key: &str,
        patch: &MessagePatch,
        stealth: bool,
        archive_as: ArchiveAs,
    ) -> Result<Message, StoreError> {
        let (updated, changed, newly_closed) = {
            let mut state = self.inner.state.lock().await;
            let existing = state.get(ref_key).ok_or_else(|| StoreError::NotFound {
                ref_key: ref_key.to_string(),
            })?;
            let existing = existing.clone();
            let outcome = self.inner.factory.apply_patch(&existing, patch, stealth)?;
            if !outcome.changed {
                return Ok(existing);
            }
            let updated = outcome.message;
            state.replace(updated.clone());
            StoreInner::schedule_persist(&self.inner, &state);
            match archive_as {
                ArchiveAs::Patch(requested) => {
                    StoreInner::spawn_logged(self.inner.archive.append_patch(
                        ref_key,
                        &requested,
                        Some(&existing),
                        Some(&updated),
                    ));
                }
                ArchiveAs::Action {
                    action_id,
                    actor,
                    payload,
                } => {
                    StoreInner::spawn_logged(self.inner.archive.append_action(
                        ref_key, &action_id, &actor, payload,
                    ));
                }
            }
            let newly_closed = existing.state() != LifecycleState::Closed
                && updated.state() == LifecycleState::Closed;
            StoreInner::recompute_timer(&self.inner, &state);
            (updated, true, newly_closed)
        };

        if newly_closed {
            StoreInner::spawn_logged_storage(self.inner.stats.record_closed(&updated));
        }
        if changed {
            debug!(%ref_key, stealth, "message updated");
            self.inner
                .sink
                .dispatch(LifecycleEvent::Updated, std::slice::from_ref(&updated));
        }
        Ok(updated)
    }
}

impl StoreInner {
    fn schedule_persist(inner: &Arc<StoreInner>, state: &StoreState) {
        Self::spawn_logged_storage(inner.storage.write_json(&state.list));
    }

    fn spawn_logged(
        fut: impl std::future::Future<Output = Result<(), msghub_archive::ArchiveError>>
        + Send
        + 'static,
    ) {
        tokio::spawn(async move {
            if let Err(err) = fut.await {
                warn!(error = %err, "archive write failed");
            }
        });
    }

    fn spawn_logged_storage(
        fut: impl std::future::Future<Output = Result<(), msghub_storage::StorageError>>
        + Send
        + 'static,
    ) {
        tokio::spawn(async move {
            if let Err(err) = fut.await {
                warn!(error = %err, "persistence write failed");
            }
        });
    }

    /// Reschedule the single timer to the nearest `notify_at`/`expires_at`
    /// across non-terminal messages. Cancels the previous timer so a
    /// mutation never leaves a stale double-dispatch behind.
    fn recompute_timer(inner: &Arc<StoreInner>, state: &StoreState) {
        let next = state
            .list
            .iter()
            .filter(|m| !m.state().is_terminal())
            .flat_map(|m| [m.timing.notify_at, m.timing.expires_at])
            .flatten()
            .min();

        let mut timer = inner.timer.lock().expect("timer lock");
        if let Some(handle) = timer.take() {
            handle.abort();
        }
        let Some(next) = next else {
            return;
        };

        let now = inner.clock.now_ms();
        let delay = std::time::Duration::from_millis(next.saturating_sub(now).max(0) as u64);
        let weak: Weak<StoreInner> = Arc::downgrade(inner);
        *timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                Self::on_timer(inner).await;
            }
        }));
    }

    /// Handle an elapsed timer: expire lapsed messages, dispatch or
    /// suppress due notifications, then re-arm.
    async fn on_timer(inner: Arc<StoreInner>) {
        let mut dispatches: Vec<(LifecycleEvent, Message)> = Vec::new();
        {
            let mut state = inner.state.lock().await;
            let now = inner.clock.now_ms();
            let now_local = inner.clock.now_local();
            let mut list_changed = false;

            let refs: Vec<String> = state.list.iter().map(|m| m.ref_key.clone()).collect();
            for ref_key in refs {
                let Some(message) = state.get(&ref_key).cloned() else {
                    continue;
                };
                if message.state().is_terminal() {
                    continue;
                }

                if message.timing.expires_at.is_some_and(|t| t <= now) {
                    match Self::expire(&inner, &message, now) {
                        Ok(expired) => {
                            state.replace(expired.clone());
                            Self::spawn_logged(inner.archive.append_expired(&expired));
                            dispatches.push((LifecycleEvent::Expired, expired));
                            list_changed = true;
                        }
                        Err(err) => warn!(%ref_key, error = %err, "expiry update failed"),
                    }
                    continue;
                }

                if message.timing.notify_at.is_some_and(|t| t <= now) {
                    if should_suppress_due(&message, now_local, &inner.quiet_hours) {
                        let target = compute_quiet_reschedule_ts(
                            now_local,
                            &inner.quiet_hours,
                            (inner.jitter)(),
                        );
                        if let Some(target) = target {
                            match Self::reschedule(&inner, &message, target) {
                                Ok(rescheduled) => {
                                    debug!(%ref_key, target, "due suppressed by quiet hours");
                                    state.replace(rescheduled);
                                    list_changed = true;
                                }
                                Err(err) => {
                                    warn!(%ref_key, error = %err, "quiet-hours reschedule failed");
                                }
                            }
                        }
                    } else {
                        match Self::mark_notified(&inner, &message, now) {
                            Ok(notified) => {
                                state.replace(notified.clone());
                                dispatches.push((LifecycleEvent::Due, notified));
                                list_changed = true;
                            }
                            Err(err) => warn!(%ref_key, error = %err, "due bookkeeping failed"),
                        }
                    }
                }
            }

            if list_changed {
                Self::schedule_persist(&inner, &state);
            }
            Self::recompute_timer(&inner, &state);
        }

        for (event, message) in dispatches {
            inner.sink.dispatch(event, std::slice::from_ref(&message));
        }
    }

    fn expire(
        inner: &Arc<StoreInner>,
        message: &Message,
        now: i64,
    ) -> Result<Message, ValidationError> {
        let patch = MessagePatch {
            lifecycle: PatchField::Set(LifecyclePatch {
                state: Some(LifecycleState::Expired),
                state_changed_at: PatchField::Set(now),
                ..LifecyclePatch::default()
            }),
            timing: PatchField::Set(TimingPatch {
                notify_at: PatchField::Remove,
                ..TimingPatch::default()
            }),
            ..MessagePatch::default()
        };
        Ok(inner.factory.apply_patch(message, &patch, true)?.message)
    }

    fn reschedule(
        inner: &Arc<StoreInner>,
        message: &Message,
        notify_at: i64,
    ) -> Result<Message, ValidationError> {
        let patch = MessagePatch {
            timing: PatchField::Set(TimingPatch {
                notify_at: PatchField::Set(notify_at),
                ..TimingPatch::default()
            }),
            ..MessagePatch::default()
        };
        Ok(inner.factory.apply_patch(message, &patch, true)?.message)
    }

    fn mark_notified(
        inner: &Arc<StoreInner>,
        message: &Message,
        now: i64,
    ) -> Result<Message, ValidationError> {
        let next = message.timing.remind_every.map(|every| now + every);
        let patch = MessagePatch {
            timing: PatchField::Set(TimingPatch {
                notify_at: next.map_or(PatchField::Remove, PatchField::Set),
                notified_at: PatchField::Set(NotifiedAtPatch {
                    due: PatchField::Set(now),
                    ..NotifiedAtPatch::default()
                }),
                ..TimingPatch::default()
            }),
            ..MessagePatch::default()
        };
        Ok(inner.factory.apply_patch(message, &patch, true)?.message)
    }
}

// ---------------------------------------------------------------------------
// add-or-update patch construction
// ---------------------------------------------------------------------------

/// Build the patch that makes `existing` carry `input`'s content.
///
/// Immutable fields are echoed so mismatches fail in the factory. Metric
/// keys missing from the input are deleted — add-or-update means "this is
/// the message's current full content".
fn patch_from_new(input: &NewMessage, existing: &Message) -> MessagePatch {
    let mut patch = MessagePatch {
        ref_key: input.ref_key.clone(),
        kind: input.kind,
        origin: input.origin.as_ref().map(origin_echo),
        ..MessagePatch::default()
    };
    if let Some(title) = &input.title {
        patch.title = PatchField::Set(title.clone());
    }
    if let Some(text) = &input.text {
        patch.text = PatchField::Set(text.clone());
    }
    if let Some(level) = input.level {
        patch.level = PatchField::Set(level);
    }
    if let Some(lifecycle) = &input.lifecycle {
        patch.lifecycle = PatchField::Set(LifecyclePatch {
            state: lifecycle.state,
            state_changed_at: lifecycle
                .state_changed_at
                .map_or(PatchField::Absent, PatchField::Set),
            state_changed_by: lifecycle
                .state_changed_by
                .clone()
                .map_or(PatchField::Absent, PatchField::Set),
        });
    }
    if let Some(timing) = &input.timing {
        patch.timing = PatchField::Set(TimingPatch {
            due_at: timing.due_at.map_or(PatchField::Absent, PatchField::Set),
            start_at: timing.start_at.map_or(PatchField::Absent, PatchField::Set),
            end_at: timing.end_at.map_or(PatchField::Absent, PatchField::Set),
            notify_at: timing.notify_at.map_or(PatchField::Absent, PatchField::Set),
            expires_at: timing.expires_at.map_or(PatchField::Absent, PatchField::Set),
            remind_every: timing
                .remind_every
                .map_or(PatchField::Absent, PatchField::Set),
            time_budget: timing
                .time_budget
                .map_or(PatchField::Absent, PatchField::Set),
            cooldown: timing.cooldown.map_or(PatchField::Absent, PatchField::Set),
            ..TimingPatch::default()
        });
    }
    if let Some(details) = &input.details {
        patch.details = PatchField::Set(msghub_core::patch::DetailsPatch {
            location: details
                .location
                .clone()
                .map_or(PatchField::Absent, PatchField::Set),
            task: details
                .task
                .clone()
                .map_or(PatchField::Absent, PatchField::Set),
            tools: details
                .tools
                .clone()
                .map_or(PatchField::Absent, PatchField::Set),
            consumables: details
                .consumables
                .clone()
                .map_or(PatchField::Absent, PatchField::Set),
            reason: details
                .reason
                .clone()
                .map_or(PatchField::Absent, PatchField::Set),
        });
    }
    if let Some(audience) = &input.audience {
        patch.audience = PatchField::Set(msghub_core::patch::AudiencePatch {
            tags: audience
                .tags
                .clone()
                .map_or(PatchField::Absent, PatchField::Set),
            channels: audience.channels.as_ref().map_or(
                PatchField::Absent,
                |channels| {
                    PatchField::Set(msghub_core::patch::ChannelsPatch {
                        include: channels
                            .include
                            .clone()
                            .map_or(PatchField::Absent, PatchField::Set),
                        exclude: channels
                            .exclude
                            .clone()
                            .map_or(PatchField::Absent, PatchField::Set),
                    })
                },
            ),
        });
    }
    if let Some(progress) = &input.progress {
        patch.progress = PatchField::Set(ProgressPatch {
            percentage: progress
                .percentage
                .map_or(PatchField::Absent, PatchField::Set),
            started_at: progress
                .started_at
                .map_or(PatchField::Absent, PatchField::Set),
            finished_at: progress
                .finished_at
                .map_or(PatchField::Absent, PatchField::Set),
        });
    }
    if let Some(dependencies) = &input.dependencies {
        patch.dependencies = PatchField::Set(msghub_core::patch::ArrayPatch::Replace(
            dependencies.raw_items(),
        ));
    }
    if let Some(metrics) = &input.metrics {
        let delete: Vec<String> = existing
            .metrics
            .0
            .keys()
            .filter(|key| !metrics.0.contains_key(*key))
            .cloned()
            .collect();
        patch.metrics = PatchField::Set(MetricsPatch {
            set: metrics.0.clone(),
            delete,
        });
    }
    if let Some(attachments) = &input.attachments {
        patch.attachments = PatchField::Set(attachments.clone());
    }
    if let Some(actions) = &input.actions {
        patch.actions = PatchField::Set(msghub_core::patch::IdArrayPatch::Replace(
            actions.clone(),
        ));
    }
    if let Some(items) = &input.list_items {
        let items: Vec<model::ListItem> = items
            .iter()
            .enumerate()
            .map(|(i, item)| model::ListItem {
                id: item
                    .id
                    .clone()
                    .unwrap_or_else(|| format!("item-{}", i + 1)),
                name: item.name.clone(),
                checked: item.checked,
            })
            .collect();
        patch.list_items = PatchField::Set(msghub_core::patch::IdArrayPatch::Replace(items));
    }
    patch
}

fn origin_echo(origin: &OriginInput) -> OriginPatch {
    OriginPatch {
        origin_type: Some(origin.origin_type),
        system: Some(origin.system.clone()),
        id: origin
            .id
            .clone()
            .map_or(PatchField::Absent, PatchField::Set),
    }
}
