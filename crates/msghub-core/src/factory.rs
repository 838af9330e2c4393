// SPDX-License-Identifier: MIT OR Apache-2.0
//! Message creation and patch application.
//!
//! The factory is the only producer of [`Message`] values. It validates and
//! normalizes creation input, applies patches with immutable-field
//! enforcement, and revalidates the result with the same rules it applies
//! at creation. It performs no I/O; the store owns persistence and
//! dispatch.

use crate::clock::{Clock, is_plausible_ms};
use crate::error::ValidationError;
use crate::model::{
    Attachment, Audience, Channels, Details, Lifecycle, LifecycleState, ListItem, Message,
    MessageAction, MetricSample, MetricsMap, MsgKind, NotifiedAt, Origin, OriginType, Progress,
    Severity, Timing,
};
use crate::patch::{
    ActionInput, ActionPatch, ArrayPatch, AudiencePatch, ChannelsPatch, DetailsPatch,
    IdArrayPatch, LifecyclePatch, ListItemPatch, MessagePatch, MetricsPatch, NotifiedAtPatch,
    OriginPatch, PatchField, ProgressPatch, StringsInput, TimingPatch,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, error, warn};

// ---------------------------------------------------------------------------
// Creation input
// ---------------------------------------------------------------------------

/// Origin input for creation; `system` and `id` are trimmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OriginInput {
    /// Provenance class.
    #[serde(rename = "type")]
    pub origin_type: OriginType,
    /// Source system identifier.
    pub system: String,
    /// Source-local identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// Lifecycle input for creation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleInput {
    /// Initial state; defaults to `open`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<LifecycleState>,
    /// Explicit state-change instant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_changed_at: Option<i64>,
    /// Actor of the initial state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_changed_by: Option<String>,
}

/// Timing input for creation. `created_at` is never accepted from input.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimingInput {
    /// Task due instant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_at: Option<i64>,
    /// Appointment start.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_at: Option<i64>,
    /// Appointment end.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_at: Option<i64>,
    /// Next `due` notification instant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notify_at: Option<i64>,
    /// Expiry instant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    /// Reminder repeat interval, ms.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remind_every: Option<i64>,
    /// Effort estimate, ms.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_budget: Option<i64>,
    /// Notification cooldown, ms.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown: Option<i64>,
}

/// Details input for creation; list fields accept CSV strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetailsInput {
    /// Location text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// Task description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
    /// Tools, CSV or list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<StringsInput>,
    /// Consumables, CSV or list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumables: Option<StringsInput>,
    /// Reason text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Channels input for creation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelsInput {
    /// Channels to include.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include: Option<StringsInput>,
    /// Channels to exclude.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude: Option<StringsInput>,
}

/// Audience input for creation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudienceInput {
    /// Audience tags.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<StringsInput>,
    /// Channel lists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<ChannelsInput>,
}

/// Progress input for creation; percentage accepts fractions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressInput {
    /// Completion percentage; truncated to an integer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percentage: Option<f64>,
    /// Work start instant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<i64>,
    /// Work finish instant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<i64>,
}

/// Shopping-list item input; id is auto-assigned when missing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListItemInput {
    /// Optional explicit id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Display name.
    pub name: String,
    /// Checked state.
    #[serde(default)]
    pub checked: bool,
}

/// Lenient creation input, as submitted by ingest plugins.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewMessage {
    /// Explicit identity; auto-filled when missing.
    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub ref_key: Option<String>,
    /// Title. Required, non-empty after trim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Body text. Required; may be empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Severity code; defaults to 20 (notice).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<i64>,
    /// Kind tag. Required.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<MsgKind>,
    /// Provenance. Required.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<OriginInput>,
    /// Initial lifecycle.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lifecycle: Option<LifecycleInput>,
    /// Timing fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timing: Option<TimingInput>,
    /// Details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<DetailsInput>,
    /// Audience.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audience: Option<AudienceInput>,
    /// Progress.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<ProgressInput>,
    /// Dependencies, CSV or list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependencies: Option<StringsInput>,
    /// Metric samples; tagged Map or plain object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<MetricsMap>,
    /// Attachments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachments: Option<Vec<Attachment>>,
    /// Offered actions; ids auto-assigned when missing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actions: Option<Vec<ActionInput>>,
    /// Shopping-list items.
    #[serde(
        rename = "listItems",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub list_items: Option<Vec<ListItemInput>>,
}

impl NewMessage {
    /// Minimal creation input: title, kind, origin; everything else default.
    #[must_use]
    pub fn new(title: impl Into<String>, kind: MsgKind, origin: OriginInput) -> Self {
        Self {
            title: Some(title.into()),
            text: Some(String::new()),
            kind: Some(kind),
            origin: Some(origin),
            ..Self::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// Result of applying a patch.
#[derive(Debug, Clone, PartialEq)]
pub struct PatchOutcome {
    /// The patched message (identical to the input when `changed` is false).
    pub message: Message,
    /// Whether the patch produced a meaningful difference.
    pub changed: bool,
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

/// Pure validator and normalizer for messages.
#[derive(Clone)]
pub struct MessageFactory {
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for MessageFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageFactory").finish_non_exhaustive()
    }
}

impl MessageFactory {
    /// Create a factory reading time from `clock`.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Validate and normalize creation input into a canonical message.
    ///
    /// `timing.created_at` is always the current clock instant; input has no
    /// say in it.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] on any hard-invalid input.
    pub fn create(&self, input: NewMessage) -> Result<Message, ValidationError> {
        let title = input
            .title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ValidationError::missing("title"))?
            .to_string();
        let text = input.text.ok_or_else(|| ValidationError::missing("text"))?;
        let kind = input.kind.ok_or_else(|| ValidationError::missing("kind"))?;

        let origin_input = input
            .origin
            .ok_or_else(|| ValidationError::missing("origin"))?;
        let system = origin_input.system.trim().to_string();
        if system.is_empty() {
            return Err(ValidationError::missing("origin.system"));
        }
        let origin = Origin {
            origin_type: origin_input.origin_type,
            system,
            id: origin_input
                .id
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
        };

        let level = match input.level {
            Some(code) => Severity::try_from(code).map_err(|_| ValidationError::UnknownEnum {
                field: "level".into(),
                value: code.to_string(),
            })?,
            None => Severity::Notice,
        };

        let now = self.clock.now_ms();
        let ref_key = match input.ref_key.as_deref().map(str::trim) {
            Some(r) if !r.is_empty() => r.to_string(),
            _ => self.autofill_ref(&origin, kind, &title, now),
        };

        let lifecycle_input = input.lifecycle.unwrap_or_default();
        if let Some(ts) = lifecycle_input.state_changed_at {
            validate_ts("lifecycle.stateChangedAt", ts)?;
        }
        let lifecycle = Lifecycle {
            state: lifecycle_input.state.unwrap_or(LifecycleState::Open),
            state_changed_at: lifecycle_input.state_changed_at,
            state_changed_by: trim_opt(lifecycle_input.state_changed_by),
        };

        let timing = self.build_timing(kind, input.timing.unwrap_or_default(), now)?;

        let details_input = input.details.unwrap_or_default();
        let details = Details {
            location: trim_opt(details_input.location),
            task: trim_opt(details_input.task),
            tools: normalize_list(details_input.tools.as_ref()),
            consumables: normalize_list(details_input.consumables.as_ref()),
            reason: trim_opt(details_input.reason),
        };

        let audience_input = input.audience.unwrap_or_default();
        let channels_input = audience_input.channels.unwrap_or_default();
        let audience = Audience {
            tags: normalize_list(audience_input.tags.as_ref()),
            channels: Channels {
                include: normalize_list(channels_input.include.as_ref()),
                exclude: normalize_list(channels_input.exclude.as_ref()),
            },
        };

        let progress_input = input.progress.unwrap_or_default();
        let progress = Progress {
            percentage: progress_input
                .percentage
                .map(truncate_percentage)
                .transpose()?,
            started_at: validate_ts_opt("progress.startedAt", progress_input.started_at)?,
            finished_at: validate_ts_opt("progress.finishedAt", progress_input.finished_at)?,
        };

        let dependencies = normalize_list(input.dependencies.as_ref());

        let metrics = input.metrics.unwrap_or_default();
        validate_metrics(&metrics)?;

        let actions = normalize_actions(input.actions.unwrap_or_default())?;

        let list_items = if kind == MsgKind::Shoppinglist {
            normalize_list_items(input.list_items.unwrap_or_default())?
        } else {
            if input.list_items.as_ref().is_some_and(|v| !v.is_empty()) {
                warn!(%ref_key, %kind, "dropping listItems on non-shoppinglist message");
            }
            Vec::new()
        };

        let message = Message {
            ref_key,
            title,
            text,
            level,
            kind,
            origin,
            lifecycle,
            timing,
            details,
            audience,
            progress,
            dependencies,
            metrics,
            attachments: input.attachments.unwrap_or_default(),
            actions,
            list_items,
        };
        validate_message(&message)?;
        Ok(message)
    }

    /// Apply a patch to an existing message.
    ///
    /// Immutable fields (`ref`, `kind`, `origin`, `timing.created_at`) are
    /// rejected unless the patch value normalizes to the existing value.
    /// When the result differs meaningfully and `stealth` is false,
    /// `timing.updated_at` is bumped to now. Stealth application is
    /// reserved for internal scheduler bookkeeping.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] on immutable-field violations or when
    /// the patched message fails revalidation.
    pub fn apply_patch(
        &self,
        existing: &Message,
        patch: &MessagePatch,
        stealth: bool,
    ) -> Result<PatchOutcome, ValidationError> {
        self.check_immutable(existing, patch)?;

        let now = self.clock.now_ms();
        let mut updated = existing.clone();

        match &patch.title {
            PatchField::Absent => {}
            PatchField::Remove => {
                return Err(ValidationError::invalid("title", "cannot remove a required field"));
            }
            PatchField::Set(title) => updated.title = title.trim().to_string(),
        }
        match &patch.text {
            PatchField::Absent => {}
            PatchField::Remove => {
                return Err(ValidationError::invalid("text", "cannot remove a required field"));
            }
            PatchField::Set(text) => updated.text = text.clone(),
        }
        match &patch.level {
            PatchField::Absent => {}
            PatchField::Remove => {
                return Err(ValidationError::invalid("level", "cannot remove a required field"));
            }
            PatchField::Set(code) => {
                updated.level =
                    Severity::try_from(*code).map_err(|_| ValidationError::UnknownEnum {
                        field: "level".into(),
                        value: code.to_string(),
                    })?;
            }
        }

        match &patch.lifecycle {
            PatchField::Absent => {}
            PatchField::Remove => {
                return Err(ValidationError::invalid(
                    "lifecycle",
                    "cannot remove a required block",
                ));
            }
            PatchField::Set(lp) => apply_lifecycle_patch(&mut updated.lifecycle, lp, now)?,
        }

        match &patch.timing {
            PatchField::Absent => {}
            PatchField::Remove => {
                return Err(ValidationError::invalid(
                    "timing",
                    "cannot remove a required block",
                ));
            }
            PatchField::Set(tp) => apply_timing_patch(&mut updated.timing, tp, updated.kind)?,
        }

        match &patch.details {
            PatchField::Absent => {}
            PatchField::Remove => updated.details = Details::default(),
            PatchField::Set(dp) => apply_details_patch(&mut updated.details, dp),
        }

        match &patch.audience {
            PatchField::Absent => {}
            PatchField::Remove => updated.audience = Audience::default(),
            PatchField::Set(ap) => apply_audience_patch(&mut updated.audience, ap),
        }

        match &patch.progress {
            PatchField::Absent => {}
            PatchField::Remove => updated.progress = Progress::default(),
            PatchField::Set(pp) => apply_progress_patch(&mut updated.progress, pp)?,
        }

        match &patch.dependencies {
            PatchField::Absent => {}
            PatchField::Remove => updated.dependencies.clear(),
            PatchField::Set(ap) => apply_string_array_patch(&mut updated.dependencies, ap),
        }

        match &patch.metrics {
            PatchField::Absent => {}
            PatchField::Remove => updated.metrics = MetricsMap::default(),
            PatchField::Set(mp) => apply_metrics_patch(&mut updated.metrics, mp)?,
        }

        match &patch.attachments {
            PatchField::Absent => {}
            PatchField::Remove => updated.attachments.clear(),
            PatchField::Set(list) => updated.attachments = list.clone(),
        }

        match &patch.actions {
            PatchField::Absent => {}
            PatchField::Remove => updated.actions.clear(),
            PatchField::Set(ap) => apply_actions_patch(&mut updated.actions, ap)?,
        }

        match &patch.list_items {
            PatchField::Absent => {}
            PatchField::Remove => updated.list_items.clear(),
            PatchField::Set(lp) => {
                if updated.kind == MsgKind::Shoppinglist {
                    apply_list_items_patch(&mut updated.list_items, lp)?;
                } else {
                    warn!(ref_key = %updated.ref_key, kind = %updated.kind,
                        "dropping listItems patch on non-shoppinglist message");
                }
            }
        }

        let changed = updated != *existing;
        if changed && !stealth {
            updated.timing.updated_at = Some(now);
        }
        validate_message(&updated)?;
        Ok(PatchOutcome {
            message: updated,
            changed,
        })
    }

    fn check_immutable(
        &self,
        existing: &Message,
        patch: &MessagePatch,
    ) -> Result<(), ValidationError> {
        if let Some(ref_key) = patch.ref_key.as_deref() {
            if ref_key.trim() != existing.ref_key {
                return Err(ValidationError::immutable("ref"));
            }
        }
        if let Some(kind) = patch.kind {
            if kind != existing.kind {
                return Err(ValidationError::immutable("kind"));
            }
        }
        if let Some(op) = &patch.origin {
            check_origin_patch(&existing.origin, op)?;
        }
        if let PatchField::Set(tp) = &patch.timing {
            if let Some(created_at) = tp.created_at {
                if created_at != existing.timing.created_at {
                    return Err(ValidationError::immutable("timing.createdAt"));
                }
            }
        }
        Ok(())
    }

    fn autofill_ref(&self, origin: &Origin, kind: MsgKind, title: &str, now: i64) -> String {
        let seed = format!(
            "{}|{}|{}",
            origin.id.as_deref().unwrap_or_default(),
            title,
            now
        );
        let digest = Sha256::digest(seed.as_bytes());
        let short: String = digest
            .iter()
            .take(4)
            .map(|b| format!("{b:02x}"))
            .collect();
        let system_slug = origin.system.to_lowercase().replace(char::is_whitespace, "-");
        let ref_key = format!("{}-{}-{}-{}", origin.origin_type, kind, system_slug, short);
        match origin.origin_type {
            OriginType::Manual => debug!(%ref_key, "auto-filled missing ref"),
            OriginType::Import => warn!(%ref_key, "import message without ref, auto-filled"),
            OriginType::Automation => {
                error!(%ref_key, "automation message without ref, auto-filled");
            }
        }
        ref_key
    }

    fn build_timing(
        &self,
        kind: MsgKind,
        input: TimingInput,
        now: i64,
    ) -> Result<Timing, ValidationError> {
        let mut timing = Timing::at(now);

        timing.due_at = validate_ts_opt("timing.dueAt", input.due_at)?;
        timing.start_at = validate_ts_opt("timing.startAt", input.start_at)?;
        timing.end_at = validate_ts_opt("timing.endAt", input.end_at)?;
        timing.notify_at = validate_ts_opt("timing.notifyAt", input.notify_at)?;
        timing.expires_at = validate_ts_opt("timing.expiresAt", input.expires_at)?;
        timing.remind_every = validate_interval_opt("timing.remindEvery", input.remind_every)?;
        timing.time_budget = validate_interval_opt("timing.timeBudget", input.time_budget)?;
        timing.cooldown = validate_interval_opt("timing.cooldown", input.cooldown)?;

        gate_timing_by_kind(&mut timing, kind);
        Ok(timing)
    }
}

// ---------------------------------------------------------------------------
// Patch application helpers
// ---------------------------------------------------------------------------

fn check_origin_patch(existing: &Origin, patch: &OriginPatch) -> Result<(), ValidationError> {
    if let Some(origin_type) = patch.origin_type {
        if origin_type != existing.origin_type {
            return Err(ValidationError::immutable("origin.type"));
        }
    }
    if let Some(system) = patch.system.as_deref() {
        if system.trim() != existing.system {
            return Err(ValidationError::immutable("origin.system"));
        }
    }
    match &patch.id {
        PatchField::Absent => {}
        PatchField::Remove => {
            if existing.id.is_some() {
                return Err(ValidationError::immutable("origin.id"));
            }
        }
        PatchField::Set(id) => {
            if existing.id.as_deref() != Some(id.trim()) {
                return Err(ValidationError::immutable("origin.id"));
            }
        }
    }
    Ok(())
}

fn apply_lifecycle_patch(
    lifecycle: &mut Lifecycle,
    patch: &LifecyclePatch,
    now: i64,
) -> Result<(), ValidationError> {
    let state_moved = patch.state.is_some_and(|s| s != lifecycle.state);
    if let Some(state) = patch.state {
        lifecycle.state = state;
    }
    match &patch.state_changed_at {
        PatchField::Absent => {
            if state_moved {
                lifecycle.state_changed_at = Some(now);
            }
        }
        PatchField::Remove => lifecycle.state_changed_at = None,
        PatchField::Set(ts) => {
            validate_ts("lifecycle.stateChangedAt", *ts)?;
            lifecycle.state_changed_at = Some(*ts);
        }
    }
    match &patch.state_changed_by {
        PatchField::Absent => {}
        PatchField::Remove => lifecycle.state_changed_by = None,
        PatchField::Set(by) => lifecycle.state_changed_by = trim_opt(Some(by.clone())),
    }
    Ok(())
}

fn apply_timing_patch(
    timing: &mut Timing,
    patch: &TimingPatch,
    kind: MsgKind,
) -> Result<(), ValidationError> {
    apply_ts_field(&mut timing.due_at, &patch.due_at, "timing.dueAt")?;
    apply_ts_field(&mut timing.start_at, &patch.start_at, "timing.startAt")?;
    apply_ts_field(&mut timing.end_at, &patch.end_at, "timing.endAt")?;
    apply_ts_field(&mut timing.notify_at, &patch.notify_at, "timing.notifyAt")?;
    apply_ts_field(&mut timing.expires_at, &patch.expires_at, "timing.expiresAt")?;
    apply_interval_field(&mut timing.remind_every, &patch.remind_every, "timing.remindEvery")?;
    apply_interval_field(&mut timing.time_budget, &patch.time_budget, "timing.timeBudget")?;
    apply_interval_field(&mut timing.cooldown, &patch.cooldown, "timing.cooldown")?;

    match &patch.notified_at {
        PatchField::Absent => {}
        PatchField::Remove => timing.notified_at = NotifiedAt::default(),
        PatchField::Set(np) => apply_notified_at_patch(&mut timing.notified_at, np)?,
    }

    gate_timing_by_kind(timing, kind);
    Ok(())
}

fn apply_notified_at_patch(
    notified: &mut NotifiedAt,
    patch: &NotifiedAtPatch,
) -> Result<(), ValidationError> {
    apply_ts_field(&mut notified.due, &patch.due, "timing.notifiedAt.due")?;
    apply_ts_field(&mut notified.updated, &patch.updated, "timing.notifiedAt.updated")?;
    Ok(())
}

fn apply_details_patch(details: &mut Details, patch: &DetailsPatch) {
    apply_text_field(&mut details.location, &patch.location);
    apply_text_field(&mut details.task, &patch.task);
    apply_list_field(&mut details.tools, &patch.tools);
    apply_list_field(&mut details.consumables, &patch.consumables);
    apply_text_field(&mut details.reason, &patch.reason);
}

fn apply_audience_patch(audience: &mut Audience, patch: &AudiencePatch) {
    match &patch.tags {
        PatchField::Absent => {}
        PatchField::Remove => audience.tags.clear(),
        PatchField::Set(input) => audience.tags = normalize_list(Some(input)),
    }
    match &patch.channels {
        PatchField::Absent => {}
        PatchField::Remove => audience.channels = Channels::default(),
        PatchField::Set(cp) => apply_channels_patch(&mut audience.channels, cp),
    }
}

fn apply_channels_patch(channels: &mut Channels, patch: &ChannelsPatch) {
    match &patch.include {
        PatchField::Absent => {}
        PatchField::Remove => channels.include.clear(),
        PatchField::Set(input) => channels.include = normalize_list(Some(input)),
    }
    match &patch.exclude {
        PatchField::Absent => {}
        PatchField::Remove => channels.exclude.clear(),
        PatchField::Set(input) => channels.exclude = normalize_list(Some(input)),
    }
}

fn apply_progress_patch(progress: &mut Progress, patch: &ProgressPatch) -> Result<(), ValidationError> {
    match &patch.percentage {
        PatchField::Absent => {}
        PatchField::Remove => progress.percentage = None,
        PatchField::Set(pct) => progress.percentage = Some(truncate_percentage(*pct)?),
    }
    apply_ts_field(&mut progress.started_at, &patch.started_at, "progress.startedAt")?;
    apply_ts_field(&mut progress.finished_at, &patch.finished_at, "progress.finishedAt")?;
    Ok(())
}

fn apply_string_array_patch(target: &mut Vec<String>, patch: &ArrayPatch<String>) {
    match patch {
        ArrayPatch::Replace(items) => {
            *target = normalize_items(items.iter().map(String::as_str));
        }
        ArrayPatch::Edit { set, delete } => {
            for item in set {
                let trimmed = item.trim();
                if !trimmed.is_empty() && !target.iter().any(|t| t == trimmed) {
                    target.push(trimmed.to_string());
                }
            }
            let remove: BTreeSet<&str> = delete.iter().map(|s| s.trim()).collect();
            target.retain(|item| !remove.contains(item.as_str()));
        }
    }
}

fn apply_metrics_patch(metrics: &mut MetricsMap, patch: &MetricsPatch) -> Result<(), ValidationError> {
    for (key, sample) in &patch.set {
        validate_metric(key, sample)?;
        metrics.0.insert(key.clone(), sample.clone());
    }
    for key in &patch.delete {
        metrics.0.remove(key);
    }
    Ok(())
}

fn apply_actions_patch(
    actions: &mut Vec<MessageAction>,
    patch: &IdArrayPatch<ActionInput, ActionPatch>,
) -> Result<(), ValidationError> {
    match patch {
        IdArrayPatch::Replace(inputs) => {
            *actions = normalize_actions(inputs.clone())?;
        }
        IdArrayPatch::Edit { set, delete } => {
            for (id, item_patch) in set {
                if let Some(existing) = actions.iter_mut().find(|a| a.id == *id) {
                    if let Some(action_type) = item_patch.action_type {
                        existing.action_type = action_type;
                    }
                    match &item_patch.payload {
                        PatchField::Absent => {}
                        PatchField::Remove => existing.payload = None,
                        PatchField::Set(payload) => existing.payload = Some(payload.clone()),
                    }
                } else {
                    let action_type = item_patch.action_type.ok_or_else(|| {
                        ValidationError::invalid(
                            "actions",
                            format!("inserting action '{id}' requires a type"),
                        )
                    })?;
                    actions.push(MessageAction {
                        action_type,
                        id: id.clone(),
                        payload: item_patch.payload.as_set().cloned(),
                    });
                }
            }
            let remove: BTreeSet<&str> = delete.iter().map(String::as_str).collect();
            actions.retain(|a| !remove.contains(a.id.as_str()));
        }
    }
    Ok(())
}

fn apply_list_items_patch(
    items: &mut Vec<ListItem>,
    patch: &IdArrayPatch<ListItem, ListItemPatch>,
) -> Result<(), ValidationError> {
    match patch {
        IdArrayPatch::Replace(list) => {
            let inputs = list
                .iter()
                .map(|item| ListItemInput {
                    id: Some(item.id.clone()),
                    name: item.name.clone(),
                    checked: item.checked,
                })
                .collect();
            *items = normalize_list_items(inputs)?;
        }
        IdArrayPatch::Edit { set, delete } => {
            for (id, item_patch) in set {
                if let Some(existing) = items.iter_mut().find(|i| i.id == *id) {
                    if let Some(name) = item_patch.name.as_deref() {
                        let trimmed = name.trim();
                        if trimmed.is_empty() {
                            return Err(ValidationError::invalid(
                                "listItems",
                                format!("item '{id}' name must not be empty"),
                            ));
                        }
                        existing.name = trimmed.to_string();
                    }
                    if let Some(checked) = item_patch.checked {
                        existing.checked = checked;
                    }
                } else {
                    let name = item_patch
                        .name
                        .as_deref()
                        .map(str::trim)
                        .filter(|n| !n.is_empty())
                        .ok_or_else(|| {
                            ValidationError::invalid(
                                "listItems",
                                format!("inserting item '{id}' requires a name"),
                            )
                        })?;
                    items.push(ListItem {
                        id: id.clone(),
                        name: name.to_string(),
                        checked: item_patch.checked.unwrap_or(false),
                    });
                }
            }
            let remove: BTreeSet<&str> = delete.iter().map(String::as_str).collect();
            items.retain(|i| !remove.contains(i.id.as_str()));
        }
    }
    Ok(())
}

fn apply_text_field(slot: &mut Option<String>, field: &PatchField<String>) {
    match field {
        PatchField::Absent => {}
        PatchField::Remove => *slot = None,
        PatchField::Set(value) => *slot = trim_opt(Some(value.clone())),
    }
}

fn apply_list_field(slot: &mut Vec<String>, field: &PatchField<StringsInput>) {
    match field {
        PatchField::Absent => {}
        PatchField::Remove => slot.clear(),
        PatchField::Set(input) => *slot = normalize_list(Some(input)),
    }
}

fn apply_ts_field(
    slot: &mut Option<i64>,
    field: &PatchField<i64>,
    name: &str,
) -> Result<(), ValidationError> {
    match field {
        PatchField::Absent => {}
        PatchField::Remove => *slot = None,
        PatchField::Set(ts) => {
            validate_ts(name, *ts)?;
            *slot = Some(*ts);
        }
    }
    Ok(())
}

fn apply_interval_field(
    slot: &mut Option<i64>,
    field: &PatchField<i64>,
    name: &str,
) -> Result<(), ValidationError> {
    match field {
        PatchField::Absent => {}
        PatchField::Remove => *slot = None,
        PatchField::Set(interval) => {
            *slot = validate_interval_opt(name, Some(*interval))?;
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Normalization & validation
// ---------------------------------------------------------------------------

fn trim_opt(value: Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn normalize_list(input: Option<&StringsInput>) -> Vec<String> {
    match input {
        Some(input) => {
            let items = input.raw_items();
            normalize_items(items.iter().map(String::as_str))
        }
        None => Vec::new(),
    }
}

fn normalize_items<'a, I: Iterator<Item = &'a str>>(items: I) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for item in items {
        let trimmed = item.trim();
        if !trimmed.is_empty() && !out.iter().any(|existing| existing == trimmed) {
            out.push(trimmed.to_string());
        }
    }
    out
}

fn validate_ts(field: &str, ms: i64) -> Result<(), ValidationError> {
    if is_plausible_ms(ms) {
        Ok(())
    } else {
        Err(ValidationError::ImplausibleTimestamp {
            field: field.to_string(),
            value: ms,
        })
    }
}

fn validate_ts_opt(field: &str, ms: Option<i64>) -> Result<Option<i64>, ValidationError> {
    if let Some(ms) = ms {
        validate_ts(field, ms)?;
    }
    Ok(ms)
}

fn validate_interval_opt(field: &str, ms: Option<i64>) -> Result<Option<i64>, ValidationError> {
    match ms {
        Some(ms) if ms <= 0 => Err(ValidationError::invalid(field, "interval must be positive")),
        other => Ok(other),
    }
}

fn truncate_percentage(pct: f64) -> Result<u8, ValidationError> {
    if !pct.is_finite() {
        return Err(ValidationError::invalid("progress.percentage", "not a number"));
    }
    let truncated = pct.trunc();
    if !(0.0..=100.0).contains(&truncated) {
        return Err(ValidationError::invalid(
            "progress.percentage",
            format!("{pct} outside 0..=100"),
        ));
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    Ok(truncated as u8)
}

fn gate_timing_by_kind(timing: &mut Timing, kind: MsgKind) {
    if kind != MsgKind::Task && timing.due_at.is_some() {
        warn!(%kind, "dropping dueAt on non-task message");
        timing.due_at = None;
    }
    if kind != MsgKind::Appointment {
        if timing.start_at.is_some() {
            warn!(%kind, "dropping startAt on non-appointment message");
            timing.start_at = None;
        }
        if timing.end_at.is_some() {
            warn!(%kind, "dropping endAt on non-appointment message");
            timing.end_at = None;
        }
    }
}

fn normalize_actions(inputs: Vec<ActionInput>) -> Result<Vec<MessageAction>, ValidationError> {
    let mut actions: Vec<MessageAction> = Vec::with_capacity(inputs.len());
    let mut seen: BTreeSet<String> = BTreeSet::new();
    for (index, input) in inputs.into_iter().enumerate() {
        let id = match input.id.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            Some(id) => id.to_string(),
            None => format!("{}-{}", input.action_type, index + 1),
        };
        if !seen.insert(id.clone()) {
            return Err(ValidationError::invalid(
                "actions",
                format!("duplicate action id '{id}'"),
            ));
        }
        actions.push(MessageAction {
            action_type: input.action_type,
            id,
            payload: input.payload,
        });
    }
    Ok(actions)
}

fn normalize_list_items(inputs: Vec<ListItemInput>) -> Result<Vec<ListItem>, ValidationError> {
    let mut items: Vec<ListItem> = Vec::with_capacity(inputs.len());
    let mut seen: BTreeSet<String> = BTreeSet::new();
    for (index, input) in inputs.into_iter().enumerate() {
        let name = input.name.trim().to_string();
        if name.is_empty() {
            return Err(ValidationError::invalid("listItems", "item name must not be empty"));
        }
        let id = match input.id.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            Some(id) => id.to_string(),
            None => format!("item-{}", index + 1),
        };
        if !seen.insert(id.clone()) {
            return Err(ValidationError::invalid(
                "listItems",
                format!("duplicate item id '{id}'"),
            ));
        }
        items.push(ListItem {
            id,
            name,
            checked: input.checked,
        });
    }
    Ok(items)
}

fn validate_metric(key: &str, sample: &MetricSample) -> Result<(), ValidationError> {
    if key.trim().is_empty() {
        return Err(ValidationError::invalid("metrics", "metric key must not be empty"));
    }
    match &sample.val {
        serde_json::Value::Null
        | serde_json::Value::Bool(_)
        | serde_json::Value::Number(_)
        | serde_json::Value::String(_) => {}
        _ => {
            return Err(ValidationError::invalid(
                "metrics",
                format!("metric '{key}' value must be a primitive"),
            ));
        }
    }
    validate_ts(&format!("metrics.{key}.ts"), sample.ts)
}

fn validate_metrics(metrics: &MetricsMap) -> Result<(), ValidationError> {
    for (key, sample) in &metrics.0 {
        validate_metric(key, sample)?;
    }
    Ok(())
}

/// Validate a fully-built message; shared by creation and patch paths.
fn validate_message(message: &Message) -> Result<(), ValidationError> {
    if message.ref_key.trim().is_empty() {
        return Err(ValidationError::missing("ref"));
    }
    if message.title.trim().is_empty() {
        return Err(ValidationError::missing("title"));
    }
    if message.origin.system.trim().is_empty() {
        return Err(ValidationError::missing("origin.system"));
    }
    validate_ts("timing.createdAt", message.timing.created_at)?;
    validate_ts_opt("timing.updatedAt", message.timing.updated_at)?;
    if let Some(pct) = message.progress.percentage {
        if pct > 100 {
            return Err(ValidationError::invalid(
                "progress.percentage",
                format!("{pct} outside 0..=100"),
            ));
        }
    }
    validate_metrics(&message.metrics)?;
    if message.kind != MsgKind::Shoppinglist && !message.list_items.is_empty() {
        return Err(ValidationError::invalid(
            "listItems",
            "only shoppinglist messages carry list items",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;

    fn factory() -> MessageFactory {
        MessageFactory::new(Arc::new(FixedClock::at_ms(1_700_000_000_000)))
    }

    fn origin() -> OriginInput {
        OriginInput {
            origin_type: OriginType::Manual,
            system: "ui".into(),
            id: None,
        }
    }

    #[test]
    fn create_fills_created_at_from_clock() {
        let msg = factory()
            .create(NewMessage::new("hello", MsgKind::Task, origin()))
            .unwrap();
        assert_eq!(msg.timing.created_at, 1_700_000_000_000);
        assert_eq!(msg.lifecycle.state, LifecycleState::Open);
    }

    #[test]
    fn create_rejects_empty_title() {
        let mut input = NewMessage::new("  ", MsgKind::Task, origin());
        input.title = Some("  ".into());
        let err = factory().create(input).unwrap_err();
        assert_eq!(err, ValidationError::missing("title"));
    }

    #[test]
    fn create_autofills_ref_deterministically_per_instant() {
        let f = factory();
        let mut input = NewMessage::new("hello", MsgKind::Task, origin());
        input.ref_key = None;
        let a = f.create(input.clone()).unwrap();
        let b = f.create(input).unwrap();
        assert_eq!(a.ref_key, b.ref_key);
        assert!(a.ref_key.starts_with("manual-task-ui-"));
    }

    #[test]
    fn create_normalizes_csv_lists() {
        let mut input = NewMessage::new("t", MsgKind::Task, origin());
        input.details = Some(DetailsInput {
            tools: Some(StringsInput::Csv("saw, hammer , saw,".into())),
            ..DetailsInput::default()
        });
        let msg = factory().create(input).unwrap();
        assert_eq!(msg.details.tools, vec!["saw".to_string(), "hammer".to_string()]);
    }

    #[test]
    fn create_drops_due_at_on_non_task() {
        let mut input = NewMessage::new("t", MsgKind::Status, origin());
        input.timing = Some(TimingInput {
            due_at: Some(1_700_000_100_000),
            ..TimingInput::default()
        });
        let msg = factory().create(input).unwrap();
        assert_eq!(msg.timing.due_at, None);
    }

    #[test]
    fn create_rejects_implausible_timestamp() {
        let mut input = NewMessage::new("t", MsgKind::Task, origin());
        input.timing = Some(TimingInput {
            due_at: Some(123),
            ..TimingInput::default()
        });
        let err = factory().create(input).unwrap_err();
        assert!(matches!(err, ValidationError::ImplausibleTimestamp { .. }));
    }

    #[test]
    fn create_assigns_action_ids() {
        let mut input = NewMessage::new("t", MsgKind::Task, origin());
        input.actions = Some(vec![
            ActionInput {
                action_type: crate::model::ActionType::Close,
                id: None,
                payload: None,
            },
            ActionInput {
                action_type: crate::model::ActionType::Snooze,
                id: Some("later".into()),
                payload: None,
            },
        ]);
        let msg = factory().create(input).unwrap();
        assert_eq!(msg.actions[0].id, "close-1");
        assert_eq!(msg.actions[1].id, "later");
    }

    #[test]
    fn patch_rejects_ref_change() {
        let f = factory();
        let msg = f
            .create(NewMessage::new("t", MsgKind::Task, origin()))
            .unwrap();
        let patch = MessagePatch {
            ref_key: Some("other".into()),
            ..MessagePatch::default()
        };
        assert_eq!(
            f.apply_patch(&msg, &patch, false).unwrap_err(),
            ValidationError::immutable("ref")
        );
    }

    #[test]
    fn patch_accepts_identical_ref_echo() {
        let f = factory();
        let msg = f
            .create(NewMessage::new("t", MsgKind::Task, origin()))
            .unwrap();
        let patch = MessagePatch {
            ref_key: Some(msg.ref_key.clone()),
            title: PatchField::Set("new title".into()),
            ..MessagePatch::default()
        };
        let outcome = f.apply_patch(&msg, &patch, false).unwrap();
        assert!(outcome.changed);
        assert_eq!(outcome.message.title, "new title");
    }

    #[test]
    fn noop_patch_leaves_updated_at_untouched() {
        let f = factory();
        let msg = f
            .create(NewMessage::new("same", MsgKind::Task, origin()))
            .unwrap();
        let patch = MessagePatch {
            title: PatchField::Set("same".into()),
            ..MessagePatch::default()
        };
        let outcome = f.apply_patch(&msg, &patch, false).unwrap();
        assert!(!outcome.changed);
        assert_eq!(outcome.message.timing.updated_at, None);
    }

    #[test]
    fn stealth_patch_does_not_bump_updated_at() {
        let f = factory();
        let msg = f
            .create(NewMessage::new("t", MsgKind::Task, origin()))
            .unwrap();
        let patch = MessagePatch {
            timing: PatchField::Set(TimingPatch {
                notify_at: PatchField::Set(1_700_000_500_000),
                ..TimingPatch::default()
            }),
            ..MessagePatch::default()
        };
        let outcome = f.apply_patch(&msg, &patch, true).unwrap();
        assert!(outcome.changed);
        assert_eq!(outcome.message.timing.updated_at, None);
        assert_eq!(outcome.message.timing.notify_at, Some(1_700_000_500_000));
    }

    #[test]
    fn patch_null_removes_nested_field() {
        let f = factory();
        let mut input = NewMessage::new("t", MsgKind::Task, origin());
        input.details = Some(DetailsInput {
            location: Some("garage".into()),
            ..DetailsInput::default()
        });
        let msg = f.create(input).unwrap();
        assert_eq!(msg.details.location.as_deref(), Some("garage"));

        let patch: MessagePatch =
            serde_json::from_str(r#"{"details": {"location": null}}"#).unwrap();
        let outcome = f.apply_patch(&msg, &patch, false).unwrap();
        assert!(outcome.changed);
        assert_eq!(outcome.message.details.location, None);
        assert_eq!(outcome.message.timing.updated_at, Some(1_700_000_000_000));
    }

    #[test]
    fn patch_metrics_set_and_delete() {
        let f = factory();
        let mut input = NewMessage::new("t", MsgKind::Status, origin());
        let mut metrics = MetricsMap::default();
        metrics.0.insert(
            "temp".into(),
            MetricSample {
                val: serde_json::json!(20),
                unit: "C".into(),
                ts: 1_700_000_000_000,
            },
        );
        input.metrics = Some(metrics);
        let msg = f.create(input).unwrap();

        let mut patch_metrics = MetricsPatch::default();
        patch_metrics.set.insert(
            "hum".into(),
            MetricSample {
                val: serde_json::json!(55),
                unit: "%".into(),
                ts: 1_700_000_000_000,
            },
        );
        patch_metrics.delete.push("temp".into());
        let patch = MessagePatch {
            metrics: PatchField::Set(patch_metrics),
            ..MessagePatch::default()
        };
        let outcome = f.apply_patch(&msg, &patch, false).unwrap();
        assert!(outcome.message.metrics.0.contains_key("hum"));
        assert!(!outcome.message.metrics.0.contains_key("temp"));
    }

    #[test]
    fn patch_rejects_metric_with_composite_value() {
        let f = factory();
        let msg = f
            .create(NewMessage::new("t", MsgKind::Status, origin()))
            .unwrap();
        let mut patch_metrics = MetricsPatch::default();
        patch_metrics.set.insert(
            "bad".into(),
            MetricSample {
                val: serde_json::json!({"nested": true}),
                unit: "".into(),
                ts: 1_700_000_000_000,
            },
        );
        let patch = MessagePatch {
            metrics: PatchField::Set(patch_metrics),
            ..MessagePatch::default()
        };
        assert!(f.apply_patch(&msg, &patch, false).is_err());
    }

    #[test]
    fn patch_state_change_stamps_state_changed_at() {
        let f = factory();
        let msg = f
            .create(NewMessage::new("t", MsgKind::Task, origin()))
            .unwrap();
        let patch = MessagePatch {
            lifecycle: PatchField::Set(LifecyclePatch {
                state: Some(LifecycleState::Closed),
                ..LifecyclePatch::default()
            }),
            ..MessagePatch::default()
        };
        let outcome = f.apply_patch(&msg, &patch, false).unwrap();
        assert_eq!(outcome.message.lifecycle.state, LifecycleState::Closed);
        assert_eq!(
            outcome.message.lifecycle.state_changed_at,
            Some(1_700_000_000_000)
        );
    }

    #[test]
    fn list_item_patch_checks_and_inserts() {
        let f = factory();
        let mut input = NewMessage::new("groceries", MsgKind::Shoppinglist, origin());
        input.list_items = Some(vec![ListItemInput {
            id: Some("apples".into()),
            name: "Apples".into(),
            checked: false,
        }]);
        let msg = f.create(input).unwrap();

        let patch: MessagePatch = serde_json::from_str(
            r#"{"listItems": {"set": {"apples": {"checked": true}, "pears": {"name": "Pears"}}}}"#,
        )
        .unwrap();
        let outcome = f.apply_patch(&msg, &patch, false).unwrap();
        let items = &outcome.message.list_items;
        assert_eq!(items.len(), 2);
        assert!(items.iter().any(|i| i.id == "apples" && i.checked));
        assert!(items.iter().any(|i| i.id == "pears" && i.name == "Pears"));
    }
}
