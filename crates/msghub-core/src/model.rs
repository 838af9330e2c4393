// SPDX-License-Identifier: MIT OR Apache-2.0
//! The canonical message entity and its nested value types.
//!
//! All timestamps are epoch milliseconds. Serialized field names follow the
//! persisted document format (`ref`, `type`, camelCase timing keys), so the
//! on-disk shape stays stable across releases.

use crate::codec;
use serde::de::{self, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// Enumerations
// ---------------------------------------------------------------------------

/// Severity level of a message, integer-coded on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum Severity {
    /// Informational (10).
    Info,
    /// Notice (20).
    Notice,
    /// Warning (30).
    Warning,
    /// Alert (40).
    Alert,
}

impl Severity {
    /// All severity levels, ascending.
    pub const ALL: [Severity; 4] = [Self::Info, Self::Notice, Self::Warning, Self::Alert];

    /// The integer wire code of this level.
    #[must_use]
    pub fn code(self) -> i64 {
        match self {
            Self::Info => 10,
            Self::Notice => 20,
            Self::Warning => 30,
            Self::Alert => 40,
        }
    }
}

impl TryFrom<i64> for Severity {
    type Error = String;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            10 => Ok(Self::Info),
            20 => Ok(Self::Notice),
            30 => Ok(Self::Warning),
            40 => Ok(Self::Alert),
            other => Err(format!("unknown severity level {other}")),
        }
    }
}

impl From<Severity> for i64 {
    fn from(value: Severity) -> Self {
        value.code()
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Kind tag of a message. Immutable after creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MsgKind {
    /// An actionable task.
    Task,
    /// A calendar appointment.
    Appointment,
    /// A status report.
    Status,
    /// A shopping list.
    Shoppinglist,
    /// A free-form note.
    Note,
}

impl MsgKind {
    /// All message kinds.
    pub const ALL: [MsgKind; 5] = [
        Self::Task,
        Self::Appointment,
        Self::Status,
        Self::Shoppinglist,
        Self::Note,
    ];

    /// The wire string of this kind.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Task => "task",
            Self::Appointment => "appointment",
            Self::Status => "status",
            Self::Shoppinglist => "shoppinglist",
            Self::Note => "note",
        }
    }
}

impl fmt::Display for MsgKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provenance class of a message. Immutable after creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OriginType {
    /// Entered by a person through the admin surface.
    Manual,
    /// Imported from an external system.
    Import,
    /// Produced by an automation rule.
    Automation,
}

impl OriginType {
    /// All origin types.
    pub const ALL: [OriginType; 3] = [Self::Manual, Self::Import, Self::Automation];

    /// The wire string of this origin type.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Import => "import",
            Self::Automation => "automation",
        }
    }
}

impl fmt::Display for OriginType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    /// Newly created, awaiting attention.
    Open,
    /// Acknowledged by a person.
    Acked,
    /// Postponed; reminders resume later.
    Snoozed,
    /// Completed. Terminal.
    Closed,
    /// Removed by a person or plugin. Terminal.
    Deleted,
    /// Lapsed past its expiry time. Terminal.
    Expired,
}

impl LifecycleState {
    /// All lifecycle states.
    pub const ALL: [LifecycleState; 6] = [
        Self::Open,
        Self::Acked,
        Self::Snoozed,
        Self::Closed,
        Self::Deleted,
        Self::Expired,
    ];

    /// Terminal states: no further transitions are expected.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Deleted | Self::Expired)
    }

    /// Quasi-deleted states, excluded from schedule statistics.
    #[must_use]
    pub fn is_quasi_deleted(self) -> bool {
        matches!(self, Self::Deleted | Self::Expired)
    }

    /// The wire string of this state.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Acked => "acked",
            Self::Snoozed => "snoozed",
            Self::Closed => "closed",
            Self::Deleted => "deleted",
            Self::Expired => "expired",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Attachment payload classes accepted on a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentType {
    /// An inline or referenced image.
    Image,
    /// An icon identifier.
    Icon,
    /// A hyperlink.
    Url,
    /// A file path in the controller's file namespace.
    File,
}

impl AttachmentType {
    /// All attachment types.
    pub const ALL: [AttachmentType; 4] = [Self::Image, Self::Icon, Self::Url, Self::File];

    /// The wire string of this attachment type.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Icon => "icon",
            Self::Url => "url",
            Self::File => "file",
        }
    }
}

/// Action verbs a message can offer to engagement plugins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionType {
    /// Acknowledge the message.
    Ack,
    /// Snooze the message.
    Snooze,
    /// Close the message.
    Close,
    /// Delete the message.
    Delete,
    /// Reopen a previously terminal message.
    Reopen,
}

impl ActionType {
    /// All action types.
    pub const ALL: [ActionType; 5] = [
        Self::Ack,
        Self::Snooze,
        Self::Close,
        Self::Delete,
        Self::Reopen,
    ];

    /// The wire string of this action type.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ack => "ack",
            Self::Snooze => "snooze",
            Self::Close => "close",
            Self::Delete => "delete",
            Self::Reopen => "reopen",
        }
    }

    /// The lifecycle state this action transitions into.
    #[must_use]
    pub fn target_state(self) -> LifecycleState {
        match self {
            Self::Ack => LifecycleState::Acked,
            Self::Snooze => LifecycleState::Snoozed,
            Self::Close => LifecycleState::Closed,
            Self::Delete => LifecycleState::Deleted,
            Self::Reopen => LifecycleState::Open,
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Nested value types
// ---------------------------------------------------------------------------

/// Provenance of a message. Immutable after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Origin {
    /// Provenance class.
    #[serde(rename = "type")]
    pub origin_type: OriginType,
    /// Source system identifier (trimmed).
    pub system: String,
    /// Source-local identifier, if the system has one (trimmed).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// Lifecycle block of a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lifecycle {
    /// Current state.
    pub state: LifecycleState,
    /// Epoch ms of the last state change.
    #[serde(
        rename = "stateChangedAt",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub state_changed_at: Option<i64>,
    /// Actor that performed the last state change.
    #[serde(
        rename = "stateChangedBy",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub state_changed_by: Option<String>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self {
            state: LifecycleState::Open,
            state_changed_at: None,
            state_changed_by: None,
        }
    }
}

/// Per-trigger record of when notifications were last dispatched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifiedAt {
    /// Epoch ms of the last `due` dispatch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due: Option<i64>,
    /// Epoch ms of the last `updated` dispatch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<i64>,
}

impl NotifiedAt {
    /// Returns `true` when no trigger has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.due.is_none() && self.updated.is_none()
    }
}

/// Timing block of a message. All values are epoch milliseconds except the
/// interval fields (`remind_every`, `time_budget`, `cooldown`) which are
/// millisecond durations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timing {
    /// Creation instant. Immutable.
    pub created_at: i64,
    /// Last content change (not bumped by stealth updates).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
    /// When a task is due. Only meaningful for tasks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_at: Option<i64>,
    /// Appointment start. Only meaningful for appointments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_at: Option<i64>,
    /// Appointment end. Only meaningful for appointments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_at: Option<i64>,
    /// Next scheduled `due` notification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notify_at: Option<i64>,
    /// Expiry instant; past this the message transitions to `expired`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    /// Repeat interval for `due` notifications, ms.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remind_every: Option<i64>,
    /// Estimated effort, ms.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_budget: Option<i64>,
    /// Minimum spacing between repeated notifications, ms.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown: Option<i64>,
    /// Per-trigger dispatch record.
    #[serde(default, skip_serializing_if = "NotifiedAt::is_empty")]
    pub notified_at: NotifiedAt,
}

impl Timing {
    /// A timing block with only `created_at` set.
    #[must_use]
    pub fn at(created_at: i64) -> Self {
        Self {
            created_at,
            updated_at: None,
            due_at: None,
            start_at: None,
            end_at: None,
            notify_at: None,
            expires_at: None,
            remind_every: None,
            time_budget: None,
            cooldown: None,
            notified_at: NotifiedAt::default(),
        }
    }
}

/// Free-form descriptive details.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Details {
    /// Where the subject of the message is.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// What has to be done.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
    /// Tools needed, normalized from CSV-like input.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<String>,
    /// Consumables needed, normalized from CSV-like input.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub consumables: Vec<String>,
    /// Why the message exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Details {
    /// Returns `true` when every field is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.location.is_none()
            && self.task.is_none()
            && self.tools.is_empty()
            && self.consumables.is_empty()
            && self.reason.is_none()
    }
}

/// Channel routing preferences of a message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channels {
    /// Channels to include, trimmed and de-duplicated.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include: Vec<String>,
    /// Channels to exclude, trimmed and de-duplicated.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<String>,
}

impl Channels {
    /// Returns `true` when both lists are empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty()
    }
}

/// Audience targeting of a message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Audience {
    /// Audience tags, trimmed and de-duplicated.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Channel include/exclude lists.
    #[serde(default, skip_serializing_if = "Channels::is_empty")]
    pub channels: Channels,
}

impl Audience {
    /// Returns `true` when no targeting is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty() && self.channels.is_empty()
    }
}

/// Progress block of a message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    /// Completion percentage, truncated to an integer in `0..=100`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percentage: Option<u8>,
    /// When work started, epoch ms.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<i64>,
    /// When work finished, epoch ms.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<i64>,
}

impl Progress {
    /// Returns `true` when no progress has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.percentage.is_none() && self.started_at.is_none() && self.finished_at.is_none()
    }
}

/// A single metric sample attached to a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    /// The measured value; restricted to JSON primitives by validation.
    pub val: serde_json::Value,
    /// Unit label.
    pub unit: String,
    /// Sample timestamp, epoch ms.
    pub ts: i64,
}

/// An attachment on a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// Payload class, from the whitelist.
    #[serde(rename = "type")]
    pub attachment_type: AttachmentType,
    /// Payload value (URL, path, icon id, ...).
    pub value: String,
}

/// An action offered by a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageAction {
    /// Action verb, from the whitelist.
    #[serde(rename = "type")]
    pub action_type: ActionType,
    /// Unique id within the message; auto-assigned when missing.
    pub id: String,
    /// Opaque payload handed to the executing plugin.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

/// A single item of a shopping list message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListItem {
    /// Unique id within the list.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Whether the item has been checked off.
    #[serde(default)]
    pub checked: bool,
}

// ---------------------------------------------------------------------------
// MetricsMap
// ---------------------------------------------------------------------------

/// Ordered metric map that serializes as a tagged `Map` record.
///
/// The wire form is `{"__msghubType": "Map", "entries": [[key, sample], …]}`
/// so that readers can tell a Map from a plain object. Deserialization also
/// accepts a plain object for lenient ingest input; the tagged form is what
/// persistence always writes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsMap(pub BTreeMap<String, MetricSample>);

impl MetricsMap {
    /// Returns `true` when the map has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl Serialize for MetricsMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry(codec::MAP_TYPE_KEY, codec::MAP_TYPE_TAG)?;
        let entries: Vec<(&String, &MetricSample)> = self.0.iter().collect();
        map.serialize_entry("entries", &entries)?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for MetricsMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct MetricsMapVisitor;

        impl<'de> Visitor<'de> for MetricsMapVisitor {
            type Value = MetricsMap;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a tagged Map record or a plain object of metric samples")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut plain: BTreeMap<String, MetricSample> = BTreeMap::new();
                let mut tagged_entries: Option<Vec<(String, MetricSample)>> = None;
                let mut saw_marker = false;

                while let Some(key) = access.next_key::<String>()? {
                    if key == codec::MAP_TYPE_KEY {
                        let tag: String = access.next_value()?;
                        if tag != codec::MAP_TYPE_TAG {
                            return Err(de::Error::custom(format!(
                                "unexpected {} tag '{tag}'",
                                codec::MAP_TYPE_KEY
                            )));
                        }
                        saw_marker = true;
                    } else if key == "entries" {
                        tagged_entries = Some(access.next_value()?);
                    } else {
                        plain.insert(key, access.next_value()?);
                    }
                }

                if saw_marker {
                    let entries = tagged_entries.ok_or_else(|| {
                        de::Error::custom("tagged Map record is missing 'entries'")
                    })?;
                    return Ok(MetricsMap(entries.into_iter().collect()));
                }
                Ok(MetricsMap(plain))
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                // Bare entry list, as produced by some ingest plugins.
                let mut map = BTreeMap::new();
                while let Some((key, sample)) = access.next_element::<(String, MetricSample)>()? {
                    map.insert(key, sample);
                }
                Ok(MetricsMap(map))
            }
        }

        deserializer.deserialize_any(MetricsMapVisitor)
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// The canonical message entity.
///
/// Produced exclusively by the factory; consumers treat instances as
/// immutable snapshots and go through the store for changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique identity, URL-encoded to a filesystem-safe form. Immutable.
    #[serde(rename = "ref")]
    pub ref_key: String,
    /// Short human-readable title. Required, non-empty.
    pub title: String,
    /// Body text. Required (may be empty).
    pub text: String,
    /// Severity level.
    pub level: Severity,
    /// Kind tag. Immutable.
    pub kind: MsgKind,
    /// Provenance. Immutable.
    pub origin: Origin,
    /// Lifecycle block.
    #[serde(default)]
    pub lifecycle: Lifecycle,
    /// Timing block.
    pub timing: Timing,
    /// Descriptive details.
    #[serde(default, skip_serializing_if = "Details::is_empty")]
    pub details: Details,
    /// Audience targeting.
    #[serde(default, skip_serializing_if = "Audience::is_empty")]
    pub audience: Audience,
    /// Progress block.
    #[serde(default, skip_serializing_if = "Progress::is_empty")]
    pub progress: Progress,
    /// Refs of messages this one depends on; unique, trimmed.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
    /// Attached metric samples. Always a Map end-to-end.
    #[serde(default, skip_serializing_if = "MetricsMap::is_empty")]
    pub metrics: MetricsMap,
    /// Attachments.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    /// Offered actions.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<MessageAction>,
    /// Shopping-list items. Only for `shoppinglist` messages.
    #[serde(
        rename = "listItems",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub list_items: Vec<ListItem>,
}

impl Message {
    /// The message's current lifecycle state.
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state
    }

    /// The domain "due" instant used by schedule statistics.
    ///
    /// Appointments prefer `start_at` over `due_at`; every other kind
    /// prefers `due_at` over `start_at`.
    #[must_use]
    pub fn domain_due_ms(&self) -> Option<i64> {
        match self.kind {
            MsgKind::Appointment => self.timing.start_at.or(self.timing.due_at),
            _ => self.timing.due_at.or(self.timing.start_at),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_roundtrips_through_code() {
        for level in Severity::ALL {
            assert_eq!(Severity::try_from(level.code()).unwrap(), level);
        }
        assert!(Severity::try_from(15).is_err());
    }

    #[test]
    fn severity_serializes_as_integer() {
        let json = serde_json::to_string(&Severity::Notice).unwrap();
        assert_eq!(json, "20");
        let back: Severity = serde_json::from_str("30").unwrap();
        assert_eq!(back, Severity::Warning);
    }

    #[test]
    fn terminal_and_quasi_deleted_sets() {
        assert!(LifecycleState::Closed.is_terminal());
        assert!(!LifecycleState::Closed.is_quasi_deleted());
        assert!(LifecycleState::Expired.is_quasi_deleted());
        assert!(!LifecycleState::Snoozed.is_terminal());
    }

    #[test]
    fn metrics_map_serializes_tagged() {
        let mut map = BTreeMap::new();
        map.insert(
            "temp".to_string(),
            MetricSample {
                val: serde_json::json!(21.7),
                unit: "C".to_string(),
                ts: 1_700_000_000_000,
            },
        );
        let value = serde_json::to_value(MetricsMap(map)).unwrap();
        assert_eq!(value[codec::MAP_TYPE_KEY], codec::MAP_TYPE_TAG);
        assert_eq!(value["entries"][0][0], "temp");
    }

    #[test]
    fn metrics_map_accepts_plain_object() {
        let parsed: MetricsMap =
            serde_json::from_str(r#"{"temp":{"val":1,"unit":"C","ts":1700000000000}}"#).unwrap();
        assert_eq!(parsed.len(), 1);
        assert!(parsed.0.contains_key("temp"));
    }

    #[test]
    fn metrics_map_roundtrip() {
        let mut map = BTreeMap::new();
        map.insert(
            "hum".to_string(),
            MetricSample {
                val: serde_json::json!(55),
                unit: "%".to_string(),
                ts: 1_700_000_000_000,
            },
        );
        let original = MetricsMap(map);
        let json = serde_json::to_string(&original).unwrap();
        let back: MetricsMap = serde_json::from_str(&json).unwrap();
        assert_eq!(back, original);
    }

    #[test]
    fn domain_due_prefers_start_for_appointments() {
        let mut timing = Timing::at(1_700_000_000_000);
        timing.due_at = Some(10);
        timing.start_at = Some(20);
        let mut msg = Message {
            ref_key: "a".into(),
            title: "t".into(),
            text: String::new(),
            level: Severity::Notice,
            kind: MsgKind::Appointment,
            origin: Origin {
                origin_type: OriginType::Manual,
                system: "ui".into(),
                id: None,
            },
            lifecycle: Lifecycle::default(),
            timing,
            details: Details::default(),
            audience: Audience::default(),
            progress: Progress::default(),
            dependencies: vec![],
            metrics: MetricsMap::default(),
            attachments: vec![],
            actions: vec![],
            list_items: vec![],
        };
        assert_eq!(msg.domain_due_ms(), Some(20));
        msg.kind = MsgKind::Task;
        assert_eq!(msg.domain_due_ms(), Some(10));
    }
}
