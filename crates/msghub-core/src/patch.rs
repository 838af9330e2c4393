// SPDX-License-Identifier: MIT OR Apache-2.0
//! Null-as-remove patch types.
//!
//! A patch distinguishes three states per field: absent (keep), `null`
//! (remove), and a value (set). [`PatchField`] models that as a sum so the
//! distinction survives typed deserialization — `Option` alone cannot tell
//! "missing" from "null".

use crate::model::{ActionType, Attachment, ListItem, MetricSample, MsgKind, OriginType};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// PatchField
// ---------------------------------------------------------------------------

/// One patchable position: keep, remove, or set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum PatchField<T> {
    /// Field not present in the patch; keep the existing value.
    #[default]
    Absent,
    /// Field present as `null`; remove the existing value.
    Remove,
    /// Field present with a value; set it.
    Set(T),
}

impl<T> PatchField<T> {
    /// Returns `true` for [`PatchField::Absent`].
    #[must_use]
    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }

    /// Returns the set value, if any.
    #[must_use]
    pub fn as_set(&self) -> Option<&T> {
        match self {
            Self::Set(value) => Some(value),
            _ => None,
        }
    }

    /// Apply this field onto an `Option` slot: `Absent` keeps, `Remove`
    /// clears, `Set` replaces.
    pub fn apply_to(self, slot: &mut Option<T>) {
        match self {
            Self::Absent => {}
            Self::Remove => *slot = None,
            Self::Set(value) => *slot = Some(value),
        }
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for PatchField<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match Option::<T>::deserialize(deserializer)? {
            Some(value) => Self::Set(value),
            None => Self::Remove,
        })
    }
}

impl<T: Serialize> Serialize for PatchField<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            // Absent fields are skipped at the struct level; an Absent that
            // reaches here degrades to null.
            Self::Absent | Self::Remove => serializer.serialize_none(),
            Self::Set(value) => value.serialize(serializer),
        }
    }
}

// ---------------------------------------------------------------------------
// Lenient inputs
// ---------------------------------------------------------------------------

/// CSV-like string-list input: either `"a, b, c"` or `["a", "b", "c"]`.
///
/// Normalization (trim, drop empties, de-duplicate) happens in the factory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StringsInput {
    /// Comma-separated single string.
    Csv(String),
    /// Explicit list.
    List(Vec<String>),
}

impl StringsInput {
    /// Split into raw (untrimmed) items.
    #[must_use]
    pub fn raw_items(&self) -> Vec<String> {
        match self {
            Self::Csv(csv) => csv.split(',').map(str::to_string).collect(),
            Self::List(items) => items.clone(),
        }
    }
}

/// Action input where the id may be omitted (auto-assigned by the factory).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionInput {
    /// Action verb.
    #[serde(rename = "type")]
    pub action_type: ActionType,
    /// Optional explicit id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Opaque payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

// ---------------------------------------------------------------------------
// Array patches
// ---------------------------------------------------------------------------

/// Patch for an array of primitives: wholesale replacement or set/delete
/// edits. Reordering alone is not expressible and not a change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArrayPatch<T> {
    /// Replace the whole array.
    Replace(Vec<T>),
    /// Add and remove individual values.
    Edit {
        /// Values to add (ignored when already present).
        #[serde(default)]
        set: Vec<T>,
        /// Values to remove.
        #[serde(default)]
        delete: Vec<T>,
    },
}

/// Patch for an array of id-keyed objects: wholesale replacement or
/// per-id set/delete edits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IdArrayPatch<T, P> {
    /// Replace the whole array.
    Replace(Vec<T>),
    /// Merge patches into existing items (or insert) and delete by id.
    Edit {
        /// Per-id item patches; unknown ids insert.
        #[serde(default = "BTreeMap::new")]
        set: BTreeMap<String, P>,
        /// Ids to delete.
        #[serde(default)]
        delete: Vec<String>,
    },
}

/// Patch for the metrics map: set entries by key, delete by key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsPatch {
    /// Entries to insert or overwrite.
    #[serde(default)]
    pub set: BTreeMap<String, MetricSample>,
    /// Keys to delete.
    #[serde(default)]
    pub delete: Vec<String>,
}

// ---------------------------------------------------------------------------
// Item patches
// ---------------------------------------------------------------------------

/// Patch for a single shopping-list item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListItemPatch {
    /// New display name. Required when the id inserts a new item.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// New checked state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checked: Option<bool>,
}

/// Patch for a single message action.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionPatch {
    /// New action verb. Required when the id inserts a new action.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub action_type: Option<ActionType>,
    /// Payload change.
    #[serde(default, skip_serializing_if = "PatchField::is_absent")]
    pub payload: PatchField<serde_json::Value>,
}

// ---------------------------------------------------------------------------
// Nested block patches
// ---------------------------------------------------------------------------

/// Patch for the origin block. Origin is immutable; a present patch must
/// normalize to the existing value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OriginPatch {
    /// Provenance class.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub origin_type: Option<OriginType>,
    /// Source system (trimmed before comparison).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    /// Source-local id (trimmed before comparison).
    #[serde(default, skip_serializing_if = "PatchField::is_absent")]
    pub id: PatchField<String>,
}

/// Patch for the lifecycle block (shallow merge).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecyclePatch {
    /// New state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<crate::model::LifecycleState>,
    /// Explicit state-change instant; defaults to now when the state moves.
    #[serde(default, skip_serializing_if = "PatchField::is_absent")]
    pub state_changed_at: PatchField<i64>,
    /// Actor performing the change.
    #[serde(default, skip_serializing_if = "PatchField::is_absent")]
    pub state_changed_by: PatchField<String>,
}

/// Patch for the per-trigger notification record (shallow merge).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotifiedAtPatch {
    /// Last `due` dispatch instant.
    #[serde(default, skip_serializing_if = "PatchField::is_absent")]
    pub due: PatchField<i64>,
    /// Last `updated` dispatch instant.
    #[serde(default, skip_serializing_if = "PatchField::is_absent")]
    pub updated: PatchField<i64>,
}

/// Patch for the timing block (shallow merge). `created_at` is immutable;
/// a present value must equal the existing one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimingPatch {
    /// Immutable; accepted only when identical.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
    /// Task due instant.
    #[serde(default, skip_serializing_if = "PatchField::is_absent")]
    pub due_at: PatchField<i64>,
    /// Appointment start.
    #[serde(default, skip_serializing_if = "PatchField::is_absent")]
    pub start_at: PatchField<i64>,
    /// Appointment end.
    #[serde(default, skip_serializing_if = "PatchField::is_absent")]
    pub end_at: PatchField<i64>,
    /// Next `due` notification instant.
    #[serde(default, skip_serializing_if = "PatchField::is_absent")]
    pub notify_at: PatchField<i64>,
    /// Expiry instant.
    #[serde(default, skip_serializing_if = "PatchField::is_absent")]
    pub expires_at: PatchField<i64>,
    /// Reminder repeat interval, ms.
    #[serde(default, skip_serializing_if = "PatchField::is_absent")]
    pub remind_every: PatchField<i64>,
    /// Effort estimate, ms.
    #[serde(default, skip_serializing_if = "PatchField::is_absent")]
    pub time_budget: PatchField<i64>,
    /// Notification cooldown, ms.
    #[serde(default, skip_serializing_if = "PatchField::is_absent")]
    pub cooldown: PatchField<i64>,
    /// Dispatch record changes.
    #[serde(default, skip_serializing_if = "PatchField::is_absent")]
    pub notified_at: PatchField<NotifiedAtPatch>,
}

/// Patch for the details block (shallow merge; list fields accept CSV).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetailsPatch {
    /// Location change.
    #[serde(default, skip_serializing_if = "PatchField::is_absent")]
    pub location: PatchField<String>,
    /// Task description change.
    #[serde(default, skip_serializing_if = "PatchField::is_absent")]
    pub task: PatchField<String>,
    /// Tools list change.
    #[serde(default, skip_serializing_if = "PatchField::is_absent")]
    pub tools: PatchField<StringsInput>,
    /// Consumables list change.
    #[serde(default, skip_serializing_if = "PatchField::is_absent")]
    pub consumables: PatchField<StringsInput>,
    /// Reason change.
    #[serde(default, skip_serializing_if = "PatchField::is_absent")]
    pub reason: PatchField<String>,
}

/// Patch for the channel lists (shallow merge).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelsPatch {
    /// Include-list change.
    #[serde(default, skip_serializing_if = "PatchField::is_absent")]
    pub include: PatchField<StringsInput>,
    /// Exclude-list change.
    #[serde(default, skip_serializing_if = "PatchField::is_absent")]
    pub exclude: PatchField<StringsInput>,
}

/// Patch for the audience block (shallow merge).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AudiencePatch {
    /// Tag-list change.
    #[serde(default, skip_serializing_if = "PatchField::is_absent")]
    pub tags: PatchField<StringsInput>,
    /// Channel-list changes.
    #[serde(default, skip_serializing_if = "PatchField::is_absent")]
    pub channels: PatchField<ChannelsPatch>,
}

/// Patch for the progress block (shallow merge). Percentage input accepts
/// fractions and is truncated to an integer by the factory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressPatch {
    /// Completion percentage.
    #[serde(default, skip_serializing_if = "PatchField::is_absent")]
    pub percentage: PatchField<f64>,
    /// Work start instant.
    #[serde(default, skip_serializing_if = "PatchField::is_absent")]
    pub started_at: PatchField<i64>,
    /// Work finish instant.
    #[serde(default, skip_serializing_if = "PatchField::is_absent")]
    pub finished_at: PatchField<i64>,
}

// ---------------------------------------------------------------------------
// MessagePatch
// ---------------------------------------------------------------------------

/// A patch over a whole message.
///
/// Immutable positions (`ref`, `kind`, `origin`, `timing.created_at`) are
/// plain `Option`s: when present they are only accepted if they normalize
/// to the existing value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessagePatch {
    /// Identity echo; must match the target message.
    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub ref_key: Option<String>,
    /// Title change. Removal is rejected (title is required).
    #[serde(default, skip_serializing_if = "PatchField::is_absent")]
    pub title: PatchField<String>,
    /// Text change. Removal is rejected (text is required).
    #[serde(default, skip_serializing_if = "PatchField::is_absent")]
    pub text: PatchField<String>,
    /// Severity change (integer code).
    #[serde(default, skip_serializing_if = "PatchField::is_absent")]
    pub level: PatchField<i64>,
    /// Kind echo; must match (kind is immutable).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<MsgKind>,
    /// Origin echo; must normalize to the existing origin.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<OriginPatch>,
    /// Lifecycle changes.
    #[serde(default, skip_serializing_if = "PatchField::is_absent")]
    pub lifecycle: PatchField<LifecyclePatch>,
    /// Timing changes.
    #[serde(default, skip_serializing_if = "PatchField::is_absent")]
    pub timing: PatchField<TimingPatch>,
    /// Details changes.
    #[serde(default, skip_serializing_if = "PatchField::is_absent")]
    pub details: PatchField<DetailsPatch>,
    /// Audience changes.
    #[serde(default, skip_serializing_if = "PatchField::is_absent")]
    pub audience: PatchField<AudiencePatch>,
    /// Progress changes.
    #[serde(default, skip_serializing_if = "PatchField::is_absent")]
    pub progress: PatchField<ProgressPatch>,
    /// Dependency list change.
    #[serde(default, skip_serializing_if = "PatchField::is_absent")]
    pub dependencies: PatchField<ArrayPatch<String>>,
    /// Metric map change.
    #[serde(default, skip_serializing_if = "PatchField::is_absent")]
    pub metrics: PatchField<MetricsPatch>,
    /// Attachment list change (wholesale only; attachments have no id).
    #[serde(default, skip_serializing_if = "PatchField::is_absent")]
    pub attachments: PatchField<Vec<Attachment>>,
    /// Action list change.
    #[serde(default, skip_serializing_if = "PatchField::is_absent")]
    pub actions: PatchField<IdArrayPatch<ActionInput, ActionPatch>>,
    /// Shopping-list item change.
    #[serde(
        rename = "listItems",
        default,
        skip_serializing_if = "PatchField::is_absent"
    )]
    pub list_items: PatchField<IdArrayPatch<ListItem, ListItemPatch>>,
}

impl MessagePatch {
    /// Returns `true` when the patch carries no fields at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_field_distinguishes_null_from_missing() {
        #[derive(Debug, Deserialize)]
        struct Probe {
            #[serde(default)]
            a: PatchField<i64>,
            #[serde(default)]
            b: PatchField<i64>,
            #[serde(default)]
            c: PatchField<i64>,
        }

        let probe: Probe = serde_json::from_str(r#"{"a": null, "b": 7}"#).unwrap();
        assert_eq!(probe.a, PatchField::Remove);
        assert_eq!(probe.b, PatchField::Set(7));
        assert_eq!(probe.c, PatchField::Absent);
    }

    #[test]
    fn array_patch_parses_both_shapes() {
        let replace: ArrayPatch<String> = serde_json::from_str(r#"["x", "y"]"#).unwrap();
        assert!(matches!(replace, ArrayPatch::Replace(ref v) if v.len() == 2));

        let edit: ArrayPatch<String> =
            serde_json::from_str(r#"{"set": ["z"], "delete": ["x"]}"#).unwrap();
        match edit {
            ArrayPatch::Edit { set, delete } => {
                assert_eq!(set, vec!["z".to_string()]);
                assert_eq!(delete, vec!["x".to_string()]);
            }
            ArrayPatch::Replace(_) => panic!("expected edit"),
        }
    }

    #[test]
    fn id_array_patch_parses_set_map() {
        let patch: IdArrayPatch<ListItem, ListItemPatch> =
            serde_json::from_str(r#"{"set": {"i1": {"checked": true}}, "delete": ["i2"]}"#)
                .unwrap();
        match patch {
            IdArrayPatch::Edit { set, delete } => {
                assert_eq!(set.get("i1").unwrap().checked, Some(true));
                assert_eq!(delete, vec!["i2".to_string()]);
            }
            IdArrayPatch::Replace(_) => panic!("expected edit"),
        }
    }

    #[test]
    fn strings_input_accepts_csv_and_list() {
        let csv: StringsInput = serde_json::from_str(r#""a, b , c""#).unwrap();
        assert_eq!(csv.raw_items().len(), 3);
        let list: StringsInput = serde_json::from_str(r#"["a", "b"]"#).unwrap();
        assert_eq!(list.raw_items(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn empty_patch_detected() {
        let patch: MessagePatch = serde_json::from_str("{}").unwrap();
        assert!(patch.is_empty());
        let patch: MessagePatch = serde_json::from_str(r#"{"title": "t"}"#).unwrap();
        assert!(!patch.is_empty());
    }
}
