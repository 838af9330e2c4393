// SPDX-License-Identifier: MIT OR Apache-2.0
//! Enumeration surface for the controller boundary.
//!
//! The controller's `admin.constants.get` command serves this snapshot so
//! the admin surface can populate pickers without hardcoding the domain
//! vocabulary.

use crate::events::LifecycleEvent;
use crate::model::{ActionType, AttachmentType, LifecycleState, MsgKind, OriginType, Severity};
use serde::{Deserialize, Serialize};

/// Serializable snapshot of every domain enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConstantsSnapshot {
    /// Message kinds.
    pub kinds: Vec<MsgKind>,
    /// Lifecycle states.
    pub states: Vec<LifecycleState>,
    /// Severity codes.
    pub levels: Vec<i64>,
    /// Origin types.
    pub origin_types: Vec<OriginType>,
    /// Attachment type whitelist.
    pub attachment_types: Vec<AttachmentType>,
    /// Action type whitelist.
    pub action_types: Vec<ActionType>,
    /// Lifecycle event names.
    pub events: Vec<LifecycleEvent>,
}

impl ConstantsSnapshot {
    /// Build the current snapshot.
    #[must_use]
    pub fn current() -> Self {
        Self {
            kinds: MsgKind::ALL.to_vec(),
            states: LifecycleState::ALL.to_vec(),
            levels: Severity::ALL.iter().map(|s| s.code()).collect(),
            origin_types: OriginType::ALL.to_vec(),
            attachment_types: AttachmentType::ALL.to_vec(),
            action_types: ActionType::ALL.to_vec(),
            events: LifecycleEvent::ALL.to_vec(),
        }
    }
}

impl Default for ConstantsSnapshot {
    fn default() -> Self {
        Self::current()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_covers_every_enum() {
        let snapshot = ConstantsSnapshot::current();
        assert_eq!(snapshot.kinds.len(), 5);
        assert_eq!(snapshot.states.len(), 6);
        assert_eq!(snapshot.levels, vec![10, 20, 30, 40]);
        assert_eq!(snapshot.events.len(), 5);
    }
}
