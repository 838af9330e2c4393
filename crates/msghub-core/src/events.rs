// SPDX-License-Identifier: MIT OR Apache-2.0
//! Lifecycle event vocabulary and the notification sink.
//!
//! The store emits one event per mutation; the notifier host implements
//! [`NotificationSink`] and fans the event out to plugins. Messages are
//! always delivered as a slice so the contract can grow batching without
//! breaking implementors.

use crate::model::Message;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A message lifecycle event, as seen by notifier plugins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleEvent {
    /// A message was created.
    Created,
    /// A message's content changed.
    Updated,
    /// A message was removed.
    Deleted,
    /// A message's notification instant arrived.
    Due,
    /// A message lapsed past its expiry.
    Expired,
}

impl LifecycleEvent {
    /// All lifecycle events.
    pub const ALL: [LifecycleEvent; 5] = [
        Self::Created,
        Self::Updated,
        Self::Deleted,
        Self::Due,
        Self::Expired,
    ];

    /// The wire string of this event.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
            Self::Due => "due",
            Self::Expired => "expired",
        }
    }
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LifecycleEvent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(Self::Created),
            "updated" => Ok(Self::Updated),
            "deleted" => Ok(Self::Deleted),
            "due" => Ok(Self::Due),
            "expired" => Ok(Self::Expired),
            other => Err(format!("unknown lifecycle event '{other}'")),
        }
    }
}

/// Receiver of lifecycle events emitted by the store.
///
/// Implementations must not panic across this boundary; the notifier host
/// isolates plugin faults, and the store treats dispatch as fire-and-forget.
pub trait NotificationSink: Send + Sync {
    /// Deliver `event` for the given messages (currently always one).
    fn dispatch(&self, event: LifecycleEvent, messages: &[Message]);
}

/// A sink that drops every event. Useful for tests and headless setups.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl NotificationSink for NoopSink {
    fn dispatch(&self, _event: LifecycleEvent, _messages: &[Message]) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_strings_roundtrip() {
        for event in LifecycleEvent::ALL {
            assert_eq!(event.as_str().parse::<LifecycleEvent>().unwrap(), event);
        }
        assert!("nonsense".parse::<LifecycleEvent>().is_err());
    }
}
