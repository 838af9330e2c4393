// SPDX-License-Identifier: MIT OR Apache-2.0
//! Typed host errors.

use thiserror::Error;

/// Errors surfaced by the plugin hosts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    /// An event name from the control surface is not in the enumerated
    /// set.
    #[error("unknown lifecycle event '{name}'")]
    UnknownEvent {
        /// The rejected name.
        name: String,
    },

    /// A plugin's `start` callback failed during registration.
    #[error("plugin '{id}' failed to start: {message}")]
    StartFailed {
        /// The plugin id.
        id: String,
        /// Stringified cause.
        message: String,
    },

    /// The notifier host has not been connected to the API builder yet.
    #[error("host is not connected to the hub api")]
    NotConnected,
}
