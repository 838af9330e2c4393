// SPDX-License-Identifier: MIT OR Apache-2.0
//! Plugin logging facade.
//!
//! Plugins log plain strings through a prefix-bound logger; the prefix
//! carries the plugin id so host logs stay attributable. The `silly`
//! level of the controller ecosystem maps to `trace`.

use tracing::{debug, error, info, trace, warn};

/// A prefix-bound string logger handed to plugins.
#[derive(Debug, Clone)]
pub struct PluginLog {
    prefix: String,
}

impl PluginLog {
    /// A logger whose lines carry `prefix` (usually the plugin id).
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// The bound prefix.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Finest-grained output; maps to `trace`.
    pub fn silly(&self, message: &str) {
        trace!(target: "msghub.plugin", plugin = %self.prefix, "{message}");
    }

    /// Debug output.
    pub fn debug(&self, message: &str) {
        debug!(target: "msghub.plugin", plugin = %self.prefix, "{message}");
    }

    /// Informational output.
    pub fn info(&self, message: &str) {
        info!(target: "msghub.plugin", plugin = %self.prefix, "{message}");
    }

    /// Warning output.
    pub fn warn(&self, message: &str) {
        warn!(target: "msghub.plugin", plugin = %self.prefix, "{message}");
    }

    /// Error output.
    pub fn error(&self, message: &str) {
        error!(target: "msghub.plugin", plugin = %self.prefix, "{message}");
    }
}
