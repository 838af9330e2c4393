// SPDX-License-Identifier: MIT OR Apache-2.0
//! Typed validation errors surfaced by the factory.

use thiserror::Error;

/// Errors produced while validating or normalizing a message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A required field is missing or empty after normalization.
    #[error("missing required field '{field}'")]
    MissingField {
        /// Dot-separated field path.
        field: String,
    },

    /// A field value is outside its allowed domain.
    #[error("invalid value for '{field}': {reason}")]
    InvalidField {
        /// Dot-separated field path.
        field: String,
        /// Human-readable rejection reason.
        reason: String,
    },

    /// An enumeration field carries an unknown value.
    #[error("unknown value '{value}' for '{field}'")]
    UnknownEnum {
        /// Dot-separated field path.
        field: String,
        /// The rejected value.
        value: String,
    },

    /// A patch attempted to change an immutable field.
    #[error("field '{field}' is immutable")]
    ImmutableField {
        /// Dot-separated field path.
        field: String,
    },

    /// A timestamp falls outside the plausible window (years 2000..2100).
    #[error("implausible timestamp for '{field}': {value}")]
    ImplausibleTimestamp {
        /// Dot-separated field path.
        field: String,
        /// The rejected epoch-ms value.
        value: i64,
    },
}

impl ValidationError {
    /// Missing-field convenience constructor.
    #[must_use]
    pub fn missing(field: &str) -> Self {
        Self::MissingField {
            field: field.to_string(),
        }
    }

    /// Invalid-field convenience constructor.
    #[must_use]
    pub fn invalid(field: &str, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    /// Immutable-field convenience constructor.
    #[must_use]
    pub fn immutable(field: &str) -> Self {
        Self::ImmutableField {
            field: field.to_string(),
        }
    }
}
