// SPDX-License-Identifier: MIT OR Apache-2.0
//! msghub-archive
//!
//! The per-ref append-only event log. Every message lifecycle event is
//! recorded as one JSON line in a weekly segment file derived from the
//! message's ref:
//!
//! - [`path`] — ref-to-path mapping (encoding, dot-splitting, byte
//!   bounding, week keys)
//! - [`diff`] — structural diff powering patch entries
//! - [`archive`] — the [`MsgArchive`](archive::MsgArchive) itself:
//!   per-ref batching, flush scheduling, weekly retention, and the
//!   native-storage probe

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// The archive engine.
pub mod archive;
/// Structural diff computation.
pub mod diff;
/// Ref-to-path mapping.
pub mod path;

pub use archive::{
    ARCHIVE_SCHEMA_VERSION, ArchiveConfig, ArchiveError, ArchiveEventKind, ArchiveMode,
    ArchiveStatus, MsgArchive, StorageStrategy,
};
pub use diff::{DiffResult, compute_diff};
