// SPDX-License-Identifier: MIT OR Apache-2.0
//! msghub-stats
//!
//! Reporting over the message list. Two halves:
//!
//! - live counters derived from the store's current list, grouped by
//!   kind, lifecycle state, level, and origin system, plus schedule
//!   windows over the domain "due" time
//! - the persistent daily rollup of closed messages, bucketed by local
//!   day and persisted through its own throttled document storage

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// The rollup document and its day buckets.
pub mod rollup;
/// Snapshot types and the stats engine.
pub mod stats;

pub use rollup::{DayBucket, ROLLUP_SCHEMA_VERSION, RollupDoc};
pub use stats::{
    CurrentStats, DoneStats, IoStats, MsgStats, ScheduleStats, ScheduleWindows, StatsMeta,
    StatsSnapshot, WindowBounds,
};
