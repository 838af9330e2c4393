// SPDX-License-Identifier: MIT OR Apache-2.0
//! The persistent rollup document.
//!
//! One day bucket per local calendar day a message was closed on,
//! `{total, byKind}`, pruned to the configured retention. The document is
//! versioned so future layouts can migrate.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Schema version written into the rollup file.
pub const ROLLUP_SCHEMA_VERSION: u32 = 1;

/// Closed-message counts for a single local day.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayBucket {
    /// Messages closed on this day.
    pub total: u64,
    /// Per-kind breakdown.
    #[serde(rename = "byKind", default)]
    pub by_kind: BTreeMap<String, u64>,
}

/// The rollup document as persisted in `stats-rollup.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollupDoc {
    /// Layout version.
    #[serde(rename = "schemaVersion")]
    pub schema_version: u32,
    /// Epoch ms of the most recent close ever recorded.
    #[serde(rename = "lastClosedAt", default)]
    pub last_closed_at: Option<i64>,
    /// Day buckets keyed by local `YYYY-MM-DD`.
    #[serde(default)]
    pub days: BTreeMap<String, DayBucket>,
}

impl Default for RollupDoc {
    fn default() -> Self {
        Self {
            schema_version: ROLLUP_SCHEMA_VERSION,
            last_closed_at: None,
            days: BTreeMap::new(),
        }
    }
}

impl RollupDoc {
    /// Record one closed message of `kind` on the given day.
    pub fn record(&mut self, day_key: &str, kind: &str, closed_at: i64) {
        let bucket = self.days.entry(day_key.to_string()).or_default();
        bucket.total += 1;
        *bucket.by_kind.entry(kind.to_string()).or_default() += 1;
        self.last_closed_at = Some(self.last_closed_at.map_or(closed_at, |t| t.max(closed_at)));
    }

    /// Drop buckets older than `cutoff_key` (exclusive). ISO day keys sort
    /// lexicographically, so a string comparison suffices.
    pub fn prune_before(&mut self, cutoff_key: &str) {
        self.days.retain(|key, _| key.as_str() >= cutoff_key);
    }

    /// Sum of `total` over day keys in `[from_key, to_key]`.
    #[must_use]
    pub fn sum_range(&self, from_key: &str, to_key: &str) -> u64 {
        self.days
            .range(from_key.to_string()..=to_key.to_string())
            .map(|(_, bucket)| bucket.total)
            .sum()
    }
}
