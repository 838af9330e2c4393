// SPDX-License-Identifier: MIT OR Apache-2.0
//! Snapshot types and the stats engine.
//!
//! Schedule windows are computed on the local wall clock supplied by the
//! injected clock. The domain "due" time of a message is `start_at` before
//! `due_at` for appointments and `due_at` before `start_at` for everything
//! else; quasi-deleted messages (`deleted`, `expired`) never count toward
//! schedule windows.

use chrono::{DateTime, Datelike, Duration, FixedOffset, TimeZone};
use msghub_archive::ArchiveStatus;
use msghub_core::clock::Clock;
use msghub_core::model::{LifecycleState, Message};
use msghub_storage::{DocStatus, DocumentStorage, StorageError};
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::rollup::{ROLLUP_SCHEMA_VERSION, RollupDoc};

/// Locale tag reported in snapshot metadata.
const DEFAULT_LOCALE: &str = "en";

// ---------------------------------------------------------------------------
// Snapshot types
// ---------------------------------------------------------------------------

/// Totals over the current list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentStats {
    /// Number of messages in the list.
    pub total: u64,
    /// Counts by kind.
    pub by_kind: BTreeMap<String, u64>,
    /// Counts by lifecycle state.
    pub by_state: BTreeMap<String, u64>,
    /// Counts by severity code.
    pub by_level: BTreeMap<String, u64>,
    /// Counts by origin system.
    pub by_origin_system: BTreeMap<String, u64>,
}

/// Counters for the schedule windows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleWindows {
    /// Domain due in the past.
    pub overdue: u64,
    /// Due today.
    pub today: u64,
    /// Due tomorrow.
    pub tomorrow: u64,
    /// Due within seven days starting today.
    pub next7_days: u64,
    /// Due inside the current Monday-based week.
    pub this_week: u64,
    /// Due from today to the end of the current week.
    pub this_week_from_today: u64,
    /// Due inside the current calendar month.
    pub this_month: u64,
    /// Due from today to the end of the current month.
    pub this_month_from_today: u64,
}

/// Schedule-window section: aggregate plus per-kind breakdown.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScheduleStats {
    /// Aggregate counters.
    #[serde(flatten)]
    pub totals: ScheduleWindows,
    /// Counters per message kind.
    #[serde(rename = "byKind")]
    pub by_kind: BTreeMap<String, ScheduleWindows>,
}

/// Closed-message counters summed from the rollup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DoneStats {
    /// Closed today.
    pub today: u64,
    /// Closed in the current week.
    pub this_week: u64,
    /// Closed in the current month.
    pub this_month: u64,
    /// Epoch ms of the most recent close ever recorded.
    pub last_closed_at: Option<i64>,
}

/// Persistence status snapshots.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IoStats {
    /// Message-list document status.
    pub document: DocStatus,
    /// Archive status.
    pub archive: ArchiveStatus,
    /// Archive tree size estimate, when requested.
    pub archive_size_bytes: Option<u64>,
}

/// Epoch-ms boundaries of the schedule windows, for consumers that want
/// to recompute or display them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowBounds {
    /// Start of today.
    pub today_start: i64,
    /// Start of tomorrow.
    pub tomorrow_start: i64,
    /// Start of the day after tomorrow.
    pub day_after_tomorrow_start: i64,
    /// End of the seven-day window starting today.
    pub next7_end: i64,
    /// Monday of the current week.
    pub week_start: i64,
    /// Monday of the next week.
    pub week_end: i64,
    /// First of the current month.
    pub month_start: i64,
    /// First of the next month.
    pub month_end: i64,
}

/// Snapshot metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsMeta {
    /// Rollup schema version.
    pub schema_version: u32,
    /// Epoch ms the snapshot was generated at.
    pub generated_at: i64,
    /// UTC offset the windows were computed in (e.g. `+01:00`).
    pub tz: String,
    /// Locale tag for number/date formatting downstream.
    pub locale: String,
    /// Window boundaries.
    pub windows: WindowBounds,
}

/// A full stats snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    /// Totals over the current list.
    pub current: CurrentStats,
    /// Schedule windows.
    pub schedule: ScheduleStats,
    /// Closed-message counters.
    pub done: DoneStats,
    /// Persistence statuses.
    pub io: IoStats,
    /// Metadata.
    pub meta: StatsMeta,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

struct Inner {
    storage: DocumentStorage,
    clock: Arc<dyn Clock>,
    keep_days: u32,
    rollup: Mutex<RollupDoc>,
}

/// Counters plus the persistent closed-message rollup.
#[derive(Clone)]
pub struct MsgStats {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for MsgStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MsgStats").finish_non_exhaustive()
    }
}

impl MsgStats {
    /// Create a stats engine persisting its rollup through `storage`.
    #[must_use]
    pub fn new(storage: DocumentStorage, clock: Arc<dyn Clock>, keep_days: u32) -> Self {
        Self {
            inner: Arc::new(Inner {
                storage,
                clock,
                keep_days,
                rollup: Mutex::new(RollupDoc::default()),
            }),
        }
    }

    /// Load the persisted rollup (or start fresh).
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] when the storage root cannot be created.
    pub async fn init(&self) -> Result<(), StorageError> {
        self.inner.storage.init().await?;
        let loaded: RollupDoc = self.inner.storage.read_json(RollupDoc::default()).await;
        let mut rollup = self.inner.rollup.lock().expect("rollup lock");
        *rollup = loaded;
        rollup.schema_version = ROLLUP_SCHEMA_VERSION;
        debug!(days = rollup.days.len(), "rollup loaded");
        Ok(())
    }

    /// Record a message entering the `closed` state.
    ///
    /// Non-closed messages are ignored. The bucket day comes from
    /// `lifecycle.state_changed_at` (falling back to now) in local time;
    /// old buckets are pruned to the retention window and the rollup is
    /// persisted through the throttled document storage.
    pub fn record_closed(
        &self,
        message: &Message,
    ) -> impl Future<Output = Result<(), StorageError>> + Send + 'static {
        let inner = Arc::clone(&self.inner);
        let write = if message.state() == LifecycleState::Closed {
            let now = inner.clock.now_ms();
            let closed_at = message.lifecycle.state_changed_at.unwrap_or(now);
            let closed_local = inner
                .clock
                .to_local(closed_at)
                .unwrap_or_else(|| inner.clock.now_local());
            let cutoff =
                inner.clock.now_local().date_naive() - Duration::days(i64::from(inner.keep_days));

            let doc = {
                let mut rollup = inner.rollup.lock().expect("rollup lock");
                rollup.record(
                    &closed_local.format("%Y-%m-%d").to_string(),
                    message.kind.as_str(),
                    closed_at,
                );
                rollup.prune_before(&cutoff.format("%Y-%m-%d").to_string());
                rollup.clone()
            };
            Some(inner.storage.write_json(&doc))
        } else {
            None
        };
        async move {
            match write {
                Some(write) => write.await,
                None => Ok(()),
            }
        }
    }

    /// Flush the pending rollup write, if any. Used on shutdown.
    ///
    /// # Errors
    ///
    /// Returns the flush's [`StorageError`] when the write fails.
    pub async fn flush(&self) -> Result<(), StorageError> {
        self.inner.storage.flush_pending().await
    }

    /// Rollup document status, for embedders that surface it.
    #[must_use]
    pub fn rollup_status(&self) -> DocStatus {
        self.inner.storage.status()
    }

    /// Build a full snapshot over `messages` with the given I/O statuses.
    #[must_use]
    pub fn snapshot(&self, messages: &[Message], io: IoStats) -> StatsSnapshot {
        let now_local = self.inner.clock.now_local();
        let bounds = window_bounds(now_local);
        let now_ms = self.inner.clock.now_ms();

        let mut current = CurrentStats::default();
        let mut schedule = ScheduleStats::default();

        for message in messages {
            current.total += 1;
            bump(&mut current.by_kind, message.kind.as_str());
            bump(&mut current.by_state, message.state().as_str());
            bump(&mut current.by_level, &message.level.code().to_string());
            bump(&mut current.by_origin_system, &message.origin.system);

            if message.state().is_quasi_deleted() {
                continue;
            }
            let Some(due) = message.domain_due_ms() else {
                continue;
            };
            let windows = classify(due, now_ms, &bounds);
            apply(&mut schedule.totals, windows);
            apply(
                schedule
                    .by_kind
                    .entry(message.kind.as_str().to_string())
                    .or_default(),
                windows,
            );
        }

        let done = {
            let rollup = self.inner.rollup.lock().expect("rollup lock");
            let today_key = now_local.format("%Y-%m-%d").to_string();
            let week_start_key = local_date_key(now_local, bounds.week_start);
            let month_start_key = local_date_key(now_local, bounds.month_start);
            DoneStats {
                today: rollup.sum_range(&today_key, &today_key),
                this_week: rollup.sum_range(&week_start_key, &today_key),
                this_month: rollup.sum_range(&month_start_key, &today_key),
                last_closed_at: rollup.last_closed_at,
            }
        };

        StatsSnapshot {
            current,
            schedule,
            done,
            io,
            meta: StatsMeta {
                schema_version: ROLLUP_SCHEMA_VERSION,
                generated_at: now_ms,
                tz: now_local.offset().to_string(),
                locale: DEFAULT_LOCALE.to_string(),
                windows: bounds,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Window math
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default)]
struct WindowFlags {
    overdue: bool,
    today: bool,
    tomorrow: bool,
    next7_days: bool,
    this_week: bool,
    this_week_from_today: bool,
    this_month: bool,
    this_month_from_today: bool,
}

fn window_bounds(now: DateTime<FixedOffset>) -> WindowBounds {
    let tz = now.timezone();
    let today = now.date_naive();
    let to_ms = |date: chrono::NaiveDate| -> i64 {
        date.and_hms_opt(0, 0, 0)
            .and_then(|naive| tz.from_local_datetime(&naive).single())
            .map_or(0, |dt| dt.timestamp_millis())
    };

    let week_start = today - Duration::days(i64::from(today.weekday().num_days_from_monday()));
    let month_start = today.with_day(1).unwrap_or(today);
    let month_end = if month_start.month() == 12 {
        month_start
            .with_year(month_start.year() + 1)
            .and_then(|d| d.with_month(1))
    } else {
        month_start.with_month(month_start.month() + 1)
    }
    .unwrap_or(month_start + Duration::days(31));

    WindowBounds {
        today_start: to_ms(today),
        tomorrow_start: to_ms(today + Duration::days(1)),
        day_after_tomorrow_start: to_ms(today + Duration::days(2)),
        next7_end: to_ms(today + Duration::days(7)),
        week_start: to_ms(week_start),
        week_end: to_ms(week_start + Duration::days(7)),
        month_start: to_ms(month_start),
        month_end: to_ms(month_end),
    }
}

fn classify(due: i64, now_ms: i64, bounds: &WindowBounds) -> WindowFlags {
    WindowFlags {
        overdue: due < now_ms,
        today: (bounds.today_start..bounds.tomorrow_start).contains(&due),
        tomorrow: (bounds.tomorrow_start..bounds.day_after_tomorrow_start).contains(&due),
        next7_days: (bounds.today_start..bounds.next7_end).contains(&due),
        this_week: (bounds.week_start..bounds.week_end).contains(&due),
        this_week_from_today: (bounds.today_start..bounds.week_end).contains(&due),
        this_month: (bounds.month_start..bounds.month_end).contains(&due),
        this_month_from_today: (bounds.today_start..bounds.month_end).contains(&due),
    }
}

fn apply(windows: &mut ScheduleWindows, flags: WindowFlags) {
    windows.overdue += u64::from(flags.overdue);
    windows.today += u64::from(flags.today);
    windows.tomorrow += u64::from(flags.tomorrow);
    windows.next7_days += u64::from(flags.next7_days);
    windows.this_week += u64::from(flags.this_week);
    windows.this_week_from_today += u64::from(flags.this_week_from_today);
    windows.this_month += u64::from(flags.this_month);
    windows.this_month_from_today += u64::from(flags.this_month_from_today);
}

fn bump(map: &mut BTreeMap<String, u64>, key: &str) {
    *map.entry(key.to_string()).or_default() += 1;
}

/// The local `YYYY-MM-DD` key of an epoch-ms bound, in `now`'s offset.
fn local_date_key(now: DateTime<FixedOffset>, ms: i64) -> String {
    DateTime::from_timestamp_millis(ms)
        .map(|dt| dt.with_timezone(&now.timezone()))
        .map_or_else(
            || now.format("%Y-%m-%d").to_string(),
            |dt| dt.format("%Y-%m-%d").to_string(),
        )
}
