// SPDX-License-Identifier: MIT OR Apache-2.0
//! msghub-policy
//!
//! Quiet-hours notification policy. All functions are pure: the caller
//! passes the current local wall-clock time and (where jitter applies) a
//! random sample, so scheduling decisions are fully deterministic under
//! test.
//!
//! The policy only ever suppresses *repeat* `due` notifications. The
//! first notification for a message is always dispatched, quiet hours or
//! not; repeats inside the window are pushed past its end with a spread
//! so a burst of suppressed messages does not fire simultaneously.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use chrono::{DateTime, Duration, FixedOffset, TimeZone, Timelike};
use msghub_core::model::Message;
use serde::{Deserialize, Serialize};

/// Quiet-hours window configuration, in local wall-clock minutes.
///
/// The window is half-open (`[start_min, end_min)`) and supports crossing
/// midnight: with `start_min > end_min` a time is inside when it is at or
/// past the start *or* before the end. An empty window
/// (`start_min == end_min`) never matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QuietHours {
    /// Master switch.
    pub enabled: bool,
    /// Window start, minutes after local midnight.
    pub start_min: u32,
    /// Window end, minutes after local midnight.
    pub end_min: u32,
    /// Highest severity code still suppressed; louder levels pass.
    pub max_level: i64,
    /// Jitter range added to the reschedule target, ms.
    pub spread_ms: i64,
}

impl Default for QuietHours {
    fn default() -> Self {
        Self {
            enabled: false,
            start_min: 22 * 60,
            end_min: 6 * 60,
            max_level: 20,
            spread_ms: 60_000,
        }
    }
}

/// Returns `true` when `now` falls inside the quiet-hours window.
#[must_use]
pub fn is_in_quiet_hours(now: DateTime<FixedOffset>, qh: &QuietHours) -> bool {
    if !qh.enabled || qh.start_min == qh.end_min {
        return false;
    }
    let minute = now.hour() * 60 + now.minute();
    if qh.start_min < qh.end_min {
        minute >= qh.start_min && minute < qh.end_min
    } else {
        minute >= qh.start_min || minute < qh.end_min
    }
}

/// The next end of the quiet-hours window, epoch ms.
///
/// Returns `None` when `now` is outside the window. For cross-midnight
/// windows the end is tomorrow morning when `now` sits in the evening
/// part, and this morning when `now` sits past midnight.
#[must_use]
pub fn quiet_hours_end_ts(now: DateTime<FixedOffset>, qh: &QuietHours) -> Option<i64> {
    if !is_in_quiet_hours(now, qh) {
        return None;
    }
    let minute = now.hour() * 60 + now.minute();
    let end_day = if qh.start_min < qh.end_min || minute < qh.end_min {
        now.date_naive()
    } else {
        now.date_naive() + Duration::days(1)
    };
    let end_naive = end_day.and_hms_opt(qh.end_min / 60, qh.end_min % 60, 0)?;
    let end = now.timezone().from_local_datetime(&end_naive).single()?;
    Some(end.timestamp_millis())
}

/// Reschedule target for a suppressed notification: the window end plus a
/// uniform jitter drawn from `[0, spread_ms)` via the caller-supplied
/// `random` sample in `[0, 1)`.
#[must_use]
pub fn compute_quiet_reschedule_ts(
    now: DateTime<FixedOffset>,
    qh: &QuietHours,
    random: f64,
) -> Option<i64> {
    let end = quiet_hours_end_ts(now, qh)?;
    let jitter = (random.clamp(0.0, 1.0) * qh.spread_ms as f64).floor() as i64;
    Some(end + jitter)
}

/// Whether a `due` notification for `msg` should be suppressed right now.
///
/// Suppression requires all of: quiet hours active, the message's level at
/// or below the window's `max_level`, and a previous `due` dispatch on
/// record — the first notification always goes out.
#[must_use]
pub fn should_suppress_due(msg: &Message, now: DateTime<FixedOffset>, qh: &QuietHours) -> bool {
    is_in_quiet_hours(now, qh)
        && msg.level.code() <= qh.max_level
        && msg.timing.notified_at.due.is_some_and(|ts| ts > 0)
}
