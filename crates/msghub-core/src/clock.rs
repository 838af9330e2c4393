// SPDX-License-Identifier: MIT OR Apache-2.0
//! Injectable time source.
//!
//! Every component that reads time takes a [`Clock`] so that scheduling,
//! week segmentation, and quiet-hours logic are deterministic under test.
//! Timestamps cross the persistence boundary as epoch milliseconds.

use chrono::{DateTime, FixedOffset, Local, Offset, Utc};
use std::fmt;
use std::sync::Mutex;

/// Earliest plausible message timestamp (2000-01-01T00:00:00Z), epoch ms.
pub const MIN_PLAUSIBLE_MS: i64 = 946_684_800_000;
/// Latest plausible message timestamp (2100-01-01T00:00:00Z), epoch ms.
pub const MAX_PLAUSIBLE_MS: i64 = 4_102_444_800_000;

/// Returns `true` when `ms` falls inside the plausible timestamp window.
#[must_use]
pub fn is_plausible_ms(ms: i64) -> bool {
    (MIN_PLAUSIBLE_MS..MAX_PLAUSIBLE_MS).contains(&ms)
}

/// Convert epoch milliseconds to a UTC datetime.
///
/// Returns `None` for values outside chrono's representable range.
#[must_use]
pub fn ms_to_utc(ms: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
}

/// A wall-clock source with a fixed notion of the local UTC offset.
///
/// Local-time computations (quiet hours, week keys, day buckets) go through
/// [`Clock::now_local`] and [`Clock::to_local`] so tests can pin both the
/// instant and the offset.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current instant in UTC.
    fn now_utc(&self) -> DateTime<Utc>;

    /// The local UTC offset used for wall-clock computations.
    fn local_offset(&self) -> FixedOffset;

    /// Current instant in local wall-clock time.
    fn now_local(&self) -> DateTime<FixedOffset> {
        self.now_utc().with_timezone(&self.local_offset())
    }

    /// Current instant as epoch milliseconds.
    fn now_ms(&self) -> i64 {
        self.now_utc().timestamp_millis()
    }

    /// Convert an epoch-ms timestamp into this clock's local wall-clock time.
    ///
    /// Returns `None` for out-of-range values.
    fn to_local(&self, ms: i64) -> Option<DateTime<FixedOffset>> {
        ms_to_utc(ms).map(|dt| dt.with_timezone(&self.local_offset()))
    }
}

/// Production clock reading the system time and the host's local offset.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn local_offset(&self) -> FixedOffset {
        Local::now().offset().fix()
    }
}

/// Test clock pinned to a settable instant and a fixed offset.
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
    offset: FixedOffset,
}

impl FixedClock {
    /// Create a clock pinned to `now` with the given local offset.
    #[must_use]
    pub fn new(now: DateTime<Utc>, offset: FixedOffset) -> Self {
        Self {
            now: Mutex::new(now),
            offset,
        }
    }

    /// Create a clock pinned to the given epoch-ms instant, local = UTC.
    ///
    /// # Panics
    ///
    /// Panics if `ms` is outside chrono's representable range.
    #[must_use]
    pub fn at_ms(ms: i64) -> Self {
        Self::new(
            ms_to_utc(ms).expect("timestamp in range"),
            FixedOffset::east_opt(0).expect("zero offset"),
        )
    }

    /// Move the clock to a new instant.
    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().expect("clock lock") = now;
    }

    /// Advance the clock by `ms` milliseconds.
    pub fn advance_ms(&self, ms: i64) {
        let mut guard = self.now.lock().expect("clock lock");
        *guard += chrono::Duration::milliseconds(ms);
    }
}

impl fmt::Debug for FixedClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FixedClock")
            .field("now", &*self.now.lock().expect("clock lock"))
            .field("offset", &self.offset)
            .finish()
    }
}

impl Clock for FixedClock {
    fn now_utc(&self) -> DateTime<Utc> {
        *self.now.lock().expect("clock lock")
    }

    fn local_offset(&self) -> FixedOffset {
        self.offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn plausible_window_bounds() {
        assert!(!is_plausible_ms(MIN_PLAUSIBLE_MS - 1));
        assert!(is_plausible_ms(MIN_PLAUSIBLE_MS));
        assert!(is_plausible_ms(1_700_000_000_000));
        assert!(!is_plausible_ms(MAX_PLAUSIBLE_MS));
    }

    #[test]
    fn fixed_clock_advances() {
        let clock = FixedClock::at_ms(1_700_000_000_000);
        assert_eq!(clock.now_ms(), 1_700_000_000_000);
        clock.advance_ms(2_500);
        assert_eq!(clock.now_ms(), 1_700_000_002_500);
    }

    #[test]
    fn local_conversion_applies_offset() {
        let offset = FixedOffset::east_opt(3600).unwrap();
        let now = Utc.with_ymd_and_hms(2020, 1, 1, 23, 0, 0).unwrap();
        let clock = FixedClock::new(now, offset);
        let local = clock.now_local();
        assert_eq!(local.format("%H:%M").to_string(), "00:00");
    }
}
