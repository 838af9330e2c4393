// SPDX-License-Identifier: MIT OR Apache-2.0

use chrono::{FixedOffset, TimeZone};
use msghub_core::factory::{MessageFactory, NewMessage, OriginInput};
use msghub_core::{FixedClock, Message, MsgKind, OriginType};
use msghub_policy::{QuietHours, compute_quiet_reschedule_ts, should_suppress_due};
use std::sync::Arc;

fn night_window() -> QuietHours {
    QuietHours {
        enabled: true,
        start_min: 22 * 60,
        end_min: 6 * 60,
        max_level: 20,
        spread_ms: 60_000,
    }
}

fn message_with(level: i64, notified_due: Option<i64>) -> Message {
    let clock = Arc::new(FixedClock::at_ms(1_577_919_600_000));
    let factory = MessageFactory::new(clock);
    let mut input = NewMessage::new(
        "reminder",
        MsgKind::Task,
        OriginInput {
            origin_type: OriginType::Manual,
            system: "ui".into(),
            id: None,
        },
    );
    input.ref_key = Some("qh-test".into());
    input.level = Some(level);
    let mut msg = factory.create(input).unwrap();
    msg.timing.notified_at.due = notified_due;
    msg
}

#[test]
fn repeat_due_inside_window_is_suppressed_and_rescheduled() {
    // 2020-01-01 23:00 local (UTC offset zero).
    let now = FixedOffset::east_opt(0)
        .unwrap()
        .with_ymd_and_hms(2020, 1, 1, 23, 0, 0)
        .unwrap();
    let qh = night_window();
    let msg = message_with(10, Some(now.timestamp_millis() - 1));

    assert!(should_suppress_due(&msg, now, &qh));

    let rescheduled = compute_quiet_reschedule_ts(now, &qh, 0.5).unwrap();
    let next_morning = FixedOffset::east_opt(0)
        .unwrap()
        .with_ymd_and_hms(2020, 1, 2, 6, 0, 0)
        .unwrap();
    assert_eq!(rescheduled, next_morning.timestamp_millis() + 30_000);
}

#[test]
fn first_notification_is_never_suppressed() {
    let now = FixedOffset::east_opt(0)
        .unwrap()
        .with_ymd_and_hms(2020, 1, 1, 23, 0, 0)
        .unwrap();
    let msg = message_with(10, None);
    assert!(!should_suppress_due(&msg, now, &night_window()));
}

#[test]
fn loud_levels_bypass_quiet_hours() {
    let now = FixedOffset::east_opt(0)
        .unwrap()
        .with_ymd_and_hms(2020, 1, 1, 23, 0, 0)
        .unwrap();
    let msg = message_with(30, Some(now.timestamp_millis() - 1));
    assert!(!should_suppress_due(&msg, now, &night_window()));
}

#[test]
fn outside_the_window_nothing_is_suppressed() {
    let now = FixedOffset::east_opt(0)
        .unwrap()
        .with_ymd_and_hms(2020, 1, 1, 12, 0, 0)
        .unwrap();
    let msg = message_with(10, Some(now.timestamp_millis() - 1));
    assert!(!should_suppress_due(&msg, now, &night_window()));
}

#[test]
fn offset_local_time_drives_the_window() {
    // 22:30 local in a +01:00 zone is 21:30 UTC; the window must follow
    // the local wall clock.
    let offset = FixedOffset::east_opt(3600).unwrap();
    let now = offset.with_ymd_and_hms(2020, 6, 15, 22, 30, 0).unwrap();
    let msg = message_with(10, Some(now.timestamp_millis() - 1));
    assert!(should_suppress_due(&msg, now, &night_window()));
}
