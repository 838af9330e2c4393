// SPDX-License-Identifier: MIT OR Apache-2.0

use msghub_archive::{ArchiveConfig, MsgArchive};
use msghub_core::events::{LifecycleEvent, NotificationSink};
use msghub_core::factory::{MessageFactory, NewMessage, OriginInput, TimingInput};
use msghub_core::patch::{MessagePatch, PatchField, TimingPatch};
use msghub_core::{FixedClock, Message, MsgKind, OriginType};
use msghub_policy::QuietHours;
use msghub_stats::MsgStats;
use msghub_store::{ExecuteActionRequest, MessageQuery, MsgStore, StoreConfig, StoreError};
use msghub_storage::{DocumentStorage, DocumentStorageConfig, MemoryBackend, OpQueue, StorageBackend};
use std::sync::{Arc, Mutex};

// 2023-11-14 22:13:20 UTC.
const NOW_MS: i64 = 1_700_000_000_000;

#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<(LifecycleEvent, String)>>,
}

impl RecordingSink {
    fn seen(&self) -> Vec<(LifecycleEvent, String)> {
        self.events.lock().unwrap().clone()
    }
}

impl NotificationSink for RecordingSink {
    fn dispatch(&self, event: LifecycleEvent, messages: &[Message]) {
        let mut events = self.events.lock().unwrap();
        for message in messages {
            events.push((event, message.ref_key.clone()));
        }
    }
}

struct Fixture {
    store: MsgStore,
    sink: Arc<RecordingSink>,
    backend: Arc<MemoryBackend>,
    clock: Arc<FixedClock>,
}

async fn fixture() -> Fixture {
    fixture_with(QuietHours::default(), NOW_MS).await
}

async fn fixture_with(quiet_hours: QuietHours, now_ms: i64) -> Fixture {
    let backend = Arc::new(MemoryBackend::new());
    let clock = Arc::new(FixedClock::at_ms(now_ms));
    let queue = OpQueue::new();

    let storage = DocumentStorage::new(
        backend.clone(),
        queue.clone(),
        clock.clone(),
        DocumentStorageConfig::new("messages.json", 0),
    );
    let archive = MsgArchive::with_backend(
        backend.clone(),
        queue.clone(),
        clock.clone(),
        ArchiveConfig {
            flush_interval_ms: 0,
            ..ArchiveConfig::default()
        },
    );
    let rollup_storage = DocumentStorage::new(
        backend.clone(),
        queue.clone(),
        clock.clone(),
        DocumentStorageConfig::new("stats-rollup.json", 0),
    );
    let stats = MsgStats::new(rollup_storage, clock.clone(), 400);
    let sink = Arc::new(RecordingSink::default());
    let store = MsgStore::with_jitter(
        MessageFactory::new(clock.clone()),
        storage,
        archive,
        stats,
        sink.clone(),
        clock.clone(),
        StoreConfig { quiet_hours },
        Arc::new(|| 0.5),
    );
    store.init().await.unwrap();
    Fixture {
        store,
        sink,
        backend,
        clock,
    }
}

fn new_message(ref_key: &str, kind: MsgKind) -> NewMessage {
    let mut input = NewMessage::new(
        format!("title {ref_key}"),
        kind,
        OriginInput {
            origin_type: OriginType::Manual,
            system: "ui".into(),
            id: None,
        },
    );
    input.ref_key = Some(ref_key.to_string());
    input
}

async fn settle() {
    // Let spawned persistence tasks run.
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn add_message_inserts_dispatches_and_persists() {
    let f = fixture().await;
    let message = f.store.add_message(new_message("a1", MsgKind::Task)).await.unwrap();
    assert_eq!(message.ref_key, "a1");
    assert_eq!(f.sink.seen(), vec![(LifecycleEvent::Created, "a1".to_string())]);

    settle().await;
    f.store.shutdown().await;

    let bytes = f.backend.read("messages.json").await.unwrap().unwrap();
    let persisted: Vec<Message> = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(persisted.len(), 1);
    assert_eq!(persisted[0].ref_key, "a1");

    // The creation snapshot landed in the archive.
    assert!(
        f.backend
            .paths()
            .iter()
            .any(|p| p.starts_with("a1.") && p.ends_with(".jsonl"))
    );
}

#[tokio::test]
async fn duplicate_ref_is_rejected() {
    let f = fixture().await;
    f.store.add_message(new_message("dup", MsgKind::Task)).await.unwrap();
    let err = f
        .store
        .add_message(new_message("dup", MsgKind::Task))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        StoreError::Duplicate {
            ref_key: "dup".to_string()
        }
    );
}

#[tokio::test]
async fn update_message_applies_patch_and_dispatches() {
    let f = fixture().await;
    f.store.add_message(new_message("u1", MsgKind::Task)).await.unwrap();

    let patch = MessagePatch {
        title: PatchField::Set("renamed".into()),
        ..MessagePatch::default()
    };
    let updated = f.store.update_message("u1", patch).await.unwrap();
    assert_eq!(updated.title, "renamed");
    assert_eq!(updated.timing.updated_at, Some(NOW_MS));
    assert_eq!(
        f.sink.seen(),
        vec![
            (LifecycleEvent::Created, "u1".to_string()),
            (LifecycleEvent::Updated, "u1".to_string()),
        ]
    );
}

#[tokio::test]
async fn noop_update_neither_bumps_nor_dispatches() {
    let f = fixture().await;
    let created = f.store.add_message(new_message("n1", MsgKind::Task)).await.unwrap();

    let patch = MessagePatch {
        title: PatchField::Set(created.title.clone()),
        ..MessagePatch::default()
    };
    let unchanged = f.store.update_message("n1", patch).await.unwrap();
    assert_eq!(unchanged.timing.updated_at, None);
    assert_eq!(f.sink.seen().len(), 1);
}

#[tokio::test]
async fn update_unknown_ref_is_not_found() {
    let f = fixture().await;
    let err = f
        .store
        .update_message("ghost", MessagePatch::default())
        .await
        .unwrap_err();
    assert_eq!(
        err,
        StoreError::NotFound {
            ref_key: "ghost".to_string()
        }
    );
}

#[tokio::test]
async fn remove_message_dispatches_deleted() {
    let f = fixture().await;
    f.store.add_message(new_message("r1", MsgKind::Task)).await.unwrap();
    assert!(f.store.remove_message("r1").await);
    assert!(!f.store.remove_message("r1").await);
    assert_eq!(f.store.get_message("r1").await, None);
    assert_eq!(
        f.sink.seen(),
        vec![
            (LifecycleEvent::Created, "r1".to_string()),
            (LifecycleEvent::Deleted, "r1".to_string()),
        ]
    );

    settle().await;
    f.store.shutdown().await;
    let lines = f
        .backend
        .read(
            f.backend
                .paths()
                .iter()
                .find(|p| p.starts_with("r1."))
                .unwrap(),
        )
        .await
        .unwrap()
        .unwrap();
    let text = String::from_utf8(lines).unwrap();
    assert!(text.lines().count() >= 2);
    assert!(text.contains("\"event\":\"delete\""));
}

#[tokio::test]
async fn add_or_update_routes_by_ref_existence() {
    let f = fixture().await;
    let created = f
        .store
        .add_or_update_message(new_message("au1", MsgKind::Task))
        .await
        .unwrap();
    assert_eq!(created.title, "title au1");

    let mut update = new_message("au1", MsgKind::Task);
    update.title = Some("second".into());
    let updated = f.store.add_or_update_message(update).await.unwrap();
    assert_eq!(updated.title, "second");
    assert_eq!(f.store.get_messages().await.len(), 1);
}

#[tokio::test]
async fn add_or_update_rejects_kind_change() {
    let f = fixture().await;
    f.store.add_message(new_message("k1", MsgKind::Task)).await.unwrap();
    let err = f
        .store
        .add_or_update_message(new_message("k1", MsgKind::Status))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));
}

#[tokio::test]
async fn closing_a_message_records_rollup() {
    let f = fixture().await;
    f.store.add_message(new_message("c1", MsgKind::Task)).await.unwrap();

    let patch: MessagePatch =
        serde_json::from_str(r#"{"lifecycle": {"state": "closed"}}"#).unwrap();
    f.store.update_message("c1", patch).await.unwrap();
    settle().await;
    f.store.shutdown().await;

    let bytes = f.backend.read("stats-rollup.json").await.unwrap().unwrap();
    let doc: msghub_stats::RollupDoc = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(doc.days["2023-11-14"].total, 1);
}

#[tokio::test]
async fn execute_action_transitions_and_archives() {
    let f = fixture().await;
    let mut input = new_message("act1", MsgKind::Task);
    input.actions = Some(vec![msghub_core::patch::ActionInput {
        action_type: msghub_core::model::ActionType::Close,
        id: Some("done".into()),
        payload: None,
    }]);
    f.store.add_message(input).await.unwrap();

    let updated = f
        .store
        .execute_action(ExecuteActionRequest {
            ref_key: "act1".into(),
            action_id: "done".into(),
            actor: "tester".into(),
            payload: Some(serde_json::json!({"via": "test"})),
        })
        .await
        .unwrap();
    assert_eq!(updated.state(), msghub_core::LifecycleState::Closed);
    assert_eq!(updated.lifecycle.state_changed_by.as_deref(), Some("tester"));

    settle().await;
    f.store.shutdown().await;
    let path = f
        .backend
        .paths()
        .into_iter()
        .find(|p| p.starts_with("act1."))
        .unwrap();
    let text = String::from_utf8(f.backend.read(&path).await.unwrap().unwrap()).unwrap();
    assert!(text.contains("\"event\":\"action\""));
    assert!(text.contains("\"actionId\":\"done\""));
    assert!(text.contains("\"actor\":\"tester\""));
}

#[tokio::test]
async fn execute_action_unknown_action_fails() {
    let f = fixture().await;
    f.store.add_message(new_message("act2", MsgKind::Task)).await.unwrap();
    let err = f
        .store
        .execute_action(ExecuteActionRequest {
            ref_key: "act2".into(),
            action_id: "missing".into(),
            actor: "tester".into(),
            payload: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::ActionNotFound { .. }));
}

#[tokio::test]
async fn complete_after_cause_eliminated_closes_tasks() {
    let f = fixture().await;
    let mut input = new_message("cc1", MsgKind::Task);
    input.timing = Some(TimingInput {
        notify_at: Some(NOW_MS + 3_600_000),
        ..TimingInput::default()
    });
    f.store.add_message(input).await.unwrap();

    assert!(
        f.store
            .complete_after_cause_eliminated("cc1", "automation")
            .await
            .unwrap()
    );
    let closed = f.store.get_message("cc1").await.unwrap();
    assert_eq!(closed.state(), msghub_core::LifecycleState::Closed);
    assert_eq!(closed.timing.notify_at, None);
    assert_eq!(closed.progress.percentage, Some(100));
    assert_eq!(closed.progress.finished_at, None);
}

#[tokio::test]
async fn complete_after_cause_eliminated_deletes_statuses() {
    let f = fixture().await;
    f.store.add_message(new_message("cs1", MsgKind::Status)).await.unwrap();
    assert!(
        f.store
            .complete_after_cause_eliminated("cs1", "automation")
            .await
            .unwrap()
    );
    assert_eq!(f.store.get_message("cs1").await, None);
    assert!(f.sink.seen().contains(&(LifecycleEvent::Deleted, "cs1".to_string())));
}

#[tokio::test]
async fn query_filters_sorts_and_pages() {
    let f = fixture().await;
    for (ref_key, kind) in [
        ("q-c", MsgKind::Task),
        ("q-a", MsgKind::Task),
        ("q-b", MsgKind::Task),
        ("q-s", MsgKind::Status),
    ] {
        let mut input = new_message(ref_key, kind);
        input.title = Some(ref_key.to_string());
        f.store.add_message(input).await.unwrap();
    }

    let query: MessageQuery = serde_json::from_str(
        r#"{
            "where": {"kind": {"in": ["task"]}},
            "page": {"index": 1, "size": 2},
            "sort": [{"field": "title", "dir": "asc"}]
        }"#,
    )
    .unwrap();
    let result = f.store.query_messages(&query).await;
    assert_eq!(result.total, 3);
    assert_eq!(result.pages, 2);
    assert_eq!(
        result.items.iter().map(|m| m.title.as_str()).collect::<Vec<_>>(),
        vec!["q-a", "q-b"]
    );

    let query: MessageQuery = serde_json::from_str(
        r#"{"where": {"kind": {"in": ["task"]}}, "page": {"index": 2, "size": 2}}"#,
    )
    .unwrap();
    let result = f.store.query_messages(&query).await;
    assert_eq!(result.items.len(), 1);

    // size = 0 returns everything as one page.
    let result = f.store.query_messages(&MessageQuery::default()).await;
    assert_eq!(result.total, 4);
    assert_eq!(result.pages, 1);
}

#[tokio::test(start_paused = true)]
async fn due_timer_dispatches_and_reschedules_with_remind_every() {
    let f = fixture().await;
    let mut input = new_message("due1", MsgKind::Task);
    input.timing = Some(TimingInput {
        notify_at: Some(NOW_MS + 1_000),
        remind_every: Some(60_000),
        ..TimingInput::default()
    });
    f.store.add_message(input).await.unwrap();

    // Advance the domain clock past the notify instant, then let the
    // virtual timer fire.
    f.clock.advance_ms(1_000);
    tokio::time::sleep(std::time::Duration::from_millis(1_100)).await;
    settle().await;

    assert!(f.sink.seen().contains(&(LifecycleEvent::Due, "due1".to_string())));
    let message = f.store.get_message("due1").await.unwrap();
    let now = NOW_MS + 1_000;
    assert_eq!(message.timing.notified_at.due, Some(now));
    assert_eq!(message.timing.notify_at, Some(now + 60_000));
    // Stealth bookkeeping must not look like a content change.
    assert_eq!(message.timing.updated_at, None);
}

#[tokio::test(start_paused = true)]
async fn due_without_remind_every_clears_notify_at() {
    let f = fixture().await;
    let mut input = new_message("due2", MsgKind::Task);
    input.timing = Some(TimingInput {
        notify_at: Some(NOW_MS + 500),
        ..TimingInput::default()
    });
    f.store.add_message(input).await.unwrap();

    f.clock.advance_ms(500);
    tokio::time::sleep(std::time::Duration::from_millis(600)).await;
    settle().await;

    let message = f.store.get_message("due2").await.unwrap();
    assert_eq!(message.timing.notify_at, None);
    assert_eq!(
        f.sink
            .seen()
            .iter()
            .filter(|(e, _)| *e == LifecycleEvent::Due)
            .count(),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn quiet_hours_suppress_repeat_due_and_reschedule() {
    // 2020-01-01 22:59 UTC (local = UTC here).
    let night = 1_577_919_540_000;
    let qh = QuietHours {
        enabled: true,
        start_min: 22 * 60,
        end_min: 6 * 60,
        max_level: 20,
        spread_ms: 60_000,
    };
    let f = fixture_with(qh, night).await;

    let mut input = new_message("quiet1", MsgKind::Task);
    input.level = Some(10);
    input.timing = Some(TimingInput {
        notify_at: Some(night + 1_000),
        ..TimingInput::default()
    });
    f.store.add_message(input).await.unwrap();

    // Mark a previous due dispatch so this one counts as a repeat.
    let patch = MessagePatch {
        timing: PatchField::Set(TimingPatch {
            notified_at: PatchField::Set(msghub_core::patch::NotifiedAtPatch {
                due: PatchField::Set(night - 60_000),
                ..Default::default()
            }),
            ..TimingPatch::default()
        }),
        ..MessagePatch::default()
    };
    f.store.update_message("quiet1", patch).await.unwrap();

    f.clock.advance_ms(1_000);
    tokio::time::sleep(std::time::Duration::from_millis(1_100)).await;
    settle().await;

    // No due dispatch; notify_at moved past the window end plus jitter.
    assert!(!f.sink.seen().contains(&(LifecycleEvent::Due, "quiet1".to_string())));
    let message = f.store.get_message("quiet1").await.unwrap();
    // 2020-01-02 06:00 UTC + 0.5 * 60s.
    assert_eq!(message.timing.notify_at, Some(1_577_944_800_000 + 30_000));
}

#[tokio::test(start_paused = true)]
async fn first_due_fires_even_inside_quiet_hours() {
    let night = 1_577_919_540_000;
    let qh = QuietHours {
        enabled: true,
        start_min: 22 * 60,
        end_min: 6 * 60,
        max_level: 20,
        spread_ms: 60_000,
    };
    let f = fixture_with(qh, night).await;

    let mut input = new_message("first1", MsgKind::Task);
    input.level = Some(10);
    input.timing = Some(TimingInput {
        notify_at: Some(night + 1_000),
        ..TimingInput::default()
    });
    f.store.add_message(input).await.unwrap();

    f.clock.advance_ms(1_000);
    tokio::time::sleep(std::time::Duration::from_millis(1_100)).await;
    settle().await;

    assert!(f.sink.seen().contains(&(LifecycleEvent::Due, "first1".to_string())));
}

#[tokio::test(start_paused = true)]
async fn expired_messages_transition_and_dispatch() {
    let f = fixture().await;
    let mut input = new_message("exp1", MsgKind::Status);
    input.timing = Some(TimingInput {
        expires_at: Some(NOW_MS + 2_000),
        ..TimingInput::default()
    });
    f.store.add_message(input).await.unwrap();

    f.clock.advance_ms(2_000);
    tokio::time::sleep(std::time::Duration::from_millis(2_100)).await;
    settle().await;

    let message = f.store.get_message("exp1").await.unwrap();
    assert_eq!(message.state(), msghub_core::LifecycleState::Expired);
    assert!(f.sink.seen().contains(&(LifecycleEvent::Expired, "exp1".to_string())));

    f.store.shutdown().await;
    let path = f
        .backend
        .paths()
        .into_iter()
        .find(|p| p.starts_with("exp1."))
        .unwrap();
    let text = String::from_utf8(f.backend.read(&path).await.unwrap().unwrap()).unwrap();
    assert!(text.contains("\"event\":\"expired\""));
}

#[tokio::test]
async fn init_reloads_persisted_list() {
    let f = fixture().await;
    f.store.add_message(new_message("reload1", MsgKind::Task)).await.unwrap();
    settle().await;
    f.store.shutdown().await;

    // A second store over the same backend sees the message.
    let clock = Arc::new(FixedClock::at_ms(NOW_MS));
    let queue = OpQueue::new();
    let storage = DocumentStorage::new(
        f.backend.clone(),
        queue.clone(),
        clock.clone(),
        DocumentStorageConfig::new("messages.json", 0),
    );
    let archive = MsgArchive::with_backend(
        f.backend.clone(),
        queue.clone(),
        clock.clone(),
        ArchiveConfig::default(),
    );
    let rollup = DocumentStorage::new(
        f.backend.clone(),
        queue.clone(),
        clock.clone(),
        DocumentStorageConfig::new("stats-rollup.json", 0),
    );
    let reloaded = MsgStore::new(
        MessageFactory::new(clock.clone()),
        storage,
        archive,
        MsgStats::new(rollup, clock.clone(), 400),
        Arc::new(msghub_core::events::NoopSink),
        clock,
        StoreConfig::default(),
    );
    reloaded.init().await.unwrap();
    assert!(reloaded.get_message("reload1").await.is_some());
}

#[tokio::test]
async fn get_stats_snapshots_current_list_and_io() {
    let f = fixture().await;
    f.store.add_message(new_message("s1", MsgKind::Task)).await.unwrap();
    let snapshot = f.store.get_stats(true).await;
    assert_eq!(snapshot.current.total, 1);
    assert_eq!(snapshot.io.document.file_path, "messages.json");
    assert!(snapshot.io.archive_size_bytes.is_some());
}
