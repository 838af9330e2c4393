// SPDX-License-Identifier: MIT OR Apache-2.0
//! Cross-crate flows: ingest plugin → store → persistence + archive →
//! notifier dispatch → scheduler → stats.

use msghub::archive::{ArchiveConfig, MsgArchive};
use msghub::core::events::LifecycleEvent;
use msghub::core::factory::{MessageFactory, NewMessage, OriginInput, TimingInput};
use msghub::core::{FixedClock, Message, MsgKind, OriginType};
use msghub::host::{MockController, MsgEngage, MsgHostApi, MsgIngest, MsgNotify, PluginHandler};
use msghub::stats::MsgStats;
use msghub::store::{MsgStore, StoreConfig};
use msghub::storage::{DocumentStorage, DocumentStorageConfig, MemoryBackend, OpQueue, StorageBackend};
use std::sync::{Arc, Mutex};

const NOW_MS: i64 = 1_700_000_000_000;

struct Hub {
    store: MsgStore,
    notify: MsgNotify,
    ingest: MsgIngest,
    engage: MsgEngage,
    backend: Arc<MemoryBackend>,
    clock: Arc<FixedClock>,
}

async fn hub() -> Hub {
    let backend = Arc::new(MemoryBackend::new());
    let clock = Arc::new(FixedClock::at_ms(NOW_MS));
    let queue = OpQueue::new();
    let factory = MessageFactory::new(clock.clone());

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
    let rollup = DocumentStorage::new(
        backend.clone(),
        queue,
        clock.clone(),
        DocumentStorageConfig::new("stats-rollup.json", 0),
    );

    let notify = MsgNotify::new();
    let store = MsgStore::new(
        factory.clone(),
        storage,
        archive,
        MsgStats::new(rollup, clock.clone(), 400),
        Arc::new(notify.clone()),
        clock.clone(),
        StoreConfig::default(),
    );
    store.init().await.unwrap();

    let controller = Arc::new(MockController::new("msghub.0"));
    let api = MsgHostApi::new(store.clone(), factory, controller, 10_000);
    notify.connect(api.clone());
    let ingest = MsgIngest::new(api.clone());
    let engage = MsgEngage::new(api);
    notify.start();
    ingest.start();
    engage.start();

    Hub {
        store,
        notify,
        ingest,
        engage,
        backend,
        clock,
    }
}

async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn full_lifecycle_reaches_every_surface() {
    let hub = hub().await;

    let seen: Arc<Mutex<Vec<(LifecycleEvent, String)>>> = Arc::default();
    let sink = seen.clone();
    hub.notify
        .register(
            "observer",
            PluginHandler::from_fn(move |event, messages: &[Message], _| {
                sink.lock()
                    .unwrap()
                    .push((event, messages[0].ref_key.clone()));
                Ok(())
            }),
        )
        .unwrap();

    // Ingest creates, patches, and closes a task.
    let mut input = NewMessage::new(
        "replace water filter",
        MsgKind::Task,
        OriginInput {
            origin_type: OriginType::Automation,
            system: "maintenance".into(),
            id: Some("filter-1".into()),
        },
    );
    input.ref_key = Some("maint.filter".into());
    input.timing = Some(TimingInput {
        due_at: Some(NOW_MS + 86_400_000),
        ..TimingInput::default()
    });
    hub.store.add_message(input).await.unwrap();

    let patch = serde_json::from_str(r#"{"progress": {"percentage": 50}}"#).unwrap();
    hub.store.update_message("maint.filter", patch).await.unwrap();

    let close = serde_json::from_str(r#"{"lifecycle": {"state": "closed"}}"#).unwrap();
    hub.store.update_message("maint.filter", close).await.unwrap();

    settle().await;
    hub.store.shutdown().await;

    // Notifier saw the whole lifecycle in order.
    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            (LifecycleEvent::Created, "maint.filter".to_string()),
            (LifecycleEvent::Updated, "maint.filter".to_string()),
            (LifecycleEvent::Updated, "maint.filter".to_string()),
        ]
    );

    // The document holds the final state.
    let bytes = hub.backend.read("messages.json").await.unwrap().unwrap();
    let list: Vec<Message> = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].progress.percentage, Some(50));

    // The archive holds create + both patches, in order.
    let archive_path = hub
        .backend
        .paths()
        .into_iter()
        .find(|p| p.starts_with("maint/filter."))
        .expect("archive segment for the dotted ref");
    let text = String::from_utf8(hub.backend.read(&archive_path).await.unwrap().unwrap()).unwrap();
    let events: Vec<String> = text
        .lines()
        .map(|line| {
            serde_json::from_str::<serde_json::Value>(line).unwrap()["event"]
                .as_str()
                .unwrap()
                .to_string()
        })
        .collect();
    assert_eq!(events, vec!["create", "patch", "patch"]);

    // The close landed in the rollup.
    let bytes = hub.backend.read("stats-rollup.json").await.unwrap().unwrap();
    let rollup: msghub::stats::RollupDoc = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(rollup.days["2023-11-14"].by_kind["task"], 1);
}

#[tokio::test(start_paused = true)]
async fn due_notification_flows_to_plugins() {
    let hub = hub().await;
    let seen: Arc<Mutex<Vec<LifecycleEvent>>> = Arc::default();
    let sink = seen.clone();
    hub.notify
        .register(
            "due-watcher",
            PluginHandler::from_fn(move |event, _, _| {
                sink.lock().unwrap().push(event);
                Ok(())
            }),
        )
        .unwrap();

    let mut input = NewMessage::new(
        "water the plants",
        MsgKind::Task,
        OriginInput {
            origin_type: OriginType::Manual,
            system: "ui".into(),
            id: None,
        },
    );
    input.ref_key = Some("plants".into());
    input.timing = Some(TimingInput {
        notify_at: Some(NOW_MS + 1_000),
        ..TimingInput::default()
    });
    hub.store.add_message(input).await.unwrap();

    hub.clock.advance_ms(1_000);
    tokio::time::sleep(std::time::Duration::from_millis(1_100)).await;
    settle().await;

    assert_eq!(
        *seen.lock().unwrap(),
        vec![LifecycleEvent::Created, LifecycleEvent::Due]
    );

    // Folding the archive reproduces the bookkeeping.
    let message = hub.store.get_message("plants").await.unwrap();
    assert_eq!(message.timing.notified_at.due, Some(NOW_MS + 1_000));
}

#[tokio::test]
async fn engage_action_round_trips_through_the_store() {
    let hub = hub().await;

    let mut input = NewMessage::new(
        "doorbell battery low",
        MsgKind::Status,
        OriginInput {
            origin_type: OriginType::Import,
            system: "doorbell".into(),
            id: Some("front".into()),
        },
    );
    input.ref_key = Some("doorbell.front".into());
    input.actions = Some(vec![msghub::core::patch::ActionInput {
        action_type: msghub::core::model::ActionType::Ack,
        id: None,
        payload: None,
    }]);
    hub.store.add_message(input).await.unwrap();

    let updated = hub
        .store
        .execute_action(msghub::store::ExecuteActionRequest {
            ref_key: "doorbell.front".into(),
            action_id: "ack-1".into(),
            actor: "wall-panel".into(),
            payload: None,
        })
        .await
        .unwrap();
    assert_eq!(updated.state(), msghub::core::LifecycleState::Acked);

    settle().await;
    hub.store.shutdown().await;

    let archive_path = hub
        .backend
        .paths()
        .into_iter()
        .find(|p| p.starts_with("doorbell/front."))
        .unwrap();
    let text = String::from_utf8(hub.backend.read(&archive_path).await.unwrap().unwrap()).unwrap();
    assert!(text.contains("\"event\":\"action\""));
    assert!(text.contains("\"actor\":\"wall-panel\""));
    let _ = (&hub.ingest, &hub.engage);
}

#[tokio::test]
async fn stats_snapshot_covers_all_sections() {
    let hub = hub().await;
    let mut input = NewMessage::new(
        "weekly shop",
        MsgKind::Shoppinglist,
        OriginInput {
            origin_type: OriginType::Manual,
            system: "ui".into(),
            id: None,
        },
    );
    input.ref_key = Some("shop".into());
    hub.store.add_message(input).await.unwrap();
    settle().await;

    let snapshot = hub.store.get_stats(true).await;
    assert_eq!(snapshot.current.total, 1);
    assert_eq!(snapshot.current.by_kind["shoppinglist"], 1);
    assert_eq!(snapshot.meta.tz, "+00:00");
    assert!(snapshot.io.archive_size_bytes.is_some());
}
