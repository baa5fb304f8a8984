//! End-to-end behaviour of one context: save offline, reconnect, retry, clean up

use crate::common::*;
use assert_matches::assert_matches;
use chrono::{Duration as ChronoDuration, Utc};
use examsync::local_db::{record_key, MemoryBackend, OfflineRecord, RecordMetadata, StorageBackend, SYNC_QUEUE_KEY};
use examsync::offline::{Priority, SyncAction, SyncQueueItem};
use examsync::realtime::StorageBus;
use examsync::shared::config::OfflineConfig;
use examsync::shared::SyncEvent;
use examsync::sync::PassOutcome;
use examsync::OfflineError;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;

#[tokio::test]
async fn test_offline_save_syncs_once_when_back_online() {
    let ctx = TestContext::new();
    ctx.start_offline().await;
    let mut events = ctx.service.subscribe();
    let payload = json!({"vitals": {"pulse": 64}, "fit_for_work": true});

    ctx.service
        .save_progress("q1", correlation(), payload.clone(), RecordMetadata::default())
        .await
        .unwrap();
    assert!(ctx.remote.calls().is_empty());

    let pending = ctx.service.queue().dequeue_all().await;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, "q1");
    assert_eq!(pending[0].action, SyncAction::Update);

    ctx.service.monitor().set_online(true);
    wait_for(&mut events, |e| matches!(e, SyncEvent::SyncCompleted { success_count: 1, .. })).await;

    assert_eq!(
        ctx.remote.calls(),
        vec![RemoteCall::Update {
            id: "q1".to_string(),
            payload,
        }]
    );
    assert!(ctx.service.queue().is_empty().await);
    assert_eq!(ctx.service.store().load("q1").await.unwrap(), None);
}

#[tokio::test]
async fn test_reconnect_publishes_network_status() {
    let ctx = TestContext::new();
    ctx.start_offline().await;
    let mut events = ctx.service.subscribe();

    ctx.service.monitor().set_online(true);

    wait_for(&mut events, |e| matches!(e, SyncEvent::NetworkStatusChanged { is_online: true })).await;
    assert!(ctx.service.monitor().is_online());
}

#[tokio::test]
async fn test_repeated_saves_collapse_to_latest_payload() {
    let ctx = TestContext::new();
    ctx.start_offline().await;

    for step in 1..=2 {
        ctx.service
            .save_progress("q1", correlation(), json!({"step": step}), RecordMetadata::default())
            .await
            .unwrap();
    }

    let snapshot = ctx.service.queue().dequeue_all().await;
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].payload.payload, json!({"step": 2}));
    assert_eq!(snapshot[0].payload.version, 2);
}

#[tokio::test]
async fn test_retry_exhaustion_keeps_record_for_resolution() {
    let ctx = TestContext::new();
    ctx.start_offline().await;
    ctx.remote.set_failing(true);
    let mut events = ctx.service.subscribe();

    ctx.service
        .save_progress("q1", correlation(), json!({"a": 1}), RecordMetadata::default())
        .await
        .unwrap();

    // Drive the passes by hand; the scheduler is gated by the offline monitor
    for _ in 0..3 {
        ctx.service.engine().run_pass().await.unwrap();
    }

    let event = wait_for(&mut events, |e| matches!(e, SyncEvent::ResolutionRequired { .. })).await;
    assert_matches!(event, SyncEvent::ResolutionRequired { ref id, attempts: 3, .. } if id == "q1");
    assert_eq!(ctx.remote.calls_for("q1").len(), 3);
    assert!(ctx.service.queue().is_empty().await);

    let unresolved = ctx.service.unresolved().await.unwrap();
    assert_eq!(unresolved.len(), 1);
    assert!(unresolved[0].requires_resolution());

    // Operator resubmits once the service recovers
    ctx.remote.set_failing(false);
    ctx.service.resubmit("q1").await.unwrap();
    assert_eq!(ctx.service.queue().get("q1").await.unwrap().attempts, 0);
    assert_matches!(ctx.service.engine().run_pass().await, Ok(PassOutcome::Succeeded(_)));
    assert_eq!(ctx.service.store().load("q1").await.unwrap(), None);
}

#[tokio::test]
async fn test_priority_order_is_high_normal_low() {
    let ctx = TestContext::new();
    ctx.start_offline().await;
    let store = ctx.service.store();

    for (id, priority) in [("low", Priority::Low), ("high", Priority::High), ("normal", Priority::Normal)] {
        let record = store
            .save(id, correlation(), json!({"id": id}), RecordMetadata::default())
            .await
            .unwrap();
        ctx.service
            .queue()
            .enqueue(SyncQueueItem::update(record).with_priority(priority))
            .await
            .unwrap();
    }

    let order: Vec<String> = ctx
        .service
        .queue()
        .dequeue_all()
        .await
        .iter()
        .map(|item| item.id.clone())
        .collect();
    assert_eq!(order, vec!["high", "normal", "low"]);

    ctx.service.engine().run_pass().await.unwrap();
    let sent: Vec<String> = ctx.remote.calls().iter().map(|c| c.id().to_string()).collect();
    assert_eq!(sent, vec!["high", "normal", "low"]);
}

#[tokio::test]
async fn test_new_examination_is_created_then_completed() {
    let ctx = TestContext::new();
    ctx.start_offline().await;

    ctx.service
        .start_examination("q1", correlation(), json!({"section": "history"}), RecordMetadata::default())
        .await
        .unwrap();
    assert_eq!(ctx.service.queue().get("q1").await.unwrap().action, SyncAction::Create);

    ctx.service.engine().run_pass().await.unwrap();
    ctx.service
        .save_progress("q1", correlation(), json!({"section": "signed"}), RecordMetadata::default())
        .await
        .unwrap();
    ctx.service
        .complete_examination("q1", json!({"signed_by": "dr-okafor"}))
        .await
        .unwrap();

    let item = ctx.service.queue().get("q1").await.unwrap();
    assert_eq!(item.priority, Priority::High);
    ctx.service.engine().run_pass().await.unwrap();

    assert_eq!(
        ctx.remote.calls(),
        vec![
            RemoteCall::Create {
                patient_id: "patient-1".to_string(),
                id: "q1".to_string(),
                examination_type: "pre_employment".to_string(),
            },
            RemoteCall::Update {
                id: "q1".to_string(),
                payload: json!({"section": "history"}),
            },
            RemoteCall::Update {
                id: "q1".to_string(),
                payload: json!({"section": "signed"}),
            },
            RemoteCall::Complete {
                id: "q1".to_string(),
                signature: json!({"signed_by": "dr-okafor"}),
            },
        ]
    );
}

#[tokio::test]
async fn test_examination_completed_before_first_sync_is_still_created() {
    let ctx = TestContext::new();
    ctx.start_offline().await;

    ctx.service
        .start_examination("q1", correlation(), json!({"section": "history"}), RecordMetadata::default())
        .await
        .unwrap();
    ctx.service
        .complete_examination("q1", json!({"signed_by": "dr-okafor"}))
        .await
        .unwrap();

    let item = ctx.service.queue().get("q1").await.unwrap();
    assert_matches!(item.action, SyncAction::Complete { create: true, .. });
    assert_eq!(item.priority, Priority::High);

    assert_matches!(ctx.service.engine().run_pass().await, Ok(PassOutcome::Succeeded(_)));
    assert_eq!(
        ctx.remote.calls(),
        vec![
            RemoteCall::Create {
                patient_id: "patient-1".to_string(),
                id: "q1".to_string(),
                examination_type: "pre_employment".to_string(),
            },
            RemoteCall::Update {
                id: "q1".to_string(),
                payload: json!({"section": "history"}),
            },
            RemoteCall::Complete {
                id: "q1".to_string(),
                signature: json!({"signed_by": "dr-okafor"}),
            },
        ]
    );
}

#[tokio::test]
async fn test_resubmitted_sign_off_is_delivered() {
    let ctx = TestContext::new();
    ctx.start_offline().await;
    ctx.remote.set_failing(true);

    ctx.service
        .save_progress("q1", correlation(), json!({"section": "signed"}), RecordMetadata::default())
        .await
        .unwrap();
    ctx.service
        .complete_examination("q1", json!({"signed_by": "dr-okafor"}))
        .await
        .unwrap();
    for _ in 0..3 {
        ctx.service.engine().run_pass().await.unwrap();
    }
    assert!(ctx.service.queue().is_empty().await);

    let unresolved = ctx.service.unresolved().await.unwrap();
    assert_matches!(unresolved[0].unsent_action(), Some(SyncAction::Complete { .. }));

    ctx.remote.set_failing(false);
    ctx.service.resubmit("q1").await.unwrap();
    assert_matches!(
        ctx.service.queue().get("q1").await.unwrap().action,
        SyncAction::Complete { ref signature, .. } if signature == &json!({"signed_by": "dr-okafor"})
    );

    let before = ctx.remote.calls().len();
    assert_matches!(ctx.service.engine().run_pass().await, Ok(PassOutcome::Succeeded(_)));
    assert_eq!(
        ctx.remote.calls()[before..].to_vec(),
        vec![
            RemoteCall::Update {
                id: "q1".to_string(),
                payload: json!({"section": "signed"}),
            },
            RemoteCall::Complete {
                id: "q1".to_string(),
                signature: json!({"signed_by": "dr-okafor"}),
            },
        ]
    );
    assert_eq!(ctx.service.store().load("q1").await.unwrap(), None);
}

#[tokio::test]
async fn test_retention_at_init_removes_old_records() {
    let ctx = TestContext::new();
    let now = Utc::now();
    let aged = |id: &str, days: i64| {
        OfflineRecord::new(
            id,
            correlation(),
            json!({"id": id}),
            RecordMetadata::default(),
            now - ChronoDuration::days(days),
        )
    };
    ctx.service
        .store()
        .import(vec![aged("ten-days", 10), aged("one-day", 1)])
        .await
        .unwrap();

    ctx.start_offline().await;

    assert_eq!(ctx.service.store().load("ten-days").await.unwrap(), None);
    assert!(ctx.service.store().load("one-day").await.unwrap().is_some());
}

#[tokio::test]
async fn test_corrupt_record_is_never_served() {
    let ctx = TestContext::new();
    ctx.start_offline().await;
    ctx.service
        .save_progress("q1", correlation(), json!({"answer": "yes"}), RecordMetadata::default())
        .await
        .unwrap();

    let key = record_key("q1");
    let raw = ctx.backend.get(&key).await.unwrap().unwrap();
    ctx.backend.set(&key, &raw.replace("yes", "no")).await.unwrap();

    assert_eq!(ctx.service.store().load("q1").await.unwrap(), None);
    assert_eq!(ctx.backend.get(&key).await.unwrap(), None);
}

#[tokio::test]
async fn test_quota_exhaustion_blocks_saves_until_cleared() {
    let backend = Arc::new(MemoryBackend::with_capacity(2048));
    let ctx = TestContext::with_backend(backend, StorageBus::default(), test_config());
    ctx.start_offline().await;
    let mut events = ctx.service.subscribe();

    let result = ctx
        .service
        .save_progress("big", correlation(), json!({"notes": "x".repeat(4096)}), RecordMetadata::default())
        .await;
    assert_matches!(result, Err(OfflineError::StorageQuotaExceeded { .. }));
    assert!(result.unwrap_err().is_user_visible());
    let warning = wait_for(&mut events, |e| matches!(e, SyncEvent::StorageWarning { .. })).await;
    assert_matches!(warning, SyncEvent::StorageWarning { usage_percent } if usage_percent >= 100.0);

    assert_matches!(
        ctx.service
            .save_progress("small", correlation(), json!({}), RecordMetadata::default())
            .await,
        Err(OfflineError::StorageQuotaExceeded { .. })
    );

    ctx.service.clear_all().await.unwrap();
    ctx.service
        .save_progress("small", correlation(), json!({}), RecordMetadata::default())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_unknown_persisted_action_is_dropped_at_init() {
    let ctx = TestContext::new();
    let record = OfflineRecord::new("q1", correlation(), json!({}), RecordMetadata::default(), Utc::now());
    let mut known = serde_json::to_value(SyncQueueItem::update(record.clone())).unwrap();
    let mut unknown = known.clone();
    unknown["id"] = json!("q2");
    unknown["action"] = json!({"type": "archive"});
    known["id"] = json!("q1");

    ctx.service.store().import(vec![record]).await.unwrap();
    ctx.backend
        .set(SYNC_QUEUE_KEY, &serde_json::to_string(&vec![known, unknown]).unwrap())
        .await
        .unwrap();

    ctx.start_offline().await;

    assert_eq!(ctx.service.queue().len().await, 1);
    assert!(ctx.service.queue().contains("q1").await);
}

#[tokio::test]
async fn test_pending_work_syncs_at_startup() {
    let ctx = TestContext::new();
    ctx.start_offline().await;
    ctx.service
        .save_progress("q1", correlation(), json!({}), RecordMetadata::default())
        .await
        .unwrap();
    ctx.service.dispose().await;

    // A new context on the same storage, starting online
    let restarted = TestContext::with_backend(ctx.backend.clone(), StorageBus::default(), test_config());
    let mut events = restarted.service.subscribe();
    restarted.service.init().await.unwrap();

    wait_for(&mut events, |e| matches!(e, SyncEvent::SyncCompleted { .. })).await;
    assert_eq!(restarted.remote.calls_for("q1").len(), 1);
}

#[tokio::test]
async fn test_sync_now_reports_offline() {
    let ctx = TestContext::new();
    ctx.start_offline().await;
    assert_eq!(ctx.service.sync_now().await.unwrap(), PassOutcome::Offline);

    ctx.service.monitor().set_online(true);
    assert_matches!(
        ctx.service.sync_now().await.unwrap(),
        PassOutcome::Succeeded(_) | PassOutcome::Skipped
    );
}

#[tokio::test]
async fn test_debounced_saves_share_one_pass() {
    let config = OfflineConfig::builder()
        .sync_pacing_delay_ms(0)
        .sync_debounce_ms(200)
        .sync_interval_secs(3600)
        .build()
        .unwrap();
    let ctx = TestContext::with_config(config);
    ctx.service.init().await.unwrap();
    let mut events = ctx.service.subscribe();

    for id in ["a", "b", "c"] {
        ctx.service
            .save_progress(id, correlation(), json!({}), RecordMetadata::default())
            .await
            .unwrap();
    }

    let completed = wait_for(&mut events, |e| matches!(e, SyncEvent::SyncCompleted { .. })).await;
    assert_eq!(completed, SyncEvent::SyncCompleted { success_count: 3, fail_count: 0 });
}
