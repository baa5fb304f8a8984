//! Two contexts sharing one storage origin

use crate::common::*;
use examsync::local_db::{LocalStore, MemoryBackend, RecordMetadata, StorageBackend};
use examsync::offline::{SyncQueue, SyncQueueItem};
use examsync::realtime::{EventBus, StorageBus};
use examsync::shared::SyncEvent;
use examsync::sync::SyncEngine;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_save_in_one_context_reaches_the_other() {
    let a = TestContext::new();
    let b = a.sibling();
    a.start_offline().await;
    b.start_offline().await;
    let mut b_events = b.service.subscribe();

    a.service
        .save_progress("q1", correlation(), json!({"hearing": "normal"}), RecordMetadata::default())
        .await
        .unwrap();

    let event = wait_for(&mut b_events, |e| matches!(e, SyncEvent::StorageChanged { .. })).await;
    assert!(matches!(
        event,
        SyncEvent::StorageChanged { ref key, new_value: Some(_) } if key == "offline_questionnaire_q1"
    ));

    let b_queue = b.service.queue().clone();
    eventually(move || {
        let queue = b_queue.clone();
        async move { queue.contains("q1").await }
    })
    .await;

    // Both contexts read the same record
    assert_eq!(
        b.service.store().load("q1").await.unwrap().unwrap().payload,
        json!({"hearing": "normal"})
    );
}

#[tokio::test]
async fn test_own_writes_are_not_echoed() {
    let a = TestContext::new();
    let _b = a.sibling();
    a.start_offline().await;
    let mut a_events = a.service.subscribe();

    a.service
        .save_progress("q1", correlation(), json!({}), RecordMetadata::default())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    while let Ok(event) = a_events.try_recv() {
        assert!(!matches!(event, SyncEvent::StorageChanged { .. }), "echoed: {:?}", event);
    }
}

#[tokio::test]
async fn test_sync_in_one_context_clears_the_other() {
    let a = TestContext::new();
    let b = a.sibling();
    a.start_offline().await;
    b.start_offline().await;

    a.service
        .save_progress("q1", correlation(), json!({}), RecordMetadata::default())
        .await
        .unwrap();
    let b_queue = b.service.queue().clone();
    eventually(move || {
        let queue = b_queue.clone();
        async move { queue.contains("q1").await }
    })
    .await;

    a.service.engine().run_pass().await.unwrap();

    let b_queue = b.service.queue().clone();
    eventually(move || {
        let queue = b_queue.clone();
        async move { queue.is_empty().await }
    })
    .await;
    assert!(b.remote.calls().is_empty());
}

/// Without a cross-context lock, two contexts that both hold an item in their
/// queue snapshot submit it twice. The remote endpoints must be idempotent.
#[tokio::test]
async fn test_concurrent_passes_may_submit_twice() {
    let backend: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
    let bus = StorageBus::default();
    let remote = Arc::new(RecordingRemote::new());
    remote.set_latency(Duration::from_millis(20));

    let store_a = LocalStore::new(backend.clone(), bus.clone(), 1 << 20);
    let store_b = LocalStore::new(backend, bus, 1 << 20);
    let queue_a = Arc::new(SyncQueue::new(store_a.clone(), 3));
    let queue_b = Arc::new(SyncQueue::new(store_b, 3));
    let engine_a = SyncEngine::new(queue_a.clone(), remote.clone(), EventBus::default(), Duration::ZERO);
    let engine_b = SyncEngine::new(queue_b.clone(), remote.clone(), EventBus::default(), Duration::ZERO);

    let record = store_a
        .save("q1", correlation(), json!({"step": 1}), RecordMetadata::default())
        .await
        .unwrap();
    queue_a.enqueue(SyncQueueItem::update(record)).await.unwrap();
    queue_b.load().await.unwrap();

    let (a, b) = tokio::join!(engine_a.run_pass(), engine_b.run_pass());
    a.unwrap();
    b.unwrap();

    assert_eq!(remote.calls_for("q1").len(), 2);
    assert_eq!(store_a.load("q1").await.unwrap(), None);
    queue_a.reload().await.unwrap();
    assert!(queue_a.is_empty().await);
}
