//! Property-based tests for sync queue ordering and upsert

use examsync::local_db::{Correlation, LocalStore, MemoryBackend, RecordMetadata};
use examsync::offline::{Priority, SyncAction, SyncQueue, SyncQueueItem};
use examsync::realtime::StorageBus;
use proptest::prelude::*;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

fn priority() -> impl Strategy<Value = Priority> {
    prop_oneof![Just(Priority::High), Just(Priority::Normal), Just(Priority::Low)]
}

fn action() -> impl Strategy<Value = SyncAction> {
    prop_oneof![
        Just(SyncAction::Create),
        Just(SyncAction::Update),
        any::<bool>().prop_map(|create| SyncAction::Complete {
            signature: json!("signed"),
            create,
        }),
    ]
}

fn block_on<F: std::future::Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(future)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn test_queue_is_ordered_and_unique(
        saves in prop::collection::vec((0..5usize, priority(), 0..1000u32), 1..20)
    ) {
        let (snapshot, latest) = block_on(async {
            let store = LocalStore::new(Arc::new(MemoryBackend::new()), StorageBus::default(), 1 << 20);
            let queue = SyncQueue::new(store.clone(), 3);
            let mut latest = HashMap::new();

            for (slot, priority, value) in &saves {
                let id = format!("q{}", slot);
                let record = store
                    .save(&id, Correlation::new("p1", "x"), json!({"value": value}), RecordMetadata::default())
                    .await
                    .unwrap();
                queue
                    .enqueue(SyncQueueItem::update(record).with_priority(*priority))
                    .await
                    .unwrap();
                latest.insert(id, *value);
            }
            (queue.dequeue_all().await, latest)
        });

        prop_assert_eq!(snapshot.len(), latest.len());
        for pair in snapshot.windows(2) {
            let ordered = (pair[0].priority, pair[0].timestamp) <= (pair[1].priority, pair[1].timestamp);
            prop_assert!(ordered, "{:?} before {:?}", pair[0].id, pair[1].id);
        }
        for item in snapshot.iter() {
            prop_assert_eq!(&item.payload.payload, &json!({"value": latest[&item.id]}));
        }
    }

    #[test]
    fn test_updates_never_downgrade_completion(
        head in action(),
        updates in 0..6usize,
    ) {
        let merged = std::iter::repeat(SyncAction::Update)
            .take(updates)
            .fold(head.clone(), SyncAction::merge);

        prop_assert_eq!(merged, head);
    }

    #[test]
    fn test_creation_and_completion_are_never_lost(actions in prop::collection::vec(action(), 1..8)) {
        let merged = actions
            .iter()
            .cloned()
            .reduce(SyncAction::merge)
            .unwrap();

        if actions.iter().any(SyncAction::creates) {
            prop_assert!(merged.creates(), "{:?} merged to {:?}", actions, merged);
        }
        if actions.iter().any(|a| matches!(a, SyncAction::Complete { .. })) {
            prop_assert!(matches!(merged, SyncAction::Complete { .. }), "{:?} merged to {:?}", actions, merged);
        }
    }
}
