//! Property-based tests for record integrity

use chrono::Utc;
use examsync::local_db::{Correlation, OfflineRecord, RecordMetadata};
use proptest::prelude::*;
use serde_json::{json, Value};

fn leaf() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        any::<i64>().prop_map(Value::from),
        (-1.0e9..1.0e9f64).prop_map(Value::from),
        ".{0,24}".prop_map(Value::from),
    ]
}

fn payload() -> impl Strategy<Value = Value> {
    leaf().prop_recursive(3, 32, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..6).prop_map(Value::from),
            prop::collection::btree_map("[a-z_]{1,10}", inner, 0..6)
                .prop_map(|map| Value::Object(map.into_iter().collect())),
        ]
    })
}

proptest! {
    #[test]
    fn test_checksum_survives_storage_encoding(payload in payload()) {
        let record = OfflineRecord::new(
            "q1",
            Correlation::new("p1", "pre_employment"),
            payload,
            RecordMetadata::default(),
            Utc::now(),
        );
        let stored = serde_json::to_string(&record).unwrap();
        let loaded: OfflineRecord = serde_json::from_str(&stored).unwrap();

        prop_assert!(loaded.verify());
        prop_assert_eq!(loaded, record);
    }

    #[test]
    fn test_any_payload_edit_is_detected(text in "[a-z]{1,16}", other in "[A-Z]{1,16}") {
        let mut record = OfflineRecord::new(
            "q1",
            Correlation::new("p1", "pre_employment"),
            json!({"notes": text}),
            RecordMetadata::default(),
            Utc::now(),
        );
        record.payload["notes"] = json!(other);
        prop_assert!(!record.verify());
    }
}
