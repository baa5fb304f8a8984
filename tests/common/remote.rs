//! Recording `RemoteApi` fake
//!
//! Records every call in order and fails on demand, either for selected ids or
//! for everything.

use async_trait::async_trait;
use examsync::remote::RemoteApi;
use examsync::{OfflineError, Result};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// One call received by the fake
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteCall {
    Create {
        patient_id: String,
        id: String,
        examination_type: String,
    },
    Update {
        id: String,
        payload: Value,
    },
    Complete {
        id: String,
        signature: Value,
    },
}

impl RemoteCall {
    pub fn id(&self) -> &str {
        match self {
            RemoteCall::Create { id, .. }
            | RemoteCall::Update { id, .. }
            | RemoteCall::Complete { id, .. } => id,
        }
    }
}

#[derive(Debug, Default)]
pub struct RecordingRemote {
    calls: Mutex<Vec<RemoteCall>>,
    failing_ids: Mutex<HashSet<String>>,
    fail_everything: AtomicBool,
    latency: Mutex<Option<Duration>>,
}

impl RecordingRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, id: &str) -> Vec<RemoteCall> {
        self.calls().into_iter().filter(|call| call.id() == id).collect()
    }

    /// Answer every call with a 503
    pub fn set_failing(&self, failing: bool) {
        self.fail_everything.store(failing, Ordering::SeqCst);
    }

    pub fn fail_id(&self, id: &str) {
        self.failing_ids.lock().unwrap().insert(id.to_string());
    }

    /// Sleep before answering, to keep calls in flight
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = Some(latency);
    }

    async fn record(&self, call: RemoteCall) -> Result<()> {
        let latency = *self.latency.lock().unwrap();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let fails = self.fail_everything.load(Ordering::SeqCst)
            || self.failing_ids.lock().unwrap().contains(call.id());
        self.calls.lock().unwrap().push(call);

        if fails {
            Err(OfflineError::server(503, "Service Unavailable"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RemoteApi for RecordingRemote {
    async fn create_record(
        &self,
        patient_id: &str,
        examination_id: &str,
        examination_type: &str,
    ) -> Result<()> {
        self.record(RemoteCall::Create {
            patient_id: patient_id.to_string(),
            id: examination_id.to_string(),
            examination_type: examination_type.to_string(),
        })
        .await
    }

    async fn update_record(&self, id: &str, payload: &Value) -> Result<()> {
        self.record(RemoteCall::Update {
            id: id.to_string(),
            payload: payload.clone(),
        })
        .await
    }

    async fn complete_record(&self, id: &str, signature: &Value) -> Result<()> {
        self.record(RemoteCall::Complete {
            id: id.to_string(),
            signature: signature.clone(),
        })
        .await
    }
}
