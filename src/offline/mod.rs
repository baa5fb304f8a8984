//! # Offline Service
//!
//! Offline-first persistence for examination forms: every save lands in local
//! storage first and is queued for the remote service, which receives it once
//! connectivity allows.
//!
//! ## Architecture
//!
//! - **Sync Queue** (`queue.rs`): persisted pending mutations, one per record
//! - **Retention** (`retention.rs`): age and integrity cleanup of local records
//! - **Service** (`OfflineService`): owns the parts and their background tasks
//!
//! ## Usage
//!
//! ```rust,no_run
//! use examsync::local_db::{Correlation, MemoryBackend, RecordMetadata};
//! use examsync::offline::OfflineService;
//! use examsync::realtime::StorageBus;
//! use examsync::remote::HttpRemoteApi;
//! use examsync::shared::config::OfflineConfig;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = OfflineConfig::default();
//! let remote = Arc::new(HttpRemoteApi::new(&config)?);
//! let service = OfflineService::new(config, Arc::new(MemoryBackend::new()), remote, StorageBus::default());
//!
//! service.init().await?;
//! let mut events = service.subscribe();
//!
//! service
//!     .save_progress("q1", Correlation::new("p1", "pre_employment"), json!({"height_cm": 180}), RecordMetadata::default())
//!     .await?;
//!
//! let event = events.recv().await?;
//! println!("{:?}", event);
//! service.dispose().await;
//! # Ok(())
//! # }
//! ```

pub mod queue;
pub mod retention;

pub use queue::{FailureOutcome, Priority, SyncAction, SyncQueue, SyncQueueItem};
pub use retention::{RetentionManager, RetentionReport};

use crate::local_db::{
    Correlation, LocalStore, OfflineRecord, RecordMetadata, StorageBackend, StoreStats,
    QUOTA_WARNING_PERCENT,
};
use crate::realtime::{EventBus, StorageBus};
use crate::remote::RemoteApi;
use crate::shared::config::OfflineConfig;
use crate::shared::error::{OfflineError, Result};
use crate::shared::SyncEvent;
use crate::sync::scheduler::{self, send_trigger};
use crate::sync::{
    CrossTabCoordinator, NetworkMonitor, PassOutcome, SyncEngine, SyncScheduler, SyncTrigger,
};
use futures_util::StreamExt;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;

/// Pending trigger backlog; extra triggers are redundant and dropped
const TRIGGER_CAPACITY: usize = 32;

/// Background tasks and the trigger channel of an initialized service
#[derive(Debug)]
struct Runtime {
    triggers: mpsc::Sender<SyncTrigger>,
    tasks: Vec<JoinHandle<()>>,
}

impl Runtime {
    fn abort(self) {
        for task in self.tasks {
            task.abort();
        }
    }
}

/// Offline persistence and sync for one execution context
#[derive(Debug)]
pub struct OfflineService {
    config: OfflineConfig,
    store: LocalStore,
    queue: Arc<SyncQueue>,
    engine: Arc<SyncEngine>,
    monitor: Arc<NetworkMonitor>,
    retention: Arc<RetentionManager>,
    events: EventBus,
    storage_bus: StorageBus,
    runtime: Mutex<Option<Runtime>>,
}

impl OfflineService {
    /// Wire up the parts; nothing runs until [`init`](Self::init)
    pub fn new(
        config: OfflineConfig,
        backend: Arc<dyn StorageBackend>,
        remote: Arc<dyn RemoteApi>,
        storage_bus: StorageBus,
    ) -> Self {
        let events = EventBus::default();
        let store = LocalStore::new(backend, storage_bus.clone(), config.storage_quota_bytes);
        let queue = Arc::new(SyncQueue::new(store.clone(), config.max_retry_attempts));
        let engine = Arc::new(SyncEngine::new(
            queue.clone(),
            remote,
            events.clone(),
            config.sync_pacing_delay(),
        ));
        let retention = Arc::new(RetentionManager::new(
            store.clone(),
            queue.clone(),
            config.retention_max_age(),
        ));

        Self {
            config,
            store,
            queue,
            engine,
            monitor: Arc::new(NetworkMonitor::default()),
            retention,
            events,
            storage_bus,
            runtime: Mutex::new(None),
        }
    }

    /// Load persisted state, clean up, and start the background tasks
    ///
    /// Calling it again on a running service does nothing.
    pub async fn init(&self) -> Result<()> {
        let mut runtime = self.runtime.lock().await;
        if runtime.is_some() {
            tracing::debug!("[OfflineService] Already initialized");
            return Ok(());
        }

        let pending = self.queue.load().await?;
        match self.retention.run_once().await {
            Ok(report) => tracing::debug!("[OfflineService] Startup cleanup: {:?}", report),
            Err(e) => tracing::warn!("[OfflineService] Startup cleanup failed: {}", e),
        }

        let (triggers, trigger_rx) = mpsc::channel(TRIGGER_CAPACITY);
        let mut tasks = Vec::new();

        let scheduler = SyncScheduler::new(
            self.engine.clone(),
            self.monitor.subscribe(),
            self.config.sync_debounce(),
        );
        tasks.push(tokio::spawn(scheduler.run(trigger_rx)));
        tasks.push(tokio::spawn(
            self.monitor.run(triggers.clone(), self.events.clone()),
        ));

        let coordinator =
            CrossTabCoordinator::new(self.store.context(), self.queue.clone(), self.events.clone());
        tasks.push(tokio::spawn(
            coordinator.run(self.storage_bus.subscribe(), triggers.clone()),
        ));

        tasks.push(tokio::spawn(
            self.retention.clone().run(self.config.retention_interval()),
        ));
        tasks.push(tokio::spawn(scheduler::run_interval(
            triggers.clone(),
            self.config.sync_interval(),
        )));

        if let Some(url) = self.config.probe_url.clone() {
            let client = reqwest::Client::builder()
                .timeout(self.config.request_timeout())
                .build()
                .map_err(|e| OfflineError::network(format!("Failed to build probe client: {}", e)))?;
            let monitor = self.monitor.clone();
            let interval = self.config.probe_interval();
            tasks.push(tokio::spawn(async move {
                monitor.run_probe(client, url, interval).await
            }));
        }

        if pending > 0 {
            send_trigger(&triggers, SyncTrigger::Manual);
        }

        tracing::info!(
            "[OfflineService] Initialized context {} with {} pending items",
            self.store.context(),
            pending
        );
        *runtime = Some(Runtime { triggers, tasks });
        Ok(())
    }

    /// Stop every background task
    pub async fn dispose(&self) {
        if let Some(runtime) = self.runtime.lock().await.take() {
            runtime.abort();
            tracing::info!("[OfflineService] Disposed context {}", self.store.context());
        }
    }

    pub async fn is_initialized(&self) -> bool {
        self.runtime.lock().await.is_some()
    }

    /// Save form progress locally and queue it for upload
    pub async fn save_progress(
        &self,
        id: &str,
        correlation: Correlation,
        payload: Value,
        metadata: RecordMetadata,
    ) -> Result<OfflineRecord> {
        let triggers = self.triggers().await?;
        let record = self.save_record(id, correlation, payload, metadata).await?;
        self.queue.enqueue(SyncQueueItem::update(record.clone())).await?;
        self.after_save(&triggers, SyncTrigger::LocalSave).await;
        Ok(record)
    }

    /// Save the first version of a new examination and queue its remote creation
    pub async fn start_examination(
        &self,
        id: &str,
        correlation: Correlation,
        payload: Value,
        metadata: RecordMetadata,
    ) -> Result<OfflineRecord> {
        let triggers = self.triggers().await?;
        let record = self.save_record(id, correlation, payload, metadata).await?;
        self.queue.enqueue(SyncQueueItem::create(record.clone())).await?;
        self.after_save(&triggers, SyncTrigger::LocalSave).await;
        Ok(record)
    }

    /// Queue the sign-off of a saved examination, ahead of ordinary saves
    pub async fn complete_examination(&self, id: &str, signature: Value) -> Result<()> {
        let triggers = self.triggers().await?;
        let record = self
            .store
            .load(id)
            .await?
            .ok_or_else(|| OfflineError::NotFound { id: id.to_string() })?;
        self.queue
            .enqueue(SyncQueueItem::complete(record, signature))
            .await?;
        send_trigger(&triggers, SyncTrigger::Manual);
        Ok(())
    }

    /// Run a pass right away, bypassing the debounce
    pub async fn sync_now(&self) -> Result<PassOutcome> {
        if !self.monitor.is_online() {
            tracing::debug!("[OfflineService] Offline, sync request ignored");
            return Ok(PassOutcome::Offline);
        }
        self.engine.run_pass().await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    pub async fn stats(&self) -> Result<StoreStats> {
        self.store.stats().await
    }

    /// Local records with no queue entry, i.e. waiting for manual resolution
    pub async fn unresolved(&self) -> Result<Vec<OfflineRecord>> {
        let mut unresolved = Vec::new();
        let mut records = self.store.list("").await?;
        while let Some(record) = records.next().await {
            if !self.queue.contains(&record.id).await {
                unresolved.push(record);
            }
        }
        Ok(unresolved)
    }

    /// Put an unresolved record back in the queue with a fresh retry budget
    ///
    /// The operation that ran out of retries is queued again as it was, so a
    /// pending creation or sign-off is still delivered. A record with no
    /// recorded operation is queued as a plain update.
    pub async fn resubmit(&self, id: &str) -> Result<()> {
        let triggers = self.triggers().await?;
        let action = self
            .store
            .load(id)
            .await?
            .ok_or_else(|| OfflineError::NotFound { id: id.to_string() })?
            .unsent_action()
            .cloned()
            .unwrap_or(SyncAction::Update);

        self.store.mark_pending(id).await?;
        let record = self
            .store
            .load(id)
            .await?
            .ok_or_else(|| OfflineError::NotFound { id: id.to_string() })?;
        tracing::info!("[OfflineService] Resubmitting {} as {}", id, action.name());
        self.queue.enqueue(SyncQueueItem::new(record, action)).await?;
        send_trigger(&triggers, SyncTrigger::Manual);
        Ok(())
    }

    /// Operator action: delete every local record and the queue
    pub async fn clear_all(&self) -> Result<usize> {
        self.queue.clear().await;
        self.store.clear_all().await
    }

    pub fn config(&self) -> &OfflineConfig {
        &self.config
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    pub fn queue(&self) -> &Arc<SyncQueue> {
        &self.queue
    }

    pub fn monitor(&self) -> &Arc<NetworkMonitor> {
        &self.monitor
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    pub fn retention(&self) -> &Arc<RetentionManager> {
        &self.retention
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    async fn triggers(&self) -> Result<mpsc::Sender<SyncTrigger>> {
        self.runtime
            .lock()
            .await
            .as_ref()
            .map(|runtime| runtime.triggers.clone())
            .ok_or(OfflineError::NotInitialized)
    }

    /// Local save; a failure the user must act on is also published as a warning
    async fn save_record(
        &self,
        id: &str,
        correlation: Correlation,
        payload: Value,
        metadata: RecordMetadata,
    ) -> Result<OfflineRecord> {
        match self.store.save(id, correlation, payload, metadata).await {
            Ok(record) => Ok(record),
            Err(e) if e.is_user_visible() => {
                let usage_percent = self.store.usage_percent().await.unwrap_or(100.0).max(100.0);
                tracing::warn!("[OfflineService] Save of {} refused: {}", id, e);
                self.events.publish(SyncEvent::StorageWarning { usage_percent });
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    async fn after_save(&self, triggers: &mpsc::Sender<SyncTrigger>, trigger: SyncTrigger) {
        match self.store.usage_percent().await {
            Ok(usage_percent) if usage_percent >= QUOTA_WARNING_PERCENT => {
                tracing::warn!("[OfflineService] Storage {:.1}% full", usage_percent);
                self.events.publish(SyncEvent::StorageWarning { usage_percent });
            }
            Ok(_) => {}
            Err(e) => tracing::debug!("[OfflineService] Could not read storage usage: {}", e),
        }
        send_trigger(triggers, trigger);
    }
}

impl Drop for OfflineService {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.get_mut().take() {
            runtime.abort();
        }
    }
}
