//! Cloud sync engine.
//!
//! Local-first: the profile store never depends on the engine. The
//! engine drains an offline-durable queue into the remote store in
//! atomic batches, listens for remote changes, and resolves version
//! conflicts per the configured strategy. Failures land on the status
//! object — they are never thrown at profile callers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use hv_store::models::SyncState;
use hv_store::{Profile, ProfileService, StoreError};

use crate::conflict::{is_conflict, merge_documents, merged_version, ConflictStrategy, Resolution};
use crate::error::SyncError;
use crate::queue::{SyncAction, SyncQueue, SyncQueueItem};
use crate::remote::{RemoteDocument, RemoteStore};

/// The collection under sync management. Accounts and tasks travel
/// embedded in the profile aggregate document.
pub const PROFILES_COLLECTION: &str = "profiles";

/// Connectivity transition, delivered over an explicit channel so the
/// engine is testable without a real network environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectivityChanged(pub bool);

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub batch_size: usize,
    pub max_retries: u32,
    /// Fixed delay before a failed item is attempted again. Backoff is
    /// scheduled on a spawned task; it never blocks new enqueues.
    pub retry_delay: Duration,
    pub auto_sync: bool,
    pub conflict_strategy: ConflictStrategy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            max_retries: 3,
            retry_delay: Duration::from_secs(5),
            auto_sync: true,
            conflict_strategy: ConflictStrategy::default(),
        }
    }
}

/// Caller-facing status snapshot.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncStatus {
    pub online: bool,
    pub pending_items: usize,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Outcome of one queue drain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub committed: usize,
    pub failed: usize,
    pub abandoned: usize,
    /// True when the drain was skipped because another was in flight.
    pub skipped: bool,
}

#[derive(Debug, Default)]
struct StatusInner {
    last_sync_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

pub struct SyncEngine {
    service: ProfileService,
    remote: Arc<dyn RemoteStore>,
    config: SyncConfig,
    queue: tokio::sync::Mutex<SyncQueue>,
    pending: AtomicUsize,
    online: AtomicBool,
    /// Single-flight guard: only one drain runs at a time, so a
    /// connectivity event firing mid-drain cannot double-commit items.
    draining: AtomicBool,
    retry_scheduled: AtomicBool,
    status: parking_lot::Mutex<StatusInner>,
    listeners: parking_lot::Mutex<HashMap<String, JoinHandle<()>>>,
}

impl SyncEngine {
    /// Load the persisted queue and build the engine. Starts offline;
    /// connectivity arrives via [`ConnectivityChanged`] events.
    pub async fn new(
        service: ProfileService,
        remote: Arc<dyn RemoteStore>,
        config: SyncConfig,
    ) -> Result<Arc<Self>, SyncError> {
        let queue = SyncQueue::load(service.store().clone()).await?;
        let pending = queue.len();
        Ok(Arc::new(Self {
            service,
            remote,
            config,
            queue: tokio::sync::Mutex::new(queue),
            pending: AtomicUsize::new(pending),
            online: AtomicBool::new(false),
            draining: AtomicBool::new(false),
            retry_scheduled: AtomicBool::new(false),
            status: parking_lot::Mutex::new(StatusInner::default()),
            listeners: parking_lot::Mutex::new(HashMap::new()),
        }))
    }

    pub fn status(&self) -> SyncStatus {
        let inner = self.status.lock();
        SyncStatus {
            online: self.online.load(Ordering::Relaxed),
            pending_items: self.pending.load(Ordering::Relaxed),
            last_sync_at: inner.last_sync_at,
            last_error: inner.last_error.clone(),
        }
    }

    /// Record a local mutation that must propagate remotely. Never
    /// fails on being offline — the item simply waits in the durable
    /// queue. When online with auto-sync enabled, a drain is attempted
    /// immediately.
    pub async fn enqueue(
        self: &Arc<Self>,
        action: SyncAction,
        collection: &str,
        document_id: &str,
        payload: Value,
    ) -> Result<(), SyncError> {
        let item = SyncQueueItem {
            id: Uuid::new_v4().to_string(),
            action,
            collection: collection.to_string(),
            document_id: document_id.to_string(),
            payload,
            enqueued_at: Utc::now(),
            retries: 0,
            last_error: None,
        };
        {
            let mut queue = self.queue.lock().await;
            queue.push(item).await?;
            self.pending.store(queue.len(), Ordering::Relaxed);
        }
        if self.config.auto_sync && self.online.load(Ordering::Relaxed) {
            let engine = Arc::clone(self);
            tokio::spawn(async move {
                if let Err(e) = engine.process_queue().await {
                    warn!(error = %e, "drain after enqueue failed");
                }
            });
        }
        Ok(())
    }

    /// Drain the queue in fixed-size batches. A no-op while another
    /// drain is in flight, and while offline.
    pub async fn process_queue(self: &Arc<Self>) -> Result<DrainReport, SyncError> {
        if !self.online.load(Ordering::Relaxed) {
            return Ok(DrainReport::default());
        }
        if self
            .draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(DrainReport { skipped: true, ..DrainReport::default() });
        }
        let result = self.drain(self.config.batch_size).await;
        self.draining.store(false, Ordering::Release);
        result
    }

    async fn drain(self: &Arc<Self>, batch_size: usize) -> Result<DrainReport, SyncError> {
        let mut report = DrainReport::default();
        // One pass over a snapshot: items that fail stay queued for the
        // next (delayed) drain instead of being re-attempted hot.
        let items = { self.queue.lock().await.snapshot() };
        for batch in items.chunks(batch_size.max(1)) {
            match self.remote.commit_batch(batch).await {
                Ok(outcome) => {
                    let failures: HashMap<&str, &str> = outcome
                        .failed
                        .iter()
                        .map(|f| (f.item_id.as_str(), f.error.as_str()))
                        .collect();
                    let mut queue = self.queue.lock().await;
                    for item in batch {
                        match failures.get(item.id.as_str()) {
                            None => {
                                queue.remove(&item.id).await?;
                                report.committed += 1;
                            }
                            Some(error) => {
                                report.failed += 1;
                                if self.record_item_failure(&mut queue, item, error).await? {
                                    report.abandoned += 1;
                                }
                            }
                        }
                    }
                    self.pending.store(queue.len(), Ordering::Relaxed);
                }
                Err(e) => {
                    // Whole batch rejected: record it, bump every item's
                    // counter, and stop this drain. Sync is best-effort.
                    warn!(error = %e, items = batch.len(), "batch commit rejected");
                    let message = e.to_string();
                    self.status.lock().last_error = Some(message.clone());
                    let mut queue = self.queue.lock().await;
                    for item in batch {
                        report.failed += 1;
                        if self.record_item_failure(&mut queue, item, &message).await? {
                            report.abandoned += 1;
                        }
                    }
                    self.pending.store(queue.len(), Ordering::Relaxed);
                    break;
                }
            }
        }

        if report.committed > 0 {
            self.status.lock().last_sync_at = Some(Utc::now());
        }
        if report.failed > report.abandoned && self.pending.load(Ordering::Relaxed) > 0 {
            self.schedule_retry();
        }
        Ok(report)
    }

    /// Returns true when the item hit the retry ceiling and was
    /// abandoned (removed, no further retries; its last error is kept
    /// on the status object for diagnostics).
    async fn record_item_failure(
        &self,
        queue: &mut SyncQueue,
        item: &SyncQueueItem,
        error: &str,
    ) -> Result<bool, SyncError> {
        let retries = queue.record_failure(&item.id, error).await?;
        if retries >= self.config.max_retries {
            warn!(item = %item.id, retries, error = %error, "abandoning sync item");
            queue.remove(&item.id).await?;
            self.status.lock().last_error = Some(error.to_string());
            return Ok(true);
        }
        Ok(false)
    }

    fn schedule_retry(self: &Arc<Self>) {
        if self.retry_scheduled.swap(true, Ordering::AcqRel) {
            return;
        }
        let engine = Arc::clone(self);
        let delay = self.config.retry_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            engine.retry_scheduled.store(false, Ordering::Release);
            if let Err(e) = engine.process_queue().await {
                warn!(error = %e, "retry drain failed");
            }
        });
    }

    /// Flip the connectivity flag. Offline → online triggers a drain
    /// when auto-sync is enabled; online → offline only flips the flag
    /// and never aborts an in-flight commit.
    pub fn set_online(self: &Arc<Self>, online: bool) {
        let was_online = self.online.swap(online, Ordering::Relaxed);
        if online == was_online {
            return;
        }
        info!(online, "connectivity changed");
        if online && self.config.auto_sync {
            let engine = Arc::clone(self);
            tokio::spawn(async move {
                if let Err(e) = engine.process_queue().await {
                    warn!(error = %e, "drain after reconnect failed");
                }
            });
        }
    }

    /// Control loop over the engine's two input channels. Exits when
    /// both channels close.
    pub fn spawn_control_loop(
        self: &Arc<Self>,
        mut connectivity: UnboundedReceiver<ConnectivityChanged>,
        mut changes: UnboundedReceiver<RemoteDocument>,
    ) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = connectivity.recv() => match event {
                        Some(ConnectivityChanged(online)) => engine.set_online(online),
                        None => break,
                    },
                    doc = changes.recv() => match doc {
                        Some(doc) => {
                            if let Err(e) = engine.handle_remote_change(doc).await {
                                warn!(error = %e, "remote change handling failed");
                                engine.status.lock().last_error = Some(e.to_string());
                            }
                        }
                        None => break,
                    },
                }
            }
            info!("sync control loop stopped");
        })
    }

    /// Apply one remote change notification: detect a version conflict
    /// against the local copy and resolve it per the configured
    /// strategy. Conflicts are never surfaced as errors — the outcome
    /// is returned (and logged) instead.
    pub async fn handle_remote_change(
        self: &Arc<Self>,
        doc: RemoteDocument,
    ) -> Result<Resolution, SyncError> {
        if doc.collection != PROFILES_COLLECTION {
            return Ok(Resolution::Ignored);
        }
        let local = match self.service.peek_profile(&doc.document_id).await {
            Ok(profile) => Some(profile),
            Err(StoreError::NotFound(_)) => None,
            Err(e) => return Err(e.into()),
        };

        let Some(local) = local else {
            self.accept_remote(&doc).await?;
            return Ok(Resolution::AcceptedRemote);
        };
        if !is_conflict(Some(local.sync.version), doc.version) {
            return Ok(Resolution::InSync);
        }

        info!(
            document = %doc.document_id,
            local_version = local.sync.version,
            remote_version = doc.version,
            strategy = ?self.config.conflict_strategy,
            "resolving sync conflict"
        );
        match self.config.conflict_strategy {
            ConflictStrategy::Remote => {
                self.accept_remote(&doc).await?;
                Ok(Resolution::AcceptedRemote)
            }
            ConflictStrategy::Local => {
                let payload = serde_json::to_value(&local)?;
                self.enqueue(SyncAction::Update, PROFILES_COLLECTION, &doc.document_id, payload)
                    .await?;
                Ok(Resolution::KeptLocal)
            }
            ConflictStrategy::Merge => {
                let local_value = serde_json::to_value(&local)?;
                let merged = merge_documents(&local_value, &doc.data);
                let mut profile: Profile = serde_json::from_value(merged)?;
                let version = merged_version(local.sync.version, doc.version);
                profile.sync.version = version;
                profile.sync.status = SyncState::Pending;
                self.service.upsert_from_remote(&profile).await?;
                let payload = serde_json::to_value(&profile)?;
                self.enqueue(SyncAction::Update, PROFILES_COLLECTION, &doc.document_id, payload)
                    .await?;
                Ok(Resolution::Merged { version })
            }
        }
    }

    async fn accept_remote(&self, doc: &RemoteDocument) -> Result<(), SyncError> {
        let mut profile: Profile = serde_json::from_value(doc.data.clone())?;
        profile.sync.version = doc.version;
        profile.sync.status = SyncState::Synced;
        profile.sync.last_synced_at = Some(Utc::now());
        self.service.upsert_from_remote(&profile).await?;
        Ok(())
    }

    // ── Listeners ───────────────────────────────────────────────────────────

    /// Open a realtime subscription for `(collection, user)`. Replaces
    /// (and aborts) any previous subscription for the same pair.
    pub fn subscribe(
        &self,
        collection: &str,
        user_id: &str,
        tx: tokio::sync::mpsc::UnboundedSender<RemoteDocument>,
    ) -> String {
        let key = format!("{collection}:{user_id}");
        let handle = self.remote.subscribe(collection, user_id, tx);
        if let Some(previous) = self.listeners.lock().insert(key.clone(), handle) {
            previous.abort();
        }
        key
    }

    pub fn unsubscribe(&self, key: &str) {
        if let Some(handle) = self.listeners.lock().remove(key) {
            handle.abort();
        }
    }

    /// Release every live listener. Call on shutdown and on profile
    /// switches so no subscription leaks across users.
    pub fn release_listeners(&self) {
        for (_, handle) in self.listeners.lock().drain() {
            handle.abort();
        }
    }
}

impl Drop for SyncEngine {
    fn drop(&mut self) {
        for (_, handle) in self.listeners.lock().drain() {
            handle.abort();
        }
    }
}
