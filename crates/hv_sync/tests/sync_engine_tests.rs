//! Integration tests for the sync engine against an in-memory remote:
//! offline queueing, drains, retry/abandon behaviour, and conflict
//! resolution for all three strategies.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use tokio::task::JoinHandle;
use tokio::time::Duration;

use hv_store::models::{ContactInfo, SyncState};
use hv_store::{AccountSeed, ProfileService, Store};
use hv_sync::{
    BatchFailure, BatchOutcome, ConflictStrategy, ConnectivityChanged, RemoteDocument,
    RemoteStore, Resolution, SyncAction, SyncConfig, SyncEngine, SyncError, SyncQueueItem,
    PROFILES_COLLECTION,
};

#[derive(Default)]
struct FakeRemote {
    committed: Mutex<Vec<SyncQueueItem>>,
    batches: AtomicUsize,
    /// Document ids that fail per-item inside an otherwise good batch.
    failing_documents: Mutex<HashSet<String>>,
    /// When set, every batch is rejected at the transport level.
    reject_batches: AtomicBool,
    published: Mutex<Vec<RemoteDocument>>,
}

impl FakeRemote {
    fn committed_ids(&self) -> Vec<String> {
        self.committed.lock().iter().map(|i| i.document_id.clone()).collect()
    }
}

#[async_trait]
impl RemoteStore for FakeRemote {
    async fn commit_batch(&self, items: &[SyncQueueItem]) -> Result<BatchOutcome, SyncError> {
        self.batches.fetch_add(1, Ordering::Relaxed);
        if self.reject_batches.load(Ordering::Relaxed) {
            return Err(SyncError::Transport("remote unavailable".to_string()));
        }
        let failing = self.failing_documents.lock();
        let mut outcome = BatchOutcome::default();
        for item in items {
            if failing.contains(&item.document_id) {
                outcome.failed.push(BatchFailure {
                    item_id: item.id.clone(),
                    error: "document rejected".to_string(),
                });
            } else {
                self.committed.lock().push(item.clone());
            }
        }
        Ok(outcome)
    }

    async fn fetch_document(
        &self,
        collection: &str,
        document_id: &str,
    ) -> Result<Option<RemoteDocument>, SyncError> {
        Ok(self
            .published
            .lock()
            .iter()
            .find(|d| d.collection == collection && d.document_id == document_id)
            .cloned())
    }

    fn subscribe(
        &self,
        _collection: &str,
        _user_id: &str,
        tx: UnboundedSender<RemoteDocument>,
    ) -> JoinHandle<()> {
        let docs = self.published.lock().clone();
        tokio::spawn(async move {
            for doc in docs {
                if tx.send(doc).is_err() {
                    return;
                }
            }
            std::future::pending::<()>().await;
        })
    }
}

async fn open_engine(
    config: SyncConfig,
) -> (tempfile::TempDir, ProfileService, Arc<FakeRemote>, Arc<SyncEngine>) {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(&dir.path().join("haven.db")).await.unwrap();
    let service = ProfileService::new(store);
    let remote = Arc::new(FakeRemote::default());
    let engine = SyncEngine::new(service.clone(), remote.clone(), config)
        .await
        .unwrap();
    (dir, service, remote, engine)
}

fn manual_config() -> SyncConfig {
    SyncConfig {
        auto_sync: false,
        retry_delay: Duration::from_secs(60),
        ..SyncConfig::default()
    }
}

async fn enqueue_update(engine: &Arc<SyncEngine>, document_id: &str) {
    engine
        .enqueue(
            SyncAction::Update,
            PROFILES_COLLECTION,
            document_id,
            json!({"id": document_id}),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn offline_enqueue_accumulates_without_error() {
    let (_dir, _service, remote, engine) = open_engine(manual_config()).await;

    enqueue_update(&engine, "doc-1").await;
    enqueue_update(&engine, "doc-2").await;

    let status = engine.status();
    assert!(!status.online);
    assert_eq!(status.pending_items, 2);
    assert!(status.last_error.is_none());

    // Draining while offline is a no-op, not an error.
    let report = engine.process_queue().await.unwrap();
    assert_eq!(report.committed, 0);
    assert!(remote.committed.lock().is_empty());
}

#[tokio::test]
async fn queue_survives_an_engine_restart() {
    let (_dir, service, remote, engine) = open_engine(manual_config()).await;
    enqueue_update(&engine, "doc-1").await;
    enqueue_update(&engine, "doc-2").await;
    drop(engine);

    let engine = SyncEngine::new(service, remote, manual_config()).await.unwrap();
    assert_eq!(engine.status().pending_items, 2);
}

#[tokio::test]
async fn drain_commits_each_item_exactly_once() {
    let (_dir, _service, remote, engine) = open_engine(manual_config()).await;
    enqueue_update(&engine, "doc-1").await;
    enqueue_update(&engine, "doc-2").await;
    enqueue_update(&engine, "doc-3").await;

    engine.set_online(true);
    let report = engine.process_queue().await.unwrap();
    assert_eq!(report.committed, 3);
    assert_eq!(report.failed, 0);
    assert_eq!(remote.committed_ids(), vec!["doc-1", "doc-2", "doc-3"]);

    let status = engine.status();
    assert_eq!(status.pending_items, 0);
    assert!(status.last_sync_at.is_some());

    // A second drain has nothing to do and commits nothing new.
    let report = engine.process_queue().await.unwrap();
    assert_eq!(report.committed, 0);
    assert_eq!(remote.committed.lock().len(), 3);
}

#[tokio::test]
async fn drain_respects_the_batch_size() {
    let config = SyncConfig { batch_size: 2, ..manual_config() };
    let (_dir, _service, remote, engine) = open_engine(config).await;
    for i in 0..5 {
        enqueue_update(&engine, &format!("doc-{i}")).await;
    }

    engine.set_online(true);
    let report = engine.process_queue().await.unwrap();
    assert_eq!(report.committed, 5);
    assert_eq!(remote.batches.load(Ordering::Relaxed), 3);
}

#[tokio::test]
async fn going_online_triggers_an_automatic_drain() {
    let config = SyncConfig { retry_delay: Duration::from_secs(60), ..SyncConfig::default() };
    let (_dir, _service, remote, engine) = open_engine(config).await;
    enqueue_update(&engine, "doc-1").await;

    engine.set_online(true);
    for _ in 0..100 {
        if engine.status().pending_items == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(engine.status().pending_items, 0);
    assert_eq!(remote.committed_ids(), vec!["doc-1"]);
}

#[tokio::test]
async fn failing_item_is_retried_then_abandoned_at_the_ceiling() {
    let config = SyncConfig { max_retries: 2, ..manual_config() };
    let (_dir, _service, remote, engine) = open_engine(config).await;
    remote.failing_documents.lock().insert("doc-bad".to_string());
    enqueue_update(&engine, "doc-good").await;
    enqueue_update(&engine, "doc-bad").await;
    engine.set_online(true);

    let report = engine.process_queue().await.unwrap();
    assert_eq!(report.committed, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(report.abandoned, 0);
    assert_eq!(engine.status().pending_items, 1);

    // Second failure hits max_retries: the item is dropped for good.
    let report = engine.process_queue().await.unwrap();
    assert_eq!(report.abandoned, 1);
    assert_eq!(engine.status().pending_items, 0);
    assert_eq!(engine.status().last_error.as_deref(), Some("document rejected"));
    assert_eq!(remote.committed_ids(), vec!["doc-good"]);
}

#[tokio::test]
async fn rejected_batch_sets_last_error_and_keeps_the_queue() {
    let (_dir, _service, remote, engine) = open_engine(manual_config()).await;
    remote.reject_batches.store(true, Ordering::Relaxed);
    enqueue_update(&engine, "doc-1").await;
    engine.set_online(true);

    let report = engine.process_queue().await.unwrap();
    assert_eq!(report.committed, 0);
    assert_eq!(report.failed, 1);
    assert_eq!(engine.status().pending_items, 1);
    assert!(engine
        .status()
        .last_error
        .as_deref()
        .unwrap()
        .contains("remote unavailable"));

    // Once the remote recovers, the same item drains normally.
    remote.reject_batches.store(false, Ordering::Relaxed);
    let report = engine.process_queue().await.unwrap();
    assert_eq!(report.committed, 1);
    assert_eq!(engine.status().pending_items, 0);
}

// ── Conflict handling ────────────────────────────────────────────────────────

async fn seeded_profile(service: &ProfileService) -> hv_store::Profile {
    let id = service
        .create_profile(AccountSeed {
            display_name: "Jane Dale".to_string(),
            email: Some("jane@example.com".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    service.peek_profile(&id).await.unwrap()
}

fn remote_doc(profile: &hv_store::Profile, version: i64) -> RemoteDocument {
    RemoteDocument {
        collection: PROFILES_COLLECTION.to_string(),
        document_id: profile.id.clone(),
        version,
        data: serde_json::to_value(profile).unwrap(),
    }
}

#[tokio::test]
async fn changes_outside_the_profiles_collection_are_ignored() {
    let (_dir, service, _remote, engine) = open_engine(manual_config()).await;
    let profile = seeded_profile(&service).await;
    let mut doc = remote_doc(&profile, 2);
    doc.collection = "settings".to_string();

    assert_eq!(engine.handle_remote_change(doc).await.unwrap(), Resolution::Ignored);
}

#[tokio::test]
async fn matching_versions_are_in_sync() {
    let (_dir, service, _remote, engine) = open_engine(manual_config()).await;
    let profile = seeded_profile(&service).await;

    let resolution = engine.handle_remote_change(remote_doc(&profile, 1)).await.unwrap();
    assert_eq!(resolution, Resolution::InSync);
    assert_eq!(engine.status().pending_items, 0);
}

#[tokio::test]
async fn remote_document_without_a_local_copy_is_accepted() {
    let (_dir, service, _remote, engine) = open_engine(manual_config()).await;
    let profile = seeded_profile(&service).await;
    service.delete_profile(&profile.id).await.unwrap();

    let resolution = engine.handle_remote_change(remote_doc(&profile, 3)).await.unwrap();
    assert_eq!(resolution, Resolution::AcceptedRemote);

    let restored = service.peek_profile(&profile.id).await.unwrap();
    assert_eq!(restored.sync.version, 3);
    assert_eq!(restored.sync.status, SyncState::Synced);
    assert!(restored.sync.last_synced_at.is_some());
}

#[tokio::test]
async fn merge_strategy_keeps_local_fields_and_bumps_the_version() {
    let (_dir, service, _remote, engine) = open_engine(manual_config()).await;
    let local = seeded_profile(&service).await;

    let mut remote_copy = local.clone();
    remote_copy.account.display_name = "Jane (remote)".to_string();
    remote_copy.data.contact =
        Some(ContactInfo { city: Some("Bergen".to_string()), ..Default::default() });

    let resolution = engine.handle_remote_change(remote_doc(&remote_copy, 3)).await.unwrap();
    assert_eq!(resolution, Resolution::Merged { version: 4 });

    let merged = service.peek_profile(&local.id).await.unwrap();
    // Local fields win; remote-only sections fill the gaps.
    assert_eq!(merged.account.display_name, "Jane Dale");
    assert_eq!(
        merged.data.contact.as_ref().and_then(|c| c.city.as_deref()),
        Some("Bergen")
    );
    assert_eq!(merged.sync.version, 4);
    assert_eq!(merged.sync.status, SyncState::Pending);
    // The merged copy is queued for upload.
    assert_eq!(engine.status().pending_items, 1);
}

#[tokio::test]
async fn local_strategy_keeps_the_local_copy_and_reuploads_it() {
    let config = SyncConfig { conflict_strategy: ConflictStrategy::Local, ..manual_config() };
    let (_dir, service, _remote, engine) = open_engine(config).await;
    let local = seeded_profile(&service).await;

    let mut remote_copy = local.clone();
    remote_copy.account.display_name = "Jane (remote)".to_string();

    let resolution = engine.handle_remote_change(remote_doc(&remote_copy, 3)).await.unwrap();
    assert_eq!(resolution, Resolution::KeptLocal);

    let kept = service.peek_profile(&local.id).await.unwrap();
    assert_eq!(kept.account.display_name, "Jane Dale");
    assert_eq!(kept.sync.version, 1);
    assert_eq!(engine.status().pending_items, 1);
}

#[tokio::test]
async fn remote_strategy_overwrites_the_local_copy() {
    let config = SyncConfig { conflict_strategy: ConflictStrategy::Remote, ..manual_config() };
    let (_dir, service, _remote, engine) = open_engine(config).await;
    let local = seeded_profile(&service).await;

    let mut remote_copy = local.clone();
    remote_copy.account.display_name = "Jane (remote)".to_string();

    let resolution = engine.handle_remote_change(remote_doc(&remote_copy, 3)).await.unwrap();
    assert_eq!(resolution, Resolution::AcceptedRemote);

    let overwritten = service.peek_profile(&local.id).await.unwrap();
    assert_eq!(overwritten.account.display_name, "Jane (remote)");
    assert_eq!(overwritten.sync.version, 3);
    assert_eq!(overwritten.sync.status, SyncState::Synced);
    assert_eq!(engine.status().pending_items, 0);
}

// ── Control loop and listeners ───────────────────────────────────────────────

#[tokio::test]
async fn control_loop_applies_connectivity_and_remote_changes() {
    let (_dir, service, _remote, engine) = open_engine(manual_config()).await;
    let profile = seeded_profile(&service).await;
    service.delete_profile(&profile.id).await.unwrap();

    let (conn_tx, conn_rx) = unbounded_channel();
    let (change_tx, change_rx) = unbounded_channel();
    let handle = engine.spawn_control_loop(conn_rx, change_rx);

    conn_tx.send(ConnectivityChanged(true)).unwrap();
    change_tx.send(remote_doc(&profile, 2)).unwrap();

    for _ in 0..100 {
        if engine.status().online && service.peek_profile(&profile.id).await.is_ok() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(engine.status().online);
    assert_eq!(service.peek_profile(&profile.id).await.unwrap().sync.version, 2);

    // Closing both channels stops the loop.
    drop(conn_tx);
    drop(change_tx);
    handle.await.unwrap();
}

#[tokio::test]
async fn control_loop_records_remote_change_failures_on_status() {
    let (_dir, _service, _remote, engine) = open_engine(manual_config()).await;
    let (conn_tx, conn_rx) = unbounded_channel();
    let (change_tx, change_rx) = unbounded_channel();
    let handle = engine.spawn_control_loop(conn_rx, change_rx);

    // A document that cannot be applied locally: no local copy, and a
    // payload that does not deserialize into a profile.
    change_tx
        .send(RemoteDocument {
            collection: PROFILES_COLLECTION.to_string(),
            document_id: "doc-broken".to_string(),
            version: 2,
            data: json!({"bogus": true}),
        })
        .unwrap();

    for _ in 0..100 {
        if engine.status().last_error.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(engine.status().last_error.is_some());

    drop(conn_tx);
    drop(change_tx);
    handle.await.unwrap();
}

#[tokio::test]
async fn subscriptions_deliver_published_documents_until_released() {
    let (_dir, service, remote, engine) = open_engine(manual_config()).await;
    let profile = seeded_profile(&service).await;
    remote.published.lock().push(remote_doc(&profile, 2));

    let (tx, mut rx) = unbounded_channel();
    let key = engine.subscribe(PROFILES_COLLECTION, &profile.account.id, tx);
    assert_eq!(key, format!("profiles:{}", profile.account.id));

    let doc = rx.recv().await.expect("published document");
    assert_eq!(doc.version, 2);

    engine.unsubscribe(&key);
    engine.release_listeners();
    assert!(rx.recv().await.is_none());
}
