//! Remote document-store client.
//!
//! The engine only needs three things from the remote side: atomic
//! batched writes, point reads, and a change feed per
//! (collection, user) pair — everything else (auth, transport,
//! timeouts) lives behind [`RemoteStore`]. Tests swap in an in-memory
//! fake; production uses [`HttpRemote`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration};
use tracing::warn;

use crate::error::SyncError;
use crate::queue::SyncQueueItem;

/// A remote document: keyed by (collection, documentId), carrying an
/// application-level version integer used solely for conflict
/// detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteDocument {
    pub collection: String,
    pub document_id: String,
    pub version: i64,
    pub data: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchFailure {
    pub item_id: String,
    pub error: String,
}

/// Result of a batch commit. An empty `failed` list means every item
/// in the batch was committed.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BatchOutcome {
    #[serde(default)]
    pub failed: Vec<BatchFailure>,
}

#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Commit one batch as an atomic remote write. Per-item failures
    /// come back in the outcome; a transport-level `Err` means the
    /// whole batch was rejected.
    async fn commit_batch(&self, items: &[SyncQueueItem]) -> Result<BatchOutcome, SyncError>;

    async fn fetch_document(
        &self,
        collection: &str,
        document_id: &str,
    ) -> Result<Option<RemoteDocument>, SyncError>;

    /// Stream remote changes for `(collection, user_id)` into `tx`
    /// until the returned task is aborted. The engine tracks and
    /// releases every handle it creates.
    fn subscribe(
        &self,
        collection: &str,
        user_id: &str,
        tx: UnboundedSender<RemoteDocument>,
    ) -> JoinHandle<()>;
}

// ── HTTPS implementation ─────────────────────────────────────────────────────

const POLL_INTERVAL_SECS: u64 = 15;

#[derive(Clone)]
pub struct HttpRemote {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpRemote {
    pub fn new(base_url: &str, token: &str) -> Result<Self, SyncError> {
        let client = reqwest::Client::builder()
            .user_agent("haven-sync/0.1")
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }
}

#[async_trait]
impl RemoteStore for HttpRemote {
    async fn commit_batch(&self, items: &[SyncQueueItem]) -> Result<BatchOutcome, SyncError> {
        let url = format!("{}/v1/batch", self.base_url);
        let res = self
            .client
            .post(url)
            .bearer_auth(&self.token)
            .json(&serde_json::json!({ "writes": items }))
            .send()
            .await?;
        if !res.status().is_success() {
            return Err(SyncError::Transport(format!(
                "batch commit rejected with status {}",
                res.status()
            )));
        }
        Ok(res.json::<BatchOutcome>().await?)
    }

    async fn fetch_document(
        &self,
        collection: &str,
        document_id: &str,
    ) -> Result<Option<RemoteDocument>, SyncError> {
        let url = format!("{}/v1/{}/{}", self.base_url, collection, document_id);
        let res = self.client.get(url).bearer_auth(&self.token).send().await?;
        if res.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !res.status().is_success() {
            return Err(SyncError::Transport(format!(
                "document fetch failed with status {}",
                res.status()
            )));
        }
        Ok(Some(res.json::<RemoteDocument>().await?))
    }

    fn subscribe(
        &self,
        collection: &str,
        user_id: &str,
        tx: UnboundedSender<RemoteDocument>,
    ) -> JoinHandle<()> {
        let client = self.client.clone();
        let token = self.token.clone();
        let base = format!("{}/v1/{}/changes?user={}", self.base_url, collection, user_id);
        let collection = collection.to_string();
        tokio::spawn(async move {
            let mut since_version: i64 = 0;
            let mut ticker = time::interval(Duration::from_secs(POLL_INTERVAL_SECS));
            loop {
                ticker.tick().await;
                let poll_url = format!("{base}&since_version={since_version}");
                let res = match client.get(&poll_url).bearer_auth(&token).send().await {
                    Ok(res) if res.status().is_success() => res,
                    Ok(res) => {
                        warn!(collection = %collection, status = %res.status(), "change poll failed");
                        continue;
                    }
                    Err(e) => {
                        warn!(collection = %collection, error = %e, "change poll failed");
                        continue;
                    }
                };
                let docs = match res.json::<Vec<RemoteDocument>>().await {
                    Ok(docs) => docs,
                    Err(e) => {
                        warn!(collection = %collection, error = %e, "change feed malformed");
                        continue;
                    }
                };
                for doc in docs {
                    since_version = since_version.max(doc.version);
                    if tx.send(doc).is_err() {
                        // Receiver dropped: the engine shut the channel.
                        return;
                    }
                }
            }
        })
    }
}
