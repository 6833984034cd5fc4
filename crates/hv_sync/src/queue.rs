//! Durable operation queue.
//!
//! The queue is an owned struct: all mutation goes through its methods
//! and every mutation is persisted to the store's `sync_queue` table
//! before it is visible in memory, so a process restart resumes exactly
//! where the previous run stopped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use hv_store::Store;

use crate::error::SyncError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncAction {
    Create,
    Update,
    Delete,
}

impl SyncAction {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncAction::Create => "create",
            SyncAction::Update => "update",
            SyncAction::Delete => "delete",
        }
    }

    pub fn parse(s: &str) -> Result<Self, SyncError> {
        match s {
            "create" => Ok(SyncAction::Create),
            "update" => Ok(SyncAction::Update),
            "delete" => Ok(SyncAction::Delete),
            other => Err(SyncError::Transport(format!("unknown sync action: {other}"))),
        }
    }
}

/// One pending remote operation with its payload snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncQueueItem {
    pub id: String,
    pub action: SyncAction,
    pub collection: String,
    pub document_id: String,
    pub payload: serde_json::Value,
    pub enqueued_at: DateTime<Utc>,
    pub retries: u32,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
struct QueueRow {
    id: String,
    action: String,
    collection: String,
    document_id: String,
    payload: String,
    enqueued_at: DateTime<Utc>,
    retries: i64,
    last_error: Option<String>,
}

impl TryFrom<QueueRow> for SyncQueueItem {
    type Error = SyncError;

    fn try_from(row: QueueRow) -> Result<Self, SyncError> {
        Ok(SyncQueueItem {
            id: row.id,
            action: SyncAction::parse(&row.action)?,
            collection: row.collection,
            document_id: row.document_id,
            payload: serde_json::from_str(&row.payload)?,
            enqueued_at: row.enqueued_at,
            retries: row.retries.max(0) as u32,
            last_error: row.last_error,
        })
    }
}

pub struct SyncQueue {
    store: Store,
    items: Vec<SyncQueueItem>,
}

impl SyncQueue {
    /// Load the persisted queue, oldest first.
    pub async fn load(store: Store) -> Result<Self, SyncError> {
        let rows: Vec<QueueRow> = sqlx::query_as(
            "SELECT id, action, collection, document_id, payload, enqueued_at, \
             retries, last_error FROM sync_queue ORDER BY enqueued_at, rowid",
        )
        .fetch_all(&store.pool)
        .await?;
        let items = rows
            .into_iter()
            .map(SyncQueueItem::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { store, items })
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Snapshot of the current items in queue order.
    pub fn snapshot(&self) -> Vec<SyncQueueItem> {
        self.items.clone()
    }

    /// Append an item and persist it.
    pub async fn push(&mut self, item: SyncQueueItem) -> Result<(), SyncError> {
        sqlx::query(
            "INSERT INTO sync_queue \
             (id, action, collection, document_id, payload, enqueued_at, retries, last_error) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .bind(&item.id)
        .bind(item.action.as_str())
        .bind(&item.collection)
        .bind(&item.document_id)
        .bind(item.payload.to_string())
        .bind(item.enqueued_at)
        .bind(item.retries as i64)
        .bind(&item.last_error)
        .execute(&self.store.pool)
        .await?;
        self.items.push(item);
        Ok(())
    }

    /// Remove a committed (or abandoned) item.
    pub async fn remove(&mut self, id: &str) -> Result<(), SyncError> {
        sqlx::query("DELETE FROM sync_queue WHERE id = ?1")
            .bind(id)
            .execute(&self.store.pool)
            .await?;
        self.items.retain(|i| i.id != id);
        Ok(())
    }

    /// Bump the retry counter after a failed delivery and persist it so
    /// retries survive a restart. Returns the new count.
    pub async fn record_failure(&mut self, id: &str, error: &str) -> Result<u32, SyncError> {
        let item = self
            .items
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or_else(|| SyncError::Transport(format!("queue item {id} vanished")))?;
        item.retries += 1;
        item.last_error = Some(error.to_string());
        sqlx::query("UPDATE sync_queue SET retries = ?1, last_error = ?2 WHERE id = ?3")
            .bind(item.retries as i64)
            .bind(&item.last_error)
            .bind(id)
            .execute(&self.store.pool)
            .await?;
        Ok(item.retries)
    }
}
