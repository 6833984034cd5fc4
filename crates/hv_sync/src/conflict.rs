//! Conflict detection and resolution.
//!
//! A conflict is a version mismatch between the local and remote copy
//! of the same document. The merge strategy takes the remote document
//! as base and lets local fields override — the local device is assumed
//! to be the active edit session. That is a policy default, not a
//! proven invariant: it is configurable via
//! `SyncConfig::conflict_strategy` and pinned by tests so a change in
//! policy cannot drift in silently.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictStrategy {
    /// Keep and re-enqueue the local copy, discarding the remote.
    Local,
    /// Overwrite the local copy with the remote.
    Remote,
    /// Remote fields as base, local fields override; version becomes
    /// `max(local, remote) + 1`.
    #[default]
    Merge,
}

/// Outcome of handling one remote change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Collection not under sync management.
    Ignored,
    /// Versions matched; nothing to do.
    InSync,
    /// No local copy, or the remote strategy won: remote accepted as-is.
    AcceptedRemote,
    /// Local strategy: local kept and re-enqueued.
    KeptLocal,
    /// Merge strategy: merged document persisted at the given version.
    Merged { version: i64 },
}

/// No local copy ⇒ no conflict; otherwise any version difference is one.
pub fn is_conflict(local_version: Option<i64>, remote_version: i64) -> bool {
    match local_version {
        None => false,
        Some(v) => v != remote_version,
    }
}

pub fn merged_version(local: i64, remote: i64) -> i64 {
    local.max(remote) + 1
}

/// Merge two JSON documents: remote as base, local overriding per
/// field, recursing into objects present on both sides. Local scalars
/// (and arrays) win outright.
pub fn merge_documents(local: &Value, remote: &Value) -> Value {
    match (local, remote) {
        (Value::Object(local_map), Value::Object(remote_map)) => {
            let mut out = remote_map.clone();
            for (key, local_value) in local_map {
                let merged = match out.get(key) {
                    Some(remote_value) => merge_documents(local_value, remote_value),
                    None => local_value.clone(),
                };
                out.insert(key.clone(), merged);
            }
            Value::Object(out)
        }
        (local_value, _) => local_value.clone(),
    }
}
