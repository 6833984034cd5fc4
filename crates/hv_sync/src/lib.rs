//! Cloud synchronisation for the Haven profile store.
//!
//! - [`queue`]: durable outbound queue, persisted next to the profiles.
//! - [`remote`]: the [`RemoteStore`] seam plus the HTTP implementation.
//! - [`conflict`]: version conflict detection and document merging.
//! - [`engine`]: the [`SyncEngine`] tying it together — connectivity
//!   handling, batched drains, retries and realtime listeners.

pub mod conflict;
pub mod engine;
pub mod error;
pub mod queue;
pub mod remote;

pub use conflict::{ConflictStrategy, Resolution};
pub use engine::{
    ConnectivityChanged, DrainReport, SyncConfig, SyncEngine, SyncStatus, PROFILES_COLLECTION,
};
pub use error::SyncError;
pub use queue::{SyncAction, SyncQueueItem};
pub use remote::{BatchFailure, BatchOutcome, HttpRemote, RemoteDocument, RemoteStore};
