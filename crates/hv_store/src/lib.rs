//! hv_store — local-first profile store for Haven
//!
//! Schema-versioned embedded storage (SQLite via sqlx) for the user's
//! identity/trust profile, plus the services that own it. The profile
//! stays valid and usable entirely offline; cloud sync (hv_sync) is
//! layered on top and is never a dependency for local reads or writes.
//!
//! # Module layout
//! - `db`       — Store handle: open/migrate/seed, clear, stats
//! - `models`   — domain types + SQL row mappings
//! - `trust`    — pure trust-score computation
//! - `profiles` — transactional profile service (CRUD + task mutations)
//! - `legacy`   — flat-storage migration pipeline
//! - `export`   — versioned JSON export envelope
//! - `seed`     — task definition reference catalog
//! - `error`    — unified error type
//!
//! # Migration
//! SQLx migrations in `migrations/` are run on first open; the task
//! catalog is seeded once, with a completed entry in the migration log.

pub mod db;
pub mod error;
pub mod export;
pub mod legacy;
pub mod models;
pub mod profiles;
pub mod seed;
pub mod trust;

pub use db::{Store, StoreStats, SCHEMA_VERSION};
pub use error::StoreError;
pub use export::{export_profile, export_profiles};
pub use legacy::{LegacyMigrator, MigrationStats};
pub use models::Profile;
pub use profiles::{AccountSeed, ProfileService};
pub use trust::compute_trust_score;
