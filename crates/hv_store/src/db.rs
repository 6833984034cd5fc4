//! Database abstraction over SQLite via sqlx.

use std::path::Path;

use chrono::Utc;
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool};
use tracing::info;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{
    MigrationKind, MigrationRecord, MigrationRow, MigrationStatus, TaskDefinition,
    TaskDefinitionRow,
};
use crate::seed;

/// Schema generation recorded in the migration log at first run.
pub const SCHEMA_VERSION: i64 = 2;

/// Central store handle.  Cheap to clone (Arc internally).
#[derive(Clone)]
pub struct Store {
    pub pool: SqlitePool,
}

/// Per-collection counts for diagnostics. Observability only — never
/// drive business logic off these numbers.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub profiles: i64,
    pub accounts: i64,
    pub tasks: i64,
    pub task_definitions: i64,
    pub migration_records: i64,
    pub completed_tasks: i64,
}

impl Store {
    /// Open (or create) the SQLite database at `db_path`, run pending
    /// migrations, and seed the task catalog on first run.
    ///
    /// WAL journal mode and foreign-key enforcement are configured at
    /// connection time — SQLite forbids changing `journal_mode` inside
    /// a transaction and sqlx wraps every migration in one.
    ///
    /// Any failure here is fatal and returned to the caller; the store
    /// never proceeds with a partially initialised schema or seed.
    pub async fn open(db_path: &Path) -> Result<Self, StoreError> {
        let opts = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = SqlitePool::connect_with(opts).await?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StoreError::Migration(e.to_string()))?;

        let store = Self { pool };
        store.seed_if_first_run().await?;
        Ok(store)
    }

    /// First run = empty profiles collection and an unseeded catalog.
    /// Seeding runs in one transaction so a failure leaves nothing
    /// half-written, and records a completed migration log entry for
    /// the schema version.
    async fn seed_if_first_run(&self) -> Result<(), StoreError> {
        let profiles: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM profiles")
            .fetch_one(&self.pool)
            .await?;
        let definitions: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM task_definitions")
            .fetch_one(&self.pool)
            .await?;
        if profiles > 0 || definitions > 0 {
            return Ok(());
        }

        let catalog = seed::task_catalog();
        let started = Utc::now();
        let mut tx = self.pool.begin().await?;
        for def in &catalog {
            sqlx::query(
                "INSERT INTO task_definitions \
                 (id, title, description, category, points, required, verification_required) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )
            .bind(&def.id)
            .bind(&def.title)
            .bind(&def.description)
            .bind(def.category.as_str())
            .bind(def.points)
            .bind(def.required)
            .bind(def.verification_required)
            .execute(&mut *tx)
            .await?;
        }
        sqlx::query(
            "INSERT INTO migration_log \
             (id, target_version, kind, status, started_at, finished_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(SCHEMA_VERSION)
        .bind(MigrationKind::Schema.as_str())
        .bind(MigrationStatus::Completed.as_str())
        .bind(started)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        info!(tasks = catalog.len(), schema_version = SCHEMA_VERSION, "seeded task catalog");
        Ok(())
    }

    /// The full task definition catalog in seed order.
    pub async fn task_definitions(&self) -> Result<Vec<TaskDefinition>, StoreError> {
        let rows: Vec<TaskDefinitionRow> = sqlx::query_as(
            "SELECT id, title, description, category, points, required, verification_required \
             FROM task_definitions ORDER BY rowid",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TaskDefinition::try_from).collect()
    }

    /// Wipe user data (profiles, accounts, tasks). Task definitions and
    /// the migration audit log are reference data and survive; the sync
    /// queue belongs to the sync engine and is left alone.
    pub async fn clear(&self) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM tasks").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM profiles").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM accounts").execute(&mut *tx).await?;
        tx.commit().await?;
        info!("cleared user data");
        Ok(())
    }

    pub async fn stats(&self) -> Result<StoreStats, StoreError> {
        let count = |sql: &'static str| {
            let pool = self.pool.clone();
            async move {
                sqlx::query_scalar::<_, i64>(sql).fetch_one(&pool).await
            }
        };
        Ok(StoreStats {
            profiles: count("SELECT COUNT(*) FROM profiles").await?,
            accounts: count("SELECT COUNT(*) FROM accounts").await?,
            tasks: count("SELECT COUNT(*) FROM tasks").await?,
            task_definitions: count("SELECT COUNT(*) FROM task_definitions").await?,
            migration_records: count("SELECT COUNT(*) FROM migration_log").await?,
            completed_tasks: count("SELECT COUNT(*) FROM tasks WHERE completed = 1").await?,
        })
    }

    /// Migration audit trail, oldest first.
    pub async fn migration_records(&self) -> Result<Vec<MigrationRecord>, StoreError> {
        let rows: Vec<MigrationRow> = sqlx::query_as(
            "SELECT id, target_version, kind, status, started_at, finished_at, error, detail \
             FROM migration_log ORDER BY started_at, rowid",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(MigrationRecord::try_from).collect()
    }

    /// Append one migration audit entry.
    pub async fn record_migration(&self, record: &MigrationRecord) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO migration_log \
             (id, target_version, kind, status, started_at, finished_at, error, detail) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .bind(&record.id)
        .bind(record.target_version)
        .bind(record.kind.as_str())
        .bind(record.status.as_str())
        .bind(record.started_at)
        .bind(record.finished_at)
        .bind(&record.error)
        .bind(record.detail.as_ref().map(serde_json::Value::to_string))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
