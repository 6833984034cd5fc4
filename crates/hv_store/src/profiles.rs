//! Profile service: transactional CRUD façade over the store.
//!
//! Every public operation is one SQLite transaction across the
//! profiles + accounts + tasks collections — either all three reflect
//! the change or none do. Trust scores are recomputed and persisted in
//! the same transaction as the task mutation that changed them, so a
//! caller can never observe a stale score.

use chrono::Utc;
use serde_json::Value;
use sqlx::{Sqlite, Transaction};
use tracing::info;
use uuid::Uuid;

use crate::db::Store;
use crate::error::StoreError;
use crate::models::{
    Account, AccountRow, Profile, ProfileData, ProfileRow, TaskRow, TaskStatus, TrustScore,
};
use crate::trust::compute_trust_score;

/// Seed data for a new profile. The PIN/password arrive in plaintext
/// and are hashed before anything touches the database.
#[derive(Debug, Clone, Default)]
pub struct AccountSeed {
    pub display_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub pin: Option<String>,
    pub password: Option<String>,
}

#[derive(Clone)]
pub struct ProfileService {
    store: Store,
}

impl ProfileService {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Create a profile, its account, and one task status per task
    /// definition, all in one transaction.
    pub async fn create_profile(&self, seed: AccountSeed) -> Result<String, StoreError> {
        if seed.display_name.trim().is_empty() {
            return Err(StoreError::Validation("display name must not be empty".into()));
        }
        let mut account = Account::new(seed.display_name.trim(), seed.email, seed.phone);
        if let Some(pin) = &seed.pin {
            account.set_pin(pin)?;
        }
        if let Some(password) = &seed.password {
            account.set_password(password)?;
        }
        self.create_with_account(account, ProfileData::default()).await
    }

    /// Create a profile around an already-built account (credentials
    /// already hashed). Used directly by the legacy migration pipeline.
    pub async fn create_with_account(
        &self,
        account: Account,
        data: ProfileData,
    ) -> Result<String, StoreError> {
        let definitions = self.store.task_definitions().await?;
        let tasks: Vec<TaskStatus> = definitions.iter().map(TaskStatus::for_definition).collect();
        let trust = compute_trust_score(&tasks);
        let profile_id = Uuid::new_v4().to_string();
        let now = Utc::now();

        let mut tx = self.store.pool.begin().await?;
        // Explicit duplicate check inside the transaction; the unique
        // index on accounts.email is the backstop.
        if let Some(email) = &account.email {
            let existing: Option<(String,)> =
                sqlx::query_as("SELECT id FROM accounts WHERE email = ?1")
                    .bind(email)
                    .fetch_optional(&mut *tx)
                    .await?;
            if existing.is_some() {
                return Err(StoreError::DuplicateAccount(email.clone()));
            }
        }

        insert_account(&mut tx, &account).await?;
        sqlx::query(
            "INSERT INTO profiles \
             (id, account_id, profile_data, trust_score, created_at, updated_at, \
              sync_status, last_synced_at, remote_id, version) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'local', NULL, NULL, 1)",
        )
        .bind(&profile_id)
        .bind(&account.id)
        .bind(serde_json::to_string(&data)?)
        .bind(serde_json::to_string(&trust)?)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        for task in &tasks {
            insert_task(&mut tx, &profile_id, task).await?;
        }
        tx.commit().await?;

        info!(profile_id = %profile_id, tasks = tasks.len(), "created profile");
        Ok(profile_id)
    }

    /// Load a profile with its account and hydrated task statuses.
    /// Bumps `last_accessed_at`.
    pub async fn get_profile(&self, id: &str) -> Result<Profile, StoreError> {
        let touched = sqlx::query("UPDATE profiles SET last_accessed_at = ?1 WHERE id = ?2")
            .bind(Utc::now())
            .bind(id)
            .execute(&self.store.pool)
            .await?;
        if touched.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("profile {id}")));
        }
        self.load_profile(id).await
    }

    /// Load a profile without bumping `last_accessed_at`. Used by the
    /// sync engine, which reads local copies without the user acting.
    pub async fn peek_profile(&self, id: &str) -> Result<Profile, StoreError> {
        self.load_profile(id).await
    }

    /// All profiles, hydrated. Used by export.
    pub async fn list_profiles(&self) -> Result<Vec<Profile>, StoreError> {
        let ids: Vec<(String,)> =
            sqlx::query_as("SELECT id FROM profiles ORDER BY created_at, rowid")
                .fetch_all(&self.store.pool)
                .await?;
        let mut profiles = Vec::with_capacity(ids.len());
        for (id,) in ids {
            profiles.push(self.load_profile(&id).await?);
        }
        Ok(profiles)
    }

    /// Full-document replace of profile + account + every task status
    /// that carries a storage id. Replacing rather than patching avoids
    /// partial-write ambiguity when the caller holds stale fields.
    /// `updated_at` is stamped here — callers cannot backdate it.
    pub async fn update_profile(&self, profile: &Profile) -> Result<(), StoreError> {
        let now = Utc::now();
        let mut tx = self.store.pool.begin().await?;

        if let Some(email) = &profile.account.email {
            let clash: Option<(String,)> =
                sqlx::query_as("SELECT id FROM accounts WHERE email = ?1 AND id != ?2")
                    .bind(email)
                    .bind(&profile.account.id)
                    .fetch_optional(&mut *tx)
                    .await?;
            if clash.is_some() {
                return Err(StoreError::DuplicateAccount(email.clone()));
            }
        }

        let updated = sqlx::query(
            "UPDATE profiles SET profile_data = ?1, trust_score = ?2, updated_at = ?3, \
             sync_status = ?4, last_synced_at = ?5, remote_id = ?6, version = ?7 \
             WHERE id = ?8",
        )
        .bind(serde_json::to_string(&profile.data)?)
        .bind(serde_json::to_string(&profile.trust)?)
        .bind(now)
        .bind(profile.sync.status.as_str())
        .bind(profile.sync.last_synced_at)
        .bind(&profile.sync.remote_id)
        .bind(profile.sync.version)
        .bind(&profile.id)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("profile {}", profile.id)));
        }

        sqlx::query(
            "UPDATE accounts SET display_name = ?1, email = ?2, phone = ?3, \
             pin_credential = ?4, password_credential = ?5, updated_at = ?6 \
             WHERE id = ?7",
        )
        .bind(&profile.account.display_name)
        .bind(&profile.account.email)
        .bind(&profile.account.phone)
        .bind(credential_json(&profile.account.pin)?)
        .bind(credential_json(&profile.account.password)?)
        .bind(now)
        .bind(&profile.account.id)
        .execute(&mut *tx)
        .await?;

        for task in profile.tasks.iter().filter(|t| !t.id.is_empty()) {
            update_task(&mut tx, &profile.id, task).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Delete the profile, its account, and all task statuses in one
    /// transaction.
    pub async fn delete_profile(&self, id: &str) -> Result<(), StoreError> {
        let mut tx = self.store.pool.begin().await?;
        let account_id: Option<(String,)> =
            sqlx::query_as("SELECT account_id FROM profiles WHERE id = ?1")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
        let Some((account_id,)) = account_id else {
            return Err(StoreError::NotFound(format!("profile {id}")));
        };
        sqlx::query("DELETE FROM tasks WHERE profile_id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM profiles WHERE id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM accounts WHERE id = ?1")
            .bind(&account_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        info!(profile_id = %id, "deleted profile");
        Ok(())
    }

    /// Mark one task completed (optionally attaching task-specific
    /// payload) and persist the recomputed trust score in the same
    /// transaction. `task` may be the status id or the definition id.
    pub async fn complete_task(
        &self,
        profile_id: &str,
        task: &str,
        payload: Option<Value>,
    ) -> Result<(), StoreError> {
        self.mutate_task(profile_id, task, |status| {
            status.completed = true;
            status.completed_at = Some(Utc::now());
            if let Some(payload) = payload {
                status.payload = Some(payload);
            }
            Ok(())
        })
        .await
    }

    /// Reverse a completion. Verification cannot outlive completion, so
    /// it is cleared too.
    pub async fn uncomplete_task(&self, profile_id: &str, task: &str) -> Result<(), StoreError> {
        self.mutate_task(profile_id, task, |status| {
            status.completed = false;
            status.completed_at = None;
            status.verified = false;
            status.verified_at = None;
            Ok(())
        })
        .await
    }

    /// Mark a completed task as verified.
    pub async fn verify_task(&self, profile_id: &str, task: &str) -> Result<(), StoreError> {
        self.mutate_task(profile_id, task, |status| {
            if !status.completed {
                return Err(StoreError::Validation(
                    "cannot verify a task that is not completed".into(),
                ));
            }
            status.verified = true;
            status.verified_at = Some(Utc::now());
            Ok(())
        })
        .await
    }

    /// Case-insensitive substring match over name / email / phone.
    /// Unindexed full scan — local and small-N. Case folding happens
    /// in-process because SQLite's `lower()` only folds ASCII, which
    /// would miss non-ASCII names.
    pub async fn search_profiles(&self, query: &str) -> Result<Vec<Profile>, StoreError> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(vec![]);
        }
        let rows: Vec<(String, String, Option<String>, Option<String>)> = sqlx::query_as(
            "SELECT p.id, a.display_name, a.email, a.phone \
             FROM profiles p JOIN accounts a ON a.id = p.account_id \
             ORDER BY p.created_at, p.rowid",
        )
        .fetch_all(&self.store.pool)
        .await?;
        let mut profiles = Vec::new();
        for (id, name, email, phone) in rows {
            let hit = name.to_lowercase().contains(&needle)
                || email.map_or(false, |e| e.to_lowercase().contains(&needle))
                || phone.map_or(false, |p| p.to_lowercase().contains(&needle));
            if hit {
                profiles.push(self.load_profile(&id).await?);
            }
        }
        Ok(profiles)
    }

    /// Apply a remote aggregate: insert or fully replace the profile,
    /// its account, and its task set. Used by the sync engine when a
    /// remote document wins (or merges into) the local copy.
    pub async fn upsert_from_remote(&self, profile: &Profile) -> Result<(), StoreError> {
        let mut tx = self.store.pool.begin().await?;
        sqlx::query(
            "INSERT INTO accounts \
             (id, display_name, email, phone, pin_credential, password_credential, \
              created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8) \
             ON CONFLICT(id) DO UPDATE SET display_name = excluded.display_name, \
               email = excluded.email, phone = excluded.phone, \
               pin_credential = excluded.pin_credential, \
               password_credential = excluded.password_credential, \
               updated_at = excluded.updated_at",
        )
        .bind(&profile.account.id)
        .bind(&profile.account.display_name)
        .bind(&profile.account.email)
        .bind(&profile.account.phone)
        .bind(credential_json(&profile.account.pin)?)
        .bind(credential_json(&profile.account.password)?)
        .bind(profile.account.created_at)
        .bind(profile.account.updated_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO profiles \
             (id, account_id, profile_data, trust_score, created_at, updated_at, \
              last_accessed_at, sync_status, last_synced_at, remote_id, version) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11) \
             ON CONFLICT(id) DO UPDATE SET profile_data = excluded.profile_data, \
               trust_score = excluded.trust_score, updated_at = excluded.updated_at, \
               sync_status = excluded.sync_status, last_synced_at = excluded.last_synced_at, \
               remote_id = excluded.remote_id, version = excluded.version",
        )
        .bind(&profile.id)
        .bind(&profile.account.id)
        .bind(serde_json::to_string(&profile.data)?)
        .bind(serde_json::to_string(&profile.trust)?)
        .bind(profile.created_at)
        .bind(profile.updated_at)
        .bind(profile.last_accessed_at)
        .bind(profile.sync.status.as_str())
        .bind(profile.sync.last_synced_at)
        .bind(&profile.sync.remote_id)
        .bind(profile.sync.version)
        .execute(&mut *tx)
        .await?;

        // The remote document is authoritative for the task set.
        sqlx::query("DELETE FROM tasks WHERE profile_id = ?1")
            .bind(&profile.id)
            .execute(&mut *tx)
            .await?;
        for task in &profile.tasks {
            insert_task(&mut tx, &profile.id, task).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    // ── Internals ───────────────────────────────────────────────────────────

    async fn load_profile(&self, id: &str) -> Result<Profile, StoreError> {
        let profile_row: Option<ProfileRow> = sqlx::query_as(
            "SELECT id, account_id, profile_data, trust_score, created_at, updated_at, \
             last_accessed_at, sync_status, last_synced_at, remote_id, version \
             FROM profiles WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.store.pool)
        .await?;
        let Some(profile_row) = profile_row else {
            return Err(StoreError::NotFound(format!("profile {id}")));
        };

        let account_row: AccountRow = sqlx::query_as(
            "SELECT id, display_name, email, phone, pin_credential, password_credential, \
             created_at, updated_at FROM accounts WHERE id = ?1",
        )
        .bind(&profile_row.account_id)
        .fetch_one(&self.store.pool)
        .await?;

        let task_rows: Vec<TaskRow> = sqlx::query_as(
            "SELECT t.id, t.profile_id, t.definition_id, t.category, t.completed, \
             t.completed_at, t.verified, t.verified_at, t.payload \
             FROM tasks t JOIN task_definitions d ON d.id = t.definition_id \
             WHERE t.profile_id = ?1 ORDER BY d.rowid",
        )
        .bind(id)
        .fetch_all(&self.store.pool)
        .await?;

        Profile::from_rows(profile_row, account_row, task_rows)
    }

    async fn mutate_task<F>(&self, profile_id: &str, task: &str, f: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut TaskStatus) -> Result<(), StoreError>,
    {
        let mut tx = self.store.pool.begin().await?;
        let rows: Vec<TaskRow> = sqlx::query_as(
            "SELECT t.id, t.profile_id, t.definition_id, t.category, t.completed, \
             t.completed_at, t.verified, t.verified_at, t.payload \
             FROM tasks t JOIN task_definitions d ON d.id = t.definition_id \
             WHERE t.profile_id = ?1 ORDER BY d.rowid",
        )
        .bind(profile_id)
        .fetch_all(&mut *tx)
        .await?;
        if rows.is_empty() {
            return Err(StoreError::NotFound(format!("profile {profile_id}")));
        }

        let mut tasks = rows
            .into_iter()
            .map(TaskStatus::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        let target = tasks
            .iter_mut()
            .find(|t| t.id == task || t.definition_id == task)
            .ok_or_else(|| StoreError::NotFound(format!("task {task}")))?;
        f(target)?;
        let target = target.clone();
        update_task(&mut tx, profile_id, &target).await?;

        let trust = compute_trust_score(&tasks);
        sqlx::query("UPDATE profiles SET trust_score = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(serde_json::to_string(&trust)?)
            .bind(Utc::now())
            .bind(profile_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}

fn credential_json(
    block: &Option<crate::models::CredentialBlock>,
) -> Result<Option<String>, StoreError> {
    Ok(block.as_ref().map(serde_json::to_string).transpose()?)
}

async fn insert_account(
    tx: &mut Transaction<'_, Sqlite>,
    account: &Account,
) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO accounts \
         (id, display_name, email, phone, pin_credential, password_credential, \
          created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
    )
    .bind(&account.id)
    .bind(&account.display_name)
    .bind(&account.email)
    .bind(&account.phone)
    .bind(credential_json(&account.pin)?)
    .bind(credential_json(&account.password)?)
    .bind(account.created_at)
    .bind(account.updated_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn insert_task(
    tx: &mut Transaction<'_, Sqlite>,
    profile_id: &str,
    task: &TaskStatus,
) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO tasks \
         (id, profile_id, definition_id, category, completed, completed_at, \
          verified, verified_at, payload) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
    )
    .bind(&task.id)
    .bind(profile_id)
    .bind(&task.definition_id)
    .bind(task.category.as_str())
    .bind(task.completed)
    .bind(task.completed_at)
    .bind(task.verified)
    .bind(task.verified_at)
    .bind(task.payload.as_ref().map(Value::to_string))
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn update_task(
    tx: &mut Transaction<'_, Sqlite>,
    profile_id: &str,
    task: &TaskStatus,
) -> Result<(), StoreError> {
    sqlx::query(
        "UPDATE tasks SET completed = ?1, completed_at = ?2, verified = ?3, \
         verified_at = ?4, payload = ?5 WHERE id = ?6 AND profile_id = ?7",
    )
    .bind(task.completed)
    .bind(task.completed_at)
    .bind(task.verified)
    .bind(task.verified_at)
    .bind(task.payload.as_ref().map(Value::to_string))
    .bind(&task.id)
    .bind(profile_id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}
