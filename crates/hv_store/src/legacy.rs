//! Legacy flat-storage migration pipeline.
//!
//! The predecessor app kept each profile as a JSON string in a flat
//! key space; a snapshot of that key space is a single JSON object
//! file (string key → raw JSON string). Each record moves through a
//! four-stage machine — detected → validated → transformed →
//! committed — with `failed` absorbing from validation or commit.
//!
//! Legacy PINs are stored in PLAINTEXT. They are hashed during the
//! transform stage, before anything touches the new store, and are
//! never written to a log.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::SCHEMA_VERSION;
use crate::error::StoreError;
use crate::models::{Account, MigrationKind, MigrationRecord, MigrationStatus, ProfileData};
use crate::profiles::ProfileService;

/// Key patterns the predecessor app used for profile records.
pub const LEGACY_KEY_PATTERNS: &[&str] = &["userProfile", "profile_", "user_profile_"];

/// One record parsed out of the legacy key space. Every field is
/// optional — validation decides what is usable.
#[derive(Debug, Clone, Deserialize)]
pub struct LegacyProfile {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    /// Plaintext legacy PIN. Hashed during transform; never logged.
    #[serde(default)]
    pub pin: Option<String>,
    #[serde(skip)]
    pub source_key: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationStage {
    Detected,
    Validated,
    Transformed,
    Committed,
    Failed,
}

/// Per-record outcome of a migration run.
#[derive(Debug, Clone, Serialize)]
pub struct RecordResult {
    pub source_key: String,
    pub stage: MigrationStage,
    pub profile_id: Option<String>,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MigrationStats {
    pub total: usize,
    pub migrated: usize,
    pub failed: usize,
    pub duration_ms: u64,
    pub results: Vec<RecordResult>,
}

pub struct LegacyMigrator {
    service: ProfileService,
    snapshot_path: PathBuf,
}

impl LegacyMigrator {
    pub fn new(service: ProfileService, snapshot_path: impl AsRef<Path>) -> Self {
        Self { service, snapshot_path: snapshot_path.as_ref().to_path_buf() }
    }

    pub fn service(&self) -> &ProfileService {
        &self.service
    }

    /// Scan the legacy key space for known key patterns and parse each
    /// value as JSON. Malformed entries are logged and skipped — never
    /// fatal to the batch. BTreeMap keeps the scan order deterministic
    /// so failure attribution per record stays unambiguous.
    pub fn detect_profiles(&self) -> Result<Vec<LegacyProfile>, StoreError> {
        let entries = self.read_snapshot()?;
        let mut records = Vec::new();
        for (key, raw) in &entries {
            if !matches_legacy_pattern(key) {
                continue;
            }
            match serde_json::from_str::<LegacyProfile>(raw) {
                Ok(mut record) => {
                    record.source_key = key.clone();
                    records.push(record);
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "skipping malformed legacy record");
                }
            }
        }
        Ok(records)
    }

    /// Migrate every detected record sequentially, accumulating
    /// per-record results; one failure never aborts the batch. Records
    /// one migration audit entry per run with counts and duration.
    pub async fn migrate_all_profiles(&self) -> Result<MigrationStats, StoreError> {
        let started_at = Utc::now();
        let clock = Instant::now();
        let records = self.detect_profiles()?;

        let mut results = Vec::with_capacity(records.len());
        let mut migrated = 0usize;
        let mut failed = 0usize;

        for record in records {
            let result = self.migrate_one(record).await;
            match result.stage {
                MigrationStage::Committed => migrated += 1,
                _ => failed += 1,
            }
            results.push(result);
        }

        let stats = MigrationStats {
            total: results.len(),
            migrated,
            failed,
            duration_ms: clock.elapsed().as_millis() as u64,
            results,
        };

        self.service
            .store()
            .record_migration(&MigrationRecord {
                id: Uuid::new_v4().to_string(),
                target_version: SCHEMA_VERSION,
                kind: MigrationKind::LegacyImport,
                status: if stats.failed == 0 || stats.migrated > 0 {
                    MigrationStatus::Completed
                } else {
                    MigrationStatus::Failed
                },
                started_at,
                finished_at: Some(Utc::now()),
                error: None,
                detail: Some(serde_json::json!({
                    "total": stats.total,
                    "migrated": stats.migrated,
                    "failed": stats.failed,
                    "duration_ms": stats.duration_ms,
                })),
            })
            .await?;

        info!(
            total = stats.total,
            migrated = stats.migrated,
            failed = stats.failed,
            "legacy migration finished"
        );
        Ok(stats)
    }

    async fn migrate_one(&self, record: LegacyProfile) -> RecordResult {
        let mut result = RecordResult {
            source_key: record.source_key.clone(),
            stage: MigrationStage::Detected,
            profile_id: None,
            errors: Vec::new(),
        };

        let violations = validate(&record);
        if !violations.is_empty() {
            warn!(key = %record.source_key, violations = violations.len(), "legacy record invalid");
            result.stage = MigrationStage::Failed;
            result.errors = violations;
            return result;
        }
        result.stage = MigrationStage::Validated;

        let account = match transform(&record) {
            Ok(account) => account,
            Err(e) => {
                warn!(key = %record.source_key, error = %e, "legacy record transform failed");
                result.stage = MigrationStage::Failed;
                result.errors.push(e.to_string());
                return result;
            }
        };
        result.stage = MigrationStage::Transformed;

        match self.service.create_with_account(account, ProfileData::default()).await {
            Ok(profile_id) => {
                result.stage = MigrationStage::Committed;
                result.profile_id = Some(profile_id);
            }
            Err(e) => {
                warn!(key = %record.source_key, error = %e, "legacy record commit failed");
                result.stage = MigrationStage::Failed;
                result.errors.push(e.to_string());
            }
        }
        result
    }

    /// Serialize all detected legacy entries to a portable snapshot.
    /// Call this *before* migrating — it is the rollback safety net.
    pub fn backup_local_storage(&self) -> Result<String, StoreError> {
        let entries = self.read_snapshot()?;
        let legacy: BTreeMap<&String, &String> = entries
            .iter()
            .filter(|(key, _)| matches_legacy_pattern(key))
            .collect();
        Ok(serde_json::to_string_pretty(&serde_json::json!({
            "version": crate::export::EXPORT_VERSION,
            "backedUpAt": Utc::now().timestamp_millis(),
            "entries": legacy,
        }))?)
    }

    /// Remove migrated legacy entries from the snapshot file. One-way
    /// and destructive: refuses to touch anything unless the caller
    /// passes an explicit `confirmed = true`.
    pub fn clear_migrated_profiles(&self, confirmed: bool) -> Result<usize, StoreError> {
        if !confirmed {
            return Err(StoreError::Validation(
                "clearing legacy profiles is destructive and requires explicit confirmation"
                    .into(),
            ));
        }
        let mut entries = self.read_snapshot()?;
        let before = entries.len();
        entries.retain(|key, _| !matches_legacy_pattern(key));
        let removed = before - entries.len();
        std::fs::write(&self.snapshot_path, serde_json::to_string_pretty(&entries)?)?;
        info!(removed, "cleared migrated legacy entries");
        Ok(removed)
    }

    fn read_snapshot(&self) -> Result<BTreeMap<String, String>, StoreError> {
        if !self.snapshot_path.exists() {
            return Ok(BTreeMap::new());
        }
        let raw = std::fs::read_to_string(&self.snapshot_path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}

fn matches_legacy_pattern(key: &str) -> bool {
    LEGACY_KEY_PATTERNS
        .iter()
        .any(|p| key == *p || key.starts_with(p))
}

/// Require a non-empty name and at least one of {id, email}. All
/// violations are accumulated rather than stopping at the first.
pub fn validate(record: &LegacyProfile) -> Vec<String> {
    let mut violations = Vec::new();
    if record.name.as_deref().map_or(true, |n| n.trim().is_empty()) {
        violations.push("missing name".to_string());
    }
    let has_id = record.id.as_deref().map_or(false, |v| !v.trim().is_empty());
    let has_email = record.email.as_deref().map_or(false, |v| !v.trim().is_empty());
    if !has_id && !has_email {
        violations.push("needs at least one of id or email".to_string());
    }
    violations
}

/// Build the new account: fresh ids, name/email/phone copied verbatim,
/// and the plaintext PIN (if any) hashed right here so it never reaches
/// the new store.
pub fn transform(record: &LegacyProfile) -> Result<Account, StoreError> {
    let name = record.name.as_deref().unwrap_or_default().trim();
    let mut account = Account::new(name, record.email.clone(), record.phone.clone());
    if let Some(pin) = &record.pin {
        account.set_pin(pin)?;
    }
    Ok(account)
}
