//! Domain models and database row mappings.
//!
//! Domain structs are what callers see (a [`Profile`] always carries
//! its account, task statuses, and trust score). `*Row` structs map
//! SQL rows one-to-one and convert into the domain types. Timestamps
//! are stamped explicitly by constructors and the profile service —
//! never by a storage-layer hook.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use hv_crypto::kdf::{ALGORITHM, ITERATIONS};
use hv_crypto::SecretKind;

use crate::error::StoreError;

// ── Enums ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskCategory {
    Contact,
    Identity,
    Services,
    Security,
    Verification,
}

impl TaskCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskCategory::Contact => "contact",
            TaskCategory::Identity => "identity",
            TaskCategory::Services => "services",
            TaskCategory::Security => "security",
            TaskCategory::Verification => "verification",
        }
    }

    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "contact" => Ok(TaskCategory::Contact),
            "identity" => Ok(TaskCategory::Identity),
            "services" => Ok(TaskCategory::Services),
            "security" => Ok(TaskCategory::Security),
            "verification" => Ok(TaskCategory::Verification),
            other => Err(StoreError::Validation(format!("unknown task category: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustLevel {
    Minimal,
    Basic,
    Verified,
    Trusted,
}

impl TrustLevel {
    /// Level thresholds over the 0–100 total.
    pub fn for_total(total: f64) -> Self {
        if total >= 80.0 {
            TrustLevel::Trusted
        } else if total >= 60.0 {
            TrustLevel::Verified
        } else if total >= 30.0 {
            TrustLevel::Basic
        } else {
            TrustLevel::Minimal
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    Local,
    Pending,
    Synced,
}

impl SyncState {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncState::Local => "local",
            SyncState::Pending => "pending",
            SyncState::Synced => "synced",
        }
    }

    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "local" => Ok(SyncState::Local),
            "pending" => Ok(SyncState::Pending),
            "synced" => Ok(SyncState::Synced),
            other => Err(StoreError::Validation(format!("unknown sync state: {other}"))),
        }
    }
}

// ── Credentials ──────────────────────────────────────────────────────────────

/// Stored credential verifier: KDF output + the salt that produced it.
/// Write-once-then-replace — replacing a PIN/password always builds a
/// whole new block with a fresh salt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialBlock {
    /// Hex-encoded salt.
    pub salt: String,
    /// Hex-encoded PBKDF2 output.
    pub hash: String,
    pub iterations: u32,
    pub algorithm: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CredentialBlock {
    /// Hash a plaintext secret into a fresh block. The plaintext never
    /// leaves this call.
    pub fn from_secret(kind: SecretKind, secret: &str) -> Result<Self, StoreError> {
        let hashed = hv_crypto::hash_secret(kind, secret, None)?;
        let now = Utc::now();
        Ok(Self {
            salt: hashed.salt_hex(),
            hash: hashed.hash_hex(),
            iterations: ITERATIONS,
            algorithm: ALGORITHM.to_string(),
            created_at: now,
            updated_at: now,
        })
    }

    pub fn verify(&self, secret: &str) -> Result<bool, StoreError> {
        let hash = hex::decode(&self.hash)?;
        let salt = hex::decode(&self.salt)?;
        Ok(hv_crypto::verify_secret(secret, &hash, &salt))
    }
}

// ── Account ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub display_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub pin: Option<CredentialBlock>,
    pub password: Option<CredentialBlock>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    pub fn new(display_name: &str, email: Option<String>, phone: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            display_name: display_name.to_string(),
            email,
            phone,
            pin: None,
            password: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Replace the PIN credential — always a fresh salt.
    pub fn set_pin(&mut self, pin: &str) -> Result<(), StoreError> {
        self.pin = Some(CredentialBlock::from_secret(SecretKind::Pin, pin)?);
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Replace the password credential — always a fresh salt.
    pub fn set_password(&mut self, password: &str) -> Result<(), StoreError> {
        self.password = Some(CredentialBlock::from_secret(SecretKind::Password, password)?);
        self.updated_at = Utc::now();
        Ok(())
    }
}

// ── Profile data sections ────────────────────────────────────────────────────

/// Progressively-filled profile data: a struct of typed optional
/// sections rather than an untyped map, so partial population stays
/// representable without losing shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact: Option<ContactInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<IdentityDocument>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub services: Option<ServiceRegistrations>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security: Option<SecurityFlags>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cv: Option<CvSummary>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContactInfo {
    pub address: Option<String>,
    pub city: Option<String>,
    pub postcode: Option<String>,
    pub country: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IdentityDocument {
    pub document_type: Option<String>,
    pub document_number: Option<String>,
    pub issued_by: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceRegistrations {
    pub registered: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SecurityFlags {
    pub two_factor_enabled: bool,
    pub recovery_configured: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CvSummary {
    pub headline: Option<String>,
    pub summary: Option<String>,
}

// ── Tasks ────────────────────────────────────────────────────────────────────

/// Static catalog entry describing one completable profile-building
/// step. Seeded at first run, effectively immutable afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub id: String,
    pub title: String,
    pub description: String,
    pub category: TaskCategory,
    pub points: f64,
    pub required: bool,
    pub verification_required: bool,
}

/// Per-profile instance of a [`TaskDefinition`]. Created empty when the
/// profile is created, mutated only through the profile service, and
/// never deleted independently of its profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub id: String,
    pub definition_id: String,
    pub category: TaskCategory,
    pub completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub verified: bool,
    pub verified_at: Option<DateTime<Utc>>,
    pub payload: Option<serde_json::Value>,
}

impl TaskStatus {
    /// Fresh, incomplete status for a catalog entry.
    pub fn for_definition(def: &TaskDefinition) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            definition_id: def.id.clone(),
            category: def.category,
            completed: false,
            completed_at: None,
            verified: false,
            verified_at: None,
            payload: None,
        }
    }
}

// ── Trust score ──────────────────────────────────────────────────────────────

/// Derived 0–100 score. Never stored independently of its profile and
/// never hand-edited; recomputed on every task mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustScore {
    pub total: f64,
    pub breakdown: BTreeMap<TaskCategory, f64>,
    pub level: TrustLevel,
    pub completed_tasks: u32,
    /// Timestamp of the latest task mutation that fed the score. Kept
    /// deterministic (derived from the tasks, not from the wall clock)
    /// so recomputing over identical input yields identical output.
    pub computed_at: Option<DateTime<Utc>>,
}

impl TrustScore {
    pub fn zero() -> Self {
        Self {
            total: 0.0,
            breakdown: BTreeMap::new(),
            level: TrustLevel::Minimal,
            completed_tasks: 0,
            computed_at: None,
        }
    }
}

// ── Sync metadata ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncMeta {
    pub status: SyncState,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub remote_id: Option<String>,
    /// Application-level version marker used for conflict detection.
    pub version: i64,
}

impl Default for SyncMeta {
    fn default() -> Self {
        Self { status: SyncState::Local, last_synced_at: None, remote_id: None, version: 1 }
    }
}

// ── Profile aggregate ────────────────────────────────────────────────────────

/// Root aggregate. Owned exclusively by the profile service; mutated
/// only through its transactional methods.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub account: Account,
    pub data: ProfileData,
    pub tasks: Vec<TaskStatus>,
    pub trust: TrustScore,
    #[serde(default)]
    pub sync: SyncMeta,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_accessed_at: Option<DateTime<Utc>>,
}

// ── Migration audit ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationKind {
    Schema,
    LegacyImport,
}

impl MigrationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MigrationKind::Schema => "schema",
            MigrationKind::LegacyImport => "legacy-import",
        }
    }

    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "schema" => Ok(MigrationKind::Schema),
            "legacy-import" => Ok(MigrationKind::LegacyImport),
            other => Err(StoreError::Validation(format!("unknown migration kind: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl MigrationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            MigrationStatus::Pending => "pending",
            MigrationStatus::Running => "running",
            MigrationStatus::Completed => "completed",
            MigrationStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "pending" => Ok(MigrationStatus::Pending),
            "running" => Ok(MigrationStatus::Running),
            "completed" => Ok(MigrationStatus::Completed),
            "failed" => Ok(MigrationStatus::Failed),
            other => Err(StoreError::Validation(format!("unknown migration status: {other}"))),
        }
    }
}

/// Audit trail entry for schema migrations and legacy imports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationRecord {
    pub id: String,
    pub target_version: i64,
    pub kind: MigrationKind,
    pub status: MigrationStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub detail: Option<serde_json::Value>,
}

// ── Row models ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ProfileRow {
    pub id: String,
    pub account_id: String,
    pub profile_data: String,
    pub trust_score: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_accessed_at: Option<DateTime<Utc>>,
    pub sync_status: String,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub remote_id: Option<String>,
    pub version: i64,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AccountRow {
    pub id: String,
    pub display_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    /// CredentialBlock JSON, absent when no PIN is set.
    pub pin_credential: Option<String>,
    pub password_credential: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TaskRow {
    pub id: String,
    pub profile_id: String,
    pub definition_id: String,
    pub category: String,
    pub completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub verified: bool,
    pub verified_at: Option<DateTime<Utc>>,
    pub payload: Option<String>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TaskDefinitionRow {
    pub id: String,
    pub title: String,
    pub description: String,
    pub category: String,
    pub points: f64,
    pub required: bool,
    pub verification_required: bool,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MigrationRow {
    pub id: String,
    pub target_version: i64,
    pub kind: String,
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub detail: Option<String>,
}

impl TryFrom<AccountRow> for Account {
    type Error = StoreError;

    fn try_from(row: AccountRow) -> Result<Self, StoreError> {
        Ok(Account {
            id: row.id,
            display_name: row.display_name,
            email: row.email,
            phone: row.phone,
            pin: row.pin_credential.as_deref().map(serde_json::from_str).transpose()?,
            password: row.password_credential.as_deref().map(serde_json::from_str).transpose()?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl TryFrom<TaskRow> for TaskStatus {
    type Error = StoreError;

    fn try_from(row: TaskRow) -> Result<Self, StoreError> {
        Ok(TaskStatus {
            id: row.id,
            definition_id: row.definition_id,
            category: TaskCategory::parse(&row.category)?,
            completed: row.completed,
            completed_at: row.completed_at,
            verified: row.verified,
            verified_at: row.verified_at,
            payload: row.payload.as_deref().map(serde_json::from_str).transpose()?,
        })
    }
}

impl TryFrom<TaskDefinitionRow> for TaskDefinition {
    type Error = StoreError;

    fn try_from(row: TaskDefinitionRow) -> Result<Self, StoreError> {
        Ok(TaskDefinition {
            id: row.id,
            title: row.title,
            description: row.description,
            category: TaskCategory::parse(&row.category)?,
            points: row.points,
            required: row.required,
            verification_required: row.verification_required,
        })
    }
}

impl TryFrom<MigrationRow> for MigrationRecord {
    type Error = StoreError;

    fn try_from(row: MigrationRow) -> Result<Self, StoreError> {
        Ok(MigrationRecord {
            id: row.id,
            target_version: row.target_version,
            kind: MigrationKind::parse(&row.kind)?,
            status: MigrationStatus::parse(&row.status)?,
            started_at: row.started_at,
            finished_at: row.finished_at,
            error: row.error,
            detail: row.detail.as_deref().map(serde_json::from_str).transpose()?,
        })
    }
}

impl Profile {
    /// Assemble the aggregate from its rows.
    pub fn from_rows(
        profile: ProfileRow,
        account: AccountRow,
        tasks: Vec<TaskRow>,
    ) -> Result<Self, StoreError> {
        let tasks = tasks
            .into_iter()
            .map(TaskStatus::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Profile {
            id: profile.id,
            account: Account::try_from(account)?,
            data: serde_json::from_str(&profile.profile_data)?,
            tasks,
            trust: serde_json::from_str(&profile.trust_score)?,
            sync: SyncMeta {
                status: SyncState::parse(&profile.sync_status)?,
                last_synced_at: profile.last_synced_at,
                remote_id: profile.remote_id,
                version: profile.version,
            },
            created_at: profile.created_at,
            updated_at: profile.updated_at,
            last_accessed_at: profile.last_accessed_at,
        })
    }
}
