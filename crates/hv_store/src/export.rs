//! Versioned JSON export envelope.
//!
//! The envelope carries its own version so future schema generations
//! can detect and upconvert older exports.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::models::Profile;

pub const EXPORT_VERSION: &str = "1.0";

#[derive(Debug, Serialize, Deserialize)]
pub struct ProfileExport {
    pub version: String,
    /// Epoch milliseconds.
    #[serde(rename = "exportedAt")]
    pub exported_at: i64,
    pub profile: Profile,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProfilesExport {
    pub version: String,
    #[serde(rename = "exportedAt")]
    pub exported_at: i64,
    pub profiles: Vec<Profile>,
}

pub fn export_profile(profile: &Profile) -> Result<String, StoreError> {
    let envelope = ProfileExport {
        version: EXPORT_VERSION.to_string(),
        exported_at: Utc::now().timestamp_millis(),
        profile: profile.clone(),
    };
    Ok(serde_json::to_string_pretty(&envelope)?)
}

pub fn export_profiles(profiles: &[Profile]) -> Result<String, StoreError> {
    let envelope = ProfilesExport {
        version: EXPORT_VERSION.to_string(),
        exported_at: Utc::now().timestamp_millis(),
        profiles: profiles.to_vec(),
    };
    Ok(serde_json::to_string_pretty(&envelope)?)
}
