use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata for one immutable upgrade configuration bundle, keyed by version.
/// The content itself lives at `config_path`; `checksum` is the SHA-256 of
/// that content and is verified before the bundle takes part in a resolution.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ConfigurationBundle {
    pub version: String,
    pub description: Option<String>,
    pub config_path: String,
    pub checksum: String,
    pub created_time: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
    pub is_active: bool,
    pub created_by: Option<String>,
    pub version_type: VersionType,
    pub base_version: Option<String>,
    pub is_major_upgrade: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[repr(i32)]
pub enum VersionType {
    Baseline = 0,
    Patch = 1,
}

impl VersionType {
    pub fn description(&self) -> &'static str {
        match self {
            Self::Baseline => "baseline version",
            Self::Patch => "patch version",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "baseline" => Some(Self::Baseline),
            "patch" => Some(Self::Patch),
            _ => None,
        }
    }
}
