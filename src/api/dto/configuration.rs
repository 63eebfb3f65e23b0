use crate::models::ConfigurationBundle;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct RegisterConfigurationRequest {
    pub version: String,
    pub description: Option<String>,
    pub config_path: String,
    pub version_type: String,
    pub base_version: Option<String>,
    #[serde(default)]
    pub is_major_upgrade: bool,
    pub created_by: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SetActiveRequest {
    pub is_active: bool,
}

#[derive(Debug, Serialize)]
pub struct ConfigurationResponse {
    pub version: String,
    pub description: Option<String>,
    pub config_path: String,
    pub checksum: String,
    pub is_active: bool,
    pub version_type: String,
    pub base_version: Option<String>,
    pub is_major_upgrade: bool,
    pub created_time: String,
    pub last_modified: String,
    pub created_by: Option<String>,
}

impl From<ConfigurationBundle> for ConfigurationResponse {
    fn from(bundle: ConfigurationBundle) -> Self {
        Self {
            version: bundle.version,
            description: bundle.description,
            config_path: bundle.config_path,
            checksum: bundle.checksum,
            is_active: bundle.is_active,
            version_type: bundle.version_type.description().to_string(),
            base_version: bundle.base_version,
            is_major_upgrade: bundle.is_major_upgrade,
            created_time: bundle.created_time.to_rfc3339(),
            last_modified: bundle.last_modified.to_rfc3339(),
            created_by: bundle.created_by,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ConfigurationsListResponse {
    pub data: Vec<ConfigurationResponse>,
}
