use crate::api::dto::configuration::{
    ConfigurationResponse, ConfigurationsListResponse, RegisterConfigurationRequest,
    SetActiveRequest,
};
use crate::api::routes::AppState;
use crate::error::{AppError, Result};
use crate::models::{ConfigurationBundle, VersionType};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use chrono::Utc;

pub async fn list_configurations(
    State(state): State<AppState>,
) -> Result<Json<ConfigurationsListResponse>> {
    let bundles = state.config_repo.list_active().await?;
    let response = ConfigurationsListResponse {
        data: bundles.into_iter().map(ConfigurationResponse::from).collect(),
    };
    Ok(Json(response))
}

pub async fn get_configuration(
    State(state): State<AppState>,
    Path(version): Path<String>,
) -> Result<Json<ConfigurationResponse>> {
    let bundle = state.config_repo.get(&version).await?;
    Ok(Json(ConfigurationResponse::from(bundle)))
}

/// Register a new bundle. The checksum is computed from the content on disk
/// at registration time, so the bundle must already be in place.
pub async fn register_configuration(
    State(state): State<AppState>,
    Json(req): Json<RegisterConfigurationRequest>,
) -> Result<(StatusCode, Json<ConfigurationResponse>)> {
    crate::resolver::parse_version(&req.version)?;

    let version_type = VersionType::parse(&req.version_type).ok_or_else(|| {
        AppError::Execution(format!("Unknown version type '{}'", req.version_type))
    })?;
    if version_type == VersionType::Patch && req.base_version.is_none() {
        return Err(AppError::Execution(
            "Patch bundles require a base_version".to_string(),
        ));
    }

    let checksum = state.config_repo.checksum_of(&req.config_path).await?;

    let now = Utc::now();
    let bundle = ConfigurationBundle {
        version: req.version,
        description: req.description,
        config_path: req.config_path,
        checksum,
        created_time: now,
        last_modified: now,
        is_active: true,
        created_by: req.created_by,
        version_type,
        base_version: req.base_version,
        is_major_upgrade: req.is_major_upgrade,
    };
    state.config_repo.create(&bundle).await?;

    Ok((StatusCode::CREATED, Json(ConfigurationResponse::from(bundle))))
}

pub async fn set_active(
    State(state): State<AppState>,
    Path(version): Path<String>,
    Json(req): Json<SetActiveRequest>,
) -> Result<Json<ConfigurationResponse>> {
    state.config_repo.set_active(&version, req.is_active).await?;
    let bundle = state.config_repo.get(&version).await?;
    Ok(Json(ConfigurationResponse::from(bundle)))
}
