use crate::api::dto::upgrade::{
    StartUpgradeRequest, StartUpgradeResponse, StepResponse, StepsListResponse, UpgradeResponse,
    UpgradesListResponse,
};
use crate::api::routes::AppState;
use crate::error::Result;
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};

pub async fn start_upgrade(
    State(state): State<AppState>,
    Json(req): Json<StartUpgradeRequest>,
) -> Result<(StatusCode, Json<StartUpgradeResponse>)> {
    let execution_id = state
        .orchestrator
        .start_upgrade(
            &req.site_id,
            &req.environment,
            &req.source_version,
            &req.target_version,
            req.created_by,
        )
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(StartUpgradeResponse { execution_id }),
    ))
}

pub async fn get_upgrade(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<UpgradeResponse>> {
    let execution = state.orchestrator.get_status(&id).await?;
    Ok(Json(UpgradeResponse::from(execution)))
}

pub async fn list_upgrades(
    State(state): State<AppState>,
    Query(params): Query<std::collections::HashMap<String, String>>,
) -> Result<Json<UpgradesListResponse>> {
    let site_id = params.get("site_id").cloned();

    let executions = state.orchestrator.list_executions(site_id).await?;
    let response = UpgradesListResponse {
        data: executions.into_iter().map(UpgradeResponse::from).collect(),
    };
    Ok(Json(response))
}

pub async fn list_steps(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<StepsListResponse>> {
    let steps = state.orchestrator.list_step_history(&id).await?;
    let response = StepsListResponse {
        data: steps.into_iter().map(StepResponse::from).collect(),
    };
    Ok(Json(response))
}

pub async fn pause_upgrade(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    state.orchestrator.pause(&id).await?;
    Ok(Json(serde_json::json!({
        "message": "Pause requested"
    })))
}

pub async fn resume_upgrade(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    state.orchestrator.resume(&id).await?;
    Ok(Json(serde_json::json!({
        "message": "Execution resumed"
    })))
}

pub async fn cancel_upgrade(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    state.orchestrator.cancel(&id).await?;
    Ok(Json(serde_json::json!({
        "message": "Cancellation requested"
    })))
}

pub async fn restart_upgrade(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<StartUpgradeResponse>)> {
    let execution_id = state.orchestrator.restart(&id).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(StartUpgradeResponse { execution_id }),
    ))
}
