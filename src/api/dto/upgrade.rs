use crate::models::{StepExecution, UpgradeExecution};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct StartUpgradeRequest {
    pub site_id: String,
    pub environment: String,
    pub source_version: String,
    pub target_version: String,
    pub created_by: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StartUpgradeResponse {
    pub execution_id: String,
}

#[derive(Debug, Serialize)]
pub struct UpgradeResponse {
    pub execution_id: String,
    pub source_version: String,
    pub target_version: String,
    pub site_id: String,
    pub environment: String,
    pub status: String,
    pub status_description: String,
    pub start_time: String,
    pub end_time: Option<String>,
    pub current_step_id: Option<String>,
    pub total_steps: i32,
    pub completed_steps: i32,
    pub error_message: Option<String>,
    pub created_by: Option<String>,
    pub duration: Option<i64>,
}

impl From<UpgradeExecution> for UpgradeResponse {
    fn from(execution: UpgradeExecution) -> Self {
        Self {
            execution_id: execution.execution_id,
            source_version: execution.source_version,
            target_version: execution.target_version,
            site_id: execution.site_id,
            environment: execution.environment,
            status: format!("{:?}", execution.status),
            status_description: execution.status.description().to_string(),
            start_time: execution.start_time.to_rfc3339(),
            end_time: execution.end_time.map(|t| t.to_rfc3339()),
            current_step_id: execution.current_step_id,
            total_steps: execution.total_steps,
            completed_steps: execution.completed_steps,
            error_message: execution.error_message,
            created_by: execution.created_by,
            duration: execution.duration,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct UpgradesListResponse {
    pub data: Vec<UpgradeResponse>,
}

#[derive(Debug, Serialize)]
pub struct StepResponse {
    pub id: String,
    pub step_id: String,
    pub step_name: String,
    pub step_type: String,
    pub status: String,
    pub status_description: String,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub duration: Option<i64>,
    pub result: Option<String>,
    pub error_message: Option<String>,
    pub retry_count: i32,
}

impl From<StepExecution> for StepResponse {
    fn from(step: StepExecution) -> Self {
        Self {
            id: step.id,
            step_id: step.step_id,
            step_name: step.step_name,
            step_type: step.step_type.description().to_string(),
            status: format!("{:?}", step.status),
            status_description: step.status.description().to_string(),
            start_time: step.start_time.map(|t| t.to_rfc3339()),
            end_time: step.end_time.map(|t| t.to_rfc3339()),
            duration: step.duration,
            result: step.result,
            error_message: step.error_message,
            retry_count: step.retry_count,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StepsListResponse {
    pub data: Vec<StepResponse>,
}
