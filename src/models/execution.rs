use crate::models::plan::StepType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Durable record of one upgrade run from `source_version` to
/// `target_version`. Progress is checkpointed after every step so a restart
/// can resume from `breakpoint_data` without re-running completed steps.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct UpgradeExecution {
    pub execution_id: String,
    pub source_version: String,
    pub target_version: String,
    pub site_id: String,
    pub environment: String,
    pub status: ExecutionStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub current_step_id: Option<String>,
    pub breakpoint_data: Option<String>,
    pub total_steps: i32,
    pub completed_steps: i32,
    pub error_message: Option<String>,
    pub created_by: Option<String>,
    pub duration: Option<i64>,
    pub created_time: DateTime<Utc>,
    pub updated_time: DateTime<Utc>,
}

impl UpgradeExecution {
    pub fn new(
        source_version: &str,
        target_version: &str,
        site_id: &str,
        environment: &str,
        created_by: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            execution_id: uuid::Uuid::new_v4().to_string(),
            source_version: source_version.to_string(),
            target_version: target_version.to_string(),
            site_id: site_id.to_string(),
            environment: environment.to_string(),
            status: ExecutionStatus::Pending,
            start_time: now,
            end_time: None,
            current_step_id: None,
            breakpoint_data: None,
            total_steps: 0,
            completed_steps: 0,
            error_message: None,
            created_by,
            duration: None,
            created_time: now,
            updated_time: now,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[repr(i32)]
pub enum ExecutionStatus {
    Pending = 0,
    Running = 1,
    Success = 2,
    Failed = 3,
    Cancelled = 4,
    Paused = 5,
}

impl ExecutionStatus {
    pub fn description(&self) -> &'static str {
        match self {
            Self::Pending => "waiting to run",
            Self::Running => "running",
            Self::Success => "completed successfully",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Paused => "paused",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Cancelled)
    }
}

/// Record of one step within an execution's plan. `step_id` is the stable
/// plan identifier; `id` is the row key. `retry_count` counts failed
/// attempts, so a step that exhausts its budget ends with
/// `retry_count == max_attempts`.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct StepExecution {
    pub id: String,
    pub execution_id: String,
    pub step_id: String,
    pub step_name: String,
    pub step_type: StepType,
    pub status: StepStatus,
    pub seq: i64,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration: Option<i64>,
    pub result: Option<String>,
    pub error_message: Option<String>,
    pub metadata: Option<String>,
    pub retry_count: i32,
    pub created_time: DateTime<Utc>,
    pub updated_time: DateTime<Utc>,
}

impl StepExecution {
    pub fn new(
        execution_id: &str,
        step_id: &str,
        step_name: &str,
        step_type: StepType,
        seq: i64,
        metadata: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            execution_id: execution_id.to_string(),
            step_id: step_id.to_string(),
            step_name: step_name.to_string(),
            step_type,
            status: StepStatus::Pending,
            seq,
            start_time: None,
            end_time: None,
            duration: None,
            result: None,
            error_message: None,
            metadata,
            retry_count: 0,
            created_time: now,
            updated_time: now,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[repr(i32)]
pub enum StepStatus {
    Pending = 0,
    Running = 1,
    Success = 2,
    Failed = 3,
    Skipped = 4,
    Retrying = 5,
}

impl StepStatus {
    pub fn description(&self) -> &'static str {
        match self {
            Self::Pending => "waiting to run",
            Self::Running => "running",
            Self::Success => "completed successfully",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Retrying => "retrying",
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, Self::Success | Self::Skipped)
    }
}
