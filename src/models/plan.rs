use crate::error::{AppError, Result};
use crate::models::ConfigurationBundle;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Category of action a step performs. Runners are registered per type, so
/// adding a step category means adding a runner, not a branch.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum StepType {
    DataMigration = 0,
    ServiceRestart = 1,
    Validation = 2,
}

impl StepType {
    pub fn description(&self) -> &'static str {
        match self {
            Self::DataMigration => "data migration",
            Self::ServiceRestart => "service restart",
            Self::Validation => "validation",
        }
    }
}

/// One entry of a materialized step plan. `step_id` is stable across
/// pause/resume and restarts; `skippable` marks steps whose failure is
/// recorded as `Skipped` instead of failing the execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    pub step_id: String,
    pub step_name: String,
    pub step_type: StepType,
    pub version: String,
    pub skippable: bool,
    pub metadata: Value,
}

/// Ordered step plan for one execution, derived from a resolved version
/// chain. Every bundle contributes a group of steps: a skippable precheck,
/// the configuration apply, a service restart for major upgrades, and a
/// final verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepPlan {
    pub steps: Vec<PlanStep>,
}

impl StepPlan {
    pub fn for_chain(chain: &[ConfigurationBundle]) -> Self {
        let mut steps = Vec::new();
        for bundle in chain {
            let metadata = serde_json::json!({
                "version": bundle.version,
                "config_path": bundle.config_path,
                "major_upgrade": bundle.is_major_upgrade,
            });
            steps.push(PlanStep {
                step_id: format!("{}:precheck", bundle.version),
                step_name: format!("Precheck for {}", bundle.version),
                step_type: StepType::Validation,
                version: bundle.version.clone(),
                skippable: true,
                metadata: metadata.clone(),
            });
            steps.push(PlanStep {
                step_id: format!("{}:apply", bundle.version),
                step_name: format!("Apply configuration {}", bundle.version),
                step_type: StepType::DataMigration,
                version: bundle.version.clone(),
                skippable: false,
                metadata: metadata.clone(),
            });
            if bundle.is_major_upgrade {
                steps.push(PlanStep {
                    step_id: format!("{}:restart", bundle.version),
                    step_name: format!("Restart services for {}", bundle.version),
                    step_type: StepType::ServiceRestart,
                    version: bundle.version.clone(),
                    skippable: false,
                    metadata: metadata.clone(),
                });
            }
            steps.push(PlanStep {
                step_id: format!("{}:verify", bundle.version),
                step_name: format!("Verify {}", bundle.version),
                step_type: StepType::Validation,
                version: bundle.version.clone(),
                skippable: false,
                metadata,
            });
        }
        Self { steps }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

pub const BREAKPOINT_SCHEMA_VERSION: u32 = 1;

/// Resume state persisted with every checkpoint. The blob is versioned JSON;
/// fields added in later schema versions must carry serde defaults so older
/// blobs stay readable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakpointData {
    pub schema_version: u32,
    pub next_step_index: usize,
    pub plan: StepPlan,
    #[serde(default)]
    pub chain: Vec<String>,
}

impl BreakpointData {
    pub fn new(next_step_index: usize, plan: StepPlan, chain: Vec<String>) -> Self {
        Self {
            schema_version: BREAKPOINT_SCHEMA_VERSION,
            next_step_index,
            plan,
            chain,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| AppError::Execution(format!("Failed to serialize breakpoint: {}", e)))
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let breakpoint: Self = serde_json::from_str(raw)
            .map_err(|e| AppError::Execution(format!("Invalid breakpoint data: {}", e)))?;
        if breakpoint.schema_version > BREAKPOINT_SCHEMA_VERSION {
            return Err(AppError::Execution(format!(
                "Unsupported breakpoint schema version {}",
                breakpoint.schema_version
            )));
        }
        Ok(breakpoint)
    }
}
