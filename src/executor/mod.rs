pub mod command_runner;

pub use command_runner::CommandRunner;

use crate::config::RetryConfig;
use crate::error::Result;
use crate::models::{PlanStep, StepStatus, StepType};
use crate::repository::ExecutionRepository;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// External action invoked for one step. Implementations must be idempotent
/// or report via `Retryable`/`Fatal` whether a re-invocation is safe: after a
/// crash the step may run again if its outcome was not durably recorded.
#[async_trait]
pub trait ActionRunner: Send + Sync {
    async fn perform(&self, step: &PlanStep) -> std::result::Result<String, ActionError>;
}

#[derive(Debug, Error)]
pub enum ActionError {
    /// Transient failure; the executor may retry within its budget.
    #[error("{0}")]
    Retryable(String),
    /// Permanent failure; retrying cannot help.
    #[error("{0}")]
    Fatal(String),
}

/// One runner per step category, looked up by `StepType`.
#[derive(Default)]
pub struct RunnerRegistry {
    runners: HashMap<StepType, Arc<dyn ActionRunner>>,
}

impl RunnerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, step_type: StepType, runner: Arc<dyn ActionRunner>) {
        self.runners.insert(step_type, runner);
    }

    pub fn get(&self, step_type: StepType) -> Option<Arc<dyn ActionRunner>> {
        self.runners.get(&step_type).cloned()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Success(String),
    Failed(String),
    Skipped(String),
}

/// Runs one step to completion, applying the retry policy and recording
/// timing and result on the step record. The executor is policy only; the
/// action itself belongs to the registered runner.
#[derive(Clone)]
pub struct StepExecutor {
    exec_repo: ExecutionRepository,
    registry: Arc<RunnerRegistry>,
    retry: RetryConfig,
}

impl StepExecutor {
    pub fn new(
        exec_repo: ExecutionRepository,
        registry: Arc<RunnerRegistry>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            exec_repo,
            registry,
            retry,
        }
    }

    pub async fn execute(&self, execution_id: &str, step: &PlanStep) -> Result<StepOutcome> {
        let record = self.exec_repo.get_step(execution_id, &step.step_id).await?;

        let Some(runner) = self.registry.get(step.step_type) else {
            let message = format!(
                "No runner registered for step type '{}'",
                step.step_type.description()
            );
            return self.conclude(&record.id, step, 0, message).await;
        };

        self.exec_repo.step_started(&record.id).await?;

        let mut retry_count: i32 = 0;
        loop {
            match runner.perform(step).await {
                Ok(result) => {
                    self.exec_repo
                        .step_finished(
                            &record.id,
                            StepStatus::Success,
                            Some(result.clone()),
                            None,
                            retry_count,
                        )
                        .await?;
                    return Ok(StepOutcome::Success(result));
                }
                Err(ActionError::Retryable(message)) => {
                    retry_count += 1;
                    if retry_count as u32 >= self.retry.max_attempts {
                        return self.conclude(&record.id, step, retry_count, message).await;
                    }
                    tracing::warn!(
                        execution_id,
                        step_id = step.step_id,
                        retry_count,
                        "Step failed, retrying: {}",
                        message
                    );
                    self.exec_repo.step_retrying(&record.id, retry_count).await?;
                    tokio::time::sleep(self.retry.backoff_delay(retry_count as u32 + 1)).await;
                    self.exec_repo.step_started(&record.id).await?;
                }
                Err(ActionError::Fatal(message)) => {
                    return self.conclude(&record.id, step, retry_count, message).await;
                }
            }
        }
    }

    /// Terminal failure path: a skippable step is recorded `Skipped` and the
    /// plan proceeds; anything else is `Failed`.
    async fn conclude(
        &self,
        step_row_id: &str,
        step: &PlanStep,
        retry_count: i32,
        message: String,
    ) -> Result<StepOutcome> {
        if step.skippable {
            self.exec_repo
                .step_finished(
                    step_row_id,
                    StepStatus::Skipped,
                    None,
                    Some(message.clone()),
                    retry_count,
                )
                .await?;
            return Ok(StepOutcome::Skipped(message));
        }

        self.exec_repo
            .step_finished(
                step_row_id,
                StepStatus::Failed,
                None,
                Some(message.clone()),
                retry_count,
            )
            .await?;
        Ok(StepOutcome::Failed(message))
    }
}
