use crate::error::{AppError, Result};
use crate::models::{ExecutionStatus, StepExecution, StepStatus, UpgradeExecution};
use crate::repository::DbPool;
use chrono::Utc;

#[derive(Clone)]
pub struct ExecutionRepository {
    pool: DbPool,
}

impl ExecutionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Insert the execution record together with its materialized step plan.
    /// Both land in one transaction so a half-created execution can never be
    /// observed.
    pub async fn create(
        &self,
        execution: &UpgradeExecution,
        steps: &[StepExecution],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO upgrade_execution (execution_id, source_version, target_version,
                site_id, environment, status, start_time, end_time, current_step_id,
                breakpoint_data, total_steps, completed_steps, error_message, created_by,
                duration, created_time, updated_time)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&execution.execution_id)
        .bind(&execution.source_version)
        .bind(&execution.target_version)
        .bind(&execution.site_id)
        .bind(&execution.environment)
        .bind(execution.status as i32)
        .bind(execution.start_time)
        .bind(execution.end_time)
        .bind(&execution.current_step_id)
        .bind(&execution.breakpoint_data)
        .bind(execution.total_steps)
        .bind(execution.completed_steps)
        .bind(&execution.error_message)
        .bind(&execution.created_by)
        .bind(execution.duration)
        .bind(execution.created_time)
        .bind(execution.updated_time)
        .execute(&mut *tx)
        .await?;

        for step in steps {
            sqlx::query(
                r#"
                INSERT INTO step_execution (id, execution_id, step_id, step_name, step_type,
                    status, seq, start_time, end_time, duration, result, error_message,
                    metadata, retry_count, created_time, updated_time)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&step.id)
            .bind(&step.execution_id)
            .bind(&step.step_id)
            .bind(&step.step_name)
            .bind(step.step_type as i32)
            .bind(step.status as i32)
            .bind(step.seq)
            .bind(step.start_time)
            .bind(step.end_time)
            .bind(step.duration)
            .bind(&step.result)
            .bind(&step.error_message)
            .bind(&step.metadata)
            .bind(step.retry_count)
            .bind(step.created_time)
            .bind(step.updated_time)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn get(&self, execution_id: &str) -> Result<UpgradeExecution> {
        let execution = sqlx::query_as::<_, UpgradeExecution>(
            "SELECT * FROM upgrade_execution WHERE execution_id = ?",
        )
        .bind(execution_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::ExecutionNotFound(execution_id.to_string()))?;

        Ok(execution)
    }

    pub async fn list(&self, site_id: Option<&str>) -> Result<Vec<UpgradeExecution>> {
        let executions = if let Some(site_id) = site_id {
            sqlx::query_as::<_, UpgradeExecution>(
                "SELECT * FROM upgrade_execution WHERE site_id = ? ORDER BY created_time DESC",
            )
            .bind(site_id)
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query_as::<_, UpgradeExecution>(
                "SELECT * FROM upgrade_execution ORDER BY created_time DESC",
            )
            .fetch_all(&self.pool)
            .await?
        };

        Ok(executions)
    }

    pub async fn list_by_status(&self, status: ExecutionStatus) -> Result<Vec<UpgradeExecution>> {
        let executions = sqlx::query_as::<_, UpgradeExecution>(
            "SELECT * FROM upgrade_execution WHERE status = ? ORDER BY created_time",
        )
        .bind(status as i32)
        .fetch_all(&self.pool)
        .await?;

        Ok(executions)
    }

    pub async fn list_steps(&self, execution_id: &str) -> Result<Vec<StepExecution>> {
        let steps = sqlx::query_as::<_, StepExecution>(
            "SELECT * FROM step_execution WHERE execution_id = ? ORDER BY seq",
        )
        .bind(execution_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(steps)
    }

    pub async fn get_step(&self, execution_id: &str, step_id: &str) -> Result<StepExecution> {
        let step = sqlx::query_as::<_, StepExecution>(
            "SELECT * FROM step_execution WHERE execution_id = ? AND step_id = ?",
        )
        .bind(execution_id)
        .bind(step_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| {
            AppError::ExecutionNotFound(format!("{} step {}", execution_id, step_id))
        })?;

        Ok(step)
    }

    /// Pending -> Running. Sets the plan length and the first step as current,
    /// and commits the initial breakpoint in the same write.
    pub async fn mark_running(
        &self,
        execution_id: &str,
        total_steps: i32,
        current_step_id: &str,
        breakpoint_data: &str,
    ) -> Result<()> {
        let updated = sqlx::query(
            r#"
            UPDATE upgrade_execution
            SET status = ?, total_steps = ?, current_step_id = ?, breakpoint_data = ?,
                updated_time = ?
            WHERE execution_id = ? AND status = ?
            "#,
        )
        .bind(ExecutionStatus::Running as i32)
        .bind(total_steps)
        .bind(current_step_id)
        .bind(breakpoint_data)
        .bind(Utc::now())
        .bind(execution_id)
        .bind(ExecutionStatus::Pending as i32)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(AppError::InvalidState(format!(
                "Execution '{}' cannot start: not pending",
                execution_id
            )));
        }

        Ok(())
    }

    /// Paused -> Running.
    pub async fn mark_resumed(&self, execution_id: &str) -> Result<()> {
        let updated = sqlx::query(
            "UPDATE upgrade_execution SET status = ?, updated_time = ? WHERE execution_id = ? AND status = ?",
        )
        .bind(ExecutionStatus::Running as i32)
        .bind(Utc::now())
        .bind(execution_id)
        .bind(ExecutionStatus::Paused as i32)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(AppError::InvalidState(format!(
                "Execution '{}' cannot resume: not paused",
                execution_id
            )));
        }

        Ok(())
    }

    /// The durable checkpoint after a step boundary: progress counters,
    /// current step and breakpoint blob move in one atomic write. The guards
    /// keep `completed_steps` monotonic and reject writes against executions
    /// no longer running.
    pub async fn checkpoint(
        &self,
        execution_id: &str,
        completed_steps: i32,
        current_step_id: &str,
        breakpoint_data: &str,
    ) -> Result<()> {
        let updated = sqlx::query(
            r#"
            UPDATE upgrade_execution
            SET completed_steps = ?, current_step_id = ?, breakpoint_data = ?, updated_time = ?
            WHERE execution_id = ? AND status = ? AND completed_steps <= ?
            "#,
        )
        .bind(completed_steps)
        .bind(current_step_id)
        .bind(breakpoint_data)
        .bind(Utc::now())
        .bind(execution_id)
        .bind(ExecutionStatus::Running as i32)
        .bind(completed_steps)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(AppError::InvalidState(format!(
                "Checkpoint rejected for execution '{}'",
                execution_id
            )));
        }

        Ok(())
    }

    /// Running -> Paused, retaining the exact resume point.
    pub async fn mark_paused(&self, execution_id: &str, breakpoint_data: &str) -> Result<()> {
        let updated = sqlx::query(
            r#"
            UPDATE upgrade_execution
            SET status = ?, breakpoint_data = ?, updated_time = ?
            WHERE execution_id = ? AND status = ?
            "#,
        )
        .bind(ExecutionStatus::Paused as i32)
        .bind(breakpoint_data)
        .bind(Utc::now())
        .bind(execution_id)
        .bind(ExecutionStatus::Running as i32)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(AppError::InvalidState(format!(
                "Execution '{}' cannot pause: not running",
                execution_id
            )));
        }

        Ok(())
    }

    /// Transition into a terminal state. Terminal states are final: a write
    /// against an already-terminal execution is rejected.
    pub async fn finish(
        &self,
        execution_id: &str,
        status: ExecutionStatus,
        error_message: Option<String>,
    ) -> Result<()> {
        debug_assert!(status.is_terminal());

        let execution = self.get(execution_id).await?;
        let now = Utc::now();
        let duration = (now - execution.start_time).num_milliseconds();

        let updated = sqlx::query(
            r#"
            UPDATE upgrade_execution
            SET status = ?, end_time = ?, duration = ?, error_message = ?, updated_time = ?
            WHERE execution_id = ? AND status NOT IN (?, ?, ?)
            "#,
        )
        .bind(status as i32)
        .bind(now)
        .bind(duration)
        .bind(&error_message)
        .bind(now)
        .bind(execution_id)
        .bind(ExecutionStatus::Success as i32)
        .bind(ExecutionStatus::Failed as i32)
        .bind(ExecutionStatus::Cancelled as i32)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(AppError::InvalidState(format!(
                "Execution '{}' is already terminal",
                execution_id
            )));
        }

        Ok(())
    }

    pub async fn step_started(&self, step_row_id: &str) -> Result<()> {
        let now = Utc::now();
        sqlx::query(
            r#"
            UPDATE step_execution
            SET status = ?, start_time = COALESCE(start_time, ?), updated_time = ?
            WHERE id = ?
            "#,
        )
        .bind(StepStatus::Running as i32)
        .bind(now)
        .bind(now)
        .bind(step_row_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn step_retrying(&self, step_row_id: &str, retry_count: i32) -> Result<()> {
        sqlx::query(
            "UPDATE step_execution SET status = ?, retry_count = ?, updated_time = ? WHERE id = ?",
        )
        .bind(StepStatus::Retrying as i32)
        .bind(retry_count)
        .bind(Utc::now())
        .bind(step_row_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn step_finished(
        &self,
        step_row_id: &str,
        status: StepStatus,
        result: Option<String>,
        error_message: Option<String>,
        retry_count: i32,
    ) -> Result<()> {
        let step = sqlx::query_as::<_, StepExecution>("SELECT * FROM step_execution WHERE id = ?")
            .bind(step_row_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::ExecutionNotFound(format!("step row {}", step_row_id)))?;

        let now = Utc::now();
        let duration = step.start_time.map(|start| (now - start).num_milliseconds());

        sqlx::query(
            r#"
            UPDATE step_execution
            SET status = ?, result = ?, error_message = ?, retry_count = ?, end_time = ?,
                duration = ?, updated_time = ?
            WHERE id = ?
            "#,
        )
        .bind(status as i32)
        .bind(&result)
        .bind(&error_message)
        .bind(retry_count)
        .bind(now)
        .bind(duration)
        .bind(now)
        .bind(step_row_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
