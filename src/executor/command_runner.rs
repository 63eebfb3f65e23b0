use super::{ActionError, ActionRunner};
use crate::models::PlanStep;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Runs an external command for each step, passing step context through the
/// environment. Exit code zero is success; a non-zero exit is a fatal step
/// failure, while failing to launch the command at all is treated as
/// transient (the host may be mid-restart).
#[derive(Clone)]
pub struct CommandRunner {
    program: PathBuf,
}

impl CommandRunner {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl ActionRunner for CommandRunner {
    async fn perform(&self, step: &PlanStep) -> Result<String, ActionError> {
        if !Path::new(&self.program).is_file() {
            return Err(ActionError::Fatal(format!(
                "Step command not found: {}",
                self.program.display()
            )));
        }

        let config_path = step
            .metadata
            .get("config_path")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.env("UPGRADE_STEP_ID", &step.step_id)
            .env("UPGRADE_STEP_TYPE", step.step_type.description())
            .env("UPGRADE_VERSION", &step.version)
            .env("UPGRADE_CONFIG_PATH", config_path)
            .env("UPGRADE_STEP_METADATA", step.metadata.to_string());
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());
        cmd.kill_on_drop(true);

        let output = cmd
            .output()
            .await
            .map_err(|e| ActionError::Retryable(format!("Failed to launch step command: {}", e)))?;

        if output.status.success() {
            let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if stdout.is_empty() {
                Ok("ok".to_string())
            } else {
                Ok(stdout)
            }
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let message = if stderr.is_empty() {
                format!("Step command exited with {}", output.status)
            } else {
                stderr
            };
            Err(ActionError::Fatal(message))
        }
    }
}
