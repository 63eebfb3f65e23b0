use crate::error::{AppError, Result};
use crate::executor::{StepExecutor, StepOutcome};
use crate::models::{
    BreakpointData, ExecutionStatus, StepExecution, StepPlan, StepStatus, UpgradeExecution,
};
use crate::repository::ExecutionRepository;
use crate::resolver::VersionChainResolver;
use crate::services::notifier::{ExecutionEvent, NotificationDispatcher};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Semaphore, watch};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ControlSignal {
    Run,
    Pause,
    Cancel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Claim {
    Start,
    Resume,
}

/// Owns the lifecycle of upgrade executions: builds the step plan from a
/// resolved chain, drives the step executor over it in order, checkpoints
/// after every step boundary and exposes pause/resume/cancel control.
///
/// Each execution is driven by exactly one worker; the in-memory control map
/// doubles as the single-writer lock. Workers come from a bounded pool; when
/// the pool is saturated the caller drives the execution inline, which
/// applies backpressure instead of dropping work.
#[derive(Clone)]
pub struct UpgradeOrchestrator {
    exec_repo: ExecutionRepository,
    resolver: VersionChainResolver,
    executor: StepExecutor,
    notifications: NotificationDispatcher,
    controls: Arc<Mutex<HashMap<String, watch::Sender<ControlSignal>>>>,
    workers: Arc<Semaphore>,
    cancel_grace: Duration,
}

impl UpgradeOrchestrator {
    pub fn new(
        exec_repo: ExecutionRepository,
        resolver: VersionChainResolver,
        executor: StepExecutor,
        notifications: NotificationDispatcher,
        worker_count: usize,
        cancel_grace: Duration,
    ) -> Self {
        Self {
            exec_repo,
            resolver,
            executor,
            notifications,
            controls: Arc::new(Mutex::new(HashMap::new())),
            workers: Arc::new(Semaphore::new(worker_count.max(1))),
            cancel_grace,
        }
    }

    /// Resolve, materialize and launch a new upgrade execution. Resolution
    /// errors surface here, before any record is created.
    pub async fn start_upgrade(
        &self,
        site_id: &str,
        environment: &str,
        source_version: &str,
        target_version: &str,
        created_by: Option<String>,
    ) -> Result<String> {
        let chain = self.resolver.resolve(source_version, target_version).await?;
        let plan = StepPlan::for_chain(&chain);
        if plan.is_empty() {
            return Err(AppError::Execution(
                "Resolved chain produced an empty step plan".to_string(),
            ));
        }
        let chain_versions: Vec<String> = chain.iter().map(|b| b.version.clone()).collect();

        let execution = UpgradeExecution::new(
            source_version,
            target_version,
            site_id,
            environment,
            created_by,
        );
        let steps: Vec<StepExecution> = plan
            .steps
            .iter()
            .enumerate()
            .map(|(seq, step)| {
                StepExecution::new(
                    &execution.execution_id,
                    &step.step_id,
                    &step.step_name,
                    step.step_type,
                    seq as i64,
                    Some(step.metadata.to_string()),
                )
            })
            .collect();
        self.exec_repo.create(&execution, &steps).await?;

        let execution_id = execution.execution_id.clone();
        let breakpoint = BreakpointData::new(0, plan, chain_versions);
        self.dispatch_worker(execution.execution_id, breakpoint, Claim::Start)
            .await?;
        Ok(execution_id)
    }

    /// Request a pause; it is observed at the next step boundary, never
    /// mid-step.
    pub async fn pause(&self, execution_id: &str) -> Result<()> {
        {
            let controls = self.controls.lock().expect("controls lock");
            if let Some(tx) = controls.get(execution_id) {
                if *tx.borrow() == ControlSignal::Cancel {
                    return Err(AppError::InvalidState(format!(
                        "Execution '{}' is being cancelled",
                        execution_id
                    )));
                }
                if tx.send(ControlSignal::Pause).is_ok() {
                    return Ok(());
                }
                // Worker exited between lookup and send; fall through.
            }
        }

        let execution = self.exec_repo.get(execution_id).await?;
        Err(AppError::InvalidState(format!(
            "Execution '{}' is not running ({})",
            execution_id,
            execution.status.description()
        )))
    }

    /// Continue a paused execution from its breakpoint.
    pub async fn resume(&self, execution_id: &str) -> Result<()> {
        let execution = self.exec_repo.get(execution_id).await?;
        if execution.status != ExecutionStatus::Paused {
            return Err(AppError::InvalidState(format!(
                "Execution '{}' is not paused ({})",
                execution_id,
                execution.status.description()
            )));
        }

        let raw = execution.breakpoint_data.ok_or_else(|| {
            AppError::Execution(format!("Execution '{}' has no breakpoint data", execution_id))
        })?;
        let breakpoint = BreakpointData::from_json(&raw)?;
        self.dispatch_worker(execution.execution_id, breakpoint, Claim::Resume)
            .await
    }

    /// Cancel an execution. A running worker observes the signal at the next
    /// boundary at the latest; an in-flight step gets a bounded grace period
    /// to report before the execution is marked cancelled regardless.
    pub async fn cancel(&self, execution_id: &str) -> Result<()> {
        {
            let controls = self.controls.lock().expect("controls lock");
            if let Some(tx) = controls.get(execution_id) {
                if tx.send(ControlSignal::Cancel).is_ok() {
                    return Ok(());
                }
                // Worker exited between lookup and send; fall through.
            }
        }

        let execution = self.exec_repo.get(execution_id).await?;
        match execution.status {
            // Running without a driver means a crashed worker; cancelling it
            // directly is safe.
            ExecutionStatus::Pending | ExecutionStatus::Paused | ExecutionStatus::Running => {
                self.exec_repo
                    .finish(execution_id, ExecutionStatus::Cancelled, None)
                    .await?;
                self.notifications
                    .dispatch(execution_id, ExecutionEvent::Cancelled);
                Ok(())
            }
            status => Err(AppError::InvalidState(format!(
                "Execution '{}' is already {}",
                execution_id,
                status.description()
            ))),
        }
    }

    /// Failed and cancelled executions are immutable; restarting creates a
    /// brand-new execution for the same source/target pair.
    pub async fn restart(&self, execution_id: &str) -> Result<String> {
        let old = self.exec_repo.get(execution_id).await?;
        if !matches!(
            old.status,
            ExecutionStatus::Failed | ExecutionStatus::Cancelled
        ) {
            return Err(AppError::InvalidState(format!(
                "Execution '{}' is {} and cannot be restarted",
                execution_id,
                old.status.description()
            )));
        }

        self.start_upgrade(
            &old.site_id,
            &old.environment,
            &old.source_version,
            &old.target_version,
            old.created_by.clone(),
        )
        .await
    }

    pub async fn get_status(&self, execution_id: &str) -> Result<UpgradeExecution> {
        self.exec_repo.get(execution_id).await
    }

    /// Number of executions currently driven by a worker.
    pub fn active_executions(&self) -> usize {
        self.controls.lock().expect("controls lock").len()
    }

    pub async fn list_executions(&self, site_id: Option<String>) -> Result<Vec<UpgradeExecution>> {
        self.exec_repo.list(site_id.as_deref()).await
    }

    pub async fn list_step_history(&self, execution_id: &str) -> Result<Vec<StepExecution>> {
        self.exec_repo.get(execution_id).await?;
        self.exec_repo.list_steps(execution_id).await
    }

    /// Re-queue executions a previous process left `Running`: they resume
    /// from their last committed checkpoint. Called once at startup, before
    /// the control surface accepts requests.
    pub async fn recover_interrupted(&self) -> Result<()> {
        let interrupted = self
            .exec_repo
            .list_by_status(ExecutionStatus::Running)
            .await?;

        for execution in interrupted {
            let execution_id = execution.execution_id.clone();
            tracing::warn!(execution_id, "Recovering execution interrupted by restart");

            let Some(raw) = execution.breakpoint_data else {
                if let Err(e) = self
                    .exec_repo
                    .finish(
                        &execution_id,
                        ExecutionStatus::Failed,
                        Some("Interrupted before first checkpoint".to_string()),
                    )
                    .await
                {
                    tracing::error!(execution_id, "Failed to close interrupted execution: {}", e);
                }
                continue;
            };

            if let Err(e) = BreakpointData::from_json(&raw) {
                if let Err(e) = self
                    .exec_repo
                    .finish(
                        &execution_id,
                        ExecutionStatus::Failed,
                        Some(format!("Unreadable breakpoint data: {}", e)),
                    )
                    .await
                {
                    tracing::error!(execution_id, "Failed to close interrupted execution: {}", e);
                }
                continue;
            }

            if let Err(e) = self.exec_repo.mark_paused(&execution_id, &raw).await {
                tracing::error!(execution_id, "Failed to stage recovered execution: {}", e);
                continue;
            }
            if let Err(e) = self.resume(&execution_id).await {
                tracing::error!(execution_id, "Failed to resume recovered execution: {}", e);
            }
        }

        Ok(())
    }

    async fn dispatch_worker(
        &self,
        execution_id: String,
        breakpoint: BreakpointData,
        claim: Claim,
    ) -> Result<()> {
        let control = {
            let mut controls = self.controls.lock().expect("controls lock");
            if controls.contains_key(&execution_id) {
                return Err(AppError::InvalidState(format!(
                    "Execution '{}' already has a worker",
                    execution_id
                )));
            }
            let (tx, rx) = watch::channel(ControlSignal::Run);
            controls.insert(execution_id.clone(), tx);
            rx
        };

        let orchestrator = self.clone();
        match self.workers.clone().try_acquire_owned() {
            Ok(permit) => {
                tokio::spawn(async move {
                    let _permit = permit;
                    orchestrator.drive(&execution_id, breakpoint, claim, control).await;
                });
            }
            Err(_) => {
                tracing::warn!(execution_id, "Worker pool saturated, driving inline");
                orchestrator
                    .drive(&execution_id, breakpoint, claim, control)
                    .await;
            }
        }

        Ok(())
    }

    async fn drive(
        &self,
        execution_id: &str,
        breakpoint: BreakpointData,
        claim: Claim,
        mut control: watch::Receiver<ControlSignal>,
    ) {
        if let Err(e) = self.claim(execution_id, &breakpoint, claim).await {
            tracing::error!(execution_id, "Failed to claim execution: {}", e);
            self.release(execution_id);
            return;
        }
        let claim_event = match claim {
            Claim::Start => ExecutionEvent::Started,
            Claim::Resume => ExecutionEvent::Resumed,
        };
        self.notifications.dispatch(execution_id, claim_event);

        let plan = breakpoint.plan;
        let chain = breakpoint.chain;
        let total = plan.len();

        for idx in breakpoint.next_step_index..total {
            // Copy the signal out; a watch borrow must not live across an
            // await point.
            let signal = *control.borrow();
            match signal {
                ControlSignal::Pause => {
                    self.pause_at(execution_id, idx, &plan, &chain).await;
                    return;
                }
                ControlSignal::Cancel => {
                    self.finalize(execution_id, ExecutionStatus::Cancelled, None).await;
                    return;
                }
                ControlSignal::Run => {}
            }

            let step = &plan.steps[idx];

            // On resume, never re-run a step already recorded done. A crash
            // can land between a step's terminal write and its checkpoint,
            // so the skipped step still has to be counted here.
            match self.exec_repo.get_step(execution_id, &step.step_id).await {
                Ok(record) if record.status.is_done() => {
                    if !self.checkpoint_progress(execution_id, idx, &plan, &chain).await {
                        return;
                    }
                    continue;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::error!(execution_id, "Failed to load step record: {}", e);
                    self.release(execution_id);
                    return;
                }
            }

            let step_fut = self.executor.execute(execution_id, step);
            tokio::pin!(step_fut);

            let mut interrupted = false;
            let outcome = tokio::select! {
                result = &mut step_fut => Some(result),
                _ = wait_for_cancel(&mut control) => {
                    interrupted = true;
                    match tokio::time::timeout(self.cancel_grace, &mut step_fut).await {
                        Ok(result) => Some(result),
                        Err(_) => None,
                    }
                }
            };

            if interrupted {
                // The interrupted step is never counted as complete; if it
                // did not report within the grace period its record is closed
                // as skipped.
                if outcome.is_none() {
                    if let Ok(record) =
                        self.exec_repo.get_step(execution_id, &step.step_id).await
                    {
                        let _ = self
                            .exec_repo
                            .step_finished(
                                &record.id,
                                StepStatus::Skipped,
                                None,
                                Some("Interrupted by cancellation".to_string()),
                                record.retry_count,
                            )
                            .await;
                    }
                }
                self.finalize(execution_id, ExecutionStatus::Cancelled, None).await;
                return;
            }

            let outcome = match outcome.expect("outcome present when not timed out") {
                Ok(outcome) => outcome,
                Err(e) => {
                    // Persistence failure mid-step: abandon the attempt, the
                    // execution stays at its last durable checkpoint.
                    tracing::error!(execution_id, "Step execution aborted: {}", e);
                    self.release(execution_id);
                    return;
                }
            };

            match outcome {
                StepOutcome::Success(_) | StepOutcome::Skipped(_) => {
                    if !self.checkpoint_progress(execution_id, idx, &plan, &chain).await {
                        return;
                    }
                    self.notifications.dispatch(
                        execution_id,
                        ExecutionEvent::StepCompleted {
                            step_id: step.step_id.clone(),
                            completed_steps: (idx + 1) as i32,
                        },
                    );
                }
                StepOutcome::Failed(error) => {
                    self.finalize(execution_id, ExecutionStatus::Failed, Some(error)).await;
                    return;
                }
            }
        }

        self.finalize(execution_id, ExecutionStatus::Success, None).await;
    }

    /// Commit progress through step `idx`: counter, current step pointer and
    /// breakpoint blob in one durable write. On failure the worker abandons
    /// the execution at its last committed checkpoint.
    async fn checkpoint_progress(
        &self,
        execution_id: &str,
        idx: usize,
        plan: &StepPlan,
        chain: &[String],
    ) -> bool {
        let next_step_id = plan
            .steps
            .get(idx + 1)
            .map(|s| s.step_id.as_str())
            .unwrap_or_else(|| plan.steps[idx].step_id.as_str());
        let breakpoint = BreakpointData::new(idx + 1, plan.clone(), chain.to_vec());
        let serialized = match breakpoint.to_json() {
            Ok(json) => json,
            Err(e) => {
                tracing::error!(execution_id, "Breakpoint serialization failed: {}", e);
                self.release(execution_id);
                return false;
            }
        };
        if let Err(e) = self
            .exec_repo
            .checkpoint(execution_id, (idx + 1) as i32, next_step_id, &serialized)
            .await
        {
            tracing::error!(execution_id, "Checkpoint write failed: {}", e);
            self.release(execution_id);
            return false;
        }
        true
    }

    async fn claim(
        &self,
        execution_id: &str,
        breakpoint: &BreakpointData,
        claim: Claim,
    ) -> Result<()> {
        match claim {
            Claim::Start => {
                let first_step_id = breakpoint
                    .plan
                    .steps
                    .first()
                    .map(|s| s.step_id.clone())
                    .unwrap_or_default();
                self.exec_repo
                    .mark_running(
                        execution_id,
                        breakpoint.plan.len() as i32,
                        &first_step_id,
                        &breakpoint.to_json()?,
                    )
                    .await
            }
            Claim::Resume => self.exec_repo.mark_resumed(execution_id).await,
        }
    }

    async fn pause_at(&self, execution_id: &str, next_index: usize, plan: &StepPlan, chain: &[String]) {
        let breakpoint = BreakpointData::new(next_index, plan.clone(), chain.to_vec());
        match breakpoint.to_json() {
            Ok(serialized) => {
                if let Err(e) = self.exec_repo.mark_paused(execution_id, &serialized).await {
                    tracing::error!(execution_id, "Failed to pause execution: {}", e);
                } else {
                    self.notifications.dispatch(execution_id, ExecutionEvent::Paused);
                }
            }
            Err(e) => tracing::error!(execution_id, "Breakpoint serialization failed: {}", e),
        }
        self.release(execution_id);
    }

    async fn finalize(
        &self,
        execution_id: &str,
        status: ExecutionStatus,
        error: Option<String>,
    ) {
        let event = match (&status, &error) {
            (ExecutionStatus::Success, _) => ExecutionEvent::Succeeded,
            (ExecutionStatus::Cancelled, _) => ExecutionEvent::Cancelled,
            (_, Some(message)) => ExecutionEvent::Failed {
                error: message.clone(),
            },
            (_, None) => ExecutionEvent::Failed {
                error: String::new(),
            },
        };

        if let Err(e) = self.exec_repo.finish(execution_id, status, error).await {
            tracing::error!(execution_id, "Failed to finalize execution: {}", e);
        } else {
            self.notifications.dispatch(execution_id, event);
        }
        self.release(execution_id);
    }

    fn release(&self, execution_id: &str) {
        self.controls
            .lock()
            .expect("controls lock")
            .remove(execution_id);
    }
}

async fn wait_for_cancel(control: &mut watch::Receiver<ControlSignal>) {
    loop {
        if *control.borrow() == ControlSignal::Cancel {
            return;
        }
        if control.changed().await.is_err() {
            // Sender gone; cancellation can no longer arrive.
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::executor::{ActionError, ActionRunner, RunnerRegistry};
    use crate::models::{PlanStep, StepType, VersionType};
    use crate::repository::ConfigurationRepository;
    use crate::test_support::{memory_pool, seed_bundle};
    use async_trait::async_trait;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RunnerScript {
        fail_step: Option<&'static str>,
        slow_step: Option<&'static str>,
        slow_delay: Duration,
        step_delay: Duration,
    }

    struct ScriptedRunner {
        script: RunnerScript,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl ActionRunner for ScriptedRunner {
        async fn perform(&self, step: &PlanStep) -> std::result::Result<String, ActionError> {
            self.log.lock().unwrap().push(step.step_id.clone());
            let delay = if self.script.slow_step == Some(step.step_id.as_str()) {
                self.script.slow_delay
            } else {
                self.script.step_delay
            };
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if self.script.fail_step == Some(step.step_id.as_str()) {
                return Err(ActionError::Fatal("step blew up".to_string()));
            }
            Ok("ok".to_string())
        }
    }

    struct Harness {
        orchestrator: UpgradeOrchestrator,
        exec_repo: ExecutionRepository,
        config_repo: ConfigurationRepository,
        log: Arc<Mutex<Vec<String>>>,
        _dir: TempDir,
    }

    async fn harness(script: RunnerScript, cancel_grace: Duration) -> Harness {
        let pool = memory_pool().await;
        let exec_repo = ExecutionRepository::new(pool.clone());
        let config_repo = ConfigurationRepository::new(pool);
        let resolver = VersionChainResolver::new(config_repo.clone());

        let log = Arc::new(Mutex::new(Vec::new()));
        let runner = Arc::new(ScriptedRunner {
            script,
            log: log.clone(),
        });
        let mut registry = RunnerRegistry::new();
        registry.register(StepType::DataMigration, runner.clone());
        registry.register(StepType::ServiceRestart, runner.clone());
        registry.register(StepType::Validation, runner);

        let executor = StepExecutor::new(
            exec_repo.clone(),
            Arc::new(registry),
            RetryConfig {
                max_attempts: 3,
                backoff_base_ms: 1,
            },
        );
        let notifications = NotificationDispatcher::new(16, Vec::new());
        let orchestrator = UpgradeOrchestrator::new(
            exec_repo.clone(),
            resolver,
            executor,
            notifications,
            2,
            cancel_grace,
        );

        let dir = tempfile::tempdir().unwrap();
        seed_bundle(&config_repo, dir.path(), "1.0", VersionType::Baseline, None, false).await;
        seed_bundle(&config_repo, dir.path(), "1.1", VersionType::Patch, Some("1.0"), false).await;
        seed_bundle(&config_repo, dir.path(), "1.2", VersionType::Patch, Some("1.1"), false).await;

        Harness {
            orchestrator,
            exec_repo,
            config_repo,
            log,
            _dir: dir,
        }
    }

    async fn wait_for_status(
        repo: &ExecutionRepository,
        execution_id: &str,
        status: ExecutionStatus,
    ) -> UpgradeExecution {
        for _ in 0..500 {
            let execution = repo.get(execution_id).await.unwrap();
            if execution.status == status {
                return execution;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("timed out waiting for status {:?}", status);
    }

    async fn wait_for_steps_seen(log: &Arc<Mutex<Vec<String>>>, count: usize) {
        for _ in 0..500 {
            if log.lock().unwrap().len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("timed out waiting for {} steps to start", count);
    }

    #[tokio::test]
    async fn full_run_completes_every_step() {
        let h = harness(RunnerScript::default(), Duration::from_secs(1)).await;

        let id = h
            .orchestrator
            .start_upgrade("site-1", "prod", "1.0", "1.2", Some("ops".to_string()))
            .await
            .unwrap();
        let execution = wait_for_status(&h.exec_repo, &id, ExecutionStatus::Success).await;

        // Three bundles, three steps each
        assert_eq!(execution.total_steps, 9);
        assert_eq!(execution.completed_steps, 9);
        assert!(execution.end_time.is_some());
        assert!(execution.duration.is_some());

        let steps = h.orchestrator.list_step_history(&id).await.unwrap();
        assert_eq!(steps.len(), 9);
        assert!(steps.iter().all(|s| s.status == StepStatus::Success));

        let log = h.log.lock().unwrap();
        assert_eq!(log.len(), 9);
        assert_eq!(log[0], "1.0:precheck");
        assert_eq!(log[8], "1.2:verify");
    }

    #[tokio::test]
    async fn resolution_failure_creates_no_record() {
        let h = harness(RunnerScript::default(), Duration::from_secs(1)).await;

        let err = h
            .orchestrator
            .start_upgrade("site-1", "prod", "1.0", "9.9", None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NoUpgradePath { .. }));
        assert!(h.exec_repo.list(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn checksum_mismatch_aborts_before_any_record() {
        let h = harness(RunnerScript::default(), Duration::from_secs(1)).await;
        let bundle = h.config_repo.get("1.1").await.unwrap();
        std::fs::write(&bundle.config_path, b"tampered").unwrap();

        let err = h
            .orchestrator
            .start_upgrade("site-1", "prod", "1.0", "1.2", None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::IntegrityViolation(v) if v == "1.1"));
        assert!(h.exec_repo.list(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn fatal_step_failure_fails_the_execution() {
        let h = harness(
            RunnerScript {
                fail_step: Some("1.1:apply"),
                ..Default::default()
            },
            Duration::from_secs(1),
        )
        .await;

        let id = h
            .orchestrator
            .start_upgrade("site-1", "prod", "1.0", "1.2", None)
            .await
            .unwrap();
        let execution = wait_for_status(&h.exec_repo, &id, ExecutionStatus::Failed).await;

        // 1.0:precheck, 1.0:apply, 1.0:verify, 1.1:precheck completed
        assert_eq!(execution.completed_steps, 4);
        assert_eq!(execution.total_steps, 9);
        assert_eq!(execution.current_step_id.as_deref(), Some("1.1:apply"));
        assert_eq!(execution.error_message.as_deref(), Some("step blew up"));

        let step = h.exec_repo.get_step(&id, "1.1:apply").await.unwrap();
        assert_eq!(step.status, StepStatus::Failed);
    }

    #[tokio::test]
    async fn skippable_precheck_failure_does_not_stop_the_plan() {
        let h = harness(
            RunnerScript {
                fail_step: Some("1.1:precheck"),
                ..Default::default()
            },
            Duration::from_secs(1),
        )
        .await;

        let id = h
            .orchestrator
            .start_upgrade("site-1", "prod", "1.0", "1.2", None)
            .await
            .unwrap();
        let execution = wait_for_status(&h.exec_repo, &id, ExecutionStatus::Success).await;
        assert_eq!(execution.completed_steps, 9);

        let step = h.exec_repo.get_step(&id, "1.1:precheck").await.unwrap();
        assert_eq!(step.status, StepStatus::Skipped);
    }

    #[tokio::test]
    async fn pause_then_resume_runs_each_step_once() {
        let h = harness(
            RunnerScript {
                step_delay: Duration::from_millis(30),
                ..Default::default()
            },
            Duration::from_secs(1),
        )
        .await;

        let id = h
            .orchestrator
            .start_upgrade("site-1", "prod", "1.0", "1.2", None)
            .await
            .unwrap();

        wait_for_steps_seen(&h.log, 2).await;
        h.orchestrator.pause(&id).await.unwrap();
        let paused = wait_for_status(&h.exec_repo, &id, ExecutionStatus::Paused).await;
        assert!(paused.completed_steps < paused.total_steps);
        assert!(paused.breakpoint_data.is_some());

        h.orchestrator.resume(&id).await.unwrap();
        let execution = wait_for_status(&h.exec_repo, &id, ExecutionStatus::Success).await;
        assert_eq!(execution.completed_steps, 9);

        // No step ran twice across the pause boundary.
        let log = h.log.lock().unwrap();
        let mut unique = log.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(log.len(), unique.len());
        assert_eq!(log.len(), 9);
    }

    #[tokio::test]
    async fn cancel_never_counts_the_interrupted_step() {
        let h = harness(
            RunnerScript {
                step_delay: Duration::from_millis(100),
                ..Default::default()
            },
            Duration::from_secs(1),
        )
        .await;

        let id = h
            .orchestrator
            .start_upgrade("site-1", "prod", "1.0", "1.2", None)
            .await
            .unwrap();

        // Step 4 of the plan is running; the first three are checkpointed.
        wait_for_steps_seen(&h.log, 4).await;
        h.orchestrator.cancel(&id).await.unwrap();

        let execution = wait_for_status(&h.exec_repo, &id, ExecutionStatus::Cancelled).await;
        assert!(execution.completed_steps <= 3);
        assert!(execution.end_time.is_some());
    }

    #[tokio::test]
    async fn unresponsive_step_is_skipped_after_grace_period() {
        let h = harness(
            RunnerScript {
                slow_step: Some("1.0:apply"),
                slow_delay: Duration::from_secs(30),
                ..Default::default()
            },
            Duration::from_millis(50),
        )
        .await;

        let id = h
            .orchestrator
            .start_upgrade("site-1", "prod", "1.0", "1.1", None)
            .await
            .unwrap();

        wait_for_steps_seen(&h.log, 2).await;
        h.orchestrator.cancel(&id).await.unwrap();

        let execution = wait_for_status(&h.exec_repo, &id, ExecutionStatus::Cancelled).await;
        assert_eq!(execution.completed_steps, 1);

        let step = h.exec_repo.get_step(&id, "1.0:apply").await.unwrap();
        assert_eq!(step.status, StepStatus::Skipped);
        assert_eq!(
            step.error_message.as_deref(),
            Some("Interrupted by cancellation")
        );
    }

    #[tokio::test]
    async fn restarting_a_failed_execution_creates_a_new_record() {
        let h = harness(
            RunnerScript {
                fail_step: Some("1.0:apply"),
                ..Default::default()
            },
            Duration::from_secs(1),
        )
        .await;

        let old_id = h
            .orchestrator
            .start_upgrade("site-1", "prod", "1.0", "1.1", None)
            .await
            .unwrap();
        wait_for_status(&h.exec_repo, &old_id, ExecutionStatus::Failed).await;

        let new_id = h.orchestrator.restart(&old_id).await.unwrap();
        assert_ne!(new_id, old_id);
        wait_for_status(&h.exec_repo, &new_id, ExecutionStatus::Failed).await;

        // The failed record is immutable; restarting added a sibling.
        let old = h.exec_repo.get(&old_id).await.unwrap();
        assert_eq!(old.status, ExecutionStatus::Failed);
        assert_eq!(h.exec_repo.list(None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn recovery_resumes_from_last_committed_checkpoint() {
        let h = harness(RunnerScript::default(), Duration::from_secs(1)).await;

        // Simulate an execution a previous process left running after
        // checkpointing two steps.
        let chain = vec![
            h.config_repo.get("1.0").await.unwrap(),
            h.config_repo.get("1.1").await.unwrap(),
        ];
        let chain_versions: Vec<String> = chain.iter().map(|b| b.version.clone()).collect();
        let plan = StepPlan::for_chain(&chain);
        let execution = UpgradeExecution::new("1.0", "1.1", "site-1", "prod", None);
        let steps: Vec<StepExecution> = plan
            .steps
            .iter()
            .enumerate()
            .map(|(seq, step)| {
                StepExecution::new(
                    &execution.execution_id,
                    &step.step_id,
                    &step.step_name,
                    step.step_type,
                    seq as i64,
                    None,
                )
            })
            .collect();
        h.exec_repo.create(&execution, &steps).await.unwrap();

        let id = execution.execution_id.clone();
        let bp = BreakpointData::new(0, plan.clone(), chain_versions.clone());
        h.exec_repo
            .mark_running(&id, plan.len() as i32, &plan.steps[0].step_id, &bp.to_json().unwrap())
            .await
            .unwrap();
        for idx in 0..2 {
            let record = h.exec_repo.get_step(&id, &plan.steps[idx].step_id).await.unwrap();
            h.exec_repo.step_started(&record.id).await.unwrap();
            h.exec_repo
                .step_finished(&record.id, StepStatus::Success, Some("ok".into()), None, 0)
                .await
                .unwrap();
            let bp = BreakpointData::new(idx + 1, plan.clone(), chain_versions.clone());
            h.exec_repo
                .checkpoint(
                    &id,
                    (idx + 1) as i32,
                    &plan.steps[idx + 1].step_id,
                    &bp.to_json().unwrap(),
                )
                .await
                .unwrap();
        }

        h.orchestrator.recover_interrupted().await.unwrap();
        let recovered = wait_for_status(&h.exec_repo, &id, ExecutionStatus::Success).await;
        assert_eq!(recovered.completed_steps, plan.len() as i32);

        // Only the unexecuted tail ran after recovery.
        let log = h.log.lock().unwrap();
        let expected: Vec<String> = plan.steps[2..].iter().map(|s| s.step_id.clone()).collect();
        assert_eq!(*log, expected);
    }

    #[tokio::test]
    async fn active_executions_tracks_driven_workers() {
        let h = harness(
            RunnerScript {
                step_delay: Duration::from_millis(30),
                ..Default::default()
            },
            Duration::from_secs(1),
        )
        .await;
        assert_eq!(h.orchestrator.active_executions(), 0);

        let id = h
            .orchestrator
            .start_upgrade("site-1", "prod", "1.0", "1.1", None)
            .await
            .unwrap();
        wait_for_steps_seen(&h.log, 1).await;
        assert_eq!(h.orchestrator.active_executions(), 1);

        wait_for_status(&h.exec_repo, &id, ExecutionStatus::Success).await;
        for _ in 0..100 {
            if h.orchestrator.active_executions() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(h.orchestrator.active_executions(), 0);
    }

    #[tokio::test]
    async fn recovery_handles_each_interrupted_execution_independently() {
        let h = harness(RunnerScript::default(), Duration::from_secs(1)).await;

        // A running row that died before its first checkpoint.
        let mut orphan = UpgradeExecution::new("1.0", "1.1", "site-1", "prod", None);
        orphan.status = ExecutionStatus::Running;
        h.exec_repo.create(&orphan, &[]).await.unwrap();

        // A healthy interrupted row behind it.
        let chain = vec![
            h.config_repo.get("1.0").await.unwrap(),
            h.config_repo.get("1.1").await.unwrap(),
        ];
        let chain_versions: Vec<String> = chain.iter().map(|b| b.version.clone()).collect();
        let plan = StepPlan::for_chain(&chain);
        let execution = UpgradeExecution::new("1.0", "1.1", "site-2", "prod", None);
        let steps: Vec<StepExecution> = plan
            .steps
            .iter()
            .enumerate()
            .map(|(seq, step)| {
                StepExecution::new(
                    &execution.execution_id,
                    &step.step_id,
                    &step.step_name,
                    step.step_type,
                    seq as i64,
                    None,
                )
            })
            .collect();
        h.exec_repo.create(&execution, &steps).await.unwrap();
        let bp = BreakpointData::new(0, plan.clone(), chain_versions);
        h.exec_repo
            .mark_running(
                &execution.execution_id,
                plan.len() as i32,
                &plan.steps[0].step_id,
                &bp.to_json().unwrap(),
            )
            .await
            .unwrap();

        h.orchestrator.recover_interrupted().await.unwrap();

        let failed = h.exec_repo.get(&orphan.execution_id).await.unwrap();
        assert_eq!(failed.status, ExecutionStatus::Failed);
        assert_eq!(
            failed.error_message.as_deref(),
            Some("Interrupted before first checkpoint")
        );

        let resumed =
            wait_for_status(&h.exec_repo, &execution.execution_id, ExecutionStatus::Success).await;
        assert_eq!(resumed.completed_steps, resumed.total_steps);
    }

    #[tokio::test]
    async fn recovery_counts_steps_finished_before_a_lost_checkpoint() {
        let h = harness(RunnerScript::default(), Duration::from_secs(1)).await;

        // Every step record finished Success, but the process died after
        // committing only the first checkpoint.
        let chain = vec![
            h.config_repo.get("1.0").await.unwrap(),
            h.config_repo.get("1.1").await.unwrap(),
        ];
        let chain_versions: Vec<String> = chain.iter().map(|b| b.version.clone()).collect();
        let plan = StepPlan::for_chain(&chain);
        let execution = UpgradeExecution::new("1.0", "1.1", "site-1", "prod", None);
        let steps: Vec<StepExecution> = plan
            .steps
            .iter()
            .enumerate()
            .map(|(seq, step)| {
                StepExecution::new(
                    &execution.execution_id,
                    &step.step_id,
                    &step.step_name,
                    step.step_type,
                    seq as i64,
                    None,
                )
            })
            .collect();
        h.exec_repo.create(&execution, &steps).await.unwrap();

        let id = execution.execution_id.clone();
        let bp = BreakpointData::new(0, plan.clone(), chain_versions.clone());
        h.exec_repo
            .mark_running(&id, plan.len() as i32, &plan.steps[0].step_id, &bp.to_json().unwrap())
            .await
            .unwrap();
        for step in &plan.steps {
            let record = h.exec_repo.get_step(&id, &step.step_id).await.unwrap();
            h.exec_repo.step_started(&record.id).await.unwrap();
            h.exec_repo
                .step_finished(&record.id, StepStatus::Success, Some("ok".into()), None, 0)
                .await
                .unwrap();
        }
        let bp = BreakpointData::new(1, plan.clone(), chain_versions);
        h.exec_repo
            .checkpoint(&id, 1, &plan.steps[1].step_id, &bp.to_json().unwrap())
            .await
            .unwrap();

        h.orchestrator.recover_interrupted().await.unwrap();
        let recovered = wait_for_status(&h.exec_repo, &id, ExecutionStatus::Success).await;

        // Success implies full progress even when the done steps were never
        // individually checkpointed.
        assert_eq!(recovered.completed_steps, recovered.total_steps);
        assert!(h.log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn pause_rejects_executions_that_are_not_running() {
        let h = harness(RunnerScript::default(), Duration::from_secs(1)).await;

        let err = h.orchestrator.pause("missing").await.unwrap_err();
        assert!(matches!(err, AppError::ExecutionNotFound(_)));

        let id = h
            .orchestrator
            .start_upgrade("site-1", "prod", "1.0", "1.1", None)
            .await
            .unwrap();
        wait_for_status(&h.exec_repo, &id, ExecutionStatus::Success).await;
        let err = h.orchestrator.pause(&id).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidState(_)));
    }
}
