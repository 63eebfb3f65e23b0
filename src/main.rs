mod api;
mod config;
mod error;
mod executor;
mod models;
mod paths;
mod repository;
mod resolver;
mod services;
#[cfg(test)]
mod test_support;

use crate::config::Config;
use crate::executor::{CommandRunner, RunnerRegistry, StepExecutor};
use crate::models::StepType;
use crate::repository::{ConfigurationRepository, ExecutionRepository, establish_connection};
use crate::resolver::VersionChainResolver;
use crate::services::{LogNotifier, NotificationDispatcher, UpgradeOrchestrator};
use api::create_router;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn build_registry() -> anyhow::Result<RunnerRegistry> {
    let scripts = paths::scripts_dir()?;
    let mut registry = RunnerRegistry::new();
    registry.register(
        StepType::DataMigration,
        Arc::new(CommandRunner::new(scripts.join("data_migration.sh"))),
    );
    registry.register(
        StepType::ServiceRestart,
        Arc::new(CommandRunner::new(scripts.join("service_restart.sh"))),
    );
    registry.register(
        StepType::Validation,
        Arc::new(CommandRunner::new(scripts.join("validation.sh"))),
    );
    Ok(registry)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "upgrade_node=debug,tower_http=debug,axum=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;
    tracing::info!("Starting upgrade_node with config: {:?}", config);

    if let Some(path) = config.database_url.strip_prefix("sqlite:") {
        let path = std::path::Path::new(path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
    }

    // Establish database connection
    let db_pool = establish_connection(&config.database_url).await?;
    tracing::info!("Database connected: {}", config.database_url);

    // Initialize repositories
    let config_repo = ConfigurationRepository::new(db_pool.clone());
    let execution_repo = ExecutionRepository::new(db_pool);

    // Wire the orchestration engine
    let resolver = VersionChainResolver::new(config_repo.clone());
    let registry = Arc::new(build_registry()?);
    let executor = StepExecutor::new(execution_repo.clone(), registry, config.retry);
    let notifications = NotificationDispatcher::new(
        config.notification_queue_capacity,
        vec![Arc::new(LogNotifier)],
    );
    let orchestrator = UpgradeOrchestrator::new(
        execution_repo,
        resolver,
        executor,
        notifications,
        config.worker_count,
        Duration::from_millis(config.cancel_grace_ms),
    );

    // Resume executions a previous process left mid-flight
    if let Err(err) = orchestrator.recover_interrupted().await {
        tracing::error!("Failed to recover interrupted executions: {}", err);
    }

    // Create router
    let app = create_router(orchestrator, config_repo);
    let app = app.layer(TraceLayer::new_for_http());

    // Start server
    let addr = format!("{}:{}", config.host, config.port);
    let addr = addr.parse::<SocketAddr>()?;
    tracing::info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
