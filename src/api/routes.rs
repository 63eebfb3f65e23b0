use super::handlers::{configuration, health, upgrade};
use super::middleware::cors::add_cors;
use crate::repository::ConfigurationRepository;
use crate::services::UpgradeOrchestrator;
use axum::{
    Router,
    routing::{get, post, put},
};

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: UpgradeOrchestrator,
    pub config_repo: ConfigurationRepository,
}

pub fn create_router(
    orchestrator: UpgradeOrchestrator,
    config_repo: ConfigurationRepository,
) -> Router {
    let state = AppState {
        orchestrator,
        config_repo,
    };

    let api_routes = Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Upgrade executions
        .route("/api/upgrades", post(upgrade::start_upgrade))
        .route("/api/upgrades", get(upgrade::list_upgrades))
        .route("/api/upgrades/{id}", get(upgrade::get_upgrade))
        .route("/api/upgrades/{id}/steps", get(upgrade::list_steps))
        .route("/api/upgrades/{id}/pause", put(upgrade::pause_upgrade))
        .route("/api/upgrades/{id}/resume", put(upgrade::resume_upgrade))
        .route("/api/upgrades/{id}/cancel", put(upgrade::cancel_upgrade))
        .route("/api/upgrades/{id}/restart", post(upgrade::restart_upgrade))
        // Configuration bundles
        .route("/api/configurations", get(configuration::list_configurations))
        .route(
            "/api/configurations",
            post(configuration::register_configuration),
        )
        .route(
            "/api/configurations/{version}",
            get(configuration::get_configuration),
        )
        .route(
            "/api/configurations/{version}/active",
            put(configuration::set_active),
        )
        .with_state(state);

    add_cors(api_routes)
}
