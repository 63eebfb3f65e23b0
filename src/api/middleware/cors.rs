use axum::Router;
use tower_http::cors::{Any, CorsLayer};

/// Upgrade control requests come from operator dashboards served on other
/// origins, so the control surface stays wide open.
pub fn add_cors(router: Router) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    router.layer(cors)
}
