use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;

use crate::api::handlers::partition;
use crate::api::handlers::partition::AppState;

/// Create router with application state
pub fn create_router_with_state(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route(
            "/api/partitions/{partition}/status",
            get(partition::get_status),
        )
        .route(
            "/api/partitions/{partition}/pending",
            get(partition::list_pending),
        )
        .route(
            "/api/partitions/{partition}/merge",
            post(partition::merge_pending),
        )
        .route(
            "/api/partitions/{partition}/convert",
            post(partition::convert_batch),
        )
        .route(
            "/api/partitions/{partition}/records",
            post(partition::record_outcome),
        )
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}
