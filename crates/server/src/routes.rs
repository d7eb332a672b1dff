//! Route configuration.

use crate::handlers;
use crate::state::AppState;
use axum::Router;
use axum::routing::get;
use tower_http::trace::TraceLayer;

/// Create the application router.
///
/// Artifact ids span a variable number of path segments, so everything
/// under the version prefix goes through a fallback handler that parses
/// the id and endpoint itself.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Liveness probe, intentionally outside the version prefix.
        .route("/health", get(handlers::health_check))
        .fallback(handlers::artifact_dispatch)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
