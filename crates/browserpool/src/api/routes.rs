//! Route table.

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::handlers;
use super::state::AppState;

/// Build the application router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route(
            "/v1/sessions",
            get(handlers::list_sessions).post(handlers::create_session),
        )
        .route("/v1/sessions/release", post(handlers::release_session))
        .route("/v1/sessions/multiple", post(handlers::create_sessions_bulk))
        .route("/v1/sessions/cleanup", post(handlers::cleanup_sessions))
        .route("/v1/sessions/{id}", get(handlers::get_session))
        .route("/v1/sessions/{id}/preview", post(handlers::set_preview_link))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
