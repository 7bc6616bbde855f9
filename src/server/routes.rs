//! Router configuration for the web server.

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;

use super::handlers;
use super::AppState;

/// Create the main router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(handlers::health))
        .route("/sync/start", post(handlers::sync::start))
        .route("/sync/progress", get(handlers::sync::progress))
        .route("/sync/pause", post(handlers::sync::pause))
        .route("/sync/resume", post(handlers::sync::resume))
        .route("/sync/cancel", post(handlers::sync::cancel))
        .route("/sync/resume", get(handlers::sync::resumable))
        .route("/duration/start", post(handlers::duration::start))
        .route("/duration/progress", get(handlers::duration::progress))
        .route("/duration/pause", post(handlers::duration::pause))
        .route("/duration/resume", post(handlers::duration::resume))
        .route("/duration/cancel", post(handlers::duration::cancel))
        .route("/duration/resume", get(handlers::duration::resumable))
        .route("/duration/review/:id", post(handlers::duration::review))
        .route("/duration/track/:id/manual", post(handlers::duration::manual))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
