//! Ingress HTTP router.

use crate::handlers::{self, AppState};
use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

/// Compose the ingress routes.
///
/// # Routes
///
/// - `POST /applications` — accept a deployment request
/// - `POST /projects` — register a project
/// - `GET /healthz` — liveness probe
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/applications", post(handlers::create_application))
        .route("/projects", post(handlers::create_project))
        .route("/healthz", get(handlers::health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
