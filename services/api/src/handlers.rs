//! HTTP handlers for the ingress API.

use crate::error::AppError;
use axum::{Json, body::Bytes, extract::State, http::StatusCode};
use conveyor_core::bus::MessageBus;
use conveyor_core::events::{DeploymentRequested, PipelineEvent, subjects};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Shared state for the ingress handlers.
#[derive(Clone)]
pub struct AppState {
    /// Bus the ingress publishes pipeline events on.
    pub bus: Arc<dyn MessageBus>,
}

/// Request to register an application and trigger its first deployment.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CreateApplicationRequest {
    /// Application display name.
    pub name: String,
    /// Git repository to build from.
    pub git_repository: String,
    /// Branch to build.
    pub git_branch: String,
}

/// Response after accepting a deployment request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateApplicationResponse {
    /// Minted application id.
    pub id: String,
    /// Application display name, echoed back.
    pub name: String,
    /// Deployment status; always "pending" at this boundary.
    pub status: String,
}

/// Request to create a project.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CreateProjectRequest {
    /// Project display name.
    pub name: String,
}

/// Response after creating a project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateProjectResponse {
    /// Minted project id.
    pub id: String,
    /// Project display name, echoed back.
    pub name: String,
}

/// `POST /applications` — validate the request, publish
/// `DeploymentRequested`, answer `202 Accepted`.
///
/// The body is decoded by hand so that undecodable and invalid requests
/// both answer `400` with a JSON error body.
///
/// # Errors
///
/// `400` for an undecodable or invalid body; `500` when the event cannot
/// be published.
pub async fn create_application(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<CreateApplicationResponse>), AppError> {
    let request: CreateApplicationRequest = serde_json::from_slice(&body)
        .map_err(|e| AppError::bad_request(format!("invalid request body: {e}")))?;

    if request.name.is_empty() {
        return Err(AppError::bad_request("name is required"));
    }

    let app_id = format!("app-{}", Uuid::new_v4().simple());
    let event = DeploymentRequested {
        app_id: app_id.clone(),
        git_repository: request.git_repository,
        git_branch: request.git_branch,
    };
    event
        .validate()
        .map_err(|e| AppError::bad_request(e.to_string()))?;

    let payload = event.to_bytes().map_err(|e| {
        AppError::internal("could not encode deployment request").with_source(e.into())
    })?;
    state
        .bus
        .publish(subjects::DEPLOYMENT_REQUESTED, &payload)
        .await
        .map_err(|e| {
            AppError::internal("could not publish deployment request").with_source(e.into())
        })?;

    info!(
        app_id = %app_id,
        subject = subjects::DEPLOYMENT_REQUESTED,
        "Deployment requested"
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(CreateApplicationResponse {
            id: app_id,
            name: request.name,
            status: "pending".to_string(),
        }),
    ))
}

/// `POST /projects` — register a project.
///
/// Project storage is an external collaborator; this endpoint mints an id
/// and echoes the record without persisting anything.
///
/// # Errors
///
/// `400` for an undecodable body.
pub async fn create_project(
    body: Bytes,
) -> Result<(StatusCode, Json<CreateProjectResponse>), AppError> {
    let request: CreateProjectRequest = serde_json::from_slice(&body)
        .map_err(|e| AppError::bad_request(format!("invalid request body: {e}")))?;

    let project_id = format!("proj-{}", Uuid::new_v4().simple());
    info!(project_id = %project_id, name = %request.name, "Project created");

    Ok((
        StatusCode::CREATED,
        Json(CreateProjectResponse {
            id: project_id,
            name: request.name,
        }),
    ))
}

/// `GET /healthz` — liveness probe.
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
