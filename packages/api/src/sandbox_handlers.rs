// ABOUTME: HTTP request handlers for sandbox lifecycle operations
// ABOUTME: All lookups are space-scoped; cross-space addressing reports not-found

use crate::error::ApiResult;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use mentis_runtime::Sandbox;
use serde::Deserialize;
use tracing::info;

#[derive(Debug, Deserialize)]
pub struct CreateSandboxRequest {
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub command: Option<Vec<String>>,
}

pub async fn create_sandbox(
    State(state): State<AppState>,
    Path(space_id): Path<String>,
    Json(req): Json<CreateSandboxRequest>,
) -> ApiResult<(StatusCode, Json<Sandbox>)> {
    info!(%space_id, image = ?req.image, "Received sandbox create request");
    let sandbox_id = state
        .manager
        .create_sandbox(&space_id, req.image, req.command)
        .await?;
    let sandbox = state.manager.get_sandbox(&sandbox_id).await?;
    Ok((StatusCode::CREATED, Json(sandbox)))
}

pub async fn get_sandbox(
    State(state): State<AppState>,
    Path((space_id, sandbox_id)): Path<(String, String)>,
) -> ApiResult<Json<Sandbox>> {
    let sandbox = state
        .manager
        .get_sandbox_in_space(&space_id, &sandbox_id)
        .await?;
    Ok(Json(sandbox))
}

pub async fn delete_sandbox(
    State(state): State<AppState>,
    Path((space_id, sandbox_id)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    // Membership first: deleting through the wrong space must not work.
    state
        .manager
        .get_sandbox_in_space(&space_id, &sandbox_id)
        .await?;
    state.manager.delete_sandbox(&sandbox_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
