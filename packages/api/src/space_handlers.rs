// ABOUTME: HTTP request handlers for space CRUD operations
// ABOUTME: Space deletion cascades through the manager so containers die exactly once

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use mentis_runtime::{Sandbox, Space};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::info;

#[derive(Debug, Deserialize)]
pub struct CreateSpaceRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateSpaceRequest {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

/// A space together with the sandboxes it currently contains.
#[derive(Debug, Serialize)]
pub struct SpaceDetail {
    #[serde(flatten)]
    pub space: Space,
    pub sandboxes: HashMap<String, Sandbox>,
}

pub async fn create_space(
    State(state): State<AppState>,
    Json(req): Json<CreateSpaceRequest>,
) -> ApiResult<(StatusCode, Json<Space>)> {
    if req.name.is_empty() {
        return Err(ApiError::BadRequest("name is required".to_string()));
    }
    let space = state
        .spaces
        .create(&req.name, req.description, req.metadata)
        .await?;
    Ok((StatusCode::CREATED, Json(space)))
}

pub async fn list_spaces(State(state): State<AppState>) -> Json<Vec<Space>> {
    Json(state.spaces.list().await)
}

pub async fn get_space(
    State(state): State<AppState>,
    Path(space_id): Path<String>,
) -> ApiResult<Json<SpaceDetail>> {
    let space = state.spaces.get(&space_id).await?;

    let mut sandboxes = HashMap::new();
    for sandbox_id in state.spaces.sandbox_ids(&space_id).await? {
        if let Ok(sandbox) = state.manager.get_sandbox(&sandbox_id).await {
            sandboxes.insert(sandbox_id, sandbox);
        }
    }
    Ok(Json(SpaceDetail { space, sandboxes }))
}

pub async fn update_space(
    State(state): State<AppState>,
    Path(space_id): Path<String>,
    Json(req): Json<UpdateSpaceRequest>,
) -> ApiResult<Json<Space>> {
    let space = state
        .spaces
        .update(&space_id, req.description, req.metadata)
        .await?;
    Ok(Json(space))
}

pub async fn delete_space(
    State(state): State<AppState>,
    Path(space_id): Path<String>,
) -> ApiResult<StatusCode> {
    info!(%space_id, "Deleting space");
    state.manager.delete_space(&space_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
