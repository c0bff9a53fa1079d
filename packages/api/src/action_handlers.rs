// ABOUTME: HTTP request handlers for action initiation and executor observation ingestion
// ABOUTME: Action endpoints answer 202 with an action_id; everything later is observations

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use mentis_runtime::ActionKind;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

#[derive(Debug, Serialize)]
pub struct InitiateActionResponse {
    pub action_id: String,
}

/// The executor request body is an open map: the runtime only checks the
/// field the action type requires and forwards the rest untouched.
fn require_string_field(payload: &Map<String, Value>, field: &str) -> Result<(), ApiError> {
    match payload.get(field) {
        Some(Value::String(s)) if !s.is_empty() => Ok(()),
        Some(Value::String(_)) => Err(ApiError::BadRequest(format!("'{field}' must not be empty"))),
        Some(_) => Err(ApiError::BadRequest(format!("'{field}' must be a string"))),
        None => Err(ApiError::BadRequest(format!(
            "missing '{field}' in request body"
        ))),
    }
}

pub async fn run_shell_command(
    State(state): State<AppState>,
    Path((space_id, sandbox_id)): Path<(String, String)>,
    Json(payload): Json<Map<String, Value>>,
) -> ApiResult<(StatusCode, Json<InitiateActionResponse>)> {
    require_string_field(&payload, "command")?;
    let action_id = state
        .manager
        .initiate_action(&space_id, &sandbox_id, ActionKind::Shell, payload)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(InitiateActionResponse { action_id })))
}

pub async fn run_ipython_cell(
    State(state): State<AppState>,
    Path((space_id, sandbox_id)): Path<(String, String)>,
    Json(payload): Json<Map<String, Value>>,
) -> ApiResult<(StatusCode, Json<InitiateActionResponse>)> {
    require_string_field(&payload, "code")?;
    let action_id = state
        .manager
        .initiate_action(&space_id, &sandbox_id, ActionKind::Ipython, payload)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(InitiateActionResponse { action_id })))
}

/// Executor → runtime push. Ingestion is best-effort by design: unknown
/// sandboxes and unparseable payloads are swallowed so the executor never
/// sees its push fail for reasons it cannot fix.
pub async fn receive_observation(
    State(state): State<AppState>,
    Path(sandbox_id): Path<String>,
    body: Bytes,
) -> StatusCode {
    debug!(%sandbox_id, bytes = body.len(), "Observation received");
    state.manager.receive_observation(&sandbox_id, &body).await;
    StatusCode::OK
}
