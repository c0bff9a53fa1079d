// ABOUTME: HTTP and WebSocket surface of the runtime
// ABOUTME: Assembles the /v1 router over the shared application state

pub mod action_handlers;
pub mod error;
pub mod sandbox_handlers;
pub mod space_handlers;
pub mod state;
pub mod stream;

pub use error::{ApiError, ApiResult};
pub use state::AppState;

use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use serde_json::json;

async fn health() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

/// Build the full application router.
pub fn create_router(state: AppState) -> Router {
    let v1 = Router::new()
        .route("/health", get(health))
        // Spaces
        .route(
            "/spaces",
            post(space_handlers::create_space).get(space_handlers::list_spaces),
        )
        .route("/spaces/{space_id}", get(space_handlers::get_space))
        .route("/spaces/{space_id}", put(space_handlers::update_space))
        .route("/spaces/{space_id}", delete(space_handlers::delete_space))
        // Sandboxes, space-scoped
        .route(
            "/spaces/{space_id}/sandboxes",
            post(sandbox_handlers::create_sandbox),
        )
        .route(
            "/spaces/{space_id}/sandboxes/{sandbox_id}",
            get(sandbox_handlers::get_sandbox).delete(sandbox_handlers::delete_sandbox),
        )
        // Actions
        .route(
            "/spaces/{space_id}/sandboxes/{sandbox_id}/tools:run_shell_command",
            post(action_handlers::run_shell_command),
        )
        .route(
            "/spaces/{space_id}/sandboxes/{sandbox_id}/tools:run_ipython_cell",
            post(action_handlers::run_ipython_cell),
        )
        // Executor push
        .route(
            "/internal/observations/{sandbox_id}",
            post(action_handlers::receive_observation),
        )
        // Observation stream; the path deliberately omits the space for
        // compatibility with existing clients.
        .route("/sandboxes/{sandbox_id}/stream", get(stream::stream_handler));

    Router::new().nest("/v1", v1).with_state(state)
}
