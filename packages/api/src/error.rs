// ABOUTME: API error type mapping runtime failures to HTTP responses
// ABOUTME: Serializes every failure as a JSON body with a message field

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use mentis_runtime::RuntimeError;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Unprocessable(String),

    #[error("{0}")]
    Internal(String),
}

/// Error body shape returned by every failing endpoint.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub message: String,
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = self.to_string();
        match &self {
            ApiError::Internal(msg) => error!(%status, "API error: {msg}"),
            _ => debug!(%status, "Client error: {message}"),
        }
        (status, Json(ErrorResponse { message })).into_response()
    }
}

impl From<RuntimeError> for ApiError {
    fn from(err: RuntimeError) -> Self {
        match err {
            RuntimeError::SpaceNotFound | RuntimeError::SandboxNotFound => {
                ApiError::NotFound(err.to_string())
            }
            RuntimeError::SandboxNotRunning => ApiError::Conflict(err.to_string()),
            RuntimeError::SpaceNameConflict(_) => ApiError::Conflict(err.to_string()),
            RuntimeError::InvalidSpaceName(_) => ApiError::Unprocessable(err.to_string()),
            RuntimeError::ImageUnavailable(_)
            | RuntimeError::ContainerStartFailed(_)
            | RuntimeError::ExecutorUnhealthy(_)
            | RuntimeError::Docker(_)
            | RuntimeError::Http(_)
            | RuntimeError::Json(_) => ApiError::Internal(err.to_string()),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_errors_map_to_expected_statuses() {
        let cases = [
            (RuntimeError::SpaceNotFound, StatusCode::NOT_FOUND),
            (RuntimeError::SandboxNotFound, StatusCode::NOT_FOUND),
            (RuntimeError::SandboxNotRunning, StatusCode::CONFLICT),
            (
                RuntimeError::SpaceNameConflict("x".into()),
                StatusCode::CONFLICT,
            ),
            (
                RuntimeError::InvalidSpaceName("X!".into()),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                RuntimeError::ImageUnavailable("img".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status_code(), status);
        }
    }
}
