// ABOUTME: Error types for the sandbox runtime control plane
// ABOUTME: Covers space/sandbox lookup failures, Docker operations, and executor readiness

use thiserror::Error;

/// Main error type for runtime operations.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("space not found")]
    SpaceNotFound,

    #[error("space name already in use: {0}")]
    SpaceNameConflict(String),

    #[error("invalid space name: {0}")]
    InvalidSpaceName(String),

    #[error("sandbox not found")]
    SandboxNotFound,

    #[error("sandbox is not running")]
    SandboxNotRunning,

    /// Image could not be pulled or confirmed present locally.
    #[error("image unavailable: {0}")]
    ImageUnavailable(String),

    #[error("container failed to start: {0}")]
    ContainerStartFailed(String),

    /// The in-container executor never answered its health probe.
    #[error("executor unhealthy: {0}")]
    ExecutorUnhealthy(String),

    #[error("Docker error: {0}")]
    Docker(#[from] bollard::errors::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Type alias for Results that return RuntimeError.
pub type Result<T> = std::result::Result<T, RuntimeError>;
