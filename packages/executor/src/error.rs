// ABOUTME: Error types for the in-container executor

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("kernel process exited unexpectedly")]
    KernelExited,

    #[error("kernel stdio pipes unavailable")]
    KernelPipes,
}

pub type Result<T> = std::result::Result<T, ExecutorError>;
