use std::env;
use std::num::ParseIntError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid port number: {0}")]
    InvalidPort(#[from] ParseIntError),
}

/// Executor configuration, read from the container environment.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Bind address. `MENTIS_EXECUTOR_HOST`, default `0.0.0.0`.
    pub host: String,
    /// Bind port. `MENTIS_EXECUTOR_PORT`, default `8000` (the port the
    /// runtime exposes on the container).
    pub port: u16,
    /// Identity injected by the runtime. `SANDBOX_ID`.
    pub sandbox_id: String,
    /// Where observations are pushed. `RUNTIME_OBSERVATION_URL`; push is
    /// disabled (with a log) when unset.
    pub observation_url: Option<String>,
    /// Default working directory for actions. `MENTIS_EXECUTOR_WORK_DIR`,
    /// default `/work` (the sandbox's persistent path).
    pub work_dir: PathBuf,
    /// Python interpreter hosting the kernel. `MENTIS_EXECUTOR_PYTHON`.
    pub python_bin: String,
}

impl ExecutorConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let port = env::var("MENTIS_EXECUTOR_PORT")
            .unwrap_or_else(|_| "8000".to_string())
            .parse::<u16>()?;

        Ok(ExecutorConfig {
            host: env::var("MENTIS_EXECUTOR_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port,
            sandbox_id: env::var("SANDBOX_ID").unwrap_or_default(),
            observation_url: env::var("RUNTIME_OBSERVATION_URL").ok().filter(|u| !u.is_empty()),
            work_dir: env::var("MENTIS_EXECUTOR_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("/work")),
            python_bin: env::var("MENTIS_EXECUTOR_PYTHON")
                .unwrap_or_else(|_| "python3".to_string()),
        })
    }
}
