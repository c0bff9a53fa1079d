use std::env;
use std::num::ParseIntError;
use thiserror::Error;

/// Image used when neither the create request nor `BOX_IMAGE` names one.
pub const DEFAULT_BOX_IMAGE: &str = "mentisai/sandboxai-box:latest";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid port number: {0}")]
    InvalidPort(#[from] ParseIntError),
}

/// Runtime configuration, read once from the environment at startup.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Bind address. `SANDBOXAID_HOST`, default `127.0.0.1`.
    pub host: String,
    /// Bind port. `SANDBOXAID_PORT`, default `5266`; `0` selects a free port.
    pub port: u16,
    /// Label namespace isolating this runtime's containers. `SANDBOXAID_SCOPE`.
    pub scope: String,
    /// Delete all sandboxes on graceful shutdown. `SANDBOXAID_DELETE_ON_SHUTDOWN`.
    pub delete_on_shutdown: bool,
    /// Default executor image. `BOX_IMAGE`.
    pub default_image: String,
    /// Host name containers use to reach this runtime for observation push.
    /// `SANDBOXAID_OBSERVATION_HOST`, default `host.docker.internal`.
    pub observation_host: String,
}

impl RuntimeConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let port = env::var("SANDBOXAID_PORT")
            .unwrap_or_else(|_| "5266".to_string())
            .parse::<u16>()?;

        let host = env::var("SANDBOXAID_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());

        let scope = env::var("SANDBOXAID_SCOPE").unwrap_or_else(|_| "default".to_string());

        let delete_on_shutdown = env::var("SANDBOXAID_DELETE_ON_SHUTDOWN")
            .map(|v| v.trim().eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        let default_image =
            env::var("BOX_IMAGE").unwrap_or_else(|_| DEFAULT_BOX_IMAGE.to_string());

        let observation_host = env::var("SANDBOXAID_OBSERVATION_HOST")
            .unwrap_or_else(|_| "host.docker.internal".to_string());

        Ok(RuntimeConfig {
            host,
            port,
            scope,
            delete_on_shutdown,
            default_image,
            observation_host,
        })
    }

    /// URL the executor inside `sandbox_id`'s container pushes observations to.
    pub fn observation_url(&self, sandbox_id: &str) -> String {
        format!(
            "http://{}:{}/v1/internal/observations/{}",
            self.observation_host, self.port, sandbox_id
        )
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5266,
            scope: "default".to_string(),
            delete_on_shutdown: false,
            default_image: DEFAULT_BOX_IMAGE.to_string(),
            observation_host: "host.docker.internal".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn observation_url_includes_sandbox_id() {
        let config = RuntimeConfig::default();
        assert_eq!(
            config.observation_url("sb-1"),
            "http://host.docker.internal:5266/v1/internal/observations/sb-1"
        );
    }
}
