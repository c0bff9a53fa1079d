// ABOUTME: Docker operations for sandbox containers via bollard
// ABOUTME: Image ensure, container create/start/stop/remove, and agent endpoint discovery

use crate::error::{Result, RuntimeError};
use bollard::container::{
    Config, CreateContainerOptions, RemoveContainerOptions, StartContainerOptions,
    StopContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::image::CreateImageOptions;
use bollard::models::{ContainerInspectResponse, HostConfig, PortBinding};
use bollard::Docker;
use futures_util::stream::StreamExt;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, error, info};

/// Port the executor listens on inside every sandbox container.
pub const AGENT_PORT: &str = "8000/tcp";

/// Labels applied to every container this runtime manages.
const SCOPE_LABEL: &str = "mentis.scope";
const SANDBOX_LABEL: &str = "mentis.sandbox";
const SPACE_LABEL: &str = "mentis.space";

const PULL_TIMEOUT: Duration = Duration::from_secs(300);
const INSPECT_TIMEOUT: Duration = Duration::from_secs(10);
const CREATE_TIMEOUT: Duration = Duration::from_secs(30);
const START_TIMEOUT: Duration = Duration::from_secs(15);
const REMOVE_TIMEOUT: Duration = Duration::from_secs(15);

/// Specification for a new sandbox container.
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub scope: String,
    pub sandbox_id: String,
    pub space_id: String,
    pub env: Vec<String>,
    pub command: Option<Vec<String>>,
}

/// Thin wrapper over the Docker client with the timeout budget baked in.
pub struct ContainerClient {
    docker: Docker,
}

impl ContainerClient {
    /// Connect to the Docker daemon using platform defaults. Connection is
    /// lazy; call [`ContainerClient::ping`] to verify reachability.
    pub fn new() -> Result<Self> {
        #[cfg(unix)]
        let docker = Docker::connect_with_socket_defaults()?;

        #[cfg(windows)]
        let docker = Docker::connect_with_named_pipe_defaults()?;

        Ok(Self { docker })
    }

    pub async fn ping(&self) -> Result<()> {
        self.docker.ping().await.map_err(|e| {
            error!("Failed to reach Docker daemon: {}", e);
            RuntimeError::Docker(e)
        })?;
        info!("Connected to Docker daemon");
        Ok(())
    }

    /// Make sure `image` is present locally: inspect, pull on miss (fully
    /// draining the pull stream), and re-inspect to confirm.
    pub async fn ensure_image(&self, image: &str) -> Result<()> {
        if self.image_exists(image).await? {
            debug!(image, "Image exists locally, skipping pull");
            return Ok(());
        }

        info!(image, "Image not found locally, pulling");
        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };
        let pull = async {
            let mut stream = self.docker.create_image(Some(options), None, None);
            while let Some(item) = stream.next().await {
                let progress = item
                    .map_err(|e| RuntimeError::ImageUnavailable(format!("{image}: {e}")))?;
                if let Some(err) = progress.error {
                    return Err(RuntimeError::ImageUnavailable(format!("{image}: {err}")));
                }
                if let Some(status) = progress.status {
                    debug!(image, %status, "Pull progress");
                }
            }
            Ok(())
        };
        tokio::time::timeout(PULL_TIMEOUT, pull)
            .await
            .map_err(|_| RuntimeError::ImageUnavailable(format!("{image}: pull timed out")))??;

        // The pull stream can end without the image landing (e.g. a partial
        // manifest); trust only a successful re-inspect.
        if !self.image_exists(image).await? {
            return Err(RuntimeError::ImageUnavailable(format!(
                "{image}: not present after pull"
            )));
        }
        info!(image, "Image pull completed");
        Ok(())
    }

    async fn image_exists(&self, image: &str) -> Result<bool> {
        let inspect = tokio::time::timeout(INSPECT_TIMEOUT, self.docker.inspect_image(image))
            .await
            .map_err(|_| RuntimeError::ImageUnavailable(format!("{image}: inspect timed out")))?;
        match inspect {
            Ok(_) => Ok(true),
            Err(BollardError::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(RuntimeError::Docker(e)),
        }
    }

    /// Create a sandbox container: scope labels, executor env, the agent
    /// port exposed with a dynamic host binding, bridge networking.
    pub async fn create(&self, spec: &ContainerSpec) -> Result<String> {
        let mut labels = HashMap::new();
        labels.insert(SCOPE_LABEL.to_string(), spec.scope.clone());
        labels.insert(SANDBOX_LABEL.to_string(), spec.sandbox_id.clone());
        labels.insert(SPACE_LABEL.to_string(), spec.space_id.clone());

        let mut exposed_ports = HashMap::new();
        exposed_ports.insert(AGENT_PORT.to_string(), HashMap::new());

        let mut port_bindings = HashMap::new();
        // No host port requested: Docker assigns a free one.
        port_bindings.insert(
            AGENT_PORT.to_string(),
            Some(vec![PortBinding {
                host_ip: Some("0.0.0.0".to_string()),
                host_port: None,
            }]),
        );

        let host_config = HostConfig {
            network_mode: Some("bridge".to_string()),
            port_bindings: Some(port_bindings),
            ..Default::default()
        };

        let config = Config {
            image: Some(spec.image.clone()),
            cmd: spec.command.clone(),
            env: Some(spec.env.clone()),
            labels: Some(labels),
            exposed_ports: Some(exposed_ports),
            host_config: Some(host_config),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };

        let response =
            tokio::time::timeout(CREATE_TIMEOUT, self.docker.create_container(Some(options), config))
                .await
                .map_err(|_| {
                    RuntimeError::ContainerStartFailed("container create timed out".to_string())
                })?
                .map_err(|e| {
                    error!(name = %spec.name, "Failed to create container: {}", e);
                    RuntimeError::ContainerStartFailed(e.to_string())
                })?;

        info!(container_id = %response.id, name = %spec.name, "Container created");
        Ok(response.id)
    }

    pub async fn start(&self, container_id: &str) -> Result<()> {
        tokio::time::timeout(
            START_TIMEOUT,
            self.docker
                .start_container(container_id, None::<StartContainerOptions<String>>),
        )
        .await
        .map_err(|_| RuntimeError::ContainerStartFailed("container start timed out".to_string()))?
        .map_err(|e| {
            error!(container_id, "Failed to start container: {}", e);
            RuntimeError::ContainerStartFailed(e.to_string())
        })?;
        info!(container_id, "Container started");
        Ok(())
    }

    pub async fn inspect(&self, container_id: &str) -> Result<ContainerInspectResponse> {
        let inspect =
            tokio::time::timeout(INSPECT_TIMEOUT, self.docker.inspect_container(container_id, None))
                .await
                .map_err(|_| {
                    RuntimeError::ContainerStartFailed("container inspect timed out".to_string())
                })?;
        Ok(inspect?)
    }

    /// Graceful stop. Already-stopped containers are not an error.
    pub async fn stop(&self, container_id: &str, grace: Duration) -> Result<()> {
        let options = StopContainerOptions {
            t: grace.as_secs() as i64,
        };
        let stop = tokio::time::timeout(
            grace + Duration::from_secs(2),
            self.docker.stop_container(container_id, Some(options)),
        )
        .await;
        match stop {
            Ok(Ok(())) => {
                info!(container_id, "Container stopped");
                Ok(())
            }
            Ok(Err(BollardError::DockerResponseServerError {
                status_code: 304, ..
            })) => {
                debug!(container_id, "Container already stopped");
                Ok(())
            }
            Ok(Err(BollardError::DockerResponseServerError {
                status_code: 404, ..
            })) => {
                debug!(container_id, "Container already removed");
                Ok(())
            }
            Ok(Err(e)) => Err(RuntimeError::Docker(e)),
            Err(_) => Err(RuntimeError::ContainerStartFailed(
                "container stop timed out".to_string(),
            )),
        }
    }

    /// Force-remove including anonymous volumes. Already-removed containers
    /// are not an error.
    pub async fn remove(&self, container_id: &str) -> Result<()> {
        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };
        let remove = tokio::time::timeout(
            REMOVE_TIMEOUT,
            self.docker.remove_container(container_id, Some(options)),
        )
        .await;
        match remove {
            Ok(Ok(())) => {
                info!(container_id, "Container removed");
                Ok(())
            }
            Ok(Err(BollardError::DockerResponseServerError {
                status_code: 404, ..
            })) => {
                debug!(container_id, "Container already removed");
                Ok(())
            }
            Ok(Err(e)) => Err(RuntimeError::Docker(e)),
            Err(_) => Err(RuntimeError::ContainerStartFailed(
                "container remove timed out".to_string(),
            )),
        }
    }
}

/// Derive the executor's base URL from a container inspection.
///
/// The host-side dynamic binding of [`AGENT_PORT`] is preferred: the
/// runtime may not share a network namespace with the container. The
/// container IP (non-bridge networks first) covers in-namespace setups
/// where no mapping is published.
pub fn agent_endpoint(inspect: &ContainerInspectResponse) -> Option<String> {
    let settings = inspect.network_settings.as_ref()?;

    if let Some(ports) = &settings.ports {
        if let Some(Some(bindings)) = ports.get(AGENT_PORT) {
            if let Some(binding) = bindings.iter().find(|b| {
                b.host_port.as_deref().is_some_and(|p| !p.is_empty())
            }) {
                let host = match binding.host_ip.as_deref() {
                    Some("") | Some("0.0.0.0") | Some("::") | None => "127.0.0.1",
                    Some(ip) => ip,
                };
                let port = binding.host_port.as_deref().unwrap_or_default();
                return Some(format!("http://{host}:{port}"));
            }
        }
    }

    let networks = settings.networks.as_ref()?;
    let ip = networks
        .iter()
        .filter(|(name, _)| name.as_str() != "bridge")
        .find_map(|(_, n)| n.ip_address.as_deref().filter(|ip| !ip.is_empty()))
        .or_else(|| {
            networks
                .get("bridge")
                .and_then(|n| n.ip_address.as_deref())
                .filter(|ip| !ip.is_empty())
        })
        .or_else(|| {
            networks
                .values()
                .find_map(|n| n.ip_address.as_deref().filter(|ip| !ip.is_empty()))
        })?;

    let port = AGENT_PORT.split('/').next().unwrap_or("8000");
    Some(format!("http://{ip}:{port}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bollard::models::{EndpointSettings, NetworkSettings};

    fn inspect_with(
        ports: Option<HashMap<String, Option<Vec<PortBinding>>>>,
        networks: Option<HashMap<String, EndpointSettings>>,
    ) -> ContainerInspectResponse {
        ContainerInspectResponse {
            network_settings: Some(NetworkSettings {
                ports,
                networks,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn endpoint(ip: &str) -> EndpointSettings {
        EndpointSettings {
            ip_address: Some(ip.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn prefers_host_port_binding() {
        let mut ports = HashMap::new();
        ports.insert(
            AGENT_PORT.to_string(),
            Some(vec![PortBinding {
                host_ip: Some("0.0.0.0".to_string()),
                host_port: Some("49153".to_string()),
            }]),
        );
        let mut networks = HashMap::new();
        networks.insert("bridge".to_string(), endpoint("172.17.0.2"));

        let inspect = inspect_with(Some(ports), Some(networks));
        assert_eq!(
            agent_endpoint(&inspect).as_deref(),
            Some("http://127.0.0.1:49153")
        );
    }

    #[test]
    fn falls_back_to_bridge_ip_without_mapping() {
        let mut networks = HashMap::new();
        networks.insert("bridge".to_string(), endpoint("172.17.0.2"));
        let inspect = inspect_with(None, Some(networks));
        assert_eq!(
            agent_endpoint(&inspect).as_deref(),
            Some("http://172.17.0.2:8000")
        );
    }

    #[test]
    fn prefers_non_bridge_network_ip() {
        let mut networks = HashMap::new();
        networks.insert("bridge".to_string(), endpoint("172.17.0.2"));
        networks.insert("sandbox-net".to_string(), endpoint("10.5.0.2"));
        let inspect = inspect_with(None, Some(networks));
        assert_eq!(
            agent_endpoint(&inspect).as_deref(),
            Some("http://10.5.0.2:8000")
        );
    }

    #[test]
    fn no_endpoint_when_nothing_discovered() {
        let inspect = inspect_with(None, Some(HashMap::new()));
        assert_eq!(agent_endpoint(&inspect), None);
        assert_eq!(agent_endpoint(&ContainerInspectResponse::default()), None);
    }

    #[test]
    fn specific_host_ip_is_kept() {
        let mut ports = HashMap::new();
        ports.insert(
            AGENT_PORT.to_string(),
            Some(vec![PortBinding {
                host_ip: Some("192.168.1.50".to_string()),
                host_port: Some("32768".to_string()),
            }]),
        );
        let inspect = inspect_with(Some(ports), None);
        assert_eq!(
            agent_endpoint(&inspect).as_deref(),
            Some("http://192.168.1.50:32768")
        );
    }
}
