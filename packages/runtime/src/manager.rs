// ABOUTME: Sandbox lifecycle manager orchestrating containers, action dispatch, and observations
// ABOUTME: Owns the sandbox index; spaces hold id references only, the hub carries the fan-out

use crate::config::RuntimeConfig;
use crate::container::{agent_endpoint, ContainerClient, ContainerSpec};
use crate::error::{Result, RuntimeError};
use crate::hub::Hub;
use crate::space::SpaceRegistry;
use mentis_protocol::{Observation, ObservationType, INTERNAL_ERROR_EXIT_CODE};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const HEALTH_PROBE_TIMEOUT: Duration = Duration::from_secs(2);
const HEALTH_BUDGET: Duration = Duration::from_secs(30);
const HEALTH_TICK: Duration = Duration::from_millis(500);
const DISCOVERY_ATTEMPTS: u32 = 5;
const DISCOVERY_INTERVAL: Duration = Duration::from_secs(1);
const STOP_GRACE: Duration = Duration::from_secs(5);

/// A sandbox as tracked by the manager. Lookups return value copies so no
/// caller can mutate the index outside its lock.
#[derive(Debug, Clone, Serialize)]
pub struct Sandbox {
    pub sandbox_id: String,
    pub container_id: String,
    pub agent_url: String,
    pub is_running: bool,
    pub space_id: String,
}

/// The two action types an executor accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Shell,
    Ipython,
}

impl ActionKind {
    fn endpoint(&self) -> &'static str {
        match self {
            ActionKind::Shell => "tools:run_shell_command",
            ActionKind::Ipython => "tools:run_ipython_cell",
        }
    }
}

/// Sandbox lifecycle manager.
pub struct SandboxManager {
    sandboxes: RwLock<HashMap<String, Sandbox>>,
    container: ContainerClient,
    spaces: Arc<SpaceRegistry>,
    hub: Arc<Hub>,
    /// Client for action handshakes with the executor.
    http: reqwest::Client,
    /// Short-timeout client for readiness probes.
    probe: reqwest::Client,
    config: RuntimeConfig,
}

impl SandboxManager {
    pub fn new(
        container: ContainerClient,
        spaces: Arc<SpaceRegistry>,
        hub: Arc<Hub>,
        config: RuntimeConfig,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(HANDSHAKE_TIMEOUT)
            .build()?;
        let probe = reqwest::Client::builder()
            .timeout(HEALTH_PROBE_TIMEOUT)
            .build()?;
        Ok(Self {
            sandboxes: RwLock::new(HashMap::new()),
            container,
            spaces,
            hub,
            http,
            probe,
            config,
        })
    }

    /// Cheap existence check used by the WebSocket upgrade path.
    pub async fn sandbox_exists(&self, sandbox_id: &str) -> bool {
        self.sandboxes.read().await.contains_key(sandbox_id)
    }

    pub async fn get_sandbox(&self, sandbox_id: &str) -> Result<Sandbox> {
        self.sandboxes
            .read()
            .await
            .get(sandbox_id)
            .cloned()
            .ok_or(RuntimeError::SandboxNotFound)
    }

    /// Lookup that enforces space membership. Addressing a sandbox through
    /// a space it does not belong to reports plain not-found; the real
    /// space is never revealed.
    pub async fn get_sandbox_in_space(&self, space_id: &str, sandbox_id: &str) -> Result<Sandbox> {
        let sandbox = self.get_sandbox(sandbox_id).await?;
        if sandbox.space_id != space_id {
            warn!(
                requested_space = space_id,
                sandbox_id, "Sandbox addressed through wrong space"
            );
            return Err(RuntimeError::SandboxNotFound);
        }
        Ok(sandbox)
    }

    /// Create and start a sandbox container, wait for its executor to
    /// become healthy, and register it. Returns only once the first
    /// `InitiateAction` is guaranteed to reach a live executor.
    pub async fn create_sandbox(
        &self,
        space_id: &str,
        image: Option<String>,
        command: Option<Vec<String>>,
    ) -> Result<String> {
        if !self.spaces.contains(space_id).await {
            return Err(RuntimeError::SpaceNotFound);
        }

        let sandbox_id = Uuid::new_v4().to_string();
        let image = image
            .filter(|i| !i.is_empty())
            .unwrap_or_else(|| self.config.default_image.clone());
        info!(%sandbox_id, space_id, %image, "Creating sandbox");

        self.container.ensure_image(&image).await?;

        let spec = ContainerSpec {
            name: format!("mentis-{}-{}", self.config.scope, sandbox_id),
            image,
            scope: self.config.scope.clone(),
            sandbox_id: sandbox_id.clone(),
            space_id: space_id.to_string(),
            env: vec![
                format!("SANDBOX_ID={sandbox_id}"),
                format!(
                    "RUNTIME_OBSERVATION_URL={}",
                    self.config.observation_url(&sandbox_id)
                ),
            ],
            command,
        };
        let container_id = self.container.create(&spec).await?;

        if let Err(e) = self.container.start(&container_id).await {
            self.scrap_container(&container_id).await;
            return Err(e);
        }

        let agent_url = match self.discover_agent_url(&container_id).await {
            Some(url) => url,
            None => {
                error!(%sandbox_id, %container_id, "No reachable executor endpoint found");
                self.scrap_container(&container_id).await;
                return Err(RuntimeError::ContainerStartFailed(
                    "no executor endpoint discovered".to_string(),
                ));
            }
        };

        if let Err(e) = self.await_executor_health(&agent_url).await {
            self.scrap_container(&container_id).await;
            return Err(e);
        }

        let sandbox = Sandbox {
            sandbox_id: sandbox_id.clone(),
            container_id: container_id.clone(),
            agent_url: agent_url.clone(),
            is_running: true,
            space_id: space_id.to_string(),
        };
        self.sandboxes
            .write()
            .await
            .insert(sandbox_id.clone(), sandbox);

        if let Err(e) = self.spaces.add_sandbox(space_id, &sandbox_id).await {
            // The space vanished while the container came up; undo.
            self.sandboxes.write().await.remove(&sandbox_id);
            self.scrap_container(&container_id).await;
            return Err(e);
        }

        info!(%sandbox_id, %container_id, %agent_url, space_id, "Sandbox ready");
        Ok(sandbox_id)
    }

    /// Stop and remove the sandbox's container and drop it from the index.
    /// The index and space entries are cleaned even when Docker errors;
    /// the first real removal error is returned.
    pub async fn delete_sandbox(&self, sandbox_id: &str) -> Result<()> {
        let (container_id, space_id) = {
            let sandboxes = self.sandboxes.read().await;
            let sandbox = sandboxes
                .get(sandbox_id)
                .ok_or(RuntimeError::SandboxNotFound)?;
            (sandbox.container_id.clone(), sandbox.space_id.clone())
        };
        info!(sandbox_id, %container_id, "Deleting sandbox");

        if let Err(e) = self.container.stop(&container_id, STOP_GRACE).await {
            error!(
                sandbox_id,
                %container_id, "Failed to stop container, proceeding with removal: {}", e
            );
        }
        let removal = self.container.remove(&container_id).await;

        self.sandboxes.write().await.remove(sandbox_id);
        self.spaces.remove_sandbox(&space_id, sandbox_id).await;

        removal
    }

    /// Delete every sandbox in a space, then the space entry itself.
    /// Sandboxes that disappeared mid-iteration are skipped; the first real
    /// error is reported after the sweep completes.
    pub async fn delete_space(&self, space_id: &str) -> Result<()> {
        let sandbox_ids = self.spaces.sandbox_ids(space_id).await?;

        let mut first_err: Option<RuntimeError> = None;
        for sandbox_id in sandbox_ids {
            match self.delete_sandbox(&sandbox_id).await {
                Ok(()) | Err(RuntimeError::SandboxNotFound) => {}
                Err(e) => {
                    error!(space_id, %sandbox_id, "Failed to delete sandbox during space deletion: {}", e);
                    first_err.get_or_insert(e);
                }
            }
        }

        if let Err(e) = self.spaces.delete(space_id).await {
            first_err.get_or_insert(e);
        }

        match first_err {
            Some(e) => Err(e),
            None => {
                info!(space_id, "Space and its sandboxes deleted");
                Ok(())
            }
        }
    }

    /// Shutdown sweep used by delete-on-shutdown.
    pub async fn delete_all_sandboxes(&self) {
        let ids: Vec<String> = self.sandboxes.read().await.keys().cloned().collect();
        if ids.is_empty() {
            return;
        }
        info!(count = ids.len(), "Deleting all sandboxes");
        for sandbox_id in ids {
            match self.delete_sandbox(&sandbox_id).await {
                Ok(()) | Err(RuntimeError::SandboxNotFound) => {}
                Err(e) => error!(%sandbox_id, "Failed to delete sandbox during sweep: {}", e),
            }
        }
    }

    /// Start an action asynchronously. The returned `action_id` is the only
    /// handle the caller gets; everything that follows arrives as
    /// observations on the sandbox's stream.
    pub async fn initiate_action(
        &self,
        space_id: &str,
        sandbox_id: &str,
        kind: ActionKind,
        payload: Map<String, Value>,
    ) -> Result<String> {
        let sandbox = self.get_sandbox_in_space(space_id, sandbox_id).await?;
        if !sandbox.is_running {
            return Err(RuntimeError::SandboxNotRunning);
        }

        let action_id = Uuid::new_v4().to_string();
        let mut body = payload;
        body.insert("action_id".to_string(), Value::String(action_id.clone()));
        let url = format!("{}/{}", sandbox.agent_url, kind.endpoint());

        let hub = self.hub.clone();
        let http = self.http.clone();
        let sandbox_id = sandbox_id.to_string();
        let task_action_id = action_id.clone();
        tokio::spawn(async move {
            dispatch_action(hub, http, sandbox_id, task_action_id, url, body).await;
        });

        info!(%action_id, ?kind, "Action initiated");
        Ok(action_id)
    }

    /// Ingest a raw observation pushed by an executor. The bytes are
    /// rebroadcast untouched; a terminal `result` or `error` additionally
    /// triggers the synthesized `end` clients rely on. Failures here are
    /// never surfaced back to the executor.
    pub async fn receive_observation(&self, sandbox_id: &str, raw: &[u8]) {
        if !self.sandbox_exists(sandbox_id).await {
            warn!(sandbox_id, "Observation for unknown sandbox dropped");
            return;
        }

        let text = String::from_utf8_lossy(raw).into_owned();
        self.hub.broadcast(sandbox_id, text.clone());

        let obs: Observation = match serde_json::from_str(&text) {
            Ok(obs) => obs,
            Err(e) => {
                warn!(sandbox_id, "Unparseable observation (raw bytes were broadcast): {}", e);
                return;
            }
        };
        if obs.action_id.is_empty() {
            warn!(sandbox_id, "Observation without action_id, no end synthesis possible");
            return;
        }

        match obs.observation_type {
            ObservationType::Result => {
                let exit_code = obs.exit_code.unwrap_or(0);
                debug!(sandbox_id, action_id = %obs.action_id, exit_code, "Result received, synthesizing end");
                publish(
                    &self.hub,
                    sandbox_id,
                    &Observation::end(&obs.action_id, exit_code, obs.error),
                );
            }
            // An error with an exit code is terminal: the executor will not
            // follow it with a result. Errors without one are mid-action
            // reports (e.g. a timeout notice) and a result is still coming.
            ObservationType::Error => {
                if let Some(exit_code) = obs.exit_code {
                    debug!(sandbox_id, action_id = %obs.action_id, "Terminal executor error, synthesizing end");
                    publish(
                        &self.hub,
                        sandbox_id,
                        &Observation::end(&obs.action_id, exit_code, obs.error),
                    );
                }
            }
            // start/stream and informational errors pass through; an
            // incoming end is broadcast raw but never re-triggers synthesis.
            _ => {}
        }
    }

    async fn discover_agent_url(&self, container_id: &str) -> Option<String> {
        for attempt in 0..DISCOVERY_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(DISCOVERY_INTERVAL).await;
            }
            match self.container.inspect(container_id).await {
                Ok(inspect) => {
                    if let Some(url) = agent_endpoint(&inspect) {
                        debug!(container_id, %url, attempt, "Executor endpoint discovered");
                        return Some(url);
                    }
                }
                Err(e) => debug!(container_id, attempt, "Inspect failed during discovery: {}", e),
            }
        }
        None
    }

    async fn await_executor_health(&self, agent_url: &str) -> Result<()> {
        let url = format!("{agent_url}/health");
        let deadline = tokio::time::Instant::now() + HEALTH_BUDGET;
        let mut tick = tokio::time::interval(HEALTH_TICK);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tick.tick().await;
            match self.probe.get(&url).send().await {
                Ok(resp) if resp.status().is_success() => {
                    debug!(%url, "Executor healthy");
                    return Ok(());
                }
                Ok(resp) => debug!(%url, status = %resp.status(), "Health probe rejected"),
                Err(e) => debug!(%url, "Health probe failed: {}", e),
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(RuntimeError::ExecutorUnhealthy(format!(
                    "no 2xx from {url} within {HEALTH_BUDGET:?}"
                )));
            }
        }
    }

    /// Best-effort teardown of a container that never became a sandbox.
    async fn scrap_container(&self, container_id: &str) {
        if let Err(e) = self.container.remove(container_id).await {
            error!(container_id, "Failed to remove container after create failure: {}", e);
        }
    }

    #[cfg(test)]
    pub(crate) async fn insert_for_tests(&self, sandbox: Sandbox) {
        self.sandboxes
            .write()
            .await
            .insert(sandbox.sandbox_id.clone(), sandbox);
    }
}

/// Runs detached from the caller of `initiate_action`: announces the
/// action, performs the executor handshake, and reports handshake failures
/// as observations so the client still sees a terminated action.
async fn dispatch_action(
    hub: Arc<Hub>,
    http: reqwest::Client,
    sandbox_id: String,
    action_id: String,
    url: String,
    body: Map<String, Value>,
) {
    publish(&hub, &sandbox_id, &Observation::start(&action_id));

    match http.post(&url).json(&body).send().await {
        Err(e) => {
            let msg = format!("failed to reach executor: {e}");
            error!(%sandbox_id, %action_id, "{msg}");
            publish(&hub, &sandbox_id, &Observation::error(&action_id, msg.clone()));
            publish(
                &hub,
                &sandbox_id,
                &Observation::end(&action_id, INTERNAL_ERROR_EXIT_CODE, Some(msg)),
            );
        }
        Ok(resp) if resp.status().is_client_error() || resp.status().is_server_error() => {
            let status = resp.status();
            let detail = resp.text().await.unwrap_or_default();
            let msg = if detail.is_empty() {
                format!("executor returned status {status}")
            } else {
                format!("executor returned status {status}: {detail}")
            };
            error!(%sandbox_id, %action_id, "{msg}");
            publish(&hub, &sandbox_id, &Observation::error(&action_id, msg.clone()));
            publish(
                &hub,
                &sandbox_id,
                &Observation::end(&action_id, INTERNAL_ERROR_EXIT_CODE, Some(msg)),
            );
        }
        Ok(resp) => {
            // Accepted: the executor now owns the action and pushes its
            // observations through the internal endpoint.
            debug!(%sandbox_id, %action_id, status = %resp.status(), "Action accepted by executor");
        }
    }
}

fn publish(hub: &Hub, sandbox_id: &str, obs: &Observation) {
    match obs.to_json() {
        Ok(json) => hub.broadcast(sandbox_id, json),
        Err(e) => error!(sandbox_id, "Failed to serialize observation: {}", e),
    }
}
