// ABOUTME: End-to-end sandbox lifecycle tests against a live Docker daemon
// ABOUTME: Ignored by default; needs Docker and the executor image pullable locally

use mentis_runtime::{
    ActionKind, ContainerClient, Hub, RuntimeConfig, RuntimeError, SandboxManager, SpaceRegistry,
    DEFAULT_SPACE_ID,
};
use serde_json::{Map, Value};
use std::sync::Arc;

fn live_manager() -> Arc<SandboxManager> {
    let container = ContainerClient::new().expect("docker client");
    let manager = SandboxManager::new(
        container,
        Arc::new(SpaceRegistry::new()),
        Hub::new(),
        RuntimeConfig::from_env().expect("config"),
    )
    .expect("manager");
    Arc::new(manager)
}

#[tokio::test]
#[ignore] // Requires Docker daemon and the executor image
async fn sandbox_create_get_delete_roundtrip() {
    let manager = live_manager();

    let sandbox_id = manager
        .create_sandbox(DEFAULT_SPACE_ID, None, None)
        .await
        .expect("sandbox creation");

    let sandbox = manager.get_sandbox(&sandbox_id).await.expect("lookup");
    assert_eq!(sandbox.space_id, DEFAULT_SPACE_ID);
    assert!(sandbox.is_running);
    assert!(sandbox.agent_url.starts_with("http://"));

    manager.delete_sandbox(&sandbox_id).await.expect("deletion");

    // Deletion is idempotent at the API level: the record is gone.
    assert!(matches!(
        manager.delete_sandbox(&sandbox_id).await,
        Err(RuntimeError::SandboxNotFound)
    ));
}

#[tokio::test]
#[ignore] // Requires Docker daemon and the executor image
async fn shell_action_reaches_a_live_executor() {
    let manager = live_manager();

    let sandbox_id = manager
        .create_sandbox(DEFAULT_SPACE_ID, None, None)
        .await
        .expect("sandbox creation");

    let mut payload = Map::new();
    payload.insert(
        "command".to_string(),
        Value::String("echo lifecycle".to_string()),
    );
    let action_id = manager
        .initiate_action(DEFAULT_SPACE_ID, &sandbox_id, ActionKind::Shell, payload)
        .await
        .expect("action accepted");
    assert!(!action_id.is_empty());

    manager.delete_sandbox(&sandbox_id).await.expect("deletion");
}
