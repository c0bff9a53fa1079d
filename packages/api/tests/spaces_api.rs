// ABOUTME: Integration tests for the spaces API surface
// ABOUTME: Exercises the router in-process; no Docker daemon is needed for these paths

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use mentis_api::{create_router, AppState};
use mentis_runtime::{ContainerClient, Hub, RuntimeConfig, SandboxManager, SpaceRegistry};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

fn test_app() -> Router {
    let hub = Hub::new();
    let spaces = Arc::new(SpaceRegistry::new());
    let container = ContainerClient::new().expect("docker client handle");
    let manager = Arc::new(
        SandboxManager::new(container, spaces.clone(), hub.clone(), RuntimeConfig::default())
            .expect("manager"),
    );
    create_router(AppState::new(manager, spaces, hub))
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = match body {
        Some(value) => Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(value.to_string()))
            .unwrap(),
        None => Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

#[tokio::test]
async fn health_reports_ok() {
    let app = test_app();
    let (status, body) = send(&app, Method::GET, "/v1/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn default_space_is_listed() {
    let app = test_app();
    let (status, body) = send(&app, Method::GET, "/v1/spaces", None).await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|s| s["name"].as_str())
        .collect();
    assert!(names.contains(&"default"));
}

#[tokio::test]
async fn space_crud_roundtrip() {
    let app = test_app();

    let (status, created) = send(
        &app,
        Method::POST,
        "/v1/spaces",
        Some(json!({"name": "team-a", "description": "first"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let space_id = created["id"].as_str().unwrap().to_string();
    assert_eq!(created["name"], "team-a");

    let (status, fetched) = send(&app, Method::GET, &format!("/v1/spaces/{space_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["name"], "team-a");
    // A fresh space has no sandboxes.
    assert!(fetched["sandboxes"].as_object().unwrap().is_empty());

    let (status, updated) = send(
        &app,
        Method::PUT,
        &format!("/v1/spaces/{space_id}"),
        Some(json!({"description": "second", "metadata": {"k": "v"}})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["description"], "second");
    assert_eq!(updated["metadata"]["k"], "v");

    let (status, _) = send(&app, Method::DELETE, &format!("/v1/spaces/{space_id}"), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send(&app, Method::GET, &format!("/v1/spaces/{space_id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn duplicate_space_name_conflicts() {
    let app = test_app();
    let (status, _) = send(&app, Method::POST, "/v1/spaces", Some(json!({"name": "dup"}))).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send(&app, Method::POST, "/v1/spaces", Some(json!({"name": "dup"}))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["message"].as_str().unwrap().contains("dup"));
}

#[tokio::test]
async fn invalid_space_name_is_unprocessable() {
    let app = test_app();
    for name in ["Bad-Name", "-leading", "trailing-", "under_score"] {
        let (status, _) = send(&app, Method::POST, "/v1/spaces", Some(json!({"name": name}))).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "name: {name}");
    }
}

#[tokio::test]
async fn missing_space_name_is_bad_request() {
    let app = test_app();
    let (status, _) = send(&app, Method::POST, "/v1/spaces", Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_space_is_not_found() {
    let app = test_app();
    for (method, uri) in [
        (Method::GET, "/v1/spaces/ghost"),
        (Method::DELETE, "/v1/spaces/ghost"),
    ] {
        let (status, _) = send(&app, method, uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{uri}");
    }
    let (status, _) = send(
        &app,
        Method::PUT,
        "/v1/spaces/ghost",
        Some(json!({"description": "x"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
