use axum::http::Method;
use mentis_api::{create_router, AppState};
use mentis_runtime::{ContainerClient, Hub, RuntimeConfig, SandboxManager, SpaceRegistry};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Grace period for draining connections and the shutdown sweep.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Written to stdout when port 0 was requested, so the parent process can
/// discover the address actually bound.
#[derive(Serialize)]
struct ServerInfo {
    host: String,
    port: u16,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = RuntimeConfig::from_env()?;

    let container = ContainerClient::new()?;
    container.ping().await?;

    let hub = Hub::new();
    let spaces = Arc::new(SpaceRegistry::new());
    let manager = Arc::new(SandboxManager::new(
        container,
        spaces.clone(),
        hub.clone(),
        config.clone(),
    )?);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(Any);

    let app = create_router(AppState::new(manager.clone(), spaces, hub)).layer(cors);

    let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port)).await?;
    let local_addr = listener.local_addr()?;
    if config.port == 0 {
        // Port was auto-selected; report it for the process that spawned us.
        let info = ServerInfo {
            host: local_addr.ip().to_string(),
            port: local_addr.port(),
        };
        println!("{}", serde_json::to_string(&info)?);
    }
    info!(address = %local_addr, scope = %config.scope, "Runtime listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("Stopped serving new connections");

    if config.delete_on_shutdown {
        info!("Delete-on-shutdown enabled, removing all sandboxes");
        if tokio::time::timeout(SHUTDOWN_GRACE, manager.delete_all_sandboxes())
            .await
            .is_err()
        {
            error!("Sandbox cleanup did not finish within the grace period");
        }
    }

    info!("Graceful shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install SIGINT handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => error!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
