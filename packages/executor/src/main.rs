// ABOUTME: In-container executor binary: accepts actions over HTTP and runs them asynchronously
// ABOUTME: Shell commands run concurrently; IPython cells serialize on the sandbox's kernel

mod config;
mod error;
mod observer;
mod python;
mod shell;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use config::ExecutorConfig;
use mentis_protocol::{RunIPythonCellRequest, RunShellCommandRequest};
use observer::{HttpObservationSink, ObservationSink};
use python::PythonKernel;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Clone)]
struct ExecutorState {
    work_dir: PathBuf,
    sink: Arc<dyn ObservationSink>,
    kernel: Arc<PythonKernel>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ExecutorConfig::from_env()?;
    info!(
        sandbox_id = %config.sandbox_id,
        observation_url = ?config.observation_url,
        "Starting executor"
    );

    let sink: Arc<dyn ObservationSink> =
        Arc::new(HttpObservationSink::new(config.observation_url.clone())?);
    let kernel = Arc::new(PythonKernel::new(
        config.python_bin.clone(),
        config.work_dir.clone(),
    ));

    let state = ExecutorState {
        work_dir: config.work_dir.clone(),
        sink,
        kernel,
    };

    let app = Router::new()
        .route("/health", get(health))
        .route("/tools:run_shell_command", post(run_shell_command))
        .route("/tools:run_ipython_cell", post(run_ipython_cell))
        .with_state(state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(address = %listener.local_addr()?, "Executor listening");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health() -> StatusCode {
    StatusCode::OK
}

fn bad_request(message: &str) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({ "message": message })),
    )
}

/// Accepts the job and returns immediately; observations flow back through
/// the sink while the command runs.
async fn run_shell_command(
    State(state): State<ExecutorState>,
    Json(req): Json<RunShellCommandRequest>,
) -> Result<StatusCode, (StatusCode, Json<serde_json::Value>)> {
    if req.action_id.is_empty() {
        return Err(bad_request("missing 'action_id' in request body"));
    }
    if req.command.is_empty() {
        return Err(bad_request("missing 'command' in request body"));
    }
    info!(action_id = %req.action_id, "Shell command accepted");

    let sink = state.sink.clone();
    let work_dir = state.work_dir.clone();
    tokio::spawn(async move {
        shell::run_shell(sink, work_dir, req).await;
    });
    Ok(StatusCode::ACCEPTED)
}

/// Accepts the cell and returns immediately. Queuing behind an in-flight
/// cell happens inside the kernel's lock.
async fn run_ipython_cell(
    State(state): State<ExecutorState>,
    Json(req): Json<RunIPythonCellRequest>,
) -> Result<StatusCode, (StatusCode, Json<serde_json::Value>)> {
    if req.action_id.is_empty() {
        return Err(bad_request("missing 'action_id' in request body"));
    }
    if req.code.is_empty() {
        return Err(bad_request("missing 'code' in request body"));
    }
    info!(action_id = %req.action_id, "IPython cell accepted");

    let kernel = state.kernel.clone();
    let sink = state.sink.clone();
    tokio::spawn(async move {
        kernel.execute(&req.action_id, &req.code, &sink).await;
    });
    Ok(StatusCode::ACCEPTED)
}
