// ABOUTME: WebSocket stream endpoint delivering observations to subscribed clients
// ABOUTME: One complete JSON observation per text frame; slow or silent peers are dropped

use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use mentis_runtime::Hub;

/// Time allowed to write one frame to the peer.
const WRITE_WAIT: Duration = Duration::from_secs(10);

/// Time allowed between reads before the peer is considered gone.
/// Refreshed whenever a pong arrives.
const PONG_WAIT: Duration = Duration::from_secs(60);

/// Ping period. Must be shorter than `PONG_WAIT`.
const PING_PERIOD: Duration = Duration::from_secs(54);

/// GET /v1/sandboxes/{sandbox_id}/stream
///
/// Unknown sandboxes are rejected with 404 before the upgrade happens.
pub async fn stream_handler(
    State(state): State<AppState>,
    Path(sandbox_id): Path<String>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response, ApiError> {
    // Existence is checked before the upgrade is even considered, so
    // unknown sandboxes answer 404 whatever the request looks like.
    if !state.manager.sandbox_exists(&sandbox_id).await {
        warn!(%sandbox_id, "Stream requested for unknown sandbox");
        return Err(ApiError::NotFound(format!(
            "Sandbox {sandbox_id} not found"
        )));
    }
    let ws = ws.map_err(|e| ApiError::BadRequest(format!("websocket upgrade required: {e}")))?;
    let hub = state.hub.clone();
    Ok(ws.on_upgrade(move |socket| serve_stream(socket, hub, sandbox_id)))
}

async fn serve_stream(socket: WebSocket, hub: Arc<Hub>, sandbox_id: String) {
    let (subscriber, mut outbound) = hub.subscribe(&sandbox_id).await;
    info!(%sandbox_id, subscriber, "Stream client connected");

    let (mut sink, mut source) = socket.split();

    // Writer: drains the hub buffer and keeps the peer alive with pings.
    let write_task = tokio::spawn(async move {
        let mut ping = tokio::time::interval(PING_PERIOD);
        ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The interval fires immediately; skip that initial tick.
        ping.tick().await;
        loop {
            tokio::select! {
                frame = outbound.recv() => {
                    let Some(frame) = frame else {
                        // Hub dropped us (delinquent) or shut down.
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    };
                    match timeout(WRITE_WAIT, sink.send(Message::Text(frame.into()))).await {
                        Ok(Ok(())) => {}
                        _ => break,
                    }
                }
                _ = ping.tick() => {
                    match timeout(WRITE_WAIT, sink.send(Message::Ping(Vec::new().into()))).await {
                        Ok(Ok(())) => debug!("Ping sent"),
                        _ => break,
                    }
                }
            }
        }
    });

    // Reader: enforces the idle deadline and absorbs client traffic. Each
    // received frame, pongs included, refreshes the deadline.
    loop {
        match timeout(PONG_WAIT, source.next()).await {
            Err(_) => {
                debug!(%sandbox_id, subscriber, "Read deadline expired");
                break;
            }
            Ok(None) | Ok(Some(Err(_))) => break,
            Ok(Some(Ok(frame))) => match frame {
                Message::Pong(_) => debug!("Pong received"),
                Message::Close(_) => break,
                Message::Text(text) => {
                    // Clients have nothing to say on this stream.
                    warn!(%sandbox_id, subscriber, message = %text, "Unexpected client message");
                }
                _ => {}
            },
        }
    }

    hub.unsubscribe(&sandbox_id, subscriber).await;
    write_task.abort();
    info!(%sandbox_id, subscriber, "Stream client disconnected");
}
