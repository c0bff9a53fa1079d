// ABOUTME: Observation delivery back to the runtime's internal endpoint
// ABOUTME: Push is best-effort; failures are logged and never abort execution

use crate::error::Result;
use async_trait::async_trait;
use mentis_protocol::Observation;
use std::time::Duration;
use tracing::{debug, warn};

const PUSH_TIMEOUT: Duration = Duration::from_secs(10);

/// Seam between execution and delivery; tests collect observations on a
/// channel instead of a socket.
#[async_trait]
pub trait ObservationSink: Send + Sync {
    async fn emit(&self, observation: Observation);
}

/// Pushes observations to `RUNTIME_OBSERVATION_URL`.
pub struct HttpObservationSink {
    client: reqwest::Client,
    url: Option<String>,
}

impl HttpObservationSink {
    pub fn new(url: Option<String>) -> Result<Self> {
        if url.is_none() {
            warn!("RUNTIME_OBSERVATION_URL not set, observations will be dropped");
        }
        let client = reqwest::Client::builder().timeout(PUSH_TIMEOUT).build()?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl ObservationSink for HttpObservationSink {
    async fn emit(&self, observation: Observation) {
        let Some(url) = &self.url else {
            debug!(action_id = %observation.action_id, "No observation URL, dropping");
            return;
        };
        match self.client.post(url).json(&observation).send().await {
            Ok(resp) if resp.status().is_success() => {
                debug!(
                    action_id = %observation.action_id,
                    observation_type = ?observation.observation_type,
                    "Observation delivered"
                );
            }
            Ok(resp) => warn!(
                action_id = %observation.action_id,
                status = %resp.status(),
                "Runtime rejected observation"
            ),
            Err(e) => warn!(
                action_id = %observation.action_id,
                "Failed to push observation: {}", e
            ),
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    /// Collects observations in-process for assertions.
    pub struct ChannelSink {
        tx: mpsc::UnboundedSender<Observation>,
    }

    impl ChannelSink {
        pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Observation>) {
            let (tx, rx) = mpsc::unbounded_channel();
            (Arc::new(Self { tx }), rx)
        }
    }

    #[async_trait]
    impl ObservationSink for ChannelSink {
        async fn emit(&self, observation: Observation) {
            let _ = self.tx.send(observation);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Json;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::Router;
    use mentis_protocol::StreamKind;
    use serde_json::Value;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    #[tokio::test]
    async fn delivers_observations_to_the_runtime_endpoint() {
        let (tx, mut rx) = mpsc::unbounded_channel::<Value>();
        let app = Router::new().route(
            "/v1/internal/observations/{sandbox_id}",
            post(move |Json(body): Json<Value>| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(body);
                    StatusCode::OK
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let sink = HttpObservationSink::new(Some(format!(
            "http://{addr}/v1/internal/observations/sb-test"
        )))
        .unwrap();
        sink.emit(Observation::stream("act-1", StreamKind::Stdout, "hello"))
            .await;

        let received = timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("observation in time")
            .expect("channel open");
        assert_eq!(received["observation_type"], "stream");
        assert_eq!(received["action_id"], "act-1");
        assert_eq!(received["line"], "hello");
        assert!(received["timestamp"].as_str().unwrap().ends_with('Z'));
    }

    #[tokio::test]
    async fn missing_url_drops_silently() {
        let sink = HttpObservationSink::new(None).unwrap();
        // Must not panic or block.
        sink.emit(Observation::start("act-2")).await;
    }

    #[tokio::test]
    async fn unreachable_runtime_does_not_abort() {
        let sink =
            HttpObservationSink::new(Some("http://127.0.0.1:9/unreachable".to_string())).unwrap();
        sink.emit(Observation::start("act-3")).await;
    }
}
