// ABOUTME: WebSocket hub fanning observations out to per-sandbox subscribers
// ABOUTME: Bounded queues everywhere; slow subscribers are disconnected, producers never block

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::RwLock;
use tracing::{debug, error, warn};

/// Size of the hub-wide submission queue.
const SUBMIT_QUEUE_SIZE: usize = 256;

/// Size of each subscriber's outbound buffer.
const SUBSCRIBER_BUFFER_SIZE: usize = 256;

/// Opaque handle identifying one subscription.
pub type SubscriberId = u64;

struct BroadcastMessage {
    sandbox_id: String,
    payload: String,
}

type SubscriptionMap = Arc<RwLock<HashMap<String, HashMap<SubscriberId, mpsc::Sender<String>>>>>;

/// Fan-out hub. Producers submit through a bounded queue consumed by a
/// single dispatcher task; each subscriber drains a bounded buffer of its
/// own. A subscriber whose buffer fills is dropped rather than waited on.
pub struct Hub {
    subscriptions: SubscriptionMap,
    submit_tx: mpsc::Sender<BroadcastMessage>,
    next_subscriber: AtomicU64,
}

impl Hub {
    /// Create the hub and start its dispatcher task. Must be called within
    /// a tokio runtime. The dispatcher exits when the hub is dropped.
    pub fn new() -> Arc<Self> {
        let (submit_tx, submit_rx) = mpsc::channel(SUBMIT_QUEUE_SIZE);
        let subscriptions: SubscriptionMap = Arc::new(RwLock::new(HashMap::new()));
        tokio::spawn(run_dispatcher(subscriptions.clone(), submit_rx));
        Arc::new(Self {
            subscriptions,
            submit_tx,
            next_subscriber: AtomicU64::new(0),
        })
    }

    /// Register a subscriber for one sandbox. Returns the subscription
    /// handle and the receiving end of the subscriber's outbound buffer;
    /// the channel closing means the hub disconnected the subscriber.
    pub async fn subscribe(&self, sandbox_id: &str) -> (SubscriberId, mpsc::Receiver<String>) {
        let id = self.next_subscriber.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER_SIZE);
        let mut subs = self.subscriptions.write().await;
        subs.entry(sandbox_id.to_string()).or_default().insert(id, tx);
        debug!(sandbox_id, subscriber = id, "Subscriber registered");
        (id, rx)
    }

    pub async fn unsubscribe(&self, sandbox_id: &str, subscriber: SubscriberId) {
        let mut subs = self.subscriptions.write().await;
        if let Some(clients) = subs.get_mut(sandbox_id) {
            if clients.remove(&subscriber).is_some() {
                debug!(sandbox_id, subscriber, "Subscriber unregistered");
            }
            if clients.is_empty() {
                subs.remove(sandbox_id);
            }
        }
    }

    /// Non-blocking submission. A full submission queue drops the message
    /// with an error log; the caller is never held up.
    pub fn broadcast(&self, sandbox_id: &str, payload: String) {
        let msg = BroadcastMessage {
            sandbox_id: sandbox_id.to_string(),
            payload,
        };
        if let Err(TrySendError::Full(msg)) = self.submit_tx.try_send(msg) {
            error!(
                sandbox_id = %msg.sandbox_id,
                "Hub submission queue full, discarding message"
            );
        }
    }

    pub async fn subscriber_count(&self, sandbox_id: &str) -> usize {
        self.subscriptions
            .read()
            .await
            .get(sandbox_id)
            .map(|c| c.len())
            .unwrap_or(0)
    }
}

async fn run_dispatcher(
    subscriptions: SubscriptionMap,
    mut submit_rx: mpsc::Receiver<BroadcastMessage>,
) {
    debug!("Hub dispatcher started");
    while let Some(msg) = submit_rx.recv().await {
        let mut delinquent: Vec<SubscriberId> = Vec::new();
        {
            let subs = subscriptions.read().await;
            let Some(clients) = subs.get(&msg.sandbox_id) else {
                debug!(sandbox_id = %msg.sandbox_id, "No subscribers, discarding message");
                continue;
            };
            for (&id, tx) in clients {
                match tx.try_send(msg.payload.clone()) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        warn!(
                            sandbox_id = %msg.sandbox_id,
                            subscriber = id,
                            "Subscriber buffer full, disconnecting"
                        );
                        delinquent.push(id);
                    }
                    Err(TrySendError::Closed(_)) => delinquent.push(id),
                }
            }
        }
        if !delinquent.is_empty() {
            // Dropping the sender closes the subscriber's channel; its
            // connection workers observe the close and shut the socket.
            let mut subs = subscriptions.write().await;
            if let Some(clients) = subs.get_mut(&msg.sandbox_id) {
                for id in delinquent {
                    clients.remove(&id);
                }
                if clients.is_empty() {
                    subs.remove(&msg.sandbox_id);
                }
            }
        }
    }
    debug!("Hub dispatcher stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    async fn recv(rx: &mut mpsc::Receiver<String>) -> Option<String> {
        timeout(Duration::from_secs(1), rx.recv()).await.ok().flatten()
    }

    #[tokio::test]
    async fn delivers_to_subscriber_in_order() {
        let hub = Hub::new();
        let (_id, mut rx) = hub.subscribe("sb-1").await;

        hub.broadcast("sb-1", "first".to_string());
        hub.broadcast("sb-1", "second".to_string());
        hub.broadcast("sb-1", "third".to_string());

        assert_eq!(recv(&mut rx).await.as_deref(), Some("first"));
        assert_eq!(recv(&mut rx).await.as_deref(), Some("second"));
        assert_eq!(recv(&mut rx).await.as_deref(), Some("third"));
    }

    #[tokio::test]
    async fn isolates_sandboxes() {
        let hub = Hub::new();
        let (_a, mut rx_a) = hub.subscribe("sb-a").await;
        let (_b, mut rx_b) = hub.subscribe("sb-b").await;

        hub.broadcast("sb-a", "for-a".to_string());
        assert_eq!(recv(&mut rx_a).await.as_deref(), Some("for-a"));

        // Nothing arrives on the other sandbox's subscription.
        let other = timeout(Duration::from_millis(100), rx_b.recv()).await;
        assert!(other.is_err());
    }

    #[tokio::test]
    async fn same_payload_reaches_every_subscriber() {
        let hub = Hub::new();
        let (_one, mut rx1) = hub.subscribe("sb-1").await;
        let (_two, mut rx2) = hub.subscribe("sb-1").await;

        hub.broadcast("sb-1", "hello".to_string());
        assert_eq!(recv(&mut rx1).await.as_deref(), Some("hello"));
        assert_eq!(recv(&mut rx2).await.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let hub = Hub::new();
        let (id, mut rx) = hub.subscribe("sb-1").await;
        hub.unsubscribe("sb-1", id).await;

        // Sender side is gone; the channel closes.
        assert_eq!(recv(&mut rx).await, None);
        assert_eq!(hub.subscriber_count("sb-1").await, 0);
    }

    #[tokio::test]
    async fn slow_subscriber_is_disconnected_without_blocking_others() {
        let hub = Hub::new();
        // Never drained: fills up and must be dropped by the dispatcher.
        let (_slow, mut slow_rx) = hub.subscribe("sb-1").await;
        let (_fast, mut fast_rx) = hub.subscribe("sb-1").await;

        for i in 0..SUBSCRIBER_BUFFER_SIZE + 8 {
            hub.broadcast("sb-1", format!("m{i}"));
            // Keep the fast subscriber drained so only the slow one fills.
            if let Some(msg) = recv(&mut fast_rx).await {
                assert_eq!(msg, format!("m{i}"));
            } else {
                panic!("fast subscriber lost message m{i}");
            }
        }

        // The slow subscriber was cut off: it still drains its buffered
        // prefix, then observes the close instead of silent loss.
        let mut drained = 0;
        while recv(&mut slow_rx).await.is_some() {
            drained += 1;
        }
        assert!(drained <= SUBSCRIBER_BUFFER_SIZE);
        assert_eq!(hub.subscriber_count("sb-1").await, 1);
    }
}
