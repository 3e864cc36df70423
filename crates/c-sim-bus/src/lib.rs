//! ---
//! csim_section: "03-bus-transport"
//! csim_subsection: "module"
//! csim_type: "source"
//! csim_scope: "code"
//! csim_description: "Topic publish/subscribe client interface and in-memory bus."
//! csim_version: "v0.0.0-prealpha"
//! csim_owner: "tbd"
//! ---
//! The bus client seam the epoch coordinator depends on.
//!
//! Production deployments back [`BusClient`] with a broker connection; this
//! crate ships [`InMemoryBus`], a single-process topic exchange used by
//! tests and integration examples. Routing keys are `.`-separated; listener
//! bindings may use `*` (exactly one segment) and `#` (zero or more
//! segments), matching broker topic-exchange semantics.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Shared result type for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;

/// Errors surfaced by bus clients.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// The client has been closed; the operation was not performed.
    #[error("bus client is closed")]
    Closed,
    /// An empty topic name was supplied.
    #[error("empty topic name")]
    EmptyTopic,
    /// The payload could not be handed to the transport.
    #[error("delivery failed for topic '{0}'")]
    Delivery(String),
}

/// One payload received from a topic.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// The routing key the payload was published under.
    pub topic: String,
    /// The raw payload bytes.
    pub payload: Vec<u8>,
}

/// Receiver side of a listener subscription.
#[async_trait]
pub trait BusHandler: Send + Sync {
    /// Called for every delivery matching one of the listener's bindings.
    async fn on_delivery(&self, delivery: Delivery);
}

/// Topic publish/subscribe client.
#[async_trait]
pub trait BusClient: Send + Sync {
    /// Publish a payload under the given routing key.
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()>;
    /// Open a listener receiving deliveries for all of the given bindings.
    async fn add_listener(&self, topics: &[String], handler: Arc<dyn BusHandler>) -> Result<()>;
    /// Cancel all listeners and release resources. Safe to call repeatedly.
    async fn close(&self) -> Result<()>;
    /// Whether the client has been closed.
    fn is_closed(&self) -> bool;
}

/// Check a routing key against a binding pattern.
///
/// Segments are separated by `.`; `*` matches exactly one segment and `#`
/// matches any number of segments, including none.
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('.').collect();
    let topic: Vec<&str> = topic.split('.').collect();
    segments_match(&pattern, &topic)
}

fn segments_match(pattern: &[&str], topic: &[&str]) -> bool {
    match pattern.split_first() {
        None => topic.is_empty(),
        Some((&"#", rest)) => {
            (0..=topic.len()).any(|skipped| segments_match(rest, &topic[skipped..]))
        }
        Some((&"*", rest)) => match topic.split_first() {
            Some((_, topic_rest)) => segments_match(rest, topic_rest),
            None => false,
        },
        Some((segment, rest)) => match topic.split_first() {
            Some((topic_segment, topic_rest)) => {
                segment == topic_segment && segments_match(rest, topic_rest)
            }
            None => false,
        },
    }
}

struct ListenerEntry {
    bindings: Vec<String>,
    queue: mpsc::UnboundedSender<Delivery>,
    task: JoinHandle<()>,
}

struct BusInner {
    listeners: Mutex<Vec<ListenerEntry>>,
    send_guard: tokio::sync::Mutex<()>,
    closed: AtomicBool,
}

/// Single-process topic exchange implementing [`BusClient`].
///
/// Every listener gets its own delivery queue and driver task, so one slow
/// handler does not block the others; deliveries within a listener arrive
/// in publish order.
#[derive(Clone)]
pub struct InMemoryBus {
    inner: Arc<BusInner>,
}

impl InMemoryBus {
    /// Create a new, open bus.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                listeners: Mutex::new(Vec::new()),
                send_guard: tokio::sync::Mutex::new(()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// All bindings currently listened to.
    pub fn listened_topics(&self) -> Vec<String> {
        let listeners = self.inner.listeners.lock();
        let mut topics: Vec<String> = listeners
            .iter()
            .flat_map(|entry| entry.bindings.iter().cloned())
            .collect();
        topics.sort();
        topics.dedup();
        topics
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BusClient for InMemoryBus {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        if topic.trim().is_empty() {
            warn!("topic name for the message to publish was empty");
            return Err(BusError::EmptyTopic);
        }
        if self.is_closed() {
            warn!(topic, "message not sent because the bus client is closed");
            return Err(BusError::Closed);
        }

        // One outbound send at a time, so interleaved publishers observe a
        // total order on this client.
        let _guard = self.inner.send_guard.lock().await;
        let mut matched = 0usize;
        {
            let listeners = self.inner.listeners.lock();
            for entry in listeners.iter() {
                if entry
                    .bindings
                    .iter()
                    .any(|binding| topic_matches(binding, topic))
                {
                    matched += 1;
                    if entry
                        .queue
                        .send(Delivery {
                            topic: topic.to_owned(),
                            payload: payload.clone(),
                        })
                        .is_err()
                    {
                        debug!(topic, "listener queue is gone, delivery skipped");
                    }
                }
            }
        }
        debug!(topic, listeners = matched, "message published");
        Ok(())
    }

    async fn add_listener(&self, topics: &[String], handler: Arc<dyn BusHandler>) -> Result<()> {
        if self.is_closed() {
            return Err(BusError::Closed);
        }
        let (queue, mut receiver) = mpsc::unbounded_channel::<Delivery>();
        let task = tokio::spawn(async move {
            while let Some(delivery) = receiver.recv().await {
                handler.on_delivery(delivery).await;
            }
            debug!("listener delivery loop finished");
        });
        info!(topics = ?topics, "opened bus listener");
        self.inner.listeners.lock().push(ListenerEntry {
            bindings: topics.to_vec(),
            queue,
            task,
        });
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let entries: Vec<ListenerEntry> = std::mem::take(&mut *self.inner.listeners.lock());
        for entry in entries {
            entry.task.abort();
        }
        info!("bus client closed");
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ForwardingHandler {
        forward: mpsc::UnboundedSender<Delivery>,
    }

    #[async_trait]
    impl BusHandler for ForwardingHandler {
        async fn on_delivery(&self, delivery: Delivery) {
            let _ = self.forward.send(delivery);
        }
    }

    fn forwarding_listener() -> (Arc<ForwardingHandler>, mpsc::UnboundedReceiver<Delivery>) {
        let (forward, receiver) = mpsc::unbounded_channel();
        (Arc::new(ForwardingHandler { forward }), receiver)
    }

    #[test]
    fn topic_patterns_follow_exchange_semantics() {
        assert!(topic_matches("Epoch", "Epoch"));
        assert!(!topic_matches("Epoch", "Status"));
        assert!(topic_matches("Status.*", "Status.Ready"));
        assert!(!topic_matches("Status.*", "Status.Ready.storage"));
        assert!(topic_matches("Status.#", "Status"));
        assert!(topic_matches("Status.#", "Status.Ready.storage"));
        assert!(topic_matches("#", "anything.at.all"));
        assert!(topic_matches("*.storage.#", "ResourceState.storage.unit-1"));
        assert!(!topic_matches("*.storage.#", "storage.unit-1"));
    }

    #[tokio::test]
    async fn publish_fans_out_to_matching_listeners() {
        let bus = InMemoryBus::new();
        let (state_handler, mut state_rx) = forwarding_listener();
        let (wildcard_handler, mut wildcard_rx) = forwarding_listener();

        bus.add_listener(&["SimState".to_owned()], state_handler)
            .await
            .expect("add listener");
        bus.add_listener(&["#".to_owned()], wildcard_handler)
            .await
            .expect("add listener");

        bus.publish("SimState", b"running".to_vec())
            .await
            .expect("publish");
        bus.publish("Epoch", b"epoch-1".to_vec())
            .await
            .expect("publish");

        let delivery = state_rx.recv().await.expect("state delivery");
        assert_eq!(delivery.topic, "SimState");
        assert!(state_rx.try_recv().is_err(), "no cross-topic leakage");

        assert_eq!(wildcard_rx.recv().await.expect("delivery").topic, "SimState");
        assert_eq!(wildcard_rx.recv().await.expect("delivery").topic, "Epoch");
    }

    #[tokio::test]
    async fn deliveries_preserve_publish_order_per_listener() {
        let bus = InMemoryBus::new();
        let (handler, mut rx) = forwarding_listener();
        bus.add_listener(&["Epoch".to_owned()], handler)
            .await
            .expect("add listener");

        for n in 0u8..10 {
            bus.publish("Epoch", vec![n]).await.expect("publish");
        }
        for n in 0u8..10 {
            assert_eq!(rx.recv().await.expect("delivery").payload, vec![n]);
        }
    }

    #[tokio::test]
    async fn close_is_idempotent_and_rejects_further_publishes() {
        let bus = InMemoryBus::new();
        let (handler, _rx) = forwarding_listener();
        bus.add_listener(&["Epoch".to_owned()], handler)
            .await
            .expect("add listener");

        bus.close().await.expect("first close");
        bus.close().await.expect("second close");
        assert!(bus.is_closed());
        assert!(bus.listened_topics().is_empty());

        let result = bus.publish("Epoch", b"late".to_vec()).await;
        assert!(matches!(result, Err(BusError::Closed)));
    }

    #[tokio::test]
    async fn empty_topics_are_rejected() {
        let bus = InMemoryBus::new();
        assert!(matches!(
            bus.publish("", b"payload".to_vec()).await,
            Err(BusError::EmptyTopic)
        ));
    }
}
