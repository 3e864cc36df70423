//! ---
//! csim_section: "01-core-functionality"
//! csim_subsection: "module"
//! csim_type: "source"
//! csim_scope: "code"
//! csim_description: "Epoch coordination and component lifecycle management."
//! csim_version: "v0.0.0-prealpha"
//! csim_owner: "tbd"
//! ---
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{info, warn};

use c_sim_bus::{BusHandler, Delivery};
use c_sim_msg::{DecodedPayload, Message};

/// Receiver of decoded messages from a listener.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Called with the decoded payload and the topic it arrived on.
    async fn on_message(&self, message: DecodedPayload, topic: &str);
}

#[derive(Default)]
struct CallbackState {
    last_message: Option<DecodedPayload>,
    last_topic: Option<String>,
}

/// Listener callback that decodes raw deliveries and forwards them.
///
/// Handling is serialized: the internal lock is held from decode through
/// the downstream handler call, so at most one delivery per listener is in
/// flight and the handler observes messages in arrival order. The last
/// received message and topic are kept for inspection.
pub struct MessageCallback {
    handler: Arc<dyn MessageHandler>,
    state: Mutex<CallbackState>,
}

impl MessageCallback {
    /// Wrap a message handler into a bus listener callback.
    pub fn new(handler: Arc<dyn MessageHandler>) -> Self {
        Self {
            handler,
            state: Mutex::new(CallbackState::default()),
        }
    }

    /// The most recently received message, if any.
    pub async fn last_message(&self) -> Option<DecodedPayload> {
        self.state.lock().await.last_message.clone()
    }

    /// The topic the most recent message arrived on, if any.
    pub async fn last_topic(&self) -> Option<String> {
        self.state.lock().await.last_topic.clone()
    }

    fn log_received(message: &DecodedPayload, topic: &str) {
        match message {
            DecodedPayload::Message(message) => match message.as_ref() {
                Message::SimulationState(message) => info!(
                    state = %message.simulation_state,
                    source = %message.envelope.source_process_id,
                    "received a simulation state message"
                ),
                Message::Epoch(message) => info!(
                    epoch = message.result.epoch_number,
                    start = %message.start_time,
                    end = %message.end_time,
                    source = %message.envelope.source_process_id,
                    "received an epoch message"
                ),
                Message::Status(message) => info!(
                    epoch = message.result.epoch_number,
                    value = ?message.value,
                    source = %message.envelope.source_process_id,
                    "received a status message"
                ),
                Message::Error(message) => info!(
                    description = %message.description,
                    source = %message.envelope.source_process_id,
                    "received an error message"
                ),
                other => info!(
                    kind = %other.type_tag(),
                    source = %other.envelope().source_process_id,
                    topic,
                    "received a message"
                ),
            },
            DecodedPayload::Json(_) => {
                info!(topic, "received a JSON message that did not match the message schema")
            }
            DecodedPayload::Text(_) => warn!(topic, "received a non-JSON message"),
        }
    }
}

#[async_trait]
impl BusHandler for MessageCallback {
    async fn on_delivery(&self, delivery: Delivery) {
        let mut state = self.state.lock().await;
        let decoded = DecodedPayload::from_bytes(&delivery.payload);
        Self::log_received(&decoded, &delivery.topic);
        state.last_message = Some(decoded.clone());
        state.last_topic = Some(delivery.topic.clone());
        self.handler.on_message(decoded, &delivery.topic).await;
    }
}
