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

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use c_sim_bus::BusClient;
use c_sim_common::config::ComponentConfig;
use c_sim_msg::{
    log_message, DecodedPayload, EpochMessage, Message, MessageDirection, MessageGenerator,
    MessageId, SimulationState, SimulationStateMessage,
};

use crate::callbacks::{MessageCallback, MessageHandler};
use crate::processor::EpochProcessor;

/// Mutable coordination state, owned by the component behind one lock.
/// Mutated exclusively by the message handlers and the send paths.
#[derive(Debug)]
struct CoordinatorState {
    simulation_state: SimulationState,
    latest_epoch: u64,
    completed_epoch: u64,
    latest_epoch_message: Option<EpochMessage>,
    latest_status_message_id: Option<MessageId>,
    triggering_message_ids: Vec<MessageId>,
    is_stopped: bool,
    initialization_error: Option<String>,
}

impl Default for CoordinatorState {
    fn default() -> Self {
        Self {
            simulation_state: SimulationState::Stopped,
            latest_epoch: 0,
            completed_epoch: 0,
            latest_epoch_message: None,
            latest_status_message_id: None,
            triggering_message_ids: Vec::new(),
            is_stopped: true,
            initialization_error: None,
        }
    }
}

struct ComponentInner {
    config: ComponentConfig,
    bus: Arc<dyn BusClient>,
    generator: MessageGenerator,
    processor: Arc<dyn EpochProcessor>,
    state: Mutex<CoordinatorState>,
}

/// One epoch-synchronised simulation component.
///
/// The component subscribes to the simulation state and epoch topics,
/// tracks epoch progress, and reports readiness or errors back to the
/// simulation manager. Cheap to clone; all clones share one state.
#[derive(Clone)]
pub struct SimulationComponent {
    inner: Arc<ComponentInner>,
}

impl SimulationComponent {
    /// Build a component from its configuration, a bus client, and the
    /// processor implementing its simulation logic.
    pub fn new(
        config: ComponentConfig,
        bus: Arc<dyn BusClient>,
        processor: Arc<dyn EpochProcessor>,
    ) -> Result<Self> {
        config.validate()?;
        let generator = MessageGenerator::with_start_number(
            &config.simulation_id,
            &config.component_name,
            config.start_message_id,
        )
        .context("failed to build the message generator")?;
        Ok(Self {
            inner: Arc::new(ComponentInner {
                config,
                bus,
                generator,
                processor,
                state: Mutex::new(CoordinatorState::default()),
            }),
        })
    }

    /// The component name used as source process id.
    pub fn component_name(&self) -> &str {
        &self.inner.config.component_name
    }

    /// The configuration the component was built from.
    pub fn config(&self) -> &ComponentConfig {
        &self.inner.config
    }

    /// Whether the component has been stopped.
    pub async fn is_stopped(&self) -> bool {
        self.inner.state.lock().await.is_stopped
    }

    /// Whether the underlying bus client has been closed.
    pub fn is_bus_closed(&self) -> bool {
        self.inner.bus.is_closed()
    }

    /// The currently known simulation state.
    pub async fn simulation_state(&self) -> SimulationState {
        self.inner.state.lock().await.simulation_state
    }

    /// Number of the most recently announced epoch.
    pub async fn latest_epoch(&self) -> u64 {
        self.inner.state.lock().await.latest_epoch
    }

    /// Number of the most recently completed epoch.
    pub async fn completed_epoch(&self) -> u64 {
        self.inner.state.lock().await.completed_epoch
    }

    /// Id of the most recently sent status message, if any.
    pub async fn latest_status_message_id(&self) -> Option<MessageId> {
        self.inner.state.lock().await.latest_status_message_id.clone()
    }

    /// Record or clear an initialization failure. A component carrying an
    /// initialization error answers the simulation start with an error
    /// message instead of a ready status.
    pub async fn set_initialization_error(&self, description: Option<String>) {
        self.inner.state.lock().await.initialization_error = description;
    }

    /// Subscribe to the simulation topics and mark the component running.
    pub async fn start(&self) -> Result<()> {
        if self.inner.bus.is_closed() {
            bail!(
                "cannot start component '{}': bus client is closed",
                self.inner.config.component_name
            );
        }
        info!(component = %self.inner.config.component_name, "starting the component");

        let mut topics = self.inner.config.topics.other.clone();
        topics.push(self.inner.config.topics.state.clone());
        topics.push(self.inner.config.topics.epoch.clone());
        let callback = Arc::new(MessageCallback::new(
            Arc::new(self.clone()) as Arc<dyn MessageHandler>
        ));
        self.inner
            .bus
            .add_listener(&topics, callback)
            .await
            .context("failed to open the component listener")?;

        self.inner.state.lock().await.is_stopped = false;
        Ok(())
    }

    /// Stop the component and release the bus resources. Idempotent.
    pub async fn stop(&self) {
        let mut state = self.inner.state.lock().await;
        self.stop_locked(&mut state).await;
    }

    async fn stop_locked(&self, state: &mut CoordinatorState) {
        info!(component = %self.inner.config.component_name, "stopping the component");
        state.simulation_state = SimulationState::Stopped;
        state.is_stopped = true;
        if let Err(err) = self.inner.bus.close().await {
            warn!(error = %err, "failed to close the bus client");
        }
    }

    /// Start processing the current epoch, if one is pending.
    ///
    /// Returns true when the epoch is complete (including the idempotent
    /// resend for an epoch that was already finished) and false when some
    /// required information is still missing; progress then resumes with
    /// the next inbound message.
    pub async fn start_epoch(&self) -> bool {
        let mut state = self.inner.state.lock().await;
        self.start_epoch_locked(&mut state).await
    }

    async fn start_epoch_locked(&self, state: &mut CoordinatorState) -> bool {
        if state.is_stopped {
            warn!("simulation is stopped, cannot start epoch processing");
            return false;
        }
        let Some(epoch_message) = state.latest_epoch_message.clone() else {
            warn!("no epoch message received, cannot start epoch processing");
            return false;
        };
        if state.simulation_state != SimulationState::Running {
            warn!(
                state = %state.simulation_state,
                "simulation is not running, cannot start epoch processing"
            );
            return false;
        }

        state.latest_epoch = epoch_message.result.epoch_number;

        if state.completed_epoch == state.latest_epoch {
            // Already finished this round; resend the status with a fresh
            // id and timestamp instead of re-running the computation.
            debug!(
                epoch = state.latest_epoch,
                "epoch already processed, resending the status message"
            );
            self.send_status_message_locked(state).await;
            return true;
        }

        if self.ready_for_new_epoch(state, &epoch_message).await {
            match self.inner.processor.process_epoch(&epoch_message).await {
                Ok(true) => {
                    state.completed_epoch = state.latest_epoch;
                    self.send_status_message_locked(state).await;
                    info!(epoch = state.completed_epoch, "finished processing epoch");
                    return true;
                }
                Ok(false) => {}
                Err(err) => {
                    warn!(epoch = state.latest_epoch, error = %err, "epoch processing failed");
                    self.send_error_message_locked(state, &err.to_string()).await;
                }
            }
        }
        false
    }

    async fn ready_for_new_epoch(
        &self,
        state: &CoordinatorState,
        epoch_message: &EpochMessage,
    ) -> bool {
        if state.simulation_state == SimulationState::Running
            && !state.is_stopped
            && state.completed_epoch < state.latest_epoch
        {
            return self
                .inner
                .processor
                .all_messages_received(epoch_message)
                .await;
        }
        false
    }

    async fn handle_simulation_state(&self, message: SimulationStateMessage, topic: &str) {
        if message.envelope.simulation_id != self.inner.generator.simulation_id() {
            info!(
                received = %message.envelope.simulation_id,
                expected = %self.inner.generator.simulation_id(),
                "received a state message for a different simulation"
            );
            return;
        }
        if message.envelope.message_type != SimulationStateMessage::MESSAGE_TYPE {
            info!(
                received = %message.envelope.message_type,
                "received a state message with the wrong message type"
            );
            return;
        }
        debug!(source = %message.envelope.source_process_id, topic, "handling a state message");

        let mut state = self.inner.state.lock().await;
        state.triggering_message_ids = vec![message.envelope.message_id.clone()];
        state.simulation_state = message.simulation_state;
        match message.simulation_state {
            SimulationState::Running => {
                if state.latest_epoch == 0 {
                    match state.initialization_error.clone() {
                        None => self.send_status_message_locked(&mut state).await,
                        Some(description) => {
                            self.send_error_message_locked(&mut state, &description).await
                        }
                    }
                }
            }
            SimulationState::Stopped => self.stop_locked(&mut state).await,
        }
    }

    async fn handle_epoch(&self, message: EpochMessage, topic: &str) {
        if message.envelope.simulation_id != self.inner.generator.simulation_id() {
            info!(
                received = %message.envelope.simulation_id,
                expected = %self.inner.generator.simulation_id(),
                "received an epoch message for a different simulation"
            );
            return;
        }
        if message.envelope.message_type != EpochMessage::MESSAGE_TYPE {
            info!(
                received = %message.envelope.message_type,
                "received an epoch message with the wrong message type"
            );
            return;
        }

        let mut state = self.inner.state.lock().await;
        let duplicate_acknowledgment = message.result.epoch_number == state.latest_epoch
            && state
                .latest_status_message_id
                .as_ref()
                .is_some_and(|id| message.result.triggering_message_ids.contains(id));
        if duplicate_acknowledgment {
            info!(
                epoch = state.latest_epoch,
                "status message already registered for this epoch"
            );
            return;
        }

        debug!(source = %message.envelope.source_process_id, topic, "handling an epoch message");
        state.triggering_message_ids = vec![message.envelope.message_id.clone()];
        state.latest_epoch_message = Some(message);

        if !self.start_epoch_locked(&mut state).await {
            debug!(
                epoch = state.latest_epoch,
                "waiting for further messages before processing the epoch"
            );
        }
    }

    /// Build and publish a ready status for the current epoch.
    pub async fn send_status_message(&self) {
        let mut state = self.inner.state.lock().await;
        self.send_status_message_locked(&mut state).await;
    }

    async fn send_status_message_locked(&self, state: &mut CoordinatorState) {
        let status = self
            .inner
            .generator
            .status_ready_message(state.latest_epoch, state.triggering_message_ids.clone());
        match status {
            None => {
                error!("failed to build a status message");
                self.send_error_message_locked(state, "internal error while building the status message")
                    .await;
            }
            Some(message) => {
                state.latest_status_message_id = Some(message.envelope.message_id.clone());
                self.publish_message(&self.inner.config.topics.status, &Message::Status(message))
                    .await;
                state.completed_epoch = state.latest_epoch;
            }
        }
    }

    /// Build and publish an error message with the given description.
    pub async fn send_error_message(&self, description: &str) {
        let mut state = self.inner.state.lock().await;
        self.send_error_message_locked(&mut state, description).await;
    }

    async fn send_error_message_locked(&self, state: &mut CoordinatorState, description: &str) {
        let error_message = self.inner.generator.error_message(
            state.latest_epoch,
            state.triggering_message_ids.clone(),
            description,
        );
        match error_message {
            None => {
                // Not even an error message can be produced; the component
                // cannot signal anything meaningful anymore.
                error!("failed to build an error message, stopping the component");
                self.stop_locked(state).await;
            }
            Some(message) => {
                self.publish_message(&self.inner.config.topics.error, &Message::Error(message))
                    .await;
            }
        }
    }

    async fn publish_message(&self, topic: &str, message: &Message) {
        let payload = match message.to_bytes() {
            Ok(payload) => payload,
            Err(err) => {
                warn!(topic, error = %err, "failed to encode message for publishing");
                return;
            }
        };
        match self.inner.bus.publish(topic, payload).await {
            Ok(()) => log_message(MessageDirection::Outbound, message),
            Err(err) => warn!(topic, error = %err, "failed to publish message"),
        }
    }
}

#[async_trait]
impl MessageHandler for SimulationComponent {
    async fn on_message(&self, message: DecodedPayload, topic: &str) {
        match message {
            DecodedPayload::Message(boxed) => match *boxed {
                Message::SimulationState(state_message) => {
                    self.handle_simulation_state(state_message, topic).await
                }
                Message::Epoch(epoch_message) => self.handle_epoch(epoch_message, topic).await,
                other => {
                    self.inner
                        .processor
                        .handle_message(DecodedPayload::Message(Box::new(other)), topic)
                        .await
                }
            },
            other => self.inner.processor.handle_message(other, topic).await,
        }
    }
}
