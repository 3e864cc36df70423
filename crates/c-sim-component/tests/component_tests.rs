//! ---
//! csim_section: "01-core-functionality"
//! csim_subsection: "module"
//! csim_type: "source"
//! csim_scope: "code"
//! csim_description: "Epoch coordination and component lifecycle management."
//! csim_version: "v0.0.0-prealpha"
//! csim_owner: "tbd"
//! ---
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::timeout;

use c_sim_bus::{BusClient, BusHandler, Delivery, InMemoryBus};
use c_sim_common::config::ComponentConfig;
use c_sim_common::time::UtcTimestamp;
use c_sim_component::{EpochProcessor, NoopProcessor, SimulationComponent};
use c_sim_msg::{
    DecodedPayload, EpochMessage, ErrorMessage, Message, MessageGenerator, MessageId,
    SimulationState, StatusMessage, StatusValue,
};

const SIMULATION_ID: &str = "2023-01-01T00:00:00.000Z";
const OTHER_SIMULATION_ID: &str = "2024-06-01T00:00:00.000Z";
const RECV_TIMEOUT: Duration = Duration::from_secs(2);
const SILENCE_TIMEOUT: Duration = Duration::from_millis(200);

struct CaptureHandler {
    forward: mpsc::UnboundedSender<Delivery>,
}

#[async_trait]
impl BusHandler for CaptureHandler {
    async fn on_delivery(&self, delivery: Delivery) {
        let _ = self.forward.send(delivery);
    }
}

struct CountingProcessor {
    calls: AtomicUsize,
}

#[async_trait]
impl EpochProcessor for CountingProcessor {
    async fn process_epoch(&self, _epoch: &EpochMessage) -> anyhow::Result<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }
}

struct FailingProcessor;

#[async_trait]
impl EpochProcessor for FailingProcessor {
    async fn process_epoch(&self, _epoch: &EpochMessage) -> anyhow::Result<bool> {
        anyhow::bail!("load flow did not converge")
    }
}

struct Harness {
    bus: InMemoryBus,
    component: SimulationComponent,
    manager: MessageGenerator,
    status_rx: mpsc::UnboundedReceiver<Delivery>,
    error_rx: mpsc::UnboundedReceiver<Delivery>,
}

async fn harness(processor: Arc<dyn EpochProcessor>) -> Harness {
    let config = ComponentConfig {
        simulation_id: SIMULATION_ID.to_owned(),
        component_name: "storage-1".to_owned(),
        topics: Default::default(),
        start_message_id: 1,
        logging: Default::default(),
    };

    let bus = InMemoryBus::new();
    let (status_tx, status_rx) = mpsc::unbounded_channel();
    let (error_tx, error_rx) = mpsc::unbounded_channel();
    bus.add_listener(
        &["Status.Ready".to_owned()],
        Arc::new(CaptureHandler { forward: status_tx }),
    )
    .await
    .expect("status capture listener");
    bus.add_listener(
        &["Status.Error".to_owned()],
        Arc::new(CaptureHandler { forward: error_tx }),
    )
    .await
    .expect("error capture listener");

    let component = SimulationComponent::new(config, Arc::new(bus.clone()), processor)
        .expect("component builds");
    component.start().await.expect("component starts");

    Harness {
        bus,
        component,
        manager: MessageGenerator::new(SIMULATION_ID, "manager").expect("manager generator"),
        status_rx,
        error_rx,
    }
}

async fn publish(bus: &InMemoryBus, topic: &str, message: Message) {
    bus.publish(topic, message.to_bytes().expect("encodes"))
        .await
        .expect("publish succeeds");
}

async fn recv_status(rx: &mut mpsc::UnboundedReceiver<Delivery>) -> StatusMessage {
    let delivery = timeout(RECV_TIMEOUT, rx.recv())
        .await
        .expect("status within timeout")
        .expect("capture channel open");
    let DecodedPayload::Message(message) = DecodedPayload::from_bytes(&delivery.payload) else {
        panic!("published status must decode");
    };
    let Message::Status(status) = *message else {
        panic!("expected a status message on the status topic");
    };
    status
}

async fn recv_error(rx: &mut mpsc::UnboundedReceiver<Delivery>) -> ErrorMessage {
    let delivery = timeout(RECV_TIMEOUT, rx.recv())
        .await
        .expect("error within timeout")
        .expect("capture channel open");
    let DecodedPayload::Message(message) = DecodedPayload::from_bytes(&delivery.payload) else {
        panic!("published error must decode");
    };
    let Message::Error(error) = *message else {
        panic!("expected an error message on the error topic");
    };
    error
}

async fn assert_silent(rx: &mut mpsc::UnboundedReceiver<Delivery>) {
    match timeout(SILENCE_TIMEOUT, rx.recv()).await {
        Err(_) | Ok(None) => {}
        Ok(Some(delivery)) => panic!("expected no further messages, got one on {}", delivery.topic),
    }
}

fn epoch_message(
    manager: &MessageGenerator,
    epoch_number: u64,
    triggering: Vec<MessageId>,
) -> Message {
    let start = UtcTimestamp::parse("2023-01-01T04:00:00Z").unwrap();
    let end = UtcTimestamp::parse("2023-01-01T05:00:00Z").unwrap();
    Message::Epoch(
        manager
            .epoch_message(epoch_number, triggering, start, end)
            .expect("epoch message builds"),
    )
}

fn state_message(manager: &MessageGenerator, state: SimulationState) -> Message {
    Message::SimulationState(
        manager
            .simulation_state_message(state, None, None)
            .expect("state message builds"),
    )
}

#[tokio::test]
async fn simulation_start_yields_one_ready_status() {
    let mut harness = harness(Arc::new(NoopProcessor)).await;
    publish(
        &harness.bus,
        "SimState",
        state_message(&harness.manager, SimulationState::Running),
    )
    .await;

    let status = recv_status(&mut harness.status_rx).await;
    assert_eq!(status.value, StatusValue::Ready);
    assert_eq!(status.result.epoch_number, 0);
    assert_eq!(status.envelope.source_process_id, "storage-1");

    assert_silent(&mut harness.status_rx).await;
    assert_silent(&mut harness.error_rx).await;
}

#[tokio::test]
async fn initialization_error_yields_error_instead_of_status() {
    let mut harness = harness(Arc::new(NoopProcessor)).await;
    harness
        .component
        .set_initialization_error(Some("weather service unreachable".to_owned()))
        .await;

    publish(
        &harness.bus,
        "SimState",
        state_message(&harness.manager, SimulationState::Running),
    )
    .await;

    let error = recv_error(&mut harness.error_rx).await;
    assert_eq!(error.description, "weather service unreachable");
    assert_eq!(error.result.epoch_number, 0);
    assert_silent(&mut harness.status_rx).await;
}

#[tokio::test]
async fn epoch_message_triggers_processing_and_ready_status() {
    let processor = Arc::new(CountingProcessor {
        calls: AtomicUsize::new(0),
    });
    let mut harness = harness(processor.clone()).await;

    publish(
        &harness.bus,
        "SimState",
        state_message(&harness.manager, SimulationState::Running),
    )
    .await;
    let initial = recv_status(&mut harness.status_rx).await;
    assert_eq!(initial.result.epoch_number, 0);

    let epoch = epoch_message(&harness.manager, 5, vec![initial.envelope.message_id.clone()]);
    let epoch_id = epoch.envelope().message_id.clone();
    publish(&harness.bus, "Epoch", epoch).await;

    let status = recv_status(&mut harness.status_rx).await;
    assert_eq!(status.value, StatusValue::Ready);
    assert_eq!(status.result.epoch_number, 5);
    assert_eq!(status.result.triggering_message_ids, vec![epoch_id]);
    assert_eq!(processor.calls.load(Ordering::SeqCst), 1);
    assert_eq!(harness.component.completed_epoch().await, 5);
}

#[tokio::test]
async fn duplicate_epoch_acknowledgment_is_suppressed() {
    let processor = Arc::new(CountingProcessor {
        calls: AtomicUsize::new(0),
    });
    let mut harness = harness(processor.clone()).await;

    publish(
        &harness.bus,
        "SimState",
        state_message(&harness.manager, SimulationState::Running),
    )
    .await;
    let initial = recv_status(&mut harness.status_rx).await;

    publish(
        &harness.bus,
        "Epoch",
        epoch_message(&harness.manager, 5, vec![initial.envelope.message_id]),
    )
    .await;
    let status = recv_status(&mut harness.status_rx).await;

    // The manager acknowledges the status we just sent for the same epoch:
    // already handled, no re-emission.
    publish(
        &harness.bus,
        "Epoch",
        epoch_message(&harness.manager, 5, vec![status.envelope.message_id]),
    )
    .await;

    assert_silent(&mut harness.status_rx).await;
    assert_eq!(processor.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn completed_epoch_is_resent_without_reprocessing() {
    let processor = Arc::new(CountingProcessor {
        calls: AtomicUsize::new(0),
    });
    let mut harness = harness(processor.clone()).await;

    publish(
        &harness.bus,
        "SimState",
        state_message(&harness.manager, SimulationState::Running),
    )
    .await;
    let initial = recv_status(&mut harness.status_rx).await;

    publish(
        &harness.bus,
        "Epoch",
        epoch_message(&harness.manager, 5, vec![initial.envelope.message_id]),
    )
    .await;
    let first = recv_status(&mut harness.status_rx).await;

    // Same epoch again, but the triggering ids do not mention our status:
    // resend idempotently with a fresh id and timestamp.
    publish(
        &harness.bus,
        "Epoch",
        epoch_message(
            &harness.manager,
            5,
            vec![MessageId::new("manager", 999).unwrap()],
        ),
    )
    .await;
    let resent = recv_status(&mut harness.status_rx).await;

    assert_eq!(resent.result.epoch_number, first.result.epoch_number);
    assert_ne!(resent.envelope.message_id, first.envelope.message_id);
    assert_eq!(processor.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn processing_failure_is_reported_on_the_error_topic() {
    let mut harness = harness(Arc::new(FailingProcessor)).await;

    publish(
        &harness.bus,
        "SimState",
        state_message(&harness.manager, SimulationState::Running),
    )
    .await;
    let initial = recv_status(&mut harness.status_rx).await;

    publish(
        &harness.bus,
        "Epoch",
        epoch_message(&harness.manager, 1, vec![initial.envelope.message_id]),
    )
    .await;

    let error = recv_error(&mut harness.error_rx).await;
    assert_eq!(error.description, "load flow did not converge");
    assert_eq!(error.result.epoch_number, 1);
    assert_silent(&mut harness.status_rx).await;
    assert!(!harness.component.is_stopped().await);
}

#[tokio::test]
async fn stop_message_closes_the_component() {
    let mut harness = harness(Arc::new(NoopProcessor)).await;

    publish(
        &harness.bus,
        "SimState",
        state_message(&harness.manager, SimulationState::Stopped),
    )
    .await;

    let mut waited = Duration::ZERO;
    while !harness.component.is_stopped().await {
        tokio::time::sleep(Duration::from_millis(10)).await;
        waited += Duration::from_millis(10);
        assert!(waited < RECV_TIMEOUT, "component did not stop in time");
    }
    assert!(harness.component.is_bus_closed());
    assert_eq!(
        harness.component.simulation_state().await,
        SimulationState::Stopped
    );

    // Further sends are no-ops against the closed bus.
    harness.component.send_status_message().await;
    assert!(!harness.component.start_epoch().await);
    assert_silent(&mut harness.status_rx).await;
}

#[tokio::test]
async fn foreign_simulation_messages_are_dropped() {
    let mut harness = harness(Arc::new(NoopProcessor)).await;
    let foreign_manager =
        MessageGenerator::new(OTHER_SIMULATION_ID, "manager").expect("foreign generator");

    publish(
        &harness.bus,
        "SimState",
        state_message(&foreign_manager, SimulationState::Running),
    )
    .await;

    assert_silent(&mut harness.status_rx).await;
    assert_eq!(
        harness.component.simulation_state().await,
        SimulationState::Stopped
    );
    assert!(!harness.component.is_stopped().await);
}

#[tokio::test]
async fn unbuildable_error_message_is_fatal() {
    let harness = harness(Arc::new(NoopProcessor)).await;

    // No message has arrived yet, so there are no triggering ids: neither
    // the status nor the escalation error message can be built.
    harness.component.send_status_message().await;

    assert!(harness.component.is_stopped().await);
    assert!(harness.component.is_bus_closed());
}
