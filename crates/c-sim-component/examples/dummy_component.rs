//! ---
//! csim_section: "01-core-functionality"
//! csim_subsection: "module"
//! csim_type: "source"
//! csim_scope: "code"
//! csim_description: "Epoch coordination and component lifecycle management."
//! csim_version: "v0.0.0-prealpha"
//! csim_owner: "tbd"
//! ---
//! A minimal manager/component pair running three epochs over the
//! in-memory bus.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Days;
use tokio::sync::mpsc;
use tokio::time::timeout;

use c_sim_bus::{BusClient, BusHandler, Delivery, InMemoryBus};
use c_sim_common::config::ComponentConfig;
use c_sim_common::time::UtcTimestamp;
use c_sim_component::{NoopProcessor, SimulationComponent};
use c_sim_msg::{DecodedPayload, Message, MessageGenerator, SimulationState, StatusMessage};

const SIMULATION_ID: &str = "2023-01-01T00:00:00.000Z";

struct StatusCollector {
    forward: mpsc::UnboundedSender<Delivery>,
}

#[async_trait]
impl BusHandler for StatusCollector {
    async fn on_delivery(&self, delivery: Delivery) {
        let _ = self.forward.send(delivery);
    }
}

async fn next_status(receiver: &mut mpsc::UnboundedReceiver<Delivery>) -> StatusMessage {
    let delivery = timeout(Duration::from_secs(2), receiver.recv())
        .await
        .expect("status in time")
        .expect("collector alive");
    match DecodedPayload::from_bytes(&delivery.payload) {
        DecodedPayload::Message(message) => match *message {
            Message::Status(status) => status,
            other => panic!("unexpected message kind {}", other.type_tag()),
        },
        other => panic!("status topic carried undecodable payload: {other:?}"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let bus = InMemoryBus::new();

    // The manager side: its own id sequence plus a listener on the status
    // topics.
    let manager = MessageGenerator::new(SIMULATION_ID, "manager")?;
    let (status_tx, mut status_rx) = mpsc::unbounded_channel();
    bus.add_listener(
        &["Status.#".to_owned()],
        Arc::new(StatusCollector { forward: status_tx }),
    )
    .await?;

    // The component under coordination.
    let config = ComponentConfig {
        simulation_id: SIMULATION_ID.to_owned(),
        component_name: "dummy-1".to_owned(),
        topics: Default::default(),
        start_message_id: 1,
        logging: Default::default(),
    };
    let component =
        SimulationComponent::new(config, Arc::new(bus.clone()), Arc::new(NoopProcessor))?;
    component.start().await?;

    // Simulation start: the component answers with a ready status for
    // epoch 0.
    let start = manager
        .simulation_state_message(SimulationState::Running, Some("demo".to_owned()), None)
        .expect("state message builds");
    bus.publish("SimState", Message::SimulationState(start).to_bytes()?)
        .await?;
    let mut last_status = next_status(&mut status_rx).await;
    println!(
        "component ready: epoch={} id={}",
        last_status.result.epoch_number, last_status.envelope.message_id
    );

    // Drive three epochs, acknowledging the previous status each round.
    let day = UtcTimestamp::parse(SIMULATION_ID)?.as_datetime();
    for epoch_number in 1..=3u64 {
        let start_time = UtcTimestamp::from_datetime(
            day.checked_add_days(Days::new(epoch_number - 1)).expect("valid date"),
        );
        let end_time = UtcTimestamp::from_datetime(
            day.checked_add_days(Days::new(epoch_number)).expect("valid date"),
        );
        let epoch = manager
            .epoch_message(
                epoch_number,
                vec![last_status.envelope.message_id.clone()],
                start_time,
                end_time,
            )
            .expect("epoch message builds");
        bus.publish("Epoch", Message::Epoch(epoch).to_bytes()?)
            .await?;

        last_status = next_status(&mut status_rx).await;
        println!(
            "epoch {} completed: status id={}",
            last_status.result.epoch_number, last_status.envelope.message_id
        );
    }

    // Shut the simulation down.
    let stop = manager
        .simulation_state_message(SimulationState::Stopped, None, None)
        .expect("state message builds");
    bus.publish("SimState", Message::SimulationState(stop).to_bytes()?)
        .await?;
    while !component.is_stopped().await {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    println!("component stopped, bus closed: {}", component.is_bus_closed());
    Ok(())
}
