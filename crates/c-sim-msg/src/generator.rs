//! ---
//! csim_section: "02-message-schema"
//! csim_subsection: "module"
//! csim_type: "source"
//! csim_scope: "code"
//! csim_description: "Message schema, value blocks, and protocol codecs."
//! csim_version: "v0.0.0-prealpha"
//! csim_owner: "tbd"
//! ---
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::{Map as JsonMap, Value as JsonValue};
use tracing::warn;

use c_sim_common::time::UtcTimestamp;

use crate::block::QuantityBlock;
use crate::envelope::{MessageEnvelope, MessageId, ResultFields};
use crate::types::{
    EpochMessage, ErrorMessage, GeneralMessage, Message, ResourceStateMessage, ResultMessage,
    SimulationState, SimulationStateMessage, StatusMessage, StatusValue, ValidatedMessage,
    REACTIVE_POWER_UNIT, REAL_POWER_UNIT, STATE_OF_CHARGE_UNIT,
};
use crate::MessageError;

/// Stateful message factory bound to one simulation run and one source
/// process.
///
/// Every built message consumes a fresh id `"<source process>-<n>"` with
/// `n` strictly increasing from the configured start, and carries a fresh
/// timestamp. The counter is atomic, so a generator shared between
/// concurrent senders still hands out unique ids.
///
/// The convenience builders return `None` instead of failing when the
/// requested attributes do not validate, so calling code can degrade
/// rather than crash; the underlying loud errors are logged.
#[derive(Debug)]
pub struct MessageGenerator {
    simulation_id: UtcTimestamp,
    source_process_id: String,
    next_number: AtomicU64,
}

impl MessageGenerator {
    /// Create a generator whose message ids start from 1.
    pub fn new(simulation_id: &str, source_process_id: &str) -> Result<Self, MessageError> {
        Self::with_start_number(simulation_id, source_process_id, 1)
    }

    /// Create a generator with a configurable first message number.
    pub fn with_start_number(
        simulation_id: &str,
        source_process_id: &str,
        start_number: u64,
    ) -> Result<Self, MessageError> {
        if source_process_id.trim().is_empty() {
            return Err(MessageError::Source("empty source process id".to_owned()));
        }
        Ok(Self {
            simulation_id: UtcTimestamp::parse(simulation_id)?,
            source_process_id: source_process_id.to_owned(),
            next_number: AtomicU64::new(start_number),
        })
    }

    /// The simulation this generator is bound to.
    pub fn simulation_id(&self) -> UtcTimestamp {
        self.simulation_id
    }

    /// The source process this generator produces ids for.
    pub fn source_process_id(&self) -> &str {
        &self.source_process_id
    }

    /// Consume and return the next message id.
    pub fn next_message_id(&self) -> MessageId {
        let number = self.next_number.fetch_add(1, Ordering::SeqCst);
        MessageId {
            process: self.source_process_id.clone(),
            number,
        }
    }

    /// Build a fresh envelope for the given type tag, consuming an id.
    pub fn next_envelope(&self, message_type: &str) -> MessageEnvelope {
        MessageEnvelope {
            message_type: message_type.to_owned(),
            simulation_id: self.simulation_id,
            source_process_id: self.source_process_id.clone(),
            message_id: self.next_message_id(),
            timestamp: UtcTimestamp::now(),
        }
    }

    fn finish<T: ValidatedMessage>(message: T, kind: &str) -> Option<T> {
        match message.validated() {
            Ok(message) => Some(message),
            Err(err) => {
                warn!(kind, error = %err, "failed to build message");
                None
            }
        }
    }

    /// Build an epoch message for the given simulated time interval.
    pub fn epoch_message(
        &self,
        epoch_number: u64,
        triggering_message_ids: Vec<MessageId>,
        start_time: UtcTimestamp,
        end_time: UtcTimestamp,
    ) -> Option<EpochMessage> {
        Self::finish(
            EpochMessage {
                envelope: self.next_envelope(EpochMessage::MESSAGE_TYPE),
                result: ResultFields {
                    epoch_number,
                    last_updated_in_epoch: None,
                    triggering_message_ids,
                    warnings: None,
                },
                start_time,
                end_time,
            },
            EpochMessage::MESSAGE_TYPE,
        )
    }

    /// Build a ready-status message for the given epoch.
    pub fn status_ready_message(
        &self,
        epoch_number: u64,
        triggering_message_ids: Vec<MessageId>,
    ) -> Option<StatusMessage> {
        Self::finish(
            StatusMessage {
                envelope: self.next_envelope(StatusMessage::MESSAGE_TYPE),
                result: ResultFields {
                    epoch_number,
                    last_updated_in_epoch: None,
                    triggering_message_ids,
                    warnings: None,
                },
                value: StatusValue::Ready,
                description: None,
            },
            StatusMessage::MESSAGE_TYPE,
        )
    }

    /// Build an error message describing a failure in the given epoch.
    pub fn error_message(
        &self,
        epoch_number: u64,
        triggering_message_ids: Vec<MessageId>,
        description: &str,
    ) -> Option<ErrorMessage> {
        Self::finish(
            ErrorMessage {
                envelope: self.next_envelope(ErrorMessage::MESSAGE_TYPE),
                result: ResultFields {
                    epoch_number,
                    last_updated_in_epoch: None,
                    triggering_message_ids,
                    warnings: None,
                },
                description: description.to_owned(),
            },
            ErrorMessage::MESSAGE_TYPE,
        )
    }

    /// Build a simulation state message.
    pub fn simulation_state_message(
        &self,
        simulation_state: SimulationState,
        name: Option<String>,
        description: Option<String>,
    ) -> Option<SimulationStateMessage> {
        Self::finish(
            SimulationStateMessage {
                envelope: self.next_envelope(SimulationStateMessage::MESSAGE_TYPE),
                simulation_state,
                name,
                description,
            },
            SimulationStateMessage::MESSAGE_TYPE,
        )
    }

    /// Build a resource state message. Power values are wrapped with the
    /// expected platform units.
    #[allow(clippy::too_many_arguments)]
    pub fn resource_state_message(
        &self,
        epoch_number: u64,
        triggering_message_ids: Vec<MessageId>,
        bus: &str,
        real_power: f64,
        reactive_power: f64,
        node: Option<i64>,
        state_of_charge: Option<f64>,
    ) -> Option<ResourceStateMessage> {
        Self::finish(
            ResourceStateMessage {
                envelope: self.next_envelope(ResourceStateMessage::MESSAGE_TYPE),
                result: ResultFields {
                    epoch_number,
                    last_updated_in_epoch: None,
                    triggering_message_ids,
                    warnings: None,
                },
                bus: bus.to_owned(),
                real_power: QuantityBlock::try_new(real_power, REAL_POWER_UNIT).ok()?,
                reactive_power: QuantityBlock::try_new(reactive_power, REACTIVE_POWER_UNIT).ok()?,
                node,
                state_of_charge: match state_of_charge {
                    Some(value) => Some(QuantityBlock::try_new(value, STATE_OF_CHARGE_UNIT).ok()?),
                    None => None,
                },
            },
            ResourceStateMessage::MESSAGE_TYPE,
        )
    }

    /// Build a generic result message carrying open-ended values.
    pub fn result_message(
        &self,
        epoch_number: u64,
        triggering_message_ids: Vec<MessageId>,
        values: JsonMap<String, JsonValue>,
    ) -> Option<ResultMessage> {
        Self::finish(
            ResultMessage {
                envelope: self.next_envelope(ResultMessage::MESSAGE_TYPE),
                result: ResultFields {
                    epoch_number,
                    last_updated_in_epoch: None,
                    triggering_message_ids,
                    warnings: None,
                },
                values,
            },
            ResultMessage::MESSAGE_TYPE,
        )
    }

    /// Build a schema-light general message under an arbitrary type tag.
    pub fn general_message(
        &self,
        message_type: &str,
        attributes: JsonMap<String, JsonValue>,
    ) -> Option<GeneralMessage> {
        Self::finish(
            GeneralMessage {
                envelope: self.next_envelope(message_type),
                general_attributes: attributes,
            },
            GeneralMessage::MESSAGE_TYPE,
        )
    }

    /// Build a message of an arbitrary type from loose JSON attributes.
    ///
    /// Known tags dispatch to their typed schema; unknown tags produce a
    /// general message. The envelope attributes are filled in by the
    /// generator and cannot be overridden by `attributes`.
    pub fn get_message(
        &self,
        message_type: &str,
        attributes: JsonMap<String, JsonValue>,
    ) -> Option<Message> {
        let envelope = self.next_envelope(message_type);
        let mut json = match serde_json::to_value(&envelope) {
            Ok(JsonValue::Object(map)) => map,
            Ok(_) | Err(_) => {
                warn!(kind = message_type, "failed to encode message envelope");
                return None;
            }
        };
        for (key, value) in attributes {
            json.entry(key).or_insert(value);
        }
        Message::from_json_value(&JsonValue::Object(json))
    }
}
