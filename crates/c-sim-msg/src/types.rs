//! ---
//! csim_section: "02-message-schema"
//! csim_subsection: "module"
//! csim_type: "source"
//! csim_scope: "code"
//! csim_description: "Message schema, value blocks, and protocol codecs."
//! csim_version: "v0.0.0-prealpha"
//! csim_owner: "tbd"
//! ---
use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};
use tracing::warn;

use c_sim_common::time::UtcTimestamp;

use crate::block::{optional_quantity_with_unit, quantity_with_unit, QuantityBlock};
use crate::envelope::{HasEnvelope, HasResultFields, MessageEnvelope, ResultFields};
use crate::MessageError;

/// Schema-level validation shared by every concrete message type.
///
/// Decoding runs the serde structural pass first and `validate` second;
/// the provided helpers wrap both so untrusted input degrades to `None`
/// while code-path construction stays loud.
pub trait ValidatedMessage: DeserializeOwned {
    /// Check the cross-field invariants the serde pass cannot express.
    fn validate(&self) -> Result<(), MessageError>;

    /// Loud construction finisher for struct-literal built messages.
    fn validated(self) -> Result<Self, MessageError> {
        self.validate()?;
        Ok(self)
    }

    /// Fail-soft decode: log the reason and return `None` on any failure.
    fn from_json_value(value: &JsonValue) -> Option<Self> {
        let message: Self = match serde_json::from_value(value.clone()) {
            Ok(message) => message,
            Err(err) => {
                warn!(error = %err, "message failed to decode");
                return None;
            }
        };
        if let Err(err) = message.validate() {
            warn!(error = %err, "message failed validation");
            return None;
        }
        Some(message)
    }
}

macro_rules! impl_has_envelope {
    ($($message:ty),+ $(,)?) => {
        $(impl HasEnvelope for $message {
            fn envelope(&self) -> &MessageEnvelope {
                &self.envelope
            }
        })+
    };
}

macro_rules! impl_has_result_fields {
    ($($message:ty),+ $(,)?) => {
        $(impl HasResultFields for $message {
            fn result_fields(&self) -> &ResultFields {
                &self.result
            }
        })+
    };
}

/// Global state of the simulation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SimulationState {
    /// The simulation is running and epochs are being processed.
    Running,
    /// The simulation is stopped; components shut down on receipt.
    Stopped,
}

impl fmt::Display for SimulationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => f.write_str("running"),
            Self::Stopped => f.write_str("stopped"),
        }
    }
}

impl FromStr for SimulationState {
    type Err = MessageError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input {
            "running" => Ok(Self::Running),
            "stopped" => Ok(Self::Stopped),
            other => Err(MessageError::State(other.to_owned())),
        }
    }
}

/// Simulation state broadcast from the simulation manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationStateMessage {
    /// Shared wire attributes.
    #[serde(flatten)]
    pub envelope: MessageEnvelope,
    /// The announced simulation state.
    #[serde(rename = "SimulationState")]
    pub simulation_state: SimulationState,
    /// Optional human-readable name of the simulation run.
    #[serde(rename = "Name", default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Optional description of the simulation run.
    #[serde(rename = "Description", default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl SimulationStateMessage {
    /// Type tag for simulation state messages.
    pub const MESSAGE_TYPE: &'static str = "SimState";
}

impl ValidatedMessage for SimulationStateMessage {
    fn validate(&self) -> Result<(), MessageError> {
        self.envelope.validate(Some(Self::MESSAGE_TYPE))
    }
}

/// Epoch start announcement from the simulation manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochMessage {
    /// Shared wire attributes.
    #[serde(flatten)]
    pub envelope: MessageEnvelope,
    /// Shared result attributes; `EpochNumber` names the started epoch.
    #[serde(flatten)]
    pub result: ResultFields,
    /// Start of the simulated time interval the epoch covers.
    #[serde(rename = "StartTime")]
    pub start_time: UtcTimestamp,
    /// End of the simulated time interval the epoch covers.
    #[serde(rename = "EndTime")]
    pub end_time: UtcTimestamp,
}

impl EpochMessage {
    /// Type tag for epoch messages.
    pub const MESSAGE_TYPE: &'static str = "Epoch";
}

impl ValidatedMessage for EpochMessage {
    fn validate(&self) -> Result<(), MessageError> {
        self.envelope.validate(Some(Self::MESSAGE_TYPE))?;
        self.result.validate()?;
        if self.start_time >= self.end_time {
            return Err(MessageError::Epoch(format!(
                "start time {} is not before end time {}",
                self.start_time, self.end_time
            )));
        }
        Ok(())
    }
}

/// Allowed values for the status message `Value` attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusValue {
    /// The component finished the epoch and is ready for the next one.
    Ready,
    /// The component hit an error while working on the epoch.
    Error,
}

/// Component status report for an epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusMessage {
    /// Shared wire attributes.
    #[serde(flatten)]
    pub envelope: MessageEnvelope,
    /// Shared result attributes.
    #[serde(flatten)]
    pub result: ResultFields,
    /// The reported status.
    #[serde(rename = "Value")]
    pub value: StatusValue,
    /// Free-form detail, usually carried with error statuses.
    #[serde(rename = "Description", default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl StatusMessage {
    /// Type tag for status messages.
    pub const MESSAGE_TYPE: &'static str = "Status";
}

impl ValidatedMessage for StatusMessage {
    fn validate(&self) -> Result<(), MessageError> {
        self.envelope.validate(Some(Self::MESSAGE_TYPE))?;
        self.result.validate()
    }
}

/// Error report from a component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorMessage {
    /// Shared wire attributes.
    #[serde(flatten)]
    pub envelope: MessageEnvelope,
    /// Shared result attributes.
    #[serde(flatten)]
    pub result: ResultFields,
    /// What went wrong.
    #[serde(rename = "Description")]
    pub description: String,
}

impl ErrorMessage {
    /// Type tag for error messages.
    pub const MESSAGE_TYPE: &'static str = "Error";
}

impl ValidatedMessage for ErrorMessage {
    fn validate(&self) -> Result<(), MessageError> {
        self.envelope.validate(Some(Self::MESSAGE_TYPE))?;
        self.result.validate()?;
        if self.description.trim().is_empty() {
            return Err(MessageError::Value(
                "error description must not be empty".to_owned(),
            ));
        }
        Ok(())
    }
}

/// Expected unit for resource real power.
pub const REAL_POWER_UNIT: &str = "kW";
/// Expected unit for resource reactive power.
pub const REACTIVE_POWER_UNIT: &str = "kV.A{r}";
/// Expected unit for resource state of charge.
pub const STATE_OF_CHARGE_UNIT: &str = "%";

/// Phases a one-phase resource can be connected to.
const ACCEPTED_NODE_VALUES: [i64; 3] = [1, 2, 3];

fn de_real_power<'de, D: Deserializer<'de>>(deserializer: D) -> Result<QuantityBlock, D::Error> {
    quantity_with_unit(deserializer, REAL_POWER_UNIT)
}

fn de_reactive_power<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<QuantityBlock, D::Error> {
    quantity_with_unit(deserializer, REACTIVE_POWER_UNIT)
}

fn de_state_of_charge<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<QuantityBlock>, D::Error> {
    optional_quantity_with_unit(deserializer, STATE_OF_CHARGE_UNIT)
}

/// Electrical state of one resource for an epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceStateMessage {
    /// Shared wire attributes.
    #[serde(flatten)]
    pub envelope: MessageEnvelope,
    /// Shared result attributes.
    #[serde(flatten)]
    pub result: ResultFields,
    /// Name of the bus the resource is connected to.
    #[serde(rename = "Bus")]
    pub bus: String,
    /// Real power of the resource. Bare numbers are wrapped as kW.
    #[serde(rename = "RealPower", deserialize_with = "de_real_power")]
    pub real_power: QuantityBlock,
    /// Reactive power of the resource. Bare numbers are wrapped as kV.A{r}.
    #[serde(rename = "ReactivePower", deserialize_with = "de_reactive_power")]
    pub reactive_power: QuantityBlock,
    /// Phase a one-phase resource is connected to; absent for three-phase
    /// resources.
    #[serde(rename = "Node", default, skip_serializing_if = "Option::is_none")]
    pub node: Option<i64>,
    /// State of charge of a storage resource, in percent.
    #[serde(
        rename = "StateOfCharge",
        default,
        deserialize_with = "de_state_of_charge",
        skip_serializing_if = "Option::is_none"
    )]
    pub state_of_charge: Option<QuantityBlock>,
}

impl ResourceStateMessage {
    /// Type tag for resource state messages.
    pub const MESSAGE_TYPE: &'static str = "ResourceState";
}

impl ValidatedMessage for ResourceStateMessage {
    fn validate(&self) -> Result<(), MessageError> {
        self.envelope.validate(Some(Self::MESSAGE_TYPE))?;
        self.result.validate()?;
        if self.bus.trim().is_empty() {
            return Err(MessageError::Value("bus must not be empty".to_owned()));
        }
        for (block, expected) in [
            (&self.real_power, REAL_POWER_UNIT),
            (&self.reactive_power, REACTIVE_POWER_UNIT),
        ] {
            block.validate()?;
            if !block.matches_unit(expected) {
                return Err(MessageError::Value(format!(
                    "unit '{}' where '{}' was expected",
                    block.unit_of_measure(),
                    expected
                )));
            }
        }
        if let Some(node) = self.node {
            if !ACCEPTED_NODE_VALUES.contains(&node) {
                return Err(MessageError::Value(format!(
                    "'{node}' is not a valid node: expected 1, 2 or 3"
                )));
            }
        }
        if let Some(state_of_charge) = &self.state_of_charge {
            state_of_charge.validate()?;
            if !state_of_charge.matches_unit(STATE_OF_CHARGE_UNIT) {
                return Err(MessageError::Value(format!(
                    "unit '{}' where '{}' was expected",
                    state_of_charge.unit_of_measure(),
                    STATE_OF_CHARGE_UNIT
                )));
            }
            if !(0.0..=100.0).contains(&state_of_charge.value()) {
                return Err(MessageError::Value(format!(
                    "state of charge {} is outside 0..100",
                    state_of_charge.value()
                )));
            }
        }
        Ok(())
    }
}

/// Result message with schema-validated shared attributes and otherwise
/// open-ended content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultMessage {
    /// Shared wire attributes.
    #[serde(flatten)]
    pub envelope: MessageEnvelope,
    /// Shared result attributes.
    #[serde(flatten)]
    pub result: ResultFields,
    /// All remaining attributes, preserved as-is.
    #[serde(flatten)]
    pub values: JsonMap<String, JsonValue>,
}

impl ResultMessage {
    /// Type tag for generic result messages.
    pub const MESSAGE_TYPE: &'static str = "Result";
}

impl ValidatedMessage for ResultMessage {
    fn validate(&self) -> Result<(), MessageError> {
        self.envelope.validate(Some(Self::MESSAGE_TYPE))?;
        self.result.validate()
    }
}

/// Schema-light catch-all for message types without a dedicated schema.
///
/// Only the envelope attributes are validated; everything else is kept
/// untouched in `general_attributes`. This is the extensibility escape
/// hatch for types the component does not know about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneralMessage {
    /// Shared wire attributes.
    #[serde(flatten)]
    pub envelope: MessageEnvelope,
    /// All non-envelope attributes, preserved without validation.
    #[serde(flatten)]
    pub general_attributes: JsonMap<String, JsonValue>,
}

impl GeneralMessage {
    /// Type tag under which untagged generic messages are produced.
    pub const MESSAGE_TYPE: &'static str = "General";
}

impl ValidatedMessage for GeneralMessage {
    fn validate(&self) -> Result<(), MessageError> {
        self.envelope.validate(None)
    }
}

impl_has_envelope!(
    SimulationStateMessage,
    EpochMessage,
    StatusMessage,
    ErrorMessage,
    ResourceStateMessage,
    ResultMessage,
    GeneralMessage,
);

impl_has_result_fields!(
    EpochMessage,
    StatusMessage,
    ErrorMessage,
    ResourceStateMessage,
    ResultMessage,
);

/// Tagged union over all platform message types.
///
/// Decoding dispatches on the JSON `Type` attribute through a static tag
/// table (see the codec module); unmapped tags land in
/// [`Message::General`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Message {
    /// Simulation state broadcast.
    SimulationState(SimulationStateMessage),
    /// Epoch start announcement.
    Epoch(EpochMessage),
    /// Component status report.
    Status(StatusMessage),
    /// Component error report.
    Error(ErrorMessage),
    /// Resource electrical state.
    ResourceState(ResourceStateMessage),
    /// Generic result message.
    Result(ResultMessage),
    /// Catch-all for unmapped type tags.
    General(GeneralMessage),
}

impl Message {
    /// The shared envelope of the wrapped message.
    pub fn envelope(&self) -> &MessageEnvelope {
        match self {
            Self::SimulationState(message) => &message.envelope,
            Self::Epoch(message) => &message.envelope,
            Self::Status(message) => &message.envelope,
            Self::Error(message) => &message.envelope,
            Self::ResourceState(message) => &message.envelope,
            Self::Result(message) => &message.envelope,
            Self::General(message) => &message.envelope,
        }
    }

    /// The wire type tag of the wrapped message.
    pub fn type_tag(&self) -> &str {
        &self.envelope().message_type
    }

    /// The shared result attributes, for the message kinds that carry them.
    pub fn result_fields(&self) -> Option<&ResultFields> {
        match self {
            Self::Epoch(message) => Some(&message.result),
            Self::Status(message) => Some(&message.result),
            Self::Error(message) => Some(&message.result),
            Self::ResourceState(message) => Some(&message.result),
            Self::Result(message) => Some(&message.result),
            Self::SimulationState(_) | Self::General(_) => None,
        }
    }
}

impl HasEnvelope for Message {
    fn envelope(&self) -> &MessageEnvelope {
        Message::envelope(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::MessageId;

    fn envelope(message_type: &str) -> MessageEnvelope {
        MessageEnvelope::try_new(
            message_type,
            "2023-01-01T00:00:00Z",
            "manager",
            MessageId::new("manager", 1).expect("valid id"),
        )
        .expect("valid envelope")
    }

    fn result_fields() -> ResultFields {
        ResultFields::try_new(1, vec![MessageId::new("manager", 1).expect("valid id")])
            .expect("valid fields")
    }

    #[test]
    fn epoch_messages_require_ordered_interval() {
        let start = UtcTimestamp::parse("2023-01-01T00:00:00Z").unwrap();
        let end = UtcTimestamp::parse("2023-01-01T01:00:00Z").unwrap();

        let message = EpochMessage {
            envelope: envelope(EpochMessage::MESSAGE_TYPE),
            result: result_fields(),
            start_time: start,
            end_time: end,
        };
        assert!(message.validate().is_ok());

        let inverted = EpochMessage {
            start_time: end,
            end_time: start,
            ..message
        };
        assert!(matches!(inverted.validate(), Err(MessageError::Epoch(_))));
    }

    #[test]
    fn type_tag_mismatch_fails_validation() {
        let message = SimulationStateMessage {
            envelope: envelope("Epoch"),
            simulation_state: SimulationState::Running,
            name: None,
            description: None,
        };
        assert!(matches!(message.validate(), Err(MessageError::Type(_))));
    }

    #[test]
    fn error_messages_require_a_description() {
        let message = ErrorMessage {
            envelope: envelope(ErrorMessage::MESSAGE_TYPE),
            result: result_fields(),
            description: " ".to_owned(),
        };
        assert!(matches!(message.validate(), Err(MessageError::Value(_))));
    }

    #[test]
    fn resource_state_checks_units_and_node() {
        let message = ResourceStateMessage {
            envelope: envelope(ResourceStateMessage::MESSAGE_TYPE),
            result: result_fields(),
            bus: "bus-4".to_owned(),
            real_power: QuantityBlock::try_new(10.0, REAL_POWER_UNIT).unwrap(),
            reactive_power: QuantityBlock::try_new(0.5, REACTIVE_POWER_UNIT).unwrap(),
            node: Some(2),
            state_of_charge: Some(QuantityBlock::try_new(80.0, STATE_OF_CHARGE_UNIT).unwrap()),
        };
        assert!(message.validate().is_ok());

        let wrong_unit = ResourceStateMessage {
            real_power: QuantityBlock::try_new(10.0, "MW").unwrap(),
            ..message.clone()
        };
        assert!(wrong_unit.validate().is_err());

        let bad_node = ResourceStateMessage {
            node: Some(4),
            ..message.clone()
        };
        assert!(bad_node.validate().is_err());

        let overcharged = ResourceStateMessage {
            state_of_charge: Some(QuantityBlock::try_new(130.0, STATE_OF_CHARGE_UNIT).unwrap()),
            ..message
        };
        assert!(overcharged.validate().is_err());
    }

    #[test]
    fn simulation_state_parses_from_strings() {
        assert_eq!(
            "running".parse::<SimulationState>().unwrap(),
            SimulationState::Running
        );
        assert!(matches!(
            "paused".parse::<SimulationState>(),
            Err(MessageError::State(_))
        ));
    }
}
