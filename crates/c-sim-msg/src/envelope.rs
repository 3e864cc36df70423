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

use serde::{Deserialize, Serialize};

use c_sim_common::time::UtcTimestamp;

use crate::MessageError;

/// Identifier of a single message: `<source process id>-<running number>`.
///
/// The running number is strictly increasing per source process; the
/// process part may itself contain dashes, so parsing splits on the last
/// one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MessageId {
    pub(crate) process: String,
    pub(crate) number: u64,
}

impl MessageId {
    /// Build a message id, validating the process part.
    pub fn new(process: &str, number: u64) -> Result<Self, MessageError> {
        if process.trim().is_empty() {
            return Err(MessageError::Id(format!(
                "'{process}-{number}' has an empty process part"
            )));
        }
        Ok(Self {
            process: process.to_owned(),
            number,
        })
    }

    /// The source process part of the id.
    pub fn process(&self) -> &str {
        &self.process
    }

    /// The running number part of the id.
    pub fn number(&self) -> u64 {
        self.number
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.process, self.number)
    }
}

impl FromStr for MessageId {
    type Err = MessageError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let Some((process, number)) = input.rsplit_once('-') else {
            return Err(MessageError::Id(input.to_owned()));
        };
        let number = number
            .parse::<u64>()
            .map_err(|_| MessageError::Id(input.to_owned()))?;
        Self::new(process, number).map_err(|_| MessageError::Id(input.to_owned()))
    }
}

impl TryFrom<String> for MessageId {
    type Error = MessageError;

    fn try_from(input: String) -> Result<Self, Self::Error> {
        input.parse()
    }
}

impl From<MessageId> for String {
    fn from(id: MessageId) -> Self {
        id.to_string()
    }
}

/// Shared wire attributes carried by every platform message.
///
/// Embedded (flattened) into each concrete message type instead of being
/// inherited; `Timestamp` is the only auto-generated attribute and defaults
/// to the current time when absent from incoming JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    /// The message type tag used for dispatch.
    #[serde(rename = "Type")]
    pub message_type: String,
    /// Identifier of the simulation run, a timestamp-shaped value.
    #[serde(rename = "SimulationId")]
    pub simulation_id: UtcTimestamp,
    /// Name of the process that sent the message.
    #[serde(rename = "SourceProcessId")]
    pub source_process_id: String,
    /// Unique identifier of this message.
    #[serde(rename = "MessageId")]
    pub message_id: MessageId,
    /// Creation time of the message.
    #[serde(rename = "Timestamp", default = "UtcTimestamp::now")]
    pub timestamp: UtcTimestamp,
}

impl MessageEnvelope {
    /// Build an envelope with the current time as timestamp.
    pub fn try_new(
        message_type: &str,
        simulation_id: &str,
        source_process_id: &str,
        message_id: MessageId,
    ) -> Result<Self, MessageError> {
        if message_type.trim().is_empty() {
            return Err(MessageError::Type("empty message type".to_owned()));
        }
        if source_process_id.trim().is_empty() {
            return Err(MessageError::Source("empty source process id".to_owned()));
        }
        Ok(Self {
            message_type: message_type.to_owned(),
            simulation_id: UtcTimestamp::parse(simulation_id)?,
            source_process_id: source_process_id.to_owned(),
            message_id,
            timestamp: UtcTimestamp::now(),
        })
    }

    /// Replace the auto-generated timestamp with an explicit one.
    pub fn with_timestamp(mut self, timestamp: UtcTimestamp) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub(crate) fn validate(&self, expected_type: Option<&str>) -> Result<(), MessageError> {
        if self.message_type.trim().is_empty() {
            return Err(MessageError::Type("empty message type".to_owned()));
        }
        if let Some(expected) = expected_type {
            if self.message_type != expected {
                return Err(MessageError::Type(format!(
                    "'{}' instead of '{}'",
                    self.message_type, expected
                )));
            }
        }
        if self.source_process_id.trim().is_empty() {
            return Err(MessageError::Source("empty source process id".to_owned()));
        }
        Ok(())
    }
}

/// Warning codes a result message may carry. Closed vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Warning {
    /// The result did not fully converge.
    #[serde(rename = "warning.convergence")]
    Convergence,
    /// An input value was suspicious.
    #[serde(rename = "warning.input")]
    Input,
    /// An input value was outside its expected range.
    #[serde(rename = "warning.input.range")]
    InputRange,
    /// An input value came from an unreliable source.
    #[serde(rename = "warning.input.unreliable")]
    InputUnreliable,
    /// An internal, non-fatal problem occurred while producing the result.
    #[serde(rename = "warning.internal")]
    Internal,
    /// Any other warning condition.
    #[serde(rename = "warning.other")]
    Other,
}

/// Attributes shared by all result-type messages, embedded via composition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultFields {
    /// The epoch this message belongs to. Epoch 0 is the initialization phase.
    #[serde(rename = "EpochNumber")]
    pub epoch_number: u64,
    /// The epoch in which the carried values last changed, if known.
    #[serde(
        rename = "LastUpdatedInEpoch",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub last_updated_in_epoch: Option<u64>,
    /// Ids of the inbound messages that causally justify this message.
    #[serde(rename = "TriggeringMessageIds")]
    pub triggering_message_ids: Vec<MessageId>,
    /// Warnings attached to the result; never an empty list.
    #[serde(rename = "Warnings", default, skip_serializing_if = "Option::is_none")]
    pub warnings: Option<Vec<Warning>>,
}

impl ResultFields {
    /// Build result fields with the mandatory attributes.
    pub fn try_new(
        epoch_number: u64,
        triggering_message_ids: Vec<MessageId>,
    ) -> Result<Self, MessageError> {
        let fields = Self {
            epoch_number,
            last_updated_in_epoch: None,
            triggering_message_ids,
            warnings: None,
        };
        fields.validate()?;
        Ok(fields)
    }

    pub(crate) fn validate(&self) -> Result<(), MessageError> {
        if self.triggering_message_ids.is_empty() {
            return Err(MessageError::Id(
                "triggering message ids must not be empty".to_owned(),
            ));
        }
        if matches!(&self.warnings, Some(warnings) if warnings.is_empty()) {
            return Err(MessageError::Value(
                "warnings must not be an empty list".to_owned(),
            ));
        }
        Ok(())
    }
}

/// Capability of carrying the shared message envelope.
pub trait HasEnvelope {
    /// Access the embedded envelope.
    fn envelope(&self) -> &MessageEnvelope;
}

/// Capability of carrying the result message attributes.
pub trait HasResultFields: HasEnvelope {
    /// Access the embedded result fields.
    fn result_fields(&self) -> &ResultFields;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_id_round_trips_through_strings() {
        let id: MessageId = "storage-unit-42".parse().expect("valid id");
        assert_eq!(id.process(), "storage-unit");
        assert_eq!(id.number(), 42);
        assert_eq!(id.to_string(), "storage-unit-42");
    }

    #[test]
    fn message_id_rejects_bad_patterns() {
        assert!("".parse::<MessageId>().is_err());
        assert!("no-number-".parse::<MessageId>().is_err());
        assert!("-17".parse::<MessageId>().is_err());
        assert!("plain".parse::<MessageId>().is_err());
        assert!("proc-1.5".parse::<MessageId>().is_err());
    }

    #[test]
    fn envelope_construction_fails_loudly() {
        let id = MessageId::new("manager", 1).expect("valid id");
        assert!(matches!(
            MessageEnvelope::try_new("", "2023-01-01T00:00:00Z", "manager", id.clone()),
            Err(MessageError::Type(_))
        ));
        assert!(matches!(
            MessageEnvelope::try_new("Epoch", "not-a-datetime", "manager", id.clone()),
            Err(MessageError::Date(_))
        ));
        assert!(matches!(
            MessageEnvelope::try_new("Epoch", "2023-01-01T00:00:00Z", "", id),
            Err(MessageError::Source(_))
        ));
    }

    #[test]
    fn missing_timestamp_is_generated() {
        let json = serde_json::json!({
            "Type": "SimState",
            "SimulationId": "2023-01-01T00:00:00.000Z",
            "SourceProcessId": "manager",
            "MessageId": "manager-1",
        });
        let envelope: MessageEnvelope = serde_json::from_value(json).expect("decode");
        assert!(envelope.timestamp >= UtcTimestamp::parse("2023-01-01T00:00:00Z").unwrap());
    }

    #[test]
    fn warnings_use_the_fixed_vocabulary() {
        let warning: Warning = serde_json::from_str("\"warning.input.range\"").expect("decode");
        assert_eq!(warning, Warning::InputRange);
        assert!(serde_json::from_str::<Warning>("\"warning.unknown\"").is_err());
    }

    #[test]
    fn result_fields_require_triggering_ids() {
        assert!(matches!(
            ResultFields::try_new(1, Vec::new()),
            Err(MessageError::Id(_))
        ));
        let fields = ResultFields::try_new(1, vec![MessageId::new("manager", 1).unwrap()])
            .expect("valid fields");
        assert_eq!(fields.epoch_number, 1);
        assert!(fields.warnings.is_none());
    }

    #[test]
    fn empty_warning_lists_fail_validation() {
        let mut fields = ResultFields::try_new(1, vec![MessageId::new("manager", 1).unwrap()])
            .expect("valid fields");
        fields.warnings = Some(Vec::new());
        assert!(matches!(fields.validate(), Err(MessageError::Value(_))));
    }
}
