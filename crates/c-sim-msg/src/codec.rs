//! ---
//! csim_section: "02-message-schema"
//! csim_subsection: "module"
//! csim_type: "source"
//! csim_scope: "code"
//! csim_description: "Message schema, value blocks, and protocol codecs."
//! csim_version: "v0.0.0-prealpha"
//! csim_owner: "tbd"
//! ---
use serde_json::Value as JsonValue;
use tracing::warn;

use crate::types::{
    EpochMessage, ErrorMessage, GeneralMessage, Message, ResourceStateMessage, ResultMessage,
    SimulationStateMessage, StatusMessage, ValidatedMessage,
};
use crate::MessageError;

/// Encoding used for all message payloads on the wire.
pub const MESSAGE_ENCODING: &str = "UTF-8";

impl Message {
    /// Decode a JSON value into a typed message by its `Type` attribute.
    ///
    /// Fail-soft: any structural or semantic validation failure is logged
    /// and yields `None`. A missing or unmapped tag falls back to the
    /// schema-light [`GeneralMessage`].
    pub fn from_json_value(value: &JsonValue) -> Option<Message> {
        let Some(attributes) = value.as_object() else {
            warn!("message payload is not a JSON object");
            return None;
        };
        let tag = attributes
            .get("Type")
            .and_then(JsonValue::as_str)
            .unwrap_or_default();
        match tag {
            SimulationStateMessage::MESSAGE_TYPE => {
                SimulationStateMessage::from_json_value(value).map(Message::SimulationState)
            }
            EpochMessage::MESSAGE_TYPE => EpochMessage::from_json_value(value).map(Message::Epoch),
            StatusMessage::MESSAGE_TYPE => {
                StatusMessage::from_json_value(value).map(Message::Status)
            }
            ErrorMessage::MESSAGE_TYPE => ErrorMessage::from_json_value(value).map(Message::Error),
            ResourceStateMessage::MESSAGE_TYPE => {
                ResourceStateMessage::from_json_value(value).map(Message::ResourceState)
            }
            ResultMessage::MESSAGE_TYPE => {
                ResultMessage::from_json_value(value).map(Message::Result)
            }
            _ => GeneralMessage::from_json_value(value).map(Message::General),
        }
    }

    /// Encode the message as a JSON value. Optional attributes holding no
    /// value are omitted.
    pub fn to_json_value(&self) -> Result<JsonValue, MessageError> {
        serde_json::to_value(self).map_err(|err| MessageError::Value(err.to_string()))
    }

    /// Encode the message as UTF-8 JSON bytes for publishing.
    pub fn to_bytes(&self) -> Result<Vec<u8>, MessageError> {
        serde_json::to_vec(self).map_err(|err| MessageError::Value(err.to_string()))
    }
}

/// Outcome of decoding untrusted bytes from the bus.
///
/// Decoding never raises: input that fails schema validation is passed on
/// as plain JSON, and input that is not JSON at all is passed on as text,
/// so downstream handlers decide how far to degrade.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedPayload {
    /// The payload decoded into a schema-valid typed message.
    Message(Box<Message>),
    /// The payload was valid JSON but failed schema validation.
    Json(JsonValue),
    /// The payload was not valid JSON.
    Text(String),
}

impl DecodedPayload {
    /// Decode a raw payload received from the bus.
    pub fn from_bytes(payload: &[u8]) -> DecodedPayload {
        let text = match std::str::from_utf8(payload) {
            Ok(text) => text,
            Err(err) => {
                warn!(error = %err, "received payload is not valid UTF-8");
                return DecodedPayload::Text(String::from_utf8_lossy(payload).into_owned());
            }
        };
        let json: JsonValue = match serde_json::from_str(text) {
            Ok(json) => json,
            Err(err) => {
                warn!(error = %err, "received payload could not be decoded into JSON");
                return DecodedPayload::Text(text.to_owned());
            }
        };
        match Message::from_json_value(&json) {
            Some(message) => DecodedPayload::Message(Box::new(message)),
            None => DecodedPayload::Json(json),
        }
    }

    /// The typed message, when decoding got that far.
    pub fn as_message(&self) -> Option<&Message> {
        match self {
            Self::Message(message) => Some(message),
            _ => None,
        }
    }
}
