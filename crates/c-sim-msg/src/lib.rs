//! ---
//! csim_section: "02-message-schema"
//! csim_subsection: "module"
//! csim_type: "source"
//! csim_scope: "code"
//! csim_description: "Message schema, value blocks, and protocol codecs."
//! csim_version: "v0.0.0-prealpha"
//! csim_owner: "tbd"
//! ---
#![warn(missing_docs)]

//! Typed message schema for the C-SIM co-simulation platform.
//!
//! Messages are JSON objects dispatched by their `Type` attribute. Decoding
//! untrusted bytes is fail-soft (see [`DecodedPayload`]); building messages
//! from code fails loudly with a [`MessageError`].

pub mod block;
pub mod codec;
pub mod envelope;
pub mod generator;
pub mod logging;
pub mod types;
pub mod unit;

use c_sim_common::time::InvalidTimestamp;

/// Errors raised by direct, code-path construction of messages.
///
/// Decoding untrusted input never surfaces these: the decode entry points
/// log the reason and return `None` or a fallback representation instead.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MessageError {
    /// A datetime attribute could not be interpreted.
    #[error("invalid datetime: {0}")]
    Date(String),
    /// A message id did not follow the `<process>-<number>` pattern.
    #[error("invalid message id: {0}")]
    Id(String),
    /// The source process id was missing or empty.
    #[error("invalid source process id: {0}")]
    Source(String),
    /// The type tag was empty or did not match the expected message type.
    #[error("invalid message type: {0}")]
    Type(String),
    /// An epoch attribute violated its invariants.
    #[error("invalid epoch value: {0}")]
    Epoch(String),
    /// A type-specific attribute failed validation.
    #[error("invalid attribute value: {0}")]
    Value(String),
    /// A simulation state outside the allowed vocabulary.
    #[error("invalid simulation state: {0}")]
    State(String),
    /// A time series block failed validation.
    #[error(transparent)]
    TimeSeries(#[from] TimeSeriesError),
}

impl From<InvalidTimestamp> for MessageError {
    fn from(err: InvalidTimestamp) -> Self {
        Self::Date(err.0)
    }
}

/// Errors raised when constructing or mutating time series blocks.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TimeSeriesError {
    /// A time index entry was not a valid datetime.
    #[error("invalid time series datetime: {0}")]
    Date(String),
    /// A series carried a missing or unknown unit of measure.
    #[error("invalid time series unit: {0}")]
    Unit(String),
    /// A series value list violated the block invariants.
    #[error("invalid time series value: {0}")]
    Value(String),
}

pub use block::{QuantityBlock, SeriesValues, TimeSeriesAttribute, TimeSeriesBlock};
pub use codec::DecodedPayload;
pub use envelope::{
    HasEnvelope, HasResultFields, MessageEnvelope, MessageId, ResultFields, Warning,
};
pub use generator::MessageGenerator;
pub use logging::{log_message, MessageDirection, MessagingMetricsExporter};
pub use types::{
    EpochMessage, ErrorMessage, GeneralMessage, Message, ResourceStateMessage, ResultMessage,
    SimulationState, SimulationStateMessage, StatusMessage, StatusValue, ValidatedMessage,
    REACTIVE_POWER_UNIT, REAL_POWER_UNIT, STATE_OF_CHARGE_UNIT,
};
pub use unit::UnitRegistry;
