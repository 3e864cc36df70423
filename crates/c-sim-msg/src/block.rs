//! ---
//! csim_section: "02-message-schema"
//! csim_subsection: "module"
//! csim_type: "source"
//! csim_scope: "code"
//! csim_description: "Message schema, value blocks, and protocol codecs."
//! csim_version: "v0.0.0-prealpha"
//! csim_owner: "tbd"
//! ---
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use c_sim_common::time::UtcTimestamp;

use crate::unit::UnitRegistry;
use crate::{MessageError, TimeSeriesError};

/// One physical measurement: a float value and its unit of measure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantityBlock {
    #[serde(rename = "Value")]
    value: f64,
    #[serde(rename = "UnitOfMeasure")]
    unit_of_measure: String,
}

impl QuantityBlock {
    /// Build a quantity block. The unit of measure must not be empty.
    pub fn try_new(value: f64, unit_of_measure: impl Into<String>) -> Result<Self, MessageError> {
        let block = Self {
            value,
            unit_of_measure: unit_of_measure.into(),
        };
        block.validate()?;
        Ok(block)
    }

    /// The measured value.
    pub fn value(&self) -> f64 {
        self.value
    }

    /// The unit of measure code.
    pub fn unit_of_measure(&self) -> &str {
        &self.unit_of_measure
    }

    /// Whether the block carries the given unit.
    pub fn matches_unit(&self, expected: &str) -> bool {
        self.unit_of_measure == expected
    }

    /// Convert a JSON value into a block for a field with a declared
    /// expected unit: a bare number is wrapped with the default unit, an
    /// object is decoded and its unit checked, anything else is rejected.
    pub fn from_value_with_unit(
        value: &JsonValue,
        expected_unit: &str,
    ) -> Result<Self, MessageError> {
        match value {
            JsonValue::Number(number) => {
                let value = number.as_f64().ok_or_else(|| {
                    MessageError::Value(format!("'{number}' cannot be represented as a float"))
                })?;
                Self::try_new(value, expected_unit)
            }
            JsonValue::Object(_) => {
                let block: QuantityBlock = serde_json::from_value(value.clone())
                    .map_err(|err| MessageError::Value(err.to_string()))?;
                block.validate()?;
                if !block.matches_unit(expected_unit) {
                    return Err(MessageError::Value(format!(
                        "unit '{}' where '{}' was expected",
                        block.unit_of_measure, expected_unit
                    )));
                }
                Ok(block)
            }
            other => Err(MessageError::Value(format!(
                "'{other}' is not a number or a quantity block"
            ))),
        }
    }

    pub(crate) fn validate(&self) -> Result<(), MessageError> {
        if self.unit_of_measure.trim().is_empty() {
            return Err(MessageError::Value(
                "quantity block unit of measure must not be empty".to_owned(),
            ));
        }
        Ok(())
    }
}

/// Deserializer for mandatory quantity fields with a declared expected unit.
pub(crate) fn quantity_with_unit<'de, D>(
    deserializer: D,
    expected_unit: &'static str,
) -> Result<QuantityBlock, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = JsonValue::deserialize(deserializer)?;
    QuantityBlock::from_value_with_unit(&value, expected_unit).map_err(serde::de::Error::custom)
}

/// Deserializer for optional quantity fields with a declared expected unit.
pub(crate) fn optional_quantity_with_unit<'de, D>(
    deserializer: D,
    expected_unit: &'static str,
) -> Result<Option<QuantityBlock>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = JsonValue::deserialize(deserializer)?;
    if value.is_null() {
        return Ok(None);
    }
    QuantityBlock::from_value_with_unit(&value, expected_unit)
        .map(Some)
        .map_err(serde::de::Error::custom)
}

/// A homogeneously typed list of series values.
///
/// The untagged representation means a JSON list with mixed value kinds
/// fails to decode, which is exactly the schema rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SeriesValues {
    /// Boolean samples.
    Boolean(Vec<bool>),
    /// Integer samples.
    Integer(Vec<i64>),
    /// Floating point samples.
    Float(Vec<f64>),
    /// Text samples.
    Text(Vec<String>),
}

impl SeriesValues {
    /// Number of samples in the series.
    pub fn len(&self) -> usize {
        match self {
            Self::Boolean(values) => values.len(),
            Self::Integer(values) => values.len(),
            Self::Float(values) => values.len(),
            Self::Text(values) => values.len(),
        }
    }

    /// Whether the series holds no samples.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One named value series inside a [`TimeSeriesBlock`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesAttribute {
    #[serde(rename = "UnitOfMeasure")]
    unit_of_measure: String,
    #[serde(rename = "Values")]
    values: SeriesValues,
}

impl TimeSeriesAttribute {
    /// Build a series attribute. The unit of measure must not be empty.
    pub fn try_new(
        unit_of_measure: impl Into<String>,
        values: SeriesValues,
    ) -> Result<Self, TimeSeriesError> {
        let attribute = Self {
            unit_of_measure: unit_of_measure.into(),
            values,
        };
        attribute.validate()?;
        Ok(attribute)
    }

    /// The unit of measure code for the series.
    pub fn unit_of_measure(&self) -> &str {
        &self.unit_of_measure
    }

    /// The series samples.
    pub fn values(&self) -> &SeriesValues {
        &self.values
    }

    /// Number of samples in the series.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the series holds no samples.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Check the unit of measure against an explicitly supplied vocabulary.
    /// Without a registry any non-empty unit string is accepted.
    pub fn validate_units(&self, registry: Option<&UnitRegistry>) -> Result<(), TimeSeriesError> {
        self.validate()?;
        if let Some(registry) = registry {
            if !registry.is_valid(&self.unit_of_measure) {
                return Err(TimeSeriesError::Unit(format!(
                    "'{}' is not a known unit code",
                    self.unit_of_measure
                )));
            }
        }
        Ok(())
    }

    pub(crate) fn validate(&self) -> Result<(), TimeSeriesError> {
        if self.unit_of_measure.trim().is_empty() {
            return Err(TimeSeriesError::Unit(
                "series unit of measure must not be empty".to_owned(),
            ));
        }
        Ok(())
    }
}

/// A set of named value series sharing one timestamp index.
///
/// Invariant: every series holds exactly as many samples as there are
/// entries in the time index. The invariant is checked at construction and
/// re-checked whenever the index or a series is replaced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesBlock {
    #[serde(rename = "TimeIndex")]
    time_index: Vec<UtcTimestamp>,
    #[serde(rename = "Series")]
    series: IndexMap<String, TimeSeriesAttribute>,
}

impl TimeSeriesBlock {
    /// Build a block from a time index and a non-empty series map.
    pub fn try_new(
        time_index: Vec<UtcTimestamp>,
        series: IndexMap<String, TimeSeriesAttribute>,
    ) -> Result<Self, TimeSeriesError> {
        let block = Self { time_index, series };
        block.validate()?;
        Ok(block)
    }

    /// The shared timestamp index.
    pub fn time_index(&self) -> &[UtcTimestamp] {
        &self.time_index
    }

    /// All value series, keyed by name.
    pub fn series(&self) -> &IndexMap<String, TimeSeriesAttribute> {
        &self.series
    }

    /// Look up one series by name.
    pub fn get_single_series(&self, series_name: &str) -> Option<&TimeSeriesAttribute> {
        self.series.get(series_name)
    }

    /// Replace the time index; every existing series must match its length.
    pub fn set_time_index(&mut self, time_index: Vec<UtcTimestamp>) -> Result<(), TimeSeriesError> {
        for (name, attribute) in &self.series {
            if attribute.len() != time_index.len() {
                return Err(TimeSeriesError::Value(format!(
                    "series '{}' holds {} values for a time index of length {}",
                    name,
                    attribute.len(),
                    time_index.len()
                )));
            }
        }
        self.time_index = time_index;
        Ok(())
    }

    /// Add a new series or replace an existing one.
    pub fn add_series(
        &mut self,
        series_name: &str,
        attribute: TimeSeriesAttribute,
    ) -> Result<(), TimeSeriesError> {
        if series_name.trim().is_empty() {
            return Err(TimeSeriesError::Value(
                "series name must not be empty".to_owned(),
            ));
        }
        attribute.validate()?;
        if attribute.len() != self.time_index.len() {
            return Err(TimeSeriesError::Value(format!(
                "series '{}' holds {} values for a time index of length {}",
                series_name,
                attribute.len(),
                self.time_index.len()
            )));
        }
        self.series.insert(series_name.to_owned(), attribute);
        Ok(())
    }

    /// Fail-soft decode of an untrusted JSON value.
    pub fn from_json(value: &JsonValue) -> Option<Self> {
        let block: Self = match serde_json::from_value(value.clone()) {
            Ok(block) => block,
            Err(err) => {
                tracing::warn!(error = %err, "time series block failed to decode");
                return None;
            }
        };
        if let Err(err) = block.validate() {
            tracing::warn!(error = %err, "time series block failed validation");
            return None;
        }
        Some(block)
    }

    pub(crate) fn validate(&self) -> Result<(), TimeSeriesError> {
        if self.series.is_empty() {
            return Err(TimeSeriesError::Value(
                "time series block must hold at least one series".to_owned(),
            ));
        }
        for (name, attribute) in &self.series {
            if name.trim().is_empty() {
                return Err(TimeSeriesError::Value(
                    "series name must not be empty".to_owned(),
                ));
            }
            attribute.validate()?;
            if attribute.len() != self.time_index.len() {
                return Err(TimeSeriesError::Value(format!(
                    "series '{}' holds {} values for a time index of length {}",
                    name,
                    attribute.len(),
                    self.time_index.len()
                )));
            }
        }
        Ok(())
    }
}
