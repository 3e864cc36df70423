//! ---
//! csim_section: "01-core-functionality"
//! csim_subsection: "module"
//! csim_type: "source"
//! csim_scope: "code"
//! csim_description: "Shared primitives and utilities for the component runtime."
//! csim_version: "v0.0.0-prealpha"
//! csim_owner: "tbd"
//! ---
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Timelike, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Wire format for all platform datetimes: ISO 8601 with exactly three
/// fractional digits and a trailing `Z`.
const WIRE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

/// Fallback parse formats for naive datetime strings, assumed to be UTC.
const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S"];

/// Error raised when a string cannot be interpreted as a platform datetime.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("'{0}' is not a valid ISO 8601 datetime")]
pub struct InvalidTimestamp(pub String);

/// UTC timestamp at millisecond precision.
///
/// Every datetime carried on the message bus is normalised through this
/// type: sub-millisecond digits are truncated and the serialised form is
/// always `YYYY-MM-DDTHH:MM:SS.mmmZ`, regardless of the offset the input
/// carried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UtcTimestamp(DateTime<Utc>);

impl UtcTimestamp {
    /// Current time, truncated to millisecond precision.
    pub fn now() -> Self {
        Self::from_datetime(Utc::now())
    }

    /// Wrap an arbitrary [`DateTime`], truncating to millisecond precision.
    pub fn from_datetime(datetime: DateTime<Utc>) -> Self {
        let millis = datetime.timestamp_subsec_millis();
        Self(
            datetime
                .with_nanosecond(millis * 1_000_000)
                .unwrap_or(datetime),
        )
    }

    /// Parse a datetime string.
    ///
    /// RFC 3339 strings with any offset are normalised to UTC; strings
    /// without offset information are assumed to already be UTC.
    pub fn parse(input: &str) -> Result<Self, InvalidTimestamp> {
        if let Ok(datetime) = DateTime::parse_from_rfc3339(input) {
            return Ok(Self::from_datetime(datetime.with_timezone(&Utc)));
        }
        for format in NAIVE_FORMATS {
            if let Ok(naive) = NaiveDateTime::parse_from_str(input, format) {
                return Ok(Self::from_datetime(naive.and_utc()));
            }
        }
        Err(InvalidTimestamp(input.to_owned()))
    }

    /// Access the underlying [`DateTime`].
    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }

    /// The serialised wire representation.
    pub fn to_wire_string(&self) -> String {
        self.0.format(WIRE_FORMAT).to_string()
    }
}

impl fmt::Display for UtcTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(WIRE_FORMAT))
    }
}

impl FromStr for UtcTimestamp {
    type Err = InvalidTimestamp;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        Self::parse(input)
    }
}

impl From<DateTime<Utc>> for UtcTimestamp {
    fn from(datetime: DateTime<Utc>) -> Self {
        Self::from_datetime(datetime)
    }
}

impl Serialize for UtcTimestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for UtcTimestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_with_exactly_three_fraction_digits() {
        let stamp = UtcTimestamp::parse("2023-11-05T14:00:00Z").expect("valid datetime");
        assert_eq!(stamp.to_wire_string(), "2023-11-05T14:00:00.000Z");

        let fractional = UtcTimestamp::parse("2023-11-05T14:00:00.5Z").expect("valid datetime");
        assert_eq!(fractional.to_wire_string(), "2023-11-05T14:00:00.500Z");
    }

    #[test]
    fn truncates_sub_millisecond_digits() {
        let stamp = UtcTimestamp::parse("2023-11-05T14:00:00.123456Z").expect("valid datetime");
        assert_eq!(stamp.to_wire_string(), "2023-11-05T14:00:00.123Z");
    }

    #[test]
    fn normalises_offsets_to_utc() {
        let stamp = UtcTimestamp::parse("2023-11-05T16:30:00+02:00").expect("valid datetime");
        assert_eq!(stamp.to_wire_string(), "2023-11-05T14:30:00.000Z");
    }

    #[test]
    fn naive_strings_are_assumed_utc() {
        let stamp = UtcTimestamp::parse("2023-11-05T14:00:00.250").expect("valid datetime");
        assert_eq!(stamp.to_wire_string(), "2023-11-05T14:00:00.250Z");
    }

    #[test]
    fn rejects_garbage() {
        assert!(UtcTimestamp::parse("not-a-datetime").is_err());
        assert!(UtcTimestamp::parse("2023-13-40T99:00:00Z").is_err());
    }

    #[test]
    fn serde_round_trip_preserves_value() {
        let stamp = UtcTimestamp::parse("2023-11-05T14:00:00.123Z").expect("valid datetime");
        let json = serde_json::to_string(&stamp).expect("serialize");
        assert_eq!(json, "\"2023-11-05T14:00:00.123Z\"");
        let back: UtcTimestamp = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, stamp);
    }
}
