//! Wire message decoding for the ingestion listener.
//!
//! A message is one text frame of the form
//! `sensorIdentifier,location,pm25,no2,o3,timestamp`. Fields are not escaped,
//! so a location containing a comma yields [`ParseError::FieldCount`] and the
//! message is dropped; producers must not send such locations.

use chrono::{DateTime, NaiveDateTime};

use crate::error::ParseError;
use crate::models::Pollutant;

/// Key used when a sensor identifier carries no usable trailing number.
///
/// Matches the producers' own fallback: an identifier they cannot number is
/// treated as the first sensor.
pub const DEFAULT_SENSOR_KEY: i64 = 1;

const FIELD_COUNT: usize = 6;

/// A decoded, validated wire message.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorMessage {
    // ---
    pub identifier: String,
    pub location: String,
    pub pm25: f64,
    pub no2: f64,
    pub o3: f64,
    pub timestamp: NaiveDateTime,
}

impl SensorMessage {
    /// Decode one frame. Surrounding whitespace on each field is ignored.
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        // ---
        let fields: Vec<&str> = line.trim().split(',').map(str::trim).collect();
        if fields.len() != FIELD_COUNT {
            return Err(ParseError::FieldCount {
                found: fields.len(),
            });
        }

        let identifier = non_empty(fields[0], "sensorIdentifier")?;
        let location = non_empty(fields[1], "location")?;
        let pm25 = parse_value(fields[2], Pollutant::Pm25)?;
        let no2 = parse_value(fields[3], Pollutant::No2)?;
        let o3 = parse_value(fields[4], Pollutant::O3)?;
        let timestamp = parse_timestamp(fields[5])?;

        Ok(SensorMessage {
            identifier: identifier.to_string(),
            location: location.to_string(),
            pm25,
            no2,
            o3,
            timestamp,
        })
    }

    /// The three readings in wire order.
    pub fn readings(&self) -> [(Pollutant, f64); 3] {
        // ---
        [
            (Pollutant::Pm25, self.pm25),
            (Pollutant::No2, self.no2),
            (Pollutant::O3, self.o3),
        ]
    }

    /// Sensor key for this message's identifier; see [`sensor_key`].
    pub fn sensor_key(&self) -> SensorKey {
        sensor_key(&self.identifier)
    }
}

/// Result of deriving a sensor key from a raw identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorKey {
    /// The identifier ended in a positive integer.
    Parsed(i64),
    /// No usable number; [`DEFAULT_SENSOR_KEY`] applies.
    Fallback,
}

impl SensorKey {
    pub fn value(self) -> i64 {
        // ---
        match self {
            SensorKey::Parsed(key) => key,
            SensorKey::Fallback => DEFAULT_SENSOR_KEY,
        }
    }
}

/// Derive the integer sensor key from an identifier such as `"Sensor3"`.
///
/// The key is the run of ASCII digits at the end of the identifier. A missing
/// run, a zero value, or a value that overflows `i64` gives
/// [`SensorKey::Fallback`].
pub fn sensor_key(identifier: &str) -> SensorKey {
    // ---
    let prefix_len = identifier
        .trim_end_matches(|c: char| c.is_ascii_digit())
        .len();
    let digits = &identifier[prefix_len..];

    match digits.parse::<i64>() {
        Ok(key) if key > 0 => SensorKey::Parsed(key),
        _ => SensorKey::Fallback,
    }
}

/// Parse an ISO-8601 timestamp.
///
/// Accepts `YYYY-MM-DDTHH:MM:SS[.f]` or the same with a space separator, taken
/// as-is, and RFC 3339 timestamps carrying an offset, converted to UTC.
pub fn parse_timestamp(raw: &str) -> Result<NaiveDateTime, ParseError> {
    // ---
    if let Ok(ts) = raw.parse::<NaiveDateTime>() {
        return Ok(ts);
    }
    if let Ok(ts) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f") {
        return Ok(ts);
    }
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.naive_utc())
        .map_err(|_| ParseError::InvalidTimestamp(raw.to_string()))
}

fn non_empty<'a>(raw: &'a str, field: &'static str) -> Result<&'a str, ParseError> {
    if raw.is_empty() {
        Err(ParseError::EmptyField { field })
    } else {
        Ok(raw)
    }
}

fn parse_value(raw: &str, pollutant: Pollutant) -> Result<f64, ParseError> {
    // ---
    let value = raw.parse::<f64>().map_err(|_| ParseError::InvalidValue {
        pollutant: pollutant.as_str(),
        raw: raw.to_string(),
    })?;

    if !value.is_finite() {
        return Err(ParseError::NonFiniteValue {
            pollutant: pollutant.as_str(),
            raw: raw.to_string(),
        });
    }
    Ok(value)
}
