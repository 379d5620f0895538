//! Error taxonomy for the collector.
//!
//! - [`ParseError`]: an inbound message could not be decoded; it is dropped.
//! - [`StorageError`]: a store operation failed; the affected write is dropped
//!   or the request answers 500.
//! - [`BindError`]: a listening socket could not be acquired; startup aborts.
//!
//! "Not found" is never an error here: lookups return `Option` and list
//! queries return an empty `Vec`.

use std::{io, net::SocketAddr};

use thiserror::Error;

/// A wire message that does not match
/// `sensorIdentifier,location,pm25,no2,o3,timestamp`.
#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    #[error("message is not valid UTF-8")]
    InvalidUtf8,

    #[error("expected 6 comma-separated fields, found {found}")]
    FieldCount { found: usize },

    #[error("field `{field}` is empty")]
    EmptyField { field: &'static str },

    #[error("{pollutant} value `{raw}` is not a number")]
    InvalidValue { pollutant: &'static str, raw: String },

    #[error("{pollutant} value `{raw}` is not finite")]
    NonFiniteValue { pollutant: &'static str, raw: String },

    #[error("timestamp `{0}` is not ISO-8601")]
    InvalidTimestamp(String),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sensor {0} does not exist")]
    UnknownSensor(i64),

    #[error("measurement value {0} is not finite")]
    NonFiniteValue(f64),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Fatal at startup: the socket for `what` could not be bound.
#[derive(Debug, Error)]
#[error("failed to bind {what} socket on {addr}: {source}")]
pub struct BindError {
    pub what: &'static str,
    pub addr: SocketAddr,
    #[source]
    pub source: io::Error,
}
