//! `airq-collector`: collector service for air-quality sensors.
//!
//! Sensors push comma-separated readings over TCP; the ingestion listener
//! stores them in SQLite and the Query API serves them as JSON.
//!
//! This crate root is the module gateway (EMBP). Sibling modules import what
//! they need from here (`crate::Storage`, `crate::Config`, ...) instead of
//! reaching into each other, so moving a type only touches this file.

pub mod app;
pub mod config;
pub mod error;
pub mod ingest;
pub mod message;
pub mod models;
pub mod routes;
pub mod schema;
pub mod storage;

pub use app::Collector;
pub use config::Config;
pub use error::{BindError, ParseError, StorageError};
pub use message::{sensor_key, SensorKey, SensorMessage, DEFAULT_SENSOR_KEY};
pub use models::{Measurement, Pollutant, Sensor};
pub use storage::Storage;
