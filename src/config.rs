//! Configuration loader for the `airq-collector` service.
//!
//! This module centralizes all runtime configuration values and their defaults,
//! loading from environment variables (with optional `.env` file support
//! provided by the caller). Nothing else in the crate reads `env::var` for
//! service settings.
//!
use std::{env, net::SocketAddr, time::Duration};

use anyhow::{anyhow, Result};

/// Parse an optional integer environment variable with a default value.
macro_rules! parse_env_u32 {
    ($var_name:expr, $default:expr) => {
        env::var($var_name)
            .ok()
            .map(|v| v.parse::<u32>())
            .transpose()
            .map_err(|e| anyhow!("Invalid {}: {}", $var_name, e))?
            .unwrap_or($default)
    };
}

/// Parse an optional socket address environment variable with a default value.
macro_rules! parse_env_addr {
    ($var_name:expr, $default:expr) => {
        env::var($var_name)
            .unwrap_or_else(|_| $default.to_string())
            .parse::<SocketAddr>()
            .map_err(|e| anyhow!("Invalid {}: {}", $var_name, e))?
    };
}

/// Strongly typed application configuration.
///
/// All fields are immutable after loading, ensuring a consistent configuration
/// snapshot for the lifetime of the application.
#[derive(Debug, Clone)]
pub struct Config {
    // ---
    /// SQLite connection string, e.g. `sqlite://sensors.db`.
    pub db_url: String,

    /// Maximum number of database connections in the pool.
    pub db_pool_max: u32,

    /// Address the Query API binds to.
    pub http_addr: SocketAddr,

    /// Address the ingestion listener binds to.
    pub ingest_addr: SocketAddr,

    /// Upper bound on the time spent serving one HTTP request.
    pub http_request_timeout: Duration,
}

pub const DEFAULT_DB_URL: &str = "sqlite://sensors.db";
pub const DEFAULT_HTTP_ADDR: &str = "0.0.0.0:5000";
pub const DEFAULT_INGEST_ADDR: &str = "0.0.0.0:6000";

/// Load configuration from environment variables with defaults.
///
/// Optional:
/// - `DATABASE_URL` – SQLite connection string (default: `sqlite://sensors.db`)
/// - `DB_POOL_MAX` – max DB connections (default: 5)
/// - `HTTP_ADDR` – Query API bind address (default: `0.0.0.0:5000`)
/// - `INGEST_ADDR` – ingestion listener bind address (default: `0.0.0.0:6000`)
/// - `HTTP_REQUEST_TIMEOUT_SECS` – per-request timeout (default: 30)
///
/// Returns an error if any variable is present but invalid.
pub fn load_from_env() -> Result<Config> {
    // ---
    let db_url = env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DB_URL.to_string());
    let db_pool_max = parse_env_u32!("DB_POOL_MAX", 5);
    let http_addr = parse_env_addr!("HTTP_ADDR", DEFAULT_HTTP_ADDR);
    let ingest_addr = parse_env_addr!("INGEST_ADDR", DEFAULT_INGEST_ADDR);
    let timeout_secs = parse_env_u32!("HTTP_REQUEST_TIMEOUT_SECS", 30);

    if db_pool_max == 0 {
        return Err(anyhow!("Invalid DB_POOL_MAX: must be at least 1"));
    }
    if http_addr == ingest_addr {
        return Err(anyhow!(
            "HTTP_ADDR and INGEST_ADDR must differ (both are {})",
            http_addr
        ));
    }

    Ok(Config {
        db_url,
        db_pool_max,
        http_addr,
        ingest_addr,
        http_request_timeout: Duration::from_secs(u64::from(timeout_secs)),
    })
}

impl Config {
    /// Log the loaded configuration for debugging purposes.
    pub fn log_config(&self) {
        // ---
        tracing::info!("Configuration loaded:");
        tracing::info!("  DATABASE_URL              : {}", self.db_url);
        tracing::info!("  DB_POOL_MAX               : {}", self.db_pool_max);
        tracing::info!("  HTTP_ADDR                 : {}", self.http_addr);
        tracing::info!("  INGEST_ADDR               : {}", self.ingest_addr);
        tracing::info!(
            "  HTTP_REQUEST_TIMEOUT_SECS : {}",
            self.http_request_timeout.as_secs()
        );
    }
}
