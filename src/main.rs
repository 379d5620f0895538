//! Application entry point for the `airq-collector` service.
//!
//! This binary orchestrates the full startup sequence for the collector,
//! including:
//! - Loading configuration from environment variables or `.env`
//! - Initializing structured logging/tracing
//! - Opening the SQLite pool and creating the schema if it does not exist
//! - Binding the ingestion listener and the Axum HTTP server
//! - Running both until Ctrl-C / SIGTERM
//!
//! # Environment Variables
//! - `DATABASE_URL` (optional) – SQLite connection string (default: `sqlite://sensors.db`)
//! - `DB_POOL_MAX` (optional) – maximum number of DB connections (default: 5)
//! - `HTTP_ADDR` / `INGEST_ADDR` (optional) – bind addresses
//! - `HTTP_REQUEST_TIMEOUT_SECS` (optional) – per-request timeout (default: 30)
//! - `LOG_LEVEL` (optional) – log verbosity (default: `debug`)
//! - `LOG_SPAN_EVENTS` (optional) – span event mode for tracing
use std::{env, io::IsTerminal};

use dotenvy::dotenv;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

use anyhow::Result;

use airq_collector::{config, Collector};

// ---

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    dotenv().ok();
    init_tracing();

    let cfg = config::load_from_env()?;
    cfg.log_config();

    let collector = Collector::bind(&cfg).await?;

    let shutdown = CancellationToken::new();
    tokio::spawn(cancel_on_signal(shutdown.clone()));

    collector.serve(shutdown).await
}

// ---

/// Cancel `shutdown` on Ctrl-C, or SIGTERM on Unix.
async fn cancel_on_signal(shutdown: CancellationToken) {
    // ---
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Ctrl-C received, shutting down"),
        _ = terminate => tracing::info!("SIGTERM received, shutting down"),
        _ = shutdown.cancelled() => return,
    }
    shutdown.cancel();
}

/// Initialize the global tracing subscriber for structured logging.
///
/// This function configures the [`tracing_subscriber`] with:
/// - Log target, file, and line number output enabled
/// - Color output controlled by TTY detection and `FORCE_COLOR` env var:
///   - `FORCE_COLOR=1|true|yes`: force colors on
///   - `FORCE_COLOR=0|false|no`: force colors off
///   - unset or other values: auto-detect TTY
/// - Span event emission mode controlled by the `LOG_SPAN_EVENTS` env var:
///   - `"full"`       : emit ENTER, EXIT, and CLOSE events with timing
///   - `"enter_exit"` : emit ENTER and EXIT only
///   - unset or other values: emit CLOSE events only (default)
/// - Log level controlled by `RUST_LOG`, else the `LOG_LEVEL` env var
///
/// Call once at startup, before any logging.
fn init_tracing() {
    // ---
    let span_events = match env::var("LOG_SPAN_EVENTS").as_deref() {
        Ok("full") => FmtSpan::FULL,
        Ok("enter_exit") => FmtSpan::ENTER | FmtSpan::EXIT,
        _ => FmtSpan::CLOSE,
    };

    let use_color = match env::var("FORCE_COLOR").as_deref() {
        Ok("1") | Ok("true") | Ok("yes") => true,
        Ok("0") | Ok("false") | Ok("no") => false,
        _ => std::io::stdout().is_terminal(),
    };

    // Use RUST_LOG if available, otherwise fall back to LOG_LEVEL
    let env_filter = if env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match env::var("LOG_LEVEL").ok().as_deref() {
            Some("trace") => "trace",
            Some("debug") => "debug",
            Some("info") => "info",
            Some("warn") => "warn",
            Some("error") => "error",
            _ => "debug",
        };
        EnvFilter::new(format!("{level},sqlx::query=warn"))
    };

    tracing_subscriber::fmt()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(span_events)
        .with_env_filter(env_filter)
        .with_ansi(use_color)
        .compact()
        .init();
}
