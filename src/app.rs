//! Process bootstrap: storage, ingestion listener and Query API wired together.
//!
//! [`Collector::bind`] does everything that can fail at startup (pool, schema,
//! both sockets), so a taken port aborts before any task is spawned.
//! [`Collector::serve`] then runs the listener as a background task and the
//! HTTP server in the foreground until the shared token is cancelled.

use std::{net::SocketAddr, time::Duration};

use anyhow::{anyhow, Result};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::error::BindError;
use crate::{ingest, routes, schema, storage, Config, Storage};

// ---

pub struct Collector {
    storage: Storage,
    ingest_listener: TcpListener,
    http_listener: TcpListener,
    request_timeout: Duration,
}

impl Collector {
    /// Open the store, create the schema and bind both sockets.
    pub async fn bind(cfg: &Config) -> Result<Self> {
        // ---
        tracing::info!("Opening database: {}", cfg.db_url);

        let pool = storage::connect(&cfg.db_url, cfg.db_pool_max)
            .await
            .map_err(|e| anyhow!("Failed to open database '{}': {}", cfg.db_url, e))?;

        schema::create_schema(&pool).await?;
        tracing::info!("Database schema ready");

        let ingest_listener = ingest::bind(cfg.ingest_addr).await?;
        let http_listener = TcpListener::bind(cfg.http_addr)
            .await
            .map_err(|source| BindError {
                what: "http",
                addr: cfg.http_addr,
                source,
            })?;

        Ok(Self {
            storage: Storage::new(pool),
            ingest_listener,
            http_listener,
            request_timeout: cfg.http_request_timeout,
        })
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn ingest_addr(&self) -> Result<SocketAddr> {
        Ok(self.ingest_listener.local_addr()?)
    }

    pub fn http_addr(&self) -> Result<SocketAddr> {
        Ok(self.http_listener.local_addr()?)
    }

    /// Run until `shutdown` is cancelled or either side stops.
    ///
    /// The HTTP server drains in-flight requests; the listener finishes the
    /// message it is writing. Each row is its own transaction, so stopping
    /// between rows leaves the store consistent.
    pub async fn serve(self, shutdown: CancellationToken) -> Result<()> {
        // ---
        let Collector {
            storage,
            ingest_listener,
            http_listener,
            request_timeout,
        } = self;

        let ingest_task = tokio::spawn(ingest::run(
            ingest_listener,
            storage.clone(),
            shutdown.clone(),
        ));

        let app = routes::router(storage.clone(), request_timeout);
        tracing::info!("Query API listening on {}", http_listener.local_addr()?);

        let served = axum::serve(http_listener, app)
            .with_graceful_shutdown(shutdown.clone().cancelled_owned())
            .await;

        shutdown.cancel();
        let joined = ingest_task.await;
        storage.pool().close().await;
        tracing::info!("Collector stopped");

        served?;
        joined.map_err(|e| anyhow!("Ingestion listener task failed: {}", e))?;
        Ok(())
    }
}
