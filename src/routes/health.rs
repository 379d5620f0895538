// src/routes/health.rs
//! Liveness endpoints for the collector.
//!
//! `/health` is the probe used by container orchestrators and CI; `/hello`
//! is the greeting existing dashboard clients poll to see that the API is up.
//! Neither touches the database. Following the Explicit Module Boundary
//! Pattern (EMBP), this file exports only a subrouter to the gateway
//! (`mod.rs`).

use axum::{routing::get, Json, Router};
use serde::Serialize;

/// JSON response body for the `/health` endpoint.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Serialize)]
struct HelloResponse {
    message: &'static str,
}

/// Handle `GET /health`.
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

/// Handle `GET /hello`.
async fn hello() -> Json<HelloResponse> {
    Json(HelloResponse {
        message: "Hello, World!",
    })
}

/// Create a subrouter containing the liveness routes.
///
/// This router is generic over the application state so it can merge cleanly
/// with the gateway router, regardless of the state type.
///
/// # Type Parameters
/// - `S`: Application state type shared by all routes in the gateway.
pub fn router<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new()
        .route("/health", get(health))
        .route("/hello", get(hello))
}
