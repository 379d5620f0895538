use std::time::Duration;

use axum::{
    http::{header, Method},
    middleware, Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::Storage;

mod api_error;
mod health;
mod measurements;
mod sensors;

// ---

pub fn router(storage: Storage, request_timeout: Duration) -> Router {
    // ---
    let api = Router::new()
        .merge(sensors::router())
        .merge(measurements::router())
        .merge(health::router());

    with_layers(api, request_timeout).with_state(storage)
}

/// Timeout (with a JSON 408 body), CORS for cross-origin GET, request tracing.
fn with_layers<S>(router: Router<S>, request_timeout: Duration) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    // ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET])
        .allow_headers([header::CONTENT_TYPE]);

    // `new` is deprecated in recent 0.6 releases; its bare 408 is rewritten below.
    #[allow(deprecated)]
    let timeout = TimeoutLayer::new(request_timeout);

    router
        .layer(timeout)
        .layer(middleware::map_response(api_error::timeout_body))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
