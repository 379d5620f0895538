// src/routes/api_error.rs
//! Handler-boundary error type for the Query API.
//!
//! Every handler returns `Result<_, ApiError>`; this module turns the error
//! into a `{ "error": "..." }` JSON body with a matching status code. Storage
//! failures are logged in full and answered with a generic message so no
//! internal detail reaches the client.

use axum::{http::StatusCode, response::IntoResponse, response::Response, Json};
use serde::Serialize;

use crate::StorageError;

#[derive(Debug)]
pub enum ApiError {
    // ---
    /// A path parameter failed validation.
    BadRequest(String),
    /// The addressed resource does not exist.
    NotFound(String),
    /// The request outlived the configured timeout.
    Timeout,
    Storage(StorageError),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl From<StorageError> for ApiError {
    fn from(e: StorageError) -> Self {
        ApiError::Storage(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        // ---
        let (status, error) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Timeout => (
                StatusCode::REQUEST_TIMEOUT,
                "request timed out".to_string(),
            ),
            ApiError::Storage(e) => {
                tracing::error!("Storage failure while serving request: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal storage error".to_string(),
                )
            }
        };

        (status, Json(ErrorResponse { error })).into_response()
    }
}

/// Give the timeout layer's bare 408 the same `{error}` body as other errors.
pub async fn timeout_body(response: Response) -> Response {
    // ---
    if response.status() == StatusCode::REQUEST_TIMEOUT {
        ApiError::Timeout.into_response()
    } else {
        response
    }
}

/// Validate a sensor id path segment: it must be a positive integer.
pub fn parse_sensor_id(raw: &str) -> Result<i64, ApiError> {
    // ---
    match raw.parse::<i64>() {
        Ok(id) if id > 0 => Ok(id),
        _ => Err(ApiError::BadRequest(format!(
            "sensor id must be a positive integer, got {raw:?}"
        ))),
    }
}
