use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tracing::debug;

use super::api_error::{parse_sensor_id, ApiError};
use crate::{Measurement, Sensor, Storage};

// ---

pub fn router() -> Router<Storage> {
    // ---
    Router::new()
        .route("/sensors", get(list_sensors))
        .route("/sensors/{id}", get(sensor_detail))
}

#[derive(Debug, Serialize)]
struct SensorsResponse {
    sensors: Vec<Sensor>,
    count: usize,
}

#[derive(Debug, Serialize)]
struct SensorDetailResponse {
    sensor: Sensor,
    measurements: Vec<Measurement>,
    count: usize,
}

/// `GET /sensors`
async fn list_sensors(State(storage): State<Storage>) -> Result<Json<SensorsResponse>, ApiError> {
    // ---
    let sensors = storage.list_sensors().await?;
    debug!("GET /sensors - {} sensors", sensors.len());

    Ok(Json(SensorsResponse {
        count: sensors.len(),
        sensors,
    }))
}

/// `GET /sensors/{id}`: one sensor and its measurements, 404 when unknown.
async fn sensor_detail(
    Path(raw_id): Path<String>,
    State(storage): State<Storage>,
) -> Result<Json<SensorDetailResponse>, ApiError> {
    // ---
    let id = parse_sensor_id(&raw_id)?;

    let (sensor, measurements) = storage
        .get_sensor_with_measurements(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("sensor {id} not found")))?;

    Ok(Json(SensorDetailResponse {
        sensor,
        count: measurements.len(),
        measurements,
    }))
}
