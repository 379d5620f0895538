use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tracing::debug;

use super::api_error::{parse_sensor_id, ApiError};
use crate::{Measurement, Storage};

// ---

/// Measurement queries. `/getMeasures/{id}` is the older spelling of the
/// by-sensor route and is kept for existing clients.
pub fn router() -> Router<Storage> {
    // ---
    Router::new()
        .route("/getMeasures/sensor/{id}", get(by_sensor))
        .route("/getMeasures/city/{city}", get(by_city))
        .route("/getMeasures/{id}", get(by_sensor))
}

#[derive(Debug, Serialize)]
struct SensorMeasurementsResponse {
    sensor_id: i64,
    measurements: Vec<Measurement>,
    count: usize,
}

#[derive(Debug, Serialize)]
struct CityMeasurementsResponse {
    city: String,
    measurements: Vec<Measurement>,
    count: usize,
}

/// Unknown sensors answer 200 with an empty list.
async fn by_sensor(
    Path(raw_id): Path<String>,
    State(storage): State<Storage>,
) -> Result<Json<SensorMeasurementsResponse>, ApiError> {
    // ---
    let sensor_id = parse_sensor_id(&raw_id)?;
    let measurements = storage.list_measurements_by_sensor(sensor_id).await?;
    debug!(
        "GET /getMeasures/sensor/{} - {} measurements",
        sensor_id,
        measurements.len()
    );

    Ok(Json(SensorMeasurementsResponse {
        sensor_id,
        count: measurements.len(),
        measurements,
    }))
}

/// Cities without sensors answer 200 with an empty list.
async fn by_city(
    Path(city): Path<String>,
    State(storage): State<Storage>,
) -> Result<Json<CityMeasurementsResponse>, ApiError> {
    // ---
    let measurements = storage.list_measurements_by_city(&city).await?;
    debug!(
        "GET /getMeasures/city/{} - {} measurements",
        city,
        measurements.len()
    );

    Ok(Json(CityMeasurementsResponse {
        city,
        count: measurements.len(),
        measurements,
    }))
}
