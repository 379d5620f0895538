//! Simple data models for the collector.

use chrono::NaiveDateTime;
use serde::Serialize;

// ---

/// A registered sensor. `id` is the sensor key derived from the producer's
/// identifier when the sensor was lazily registered.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct Sensor {
    // ---
    pub id: i64,
    pub city: String,
}

/// One stored reading of one pollutant.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct Measurement {
    // ---
    pub id: i64,
    pub sensor_id: i64,
    pub pollutant: String,
    pub value: f64,
    pub timestamp: NaiveDateTime,
}

/// Pollutants carried by every wire message, in wire order.
///
/// The store keeps the tag as free text so administrative writes may use
/// other tags; ingestion only ever produces these three.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pollutant {
    Pm25,
    No2,
    O3,
}

impl Pollutant {
    pub fn as_str(self) -> &'static str {
        // ---
        match self {
            Pollutant::Pm25 => "PM2.5",
            Pollutant::No2 => "NO2",
            Pollutant::O3 => "O3",
        }
    }
}

impl std::fmt::Display for Pollutant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_pollutant_tags() {
        // ---
        let tags: Vec<&str> = [Pollutant::Pm25, Pollutant::No2, Pollutant::O3]
            .iter()
            .map(|p| p.as_str())
            .collect();
        assert_eq!(tags, vec!["PM2.5", "NO2", "O3"]);
        assert_eq!(Pollutant::No2.to_string(), "NO2");
    }

    #[test]
    fn test_measurement_json_shape() {
        // ---
        let m = Measurement {
            id: 7,
            sensor_id: 3,
            pollutant: "O3".to_string(),
            value: 50.1,
            timestamp: NaiveDate::from_ymd_opt(2024, 1, 1)
                .unwrap()
                .and_hms_opt(12, 0, 0)
                .unwrap(),
        };

        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "id": 7,
                "sensor_id": 3,
                "pollutant": "O3",
                "value": 50.1,
                "timestamp": "2024-01-01T12:00:00"
            })
        );
    }
}
