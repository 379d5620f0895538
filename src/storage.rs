//! Storage layer: CRUD over the `SENSOR` and `MEASUREMENT` tables.
//!
//! Every write is a single SQL statement run in autocommit mode, so each call
//! is its own atomic transaction and nothing is ever left half-written. Reads
//! spanning two statements share one transaction.
//! Calls check a connection out of the pool for the duration of the statement
//! and the pool reclaims it on every exit path, including errors.

use std::{str::FromStr, time::Duration};

use chrono::{NaiveDateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;

use crate::error::StorageError;
use crate::models::{Measurement, Sensor};

type Result<T> = std::result::Result<T, StorageError>;

// ---

const MEASUREMENT_COLUMNS: &str = r#"
    m.Id        AS id,
    m.Sensor_id AS sensor_id,
    m.Pollutant AS pollutant,
    m.Measure   AS value,
    m.Timestamp AS timestamp
"#;

const SENSOR_BY_ID: &str = "SELECT Id AS id, City AS city FROM SENSOR WHERE Id = ?";

fn measurements_by_sensor_sql() -> String {
    format!(
        "SELECT {MEASUREMENT_COLUMNS} FROM MEASUREMENT m \
         WHERE m.Sensor_id = ? ORDER BY m.Timestamp, m.Id"
    )
}

/// Open a SQLite pool for `db_url`.
///
/// Foreign keys are enforced on every connection (cascade deletes depend on
/// it). File databases use WAL so API reads do not block ingestion writes. An
/// in-memory database lives inside a single connection, so the pool is pinned
/// to one connection that never expires.
pub async fn connect(
    db_url: &str,
    max_connections: u32,
) -> std::result::Result<SqlitePool, sqlx::Error> {
    // ---
    let in_memory = db_url.contains(":memory:") || db_url.contains("mode=memory");

    let mut options = SqliteConnectOptions::from_str(db_url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5));
    if !in_memory {
        options = options.journal_mode(SqliteJournalMode::Wal);
    }

    let pool_options = if in_memory {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        SqlitePoolOptions::new().max_connections(max_connections)
    };

    pool_options.connect_with(options).await
}

/// A private in-memory database for unit tests.
#[cfg(test)]
pub(crate) async fn memory_pool() -> std::result::Result<SqlitePool, sqlx::Error> {
    connect("sqlite::memory:", 1).await
}

/// Handle to the store. Cheap to clone; clones share the pool.
#[derive(Debug, Clone)]
pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // --- sensors

    /// Insert a sensor with an auto-assigned id and return that id.
    pub async fn create_sensor(&self, city: &str) -> Result<i64> {
        // ---
        let result = sqlx::query("INSERT INTO SENSOR (City) VALUES (?)")
            .bind(city)
            .execute(&self.pool)
            .await?;

        Ok(result.last_insert_rowid())
    }

    /// Insert a sensor under a known key unless one already exists.
    ///
    /// Returns `true` when a row was created. An existing sensor keeps its
    /// city. Lookup and insert are one statement, so two producers racing on a
    /// new key still create a single row.
    pub async fn register_sensor(&self, id: i64, city: &str) -> Result<bool> {
        // ---
        let result = sqlx::query(
            r#"
            INSERT INTO SENSOR (Id, City) VALUES (?, ?)
            ON CONFLICT (Id) DO NOTHING
            "#,
        )
        .bind(id)
        .bind(city)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn get_sensor_by_id(&self, id: i64) -> Result<Option<Sensor>> {
        // ---
        let sensor = sqlx::query_as::<_, Sensor>(SENSOR_BY_ID)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(sensor)
    }

    pub async fn list_sensors(&self) -> Result<Vec<Sensor>> {
        // ---
        let sensors =
            sqlx::query_as::<_, Sensor>("SELECT Id AS id, City AS city FROM SENSOR ORDER BY Id")
                .fetch_all(&self.pool)
                .await?;

        Ok(sensors)
    }

    /// Returns the number of rows changed; 0 if no such sensor.
    pub async fn update_sensor(&self, id: i64, city: &str) -> Result<u64> {
        // ---
        let result = sqlx::query("UPDATE SENSOR SET City = ? WHERE Id = ?")
            .bind(city)
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    /// Delete a sensor and, through the foreign key, all of its measurements.
    pub async fn delete_sensor(&self, id: i64) -> Result<u64> {
        // ---
        let result = sqlx::query("DELETE FROM SENSOR WHERE Id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    /// Fetch a sensor together with its measurements, or `None` if unknown.
    pub async fn get_sensor_with_measurements(
        &self,
        id: i64,
    ) -> Result<Option<(Sensor, Vec<Measurement>)>> {
        // ---
        // Both reads share one transaction so a concurrent delete cannot land
        // between them.
        let mut tx = self.pool.begin().await?;

        let sensor = sqlx::query_as::<_, Sensor>(SENSOR_BY_ID)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(sensor) = sensor else {
            tx.commit().await?;
            return Ok(None);
        };

        let sql = measurements_by_sensor_sql();
        let measurements = sqlx::query_as::<_, Measurement>(&sql)
            .bind(id)
            .fetch_all(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Some((sensor, measurements)))
    }

    // --- measurements

    /// Append a measurement and return its id.
    ///
    /// `timestamp` defaults to the current UTC time. Fails with
    /// [`StorageError::UnknownSensor`] if `sensor_id` is not registered and
    /// with [`StorageError::NonFiniteValue`] for NaN or infinite values.
    pub async fn create_measurement(
        &self,
        value: f64,
        pollutant: &str,
        sensor_id: i64,
        timestamp: Option<NaiveDateTime>,
    ) -> Result<i64> {
        // ---
        if !value.is_finite() {
            return Err(StorageError::NonFiniteValue(value));
        }
        let timestamp = timestamp.unwrap_or_else(|| Utc::now().naive_utc());

        let result = sqlx::query(
            r#"
            INSERT INTO MEASUREMENT (Measure, Timestamp, Pollutant, Sensor_id)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(value)
        .bind(timestamp)
        .bind(pollutant)
        .bind(sensor_id)
        .execute(&self.pool)
        .await
        .map_err(|e| foreign_key_error(e, sensor_id))?;

        Ok(result.last_insert_rowid())
    }

    pub async fn get_measurement_by_id(&self, id: i64) -> Result<Option<Measurement>> {
        // ---
        let sql = format!("SELECT {MEASUREMENT_COLUMNS} FROM MEASUREMENT m WHERE m.Id = ?");
        let measurement = sqlx::query_as::<_, Measurement>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(measurement)
    }

    pub async fn list_measurements(&self) -> Result<Vec<Measurement>> {
        // ---
        let sql =
            format!("SELECT {MEASUREMENT_COLUMNS} FROM MEASUREMENT m ORDER BY m.Timestamp, m.Id");
        let measurements = sqlx::query_as::<_, Measurement>(&sql)
            .fetch_all(&self.pool)
            .await?;

        Ok(measurements)
    }

    /// All measurements of one sensor, oldest first. Empty for unknown sensors.
    pub async fn list_measurements_by_sensor(&self, sensor_id: i64) -> Result<Vec<Measurement>> {
        // ---
        let sql = measurements_by_sensor_sql();
        let measurements = sqlx::query_as::<_, Measurement>(&sql)
            .bind(sensor_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(measurements)
    }

    /// All measurements from sensors located in `city`, oldest first.
    pub async fn list_measurements_by_city(&self, city: &str) -> Result<Vec<Measurement>> {
        // ---
        let sql = format!(
            r#"
            SELECT {MEASUREMENT_COLUMNS}
            FROM MEASUREMENT m
            JOIN SENSOR s ON s.Id = m.Sensor_id
            WHERE s.City = ?
            ORDER BY m.Timestamp, m.Id
            "#
        );
        let measurements = sqlx::query_as::<_, Measurement>(&sql)
            .bind(city)
            .fetch_all(&self.pool)
            .await?;

        Ok(measurements)
    }

    /// Administrative rewrite of one measurement; `timestamp` defaults to now.
    pub async fn update_measurement(
        &self,
        id: i64,
        value: f64,
        pollutant: &str,
        timestamp: Option<NaiveDateTime>,
    ) -> Result<u64> {
        // ---
        if !value.is_finite() {
            return Err(StorageError::NonFiniteValue(value));
        }
        let timestamp = timestamp.unwrap_or_else(|| Utc::now().naive_utc());

        let result = sqlx::query(
            "UPDATE MEASUREMENT SET Measure = ?, Timestamp = ?, Pollutant = ? WHERE Id = ?",
        )
        .bind(value)
        .bind(timestamp)
        .bind(pollutant)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    pub async fn delete_measurement(&self, id: i64) -> Result<u64> {
        // ---
        let result = sqlx::query("DELETE FROM MEASUREMENT WHERE Id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

fn foreign_key_error(err: sqlx::Error, sensor_id: i64) -> StorageError {
    // ---
    match &err {
        sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
            StorageError::UnknownSensor(sensor_id)
        }
        _ => StorageError::Database(err),
    }
}
