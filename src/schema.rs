//! Database schema management for `airq-collector`.
//!
//! Ensures required tables and indexes exist before ingestion or serving
//! starts. Applied once on startup from `main.rs` (single gateway call).

use anyhow::Result;
use sqlx::SqlitePool;

// ---

/// Create the database schema (idempotent).
///
/// Creates the `SENSOR` and `MEASUREMENT` tables plus lookup indexes. Safe to
/// call on every startup; no-op if objects already exist.
///
/// Errors are propagated if any SQL execution fails.
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    // ---
    let mut tx = pool.begin().await?;

    // Id is the sensor key for sensors registered by ingestion
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS SENSOR (
            Id   INTEGER PRIMARY KEY AUTOINCREMENT,
            City TEXT    NOT NULL
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS MEASUREMENT (
            Id        INTEGER  PRIMARY KEY AUTOINCREMENT,
            Measure   REAL     NOT NULL,
            Timestamp DATETIME NOT NULL,
            Pollutant TEXT     NOT NULL,
            Sensor_id INTEGER  NOT NULL,
            FOREIGN KEY (Sensor_id) REFERENCES SENSOR (Id)
                ON UPDATE CASCADE
                ON DELETE CASCADE
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_measurement_sensor_id
            ON MEASUREMENT (Sensor_id, Timestamp);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_sensor_city
            ON SENSOR (City);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}
