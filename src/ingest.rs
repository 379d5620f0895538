//! Ingestion listener.
//!
//! Producers connect over TCP and push newline-delimited messages
//! (`sensorIdentifier,location,pm25,no2,o3,timestamp`). Nothing is written
//! back: delivery is fire-and-forget, and a message still in flight when the
//! process dies is lost. Each decoded message lazily registers its sensor and
//! appends one measurement row per pollutant.
//!
//! Bad input never stops the listener. A malformed message, including one that
//! is not valid UTF-8, is logged and dropped and the connection keeps reading;
//! an over-long frame or a read error closes only that connection.

use std::{net::SocketAddr, time::Duration};

use futures::StreamExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{AnyDelimiterCodec, AnyDelimiterCodecError, FramedRead};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::error::{BindError, ParseError};
use crate::message::{SensorKey, SensorMessage};
use crate::storage::Storage;

/// Longest accepted frame, in bytes, excluding the line terminator.
pub const MAX_FRAME_LEN: usize = 1024;

const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

// ---

/// What one message turned into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReport {
    // ---
    pub sensor_id: i64,
    /// The sensor row was created by this message.
    pub sensor_created: bool,
    /// Measurement rows written.
    pub stored: usize,
    /// Measurement rows that failed and were dropped.
    pub failed: usize,
}

/// Bind the ingestion socket. Failure here is fatal to startup.
pub async fn bind(addr: SocketAddr) -> Result<TcpListener, BindError> {
    // ---
    TcpListener::bind(addr).await.map_err(|source| BindError {
        what: "ingestion",
        addr,
        source,
    })
}

/// Accept producers until `shutdown` is cancelled.
///
/// On return every connection task has finished and all sockets are closed.
/// The token is cancelled on the way out, so if the listener stops for any
/// reason the rest of the process follows.
pub async fn run(listener: TcpListener, storage: Storage, shutdown: CancellationToken) {
    // ---
    let _cancel_on_exit = shutdown.clone().drop_guard();
    let connections = TaskTracker::new();

    match listener.local_addr() {
        Ok(addr) => info!("Ingestion listener accepting producers on {}", addr),
        Err(e) => warn!("Ingestion listener running, local address unknown: {}", e),
    }

    loop {
        let accepted = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, peer)) => {
                debug!("Producer connected: {}", peer);
                connections.spawn(handle_connection(
                    stream,
                    peer,
                    storage.clone(),
                    shutdown.clone(),
                ));
            }
            Err(e) => {
                // Usually descriptor exhaustion; back off instead of spinning.
                warn!("Failed to accept producer connection: {}", e);
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(ACCEPT_RETRY_DELAY) => {}
                }
            }
        }
    }

    drop(listener);
    connections.close();
    connections.wait().await;
    info!("Ingestion listener stopped");
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    storage: Storage,
    shutdown: CancellationToken,
) {
    // ---
    // Frames are raw bytes so one undecodable frame costs only itself.
    let codec =
        AnyDelimiterCodec::new_with_max_length(b"\n".to_vec(), Vec::new(), MAX_FRAME_LEN);
    let mut frames = FramedRead::new(stream, codec);

    loop {
        let frame = tokio::select! {
            _ = shutdown.cancelled() => break,
            frame = frames.next() => frame,
        };

        match frame {
            None => break,
            Some(Ok(frame)) => {
                // Errors are logged inside; the connection keeps going.
                let _ = ingest_frame(&storage, &frame).await;
            }
            Some(Err(AnyDelimiterCodecError::MaxChunkLengthExceeded)) => {
                warn!(
                    "Producer {} sent a frame longer than {} bytes, closing connection",
                    peer, MAX_FRAME_LEN
                );
                break;
            }
            Some(Err(AnyDelimiterCodecError::Io(e))) => {
                warn!("Read from producer {} failed, closing connection: {}", peer, e);
                break;
            }
        }
    }

    debug!("Producer disconnected: {}", peer);
}

/// Decode and persist one frame as read off the socket.
///
/// Blank frames are skipped and yield `Ok(None)`. Bytes that are not UTF-8
/// give [`ParseError::InvalidUtf8`]; nothing is written.
pub async fn ingest_frame(
    storage: &Storage,
    frame: &[u8],
) -> Result<Option<IngestReport>, ParseError> {
    // ---
    let line = match std::str::from_utf8(frame) {
        Ok(line) => line,
        Err(e) => {
            warn!(
                "Discarding message that is not UTF-8 ({}): {:?}",
                e,
                String::from_utf8_lossy(frame)
            );
            return Err(ParseError::InvalidUtf8);
        }
    };

    if line.trim().is_empty() {
        return Ok(None);
    }
    ingest_line(storage, line).await.map(Some)
}

/// Decode and persist one text line.
///
/// A [`ParseError`] means nothing was written; it is logged here and returned
/// for callers that want to count it.
pub async fn ingest_line(storage: &Storage, line: &str) -> Result<IngestReport, ParseError> {
    // ---
    match SensorMessage::parse(line) {
        Ok(message) => Ok(ingest_message(storage, &message).await),
        Err(e) => {
            warn!("Discarding malformed message {:?}: {}", line, e);
            Err(e)
        }
    }
}

/// Register the message's sensor if needed, then write one row per pollutant.
///
/// Each row is its own transaction. A failed row is logged and dropped and
/// the remaining pollutants are still attempted.
pub async fn ingest_message(storage: &Storage, message: &SensorMessage) -> IngestReport {
    // ---
    let key = message.sensor_key();
    if key == SensorKey::Fallback {
        warn!(
            "Sensor identifier {:?} has no trailing number, using default sensor key {}",
            message.identifier,
            key.value()
        );
    }
    let sensor_id = key.value();

    let sensor_created = match storage.register_sensor(sensor_id, &message.location).await {
        Ok(created) => {
            if created {
                info!("Registered sensor {} in {}", sensor_id, message.location);
            }
            created
        }
        Err(e) => {
            error!("Failed to register sensor {}: {}", sensor_id, e);
            false
        }
    };

    let mut report = IngestReport {
        sensor_id,
        sensor_created,
        stored: 0,
        failed: 0,
    };

    for (pollutant, value) in message.readings() {
        match storage
            .create_measurement(value, pollutant.as_str(), sensor_id, Some(message.timestamp))
            .await
        {
            Ok(_) => report.stored += 1,
            Err(e) => {
                error!(
                    "Failed to store {} reading from sensor {}: {}",
                    pollutant, sensor_id, e
                );
                report.failed += 1;
            }
        }
    }

    info!(
        "[{}] {} ({}) -> PM2.5={} NO2={} O3={} ({} stored, {} dropped)",
        message.timestamp,
        message.identifier,
        message.location,
        message.pm25,
        message.no2,
        message.o3,
        report.stored,
        report.failed
    );

    report
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::message::DEFAULT_SENSOR_KEY;
    use crate::{schema, storage};
    use chrono::NaiveDate;
    use tokio::io::AsyncWriteExt;

    async fn test_storage() -> Storage {
        // ---
        let pool = storage::memory_pool().await.unwrap();
        schema::create_schema(&pool).await.unwrap();
        Storage::new(pool)
    }

    #[tokio::test]
    async fn test_ingest_scenario_toronto() {
        // ---
        let storage = test_storage().await;

        let report = ingest_line(&storage, "Sensor3,Toronto,30.5,45.2,50.1,2024-01-01T12:00:00")
            .await
            .unwrap();
        assert_eq!(
            report,
            IngestReport {
                sensor_id: 3,
                sensor_created: true,
                stored: 3,
                failed: 0
            }
        );

        let sensors = storage.list_sensors().await.unwrap();
        assert_eq!(sensors.len(), 1);
        assert_eq!(sensors[0].id, 3);
        assert_eq!(sensors[0].city, "Toronto");

        let expected_ts = NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        let rows: Vec<(String, f64)> = storage
            .list_measurements_by_sensor(3)
            .await
            .unwrap()
            .into_iter()
            .map(|m| {
                assert_eq!(m.timestamp, expected_ts);
                assert_eq!(m.sensor_id, 3);
                (m.pollutant, m.value)
            })
            .collect();
        assert_eq!(
            rows,
            vec![
                ("PM2.5".to_string(), 30.5),
                ("NO2".to_string(), 45.2),
                ("O3".to_string(), 50.1),
            ]
        );
    }

    #[tokio::test]
    async fn test_reingest_known_sensor() {
        // ---
        let storage = test_storage().await;
        let line = "Sensor3,Toronto,30.5,45.2,50.1,2024-01-01T12:00:00";

        ingest_line(&storage, line).await.unwrap();
        let report = ingest_line(&storage, "Sensor3,Ajax,1,2,3,2024-01-01T12:00:02")
            .await
            .unwrap();

        assert!(!report.sensor_created);
        assert_eq!(report.stored, 3);
        assert_eq!(storage.list_sensors().await.unwrap().len(), 1);
        // The sensor keeps the city it was registered with.
        assert_eq!(storage.get_sensor_by_id(3).await.unwrap().unwrap().city, "Toronto");
        assert_eq!(storage.list_measurements_by_sensor(3).await.unwrap().len(), 6);
    }

    #[tokio::test]
    async fn test_malformed_message_writes_nothing() {
        // ---
        let storage = test_storage().await;

        assert_eq!(
            ingest_line(&storage, "garbage").await,
            Err(ParseError::FieldCount { found: 1 })
        );
        assert!(ingest_line(&storage, "Sensor1,Toronto,1,oops,3,2024-01-01T00:00:00")
            .await
            .is_err());

        assert!(storage.list_sensors().await.unwrap().is_empty());
        assert!(storage.list_measurements().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unnumbered_identifier_uses_default_key() {
        // ---
        let storage = test_storage().await;

        let report = ingest_line(&storage, "Roof,Whitby,1,2,3,2024-01-01T00:00:00")
            .await
            .unwrap();

        assert_eq!(report.sensor_id, DEFAULT_SENSOR_KEY);
        assert_eq!(
            storage.list_measurements_by_sensor(DEFAULT_SENSOR_KEY).await.unwrap().len(),
            3
        );
    }

    #[tokio::test]
    async fn test_failed_pollutant_does_not_block_the_others() {
        // ---
        let storage = test_storage().await;
        sqlx::query(
            r#"
            CREATE TRIGGER reject_no2 BEFORE INSERT ON MEASUREMENT
            WHEN NEW.Pollutant = 'NO2'
            BEGIN
                SELECT RAISE(ABORT, 'NO2 rejected');
            END
            "#,
        )
        .execute(storage.pool())
        .await
        .unwrap();

        let report = ingest_line(&storage, "Sensor3,Toronto,30.5,45.2,50.1,2024-01-01T12:00:00")
            .await
            .unwrap();
        assert_eq!(
            report,
            IngestReport {
                sensor_id: 3,
                sensor_created: true,
                stored: 2,
                failed: 1
            }
        );

        let rows: Vec<(String, f64)> = storage
            .list_measurements_by_sensor(3)
            .await
            .unwrap()
            .into_iter()
            .map(|m| (m.pollutant, m.value))
            .collect();
        assert_eq!(
            rows,
            vec![("PM2.5".to_string(), 30.5), ("O3".to_string(), 50.1)]
        );
    }

    #[tokio::test]
    async fn test_ingest_frame_decoding() {
        // ---
        let storage = test_storage().await;

        assert_eq!(
            ingest_frame(&storage, b"Sensor1,Osh\xffawa,1,2,3,2024-01-01T00:00:00").await,
            Err(ParseError::InvalidUtf8)
        );
        assert_eq!(ingest_frame(&storage, b"  \r").await, Ok(None));
        assert!(storage.list_sensors().await.unwrap().is_empty());

        let report = ingest_frame(&storage, b"Sensor2,Ajax,1,2,3,2024-01-01T00:00:00\r")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.stored, 3);
    }

    #[tokio::test]
    async fn test_invalid_utf8_frame_keeps_connection_open() {
        // ---
        let storage = test_storage().await;
        let listener = bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(run(listener, storage.clone(), shutdown.clone()));

        let mut producer = TcpStream::connect(addr).await.unwrap();
        producer
            .write_all(
                b"Sensor1,Osh\xffawa,1,2,3,2024-01-01T00:00:00\n\
                  Sensor2,Ajax,1,2,3,2024-01-01T00:00:00\n",
            )
            .await
            .unwrap();

        let mut stored = 0;
        for _ in 0..100 {
            stored = storage.list_measurements_by_sensor(2).await.unwrap().len();
            if stored == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(stored, 3);
        assert!(storage.list_measurements_by_sensor(1).await.unwrap().is_empty());

        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_listener_ingests_until_shutdown() {
        // ---
        let storage = test_storage().await;
        let listener = bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(run(listener, storage.clone(), shutdown.clone()));

        let mut producer = TcpStream::connect(addr).await.unwrap();
        producer
            .write_all(
                b"Sensor1,Oshawa,10,20,30,2024-01-01T00:00:00\r\n\
                  garbage\n\
                  \n\
                  Sensor2,Ajax,11,21,31,2024-01-01T00:00:02\n",
            )
            .await
            .unwrap();
        producer.flush().await.unwrap();

        let mut stored = 0;
        for _ in 0..100 {
            stored = storage.list_measurements().await.unwrap().len();
            if stored == 6 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(stored, 6);
        assert_eq!(storage.list_sensors().await.unwrap().len(), 2);

        // The producer is still connected; shutdown must not wait for it.
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("listener did not stop")
            .unwrap();

        assert!(TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn test_oversized_frame_closes_only_that_connection() {
        // ---
        let storage = test_storage().await;
        let listener = bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(run(listener, storage.clone(), shutdown.clone()));

        let mut noisy = TcpStream::connect(addr).await.unwrap();
        let oversized = "x".repeat(MAX_FRAME_LEN + 10) + "\n";
        let _ = noisy.write_all(oversized.as_bytes()).await;

        let mut producer = TcpStream::connect(addr).await.unwrap();
        producer
            .write_all(b"Sensor4,Pickering,1,2,3,2024-01-01T00:00:00\n")
            .await
            .unwrap();

        let mut stored = 0;
        for _ in 0..100 {
            stored = storage.list_measurements_by_sensor(4).await.unwrap().len();
            if stored == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(stored, 3);

        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_bind_conflict_is_fatal() {
        // ---
        let first = bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = first.local_addr().unwrap();

        let err = bind(addr).await.unwrap_err();
        assert_eq!(err.addr, addr);
        assert_eq!(err.what, "ingestion");
    }
}
