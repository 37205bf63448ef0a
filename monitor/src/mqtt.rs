use crate::errors::{Error, Result};
use crate::ingest::ingest_batch;
use crate::liveness::reactivate;
use crate::metrics::{CHANNEL_FULL_TOTAL, INVALID_MESSAGES_TOTAL, MESSAGES_TOTAL, VALID_MESSAGES_TOTAL};
use crate::model::{NewSensorLog, SensorEntry};
use crate::store::FleetStore;
use crate::validate::validate_log;
use chrono::Utc;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 100;
const MAX_BACKOFF_MS: u64 = 2000;

const LOGS_TOPIC: &str = "rovers/+/logs";
const SENSORS_TOPIC: &str = "rovers/+/sensors";

/// Where an incoming publish should go, derived from its topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// `rovers/{id}/logs`: one telemetry sample for the time series.
    Log(i64),
    /// `rovers/{id}/sensors`: bulk snapshot of current sensor values.
    Sensors(i64),
}

pub fn parse_topic(topic: &str) -> Option<Route> {
    let mut parts = topic.split('/');
    let (Some("rovers"), Some(id), Some(kind), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return None;
    };
    let device_id: i64 = id.parse().ok().filter(|id| *id > 0)?;
    match kind {
        "logs" => Some(Route::Log(device_id)),
        "sensors" => Some(Route::Sensors(device_id)),
        _ => None,
    }
}

#[derive(Debug, Deserialize)]
struct BulkUpload {
    #[serde(default)]
    sensors: Vec<SensorEntry>,
}

pub struct MqttContext {
    pub tx: mpsc::Sender<NewSensorLog>,
    pub store: Arc<dyn FleetStore>,
}

pub async fn run_mqtt(
    broker: String,
    port: u16,
    client_id: String,
    ctx: MqttContext,
) -> Result<()> {
    info!("Connecting to MQTT broker at {}:{}", broker, port);

    let mut mqtt_options = MqttOptions::new(client_id, broker, port);
    mqtt_options.set_keep_alive(std::time::Duration::from_secs(30));
    mqtt_options.set_clean_session(false);

    let (client, mut eventloop) = AsyncClient::new(mqtt_options, 10000);

    for topic in [LOGS_TOPIC, SENSORS_TOPIC] {
        client.subscribe(topic, QoS::AtLeastOnce).await?;
        info!("Subscribed to {} with QoS 1", topic);
    }

    loop {
        match eventloop.poll().await {
            Ok(notification) => {
                if let Event::Incoming(Packet::Publish(publish)) = notification {
                    MESSAGES_TOTAL.inc();

                    debug!(
                        "Received message on topic {}, size: {} bytes",
                        publish.topic,
                        publish.payload.len()
                    );

                    let Some(route) = parse_topic(&publish.topic) else {
                        warn!("Ignoring message on unexpected topic {}", publish.topic);
                        INVALID_MESSAGES_TOTAL.inc();
                        continue;
                    };

                    if let Err(e) = process_message_with_retry(route, &publish.payload, &ctx).await {
                        error!("Failed to process message on {}: {}", publish.topic, e);
                        INVALID_MESSAGES_TOTAL.inc();
                    }
                }
            }
            Err(e) => {
                error!("MQTT error: {}", e);
                // rumqttc automatically reconnects, so we just log and continue
                tokio::time::sleep(std::time::Duration::from_secs(1)).await;
            }
        }
    }
}

/// Process a message with exponential backoff retry
async fn process_message_with_retry(route: Route, payload: &[u8], ctx: &MqttContext) -> Result<()> {
    let mut attempt = 0;
    let mut backoff_ms = INITIAL_BACKOFF_MS;

    loop {
        attempt += 1;

        match process_message(route, payload, ctx).await {
            Ok(()) => {
                if attempt > 1 {
                    info!("Message processed successfully on attempt {}", attempt);
                }
                return Ok(());
            }
            Err(e) => {
                if attempt >= MAX_RETRIES {
                    return Err(e);
                }

                if !e.is_transient() {
                    warn!("Non-retryable error: {}", e);
                    return Err(e);
                }

                warn!(
                    "Message processing failed (attempt {}/{}): {}. Retrying in {}ms...",
                    attempt, MAX_RETRIES, e, backoff_ms
                );

                tokio::time::sleep(std::time::Duration::from_millis(backoff_ms)).await;
                backoff_ms = (backoff_ms * 2).min(MAX_BACKOFF_MS);
            }
        }
    }
}

async fn process_message(route: Route, payload: &[u8], ctx: &MqttContext) -> Result<()> {
    match route {
        Route::Log(device_id) => {
            let mut log = serde_json::from_slice::<NewSensorLog>(payload)
                .map_err(|e| Error::Validation(format!("JSON parse error: {}", e)))?;
            // The topic is authoritative for the device.
            log.device_id = device_id;
            validate_log(&log)?;
            enqueue(&ctx.tx, log).await
        }
        Route::Sensors(device_id) => {
            let upload = serde_json::from_slice::<BulkUpload>(payload)
                .map_err(|e| Error::Validation(format!("JSON parse error: {}", e)))?;
            ingest_batch(ctx.store.as_ref(), device_id, &upload.sensors).await?;
            reactivate(ctx.store.as_ref(), device_id, Utc::now()).await?;
            VALID_MESSAGES_TOTAL.inc();
            Ok(())
        }
    }
}

async fn enqueue(tx: &mpsc::Sender<NewSensorLog>, log: NewSensorLog) -> Result<()> {
    match tx.try_send(log) {
        Ok(()) => {
            VALID_MESSAGES_TOTAL.inc();
            Ok(())
        }
        Err(mpsc::error::TrySendError::Full(log)) => {
            CHANNEL_FULL_TOTAL.inc();
            debug!("Channel full, using blocking send");
            tx.send(log).await.map_err(|_| Error::ChannelSend)?;
            VALID_MESSAGES_TOTAL.inc();
            Ok(())
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            error!("Channel closed, cannot queue sensor log");
            Err(Error::ChannelSend)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::model::DeviceStatus;

    fn context(store: Arc<MemoryStore>) -> (MqttContext, mpsc::Receiver<NewSensorLog>) {
        let (tx, rx) = mpsc::channel(10);
        (MqttContext { tx, store }, rx)
    }

    #[test]
    fn test_parse_topic() {
        assert_eq!(parse_topic("rovers/7/logs"), Some(Route::Log(7)));
        assert_eq!(parse_topic("rovers/12/sensors"), Some(Route::Sensors(12)));
        assert_eq!(parse_topic("rovers/abc/logs"), None);
        assert_eq!(parse_topic("rovers/0/logs"), None);
        assert_eq!(parse_topic("rovers/7/logs/extra"), None);
        assert_eq!(parse_topic("telemetry/7"), None);
    }

    #[test]
    fn test_process_log_valid() {
        tokio_test::block_on(async {
            let (ctx, mut rx) = context(Arc::new(MemoryStore::new()));
            let payload = br#"{"temperature":25.0,"humidity":60.0,"distance":12.0,"battery":80.0}"#;

            assert!(process_message(Route::Log(3), payload, &ctx).await.is_ok());

            let received = rx.recv().await.unwrap();
            assert_eq!(received.device_id, 3);
            assert_eq!(received.temperature, 25.0);
        });
    }

    #[test]
    fn test_process_log_invalid_json() {
        tokio_test::block_on(async {
            let (ctx, _rx) = context(Arc::new(MemoryStore::new()));
            let result = process_message(Route::Log(3), b"invalid json", &ctx).await;
            assert!(matches!(result, Err(Error::Validation(_))));
        });
    }

    #[test]
    fn test_process_log_invalid_temperature() {
        tokio_test::block_on(async {
            let (ctx, _rx) = context(Arc::new(MemoryStore::new()));
            let payload = br#"{"temperature":999.0,"humidity":60.0,"distance":12.0}"#;
            assert!(process_message(Route::Log(3), payload, &ctx).await.is_err());
        });
    }

    #[tokio::test]
    async fn test_bulk_upload_ingests_and_reactivates() {
        let store = Arc::new(MemoryStore::new());
        let rover = store
            .add_device("Rover Gamma", DeviceStatus::Offline, 15.0, Utc::now())
            .await;
        let (ctx, _rx) = context(store.clone());
        let payload = br#"{"sensors":[{"name":"temp","type":"c","value":21.5,"unit":"C"}]}"#;

        process_message(Route::Sensors(rover.id), payload, &ctx)
            .await
            .unwrap();

        assert_eq!(store.readings().await.len(), 1);
        let device = store.find_device(rover.id).await.unwrap().unwrap();
        assert_eq!(device.status, DeviceStatus::Online);
    }

    #[tokio::test]
    async fn test_bulk_upload_for_unknown_rover_is_not_retried() {
        let store = Arc::new(MemoryStore::new());
        let (ctx, _rx) = context(store.clone());
        let payload = br#"{"sensors":[{"name":"temp","type":"c","value":21.5,"unit":"C"}]}"#;

        let result = process_message_with_retry(Route::Sensors(99), payload, &ctx).await;
        assert!(matches!(result, Err(Error::NotFound(_))));
        assert!(store.readings().await.is_empty());
    }
}
