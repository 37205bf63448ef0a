//! Bulk sensor uploads: reconcile a device's current sensor values.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::errors::{Error, Result};
use crate::metrics::{READINGS_CREATED_TOTAL, READINGS_SKIPPED_TOTAL, READINGS_UPDATED_TOTAL};
use crate::model::{SensorEntry, SensorReading};
use crate::store::FleetStore;
use crate::validate::validate_entry;

/// What to do with one validated entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertAction {
    Create,
    Update(i64),
}

impl UpsertAction {
    pub fn decide(existing: Option<&SensorReading>) -> Self {
        match existing {
            Some(reading) => UpsertAction::Update(reading.id),
            None => UpsertAction::Create,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryAction {
    Created,
    Updated,
}

#[derive(Debug, Clone, Serialize)]
pub struct EntryOutcome {
    pub action: EntryAction,
    pub sensor: SensorReading,
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedEntry {
    pub index: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub created_count: usize,
    pub updated_count: usize,
    pub skipped_count: usize,
    pub results: Vec<EntryOutcome>,
    pub skipped: Vec<SkippedEntry>,
}

/// Applies a bulk upload to `device_id`.
///
/// Entries that fail validation are skipped and reported; the rest are
/// upserted by `(device, name, type)`. The device's `last_seen` is refreshed
/// once the batch has been processed. An unknown device fails the whole batch
/// before anything is written.
pub async fn ingest_batch(
    store: &dyn FleetStore,
    device_id: i64,
    entries: &[SensorEntry],
) -> Result<BatchReport> {
    ingest_batch_at(store, device_id, entries, Utc::now()).await
}

pub async fn ingest_batch_at(
    store: &dyn FleetStore,
    device_id: i64,
    entries: &[SensorEntry],
    now: DateTime<Utc>,
) -> Result<BatchReport> {
    if entries.is_empty() {
        return Err(Error::Validation(
            "Sensors array is required and must not be empty".to_string(),
        ));
    }

    if store.find_device(device_id).await?.is_none() {
        return Err(Error::device_not_found(device_id));
    }

    debug!(device_id, entries = entries.len(), "Processing bulk sensor upload");

    let mut report = BatchReport::default();

    for (index, entry) in entries.iter().enumerate() {
        let reading = match validate_entry(device_id, entry) {
            Ok(reading) => reading,
            Err(e) => {
                warn!(device_id, index, error = %e, "Skipping invalid sensor entry");
                READINGS_SKIPPED_TOTAL.inc();
                report.skipped.push(SkippedEntry {
                    index,
                    reason: e.to_string(),
                });
                continue;
            }
        };

        let existing = store
            .find_reading(device_id, reading.name, reading.kind)
            .await?;

        let outcome = match UpsertAction::decide(existing.as_ref()) {
            UpsertAction::Update(reading_id) => {
                let sensor = store
                    .update_reading(reading_id, reading.value, reading.unit, now)
                    .await?;
                READINGS_UPDATED_TOTAL.inc();
                report.updated_count += 1;
                EntryOutcome {
                    action: EntryAction::Updated,
                    sensor,
                }
            }
            UpsertAction::Create => {
                let sensor = store.create_reading(&reading, now).await?;
                READINGS_CREATED_TOTAL.inc();
                report.created_count += 1;
                EntryOutcome {
                    action: EntryAction::Created,
                    sensor,
                }
            }
        };
        report.results.push(outcome);
    }

    report.skipped_count = report.skipped.len();

    store.touch_device(device_id, now).await?;

    info!(
        device_id,
        created = report.created_count,
        updated = report.updated_count,
        skipped = report.skipped_count,
        "Bulk sensor upload complete"
    );

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::model::DeviceStatus;

    fn entry(name: &str, kind: &str, value: Option<f64>, unit: &str) -> SensorEntry {
        SensorEntry {
            name: name.to_string(),
            kind: kind.to_string(),
            value,
            unit: unit.to_string(),
        }
    }

    #[test]
    fn test_decide_action() {
        assert_eq!(UpsertAction::decide(None), UpsertAction::Create);
    }

    #[tokio::test]
    async fn test_invalid_entries_are_skipped_not_fatal() {
        let store = MemoryStore::new();
        let rover = store
            .add_device("Rover Alpha", DeviceStatus::Online, 80.0, Utc::now())
            .await;

        let entries = vec![
            entry("temp", "c", Some(10.0), "C"),
            entry("", "c", Some(10.0), "C"),
            entry("hum", "rh", None, "%"),
            entry("dist", "ultrasonic", Some(42.0), "cm"),
        ];

        let report = ingest_batch(&store, rover.id, &entries).await.unwrap();
        assert_eq!(report.created_count, 2);
        assert_eq!(report.updated_count, 0);
        assert_eq!(report.skipped_count, 2);
        let skipped: Vec<usize> = report.skipped.iter().map(|s| s.index).collect();
        assert_eq!(skipped, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_same_name_different_type_is_distinct_key() {
        let store = MemoryStore::new();
        let rover = store
            .add_device("Rover Alpha", DeviceStatus::Online, 80.0, Utc::now())
            .await;

        let entries = vec![
            entry("temp", "c", Some(10.0), "C"),
            entry("temp", "f", Some(50.0), "F"),
        ];
        let report = ingest_batch(&store, rover.id, &entries).await.unwrap();
        assert_eq!(report.created_count, 2);
        assert_eq!(store.readings().await.len(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_key_in_one_batch_updates() {
        let store = MemoryStore::new();
        let rover = store
            .add_device("Rover Alpha", DeviceStatus::Online, 80.0, Utc::now())
            .await;

        let entries = vec![
            entry("temp", "c", Some(10.0), "C"),
            entry("temp", "c", Some(11.0), "C"),
        ];
        let report = ingest_batch(&store, rover.id, &entries).await.unwrap();
        assert_eq!(report.created_count, 1);
        assert_eq!(report.updated_count, 1);

        let readings = store.readings().await;
        assert_eq!(readings.len(), 1);
        assert_eq!(readings[0].value, 11.0);
    }

    #[tokio::test]
    async fn test_empty_batch_rejected() {
        let store = MemoryStore::new();
        let rover = store
            .add_device("Rover Alpha", DeviceStatus::Online, 80.0, Utc::now())
            .await;
        let result = ingest_batch(&store, rover.id, &[]).await;
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn test_last_seen_refreshed_even_when_all_entries_skipped() {
        let store = MemoryStore::new();
        let before = Utc::now() - chrono::Duration::minutes(10);
        let rover = store
            .add_device("Rover Alpha", DeviceStatus::Online, 80.0, before)
            .await;
        let now = Utc::now();

        let report = ingest_batch_at(&store, rover.id, &[entry("", "", None, "")], now)
            .await
            .unwrap();
        assert_eq!(report.skipped_count, 1);

        let device = store.find_device(rover.id).await.unwrap().unwrap();
        assert_eq!(device.last_seen, now);
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_batch_without_touching_device() {
        let store = MemoryStore::new();
        let seen = Utc::now() - chrono::Duration::minutes(10);
        let rover = store
            .add_device("Rover Alpha", DeviceStatus::Online, 80.0, seen)
            .await;

        store.set_unavailable(true);
        let result = ingest_batch(&store, rover.id, &[entry("temp", "c", Some(1.0), "C")]).await;
        assert!(matches!(result, Err(Error::StoreUnavailable(_))));

        store.set_unavailable(false);
        let device = store.find_device(rover.id).await.unwrap().unwrap();
        assert_eq!(device.last_seen, seen);
        assert!(store.readings().await.is_empty());
    }

    #[tokio::test]
    async fn test_ingest_does_not_change_status() {
        let store = MemoryStore::new();
        let rover = store
            .add_device("Rover Gamma", DeviceStatus::Offline, 15.0, Utc::now())
            .await;

        ingest_batch(&store, rover.id, &[entry("temp", "c", Some(1.0), "C")])
            .await
            .unwrap();

        let device = store.find_device(rover.id).await.unwrap().unwrap();
        assert_eq!(device.status, DeviceStatus::Offline);
    }
}
