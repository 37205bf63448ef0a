//! In-process [`FleetStore`] used by tests, demos and local runs without a
//! database. Semantics follow the Postgres store query for query.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::RwLock;

use crate::errors::{Error, Result};
use crate::model::{
    Alert, AlertKind, Device, DeviceStatus, LogFilter, LogSort, NewReading, NewSensorLog,
    PageRequest, SensorLog, SensorReading, Severity,
};
use crate::store::FleetStore;

#[derive(Debug, Default)]
struct Tables {
    devices: Vec<Device>,
    readings: Vec<SensorReading>,
    logs: Vec<SensorLog>,
    alerts: Vec<Alert>,
    next_id: i64,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    unavailable: AtomicBool,
    log_queries: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call fail with [`Error::StoreUnavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of sensor-log reads served so far.
    pub fn log_queries(&self) -> usize {
        self.log_queries.load(Ordering::SeqCst)
    }

    pub async fn add_device(
        &self,
        name: &str,
        status: DeviceStatus,
        battery: f64,
        last_seen: DateTime<Utc>,
    ) -> Device {
        let mut tables = self.tables.write().await;
        let device = Device {
            id: tables.next_id(),
            name: name.to_string(),
            status,
            battery,
            last_seen,
            created_at: last_seen,
            updated_at: last_seen,
        };
        tables.devices.push(device.clone());
        device
    }

    pub async fn add_alert(
        &self,
        device_id: i64,
        kind: AlertKind,
        severity: Severity,
        message: &str,
    ) -> Alert {
        let mut tables = self.tables.write().await;
        let alert = Alert {
            id: tables.next_id(),
            device_id,
            kind,
            severity,
            message: message.to_string(),
            is_resolved: false,
            resolved_at: None,
            created_at: Utc::now(),
        };
        tables.alerts.push(alert.clone());
        alert
    }

    pub async fn readings(&self) -> Vec<SensorReading> {
        self.tables.read().await.readings.clone()
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::StoreUnavailable(
                "in-memory store is marked unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl FleetStore for MemoryStore {
    async fn mark_stale_offline(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        self.check_available()?;
        let mut tables = self.tables.write().await;
        let mut changed = 0;
        for device in tables
            .devices
            .iter_mut()
            .filter(|d| d.status == DeviceStatus::Online && d.last_seen < cutoff)
        {
            device.status = DeviceStatus::Offline;
            device.updated_at = Utc::now();
            changed += 1;
        }
        Ok(changed)
    }

    async fn find_device(&self, device_id: i64) -> Result<Option<Device>> {
        self.check_available()?;
        let tables = self.tables.read().await;
        Ok(tables.devices.iter().find(|d| d.id == device_id).cloned())
    }

    async fn list_devices(&self) -> Result<Vec<Device>> {
        self.check_available()?;
        let mut devices = self.tables.read().await.devices.clone();
        devices.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(devices)
    }

    async fn find_device_ids_by_name(&self, needle: &str) -> Result<Vec<i64>> {
        self.check_available()?;
        let needle = needle.to_lowercase();
        let tables = self.tables.read().await;
        Ok(tables
            .devices
            .iter()
            .filter(|d| d.name.to_lowercase().contains(&needle))
            .map(|d| d.id)
            .collect())
    }

    async fn touch_device(&self, device_id: i64, now: DateTime<Utc>) -> Result<()> {
        self.check_available()?;
        let mut tables = self.tables.write().await;
        let device = tables
            .devices
            .iter_mut()
            .find(|d| d.id == device_id)
            .ok_or_else(|| Error::device_not_found(device_id))?;
        device.last_seen = now;
        device.updated_at = now;
        Ok(())
    }

    async fn reactivate_device(&self, device_id: i64, now: DateTime<Utc>) -> Result<bool> {
        self.check_available()?;
        let mut tables = self.tables.write().await;
        match tables
            .devices
            .iter_mut()
            .find(|d| d.id == device_id && d.status == DeviceStatus::Offline)
        {
            Some(device) => {
                device.status = DeviceStatus::Online;
                device.last_seen = now;
                device.updated_at = now;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn find_reading(
        &self,
        device_id: i64,
        name: &str,
        kind: &str,
    ) -> Result<Option<SensorReading>> {
        self.check_available()?;
        let tables = self.tables.read().await;
        Ok(tables
            .readings
            .iter()
            .find(|r| r.device_id == device_id && r.name == name && r.kind == kind)
            .cloned())
    }

    async fn create_reading(
        &self,
        reading: &NewReading<'_>,
        now: DateTime<Utc>,
    ) -> Result<SensorReading> {
        self.check_available()?;
        let mut tables = self.tables.write().await;
        let created = SensorReading {
            id: tables.next_id(),
            device_id: reading.device_id,
            name: reading.name.to_string(),
            kind: reading.kind.to_string(),
            value: reading.value,
            unit: reading.unit.to_string(),
            created_at: now,
            updated_at: now,
        };
        tables.readings.push(created.clone());
        Ok(created)
    }

    async fn update_reading(
        &self,
        reading_id: i64,
        value: f64,
        unit: &str,
        now: DateTime<Utc>,
    ) -> Result<SensorReading> {
        self.check_available()?;
        let mut tables = self.tables.write().await;
        let reading = tables
            .readings
            .iter_mut()
            .find(|r| r.id == reading_id)
            .ok_or_else(|| Error::NotFound(format!("sensor reading {} does not exist", reading_id)))?;
        reading.value = value;
        reading.unit = unit.to_string();
        reading.updated_at = now;
        Ok(reading.clone())
    }

    async fn insert_sensor_logs(&self, logs: &[NewSensorLog]) -> Result<u64> {
        self.check_available()?;
        let mut tables = self.tables.write().await;
        let mut inserted = 0;
        for log in logs {
            if !tables.devices.iter().any(|d| d.id == log.device_id) {
                continue;
            }
            let id = tables.next_id();
            tables.logs.push(SensorLog {
                id,
                device_id: log.device_id,
                temperature: log.temperature,
                humidity: log.humidity,
                distance: log.distance,
                battery: log.battery,
                signal_strength: log.signal_strength,
                created_at: log.created_at,
            });
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn query_sensor_logs(
        &self,
        filter: &LogFilter,
        sort: LogSort,
        page: PageRequest,
    ) -> Result<(Vec<SensorLog>, u64)> {
        self.check_available()?;
        self.log_queries.fetch_add(1, Ordering::SeqCst);
        let tables = self.tables.read().await;
        let mut matching: Vec<SensorLog> = tables
            .logs
            .iter()
            .filter(|l| filter.matches(l))
            .cloned()
            .collect();
        matching.sort_by(|a, b| sort.compare(a, b));

        let total = matching.len() as u64;
        let records = matching
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.limit() as usize)
            .collect();
        Ok((records, total))
    }

    async fn sensor_logs_since(
        &self,
        device_id: Option<i64>,
        since: DateTime<Utc>,
    ) -> Result<Vec<SensorLog>> {
        self.check_available()?;
        self.log_queries.fetch_add(1, Ordering::SeqCst);
        let tables = self.tables.read().await;
        let mut window: Vec<SensorLog> = tables
            .logs
            .iter()
            .filter(|l| l.created_at >= since && device_id.map_or(true, |id| l.device_id == id))
            .cloned()
            .collect();
        window.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(window)
    }

    async fn find_alert(&self, alert_id: i64) -> Result<Option<Alert>> {
        self.check_available()?;
        let tables = self.tables.read().await;
        Ok(tables.alerts.iter().find(|a| a.id == alert_id).cloned())
    }

    async fn mark_alert_resolved(
        &self,
        alert_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<Alert>> {
        self.check_available()?;
        let mut tables = self.tables.write().await;
        match tables
            .alerts
            .iter_mut()
            .find(|a| a.id == alert_id && !a.is_resolved)
        {
            Some(alert) => {
                alert.is_resolved = true;
                alert.resolved_at = Some(now);
                Ok(Some(alert.clone()))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn test_search_is_case_insensitive() {
        let store = MemoryStore::new();
        let alpha = store
            .add_device("Rover Alpha", DeviceStatus::Online, 85.0, Utc::now())
            .await;
        store
            .add_device("Rover Beta", DeviceStatus::Online, 62.0, Utc::now())
            .await;

        let ids = store.find_device_ids_by_name("alpha").await.unwrap();
        assert_eq!(ids, vec![alpha.id]);
    }

    #[tokio::test]
    async fn test_logs_for_unknown_devices_are_dropped() {
        let store = MemoryStore::new();
        let rover = store
            .add_device("Rover Alpha", DeviceStatus::Online, 85.0, Utc::now())
            .await;
        let sample = |device_id| NewSensorLog {
            device_id,
            temperature: 20.0,
            humidity: 40.0,
            distance: 5.0,
            battery: 90.0,
            signal_strength: -50,
            created_at: Utc::now(),
        };

        let inserted = store
            .insert_sensor_logs(&[sample(rover.id), sample(999)])
            .await
            .unwrap();
        assert_eq!(inserted, 1);
    }

    #[tokio::test]
    async fn test_reactivate_only_promotes_offline_devices() {
        let store = MemoryStore::new();
        let past = Utc::now() - Duration::minutes(5);
        let offline = store
            .add_device("Rover Gamma", DeviceStatus::Offline, 15.0, past)
            .await;
        let faulty = store
            .add_device("Rover Delta", DeviceStatus::Error, 40.0, past)
            .await;

        assert!(store.reactivate_device(offline.id, Utc::now()).await.unwrap());
        assert!(!store.reactivate_device(faulty.id, Utc::now()).await.unwrap());

        let faulty = store.find_device(faulty.id).await.unwrap().unwrap();
        assert_eq!(faulty.status, DeviceStatus::Error);
        assert_eq!(faulty.last_seen, past);
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_every_call() {
        let store = MemoryStore::new();
        store.set_unavailable(true);
        assert!(matches!(
            store.list_devices().await,
            Err(Error::StoreUnavailable(_))
        ));
        store.set_unavailable(false);
        assert!(store.list_devices().await.unwrap().is_empty());
    }
}
