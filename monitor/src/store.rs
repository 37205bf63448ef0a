//! Data-access seam between the fleet logic and whatever holds the records.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::Result;
use crate::model::{
    Alert, Device, LogFilter, LogSort, NewReading, NewSensorLog, PageRequest, SensorLog,
    SensorReading,
};

#[async_trait]
pub trait FleetStore: Send + Sync {
    /// Sets every `online` device last seen before `cutoff` to `offline` in a
    /// single atomic update. Returns the number of devices changed.
    async fn mark_stale_offline(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    async fn find_device(&self, device_id: i64) -> Result<Option<Device>>;

    async fn list_devices(&self) -> Result<Vec<Device>>;

    /// Ids of devices whose name contains `needle`, case-insensitively.
    async fn find_device_ids_by_name(&self, needle: &str) -> Result<Vec<i64>>;

    async fn touch_device(&self, device_id: i64, now: DateTime<Utc>) -> Result<()>;

    /// Promotes an `offline` device back to `online` and stamps `last_seen`.
    /// Returns false when the device was not offline.
    async fn reactivate_device(&self, device_id: i64, now: DateTime<Utc>) -> Result<bool>;

    async fn find_reading(
        &self,
        device_id: i64,
        name: &str,
        kind: &str,
    ) -> Result<Option<SensorReading>>;

    async fn create_reading(
        &self,
        reading: &NewReading<'_>,
        now: DateTime<Utc>,
    ) -> Result<SensorReading>;

    async fn update_reading(
        &self,
        reading_id: i64,
        value: f64,
        unit: &str,
        now: DateTime<Utc>,
    ) -> Result<SensorReading>;

    async fn insert_sensor_logs(&self, logs: &[NewSensorLog]) -> Result<u64>;

    /// One page of matching logs plus the total match count.
    async fn query_sensor_logs(
        &self,
        filter: &LogFilter,
        sort: LogSort,
        page: PageRequest,
    ) -> Result<(Vec<SensorLog>, u64)>;

    /// Logs created at or after `since`, oldest first.
    async fn sensor_logs_since(
        &self,
        device_id: Option<i64>,
        since: DateTime<Utc>,
    ) -> Result<Vec<SensorLog>>;

    async fn find_alert(&self, alert_id: i64) -> Result<Option<Alert>>;

    /// Resolves an alert if it is still open. Returns `None` when it was
    /// already resolved.
    async fn mark_alert_resolved(
        &self,
        alert_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<Alert>>;
}
