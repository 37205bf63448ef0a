//! Statistics and filtered views over the sensor-log time series.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

use crate::errors::Result;
use crate::model::{Device, DeviceStatus, LogFilter, LogSort, Page, PageRequest, SensorLog};
use crate::store::FleetStore;

/// Rounds to one decimal place, halves away from zero.
pub fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyBucket {
    pub date: NaiveDate,
    pub temperature: f64,
    pub humidity: f64,
    pub battery: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryStats {
    pub total_readings: usize,
    pub avg_temperature: f64,
    pub avg_humidity: f64,
    pub avg_distance: f64,
    pub avg_battery: f64,
    pub avg_signal_strength: f64,
    pub min_temperature: f64,
    pub max_temperature: f64,
    pub chart_data: Vec<DailyBucket>,
}

impl SummaryStats {
    /// Summarises logs already restricted to the window.
    pub fn from_logs(logs: &[SensorLog]) -> Self {
        if logs.is_empty() {
            return SummaryStats::default();
        }

        let min_temperature = logs
            .iter()
            .map(|l| l.temperature)
            .fold(f64::INFINITY, f64::min);
        let max_temperature = logs
            .iter()
            .map(|l| l.temperature)
            .fold(f64::NEG_INFINITY, f64::max);

        let mut by_day: BTreeMap<NaiveDate, Vec<&SensorLog>> = BTreeMap::new();
        for log in logs {
            by_day.entry(log.created_at.date_naive()).or_default().push(log);
        }

        let chart_data = by_day
            .into_iter()
            .map(|(date, day)| DailyBucket {
                date,
                temperature: round1(mean(day.iter().map(|l| l.temperature))),
                humidity: round1(mean(day.iter().map(|l| l.humidity))),
                battery: round1(mean(day.iter().map(|l| l.battery))),
            })
            .collect();

        SummaryStats {
            total_readings: logs.len(),
            avg_temperature: round1(mean(logs.iter().map(|l| l.temperature))),
            avg_humidity: round1(mean(logs.iter().map(|l| l.humidity))),
            avg_distance: round1(mean(logs.iter().map(|l| l.distance))),
            avg_battery: round1(mean(logs.iter().map(|l| l.battery))),
            avg_signal_strength: round1(mean(logs.iter().map(|l| f64::from(l.signal_strength)))),
            min_temperature: round1(min_temperature),
            max_temperature: round1(max_temperature),
            chart_data,
        }
    }
}

/// Aggregates the last `window_days` of sensor logs, optionally for one
/// device. An empty window yields a zeroed summary.
pub async fn summarize(
    store: &dyn FleetStore,
    device_id: Option<i64>,
    window_days: u32,
) -> Result<SummaryStats> {
    summarize_at(store, device_id, window_days, Utc::now()).await
}

pub async fn summarize_at(
    store: &dyn FleetStore,
    device_id: Option<i64>,
    window_days: u32,
    now: DateTime<Utc>,
) -> Result<SummaryStats> {
    // A window reaching past the representable range covers all history.
    let since = chrono::Duration::try_days(i64::from(window_days))
        .and_then(|window| now.checked_sub_signed(window))
        .unwrap_or(DateTime::<Utc>::MIN_UTC);
    let logs = store.sensor_logs_since(device_id, since).await?;
    debug!(?device_id, window_days, records = logs.len(), "Summarizing sensor logs");
    Ok(SummaryStats::from_logs(&logs))
}

/// Parameters of a filtered sensor-log listing.
#[derive(Debug, Clone, Default)]
pub struct LogQuery {
    pub filter: LogFilter,
    /// Case-insensitive substring of a device name.
    pub search: Option<String>,
    pub sort: LogSort,
    pub page: PageRequest,
}

pub async fn list_filtered(store: &dyn FleetStore, query: &LogQuery) -> Result<Page<SensorLog>> {
    let mut filter = query.filter.clone();

    if let Some(search) = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        let ids = store.find_device_ids_by_name(search).await?;
        if ids.is_empty() {
            debug!(search, "No rovers match search");
            return Ok(Page::empty(query.page));
        }
        filter.device_ids = Some(ids);
    }

    let (records, total) = store
        .query_sensor_logs(&filter, query.sort, query.page)
        .await?;
    Ok(Page::new(records, total, query.page))
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Connectivity {
    pub online: usize,
    pub offline: usize,
    pub error: usize,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetOverview {
    pub total_rovers: usize,
    pub active_rovers: usize,
    pub avg_battery: f64,
    pub connectivity: Connectivity,
}

impl FleetOverview {
    pub fn from_devices(devices: &[Device]) -> Self {
        let count = |status| devices.iter().filter(|d| d.status == status).count();
        let connectivity = Connectivity {
            online: count(DeviceStatus::Online),
            offline: count(DeviceStatus::Offline),
            error: count(DeviceStatus::Error),
            total: devices.len(),
        };

        FleetOverview {
            total_rovers: devices.len(),
            active_rovers: connectivity.online,
            avg_battery: round1(mean(devices.iter().map(|d| d.battery))),
            connectivity,
        }
    }
}

pub async fn fleet_overview(store: &dyn FleetStore) -> Result<FleetOverview> {
    let devices = store.list_devices().await?;
    Ok(FleetOverview::from_devices(&devices))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Error;
    use crate::memory::MemoryStore;
    use crate::model::NewSensorLog;
    use chrono::TimeZone;

    fn log_at(id: i64, temperature: f64, created_at: DateTime<Utc>) -> SensorLog {
        SensorLog {
            id,
            device_id: 1,
            temperature,
            humidity: 50.0,
            distance: 10.0,
            battery: 80.0,
            signal_strength: -60,
            created_at,
        }
    }

    #[test]
    fn test_round1_half_away_from_zero() {
        assert_eq!(round1(2.25), 2.3);
        assert_eq!(round1(-2.25), -2.3);
        assert_eq!(round1(24.94), 24.9);
        assert_eq!(round1(0.0), 0.0);
    }

    #[test]
    fn test_empty_logs_give_zeroed_summary() {
        let stats = SummaryStats::from_logs(&[]);
        assert_eq!(stats, SummaryStats::default());
        assert!(stats.chart_data.is_empty());
    }

    #[test]
    fn test_buckets_split_on_utc_date() {
        let late = Utc.with_ymd_and_hms(2024, 5, 1, 23, 59, 59).unwrap();
        let early = Utc.with_ymd_and_hms(2024, 5, 2, 0, 0, 0).unwrap();
        let logs = vec![log_at(1, 10.0, late), log_at(2, 20.0, early)];

        let stats = SummaryStats::from_logs(&logs);
        assert_eq!(stats.chart_data.len(), 2);
        assert_eq!(stats.chart_data[0].date, late.date_naive());
        assert_eq!(stats.chart_data[0].temperature, 10.0);
        assert_eq!(stats.chart_data[1].temperature, 20.0);
        assert_eq!(stats.min_temperature, 10.0);
        assert_eq!(stats.max_temperature, 20.0);
        assert_eq!(stats.avg_temperature, 15.0);
    }

    #[test]
    fn test_averages_are_rounded() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
        let logs = vec![log_at(1, 20.0, at), log_at(2, 20.0, at), log_at(3, 21.0, at)];

        let stats = SummaryStats::from_logs(&logs);
        assert_eq!(stats.avg_temperature, 20.3);
        assert_eq!(stats.avg_signal_strength, -60.0);
        assert_eq!(stats.total_readings, 3);
    }

    #[test]
    fn test_fleet_overview_counts() {
        let now = Utc::now();
        let device = |id, status, battery| Device {
            id,
            name: format!("Rover {}", id),
            status,
            battery,
            last_seen: now,
            created_at: now,
            updated_at: now,
        };
        let devices = vec![
            device(1, DeviceStatus::Online, 85.0),
            device(2, DeviceStatus::Online, 62.0),
            device(3, DeviceStatus::Offline, 15.0),
        ];

        let overview = FleetOverview::from_devices(&devices);
        assert_eq!(overview.active_rovers, 2);
        assert_eq!(overview.connectivity.offline, 1);
        assert_eq!(overview.connectivity.error, 0);
        assert_eq!(overview.avg_battery, 54.0);
    }

    #[tokio::test]
    async fn test_oversized_window_covers_all_history() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let rover = store
            .add_device("Rover Alpha", DeviceStatus::Online, 80.0, now)
            .await;
        store
            .insert_sensor_logs(&[NewSensorLog {
                device_id: rover.id,
                temperature: 18.0,
                humidity: 50.0,
                distance: 10.0,
                battery: 80.0,
                signal_strength: -60,
                created_at: Utc.with_ymd_and_hms(1990, 1, 1, 0, 0, 0).unwrap(),
            }])
            .await
            .unwrap();

        let stats = summarize(&store, None, u32::MAX).await.unwrap();
        assert_eq!(stats.total_readings, 1);
        assert_eq!(stats.avg_temperature, 18.0);
    }

    #[tokio::test]
    async fn test_summarize_surfaces_unavailable_store() {
        let store = MemoryStore::new();
        store.set_unavailable(true);
        let result = summarize(&store, None, 30).await;
        assert!(matches!(result, Err(Error::StoreUnavailable(_))));
    }

    #[tokio::test]
    async fn test_list_surfaces_unavailable_store() {
        let store = MemoryStore::new();
        store.set_unavailable(true);

        let plain = list_filtered(&store, &LogQuery::default()).await;
        assert!(matches!(plain, Err(Error::StoreUnavailable(_))));

        let search = LogQuery {
            search: Some("Alpha".to_string()),
            ..Default::default()
        };
        let searched = list_filtered(&store, &search).await;
        assert!(matches!(searched, Err(Error::StoreUnavailable(_))));
    }

    #[tokio::test]
    async fn test_zero_page_request_lists_first_page() {
        let store = MemoryStore::new();
        let query = LogQuery {
            page: PageRequest::new(Some(0), Some(0)),
            ..Default::default()
        };
        let page = list_filtered(&store, &query).await.unwrap();
        assert!(page.data.is_empty());
        assert_eq!(page.pagination.page, 1);
        assert_eq!(page.pagination.pages, 0);
    }

    #[test]
    fn test_fleet_overview_empty() {
        assert_eq!(FleetOverview::from_devices(&[]), FleetOverview::default());
    }
}
