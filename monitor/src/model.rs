use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Connectivity state of a rover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "device_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Online,
    Offline,
    Error,
}

/// A tracked rover/robot.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: i64,
    pub name: String,
    pub status: DeviceStatus,
    pub battery: f64,
    pub last_seen: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Current value of a named sensor, keyed by `(device_id, name, kind)`.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct SensorReading {
    pub id: i64,
    pub device_id: i64,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub value: f64,
    pub unit: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One entry of a bulk sensor upload as sent by a device.
///
/// Every field is optional on the wire so that a malformed entry can be
/// skipped without rejecting the whole batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SensorEntry {
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default)]
    pub unit: String,
}

/// A validated entry ready to be written.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NewReading<'a> {
    pub device_id: i64,
    pub name: &'a str,
    pub kind: &'a str,
    pub value: f64,
    pub unit: &'a str,
}

/// Historical telemetry sample.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct SensorLog {
    pub id: i64,
    pub device_id: i64,
    pub temperature: f64,
    pub humidity: f64,
    pub distance: f64,
    pub battery: f64,
    pub signal_strength: i32,
    pub created_at: DateTime<Utc>,
}

/// Telemetry sample as received over MQTT or REST.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSensorLog {
    #[serde(default, alias = "roverId")]
    pub device_id: i64,
    pub temperature: f64,
    pub humidity: f64,
    pub distance: f64,
    #[serde(default)]
    pub battery: f64,
    #[serde(default)]
    pub signal_strength: i32,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "alert_kind", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    LowBattery,
    ObstacleDetected,
    ConnectionLost,
    HighTemperature,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "alert_severity", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub id: i64,
    pub device_id: i64,
    #[serde(rename = "type")]
    pub kind: AlertKind,
    pub severity: Severity,
    pub message: String,
    pub is_resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Sensor-log filter. All present conditions must hold.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogFilter {
    pub device_id: Option<i64>,
    /// Set from a name search; restricts results to these devices.
    pub device_ids: Option<Vec<i64>>,
    pub temperature_min: Option<f64>,
    pub temperature_max: Option<f64>,
    pub battery_min: Option<f64>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_to: Option<DateTime<Utc>>,
}

impl LogFilter {
    pub fn matches(&self, log: &SensorLog) -> bool {
        self.device_id.map_or(true, |id| log.device_id == id)
            && self
                .device_ids
                .as_ref()
                .map_or(true, |ids| ids.contains(&log.device_id))
            && self.temperature_min.map_or(true, |min| log.temperature >= min)
            && self.temperature_max.map_or(true, |max| log.temperature <= max)
            && self.battery_min.map_or(true, |min| log.battery >= min)
            && self.created_from.map_or(true, |from| log.created_at >= from)
            && self.created_to.map_or(true, |to| log.created_at <= to)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    Temperature,
    Humidity,
    Distance,
    Battery,
    SignalStrength,
    CreatedAt,
}

impl SortField {
    pub fn parse(field: &str) -> Option<Self> {
        match field {
            "temperature" => Some(SortField::Temperature),
            "humidity" => Some(SortField::Humidity),
            "distance" => Some(SortField::Distance),
            "battery" => Some(SortField::Battery),
            "signalStrength" => Some(SortField::SignalStrength),
            "createdAt" => Some(SortField::CreatedAt),
            _ => None,
        }
    }

    pub fn column(self) -> &'static str {
        match self {
            SortField::Temperature => "temperature",
            SortField::Humidity => "humidity",
            SortField::Distance => "distance",
            SortField::Battery => "battery",
            SortField::SignalStrength => "signal_strength",
            SortField::CreatedAt => "created_at",
        }
    }

    fn compare(self, a: &SensorLog, b: &SensorLog) -> Ordering {
        match self {
            SortField::Temperature => a.temperature.total_cmp(&b.temperature),
            SortField::Humidity => a.humidity.total_cmp(&b.humidity),
            SortField::Distance => a.distance.total_cmp(&b.distance),
            SortField::Battery => a.battery.total_cmp(&b.battery),
            SortField::SignalStrength => a.signal_strength.cmp(&b.signal_strength),
            SortField::CreatedAt => a.created_at.cmp(&b.created_at),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub fn keyword(self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogSort {
    pub field: SortField,
    pub order: SortOrder,
}

impl LogSort {
    /// Builds a sort from raw request parameters. An unknown field falls back
    /// to newest first, whatever order was asked for.
    pub fn from_params(sort_by: Option<&str>, sort_order: Option<&str>) -> Self {
        let order = match sort_order {
            Some("asc") => SortOrder::Asc,
            _ => SortOrder::Desc,
        };
        match sort_by.map(SortField::parse) {
            None => LogSort {
                field: SortField::CreatedAt,
                order,
            },
            Some(Some(field)) => LogSort { field, order },
            Some(None) => LogSort::default(),
        }
    }

    /// Ordering used by in-process stores; ties broken by id.
    pub fn compare(&self, a: &SensorLog, b: &SensorLog) -> Ordering {
        let ord = self.field.compare(a, b).then_with(|| a.id.cmp(&b.id));
        match self.order {
            SortOrder::Asc => ord,
            SortOrder::Desc => ord.reverse(),
        }
    }
}

impl Default for LogSort {
    fn default() -> Self {
        LogSort {
            field: SortField::CreatedAt,
            order: SortOrder::Desc,
        }
    }
}

pub const DEFAULT_PAGE_LIMIT: u32 = 20;
pub const MAX_PAGE_LIMIT: u32 = 1000;

/// 1-indexed page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    page: u32,
    limit: u32,
}

impl PageRequest {
    pub fn new(page: Option<u32>, limit: Option<u32>) -> Self {
        let page = page.unwrap_or(1).max(1);
        let limit = match limit {
            None | Some(0) => DEFAULT_PAGE_LIMIT,
            Some(l) => l.min(MAX_PAGE_LIMIT),
        };
        PageRequest { page, limit }
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.limit)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        PageRequest::new(None, None)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub total: u64,
    pub pages: u64,
}

/// REST API response wrapper
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub pagination: Pagination,
}

impl<T> Page<T> {
    pub fn new(data: Vec<T>, total: u64, request: PageRequest) -> Self {
        Page {
            data,
            pagination: Pagination {
                page: request.page(),
                limit: request.limit(),
                total,
                pages: total.div_ceil(u64::from(request.limit().max(1))),
            },
        }
    }

    pub fn empty(request: PageRequest) -> Self {
        Page::new(Vec::new(), 0, request)
    }
}
