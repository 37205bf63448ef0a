use crate::aggregate::{fleet_overview, list_filtered, summarize, FleetOverview, LogQuery, SummaryStats};
use crate::alerts;
use crate::errors::Error;
use crate::ingest::{ingest_batch, BatchReport};
use crate::liveness::reactivate;
use crate::metrics;
use crate::model::{
    Alert, LogFilter, LogSort, NewSensorLog, Page, PageRequest, SensorEntry, SensorLog,
};
use crate::store::FleetStore;
use crate::validate::validate_log;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{de, Deserialize, Deserializer, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::error;

const DEFAULT_WINDOW_DAYS: u32 = 30;

#[derive(Clone)]
struct AppState {
    store: Arc<dyn FleetStore>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorLogParams {
    page: Option<u32>,
    limit: Option<u32>,
    rover_id: Option<i64>,
    sort_by: Option<String>,
    sort_order: Option<String>,
    search: Option<String>,
    temp_min: Option<f64>,
    temp_max: Option<f64>,
    battery_min: Option<f64>,
    #[serde(default, deserialize_with = "lenient_datetime")]
    date_from: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient_datetime")]
    date_to: Option<DateTime<Utc>>,
}

/// Accepts RFC 3339 timestamps and bare `YYYY-MM-DD` dates, the latter read
/// as midnight UTC.
fn parse_date_param(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Some(at.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|midnight| midnight.and_utc())
}

fn lenient_datetime<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => parse_date_param(&raw)
            .map(Some)
            .ok_or_else(|| de::Error::custom(format!("invalid date: {}", raw))),
    }
}

impl SensorLogParams {
    fn into_query(self) -> LogQuery {
        LogQuery {
            filter: LogFilter {
                device_id: self.rover_id,
                device_ids: None,
                temperature_min: self.temp_min,
                temperature_max: self.temp_max,
                battery_min: self.battery_min,
                created_from: self.date_from,
                created_to: self.date_to,
            },
            search: self.search,
            sort: LogSort::from_params(self.sort_by.as_deref(), self.sort_order.as_deref()),
            page: PageRequest::new(self.page, self.limit),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsParams {
    rover_id: Option<i64>,
    days: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct BulkSensorsBody {
    #[serde(default)]
    sensors: Vec<SensorEntry>,
}

#[derive(Debug, Serialize)]
struct Envelope<T> {
    success: bool,
    data: T,
}

/// Paged listing: the page fields sit next to the success flag.
#[derive(Debug, Serialize)]
struct Listing<T> {
    success: bool,
    #[serde(flatten)]
    page: Page<T>,
}

fn ok<T: Serialize>(data: T) -> Json<Envelope<T>> {
    Json(Envelope {
        success: true,
        data,
    })
}

pub fn create_router(store: Arc<dyn FleetStore>) -> Router {
    let state = AppState { store };

    Router::new()
        .route("/api/health", get(health))
        .route("/metrics", get(metrics_handler))
        .route("/api/sensor-logs", get(get_sensor_logs).post(create_sensor_log))
        .route("/api/sensor-logs/stats/aggregated", get(get_stats))
        .route("/api/robots/:id/sensors/bulk", post(bulk_sensors))
        .route("/api/robots/:id/heartbeat", post(heartbeat))
        .route("/api/dashboard/stats", get(dashboard_stats))
        .route("/api/alerts/:id/resolve", post(resolve_alert))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "message": "Backend is running",
        "timestamp": Utc::now(),
    }))
}

async fn metrics_handler() -> Result<String, AppError> {
    metrics::gather_metrics().map_err(|e| AppError::Internal(e.into()))
}

async fn get_sensor_logs(
    State(state): State<AppState>,
    Query(params): Query<SensorLogParams>,
) -> Result<Json<Listing<SensorLog>>, AppError> {
    let page = list_filtered(state.store.as_ref(), &params.into_query()).await?;
    Ok(Json(Listing {
        success: true,
        page,
    }))
}

async fn create_sensor_log(
    State(state): State<AppState>,
    Json(log): Json<NewSensorLog>,
) -> Result<(StatusCode, Json<Envelope<u64>>), AppError> {
    validate_log(&log)?;
    if state.store.find_device(log.device_id).await?.is_none() {
        return Err(Error::device_not_found(log.device_id).into());
    }
    let inserted = state.store.insert_sensor_logs(std::slice::from_ref(&log)).await?;
    Ok((StatusCode::CREATED, ok(inserted)))
}

async fn get_stats(
    State(state): State<AppState>,
    Query(params): Query<StatsParams>,
) -> Result<Json<Envelope<SummaryStats>>, AppError> {
    let days = params
        .days
        .filter(|d| *d > 0)
        .unwrap_or(DEFAULT_WINDOW_DAYS);
    let stats = summarize(state.store.as_ref(), params.rover_id, days).await?;
    Ok(ok(stats))
}

async fn bulk_sensors(
    State(state): State<AppState>,
    Path(device_id): Path<i64>,
    Json(body): Json<BulkSensorsBody>,
) -> Result<Json<Envelope<BatchReport>>, AppError> {
    let report = ingest_batch(state.store.as_ref(), device_id, &body.sensors).await?;
    reactivate(state.store.as_ref(), device_id, Utc::now()).await?;
    Ok(ok(report))
}

async fn heartbeat(
    State(state): State<AppState>,
    Path(device_id): Path<i64>,
) -> Result<Json<Envelope<serde_json::Value>>, AppError> {
    let now = Utc::now();
    let promoted = reactivate(state.store.as_ref(), device_id, now).await?;
    if !promoted {
        state.store.touch_device(device_id, now).await?;
    }
    Ok(ok(json!({ "reactivated": promoted, "lastSeen": now })))
}

async fn dashboard_stats(
    State(state): State<AppState>,
) -> Result<Json<Envelope<FleetOverview>>, AppError> {
    Ok(ok(fleet_overview(state.store.as_ref()).await?))
}

async fn resolve_alert(
    State(state): State<AppState>,
    Path(alert_id): Path<i64>,
) -> Result<Json<Envelope<Alert>>, AppError> {
    let alert = alerts::resolve(state.store.as_ref(), alert_id, Utc::now()).await?;
    Ok(ok(alert))
}

enum AppError {
    Fleet(Error),
    Internal(anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::Fleet(Error::NotFound(msg)) => (StatusCode::NOT_FOUND, msg),
            AppError::Fleet(Error::Validation(msg)) => (StatusCode::BAD_REQUEST, msg),
            AppError::Fleet(e @ Error::StoreUnavailable(_)) => {
                error!("API error: {}", e);
                (StatusCode::SERVICE_UNAVAILABLE, "Store temporarily unavailable".to_string())
            }
            AppError::Fleet(e) => {
                error!("API error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
            AppError::Internal(e) => {
                error!("API error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        (status, Json(json!({ "success": false, "message": message }))).into_response()
    }
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        AppError::Fleet(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_params_build_query() {
        let params = SensorLogParams {
            page: Some(2),
            limit: Some(10),
            rover_id: Some(4),
            sort_by: Some("humidity".to_string()),
            sort_order: Some("asc".to_string()),
            temp_min: Some(15.0),
            ..Default::default()
        };
        let query = params.into_query();
        assert_eq!(query.filter.device_id, Some(4));
        assert_eq!(query.filter.temperature_min, Some(15.0));
        assert_eq!((query.page.page(), query.page.limit()), (2, 10));
        assert_eq!(query.sort, LogSort::from_params(Some("humidity"), Some("asc")));
    }

    #[test]
    fn test_date_params_accept_plain_dates() {
        let uri: axum::http::Uri = "http://localhost/api/sensor-logs?dateFrom=2024-05-01&dateTo=2024-05-02T12:30:00Z"
            .parse()
            .unwrap();
        let Query(params) = Query::<SensorLogParams>::try_from_uri(&uri).unwrap();
        let query = params.into_query();

        assert_eq!(
            query.filter.created_from,
            Some(Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(
            query.filter.created_to,
            Some(Utc.with_ymd_and_hms(2024, 5, 2, 12, 30, 0).unwrap())
        );
    }

    #[test]
    fn test_malformed_date_param_is_rejected() {
        assert_eq!(parse_date_param("yesterday"), None);
        let uri: axum::http::Uri = "http://localhost/api/sensor-logs?dateFrom=yesterday"
            .parse()
            .unwrap();
        assert!(Query::<SensorLogParams>::try_from_uri(&uri).is_err());
    }

    #[test]
    fn test_listing_carries_success_flag() {
        let listing = Listing::<SensorLog> {
            success: true,
            page: Page::empty(PageRequest::default()),
        };
        let body = serde_json::to_value(&listing).unwrap();
        assert_eq!(body["success"], true);
        assert!(body["data"].as_array().unwrap().is_empty());
        assert_eq!(body["pagination"]["page"], 1);
        assert_eq!(body["pagination"]["total"], 0);
    }

    #[test]
    fn test_error_status_codes() {
        let status = |e: Error| AppError::from(e).into_response().status();
        assert_eq!(status(Error::NotFound("x".into())), StatusCode::NOT_FOUND);
        assert_eq!(status(Error::Validation("x".into())), StatusCode::BAD_REQUEST);
        assert_eq!(
            status(Error::StoreUnavailable("x".into())),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(status(Error::ChannelSend), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
