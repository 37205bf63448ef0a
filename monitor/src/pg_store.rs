//! Postgres-backed [`FleetStore`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};

use crate::db::with_retry;
use crate::errors::{Error, Result};
use crate::model::{
    Alert, Device, LogFilter, LogSort, NewReading, NewSensorLog, PageRequest, SensorLog,
    SensorReading,
};
use crate::store::FleetStore;

const DEVICE_COLUMNS: &str = "id, name, status, battery, last_seen, created_at, updated_at";
const READING_COLUMNS: &str = "id, device_id, name, kind, value, unit, created_at, updated_at";
const LOG_COLUMNS: &str =
    "id, device_id, temperature, humidity, distance, battery, signal_strength, created_at";
const ALERT_COLUMNS: &str =
    "id, device_id, kind, severity, message, is_resolved, resolved_at, created_at";

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Escapes LIKE wildcards so a search term matches literally.
fn like_pattern(needle: &str) -> String {
    let mut escaped = String::with_capacity(needle.len() + 2);
    escaped.push('%');
    for c in needle.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

fn push_clause(qb: &mut QueryBuilder<'_, Postgres>, first: &mut bool, sql: &str) {
    qb.push(if *first { " WHERE " } else { " AND " });
    *first = false;
    qb.push(sql);
}

fn push_conditions(qb: &mut QueryBuilder<'_, Postgres>, filter: &LogFilter) {
    let mut first = true;

    if let Some(device_id) = filter.device_id {
        push_clause(qb, &mut first, "device_id = ");
        qb.push_bind(device_id);
    }
    if let Some(ids) = &filter.device_ids {
        push_clause(qb, &mut first, "device_id = ANY(");
        qb.push_bind(ids.clone());
        qb.push(")");
    }
    if let Some(min) = filter.temperature_min {
        push_clause(qb, &mut first, "temperature >= ");
        qb.push_bind(min);
    }
    if let Some(max) = filter.temperature_max {
        push_clause(qb, &mut first, "temperature <= ");
        qb.push_bind(max);
    }
    if let Some(min) = filter.battery_min {
        push_clause(qb, &mut first, "battery >= ");
        qb.push_bind(min);
    }
    if let Some(from) = filter.created_from {
        push_clause(qb, &mut first, "created_at >= ");
        qb.push_bind(from);
    }
    if let Some(to) = filter.created_to {
        push_clause(qb, &mut first, "created_at <= ");
        qb.push_bind(to);
    }
}

#[async_trait]
impl FleetStore for PgStore {
    async fn mark_stale_offline(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let pool = &self.pool;
        let result = with_retry("mark stale devices offline", move || async move {
            sqlx::query(
                r#"
                UPDATE devices
                SET status = 'offline', updated_at = NOW()
                WHERE status = 'online' AND last_seen < $1
                "#,
            )
            .bind(cutoff)
            .execute(pool)
            .await
        })
        .await?;

        Ok(result.rows_affected())
    }

    async fn find_device(&self, device_id: i64) -> Result<Option<Device>> {
        let pool = &self.pool;
        let sql = format!("SELECT {} FROM devices WHERE id = $1", DEVICE_COLUMNS);
        let sql = sql.as_str();
        with_retry("find device", move || async move {
            sqlx::query_as::<_, Device>(sql)
                .bind(device_id)
                .fetch_optional(pool)
                .await
        })
        .await
    }

    async fn list_devices(&self) -> Result<Vec<Device>> {
        let pool = &self.pool;
        let sql = format!("SELECT {} FROM devices ORDER BY created_at DESC", DEVICE_COLUMNS);
        let sql = sql.as_str();
        with_retry("list devices", move || async move {
            sqlx::query_as::<_, Device>(sql).fetch_all(pool).await
        })
        .await
    }

    async fn find_device_ids_by_name(&self, needle: &str) -> Result<Vec<i64>> {
        let pool = &self.pool;
        let pattern = like_pattern(needle);
        let pattern = pattern.as_str();
        with_retry("search devices by name", move || async move {
            sqlx::query_scalar::<_, i64>("SELECT id FROM devices WHERE name ILIKE $1 ORDER BY id")
                .bind(pattern)
                .fetch_all(pool)
                .await
        })
        .await
    }

    async fn touch_device(&self, device_id: i64, now: DateTime<Utc>) -> Result<()> {
        let pool = &self.pool;
        let result = with_retry("touch device", move || async move {
            sqlx::query("UPDATE devices SET last_seen = $2, updated_at = $2 WHERE id = $1")
                .bind(device_id)
                .bind(now)
                .execute(pool)
                .await
        })
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::device_not_found(device_id));
        }
        Ok(())
    }

    async fn reactivate_device(&self, device_id: i64, now: DateTime<Utc>) -> Result<bool> {
        let pool = &self.pool;
        let result = with_retry("reactivate device", move || async move {
            sqlx::query(
                r#"
                UPDATE devices
                SET status = 'online', last_seen = $2, updated_at = $2
                WHERE id = $1 AND status = 'offline'
                "#,
            )
            .bind(device_id)
            .bind(now)
            .execute(pool)
            .await
        })
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn find_reading(
        &self,
        device_id: i64,
        name: &str,
        kind: &str,
    ) -> Result<Option<SensorReading>> {
        let pool = &self.pool;
        let sql = format!(
            "SELECT {} FROM sensors WHERE device_id = $1 AND name = $2 AND kind = $3 ORDER BY id LIMIT 1",
            READING_COLUMNS
        );
        let sql = sql.as_str();
        with_retry("find sensor reading", move || async move {
            sqlx::query_as::<_, SensorReading>(sql)
                .bind(device_id)
                .bind(name)
                .bind(kind)
                .fetch_optional(pool)
                .await
        })
        .await
    }

    async fn create_reading(
        &self,
        reading: &NewReading<'_>,
        now: DateTime<Utc>,
    ) -> Result<SensorReading> {
        let pool = &self.pool;
        let sql = format!(
            r#"
            INSERT INTO sensors (device_id, name, kind, value, unit, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $6)
            RETURNING {}
            "#,
            READING_COLUMNS
        );
        let sql = sql.as_str();
        let reading = *reading;
        with_retry("create sensor reading", move || async move {
            sqlx::query_as::<_, SensorReading>(sql)
                .bind(reading.device_id)
                .bind(reading.name)
                .bind(reading.kind)
                .bind(reading.value)
                .bind(reading.unit)
                .bind(now)
                .fetch_one(pool)
                .await
        })
        .await
    }

    async fn update_reading(
        &self,
        reading_id: i64,
        value: f64,
        unit: &str,
        now: DateTime<Utc>,
    ) -> Result<SensorReading> {
        let pool = &self.pool;
        let sql = format!(
            "UPDATE sensors SET value = $2, unit = $3, updated_at = $4 WHERE id = $1 RETURNING {}",
            READING_COLUMNS
        );
        let sql = sql.as_str();
        with_retry("update sensor reading", move || async move {
            sqlx::query_as::<_, SensorReading>(sql)
                .bind(reading_id)
                .bind(value)
                .bind(unit)
                .bind(now)
                .fetch_optional(pool)
                .await
        })
        .await?
        .ok_or_else(|| Error::NotFound(format!("sensor reading {} does not exist", reading_id)))
    }

    async fn insert_sensor_logs(&self, logs: &[NewSensorLog]) -> Result<u64> {
        if logs.is_empty() {
            return Ok(0);
        }

        let device_ids: Vec<i64> = logs.iter().map(|l| l.device_id).collect();
        let temperatures: Vec<f64> = logs.iter().map(|l| l.temperature).collect();
        let humidities: Vec<f64> = logs.iter().map(|l| l.humidity).collect();
        let distances: Vec<f64> = logs.iter().map(|l| l.distance).collect();
        let batteries: Vec<f64> = logs.iter().map(|l| l.battery).collect();
        let signals: Vec<i32> = logs.iter().map(|l| l.signal_strength).collect();
        let timestamps: Vec<DateTime<Utc>> = logs.iter().map(|l| l.created_at).collect();

        // Samples for unknown devices are dropped instead of failing the batch.
        let query = r#"
            INSERT INTO sensor_logs
                (device_id, temperature, humidity, distance, battery, signal_strength, created_at)
            SELECT u.device_id, u.temperature, u.humidity, u.distance, u.battery, u.signal_strength, u.created_at
            FROM UNNEST($1::int8[], $2::float8[], $3::float8[], $4::float8[], $5::float8[], $6::int4[], $7::timestamptz[])
                AS u(device_id, temperature, humidity, distance, battery, signal_strength, created_at)
            WHERE EXISTS (SELECT 1 FROM devices d WHERE d.id = u.device_id)
            "#;

        let pool = &self.pool;
        let (device_ids, temperatures, humidities, distances, batteries, signals, timestamps) = (
            &device_ids,
            &temperatures,
            &humidities,
            &distances,
            &batteries,
            &signals,
            &timestamps,
        );
        let result = with_retry("insert sensor logs", move || async move {
            sqlx::query(query)
                .bind(device_ids)
                .bind(temperatures)
                .bind(humidities)
                .bind(distances)
                .bind(batteries)
                .bind(signals)
                .bind(timestamps)
                .execute(pool)
                .await
        })
        .await?;

        Ok(result.rows_affected())
    }

    async fn query_sensor_logs(
        &self,
        filter: &LogFilter,
        sort: LogSort,
        page: PageRequest,
    ) -> Result<(Vec<SensorLog>, u64)> {
        let pool = &self.pool;

        let total = with_retry("count sensor logs", move || async move {
            let mut qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM sensor_logs");
            push_conditions(&mut qb, filter);
            qb.build_query_scalar::<i64>().fetch_one(pool).await
        })
        .await?;

        let records = with_retry("query sensor logs", move || async move {
            let mut qb = QueryBuilder::<Postgres>::new(format!(
                "SELECT {} FROM sensor_logs",
                LOG_COLUMNS
            ));
            push_conditions(&mut qb, filter);
            // Column names come from a closed enum, never from the request.
            qb.push(format!(
                " ORDER BY {col} {dir}, id {dir}",
                col = sort.field.column(),
                dir = sort.order.keyword()
            ));
            qb.push(" LIMIT ");
            qb.push_bind(i64::from(page.limit()));
            qb.push(" OFFSET ");
            qb.push_bind(page.offset() as i64);
            qb.build_query_as::<SensorLog>().fetch_all(pool).await
        })
        .await?;

        Ok((records, total.max(0) as u64))
    }

    async fn sensor_logs_since(
        &self,
        device_id: Option<i64>,
        since: DateTime<Utc>,
    ) -> Result<Vec<SensorLog>> {
        let pool = &self.pool;
        let sql = format!(
            r#"
            SELECT {}
            FROM sensor_logs
            WHERE created_at >= $1 AND ($2::int8 IS NULL OR device_id = $2)
            ORDER BY created_at ASC, id ASC
            "#,
            LOG_COLUMNS
        );
        let sql = sql.as_str();
        // Open-ended windows arrive as the earliest representable instant,
        // which is outside the timestamptz range.
        let since = since.max(DateTime::<Utc>::UNIX_EPOCH);
        with_retry("load sensor log window", move || async move {
            sqlx::query_as::<_, SensorLog>(sql)
                .bind(since)
                .bind(device_id)
                .fetch_all(pool)
                .await
        })
        .await
    }

    async fn find_alert(&self, alert_id: i64) -> Result<Option<Alert>> {
        let pool = &self.pool;
        let sql = format!("SELECT {} FROM alerts WHERE id = $1", ALERT_COLUMNS);
        let sql = sql.as_str();
        with_retry("find alert", move || async move {
            sqlx::query_as::<_, Alert>(sql)
                .bind(alert_id)
                .fetch_optional(pool)
                .await
        })
        .await
    }

    async fn mark_alert_resolved(
        &self,
        alert_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<Alert>> {
        let pool = &self.pool;
        let sql = format!(
            r#"
            UPDATE alerts
            SET is_resolved = TRUE, resolved_at = $2
            WHERE id = $1 AND NOT is_resolved
            RETURNING {}
            "#,
            ALERT_COLUMNS
        );
        let sql = sql.as_str();
        with_retry("resolve alert", move || async move {
            sqlx::query_as::<_, Alert>(sql)
                .bind(alert_id)
                .bind(now)
                .fetch_optional(pool)
                .await
        })
        .await
    }
}
