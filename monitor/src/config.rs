use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::errors::{Error, Result};

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub db_max_connections: u32,
    pub http_addr: String,
    pub mqtt_enabled: bool,
    pub mqtt_broker: String,
    pub mqtt_port: u16,
    pub batch_size: usize,
    pub batch_timeout_ms: u64,
    pub channel_capacity: usize,
    pub liveness_interval: Duration,
    pub liveness_threshold: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup. Only the database URL
    /// is mandatory; malformed values are errors rather than silent defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL")
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| Error::Config("DATABASE_URL is not set".to_string()))?;

        let liveness_interval_secs: u64 = parse_or(&lookup, "LIVENESS_INTERVAL_SECS", 10)?;
        let liveness_threshold_secs: u64 = parse_or(
            &lookup,
            "LIVENESS_THRESHOLD_SECS",
            liveness_interval_secs.saturating_mul(3),
        )?;

        Ok(Self {
            database_url,
            db_max_connections: parse_or(&lookup, "DB_MAX_CONNECTIONS", 20)?,
            http_addr: lookup("HTTP_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
            mqtt_enabled: parse_or(&lookup, "MQTT_ENABLED", true)?,
            mqtt_broker: lookup("MQTT_BROKER").unwrap_or_else(|| "localhost".to_string()),
            mqtt_port: parse_or(&lookup, "MQTT_PORT", 1883)?,
            batch_size: parse_or(&lookup, "BATCH_SIZE", 500)?,
            batch_timeout_ms: parse_or(&lookup, "BATCH_TIMEOUT_MS", 200)?,
            channel_capacity: parse_or(&lookup, "CHANNEL_CAPACITY", 10_000)?,
            liveness_interval: Duration::from_secs(liveness_interval_secs),
            liveness_threshold: Duration::from_secs(liveness_threshold_secs),
        })
    }

    /// Host part of the database URL, safe to log.
    pub fn database_host(&self) -> &str {
        let rest = self.database_url.rsplit('@').next().unwrap_or_default();
        let rest = rest.rsplit("://").next().unwrap_or(rest);
        rest.split('/')
            .next()
            .filter(|host| !host.is_empty())
            .unwrap_or("***")
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("{}={:?} is invalid: {}", key, raw, e))),
    }
}
