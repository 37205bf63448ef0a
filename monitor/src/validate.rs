use crate::errors::{Error, Result};
use crate::model::{NewReading, NewSensorLog, SensorEntry};

const TEMP_MIN: f64 = -50.0;
const TEMP_MAX: f64 = 100.0;
const HUMIDITY_MIN: f64 = 0.0;
const HUMIDITY_MAX: f64 = 100.0;
const BATTERY_MIN: f64 = 0.0;
const BATTERY_MAX: f64 = 100.0;

/// Validates one entry of a bulk sensor upload.
pub fn validate_entry(device_id: i64, entry: &SensorEntry) -> Result<NewReading<'_>> {
    if entry.name.trim().is_empty() {
        return Err(Error::Validation("Sensor name cannot be empty".to_string()));
    }

    if entry.kind.trim().is_empty() {
        return Err(Error::Validation(format!(
            "Sensor {} has no type",
            entry.name
        )));
    }

    if entry.unit.trim().is_empty() {
        return Err(Error::Validation(format!(
            "Sensor {} has no unit",
            entry.name
        )));
    }

    let value = match entry.value {
        Some(v) if v.is_finite() => v,
        Some(v) => {
            return Err(Error::Validation(format!(
                "Sensor {} value {} is not a finite number",
                entry.name, v
            )))
        }
        None => {
            return Err(Error::Validation(format!(
                "Sensor {} has no value",
                entry.name
            )))
        }
    };

    Ok(NewReading {
        device_id,
        name: &entry.name,
        kind: &entry.kind,
        value,
        unit: &entry.unit,
    })
}

/// Validates a telemetry sample for the time-series path.
pub fn validate_log(log: &NewSensorLog) -> Result<()> {
    if log.device_id <= 0 {
        return Err(Error::Validation(format!(
            "Invalid device id {}",
            log.device_id
        )));
    }

    if !(TEMP_MIN..=TEMP_MAX).contains(&log.temperature) {
        return Err(Error::Validation(format!(
            "Temperature {} out of range [{}, {}]",
            log.temperature, TEMP_MIN, TEMP_MAX
        )));
    }

    if !(HUMIDITY_MIN..=HUMIDITY_MAX).contains(&log.humidity) {
        return Err(Error::Validation(format!(
            "Humidity {} out of range [{}, {}]",
            log.humidity, HUMIDITY_MIN, HUMIDITY_MAX
        )));
    }

    if !(BATTERY_MIN..=BATTERY_MAX).contains(&log.battery) {
        return Err(Error::Validation(format!(
            "Battery {} out of range [{}, {}]",
            log.battery, BATTERY_MIN, BATTERY_MAX
        )));
    }

    if !log.distance.is_finite() || log.distance < 0.0 {
        return Err(Error::Validation(format!(
            "Distance {} must be a non-negative number",
            log.distance
        )));
    }

    Ok(())
}
