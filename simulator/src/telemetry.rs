use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// One time-series sample, published on `rovers/{id}/logs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogSample {
    pub temperature: f64,
    pub humidity: f64,
    pub distance: f64,
    pub battery: f64,
    pub signal_strength: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorValue {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub value: f64,
    pub unit: String,
}

/// Current values of every onboard sensor, published on `rovers/{id}/sensors`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorSnapshot {
    pub sensors: Vec<SensorValue>,
}

pub fn logs_topic(rover_id: u32) -> String {
    format!("rovers/{}/logs", rover_id)
}

pub fn sensors_topic(rover_id: u32) -> String {
    format!("rovers/{}/sensors", rover_id)
}

pub fn generate_log(rng: &mut impl Rng) -> LogSample {
    let temperature = if rng.gen_bool(0.05) {
        rng.gen_range(-50.0..100.0) // 5% outliers
    } else {
        rng.gen_range(15.0..35.0)
    };

    let humidity = if rng.gen_bool(0.05) {
        rng.gen_range(0.0..100.0)
    } else {
        rng.gen_range(30.0..80.0)
    };

    let battery = if rng.gen_bool(0.02) {
        rng.gen_range(0.0..20.0) // 2% low battery
    } else {
        rng.gen_range(20.0..100.0)
    };

    LogSample {
        temperature,
        humidity,
        distance: rng.gen_range(0.0..400.0),
        battery,
        signal_strength: rng.gen_range(-90..-30),
        created_at: Utc::now(),
    }
}

/// Snapshot mirroring a log sample, plus a few slow-moving extras.
pub fn generate_snapshot(rng: &mut impl Rng, log: &LogSample) -> SensorSnapshot {
    let value = |name: &str, kind: &str, value: f64, unit: &str| SensorValue {
        name: name.to_string(),
        kind: kind.to_string(),
        value,
        unit: unit.to_string(),
    };

    SensorSnapshot {
        sensors: vec![
            value("temperature", "environment", log.temperature, "C"),
            value("humidity", "environment", log.humidity, "%"),
            value("ultrasonic", "distance", log.distance, "cm"),
            value("battery", "power", log.battery, "%"),
            value("motor_left", "drive", rng.gen_range(0.0..255.0), "pwm"),
            value("motor_right", "drive", rng.gen_range(0.0..255.0), "pwm"),
        ],
    }
}
