use lazy_static::lazy_static;
use prometheus::{
    Encoder, Gauge, Histogram, HistogramOpts, IntCounter, Opts, Registry, TextEncoder,
};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref MESSAGES_TOTAL: IntCounter = IntCounter::with_opts(Opts::new(
        "fleet_mqtt_messages_total",
        "Total messages received from MQTT"
    ))
    .expect("metric can be created");
    pub static ref VALID_MESSAGES_TOTAL: IntCounter = IntCounter::with_opts(Opts::new(
        "fleet_mqtt_valid_messages_total",
        "Total valid messages after validation"
    ))
    .expect("metric can be created");
    pub static ref INVALID_MESSAGES_TOTAL: IntCounter = IntCounter::with_opts(Opts::new(
        "fleet_mqtt_invalid_messages_total",
        "Total invalid messages rejected"
    ))
    .expect("metric can be created");
    pub static ref DB_FAILURES_TOTAL: IntCounter = IntCounter::with_opts(Opts::new(
        "fleet_db_failures_total",
        "Total transient database failures"
    ))
    .expect("metric can be created");
    pub static ref INGEST_LATENCY_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "fleet_log_ingest_latency_seconds",
            "Time taken to write a sensor log batch"
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0
        ])
    )
    .expect("metric can be created");
    pub static ref BATCH_SIZE: Gauge = Gauge::with_opts(Opts::new(
        "fleet_log_batch_size",
        "Current sensor log batch size being processed"
    ))
    .expect("metric can be created");
    pub static ref CHANNEL_FULL_TOTAL: IntCounter = IntCounter::with_opts(Opts::new(
        "fleet_channel_full_total",
        "Total number of times the log channel was full (backpressure events)"
    ))
    .expect("metric can be created");
    pub static ref SWEEPS_TOTAL: IntCounter = IntCounter::with_opts(Opts::new(
        "fleet_liveness_sweeps_total",
        "Total liveness sweeps completed"
    ))
    .expect("metric can be created");
    pub static ref SWEEP_FAILURES_TOTAL: IntCounter = IntCounter::with_opts(Opts::new(
        "fleet_liveness_sweep_failures_total",
        "Total liveness sweeps that failed"
    ))
    .expect("metric can be created");
    pub static ref DEVICES_MARKED_OFFLINE_TOTAL: IntCounter = IntCounter::with_opts(Opts::new(
        "fleet_devices_marked_offline_total",
        "Total devices demoted to offline by the liveness monitor"
    ))
    .expect("metric can be created");
    pub static ref READINGS_CREATED_TOTAL: IntCounter = IntCounter::with_opts(Opts::new(
        "fleet_readings_created_total",
        "Sensor readings created by bulk uploads"
    ))
    .expect("metric can be created");
    pub static ref READINGS_UPDATED_TOTAL: IntCounter = IntCounter::with_opts(Opts::new(
        "fleet_readings_updated_total",
        "Sensor readings updated by bulk uploads"
    ))
    .expect("metric can be created");
    pub static ref READINGS_SKIPPED_TOTAL: IntCounter = IntCounter::with_opts(Opts::new(
        "fleet_readings_skipped_total",
        "Bulk upload entries skipped by validation"
    ))
    .expect("metric can be created");
}

pub fn init_metrics() -> prometheus::Result<()> {
    REGISTRY.register(Box::new(MESSAGES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(VALID_MESSAGES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(INVALID_MESSAGES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(DB_FAILURES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(INGEST_LATENCY_SECONDS.clone()))?;
    REGISTRY.register(Box::new(BATCH_SIZE.clone()))?;
    REGISTRY.register(Box::new(CHANNEL_FULL_TOTAL.clone()))?;
    REGISTRY.register(Box::new(SWEEPS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(SWEEP_FAILURES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(DEVICES_MARKED_OFFLINE_TOTAL.clone()))?;
    REGISTRY.register(Box::new(READINGS_CREATED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(READINGS_UPDATED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(READINGS_SKIPPED_TOTAL.clone()))?;
    Ok(())
}

pub fn gather_metrics() -> prometheus::Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}
