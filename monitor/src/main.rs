use fleet_monitor::config::Config;
use fleet_monitor::liveness::LivenessMonitor;
use fleet_monitor::mqtt::MqttContext;
use fleet_monitor::pg_store::PgStore;
use fleet_monitor::store::FleetStore;
use fleet_monitor::{batching, db, metrics, mqtt, rest};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    info!("Starting fleet monitor");
    info!("HTTP server: {}", config.http_addr);
    info!("Database: {}", config.database_host());
    info!(
        "Liveness: check every {:?}, offline after {:?}",
        config.liveness_interval, config.liveness_threshold
    );

    if let Err(e) = metrics::init_metrics() {
        error!("Failed to register metrics: {}", e);
        std::process::exit(1);
    }

    let pool = match db::make_pool(&config.database_url, config.db_max_connections).await {
        Ok(pool) => pool,
        Err(e) => {
            error!("Failed to connect to database: {}", e);
            std::process::exit(1);
        }
    };
    let pg_store = PgStore::new(pool.clone());
    let store: Arc<dyn FleetStore> = Arc::new(pg_store);

    let liveness = match LivenessMonitor::new(
        store.clone(),
        config.liveness_interval,
        config.liveness_threshold,
    ) {
        Ok(monitor) => monitor.spawn(),
        Err(e) => {
            error!("Invalid liveness settings: {}", e);
            std::process::exit(1);
        }
    };

    // Create bounded channel for sensor logs
    info!("Channel capacity: {}", config.channel_capacity);
    let (tx, rx) = mpsc::channel(config.channel_capacity);

    let mut mqtt_handle = if config.mqtt_enabled {
        info!("MQTT broker: {}:{}", config.mqtt_broker, config.mqtt_port);
        let client_id = format!("fleet-monitor-{}", uuid::Uuid::new_v4());
        let ctx = MqttContext {
            tx,
            store: store.clone(),
        };
        let (broker, port) = (config.mqtt_broker.clone(), config.mqtt_port);
        Some(tokio::spawn(async move {
            if let Err(e) = mqtt::run_mqtt(broker, port, client_id, ctx).await {
                error!("MQTT task failed: {}", e);
            }
        }))
    } else {
        info!("MQTT ingestion disabled");
        drop(tx);
        None
    };

    let batcher = batching::spawn_batcher(
        rx,
        store.clone(),
        config.batch_size,
        config.batch_timeout_ms,
    );

    let app = rest::create_router(store);

    let listener = match tokio::net::TcpListener::bind(&config.http_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", config.http_addr, e);
            std::process::exit(1);
        }
    };

    info!("HTTP server listening on {}", config.http_addr);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP server error: {}", e);
        }
    });

    let mqtt_done = async {
        match mqtt_handle.as_mut() {
            Some(handle) => {
                let _ = handle.await;
            }
            None => std::future::pending::<()>().await,
        }
    };

    let mqtt_exited = tokio::select! {
        _ = mqtt_done => {
            error!("MQTT task terminated");
            true
        }
        _ = server_handle => {
            error!("HTTP server terminated");
            false
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
            false
        }
    };

    info!("Shutting down");

    // Stopping intake drops the last log sender so the batcher can flush.
    if let Some(handle) = mqtt_handle.filter(|_| !mqtt_exited) {
        handle.abort();
        let _ = handle.await;
    }
    batcher.drain(SHUTDOWN_TIMEOUT).await;
    liveness.shutdown(SHUTDOWN_TIMEOUT).await;
    pool.close().await;
    info!("Shutdown complete");
}
