mod telemetry;

use clap::Parser;
use rumqttc::{AsyncClient, MqttOptions, QoS};
use serde::Serialize;
use std::time::{Duration, Instant};
use telemetry::{generate_log, generate_snapshot, logs_topic, sensors_topic};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const BURST_SIZE: u64 = 200;

/// Publishes synthetic rover telemetry to an MQTT broker.
#[derive(Debug, Parser)]
#[command(name = "rover-simulator", version)]
struct Args {
    #[arg(long, env = "MQTT_BROKER", default_value = "localhost")]
    broker: String,

    #[arg(long, env = "MQTT_PORT", default_value_t = 1883)]
    port: u16,

    /// Log messages per second across the whole fleet
    #[arg(long, env = "RATE", default_value_t = 1000)]
    rate: u64,

    /// Rover ids 1..=N are simulated
    #[arg(long, env = "ROVERS", default_value_t = 10)]
    rovers: u32,

    /// Publish a bulk sensor snapshot per rover every N bursts (0 disables)
    #[arg(long, env = "SNAPSHOT_EVERY", default_value_t = 5)]
    snapshot_every: u64,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if args.rate == 0 || args.rovers == 0 {
        error!("RATE and ROVERS must be positive");
        std::process::exit(1);
    }

    info!("Starting rover simulator");
    info!(
        "Broker: {}:{}, Rate: {} msg/s, Rovers: {}",
        args.broker, args.port, args.rate, args.rovers
    );

    let client_id = format!("rover-sim-{}", uuid::Uuid::new_v4());

    let mut mqtt_options = MqttOptions::new(client_id, &args.broker, args.port);
    mqtt_options.set_keep_alive(Duration::from_secs(30));
    mqtt_options.set_clean_session(true);

    let (client, mut eventloop) = AsyncClient::new(mqtt_options, 20000);

    tokio::spawn(async move {
        loop {
            if let Err(e) = eventloop.poll().await {
                error!("MQTT eventloop error: {}", e);
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    });

    tokio::time::sleep(Duration::from_secs(2)).await;

    info!("Connected to MQTT broker, starting to publish telemetry");

    let mut rng = rand::thread_rng();
    let mut counter = 0u64;
    let mut bursts = 0u64;
    let burst_interval = Duration::from_millis((BURST_SIZE * 1000) / args.rate);

    info!(
        "Publishing in bursts of {} messages every {:?}",
        BURST_SIZE, burst_interval
    );

    loop {
        let burst_start = Instant::now();
        let snapshot_due = args.snapshot_every > 0 && bursts % args.snapshot_every == 0;
        let mut snapshot_sent = vec![false; args.rovers as usize];

        for i in 0..BURST_SIZE {
            let rover_id = ((counter + i) % args.rovers as u64) as u32 + 1;
            let log = generate_log(&mut rng);

            if publish(&client, logs_topic(rover_id), &log).await {
                counter += 1;
            }

            let slot = &mut snapshot_sent[(rover_id - 1) as usize];
            if snapshot_due && !*slot {
                *slot = true;
                let snapshot = generate_snapshot(&mut rng, &log);
                publish(&client, sensors_topic(rover_id), &snapshot).await;
            }
        }
        bursts += 1;

        if bursts % 50 == 0 {
            info!("Published {} log messages", counter);
        }

        let elapsed = burst_start.elapsed();
        if elapsed < burst_interval {
            tokio::time::sleep(burst_interval - elapsed).await;
        } else if elapsed > burst_interval * 2 {
            warn!(
                "Burst took {:?}, target was {:?} - system may be overloaded",
                elapsed, burst_interval
            );
        }
    }
}

async fn publish<T: Serialize>(client: &AsyncClient, topic: String, message: &T) -> bool {
    let payload = match serde_json::to_vec(message) {
        Ok(p) => p,
        Err(e) => {
            error!("Failed to serialize payload for {}: {}", topic, e);
            return false;
        }
    };

    match client.publish(&topic, QoS::AtLeastOnce, false, payload).await {
        Ok(()) => true,
        Err(e) => {
            warn!("Failed to publish to {}: {}", topic, e);
            false
        }
    }
}
