use crate::metrics::{BATCH_SIZE, INGEST_LATENCY_SECONDS};
use crate::model::NewSensorLog;
use crate::store::FleetStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant};
use tracing::{debug, error, info, warn};

/// Owner of a spawned [`run_batcher`] task.
pub struct BatcherHandle {
    handle: JoinHandle<()>,
}

pub fn spawn_batcher(
    rx: mpsc::Receiver<NewSensorLog>,
    store: Arc<dyn FleetStore>,
    max_batch: usize,
    max_wait_ms: u64,
) -> BatcherHandle {
    BatcherHandle {
        handle: tokio::spawn(run_batcher(rx, store, max_batch, max_wait_ms)),
    }
}

impl BatcherHandle {
    /// Waits for the batcher to write its buffer and exit. It only exits once
    /// every sender is dropped; after `timeout` the task is aborted and
    /// whatever is still buffered is lost.
    pub async fn drain(mut self, timeout: Duration) {
        match tokio::time::timeout(timeout, &mut self.handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Batcher task panicked: {}", e),
            Err(_) => {
                warn!("Batcher did not drain within {:?}, aborting", timeout);
                self.handle.abort();
                let _ = self.handle.await;
            }
        }
    }
}

/// Buffers sensor logs from the transports and writes them in bulk, either
/// when `max_batch` samples are queued or every `max_wait_ms`.
pub async fn run_batcher(
    mut rx: mpsc::Receiver<NewSensorLog>,
    store: Arc<dyn FleetStore>,
    max_batch: usize,
    max_wait_ms: u64,
) {
    info!(
        "Starting sensor log batcher with max_batch={}, max_wait_ms={}",
        max_batch, max_wait_ms
    );

    let mut buffer: Vec<NewSensorLog> = Vec::with_capacity(max_batch);
    let mut ticker = interval(Duration::from_millis(max_wait_ms.max(1)));

    loop {
        tokio::select! {
            log = rx.recv() => {
                match log {
                    Some(l) => {
                        buffer.push(l);

                        if buffer.len() >= max_batch {
                            flush_batch(store.as_ref(), &mut buffer).await;
                        }
                    }
                    None => {
                        // Channel closed, flush remaining and exit
                        info!("Channel closed, flushing remaining batch");
                        flush_batch(store.as_ref(), &mut buffer).await;
                        break;
                    }
                }
            }

            _ = ticker.tick() => {
                if !buffer.is_empty() {
                    flush_batch(store.as_ref(), &mut buffer).await;
                }
            }
        }
    }

    info!("Batcher stopped");
}

/// Writes the buffer and clears it. The store already retries transient
/// failures, so a failed batch here is dropped rather than blocking intake.
async fn flush_batch(store: &dyn FleetStore, buffer: &mut Vec<NewSensorLog>) {
    let batch_len = buffer.len();
    if batch_len == 0 {
        return;
    }

    debug!("Flushing batch of {} sensor logs", batch_len);
    BATCH_SIZE.set(batch_len as f64);

    let start = Instant::now();

    match store.insert_sensor_logs(&buffer[..]).await {
        Ok(inserted) => {
            let elapsed = start.elapsed().as_secs_f64();
            INGEST_LATENCY_SECONDS.observe(elapsed);
            let dropped = batch_len as u64 - inserted.min(batch_len as u64);
            if dropped > 0 {
                info!(
                    "Inserted {} sensor logs in {:.3}s, {} for unknown rovers dropped",
                    inserted, elapsed, dropped
                );
            } else {
                debug!("Batch inserted successfully in {:.3}s", elapsed);
            }
        }
        Err(e) => {
            error!("Failed to insert sensor log batch: {}", e);
            error!("{} sensor logs dropped due to persistent store failure", batch_len);
        }
    }

    buffer.clear();
    BATCH_SIZE.set(0.0);
}
