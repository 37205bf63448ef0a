//! Background demotion of rovers that stopped reporting.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::errors::{Error, Result};
use crate::metrics::{DEVICES_MARKED_OFFLINE_TOTAL, SWEEPS_TOTAL, SWEEP_FAILURES_TOTAL};
use crate::store::FleetStore;

pub struct LivenessMonitor {
    store: Arc<dyn FleetStore>,
    interval: Duration,
    threshold: chrono::Duration,
}

impl LivenessMonitor {
    pub fn new(store: Arc<dyn FleetStore>, interval: Duration, threshold: Duration) -> Result<Self> {
        if interval.is_zero() {
            return Err(Error::Config("liveness interval must be non-zero".to_string()));
        }
        let threshold = chrono::Duration::from_std(threshold)
            .map_err(|e| Error::Config(format!("liveness threshold out of range: {}", e)))?;

        Ok(Self {
            store,
            interval,
            threshold,
        })
    }

    /// Demotes every online device whose last contact is older than the
    /// staleness threshold. Returns the number of devices demoted.
    pub async fn sweep(&self) -> Result<u64> {
        self.sweep_at(Utc::now()).await
    }

    pub async fn sweep_at(&self, now: DateTime<Utc>) -> Result<u64> {
        let cutoff = now - self.threshold;
        let demoted = self.store.mark_stale_offline(cutoff).await?;

        SWEEPS_TOTAL.inc();
        DEVICES_MARKED_OFFLINE_TOTAL.inc_by(demoted);
        if demoted > 0 {
            info!(count = demoted, cutoff = %cutoff, "Marked rovers offline");
        } else {
            debug!(cutoff = %cutoff, "No stale rovers");
        }

        Ok(demoted)
    }

    /// One scheduled pass. Failures are reported and swallowed so the next
    /// tick can retry.
    async fn tick(&self) {
        if let Err(e) = self.sweep().await {
            SWEEP_FAILURES_TOTAL.inc();
            error!(error = %e, "Liveness sweep failed, retrying next tick");
        }
    }

    /// Sweeps immediately, then every interval, until `shutdown` flips to true
    /// or its sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs_f64(),
            threshold_secs = self.threshold.num_seconds(),
            "Starting liveness monitor"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Liveness monitor stopped");
    }

    pub fn spawn(self) -> LivenessHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(self.run(shutdown_rx));
        LivenessHandle {
            shutdown_tx,
            handle,
        }
    }
}

/// Owner of a spawned [`LivenessMonitor`].
pub struct LivenessHandle {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl LivenessHandle {
    /// Signals the monitor to stop and waits for it. A sweep already in flight
    /// is allowed to finish.
    /// A task still running after `timeout` is aborted.
    pub async fn shutdown(mut self, timeout: Duration) {
        let _ = self.shutdown_tx.send(true);

        match tokio::time::timeout(timeout, &mut self.handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Liveness task panicked: {}", e),
            Err(_) => {
                warn!("Liveness monitor shutdown timed out after {:?}, aborting", timeout);
                self.handle.abort();
                let _ = self.handle.await;
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Explicitly brings an offline rover back online. Returns whether the
/// status changed; rovers in `error` stay there.
pub async fn reactivate(
    store: &dyn FleetStore,
    device_id: i64,
    now: DateTime<Utc>,
) -> Result<bool> {
    if store.find_device(device_id).await?.is_none() {
        return Err(Error::device_not_found(device_id));
    }

    let promoted = store.reactivate_device(device_id, now).await?;
    if promoted {
        info!(device_id, "Rover back online");
    }
    Ok(promoted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::model::DeviceStatus;
    use std::sync::atomic::{AtomicBool, Ordering};

    const INTERVAL: Duration = Duration::from_secs(10);
    const THRESHOLD: Duration = Duration::from_secs(30);

    fn monitor(store: &Arc<MemoryStore>) -> LivenessMonitor {
        LivenessMonitor::new(store.clone(), INTERVAL, THRESHOLD).unwrap()
    }

    #[tokio::test]
    async fn test_sweep_demotes_only_stale_online_devices() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        let stale = store
            .add_device("stale", DeviceStatus::Online, 50.0, now - chrono::Duration::seconds(31))
            .await;
        let fresh = store
            .add_device("fresh", DeviceStatus::Online, 50.0, now - chrono::Duration::seconds(30))
            .await;
        let faulty = store
            .add_device("faulty", DeviceStatus::Error, 50.0, now - chrono::Duration::hours(1))
            .await;

        let demoted = monitor(&store).sweep_at(now).await.unwrap();
        assert_eq!(demoted, 1);

        let status = |id: i64| {
            let store = store.clone();
            async move { store.find_device(id).await.unwrap().unwrap().status }
        };
        assert_eq!(status(stale.id).await, DeviceStatus::Offline);
        assert_eq!(status(fresh.id).await, DeviceStatus::Online);
        assert_eq!(status(faulty.id).await, DeviceStatus::Error);
    }

    #[tokio::test]
    async fn test_second_sweep_is_noop() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        store
            .add_device("stale", DeviceStatus::Online, 50.0, now - chrono::Duration::minutes(5))
            .await;

        let monitor = monitor(&store);
        assert_eq!(monitor.sweep_at(now).await.unwrap(), 1);
        assert_eq!(monitor.sweep_at(now).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_sweep_reports_store_failure() {
        let store = Arc::new(MemoryStore::new());
        store.set_unavailable(true);
        let result = monitor(&store).sweep().await;
        assert!(matches!(result, Err(Error::StoreUnavailable(_))));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let store = Arc::new(MemoryStore::new());
        assert!(LivenessMonitor::new(store, Duration::ZERO, THRESHOLD).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_survives_failures_and_stops_on_shutdown() {
        let store = Arc::new(MemoryStore::new());
        let rover = store
            .add_device(
                "stale",
                DeviceStatus::Online,
                50.0,
                Utc::now() - chrono::Duration::minutes(5),
            )
            .await;
        store.set_unavailable(true);

        let handle = monitor(&store).spawn();

        // Immediate sweep plus two scheduled ones, all failing.
        tokio::time::sleep(Duration::from_secs(25)).await;
        assert!(!handle.is_finished());

        store.set_unavailable(false);
        tokio::time::sleep(INTERVAL).await;

        let device = store.find_device(rover.id).await.unwrap().unwrap();
        assert_eq!(device.status, DeviceStatus::Offline);

        handle.shutdown(Duration::from_secs(1)).await;
    }

    struct SetOnDrop(Arc<AtomicBool>);

    impl Drop for SetOnDrop {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_task_is_aborted_on_shutdown_timeout() {
        let dropped = Arc::new(AtomicBool::new(false));
        let guard = SetOnDrop(dropped.clone());
        let (shutdown_tx, _shutdown_rx) = watch::channel(false);
        let handle = LivenessHandle {
            shutdown_tx,
            // Ignores the shutdown signal, like a sweep stuck on the store.
            handle: tokio::spawn(async move {
                let _guard = guard;
                std::future::pending::<()>().await;
            }),
        };

        handle.shutdown(Duration::from_millis(50)).await;
        assert!(dropped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_reactivate_unknown_device() {
        let store = MemoryStore::new();
        let result = reactivate(&store, 404, Utc::now()).await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_reactivate_promotes_offline_device() {
        let store = MemoryStore::new();
        let rover = store
            .add_device(
                "Rover Gamma",
                DeviceStatus::Offline,
                15.0,
                Utc::now() - chrono::Duration::hours(1),
            )
            .await;
        let now = Utc::now();

        assert!(reactivate(&store, rover.id, now).await.unwrap());
        let device = store.find_device(rover.id).await.unwrap().unwrap();
        assert_eq!(device.status, DeviceStatus::Online);
        assert_eq!(device.last_seen, now);
    }
}
