//! Dependency health checks for services that must know whether their
//! backing systems (database, cache, identity provider) are reachable.
//!
//! - [`HealthMonitor`] runs every registered [`DependencyCheck`] once,
//!   concurrently and under a timeout, and returns a [`HealthSnapshot`].
//! - [`DependencyWatchdog`] re-runs the monitor on an interval in the
//!   background and broadcasts each snapshot over a watch channel.

use log::{debug, info, warn};
use stats::WatchdogStats;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

mod check;
mod monitor;
mod stats;
mod status;

pub use check::{report, CheckError, DependencyCheck, DependencyClass, HttpDependencyCheck};
pub use monitor::{HealthMonitor, HealthMonitorOptions};
pub use status::{DependencyState, DependencyStatus, HealthSnapshot};

/// Configuration for the dependency watchdog
#[derive(Debug, Clone)]
pub struct DependencyWatchdogOptions {
    /// How often to run the monitor (default: 10 s)
    pub check_interval: Duration,
    /// How long to wait before the first background cycle (default: 10 s)
    pub initial_delay: Duration,
}

impl Default for DependencyWatchdogOptions {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(10),
            initial_delay: Duration::from_secs(10),
        }
    }
}

/// Background task re-evaluating dependency health.
///
/// When the `DependencyWatchdog` is dropped the background task stops.
#[derive(Debug)]
pub struct DependencyWatchdog {
    /// Cancellation token for shutdown
    shutdown_token: CancellationToken,
    /// Statistics about the monitor cycles
    stats: Arc<WatchdogStats>,
    /// Receiver for the latest snapshot
    snapshot_receiver: watch::Receiver<HealthSnapshot>,
}

impl DependencyWatchdog {
    /// Starts monitoring with the default options
    pub fn start(monitor: HealthMonitor) -> Self {
        Self::start_with_opt(monitor, DependencyWatchdogOptions::default())
    }

    /// Starts monitoring with custom options
    pub fn start_with_opt(monitor: HealthMonitor, opt: DependencyWatchdogOptions) -> Self {
        let shutdown_token = CancellationToken::new();
        let stats = Arc::new(WatchdogStats::default());
        let (snapshot_sender, snapshot_receiver) = watch::channel(HealthSnapshot::new());

        let watchdog = Self {
            shutdown_token: shutdown_token.clone(),
            stats: Arc::clone(&stats),
            snapshot_receiver,
        };

        tokio::spawn(async move {
            info!(
                "Starting dependency watchdog for {:?} in {:?}",
                monitor.dependency_names(),
                opt.initial_delay
            );
            let mut check_interval =
                interval_at(Instant::now() + opt.initial_delay, opt.check_interval);
            check_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown_token.cancelled() => {
                        info!("Dependency watchdog shutting down");
                        break;
                    }
                    _ = check_interval.tick() => {
                        stats.increment_cycles();
                    }
                }

                let snapshot = tokio::select! {
                    _ = shutdown_token.cancelled() => {
                        info!("Dependency watchdog shutting down during a check cycle");
                        break;
                    }
                    snapshot = monitor.check_all() => snapshot,
                };

                if snapshot.values().any(|s| s.is_unavailable()) {
                    stats.increment_failed_cycles();
                } else {
                    debug!("All dependencies are available");
                }

                if snapshot_sender.send(snapshot).is_err() {
                    warn!("No snapshot receivers left, stopping dependency watchdog");
                    break;
                }
            }
        });

        watchdog
    }

    /// Subscribe to snapshot updates
    pub fn subscribe(&self) -> watch::Receiver<HealthSnapshot> {
        self.snapshot_receiver.clone()
    }

    /// The most recent snapshot (empty until the first cycle completes)
    pub fn latest(&self) -> HealthSnapshot {
        self.snapshot_receiver.borrow().clone()
    }

    /// Wait until the next snapshot is published or the timeout elapses
    pub async fn wait_for_snapshot(
        &self,
        wait_timeout: Duration,
    ) -> Result<HealthSnapshot, tokio::time::error::Elapsed> {
        let mut receiver = self.snapshot_receiver.clone();
        timeout(wait_timeout, async move {
            receiver.mark_unchanged();
            // An error means the sender is gone; fall back to the last value
            let _ = receiver.changed().await;
            receiver.borrow().clone()
        })
        .await
    }

    /// Stop the background task
    pub fn stop(&self) {
        self.shutdown_token.cancel();
    }

    /// Get the total number of monitor cycles performed
    pub fn cycles(&self) -> usize {
        self.stats.cycles()
    }

    /// Get the number of cycles with at least one unavailable dependency
    pub fn failed_cycles(&self) -> usize {
        self.stats.failed_cycles()
    }
}

impl Drop for DependencyWatchdog {
    fn drop(&mut self) {
        debug!("Dependency watchdog dropping, stopping background checks");
        self.shutdown_token.cancel();
    }
}
