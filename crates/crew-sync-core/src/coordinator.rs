/// Background coordinator that drains queues when connectivity returns
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time;
use tracing::{debug, info, warn};

use crew_sync_config::SyncConfig;

use crate::engine::SyncEngine;
use crate::refresh::LiveRefresh;

/// Configuration for the sync coordinator
#[derive(Debug, Clone)]
pub struct SyncCoordinatorConfig {
    /// How often to drain queues while online (in seconds), 0 disables
    pub retry_interval_secs: u64,
}

impl Default for SyncCoordinatorConfig {
    fn default() -> Self {
        Self {
            retry_interval_secs: 300, // Retry every 5 minutes
        }
    }
}

impl From<&SyncConfig> for SyncCoordinatorConfig {
    fn from(config: &SyncConfig) -> Self {
        Self {
            retry_interval_secs: config.retry_interval_secs,
        }
    }
}

/// Background reconnect coordinator
pub struct SyncCoordinator {
    engine: Arc<SyncEngine>,
    refresh: Option<Arc<LiveRefresh>>,
    config: SyncCoordinatorConfig,
    shutdown: Notify,
}

impl SyncCoordinator {
    /// Create a new sync coordinator
    pub fn new(
        engine: Arc<SyncEngine>,
        refresh: Option<Arc<LiveRefresh>>,
        config: SyncCoordinatorConfig,
    ) -> Self {
        Self {
            engine,
            refresh,
            config,
            shutdown: Notify::new(),
        }
    }

    /// Drain every queue, then re-read every collection. Returns the number
    /// of operations still pending after the drain.
    pub async fn handle_reconnect(&self) -> usize {
        let failed = self.engine.flush().await;
        if failed > 0 {
            warn!("{} queued operations still pending after reconnect", failed);
        }

        if let Some(refresh) = &self.refresh {
            let refreshed = refresh.refresh_all().await;
            debug!("Refreshed {} collections after reconnect", refreshed);
        }
        failed
    }

    /// Start the background coordinator; returns after [`Self::shutdown`]
    pub async fn start(self: Arc<Self>) {
        info!(
            "Starting sync coordinator with retry interval {} seconds",
            self.config.retry_interval_secs
        );

        let mut online_rx = self.engine.connectivity().subscribe();
        let mut was_online = *online_rx.borrow_and_update();

        let mut interval = (self.config.retry_interval_secs > 0).then(|| {
            let period = Duration::from_secs(self.config.retry_interval_secs);
            let mut interval = time::interval_at(time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(time::MissedTickBehavior::Skip);
            interval
        });

        if was_online {
            self.handle_reconnect().await;
        }

        loop {
            tokio::select! {
                _ = self.shutdown.notified() => break,
                changed = online_rx.changed() => {
                    if changed.is_err() {
                        debug!("Connectivity signal dropped");
                        break;
                    }
                    let online = *online_rx.borrow_and_update();
                    if online && !was_online {
                        info!("Back online, draining sync queues");
                        self.handle_reconnect().await;
                    }
                    was_online = online;
                }
                _ = tick(&mut interval) => {
                    if self.engine.connectivity().is_online() && self.engine.pending_total() > 0 {
                        self.engine.flush().await;
                    }
                }
            }
        }

        info!("Sync coordinator stopped");
    }

    /// Stop the coordinator loop
    pub fn shutdown(&self) {
        info!("Shutting down sync coordinator");
        self.shutdown.notify_one();
    }
}

async fn tick(interval: &mut Option<time::Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Start the sync coordinator as a background task
pub fn start_sync_coordinator(
    coordinator: Arc<SyncCoordinator>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        coordinator.start().await;
    })
}
