use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use subscription_watch::{RetentionPruner, SubscriptionWatcher, WatchStats, WatchStatsSnapshot};

/// Manager for the background watch system
/// Owns the control loop and retention pruner tasks for the lifetime of the web server
pub struct WatchManager {
    watcher: Arc<SubscriptionWatcher>,
    pruner: Arc<RetentionPruner>,
    stats: Arc<WatchStats>,
    shutdown: Option<watch::Sender<bool>>,
    handles: Vec<JoinHandle<()>>,
}

impl WatchManager {
    /// Create a new watch manager
    pub fn new(
        watcher: Arc<SubscriptionWatcher>,
        pruner: Arc<RetentionPruner>,
        stats: Arc<WatchStats>,
    ) -> Self {
        Self {
            watcher,
            pruner,
            stats,
            shutdown: None,
            handles: Vec::new(),
        }
    }

    /// Start the control loop and the pruner
    pub fn start(&mut self) {
        if self.is_running() {
            info!("Watch system already running");
            return;
        }
        info!("Starting watch system");

        let (tx, rx) = watch::channel(false);

        let watcher = self.watcher.clone();
        let watcher_rx = rx.clone();
        self.handles
            .push(tokio::spawn(async move { watcher.run(watcher_rx).await }));

        let pruner = self.pruner.clone();
        self.handles
            .push(tokio::spawn(async move { pruner.run(rx).await }));

        self.shutdown = Some(tx);
        info!("Watch system started successfully");
    }

    /// Stop both tasks, letting an in-flight tick finish
    pub async fn stop(&mut self) {
        info!("Stopping watch system");

        if let Some(tx) = self.shutdown.take() {
            // receivers may already be gone if a task ended on its own
            let _ = tx.send(true);
        }
        for handle in self.handles.drain(..) {
            if let Err(e) = handle.await {
                error!("Watch task ended abnormally: {}", e);
            }
        }

        info!("Watch system stopped");
    }

    /// Whether the background tasks have been started and not stopped
    pub fn is_running(&self) -> bool {
        self.shutdown.is_some()
    }

    /// Get statistics about the watch system
    pub fn stats(&self) -> WatchStatsSnapshot {
        self.stats.snapshot()
    }
}

impl Drop for WatchManager {
    fn drop(&mut self) {
        for handle in self.handles.drain(..) {
            handle.abort();
        }
    }
}
