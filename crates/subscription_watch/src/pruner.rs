use std::sync::Arc;
use std::time::Duration;

use auth_services::Clock;
use postgres::StoreError;
use tokio::sync::watch;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info, warn};

use crate::stats::WatchStats;
use crate::store::SubscriptionStore;

/// Shortest period the pruner will run with.
pub const MIN_PRUNE_INTERVAL: Duration = Duration::from_secs(1);

/// Tuning for [`RetentionPruner`].
#[derive(Debug, Clone)]
pub struct PrunerConfig {
    /// How often the pruner runs (default: 10 minutes)
    pub prune_interval: Duration,

    /// How long a subscription lives regardless of its restaurant (default: 30 hours)
    pub retention: Duration,
}

impl Default for PrunerConfig {
    fn default() -> Self {
        Self {
            prune_interval: Duration::from_secs(10 * 60),
            retention: Duration::from_secs(30 * 60 * 60),
        }
    }
}

/// Deletes subscriptions older than the retention window.
pub struct RetentionPruner {
    store: Arc<dyn SubscriptionStore>,
    clock: Arc<dyn Clock>,
    stats: Arc<WatchStats>,
    config: PrunerConfig,
}

impl RetentionPruner {
    /// Create a pruner over `store`. `None` takes [`PrunerConfig::default`].
    pub fn new(
        store: Arc<dyn SubscriptionStore>,
        clock: Arc<dyn Clock>,
        stats: Arc<WatchStats>,
        config: Option<PrunerConfig>,
    ) -> Self {
        let mut config = config.unwrap_or_default();
        if config.prune_interval < MIN_PRUNE_INTERVAL {
            warn!(
                "Prune interval {:?} is too short, using {:?}",
                config.prune_interval, MIN_PRUNE_INTERVAL
            );
            config.prune_interval = MIN_PRUNE_INTERVAL;
        }
        Self {
            store,
            clock,
            stats,
            config,
        }
    }

    /// Prunes every `prune_interval` until `shutdown` turns true or its sender is dropped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Starting retention pruner (every {:?}, retention {:?})",
            self.config.prune_interval, self.config.retention
        );

        let mut ticker = interval(self.config.prune_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !*shutdown.borrow() {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.prune_once().await {
                        error!("Error pruning subscriptions: {}", e);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Retention pruner stopped");
    }

    /// Deletes every subscription created at or before `now - retention`.
    pub async fn prune_once(&self) -> Result<u64, StoreError> {
        let retention = chrono::Duration::from_std(self.config.retention)
            .unwrap_or_else(|_| chrono::Duration::days(36_500));
        let cutoff = self
            .clock
            .now()
            .checked_sub_signed(retention)
            .unwrap_or(chrono::DateTime::<chrono::Utc>::MIN_UTC);

        let removed = self.store.delete_created_before(cutoff).await?;
        self.stats.record_pruned(removed);

        if removed > 0 {
            info!("Pruned {} subscriptions created before {}", removed, cutoff);
        } else {
            debug!("Nothing to prune before {}", cutoff);
        }

        Ok(removed)
    }
}
