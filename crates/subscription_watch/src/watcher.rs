use std::sync::Arc;
use std::time::Duration;

use auth_services::Clock;
use futures_util::{StreamExt, stream};
use notification_services::NotificationDispatcher;
use postgres::StoreError;
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::{MissedTickBehavior, interval, timeout};
use tracing::{debug, error, info, warn};

use crate::prober::{AvailabilityProber, ProbeError};
use crate::stats::WatchStats;
use crate::store::SubscriptionStore;
use crate::subscription_types::Subscription;

/// Shortest poll period the watcher will run with.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Tuning for [`SubscriptionWatcher`].
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// How often every subscription is re-checked (default: 30 seconds)
    pub poll_interval: Duration,

    /// Maximum probes in flight during one tick (default: 8)
    pub max_concurrent_probes: usize,

    /// Upper bound on a single probe (default: 20 seconds)
    pub probe_timeout: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            max_concurrent_probes: 8,
            probe_timeout: Duration::from_secs(20),
        }
    }
}

/// What a single tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TickReport {
    /// Subscriptions read from the store
    pub scanned: usize,
    /// Subscriptions whose restaurant was found open
    pub opened: usize,
    /// Probes that failed or timed out
    pub probe_failures: usize,
    /// Open restaurants whose notification failed
    pub notification_failures: usize,
    /// Subscriptions removed
    pub deleted: usize,
}

enum CheckOutcome {
    Closed,
    ProbeFailed,
    Opened { notified: bool, deleted: bool },
}

/// Control loop that re-checks every subscription and retires the ones whose
/// restaurant started delivering.
pub struct SubscriptionWatcher {
    store: Arc<dyn SubscriptionStore>,
    prober: Arc<dyn AvailabilityProber>,
    dispatcher: Arc<NotificationDispatcher>,
    clock: Arc<dyn Clock>,
    stats: Arc<WatchStats>,
    config: WatcherConfig,
}

impl SubscriptionWatcher {
    /// Create a watcher over `store`.
    ///
    /// `None` takes [`WatcherConfig::default`]. A `poll_interval` below
    /// [`MIN_POLL_INTERVAL`] is raised to it.
    pub fn new(
        store: Arc<dyn SubscriptionStore>,
        prober: Arc<dyn AvailabilityProber>,
        dispatcher: Arc<NotificationDispatcher>,
        clock: Arc<dyn Clock>,
        stats: Arc<WatchStats>,
        config: Option<WatcherConfig>,
    ) -> Self {
        let mut config = config.unwrap_or_default();
        if config.poll_interval < MIN_POLL_INTERVAL {
            warn!(
                "Poll interval {:?} is too short, using {:?}",
                config.poll_interval, MIN_POLL_INTERVAL
            );
            config.poll_interval = MIN_POLL_INTERVAL;
        }
        Self {
            store,
            prober,
            dispatcher,
            clock,
            stats,
            config,
        }
    }

    /// Ticks every `poll_interval` until `shutdown` turns true or its sender is dropped.
    ///
    /// A tick that already started runs to completion before the loop exits.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Starting subscription watcher (every {:?}, {} concurrent probes)",
            self.config.poll_interval, self.config.max_concurrent_probes
        );

        let mut ticker = interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !*shutdown.borrow() {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.run_tick().await {
                        error!("Error processing subscriptions: {}", e);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Subscription watcher stopped");
    }

    /// Probes every subscription once, notifying and deleting the open ones.
    pub async fn run_tick(&self) -> Result<TickReport, StoreError> {
        let subscriptions = self.store.find_all().await?;
        let mut report = TickReport {
            scanned: subscriptions.len(),
            ..TickReport::default()
        };

        if subscriptions.is_empty() {
            debug!("No subscriptions to check");
            self.stats.record_tick(self.clock.now());
            return Ok(report);
        }

        debug!("Checking {} subscriptions", subscriptions.len());

        let outcomes: Vec<CheckOutcome> = stream::iter(subscriptions)
            .map(|subscription| self.check_subscription(subscription))
            .buffer_unordered(self.config.max_concurrent_probes.max(1))
            .collect()
            .await;

        for outcome in outcomes {
            match outcome {
                CheckOutcome::Closed => {}
                CheckOutcome::ProbeFailed => report.probe_failures += 1,
                CheckOutcome::Opened { notified, deleted } => {
                    report.opened += 1;
                    if !notified {
                        report.notification_failures += 1;
                    }
                    if deleted {
                        report.deleted += 1;
                    }
                }
            }
        }

        if report.opened > 0 {
            info!(
                "Tick finished: {} scanned, {} opened, {} deleted",
                report.scanned, report.opened, report.deleted
            );
        }
        self.stats.record_tick(self.clock.now());

        Ok(report)
    }

    async fn check_subscription(&self, subscription: Subscription) -> CheckOutcome {
        let target = subscription.probe_target();
        let probed = match timeout(self.config.probe_timeout, self.prober.probe(&target)).await {
            Ok(result) => result,
            Err(_) => Err(ProbeError::Timeout),
        };

        let status = match probed {
            Ok(status) => {
                self.stats.record_probe(false);
                status
            }
            Err(e) => {
                warn!(
                    "Could not check restaurant {} for {}: {}",
                    subscription.restaurant_id, subscription.email, e
                );
                self.stats.record_probe(true);
                return CheckOutcome::ProbeFailed;
            }
        };

        if !status.is_open {
            return CheckOutcome::Closed;
        }

        info!(
            "Restaurant {} ({}) is open, notifying {}",
            subscription.restaurant_name, subscription.restaurant_id, subscription.email
        );

        let notified = match self
            .dispatcher
            .restaurant_opened(&subscription.email, &subscription.restaurant_name)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                error!(
                    "Failed to send notification for {} to {}: {}",
                    subscription.restaurant_id, subscription.email, e
                );
                false
            }
        };
        self.stats.record_opened(notified);

        let deleted = match self
            .store
            .delete(&subscription.restaurant_id, &subscription.email)
            .await
        {
            Ok(count) => count > 0,
            Err(e) => {
                error!(
                    "Failed to delete subscription {} for {}: {}",
                    subscription.restaurant_id, subscription.email, e
                );
                false
            }
        };

        CheckOutcome::Opened { notified, deleted }
    }
}

#[cfg(test)]
mod tests {
    use auth_services::ManualClock;
    use chrono::{TimeZone, Utc};
    use async_trait::async_trait;
    use notification_services::{Mailer, RecordingMailer};
    use uuid::Uuid;

    use super::*;
    use crate::prober::{RestaurantStatus, StaticProber};
    use crate::subscription_types::SubscriptionTarget;
    use crate::store::MemorySubscriptionStore;

    const OPERATOR: &str = "ops@example.com";

    struct Harness {
        watcher: Arc<SubscriptionWatcher>,
        store: Arc<MemorySubscriptionStore>,
        prober: Arc<StaticProber>,
        mailer: Arc<RecordingMailer>,
        stats: Arc<WatchStats>,
    }

    /// Never answers for one restaurant id, defers to a table for the rest.
    struct StallingProber {
        stalled_id: String,
        table: Arc<StaticProber>,
    }

    #[async_trait]
    impl AvailabilityProber for StallingProber {
        async fn probe(&self, target: &SubscriptionTarget) -> Result<RestaurantStatus, ProbeError> {
            if target.restaurant_id == self.stalled_id {
                std::future::pending::<()>().await;
            }
            self.table.probe(target).await
        }
    }

    fn harness_with(mailer: RecordingMailer) -> Harness {
        harness_full(mailer, None, WatcherConfig::default())
    }

    fn harness_full(
        mailer: RecordingMailer,
        stalled_id: Option<&str>,
        config: WatcherConfig,
    ) -> Harness {
        let store = Arc::new(MemorySubscriptionStore::new());
        let prober = Arc::new(StaticProber::new());
        let availability: Arc<dyn AvailabilityProber> = match stalled_id {
            Some(id) => Arc::new(StallingProber {
                stalled_id: id.to_string(),
                table: prober.clone(),
            }),
            None => prober.clone(),
        };
        let mailer = Arc::new(mailer);
        let dispatcher = Arc::new(NotificationDispatcher::new(
            mailer.clone() as Arc<dyn Mailer>,
            OPERATOR,
        ));
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap(),
        ));
        let stats = Arc::new(WatchStats::new());
        let watcher = Arc::new(SubscriptionWatcher::new(
            store.clone(),
            availability,
            dispatcher,
            clock,
            stats.clone(),
            Some(WatcherConfig {
                max_concurrent_probes: 3,
                ..config
            }),
        ));
        Harness {
            watcher,
            store,
            prober,
            mailer,
            stats,
        }
    }

    fn harness() -> Harness {
        harness_with(RecordingMailer::new())
    }

    async fn subscribe(store: &MemorySubscriptionStore, restaurant_id: &str, email: &str) {
        let subscription = Subscription {
            id: Uuid::new_v4(),
            email: email.to_string(),
            restaurant_id: restaurant_id.to_string(),
            restaurant_name: format!("Restaurant {}", restaurant_id),
            lat: 32.08,
            lon: 34.78,
            restaurant_image: None,
            restaurant_address: None,
            created_at: Utc.with_ymd_and_hms(2025, 3, 1, 11, 0, 0).unwrap(),
        };
        assert!(store.insert_if_absent(&subscription).await.unwrap());
    }

    #[tokio::test]
    async fn tick_retires_only_open_restaurants() {
        let h = harness();
        for i in 0..5 {
            let id = format!("r-{}", i);
            h.prober.set_open(&id, i % 2 == 0);
            subscribe(&h.store, &id, "dana@example.com").await;
        }

        let report = h.watcher.run_tick().await.unwrap();

        assert_eq!(report.scanned, 5);
        assert_eq!(report.opened, 3);
        assert_eq!(report.deleted, 3);
        assert_eq!(report.probe_failures, 0);
        assert_eq!(h.store.len(), 2);

        let sent = h.mailer.sent();
        assert_eq!(sent.len(), 6);
        assert_eq!(sent.iter().filter(|m| m.to == OPERATOR).count(), 3);
        assert_eq!(
            sent.iter().filter(|m| m.to == "dana@example.com").count(),
            3
        );
    }

    #[tokio::test]
    async fn every_subscriber_of_an_open_restaurant_is_notified() {
        let h = harness();
        h.prober.set_open("r-1", true);
        subscribe(&h.store, "r-1", "dana@example.com").await;
        subscribe(&h.store, "r-1", "omer@example.com").await;

        let report = h.watcher.run_tick().await.unwrap();

        assert_eq!(report.deleted, 2);
        assert!(h.store.is_empty());
        assert_eq!(h.mailer.sent().len(), 4);
    }

    #[tokio::test]
    async fn probe_failures_keep_the_subscription() {
        let h = harness();
        h.prober
            .set("r-1", Err(ProbeError::Upstream("HTTP 503".into())));
        subscribe(&h.store, "r-1", "dana@example.com").await;
        subscribe(&h.store, "unknown", "dana@example.com").await;

        let report = h.watcher.run_tick().await.unwrap();

        assert_eq!(report.probe_failures, 2);
        assert_eq!(report.deleted, 0);
        assert_eq!(h.store.len(), 2);
        assert!(h.mailer.sent().is_empty());

        let snapshot = h.stats.snapshot();
        assert_eq!(snapshot.probes, 2);
        assert_eq!(snapshot.probe_failures, 2);
        assert_eq!(snapshot.ticks, 1);
    }

    #[tokio::test]
    async fn failed_notification_still_deletes() {
        let h = harness_with(RecordingMailer::failing());
        h.prober.set_open("r-1", true);
        subscribe(&h.store, "r-1", "dana@example.com").await;

        let report = h.watcher.run_tick().await.unwrap();

        assert_eq!(report.notification_failures, 1);
        assert_eq!(report.deleted, 1);
        assert!(h.store.is_empty());
        assert_eq!(h.stats.snapshot().notification_failures, 1);
    }

    #[tokio::test]
    async fn empty_store_is_a_quiet_tick() {
        let h = harness();

        let report = h.watcher.run_tick().await.unwrap();

        assert_eq!(report, TickReport::default());
        assert_eq!(h.stats.snapshot().ticks, 1);
        assert!(h.stats.snapshot().last_tick.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn run_ticks_until_shutdown() {
        let h = harness();
        h.prober.set_open("r-1", false);
        subscribe(&h.store, "r-1", "dana@example.com").await;

        let (tx, rx) = watch::channel(false);
        let watcher = h.watcher.clone();
        let handle = tokio::spawn(async move { watcher.run(rx).await });

        // first tick fires immediately, the next ones every 30 seconds
        tokio::time::sleep(Duration::from_secs(65)).await;
        assert_eq!(h.stats.snapshot().ticks, 3);
        assert_eq!(h.store.len(), 1);

        h.prober.set_open("r-1", true);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(h.store.is_empty());

        tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_lookup_times_out_without_blocking_the_tick() {
        let h = harness_full(
            RecordingMailer::new(),
            Some("r-slow"),
            WatcherConfig {
                probe_timeout: Duration::from_secs(5),
                ..WatcherConfig::default()
            },
        );
        h.prober.set_open("r-1", true);
        h.prober.set_open("r-2", false);
        subscribe(&h.store, "r-slow", "dana@example.com").await;
        subscribe(&h.store, "r-1", "dana@example.com").await;
        subscribe(&h.store, "r-2", "dana@example.com").await;

        let report = h.watcher.run_tick().await.unwrap();

        assert_eq!(report.scanned, 3);
        assert_eq!(report.probe_failures, 1);
        assert_eq!(report.opened, 1);
        assert_eq!(report.deleted, 1);
        assert_eq!(h.store.len(), 2);
        assert_eq!(h.stats.snapshot().probe_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_poll_interval_is_raised_to_the_minimum() {
        let h = harness_full(
            RecordingMailer::new(),
            None,
            WatcherConfig {
                poll_interval: Duration::ZERO,
                ..WatcherConfig::default()
            },
        );
        assert_eq!(h.watcher.config.poll_interval, MIN_POLL_INTERVAL);

        let (tx, rx) = watch::channel(false);
        let watcher = h.watcher.clone();
        let handle = tokio::spawn(async move { watcher.run(rx).await });

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(h.stats.snapshot().ticks, 3);

        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
