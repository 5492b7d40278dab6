use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Counters shared by the watcher and the pruner.
///
/// `probe_failures` separates "still closed" from "could not ask the directory".
#[derive(Debug, Default)]
pub struct WatchStats {
    ticks: AtomicU64,
    probes: AtomicU64,
    probe_failures: AtomicU64,
    opened: AtomicU64,
    notifications_sent: AtomicU64,
    notification_failures: AtomicU64,
    pruned: AtomicU64,
    last_tick: Mutex<Option<DateTime<Utc>>>,
}

/// Point-in-time copy of [`WatchStats`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchStatsSnapshot {
    /// Completed control-loop ticks
    pub ticks: u64,
    /// Probes attempted
    pub probes: u64,
    /// Probes that failed, timed out or did not find the restaurant
    pub probe_failures: u64,
    /// Subscriptions found open and removed
    pub opened: u64,
    /// Open-restaurant notifications that were accepted by the mailer
    pub notifications_sent: u64,
    /// Open-restaurant notifications that failed
    pub notification_failures: u64,
    /// Subscriptions removed by the retention pruner
    pub pruned: u64,
    /// When the last tick finished
    pub last_tick: Option<DateTime<Utc>>,
}

impl WatchStats {
    /// Zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_tick(&self, at: DateTime<Utc>) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
        *self
            .last_tick
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(at);
    }

    pub(crate) fn record_probe(&self, failed: bool) {
        self.probes.fetch_add(1, Ordering::Relaxed);
        if failed {
            self.probe_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_opened(&self, notified: bool) {
        self.opened.fetch_add(1, Ordering::Relaxed);
        if notified {
            self.notifications_sent.fetch_add(1, Ordering::Relaxed);
        } else {
            self.notification_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_pruned(&self, count: u64) {
        self.pruned.fetch_add(count, Ordering::Relaxed);
    }

    /// Copies the current counter values.
    pub fn snapshot(&self) -> WatchStatsSnapshot {
        WatchStatsSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            probes: self.probes.load(Ordering::Relaxed),
            probe_failures: self.probe_failures.load(Ordering::Relaxed),
            opened: self.opened.load(Ordering::Relaxed),
            notifications_sent: self.notifications_sent.load(Ordering::Relaxed),
            notification_failures: self.notification_failures.load(Ordering::Relaxed),
            pruned: self.pruned.load(Ordering::Relaxed),
            last_tick: *self
                .last_tick
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        }
    }
}
