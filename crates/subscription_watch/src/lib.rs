//! # Subscription Watch
//!
//! This crate provides types and services for managing restaurant subscriptions.
//! It handles subscribing and unsubscribing, the control loop that re-checks every
//! subscription against the restaurant directory, and the retention pruner.

/// Client for the external restaurant directory
pub mod directory_client;
/// Availability probing seam
pub mod prober;
/// Retention pruner
pub mod pruner;
/// Subscribe, unsubscribe and list operations
pub mod service;
/// Counters shared by the background tasks
pub mod stats;
/// Subscription persistence
pub mod store;
/// Types for subscription operations
mod subscription_types;
/// Subscription control loop
pub mod watcher;

pub use directory_client::DirectoryClient;
pub use prober::{AvailabilityProber, ProbeError, RestaurantStatus, StaticProber};
pub use pruner::{MIN_PRUNE_INTERVAL, PrunerConfig, RetentionPruner};
pub use service::SubscriptionService;
pub use stats::{WatchStats, WatchStatsSnapshot};
pub use store::{MemorySubscriptionStore, PgSubscriptionStore, SubscriptionStore};
pub use subscription_types::*;
pub use watcher::{MIN_POLL_INTERVAL, SubscriptionWatcher, TickReport, WatcherConfig};
