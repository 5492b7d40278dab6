use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::Serialize;

use crate::subscription_types::SubscriptionTarget;

/// Live delivery state of a restaurant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestaurantStatus {
    /// Whether the restaurant currently accepts deliveries
    pub is_open: bool,
    /// Image URL, if the directory has one
    pub image_url: Option<String>,
    /// Formatted address, if the directory has one
    pub address: Option<String>,
}

/// Why a restaurant's availability could not be determined.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProbeError {
    /// The directory does not list the restaurant
    #[error("restaurant not found")]
    NotFound,

    /// The directory could not be reached or failed
    #[error("directory error: {0}")]
    Upstream(String),

    /// The directory did not answer in time
    #[error("directory request timed out")]
    Timeout,

    /// The directory answered with an unexpected shape
    #[error("malformed directory response: {0}")]
    Malformed(String),
}

/// Asks an external directory whether a restaurant currently delivers.
#[async_trait]
pub trait AvailabilityProber: Send + Sync {
    /// Looks the restaurant up by name and id around its location.
    async fn probe(&self, target: &SubscriptionTarget) -> Result<RestaurantStatus, ProbeError>;
}

/// Prober answering from a fixed table, for tests and offline runs.
///
/// Restaurants missing from the table are reported as not found.
#[derive(Default)]
pub struct StaticProber {
    answers: Mutex<HashMap<String, Result<RestaurantStatus, ProbeError>>>,
}

impl StaticProber {
    /// A prober that knows no restaurant.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the answer for `restaurant_id`.
    pub fn set(&self, restaurant_id: &str, answer: Result<RestaurantStatus, ProbeError>) {
        self.answers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(restaurant_id.to_string(), answer);
    }

    /// Marks `restaurant_id` as open or closed.
    pub fn set_open(&self, restaurant_id: &str, is_open: bool) {
        self.set(
            restaurant_id,
            Ok(RestaurantStatus {
                is_open,
                image_url: Some(format!("https://images.example.com/{}.jpg", restaurant_id)),
                address: Some(format!("{} Main St", restaurant_id)),
            }),
        );
    }
}

#[async_trait]
impl AvailabilityProber for StaticProber {
    async fn probe(&self, target: &SubscriptionTarget) -> Result<RestaurantStatus, ProbeError> {
        self.answers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&target.restaurant_id)
            .cloned()
            .unwrap_or(Err(ProbeError::NotFound))
    }
}
