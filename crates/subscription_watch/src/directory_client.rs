use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::prober::{AvailabilityProber, ProbeError, RestaurantStatus};
use crate::subscription_types::SubscriptionTarget;

/// Client for the external restaurant directory.
pub struct DirectoryClient {
    client: Client,
    base_url: String,
}

/// Response structure from the directory search endpoint
#[derive(Debug, Deserialize)]
pub struct DirectorySearchResponse {
    /// Matching restaurants
    #[serde(default)]
    pub results: Vec<DirectoryRestaurant>,
}

/// Individual restaurant entry from the directory
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryRestaurant {
    /// Directory id
    pub id: String,
    /// Display name
    pub name: Option<String>,
    /// Whether the restaurant delivers right now
    #[serde(default)]
    pub is_open: bool,
    /// Image block
    pub image: Option<DirectoryImage>,
    /// Venue block
    pub venue: Option<DirectoryVenue>,
}

/// Image block of a directory entry
#[derive(Debug, Deserialize)]
pub struct DirectoryImage {
    /// Image URL
    pub url: Option<String>,
}

/// Venue block of a directory entry
#[derive(Debug, Deserialize)]
pub struct DirectoryVenue {
    /// Formatted address
    pub address: Option<String>,
}

impl DirectoryClient {
    /// Create a new directory client. Every request is bounded by `timeout`.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ProbeError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProbeError::Upstream(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Search the directory by name around a location.
    pub async fn search(
        &self,
        query: &str,
        lat: f64,
        lon: f64,
    ) -> Result<Vec<DirectoryRestaurant>, ProbeError> {
        debug!("Searching directory for '{}' at {},{}", query, lat, lon);

        let url = format!("{}/search", self.base_url);
        let params = [
            ("q", query.to_string()),
            ("lat", lat.to_string()),
            ("lon", lon.to_string()),
        ];

        let response = self
            .client
            .get(&url)
            .query(&params)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProbeError::Timeout
                } else {
                    ProbeError::Upstream(format!("HTTP request failed: {}", e))
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            warn!("Directory search failed with status {}", status);
            return match status.as_u16() {
                404 => Err(ProbeError::NotFound),
                _ => Err(ProbeError::Upstream(format!("HTTP {}", status))),
            };
        }

        let search: DirectorySearchResponse = response
            .json()
            .await
            .map_err(|e| ProbeError::Malformed(format!("Failed to parse response: {}", e)))?;

        Ok(search.results)
    }
}

/// Picks the entry whose id matches `restaurant_id`.
fn select_restaurant(
    results: Vec<DirectoryRestaurant>,
    restaurant_id: &str,
) -> Result<RestaurantStatus, ProbeError> {
    results
        .into_iter()
        .find(|r| r.id == restaurant_id)
        .map(|r| RestaurantStatus {
            is_open: r.is_open,
            image_url: r.image.and_then(|i| i.url),
            address: r.venue.and_then(|v| v.address),
        })
        .ok_or(ProbeError::NotFound)
}

#[async_trait]
impl AvailabilityProber for DirectoryClient {
    async fn probe(&self, target: &SubscriptionTarget) -> Result<RestaurantStatus, ProbeError> {
        let results = self
            .search(
                &target.restaurant_name,
                target.location.lat,
                target.location.lon,
            )
            .await?;
        select_restaurant(results, &target.restaurant_id)
    }
}
