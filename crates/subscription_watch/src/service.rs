use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use auth_services::store::IdentityStore;
use auth_services::{Clock, IdentityRecord};
use tracing::{debug, info};
use uuid::Uuid;

use crate::prober::{AvailabilityProber, ProbeError, RestaurantStatus};
use crate::store::SubscriptionStore;
use crate::subscription_types::*;

/// Service for handling subscription lifecycle operations
pub struct SubscriptionService {
    store: Arc<dyn SubscriptionStore>,
    identities: Arc<dyn IdentityStore>,
    prober: Arc<dyn AvailabilityProber>,
    clock: Arc<dyn Clock>,
    probe_timeout: Duration,
}

impl SubscriptionService {
    /// Creates a new instance of `SubscriptionService`
    pub fn new(
        store: Arc<dyn SubscriptionStore>,
        identities: Arc<dyn IdentityStore>,
        prober: Arc<dyn AvailabilityProber>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            identities,
            prober,
            clock,
            probe_timeout: Duration::from_secs(20),
        }
    }

    /// Overrides how long a subscribe waits for the directory (default 20 seconds).
    pub fn with_probe_timeout(mut self, probe_timeout: Duration) -> Self {
        self.probe_timeout = probe_timeout;
        self
    }

    /// Subscribes the caller to a closed restaurant and returns their subscriptions.
    ///
    /// Refused with [`WatchError::AlreadyOpen`] when the restaurant already delivers.
    /// Subscribing twice to the same restaurant stores one subscription.
    pub async fn subscribe(
        &self,
        subscriber: &IdentityRecord,
        request: RestaurantRequest,
    ) -> Result<SubscriptionListing, WatchError> {
        let target = validate_request(subscriber, request)?;
        info!(
            "subscribe restaurant_name: {}, restaurant_id: {} email={}, lat={}, lon={}",
            target.restaurant_name,
            target.restaurant_id,
            subscriber.email,
            target.location.lat,
            target.location.lon
        );

        let status = self.probe(&target).await?;
        if status.is_open {
            return Err(WatchError::AlreadyOpen);
        }

        let subscription = Subscription {
            id: Uuid::new_v4(),
            email: subscriber.email.clone(),
            restaurant_id: target.restaurant_id,
            restaurant_name: target.restaurant_name,
            lat: target.location.lat,
            lon: target.location.lon,
            restaurant_image: status.image_url,
            restaurant_address: status.address,
            created_at: self.clock.now(),
        };

        if !self.store.insert_if_absent(&subscription).await? {
            debug!(
                "{} is already subscribed to {}",
                subscription.email, subscription.restaurant_id
            );
        }

        self.list_subscriptions(subscriber).await
    }

    /// Removes the caller's subscription, if any, and returns what is left.
    pub async fn unsubscribe(
        &self,
        subscriber: &IdentityRecord,
        request: RestaurantRequest,
    ) -> Result<SubscriptionListing, WatchError> {
        let target = validate_request(subscriber, request)?;
        info!(
            "unsubscribe restaurant_name: {}, restaurant_id: {} email={}",
            target.restaurant_name, target.restaurant_id, subscriber.email
        );

        self.store
            .delete(&target.restaurant_id, &subscriber.email)
            .await?;

        self.list_subscriptions(subscriber).await
    }

    /// The caller's own subscriptions, or every subscription for an operator.
    ///
    /// The operator's view annotates each entry with the subscriber's profile and with
    /// whether the entry is the operator's own.
    pub async fn list_subscriptions(
        &self,
        caller: &IdentityRecord,
    ) -> Result<SubscriptionListing, WatchError> {
        if !caller.is_operator() {
            let subscriptions = self.store.find_by_subscriber(&caller.email).await?;
            return Ok(SubscriptionListing {
                subscriptions: subscriptions.into_iter().map(SubscriptionView::from).collect(),
                is_admin: None,
            });
        }

        let subscriptions = self.store.find_all().await?;
        let identities = self.identities.find_all().await?;
        let profiles: HashMap<&str, &IdentityRecord> = identities
            .iter()
            .map(|record| (record.email.as_str(), record))
            .collect();

        let views = subscriptions
            .into_iter()
            .map(|subscription| {
                let subscriber = profiles
                    .get(subscription.email.as_str())
                    .map(|record| SubscriberProfile::from(*record));
                let is_admin = subscription.email.eq_ignore_ascii_case(&caller.email);
                SubscriptionView {
                    subscription,
                    subscriber,
                    is_admin: Some(is_admin),
                }
            })
            .collect();

        Ok(SubscriptionListing {
            subscriptions: views,
            is_admin: Some(true),
        })
    }

    async fn probe(&self, target: &SubscriptionTarget) -> Result<RestaurantStatus, WatchError> {
        match tokio::time::timeout(self.probe_timeout, self.prober.probe(target)).await {
            Ok(Ok(status)) => Ok(status),
            Ok(Err(ProbeError::NotFound)) => Err(WatchError::EntityNotFound),
            Ok(Err(e)) => Err(WatchError::Probe(e)),
            Err(_) => Err(WatchError::Probe(ProbeError::Timeout)),
        }
    }
}

fn validate_request(
    subscriber: &IdentityRecord,
    request: RestaurantRequest,
) -> Result<SubscriptionTarget, WatchError> {
    let target = request.into_target();
    if !subscriber.email.trim().is_empty() {
        return target;
    }

    let mut fields = match target {
        Err(WatchError::MissingAttribute(fields)) => fields,
        _ => Vec::new(),
    };
    fields.push("email".to_string());
    fields.sort();
    Err(WatchError::MissingAttribute(fields))
}

#[cfg(test)]
mod tests {
    use auth_services::store::MemoryIdentityStore;
    use auth_services::{ManualClock, Provider, Role};
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};

    use super::*;
    use crate::prober::StaticProber;
    use crate::store::MemorySubscriptionStore;

    struct Harness {
        service: SubscriptionService,
        store: Arc<MemorySubscriptionStore>,
        identities: Arc<MemoryIdentityStore>,
        prober: Arc<StaticProber>,
        clock: Arc<ManualClock>,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemorySubscriptionStore::new());
        let identities = Arc::new(MemoryIdentityStore::new());
        let prober = Arc::new(StaticProber::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap(),
        ));
        let service = SubscriptionService::new(
            store.clone(),
            identities.clone(),
            prober.clone(),
            clock.clone(),
        );
        Harness {
            service,
            store,
            identities,
            prober,
            clock,
        }
    }

    fn identity(email: &str, role: Role) -> IdentityRecord {
        IdentityRecord {
            provider: Provider::Google,
            email: email.to_string(),
            first_name: Some("First".into()),
            family_name: Some("Last".into()),
            image_url: None,
            token: format!("tok-{}", email),
            token_expiration: Utc.with_ymd_and_hms(2025, 3, 2, 12, 0, 0).unwrap(),
            role,
            created_at: Utc.with_ymd_and_hms(2025, 2, 1, 12, 0, 0).unwrap(),
        }
    }

    fn request(restaurant_id: &str) -> RestaurantRequest {
        RestaurantRequest {
            restaurant_id: Some(restaurant_id.to_string()),
            restaurant_name: Some(format!("Restaurant {}", restaurant_id)),
            location: Some(LocationInput {
                lat: Some(32.08),
                lon: Some(34.78),
            }),
        }
    }

    #[tokio::test]
    async fn subscribe_to_closed_restaurant_stores_snapshot() {
        let h = harness();
        h.prober.set_open("r-1", false);
        let dana = identity("dana@example.com", Role::User);

        let listing = h.service.subscribe(&dana, request("r-1")).await.unwrap();

        assert_eq!(listing.subscriptions.len(), 1);
        assert_eq!(listing.is_admin, None);
        let stored = &listing.subscriptions[0].subscription;
        assert_eq!(stored.email, "dana@example.com");
        assert_eq!(stored.restaurant_id, "r-1");
        assert_eq!(stored.created_at, h.clock.now());
        assert_eq!(stored.restaurant_address.as_deref(), Some("r-1 Main St"));
        assert!(stored.restaurant_image.is_some());
    }

    #[tokio::test]
    async fn subscribing_twice_keeps_one_subscription() {
        let h = harness();
        h.prober.set_open("r-1", false);
        let dana = identity("dana@example.com", Role::User);

        h.service.subscribe(&dana, request("r-1")).await.unwrap();
        h.clock.advance(ChronoDuration::minutes(5));
        let listing = h.service.subscribe(&dana, request("r-1")).await.unwrap();

        assert_eq!(listing.subscriptions.len(), 1);
        assert_eq!(h.store.len(), 1);
    }

    #[tokio::test]
    async fn open_restaurant_is_refused_without_mutation() {
        let h = harness();
        h.prober.set_open("r-1", true);
        let dana = identity("dana@example.com", Role::User);

        let err = h.service.subscribe(&dana, request("r-1")).await.unwrap_err();

        assert!(matches!(err, WatchError::AlreadyOpen));
        assert!(h.store.is_empty());
    }

    #[tokio::test]
    async fn unknown_restaurant_is_not_found() {
        let h = harness();
        let dana = identity("dana@example.com", Role::User);

        let err = h.service.subscribe(&dana, request("ghost")).await.unwrap_err();

        assert!(matches!(err, WatchError::EntityNotFound));
        assert!(h.store.is_empty());
    }

    #[tokio::test]
    async fn directory_outage_is_a_probe_error() {
        let h = harness();
        h.prober
            .set("r-1", Err(ProbeError::Upstream("HTTP 503".into())));
        let dana = identity("dana@example.com", Role::User);

        let err = h.service.subscribe(&dana, request("r-1")).await.unwrap_err();

        assert!(matches!(err, WatchError::Probe(ProbeError::Upstream(_))));
    }

    #[tokio::test]
    async fn missing_longitude_is_rejected_without_mutation() {
        let h = harness();
        h.prober.set_open("r-1", false);
        let dana = identity("dana@example.com", Role::User);
        let mut req = request("r-1");
        req.location = Some(LocationInput {
            lat: Some(32.08),
            lon: None,
        });

        let err = h.service.subscribe(&dana, req).await.unwrap_err();

        match err {
            WatchError::MissingAttribute(fields) => assert_eq!(fields, vec!["location.lon"]),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(h.store.is_empty());
    }

    #[tokio::test]
    async fn empty_subscriber_email_is_missing_attribute() {
        let h = harness();
        h.prober.set_open("r-1", false);
        let nobody = identity("", Role::User);

        let err = h.service.subscribe(&nobody, request("r-1")).await.unwrap_err();

        assert!(matches!(err, WatchError::MissingAttribute(fields) if fields == vec!["email"]));
    }

    #[tokio::test]
    async fn unsubscribe_removes_only_the_callers_subscription() {
        let h = harness();
        h.prober.set_open("r-1", false);
        let dana = identity("dana@example.com", Role::User);
        let omer = identity("omer@example.com", Role::User);
        h.service.subscribe(&dana, request("r-1")).await.unwrap();
        h.service.subscribe(&omer, request("r-1")).await.unwrap();

        let listing = h.service.unsubscribe(&dana, request("r-1")).await.unwrap();

        assert!(listing.subscriptions.is_empty());
        assert_eq!(h.store.len(), 1);

        // absence is not an error
        let again = h.service.unsubscribe(&dana, request("r-1")).await.unwrap();
        assert!(again.subscriptions.is_empty());
    }

    #[tokio::test]
    async fn regular_user_sees_only_own_subscriptions() {
        let h = harness();
        h.prober.set_open("r-1", false);
        h.prober.set_open("r-2", false);
        let dana = identity("dana@example.com", Role::User);
        let omer = identity("omer@example.com", Role::User);
        h.service.subscribe(&dana, request("r-1")).await.unwrap();
        h.service.subscribe(&omer, request("r-2")).await.unwrap();

        let listing = h.service.list_subscriptions(&dana).await.unwrap();

        assert_eq!(listing.subscriptions.len(), 1);
        assert_eq!(listing.subscriptions[0].subscription.restaurant_id, "r-1");
        let json = serde_json::to_value(&listing).unwrap();
        assert!(json.get("isAdmin").is_none());
        assert!(json["subscriptions"][0].get("isAdmin").is_none());
        assert!(json["subscriptions"][0].get("subscriber").is_none());
    }

    #[tokio::test]
    async fn operator_sees_everything_annotated() {
        let h = harness();
        h.prober.set_open("r-1", false);
        h.prober.set_open("r-2", false);
        let dana = identity("dana@example.com", Role::User);
        let ops = identity("ops@example.com", Role::Operator);
        assert!(h.identities.create_if_absent(&dana).await.unwrap());
        assert!(h.identities.create_if_absent(&ops).await.unwrap());
        h.service.subscribe(&dana, request("r-1")).await.unwrap();
        h.clock.advance(ChronoDuration::minutes(1));
        h.service.subscribe(&ops, request("r-2")).await.unwrap();

        let listing = h.service.list_subscriptions(&ops).await.unwrap();

        assert_eq!(listing.is_admin, Some(true));
        assert_eq!(listing.subscriptions.len(), 2);
        let own = &listing.subscriptions[0];
        assert_eq!(own.subscription.email, "ops@example.com");
        assert_eq!(own.is_admin, Some(true));
        let other = &listing.subscriptions[1];
        assert_eq!(other.subscription.email, "dana@example.com");
        assert_eq!(other.is_admin, Some(false));
        assert_eq!(
            other.subscriber.as_ref().map(|p| p.email.as_str()),
            Some("dana@example.com")
        );
    }
}
