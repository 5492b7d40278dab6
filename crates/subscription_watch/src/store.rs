use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use postgres::StoreError;
use sqlx::PgPool;

use crate::subscription_types::Subscription;

/// Durable set of active subscriptions, keyed by `(restaurant_id, email)`.
///
/// Every method is atomic on its own; nothing spans more than one call.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Every active subscription, newest first.
    async fn find_all(&self) -> Result<Vec<Subscription>, StoreError>;

    /// Subscriptions of one subscriber, newest first.
    async fn find_by_subscriber(&self, email: &str) -> Result<Vec<Subscription>, StoreError>;

    /// Inserts `subscription` unless its key already exists. Returns whether it was inserted.
    async fn insert_if_absent(&self, subscription: &Subscription) -> Result<bool, StoreError>;

    /// Deletes by key. Returns the number of removed rows.
    async fn delete(&self, restaurant_id: &str, email: &str) -> Result<u64, StoreError>;

    /// Deletes every subscription created at or before `cutoff`.
    async fn delete_created_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;
}

/// Postgres-backed subscription store.
#[derive(Clone)]
pub struct PgSubscriptionStore {
    pool: PgPool,
}

impl PgSubscriptionStore {
    /// Creates a new store over the provided connection pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SubscriptionStore for PgSubscriptionStore {
    async fn find_all(&self) -> Result<Vec<Subscription>, StoreError> {
        let rows = sqlx::query_as::<_, Subscription>(
            r#"
            SELECT
                id, email, restaurant_id, restaurant_name, lat, lon,
                restaurant_image, restaurant_address, created_at
            FROM subscriptions
            ORDER BY created_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn find_by_subscriber(&self, email: &str) -> Result<Vec<Subscription>, StoreError> {
        let rows = sqlx::query_as::<_, Subscription>(
            r#"
            SELECT
                id, email, restaurant_id, restaurant_name, lat, lon,
                restaurant_image, restaurant_address, created_at
            FROM subscriptions
            WHERE email = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(email)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn insert_if_absent(&self, subscription: &Subscription) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO subscriptions (
                id, email, restaurant_id, restaurant_name, lat, lon,
                restaurant_image, restaurant_address, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (restaurant_id, email) DO NOTHING
            "#,
        )
        .bind(subscription.id)
        .bind(&subscription.email)
        .bind(&subscription.restaurant_id)
        .bind(&subscription.restaurant_name)
        .bind(subscription.lat)
        .bind(subscription.lon)
        .bind(&subscription.restaurant_image)
        .bind(&subscription.restaurant_address)
        .bind(subscription.created_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, restaurant_id: &str, email: &str) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM subscriptions WHERE restaurant_id = $1 AND email = $2")
            .bind(restaurant_id)
            .bind(email)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn delete_created_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM subscriptions WHERE created_at <= $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

/// In-memory subscription store for tests and local runs without a database.
#[derive(Default)]
pub struct MemorySubscriptionStore {
    rows: Mutex<Vec<Subscription>>,
}

impl MemorySubscriptionStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored subscriptions.
    pub fn len(&self) -> usize {
        self.rows().len()
    }

    /// Whether the store holds no subscription.
    pub fn is_empty(&self) -> bool {
        self.rows().is_empty()
    }

    fn rows(&self) -> std::sync::MutexGuard<'_, Vec<Subscription>> {
        self.rows.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn newest_first(mut rows: Vec<Subscription>) -> Vec<Subscription> {
    rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    rows
}

#[async_trait]
impl SubscriptionStore for MemorySubscriptionStore {
    async fn find_all(&self) -> Result<Vec<Subscription>, StoreError> {
        Ok(newest_first(self.rows().clone()))
    }

    async fn find_by_subscriber(&self, email: &str) -> Result<Vec<Subscription>, StoreError> {
        let rows = self
            .rows()
            .iter()
            .filter(|s| s.email == email)
            .cloned()
            .collect();
        Ok(newest_first(rows))
    }

    async fn insert_if_absent(&self, subscription: &Subscription) -> Result<bool, StoreError> {
        let mut rows = self.rows();
        let exists = rows.iter().any(|s| {
            s.restaurant_id == subscription.restaurant_id && s.email == subscription.email
        });
        if exists {
            return Ok(false);
        }
        rows.push(subscription.clone());
        Ok(true)
    }

    async fn delete(&self, restaurant_id: &str, email: &str) -> Result<u64, StoreError> {
        let mut rows = self.rows();
        let before = rows.len();
        rows.retain(|s| !(s.restaurant_id == restaurant_id && s.email == email));
        Ok((before - rows.len()) as u64)
    }

    async fn delete_created_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut rows = self.rows();
        let before = rows.len();
        rows.retain(|s| s.created_at > cutoff);
        Ok((before - rows.len()) as u64)
    }
}
