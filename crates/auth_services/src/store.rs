use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use postgres::StoreError;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use crate::types::{IdentityRecord, Provider, Role};

/// Persistence for identity records, keyed by e-mail.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// The record holding `token` whose expiration is not before `now`.
    async fn find_active_by_token(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<IdentityRecord>, StoreError>;

    /// The record for `email`, whatever its expiration.
    async fn find_by_email(&self, email: &str) -> Result<Option<IdentityRecord>, StoreError>;

    /// Every known identity.
    async fn find_all(&self) -> Result<Vec<IdentityRecord>, StoreError>;

    /// Inserts `record` unless its e-mail is already known.
    ///
    /// Returns `false` when another record with the same e-mail won.
    async fn create_if_absent(&self, record: &IdentityRecord) -> Result<bool, StoreError>;

    /// Overwrites the record with the same e-mail.
    async fn update(&self, record: &IdentityRecord) -> Result<(), StoreError>;

    /// Moves the token expiration of `email` to `until`.
    async fn extend_expiration(&self, email: &str, until: DateTime<Utc>) -> Result<(), StoreError>;
}

/// Postgres-backed identity store.
#[derive(Clone)]
pub struct PgIdentityStore {
    pool: PgPool,
}

impl PgIdentityStore {
    /// Creates a new store over the provided connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const IDENTITY_COLUMNS: &str = "provider, email, first_name, family_name, image_url, \
     token, token_expiration, role, created_at";

fn identity_from_row(row: &PgRow) -> Result<IdentityRecord, StoreError> {
    let provider: String = row.try_get("provider")?;
    let provider = provider
        .parse::<Provider>()
        .map_err(|e| StoreError::Corrupt(e.to_string()))?;
    let role: String = row.try_get("role")?;

    Ok(IdentityRecord {
        provider,
        email: row.try_get("email")?,
        first_name: row.try_get("first_name")?,
        family_name: row.try_get("family_name")?,
        image_url: row.try_get("image_url")?,
        token: row.try_get("token")?,
        token_expiration: row.try_get("token_expiration")?,
        role: Role::from_db(&role),
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl IdentityStore for PgIdentityStore {
    async fn find_active_by_token(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<IdentityRecord>, StoreError> {
        let query = format!(
            "SELECT {IDENTITY_COLUMNS} FROM identities \
             WHERE token = $1 AND token_expiration >= $2 \
             LIMIT 1"
        );
        let row = sqlx::query(&query)
            .bind(token)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(identity_from_row).transpose()
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<IdentityRecord>, StoreError> {
        let query = format!("SELECT {IDENTITY_COLUMNS} FROM identities WHERE email = $1");
        let row = sqlx::query(&query)
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(identity_from_row).transpose()
    }

    async fn find_all(&self) -> Result<Vec<IdentityRecord>, StoreError> {
        let query = format!("SELECT {IDENTITY_COLUMNS} FROM identities ORDER BY email");
        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;

        rows.iter().map(identity_from_row).collect()
    }

    async fn create_if_absent(&self, record: &IdentityRecord) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO identities (
                provider, email, first_name, family_name, image_url,
                token, token_expiration, role, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (email) DO NOTHING
            "#,
        )
        .bind(record.provider.as_str())
        .bind(&record.email)
        .bind(&record.first_name)
        .bind(&record.family_name)
        .bind(&record.image_url)
        .bind(&record.token)
        .bind(record.token_expiration)
        .bind(record.role.as_str())
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn update(&self, record: &IdentityRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE identities
            SET provider = $1,
                first_name = $2,
                family_name = $3,
                image_url = $4,
                token = $5,
                token_expiration = $6,
                role = $7,
                updated_at = NOW()
            WHERE email = $8
            "#,
        )
        .bind(record.provider.as_str())
        .bind(&record.first_name)
        .bind(&record.family_name)
        .bind(&record.image_url)
        .bind(&record.token)
        .bind(record.token_expiration)
        .bind(record.role.as_str())
        .bind(&record.email)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn extend_expiration(&self, email: &str, until: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE identities SET token_expiration = $1, updated_at = NOW() WHERE email = $2",
        )
        .bind(until)
        .bind(email)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// In-memory identity store for tests and local runs without a database.
#[derive(Default)]
pub struct MemoryIdentityStore {
    records: Mutex<HashMap<String, IdentityRecord>>,
}

impl MemoryIdentityStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> std::sync::MutexGuard<'_, HashMap<String, IdentityRecord>> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl IdentityStore for MemoryIdentityStore {
    async fn find_active_by_token(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<IdentityRecord>, StoreError> {
        Ok(self
            .records()
            .values()
            .find(|r| r.token == token && r.token_expiration >= now)
            .cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<IdentityRecord>, StoreError> {
        Ok(self.records().get(email).cloned())
    }

    async fn find_all(&self) -> Result<Vec<IdentityRecord>, StoreError> {
        let mut all: Vec<_> = self.records().values().cloned().collect();
        all.sort_by(|a, b| a.email.cmp(&b.email));
        Ok(all)
    }

    async fn create_if_absent(&self, record: &IdentityRecord) -> Result<bool, StoreError> {
        let mut records = self.records();
        if records.contains_key(&record.email) {
            return Ok(false);
        }
        records.insert(record.email.clone(), record.clone());
        Ok(true)
    }

    async fn update(&self, record: &IdentityRecord) -> Result<(), StoreError> {
        if let Some(existing) = self.records().get_mut(&record.email) {
            *existing = record.clone();
        }
        Ok(())
    }

    async fn extend_expiration(&self, email: &str, until: DateTime<Utc>) -> Result<(), StoreError> {
        if let Some(existing) = self.records().get_mut(email) {
            existing.token_expiration = until;
        }
        Ok(())
    }
}
