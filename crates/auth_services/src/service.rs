use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use notification_services::NotificationDispatcher;
use postgres::StoreError;

use crate::clock::Clock;
use crate::providers::ProviderRegistry;
use crate::store::IdentityStore;
use crate::types::{AuthError, IdentityRecord, Provider, Role};

/// Expiration windows applied by the session cache.
#[derive(Debug, Clone, Copy)]
pub struct SessionTtls {
    /// Added on every cache hit (default: 24 hours)
    pub hit_extension: Duration,
    /// Given to an identity seen for the first time (default: 24 hours)
    pub new_identity: Duration,
    /// Given to a known identity that presented a new token (default: 3 hours)
    pub returning_identity: Duration,
}

impl Default for SessionTtls {
    fn default() -> Self {
        Self {
            hit_extension: Duration::hours(24),
            new_identity: Duration::hours(24),
            returning_identity: Duration::hours(3),
        }
    }
}

/// Resolves access tokens to identities, falling back to the identity provider on a miss.
pub struct SessionCache {
    store: Arc<dyn IdentityStore>,
    providers: ProviderRegistry,
    dispatcher: NotificationDispatcher,
    clock: Arc<dyn Clock>,
    operator_email: String,
    ttls: SessionTtls,
}

impl SessionCache {
    /// Creates a session cache. `operator_email` receives the operator role.
    pub fn new(
        store: Arc<dyn IdentityStore>,
        providers: ProviderRegistry,
        dispatcher: NotificationDispatcher,
        clock: Arc<dyn Clock>,
        operator_email: impl Into<String>,
        ttls: SessionTtls,
    ) -> Self {
        Self {
            store,
            providers,
            dispatcher,
            clock,
            operator_email: operator_email.into(),
            ttls,
        }
    }

    /// Role for `email`. Operator status is keyed on the configured operator address.
    pub fn role_for(&self, email: &str) -> Role {
        if !self.operator_email.is_empty() && email.eq_ignore_ascii_case(&self.operator_email) {
            Role::Operator
        } else {
            Role::User
        }
    }

    /// Resolves the identity behind `(provider, access_token)`.
    ///
    /// Header values are passed through raw; validation happens here so that a missing
    /// value fails before any I/O.
    pub async fn resolve_session(
        &self,
        provider: Option<&str>,
        access_token: Option<&str>,
    ) -> Result<IdentityRecord, AuthError> {
        let (provider, access_token) = match (provider, access_token) {
            (Some(p), Some(t)) if !p.is_empty() && !t.is_empty() => (p, t),
            _ => return Err(AuthError::BadCredentials),
        };
        let provider: Provider = provider.parse()?;
        let now = self.clock.now();

        if let Some(mut record) = self.store.find_active_by_token(access_token, now).await? {
            let until = extend(record.token_expiration, now + self.ttls.hit_extension);
            self.store.extend_expiration(&record.email, until).await?;
            record.token_expiration = until;
            record.role = self.role_for(&record.email);
            log::debug!("[UserContext] cache hit for {}", record.email);
            return Ok(record);
        }

        let profile = self.providers.authenticate(provider, access_token).await?;
        log::info!(
            "[UserContext] user request by: {} {}. ({})",
            profile.first_name.as_deref().unwrap_or_default(),
            profile.family_name.as_deref().unwrap_or_default(),
            profile.email
        );

        let role = self.role_for(&profile.email);
        let existing = match self.store.find_by_email(&profile.email).await? {
            Some(record) => record,
            None => {
                log::info!("[UserContext] creating new user: {}", profile.email);
                let record = IdentityRecord::from_profile(
                    profile.clone(),
                    now + self.ttls.new_identity,
                    role,
                    now,
                );
                if self.store.create_if_absent(&record).await? {
                    self.announce_new_user(&record);
                    return Ok(record);
                }

                // a concurrent first sign-in created the row first
                self.store
                    .find_by_email(&record.email)
                    .await?
                    .ok_or_else(|| {
                        StoreError::Corrupt(format!("identity {} vanished", record.email))
                    })?
            }
        };

        log::info!("[UserContext] user already in db: {}", existing.email);
        let mut record = existing;
        record.apply_profile(profile);
        record.token_expiration = now + self.ttls.returning_identity;
        record.role = role;
        self.store.update(&record).await?;
        Ok(record)
    }

    /// Tells the operator about a new identity without holding up the request.
    fn announce_new_user(&self, record: &IdentityRecord) {
        let dispatcher = self.dispatcher.clone();
        let first_name = record.first_name.clone().unwrap_or_default();
        let family_name = record.family_name.clone().unwrap_or_default();
        let email = record.email.clone();

        tokio::spawn(async move {
            if let Err(e) = dispatcher.new_user(&first_name, &family_name, &email).await {
                log::warn!("Failed to announce new user {}: {}", email, e);
            }
        });
    }
}

fn extend(current: DateTime<Utc>, candidate: DateTime<Utc>) -> DateTime<Utc> {
    current.max(candidate)
}
