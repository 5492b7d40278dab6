use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use postgres::StoreError;
use serde::{Deserialize, Serialize};

/// Identity providers whose access tokens are accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// Google OAuth2
    Google,
    /// Facebook Graph
    Facebook,
}

impl Provider {
    /// Every accepted provider.
    pub const ALL: [Provider; 2] = [Provider::Google, Provider::Facebook];

    /// Lowercase wire name, as sent in the `provider` header.
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Google => "google",
            Provider::Facebook => "facebook",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "google" => Ok(Provider::Google),
            "facebook" => Ok(Provider::Facebook),
            other => Err(AuthError::UnsupportedProvider(other.to_string())),
        }
    }
}

/// Privilege attached to an identity when its session is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Regular subscriber
    #[default]
    User,
    /// Operator account: sees every subscription and the watch statistics
    Operator,
}

impl Role {
    /// Lowercase storage name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Operator => "operator",
        }
    }

    /// Parses the storage name; anything unknown is a regular user.
    pub fn from_db(value: &str) -> Self {
        match value {
            "operator" => Role::Operator,
            _ => Role::User,
        }
    }
}

/// Normalized profile returned by an identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    /// Provider that vouched for the profile
    pub provider: Provider,
    /// E-mail address, the natural key of an identity
    pub email: String,
    /// Given name
    pub first_name: Option<String>,
    /// Family name
    pub family_name: Option<String>,
    /// Avatar URL
    pub image_url: Option<String>,
    /// The access token the profile was fetched with
    pub token: String,
}

/// A cached, verified identity.
///
/// A record is usable for session purposes while `token_expiration` lies in the future.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityRecord {
    /// Provider that vouched for the identity
    pub provider: Provider,
    /// E-mail address (unique)
    pub email: String,
    /// Given name
    pub first_name: Option<String>,
    /// Family name
    pub family_name: Option<String>,
    /// Avatar URL
    pub image_url: Option<String>,
    /// Last access token seen for this identity
    pub token: String,
    /// Instant after which the token must be re-verified upstream
    pub token_expiration: DateTime<Utc>,
    /// Privilege resolved at session time
    pub role: Role,
    /// When the identity was first seen
    pub created_at: DateTime<Utc>,
}

impl IdentityRecord {
    /// Builds a fresh record from a provider profile.
    pub fn from_profile(
        profile: Profile,
        token_expiration: DateTime<Utc>,
        role: Role,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            provider: profile.provider,
            email: profile.email,
            first_name: profile.first_name,
            family_name: profile.family_name,
            image_url: profile.image_url,
            token: profile.token,
            token_expiration,
            role,
            created_at,
        }
    }

    /// Overwrites the mutable profile fields and the token.
    pub fn apply_profile(&mut self, profile: Profile) {
        self.provider = profile.provider;
        self.first_name = profile.first_name;
        self.family_name = profile.family_name;
        self.image_url = profile.image_url;
        self.token = profile.token;
    }

    /// Whether the record is an operator account.
    pub fn is_operator(&self) -> bool {
        self.role == Role::Operator
    }
}

/// Why an identity provider could not vouch for a token.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The userinfo endpoint could not be reached
    #[error("failed to fetch user profile: {0}")]
    Network(#[from] reqwest::Error),

    /// The userinfo endpoint answered with a non-success status
    #[error("userinfo endpoint returned HTTP {0}")]
    Status(u16),

    /// The userinfo body was not the expected JSON shape
    #[error("malformed userinfo response: {0}")]
    Malformed(String),
}

/// Custom error type for authentication-related errors
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The provider or token header is missing or empty
    #[error("missing token headers")]
    BadCredentials,

    /// The provider is not one of the accepted providers
    #[error("unknown provider: {0}")]
    UnsupportedProvider(String),

    /// The identity provider rejected the token or could not be reached
    #[error("{provider} authentication failed: {source}")]
    UpstreamAuthFailure {
        /// Provider that was asked
        provider: Provider,
        /// Underlying cause, kept for logging
        #[source]
        source: ProviderError,
    },

    /// Any other failure while resolving the session
    #[error("session resolution failed: {0}")]
    SessionResolutionFailed(#[from] StoreError),
}

impl actix_web::ResponseError for AuthError {
    fn status_code(&self) -> actix_web::http::StatusCode {
        actix_web::http::StatusCode::UNAUTHORIZED
    }

    fn error_response(&self) -> actix_web::HttpResponse {
        actix_web::HttpResponse::Unauthorized().json(serde_json::json!({
            "error": "login_failed",
            "message": "failed to login"
        }))
    }
}
