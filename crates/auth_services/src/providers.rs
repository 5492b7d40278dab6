use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::types::{AuthError, Profile, Provider, ProviderError};

const GOOGLE_USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v1/userinfo";
const FACEBOOK_USERINFO_URL: &str =
    "https://graph.facebook.com/me?fields=email,first_name,last_name,picture";

/// Verifies an access token with one identity provider.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Fetches and normalizes the profile behind `access_token`.
    async fn authenticate(&self, access_token: &str) -> Result<Profile, ProviderError>;
}

async fn fetch_userinfo<T: DeserializeOwned>(
    client: &Client,
    url: &str,
    access_token: &str,
) -> Result<T, ProviderError> {
    let response = client.get(url).bearer_auth(access_token).send().await?;

    if !response.status().is_success() {
        return Err(ProviderError::Status(response.status().as_u16()));
    }

    let body = response.text().await?;
    serde_json::from_str(&body).map_err(|e| ProviderError::Malformed(e.to_string()))
}

fn require_email(email: Option<String>) -> Result<String, ProviderError> {
    email
        .filter(|email| !email.is_empty())
        .ok_or_else(|| ProviderError::Malformed("profile has no email".to_string()))
}

#[derive(Debug, Deserialize)]
struct GoogleUserInfo {
    email: Option<String>,
    given_name: Option<String>,
    family_name: Option<String>,
    picture: Option<String>,
}

/// Google OAuth2 userinfo adapter.
pub struct GoogleProvider {
    client: Client,
    userinfo_url: String,
}

impl GoogleProvider {
    /// Creates an adapter against the public Google userinfo endpoint.
    pub fn new(client: Client) -> Self {
        Self::with_userinfo_url(client, GOOGLE_USERINFO_URL)
    }

    /// Creates an adapter against a custom userinfo endpoint.
    pub fn with_userinfo_url(client: Client, userinfo_url: impl Into<String>) -> Self {
        Self {
            client,
            userinfo_url: userinfo_url.into(),
        }
    }

    fn normalize(info: GoogleUserInfo, access_token: &str) -> Result<Profile, ProviderError> {
        Ok(Profile {
            provider: Provider::Google,
            email: require_email(info.email)?,
            first_name: info.given_name,
            family_name: info.family_name,
            image_url: info.picture,
            token: access_token.to_string(),
        })
    }
}

#[async_trait]
impl IdentityProvider for GoogleProvider {
    async fn authenticate(&self, access_token: &str) -> Result<Profile, ProviderError> {
        let info: GoogleUserInfo =
            fetch_userinfo(&self.client, &self.userinfo_url, access_token).await?;
        Self::normalize(info, access_token)
    }
}

#[derive(Debug, Deserialize)]
struct FacebookUserInfo {
    email: Option<String>,
    first_name: Option<String>,
    last_name: Option<String>,
    picture: Option<FacebookPicture>,
}

#[derive(Debug, Deserialize)]
struct FacebookPicture {
    data: Option<FacebookPictureData>,
}

#[derive(Debug, Deserialize)]
struct FacebookPictureData {
    url: Option<String>,
}

/// Facebook Graph `/me` adapter.
pub struct FacebookProvider {
    client: Client,
    userinfo_url: String,
}

impl FacebookProvider {
    /// Creates an adapter against the public Graph API.
    pub fn new(client: Client) -> Self {
        Self::with_userinfo_url(client, FACEBOOK_USERINFO_URL)
    }

    /// Creates an adapter against a custom userinfo endpoint.
    pub fn with_userinfo_url(client: Client, userinfo_url: impl Into<String>) -> Self {
        Self {
            client,
            userinfo_url: userinfo_url.into(),
        }
    }

    fn normalize(info: FacebookUserInfo, access_token: &str) -> Result<Profile, ProviderError> {
        Ok(Profile {
            provider: Provider::Facebook,
            email: require_email(info.email)?,
            first_name: info.first_name,
            family_name: info.last_name,
            image_url: info.picture.and_then(|p| p.data).and_then(|d| d.url),
            token: access_token.to_string(),
        })
    }
}

#[async_trait]
impl IdentityProvider for FacebookProvider {
    async fn authenticate(&self, access_token: &str) -> Result<Profile, ProviderError> {
        let info: FacebookUserInfo =
            fetch_userinfo(&self.client, &self.userinfo_url, access_token).await?;
        Self::normalize(info, access_token)
    }
}

/// Maps each accepted provider to its adapter.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    adapters: HashMap<Provider, Arc<dyn IdentityProvider>>,
}

impl ProviderRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the Google and Facebook adapters sharing one HTTP client.
    pub fn with_default_providers(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self::new()
            .register(Provider::Google, Arc::new(GoogleProvider::new(client.clone())))
            .register(Provider::Facebook, Arc::new(FacebookProvider::new(client))))
    }

    /// Adds or replaces the adapter for `provider`.
    pub fn register(mut self, provider: Provider, adapter: Arc<dyn IdentityProvider>) -> Self {
        self.adapters.insert(provider, adapter);
        self
    }

    /// Verifies `access_token` with the adapter registered for `provider`.
    pub async fn authenticate(
        &self,
        provider: Provider,
        access_token: &str,
    ) -> Result<Profile, AuthError> {
        let adapter = self
            .adapters
            .get(&provider)
            .ok_or_else(|| AuthError::UnsupportedProvider(provider.to_string()))?;

        adapter
            .authenticate(access_token)
            .await
            .map_err(|source| AuthError::UpstreamAuthFailure { provider, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn google_profile_is_normalized() {
        let info: GoogleUserInfo = serde_json::from_str(
            r#"{"email":"dana@example.com","given_name":"Dana","family_name":"Levi","picture":"https://img/dana.png"}"#,
        )
        .unwrap();

        let profile = GoogleProvider::normalize(info, "tok").unwrap();

        assert_eq!(profile.provider, Provider::Google);
        assert_eq!(profile.email, "dana@example.com");
        assert_eq!(profile.first_name.as_deref(), Some("Dana"));
        assert_eq!(profile.family_name.as_deref(), Some("Levi"));
        assert_eq!(profile.image_url.as_deref(), Some("https://img/dana.png"));
        assert_eq!(profile.token, "tok");
    }

    #[test]
    fn facebook_picture_is_unwrapped() {
        let info: FacebookUserInfo = serde_json::from_str(
            r#"{"email":"omer@example.com","first_name":"Omer","last_name":"Katz","picture":{"data":{"url":"https://fb/omer.jpg"}}}"#,
        )
        .unwrap();

        let profile = FacebookProvider::normalize(info, "fb-tok").unwrap();

        assert_eq!(profile.provider, Provider::Facebook);
        assert_eq!(profile.family_name.as_deref(), Some("Katz"));
        assert_eq!(profile.image_url.as_deref(), Some("https://fb/omer.jpg"));
    }

    #[test]
    fn profile_without_email_is_malformed() {
        let info: GoogleUserInfo = serde_json::from_str(r#"{"given_name":"Dana"}"#).unwrap();

        let err = GoogleProvider::normalize(info, "tok").unwrap_err();

        assert!(matches!(err, ProviderError::Malformed(_)));
    }

    #[tokio::test]
    async fn unregistered_provider_is_unsupported() {
        let registry = ProviderRegistry::new();

        let err = registry
            .authenticate(Provider::Facebook, "tok")
            .await
            .unwrap_err();

        assert!(matches!(err, AuthError::UnsupportedProvider(_)));
    }
}
