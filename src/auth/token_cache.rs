//! Access-token cache
//!
//! Caches the Login with Amazon access token and refreshes it through the
//! refresh-token grant when it is absent or close to expiry. Refresh is
//! always lazy; there is no background renewal task.

use crate::config::LwaCredentials;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Seconds before expiry at which a cached token is treated as absent
pub const EXPIRY_MARGIN_SECONDS: i64 = 300;

/// Cached access token with its expiration time
#[derive(Debug, Clone)]
pub struct CachedToken {
    /// The bearer token value
    pub token: String,
    /// When the token expires
    pub expires_at: DateTime<Utc>,
}

impl CachedToken {
    /// Create a new cached token
    pub fn new(token: String, expires_at: DateTime<Utc>) -> Self {
        Self { token, expires_at }
    }

    /// Create a token that expires in N seconds from now
    pub fn expires_in(token: String, seconds: i64) -> Self {
        let expires_at = Utc::now() + chrono::Duration::seconds(seconds);
        Self { token, expires_at }
    }

    /// Check if the token is expired or inside the safety margin
    pub fn is_expired(&self) -> bool {
        let margin = chrono::Duration::seconds(EXPIRY_MARGIN_SECONDS);
        Utc::now() + margin >= self.expires_at
    }
}

/// Caches one access token per credential set, refreshing it lazily
///
/// Concurrent callers that all miss the cache serialize on the write lock
/// and re-check it after acquiring, so exactly one refresh request goes
/// out per expiry window.
pub struct AccessTokenCache {
    /// OAuth credentials for the refresh-token grant
    credentials: LwaCredentials,
    /// Token endpoint the grant is posted to
    token_url: String,
    /// The cached token, if any
    cached_token: Arc<RwLock<Option<CachedToken>>>,
    /// HTTP client for token requests
    http_client: Client,
}

impl AccessTokenCache {
    /// Create a new token cache
    pub fn new(credentials: LwaCredentials, token_url: impl Into<String>) -> Self {
        Self::with_client(credentials, token_url, Client::new())
    }

    /// Create a token cache with a custom HTTP client
    pub fn with_client(
        credentials: LwaCredentials,
        token_url: impl Into<String>,
        http_client: Client,
    ) -> Self {
        Self {
            credentials,
            token_url: token_url.into(),
            cached_token: Arc::new(RwLock::new(None)),
            http_client,
        }
    }

    /// Get a valid access token, refreshing if necessary
    pub async fn get_access_token(&self) -> Result<String> {
        // Check if we have a valid cached token
        {
            let cached = self.cached_token.read().await;
            if let Some(token) = cached.as_ref() {
                if !token.is_expired() {
                    return Ok(token.token.clone());
                }
            }
        }

        // Need to refresh - acquire write lock
        let mut cached = self.cached_token.write().await;

        // Double-check after acquiring write lock (another task might have refreshed)
        if let Some(token) = cached.as_ref() {
            if !token.is_expired() {
                return Ok(token.token.clone());
            }
        }

        // Refresh the token; on failure the previous cache entry is left alone
        let new_token = self.refresh().await?;
        let token_str = new_token.token.clone();
        *cached = Some(new_token);

        Ok(token_str)
    }

    /// Whether a token is cached and outside the safety margin
    pub async fn has_cached_token(&self) -> bool {
        let cached = self.cached_token.read().await;
        cached.as_ref().is_some_and(|token| !token.is_expired())
    }

    /// Clear the cached token (useful for testing or forced refresh)
    pub async fn clear_cache(&self) {
        let mut cached = self.cached_token.write().await;
        *cached = None;
    }

    /// POST the refresh-token grant to the token endpoint
    async fn refresh(&self) -> Result<CachedToken> {
        debug!("Refreshing access token via {}", self.token_url);

        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", self.credentials.refresh_token.as_str()),
            ("client_id", self.credentials.client_id.as_str()),
            ("client_secret", self.credentials.client_secret.as_str()),
        ];

        let response = self
            .http_client
            .post(&self.token_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| Error::token_refresh(format!("Token request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            warn!("Access token refresh failed with status {}", status);
            return Err(Error::token_refresh(describe_refresh_failure(
                status, &body,
            )));
        }

        let token_response: TokenResponse = response
            .json()
            .await
            .map_err(|e| Error::token_refresh(format!("Malformed token response: {e}")))?;

        debug!(
            "Access token refreshed, expires in {}s",
            token_response.expires_in
        );
        Ok(token_response.into_cached_token())
    }

    /// Seed the cache directly, bypassing the token endpoint
    #[cfg(test)]
    pub(crate) async fn prime(&self, token: CachedToken) {
        let mut cached = self.cached_token.write().await;
        *cached = Some(token);
    }
}

impl std::fmt::Debug for AccessTokenCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessTokenCache")
            .field("token_url", &self.token_url)
            .field("credentials", &self.credentials)
            .finish_non_exhaustive()
    }
}

/// Surface the endpoint's `error_description` when the body carries one
fn describe_refresh_failure(status: u16, body: &str) -> String {
    let description = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("error_description")?.as_str().map(String::from));

    match description {
        Some(desc) => format!("Token endpoint returned status {status}: {desc}"),
        None => format!("Token endpoint returned status {status}"),
    }
}

/// Token endpoint response for the refresh-token grant
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
    #[serde(default)]
    #[allow(dead_code)]
    token_type: Option<String>,
}

impl TokenResponse {
    fn into_cached_token(self) -> CachedToken {
        CachedToken::expires_in(self.access_token, self.expires_in)
    }
}
