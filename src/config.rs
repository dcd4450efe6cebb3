//! Client configuration types
//!
//! This module contains the credential groups and the top-level client
//! configuration, assembled through a builder or loaded from `SP_API_*`
//! environment variables. Every field is validated non-empty before a
//! client can be constructed from it.

use crate::error::{Error, Result};
use crate::http::{RateLimiterConfig, RetryPolicy};
use std::time::Duration;

// ============================================================================
// Constants
// ============================================================================

/// Login with Amazon token endpoint used for the refresh-token grant
pub const LWA_TOKEN_URL: &str = "https://api.amazon.com/auth/o2/token";

/// Selling Partner API endpoint for the North America region
pub const ENDPOINT_NA: &str = "https://sellingpartnerapi-na.amazon.com";

/// Selling Partner API endpoint for the Europe region
pub const ENDPOINT_EU: &str = "https://sellingpartnerapi-eu.amazon.com";

/// Selling Partner API endpoint for the Far East region
pub const ENDPOINT_FE: &str = "https://sellingpartnerapi-fe.amazon.com";

/// Read an environment variable, rejecting absent or blank values
fn env_var(name: &str) -> Result<String> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(Error::missing_field(name)),
    }
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::missing_field(field));
    }
    Ok(())
}

// ============================================================================
// Signing Credentials
// ============================================================================

/// AWS credential pair used to sign requests, plus the target region
#[derive(Clone)]
pub struct SigningCredentials {
    /// Access key id (the public half of the pair)
    pub access_key_id: String,

    /// Secret access key
    pub secret_access_key: String,

    /// Region the signature is scoped to (e.g., "us-east-1")
    pub region: String,
}

impl SigningCredentials {
    /// Create signing credentials
    pub fn new(
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            region: region.into(),
        }
    }

    /// Load from `SP_API_AWS_ACCESS_KEY_ID`, `SP_API_AWS_SECRET_ACCESS_KEY`
    /// and `SP_API_REGION`
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            access_key_id: env_var("SP_API_AWS_ACCESS_KEY_ID")?,
            secret_access_key: env_var("SP_API_AWS_SECRET_ACCESS_KEY")?,
            region: env_var("SP_API_REGION")?,
        })
    }

    /// Check that no field is empty
    pub fn validate(&self) -> Result<()> {
        require("access_key_id", &self.access_key_id)?;
        require("secret_access_key", &self.secret_access_key)?;
        require("region", &self.region)?;
        Ok(())
    }
}

impl std::fmt::Debug for SigningCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"***")
            .field("region", &self.region)
            .finish()
    }
}

// ============================================================================
// LWA Credentials
// ============================================================================

/// Login with Amazon OAuth client triple for the refresh-token grant
#[derive(Clone)]
pub struct LwaCredentials {
    /// OAuth client id
    pub client_id: String,

    /// OAuth client secret
    pub client_secret: String,

    /// Long-lived refresh token issued at app authorization
    pub refresh_token: String,
}

impl LwaCredentials {
    /// Create LWA credentials
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        refresh_token: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            refresh_token: refresh_token.into(),
        }
    }

    /// Load from `SP_API_CLIENT_ID`, `SP_API_CLIENT_SECRET` and
    /// `SP_API_REFRESH_TOKEN`
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            client_id: env_var("SP_API_CLIENT_ID")?,
            client_secret: env_var("SP_API_CLIENT_SECRET")?,
            refresh_token: env_var("SP_API_REFRESH_TOKEN")?,
        })
    }

    /// Check that no field is empty
    pub fn validate(&self) -> Result<()> {
        require("client_id", &self.client_id)?;
        require("client_secret", &self.client_secret)?;
        require("refresh_token", &self.refresh_token)?;
        Ok(())
    }
}

impl std::fmt::Debug for LwaCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LwaCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"***")
            .field("refresh_token", &"***")
            .finish()
    }
}

// ============================================================================
// Marketplace Config
// ============================================================================

/// Target marketplace and API origin
#[derive(Debug, Clone)]
pub struct MarketplaceConfig {
    /// Marketplace identifier (e.g., "ATVPDKIKX0DER" for amazon.com)
    pub marketplace_id: String,

    /// Selling partner id the requests act on behalf of
    pub seller_id: String,

    /// API origin, scheme and host only (e.g., [`ENDPOINT_NA`])
    pub endpoint: String,
}

impl MarketplaceConfig {
    /// Create a marketplace config
    pub fn new(
        marketplace_id: impl Into<String>,
        seller_id: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            marketplace_id: marketplace_id.into(),
            seller_id: seller_id.into(),
            endpoint: endpoint.into(),
        }
    }

    /// Marketplace on the North America endpoint
    pub fn north_america(marketplace_id: impl Into<String>, seller_id: impl Into<String>) -> Self {
        Self::new(marketplace_id, seller_id, ENDPOINT_NA)
    }

    /// Marketplace on the Europe endpoint
    pub fn europe(marketplace_id: impl Into<String>, seller_id: impl Into<String>) -> Self {
        Self::new(marketplace_id, seller_id, ENDPOINT_EU)
    }

    /// Marketplace on the Far East endpoint
    pub fn far_east(marketplace_id: impl Into<String>, seller_id: impl Into<String>) -> Self {
        Self::new(marketplace_id, seller_id, ENDPOINT_FE)
    }

    /// Load from `SP_API_MARKETPLACE_ID`, `SP_API_SELLER_ID` and
    /// `SP_API_ENDPOINT`
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            marketplace_id: env_var("SP_API_MARKETPLACE_ID")?,
            seller_id: env_var("SP_API_SELLER_ID")?,
            endpoint: env_var("SP_API_ENDPOINT")?,
        })
    }

    /// Check that no field is empty and the endpoint parses as a URL
    pub fn validate(&self) -> Result<()> {
        require("marketplace_id", &self.marketplace_id)?;
        require("seller_id", &self.seller_id)?;
        require("endpoint", &self.endpoint)?;
        url::Url::parse(&self.endpoint)?;
        Ok(())
    }
}

// ============================================================================
// Client Config
// ============================================================================

/// Complete configuration for an [`ApiClient`](crate::http::ApiClient)
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Target marketplace and origin
    pub marketplace: MarketplaceConfig,

    /// Request signing credentials
    pub signing: SigningCredentials,

    /// OAuth credentials for token refresh
    pub lwa: LwaCredentials,

    /// Token endpoint for the refresh-token grant
    pub token_url: String,

    /// Retry behavior for backend calls
    pub retry: RetryPolicy,

    /// Per-key rate limit buckets
    pub rate_limits: RateLimiterConfig,

    /// Transport timeout applied to every request
    pub timeout: Duration,

    /// User agent string
    pub user_agent: String,
}

impl ClientConfig {
    /// Create a new config builder
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    /// Load credentials from the environment, with default tuning
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            marketplace: MarketplaceConfig::from_env()?,
            signing: SigningCredentials::from_env()?,
            lwa: LwaCredentials::from_env()?,
            token_url: LWA_TOKEN_URL.to_string(),
            retry: RetryPolicy::default(),
            rate_limits: RateLimiterConfig::default(),
            timeout: default_timeout(),
            user_agent: default_user_agent(),
        })
    }

    /// Validate every credential group and URL field
    pub fn validate(&self) -> Result<()> {
        self.marketplace.validate()?;
        self.signing.validate()?;
        self.lwa.validate()?;
        require("token_url", &self.token_url)?;
        url::Url::parse(&self.token_url)?;
        Ok(())
    }
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_user_agent() -> String {
    format!("spapi-client/{}", env!("CARGO_PKG_VERSION"))
}

/// Builder for [`ClientConfig`]
#[derive(Debug, Default)]
pub struct ClientConfigBuilder {
    marketplace: Option<MarketplaceConfig>,
    signing: Option<SigningCredentials>,
    lwa: Option<LwaCredentials>,
    token_url: Option<String>,
    retry: Option<RetryPolicy>,
    rate_limits: Option<RateLimiterConfig>,
    timeout: Option<Duration>,
    user_agent: Option<String>,
}

impl ClientConfigBuilder {
    /// Set the target marketplace
    pub fn marketplace(mut self, marketplace: MarketplaceConfig) -> Self {
        self.marketplace = Some(marketplace);
        self
    }

    /// Set the signing credentials
    pub fn signing(mut self, signing: SigningCredentials) -> Self {
        self.signing = Some(signing);
        self
    }

    /// Set the LWA credentials
    pub fn lwa(mut self, lwa: LwaCredentials) -> Self {
        self.lwa = Some(lwa);
        self
    }

    /// Override the token endpoint (defaults to [`LWA_TOKEN_URL`])
    pub fn token_url(mut self, url: impl Into<String>) -> Self {
        self.token_url = Some(url.into());
        self
    }

    /// Set the retry policy
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Set the rate limit buckets
    pub fn rate_limits(mut self, rate_limits: RateLimiterConfig) -> Self {
        self.rate_limits = Some(rate_limits);
        self
    }

    /// Set the transport timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the user agent
    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    /// Build and validate the config
    pub fn build(self) -> Result<ClientConfig> {
        let config = ClientConfig {
            marketplace: self.marketplace.ok_or_else(|| Error::missing_field("marketplace"))?,
            signing: self.signing.ok_or_else(|| Error::missing_field("signing"))?,
            lwa: self.lwa.ok_or_else(|| Error::missing_field("lwa"))?,
            token_url: self.token_url.unwrap_or_else(|| LWA_TOKEN_URL.to_string()),
            retry: self.retry.unwrap_or_default(),
            rate_limits: self.rate_limits.unwrap_or_default(),
            timeout: self.timeout.unwrap_or_else(default_timeout),
            user_agent: self.user_agent.unwrap_or_else(default_user_agent),
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_marketplace() -> MarketplaceConfig {
        MarketplaceConfig::north_america("ATVPDKIKX0DER", "A2SELLER")
    }

    fn test_signing() -> SigningCredentials {
        SigningCredentials::new("AKIAEXAMPLE", "secret-key", "us-east-1")
    }

    fn test_lwa() -> LwaCredentials {
        LwaCredentials::new("amzn1.application-oa2-client.abc", "lwa-secret", "Atzr|refresh")
    }

    #[test]
    fn test_builder_defaults() {
        let config = ClientConfig::builder()
            .marketplace(test_marketplace())
            .signing(test_signing())
            .lwa(test_lwa())
            .build()
            .unwrap();

        assert_eq!(config.token_url, LWA_TOKEN_URL);
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.retry.max_retries, 3);
        assert!(config.user_agent.starts_with("spapi-client/"));
    }

    #[test]
    fn test_builder_custom_retry_and_rate_limits() {
        let limits = RateLimiterConfig::empty().bucket(
            "orders",
            crate::http::BucketConfig::new(10.0, Duration::from_secs(1)),
        );
        let config = ClientConfig::builder()
            .marketplace(test_marketplace())
            .signing(test_signing())
            .lwa(test_lwa())
            .retry(RetryPolicy {
                max_retries: 5,
                ..RetryPolicy::default()
            })
            .rate_limits(limits)
            .build()
            .unwrap();

        assert_eq!(config.retry.max_retries, 5);
        assert!(config.rate_limits.buckets.contains_key("orders"));
        assert!(!config.rate_limits.buckets.contains_key("default"));
    }

    #[test]
    fn test_builder_missing_credentials() {
        let result = ClientConfig::builder().marketplace(test_marketplace()).build();
        assert!(matches!(result, Err(Error::MissingConfigField { .. })));
    }

    #[test]
    fn test_validate_rejects_empty_field() {
        let config = ClientConfig::builder()
            .marketplace(test_marketplace())
            .signing(SigningCredentials::new("", "secret", "us-east-1"))
            .lwa(test_lwa())
            .build();
        match config {
            Err(Error::MissingConfigField { field }) => assert_eq!(field, "access_key_id"),
            other => panic!("Expected missing field error, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_rejects_bad_endpoint() {
        let config = ClientConfig::builder()
            .marketplace(MarketplaceConfig::new("ATVPDKIKX0DER", "A2SELLER", "not a url"))
            .signing(test_signing())
            .lwa(test_lwa())
            .build();
        assert!(matches!(config, Err(Error::InvalidUrl(_))));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let signing = format!("{:?}", test_signing());
        assert!(signing.contains("AKIAEXAMPLE"));
        assert!(!signing.contains("secret-key"));

        let lwa = format!("{:?}", test_lwa());
        assert!(lwa.contains("amzn1.application-oa2-client.abc"));
        assert!(!lwa.contains("lwa-secret"));
        assert!(!lwa.contains("Atzr|refresh"));
    }

    #[test]
    fn test_region_constructors() {
        assert_eq!(test_marketplace().endpoint, ENDPOINT_NA);
        assert_eq!(MarketplaceConfig::europe("A1PA6795UKMFR9", "s").endpoint, ENDPOINT_EU);
        assert_eq!(MarketplaceConfig::far_east("A1VC38T7YXB528", "s").endpoint, ENDPOINT_FE);
    }

    #[test]
    fn test_from_env_round_trip() {
        let vars = [
            ("SP_API_AWS_ACCESS_KEY_ID", "AKIAEXAMPLE"),
            ("SP_API_AWS_SECRET_ACCESS_KEY", "secret-key"),
            ("SP_API_REGION", "us-east-1"),
            ("SP_API_CLIENT_ID", "client-id"),
            ("SP_API_CLIENT_SECRET", "client-secret"),
            ("SP_API_REFRESH_TOKEN", "refresh-token"),
            ("SP_API_MARKETPLACE_ID", "ATVPDKIKX0DER"),
            ("SP_API_SELLER_ID", "A2SELLER"),
            ("SP_API_ENDPOINT", ENDPOINT_NA),
        ];

        std::env::remove_var("SP_API_AWS_ACCESS_KEY_ID");
        for (name, _) in &vars[1..] {
            std::env::set_var(name, "placeholder");
        }
        assert!(matches!(
            ClientConfig::from_env(),
            Err(Error::MissingConfigField { .. })
        ));

        for (name, value) in &vars {
            std::env::set_var(name, value);
        }
        let config = ClientConfig::from_env().unwrap();
        assert_eq!(config.marketplace.marketplace_id, "ATVPDKIKX0DER");
        assert_eq!(config.signing.region, "us-east-1");
        assert_eq!(config.token_url, LWA_TOKEN_URL);

        for (name, _) in &vars {
            std::env::remove_var(name);
        }
    }
}
