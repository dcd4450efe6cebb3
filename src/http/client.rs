//! API client with signing, rate limiting and retry
//!
//! Orchestrates the request pipeline: acquire a rate-limit slot, obtain an
//! access token, sign, send, then classify the response and retry within
//! policy. All HTTP statuses come back as data and are classified here;
//! the transport itself never fails on 4xx/5xx.

use super::rate_limit::RateLimiter;
use crate::auth::{AccessTokenCache, RequestSigner};
use crate::config::ClientConfig;
use crate::error::{ApiError, Error, ErrorKind, Result, DEFAULT_RETRYABLE_STATUS_CODES};
use crate::types::{JsonValue, Method, StringMap};
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Bucket used when the caller does not name one
pub const DEFAULT_BUCKET: &str = "default";

// ============================================================================
// Retry Policy
// ============================================================================

/// Retry behavior for backend calls, immutable per client
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retries after the initial attempt
    pub max_retries: u32,
    /// HTTP status codes worth retrying
    pub retryable_status_codes: Vec<u16>,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Multiplier applied to the delay on each subsequent retry
    pub backoff_multiplier: f64,
    /// Upper bound on any computed delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retryable_status_codes: DEFAULT_RETRYABLE_STATUS_CODES.to_vec(),
            base_delay: Duration::from_millis(1000),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Backoff delay for a given attempt (0-based), capped at `max_delay`
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.powf(f64::from(attempt));
        self.base_delay.mul_f64(factor).min(self.max_delay)
    }

    /// Whether a status is on the retry whitelist
    pub fn is_retryable_status(&self, status: u16) -> bool {
        self.retryable_status_codes.contains(&status)
    }
}

// ============================================================================
// Request Options
// ============================================================================

/// Options for a single request
#[derive(Debug, Clone)]
pub struct RequestOptions {
    /// HTTP method
    pub method: Method,
    /// Path below the configured origin (e.g., "/orders/v0/orders")
    pub path: String,
    /// Query parameters, scalar values only
    pub query: StringMap,
    /// Additional request headers
    pub headers: StringMap,
    /// Request body (JSON)
    pub body: Option<JsonValue>,
    /// Override max retries for this request
    pub max_retries: Option<u32>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self::new(Method::GET, "")
    }
}

impl RequestOptions {
    /// Create options for the given method and path
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: StringMap::new(),
            headers: StringMap::new(),
            body: None,
            max_retries: None,
        }
    }

    /// GET options for a path
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    /// POST options for a path
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    /// PUT options for a path
    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    /// DELETE options for a path
    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Add a query parameter
    #[must_use]
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    /// Add a header
    #[must_use]
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Set the JSON body
    #[must_use]
    pub fn json(mut self, body: JsonValue) -> Self {
        self.body = Some(body);
        self
    }

    /// Override max retries
    #[must_use]
    pub fn retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }
}

// ============================================================================
// Response
// ============================================================================

/// A successful backend response
#[derive(Debug, Clone)]
pub struct ApiResponse {
    /// Parsed JSON payload; `Null` for empty bodies
    pub data: JsonValue,
    /// HTTP status code
    pub status: u16,
    /// Response headers
    pub headers: StringMap,
}

impl ApiResponse {
    async fn from_response(response: reqwest::Response) -> Result<Self> {
        let status = response.status().as_u16();
        let headers = header_map_to_hashmap(response.headers());
        let text = response.text().await.map_err(Error::Http)?;

        let data = if text.trim().is_empty() {
            JsonValue::Null
        } else {
            serde_json::from_str(&text).map_err(|e| {
                Error::Api(ApiError::generic(format!(
                    "Failed to decode response body: {e}"
                )))
            })?
        };

        Ok(Self {
            data,
            status,
            headers,
        })
    }

    /// Deserialize the payload into a typed value
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.data.clone()).map_err(|e| {
            Error::Api(ApiError::generic(format!(
                "Failed to decode response body: {e}"
            )))
        })
    }
}

// ============================================================================
// API Client
// ============================================================================

/// Signed, rate-limited client for one backend origin
pub struct ApiClient {
    config: ClientConfig,
    http: Client,
    signer: RequestSigner,
    token_cache: Arc<AccessTokenCache>,
    rate_limiter: Arc<RateLimiter>,
}

impl ApiClient {
    /// Create a client, building its token cache and rate limiter from the
    /// config
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let http = build_http_client(&config)?;
        let token_cache = Arc::new(AccessTokenCache::with_client(
            config.lwa.clone(),
            config.token_url.clone(),
            http.clone(),
        ));
        let rate_limiter = Arc::new(RateLimiter::new(config.rate_limits.clone()));
        Ok(Self {
            signer: RequestSigner::new(config.signing.clone()),
            config,
            http,
            token_cache,
            rate_limiter,
        })
    }

    /// Create a client with caller-supplied components
    ///
    /// Lets several clients share one token cache or rate limiter, and
    /// lets tests substitute pre-seeded instances.
    pub fn with_components(
        config: ClientConfig,
        token_cache: Arc<AccessTokenCache>,
        rate_limiter: Arc<RateLimiter>,
    ) -> Result<Self> {
        config.validate()?;
        let http = build_http_client(&config)?;
        Ok(Self {
            signer: RequestSigner::new(config.signing.clone()),
            config,
            http,
            token_cache,
            rate_limiter,
        })
    }

    /// Create a client from `SP_API_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::new(ClientConfig::from_env()?)
    }

    /// The client's configuration
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// The shared access-token cache
    pub fn token_cache(&self) -> &AccessTokenCache {
        &self.token_cache
    }

    /// The shared rate limiter
    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    /// Make a request against the default bucket
    pub async fn request(&self, options: RequestOptions) -> Result<ApiResponse> {
        self.execute(DEFAULT_BUCKET, &options).await
    }

    /// Make a request charged to a specific rate-limit bucket
    pub async fn request_with_bucket(
        &self,
        bucket_key: &str,
        options: RequestOptions,
    ) -> Result<ApiResponse> {
        self.execute(bucket_key, &options).await
    }

    /// Make a GET request
    pub async fn get(&self, path: &str) -> Result<ApiResponse> {
        self.request(RequestOptions::get(path)).await
    }

    /// Make a GET request with extra options; the path argument wins over
    /// whatever the options carry
    pub async fn get_with(&self, path: &str, options: RequestOptions) -> Result<ApiResponse> {
        self.request(RequestOptions {
            method: Method::GET,
            path: path.to_string(),
            ..options
        })
        .await
    }

    /// Make a POST request with a JSON body
    pub async fn post(&self, path: &str, body: JsonValue) -> Result<ApiResponse> {
        self.request(RequestOptions::post(path).json(body)).await
    }

    /// Make a PUT request with a JSON body
    pub async fn put(&self, path: &str, body: JsonValue) -> Result<ApiResponse> {
        self.request(RequestOptions::put(path).json(body)).await
    }

    /// Make a DELETE request
    pub async fn delete(&self, path: &str) -> Result<ApiResponse> {
        self.request(RequestOptions::delete(path)).await
    }

    /// Run the request pipeline with retries
    async fn execute(&self, bucket_key: &str, options: &RequestOptions) -> Result<ApiResponse> {
        let url = self.build_url(&options.path, &options.query)?;
        let body = match &options.body {
            Some(value) => Some(serde_json::to_string(value).map_err(|e| {
                Error::Other(format!("Failed to serialize request body: {e}"))
            })?),
            None => None,
        };
        let max_retries = options.max_retries.unwrap_or(self.config.retry.max_retries);

        let mut attempt = 0;
        loop {
            self.rate_limiter.acquire(bucket_key).await?;
            let token = self.token_cache.get_access_token().await?;

            // Defaults first, then caller headers, then signature headers
            // override everything on conflict
            let mut headers = StringMap::new();
            headers.insert("content-type".to_string(), "application/json".to_string());
            headers.insert("x-amz-access-token".to_string(), token);
            for (key, value) in &options.headers {
                headers.insert(key.to_lowercase(), value.clone());
            }
            // A caller-supplied authorization header would be replaced below,
            // so it must not participate in the signature either
            headers.remove("authorization");
            let signature_headers =
                self.signer
                    .sign(options.method, &url, &headers, body.as_deref())?;
            headers.extend(signature_headers);

            let mut request = self.http.request(options.method.into(), &url);
            for (key, value) in &headers {
                // The transport derives the host header from the URL
                if key == "host" {
                    continue;
                }
                request = request.header(key.as_str(), value.as_str());
            }
            if let Some(ref body) = body {
                request = request.body(body.clone());
            }

            let response = match request.send().await {
                Ok(response) => response,
                Err(e) => return Err(transport_error(&e)),
            };

            let status = response.status().as_u16();
            if response.status().is_success() {
                debug!("Request succeeded: {} {}", options.method, url);
                return ApiResponse::from_response(response).await;
            }

            let response_headers = header_map_to_hashmap(response.headers());
            let body_text = response.text().await.unwrap_or_default();
            let api_error = classify_response(status, &response_headers, &body_text);

            if self.config.retry.is_retryable_status(status) && attempt < max_retries {
                let delay = match api_error.retry_after_seconds {
                    Some(seconds) => Duration::from_secs(seconds),
                    None => self.config.retry.delay_for_attempt(attempt),
                };
                warn!(
                    "Request failed with {}, attempt {}/{}, retrying in {:?}",
                    status,
                    attempt + 1,
                    max_retries + 1,
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
                continue;
            }

            return Err(Error::Api(api_error));
        }
    }

    /// Build the full URL from the configured origin, path and query
    fn build_url(&self, path: &str, query: &StringMap) -> Result<String> {
        let base = self.config.marketplace.endpoint.trim_end_matches('/');
        let path = path.trim_start_matches('/');
        let mut url = Url::parse(&format!("{base}/{path}"))?;

        if !query.is_empty() {
            let mut pairs: Vec<_> = query.iter().collect();
            pairs.sort();
            let mut serializer = url.query_pairs_mut();
            for (key, value) in pairs {
                serializer.append_pair(key, value);
            }
            drop(serializer);
        }

        Ok(url.to_string())
    }
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("config", &self.config)
            .field("rate_limiter", &self.rate_limiter)
            .finish_non_exhaustive()
    }
}

fn build_http_client(config: &ClientConfig) -> Result<Client> {
    Client::builder()
        .timeout(config.timeout)
        .user_agent(&config.user_agent)
        .build()
        .map_err(Error::Http)
}

/// Wrap a transport failure as an unclassified error; never retried
fn transport_error(e: &reqwest::Error) -> Error {
    let api_error = if e.is_timeout() {
        ApiError::generic("Request timeout")
    } else {
        ApiError::generic(format!("Network error: {e}"))
    };
    Error::Api(api_error)
}

/// Classify a non-2xx response into a typed error
///
/// Message and code come from the first entry of the body's `errors`
/// array when present; `details` carries the whole array when it holds
/// more than one entry, else the first entry's own `details` field.
fn classify_response(status: u16, headers: &StringMap, body: &str) -> ApiError {
    let parsed: Option<JsonValue> = serde_json::from_str(body).ok();
    let errors = parsed
        .as_ref()
        .and_then(|v| v.get("errors"))
        .and_then(JsonValue::as_array)
        .filter(|entries| !entries.is_empty());

    let (message, code, details) = match errors {
        Some(entries) => {
            let first = &entries[0];
            let message = first
                .get("message")
                .and_then(JsonValue::as_str)
                .unwrap_or("Request failed")
                .to_string();
            let code = first.get("code").and_then(JsonValue::as_str).map(String::from);
            let details = if entries.len() > 1 {
                Some(JsonValue::Array(entries.clone()))
            } else {
                first.get("details").cloned()
            };
            (message, code, details)
        }
        None => (format!("Request failed with status {status}"), None, None),
    };

    let retry_after_seconds = if status == 429 {
        headers.get("retry-after").and_then(|v| v.parse().ok())
    } else {
        None
    };

    ApiError {
        kind: ErrorKind::from_status(status),
        message,
        code,
        status: Some(status),
        details,
        retry_after_seconds,
    }
}

fn header_map_to_hashmap(headers: &reqwest::header::HeaderMap) -> StringMap {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect()
}
