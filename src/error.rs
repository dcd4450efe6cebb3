//! Error types for the Selling Partner API client
//!
//! This module defines the error hierarchy for the entire crate.
//! All public APIs return `Result<T, Error>` where Error is defined here.
//!
//! Backend-call failures are carried by [`ApiError`], a tagged union with an
//! [`ErrorKind`] discriminant and shared structured fields, so a single
//! condition can be matched broadly ("any failure") or narrowly ("this was
//! an auth failure") without a class hierarchy.

use serde_json::Value;
use thiserror::Error;

/// The main error type for the SP-API client
#[derive(Error, Debug)]
pub enum Error {
    // ============================================================================
    // Configuration Errors
    // ============================================================================
    /// Invalid configuration detected before any request was made
    #[error("Configuration error: {message}")]
    Config {
        /// What is wrong with the configuration
        message: String,
    },

    /// A required config field was absent or blank
    #[error("Missing required config field: {field}")]
    MissingConfigField {
        /// Name of the offending field
        field: String,
    },

    /// A URL could not be parsed
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    // ============================================================================
    // Authentication Errors
    // ============================================================================
    /// The LWA refresh-token grant failed
    #[error("Token refresh failed: {message}")]
    TokenRefresh {
        /// Transport error or the token endpoint's own description
        message: String,
    },

    /// Signature computation failed
    #[error("Request signing failed: {message}")]
    Signing {
        /// What went wrong while signing
        message: String,
    },

    // ============================================================================
    // Rate Limiting Errors
    // ============================================================================
    /// Acquisition against a key with no configured bucket
    #[error("No rate limit bucket configured for key '{key}'")]
    UnknownRateLimitKey {
        /// The unconfigured key
        key: String,
    },

    /// A non-queueing bucket was empty
    #[error("Rate limit exceeded for '{key}': next token available in {retry_after_ms}ms")]
    BucketExhausted {
        /// The exhausted bucket's key
        key: String,
        /// Wait until one whole token has accrued
        retry_after_ms: u64,
    },

    /// A queued acquisition was cancelled by a limiter reset
    #[error("Rate limit queue for '{key}' was cleared while waiting")]
    AcquireInterrupted {
        /// The bucket the caller was waiting on
        key: String,
    },

    // ============================================================================
    // Transport Errors
    // ============================================================================
    /// The HTTP transport failed below the protocol level
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    // ============================================================================
    // Backend Errors
    // ============================================================================
    /// The backend answered with a non-success status
    #[error(transparent)]
    Api(#[from] ApiError),

    // ============================================================================
    // Generic Errors
    // ============================================================================
    /// Anything that does not fit the variants above
    #[error("{0}")]
    Other(String),

    /// Foreign errors carried through unchanged
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl Error {
    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a missing field error
    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingConfigField {
            field: field.into(),
        }
    }

    /// Create a token refresh error
    pub fn token_refresh(message: impl Into<String>) -> Self {
        Self::TokenRefresh {
            message: message.into(),
        }
    }

    /// Create a signing error
    pub fn signing(message: impl Into<String>) -> Self {
        Self::Signing {
            message: message.into(),
        }
    }

    /// The HTTP status behind this error, if it came from a backend response
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Api(e) => e.status,
            _ => None,
        }
    }

    /// The backend error kind, if this is a classified backend failure
    pub fn api_kind(&self) -> Option<ErrorKind> {
        match self {
            Error::Api(e) => Some(e.kind),
            _ => None,
        }
    }

    /// Check if this error is retryable under the default status whitelist
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Api(e) => e.is_retryable(),
            _ => false,
        }
    }
}

/// Result type alias for the SP-API client
pub type Result<T> = std::result::Result<T, Error>;

// ============================================================================
// Backend Error Taxonomy
// ============================================================================

/// Status codes retried by default: throttling plus transient server faults
pub const DEFAULT_RETRYABLE_STATUS_CODES: [u16; 5] = [429, 500, 502, 503, 504];

/// Discriminant for [`ApiError`]
///
/// `AuthFailure` and `ValidationFailure` are specializations of
/// `ClientRequest`; use [`ErrorKind::is_client_request`] to match the whole
/// 4xx family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Unclassified failure, including transport errors surfaced by the client
    Generic,
    /// 4xx response other than 400/401/403/429
    ClientRequest,
    /// 5xx response
    ServerFault,
    /// 429 response; carries a retry hint when the backend sent one
    RateLimited,
    /// 401 or 403 response
    AuthFailure,
    /// 400 response
    ValidationFailure,
}

impl ErrorKind {
    /// Classify an HTTP status code, first match wins
    pub fn from_status(status: u16) -> Self {
        match status {
            429 => ErrorKind::RateLimited,
            401 | 403 => ErrorKind::AuthFailure,
            400 => ErrorKind::ValidationFailure,
            400..=499 => ErrorKind::ClientRequest,
            500..=599 => ErrorKind::ServerFault,
            _ => ErrorKind::Generic,
        }
    }

    /// True for the whole client-request family (plain 4xx, auth, validation)
    pub fn is_client_request(self) -> bool {
        matches!(
            self,
            ErrorKind::ClientRequest | ErrorKind::AuthFailure | ErrorKind::ValidationFailure
        )
    }
}

/// A classified backend-call failure
///
/// Carries enough structure (`code`, `status`, `details`) for callers to
/// branch programmatically instead of parsing message text.
#[derive(Error, Debug, Clone)]
#[error("{message}")]
pub struct ApiError {
    /// What family of failure this is
    pub kind: ErrorKind,
    /// Human-readable description, surfaced verbatim to remote callers
    pub message: String,
    /// Backend error code from the response body, when present
    pub code: Option<String>,
    /// HTTP status of the response; absent for transport failures
    pub status: Option<u16>,
    /// Structured payload echoed from the backend's `errors` array
    pub details: Option<Value>,
    /// Backend retry hint in seconds; only ever set for `RateLimited`
    pub retry_after_seconds: Option<u64>,
}

impl ApiError {
    /// Wrap an unclassified failure (transport errors, malformed responses)
    pub fn generic(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Generic,
            message: message.into(),
            code: None,
            status: None,
            details: None,
            retry_after_seconds: None,
        }
    }

    /// Build an error of the kind implied by an HTTP status
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::from_status(status),
            message: message.into(),
            code: None,
            status: Some(status),
            details: None,
            retry_after_seconds: None,
        }
    }

    /// Check against the default retryable status whitelist
    pub fn is_retryable(&self) -> bool {
        self.status
            .is_some_and(|s| DEFAULT_RETRYABLE_STATUS_CODES.contains(&s))
    }
}
