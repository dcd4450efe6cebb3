// Allow common clippy pedantic lints that aren't critical for this codebase
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_lossless)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::needless_pass_by_value)]

//! # Selling Partner API Client
//!
//! An authenticated, rate-limited HTTP client for the Amazon Selling
//! Partner API.
//!
//! ## Features
//!
//! - **LWA Authentication**: Refresh-token grant with cached access tokens
//! - **SigV4 Signing**: AWS Signature Version 4 on every request
//! - **Rate Limiting**: Per-endpoint token buckets with FIFO queueing
//! - **Automatic Retries**: Exponential backoff honoring backend hints
//! - **Typed Errors**: Every failure classified for programmatic handling
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use spapi_client::{ApiClient, RequestOptions, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     // Credentials and marketplace from SP_API_* environment variables
//!     let client = ApiClient::from_env()?;
//!
//!     // List orders, charged to the orders rate-limit bucket
//!     let response = client
//!         .request_with_bucket(
//!             "orders",
//!             RequestOptions::get("/orders/v0/orders")
//!                 .query("MarketplaceIds", "ATVPDKIKX0DER")
//!                 .query("CreatedAfter", "2026-01-01T00:00:00Z"),
//!         )
//!         .await?;
//!
//!     println!("{}", response.data);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                           ApiClient                             │
//! │  request(options) → ApiResponse     get / post / put / delete   │
//! └─────────────────────────────────────────────────────────────────┘
//!                                 │
//! ┌───────────────┬───────────────┴───────────┬─────────────────────┐
//! │     Auth      │        Rate Limit         │       Retry         │
//! ├───────────────┼───────────────────────────┼─────────────────────┤
//! │ LWA refresh   │ Token buckets             │ Exponential backoff │
//! │ Token cache   │ FIFO wait queue           │ retry-after hints   │
//! │ SigV4 signing │ Per-endpoint families     │ Status whitelist    │
//! └───────────────┴───────────────────────────┴─────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]

// ============================================================================
// Module declarations
// ============================================================================

/// Error types for the client
pub mod error;

/// Common types and type aliases
pub mod types;

/// Token refresh and request signing
pub mod auth;

/// HTTP client with retry and rate limiting
pub mod http;

/// Credentials and client configuration
pub mod config;

// ============================================================================
// Re-exports
// ============================================================================

pub use error::{ApiError, Error, ErrorKind, Result};
pub use types::*;

// Re-export commonly used types
pub use auth::AccessTokenCache;
pub use config::{ClientConfig, LwaCredentials, MarketplaceConfig, SigningCredentials};
pub use http::{ApiClient, ApiResponse, RateLimiter, RequestOptions, RetryPolicy};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");
