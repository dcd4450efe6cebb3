//! HTTP module
//!
//! Provides the signed, rate-limited API client.
//!
//! # Features
//!
//! - **Automatic Retries**: Exponential backoff with backend retry hints
//! - **Rate Limiting**: Per-bucket token buckets with FIFO queueing
//! - **Response Classification**: Typed errors for every failure family
//! - **Authentication**: Integration with the auth module

mod client;
mod rate_limit;

pub use client::{ApiClient, ApiResponse, RequestOptions, RetryPolicy, DEFAULT_BUCKET};
pub use rate_limit::{BucketConfig, RateLimiter, RateLimiterConfig};
