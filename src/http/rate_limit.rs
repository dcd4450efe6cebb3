//! Rate limiting implementation
//!
//! Per-key token buckets with continuous refill. When a bucket is empty an
//! acquisition either fails immediately or parks in a FIFO wait queue that
//! a single background task drains as tokens accrue.

use crate::error::{Error, Result};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for a single rate limit bucket
#[derive(Debug, Clone)]
pub struct BucketConfig {
    /// Maximum number of tokens the bucket holds; values below one are
    /// treated as one
    pub capacity: f64,
    /// Time for an empty bucket to refill completely
    pub window: Duration,
    /// Park callers in the wait queue instead of failing when empty
    pub queue_on_exhaustion: bool,
}

impl BucketConfig {
    /// Create a queueing bucket
    pub fn new(capacity: f64, window: Duration) -> Self {
        Self {
            capacity,
            window,
            queue_on_exhaustion: true,
        }
    }

    /// Create a bucket that rejects immediately when empty
    pub fn rejecting(capacity: f64, window: Duration) -> Self {
        Self {
            capacity,
            window,
            queue_on_exhaustion: false,
        }
    }
}

/// Named bucket set for a rate limiter
///
/// The default table mirrors the throttling tiers of the common endpoint
/// families; all of them queue on exhaustion.
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Bucket configuration by key
    pub buckets: HashMap<String, BucketConfig>,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        let second = Duration::from_secs(1);
        let mut buckets = HashMap::new();
        buckets.insert("default".to_string(), BucketConfig::new(5.0, second));
        buckets.insert("orders".to_string(), BucketConfig::new(10.0, second));
        buckets.insert("listings".to_string(), BucketConfig::new(5.0, second));
        buckets.insert("reports".to_string(), BucketConfig::new(2.0, second));
        buckets.insert("feeds".to_string(), BucketConfig::new(2.0, second));
        Self { buckets }
    }
}

impl RateLimiterConfig {
    /// Start from an empty bucket table
    pub fn empty() -> Self {
        Self {
            buckets: HashMap::new(),
        }
    }

    /// Add or replace a bucket
    #[must_use]
    pub fn bucket(mut self, key: impl Into<String>, config: BucketConfig) -> Self {
        self.buckets.insert(key.into(), config);
        self
    }
}

// ============================================================================
// Internal state
// ============================================================================

/// Live state of one bucket
#[derive(Debug)]
struct Bucket {
    config: BucketConfig,
    /// Current tokens, fractional accrual included; always in 0..=capacity
    tokens: f64,
    last_refill: Instant,
}

impl Bucket {
    /// A fresh bucket starts full; capacities below one token clamp to one
    fn new(mut config: BucketConfig, now: Instant) -> Self {
        config.capacity = config.capacity.max(1.0);
        let tokens = config.capacity;
        Self {
            config,
            tokens,
            last_refill: now,
        }
    }

    /// Add tokens accrued since the last refill, capped at capacity
    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        let accrued =
            elapsed.as_secs_f64() / self.config.window.as_secs_f64() * self.config.capacity;
        self.tokens = (self.tokens + accrued).min(self.config.capacity);
        self.last_refill = now;
    }

    /// Time until one whole token has accrued
    fn time_to_next_token(&self) -> Duration {
        if self.tokens >= 1.0 {
            return Duration::ZERO;
        }
        let deficit = 1.0 - self.tokens;
        Duration::from_secs_f64(deficit * self.config.window.as_secs_f64() / self.config.capacity)
    }
}

/// A parked acquisition waiting for its key's bucket to refill
struct Waiter {
    key: String,
    grant: oneshot::Sender<()>,
    enqueued_at: Instant,
}

struct State {
    buckets: HashMap<String, Bucket>,
    queue: VecDeque<Waiter>,
    /// Whether the drain task is running; guarded by the same mutex as the
    /// queue so a second drain can never start
    draining: bool,
}

// ============================================================================
// Rate Limiter
// ============================================================================

/// Per-key token bucket rate limiter with a FIFO wait queue
#[derive(Clone)]
pub struct RateLimiter {
    config: Arc<RateLimiterConfig>,
    state: Arc<Mutex<State>>,
}

impl RateLimiter {
    /// Create a new rate limiter with the given bucket table
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            config: Arc::new(config),
            state: Arc::new(Mutex::new(State {
                buckets: HashMap::new(),
                queue: VecDeque::new(),
                draining: false,
            })),
        }
    }

    /// Acquire one token for `key`
    ///
    /// Returns immediately while tokens are available. On an empty bucket
    /// this either fails with [`Error::BucketExhausted`] or, for queueing
    /// buckets, suspends until the drain task grants a token in FIFO order
    /// relative to other waiters on the same key.
    pub async fn acquire(&self, key: &str) -> Result<()> {
        let Some(bucket_config) = self.config.buckets.get(key) else {
            return Err(Error::UnknownRateLimitKey {
                key: key.to_string(),
            });
        };

        let receiver = {
            let mut guard = self.lock_state();
            let state = &mut *guard;
            let now = Instant::now();

            let bucket = state
                .buckets
                .entry(key.to_string())
                .or_insert_with(|| Bucket::new(bucket_config.clone(), now));
            bucket.refill(now);

            if bucket.tokens >= 1.0 {
                bucket.tokens -= 1.0;
                return Ok(());
            }

            if !bucket_config.queue_on_exhaustion {
                let wait = bucket.time_to_next_token();
                let retry_after_ms = wait.as_millis() as u64;
                warn!(
                    "Rate limit bucket '{}' exhausted, next token in {}ms",
                    key, retry_after_ms
                );
                return Err(Error::BucketExhausted {
                    key: key.to_string(),
                    retry_after_ms,
                });
            }

            let (sender, receiver) = oneshot::channel();
            state.queue.push_back(Waiter {
                key: key.to_string(),
                grant: sender,
                enqueued_at: now,
            });
            debug!(
                "Queued acquisition for '{}' ({} waiting)",
                key,
                state.queue.len()
            );

            if !state.draining {
                state.draining = true;
                let limiter = self.clone();
                tokio::spawn(async move { limiter.drain_queue().await });
            }

            receiver
        };

        match receiver.await {
            Ok(()) => Ok(()),
            // Sender dropped: reset() cleared the queue while we waited
            Err(_) => Err(Error::AcquireInterrupted {
                key: key.to_string(),
            }),
        }
    }

    /// Whole tokens available for `key` right now
    ///
    /// Fractional accrual is kept internally; the floor applies only at
    /// this reporting boundary. Unknown keys report zero; a configured key
    /// without live state reports its full capacity.
    pub fn available_tokens(&self, key: &str) -> f64 {
        let Some(bucket_config) = self.config.buckets.get(key) else {
            return 0.0;
        };

        let mut guard = self.lock_state();
        let state = &mut *guard;
        let now = Instant::now();
        let bucket = state
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| Bucket::new(bucket_config.clone(), now));
        bucket.refill(now);
        bucket.tokens.floor()
    }

    /// Restore every bucket to full capacity and fail all queued waiters
    ///
    /// Dropping the queue drops the grant senders, so suspended `acquire`
    /// calls resolve with [`Error::AcquireInterrupted`] instead of hanging.
    pub fn reset(&self) {
        let mut guard = self.lock_state();
        let state = &mut *guard;
        let dropped = state.queue.len();
        state.buckets.clear();
        state.queue.clear();
        if dropped > 0 {
            warn!("Rate limiter reset dropped {} queued waiter(s)", dropped);
        }
    }

    /// The configured bucket table
    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Single background task that grants queued waiters in FIFO order
    ///
    /// Runs while the queue is non-empty: refills the head waiter's bucket,
    /// grants and pops when a whole token exists, otherwise sleeps exactly
    /// the time for one token to accrue and re-checks. State is re-derived
    /// from the clock after every sleep.
    async fn drain_queue(self) {
        loop {
            let sleep_for = {
                let mut guard = self.lock_state();
                let state = &mut *guard;
                let now = Instant::now();

                // Discard waiters that gave up before being granted
                while state
                    .queue
                    .front()
                    .is_some_and(|waiter| waiter.grant.is_closed())
                {
                    state.queue.pop_front();
                }

                let Some(head) = state.queue.front() else {
                    state.draining = false;
                    return;
                };
                let key = head.key.clone();

                // Only configured keys can queue, so the lookup always hits
                let Some(bucket_config) = self.config.buckets.get(&key) else {
                    state.queue.pop_front();
                    continue;
                };

                let bucket = state
                    .buckets
                    .entry(key.clone())
                    .or_insert_with(|| Bucket::new(bucket_config.clone(), now));
                bucket.refill(now);

                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    if let Some(waiter) = state.queue.pop_front() {
                        let waited = now.saturating_duration_since(waiter.enqueued_at);
                        if waiter.grant.send(()).is_ok() {
                            debug!("Granted queued acquisition for '{}' after {:?}", key, waited);
                        } else if let Some(bucket) = state.buckets.get_mut(&key) {
                            // Waiter vanished between the closed-check and the
                            // grant; return the unspent token
                            bucket.tokens = (bucket.tokens + 1.0).min(bucket.config.capacity);
                        }
                    }
                    continue;
                }

                bucket.time_to_next_token()
            };

            tokio::time::sleep(sleep_for).await;
        }
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("RateLimiter")
            .field("buckets", &self.config.buckets.len())
            .field("queued", &state.queue.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::float_cmp)]
mod rate_limit_tests {
    use super::*;

    fn single_bucket(capacity: f64, window_ms: u64) -> RateLimiter {
        RateLimiter::new(RateLimiterConfig::empty().bucket(
            "test",
            BucketConfig::new(capacity, Duration::from_millis(window_ms)),
        ))
    }

    #[test]
    fn test_config_default_table() {
        let config = RateLimiterConfig::default();
        assert_eq!(config.buckets.len(), 5);
        assert_eq!(config.buckets["default"].capacity, 5.0);
        assert_eq!(config.buckets["orders"].capacity, 10.0);
        assert_eq!(config.buckets["reports"].capacity, 2.0);
        assert!(config.buckets["feeds"].queue_on_exhaustion);
    }

    #[tokio::test]
    async fn test_acquire_within_capacity() {
        let limiter = single_bucket(5.0, 1000);
        for _ in 0..5 {
            limiter.acquire("test").await.unwrap();
        }
        assert_eq!(limiter.available_tokens("test"), 0.0);
    }

    #[tokio::test]
    async fn test_unknown_key() {
        let limiter = single_bucket(5.0, 1000);

        let err = limiter.acquire("nope").await.unwrap_err();
        assert!(matches!(err, Error::UnknownRateLimitKey { .. }));
        assert_eq!(limiter.available_tokens("nope"), 0.0);
    }

    #[test]
    fn test_fresh_bucket_reports_capacity() {
        let limiter = single_bucket(5.0, 1000);
        assert_eq!(limiter.available_tokens("test"), 5.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokens_capped_at_capacity() {
        let limiter = single_bucket(3.0, 1000);
        limiter.acquire("test").await.unwrap();

        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(limiter.available_tokens("test"), 3.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refill_is_continuous_and_monotonic() {
        let limiter = single_bucket(4.0, 1000);
        for _ in 0..4 {
            limiter.acquire("test").await.unwrap();
        }
        assert_eq!(limiter.available_tokens("test"), 0.0);

        // 300ms refills 1.2 tokens; only the whole token is reported
        tokio::time::advance(Duration::from_millis(300)).await;
        assert_eq!(limiter.available_tokens("test"), 1.0);

        tokio::time::advance(Duration::from_millis(200)).await;
        assert_eq!(limiter.available_tokens("test"), 2.0);

        tokio::time::advance(Duration::from_millis(500)).await;
        assert_eq!(limiter.available_tokens("test"), 4.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fractional_accrual_is_kept() {
        let limiter = single_bucket(2.0, 1000);
        limiter.acquire("test").await.unwrap();
        limiter.acquire("test").await.unwrap();

        // 750ms accrues 1.5 tokens; one acquisition leaves the 0.5 behind
        tokio::time::advance(Duration::from_millis(750)).await;
        limiter.acquire("test").await.unwrap();
        assert_eq!(limiter.available_tokens("test"), 0.0);

        // The kept 0.5 means only 250ms more yields the next whole token
        tokio::time::advance(Duration::from_millis(250)).await;
        assert_eq!(limiter.available_tokens("test"), 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_third_acquisition_waits_half_window() {
        let limiter = single_bucket(2.0, 1000);
        limiter.acquire("test").await.unwrap();
        limiter.acquire("test").await.unwrap();

        let started = Instant::now();
        limiter.acquire("test").await.unwrap();
        let waited = started.elapsed();

        assert!(
            waited >= Duration::from_millis(499) && waited <= Duration::from_millis(510),
            "expected ~500ms wait, got {waited:?}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequential_acquisitions_spaced_by_window() {
        let limiter = single_bucket(1.0, 5000);
        limiter.acquire("test").await.unwrap();

        let started = Instant::now();
        limiter.acquire("test").await.unwrap();
        let waited = started.elapsed();

        assert!(
            waited >= Duration::from_millis(4900),
            "expected >=4.9s wait, got {waited:?}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiters_granted_in_fifo_order() {
        let limiter = single_bucket(1.0, 100);
        limiter.acquire("test").await.unwrap();

        let order = Arc::new(Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for id in 0..3 {
            let limiter = limiter.clone();
            let order = Arc::clone(&order);
            handles.push(tokio::spawn(async move {
                limiter.acquire("test").await.unwrap();
                order.lock().unwrap().push(id);
            }));
            // Let the task park before spawning the next one
            tokio::task::yield_now().await;
            tokio::task::yield_now().await;
        }

        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejecting_bucket_fails_with_wait_hint() {
        let limiter = RateLimiter::new(RateLimiterConfig::empty().bucket(
            "test",
            BucketConfig::rejecting(1.0, Duration::from_millis(1000)),
        ));
        limiter.acquire("test").await.unwrap();

        let err = limiter.acquire("test").await.unwrap_err();
        match err {
            Error::BucketExhausted {
                key,
                retry_after_ms,
            } => {
                assert_eq!(key, "test");
                assert_eq!(retry_after_ms, 1000);
            }
            other => panic!("Expected BucketExhausted, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_capacity_clamps_to_one_token() {
        let limiter = RateLimiter::new(RateLimiterConfig::empty().bucket(
            "test",
            BucketConfig::rejecting(0.0, Duration::from_millis(1000)),
        ));

        // The clamp leaves exactly one grant per window
        assert_eq!(limiter.available_tokens("test"), 1.0);
        limiter.acquire("test").await.unwrap();

        let err = limiter.acquire("test").await.unwrap_err();
        match err {
            Error::BucketExhausted { retry_after_ms, .. } => {
                assert_eq!(retry_after_ms, 1000);
            }
            other => panic!("Expected BucketExhausted, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_capacity_queueing_bucket_still_drains() {
        let limiter = single_bucket(0.0, 100);
        limiter.acquire("test").await.unwrap();

        // The queued waiter must be granted once the window elapses, not hang
        let started = Instant::now();
        limiter.acquire("test").await.unwrap();
        let waited = started.elapsed();
        assert!(
            waited >= Duration::from_millis(99),
            "expected ~100ms wait, got {waited:?}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_restores_capacity_and_fails_waiters() {
        let limiter = single_bucket(1.0, 1000);
        limiter.acquire("test").await.unwrap();

        let waiter = {
            let limiter = limiter.clone();
            tokio::spawn(async move { limiter.acquire("test").await })
        };
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;

        limiter.reset();

        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(Error::AcquireInterrupted { .. })));
        assert_eq!(limiter.available_tokens("test"), 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_waiter_does_not_consume_token() {
        let limiter = single_bucket(1.0, 100);
        limiter.acquire("test").await.unwrap();

        let waiter = {
            let limiter = limiter.clone();
            tokio::spawn(async move { limiter.acquire("test").await })
        };
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        waiter.abort();

        // The abandoned waiter is skipped and its token stays in the bucket
        tokio::time::advance(Duration::from_millis(150)).await;
        tokio::task::yield_now().await;
        assert_eq!(limiter.available_tokens("test"), 1.0);
        limiter.acquire("test").await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cross_key_buckets_are_independent() {
        let limiter = RateLimiter::new(
            RateLimiterConfig::empty()
                .bucket("a", BucketConfig::new(1.0, Duration::from_secs(5)))
                .bucket("b", BucketConfig::new(3.0, Duration::from_secs(1))),
        );

        limiter.acquire("a").await.unwrap();
        // Draining "a" leaves "b" untouched
        limiter.acquire("b").await.unwrap();
        limiter.acquire("b").await.unwrap();
        assert_eq!(limiter.available_tokens("a"), 0.0);
        assert_eq!(limiter.available_tokens("b"), 1.0);
    }
}
