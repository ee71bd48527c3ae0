//! Per-client token bucket admission control.
//!
//! # Algorithm
//!
//! Each client owns a bucket holding up to `capacity` tokens. Refill is lazy:
//! nothing runs in the background, every check first credits the whole
//! refill intervals elapsed since the last refill.
//!
//! ```text
//! elapsed        = now - last_refill_at
//! tokens_to_add  = floor(elapsed / refill_interval)
//! if tokens_to_add > 0:
//!     tokens         = min(capacity, tokens + tokens_to_add)
//!     last_refill_at = now          // fractional progress is dropped
//! if tokens > 0: tokens -= 1, admit
//! else:          reject             // rejections cost nothing
//! ```
//!
//! When no whole interval has elapsed, `last_refill_at` is left untouched so
//! partial progress keeps accumulating toward the next token.
//!
//! # Locking
//!
//! Buckets are spread over a fixed set of shards, each guarded by its own
//! mutex. The lookup-or-create, refill and decrement for one client happen in
//! a single critical section on that client's shard; clients hashed to other
//! shards proceed in parallel.

use std::collections::HashMap;
use std::hash::{BuildHasher, RandomState};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::trace;

use crate::lock::mutex_lock;

/// Default number of lock shards.
pub const DEFAULT_SHARDS: usize = 16;

/// Error type for limiter configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RateLimitError {
    /// Capacity cannot be zero.
    #[error("capacity must be greater than 0; disable rate limiting instead")]
    ZeroCapacity,

    /// Refill interval cannot be zero.
    #[error("refill interval must be greater than 0")]
    ZeroRefillInterval,

    /// At least one shard is required.
    #[error("shard count must be greater than 0")]
    ZeroShards,
}

/// Token state for a single client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenBucket {
    tokens: u32,
    capacity: u32,
    last_refill_at: Instant,
}

impl TokenBucket {
    /// A full bucket whose refill clock starts at `now`.
    fn full(capacity: u32, now: Instant) -> Self {
        Self {
            tokens: capacity,
            capacity,
            last_refill_at: now,
        }
    }

    /// Tokens currently available (as of the last check).
    pub fn tokens(&self) -> u32 {
        self.tokens
    }

    /// Whole refill intervals elapsed since the last refill, saturating.
    fn whole_intervals(&self, now: Instant, refill_interval: Duration) -> u32 {
        let elapsed = now.saturating_duration_since(self.last_refill_at);
        let intervals = elapsed.as_nanos() / refill_interval.as_nanos().max(1);
        u32::try_from(intervals).unwrap_or(u32::MAX)
    }

    fn refill(&mut self, now: Instant, refill_interval: Duration) {
        let tokens_to_add = self.whole_intervals(now, refill_interval);
        if tokens_to_add > 0 {
            self.tokens = self.tokens.saturating_add(tokens_to_add).min(self.capacity);
            self.last_refill_at = now;
        }
    }

    fn try_take(&mut self) -> bool {
        if self.tokens > 0 {
            self.tokens -= 1;
            true
        } else {
            false
        }
    }

    /// Whether a check at `now` would top the bucket up completely and reset
    /// its refill clock, making it indistinguishable from a freshly created one.
    fn would_be_full(&self, now: Instant, refill_interval: Duration) -> bool {
        let intervals = self.whole_intervals(now, refill_interval);
        intervals > 0 && self.tokens.saturating_add(intervals) >= self.capacity
    }
}

type Shard = Mutex<HashMap<String, TokenBucket>>;

/// Thread-safe collection of per-client token buckets.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use edge_layer::TokenBucketLimiter;
///
/// let limiter = TokenBucketLimiter::new(2, Duration::from_secs(1)).unwrap();
/// assert!(limiter.allow("203.0.113.7"));
/// assert!(limiter.allow("203.0.113.7"));
/// assert!(!limiter.allow("203.0.113.7"));
/// assert!(limiter.allow("198.51.100.1"));
/// ```
#[derive(Debug)]
pub struct TokenBucketLimiter {
    shards: Box<[Shard]>,
    hasher: RandomState,
    capacity: u32,
    refill_interval: Duration,
}

impl TokenBucketLimiter {
    /// Create a limiter with [`DEFAULT_SHARDS`] lock shards.
    ///
    /// # Errors
    ///
    /// Returns an error if `capacity` or `refill_interval` is zero.
    pub fn new(capacity: u32, refill_interval: Duration) -> Result<Self, RateLimitError> {
        Self::with_shards(capacity, refill_interval, DEFAULT_SHARDS)
    }

    /// Create a limiter with an explicit shard count.
    ///
    /// A single shard degrades to one global mutex.
    pub fn with_shards(
        capacity: u32,
        refill_interval: Duration,
        shards: usize,
    ) -> Result<Self, RateLimitError> {
        if capacity == 0 {
            return Err(RateLimitError::ZeroCapacity);
        }
        if refill_interval.is_zero() {
            return Err(RateLimitError::ZeroRefillInterval);
        }
        if shards == 0 {
            return Err(RateLimitError::ZeroShards);
        }

        Ok(Self {
            shards: (0..shards).map(|_| Mutex::new(HashMap::new())).collect(),
            hasher: RandomState::new(),
            capacity,
            refill_interval,
        })
    }

    /// Bucket capacity (burst size).
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Time needed to earn one token.
    pub fn refill_interval(&self) -> Duration {
        self.refill_interval
    }

    /// Admit or reject one request from `client_id`.
    pub fn allow(&self, client_id: &str) -> bool {
        self.allow_at(client_id, Instant::now())
    }

    /// Same as [`allow`](Self::allow) with an explicit clock reading.
    ///
    /// `now` readings for one client are expected to be non-decreasing;
    /// an earlier reading simply credits no tokens.
    pub fn allow_at(&self, client_id: &str, now: Instant) -> bool {
        let mut buckets = mutex_lock(self.shard_for(client_id), "limiter.allow");

        if let Some(bucket) = buckets.get_mut(client_id) {
            return self.check(client_id, bucket, now);
        }

        let mut bucket = TokenBucket::full(self.capacity, now);
        let admitted = self.check(client_id, &mut bucket, now);
        buckets.insert(client_id.to_owned(), bucket);
        admitted
    }

    fn check(&self, client_id: &str, bucket: &mut TokenBucket, now: Instant) -> bool {
        bucket.refill(now, self.refill_interval);
        let admitted = bucket.try_take();

        trace!(
            client_id,
            admitted,
            remaining = bucket.tokens,
            "Token bucket checked"
        );

        admitted
    }

    /// Snapshot of the bucket for `client_id`, if one exists.
    pub fn bucket(&self, client_id: &str) -> Option<TokenBucket> {
        mutex_lock(self.shard_for(client_id), "limiter.bucket")
            .get(client_id)
            .copied()
    }

    /// Number of tracked clients across all shards.
    pub fn bucket_count(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| mutex_lock(shard, "limiter.bucket_count").len())
            .sum()
    }

    /// Drop buckets that would be completely refilled on their next check.
    ///
    /// Such a bucket behaves exactly like the one that would be created on
    /// demand, so purging never changes an admission decision. Returns the
    /// number of buckets removed.
    pub fn purge_refilled(&self) -> usize {
        self.purge_refilled_at(Instant::now())
    }

    fn purge_refilled_at(&self, now: Instant) -> usize {
        let interval = self.refill_interval;
        self.shards
            .iter()
            .map(|shard| {
                let mut buckets = mutex_lock(shard, "limiter.purge_refilled");
                let before = buckets.len();
                buckets.retain(|_, bucket| !bucket.would_be_full(now, interval));
                before - buckets.len()
            })
            .sum()
    }

    #[allow(clippy::indexing_slicing)]
    fn shard_for(&self, client_id: &str) -> &Shard {
        // Reduced modulo the shard count, which is non-zero by construction
        let index = (self.hasher.hash_one(client_id) % self.shards.len() as u64) as usize;
        &self.shards[index]
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::thread;

    use super::*;

    #[test]
    fn test_zero_capacity_rejected() {
        let result = TokenBucketLimiter::new(0, Duration::from_secs(1));
        assert!(matches!(result, Err(RateLimitError::ZeroCapacity)));
    }

    #[test]
    fn test_zero_refill_interval_rejected() {
        let result = TokenBucketLimiter::new(10, Duration::ZERO);
        assert!(matches!(result, Err(RateLimitError::ZeroRefillInterval)));
    }

    #[test]
    fn test_zero_shards_rejected() {
        let result = TokenBucketLimiter::with_shards(10, Duration::from_secs(1), 0);
        assert!(matches!(result, Err(RateLimitError::ZeroShards)));
    }

    #[test]
    fn test_burst_then_reject_per_client() {
        let limiter = TokenBucketLimiter::new(2, Duration::from_secs(1)).unwrap();
        let now = Instant::now();

        assert!(limiter.allow_at("client-a", now));
        assert!(limiter.allow_at("client-a", now));
        assert!(!limiter.allow_at("client-a", now));

        // Other clients have their own bucket
        assert!(limiter.allow_at("client-b", now));
    }

    #[test]
    fn test_refill_after_interval_with_real_clock() {
        let limiter = TokenBucketLimiter::new(1, Duration::from_millis(100)).unwrap();

        assert!(limiter.allow("client"));
        assert!(!limiter.allow("client"));

        thread::sleep(Duration::from_millis(100));

        assert!(limiter.allow("client"));
    }

    #[test]
    fn test_refill_is_capped_at_capacity() {
        let limiter = TokenBucketLimiter::new(3, Duration::from_millis(10)).unwrap();
        let start = Instant::now();

        for _ in 0..3 {
            assert!(limiter.allow_at("client", start));
        }
        assert!(!limiter.allow_at("client", start));

        // Far more intervals than capacity elapse
        let later = start + Duration::from_secs(10);
        assert!(limiter.allow_at("client", later));
        assert_eq!(limiter.bucket("client").unwrap().tokens(), 2);
    }

    #[test]
    fn test_partial_interval_progress_is_preserved() {
        let limiter = TokenBucketLimiter::new(1, Duration::from_millis(100)).unwrap();
        let start = Instant::now();

        assert!(limiter.allow_at("client", start));
        // 60ms: no whole interval yet, refill clock stays at `start`
        assert!(!limiter.allow_at("client", start + Duration::from_millis(60)));
        // 100ms after `start` the token is earned even though the last
        // check was only 40ms ago
        assert!(limiter.allow_at("client", start + Duration::from_millis(100)));
    }

    #[test]
    fn test_fractional_progress_dropped_after_refill() {
        let limiter = TokenBucketLimiter::new(2, Duration::from_millis(100)).unwrap();
        let start = Instant::now();

        assert!(limiter.allow_at("client", start));
        assert!(limiter.allow_at("client", start));

        // 150ms: one token credited, refill clock moves to 150ms
        let t1 = start + Duration::from_millis(150);
        assert!(limiter.allow_at("client", t1));
        // 220ms is only 70ms after the refill, the 50ms remainder was dropped
        assert!(!limiter.allow_at("client", start + Duration::from_millis(220)));
        assert!(limiter.allow_at("client", t1 + Duration::from_millis(100)));
    }

    #[test]
    fn test_rejection_does_not_consume() {
        let limiter = TokenBucketLimiter::new(1, Duration::from_secs(1)).unwrap();
        let now = Instant::now();

        assert!(limiter.allow_at("client", now));
        for _ in 0..5 {
            assert!(!limiter.allow_at("client", now));
        }
        assert_eq!(limiter.bucket("client").unwrap().tokens(), 0);
        assert!(limiter.allow_at("client", now + Duration::from_secs(1)));
    }

    #[test]
    fn test_clock_going_backwards_credits_nothing() {
        let limiter = TokenBucketLimiter::new(1, Duration::from_millis(10)).unwrap();
        let later = Instant::now() + Duration::from_secs(1);

        assert!(limiter.allow_at("client", later));
        assert!(!limiter.allow_at("client", later - Duration::from_millis(500)));
    }

    #[test]
    fn test_bucket_count_tracks_distinct_clients() {
        let limiter = TokenBucketLimiter::new(5, Duration::from_secs(1)).unwrap();
        let now = Instant::now();

        for i in 0..50 {
            limiter.allow_at(&format!("10.0.0.{i}"), now);
        }
        limiter.allow_at("10.0.0.1", now);

        assert_eq!(limiter.bucket_count(), 50);
    }

    #[test]
    fn test_purge_refilled_only_drops_full_buckets() {
        let limiter = TokenBucketLimiter::new(2, Duration::from_secs(1)).unwrap();
        let now = Instant::now();

        limiter.allow_at("drained", now);
        limiter.allow_at("drained", now);
        limiter.allow_at("half", now);

        // Nothing has refilled yet
        assert_eq!(limiter.purge_refilled_at(now), 0);

        // One interval later "half" is full again, "drained" is not
        assert_eq!(limiter.purge_refilled_at(now + Duration::from_secs(1)), 1);
        assert!(limiter.bucket("half").is_none());
        assert!(limiter.bucket("drained").is_some());

        assert_eq!(limiter.purge_refilled_at(now + Duration::from_secs(2)), 1);
        assert_eq!(limiter.bucket_count(), 0);
    }

    #[test]
    fn test_purge_does_not_change_decisions() {
        let limiter = TokenBucketLimiter::new(1, Duration::from_secs(1)).unwrap();
        let now = Instant::now();

        assert!(limiter.allow_at("client", now));
        limiter.purge_refilled_at(now);
        // Still drained: the purge must not have handed out a fresh bucket
        assert!(!limiter.allow_at("client", now));
    }

    #[test]
    fn test_single_shard_behaves_identically() {
        let limiter = TokenBucketLimiter::with_shards(2, Duration::from_secs(1), 1).unwrap();
        let now = Instant::now();

        assert!(limiter.allow_at("a", now));
        assert!(limiter.allow_at("b", now));
        assert!(limiter.allow_at("a", now));
        assert!(!limiter.allow_at("a", now));
    }

    #[test]
    fn test_concurrent_requests_never_over_admit() {
        let limiter = Arc::new(TokenBucketLimiter::new(100, Duration::from_secs(3600)).unwrap());
        let admitted = Arc::new(AtomicU32::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                let admitted = Arc::clone(&admitted);
                thread::spawn(move || {
                    for _ in 0..50 {
                        if limiter.allow("shared-client") {
                            admitted.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        // 400 attempts against a capacity of 100 with no refill in sight
        assert_eq!(admitted.load(Ordering::SeqCst), 100);
    }
}
