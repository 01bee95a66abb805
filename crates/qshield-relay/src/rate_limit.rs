//! Per-user token-bucket rate limiting.
//!
//! Buckets are keyed by the authenticated user id, never the network
//! address, so NAT'd users cannot starve each other.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(capacity: f64) -> Self {
        Self {
            tokens: capacity,
            last_refill: Instant::now(),
        }
    }

    fn try_consume(&mut self, rate: f64, capacity: f64) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.last_refill = now;

        self.tokens = (self.tokens + elapsed * rate).min(capacity);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// A token-bucket limiter over authenticated user ids.
#[derive(Clone)]
pub struct RateLimiter {
    buckets: Arc<Mutex<HashMap<i64, TokenBucket>>>,
    rate: f64,
    capacity: f64,
}

impl RateLimiter {
    /// `rate` tokens per second, bursting up to `capacity`.
    pub fn new(rate: f64, capacity: f64) -> Self {
        Self {
            buckets: Arc::new(Mutex::new(HashMap::new())),
            rate,
            capacity,
        }
    }

    /// A limiter allowing `count` operations per `window_secs`.
    pub fn per_window(count: u32, window_secs: u64) -> Self {
        Self::new(count as f64 / window_secs as f64, count as f64)
    }

    /// Consume one token for the user. Returns false when over the limit.
    pub async fn check(&self, user_id: i64) -> bool {
        let mut buckets = self.buckets.lock().await;
        let bucket = buckets
            .entry(user_id)
            .or_insert_with(|| TokenBucket::new(self.capacity));
        bucket.try_consume(self.rate, self.capacity)
    }

    /// Seconds until one token becomes available, for Retry-After.
    pub fn retry_after_secs(&self) -> u64 {
        (1.0 / self.rate).ceil() as u64
    }

    /// Drop buckets idle longer than `max_idle_secs`.
    pub async fn purge_stale(&self, max_idle_secs: f64) {
        let mut buckets = self.buckets.lock().await;
        let now = Instant::now();
        buckets.retain(|_, bucket| {
            now.duration_since(bucket.last_refill).as_secs_f64() < max_idle_secs
        });
    }
}
