//! Rate limiting for inbound webhook traffic.
//!
//! One token bucket per client key:
//! - Capacity equals the per-minute limit
//! - Tokens refill continuously over a minute
//! - Idle buckets are pruned once the table grows large

use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::{RelayError, RelayResult};

const PRUNE_THRESHOLD: usize = 10_000;
const IDLE_BUCKET_TTL: Duration = Duration::from_secs(300);

/// Per-client token bucket limiter.
pub struct InboundRateLimiter {
    buckets: Mutex<HashMap<String, TokenBucket>>,
    limit_per_minute: u32,
}

/// Token bucket for one client.
#[derive(Debug, Clone)]
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

/// Snapshot of a client's bucket.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitInfo {
    /// Bucket capacity.
    pub capacity: u32,
    /// Whole tokens currently available.
    pub available_tokens: u32,
}

impl InboundRateLimiter {
    /// Creates a limiter allowing `limit_per_minute` requests per client.
    pub fn per_minute(limit_per_minute: u32) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            limit_per_minute: limit_per_minute.max(1),
        }
    }

    /// Consumes one token for `client_key`.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::RateLimited` with the wait until the next token
    /// when the bucket is empty.
    pub async fn acquire(&self, client_key: &str) -> RelayResult<()> {
        let now = Instant::now();
        let capacity = f64::from(self.limit_per_minute);
        let mut buckets = self.buckets.lock().await;

        if buckets.len() >= PRUNE_THRESHOLD {
            buckets.retain(|_, b| now.duration_since(b.last_refill) < IDLE_BUCKET_TTL);
        }

        let bucket = buckets
            .entry(client_key.to_string())
            .or_insert_with(|| TokenBucket {
                tokens: capacity,
                last_refill: now,
            });
        bucket.refill(now, self.refill_per_sec(), capacity);

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            return Ok(());
        }

        let missing = 1.0 - bucket.tokens;
        let retry_after = Duration::from_secs_f64(missing / self.refill_per_sec());
        Err(RelayError::RateLimited {
            retry_after_secs: (retry_after.as_secs_f64().ceil() as u64).max(1),
        })
    }

    /// Current state of a client's bucket.
    pub async fn info(&self, client_key: &str) -> RateLimitInfo {
        let capacity = f64::from(self.limit_per_minute);
        let mut buckets = self.buckets.lock().await;
        let available = match buckets.get_mut(client_key) {
            Some(bucket) => {
                bucket.refill(Instant::now(), self.refill_per_sec(), capacity);
                bucket.tokens
            }
            None => capacity,
        };

        RateLimitInfo {
            capacity: self.limit_per_minute,
            available_tokens: available.floor() as u32,
        }
    }

    fn refill_per_sec(&self) -> f64 {
        f64::from(self.limit_per_minute) / 60.0
    }
}

impl TokenBucket {
    fn refill(&mut self, now: Instant, per_sec: f64, capacity: f64) {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * per_sec).min(capacity);
        self.last_refill = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_allows_up_to_capacity() {
        let limiter = InboundRateLimiter::per_minute(3);

        for _ in 0..3 {
            assert!(limiter.acquire("10.0.0.1").await.is_ok());
        }

        let err = limiter.acquire("10.0.0.1").await.unwrap_err();
        assert!(matches!(err, RelayError::RateLimited { retry_after_secs } if retry_after_secs >= 1));
    }

    #[tokio::test]
    async fn test_retry_after_rounds_up() {
        let limiter = InboundRateLimiter::per_minute(1);
        limiter.acquire("10.0.0.1").await.unwrap();

        // Just under a minute until the next token.
        let err = limiter.acquire("10.0.0.1").await.unwrap_err();
        assert!(matches!(err, RelayError::RateLimited { retry_after_secs: 60 }));
    }

    #[tokio::test]
    async fn test_clients_are_isolated() {
        let limiter = InboundRateLimiter::per_minute(1);

        assert!(limiter.acquire("10.0.0.1").await.is_ok());
        assert!(limiter.acquire("10.0.0.1").await.is_err());
        assert!(limiter.acquire("10.0.0.2").await.is_ok());
    }

    #[tokio::test]
    async fn test_info_reports_remaining_tokens() {
        let limiter = InboundRateLimiter::per_minute(1200);
        assert_eq!(limiter.info("client").await.available_tokens, 1200);

        limiter.acquire("client").await.unwrap();
        let info = limiter.info("client").await;
        assert_eq!(info.capacity, 1200);
        assert!(info.available_tokens < 1200);
    }
}
