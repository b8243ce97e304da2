//! Request throttling for authentication entry points.
//!
//! [`RateLimiter`] is a fixed-window counter kept in the volatile [`Cache`]. The first hit of a
//! window creates the counter and arms its expiry; later hits only increment it, so the window
//! never slides. When the counter has reached the limit every call fails with
//! [`Error::LimitExceeded`] carrying the time left until the window closes.
//!
//! Bursts of up to `2 * max` across a window boundary are possible. That is the accepted price of
//! a fixed window.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::cache::{Cache, CacheError, KeyTtl};
use crate::errors::{Error, Result};

const KEY_PREFIX: &str = "ratelimit";

/// A limit of `max` attempts per `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimit {
    pub max: u64,
    #[serde(with = "humantime_serde")]
    pub window: Duration,
}

impl RateLimit {
    pub const fn new(max: u64, window: Duration) -> Self {
        Self { max, window }
    }
}

/// Fixed-window rate limiter over any [`Cache`].
#[derive(Clone)]
pub struct RateLimiter {
    cache: Arc<dyn Cache>,
}

impl RateLimiter {
    pub fn new(cache: Arc<dyn Cache>) -> Self {
        Self { cache }
    }

    fn cache_key(key: &str) -> String {
        format!("{KEY_PREFIX}:{key}")
    }

    /// Count a hit against `key`, failing once `max` hits have been counted in the current window.
    #[instrument(skip(self), err(level = "debug"))]
    pub async fn limit(&self, key: &str, max: u64, window: Duration) -> Result<()> {
        let cache_key = Self::cache_key(key);

        // Exhausted windows are rejected without touching the counter
        let hits = self.read_hits(&cache_key).await?;
        if hits >= max {
            return Err(self.exceeded(&cache_key, max).await?);
        }

        // The increment is the only atomic step; the decision is taken on its result so two
        // callers racing at the boundary cannot both get through.
        let count = self.cache.incr(&cache_key).await?;
        if count == 1 {
            self.cache.expire(&cache_key, window).await?;
        } else if self.cache.ttl(&cache_key).await? == KeyTtl::Persistent {
            // The expiry of the first hit was lost, re-arm so the key cannot lock out forever
            tracing::warn!(key, "rate limit counter had no expiry, re-arming window");
            self.cache.expire(&cache_key, window).await?;
        }

        if count as u64 > max {
            return Err(self.exceeded(&cache_key, max).await?);
        }

        Ok(())
    }

    /// Same as [`RateLimiter::limit`] taking a [`RateLimit`].
    pub async fn check(&self, key: &str, limit: RateLimit) -> Result<()> {
        self.limit(key, limit.max, limit.window).await
    }

    /// Time until `key` may be hit again: zero while under `max`, the window's remaining lifetime
    /// once the limit has been reached.
    pub async fn ttl(&self, key: &str, max: u64) -> Result<Duration> {
        let cache_key = Self::cache_key(key);
        if self.read_hits(&cache_key).await? < max {
            return Ok(Duration::ZERO);
        }
        Ok(self.cache.ttl(&cache_key).await?.remaining())
    }

    /// Hits counted in the current window.
    pub async fn hits(&self, key: &str) -> Result<u64> {
        self.read_hits(&Self::cache_key(key)).await
    }

    /// Clear the counter for `key`.
    #[instrument(skip(self), err)]
    pub async fn reset(&self, key: &str) -> Result<()> {
        self.cache.delete(&[Self::cache_key(key)]).await?;
        Ok(())
    }

    async fn read_hits(&self, cache_key: &str) -> Result<u64> {
        match self.cache.get(cache_key).await? {
            None => Ok(0),
            Some(raw) => raw.parse::<u64>().map_err(|e| {
                Error::Cache(CacheError::Corrupt {
                    key: cache_key.to_string(),
                    reason: format!("hit count is not an integer: {e}"),
                })
            }),
        }
    }

    async fn exceeded(&self, cache_key: &str, max: u64) -> Result<Error> {
        let ttl = self.cache.ttl(cache_key).await?.remaining();
        Ok(Error::LimitExceeded { ttl, limit: max })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;

    fn limiter() -> (RateLimiter, Arc<MemoryCache>) {
        let cache = Arc::new(MemoryCache::new());
        (RateLimiter::new(cache.clone()), cache)
    }

    #[tokio::test]
    async fn test_max_calls_pass_then_fail() {
        let (limiter, _) = limiter();
        let window = Duration::from_secs(60);

        for _ in 0..3 {
            limiter.limit("login:a@b.com", 3, window).await.unwrap();
        }

        let err = limiter.limit("login:a@b.com", 3, window).await.unwrap_err();
        match err {
            Error::LimitExceeded { ttl, limit } => {
                assert_eq!(limit, 3);
                assert!(ttl > Duration::ZERO && ttl <= window);
            }
            other => panic!("expected LimitExceeded, got {other:?}"),
        }

        // Rejected calls do not grow the counter
        assert_eq!(limiter.hits("login:a@b.com").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_window_elapses() {
        let (limiter, _) = limiter();
        let window = Duration::from_millis(80);

        limiter.limit("k", 1, window).await.unwrap();
        assert!(limiter.limit("k", 1, window).await.is_err());

        tokio::time::sleep(Duration::from_millis(120)).await;
        limiter.limit("k", 1, window).await.unwrap();
    }

    #[tokio::test]
    async fn test_later_hits_do_not_extend_window() {
        let (limiter, cache) = limiter();
        let window = Duration::from_millis(150);

        limiter.limit("k", 10, window).await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        limiter.limit("k", 10, window).await.unwrap();

        let remaining = cache.ttl("ratelimit:k").await.unwrap().remaining();
        assert!(remaining <= Duration::from_millis(95), "window was extended: {remaining:?}");
    }

    #[tokio::test]
    async fn test_ttl_zero_until_limit_reached() {
        let (limiter, _) = limiter();
        let window = Duration::from_secs(30);

        assert_eq!(limiter.ttl("k", 2).await.unwrap(), Duration::ZERO);
        limiter.limit("k", 2, window).await.unwrap();
        assert_eq!(limiter.ttl("k", 2).await.unwrap(), Duration::ZERO);
        limiter.limit("k", 2, window).await.unwrap();

        let ttl = limiter.ttl("k", 2).await.unwrap();
        assert!(ttl > Duration::ZERO && ttl <= window);
    }

    #[tokio::test]
    async fn test_reset_clears_counter() {
        let (limiter, _) = limiter();
        let window = Duration::from_secs(30);

        limiter.limit("k", 1, window).await.unwrap();
        assert!(limiter.limit("k", 1, window).await.is_err());

        limiter.reset("k").await.unwrap();
        limiter.limit("k", 1, window).await.unwrap();
    }

    #[tokio::test]
    async fn test_zero_max_always_fails() {
        let (limiter, _) = limiter();
        let err = limiter.limit("k", 0, Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, Error::LimitExceeded { limit: 0, .. }));
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let (limiter, _) = limiter();
        let window = Duration::from_secs(30);

        limiter.limit("login:a", 1, window).await.unwrap();
        limiter.limit("login:b", 1, window).await.unwrap();
        assert!(limiter.limit("login:a", 1, window).await.is_err());
    }

    #[tokio::test]
    async fn test_lost_expiry_is_rearmed() {
        let (limiter, cache) = limiter();

        // Counter left behind without an expiry
        cache.set("ratelimit:k", "1".to_string(), None).await.unwrap();
        limiter.limit("k", 5, Duration::from_secs(30)).await.unwrap();

        assert!(matches!(cache.ttl("ratelimit:k").await.unwrap(), KeyTtl::Remaining(_)));
    }

    #[tokio::test]
    async fn test_concurrent_callers_respect_limit() {
        let (limiter, _) = limiter();
        let window = Duration::from_secs(30);

        let mut handles = Vec::new();
        for _ in 0..40 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move { limiter.limit("burst", 10, window).await.is_ok() }));
        }

        let mut passed = 0;
        for handle in handles {
            if handle.await.unwrap() {
                passed += 1;
            }
        }
        assert_eq!(passed, 10);
    }

    #[tokio::test]
    async fn test_check_with_rate_limit_value() {
        let (limiter, _) = limiter();
        let limit = RateLimit::new(1, Duration::from_secs(10));

        limiter.check("k", limit).await.unwrap();
        assert!(limiter.check("k", limit).await.is_err());
    }
}
