//! Per-client token bucket rate limiting.
//!
//! Guards the HTTP endpoints against bursts from a single address,
//! independently of the per-user daily quota. Each client key (normally the
//! remote IP) gets its own bucket.
//!
//! # Token Bucket Algorithm
//!
//! 1. Tokens are added at a constant rate (`requests_per_minute`)
//! 2. The bucket holds at most `burst_size` tokens
//! 3. Each request consumes one token
//! 4. With no token available the request is rejected
//!
//! # Examples
//!
//! ```rust
//! use textval_gate::security::{KeyedRateLimiter, RateLimitConfig};
//!
//! # async fn example() -> textval_gate::Result<()> {
//! let limiter = KeyedRateLimiter::new(RateLimitConfig::per_minute(5));
//!
//! limiter.acquire("203.0.113.7").await?;
//! # Ok(())
//! # }
//! ```

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use serde::Deserialize;
use tokio::{sync::Mutex, time::Instant};
use tracing::{debug, instrument, warn};

use crate::error::{GateError, Result};

/// Fixed-point scale for fractional tokens.
const SCALE: u64 = 1000;

/// Buckets idle this long are dropped when the table is pruned.
const IDLE_EVICTION: Duration = Duration::from_secs(600);

/// Table size above which idle buckets are pruned.
const PRUNE_THRESHOLD: usize = 4096;

/// Rate and burst capacity of one bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RateLimitConfig {
    /// Sustained requests per minute; the refill rate.
    pub requests_per_minute: u32,
    /// Maximum tokens held; defaults to `requests_per_minute`.
    #[serde(default)]
    pub burst_size: Option<u32>,
}

impl RateLimitConfig {
    /// `n` requests per minute with a burst of `n`.
    #[must_use]
    pub fn per_minute(n: u32) -> Self {
        Self { requests_per_minute: n, burst_size: None }
    }

    fn burst(&self) -> u32 {
        self.burst_size.unwrap_or(self.requests_per_minute).max(1)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::per_minute(60)
    }
}

/// Single token bucket.
///
/// Tokens are fixed-point integers (multiplied by 1000) so that slow
/// refill rates accumulate fractional tokens between calls.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    tokens: AtomicU64,
    last_update: Mutex<Instant>,
}

impl RateLimiter {
    /// Creates a bucket that starts full.
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            tokens: AtomicU64::new(u64::from(config.burst()) * SCALE),
            last_update: Mutex::new(Instant::now()),
        }
    }

    /// Takes one token if available.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::RateLimited`] if the bucket is empty.
    #[instrument(skip(self), level = "debug")]
    pub async fn acquire(&self) -> Result<()> {
        self.refill().await;

        let taken = self.tokens.fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
            current.checked_sub(SCALE)
        });

        match taken {
            Ok(before) => {
                debug!(tokens_remaining = (before - SCALE) / SCALE, "Token acquired");
                Ok(())
            }
            Err(current) => {
                warn!(tokens_available = current / SCALE, "Rate limit exceeded");
                Err(GateError::RateLimited)
            }
        }
    }

    /// Whole tokens currently available, without refilling.
    #[must_use]
    pub fn available(&self) -> u64 {
        self.tokens.load(Ordering::Acquire) / SCALE
    }

    async fn refill(&self) {
        let mut last_update = self.last_update.lock().await;
        let now = Instant::now();
        let elapsed = now.duration_since(*last_update);

        #[allow(
            clippy::cast_possible_truncation,
            clippy::cast_precision_loss,
            clippy::cast_sign_loss,
            reason = "elapsed time is non-negative and the result is capped at burst size"
        )]
        let tokens_to_add = (elapsed.as_secs_f64() / 60.0
            * f64::from(self.config.requests_per_minute)
            * SCALE as f64) as u64;

        if tokens_to_add > 0 {
            let max_tokens = u64::from(self.config.burst()) * SCALE;
            let _ = self.tokens.fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some(current.saturating_add(tokens_to_add).min(max_tokens))
            });
            *last_update = now;
        }
    }

    async fn idle_for(&self, now: Instant) -> Duration {
        now.duration_since(*self.last_update.lock().await)
    }
}

/// A table of buckets keyed by client identity.
#[derive(Debug)]
pub struct KeyedRateLimiter {
    config: RateLimitConfig,
    buckets: Mutex<HashMap<String, Arc<RateLimiter>>>,
}

impl KeyedRateLimiter {
    /// Creates an empty table; buckets are created on first use.
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self { config, buckets: Mutex::new(HashMap::new()) }
    }

    /// Takes one token from `key`'s bucket.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::RateLimited`] if that bucket is empty.
    pub async fn acquire(&self, key: &str) -> Result<()> {
        let bucket = {
            let mut buckets = self.buckets.lock().await;
            if buckets.len() >= PRUNE_THRESHOLD {
                Self::prune(&mut buckets).await;
            }
            Arc::clone(
                buckets
                    .entry(key.to_owned())
                    .or_insert_with(|| Arc::new(RateLimiter::new(self.config))),
            )
        };
        bucket.acquire().await
    }

    /// Number of tracked clients.
    pub async fn tracked(&self) -> usize {
        self.buckets.lock().await.len()
    }

    async fn prune(buckets: &mut HashMap<String, Arc<RateLimiter>>) {
        let now = Instant::now();
        let mut idle = Vec::new();
        for (key, bucket) in buckets.iter() {
            if bucket.idle_for(now).await >= IDLE_EVICTION {
                idle.push(key.clone());
            }
        }
        for key in &idle {
            buckets.remove(key);
        }
        debug!(evicted = idle.len(), remaining = buckets.len(), "Pruned idle rate limit buckets");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_rate_limiter_allows_requests_within_limit() {
        let limiter = RateLimiter::new(RateLimitConfig::per_minute(5));
        for _ in 0..5 {
            assert!(limiter.acquire().await.is_ok());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limiter_rejects_excess_requests() {
        let limiter = RateLimiter::new(RateLimitConfig::per_minute(5));
        for _ in 0..5 {
            limiter.acquire().await.unwrap();
        }
        assert!(matches!(limiter.acquire().await, Err(GateError::RateLimited)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limiter_refills_over_time() {
        let limiter = RateLimiter::new(RateLimitConfig::per_minute(5));
        for _ in 0..5 {
            limiter.acquire().await.unwrap();
        }

        // One token every 12 seconds at 5/minute.
        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(limiter.acquire().await.is_err());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(limiter.acquire().await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limiter_caps_at_burst_size() {
        let config = RateLimitConfig { requests_per_minute: 60, burst_size: Some(3) };
        let limiter = RateLimiter::new(config);

        tokio::time::advance(Duration::from_secs(3600)).await;
        limiter.acquire().await.unwrap();
        assert_eq!(limiter.available(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keyed_limiter_isolates_clients() {
        let limiter = KeyedRateLimiter::new(RateLimitConfig::per_minute(2));

        limiter.acquire("198.51.100.1").await.unwrap();
        limiter.acquire("198.51.100.1").await.unwrap();
        assert!(limiter.acquire("198.51.100.1").await.is_err());

        assert!(limiter.acquire("198.51.100.2").await.is_ok());
        assert_eq!(limiter.tracked().await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keyed_limiter_prunes_idle_buckets() {
        let limiter = KeyedRateLimiter::new(RateLimitConfig::per_minute(1));
        for i in 0..PRUNE_THRESHOLD {
            limiter.acquire(&format!("10.0.{}.{}", i / 256, i % 256)).await.unwrap();
        }
        assert_eq!(limiter.tracked().await, PRUNE_THRESHOLD);

        tokio::time::advance(IDLE_EVICTION).await;
        limiter.acquire("192.0.2.1").await.unwrap();
        assert_eq!(limiter.tracked().await, 1);
    }

    #[test]
    fn test_config_from_toml() {
        let config: RateLimitConfig = toml::from_str("requests_per_minute = 50").unwrap();
        assert_eq!(config, RateLimitConfig::per_minute(50));
        assert_eq!(config.burst(), 50);
    }
}
