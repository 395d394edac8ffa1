//! Sliding-window log rate limiter.

use dashmap::DashMap;
use tracing::{debug, trace};

use super::bucket::Bucket;
use crate::error::{Result, SlidegateError};

/// Default admission threshold per window.
const DEFAULT_MAX_REQUESTS: u32 = 90;
/// Default window length in milliseconds.
const DEFAULT_WINDOW_MS: u64 = 60_000;

/// Configuration for a [`SlidingWindowLimiter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimiterConfig {
    /// Trailing window length in milliseconds
    pub window_ms: u64,
    /// Maximum admitted requests per key within the window
    pub max_requests: u32,
    /// When false every request is admitted without metadata
    pub enabled: bool,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            window_ms: DEFAULT_WINDOW_MS,
            max_requests: DEFAULT_MAX_REQUESTS,
            enabled: true,
        }
    }
}

impl LimiterConfig {
    /// Check that the window and threshold are usable.
    pub fn validate(&self) -> Result<()> {
        if self.window_ms == 0 || self.window_ms > i64::MAX as u64 {
            return Err(SlidegateError::Config(format!(
                "window_ms must be a positive number of milliseconds, got {}",
                self.window_ms
            )));
        }
        if self.max_requests == 0 {
            return Err(SlidegateError::Config(
                "max_requests must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Rate-limit metadata reported back to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitInfo {
    /// The configured threshold
    pub limit: u32,
    /// Requests still admissible in the current window
    pub remaining: u32,
    /// Seconds until the oldest counted request leaves the window
    pub reset_secs: u64,
}

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Limiting is disabled; admit and attach nothing.
    Unlimited,
    /// Admitted and recorded.
    Allowed(RateLimitInfo),
    /// Over the limit; nothing was recorded.
    Denied(RateLimitInfo),
}

impl Decision {
    /// Whether the request may proceed.
    pub fn is_allowed(&self) -> bool {
        !matches!(self, Decision::Denied(_))
    }

    /// Metadata to attach to the response, if any.
    pub fn info(&self) -> Option<&RateLimitInfo> {
        match self {
            Decision::Unlimited => None,
            Decision::Allowed(info) | Decision::Denied(info) => Some(info),
        }
    }
}

/// Per-key sliding-window log limiter.
///
/// Each key keeps the timestamps of its admitted requests. A request is
/// admitted when fewer than `max_requests` of them fall inside the trailing
/// window, so no key ever has more than `max_requests` admissions in any
/// window-sized interval.
///
/// This struct is thread-safe and can be shared across tasks. Each bucket is
/// only touched under its map shard's lock.
#[derive(Debug)]
pub struct SlidingWindowLimiter {
    /// Timestamp logs indexed by client key. Never holds an empty bucket
    /// between calls.
    buckets: DashMap<String, Bucket>,
    config: LimiterConfig,
    window_ms: i64,
}

impl SlidingWindowLimiter {
    /// Create a limiter, rejecting a zero window or threshold.
    pub fn new(config: LimiterConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            buckets: DashMap::new(),
            window_ms: config.window_ms as i64,
            config,
        })
    }

    /// Decide whether the request from `key` arriving at `now` (epoch
    /// milliseconds) is admitted, recording it if so.
    pub fn admit(&self, key: &str, now: i64) -> Decision {
        if !self.config.enabled {
            return Decision::Unlimited;
        }

        let limit = self.config.max_requests;

        let mut bucket = self.buckets.entry(key.to_owned()).or_default();

        let pruned = bucket.prune(now, self.window_ms);
        let reset_secs = reset_secs(self.window_ms, now, bucket.oldest().unwrap_or(now));
        let count = bucket.len();

        if count >= limit as usize {
            drop(bucket);
            debug!(
                key = %key,
                count = count,
                limit = limit,
                reset_secs = reset_secs,
                "Rate limit exceeded"
            );
            return Decision::Denied(RateLimitInfo {
                limit,
                remaining: 0,
                reset_secs,
            });
        }

        bucket.record(now);
        let remaining = (limit as usize).saturating_sub(bucket.len()) as u32;
        drop(bucket);

        trace!(
            key = %key,
            pruned = pruned,
            remaining = remaining,
            "Request admitted"
        );

        Decision::Allowed(RateLimitInfo {
            limit,
            remaining,
            reset_secs,
        })
    }

    /// Prune every bucket against `now` and drop the ones left empty.
    pub fn sweep(&self, now: i64) {
        let window_ms = self.window_ms;
        let mut pruned = 0usize;
        let mut evicted = 0usize;

        self.buckets.retain(|_, bucket| {
            pruned += bucket.prune(now, window_ms);
            let keep = !bucket.is_empty();
            if !keep {
                evicted += 1;
            }
            keep
        });

        debug!(
            pruned = pruned,
            evicted = evicted,
            remaining_keys = self.buckets.len(),
            "Swept rate limit buckets"
        );
    }

    /// Number of recorded timestamps for `key`.
    ///
    /// Returns `None` if the key is not tracked.
    pub fn request_count(&self, key: &str) -> Option<usize> {
        self.buckets.get(key).map(|bucket| bucket.len())
    }

    /// Number of tracked keys.
    pub fn key_count(&self) -> usize {
        self.buckets.len()
    }

    /// Forget all tracked keys.
    pub fn clear(&self) {
        self.buckets.clear();
    }

    /// The configuration this limiter was built with.
    pub fn config(&self) -> &LimiterConfig {
        &self.config
    }
}

/// Whole seconds until the request at `oldest` leaves the window, rounded up.
fn reset_secs(window_ms: i64, now: i64, oldest: i64) -> u64 {
    let remaining_ms = window_ms.saturating_sub(now.saturating_sub(oldest)).max(0);
    (remaining_ms as u64).div_ceil(1000)
}
