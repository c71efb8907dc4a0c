//! Freshness contracts for cache reads.
//!
//! Every read names its [`QueryPolicy`]: how long a payload counts as fresh,
//! how long a stale payload may still be served, and how failed fetches are
//! retried. Reads return [`CacheRead`], which says where the value came from.

use std::time::Duration;
use tokio::time::Instant;

/// Retry schedule for failed fetches.
///
/// Attempt `n` (zero-based) waits `base_delay * 2^n`, capped at `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Additional attempts after the first failure.
    pub attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
        }
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            attempts,
            base_delay,
            max_delay,
        }
    }

    /// Never retry.
    pub fn none() -> Self {
        Self {
            attempts: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (zero-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Freshness and retention windows for one family of keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryPolicy {
    /// Age up to which a payload is served without refetching.
    pub fresh_for: Duration,
    /// Age after which a payload is never served.
    pub evict_after: Duration,
    pub retry: RetryPolicy,
}

impl QueryPolicy {
    pub fn new(fresh_for: Duration, evict_after: Duration) -> Self {
        Self {
            fresh_for,
            evict_after,
            retry: RetryPolicy::default(),
        }
    }

    /// Policy expressed in whole minutes, the unit the dashboard uses.
    pub fn minutes(fresh_for: u64, evict_after: u64) -> Self {
        Self::new(
            Duration::from_secs(fresh_for * 60),
            Duration::from_secs(evict_after * 60),
        )
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Where a read's value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadSource {
    /// Cached and within `fresh_for`.
    Fresh,
    /// Cached, past `fresh_for`; a background refetch was started or joined.
    Stale,
    /// Fetched by this read (or a concurrent one it joined).
    Fetched,
}

/// Result of a cache read, carrying staleness metadata.
#[derive(Debug, Clone)]
pub struct CacheRead<T> {
    value: T,
    fetched_at: Instant,
    source: ReadSource,
}

impl<T> CacheRead<T> {
    pub fn new(value: T, fetched_at: Instant, source: ReadSource) -> Self {
        Self {
            value,
            fetched_at,
            source,
        }
    }

    pub fn into_value(self) -> T {
        self.value
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn source(&self) -> ReadSource {
        self.source
    }

    pub fn fetched_at(&self) -> Instant {
        self.fetched_at
    }

    /// Age of the payload at the time of the call.
    pub fn staleness(&self) -> Duration {
        Instant::now().saturating_duration_since(self.fetched_at)
    }

    /// True when the value was served from the cache.
    pub fn was_cache_hit(&self) -> bool {
        !matches!(self.source, ReadSource::Fetched)
    }

    pub fn is_stale(&self) -> bool {
        matches!(self.source, ReadSource::Stale)
    }

    pub fn map<U, F>(self, f: F) -> CacheRead<U>
    where
        F: FnOnce(T) -> U,
    {
        CacheRead {
            value: f(self.value),
            fetched_at: self.fetched_at,
            source: self.source,
        }
    }
}

impl<T> AsRef<T> for CacheRead<T> {
    fn as_ref(&self) -> &T {
        &self.value
    }
}
