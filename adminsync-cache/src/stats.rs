//! Cache activity counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters updated by the cache as it serves reads.
#[derive(Debug, Default)]
pub struct CacheMetrics {
    pub hits: AtomicU64,
    pub stale_hits: AtomicU64,
    pub misses: AtomicU64,
    pub fetches: AtomicU64,
    pub failures: AtomicU64,
    pub evictions: AtomicU64,
    pub invalidations: AtomicU64,
}

impl CacheMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            stale_hits: self.stale_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            fetches: self.fetches.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of cache counters at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Reads served fresh from the cache.
    pub hits: u64,
    /// Reads served stale while a refetch ran.
    pub stale_hits: u64,
    /// Reads that had to wait for a fetch.
    pub misses: u64,
    /// Fetches started (each may include retries).
    pub fetches: u64,
    /// Fetches that failed after retries.
    pub failures: u64,
    /// Entries removed for exceeding their eviction window.
    pub evictions: u64,
    /// Entries removed by invalidation or clear.
    pub invalidations: u64,
}

impl CacheStats {
    /// Share of reads answered from the cache, stale or fresh (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let served = self.hits + self.stale_hits;
        let total = served + self.misses;
        if total == 0 {
            0.0
        } else {
            served as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate() {
        assert_eq!(CacheStats::default().hit_rate(), 0.0);

        let stats = CacheStats {
            hits: 2,
            stale_hits: 1,
            misses: 1,
            ..CacheStats::default()
        };
        assert!((stats.hit_rate() - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn test_snapshot_reflects_counters() {
        let metrics = CacheMetrics::new();
        CacheMetrics::incr(&metrics.fetches);
        CacheMetrics::add(&metrics.invalidations, 3);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.fetches, 1);
        assert_eq!(snapshot.invalidations, 3);
        assert_eq!(snapshot.hits, 0);
    }
}
