//! Background eviction sweep.
//!
//! Reads already refuse to serve expired entries; the sweeper releases the
//! memory of keys nobody reads anymore.

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::query_cache::QueryCache;

impl QueryCache {
    /// Spawn a task that calls [`QueryCache::sweep`] every
    /// `config().sweep_interval` until `shutdown` turns true or its sender is
    /// dropped. The task resolves to the total number of evicted entries.
    pub fn spawn_sweeper(&self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<u64> {
        let cache = self.clone();
        let period = self.config().sweep_interval;

        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut total = 0u64;

            tracing::info!(sweep_interval_ms = period.as_millis() as u64, "Cache sweeper started");

            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        let evicted = cache.sweep();
                        total += evicted as u64;
                        if evicted > 0 {
                            tracing::debug!(evicted, remaining = cache.len(), "Cache sweep completed");
                        } else {
                            tracing::trace!("Cache sweep found nothing to evict");
                        }
                    }
                }
            }

            tracing::info!(total_evicted = total, "Cache sweeper stopped");
            total
        })
    }
}
