//! Periodic refresh of a single key.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use adminsync_core::{QueryKey, SyncResult};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::freshness::QueryPolicy;
use crate::query_cache::QueryCache;

/// Keeps a key refreshing while alive. Dropping it stops the polling; a fetch
/// already started still completes and updates the cache.
#[derive(Debug)]
pub struct PollHandle {
    key: QueryKey,
    task: JoinHandle<()>,
}

impl PollHandle {
    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.task.abort();
        tracing::debug!(key = %self.key, "Stopped polling");
    }
}

impl QueryCache {
    /// Refetch `key` every `period`, starting one period from now.
    ///
    /// Each tick joins a fetch already in flight instead of starting a second
    /// one. Failures are logged and leave the previous entry in place.
    pub fn poll<T, F, Fut>(
        &self,
        key: QueryKey,
        policy: QueryPolicy,
        period: Duration,
        fetcher: F,
    ) -> PollHandle
    where
        T: Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = SyncResult<T>> + Send + 'static,
    {
        let cache = self.clone();
        let fetcher = Arc::new(fetcher);
        let task_key = key.clone();

        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;
                let fetcher = Arc::clone(&fetcher);
                let result = cache
                    .refetch(&task_key, &policy, move || fetcher())
                    .await;
                if let Err(err) = result {
                    tracing::warn!(key = %task_key, error = %err, "Poll refresh failed");
                }
            }
        });

        tracing::debug!(key = %key, period_ms = period.as_millis() as u64, "Started polling");
        PollHandle { key, task }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adminsync_core::SyncError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter_fetcher(
        calls: &Arc<AtomicUsize>,
    ) -> impl Fn() -> std::future::Ready<SyncResult<usize>> + Send + Sync + 'static {
        let calls = Arc::clone(calls);
        move || std::future::ready(Ok(calls.fetch_add(1, Ordering::SeqCst) + 1))
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_refreshes_until_dropped() {
        let cache = QueryCache::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let key = QueryKey::new("jobStats");

        let handle = cache.poll(
            key.clone(),
            QueryPolicy::minutes(1, 5),
            Duration::from_secs(10),
            counter_fetcher(&calls),
        );
        assert!(handle.is_active());

        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(*cache.peek::<usize>(&key).unwrap().into_value(), 3);

        drop(handle);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_failure_keeps_entry() {
        let cache = QueryCache::default();
        let key = QueryKey::new("chatbotStats");
        let policy = QueryPolicy::minutes(3, 10).with_retry(crate::RetryPolicy::none());
        cache.set(&key, &policy, 1usize);

        let _handle = cache.poll(key.clone(), policy, Duration::from_secs(30), || {
            std::future::ready(Err::<usize, _>(SyncError::network("timeout")))
        });

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(*cache.peek::<usize>(&key).unwrap().into_value(), 1);
        assert_eq!(cache.stats().failures, 1);
    }
}
