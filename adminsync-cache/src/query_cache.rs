//! Keyed query cache with stale-while-revalidate and single-flight fetches.
//!
//! All bookkeeping lives behind one `std::sync::Mutex` whose critical
//! sections never await, so the cache behaves like a single cooperative loop
//! even on a multi-threaded runtime.
//!
//! Fetches run as spawned tasks. A caller that stops awaiting a read does not
//! cancel the fetch; its result still lands in the cache. Each key has at most
//! one fetch in flight, and every concurrent reader of that key awaits the
//! same shared future.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use adminsync_core::{Change, QueryKey, SyncError, SyncResult};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use tokio::time::Instant;

use crate::freshness::{CacheRead, QueryPolicy, ReadSource};
use crate::retry::fetch_with_retry;
use crate::stats::{CacheMetrics, CacheStats};

/// Type-erased cached value. Each key is read back as the type it was
/// fetched as.
pub type Payload = Arc<dyn Any + Send + Sync>;

type SharedFetch = Shared<BoxFuture<'static, SyncResult<Payload>>>;

/// Configuration for the query cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// How often the background sweeper drops expired entries.
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }
}

// ============================================================================
// ENTRIES
// ============================================================================

struct CacheEntry {
    payload: Payload,
    fetched_at: Instant,
    fresh_for: Duration,
    evict_after: Duration,
    /// Stored by a fetch that was detached by invalidation. Never fresh.
    invalidated: bool,
}

impl CacheEntry {
    fn new(payload: Payload, policy: &QueryPolicy, fetched_at: Instant) -> Self {
        Self {
            payload,
            fetched_at,
            fresh_for: policy.fresh_for,
            evict_after: policy.evict_after,
            invalidated: false,
        }
    }

    fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.fetched_at)
    }

    fn is_fresh(&self, now: Instant) -> bool {
        !self.invalidated && self.age(now) <= self.fresh_for
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.age(now) > self.evict_after
    }

    fn source(&self, now: Instant) -> ReadSource {
        if self.is_fresh(now) {
            ReadSource::Fresh
        } else {
            ReadSource::Stale
        }
    }
}

struct InFlight {
    id: u64,
    fetch: SharedFetch,
}

#[derive(Default)]
struct Slot {
    entry: Option<CacheEntry>,
    in_flight: Option<InFlight>,
}

impl Slot {
    fn is_vacant(&self) -> bool {
        self.entry.is_none() && self.in_flight.is_none()
    }
}

#[derive(Default)]
struct State {
    slots: HashMap<QueryKey, Slot>,
    next_fetch_id: u64,
    /// Bumped by `clear`. Fetches started under an older generation store
    /// nothing.
    generation: u64,
}

struct Inner {
    state: Mutex<State>,
    metrics: CacheMetrics,
    config: CacheConfig,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record the outcome of fetch `id` for `key`.
    fn complete(
        &self,
        key: &QueryKey,
        id: u64,
        generation: u64,
        policy: &QueryPolicy,
        result: &SyncResult<Payload>,
    ) {
        let now = Instant::now();
        if result.is_err() {
            CacheMetrics::incr(&self.metrics.failures);
        }

        let mut state = self.lock();
        if state.generation != generation {
            tracing::debug!(key = %key, fetch_id = id, "Discarding fetch started before cache clear");
            return;
        }

        let slot = state.slots.entry(key.clone()).or_default();
        let attached = slot.in_flight.as_ref().is_some_and(|f| f.id == id);
        if attached {
            slot.in_flight = None;
        }

        match result {
            Ok(payload) if attached => {
                slot.entry = Some(CacheEntry::new(Arc::clone(payload), policy, now));
            }
            Ok(payload) if slot.is_vacant() => {
                let mut entry = CacheEntry::new(Arc::clone(payload), policy, now);
                entry.invalidated = true;
                slot.entry = Some(entry);
                tracing::debug!(key = %key, fetch_id = id, "Stored detached fetch result as stale");
            }
            Ok(_) => {
                tracing::debug!(key = %key, fetch_id = id, "Dropping detached fetch result; key has newer data");
            }
            Err(err) => {
                tracing::debug!(
                    key = %key,
                    fetch_id = id,
                    kept_entry = slot.entry.is_some(),
                    error = %err,
                    "Fetch failed; cache entry left unchanged"
                );
            }
        }

        if slot.is_vacant() {
            state.slots.remove(key);
        }
    }
}

enum Cached {
    Fresh(Payload, Instant),
    Stale(Payload, Instant),
    Absent,
}

// ============================================================================
// QUERY CACHE
// ============================================================================

/// Shared, cloneable handle to the query cache.
#[derive(Clone)]
pub struct QueryCache {
    inner: Arc<Inner>,
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl std::fmt::Debug for QueryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryCache")
            .field("entries", &self.len())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

impl QueryCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                metrics: CacheMetrics::new(),
                config,
            }),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Read `key`, fetching with `fetcher` when the cache cannot answer.
    ///
    /// - Fresh entry: returned, no fetch.
    /// - Stale entry: returned, and one background refetch is started (or the
    ///   running one is left alone).
    /// - No usable entry: awaits the key's single in-flight fetch, starting it
    ///   if needed. Errors reach every waiting caller unchanged.
    pub async fn read<T, F, Fut>(
        &self,
        key: &QueryKey,
        policy: &QueryPolicy,
        fetcher: F,
    ) -> SyncResult<CacheRead<Arc<T>>>
    where
        T: Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = SyncResult<T>> + Send + 'static,
    {
        let now = Instant::now();
        let (cached, pending) = {
            let mut state = self.inner.lock();
            let cached = self.lookup(&mut state, key, now);
            let pending = match cached {
                Cached::Fresh(..) => None,
                Cached::Stale(..) | Cached::Absent => {
                    Some(self.ensure_fetch(&mut state, key, policy, fetcher))
                }
            };
            (cached, pending)
        };

        match (cached, pending) {
            (Cached::Fresh(payload, fetched_at), _) => {
                CacheMetrics::incr(&self.inner.metrics.hits);
                tracing::trace!(key = %key, "Cache hit");
                Ok(CacheRead::new(downcast(key, payload)?, fetched_at, ReadSource::Fresh))
            }
            (Cached::Stale(payload, fetched_at), _) => {
                CacheMetrics::incr(&self.inner.metrics.stale_hits);
                tracing::debug!(key = %key, "Serving stale entry while revalidating");
                Ok(CacheRead::new(downcast(key, payload)?, fetched_at, ReadSource::Stale))
            }
            (Cached::Absent, Some(fetch)) => {
                CacheMetrics::incr(&self.inner.metrics.misses);
                let payload = fetch.await?;
                Ok(CacheRead::new(downcast(key, payload)?, Instant::now(), ReadSource::Fetched))
            }
            (Cached::Absent, None) => Err(SyncError::client(format!("no fetch scheduled for {key}"))),
        }
    }

    /// Fetch `key` regardless of freshness, joining a fetch already in flight.
    pub async fn refetch<T, F, Fut>(
        &self,
        key: &QueryKey,
        policy: &QueryPolicy,
        fetcher: F,
    ) -> SyncResult<Arc<T>>
    where
        T: Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = SyncResult<T>> + Send + 'static,
    {
        let fetch = {
            let mut state = self.inner.lock();
            self.ensure_fetch(&mut state, key, policy, fetcher)
        };
        downcast(key, fetch.await?)
    }

    /// Usable entry for `key` without fetching. Expired entries are not
    /// returned.
    pub fn peek<T: Send + Sync + 'static>(&self, key: &QueryKey) -> Option<CacheRead<Arc<T>>> {
        let now = Instant::now();
        let (payload, fetched_at, source) = {
            let state = self.inner.lock();
            let entry = state.slots.get(key)?.entry.as_ref()?;
            if entry.is_expired(now) {
                return None;
            }
            (Arc::clone(&entry.payload), entry.fetched_at, entry.source(now))
        };

        match downcast(key, payload) {
            Ok(value) => Some(CacheRead::new(value, fetched_at, source)),
            Err(err) => {
                tracing::warn!(key = %key, error = %err, "Peeked entry has a different type");
                None
            }
        }
    }

    /// Seed `key` with a fresh value.
    pub fn set<T: Send + Sync + 'static>(&self, key: &QueryKey, policy: &QueryPolicy, value: T) {
        let payload: Payload = Arc::new(value);
        let mut state = self.inner.lock();
        state.slots.entry(key.clone()).or_default().entry =
            Some(CacheEntry::new(payload, policy, Instant::now()));
    }

    /// True when `key` holds an entry that has not exceeded its eviction window.
    pub fn contains(&self, key: &QueryKey) -> bool {
        let now = Instant::now();
        self.inner
            .lock()
            .slots
            .get(key)
            .and_then(|slot| slot.entry.as_ref())
            .is_some_and(|entry| !entry.is_expired(now))
    }

    /// Number of stored entries, including expired ones the sweeper has not
    /// reached yet.
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .slots
            .values()
            .filter(|slot| slot.entry.is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of keys with a fetch in flight.
    pub fn in_flight(&self) -> usize {
        self.inner
            .lock()
            .slots
            .values()
            .filter(|slot| slot.in_flight.is_some())
            .count()
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.metrics.snapshot()
    }

    // ------------------------------------------------------------------------
    // Invalidation
    // ------------------------------------------------------------------------

    /// Remove every entry whose key starts with `prefix` and detach matching
    /// in-flight fetches. Returns the number of entries removed.
    pub fn invalidate_prefix(&self, prefix: &QueryKey) -> usize {
        if prefix.is_root() {
            return self.clear();
        }

        let mut removed = 0usize;
        let mut detached = 0usize;
        {
            let mut state = self.inner.lock();
            state.slots.retain(|key, slot| {
                if !key.starts_with(prefix) {
                    return true;
                }
                removed += usize::from(slot.entry.is_some());
                detached += usize::from(slot.in_flight.is_some());
                false
            });
        }

        self.record_invalidation(prefix, removed, detached);
        removed
    }

    /// Remove exactly `key`. Returns whether an entry was removed.
    pub fn invalidate(&self, key: &QueryKey) -> bool {
        let slot = self.inner.lock().slots.remove(key);
        let (removed, detached) = slot
            .map(|s| (usize::from(s.entry.is_some()), usize::from(s.in_flight.is_some())))
            .unwrap_or((0, 0));
        self.record_invalidation(key, removed, detached);
        removed > 0
    }

    /// Drop everything. Fetches in flight at this point store nothing when
    /// they finish.
    pub fn clear(&self) -> usize {
        let (removed, detached) = {
            let mut state = self.inner.lock();
            state.generation += 1;
            let removed = state.slots.values().filter(|s| s.entry.is_some()).count();
            let detached = state.slots.values().filter(|s| s.in_flight.is_some()).count();
            state.slots.clear();
            (removed, detached)
        };
        self.record_invalidation(&QueryKey::root(), removed, detached);
        removed
    }

    /// Evict every prefix of the change's rule.
    pub fn apply_change(&self, change: &Change) -> usize {
        let removed = change
            .prefixes()
            .iter()
            .map(|prefix| self.invalidate_prefix(prefix))
            .sum();
        tracing::debug!(change = %change.kind, subject = ?change.subject, removed, "Applied change to cache");
        removed
    }

    /// Remove entries older than their eviction window. Returns how many were
    /// removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut evicted = 0usize;
        {
            let mut state = self.inner.lock();
            state.slots.retain(|_, slot| {
                if slot.entry.as_ref().is_some_and(|e| e.is_expired(now)) {
                    slot.entry = None;
                    evicted += 1;
                }
                !slot.is_vacant()
            });
        }
        CacheMetrics::add(&self.inner.metrics.evictions, evicted as u64);
        evicted
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    fn lookup(&self, state: &mut State, key: &QueryKey, now: Instant) -> Cached {
        let Some(slot) = state.slots.get_mut(key) else {
            return Cached::Absent;
        };

        if slot.entry.as_ref().is_some_and(|e| e.is_expired(now)) {
            slot.entry = None;
            CacheMetrics::incr(&self.inner.metrics.evictions);
            tracing::debug!(key = %key, "Dropped expired entry on read");
        }

        match slot.entry.as_ref() {
            Some(entry) if entry.is_fresh(now) => {
                Cached::Fresh(Arc::clone(&entry.payload), entry.fetched_at)
            }
            Some(entry) => Cached::Stale(Arc::clone(&entry.payload), entry.fetched_at),
            None => Cached::Absent,
        }
    }

    /// The key's in-flight fetch, started with `fetcher` if there is none.
    fn ensure_fetch<T, F, Fut>(
        &self,
        state: &mut State,
        key: &QueryKey,
        policy: &QueryPolicy,
        fetcher: F,
    ) -> SharedFetch
    where
        T: Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = SyncResult<T>> + Send + 'static,
    {
        if let Some(in_flight) = state.slots.get(key).and_then(|s| s.in_flight.as_ref()) {
            return in_flight.fetch.clone();
        }

        let id = state.next_fetch_id;
        state.next_fetch_id += 1;
        let in_flight = self.start_fetch(id, state.generation, key, policy, fetcher);
        let fetch = in_flight.fetch.clone();
        state.slots.entry(key.clone()).or_default().in_flight = Some(in_flight);
        fetch
    }

    fn start_fetch<T, F, Fut>(
        &self,
        id: u64,
        generation: u64,
        key: &QueryKey,
        policy: &QueryPolicy,
        fetcher: F,
    ) -> InFlight
    where
        T: Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = SyncResult<T>> + Send + 'static,
    {
        CacheMetrics::incr(&self.inner.metrics.fetches);
        tracing::debug!(key = %key, fetch_id = id, "Starting fetch");

        let inner = Arc::clone(&self.inner);
        let key = key.clone();
        let policy = *policy;
        let task = tokio::spawn(async move {
            let result = fetch_with_retry(&key, &policy.retry, &fetcher)
                .await
                .map(|value| Arc::new(value) as Payload);
            inner.complete(&key, id, generation, &policy, &result);
            result
        });

        let fetch = async move {
            task.await
                .unwrap_or_else(|err| Err(SyncError::client(format!("fetch task failed: {err}"))))
        }
        .boxed()
        .shared();

        InFlight { id, fetch }
    }

    fn record_invalidation(&self, target: &QueryKey, removed: usize, detached: usize) {
        CacheMetrics::add(&self.inner.metrics.invalidations, removed as u64);
        if removed > 0 || detached > 0 {
            tracing::debug!(prefix = %target, removed, detached, "Invalidated cache keys");
        }
    }
}

fn downcast<T: Send + Sync + 'static>(key: &QueryKey, payload: Payload) -> SyncResult<Arc<T>> {
    payload.downcast::<T>().map_err(|_| {
        SyncError::client(format!(
            "cached payload for {key} is not a {}",
            std::any::type_name::<T>()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_fetcher(
        calls: &Arc<AtomicUsize>,
        delay: Duration,
    ) -> impl Fn() -> BoxFuture<'static, SyncResult<usize>> + Send + Sync + 'static {
        let calls = Arc::clone(calls);
        move || {
            let calls = Arc::clone(&calls);
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                tokio::time::sleep(delay).await;
                Ok(n)
            }
            .boxed()
        }
    }

    fn policy() -> QueryPolicy {
        QueryPolicy::minutes(5, 10)
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_hit_does_not_fetch() {
        let cache = QueryCache::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let key = QueryKey::new("models");

        let first = cache.read(&key, &policy(), counting_fetcher(&calls, Duration::ZERO)).await.unwrap();
        assert_eq!(first.source(), ReadSource::Fetched);

        tokio::time::advance(Duration::from_secs(299)).await;
        let second = cache.read(&key, &policy(), counting_fetcher(&calls, Duration::ZERO)).await.unwrap();

        assert_eq!(second.source(), ReadSource::Fresh);
        assert_eq!(*second.into_value(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats().hits, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_type_mismatch_is_a_client_error() {
        let cache = QueryCache::default();
        let key = QueryKey::new("models");
        cache.set(&key, &policy(), 7u32);

        let err = cache
            .read(&key, &policy(), || async { Ok(String::from("never")) })
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "client");
        assert!(cache.peek::<String>(&key).is_none());
        assert_eq!(*cache.peek::<u32>(&key).unwrap().into_value(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_keeps_existing_entry() {
        let cache = QueryCache::default();
        let key = QueryKey::new("jobStats");
        let no_retry = policy().with_retry(crate::RetryPolicy::none());
        cache.set(&key, &no_retry, 1usize);

        let err = cache
            .refetch(&key, &no_retry, || async { Err::<usize, _>(SyncError::server(500, "boom")) })
            .await
            .unwrap_err();

        assert_eq!(err, SyncError::server(500, "boom"));
        assert_eq!(*cache.peek::<usize>(&key).unwrap().into_value(), 1);
        assert_eq!(cache.stats().failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_without_entry_leaves_key_absent() {
        let cache = QueryCache::default();
        let key = QueryKey::new("user").segment("u404");
        let no_retry = policy().with_retry(crate::RetryPolicy::none());

        let err = cache
            .read(&key, &no_retry, || async { Err::<usize, _>(SyncError::server(404, "User not found")) })
            .await
            .unwrap_err();

        assert_eq!(err.status_code(), Some(404));
        assert!(!cache.contains(&key));
        assert_eq!(cache.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_reader_does_not_cancel_fetch() {
        let cache = QueryCache::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let key = QueryKey::new("chatbotStats");

        let reader = {
            let cache = cache.clone();
            let key = key.clone();
            let fetcher = counting_fetcher(&calls, Duration::from_secs(2));
            tokio::spawn(async move { cache.read(&key, &policy(), fetcher).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        reader.abort();

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(cache.contains(&key));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_detached_fetch_result_is_stored_stale() {
        let cache = QueryCache::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let key = QueryKey::new("jobs").segment("{}");

        let waiter = {
            let cache = cache.clone();
            let key = key.clone();
            let fetcher = counting_fetcher(&calls, Duration::from_secs(1));
            tokio::spawn(async move { cache.read(&key, &policy(), fetcher).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(cache.invalidate_prefix(&QueryKey::new("jobs")), 0);
        assert_eq!(cache.in_flight(), 0);

        // The waiting caller still gets the result of the fetch it joined.
        let read = waiter.await.unwrap().unwrap();
        assert_eq!(*read.into_value(), 1);

        let peeked = cache.peek::<usize>(&key).unwrap();
        assert!(peeked.is_stale());

        let next = cache.read(&key, &policy(), counting_fetcher(&calls, Duration::ZERO)).await.unwrap();
        assert!(next.is_stale());
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_discards_in_flight_results() {
        let cache = QueryCache::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let key = QueryKey::new("users").segment("{}");

        let waiter = {
            let cache = cache.clone();
            let key = key.clone();
            let fetcher = counting_fetcher(&calls, Duration::from_secs(1));
            tokio::spawn(async move { cache.read(&key, &policy(), fetcher).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        cache.clear();

        assert!(waiter.await.unwrap().is_ok());
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_removes_only_expired() {
        let cache = QueryCache::default();
        cache.set(&QueryKey::new("tokens").segment("u1"), &QueryPolicy::minutes(2, 5), 1u8);
        cache.set(&QueryKey::new("jobResults").segment("j1"), &QueryPolicy::minutes(10, 30), 2u8);

        tokio::time::advance(Duration::from_secs(5 * 60 + 1)).await;

        assert_eq!(cache.sweep(), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.contains(&QueryKey::new("jobResults").segment("j1")));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_apply_change_evicts_rule_prefixes() {
        use adminsync_core::ChangeKind;

        let cache = QueryCache::default();
        let p = policy();
        cache.set(&QueryKey::new("school").segment("3"), &p, ());
        cache.set(&QueryKey::new("school").segment("4"), &p, ());
        cache.set(&QueryKey::new("schools").segment("{\"page\":1}"), &p, ());
        cache.set(&QueryKey::new("users").segment("{}"), &p, ());
        cache.set(&QueryKey::new("jobs").segment("{}"), &p, ());

        let removed = cache.apply_change(&Change::for_subject(ChangeKind::SchoolDeleted, "3"));

        assert_eq!(removed, 3);
        assert!(cache.contains(&QueryKey::new("school").segment("4")));
        assert!(cache.contains(&QueryKey::new("jobs").segment("{}")));
    }
}
