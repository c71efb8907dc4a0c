//! adminsync query cache
//!
//! A keyed, time-based cache for read results. Each read names a
//! [`QueryPolicy`]: entries younger than `fresh_for` are served as-is, entries
//! between `fresh_for` and `evict_after` are served while one background
//! refetch runs, and older entries are never served. Concurrent reads of a
//! key share a single fetch.
//!
//! # Example
//!
//! ```ignore
//! let cache = QueryCache::default();
//! let key = QueryKey::new("users").with_params(&filters);
//! let read = cache
//!     .read(&key, &QueryPolicy::minutes(5, 10), move || client.get_users(filters.clone()))
//!     .await?;
//! if read.is_stale() {
//!     tracing::debug!("showing cached users while refreshing");
//! }
//! ```

pub mod freshness;
pub mod poll;
pub mod query_cache;
pub mod retry;
pub mod stats;
pub mod sweep;

pub use freshness::{CacheRead, QueryPolicy, ReadSource, RetryPolicy};
pub use poll::PollHandle;
pub use query_cache::{CacheConfig, Payload, QueryCache};
pub use stats::{CacheMetrics, CacheStats};
