//! Caching utilities for ryt-resolve

use moka::future::Cache;
use std::hash::Hash;
use std::time::Duration;

/// Async cache backed by moka
pub type AsyncCache<K, V> = Cache<K, V>;

/// Create an async cache holding at most `max_capacity` entries
pub fn new_bounded_cache<K, V>(max_capacity: u64) -> AsyncCache<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    Cache::builder().max_capacity(max_capacity).build()
}

/// Create an async cache with TTL and max capacity
pub fn new_expiring_cache<K, V>(ttl: Duration, max_capacity: u64) -> AsyncCache<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    Cache::builder()
        .time_to_live(ttl)
        .max_capacity(max_capacity)
        .build()
}
