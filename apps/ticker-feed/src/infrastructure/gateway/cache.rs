//! TTL response cache.
//!
//! Entries are kept after they expire so a failing upstream can still be
//! answered with the last good value.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use super::fetch::Provider;

/// Cache key: provider, resource and normalized request parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Upstream provider.
    pub provider: Provider,
    /// Resource name, e.g. `snapshot`.
    pub resource: &'static str,
    /// Normalized parameters.
    pub params: String,
}

impl CacheKey {
    /// Build a key.
    #[must_use]
    pub fn new(provider: Provider, resource: &'static str, params: impl Into<String>) -> Self {
        Self {
            provider,
            resource,
            params: params.into(),
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    fetched_at: Instant,
    ttl: Duration,
}

/// Result of a cache lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<V> {
    /// Entry younger than its TTL.
    Fresh(V),
    /// Expired entry; usable only as a fallback.
    Stale(V),
    /// Nothing cached.
    Miss,
}

/// Thread-safe TTL cache.
#[derive(Debug)]
pub struct TtlCache<V> {
    entries: Mutex<HashMap<CacheKey, CacheEntry<V>>>,
}

impl<V> Default for TtlCache<V> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<V: Clone> TtlCache<V> {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up `key`.
    pub fn lookup(&self, key: &CacheKey) -> Lookup<V> {
        let entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.fetched_at.elapsed() < entry.ttl => Lookup::Fresh(entry.value.clone()),
            Some(entry) => Lookup::Stale(entry.value.clone()),
            None => Lookup::Miss,
        }
    }

    /// Store `value` under `key` for `ttl`.
    pub fn insert(&self, key: CacheKey, value: V, ttl: Duration) {
        self.entries.lock().insert(
            key,
            CacheEntry {
                value,
                fetched_at: Instant::now(),
                ttl,
            },
        );
    }

    /// Number of entries, fresh or stale.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(params: &str) -> CacheKey {
        CacheKey::new(Provider::Binance, "snapshot", params)
    }

    #[tokio::test(start_paused = true)]
    async fn entries_go_stale_after_ttl() {
        let cache = TtlCache::new();
        cache.insert(key("BTCUSDT"), 1_u32, Duration::from_secs(30));

        assert_eq!(cache.lookup(&key("BTCUSDT")), Lookup::Fresh(1));
        tokio::time::advance(Duration::from_secs(29)).await;
        assert_eq!(cache.lookup(&key("BTCUSDT")), Lookup::Fresh(1));
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(cache.lookup(&key("BTCUSDT")), Lookup::Stale(1));
        assert_eq!(cache.lookup(&key("ETHUSDT")), Lookup::Miss);
    }

    #[tokio::test(start_paused = true)]
    async fn insert_refreshes_entry() {
        let cache = TtlCache::new();
        cache.insert(key("a"), "old", Duration::from_secs(1));
        tokio::time::advance(Duration::from_secs(2)).await;
        cache.insert(key("a"), "new", Duration::from_secs(1));

        assert_eq!(cache.lookup(&key("a")), Lookup::Fresh("new"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn keys_differ_by_provider_and_resource() {
        let cache = TtlCache::new();
        cache.insert(CacheKey::new(Provider::Binance, "snapshot", "x"), 1, Duration::from_secs(5));
        cache.insert(CacheKey::new(Provider::CoinGecko, "snapshot", "x"), 2, Duration::from_secs(5));
        cache.insert(CacheKey::new(Provider::Binance, "history", "x"), 3, Duration::from_secs(5));
        assert_eq!(cache.len(), 3);
    }
}
