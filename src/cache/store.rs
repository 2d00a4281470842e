//! Bounded, TTL-based response store.
//!
//! Entries expire lazily on read and eagerly through a periodic sweep. When the
//! store is full, inserting a new key evicts the entry that was *inserted*
//! earliest. This is FIFO by insertion time, not LRU: reads never extend an
//! entry's life or protect it from eviction.
//!
//! Every store owns a [`QueryRegistry`]. Whatever path removes an entry
//! (expiry, sweep, eviction, explicit removal) also drops its registration,
//! so the registry never outgrows the store.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use metrics::counter;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::config::CacheConfig;
use super::lock::mutex_lock;
use super::registry::QueryRegistry;

const SOURCE: &str = "cache::store";

pub(crate) const METRIC_CACHE_HIT: &str = "postloop_cache_hit_total";
pub(crate) const METRIC_CACHE_MISS: &str = "postloop_cache_miss_total";
pub(crate) const METRIC_CACHE_EVICT: &str = "postloop_cache_evict_total";
pub(crate) const METRIC_CACHE_EXPIRED: &str = "postloop_cache_expired_total";

struct CacheEntry<V> {
    data: V,
    timestamp: Instant,
    // Breaks ties between entries stored at the same instant.
    sequence: u64,
}

struct Entries<V> {
    map: HashMap<String, CacheEntry<V>>,
    next_sequence: u64,
}

impl<V> Entries<V> {
    fn oldest_key(&self) -> Option<String> {
        self.map
            .iter()
            .min_by_key(|(_, entry)| (entry.timestamp, entry.sequence))
            .map(|(key, _)| key.clone())
    }
}

/// Age report for one cached entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryStat {
    pub key: String,
    pub age: Duration,
    pub expired: bool,
}

/// Snapshot of the store for introspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub size: usize,
    pub max_size: usize,
    /// Logical queries with at least one cached page.
    pub queries: usize,
    pub entries: Vec<EntryStat>,
}

/// Response cache keyed by canonical query keys.
///
/// No operation fails: a degraded cache behaves as a miss.
pub struct ResponseCache<V> {
    config: CacheConfig,
    entries: Mutex<Entries<V>>,
    registry: QueryRegistry,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl<V: Clone> ResponseCache<V> {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            entries: Mutex::new(Entries {
                map: HashMap::new(),
                next_sequence: 0,
            }),
            registry: QueryRegistry::new(),
            sweeper: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn registry(&self) -> &QueryRegistry {
        &self.registry
    }

    /// Look up a key, deleting it if it outlived the TTL.
    pub fn get(&self, key: &str) -> Option<V> {
        if !self.config.enabled {
            return None;
        }

        let now = Instant::now();
        let ttl = self.config.ttl();
        let mut entries = mutex_lock(&self.entries, SOURCE, "get");

        let expired = match entries.map.get(key) {
            None => {
                counter!(METRIC_CACHE_MISS).increment(1);
                debug!(cache = "response", outcome = "miss", key, "cache miss");
                return None;
            }
            Some(entry) => now.saturating_duration_since(entry.timestamp) > ttl,
        };

        if expired {
            entries.map.remove(key);
            self.registry.unregister(key);
            counter!(METRIC_CACHE_EXPIRED).increment(1);
            counter!(METRIC_CACHE_MISS).increment(1);
            debug!(cache = "response", outcome = "expired", key, "cache entry expired");
            return None;
        }

        counter!(METRIC_CACHE_HIT).increment(1);
        debug!(cache = "response", outcome = "hit", key, "cache hit");
        entries.map.get(key).map(|entry| entry.data.clone())
    }

    /// Store a response, returning the key evicted to make room, if any.
    ///
    /// Overwriting an existing key refreshes its timestamp without evicting.
    pub fn set(&self, key: impl Into<String>, data: V) -> Option<String> {
        self.insert(key.into(), data, None)
    }

    /// Store a page of the logical query `logical_key`, so that
    /// [`ResponseCache::remove_query`] can drop it later.
    pub fn set_in_query(
        &self,
        logical_key: impl Into<String>,
        key: impl Into<String>,
        data: V,
    ) -> Option<String> {
        self.insert(key.into(), data, Some(logical_key.into()))
    }

    fn insert(&self, key: String, data: V, logical_key: Option<String>) -> Option<String> {
        if !self.config.enabled {
            return None;
        }

        let max_size = self.config.max_size_non_zero().get();
        let mut entries = mutex_lock(&self.entries, SOURCE, "set");

        let mut evicted = None;
        if !entries.map.contains_key(&key)
            && entries.map.len() >= max_size
            && let Some(oldest) = entries.oldest_key()
        {
            entries.map.remove(&oldest);
            self.registry.unregister(&oldest);
            counter!(METRIC_CACHE_EVICT).increment(1);
            debug!(cache = "response", evicted = %oldest, "evicted oldest entry");
            evicted = Some(oldest);
        }

        if let Some(logical_key) = logical_key {
            self.registry.register(logical_key, key.as_str());
        }
        let sequence = entries.next_sequence;
        entries.next_sequence += 1;
        entries.map.insert(
            key,
            CacheEntry {
                data,
                timestamp: Instant::now(),
                sequence,
            },
        );

        evicted
    }

    pub fn remove(&self, key: &str) -> bool {
        let removed = mutex_lock(&self.entries, SOURCE, "remove")
            .map
            .remove(key)
            .is_some();
        self.registry.unregister(key);
        removed
    }

    /// Remove every cached page of one logical query. Returns how many were
    /// removed.
    pub fn remove_query(&self, logical_key: &str) -> usize {
        let keys = self.registry.unregister_query(logical_key);
        let mut entries = mutex_lock(&self.entries, SOURCE, "remove_query");
        keys.iter()
            .filter(|key| entries.map.remove(key.as_str()).is_some())
            .count()
    }

    /// Remove every entry whose key satisfies the predicate.
    pub fn remove_where(&self, mut predicate: impl FnMut(&str) -> bool) -> usize {
        let mut entries = mutex_lock(&self.entries, SOURCE, "remove_where");
        let mut removed = Vec::new();
        entries.map.retain(|key, _| {
            let matched = predicate(key);
            if matched {
                removed.push(key.clone());
            }
            !matched
        });
        for key in &removed {
            self.registry.unregister(key);
        }
        removed.len()
    }

    pub fn clear(&self) {
        mutex_lock(&self.entries, SOURCE, "clear").map.clear();
        self.registry.clear();
    }

    /// Drop every entry older than the TTL. Returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let ttl = self.config.ttl();
        let mut entries = mutex_lock(&self.entries, SOURCE, "sweep_expired");
        let mut expired = Vec::new();
        entries.map.retain(|key, entry| {
            let live = now.saturating_duration_since(entry.timestamp) <= ttl;
            if !live {
                expired.push(key.clone());
            }
            live
        });
        for key in &expired {
            self.registry.unregister(key);
        }
        let removed = expired.len();

        if removed > 0 {
            counter!(METRIC_CACHE_EXPIRED).increment(removed as u64);
            debug!(cache = "response", removed, "swept expired entries");
        }
        removed
    }

    pub fn stats(&self) -> CacheStats {
        let now = Instant::now();
        let ttl = self.config.ttl();
        let entries = mutex_lock(&self.entries, SOURCE, "stats");

        let mut stats: Vec<EntryStat> = entries
            .map
            .iter()
            .map(|(key, entry)| {
                let age = now.saturating_duration_since(entry.timestamp);
                EntryStat {
                    key: key.clone(),
                    age,
                    expired: age > ttl,
                }
            })
            .collect();
        stats.sort_by(|a, b| a.key.cmp(&b.key));

        CacheStats {
            size: entries.map.len(),
            max_size: self.config.max_size_non_zero().get(),
            queries: self.registry.query_count(),
            entries: stats,
        }
    }

    pub fn len(&self) -> usize {
        mutex_lock(&self.entries, SOURCE, "len").map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<V: Clone + Send + Sync + 'static> ResponseCache<V> {
    /// Spawn the periodic expiry sweep on the current tokio runtime.
    ///
    /// No-op when disabled, when already running, or outside a runtime. The
    /// task only holds a weak reference and stops once the cache is dropped.
    pub fn start_sweeper(self: &Arc<Self>) {
        if !self.config.enabled {
            return;
        }

        let mut slot = mutex_lock(&self.sweeper, SOURCE, "start_sweeper");
        if slot.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(
                cache = "response",
                "no tokio runtime available; expiry sweep disabled"
            );
            return;
        };

        let cache = Arc::downgrade(self);
        let period = self.config.sweep_interval();
        *slot = Some(runtime.spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await; // Skip the first immediate tick
            loop {
                interval.tick().await;
                let Some(cache) = cache.upgrade() else {
                    break;
                };
                cache.sweep_expired();
            }
        }));
    }
}

impl<V> ResponseCache<V> {
    /// Stop the background sweep. Entries stay readable.
    pub fn dispose(&self) {
        if let Some(handle) = mutex_lock(&self.sweeper, SOURCE, "dispose").take() {
            handle.abort();
        }
    }

    pub fn sweeper_running(&self) -> bool {
        mutex_lock(&self.sweeper, SOURCE, "sweeper_running")
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl<V> Drop for ResponseCache<V> {
    fn drop(&mut self) {
        self.dispose();
    }
}
