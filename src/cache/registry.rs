//! Logical query registry.
//!
//! Tracks which canonical cache keys belong to which logical query (the
//! canonical form without the page number) so that invalidating one query
//! drops every cached page of it and nothing else.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use super::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::registry";

#[derive(Default)]
struct Mappings {
    /// Logical query → canonical keys of its cached pages.
    query_to_keys: HashMap<String, HashSet<String>>,
    /// Canonical key → owning logical query.
    key_to_query: HashMap<String, String>,
}

/// Bidirectional logical-query ↔ cache-key map.
#[derive(Default)]
pub struct QueryRegistry {
    mappings: RwLock<Mappings>,
}

impl QueryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `cache_key` holds a page of `logical_key`.
    pub fn register(&self, logical_key: impl Into<String>, cache_key: impl Into<String>) {
        let logical_key = logical_key.into();
        let cache_key = cache_key.into();
        let mut mappings = rw_write(&self.mappings, SOURCE, "register");

        if let Some(previous) = mappings.key_to_query.get(&cache_key).cloned()
            && previous != logical_key
        {
            detach(&mut mappings.query_to_keys, &previous, &cache_key);
        }

        mappings
            .query_to_keys
            .entry(logical_key.clone())
            .or_default()
            .insert(cache_key.clone());
        mappings.key_to_query.insert(cache_key, logical_key);
    }

    pub fn keys_for_query(&self, logical_key: &str) -> HashSet<String> {
        rw_read(&self.mappings, SOURCE, "keys_for_query")
            .query_to_keys
            .get(logical_key)
            .cloned()
            .unwrap_or_default()
    }

    /// Forget one cache key, e.g. after the store evicted it.
    pub fn unregister(&self, cache_key: &str) {
        let mut mappings = rw_write(&self.mappings, SOURCE, "unregister");
        if let Some(logical_key) = mappings.key_to_query.remove(cache_key) {
            detach(&mut mappings.query_to_keys, &logical_key, cache_key);
        }
    }

    /// Forget a logical query, returning the keys that belonged to it.
    pub fn unregister_query(&self, logical_key: &str) -> HashSet<String> {
        let mut mappings = rw_write(&self.mappings, SOURCE, "unregister_query");
        let keys = mappings
            .query_to_keys
            .remove(logical_key)
            .unwrap_or_default();
        for key in &keys {
            mappings.key_to_query.remove(key);
        }
        keys
    }

    pub fn clear(&self) {
        let mut mappings = rw_write(&self.mappings, SOURCE, "clear");
        mappings.query_to_keys.clear();
        mappings.key_to_query.clear();
    }

    pub fn query_count(&self) -> usize {
        rw_read(&self.mappings, SOURCE, "query_count")
            .query_to_keys
            .len()
    }

    pub fn key_count(&self) -> usize {
        rw_read(&self.mappings, SOURCE, "key_count")
            .key_to_query
            .len()
    }
}

fn detach(query_to_keys: &mut HashMap<String, HashSet<String>>, logical_key: &str, cache_key: &str) {
    if let Some(keys) = query_to_keys.get_mut(logical_key) {
        keys.remove(cache_key);
        if keys.is_empty() {
            query_to_keys.remove(logical_key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_lookup() {
        let registry = QueryRegistry::new();
        registry.register("posts:q", "posts:q:1");
        registry.register("posts:q", "posts:q:2");

        let keys = registry.keys_for_query("posts:q");
        assert_eq!(keys.len(), 2);
        assert!(keys.contains("posts:q:1"));
        assert_eq!(registry.query_count(), 1);
    }

    #[test]
    fn unregister_query_is_scoped() {
        let registry = QueryRegistry::new();
        registry.register("posts:a", "posts:a:1");
        registry.register("posts:a", "posts:a:2");
        registry.register("posts:b", "posts:b:1");

        let removed = registry.unregister_query("posts:a");
        assert_eq!(removed.len(), 2);
        assert!(registry.keys_for_query("posts:a").is_empty());
        assert_eq!(registry.keys_for_query("posts:b").len(), 1);
        assert_eq!(registry.key_count(), 1);
    }

    #[test]
    fn unregister_single_key_cleans_up_empty_query() {
        let registry = QueryRegistry::new();
        registry.register("posts:a", "posts:a:1");

        registry.unregister("posts:a:1");
        assert_eq!(registry.query_count(), 0);
        assert_eq!(registry.key_count(), 0);

        // Unknown keys are ignored.
        registry.unregister("posts:a:1");
    }

    #[test]
    fn re_registering_key_moves_it() {
        let registry = QueryRegistry::new();
        registry.register("posts:a", "shared");
        registry.register("posts:b", "shared");

        assert!(registry.keys_for_query("posts:a").is_empty());
        assert!(registry.keys_for_query("posts:b").contains("shared"));
        assert_eq!(registry.query_count(), 1);
    }

    #[test]
    fn clear_removes_all_mappings() {
        let registry = QueryRegistry::new();
        registry.register("posts:a", "posts:a:1");
        registry.clear();
        assert_eq!(registry.query_count(), 0);
        assert_eq!(registry.key_count(), 0);
    }
}
