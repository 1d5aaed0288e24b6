//! LRU + TTL result cache (C6).
//!
//! The `lru` crate is exactly what the reference project uses for its
//! embedding-query cache (`LruCache<String, Vec<f32>>`); `lru` itself has
//! no TTL concept, so entries are wrapped with an `Instant` and checked on
//! read.

use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use lru::LruCache;

use crate::model::{Filters, Hit};

/// `(profile, normalized_query, filter_hash, limit, min_score)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    profile: String,
    normalized_query: String,
    filter_hash: u64,
    limit: i64,
    min_score_millis: i64,
}

impl CacheKey {
    pub fn new(profile: &str, query: &str, filters: &Filters, limit: i64, min_score: f64) -> Self {
        Self {
            profile: profile.to_string(),
            normalized_query: query.trim().to_lowercase(),
            filter_hash: hash_filters(filters),
            limit,
            min_score_millis: (min_score * 1000.0).round() as i64,
        }
    }
}

fn hash_filters(filters: &Filters) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    let mut tags = filters.tags.clone();
    tags.sort();
    tags.hash(&mut hasher);
    filters.project.hash(&mut hasher);
    filters.category.hash(&mut hasher);
    filters.min_importance.hash(&mut hasher);
    hasher.finish()
}

pub struct SearchCache {
    entries: Mutex<LruCache<CacheKey, (Vec<Hit>, Instant)>>,
    ttl: Duration,
}

impl SearchCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap();
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    pub fn get(&self, key: &CacheKey) -> Option<Vec<Hit>> {
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        let hit = entries.get(key).filter(|(_, at)| at.elapsed() < self.ttl).map(|(hits, _)| hits.clone());
        if hit.is_none() {
            entries.pop(key);
        }
        hit
    }

    pub fn put(&self, key: CacheKey, hits: Vec<Hit>) {
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        entries.put(key, (hits, Instant::now()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_round_trips_within_ttl() {
        let cache = SearchCache::new(4, Duration::from_secs(60));
        let key = CacheKey::new("default", "  Query  ", &Filters::default(), 10, 0.0);
        cache.put(key.clone(), Vec::new());
        assert!(cache.get(&key).is_some());
    }

    #[test]
    fn normalized_query_keys_are_case_and_whitespace_insensitive() {
        let a = CacheKey::new("default", "  Query  ", &Filters::default(), 10, 0.0);
        let b = CacheKey::new("default", "query", &Filters::default(), 10, 0.0);
        assert_eq!(a, b);
    }

    #[test]
    fn expired_entries_are_not_returned() {
        let cache = SearchCache::new(4, Duration::from_millis(0));
        let key = CacheKey::new("default", "query", &Filters::default(), 10, 0.0);
        cache.put(key.clone(), Vec::new());
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get(&key).is_none());
    }
}
