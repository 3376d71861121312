use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use moka::{future::Cache, policy::EvictionPolicy};
use serde::{Deserialize, Serialize};

use super::IntentResult;

/// Cache key for resolved intents
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct CacheKey {
    /// Hash of the normalized utterance
    utterance_hash: u64,
    /// Hash of the coarse context fingerprint
    fingerprint_hash: u64,
}

impl CacheKey {
    pub fn new(normalized_utterance: &str, fingerprint: &str) -> Self {
        Self {
            utterance_hash: hash_str(normalized_utterance),
            fingerprint_hash: hash_str(fingerprint),
        }
    }
}

fn hash_str(value: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

/// Bounded, time-limited cache of intent results. Oldest entries go first once full.
#[derive(Debug)]
pub struct IntentCache {
    cache: Cache<CacheKey, Arc<IntentResult>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl IntentCache {
    /// * `max_capacity` - Maximum number of entries to cache
    /// * `ttl_seconds` - Time-to-live in seconds for cache entries
    pub fn new(max_capacity: u64, ttl_seconds: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_live(Duration::from_secs(ttl_seconds))
            .eviction_policy(EvictionPolicy::lru())
            .build();

        Self {
            cache,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub async fn get(&self, key: &CacheKey) -> Option<Arc<IntentResult>> {
        let result = self.cache.get(key).await;
        if result.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    pub async fn put(&self, key: CacheKey, result: IntentResult) {
        self.cache.insert(key, Arc::new(result)).await;
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 {
            hits as f64 / total as f64
        } else {
            0.0
        };

        CacheStats {
            entry_count: self.cache.entry_count(),
            hits,
            misses,
            hit_rate,
        }
    }

    pub async fn invalidate_all(&self) {
        self.cache.invalidate_all();
        // Wait for invalidation to complete
        self.cache.run_pending_tasks().await;
    }

    #[cfg(test)]
    pub(crate) async fn sync(&self) {
        self.cache.run_pending_tasks().await;
    }
}

/// Cache statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub entry_count: u64,
    pub hits: u64,
    pub misses: u64,
    /// hits / (hits + misses)
    pub hit_rate: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::risk::{RiskAssessment, RiskLevel};
    use std::collections::HashMap;

    fn result(tool: &str) -> IntentResult {
        IntentResult {
            tool_name: tool.to_string(),
            confidence: 0.9,
            parameters: HashMap::new(),
            risk_level: RiskLevel::Low,
            requires_confirmation: false,
            reasoning: "test".to_string(),
            alternatives: Vec::new(),
            risk: RiskAssessment {
                score: 0,
                risk_level: RiskLevel::Low,
                requires_confirmation: false,
                factors: Vec::new(),
                reason: "low risk".to_string(),
            },
        }
    }

    #[test]
    fn test_cache_key_generation() {
        let key1 = CacheKey::new("list files", "s1|u1|/home");
        let key2 = CacheKey::new("list files", "s1|u1|/home");
        let key3 = CacheKey::new("list files", "s1|u1|/tmp");
        let key4 = CacheKey::new("read files", "s1|u1|/home");

        assert_eq!(key1, key2);
        assert_ne!(key1, key3);
        assert_ne!(key1, key4);
    }

    #[tokio::test]
    async fn test_put_get_and_stats() {
        let cache = IntentCache::new(10, 60);
        let key = CacheKey::new("list files", "fp");

        assert!(cache.get(&key).await.is_none());
        cache.put(key.clone(), result("list_directory")).await;
        let cached = cache.get(&key).await.unwrap();
        assert_eq!(cached.tool_name, "list_directory");

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hit_rate, 0.5);
    }

    #[tokio::test]
    async fn test_capacity_is_bounded() {
        let cache = IntentCache::new(2, 60);
        for i in 0..5 {
            cache
                .put(CacheKey::new(&format!("utterance {}", i), "fp"), result("read_file"))
                .await;
        }
        cache.sync().await;
        assert!(cache.stats().entry_count <= 2);
    }

    #[tokio::test]
    async fn test_invalidate_all() {
        let cache = IntentCache::new(10, 60);
        let key = CacheKey::new("list files", "fp");
        cache.put(key.clone(), result("list_directory")).await;
        cache.invalidate_all().await;
        assert!(cache.get(&key).await.is_none());
    }
}
