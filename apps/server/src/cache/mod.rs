//! Bounded in-process caches
//!
//! Four named TTL+LRU caches back the hot paths: resolved mappings, text
//! embeddings, search responses and FHIR responses. Entries expire on read;
//! capacity is enforced by LRU eviction. Counters are atomic so stats reads
//! never contend with the request path.

use crate::config::CacheConfig;
use lru::LruCache;
use serde_json::Value as JsonValue;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    evictions: AtomicU64,
}

/// Snapshot of one cache's counters.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub evictions: u64,
    pub size: usize,
    pub hit_rate: f64,
}

/// LRU cache whose entries expire `ttl` after insertion.
pub struct TtlCache<K: Hash + Eq, V: Clone> {
    inner: Mutex<LruCache<K, Entry<V>>>,
    ttl: Duration,
    counters: Counters,
}

impl<K: Hash + Eq, V: Clone> TtlCache<K, V> {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity)
            .unwrap_or_else(|| NonZeroUsize::new(1).expect("1 is non-zero"));
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
            ttl,
            counters: Counters::default(),
        }
    }

    /// Returns the stored value iff it has not expired. Expired entries are
    /// dropped and counted as misses.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut cache = self.inner.lock().expect("cache mutex poisoned");
        match cache.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.value.clone())
            }
            Some(_) => {
                cache.pop(key);
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn set(&self, key: K, value: V) {
        let mut cache = self.inner.lock().expect("cache mutex poisoned");
        let existed = cache.contains(&key);
        let at_capacity = cache.len() == usize::from(cache.cap());
        let displaced = cache
            .push(
                key,
                Entry {
                    value,
                    expires_at: Instant::now() + self.ttl,
                },
            )
            .is_some();
        if !existed && at_capacity && displaced {
            self.counters.evictions.fetch_add(1, Ordering::Relaxed);
        }
        self.counters.sets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn invalidate(&self, key: &K) {
        let mut cache = self.inner.lock().expect("cache mutex poisoned");
        cache.pop(key);
    }

    pub fn clear(&self) {
        let mut cache = self.inner.lock().expect("cache mutex poisoned");
        cache.clear();
    }

    pub fn stats(&self) -> CacheStats {
        let size = self.inner.lock().expect("cache mutex poisoned").len();
        let hits = self.counters.hits.load(Ordering::Relaxed);
        let misses = self.counters.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        CacheStats {
            hits,
            misses,
            sets: self.counters.sets.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            size,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
        }
    }
}

/// The four named caches shared across the service.
pub struct CacheRegistry {
    /// Resolved mappings keyed by `(system, source_code)`.
    pub mappings: TtlCache<(String, String), JsonValue>,
    /// Query embeddings keyed by truncated text (see [`embedding_key`]).
    pub embeddings: TtlCache<String, Vec<f32>>,
    /// Search endpoint responses keyed by the request fingerprint.
    pub search: TtlCache<String, JsonValue>,
    /// FHIR operation responses, same key scheme as `search`.
    pub fhir: TtlCache<String, JsonValue>,
}

impl CacheRegistry {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            mappings: TtlCache::new(
                config.mappings_capacity,
                Duration::from_secs(config.mappings_ttl_secs),
            ),
            embeddings: TtlCache::new(
                config.embeddings_capacity,
                Duration::from_secs(config.embeddings_ttl_secs),
            ),
            search: TtlCache::new(
                config.search_capacity,
                Duration::from_secs(config.search_ttl_secs),
            ),
            fhir: TtlCache::new(
                config.fhir_capacity,
                Duration::from_secs(config.fhir_ttl_secs),
            ),
        }
    }

    pub fn stats(&self) -> JsonValue {
        serde_json::json!({
            "mappings": self.mappings.stats(),
            "embeddings": self.embeddings.stats(),
            "search": self.search.stats(),
            "fhir": self.fhir.stats(),
        })
    }

    pub fn clear_all(&self) {
        self.mappings.clear();
        self.embeddings.clear();
        self.search.clear();
        self.fhir.clear();
    }
}

/// Embedding cache key: the first 100 characters of the text. Deterministic
/// truncation on a char boundary keeps the key cheap for long definitions.
pub fn embedding_key(text: &str) -> String {
    text.chars().take(100).collect()
}

/// Response cache key: normalized path plus sorted query pairs plus an
/// optional body hash.
pub fn response_key(path: &str, query_pairs: &[(String, String)], body: Option<&[u8]>) -> String {
    let mut pairs: Vec<&(String, String)> = query_pairs.iter().collect();
    pairs.sort();
    let mut key = String::from(path.trim_end_matches('/'));
    for (k, v) in pairs {
        key.push('&');
        key.push_str(k);
        key.push('=');
        key.push_str(v);
    }
    if let Some(body) = body {
        use std::hash::Hasher;
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        hasher.write(body);
        key.push('#');
        key.push_str(&format!("{:016x}", hasher.finish()));
    }
    key
}
