//! Result caches.
//!
//! [`TtlLruCache`] is a bounded LRU map whose entries also carry an absolute
//! expiry read from the injected [`Clock`]. It is safe to share across request
//! workers: every operation takes a short `parking_lot` mutex. Populating after
//! a miss is not single-flight; two racing requests may both validate and both
//! insert, which only costs one redundant validation.
//!
//! [`TokenCaches`] bundles the four caches used by the validation pipeline.

use crate::clock::Clock;
use crate::config::CacheConfig;
use crate::security::jwt::{ParsedToken, ValidationResult};
use crate::security::CacheStats;
use lru::LruCache;
use parking_lot::Mutex;
use std::borrow::Borrow;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

const DEFAULT_CAPACITY: NonZeroUsize = match NonZeroUsize::new(1024) {
    Some(n) => n,
    None => NonZeroUsize::MIN,
};

/// Bounded LRU cache with per-entry expiry and hit/miss/eviction counters.
pub struct TtlLruCache<K: Hash + Eq, V: Clone> {
    name: &'static str,
    // key -> (expires_at_secs, value)
    entries: Mutex<LruCache<K, (i64, V)>>,
    ttl_secs: i64,
    enabled: bool,
    clock: Arc<dyn Clock>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl<K: Hash + Eq, V: Clone> TtlLruCache<K, V> {
    pub fn new(name: &'static str, capacity: usize, ttl_secs: i64, clock: Arc<dyn Clock>) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(DEFAULT_CAPACITY);
        Self {
            name,
            entries: Mutex::new(LruCache::new(capacity)),
            ttl_secs,
            enabled: true,
            clock,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// A cache that never stores anything.
    pub fn disabled(name: &'static str, clock: Arc<dyn Clock>) -> Self {
        let mut cache = Self::new(name, 1, 0, clock);
        cache.enabled = false;
        cache
    }

    pub fn from_config(name: &'static str, config: &CacheConfig, clock: Arc<dyn Clock>) -> Self {
        if config.enabled {
            Self::new(name, config.capacity, config.ttl_secs, clock)
        } else {
            Self::disabled(name, clock)
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Look up a live entry. Entries past their TTL are dropped and count as misses.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        if !self.enabled {
            return None;
        }
        let now = self.clock.now_secs();
        let mut guard = self.entries.lock();
        let found = guard.get(key).map(|(expires_at, value)| (*expires_at, value.clone()));
        match found {
            Some((expires_at, value)) if expires_at > now => {
                drop(guard);
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(value)
            }
            Some(_) => {
                guard.pop(key);
                drop(guard);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                drop(guard);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn insert(&self, key: K, value: V) {
        if !self.enabled {
            return;
        }
        let expires_at = self.clock.now_secs().saturating_add(self.ttl_secs);
        let mut guard = self.entries.lock();
        if guard.len() == guard.cap().get() && !guard.contains(&key) {
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
        guard.put(key, (expires_at, value));
    }

    pub fn remove<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.lock().pop(key).map(|(_, v)| v)
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let (size, capacity) = {
            let guard = self.entries.lock();
            (guard.len(), guard.cap().get())
        };
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            size,
            capacity: if self.enabled { capacity } else { 0 },
        }
    }
}

/// The caches shared by every signed-token flow.
pub struct TokenCaches {
    /// Parsed tokens keyed by signature segment.
    pub parsed: TtlLruCache<String, ParsedToken>,
    /// Successful validations keyed by token id.
    pub valid: TtlLruCache<String, ValidationResult>,
    /// Rejected raw tokens keyed by token id.
    pub invalid: TtlLruCache<String, String>,
    /// Backend credentials keyed by `context:version:token_id`.
    pub backend: TtlLruCache<String, String>,
}

impl TokenCaches {
    pub fn new(config: &CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            parsed: TtlLruCache::from_config("parsed_token", config, Arc::clone(&clock)),
            valid: TtlLruCache::from_config("valid_token", config, Arc::clone(&clock)),
            invalid: TtlLruCache::from_config("invalid_token", config, Arc::clone(&clock)),
            backend: TtlLruCache::from_config("backend_credential", config, clock),
        }
    }

    /// Drop every cached entry.
    pub fn clear(&self) {
        self.parsed.clear();
        self.valid.clear();
        self.invalid.clear();
        self.backend.clear();
    }
}
