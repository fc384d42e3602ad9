//! Process-wide TTL caches with an injectable clock.
//!
//! Entries are advisory: losing them only costs a recomputation, and two
//! requests racing to fill the same key both succeed.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};

/// Source of "now" for TTL checks.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Instant>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Instant::now()),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock()
    }
}

struct Entry<V> {
    value: V,
    inserted_at: Instant,
}

/// Bounded map whose entries expire `ttl` after insertion.
pub struct TtlCache<K, V> {
    entries: RwLock<HashMap<K, Entry<V>>>,
    ttl: Duration,
    max_entries: usize,
    clock: Arc<dyn Clock>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn with_clock(ttl: Duration, max_entries: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
            max_entries: max_entries.max(1),
            clock,
        }
    }

    /// Returns a clone of the live value, if any. Expired entries read as
    /// misses and are left for the next insert to sweep.
    pub fn get(&self, key: &K) -> Option<V> {
        let now = self.clock.now();
        let entries = self.entries.read();
        entries
            .get(key)
            .filter(|e| now.duration_since(e.inserted_at) < self.ttl)
            .map(|e| e.value.clone())
    }

    pub fn insert(&self, key: K, value: V) {
        let now = self.clock.now();
        let mut entries = self.entries.write();

        if entries.len() >= self.max_entries && !entries.contains_key(&key) {
            entries.retain(|_, e| now.duration_since(e.inserted_at) < self.ttl);
            if entries.len() >= self.max_entries {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, e)| e.inserted_at)
                    .map(|(k, _)| k.clone());
                if let Some(k) = oldest {
                    entries.remove(&k);
                }
            }
        }

        entries.insert(
            key,
            Entry {
                value,
                inserted_at: now,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(ttl_secs: u64, max: usize) -> (TtlCache<String, u32>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let cache = TtlCache::with_clock(Duration::from_secs(ttl_secs), max, clock.clone());
        (cache, clock)
    }

    #[test]
    fn test_hit_before_expiry() {
        let (cache, clock) = cache(60, 10);
        cache.insert("a".to_string(), 1);
        clock.advance(Duration::from_secs(59));
        assert_eq!(cache.get(&"a".to_string()), Some(1));
    }

    #[test]
    fn test_miss_after_expiry() {
        let (cache, clock) = cache(60, 10);
        cache.insert("a".to_string(), 1);
        clock.advance(Duration::from_secs(60));
        assert_eq!(cache.get(&"a".to_string()), None);
    }

    #[test]
    fn test_reinsert_refreshes_ttl() {
        let (cache, clock) = cache(60, 10);
        cache.insert("a".to_string(), 1);
        clock.advance(Duration::from_secs(50));
        cache.insert("a".to_string(), 2);
        clock.advance(Duration::from_secs(50));
        assert_eq!(cache.get(&"a".to_string()), Some(2));
    }

    #[test]
    fn test_capacity_evicts_expired_first_then_oldest() {
        let (cache, clock) = cache(60, 2);
        cache.insert("old".to_string(), 1);
        clock.advance(Duration::from_secs(61));
        cache.insert("b".to_string(), 2);
        clock.advance(Duration::from_secs(1));
        cache.insert("c".to_string(), 3);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&"old".to_string()), None);

        clock.advance(Duration::from_secs(1));
        cache.insert("d".to_string(), 4);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&"b".to_string()), None);
        assert_eq!(cache.get(&"d".to_string()), Some(4));
    }

    #[test]
    fn test_clear() {
        let (cache, _) = cache(60, 10);
        cache.insert("a".to_string(), 1);
        cache.clear();
        assert!(cache.is_empty());
    }
}
