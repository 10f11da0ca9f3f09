use lru::LruCache;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard};

/// Bounded, process-wide cache of loaded records, evicting least recently used entries.
pub struct RecordCache<K: Hash + Eq, V: Clone> {
    cache: Arc<Mutex<LruCache<K, V>>>,
}

impl<K: Hash + Eq, V: Clone> Clone for RecordCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
        }
    }
}

impl<K: Hash + Eq, V: Clone> RecordCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN.saturating_add(99));
        Self {
            cache: Arc::new(Mutex::new(LruCache::new(cap))),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<K, V>> {
        self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.lock().get(key).cloned()
    }

    /// Inserts `value` unless another caller cached one first; returns the cached value.
    pub fn insert_if_absent(&self, key: K, value: V) -> V {
        self.lock().get_or_insert(key, || value).clone()
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.lock().pop(key)
    }

    /// Drops every entry for which `evict` returns true. Returns how many were dropped.
    pub fn evict_where(&self, mut evict: impl FnMut(&K, &V) -> bool) -> usize
    where
        K: Clone,
    {
        let mut cache = self.lock();
        let doomed: Vec<K> = cache
            .iter()
            .filter(|(k, v)| evict(*k, *v))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &doomed {
            cache.pop(key);
        }
        doomed.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_lru() {
        let cache: RecordCache<u64, String> = RecordCache::new(2);

        cache.insert_if_absent(1, "one".to_string());
        cache.insert_if_absent(2, "two".to_string());

        // Touch 1 so that 2 becomes least recently used
        assert!(cache.get(&1).is_some());
        cache.insert_if_absent(3, "three".to_string());

        assert!(cache.get(&1).is_some());
        assert!(cache.get(&2).is_none());
        assert!(cache.get(&3).is_some());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_insert_if_absent_keeps_first_value() {
        let cache: RecordCache<u64, &str> = RecordCache::new(4);
        assert_eq!(cache.insert_if_absent(1, "first"), "first");
        assert_eq!(cache.insert_if_absent(1, "second"), "first");
    }

    #[test]
    fn test_evict_where() {
        let cache: RecordCache<u64, u64> = RecordCache::new(8);
        for i in 0..6 {
            cache.insert_if_absent(i, i * 10);
        }
        let evicted = cache.evict_where(|_, v| *v >= 30);
        assert_eq!(evicted, 3);
        assert_eq!(cache.len(), 3);
        assert!(cache.remove(&0).is_some());
        assert!(!cache.is_empty());
    }
}
