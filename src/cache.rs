use std::sync::Mutex;

use indexmap::IndexMap;

use crate::chain::Hash;

/// Bounded LRU cache keyed by chain hash.
///
/// Insertion order doubles as recency order: hits are moved to the back,
/// eviction pops the front. A miss is never an error, only a refill.
pub struct LruCache<V> {
    inner: Mutex<IndexMap<Hash, V>>,
    capacity: usize,
}

impl<V: Clone> LruCache<V> {
    pub fn new(capacity: usize) -> Self {
        LruCache {
            inner: Mutex::new(IndexMap::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn get(&self, key: &Hash) -> Option<V> {
        let mut map = self.inner.lock().expect("cache lock");
        let value = map.shift_remove(key)?;
        map.insert(*key, value.clone());
        Some(value)
    }

    pub fn insert(&self, key: Hash, value: V) {
        if self.capacity == 0 {
            return;
        }

        let mut map = self.inner.lock().expect("cache lock");
        map.shift_remove(&key);
        if map.len() >= self.capacity {
            map.shift_remove_index(0);
        }
        map.insert(key, value);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("cache lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
