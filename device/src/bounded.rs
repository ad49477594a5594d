// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Bounded map
//!
//! Fixed-capacity key/value store evicting the oldest-inserted entry on
//! overflow. Eviction order is insertion order, not access order: an entry's
//! age is set the first time its key is inserted and traffic does not refresh
//! it. The eviction hook is wired at construction and fires synchronously
//! inside the insert that overflows, so dependent state can be cleared in the
//! same logical step with no window where it outlives the evicted entry.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

/// Called with the evicted entry, inside the overflowing insert.
pub type EvictHook<K, V> = Box<dyn FnMut(K, V) + Send + Sync>;

/// Fixed-capacity map with FIFO-by-insertion eviction.
pub struct BoundedMap<K, V>
where
    K: Eq + Hash + Clone,
{
    capacity: usize,
    entries: HashMap<K, V>,
    /// Keys in first-insertion order; front is evicted first.
    order: VecDeque<K>,
    on_evict: EvictHook<K, V>,
}

impl<K, V> BoundedMap<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Creates a map holding at most `capacity` entries (minimum 1). The hook
    /// fires once per evicted entry.
    pub fn new(capacity: usize, on_evict: EvictHook<K, V>) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: HashMap::new(),
            order: VecDeque::new(),
            on_evict,
        }
    }

    /// Inserts an entry, evicting the oldest one first when the map is full.
    /// Inserting an existing key replaces its value, keeps its original age and
    /// never evicts. Returns the replaced value, if any.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        if let Some(slot) = self.entries.get_mut(&key) {
            return Some(std::mem::replace(slot, value));
        }
        if self.entries.len() >= self.capacity {
            self.evict_oldest();
        }
        self.order.push_back(key.clone());
        self.entries.insert(key, value);
        None
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        self.entries.get_mut(key)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Removes an entry without firing the eviction hook.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let value = self.entries.remove(key)?;
        self.order.retain(|k| k != key);
        Some(value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Keys in eviction order, oldest first.
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.order.iter()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.order
            .iter()
            .filter_map(|k| self.entries.get_key_value(k))
    }

    fn evict_oldest(&mut self) {
        if let Some(key) = self.order.pop_front() {
            if let Some(value) = self.entries.remove(&key) {
                (self.on_evict)(key, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    use std::sync::{Arc, Mutex};

    fn tracking_map(
        capacity: usize,
    ) -> (BoundedMap<u32, &'static str>, Arc<Mutex<Vec<u32>>>) {
        let evicted = Arc::new(Mutex::new(Vec::new()));
        let hook_evicted = evicted.clone();
        let map = BoundedMap::new(
            capacity,
            Box::new(move |key, _value| {
                hook_evicted.lock().unwrap().push(key);
            }),
        );
        (map, evicted)
    }

    #[test]
    fn test_overflow_evicts_oldest_inserted() {
        let (mut map, evicted) = tracking_map(3);
        map.insert(1, "a");
        map.insert(2, "b");
        map.insert(3, "c");
        assert_eq!(map.len(), 3);
        assert!(evicted.lock().unwrap().is_empty());

        map.insert(4, "d");
        map.insert(5, "e");
        assert_eq!(map.len(), 3);
        assert_eq!(*evicted.lock().unwrap(), vec![1, 2]);
        assert_eq!(map.keys().copied().collect::<Vec<u32>>(), vec![3, 4, 5]);
    }

    #[test]
    fn test_reinsert_keeps_original_age() {
        let (mut map, evicted) = tracking_map(2);
        map.insert(1, "a");
        map.insert(2, "b");
        // Updating key 1 does not make it younger than 2.
        assert_eq!(map.insert(1, "a2"), Some("a"));
        map.insert(3, "c");
        assert_eq!(*evicted.lock().unwrap(), vec![1]);
    }

    #[test]
    fn test_remove_does_not_fire_hook() {
        let (mut map, evicted) = tracking_map(2);
        map.insert(1, "a");
        assert_eq!(map.remove(&1), Some("a"));
        assert_eq!(map.remove(&1), None);
        assert!(evicted.lock().unwrap().is_empty());
    }

    #[test]
    fn test_zero_capacity_clamped_to_one() {
        let (mut map, evicted) = tracking_map(0);
        assert_eq!(map.capacity(), 1);
        map.insert(1, "a");
        map.insert(2, "b");
        assert_eq!(map.len(), 1);
        assert_eq!(*evicted.lock().unwrap(), vec![1]);
    }
}
