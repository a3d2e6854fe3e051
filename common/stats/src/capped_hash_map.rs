use std::{borrow::Borrow, hash::Hash};

use indexmap::IndexMap;
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("map is full: at most {max_elements} distinct keys are tracked")]
pub struct CapacityExceeded {
    pub max_elements: usize,
}

/**
 * A HashMap with a hard limit on the number of distinct keys.
 *
 * Unlike an LRU map a full CappedHashMap never evicts anything: inserting a new key
 * fails with `CapacityExceeded` while existing keys can still be updated. This keeps
 * memory bounded when the keys come from untrusted input (user-agent strings, random
 * hostnames, ...) without losing the counts we already have.
 *
 * Iteration order is insertion order.
 */
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct CappedHashMap<K: Hash + Eq, V> {
    map: IndexMap<K, V>,
    #[serde(skip)]
    max_elements: usize,
    /// Number of inserts refused because the map was full
    #[serde(skip)]
    rejected: u64,
}

impl<K: Hash + Eq, V> CappedHashMap<K, V> {
    pub fn new(max_elements: usize) -> Self {
        CappedHashMap {
            map: IndexMap::new(),
            max_elements,
            rejected: 0,
        }
    }

    /// Return the value for `key`, inserting `default()` if the key is new.
    /// Fails if the key is new and the map is already full.
    pub fn get_or_insert_with<F: FnOnce() -> V>(
        &mut self,
        key: K,
        default: F,
    ) -> Result<&mut V, CapacityExceeded> {
        if !self.map.contains_key(&key) && self.map.len() >= self.max_elements {
            self.rejected += 1;
            return Err(CapacityExceeded {
                max_elements: self.max_elements,
            });
        }
        Ok(self.map.entry(key).or_insert_with(default))
    }

    /// Insert or replace. Returns the previous value, if any.
    pub fn try_insert(&mut self, key: K, value: V) -> Result<Option<V>, CapacityExceeded> {
        if !self.map.contains_key(&key) && self.map.len() >= self.max_elements {
            self.rejected += 1;
            return Err(CapacityExceeded {
                max_elements: self.max_elements,
            });
        }
        Ok(self.map.insert(key, value))
    }

    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.map.get(key)
    }

    pub fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.map.get_mut(key)
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.map.contains_key(key)
    }

    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.map.shift_remove(key)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.map.len() >= self.max_elements
    }

    pub fn max_elements(&self) -> usize {
        self.max_elements
    }

    pub fn rejected(&self) -> u64 {
        self.rejected
    }

    pub fn iter(&self) -> indexmap::map::Iter<'_, K, V> {
        self.map.iter()
    }

    pub fn iter_mut(&mut self) -> indexmap::map::IterMut<'_, K, V> {
        self.map.iter_mut()
    }

    pub fn keys(&self) -> indexmap::map::Keys<'_, K, V> {
        self.map.keys()
    }

    pub fn values(&self) -> indexmap::map::Values<'_, K, V> {
        self.map.values()
    }

    pub fn values_mut(&mut self) -> indexmap::map::ValuesMut<'_, K, V> {
        self.map.values_mut()
    }

    /// Drop all entries. The capacity stays, the rejected counter is reset.
    pub fn clear(&mut self) {
        self.map.clear();
        self.rejected = 0;
    }
}

impl<'a, K: Hash + Eq, V> IntoIterator for &'a CappedHashMap<K, V> {
    type Item = (&'a K, &'a V);
    type IntoIter = indexmap::map::Iter<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.map.iter()
    }
}
