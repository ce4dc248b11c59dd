//! Per-rank local hash stores
//!
//! Two representations back the distributed containers: [`LocalMap`]
//! keeps one value per key (and doubles as the reduction/counting store
//! through [`LocalMap::merge`]), [`LocalMultiMap`] keeps a multiset of
//! values per key. Keys are expected to arrive already
//! store-transformed; the tables hash and compare them directly with a
//! seeded storage hasher.
//!
//! Invariants: `len` is the exact number of (key, value) records and
//! `unique_len` the number of distinct keys, both maintained across
//! every mutation.

use ahash::RandomState;
use std::collections::HashMap;
use std::hash::Hash;

/// Predicate over a stored record
pub type RecordPred<'p, K, V> = &'p dyn Fn(&K, &V) -> bool;

/// Operations the collective query paths need from a local store
pub trait LocalStore<K, V> {
    /// Exact number of (key, value) records
    fn len(&self) -> usize;

    /// Number of distinct keys
    fn unique_len(&self) -> usize;

    /// Whether the store holds no records
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ensure capacity for `additional` more records without rehashing
    /// mid-insert
    fn reserve(&mut self, additional: usize);

    /// Append all records matching `key` (and `pred`) to `out`; returns
    /// how many were appended
    fn find_into(&self, key: &K, pred: RecordPred<'_, K, V>, out: &mut Vec<(K, V)>) -> usize;

    /// Number of records matching `key` (and `pred`)
    fn count_key(&self, key: &K, pred: RecordPred<'_, K, V>) -> usize;

    /// Remove records matching `key` (and `pred`); returns how many
    /// were removed
    fn erase_key(&mut self, key: &K, pred: RecordPred<'_, K, V>) -> usize;

    /// Remove every record matching `pred`; returns how many were
    /// removed
    fn erase_where(&mut self, pred: RecordPred<'_, K, V>) -> usize;

    /// Snapshot of the distinct keys
    fn keys(&self) -> Vec<K>;
}

/// Single-valued local store (one value per key)
pub struct LocalMap<K, V> {
    inner: HashMap<K, V, RandomState>,
}

impl<K, V> LocalMap<K, V>
where
    K: Copy + Eq + Hash,
    V: Clone,
{
    /// Create a store using the given seeded storage hasher
    pub fn with_hasher(state: RandomState) -> Self {
        Self {
            inner: HashMap::with_hasher(state),
        }
    }

    /// Insert without overwriting; returns true if the key was new
    pub fn insert_first(&mut self, key: K, value: V) -> bool {
        match self.inner.entry(key) {
            std::collections::hash_map::Entry::Vacant(e) => {
                e.insert(value);
                true
            }
            std::collections::hash_map::Entry::Occupied(_) => false,
        }
    }

    /// Fold `value` into the entry for `key` with `combine(old, new)`;
    /// returns true if the key was new
    pub fn merge<F>(&mut self, key: K, value: V, combine: &F) -> bool
    where
        F: Fn(V, V) -> V,
    {
        match self.inner.entry(key) {
            std::collections::hash_map::Entry::Vacant(e) => {
                e.insert(value);
                true
            }
            std::collections::hash_map::Entry::Occupied(mut e) => {
                let old = e.get().clone();
                *e.get_mut() = combine(old, value);
                false
            }
        }
    }

    /// Look up the value stored for `key`
    pub fn get(&self, key: &K) -> Option<&V> {
        self.inner.get(key)
    }

    /// Take every record out of the store, leaving it empty
    pub fn drain_records(&mut self) -> Vec<(K, V)> {
        self.inner.drain().collect()
    }

    /// Iterate over the stored records
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.inner.iter()
    }
}

impl<K, V> LocalStore<K, V> for LocalMap<K, V>
where
    K: Copy + Eq + Hash,
    V: Clone,
{
    fn len(&self) -> usize {
        self.inner.len()
    }

    fn unique_len(&self) -> usize {
        self.inner.len()
    }

    fn reserve(&mut self, additional: usize) {
        self.inner.reserve(additional);
    }

    fn find_into(&self, key: &K, pred: RecordPred<'_, K, V>, out: &mut Vec<(K, V)>) -> usize {
        match self.inner.get(key) {
            Some(v) if pred(key, v) => {
                out.push((*key, v.clone()));
                1
            }
            _ => 0,
        }
    }

    fn count_key(&self, key: &K, pred: RecordPred<'_, K, V>) -> usize {
        match self.inner.get(key) {
            Some(v) if pred(key, v) => 1,
            _ => 0,
        }
    }

    fn erase_key(&mut self, key: &K, pred: RecordPred<'_, K, V>) -> usize {
        match self.inner.get(key) {
            Some(v) if pred(key, v) => {
                self.inner.remove(key);
                1
            }
            _ => 0,
        }
    }

    fn erase_where(&mut self, pred: RecordPred<'_, K, V>) -> usize {
        let before = self.inner.len();
        self.inner.retain(|k, v| !pred(k, v));
        before - self.inner.len()
    }

    fn keys(&self) -> Vec<K> {
        self.inner.keys().copied().collect()
    }
}

/// Multi-valued local store (a multiset of values per key)
///
/// Values of one key keep their insertion order; erasing a subset
/// preserves the relative order of the survivors.
pub struct LocalMultiMap<K, V> {
    inner: HashMap<K, Vec<V>, RandomState>,
    records: usize,
}

impl<K, V> LocalMultiMap<K, V>
where
    K: Copy + Eq + Hash,
    V: Clone,
{
    /// Create a store using the given seeded storage hasher
    pub fn with_hasher(state: RandomState) -> Self {
        Self {
            inner: HashMap::with_hasher(state),
            records: 0,
        }
    }

    /// Append a record; never deduplicates
    pub fn append(&mut self, key: K, value: V) {
        self.inner.entry(key).or_default().push(value);
        self.records += 1;
    }

    /// All values stored for `key`, in insertion order
    pub fn values_of(&self, key: &K) -> &[V] {
        self.inner.get(key).map(Vec::as_slice).unwrap_or(&[])
    }
}

impl<K, V> LocalStore<K, V> for LocalMultiMap<K, V>
where
    K: Copy + Eq + Hash,
    V: Clone,
{
    fn len(&self) -> usize {
        self.records
    }

    fn unique_len(&self) -> usize {
        self.inner.len()
    }

    fn reserve(&mut self, additional: usize) {
        self.inner.reserve(additional);
    }

    fn find_into(&self, key: &K, pred: RecordPred<'_, K, V>, out: &mut Vec<(K, V)>) -> usize {
        let mut found = 0;
        if let Some(values) = self.inner.get(key) {
            for v in values {
                if pred(key, v) {
                    out.push((*key, v.clone()));
                    found += 1;
                }
            }
        }
        found
    }

    fn count_key(&self, key: &K, pred: RecordPred<'_, K, V>) -> usize {
        self.inner
            .get(key)
            .map(|values| values.iter().filter(|v| pred(key, *v)).count())
            .unwrap_or(0)
    }

    fn erase_key(&mut self, key: &K, pred: RecordPred<'_, K, V>) -> usize {
        let Some(values) = self.inner.get_mut(key) else {
            return 0;
        };
        let before = values.len();
        values.retain(|v| !pred(key, v));
        let removed = before - values.len();
        if values.is_empty() {
            self.inner.remove(key);
        }
        self.records -= removed;
        removed
    }

    fn erase_where(&mut self, pred: RecordPred<'_, K, V>) -> usize {
        let mut removed = 0;
        self.inner.retain(|k, values| {
            let before = values.len();
            values.retain(|v| !pred(k, v));
            removed += before - values.len();
            !values.is_empty()
        });
        self.records -= removed;
        removed
    }

    fn keys(&self) -> Vec<K> {
        self.inner.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> RandomState {
        RandomState::with_seeds(1, 2, 3, 4)
    }

    fn all(_: &u64, _: &u64) -> bool {
        true
    }

    #[test]
    fn test_local_map_insert_first() {
        let mut map = LocalMap::with_hasher(state());
        assert!(map.insert_first(1u64, 10u64));
        assert!(!map.insert_first(1, 20));
        assert_eq!(map.get(&1), Some(&10));
        assert_eq!(map.len(), 1);
        assert_eq!(map.unique_len(), 1);
    }

    #[test]
    fn test_local_map_merge_argument_order() {
        let mut map = LocalMap::with_hasher(state());
        map.merge(1u64, 10u64, &|old, new| old * 100 + new);
        map.merge(1, 3, &|old, new| old * 100 + new);
        // combine must be called as combine(old, new)
        assert_eq!(map.get(&1), Some(&1003));
    }

    #[test]
    fn test_local_map_find_and_erase() {
        let mut map = LocalMap::with_hasher(state());
        map.insert_first(1u64, 10u64);
        map.insert_first(2, 20);

        let mut out = Vec::new();
        assert_eq!(map.find_into(&1, &all, &mut out), 1);
        assert_eq!(out, vec![(1, 10)]);
        assert_eq!(map.count_key(&3, &all), 0);

        assert_eq!(map.erase_key(&1, &all), 1);
        assert_eq!(map.erase_key(&1, &all), 0);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_local_map_erase_where() {
        let mut map = LocalMap::with_hasher(state());
        for i in 0..10u64 {
            map.insert_first(i, i);
        }
        let removed = map.erase_where(&|_, v| v % 2 == 0);
        assert_eq!(removed, 5);
        assert_eq!(map.len(), 5);
    }

    #[test]
    fn test_multimap_records_and_unique() {
        let mut map = LocalMultiMap::with_hasher(state());
        map.append(1u64, 10u64);
        map.append(1, 11);
        map.append(2, 20);
        assert_eq!(map.len(), 3);
        assert_eq!(map.unique_len(), 2);
    }

    #[test]
    fn test_multimap_find_equal_range() {
        let mut map = LocalMultiMap::with_hasher(state());
        map.append(1u64, 10u64);
        map.append(1, 11);
        map.append(1, 12);

        let mut out = Vec::new();
        assert_eq!(map.find_into(&1, &all, &mut out), 3);
        assert_eq!(out, vec![(1, 10), (1, 11), (1, 12)]);
        assert_eq!(map.count_key(&1, &all), 3);
    }

    #[test]
    fn test_multimap_erase_preserves_survivor_order() {
        let mut map = LocalMultiMap::with_hasher(state());
        for v in [10u64, 11, 12, 13] {
            map.append(1u64, v);
        }
        let removed = map.erase_key(&1, &|_, v| v % 2 == 1);
        assert_eq!(removed, 2);
        assert_eq!(map.values_of(&1), &[10, 12]);
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_multimap_erase_drops_empty_keys() {
        let mut map = LocalMultiMap::with_hasher(state());
        map.append(1u64, 10u64);
        assert_eq!(map.erase_key(&1, &all), 1);
        assert_eq!(map.unique_len(), 0);
        assert_eq!(map.len(), 0);
    }
}
