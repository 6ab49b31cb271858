//! ChainedHashMap: orchestration of the element store and the bucket index,
//! plus the grow-by-doubling rehash policy.

use crate::bucket_index::BucketIndex;
use crate::element_store::{ElementStore, Handle, IntoIter, Iter, IterMut};
use crate::error::KeyNotFoundError;
use core::borrow::Borrow;
use core::fmt;
use core::hash::{BuildHasher, Hash};
use core::iter::FusedIterator;
use core::ops::Index;
use core::sync::atomic::{AtomicU64, Ordering};
use hashbrown::hash_map::DefaultHashBuilder;
use slotmap::DefaultKey;

/// Smallest table a map can start from; `clear` never goes below this.
const MIN_TABLE_SIZE: usize = 1;

/// Source of per-map ids stamped into every `Handle` a map hands out.
static NEXT_MAP_ID: AtomicU64 = AtomicU64::new(0);

/// Insertion-ordered hash map using separate chaining.
///
/// Lookups, insertions and removals are expected O(1) amortized. The table
/// doubles whenever the number of entries would exceed the number of buckets
/// and never shrinks, except that [`clear`](Self::clear) returns it to its
/// initial size.
///
/// `insert` keeps the first value written for a key; later inserts of the
/// same key are ignored. Use [`get_mut`](Self::get_mut),
/// [`get_or_insert_default`](Self::get_or_insert_default) or a [`Handle`] to
/// update a stored value.
pub struct ChainedHashMap<K, V, S = DefaultHashBuilder> {
    hasher: S,
    store: ElementStore<K, V>,
    index: BucketIndex,
    initial_table_size: usize,
    owner: u64,
}

impl Handle {
    pub fn key<'a, K, V, S>(&self, map: &'a ChainedHashMap<K, V, S>) -> Option<&'a K> {
        map.store.key(map.slot_of(*self)?)
    }

    pub fn value<'a, K, V, S>(&self, map: &'a ChainedHashMap<K, V, S>) -> Option<&'a V> {
        map.store.value(map.slot_of(*self)?)
    }

    pub fn value_mut<'a, K, V, S>(&self, map: &'a mut ChainedHashMap<K, V, S>) -> Option<&'a mut V> {
        let slot = map.slot_of(*self)?;
        map.store.value_mut(slot)
    }

    /// Whether the entry behind this handle is still in `map`. Always `false`
    /// for a handle issued by a different map.
    pub fn is_live<K, V, S>(&self, map: &ChainedHashMap<K, V, S>) -> bool {
        map.slot_of(*self).is_some_and(|slot| map.store.contains(slot))
    }
}

impl<K, V> ChainedHashMap<K, V>
where
    K: Eq + Hash,
{
    pub fn new() -> Self {
        Self::with_hasher(Default::default())
    }

    /// Start with a table of at least `capacity` buckets (rounded up to a
    /// power of two). That size is also what `clear` restores.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_capacity_and_hasher(capacity, Default::default())
    }
}

impl<K, V, S> Default for ChainedHashMap<K, V, S>
where
    K: Eq + Hash,
    S: Default,
{
    fn default() -> Self {
        Self::with_hasher(S::default())
    }
}

impl<K, V, S> ChainedHashMap<K, V, S> {
    pub fn with_hasher(hasher: S) -> Self {
        Self::with_capacity_and_hasher(MIN_TABLE_SIZE, hasher)
    }

    pub fn with_capacity_and_hasher(capacity: usize, hasher: S) -> Self {
        let initial_table_size = capacity.max(MIN_TABLE_SIZE).next_power_of_two();
        Self {
            hasher,
            store: ElementStore::new(),
            index: BucketIndex::new(initial_table_size),
            initial_table_size,
            owner: NEXT_MAP_ID.fetch_add(1, Ordering::Relaxed),
        }
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Current number of buckets. Always a power of two and `>= len()`.
    pub fn table_size(&self) -> usize {
        self.index.table_size()
    }

    /// The hasher this map was built with.
    pub fn hash_function(&self) -> &S {
        &self.hasher
    }

    /// Alias of [`hash_function`](Self::hash_function), named like the std maps.
    pub fn hasher(&self) -> &S {
        &self.hasher
    }

    pub fn iter(&self) -> Iter<'_, K, V> {
        self.store.iter()
    }

    /// Unlike [`iter`](Self::iter), this allocates an O(n) side table of
    /// per-entry borrows before yielding anything.
    pub fn iter_mut(&mut self) -> IterMut<'_, K, V> {
        self.store.iter_mut()
    }

    pub fn keys(&self) -> Keys<'_, K, V> {
        Keys { inner: self.iter() }
    }

    pub fn values(&self) -> Values<'_, K, V> {
        Values { inner: self.iter() }
    }

    /// Allocates like [`iter_mut`](Self::iter_mut).
    pub fn values_mut(&mut self) -> ValuesMut<'_, K, V> {
        ValuesMut {
            inner: self.iter_mut(),
        }
    }

    /// Remove every entry and return the table to its initial size.
    /// All outstanding handles become stale.
    pub fn clear(&mut self) {
        self.store.clear();
        self.index.reset(self.initial_table_size);
        log::trace!(
            "cleared map; table reset to {} buckets",
            self.initial_table_size
        );
    }

    /// Remove the entry behind `handle` using its cached hash; the key is not rehashed.
    /// Returns `None` for a stale handle or one issued by another map.
    pub fn remove_handle(&mut self, handle: Handle) -> Option<(K, V)> {
        let slot = self.slot_of(handle)?;
        let hash = self.store.hash_of(slot)?;
        let unlinked = self.index.unlink(hash, slot);
        debug_assert!(unlinked, "live entry missing from its routed bucket");
        self.store.remove(slot)
    }

    /// Chain length of every bucket, in bucket order.
    #[cfg(feature = "bench_internal")]
    pub fn bucket_lengths(&self) -> impl Iterator<Item = usize> + '_ {
        self.index.chain_lengths()
    }

    /// Slot behind `handle`, if this map issued it. Liveness is not checked.
    fn slot_of(&self, handle: Handle) -> Option<DefaultKey> {
        (handle.owner() == self.owner).then(|| handle.raw_handle())
    }

    fn handle(&self, slot: DefaultKey) -> Handle {
        Handle::new(self.owner, slot)
    }

    /// Entry is appended, linked, counted, and only then the resize check runs,
    /// so the new entry is re-routed along with the rest.
    fn push_entry(&mut self, hash: u64, key: K, value: V) -> DefaultKey {
        let slot = self.store.push_back(hash, key, value);
        self.index.link(hash, slot);
        self.grow_if_needed();
        slot
    }

    fn grow_if_needed(&mut self) {
        let table_size = self.index.table_size();
        if self.store.len() <= table_size {
            return;
        }
        let new_size = table_size * 2;
        self.index.rebuild(new_size, self.store.hashed_slots());
        log::trace!(
            "rehashed {} entries: {} -> {} buckets",
            self.store.len(),
            table_size,
            new_size
        );
    }

    /// Structural checks shared by the unit and property tests.
    #[cfg(test)]
    pub(crate) fn assert_invariants(&self) {
        let table_size = self.index.table_size();
        assert!(table_size.is_power_of_two());
        assert!(table_size >= self.initial_table_size);
        assert!(self.len() <= table_size, "load factor above 1");
        assert_eq!(self.iter().count(), self.len());
        assert_eq!(self.index.chain_lengths().sum::<usize>(), self.len());
        for (slot, hash) in self.store.hashed_slots() {
            let chain = self.index.chain(self.index.route(hash));
            assert_eq!(
                chain.iter().filter(|&&s| s == slot).count(),
                1,
                "entry must sit exactly once in its routed bucket"
            );
        }
    }
}

impl<K, V, S> ChainedHashMap<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    fn make_hash<Q>(&self, q: &Q) -> u64
    where
        Q: ?Sized + Hash,
    {
        self.hasher.hash_one(q)
    }

    fn lookup<Q>(&self, hash: u64, q: &Q) -> Option<DefaultKey>
    where
        K: Borrow<Q>,
        Q: ?Sized + Eq,
    {
        let store = &self.store;
        self.index.lookup(hash, |slot| {
            store
                .key(slot)
                .map(|k| k.borrow() == q)
                .unwrap_or(false)
        })
    }

    /// Insert `key -> value` unless `key` is already present.
    ///
    /// Returns `true` if a new entry was created. On a duplicate the stored
    /// value is left untouched and `value` is dropped.
    pub fn insert(&mut self, key: K, value: V) -> bool {
        let hash = self.make_hash(&key);
        if self.lookup(hash, &key).is_some() {
            return false;
        }
        self.push_entry(hash, key, value);
        true
    }

    /// Return the handle for `key`, inserting `default()` first if absent.
    /// `default` only runs when a new entry is created.
    pub fn insert_with<F>(&mut self, key: K, default: F) -> Handle
    where
        F: FnOnce() -> V,
    {
        let slot = self.slot_or_insert_with(key, default);
        self.handle(slot)
    }

    /// Mutable access to the value for `key`, inserting `V::default()` if absent.
    pub fn get_or_insert_default(&mut self, key: K) -> &mut V
    where
        V: Default,
    {
        let slot = self.slot_or_insert_with(key, V::default);
        self.store.live_value_mut(slot)
    }

    /// Live slot for `key`, appending `default()` first if absent.
    fn slot_or_insert_with<F>(&mut self, key: K, default: F) -> DefaultKey
    where
        F: FnOnce() -> V,
    {
        let hash = self.make_hash(&key);
        match self.lookup(hash, &key) {
            Some(slot) => slot,
            None => self.push_entry(hash, key, default()),
        }
    }

    /// Locate `q`; `None` plays the role of the end position.
    pub fn find<Q>(&self, q: &Q) -> Option<Handle>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let hash = self.make_hash(q);
        self.lookup(hash, q).map(|slot| self.handle(slot))
    }

    pub fn contains_key<Q>(&self, q: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.find(q).is_some()
    }

    pub fn get<Q>(&self, q: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let hash = self.make_hash(q);
        let slot = self.lookup(hash, q)?;
        self.store.value(slot)
    }

    pub fn get_mut<Q>(&mut self, q: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let hash = self.make_hash(q);
        let slot = self.lookup(hash, q)?;
        self.store.value_mut(slot)
    }

    pub fn get_key_value<Q>(&self, q: &Q) -> Option<(&K, &V)>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let hash = self.make_hash(q);
        let slot = self.lookup(hash, q)?;
        self.store.key_value(slot)
    }

    /// Like [`get`](Self::get), but an absent key is an error. Never inserts.
    pub fn at<Q>(&self, q: &Q) -> Result<&V, KeyNotFoundError>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.get(q).ok_or(KeyNotFoundError)
    }

    pub fn at_mut<Q>(&mut self, q: &Q) -> Result<&mut V, KeyNotFoundError>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.get_mut(q).ok_or(KeyNotFoundError)
    }

    /// Remove `q` and return its value. Absent keys are a no-op.
    pub fn remove<Q>(&mut self, q: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.remove_entry(q).map(|(_, v)| v)
    }

    pub fn remove_entry<Q>(&mut self, q: &Q) -> Option<(K, V)>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let hash = self.make_hash(q);
        let slot = self.lookup(hash, q)?;
        let unlinked = self.index.unlink(hash, slot);
        debug_assert!(unlinked, "live entry missing from its routed bucket");
        self.store.remove(slot)
    }

    /// Make `self` a copy of `other`: take its hasher, drop current contents
    /// (table back to the initial size), then insert `other`'s entries in
    /// `other`'s order.
    pub fn assign(&mut self, other: &Self)
    where
        K: Clone,
        V: Clone,
        S: Clone,
    {
        self.hasher = other.hasher.clone();
        self.clear();
        for (k, v) in other.iter() {
            self.insert(k.clone(), v.clone());
        }
    }
}

impl<K, V, S> Clone for ChainedHashMap<K, V, S>
where
    K: Eq + Hash + Clone,
    V: Clone,
    S: BuildHasher + Clone,
{
    fn clone(&self) -> Self {
        let mut m = Self::with_capacity_and_hasher(self.initial_table_size, self.hasher.clone());
        for (k, v) in self.iter() {
            m.insert(k.clone(), v.clone());
        }
        m
    }

    fn clone_from(&mut self, source: &Self) {
        self.assign(source);
    }
}

impl<K, V, S> fmt::Debug for ChainedHashMap<K, V, S>
where
    K: fmt::Debug,
    V: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

/// Same key set with equal values; insertion order is not compared.
impl<K, V, S> PartialEq for ChainedHashMap<K, V, S>
where
    K: Eq + Hash,
    V: PartialEq,
    S: BuildHasher,
{
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .iter()
                .all(|(k, v)| other.get(k).map(|ov| v == ov).unwrap_or(false))
    }
}

impl<K, V, S> Eq for ChainedHashMap<K, V, S>
where
    K: Eq + Hash,
    V: Eq,
    S: BuildHasher,
{
}

impl<K, Q, V, S> Index<&Q> for ChainedHashMap<K, V, S>
where
    K: Eq + Hash + Borrow<Q>,
    Q: ?Sized + Eq + Hash,
    S: BuildHasher,
{
    type Output = V;

    /// Panics if the key is absent; use [`ChainedHashMap::at`] to get an error instead.
    fn index(&self, key: &Q) -> &V {
        match self.at(key) {
            Ok(v) => v,
            Err(e) => panic!("{e}"),
        }
    }
}

impl<K, V, S> Extend<(K, V)> for ChainedHashMap<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (k, v) in iter {
            self.insert(k, v);
        }
    }
}

/// Equivalent to repeated `insert`: the first occurrence of a key wins.
impl<K, V, S> FromIterator<(K, V)> for ChainedHashMap<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher + Default,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut m = Self::with_hasher(S::default());
        m.extend(iter);
        m
    }
}

impl<K, V, const N: usize> From<[(K, V); N]> for ChainedHashMap<K, V>
where
    K: Eq + Hash,
{
    fn from(arr: [(K, V); N]) -> Self {
        Self::from_iter(arr)
    }
}

impl<K, V, S> IntoIterator for ChainedHashMap<K, V, S> {
    type Item = (K, V);
    type IntoIter = IntoIter<K, V>;

    fn into_iter(self) -> IntoIter<K, V> {
        IntoIter { store: self.store }
    }
}

impl<'a, K, V, S> IntoIterator for &'a ChainedHashMap<K, V, S> {
    type Item = (&'a K, &'a V);
    type IntoIter = Iter<'a, K, V>;

    fn into_iter(self) -> Iter<'a, K, V> {
        self.iter()
    }
}

/// Allocates like [`ChainedHashMap::iter_mut`].
impl<'a, K, V, S> IntoIterator for &'a mut ChainedHashMap<K, V, S> {
    type Item = (&'a K, &'a mut V);
    type IntoIter = IterMut<'a, K, V>;

    fn into_iter(self) -> IterMut<'a, K, V> {
        self.iter_mut()
    }
}

/// Keys in insertion order.
pub struct Keys<'a, K, V> {
    inner: Iter<'a, K, V>,
}

impl<K, V> Clone for Keys<'_, K, V> {
    fn clone(&self) -> Self {
        Keys {
            inner: self.inner.clone(),
        }
    }
}

impl<'a, K, V> Iterator for Keys<'a, K, V> {
    type Item = &'a K;

    #[inline]
    fn next(&mut self) -> Option<&'a K> {
        self.inner.next().map(|(k, _)| k)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<K, V> DoubleEndedIterator for Keys<'_, K, V> {
    fn next_back(&mut self) -> Option<Self::Item> {
        self.inner.next_back().map(|(k, _)| k)
    }
}

impl<K, V> ExactSizeIterator for Keys<'_, K, V> {}
impl<K, V> FusedIterator for Keys<'_, K, V> {}

/// Values in insertion order.
pub struct Values<'a, K, V> {
    inner: Iter<'a, K, V>,
}

impl<K, V> Clone for Values<'_, K, V> {
    fn clone(&self) -> Self {
        Values {
            inner: self.inner.clone(),
        }
    }
}

impl<'a, K, V> Iterator for Values<'a, K, V> {
    type Item = &'a V;

    #[inline]
    fn next(&mut self) -> Option<&'a V> {
        self.inner.next().map(|(_, v)| v)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<K, V> DoubleEndedIterator for Values<'_, K, V> {
    fn next_back(&mut self) -> Option<Self::Item> {
        self.inner.next_back().map(|(_, v)| v)
    }
}

impl<K, V> ExactSizeIterator for Values<'_, K, V> {}
impl<K, V> FusedIterator for Values<'_, K, V> {}

/// Mutable values in insertion order.
pub struct ValuesMut<'a, K, V> {
    inner: IterMut<'a, K, V>,
}

impl<'a, K, V> Iterator for ValuesMut<'a, K, V> {
    type Item = &'a mut V;

    #[inline]
    fn next(&mut self) -> Option<&'a mut V> {
        self.inner.next().map(|(_, v)| v)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<K, V> DoubleEndedIterator for ValuesMut<'_, K, V> {
    fn next_back(&mut self) -> Option<Self::Item> {
        self.inner.next_back().map(|(_, v)| v)
    }
}

impl<K, V> ExactSizeIterator for ValuesMut<'_, K, V> {}
impl<K, V> FusedIterator for ValuesMut<'_, K, V> {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::collections::hash_map::RandomState;

    #[derive(Clone, Default)]
    struct ConstBuildHasher;
    struct ConstHasher;
    impl BuildHasher for ConstBuildHasher {
        type Hasher = ConstHasher;
        fn build_hasher(&self) -> Self::Hasher {
            ConstHasher
        }
    }
    impl core::hash::Hasher for ConstHasher {
        fn write(&mut self, _bytes: &[u8]) {}
        fn finish(&self) -> u64 {
            0
        } // every key lands in bucket 0
    }

    /// Hashes a `u64` to itself, so bucket placement is predictable.
    #[derive(Clone, Default)]
    struct IdentityBuildHasher;
    #[derive(Default)]
    struct IdentityHasher(u64);
    impl BuildHasher for IdentityBuildHasher {
        type Hasher = IdentityHasher;
        fn build_hasher(&self) -> Self::Hasher {
            IdentityHasher(0)
        }
    }
    impl core::hash::Hasher for IdentityHasher {
        fn write(&mut self, bytes: &[u8]) {
            for &b in bytes {
                self.0 = (self.0 << 8) | u64::from(b);
            }
        }
        fn write_u64(&mut self, n: u64) {
            self.0 = n;
        }
        fn finish(&self) -> u64 {
            self.0
        }
    }

    fn pairs<K: Clone, V: Clone>(m: &ChainedHashMap<K, V, impl BuildHasher>) -> Vec<(K, V)> {
        m.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }

    /// Invariant: duplicate insert is ignored (first write wins); erase keeps the
    /// relative order of what remains.
    #[test]
    fn first_write_wins_then_erase() {
        let mut m: ChainedHashMap<&str, i32> = ChainedHashMap::new();
        assert!(m.insert("a", 1));
        assert!(m.insert("b", 2));
        assert!(!m.insert("a", 99));
        assert_eq!(m.len(), 2);
        assert_eq!(m.at("a"), Ok(&1));
        assert_eq!(pairs(&m), vec![("a", 1), ("b", 2)]);

        assert_eq!(m.remove("a"), Some(1));
        assert_eq!(m.len(), 1);
        assert!(m.find("a").is_none());
        assert_eq!(pairs(&m), vec![("b", 2)]);
        m.assert_invariants();
    }

    /// Invariant: a fresh map with n inserts has the smallest power-of-two table >= n.
    #[test_log::test]
    fn table_size_is_smallest_power_of_two_covering_len() {
        for (n, expected) in [(0, 1), (1, 1), (2, 2), (3, 4), (5, 8), (100, 128), (128, 128), (129, 256)] {
            let mut m: ChainedHashMap<u32, u32> = ChainedHashMap::new();
            for i in 0..n {
                m.insert(i, i);
            }
            assert_eq!(m.len(), n as usize);
            assert_eq!(m.table_size(), expected, "after {n} inserts");
            m.assert_invariants();
        }
    }

    /// Invariant: resize triggers exactly when len would exceed the table size.
    #[test_log::test]
    fn resize_points_follow_doubling() {
        let mut m: ChainedHashMap<u32, ()> = ChainedHashMap::new();
        let mut growth = Vec::new();
        let mut last = m.table_size();
        for i in 0..64 {
            m.insert(i, ());
            if m.table_size() != last {
                growth.push((m.len(), m.table_size()));
                last = m.table_size();
            }
        }
        assert_eq!(
            growth,
            vec![(2, 2), (3, 4), (5, 8), (9, 16), (17, 32), (33, 64)]
        );
    }

    /// Invariant: removals never shrink the table; duplicates never grow it.
    #[test]
    fn erase_and_duplicates_leave_table_size_alone() {
        let mut m: ChainedHashMap<u32, u32> = ChainedHashMap::new();
        for i in 0..9 {
            m.insert(i, i);
        }
        assert_eq!(m.table_size(), 16);
        for i in 0..9 {
            m.remove(&i);
        }
        assert!(m.is_empty());
        assert_eq!(m.table_size(), 16);
        for _ in 0..3 {
            m.insert(7, 0);
            m.insert(7, 1);
        }
        assert_eq!(m.table_size(), 16);
        assert_eq!(m.get(&7), Some(&0));
        m.assert_invariants();
    }

    /// Invariant: after clear, the map regrows at the same counts as a fresh one.
    #[test_log::test]
    fn clear_resets_capacity() {
        let mut m: ChainedHashMap<u32, u32> = ChainedHashMap::new();
        for i in 0..100 {
            m.insert(i, i);
        }
        let h = m.find(&5).unwrap();
        m.clear();
        assert_eq!(m.len(), 0);
        assert!(m.is_empty());
        assert_eq!(m.iter().count(), 0);
        assert_eq!(m.table_size(), 1);
        assert!(!h.is_live(&m), "clear invalidates handles");

        let mut fresh: ChainedHashMap<u32, u32> = ChainedHashMap::new();
        for i in 0..40 {
            m.insert(i, i);
            fresh.insert(i, i);
            assert_eq!(m.table_size(), fresh.table_size());
        }
        m.assert_invariants();
    }

    /// Invariant: with_capacity fixes the initial table size that clear restores.
    #[test]
    fn with_capacity_sets_initial_table() {
        let mut m: ChainedHashMap<u32, u32> = ChainedHashMap::with_capacity(10);
        assert_eq!(m.table_size(), 16);
        for i in 0..16 {
            m.insert(i, i);
        }
        assert_eq!(m.table_size(), 16, "no growth while len <= table size");
        m.insert(16, 16);
        assert_eq!(m.table_size(), 32);
        m.clear();
        assert_eq!(m.table_size(), 16);
        assert_eq!(ChainedHashMap::<u8, u8>::with_capacity(0).table_size(), 1);
    }

    /// Invariant: handles survive inserts and rehashes of other keys and keep
    /// pointing at the same value storage.
    #[test]
    fn handles_stable_across_resizes() {
        let mut m: ChainedHashMap<String, i32> = ChainedHashMap::new();
        m.insert("anchor".to_string(), 7);
        let h = m.find("anchor").unwrap();
        let before = m.table_size();
        for i in 0..500 {
            m.insert(format!("k{i}"), i);
        }
        assert!(m.table_size() > before);
        assert_eq!(h.value(&m), Some(&7));
        *h.value_mut(&mut m).unwrap() = 8;
        assert_eq!(m.get("anchor"), Some(&8));
        assert_eq!(m.find("anchor"), Some(h));

        for i in 0..500 {
            m.remove(&format!("k{i}"));
        }
        assert_eq!(h.key(&m).map(String::as_str), Some("anchor"));
        m.assert_invariants();
    }

    /// Invariant: removing by handle unlinks from both structures and the
    /// handle goes stale without aliasing a later entry.
    #[test]
    fn remove_handle_and_stale_handles() {
        let mut m: ChainedHashMap<&str, i32> = ChainedHashMap::new();
        let h = m.insert_with("x", || 1);
        m.insert("y", 2);
        assert_eq!(m.remove_handle(h), Some(("x", 1)));
        assert_eq!(m.remove_handle(h), None);
        assert!(!m.contains_key("x"));
        let h2 = m.insert_with("z", || 3);
        assert_ne!(h, h2);
        assert!(h.value(&m).is_none());
        assert_eq!(pairs(&m), vec![("y", 2), ("z", 3)]);
        m.assert_invariants();
    }

    /// Invariant: a handle only resolves in the map that issued it; a clone
    /// or an unrelated map with a reused slot sees `None`.
    #[test]
    fn handles_are_bound_to_their_map() {
        let mut a: ChainedHashMap<&str, i32> = ChainedHashMap::new();
        let mut b: ChainedHashMap<&str, i32> = ChainedHashMap::new();
        let ha = a.insert_with("alpha", || 1);
        let hb = b.insert_with("beta", || 2);
        assert_eq!(ha.raw_handle(), hb.raw_handle(), "same slot in both arenas");
        assert_ne!(ha, hb);

        assert_eq!(ha.key(&b), None);
        assert_eq!(ha.value(&b), None);
        assert_eq!(ha.value_mut(&mut b), None);
        assert!(!ha.is_live(&b));
        assert_eq!(b.remove_handle(ha), None);
        assert_eq!(b.get("beta"), Some(&2));

        let c = a.clone();
        assert_eq!(ha.value(&c), None);
        assert_eq!(c.find("alpha").and_then(|h| h.value(&c)), Some(&1));

        a.assign(&c);
        let h = a.find("alpha").unwrap();
        assert_eq!(h.value(&a), Some(&1));
        assert_eq!(a.remove_handle(h), Some(("alpha", 1)));
        a.assert_invariants();
        b.assert_invariants();
    }

    /// Invariant: `at` fails without inserting; index access inserts a default.
    #[test]
    fn at_and_get_or_insert_default() {
        let mut m: ChainedHashMap<String, Vec<u8>> = ChainedHashMap::new();
        assert_eq!(m.at("missing"), Err(KeyNotFoundError));
        assert!(m.at_mut("missing").is_err());
        assert!(m.is_empty(), "at never inserts");

        m.get_or_insert_default("k".to_string()).push(1);
        m.get_or_insert_default("k".to_string()).push(2);
        assert_eq!(m.at("k"), Ok(&vec![1, 2]));
        assert_eq!(m.len(), 1);

        m.at_mut("k").unwrap().clear();
        assert_eq!(m["k"], Vec::<u8>::new());
    }

    #[test]
    #[should_panic(expected = "key not found in map")]
    fn index_panics_on_missing_key() {
        let m: ChainedHashMap<u32, u32> = ChainedHashMap::new();
        let _ = m[&1];
    }

    /// Invariant: `insert_with` runs its closure only when the key is absent.
    #[test]
    fn insert_with_is_lazy() {
        let mut m: ChainedHashMap<&str, i32> = ChainedHashMap::new();
        let calls = Cell::new(0);
        let h1 = m.insert_with("k", || {
            calls.set(calls.get() + 1);
            1
        });
        let h2 = m.insert_with("k", || {
            calls.set(calls.get() + 1);
            2
        });
        assert_eq!(calls.get(), 1);
        assert_eq!(h1, h2);
        assert_eq!(h1.value(&m), Some(&1));
    }

    /// Invariant: under total collision, equality alone resolves entries.
    #[test]
    fn collisions_resolved_by_equality() {
        let mut m: ChainedHashMap<String, usize, ConstBuildHasher> =
            ChainedHashMap::with_hasher(ConstBuildHasher);
        for i in 0..20 {
            m.insert(format!("k{i}"), i);
        }
        assert_eq!(m.table_size(), 32);
        for i in 0..20 {
            assert_eq!(m.get(format!("k{i}").as_str()), Some(&i));
        }
        for i in (0..20).step_by(2) {
            assert_eq!(m.remove(format!("k{i}").as_str()), Some(i));
        }
        assert_eq!(
            m.keys().cloned().collect::<Vec<_>>(),
            (1..20).step_by(2).map(|i| format!("k{i}")).collect::<Vec<_>>()
        );
        m.assert_invariants();
    }

    /// Invariant: entries route to `hash mod table_size` across rehashes.
    #[test]
    fn routing_uses_hash_mod_table_size() {
        let mut m: ChainedHashMap<u64, (), IdentityBuildHasher> =
            ChainedHashMap::with_hasher(IdentityBuildHasher);
        for k in [3u64, 11, 19, 4] {
            m.insert(k, ());
        }
        assert_eq!(m.table_size(), 4);
        let slot = m.find(&11).unwrap().raw_handle();
        assert_eq!(m.index.route(11), 3);
        assert!(m.index.chain(3).contains(&slot));
        m.assert_invariants();
    }

    /// Invariant: assign copies hasher and contents in the source's order and
    /// discards previous contents.
    #[test]
    fn assign_and_clone_from_copy_in_order() {
        let src: ChainedHashMap<&str, i32> = [("c", 3), ("a", 1), ("b", 2)].into();
        let mut dst: ChainedHashMap<&str, i32> = [("z", 26)].into();
        dst.assign(&src);
        assert_eq!(pairs(&dst), vec![("c", 3), ("a", 1), ("b", 2)]);
        assert!(!dst.contains_key("z"));
        // Same hasher state means identical hashes for identical keys.
        assert_eq!(
            dst.hash_function().hash_one("a"),
            src.hash_function().hash_one("a")
        );

        let mut other: ChainedHashMap<&str, i32> = ChainedHashMap::new();
        other.clone_from(&src);
        assert_eq!(other, src);
        dst.assert_invariants();
        other.assert_invariants();
    }

    /// Invariant: a clone is independent of its source.
    #[test]
    fn clone_is_deep() {
        let mut a: ChainedHashMap<String, Vec<i32>, RandomState> =
            ChainedHashMap::with_hasher(RandomState::new());
        a.insert("k".into(), vec![1]);
        let b = a.clone();
        a.get_mut("k").unwrap().push(2);
        assert_eq!(b.get("k"), Some(&vec![1]));
        assert_eq!(a.get("k"), Some(&vec![1, 2]));
    }

    /// Invariant: construction from a sequence keeps the first occurrence.
    #[test]
    fn from_iter_first_occurrence_wins() {
        let m: ChainedHashMap<char, u32> =
            "abracadabra".chars().zip(0..).collect();
        assert_eq!(
            pairs(&m),
            vec![('a', 0), ('b', 1), ('r', 2), ('c', 4), ('d', 6)]
        );
        m.assert_invariants();
    }

    #[test]
    fn equality_ignores_order() {
        let a: ChainedHashMap<u8, u8> = [(1, 1), (2, 2)].into();
        let b: ChainedHashMap<u8, u8> = [(2, 2), (1, 1)].into();
        let c: ChainedHashMap<u8, u8> = [(1, 1), (2, 3)].into();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn debug_lists_entries_in_insertion_order() {
        let m: ChainedHashMap<&str, i32> = [("b", 2), ("a", 1)].into();
        assert_eq!(format!("{m:?}"), r#"{"b": 2, "a": 1}"#);
    }

    /// Invariant: every iterator flavour walks insertion order.
    #[test]
    fn iterators_follow_insertion_order() {
        let mut m: ChainedHashMap<u32, u32> = ChainedHashMap::new();
        for k in [5, 3, 9, 1] {
            m.insert(k, k * 10);
        }
        m.remove(&3);
        assert_eq!(m.keys().copied().collect::<Vec<_>>(), [5, 9, 1]);
        assert_eq!(m.values().copied().collect::<Vec<_>>(), [50, 90, 10]);
        assert_eq!(m.keys().rev().copied().collect::<Vec<_>>(), [1, 9, 5]);
        for v in m.values_mut() {
            *v += 1;
        }
        for (_, v) in &mut m {
            *v += 1;
        }
        let borrowed: Vec<_> = (&m).into_iter().map(|(k, v)| (*k, *v)).collect();
        assert_eq!(borrowed, [(5, 52), (9, 92), (1, 12)]);
        assert_eq!(m.values().len(), 3);
        let owned: Vec<_> = m.into_iter().collect();
        assert_eq!(owned, [(5, 52), (9, 92), (1, 12)]);
    }

    #[test]
    fn borrowed_lookup_with_str() {
        let mut m: ChainedHashMap<String, i32> = ChainedHashMap::new();
        m.insert("hello".to_string(), 1);
        assert!(m.contains_key("hello"));
        assert!(!m.contains_key("world"));
        assert_eq!(m.get_key_value("hello"), Some((&"hello".to_string(), &1)));
        assert_eq!(m.remove_entry("hello"), Some(("hello".to_string(), 1)));
        assert_eq!(m.remove("hello"), None, "second erase is a no-op");
        assert!(m.is_empty());
    }
}
