//! ElementStore: owning, insertion-ordered arena of entries with stable handles.
//!
//! Entries live in a `SlotMap` and never move once inserted; order is kept by
//! a doubly linked list threaded through the slots. Removal of one entry only
//! relinks its neighbours, so every other slot key stays valid.

use core::iter::FusedIterator;
use slotmap::{DefaultKey, SecondaryMap, SlotMap};

/// Stable, non-owning reference to an entry of a
/// [`ChainedHashMap`](crate::ChainedHashMap).
///
/// A handle stays valid until its entry is removed or the map is cleared.
/// Insertions, lookups and resizes never invalidate it. Slot keys are
/// generational, so a stale handle resolves to `None` instead of aliasing a
/// newer entry that reuses the slot. Each handle also carries the id of the
/// map that issued it; presented to any other map (a clone included) it
/// resolves to `None`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct Handle {
    owner: u64,
    slot: DefaultKey,
}

impl Handle {
    pub(crate) fn new(owner: u64, slot: DefaultKey) -> Self {
        Handle { owner, slot }
    }
    pub(crate) fn owner(&self) -> u64 {
        self.owner
    }
    pub(crate) fn raw_handle(&self) -> DefaultKey {
        self.slot
    }
}

#[derive(Debug)]
struct Node<K, V> {
    key: K,
    value: V,
    hash: u64,
    prev: Option<DefaultKey>,
    next: Option<DefaultKey>,
}

#[derive(Debug)]
pub(crate) struct ElementStore<K, V> {
    slots: SlotMap<DefaultKey, Node<K, V>>,
    head: Option<DefaultKey>,
    tail: Option<DefaultKey>,
}

impl<K, V> ElementStore<K, V> {
    pub(crate) fn new() -> Self {
        Self {
            slots: SlotMap::with_key(),
            head: None,
            tail: None,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Append at the tail. The returned key is valid until this entry is removed.
    pub(crate) fn push_back(&mut self, hash: u64, key: K, value: V) -> DefaultKey {
        let prev = self.tail;
        let slot = self.slots.insert(Node {
            key,
            value,
            hash,
            prev,
            next: None,
        });
        match prev.and_then(|p| self.slots.get_mut(p)) {
            Some(tail) => tail.next = Some(slot),
            None => self.head = Some(slot),
        }
        self.tail = Some(slot);
        slot
    }

    /// Unlink and drop the slot; neighbours are joined so relative order holds.
    pub(crate) fn remove(&mut self, slot: DefaultKey) -> Option<(K, V)> {
        let node = self.slots.remove(slot)?;
        match node.prev.and_then(|p| self.slots.get_mut(p)) {
            Some(prev) => prev.next = node.next,
            None => self.head = node.next,
        }
        match node.next.and_then(|n| self.slots.get_mut(n)) {
            Some(next) => next.prev = node.prev,
            None => self.tail = node.prev,
        }
        Some((node.key, node.value))
    }

    pub(crate) fn pop_front(&mut self) -> Option<(K, V)> {
        let slot = self.head?;
        self.remove(slot)
    }

    pub(crate) fn pop_back(&mut self) -> Option<(K, V)> {
        let slot = self.tail?;
        self.remove(slot)
    }

    pub(crate) fn clear(&mut self) {
        self.slots.clear();
        self.head = None;
        self.tail = None;
    }

    pub(crate) fn contains(&self, slot: DefaultKey) -> bool {
        self.slots.contains_key(slot)
    }

    pub(crate) fn hash_of(&self, slot: DefaultKey) -> Option<u64> {
        self.slots.get(slot).map(|n| n.hash)
    }

    pub(crate) fn key(&self, slot: DefaultKey) -> Option<&K> {
        self.slots.get(slot).map(|n| &n.key)
    }

    pub(crate) fn value(&self, slot: DefaultKey) -> Option<&V> {
        self.slots.get(slot).map(|n| &n.value)
    }

    pub(crate) fn value_mut(&mut self, slot: DefaultKey) -> Option<&mut V> {
        self.slots.get_mut(slot).map(|n| &mut n.value)
    }

    /// Value of a slot the caller just inserted or looked up.
    /// Panics if `slot` is not live.
    pub(crate) fn live_value_mut(&mut self, slot: DefaultKey) -> &mut V {
        &mut self.slots[slot].value
    }

    pub(crate) fn key_value(&self, slot: DefaultKey) -> Option<(&K, &V)> {
        self.slots.get(slot).map(|n| (&n.key, &n.value))
    }

    /// `(slot, cached hash)` for every entry, in insertion order.
    pub(crate) fn hashed_slots(&self) -> impl Iterator<Item = (DefaultKey, u64)> + '_ {
        self.walk().map(|(slot, node)| (slot, node.hash))
    }

    fn walk(&self) -> Walk<'_, K, V> {
        Walk {
            slots: &self.slots,
            front: self.head,
            back: self.tail,
            remaining: self.slots.len(),
        }
    }

    pub(crate) fn iter(&self) -> Iter<'_, K, V> {
        Iter { walk: self.walk() }
    }

    /// Builds a side table of disjoint `&mut` borrows taken from the arena,
    /// then follows the order links through it.
    pub(crate) fn iter_mut(&mut self) -> IterMut<'_, K, V> {
        let front = self.head;
        let back = self.tail;
        let remaining = self.slots.len();
        let mut links = SecondaryMap::with_capacity(remaining);
        for (slot, node) in self.slots.iter_mut() {
            let Node {
                key,
                value,
                prev,
                next,
                ..
            } = node;
            links.insert(
                slot,
                Link {
                    key,
                    value,
                    prev: *prev,
                    next: *next,
                },
            );
        }
        IterMut {
            links,
            front,
            back,
            remaining,
        }
    }
}

/// Order-following cursor pair over the arena; shared by the borrowing iterators.
struct Walk<'a, K, V> {
    slots: &'a SlotMap<DefaultKey, Node<K, V>>,
    front: Option<DefaultKey>,
    back: Option<DefaultKey>,
    remaining: usize,
}

impl<K, V> Clone for Walk<'_, K, V> {
    fn clone(&self) -> Self {
        Walk {
            slots: self.slots,
            front: self.front,
            back: self.back,
            remaining: self.remaining,
        }
    }
}

impl<'a, K, V> Iterator for Walk<'a, K, V> {
    type Item = (DefaultKey, &'a Node<K, V>);

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let slot = self.front?;
        let node = self.slots.get(slot)?;
        self.front = node.next;
        self.remaining -= 1;
        Some((slot, node))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K, V> DoubleEndedIterator for Walk<'_, K, V> {
    #[inline]
    fn next_back(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let slot = self.back?;
        let node = self.slots.get(slot)?;
        self.back = node.prev;
        self.remaining -= 1;
        Some((slot, node))
    }
}

/// Iterator over `(&K, &V)` in insertion order.
pub struct Iter<'a, K, V> {
    walk: Walk<'a, K, V>,
}

impl<K, V> Clone for Iter<'_, K, V> {
    fn clone(&self) -> Self {
        Iter {
            walk: self.walk.clone(),
        }
    }
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.walk.next().map(|(_, n)| (&n.key, &n.value))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.walk.size_hint()
    }
}

impl<K, V> DoubleEndedIterator for Iter<'_, K, V> {
    #[inline]
    fn next_back(&mut self) -> Option<Self::Item> {
        self.walk.next_back().map(|(_, n)| (&n.key, &n.value))
    }
}

impl<K, V> ExactSizeIterator for Iter<'_, K, V> {}
impl<K, V> FusedIterator for Iter<'_, K, V> {}

struct Link<'a, K, V> {
    key: &'a K,
    value: &'a mut V,
    prev: Option<DefaultKey>,
    next: Option<DefaultKey>,
}

/// Iterator over `(&K, &mut V)` in insertion order.
pub struct IterMut<'a, K, V> {
    links: SecondaryMap<DefaultKey, Link<'a, K, V>>,
    front: Option<DefaultKey>,
    back: Option<DefaultKey>,
    remaining: usize,
}

impl<'a, K, V> Iterator for IterMut<'a, K, V> {
    type Item = (&'a K, &'a mut V);

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let link = self.links.remove(self.front?)?;
        self.front = link.next;
        self.remaining -= 1;
        Some((link.key, link.value))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K, V> DoubleEndedIterator for IterMut<'_, K, V> {
    #[inline]
    fn next_back(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let link = self.links.remove(self.back?)?;
        self.back = link.prev;
        self.remaining -= 1;
        Some((link.key, link.value))
    }
}

impl<K, V> ExactSizeIterator for IterMut<'_, K, V> {}
impl<K, V> FusedIterator for IterMut<'_, K, V> {}

/// Owning iterator over `(K, V)` in insertion order.
pub struct IntoIter<K, V> {
    pub(crate) store: ElementStore<K, V>,
}

impl<K, V> Iterator for IntoIter<K, V> {
    type Item = (K, V);

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.store.pop_front()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.store.len(), Some(self.store.len()))
    }
}

impl<K, V> DoubleEndedIterator for IntoIter<K, V> {
    #[inline]
    fn next_back(&mut self) -> Option<Self::Item> {
        self.store.pop_back()
    }
}

impl<K, V> ExactSizeIterator for IntoIter<K, V> {}
impl<K, V> FusedIterator for IntoIter<K, V> {}
