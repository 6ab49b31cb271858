//! BucketIndex: separate-chaining table of non-owning slot keys.
//!
//! Chains only hold `DefaultKey`s into the element store; key comparison is
//! delegated to the caller through an `eq` callback, in the same shape as
//! `hashbrown::HashTable::find`.

use slotmap::DefaultKey;

type Chain = Vec<DefaultKey>;

#[derive(Debug)]
pub(crate) struct BucketIndex {
    buckets: Vec<Chain>,
}

impl BucketIndex {
    /// `table_size` must be a power of two.
    pub(crate) fn new(table_size: usize) -> Self {
        debug_assert!(table_size.is_power_of_two());
        Self {
            buckets: empty_table(table_size),
        }
    }

    pub(crate) fn table_size(&self) -> usize {
        self.buckets.len()
    }

    /// `hash mod table_size`, as a mask because the size is a power of two.
    #[inline]
    pub(crate) fn route(&self, hash: u64) -> usize {
        (hash & (self.buckets.len() as u64 - 1)) as usize
    }

    pub(crate) fn lookup(
        &self,
        hash: u64,
        mut eq: impl FnMut(DefaultKey) -> bool,
    ) -> Option<DefaultKey> {
        self.buckets[self.route(hash)]
            .iter()
            .copied()
            .find(|&slot| eq(slot))
    }

    /// Caller guarantees `slot` is not already linked.
    pub(crate) fn link(&mut self, hash: u64, slot: DefaultKey) {
        let b = self.route(hash);
        self.buckets[b].push(slot);
    }

    /// Returns whether the slot was found in its routed chain.
    pub(crate) fn unlink(&mut self, hash: u64, slot: DefaultKey) -> bool {
        let b = self.route(hash);
        let chain = &mut self.buckets[b];
        match chain.iter().position(|&s| s == slot) {
            Some(pos) => {
                chain.swap_remove(pos);
                true
            }
            None => false,
        }
    }

    /// Replace the table with `new_size` empty chains and re-route every entry.
    pub(crate) fn rebuild(
        &mut self,
        new_size: usize,
        entries: impl IntoIterator<Item = (DefaultKey, u64)>,
    ) {
        debug_assert!(new_size.is_power_of_two());
        self.buckets = empty_table(new_size);
        for (slot, hash) in entries {
            self.link(hash, slot);
        }
    }

    /// Drop every chain and shrink back to `table_size` buckets.
    pub(crate) fn reset(&mut self, table_size: usize) {
        debug_assert!(table_size.is_power_of_two());
        self.buckets = empty_table(table_size);
    }

    #[cfg(test)]
    pub(crate) fn chain(&self, bucket: usize) -> &[DefaultKey] {
        &self.buckets[bucket]
    }

    #[cfg(any(test, feature = "bench_internal"))]
    pub(crate) fn chain_lengths(&self) -> impl Iterator<Item = usize> + '_ {
        self.buckets.iter().map(Vec::len)
    }
}

fn empty_table(table_size: usize) -> Vec<Chain> {
    let mut buckets = Vec::with_capacity(table_size);
    buckets.resize_with(table_size, Vec::new);
    buckets
}
