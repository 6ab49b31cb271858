//! chained-hashmap: a single-threaded, insertion-ordered hash map built on
//! separate chaining, with stable handles to entries.
//!
//! Internal Design:
//!
//! Summary
//! - Goal: keep the two halves of a chained hash table apart so each can be
//!   reasoned about on its own, and let the map glue them together.
//! - Layers:
//!   - ElementStore<K, V>: owns every `(key, value)` in a `SlotMap` arena,
//!     threaded into a doubly linked list for insertion order. Slots never
//!     move; removing one only relinks its neighbours.
//!   - BucketIndex: `table_size` chains of non-owning slot keys. Routing is
//!     `hash mod table_size`; key equality is supplied by the caller.
//!   - ChainedHashMap<K, V, S>: public API. Hashes keys with `S`, asks the
//!     index where a key lives, and keeps both structures in step.
//!
//! Constraints
//! - Single-threaded container; no internal synchronization.
//! - Unique keys. `insert` on an existing key is a no-op: first write wins.
//! - Load factor never exceeds 1: after an insert pushes `len` past
//!   `table_size`, the table doubles and every chain is rebuilt.
//! - The table never shrinks on removal. `clear` returns it to the initial
//!   size the map was constructed with.
//!
//! Handles
//! - `find` returns a `Handle` (a generational slot key) instead of a
//!   borrow, so callers can keep it across later insertions, rehashes and
//!   removals of other keys. A handle goes stale when its own entry is
//!   removed or the map is cleared, and then resolves to `None`.
//! - Every map takes a process-unique id at construction and stamps it into
//!   the handles it issues. A handle presented to another map, a clone
//!   included, resolves to `None`.
//!
//! Hasher and rehashing invariants
//! - Each entry stores the `u64` hash computed at insertion; routing during
//!   a rebuild uses the stored hash, so `K: Hash` runs once per insert and
//!   never during a rehash.
//! - Rebuilds walk the store in insertion order, so chains are rebuilt in
//!   that order too.
//!
//! Notes and non-goals
//! - No serialization, no custom allocators, no shrink-on-remove.
//! - Keys are immutable post-insert; there is no `key_mut`.

mod bucket_index;
mod chained_map;
mod chained_map_proptest;
mod element_store;
mod error;

// Public surface
pub use chained_map::{ChainedHashMap, Keys, Values, ValuesMut};
pub use element_store::{Handle, IntoIter, Iter, IterMut};
pub use error::KeyNotFoundError;
