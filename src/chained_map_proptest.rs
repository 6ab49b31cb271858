#![cfg(test)]

// Property tests for ChainedHashMap kept inside the crate so they can check
// the private bucket invariants after every step.

use crate::{ChainedHashMap, Handle, KeyNotFoundError};
use proptest::prelude::*;
use proptest::test_runner::TestCaseError;
use std::collections::HashMap;
use std::hash::{BuildHasher, Hasher};

// Pool-indexed operations so shrinking moves toward fewer, earlier keys.
#[derive(Clone, Debug)]
enum OpI {
    Insert(usize, i32),
    InsertWith(usize, i32),
    GetOrDefault(usize, i32),
    Remove(usize),
    RemoveHandle(usize),
    Find(usize),
    At(usize),
    Mutate(usize, i32),
    Iterate,
    Clear,
}

fn arb_scenario() -> impl Strategy<Value = (Vec<String>, Vec<OpI>)> {
    proptest::collection::vec("[a-z]{0,5}", 1..=24).prop_flat_map(|pool| {
        let idxs: Vec<usize> = (0..pool.len()).collect();
        let idx = proptest::sample::select(idxs);
        let op = prop_oneof![
            6 => (idx.clone(), any::<i32>()).prop_map(|(i, v)| OpI::Insert(i, v)),
            2 => (idx.clone(), any::<i32>()).prop_map(|(i, v)| OpI::InsertWith(i, v)),
            2 => (idx.clone(), any::<i32>()).prop_map(|(i, d)| OpI::GetOrDefault(i, d)),
            3 => idx.clone().prop_map(OpI::Remove),
            1 => idx.clone().prop_map(OpI::RemoveHandle),
            2 => idx.clone().prop_map(OpI::Find),
            2 => idx.clone().prop_map(OpI::At),
            2 => (idx.clone(), any::<i32>()).prop_map(|(i, d)| OpI::Mutate(i, d)),
            1 => Just(OpI::Iterate),
            1 => Just(OpI::Clear),
        ];
        proptest::collection::vec(op, 1..120).prop_map(move |ops| (pool.clone(), ops))
    })
}

/// Reference model: std map for contents plus a vector for first-insertion order.
#[derive(Default)]
struct Model {
    map: HashMap<String, i32>,
    order: Vec<String>,
    peak_len: usize,
}

impl Model {
    fn insert(&mut self, k: &str, v: i32) -> bool {
        if self.map.contains_key(k) {
            return false;
        }
        self.map.insert(k.to_string(), v);
        self.order.push(k.to_string());
        self.peak_len = self.peak_len.max(self.map.len());
        true
    }

    fn remove(&mut self, k: &str) -> Option<i32> {
        let v = self.map.remove(k)?;
        self.order.retain(|o| o != k);
        Some(v)
    }

    fn clear(&mut self) {
        self.map.clear();
        self.order.clear();
        self.peak_len = 0;
    }

    fn expected_table_size(&self) -> usize {
        self.peak_len.max(1).next_power_of_two()
    }
}

// Property: state-machine equivalence against the model.
// - `insert` keeps the first value; duplicates report `false` and change nothing.
// - Iteration order equals first-insertion order of live keys.
// - Handles of live keys stay equal to what `find` returns, across rehashes.
// - Stale handles (removed or cleared) never resolve.
// - `table_size` is the smallest power of two covering the peak length
//   since the last clear.
fn run_scenario<S>(
    mut sut: ChainedHashMap<String, i32, S>,
    pool: &[String],
    ops: Vec<OpI>,
) -> Result<(), TestCaseError>
where
    S: BuildHasher,
{
    let mut model = Model::default();
    let mut live: HashMap<String, Handle> = HashMap::new();
    let mut stale: Vec<Handle> = Vec::new();

    for op in ops {
        match op {
            OpI::Insert(i, v) => {
                let k = &pool[i];
                let inserted = sut.insert(k.clone(), v);
                prop_assert_eq!(inserted, model.insert(k, v));
                if inserted {
                    let h = sut.find(k.as_str()).expect("just inserted");
                    prop_assert!(live.insert(k.clone(), h).is_none());
                }
            }
            OpI::InsertWith(i, v) => {
                let k = &pool[i];
                let mut ran = false;
                let h = sut.insert_with(k.clone(), || {
                    ran = true;
                    v
                });
                let inserted = model.insert(k, v);
                prop_assert_eq!(ran, inserted, "closure runs only on a new key");
                if inserted {
                    live.insert(k.clone(), h);
                } else {
                    prop_assert_eq!(Some(&h), live.get(k));
                }
            }
            OpI::GetOrDefault(i, d) => {
                let k = &pool[i];
                let slot = sut.get_or_insert_default(k.clone());
                *slot = slot.wrapping_add(d);
                let got = *slot;
                if model.insert(k, 0) {
                    live.insert(k.clone(), sut.find(k.as_str()).expect("inserted"));
                }
                let mv = model.map.get_mut(k).expect("present in model");
                *mv = mv.wrapping_add(d);
                prop_assert_eq!(got, *mv);
            }
            OpI::Remove(i) => {
                let k = &pool[i];
                let len_before = sut.len();
                prop_assert_eq!(sut.remove(k.as_str()), model.remove(k));
                if let Some(h) = live.remove(k) {
                    stale.push(h);
                } else {
                    prop_assert_eq!(sut.len(), len_before, "erasing an absent key is a no-op");
                }
            }
            OpI::RemoveHandle(i) => {
                let k = &pool[i];
                if let Some(h) = live.remove(k) {
                    let (kk, vv) = sut.remove_handle(h).expect("live handle removes");
                    prop_assert_eq!(&kk, k);
                    prop_assert_eq!(Some(vv), model.remove(k));
                    stale.push(h);
                }
            }
            OpI::Find(i) => {
                let k = &pool[i];
                let found = sut.find(k.as_str());
                prop_assert_eq!(found, live.get(k).copied());
                if let Some(h) = found {
                    prop_assert_eq!(h.value(&sut), model.map.get(k));
                }
            }
            OpI::At(i) => {
                let k = &pool[i];
                let len_before = sut.len();
                match model.map.get(k) {
                    Some(v) => {
                        prop_assert_eq!(sut.at(k.as_str()), Ok(v));
                    }
                    None => {
                        prop_assert_eq!(sut.at(k.as_str()), Err(KeyNotFoundError));
                    }
                }
                prop_assert_eq!(sut.len(), len_before, "at never inserts");
            }
            OpI::Mutate(i, d) => {
                let k = &pool[i];
                if let Some(&h) = live.get(k) {
                    let vr = h.value_mut(&mut sut).expect("live handle resolves");
                    *vr = vr.wrapping_add(d);
                    let mv = model.map.get_mut(k).expect("present in model");
                    *mv = mv.wrapping_add(d);
                }
            }
            OpI::Iterate => {
                let got: Vec<(String, i32)> =
                    sut.iter().map(|(k, v)| (k.clone(), *v)).collect();
                let want: Vec<(String, i32)> = model
                    .order
                    .iter()
                    .map(|k| (k.clone(), model.map[k]))
                    .collect();
                prop_assert_eq!(got, want);
            }
            OpI::Clear => {
                sut.clear();
                model.clear();
                stale.extend(live.drain().map(|(_, h)| h));
                prop_assert_eq!(sut.table_size(), 1);
            }
        }

        // Post-conditions after each op
        for h in &stale {
            prop_assert!(h.value(&sut).is_none());
        }
        prop_assert_eq!(sut.len(), model.map.len());
        prop_assert_eq!(sut.is_empty(), model.map.is_empty());
        prop_assert_eq!(sut.table_size(), model.expected_table_size());
        let keys: Vec<&String> = sut.keys().collect();
        let want: Vec<&String> = model.order.iter().collect();
        prop_assert_eq!(keys, want);
        sut.assert_invariants();
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]
    #[test]
    fn prop_state_machine((pool, ops) in arb_scenario()) {
        run_scenario(ChainedHashMap::new(), &pool, ops)?;
    }
}

// Collision variant: every key hashes to 0, so each lookup walks one long chain.
#[derive(Clone, Default)]
struct ConstBuildHasher;
struct ConstHasher;
impl BuildHasher for ConstBuildHasher {
    type Hasher = ConstHasher;
    fn build_hasher(&self) -> Self::Hasher {
        ConstHasher
    }
}
impl Hasher for ConstHasher {
    fn write(&mut self, _bytes: &[u8]) {}
    fn finish(&self) -> u64 {
        0
    }
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]
    #[test]
    fn prop_state_machine_with_collisions((pool, ops) in arb_scenario()) {
        run_scenario(ChainedHashMap::with_hasher(ConstBuildHasher), &pool, ops)?;
    }
}

// Property: a map built by sequential distinct inserts ends with the smallest
// power-of-two table covering its length, whatever the keys.
proptest! {
    #[test]
    fn prop_table_size_after_distinct_inserts(keys in proptest::collection::hash_set(any::<u64>(), 0..300)) {
        let mut m: ChainedHashMap<u64, ()> = ChainedHashMap::new();
        for k in &keys {
            prop_assert!(m.insert(*k, ()));
        }
        prop_assert_eq!(m.len(), keys.len());
        prop_assert_eq!(m.table_size(), keys.len().max(1).next_power_of_two());
        m.assert_invariants();
    }
}
