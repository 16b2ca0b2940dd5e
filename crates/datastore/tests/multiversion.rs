use bytes::Bytes;
use occstore_datastore::{is_estimate, MemStore, MultiVersionStore, VersionStatus, WriteSet};
use occstore_primitives::{Incarnation, TxIndex};
use proptest::collection::{btree_map, vec};
use proptest::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;

const KEYS: [&str; 6] = ["a", "b", "c", "d", "e", "f"];

fn key() -> impl Strategy<Value = Bytes> {
    prop::sample::select(KEYS.to_vec()).prop_map(|k| Bytes::from_static(k.as_bytes()))
}

fn write_set() -> impl Strategy<Value = WriteSet> {
    btree_map(key(), proptest::option::of(any::<u8>().prop_map(|v| Bytes::from(vec![v]))), 0..4)
}

#[derive(Debug, Clone)]
enum Op {
    Publish(u32, WriteSet),
    Estimate(u32, WriteSet),
    Invalidate(u32),
    Remove(u32),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..4u32, write_set()).prop_map(|(i, ws)| Op::Publish(i, ws)),
        (0..4u32, write_set()).prop_map(|(i, ws)| Op::Estimate(i, ws)),
        (0..4u32).prop_map(Op::Invalidate),
        (0..4u32).prop_map(Op::Remove),
    ]
}

/// What each index has written, maintained the obvious way.
#[derive(Default)]
struct Model {
    writes: BTreeMap<u32, (WriteSet, bool)>,
}

impl Model {
    fn latest_before(&self, index: u32, key: &Bytes) -> Option<(u32, bool, Option<Bytes>)> {
        self.writes
            .range(..index)
            .rev()
            .find_map(|(&i, (ws, estimate))| ws.get(key).map(|v| (i, *estimate, v.clone())))
    }
}

proptest! {
    #[test]
    fn store_matches_model(ops in vec(op(), 1..24)) {
        let mvs = MultiVersionStore::new(Arc::new(MemStore::new()));
        let mut model = Model::default();
        let mut incarnations = [0u32; 4];

        for op in ops {
            match op {
                Op::Publish(i, ws) => {
                    incarnations[i as usize] += 1;
                    mvs.set_write_set(TxIndex(i), Incarnation(incarnations[i as usize]), &ws);
                    model.writes.insert(i, (ws, false));
                }
                Op::Estimate(i, ws) => {
                    incarnations[i as usize] += 1;
                    mvs.set_estimated_write_set(TxIndex(i), Incarnation(incarnations[i as usize]), &ws);
                    model.writes.insert(i, (ws, true));
                }
                Op::Invalidate(i) => {
                    mvs.invalidate_write_set(TxIndex(i), Incarnation(incarnations[i as usize]));
                    if let Some((_, estimate)) = model.writes.get_mut(&i) {
                        *estimate = true;
                    }
                }
                Op::Remove(i) => {
                    mvs.remove(TxIndex(i));
                    model.writes.remove(&i);
                }
            }
        }

        // The reverse index holds exactly the keys of each current write set.
        let expected_keys: BTreeMap<TxIndex, Vec<Bytes>> = model
            .writes
            .iter()
            .filter(|(_, (ws, _))| !ws.is_empty())
            .map(|(&i, (ws, _))| (TxIndex(i), ws.keys().cloned().collect()))
            .collect();
        prop_assert_eq!(mvs.get_all_write_set_keys(), expected_keys);

        for reader in 0..5u32 {
            for key in KEYS.map(|k| Bytes::from_static(k.as_bytes())) {
                let actual = mvs.get_latest_before_index(TxIndex(reader), &key);
                let expected = model.latest_before(reader, &key);
                prop_assert_eq!(is_estimate(actual.as_ref()), expected.as_ref().is_some_and(|e| e.1));
                match (actual, expected) {
                    (None, None) => {}
                    (Some(actual), Some((writer, estimate, value))) => {
                        prop_assert_eq!(actual.tx_index, TxIndex(writer));
                        if !estimate {
                            prop_assert_eq!(actual.value().cloned(), value.clone());
                            prop_assert_eq!(actual.status == VersionStatus::Deleted, value.is_none());
                        }
                    }
                    (actual, expected) => prop_assert!(false, "store has {actual:?}, model has {expected:?}"),
                }
            }
        }
    }
}

#[test]
fn absent_values_are_never_estimates() {
    let mvs = MultiVersionStore::new(Arc::new(MemStore::new()));
    for index in [0, 1, u32::MAX] {
        let value = mvs.get_latest_before_index(TxIndex(index), b"never-written");
        assert!(value.is_none());
        assert!(!is_estimate(value.as_ref()));
    }
    assert!(mvs.get_latest(b"never-written").is_none());
    assert_eq!(mvs.validate_transaction_state(TxIndex(0)), (true, vec![]));
}
