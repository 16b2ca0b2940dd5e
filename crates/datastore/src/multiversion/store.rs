use super::tracking::{IterateSet, ReadSet, WriteSet};
use super::versioned_cell::{VersionStatus, VersionedCell, VersionedValue};
use crate::base_store::{KeyRange, KvStore};
use crate::db_metrics::MVS_METRICS;
use crate::error::DatastoreError;
use crate::Result;
use bytes::Bytes;
use nohash_hasher::IntMap;
use occstore_primitives::{Incarnation, TxIndex};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// The versioned values of a block, keyed by key,
/// together with the bookkeeping validation needs for every transaction index.
///
/// A reader at index `i` observes exactly the writes of indices `< i`,
/// which makes the block serializable in index order
/// no matter in which order transactions actually ran.
///
/// Every method is atomic on its own.
/// The store does not offer transactions spanning several calls;
/// sequencing those correctly is up to the scheduler.
pub struct MultiVersionStore {
    parent: Arc<dyn KvStore>,
    state: RwLock<VersionedState>,
    /// The read set of the latest incarnation of each transaction.
    read_sets: RwLock<IntMap<TxIndex, ReadSet>>,
    /// The iterate set of the latest incarnation of each transaction.
    iterate_sets: RwLock<IntMap<TxIndex, IterateSet>>,
}

#[derive(Default)]
struct VersionedState {
    cells: BTreeMap<Bytes, VersionedCell>,
    /// For each transaction, exactly the keys of its current write set.
    written_keys: IntMap<TxIndex, BTreeSet<Bytes>>,
}

impl VersionedState {
    /// Replaces the write set of `index`, dropping keys the new one no longer contains.
    fn replace_write_set(&mut self, index: TxIndex, write_set: &WriteSet, make: impl Fn(Option<Bytes>) -> VersionedValue) {
        let previous = self.written_keys.remove(&index).unwrap_or_default();
        for stale in previous.iter().filter(|key| !write_set.contains_key(*key)) {
            self.remove_version(stale, index);
        }
        for (key, value) in write_set {
            self.cells.entry(key.clone()).or_default().set(make(value.clone()));
        }
        if !write_set.is_empty() {
            self.written_keys.insert(index, write_set.keys().cloned().collect());
        }
    }

    fn remove_version(&mut self, key: &Bytes, index: TxIndex) {
        if let Some(cell) = self.cells.get_mut(key) {
            cell.remove(index);
            if cell.is_empty() {
                self.cells.remove(key);
            }
        }
    }
}

impl MultiVersionStore {
    pub fn new(parent: Arc<dyn KvStore>) -> Self {
        Self {
            parent,
            state: RwLock::new(VersionedState::default()),
            read_sets: RwLock::default(),
            iterate_sets: RwLock::default(),
        }
    }

    /// The store reads fall through to and the block is flushed into.
    pub fn parent(&self) -> &dyn KvStore {
        &*self.parent
    }

    /// Returns the value of `key` with the greatest index strictly below `index`.
    ///
    /// `None` means no transaction before `index` wrote `key`,
    /// and the reader should fall through to the parent store.
    pub fn get_latest_before_index(&self, index: TxIndex, key: &[u8]) -> Option<VersionedValue> {
        self.state.read().cells.get(key)?.latest_before(index).cloned()
    }

    /// Returns the value of `key` written by the highest index.
    pub fn get_latest(&self, key: &[u8]) -> Option<VersionedValue> {
        self.state.read().cells.get(key)?.latest().cloned()
    }

    /// Returns whether some transaction before `index` left `key` present,
    /// without consulting the parent store.
    ///
    /// Estimates count as present.
    pub fn has(&self, index: TxIndex, key: &[u8]) -> bool {
        self.get_latest_before_index(index, key)
            .is_some_and(|value| !value.is_deleted())
    }

    /// Publishes the write set of `index` as definitive values.
    ///
    /// Keys written by a previous incarnation of `index` but absent from `write_set` are removed.
    pub fn set_write_set(&self, index: TxIndex, incarnation: Incarnation, write_set: &WriteSet) {
        self.state
            .write()
            .replace_write_set(index, write_set, |value| VersionedValue::from_write(index, incarnation, value));
    }

    /// Publishes the write set of `index` as estimates,
    /// so that later transactions reading any of its keys abort against `index`.
    ///
    /// Same key-set semantics as [`Self::set_write_set`].
    pub fn set_estimated_write_set(&self, index: TxIndex, incarnation: Incarnation, write_set: &WriteSet) {
        self.state
            .write()
            .replace_write_set(index, write_set, |value| VersionedValue::estimate(index, incarnation, value));
    }

    /// Re-tags every value currently written by `index` as an estimate.
    pub fn invalidate_write_set(&self, index: TxIndex, incarnation: Incarnation) {
        let mut state = self.state.write();
        let VersionedState { cells, written_keys } = &mut *state;
        for key in written_keys.get(&index).into_iter().flatten() {
            if let Some(cell) = cells.get_mut(key) {
                cell.mark_estimate(index, incarnation);
            }
        }
    }

    /// Drops every value written by `index`.
    pub fn remove(&self, index: TxIndex) {
        let mut state = self.state.write();
        for key in state.written_keys.remove(&index).unwrap_or_default() {
            state.remove_version(&key, index);
        }
    }

    /// Returns, ordered per `ascending`, every key within `range`
    /// written by some transaction below `index`, with the latest such value.
    ///
    /// Deletes and estimates are included; interpreting them is up to the caller.
    pub fn collect_iterator_items(
        &self,
        index: TxIndex,
        range: &KeyRange,
        ascending: bool,
    ) -> Vec<(Bytes, VersionedValue)> {
        let state = self.state.read();
        range.collect_from(&state.cells, ascending, |key, cell| {
            cell.latest_before(index).map(|value| (key.clone(), value.clone()))
        })
    }

    /// Returns the keys of every transaction's current write set.
    pub fn get_all_write_set_keys(&self) -> BTreeMap<TxIndex, Vec<Bytes>> {
        self.state
            .read()
            .written_keys
            .iter()
            .map(|(&index, keys)| (index, keys.iter().cloned().collect()))
            .collect()
    }

    pub fn set_read_set(&self, index: TxIndex, read_set: ReadSet) {
        self.read_sets.write().insert(index, read_set);
    }

    pub fn get_read_set(&self, index: TxIndex) -> Option<ReadSet> {
        self.read_sets.read().get(&index).cloned()
    }

    pub fn clear_read_set(&self, index: TxIndex) {
        self.read_sets.write().remove(&index);
    }

    pub fn set_iterate_set(&self, index: TxIndex, iterate_set: IterateSet) {
        self.iterate_sets.write().insert(index, iterate_set);
    }

    pub fn get_iterate_set(&self, index: TxIndex) -> Option<IterateSet> {
        self.iterate_sets.read().get(&index).cloned()
    }

    pub fn clear_iterate_set(&self, index: TxIndex) {
        self.iterate_sets.write().remove(&index);
    }

    /// Flushes the final value of every written key into the parent store.
    ///
    /// The changes are applied in increasing transaction index order,
    /// so the net effect is that of running the block sequentially.
    /// Returns the number of keys written.
    ///
    /// Fails if any final value is still an estimate,
    /// which means the block was not fully validated.
    pub fn write_latest_to_store(&self) -> Result<usize> {
        let mut changes = Vec::new();
        {
            let state = self.state.read();
            for (key, cell) in &state.cells {
                let Some(latest) = cell.latest() else {
                    continue;
                };
                let value = match latest.status {
                    VersionStatus::Concrete => latest.payload.clone(),
                    VersionStatus::Deleted => None,
                    VersionStatus::Estimate => {
                        return Err(DatastoreError::EstimateAtFlush {
                            key: key.clone(),
                            tx_index: latest.tx_index,
                        });
                    }
                };
                changes.push((latest.tx_index, key.clone(), value));
            }
        }
        // Keys are unique, so this stable sort keeps keys ordered within an index.
        changes.sort_by_key(|(index, _, _)| *index);

        let count = changes.len();
        let batch = changes.into_iter().map(|(_, key, value)| (key, value)).collect();
        self.parent.write_batch(batch).map_err(DatastoreError::BaseStore)?;

        MVS_METRICS.keys_flushed.inc_by(count as u64);
        tracing::debug!(keys = count, "flushed multi-version store");
        Ok(count)
    }
}
