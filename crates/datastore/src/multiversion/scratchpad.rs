use super::merge::{Layer, MergedLayers};
use super::store::MultiVersionStore;
use super::tracking::{write_set_within, IterateSet, IterationRecord, ReadSet, WriteSet};
use super::versioned_cell::VersionStatus;
use crate::base_store::KeyRange;
use crate::db_metrics::MVS_METRICS;
use crate::error::Abort;
use bytes::Bytes;
use occstore_primitives::{Incarnation, TxIndex};

/// The view of one incarnation of one transaction onto a [`MultiVersionStore`].
///
/// Writes are buffered in the scratchpad until it is flushed,
/// reads see the buffered writes first, then the writes of lower indices,
/// then the base store.
/// Every observation from outside the scratchpad is recorded,
/// so the incarnation can later be validated against the final state of the block.
///
/// Reading an estimate aborts the incarnation.
/// The abort is sticky: every later operation returns the same [`Abort`].
pub struct TxScratchpad<'a> {
    mvs: &'a MultiVersionStore,
    index: TxIndex,
    incarnation: Incarnation,
    write_set: WriteSet,
    read_set: ReadSet,
    iterate_set: IterateSet,
    abort: Option<Abort>,
}

impl<'a> TxScratchpad<'a> {
    pub fn new(mvs: &'a MultiVersionStore, index: TxIndex, incarnation: Incarnation) -> Self {
        Self {
            mvs,
            index,
            incarnation,
            write_set: WriteSet::new(),
            read_set: ReadSet::default(),
            iterate_set: IterateSet::new(),
            abort: None,
        }
    }

    pub fn index(&self) -> TxIndex {
        self.index
    }

    pub fn incarnation(&self) -> Incarnation {
        self.incarnation
    }

    /// The abort this incarnation ran into, if any.
    pub fn aborted(&self) -> Option<Abort> {
        self.abort
    }

    pub fn write_set(&self) -> &WriteSet {
        &self.write_set
    }

    pub fn read_set(&self) -> &ReadSet {
        &self.read_set
    }

    pub fn iterate_set(&self) -> &IterateSet {
        &self.iterate_set
    }

    fn ensure_live(&self) -> Result<(), Abort> {
        match self.abort {
            Some(abort) => Err(abort),
            None => Ok(()),
        }
    }

    fn poison(&mut self, abort: Abort) -> Abort {
        MVS_METRICS.estimate_reads.inc();
        tracing::trace!(
            index = %self.index,
            incarnation = %self.incarnation,
            blocking_tx = %abort.blocking_tx,
            "read an estimate"
        );
        *self.abort.get_or_insert(abort)
    }

    pub fn get(&mut self, key: &[u8]) -> Result<Option<Bytes>, Abort> {
        self.ensure_live()?;
        if let Some(value) = self.write_set.get(key) {
            return Ok(value.clone());
        }

        let observed = match self.mvs.get_latest_before_index(self.index, key) {
            Some(version) => match version.status {
                VersionStatus::Estimate => return Err(self.poison(Abort::new(version.tx_index))),
                VersionStatus::Deleted => None,
                VersionStatus::Concrete => version.payload,
            },
            None => self.mvs.parent().get(key),
        };
        self.read_set.record(Bytes::copy_from_slice(key), observed.clone());
        Ok(observed)
    }

    pub fn has(&mut self, key: &[u8]) -> Result<bool, Abort> {
        self.get(key).map(|value| value.is_some())
    }

    pub fn set(&mut self, key: impl Into<Bytes>, value: impl Into<Bytes>) -> Result<(), Abort> {
        self.ensure_live()?;
        self.write_set.insert(key.into(), Some(value.into()));
        Ok(())
    }

    pub fn delete(&mut self, key: impl Into<Bytes>) -> Result<(), Abort> {
        self.ensure_live()?;
        self.write_set.insert(key.into(), None);
        Ok(())
    }

    /// Scans `range` in ascending key order.
    pub fn iter(&mut self, range: KeyRange) -> Result<TxIter<'_, 'a>, Abort> {
        self.scan(range, true)
    }

    /// Scans `range` in descending key order.
    pub fn reverse_iter(&mut self, range: KeyRange) -> Result<TxIter<'_, 'a>, Abort> {
        self.scan(range, false)
    }

    fn scan(&mut self, range: KeyRange, ascending: bool) -> Result<TxIter<'_, 'a>, Abort> {
        self.ensure_live()?;
        let write_set = write_set_within(&self.write_set, &range);
        let versioned = self.mvs.collect_iterator_items(self.index, &range, ascending);
        let base = if range.is_empty() {
            Vec::new()
        } else {
            self.mvs.parent().range(&range, ascending)
        };
        let layers = MergedLayers::new(&write_set, versioned, base, ascending);
        Ok(TxIter {
            pad: self,
            layers,
            range,
            ascending,
            write_set,
            observed_keys: Vec::new(),
            state: ScanState::Open,
        })
    }

    /// Drops every buffered write while keeping what was observed.
    ///
    /// Used for transactions which fail:
    /// they publish nothing, but their failure may still depend on what they read.
    pub fn discard_writes(&mut self) {
        self.write_set.clear();
    }

    /// Publishes the write set as definitive values,
    /// together with the read and iterate sets validation will check.
    ///
    /// An aborted incarnation publishes nothing.
    pub fn write_to_multi_version_store(self) -> Result<(), Abort> {
        self.ensure_live()?;
        self.mvs.set_write_set(self.index, self.incarnation, &self.write_set);
        self.mvs.set_read_set(self.index, self.read_set);
        self.mvs.set_iterate_set(self.index, self.iterate_set);
        Ok(())
    }

    /// Publishes the write set as estimates.
    ///
    /// Later transactions touching any of these keys will abort against this one
    /// until it publishes definitive values.
    pub fn write_estimates_to_multi_version_store(self) {
        self.mvs
            .set_estimated_write_set(self.index, self.incarnation, &self.write_set);
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum ScanState {
    Open,
    Exhausted,
    Aborted,
}

/// A scan over the view of a [`TxScratchpad`].
///
/// Yields key-value pairs, or an [`Abort`] upon reaching an estimate,
/// after which the scan yields nothing.
/// The layers are snapshotted when the scan is opened.
///
/// Dropping the scan appends an [`IterationRecord`] to the scratchpad's iterate set.
pub struct TxIter<'s, 'a> {
    pad: &'s mut TxScratchpad<'a>,
    layers: MergedLayers,
    range: KeyRange,
    ascending: bool,
    write_set: WriteSet,
    observed_keys: Vec<Bytes>,
    state: ScanState,
}

impl Iterator for TxIter<'_, '_> {
    type Item = Result<(Bytes, Bytes), Abort>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.state != ScanState::Open {
            return None;
        }
        match self.layers.next() {
            None => {
                self.state = ScanState::Exhausted;
                None
            }
            Some(Err(abort)) => {
                self.state = ScanState::Aborted;
                Some(Err(self.pad.poison(abort)))
            }
            Some(Ok(entry)) => {
                if entry.layer != Layer::OwnWrites {
                    self.pad.read_set.record(entry.key.clone(), Some(entry.value.clone()));
                }
                self.observed_keys.push(entry.key.clone());
                Some(Ok((entry.key, entry.value)))
            }
        }
    }
}

impl Drop for TxIter<'_, '_> {
    fn drop(&mut self) {
        let exhausted = self.state == ScanState::Exhausted;
        let observed_keys = std::mem::take(&mut self.observed_keys);
        let early_stop_key = if exhausted { None } else { observed_keys.last().cloned() };
        self.pad.iterate_set.push(IterationRecord {
            range: std::mem::take(&mut self.range),
            ascending: self.ascending,
            observed_keys,
            early_stop_key,
            exhausted,
            write_set: std::mem::take(&mut self.write_set),
        });
    }
}
