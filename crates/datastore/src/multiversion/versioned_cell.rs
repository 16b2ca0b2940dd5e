use bytes::Bytes;
use occstore_primitives::{Incarnation, TxIndex};
use std::collections::BTreeMap;

/// How a [`VersionedValue`] should be interpreted by readers.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum VersionStatus {
    /// A definitive value.
    Concrete,
    /// The writer wrote this key, but its final value is not known yet.
    /// Readers must abort against the writer.
    Estimate,
    /// A definitive absence, distinct from never having been written.
    Deleted,
}

/// One write to one key by one incarnation of a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedValue {
    pub tx_index: TxIndex,
    pub incarnation: Incarnation,
    pub status: VersionStatus,
    /// The written bytes.
    /// Always `None` for [`VersionStatus::Deleted`].
    /// For an estimate, the value of the incarnation that produced it, if any.
    pub payload: Option<Bytes>,
}

impl VersionedValue {
    /// A concrete value for `Some`, a deletion for `None`.
    pub fn from_write(tx_index: TxIndex, incarnation: Incarnation, value: Option<Bytes>) -> Self {
        let status = match value {
            Some(_) => VersionStatus::Concrete,
            None => VersionStatus::Deleted,
        };
        Self {
            tx_index,
            incarnation,
            status,
            payload: value,
        }
    }

    pub fn estimate(tx_index: TxIndex, incarnation: Incarnation, payload: Option<Bytes>) -> Self {
        Self {
            tx_index,
            incarnation,
            status: VersionStatus::Estimate,
            payload,
        }
    }

    pub fn is_estimate(&self) -> bool {
        self.status == VersionStatus::Estimate
    }

    pub fn is_deleted(&self) -> bool {
        self.status == VersionStatus::Deleted
    }

    /// The readable value, if this is a concrete write.
    pub fn value(&self) -> Option<&Bytes> {
        match self.status {
            VersionStatus::Concrete => self.payload.as_ref(),
            VersionStatus::Estimate | VersionStatus::Deleted => None,
        }
    }
}

/// Returns whether `value` is present and an estimate.
///
/// A missing value, i.e., a key never written before some index, is never an estimate.
pub fn is_estimate(value: Option<&VersionedValue>) -> bool {
    value.is_some_and(VersionedValue::is_estimate)
}

/// The write history of a single key, at most one entry per [`TxIndex`].
///
/// A new incarnation of a transaction replaces the entry of its predecessor.
#[derive(Debug, Clone, Default)]
pub struct VersionedCell {
    versions: BTreeMap<TxIndex, VersionedValue>,
}

impl VersionedCell {
    /// Inserts `value`, replacing any previous entry for the same transaction.
    pub fn set(&mut self, value: VersionedValue) {
        if let Some(prev) = self.versions.get(&value.tx_index) {
            debug_assert!(
                prev.incarnation <= value.incarnation,
                "incarnation {} of tx {} replaced by older incarnation {}",
                prev.incarnation,
                value.tx_index,
                value.incarnation,
            );
        }
        self.versions.insert(value.tx_index, value);
    }

    /// Re-tags the entry of `tx_index` as an estimate, keeping its payload.
    ///
    /// Returns whether there was such an entry.
    pub fn mark_estimate(&mut self, tx_index: TxIndex, incarnation: Incarnation) -> bool {
        match self.versions.get_mut(&tx_index) {
            Some(version) => {
                let payload = version.payload.take();
                *version = VersionedValue::estimate(tx_index, incarnation, payload);
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, tx_index: TxIndex) -> Option<VersionedValue> {
        self.versions.remove(&tx_index)
    }

    /// The entry with the greatest index strictly below `tx_index`.
    pub fn latest_before(&self, tx_index: TxIndex) -> Option<&VersionedValue> {
        self.versions.range(..tx_index).next_back().map(|(_, v)| v)
    }

    /// The entry with the greatest index.
    pub fn latest(&self) -> Option<&VersionedValue> {
        self.versions.values().next_back()
    }

    pub fn get(&self, tx_index: TxIndex) -> Option<&VersionedValue> {
        self.versions.get(&tx_index)
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }
}
