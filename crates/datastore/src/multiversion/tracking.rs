//! What a single incarnation wrote, read and scanned.

use crate::base_store::KeyRange;
use bytes::Bytes;
use smallvec::SmallVec;
use std::collections::{btree_map, BTreeMap};

/// The pending writes of one incarnation. `None` is a delete.
pub type WriteSet = BTreeMap<Bytes, Option<Bytes>>;

/// Every value an incarnation observed for each key it read
/// from outside its own write set.
///
/// `None` records that the key was not present.
/// A key normally maps to exactly one observation.
/// More than one means other transactions changed the key while this one ran,
/// in which case at most one of them can still be current and validation fails.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadSet {
    reads: BTreeMap<Bytes, SmallVec<[Option<Bytes>; 1]>>,
}

impl ReadSet {
    pub fn record(&mut self, key: Bytes, observed: Option<Bytes>) {
        match self.reads.entry(key) {
            btree_map::Entry::Vacant(e) => {
                e.insert(smallvec::smallvec![observed]);
            }
            btree_map::Entry::Occupied(mut e) => {
                if !e.get().contains(&observed) {
                    e.get_mut().push(observed);
                }
            }
        }
    }

    pub fn get(&self, key: &[u8]) -> Option<&[Option<Bytes>]> {
        self.reads.get(key).map(|v| &v[..])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Bytes, &[Option<Bytes>])> + '_ {
        self.reads.iter().map(|(k, v)| (k, &v[..]))
    }

    pub fn len(&self) -> usize {
        self.reads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reads.is_empty()
    }
}

/// One range scan performed by an incarnation.
///
/// Holds enough to replay the scan later and decide
/// whether the same traversal would still observe the same keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IterationRecord {
    pub range: KeyRange,
    pub ascending: bool,
    /// The keys handed out, in order.
    pub observed_keys: Vec<Bytes>,
    /// Set when the scan was dropped before reaching its end:
    /// the last key handed out, or `None` if the scan was dropped before yielding anything.
    pub early_stop_key: Option<Bytes>,
    /// Whether the scan ran to completion.
    pub exhausted: bool,
    /// The incarnation's own writes within `range`, as of when the scan was opened.
    pub write_set: WriteSet,
}

impl IterationRecord {
    /// Returns whether the consumer stopped before the end of the range.
    pub fn stopped_early(&self) -> bool {
        !self.exhausted
    }
}

/// Every scan of an incarnation, in the order the scans were closed.
pub type IterateSet = Vec<IterationRecord>;

/// The own writes of an incarnation within `range`, used to replay a scan.
pub(crate) fn write_set_within(write_set: &WriteSet, range: &KeyRange) -> WriteSet {
    if range.is_empty() {
        return WriteSet::new();
    }
    write_set
        .range::<[u8], _>(range.as_bounds())
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}
