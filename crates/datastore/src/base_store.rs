//! The durable store underneath a block's [`MultiVersionStore`](crate::MultiVersionStore).
//!
//! Reads which find nothing in the multi-version store fall through to a [`KvStore`],
//! and the final state of a block is flushed into it with [`KvStore::write_batch`].

use bytes::Bytes;
use core::ops::Bound;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A batch of changes, applied in order.
///
/// `None` deletes the key.
pub type WriteBatch = Vec<(Bytes, Option<Bytes>)>;

/// A half-open key range `[start, end)`.
///
/// A missing bound is unbounded on that side.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct KeyRange {
    pub start: Option<Bytes>,
    pub end: Option<Bytes>,
}

impl KeyRange {
    /// The range covering every key.
    pub const FULL: Self = Self { start: None, end: None };

    pub fn new(start: impl Into<Bytes>, end: impl Into<Bytes>) -> Self {
        Self {
            start: Some(start.into()),
            end: Some(end.into()),
        }
    }

    /// Every key greater than or equal to `start`.
    pub fn starting_at(start: impl Into<Bytes>) -> Self {
        Self {
            start: Some(start.into()),
            end: None,
        }
    }

    /// Every key strictly less than `end`.
    pub fn to(end: impl Into<Bytes>) -> Self {
        Self {
            start: None,
            end: Some(end.into()),
        }
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.start.as_deref().is_none_or(|start| start <= key) && self.end.as_deref().is_none_or(|end| key < end)
    }

    /// Returns whether no key can fall in this range.
    pub fn is_empty(&self) -> bool {
        matches!((&self.start, &self.end), (Some(start), Some(end)) if start >= end)
    }

    /// The range as bounds usable with [`BTreeMap::range`].
    ///
    /// Callers must check [`KeyRange::is_empty`] first,
    /// as `BTreeMap::range` panics when `start > end`.
    pub(crate) fn as_bounds(&self) -> (Bound<&[u8]>, Bound<&[u8]>) {
        let start = self.start.as_deref().map_or(Bound::Unbounded, Bound::Included);
        let end = self.end.as_deref().map_or(Bound::Unbounded, Bound::Excluded);
        (start, end)
    }

    /// Collects the entries of `map` within this range, in the requested direction.
    pub(crate) fn collect_from<V, T>(
        &self,
        map: &BTreeMap<Bytes, V>,
        ascending: bool,
        mut f: impl FnMut(&Bytes, &V) -> Option<T>,
    ) -> Vec<T> {
        if self.is_empty() {
            return Vec::new();
        }
        let range = map.range::<[u8], _>(self.as_bounds());
        if ascending {
            range.filter_map(|(k, v)| f(k, v)).collect()
        } else {
            range.rev().filter_map(|(k, v)| f(k, v)).collect()
        }
    }
}

/// A key-value store that is read by transactions
/// and written once per block with the block's final state.
///
/// Reads are infallible, as in the key-value stores of the host application;
/// a store that cannot serve a read has no consistent state to offer anyway.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &[u8]) -> Option<Bytes>;

    /// Returns every entry within `range`, ordered by key
    /// ascending or descending per `ascending`.
    fn range(&self, range: &KeyRange, ascending: bool) -> Vec<(Bytes, Bytes)>;

    /// Applies `batch` atomically.
    fn write_batch(&self, batch: WriteBatch) -> anyhow::Result<()>;
}

/// An in-memory, ordered [`KvStore`].
///
/// Cloning the store yields another handle on the same data.
#[derive(Debug, Clone, Default)]
pub struct MemStore {
    inner: Arc<RwLock<BTreeMap<Bytes, Bytes>>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Returns a copy of the current contents.
    pub fn snapshot(&self) -> BTreeMap<Bytes, Bytes> {
        self.inner.read().clone()
    }

    pub fn insert(&self, key: impl Into<Bytes>, value: impl Into<Bytes>) {
        self.inner.write().insert(key.into(), value.into());
    }
}

impl<K: Into<Bytes>, V: Into<Bytes>> FromIterator<(K, V)> for MemStore {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let map = iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        Self {
            inner: Arc::new(RwLock::new(map)),
        }
    }
}

impl KvStore for MemStore {
    fn get(&self, key: &[u8]) -> Option<Bytes> {
        self.inner.read().get(key).cloned()
    }

    fn range(&self, range: &KeyRange, ascending: bool) -> Vec<(Bytes, Bytes)> {
        let map = self.inner.read();
        range.collect_from(&map, ascending, |k, v| Some((k.clone(), v.clone())))
    }

    fn write_batch(&self, batch: WriteBatch) -> anyhow::Result<()> {
        let mut map = self.inner.write();
        for (key, value) in batch {
            match value {
                Some(value) => map.insert(key, value),
                None => map.remove(&key),
            };
        }
        Ok(())
    }
}
