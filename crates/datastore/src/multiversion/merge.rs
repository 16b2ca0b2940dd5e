//! Merged traversal over the three layers visible to a transaction:
//! its own writes, the multi-version store below its index, and the base store.
//!
//! The same traversal backs both live iterators and their replay during validation,
//! so that both make identical decisions for identical inputs.

use super::tracking::WriteSet;
use super::versioned_cell::{VersionStatus, VersionedValue};
use crate::error::Abort;
use bytes::Bytes;
use std::iter::Peekable;
use std::vec;

/// Where a merged entry came from.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum Layer {
    OwnWrites,
    MultiVersion,
    Base,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct MergedEntry {
    pub key: Bytes,
    pub value: Bytes,
    pub layer: Layer,
}

/// Lazily merges three key-ordered layers, all ordered in the same direction.
///
/// When several layers hold the same key, the highest layer wins
/// (own writes, then multi-version, then base).
/// Deletes in a higher layer hide the key.
/// Reaching an estimate yields `Err(Abort)` once and then fuses the traversal.
pub(crate) struct MergedLayers {
    ascending: bool,
    own: Peekable<vec::IntoIter<(Bytes, Option<Bytes>)>>,
    versioned: Peekable<vec::IntoIter<(Bytes, VersionedValue)>>,
    base: Peekable<vec::IntoIter<(Bytes, Bytes)>>,
    done: bool,
}

impl MergedLayers {
    /// `own` is the in-range part of the write set;
    /// `versioned` and `base` must already be ordered per `ascending`.
    pub fn new(
        own: &WriteSet,
        versioned: Vec<(Bytes, VersionedValue)>,
        base: Vec<(Bytes, Bytes)>,
        ascending: bool,
    ) -> Self {
        let mut own: Vec<_> = own.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        if !ascending {
            own.reverse();
        }
        Self {
            ascending,
            own: own.into_iter().peekable(),
            versioned: versioned.into_iter().peekable(),
            base: base.into_iter().peekable(),
            done: false,
        }
    }

    /// The next key to visit among the heads of all layers.
    fn next_key(&mut self) -> Option<Bytes> {
        let heads = [
            self.own.peek().map(|(k, _)| k),
            self.versioned.peek().map(|(k, _)| k),
            self.base.peek().map(|(k, _)| k),
        ];
        let ascending = self.ascending;
        heads
            .into_iter()
            .flatten()
            .min_by(|a, b| {
                let ord = a.cmp(b);
                if ascending { ord } else { ord.reverse() }
            })
            .cloned()
    }

    /// Pops the head of every layer positioned at `key`,
    /// returning the entry of the highest one.
    fn take_at(&mut self, key: &Bytes) -> Resolved {
        let own = self.own.next_if(|(k, _)| k == key).map(|(_, v)| v);
        let versioned = self.versioned.next_if(|(k, _)| k == key).map(|(_, v)| v);
        let base = self.base.next_if(|(k, _)| k == key).map(|(_, v)| v);

        if let Some(own) = own {
            return match own {
                Some(value) => Resolved::Entry(value, Layer::OwnWrites),
                None => Resolved::Hidden,
            };
        }
        if let Some(version) = versioned {
            return match version.status {
                VersionStatus::Estimate => Resolved::Estimate(Abort::new(version.tx_index)),
                VersionStatus::Deleted => Resolved::Hidden,
                VersionStatus::Concrete => match version.payload {
                    Some(value) => Resolved::Entry(value, Layer::MultiVersion),
                    None => Resolved::Hidden,
                },
            };
        }
        match base {
            Some(value) => Resolved::Entry(value, Layer::Base),
            None => Resolved::Hidden,
        }
    }
}

enum Resolved {
    Entry(Bytes, Layer),
    Hidden,
    Estimate(Abort),
}

impl Iterator for MergedLayers {
    type Item = Result<MergedEntry, Abort>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        while let Some(key) = self.next_key() {
            match self.take_at(&key) {
                Resolved::Entry(value, layer) => return Some(Ok(MergedEntry { key, value, layer })),
                Resolved::Hidden => continue,
                Resolved::Estimate(abort) => {
                    self.done = true;
                    return Some(Err(abort));
                }
            }
        }
        self.done = true;
        None
    }
}
