//! Deciding whether an executed incarnation is still consistent
//! with the current state of the [`MultiVersionStore`].
//!
//! Validation only reads the store.
//! Every check runs on the calling thread and yields exactly one verdict,
//! so repeated validations against the same state always agree.

use super::merge::MergedLayers;
use super::store::MultiVersionStore;
use super::tracking::IterationRecord;
use super::versioned_cell::VersionStatus;
use crate::db_metrics::MVS_METRICS;
use bytes::Bytes;
use occstore_primitives::TxIndex;

/// The outcome of replaying one recorded scan.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum ScanVerdict {
    Unchanged,
    Diverged,
    Estimate(TxIndex),
}

impl MultiVersionStore {
    /// Validates the latest incarnation of `index`.
    ///
    /// Returns whether the incarnation is valid,
    /// and the sorted indices of the transactions it conflicts with.
    /// An invalid incarnation may have no conflicts,
    /// e.g., when a key it read was removed from the store altogether.
    pub fn validate_transaction_state(&self, index: TxIndex) -> (bool, Vec<TxIndex>) {
        MVS_METRICS.live_validations.inc();
        scopeguard::defer!(MVS_METRICS.live_validations.dec());

        let (reads_valid, mut conflicts) = self.check_read_set_at_index(index);
        let (scans_valid, scan_conflicts) = self.check_iterate_set_at_index(index);
        conflicts.extend(scan_conflicts);
        conflicts.sort_unstable();
        conflicts.dedup();

        let valid = reads_valid && scans_valid;
        let verdict = if valid { "valid" } else { "invalid" };
        MVS_METRICS.validations.with_label_values(verdict).inc();
        tracing::trace!(%index, valid, ?conflicts, "validated transaction");
        (valid, conflicts)
    }

    /// Checks that every key read by `index` still has the value it observed.
    ///
    /// Whenever the current value comes from a transaction rather than the base store,
    /// a mismatch names that transaction as a conflict.
    pub fn check_read_set_at_index(&self, index: TxIndex) -> (bool, Vec<TxIndex>) {
        let Some(read_set) = self.get_read_set(index) else {
            return (true, Vec::new());
        };

        let mut valid = true;
        let mut conflicts = Vec::new();
        for (key, observed) in read_set.iter() {
            let (current, writer) = match self.get_latest_before_index(index, key) {
                Some(version) => match version.status {
                    VersionStatus::Estimate => {
                        valid = false;
                        conflicts.push(version.tx_index);
                        continue;
                    }
                    VersionStatus::Deleted => (None, Some(version.tx_index)),
                    VersionStatus::Concrete => (version.payload, Some(version.tx_index)),
                },
                None => (self.parent().get(key), None),
            };
            // More than one observation means the key changed during execution.
            if observed != [current] {
                valid = false;
                conflicts.extend(writer);
            }
        }
        (valid, conflicts)
    }

    /// Replays every scan of `index` and checks that it still yields the same keys.
    ///
    /// Reaching an estimate settles the verdict on the spot:
    /// the replay stops and only the writer of the estimate is reported.
    pub fn check_iterate_set_at_index(&self, index: TxIndex) -> (bool, Vec<TxIndex>) {
        let Some(iterate_set) = self.get_iterate_set(index) else {
            return (true, Vec::new());
        };

        let mut valid = true;
        for record in &iterate_set {
            match self.replay_scan(index, record) {
                ScanVerdict::Unchanged => {}
                ScanVerdict::Diverged => valid = false,
                ScanVerdict::Estimate(writer) => return (false, vec![writer]),
            }
        }
        (valid, Vec::new())
    }

    /// Runs the traversal of `record` against the current state,
    /// as far as the original scan went.
    fn replay_scan(&self, index: TxIndex, record: &IterationRecord) -> ScanVerdict {
        if record.stopped_early() && record.early_stop_key.is_none() {
            // Nothing was consumed, so nothing could have been missed.
            return ScanVerdict::Unchanged;
        }

        let versioned = self.collect_iterator_items(index, &record.range, record.ascending);
        let base = if record.range.is_empty() {
            Vec::new()
        } else {
            self.parent().range(&record.range, record.ascending)
        };
        let mut layers = MergedLayers::new(&record.write_set, versioned, base, record.ascending);

        let mut expected = record.observed_keys.iter();
        loop {
            let next_expected: Option<&Bytes> = expected.next();
            if next_expected.is_none() && record.stopped_early() {
                return ScanVerdict::Unchanged;
            }
            match (layers.next(), next_expected) {
                (Some(Err(abort)), _) => return ScanVerdict::Estimate(abort.blocking_tx),
                (Some(Ok(entry)), Some(key)) if entry.key == *key => {}
                (None, None) => return ScanVerdict::Unchanged,
                _ => return ScanVerdict::Diverged,
            }
        }
    }
}
