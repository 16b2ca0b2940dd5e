use bytes::Bytes;
use occstore_primitives::TxIndex;
use std::fmt;
use thiserror::Error;

/// A read observed an estimate written by `blocking_tx`.
///
/// This is not a failure of the reading transaction.
/// It means the current incarnation cannot proceed until `blocking_tx` settles,
/// so the whole incarnation is discarded and rescheduled.
#[derive(Error, Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[error("observed an estimate written by transaction {blocking_tx}")]
pub struct Abort {
    /// The transaction whose unresolved write was observed.
    pub blocking_tx: TxIndex,
}

impl Abort {
    pub fn new(blocking_tx: TxIndex) -> Self {
        Self { blocking_tx }
    }
}

#[derive(Error, Debug)]
pub enum DatastoreError {
    #[error("Key `{}` still holds an estimate from transaction {tx_index} while flushing", DisplayKey(key))]
    EstimateAtFlush { key: Bytes, tx_index: TxIndex },
    #[error("Failed to write to the base store: {0}")]
    BaseStore(#[source] anyhow::Error),
}

/// Renders a key as utf-8 when possible, hex otherwise.
pub(crate) struct DisplayKey<'a>(pub &'a [u8]);

impl fmt::Display for DisplayKey<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(self.0) {
            Ok(s) if s.chars().all(|c| !c.is_control()) => f.write_str(s),
            _ => self.0.iter().try_for_each(|b| write!(f, "{b:02x}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_key() {
        assert_eq!(DisplayKey(b"balance/alice").to_string(), "balance/alice");
        assert_eq!(DisplayKey(&[0x00, 0xff]).to_string(), "00ff");
    }

    #[test]
    fn abort_message() {
        let abort = Abort::new(TxIndex(2));
        assert_eq!(abort.to_string(), "observed an estimate written by transaction 2");
        let _: &dyn std::error::Error = &abort;
    }

    #[test]
    fn estimate_at_flush_message() {
        let err = DatastoreError::EstimateAtFlush {
            key: Bytes::from_static(b"k"),
            tx_index: TxIndex(3),
        };
        assert_eq!(
            err.to_string(),
            "Key `k` still holds an estimate from transaction 3 while flushing"
        );
    }
}
