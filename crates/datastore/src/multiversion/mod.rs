//! The multi-version store shared by all transactions of a block
//! while they execute optimistically in parallel.
//!
//! Each transaction runs against its own [`TxScratchpad`],
//! which reads through to the writes of lower transaction indices in the [`MultiVersionStore`]
//! and then to the base store.
//! Once executed, a scratchpad publishes its writes,
//! and validation later checks that what it read and scanned is still current.

mod merge;
mod scratchpad;
mod store;
mod tracking;
mod validation;
mod versioned_cell;

pub use scratchpad::{TxIter, TxScratchpad};
pub use store::MultiVersionStore;
pub use tracking::{IterateSet, IterationRecord, ReadSet, WriteSet};
pub use versioned_cell::{is_estimate, VersionStatus, VersionedCell, VersionedValue};
