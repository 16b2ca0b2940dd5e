pub mod base_store;
pub mod db_metrics;
pub mod error;
pub mod multiversion;

use error::DatastoreError;

pub use base_store::{KeyRange, KvStore, MemStore, WriteBatch};
pub use error::Abort;
pub use multiversion::{
    is_estimate, IterateSet, IterationRecord, MultiVersionStore, ReadSet, TxIter, TxScratchpad, VersionStatus,
    VersionedCell, VersionedValue, WriteSet,
};

pub type Result<T> = core::result::Result<T, DatastoreError>;
