use occstore_datastore::error::DatastoreError;
use occstore_primitives::TxIndex;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Transaction {index} did not validate during sequential re-execution: {reason}")]
    SerialFallbackExhausted { index: TxIndex, reason: String },
    #[error(transparent)]
    Datastore(#[from] DatastoreError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("`{option}` must be within {min}..={max}, got {value}")]
    OutOfRange {
        option: &'static str,
        value: usize,
        min: usize,
        max: usize,
    },
    #[error("Failed to parse scheduler options: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Failed to start the worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}
