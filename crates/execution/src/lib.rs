//! Executes a block of transactions optimistically in parallel,
//! with the same outcome as running them one after the other in block order.
//!
//! See [`Scheduler::process_all`].

pub mod error;
pub mod metrics;
pub mod options;
pub mod scheduler;

pub use error::{ConfigError, SchedulerError};
pub use options::{InvalidationPolicy, SchedulerOptions};
pub use scheduler::{BlockOutput, ExecError, Scheduler, TaskStatus, TxBody, TxOutcome, TxRequest};

pub type Result<T> = core::result::Result<T, SchedulerError>;
