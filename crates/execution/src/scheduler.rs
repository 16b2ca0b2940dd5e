//! The driver executing a block of transactions optimistically.
//!
//! A block is processed in rounds.
//! Each round executes every pending transaction in parallel against the [`MultiVersionStore`],
//! then validates every transaction which may have been affected.
//! Transactions failing validation are re-executed in the next round with a new incarnation.
//! Should the block not settle within [`SchedulerOptions::max_iterations`] rounds,
//! the unsettled rest of the block is re-executed sequentially.

use crate::error::{ConfigError, SchedulerError};
use crate::metrics::SCHEDULER_METRICS;
use crate::options::{InvalidationPolicy, SchedulerOptions};
use bytes::Bytes;
use occstore_datastore::{Abort, KvStore, MultiVersionStore, TxScratchpad, WriteSet};
use occstore_primitives::{Incarnation, TxIndex};
use rayon::prelude::*;
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use thiserror::Error;

/// Why a transaction body did not produce a value.
#[derive(Error, Debug)]
pub enum ExecError {
    /// The body read an estimate. The incarnation is discarded and re-executed.
    #[error(transparent)]
    Abort(#[from] Abort),
    /// The transaction itself failed.
    /// It is still validated, but none of its writes are applied.
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

/// The logic of a transaction.
///
/// Bodies may run any number of times, concurrently with other bodies,
/// and must yield the same writes given the same reads.
pub type TxBody<T> = Box<dyn Fn(&mut TxScratchpad<'_>) -> Result<T, ExecError> + Send + Sync>;

/// A transaction submitted for execution.
pub struct TxRequest<T> {
    body: TxBody<T>,
    estimated_writes: Vec<Bytes>,
}

impl<T> TxRequest<T> {
    pub fn new(body: impl Fn(&mut TxScratchpad<'_>) -> Result<T, ExecError> + Send + Sync + 'static) -> Self {
        Self {
            body: Box::new(body),
            estimated_writes: Vec::new(),
        }
    }

    /// Declares keys the transaction is expected to write.
    ///
    /// They are published as estimates before the block starts,
    /// so that later transactions reading them wait for this one
    /// instead of executing against stale values.
    pub fn with_estimated_writes<K: Into<Bytes>>(mut self, keys: impl IntoIterator<Item = K>) -> Self {
        self.estimated_writes.extend(keys.into_iter().map(Into::into));
        self
    }
}

/// Where a transaction is in its lifecycle within a block.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    /// Waiting to be executed, for the first time or again.
    Pending,
    Executing,
    /// Executed, with its writes published.
    Executed,
    Validating,
    /// Consistent with the state below it as of the last validation.
    Valid,
}

/// The result of one transaction of a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOutcome<T> {
    pub index: TxIndex,
    /// The incarnation whose result this is.
    pub incarnation: Incarnation,
    pub result: Result<T, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockOutput<T> {
    /// One outcome per request, in block order.
    pub outcomes: Vec<TxOutcome<T>>,
    /// The number of parallel rounds run.
    pub rounds: usize,
    /// Whether the block had to be finished sequentially.
    pub serial_fallback: bool,
    /// The number of keys flushed into the base store.
    pub keys_written: usize,
}

struct TxState<T> {
    status: TaskStatus,
    incarnation: Incarnation,
    result: Option<Result<T, String>>,
    /// The transaction this one last conflicted with, if it may still be unsettled.
    blocked_on: Option<TxIndex>,
}

/// What became of one incarnation.
enum Execution<T> {
    Done(Result<T, String>),
    Aborted(Abort),
}

/// The state of a block being processed.
struct Block<T> {
    mvs: MultiVersionStore,
    requests: Vec<TxRequest<T>>,
    txs: Vec<TxState<T>>,
}

impl<T> Block<T> {
    fn new(store: Arc<dyn KvStore>, requests: Vec<TxRequest<T>>) -> Self {
        let txs = requests
            .iter()
            .map(|_| TxState {
                status: TaskStatus::Pending,
                incarnation: Incarnation::ZERO,
                result: None,
                blocked_on: None,
            })
            .collect();
        Self {
            mvs: MultiVersionStore::new(store),
            requests,
            txs,
        }
    }

    fn indices(&self) -> impl Iterator<Item = TxIndex> + use<T> {
        (0..self.txs.len()).map(TxIndex::from)
    }

    fn tx_mut(&mut self, index: TxIndex) -> &mut TxState<T> {
        &mut self.txs[index.idx()]
    }

    fn prefill_estimates(&self) {
        for (index, request) in self.indices().zip(&self.requests) {
            if request.estimated_writes.is_empty() {
                continue;
            }
            let estimates: WriteSet = request.estimated_writes.iter().map(|key| (key.clone(), None)).collect();
            self.mvs.set_estimated_write_set(index, Incarnation::ZERO, &estimates);
        }
    }

    /// The lowest transaction not known to be valid.
    fn first_unsettled(&self) -> Option<TxIndex> {
        self.indices().find(|&index| self.txs[index.idx()].status != TaskStatus::Valid)
    }

    /// The lowest transaction waiting for execution.
    fn first_pending(&self) -> Option<TxIndex> {
        self.indices().find(|&index| self.txs[index.idx()].status == TaskStatus::Pending)
    }

    /// Discards the published state of `index` and schedules it for another incarnation.
    fn reschedule(&mut self, index: TxIndex, policy: InvalidationPolicy, blocked_on: Option<TxIndex>) {
        let incarnation = self.txs[index.idx()].incarnation;
        match policy {
            InvalidationPolicy::Estimate => self.mvs.invalidate_write_set(index, incarnation),
            InvalidationPolicy::Remove => {
                self.mvs.remove(index);
                self.mvs.clear_read_set(index);
                self.mvs.clear_iterate_set(index);
            }
        }
        let tx = self.tx_mut(index);
        tx.incarnation = incarnation.next();
        tx.status = TaskStatus::Pending;
        tx.blocked_on = blocked_on;
    }

    fn into_outcomes(self) -> Vec<TxOutcome<T>> {
        self.txs
            .into_iter()
            .enumerate()
            .map(|(i, tx)| {
                debug_assert_eq!(tx.status, TaskStatus::Valid, "transaction {i} left unsettled");
                TxOutcome {
                    index: TxIndex::from(i),
                    incarnation: tx.incarnation,
                    result: tx.result.unwrap_or_else(|| Err("transaction was never executed".to_owned())),
                }
            })
            .collect()
    }
}

/// Executes blocks of transactions on a fixed pool of worker threads.
pub struct Scheduler {
    options: SchedulerOptions,
    pool: rayon::ThreadPool,
}

impl Scheduler {
    pub fn new(options: SchedulerOptions) -> Result<Self, ConfigError> {
        options.validate()?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(options.workers)
            .thread_name(|i| format!("occstore-worker-{i}"))
            .build()?;
        Ok(Self { options, pool })
    }

    pub fn options(&self) -> &SchedulerOptions {
        &self.options
    }

    /// Executes `requests` as one block on top of `store`,
    /// then writes the resulting state into `store`.
    ///
    /// The final state and every outcome are those of executing the requests
    /// one after the other in order.
    #[tracing::instrument(level = "debug", skip_all, fields(txs = requests.len()))]
    pub fn process_all<T: Send>(
        &self,
        store: Arc<dyn KvStore>,
        requests: Vec<TxRequest<T>>,
    ) -> crate::Result<BlockOutput<T>> {
        let mut block = Block::new(store, requests);
        block.prefill_estimates();

        let mut rounds = 0;
        while let Some(first) = block.first_pending() {
            if rounds == self.options.max_iterations {
                break;
            }
            rounds += 1;
            self.execute_pending(&mut block);
            let invalid = self.validate_from(&mut block, first);
            tracing::debug!(round = rounds, %first, invalid, "finished round");
        }

        let serial_fallback = block.first_unsettled().is_some();
        if serial_fallback {
            self.execute_sequentially(&mut block)?;
        }
        let keys_written = block.mvs.write_latest_to_store()?;

        let completion = if serial_fallback { "serial-fallback" } else { "parallel" };
        SCHEDULER_METRICS
            .rounds
            .with_label_values(completion)
            .observe(rounds as f64);
        tracing::debug!(rounds, serial_fallback, keys_written, "block done");

        Ok(BlockOutput {
            outcomes: block.into_outcomes(),
            rounds,
            serial_fallback,
            keys_written,
        })
    }

    /// Executes every pending transaction.
    ///
    /// Runs in waves: a transaction blocked on another pending one
    /// only runs in a wave after the one it is blocked on.
    /// The lowest pending transaction can never be blocked,
    /// so every wave makes progress.
    fn execute_pending<T: Send>(&self, block: &mut Block<T>) {
        let mut waiting = BTreeMap::new();
        for (i, tx) in block.txs.iter_mut().enumerate() {
            if tx.status == TaskStatus::Pending {
                waiting.insert(TxIndex::from(i), tx.blocked_on.take());
            }
        }

        while !waiting.is_empty() {
            let ready: Vec<(TxIndex, Incarnation)> = waiting
                .iter()
                .filter(|&(_, &blocker)| blocker.is_none_or(|blocker| !waiting.contains_key(&blocker)))
                .map(|(&index, _)| (index, block.txs[index.idx()].incarnation))
                .collect();
            for &(index, _) in &ready {
                waiting.remove(&index);
                block.tx_mut(index).status = TaskStatus::Executing;
            }

            let Block { mvs, requests, .. } = &*block;
            let executions: Vec<_> = self.pool.install(|| {
                ready
                    .par_iter()
                    .map(|&(index, incarnation)| {
                        let execution = execute_tx(mvs, &requests[index.idx()].body, index, incarnation);
                        (index, execution)
                    })
                    .collect()
            });

            for (index, execution) in executions {
                match execution {
                    Execution::Done(result) => {
                        let tx = block.tx_mut(index);
                        tx.status = TaskStatus::Executed;
                        tx.result = Some(result);
                    }
                    Execution::Aborted(abort) => {
                        tracing::trace!(%index, blocking_tx = %abort.blocking_tx, "execution aborted");
                        // Always estimates, whatever the configured policy: readers of this
                        // transaction must abort until it has run again.
                        block.reschedule(index, InvalidationPolicy::Estimate, None);
                        waiting.insert(index, Some(abort.blocking_tx));
                    }
                }
            }
        }
    }

    /// Validates every transaction from `first` on,
    /// rescheduling those found invalid.
    ///
    /// Transactions below `first` read nothing that changed since they were last validated.
    /// Returns the number of invalid transactions.
    fn validate_from<T>(&self, block: &mut Block<T>, first: TxIndex) -> usize {
        let indices: Vec<TxIndex> = (first.idx()..block.txs.len()).map(TxIndex::from).collect();
        for &index in &indices {
            block.tx_mut(index).status = TaskStatus::Validating;
        }

        // Verdicts are only applied once all are in,
        // so that every transaction is judged against the same state.
        let mvs = &block.mvs;
        let verdicts: Vec<_> = self.pool.install(|| {
            indices
                .par_iter()
                .map(|&index| {
                    let _live = live_worker();
                    (index, mvs.validate_transaction_state(index))
                })
                .collect()
        });

        let mut invalid = 0;
        for (index, (valid, conflicts)) in verdicts {
            if valid {
                block.tx_mut(index).status = TaskStatus::Valid;
                continue;
            }
            invalid += 1;
            SCHEDULER_METRICS.validation_failures.inc();
            tracing::debug!(%index, ?conflicts, "validation failed");
            block.reschedule(index, self.options.invalidation, conflicts.last().copied());
        }
        invalid
    }

    /// Re-executes every transaction from the lowest unsettled one on,
    /// one at a time on the calling thread, validating each right away.
    fn execute_sequentially<T>(&self, block: &mut Block<T>) -> crate::Result<()> {
        let Some(first) = block.first_unsettled() else {
            return Ok(());
        };
        SCHEDULER_METRICS.serial_fallbacks.inc();
        tracing::warn!(%first, max_iterations = self.options.max_iterations, "falling back to sequential execution");

        for index in (first.idx()..block.txs.len()).map(TxIndex::from) {
            let tx = block.tx_mut(index);
            if tx.status != TaskStatus::Pending {
                tx.incarnation = tx.incarnation.next();
            }
            tx.status = TaskStatus::Executing;
            let incarnation = tx.incarnation;

            match execute_tx(&block.mvs, &block.requests[index.idx()].body, index, incarnation) {
                Execution::Done(result) => {
                    let tx = block.tx_mut(index);
                    tx.result = Some(result);
                    tx.status = TaskStatus::Validating;
                }
                Execution::Aborted(abort) => {
                    return Err(SchedulerError::SerialFallbackExhausted {
                        index,
                        reason: abort.to_string(),
                    });
                }
            }

            let (valid, conflicts) = block.mvs.validate_transaction_state(index);
            if !valid {
                return Err(SchedulerError::SerialFallbackExhausted {
                    index,
                    reason: format!("validation failed, conflicting with {conflicts:?}"),
                });
            }
            block.tx_mut(index).status = TaskStatus::Valid;
        }
        Ok(())
    }
}

/// Counts a running job in [`SCHEDULER_METRICS`] until dropped.
fn live_worker() -> impl Drop {
    SCHEDULER_METRICS.live_workers.inc();
    scopeguard::guard((), |()| SCHEDULER_METRICS.live_workers.dec())
}

/// Runs one incarnation and publishes its effects.
///
/// Nothing is published for an aborted incarnation,
/// even if its body ignored the abort or panicked because of it.
fn execute_tx<T>(mvs: &MultiVersionStore, body: &TxBody<T>, index: TxIndex, incarnation: Incarnation) -> Execution<T> {
    let _live = live_worker();
    let mut pad = TxScratchpad::new(mvs, index, incarnation);
    let result = panic::catch_unwind(AssertUnwindSafe(|| body(&mut pad)));

    if let Some(abort) = pad.aborted() {
        SCHEDULER_METRICS.executions.with_label_values("aborted").inc();
        return Execution::Aborted(abort);
    }

    let result = match result {
        Ok(Ok(value)) => Ok(value),
        // Not raised by the scratchpad, so there is nothing to wait for.
        Ok(Err(ExecError::Abort(abort))) => Err(abort.to_string()),
        Ok(Err(ExecError::Failed(error))) => Err(format!("{error:#}")),
        Err(payload) => Err(panic_message(&*payload)),
    };
    if let Err(error) = &result {
        tracing::debug!(%index, %incarnation, %error, "transaction failed");
        pad.discard_writes();
    }
    let outcome = if result.is_ok() { "committed" } else { "failed" };
    SCHEDULER_METRICS.executions.with_label_values(outcome).inc();

    match pad.write_to_multi_version_store() {
        Ok(()) => Execution::Done(result),
        Err(abort) => Execution::Aborted(abort),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    let message = payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string payload");
    format!("transaction panicked: {message}")
}
