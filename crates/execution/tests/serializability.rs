//! Blocks of random read/write/scan programs must end in the same state,
//! with the same per-transaction outputs, as running them one after the other.

use bytes::Bytes;
use occstore_datastore::{KeyRange, KvStore, MemStore, TxScratchpad};
use occstore_execution::{ExecError, InvalidationPolicy, Scheduler, SchedulerOptions, TxRequest};
use proptest::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;

const KEYS: [&str; 5] = ["k0", "k1", "k2", "k3", "k4"];

#[derive(Debug, Clone)]
enum Op {
    Read(usize),
    Write(usize),
    Delete(usize),
    Scan { start: usize, end: usize, limit: usize, reverse: bool },
    /// Fails the transaction when the running digest is divisible by the divisor.
    FailIf(u64),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0..KEYS.len()).prop_map(Op::Read),
        4 => (0..KEYS.len()).prop_map(Op::Write),
        1 => (0..KEYS.len()).prop_map(Op::Delete),
        2 => (0..KEYS.len(), 0..=KEYS.len(), 1..4usize, any::<bool>())
            .prop_map(|(start, end, limit, reverse)| Op::Scan { start, end, limit, reverse }),
        1 => (2..6u64).prop_map(Op::FailIf),
    ]
}

/// What a program can do to the state it runs against.
trait View {
    fn get(&mut self, key: &[u8]) -> Result<Option<Bytes>, ExecError>;
    fn set(&mut self, key: Bytes, value: Bytes) -> Result<(), ExecError>;
    fn delete(&mut self, key: Bytes) -> Result<(), ExecError>;
    fn scan(&mut self, range: KeyRange, reverse: bool, limit: usize) -> Result<Vec<(Bytes, Bytes)>, ExecError>;
}

impl View for TxScratchpad<'_> {
    fn get(&mut self, key: &[u8]) -> Result<Option<Bytes>, ExecError> {
        Ok(TxScratchpad::get(self, key)?)
    }

    fn set(&mut self, key: Bytes, value: Bytes) -> Result<(), ExecError> {
        Ok(TxScratchpad::set(self, key, value)?)
    }

    fn delete(&mut self, key: Bytes) -> Result<(), ExecError> {
        Ok(TxScratchpad::delete(self, key)?)
    }

    fn scan(&mut self, range: KeyRange, reverse: bool, limit: usize) -> Result<Vec<(Bytes, Bytes)>, ExecError> {
        let iter = if reverse { self.reverse_iter(range)? } else { self.iter(range)? };
        Ok(iter.take(limit).collect::<Result<_, _>>()?)
    }
}

/// Sequential execution: a transaction's writes land in `committed` only if it succeeds.
struct SequentialView<'a> {
    committed: &'a BTreeMap<Bytes, Bytes>,
    writes: BTreeMap<Bytes, Option<Bytes>>,
}

impl View for SequentialView<'_> {
    fn get(&mut self, key: &[u8]) -> Result<Option<Bytes>, ExecError> {
        Ok(match self.writes.get(key) {
            Some(value) => value.clone(),
            None => self.committed.get(key).cloned(),
        })
    }

    fn set(&mut self, key: Bytes, value: Bytes) -> Result<(), ExecError> {
        self.writes.insert(key, Some(value));
        Ok(())
    }

    fn delete(&mut self, key: Bytes) -> Result<(), ExecError> {
        self.writes.insert(key, None);
        Ok(())
    }

    fn scan(&mut self, range: KeyRange, reverse: bool, limit: usize) -> Result<Vec<(Bytes, Bytes)>, ExecError> {
        let mut merged = self.committed.clone();
        for (key, value) in &self.writes {
            match value {
                Some(value) => merged.insert(key.clone(), value.clone()),
                None => merged.remove(key),
            };
        }
        let in_range = merged.into_iter().filter(|(key, _)| range.contains(key));
        Ok(if reverse {
            in_range.rev().take(limit).collect()
        } else {
            in_range.take(limit).collect()
        })
    }
}

fn key(i: usize) -> Bytes {
    Bytes::from_static(KEYS[i].as_bytes())
}

fn mix(digest: u64, bytes: &[u8]) -> u64 {
    bytes.iter().fold(digest.wrapping_mul(31).wrapping_add(7), |acc, &b| {
        acc.wrapping_mul(131).wrapping_add(u64::from(b))
    })
}

/// Runs `program`, folding everything it observes into a digest and writing the digest.
fn run(index: usize, program: &[Op], view: &mut impl View) -> Result<u64, ExecError> {
    let mut digest = index as u64;
    for op in program {
        match *op {
            Op::Read(k) => {
                let value = view.get(&key(k))?;
                digest = mix(digest, value.as_deref().unwrap_or(b"<none>"));
            }
            Op::Write(k) => view.set(key(k), Bytes::from(digest.to_string()))?,
            Op::Delete(k) => view.delete(key(k))?,
            Op::Scan { start, end, limit, reverse } => {
                let range = if end == KEYS.len() {
                    KeyRange::starting_at(key(start))
                } else {
                    KeyRange::new(key(start), key(end))
                };
                for (k, v) in view.scan(range, reverse, limit)? {
                    digest = mix(mix(digest, &k), &v);
                }
            }
            Op::FailIf(divisor) => {
                if digest % divisor == 0 {
                    return Err(anyhow::anyhow!("digest {digest} divisible by {divisor}").into());
                }
            }
        }
    }
    Ok(digest)
}

fn sequential(base: &BTreeMap<Bytes, Bytes>, programs: &[Vec<Op>]) -> (BTreeMap<Bytes, Bytes>, Vec<Result<u64, String>>) {
    let mut committed = base.clone();
    let mut results = Vec::new();
    for (index, program) in programs.iter().enumerate() {
        let mut view = SequentialView {
            committed: &committed,
            writes: BTreeMap::new(),
        };
        let result = run(index, program, &mut view);
        let writes = view.writes;
        match result {
            Ok(digest) => {
                for (key, value) in writes {
                    match value {
                        Some(value) => committed.insert(key, value),
                        None => committed.remove(&key),
                    };
                }
                results.push(Ok(digest));
            }
            Err(ExecError::Failed(error)) => results.push(Err(format!("{error:#}"))),
            Err(ExecError::Abort(abort)) => unreachable!("sequential execution cannot abort: {abort}"),
        }
    }
    (committed, results)
}

fn base_state() -> impl Strategy<Value = BTreeMap<Bytes, Bytes>> {
    proptest::collection::btree_map((0..KEYS.len()).prop_map(key), "[a-z]{1,3}".prop_map(Bytes::from), 0..KEYS.len())
}

fn block() -> impl Strategy<Value = Vec<Vec<Op>>> {
    proptest::collection::vec(proptest::collection::vec(op(), 1..6), 1..16)
}

fn check(
    base: BTreeMap<Bytes, Bytes>,
    programs: Vec<Vec<Op>>,
    options: SchedulerOptions,
    estimate_writes: bool,
) -> Result<(), TestCaseError> {
    let (expected_state, expected_results) = sequential(&base, &programs);

    let store: MemStore = base.into_iter().collect();
    let programs = Arc::new(programs);
    let requests = (0..programs.len())
        .map(|index| {
            let estimated: Vec<Bytes> = if estimate_writes {
                programs[index]
                    .iter()
                    .filter_map(|op| match *op {
                        Op::Write(k) | Op::Delete(k) => Some(key(k)),
                        _ => None,
                    })
                    .collect()
            } else {
                Vec::new()
            };
            let programs = programs.clone();
            TxRequest::new(move |pad| run(index, &programs[index], pad)).with_estimated_writes(estimated)
        })
        .collect();

    let scheduler = Scheduler::new(options).map_err(|e| TestCaseError::fail(e.to_string()))?;
    let output = scheduler
        .process_all(Arc::new(store.clone()), requests)
        .map_err(|e| TestCaseError::fail(e.to_string()))?;

    let results: Vec<_> = output.outcomes.into_iter().map(|outcome| outcome.result).collect();
    prop_assert_eq!(results, expected_results);
    prop_assert_eq!(store.snapshot(), expected_state);
    prop_assert_eq!(store.range(&KeyRange::FULL, true).len(), store.len());
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn parallel_matches_sequential(base in base_state(), programs in block(), workers in 1..6usize) {
        let options = SchedulerOptions { workers, ..SchedulerOptions::DEFAULT };
        check(base, programs, options, false)?;
    }

    #[test]
    fn parallel_matches_sequential_with_prefilled_estimates(base in base_state(), programs in block()) {
        let options = SchedulerOptions { workers: 4, ..SchedulerOptions::DEFAULT };
        check(base, programs, options, true)?;
    }

    #[test]
    fn estimate_policy_matches_sequential(base in base_state(), programs in block()) {
        let options = SchedulerOptions {
            workers: 4,
            invalidation: InvalidationPolicy::Estimate,
            ..SchedulerOptions::DEFAULT
        };
        check(base, programs, options, false)?;
    }

    #[test]
    fn single_round_then_sequential_matches_sequential(base in base_state(), programs in block()) {
        let options = SchedulerOptions { workers: 4, max_iterations: 1, ..SchedulerOptions::DEFAULT };
        check(base, programs, options, false)?;
    }
}
