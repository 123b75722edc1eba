// Copyright © Parallax Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::{
    BlockExecutionError, ExecutionStep, Interrupt, SchedulerParallelImpl, StepFailure,
    TransactionExecutor,
};
use claims::{assert_matches, assert_ok};
use parallax_storage::{
    BackendStorage, MultiLayerStorage, Storage, StorageError, StorageRead, StorageView,
    StorageWrite,
};
use parallax_types::{BlockHeader, LedgerConfig, StateKey, StateValue};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

const BALANCE_TABLE: &str = "t_balance";
const DATA_TABLE: &str = "t_data";

struct MockTransaction {
    input: String,
}

fn transactions(count: usize) -> Vec<MockTransaction> {
    (0..count)
        .map(|index| MockTransaction {
            input: index.to_string(),
        })
        .collect()
}

fn header() -> BlockHeader {
    BlockHeader {
        number: 1,
        ..BlockHeader::default()
    }
}

fn config() -> LedgerConfig {
    LedgerConfig::default()
}

fn numeric(value: i64) -> StateValue {
    StateValue::new(value.to_string().into_bytes())
}

fn as_numeric(value: &StateValue) -> Option<i64> {
    std::str::from_utf8(value.data()).ok()?.parse().ok()
}

fn balance_key(user: usize) -> StateKey {
    StateKey::new(BALANCE_TABLE, user.to_string())
}

fn shared_key() -> StateKey {
    StateKey::new(DATA_TABLE, "shared")
}

fn fresh_view(storage: &MultiLayerStorage<BackendStorage>) -> StorageView<Arc<BackendStorage>> {
    let mut view = storage.fork();
    view.new_mutable();
    view
}

fn empty_storage() -> MultiLayerStorage<BackendStorage> {
    MultiLayerStorage::new(BackendStorage::new_concurrent())
}

fn seeded_storage(users: usize, balance: i64) -> MultiLayerStorage<BackendStorage> {
    let storage = empty_storage();
    let view = fresh_view(&storage);
    let entries = (0..users).map(|user| (balance_key(user), numeric(balance))).collect();
    view.write_some(entries).unwrap();
    storage.push_view(view).unwrap();
    storage
}

fn attempt_counters(count: usize) -> Vec<AtomicUsize> {
    (0..count).map(|_| AtomicUsize::new(0)).collect()
}

// --- Transfers: the conflict-heavy workload from the original scheduler
// --- test suite. `route` maps a transaction number to (from, to, amount).

type Route = fn(usize, usize) -> (usize, usize, i64);

fn ring_route(n: usize, users: usize) -> (usize, usize, i64) {
    (n % users, (n + users / 2) % users, 1)
}

fn scatter_route(n: usize, users: usize) -> (usize, usize, i64) {
    (n % users, (n * 7 + 3) % users, (n % 5) as i64 + 1)
}

struct TransferExecutor {
    users: usize,
    route: Route,
}

struct TransferContext {
    context_id: i32,
    input: String,
    decoded: Option<(StateKey, StateKey, i64)>,
}

impl TransactionExecutor for TransferExecutor {
    type Context = TransferContext;
    type Error = String;
    type Receipt = i32;
    type Transaction = MockTransaction;

    fn create_execute_context<S: Storage>(
        &self,
        _storage: &S,
        _block_header: &BlockHeader,
        transaction: &MockTransaction,
        context_id: i32,
        _ledger_config: &LedgerConfig,
    ) -> Result<TransferContext, StepFailure<String>> {
        Ok(TransferContext {
            context_id,
            input: transaction.input.clone(),
            decoded: None,
        })
    }

    fn execute_step<S: Storage>(
        &self,
        step: ExecutionStep,
        context: &mut TransferContext,
        storage: &S,
    ) -> Result<Option<i32>, StepFailure<String>> {
        match step {
            ExecutionStep::Decode => {
                let n: usize = context
                    .input
                    .parse()
                    .map_err(|_| StepFailure::Executor("malformed input".to_string()))?;
                let (from, to, amount) = (self.route)(n, self.users);
                context.decoded = Some((
                    balance_key(from),
                    balance_key(to),
                    amount,
                ));
                Ok(None)
            },
            ExecutionStep::Apply => {
                let (from, to, amount) = context
                    .decoded
                    .clone()
                    .ok_or_else(|| StepFailure::Executor("apply before decode".to_string()))?;

                let from_balance = storage
                    .read_one(&from)?
                    .as_ref()
                    .and_then(as_numeric)
                    .ok_or_else(|| StepFailure::Executor(format!("missing balance for {from}")))?;
                storage.write_one(from, numeric(from_balance - amount))?;

                let to_balance = storage
                    .read_one(&to)?
                    .as_ref()
                    .and_then(as_numeric)
                    .ok_or_else(|| StepFailure::Executor(format!("missing balance for {to}")))?;
                storage.write_one(to, numeric(to_balance + amount))?;
                Ok(None)
            },
            ExecutionStep::Finalize => Ok(Some(context.context_id)),
        }
    }
}

// --- Disjoint writers: no conflicts at all.

#[derive(Default)]
struct DisjointWriter {
    executions: AtomicUsize,
}

struct WriterContext {
    context_id: i32,
    input: String,
}

impl TransactionExecutor for DisjointWriter {
    type Context = WriterContext;
    type Error = String;
    type Receipt = i32;
    type Transaction = MockTransaction;

    fn create_execute_context<S: Storage>(
        &self,
        _storage: &S,
        _block_header: &BlockHeader,
        transaction: &MockTransaction,
        context_id: i32,
        _ledger_config: &LedgerConfig,
    ) -> Result<WriterContext, StepFailure<String>> {
        Ok(WriterContext {
            context_id,
            input: transaction.input.clone(),
        })
    }

    fn execute_step<S: Storage>(
        &self,
        step: ExecutionStep,
        context: &mut WriterContext,
        storage: &S,
    ) -> Result<Option<i32>, StepFailure<String>> {
        match step {
            ExecutionStep::Decode => Ok(None),
            ExecutionStep::Apply => {
                self.executions.fetch_add(1, Ordering::SeqCst);
                storage.write_one(
                    StateKey::new(DATA_TABLE, &context.input),
                    StateValue::new(context.input.clone().into_bytes()),
                )?;
                Ok(None)
            },
            ExecutionStep::Finalize => Ok(Some(context.context_id)),
        }
    }
}

// --- One writer, many readers of the same key.

struct MixedExecutor {
    attempts: Vec<AtomicUsize>,
}

struct MixedContext {
    input: String,
    observed: Option<StateValue>,
    context_id: i32,
}

impl TransactionExecutor for MixedExecutor {
    type Context = MixedContext;
    type Error = String;
    type Receipt = String;
    type Transaction = MockTransaction;

    fn create_execute_context<S: Storage>(
        &self,
        _storage: &S,
        _block_header: &BlockHeader,
        transaction: &MockTransaction,
        context_id: i32,
        _ledger_config: &LedgerConfig,
    ) -> Result<MixedContext, StepFailure<String>> {
        Ok(MixedContext {
            input: transaction.input.clone(),
            observed: None,
            context_id,
        })
    }

    fn execute_step<S: Storage>(
        &self,
        step: ExecutionStep,
        context: &mut MixedContext,
        storage: &S,
    ) -> Result<Option<String>, StepFailure<String>> {
        match step {
            ExecutionStep::Decode => Ok(None),
            ExecutionStep::Apply => {
                self.attempts[context.context_id as usize].fetch_add(1, Ordering::SeqCst);
                if context.input == "w" {
                    storage.write_one(shared_key(), StateValue::new(b"v".to_vec()))?;
                } else {
                    context.observed = storage.read_one(&shared_key())?;
                }
                Ok(None)
            },
            ExecutionStep::Finalize => {
                let receipt = if context.input == "w" {
                    "wrote".to_string()
                } else {
                    context
                        .observed
                        .as_ref()
                        .and_then(|value| std::str::from_utf8(value.data()).ok())
                        .unwrap_or("none")
                        .to_string()
                };
                Ok(Some(receipt))
            },
        }
    }
}

// --- Read-then-write chain over a single key: fully serialized.

struct ChainExecutor;

struct ChainContext {
    context_id: i32,
    observed: Option<StateValue>,
}

impl TransactionExecutor for ChainExecutor {
    type Context = ChainContext;
    type Error = String;
    type Receipt = String;
    type Transaction = MockTransaction;

    fn create_execute_context<S: Storage>(
        &self,
        _storage: &S,
        _block_header: &BlockHeader,
        _transaction: &MockTransaction,
        context_id: i32,
        _ledger_config: &LedgerConfig,
    ) -> Result<ChainContext, StepFailure<String>> {
        Ok(ChainContext {
            context_id,
            observed: None,
        })
    }

    fn execute_step<S: Storage>(
        &self,
        step: ExecutionStep,
        context: &mut ChainContext,
        storage: &S,
    ) -> Result<Option<String>, StepFailure<String>> {
        match step {
            ExecutionStep::Decode => Ok(None),
            ExecutionStep::Apply => {
                context.observed = storage.read_one(&shared_key())?;
                storage.write_one(
                    shared_key(),
                    StateValue::new(context.context_id.to_string().into_bytes()),
                )?;
                Ok(None)
            },
            ExecutionStep::Finalize => {
                let receipt = context
                    .observed
                    .as_ref()
                    .and_then(|value| std::str::from_utf8(value.data()).ok())
                    .unwrap_or("none")
                    .to_string();
                Ok(Some(receipt))
            },
        }
    }
}

// --- Fails a configured transaction for its first N attempts.

struct FlakyExecutor {
    fail_index: usize,
    fail_times: usize,
    attempts: Vec<AtomicUsize>,
}

impl TransactionExecutor for FlakyExecutor {
    type Context = WriterContext;
    type Error = String;
    type Receipt = i32;
    type Transaction = MockTransaction;

    fn create_execute_context<S: Storage>(
        &self,
        _storage: &S,
        _block_header: &BlockHeader,
        transaction: &MockTransaction,
        context_id: i32,
        _ledger_config: &LedgerConfig,
    ) -> Result<WriterContext, StepFailure<String>> {
        Ok(WriterContext {
            context_id,
            input: transaction.input.clone(),
        })
    }

    fn execute_step<S: Storage>(
        &self,
        step: ExecutionStep,
        context: &mut WriterContext,
        storage: &S,
    ) -> Result<Option<i32>, StepFailure<String>> {
        match step {
            ExecutionStep::Decode => Ok(None),
            ExecutionStep::Apply => {
                let index = context.context_id as usize;
                let attempt = self.attempts[index].fetch_add(1, Ordering::SeqCst);
                if index == self.fail_index && attempt < self.fail_times {
                    return Err(StepFailure::Executor("synthetic failure".to_string()));
                }
                storage.write_one(
                    StateKey::new(DATA_TABLE, &context.input),
                    StateValue::new(context.input.clone().into_bytes()),
                )?;
                Ok(None)
            },
            ExecutionStep::Finalize => Ok(Some(context.context_id)),
        }
    }
}

// --- Fires the scheduler's interrupt from inside a transaction.

struct CancelExecutor {
    trigger: i32,
    interrupt: Interrupt,
}

impl TransactionExecutor for CancelExecutor {
    type Context = WriterContext;
    type Error = String;
    type Receipt = i32;
    type Transaction = MockTransaction;

    fn create_execute_context<S: Storage>(
        &self,
        _storage: &S,
        _block_header: &BlockHeader,
        transaction: &MockTransaction,
        context_id: i32,
        _ledger_config: &LedgerConfig,
    ) -> Result<WriterContext, StepFailure<String>> {
        Ok(WriterContext {
            context_id,
            input: transaction.input.clone(),
        })
    }

    fn execute_step<S: Storage>(
        &self,
        step: ExecutionStep,
        context: &mut WriterContext,
        storage: &S,
    ) -> Result<Option<i32>, StepFailure<String>> {
        match step {
            ExecutionStep::Decode => Ok(None),
            ExecutionStep::Apply => {
                if context.context_id == self.trigger {
                    self.interrupt.set();
                }
                storage.write_one(
                    StateKey::new(DATA_TABLE, &context.input),
                    StateValue::new(context.input.clone().into_bytes()),
                )?;
                Ok(None)
            },
            ExecutionStep::Finalize => Ok(Some(context.context_id)),
        }
    }
}

#[test]
fn empty_block() {
    let storage = empty_storage();
    let view = fresh_view(&storage);
    let scheduler = SchedulerParallelImpl::new();

    let receipts = assert_ok!(scheduler.execute_block(
        &view,
        &DisjointWriter::default(),
        &header(),
        &[],
        &config()
    ));
    assert!(receipts.is_empty());

    drop(view);
    assert_eq!(storage.layer_count(), 0);
}

#[test]
fn view_without_mutable_layer_is_rejected() {
    let storage = empty_storage();
    let view = storage.fork();
    let scheduler = SchedulerParallelImpl::new();

    let result = scheduler.execute_block(
        &view,
        &DisjointWriter::default(),
        &header(),
        &transactions(4),
        &config(),
    );
    assert_matches!(
        result,
        Err(BlockExecutionError::Storage(StorageError::MissingMutableLayer))
    );
}

#[test]
fn disjoint_writes_single_chunk() {
    let storage = empty_storage();
    let view = fresh_view(&storage);
    let executor = DisjointWriter::default();
    let scheduler = SchedulerParallelImpl::with_chunk_size(128);

    let txns = transactions(100);
    let receipts = assert_ok!(scheduler.execute_block(&view, &executor, &header(), &txns, &config()));

    assert_eq!(receipts, (0..100).collect::<Vec<i32>>());
    // No conflicts, so nothing was re-executed.
    assert_eq!(executor.executions.load(Ordering::SeqCst), 100);

    for index in 0..100 {
        let key = StateKey::new(DATA_TABLE, index.to_string());
        let value = view.read_one(&key).unwrap().unwrap();
        assert_eq!(value.data().as_ref(), index.to_string().as_bytes());
    }
}

#[test]
fn thousand_disjoint_writes() {
    let storage = empty_storage();
    let view = fresh_view(&storage);
    let scheduler = SchedulerParallelImpl::new();

    let txns = transactions(1000);
    let receipts = assert_ok!(scheduler.execute_block(
        &view,
        &DisjointWriter::default(),
        &header(),
        &txns,
        &config()
    ));
    assert_eq!(receipts.len(), 1000);
    assert_eq!(receipts, (0..1000).collect::<Vec<i32>>());
}

#[test]
fn transfer_ring_conserves_balances() {
    const USERS: usize = 1000;
    const INITIAL: i64 = 100_000;

    let storage = seeded_storage(USERS, INITIAL);
    let view = fresh_view(&storage);
    let executor = TransferExecutor {
        users: USERS,
        route: ring_route,
    };
    let scheduler = SchedulerParallelImpl::new();

    let txns = transactions(1000);
    let receipts = assert_ok!(scheduler.execute_block(&view, &executor, &header(), &txns, &config()));
    assert_eq!(receipts, (0..1000).collect::<Vec<i32>>());

    assert_ok!(storage.push_view(view));
    let reader = storage.fork();
    for user in 0..USERS {
        let value = reader.read_one(&balance_key(user)).unwrap().unwrap();
        // Every user sends and receives exactly once per ring lap.
        assert_eq!(as_numeric(&value), Some(INITIAL));
    }
}

#[test]
fn mixed_readers_retry_once() {
    let storage = empty_storage();
    let view = fresh_view(&storage);

    let mut inputs = vec!["w".to_string()];
    inputs.extend((0..9).map(|_| "r".to_string()));
    let txns: Vec<MockTransaction> =
        inputs.into_iter().map(|input| MockTransaction { input }).collect();

    let executor = MixedExecutor {
        attempts: attempt_counters(txns.len()),
    };
    let scheduler = SchedulerParallelImpl::with_chunk_size(16);
    let receipts = assert_ok!(scheduler.execute_block(&view, &executor, &header(), &txns, &config()));

    assert_eq!(receipts[0], "wrote");
    for receipt in &receipts[1..] {
        // After the retry every reader observes the committed write.
        assert_eq!(receipt, "v");
    }

    // The writer commits on the first walk; the readers conflict against its
    // write and execute exactly twice.
    assert_eq!(executor.attempts[0].load(Ordering::SeqCst), 1);
    for attempts in &executor.attempts[1..] {
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }
}

#[test]
fn speculative_writes_isolated() {
    let storage = empty_storage();
    let view = fresh_view(&storage);
    let scheduler = SchedulerParallelImpl::with_chunk_size(16);

    let txns = transactions(8);
    let receipts =
        assert_ok!(scheduler.execute_block(&view, &ChainExecutor, &header(), &txns, &config()));

    // No transaction ever observes a peer's uncommitted write: each sees
    // exactly the committed value of its predecessor, as in a sequential run.
    let expected: Vec<String> =
        std::iter::once("none".to_string()).chain((0..7).map(|id| id.to_string())).collect();
    assert_eq!(receipts, expected);
}

#[test]
fn executor_failure_retried_in_isolation() {
    let storage = empty_storage();
    let view = fresh_view(&storage);
    let executor = FlakyExecutor {
        fail_index: 5,
        fail_times: 1,
        attempts: attempt_counters(10),
    };
    let scheduler = SchedulerParallelImpl::with_chunk_size(16);

    let txns = transactions(10);
    let receipts = assert_ok!(scheduler.execute_block(&view, &executor, &header(), &txns, &config()));
    assert_eq!(receipts, (0..10).collect::<Vec<i32>>());

    // The prefix committed on the first walk; the failing transaction and
    // the tail behind it ran twice.
    for index in 0..5 {
        assert_eq!(executor.attempts[index].load(Ordering::SeqCst), 1);
    }
    for index in 5..10 {
        assert_eq!(executor.attempts[index].load(Ordering::SeqCst), 2);
    }
}

#[test]
fn executor_failure_twice_surfaces() {
    let storage = empty_storage();
    let view = fresh_view(&storage);
    let executor = FlakyExecutor {
        fail_index: 5,
        fail_times: 2,
        attempts: attempt_counters(10),
    };
    let scheduler = SchedulerParallelImpl::with_chunk_size(16);

    let result = scheduler.execute_block(&view, &executor, &header(), &transactions(10), &config());
    assert_matches!(result, Err(BlockExecutionError::ExecutorFailed { index: 5, .. }));
}

#[test]
fn cancellation_between_chunks() {
    let storage = empty_storage();
    let view = fresh_view(&storage);
    let scheduler = SchedulerParallelImpl::with_chunk_size(4);
    let executor = CancelExecutor {
        trigger: 4,
        interrupt: scheduler.interrupt(),
    };

    let result = scheduler.execute_block(&view, &executor, &header(), &transactions(12), &config());
    assert_matches!(result, Err(BlockExecutionError::Cancelled));

    // The in-progress view is dropped without being pushed; the layer stack
    // never changes.
    drop(view);
    assert_eq!(storage.layer_count(), 0);
}

#[test]
fn deterministic_across_runs() {
    const USERS: usize = 50;
    const INITIAL: i64 = 1_000;

    let run = || {
        let storage = seeded_storage(USERS, INITIAL);
        let view = fresh_view(&storage);
        let executor = TransferExecutor {
            users: USERS,
            route: scatter_route,
        };
        let scheduler = SchedulerParallelImpl::with_chunk_size(16);

        let receipts = scheduler
            .execute_block(&view, &executor, &header(), &transactions(200), &config())
            .unwrap();
        storage.push_view(view).unwrap();

        let reader = storage.fork();
        let balances: Vec<i64> = (0..USERS)
            .map(|user| {
                as_numeric(&reader.read_one(&balance_key(user)).unwrap().unwrap()).unwrap()
            })
            .collect();
        (balances, receipts)
    };

    let (balances_a, receipts_a) = run();
    let (balances_b, receipts_b) = run();
    assert_eq!(balances_a, balances_b);
    assert_eq!(receipts_a, receipts_b);
    assert_eq!(balances_a.iter().sum::<i64>(), USERS as i64 * INITIAL);
}
