// Copyright © Parallax Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::{
    errors::BlockExecutionError,
    task::{ExecutionStep, StepFailure, TransactionExecutor},
};
use parallax_storage::{
    MutableStorage, ReadWriteSet, ReadWriteSetStorage, StorageError, StorageRead, StorageView,
};
use parallax_types::{BlockHeader, LedgerConfig};
use rayon::prelude::*;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tracing::{debug, trace};

/// Chunk size defaults to a small multiple of the worker count: wide enough
/// to keep the pool busy, narrow enough that a conflict does not throw away
/// too much speculative work.
const DEFAULT_CHUNK_PER_WORKER: usize = 8;

/// Cooperative cancellation handle, cloned out of the scheduler and polled
/// at chunk and step boundaries. In-flight steps always complete.
#[derive(Clone, Debug, Default)]
pub struct Interrupt {
    flag: Arc<AtomicBool>,
}

impl Interrupt {
    pub fn set(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    pub fn clear(&self) {
        self.flag.store(false, Ordering::Relaxed);
    }
}

/// Everything the parallel fan-out learns about one transaction, consumed by
/// the serial commit walk.
enum TxnOutcome<R, E> {
    Executed {
        receipt: R,
        buffer: MutableStorage,
        rw_set: ReadWriteSet,
    },
    ExecutorFailure(E),
    StorageFailure(StorageError),
    MissingReceipt,
    Interrupted,
}

/// Step-driven speculative parallel scheduler.
///
/// Per chunk: every transaction executes all three steps on whichever rayon
/// worker picks it up, reading through the committed block view and writing
/// into a private traced buffer. A serial walk in input order then commits
/// the longest conflict-free prefix into the block view and requeues the
/// rest. "First conflict wins" makes the committed state and the receipt
/// sequence independent of thread timing.
pub struct SchedulerParallelImpl {
    chunk_size: usize,
    interrupt: Interrupt,
}

impl Default for SchedulerParallelImpl {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulerParallelImpl {
    pub fn new() -> Self {
        Self::with_chunk_size(DEFAULT_CHUNK_PER_WORKER * num_cpus::get())
    }

    pub fn with_chunk_size(chunk_size: usize) -> Self {
        assert!(chunk_size > 0, "chunk size must be positive");
        Self {
            chunk_size,
            interrupt: Interrupt::default(),
        }
    }

    /// A handle for signalling cancellation from outside the block. The
    /// flag is cleared when the next block starts, so one scheduler serves
    /// many blocks.
    pub fn interrupt(&self) -> Interrupt {
        self.interrupt.clone()
    }

    /// Executes `transactions` against `view`, committing into the view's
    /// mutable layer. Returns one receipt per transaction, in input order.
    /// Pushing the finished view onto the layer stack stays with the
    /// caller, so a failed or cancelled block leaves the stack untouched.
    pub fn execute_block<Base, E>(
        &self,
        view: &StorageView<Base>,
        executor: &E,
        block_header: &BlockHeader,
        transactions: &[E::Transaction],
        ledger_config: &LedgerConfig,
    ) -> Result<Vec<E::Receipt>, BlockExecutionError<E::Error>>
    where
        Base: StorageRead + Sync,
        E: TransactionExecutor,
    {
        let num_txns = transactions.len();
        if num_txns == 0 {
            return Ok(Vec::new());
        }
        if !view.has_mutable() {
            return Err(StorageError::MissingMutableLayer.into());
        }
        self.interrupt.clear();

        debug!(block = block_header.number, txns = num_txns, "executing block");

        let mut receipts: Vec<Option<E::Receipt>> = Vec::with_capacity(num_txns);
        receipts.resize_with(num_txns, || None);
        let mut failed_once = vec![false; num_txns];

        let mut offset = 0;
        while offset < num_txns {
            if self.interrupt.is_set() {
                return Err(BlockExecutionError::Cancelled);
            }

            // A transaction that already failed once runs alone, against an
            // empty accepted set.
            let chunk_size = if failed_once[offset] { 1 } else { self.chunk_size };
            let end = (offset + chunk_size).min(num_txns);
            trace!(offset, end, "executing chunk");

            let outcomes: Vec<TxnOutcome<E::Receipt, E::Error>> = transactions[offset..end]
                .par_iter()
                .enumerate()
                .map(|(j, transaction)| {
                    self.execute_single(
                        view,
                        executor,
                        block_header,
                        transaction,
                        (offset + j) as i32,
                        ledger_config,
                    )
                })
                .collect();

            // In-order commit walk. The first conflict (or failure) stops
            // the walk; everything from there on is re-executed against the
            // extended committed prefix.
            let mut accepted = ReadWriteSet::default();
            let mut next_offset = offset;
            for (j, outcome) in outcomes.into_iter().enumerate() {
                let index = offset + j;
                match outcome {
                    TxnOutcome::Executed {
                        receipt,
                        buffer,
                        rw_set,
                    } => {
                        if rw_set.conflicts_with(&accepted) {
                            trace!(index, "conflict, re-executing tail");
                            break;
                        }
                        view.merge_layer(buffer)?;
                        accepted.absorb(rw_set);
                        receipts[index] = Some(receipt);
                        next_offset = index + 1;
                    },
                    TxnOutcome::ExecutorFailure(error) => {
                        if failed_once[index] {
                            return Err(BlockExecutionError::ExecutorFailed { index, error });
                        }
                        debug!(index, ?error, "executor failed, scheduling isolated retry");
                        failed_once[index] = true;
                        break;
                    },
                    TxnOutcome::StorageFailure(error) => return Err(error.into()),
                    TxnOutcome::MissingReceipt => {
                        return Err(BlockExecutionError::InvariantViolation(format!(
                            "transaction {index} finalized without a receipt"
                        )));
                    },
                    TxnOutcome::Interrupted => return Err(BlockExecutionError::Cancelled),
                }
            }
            offset = next_offset;
        }

        debug!(block = block_header.number, txns = num_txns, "block executed");
        receipts
            .into_iter()
            .enumerate()
            .map(|(index, receipt)| {
                receipt.ok_or_else(|| {
                    BlockExecutionError::InvariantViolation(format!(
                        "no receipt recorded for transaction {index}"
                    ))
                })
            })
            .collect()
    }

    /// Runs one transaction's three steps against a fresh traced child view.
    /// Never touches the block view's mutable layer; everything the
    /// transaction wrote comes back in the buffer for the commit walk.
    fn execute_single<Base, E>(
        &self,
        view: &StorageView<Base>,
        executor: &E,
        block_header: &BlockHeader,
        transaction: &E::Transaction,
        context_id: i32,
        ledger_config: &LedgerConfig,
    ) -> TxnOutcome<E::Receipt, E::Error>
    where
        Base: StorageRead + Sync,
        E: TransactionExecutor,
    {
        let local = ReadWriteSetStorage::new(view.fork_child());

        let mut context = match executor.create_execute_context(
            &local,
            block_header,
            transaction,
            context_id,
            ledger_config,
        ) {
            Ok(context) => context,
            Err(StepFailure::Executor(error)) => return TxnOutcome::ExecutorFailure(error),
            Err(StepFailure::Storage(error)) => return TxnOutcome::StorageFailure(error),
        };

        let mut receipt = None;
        for step in ExecutionStep::ALL {
            if self.interrupt.is_set() {
                return TxnOutcome::Interrupted;
            }
            match executor.execute_step(step, &mut context, &local) {
                Ok(produced) => {
                    if produced.is_some() {
                        receipt = produced;
                    }
                },
                Err(StepFailure::Executor(error)) => return TxnOutcome::ExecutorFailure(error),
                Err(StepFailure::Storage(error)) => return TxnOutcome::StorageFailure(error),
            }
        }

        let (child, rw_set) = local.into_parts();
        let buffer = child
            .into_mutable()
            .expect("child views are created with a mutable layer");
        match receipt {
            Some(receipt) => TxnOutcome::Executed {
                receipt,
                buffer,
                rw_set,
            },
            None => TxnOutcome::MissingReceipt,
        }
    }
}
