// Copyright © Parallax Contributors
// SPDX-License-Identifier: Apache-2.0

use parallax_storage::{Storage, StorageError};
use parallax_types::{BlockHeader, LedgerConfig};
use std::fmt::Debug;

/// The three suspension points of one transaction's execution.
///
/// Splitting execution lets the scheduler overlap the decode step of one
/// transaction with the state transition of another on a different worker,
/// without materializing a full dependency graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecutionStep {
    /// Step 0: parse and decode inputs. May read; by convention it does not
    /// write. The convention is not trusted: any write issued here is
    /// recorded by the read/write tracing like every other write and is
    /// conflict-relevant.
    Decode,
    /// Step 1: the state transition; reads and writes.
    Apply,
    /// Step 2: finalization. Must return the receipt.
    Finalize,
}

impl ExecutionStep {
    pub const ALL: [ExecutionStep; 3] =
        [ExecutionStep::Decode, ExecutionStep::Apply, ExecutionStep::Finalize];
}

/// Why a step (or context creation) failed. The two arms propagate
/// differently: an executor failure is retried once in isolation before it
/// aborts the block, a storage failure aborts immediately.
#[derive(Debug)]
pub enum StepFailure<E> {
    Executor(E),
    Storage(StorageError),
}

impl<E> From<StorageError> for StepFailure<E> {
    fn from(error: StorageError) -> Self {
        StepFailure::Storage(error)
    }
}

/// The executor capability: everything the scheduler needs from the
/// transaction-executing collaborator. One executor instance serves a whole
/// block; per-transaction state lives in [`Context`](Self::Context).
///
/// Storage is a method-level generic so the same executor runs against any
/// storage composition the scheduler builds (traced child views in the
/// parallel path, a bare view in the sequential fallback).
pub trait TransactionExecutor: Sync {
    type Transaction: Sync;
    type Receipt: Send;
    type Error: Debug + Send;
    /// Per-transaction scratch state carried between steps. Decoded inputs
    /// live here; storage does not (it is passed into every call).
    type Context: Send;

    fn create_execute_context<S: Storage>(
        &self,
        storage: &S,
        block_header: &BlockHeader,
        transaction: &Self::Transaction,
        context_id: i32,
        ledger_config: &LedgerConfig,
    ) -> Result<Self::Context, StepFailure<Self::Error>>;

    /// Runs one step. `Decode` and `Apply` return `Ok(None)`; `Finalize`
    /// returns the receipt.
    fn execute_step<S: Storage>(
        &self,
        step: ExecutionStep,
        context: &mut Self::Context,
        storage: &S,
    ) -> Result<Option<Self::Receipt>, StepFailure<Self::Error>>;

    /// Non-stepped fallback for sequential callers: chains the three steps
    /// on one storage. Returns the `Finalize` receipt; `None` indicates a
    /// non-conforming executor.
    fn execute_transaction<S: Storage>(
        &self,
        storage: &S,
        block_header: &BlockHeader,
        transaction: &Self::Transaction,
        context_id: i32,
        ledger_config: &LedgerConfig,
    ) -> Result<Option<Self::Receipt>, StepFailure<Self::Error>> {
        let mut context = self.create_execute_context(
            storage,
            block_header,
            transaction,
            context_id,
            ledger_config,
        )?;
        let mut receipt = None;
        for step in ExecutionStep::ALL {
            if let Some(produced) = self.execute_step(step, &mut context, storage)? {
                receipt = Some(produced);
            }
        }
        Ok(receipt)
    }
}
