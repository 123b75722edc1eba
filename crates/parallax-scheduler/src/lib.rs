// Copyright © Parallax Contributors
// SPDX-License-Identifier: Apache-2.0

//! Chunked speculative parallel execution of ordered transaction batches.
//!
//! Given a [`StorageView`](parallax_storage::StorageView) over the committed
//! state and an ordered batch of transactions, [`SchedulerParallelImpl`]
//! executes the batch in fixed-size chunks across the worker pool. Every
//! transaction runs against its own traced child view; an in-order walk then
//! commits the conflict-free prefix of each chunk and re-executes the rest.
//! The result is one receipt per transaction, in input order, with the
//! observable effect of sequential execution.

mod errors;
mod scheduler;
mod task;

pub use errors::BlockExecutionError;
pub use scheduler::{Interrupt, SchedulerParallelImpl};
pub use task::{ExecutionStep, StepFailure, TransactionExecutor};

#[cfg(test)]
mod unit_tests;
