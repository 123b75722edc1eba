// Copyright © Parallax Contributors
// SPDX-License-Identifier: Apache-2.0

use parallax_storage::StorageError;
use std::fmt::Debug;
use thiserror::Error;

/// Terminal failures of a block execution. The scheduler either returns the
/// full receipt sequence or exactly one of these; there is no partial
/// commit.
#[derive(Debug, Error)]
pub enum BlockExecutionError<E: Debug> {
    /// The executor failed for the same transaction twice: once in the
    /// regular chunk and once retried in isolation.
    #[error("executor failed for transaction {index} after isolated retry: {error:?}")]
    ExecutorFailed { index: usize, error: E },

    /// A storage failure (missing mutable layer, backend error) surfaced
    /// during execution or commit.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The external interrupt fired; in-flight steps completed, nothing
    /// further was scheduled.
    #[error("block execution cancelled")]
    Cancelled,

    /// An internal assertion failed. Programming bug; never retried.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}
