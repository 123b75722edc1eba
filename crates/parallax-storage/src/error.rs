// Copyright © Parallax Contributors
// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    /// A write reached a view that never installed a mutable layer.
    #[error("write attempted on a view without a mutable layer")]
    MissingMutableLayer,

    /// The layer stack changed between `fork` and `push_view`.
    #[error("layer stack changed since the view was forked")]
    ConcurrentModification,

    /// The pluggable backend reported a failure. The in-memory backend never
    /// does; this carries errors of disk- or network-backed implementations.
    #[error("backend storage failure: {0}")]
    Backend(#[from] anyhow::Error),
}

pub type Result<T, E = StorageError> = std::result::Result<T, E>;
