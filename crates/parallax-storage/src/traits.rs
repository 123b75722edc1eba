// Copyright © Parallax Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::error::Result;
use parallax_types::{StateKey, StateValue};
use std::sync::Arc;

/// Read capability of a storage. Batch operations are the primitive; the
/// single-key conveniences default through a one-element batch.
///
/// `read_some` returns logical values: a key whose newest entry is a deletion
/// tombstone reads as absent.
pub trait StorageRead {
    fn read_some(&self, keys: &[StateKey]) -> Result<Vec<Option<StateValue>>>;

    fn read_one(&self, key: &StateKey) -> Result<Option<StateValue>> {
        let mut values = self.read_some(std::slice::from_ref(key))?;
        Ok(values.pop().flatten())
    }

    fn exists_one(&self, key: &StateKey) -> Result<bool> {
        Ok(self.read_one(key)?.is_some())
    }
}

/// Write capability of a storage. Writes go through `&self`: every
/// implementation is internally synchronized (the layers are bucket-map
/// backed), which is what lets a view merge committed speculative buffers
/// while being shared immutably with concurrent readers.
pub trait StorageWrite {
    /// Stores the entries as given. A `StateValue` carrying `Deleted` status
    /// is stored verbatim, which is how layer merges propagate tombstones.
    fn write_some(&self, entries: Vec<(StateKey, StateValue)>) -> Result<()>;

    /// Logically or physically removes the keys, depending on whether the
    /// storage keeps tombstones.
    fn remove_some(&self, keys: &[StateKey]) -> Result<()>;

    fn write_one(&self, key: StateKey, value: StateValue) -> Result<()> {
        self.write_some(vec![(key, value)])
    }

    fn remove_one(&self, key: &StateKey) -> Result<()> {
        self.remove_some(std::slice::from_ref(key))
    }
}

/// Full storage capability, what the transaction executor operates on.
pub trait Storage: StorageRead + StorageWrite {}

impl<S: StorageRead + StorageWrite> Storage for S {}

impl<S: StorageRead + ?Sized> StorageRead for &S {
    fn read_some(&self, keys: &[StateKey]) -> Result<Vec<Option<StateValue>>> {
        (**self).read_some(keys)
    }
}

impl<S: StorageRead + ?Sized> StorageRead for Arc<S> {
    fn read_some(&self, keys: &[StateKey]) -> Result<Vec<Option<StateValue>>> {
        (**self).read_some(keys)
    }
}
