// Copyright © Parallax Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::{
    error::{Result, StorageError},
    memory_storage::MutableStorage,
    traits::{StorageRead, StorageWrite},
};
use parallax_types::{StateKey, StateValue};
use std::{collections::VecDeque, sync::Arc};

/// A forked handle over a layer stack: an optional private mutable layer on
/// top, a snapshot of the immutable layers (newest first) and a base to fall
/// through to.
///
/// Views are the unit of isolation for one speculative execution attempt.
/// The base is generic so that views nest: a block view forked from a
/// [`MultiLayerStorage`](crate::MultiLayerStorage) has `Base =
/// Arc<Backend>`, while the per-transaction child views created by the
/// scheduler ([`fork_child`](Self::fork_child)) stack a fresh write buffer
/// directly over `&parent`.
///
/// A view is single-owner: it is mutated only by its owning worker. Shared
/// (`&self`) access is read-only apart from [`merge_layer`](Self::merge_layer),
/// which appends to the internally synchronized mutable layer.
pub struct StorageView<Base> {
    mutable: Option<MutableStorage>,
    immutables: VecDeque<Arc<MutableStorage>>,
    base: Base,
    base_version: u64,
}

impl<Base: StorageRead> StorageView<Base> {
    pub(crate) fn from_parts(
        immutables: VecDeque<Arc<MutableStorage>>,
        base: Base,
        base_version: u64,
    ) -> Self {
        Self {
            mutable: None,
            immutables,
            base,
            base_version,
        }
    }

    /// Installs an empty mutable layer on top. Required before any write;
    /// calling it on a view that already has one is a no-op.
    pub fn new_mutable(&mut self) {
        if self.mutable.is_none() {
            self.mutable = Some(MutableStorage::new());
        }
    }

    pub fn has_mutable(&self) -> bool {
        self.mutable.is_some()
    }

    pub fn mutable(&self) -> Option<&MutableStorage> {
        self.mutable.as_ref()
    }

    pub fn into_mutable(self) -> Option<MutableStorage> {
        self.mutable
    }

    pub(crate) fn into_push_parts(self) -> (Option<MutableStorage>, u64) {
        (self.mutable, self.base_version)
    }

    /// A child view for one speculative transaction: a fresh write buffer
    /// stacked directly over this view. Reads fall through the buffer into
    /// the parent; writes stay in the buffer until the scheduler commits it
    /// via [`merge_layer`](Self::merge_layer) on the parent.
    pub fn fork_child(&self) -> StorageView<&Self> {
        StorageView {
            mutable: Some(MutableStorage::new()),
            immutables: VecDeque::new(),
            base: self,
            base_version: 0,
        }
    }

    /// Folds a committed speculative write buffer into this view's mutable
    /// layer, tombstones included.
    pub fn merge_layer(&self, buffer: MutableStorage) -> Result<()> {
        let mutable = self.mutable.as_ref().ok_or(StorageError::MissingMutableLayer)?;
        mutable.merge_from(&buffer);
        Ok(())
    }

    fn layers(&self) -> impl Iterator<Item = &MutableStorage> {
        self.mutable.iter().chain(self.immutables.iter().map(Arc::as_ref))
    }
}

impl<Base: StorageRead> StorageRead for StorageView<Base> {
    /// Layered read: mutable layer first, then immutable layers newest to
    /// oldest, then the base. The first hit wins; a tombstone hit resolves
    /// to absent without consulting lower layers.
    fn read_some(&self, keys: &[StateKey]) -> Result<Vec<Option<StateValue>>> {
        let mut results: Vec<Option<StateValue>> = vec![None; keys.len()];
        let mut pending: Vec<usize> = (0..keys.len()).collect();

        for layer in self.layers() {
            if pending.is_empty() {
                break;
            }
            let subset: Vec<StateKey> = pending.iter().map(|&index| keys[index].clone()).collect();
            let found = layer.read_some_raw(&subset);

            let mut missing = Vec::with_capacity(pending.len());
            for (&index, value) in pending.iter().zip(found) {
                match value {
                    Some(value) if !value.is_deleted() => results[index] = Some(value),
                    Some(_) => {} // tombstone: resolved as absent
                    None => missing.push(index),
                }
            }
            pending = missing;
        }

        if !pending.is_empty() {
            let subset: Vec<StateKey> = pending.iter().map(|&index| keys[index].clone()).collect();
            let found = self.base.read_some(&subset)?;
            for (&index, value) in pending.iter().zip(found) {
                results[index] = value;
            }
        }
        Ok(results)
    }
}

impl<Base: StorageRead> StorageWrite for StorageView<Base> {
    fn write_some(&self, entries: Vec<(StateKey, StateValue)>) -> Result<()> {
        self.mutable
            .as_ref()
            .ok_or(StorageError::MissingMutableLayer)?
            .write_some(entries)
    }

    fn remove_some(&self, keys: &[StateKey]) -> Result<()> {
        self.mutable
            .as_ref()
            .ok_or(StorageError::MissingMutableLayer)?
            .remove_some(keys)
    }
}
