// Copyright © Parallax Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::{
    error::{Result, StorageError},
    memory_storage::MutableStorage,
    traits::StorageRead,
    view::StorageView,
};
use parking_lot::Mutex;
use std::{collections::VecDeque, sync::Arc};
use tracing::debug;

struct Layers {
    /// Frozen layers, front = newest.
    immutables: VecDeque<Arc<MutableStorage>>,
    /// Bumped on every push or pop; a forked view carries the version it saw
    /// so a stale push is rejected.
    version: u64,
}

/// A stack of immutable layers above a read-only backend.
///
/// Mutation happens exclusively through views: `fork` a view, install a
/// mutable layer, execute against it, then `push_view` to freeze the layer
/// onto the stack. The internal mutex guards only the deque bookkeeping;
/// it is never held across storage reads or executor calls.
pub struct MultiLayerStorage<Backend> {
    layers: Mutex<Layers>,
    backend: Arc<Backend>,
}

impl<Backend: StorageRead> MultiLayerStorage<Backend> {
    pub fn new(backend: Backend) -> Self {
        Self {
            layers: Mutex::new(Layers {
                immutables: VecDeque::new(),
                version: 0,
            }),
            backend: Arc::new(backend),
        }
    }

    /// Snapshots the current layer stack into a new view with no mutable
    /// layer. Cheap: layers are immutable and shared by reference.
    pub fn fork(&self) -> StorageView<Arc<Backend>> {
        let layers = self.layers.lock();
        StorageView::from_parts(
            layers.immutables.clone(),
            Arc::clone(&self.backend),
            layers.version,
        )
    }

    /// Promotes the view's mutable layer (if any) to the newest immutable
    /// layer. Fails with [`StorageError::ConcurrentModification`] when the
    /// stack changed since the view was forked.
    pub fn push_view(&self, view: StorageView<Arc<Backend>>) -> Result<()> {
        let (mutable, base_version) = view.into_push_parts();
        let mut layers = self.layers.lock();
        if base_version != layers.version {
            return Err(StorageError::ConcurrentModification);
        }
        if let Some(mutable) = mutable {
            debug!(entries = mutable.len(), version = layers.version + 1, "pushing layer");
            layers.immutables.push_front(Arc::new(mutable));
            layers.version += 1;
        }
        Ok(())
    }

    /// The newest immutable layer, used by the committer to seed and collapse
    /// state.
    pub fn front_storage(&self) -> Option<Arc<MutableStorage>> {
        self.layers.lock().immutables.front().cloned()
    }

    /// Discards the newest immutable layer (rollback only).
    pub fn pop_front(&self) -> Option<Arc<MutableStorage>> {
        let mut layers = self.layers.lock();
        let popped = layers.immutables.pop_front();
        if popped.is_some() {
            layers.version += 1;
            debug!(version = layers.version, "popped layer");
        }
        popped
    }

    pub fn layer_count(&self) -> usize {
        self.layers.lock().immutables.len()
    }

    pub fn backend(&self) -> Arc<Backend> {
        Arc::clone(&self.backend)
    }
}
