// Copyright © Parallax Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::{
    error::Result,
    traits::{StorageRead, StorageWrite},
};
use parallax_bucket_map::BucketMap;
use parallax_types::{StateKey, StateValue};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::ops::Bound;

/// A single storage layer over a lock-striped bucket map.
///
/// The two const parameters mirror the layer attributes:
///
/// - `ORDERED` additionally maintains a sorted key index so the layer
///   supports [`range`](Self::range) scans.
/// - `LOGICAL_DELETION` makes [`remove_some`](StorageWrite::remove_some)
///   store a tombstone instead of erasing, so the layer can shadow entries
///   of lower layers when stacked.
///
/// Concurrency is a constructor choice rather than a type parameter, since
/// the backing container is striped either way: [`new`](Self::new) builds a
/// single-bucket map for single-owner layers (write buffers, mutable
/// layers), [`new_concurrent`](Self::new_concurrent) stripes across the
/// hardware threads for storages shared with the worker pool.
#[derive(Debug)]
pub struct MemoryStorage<const ORDERED: bool = false, const LOGICAL_DELETION: bool = false> {
    buckets: BucketMap<StateKey, StateValue>,
    index: Mutex<BTreeSet<StateKey>>,
}

/// The layer type: ordered, shadowing lower layers through tombstones.
pub type MutableStorage = MemoryStorage<true, true>;

/// The default in-memory backend: ordered, erasing physically (nothing below
/// it to shadow).
pub type BackendStorage = MemoryStorage<true, false>;

impl<const ORDERED: bool, const LOGICAL_DELETION: bool> MemoryStorage<ORDERED, LOGICAL_DELETION> {
    pub fn new() -> Self {
        Self::with_buckets(1)
    }

    pub fn new_concurrent() -> Self {
        Self {
            buckets: BucketMap::with_default_buckets(),
            index: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn with_buckets(bucket_count: usize) -> Self {
        Self {
            buckets: BucketMap::new(bucket_count),
            index: Mutex::new(BTreeSet::new()),
        }
    }

    /// Number of stored entries, tombstones included.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Raw batch read: tombstones surface as stored values. The layered view
    /// relies on this to tell "logically deleted here" apart from "absent,
    /// keep falling through".
    pub fn read_some_raw(&self, keys: &[StateKey]) -> Vec<Option<StateValue>> {
        self.buckets.batch_find(keys)
    }

    pub fn read_one_raw(&self, key: &StateKey) -> Option<StateValue> {
        self.buckets.find(key)
    }

    /// Every stored entry, tombstones included, in no particular order.
    pub fn entries(&self) -> impl Iterator<Item = (StateKey, StateValue)> + '_ {
        self.buckets.scan(Some(0))
    }

    fn store_raw(&self, entries: Vec<(StateKey, StateValue)>) {
        if ORDERED {
            let mut index = self.index.lock();
            for (key, _) in &entries {
                index.insert(key.clone());
            }
        }
        self.buckets.batch_insert(entries);
    }

    fn erase(&self, keys: &[StateKey]) {
        if ORDERED {
            let mut index = self.index.lock();
            for key in keys {
                index.remove(key);
            }
        }
        self.buckets.batch_remove(keys);
    }

    /// Folds every entry of `other` into this storage, the layer-collapse
    /// primitive. Tombstones are kept verbatim when this storage uses
    /// logical deletion and applied as physical erasure otherwise, so
    /// collapsing a layer into the backend drops the deleted keys for good.
    pub fn merge_from<const O2: bool, const LD2: bool>(&self, other: &MemoryStorage<O2, LD2>) {
        if LOGICAL_DELETION {
            self.store_raw(other.entries().collect());
        } else {
            let (live, dead): (Vec<_>, Vec<_>) =
                other.entries().partition(|(_, value)| !value.is_deleted());
            self.store_raw(live);
            let dead_keys: Vec<StateKey> = dead.into_iter().map(|(key, _)| key).collect();
            self.erase(&dead_keys);
        }
    }
}

impl<const LOGICAL_DELETION: bool> MemoryStorage<true, LOGICAL_DELETION> {
    /// Ordered scan from `start` (inclusive), or from the smallest key. The
    /// key set is snapshotted up front; values are fetched lazily, and
    /// entries racing a concurrent physical removal are skipped.
    pub fn range(
        &self,
        start: Option<&StateKey>,
    ) -> impl Iterator<Item = (StateKey, StateValue)> + '_ {
        let keys: Vec<StateKey> = {
            let index = self.index.lock();
            let bounds = match start {
                Some(start) => (Bound::Included(start.clone()), Bound::Unbounded),
                None => (Bound::Unbounded, Bound::Unbounded),
            };
            index.range(bounds).cloned().collect()
        };
        keys.into_iter()
            .filter_map(move |key| self.buckets.find(&key).map(|value| (key, value)))
    }
}

impl<const ORDERED: bool, const LOGICAL_DELETION: bool> Default
    for MemoryStorage<ORDERED, LOGICAL_DELETION>
{
    fn default() -> Self {
        Self::new()
    }
}

impl<const ORDERED: bool, const LOGICAL_DELETION: bool> StorageRead
    for MemoryStorage<ORDERED, LOGICAL_DELETION>
{
    fn read_some(&self, keys: &[StateKey]) -> Result<Vec<Option<StateValue>>> {
        Ok(self
            .read_some_raw(keys)
            .into_iter()
            .map(|value| value.filter(|value| !value.is_deleted()))
            .collect())
    }
}

impl<const ORDERED: bool, const LOGICAL_DELETION: bool> StorageWrite
    for MemoryStorage<ORDERED, LOGICAL_DELETION>
{
    fn write_some(&self, entries: Vec<(StateKey, StateValue)>) -> Result<()> {
        self.store_raw(entries);
        Ok(())
    }

    fn remove_some(&self, keys: &[StateKey]) -> Result<()> {
        if LOGICAL_DELETION {
            self.store_raw(keys.iter().map(|key| (key.clone(), StateValue::deleted())).collect());
        } else {
            self.erase(keys);
        }
        Ok(())
    }
}
