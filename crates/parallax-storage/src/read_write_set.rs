// Copyright © Parallax Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::{
    error::Result,
    traits::{StorageRead, StorageWrite},
};
use parallax_types::{StateKey, StateValue};
use parking_lot::Mutex;
use std::collections::HashSet;

/// The keys one transaction touched, classified as reads or writes.
///
/// Invariant: the sets are disjoint. A key that is both read and written
/// belongs only to `writes`; a transaction's write already dominates its
/// own read for conflict purposes.
#[derive(Clone, Debug, Default)]
pub struct ReadWriteSet {
    reads: HashSet<StateKey>,
    writes: HashSet<StateKey>,
}

impl ReadWriteSet {
    pub fn reads(&self) -> &HashSet<StateKey> {
        &self.reads
    }

    pub fn writes(&self) -> &HashSet<StateKey> {
        &self.writes
    }

    pub fn is_empty(&self) -> bool {
        self.reads.is_empty() && self.writes.is_empty()
    }

    fn record_read(&mut self, key: &StateKey) {
        if !self.writes.contains(key) {
            self.reads.insert(key.clone());
        }
    }

    fn record_write(&mut self, key: &StateKey) {
        self.reads.remove(key);
        self.writes.insert(key.clone());
    }

    /// True when executing `self` after the transactions summarized in
    /// `other` is not serializable: write/write, write-after-read or
    /// read-after-write overlap.
    pub fn conflicts_with(&self, other: &ReadWriteSet) -> bool {
        !self.writes.is_disjoint(&other.writes)
            || !self.writes.is_disjoint(&other.reads)
            || !self.reads.is_disjoint(&other.writes)
    }

    /// Folds a committed transaction's accesses into this accumulated set.
    pub fn absorb(&mut self, other: ReadWriteSet) {
        self.writes.extend(other.writes);
        self.reads.extend(other.reads);
        self.reads.retain(|key| !self.writes.contains(key));
    }
}

/// Interposes on a storage and records every key touched.
///
/// Recording happens on all operations regardless of which executor step
/// issues them, so a write sneaking into the nominally read-only decode step
/// is still conflict-relevant.
pub struct ReadWriteSetStorage<S> {
    inner: S,
    // Trait reads take `&self`; the cell makes recording possible anyway.
    // The wrapper is owned by a single worker, so the lock is uncontended.
    set: Mutex<ReadWriteSet>,
}

impl<S> ReadWriteSetStorage<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            set: Mutex::new(ReadWriteSet::default()),
        }
    }

    pub fn read_write_set(&self) -> ReadWriteSet {
        self.set.lock().clone()
    }

    pub fn into_parts(self) -> (S, ReadWriteSet) {
        (self.inner, self.set.into_inner())
    }
}

impl<S: StorageRead> StorageRead for ReadWriteSetStorage<S> {
    fn read_some(&self, keys: &[StateKey]) -> Result<Vec<Option<StateValue>>> {
        {
            let mut set = self.set.lock();
            for key in keys {
                set.record_read(key);
            }
        }
        self.inner.read_some(keys)
    }
}

impl<S: StorageWrite> StorageWrite for ReadWriteSetStorage<S> {
    fn write_some(&self, entries: Vec<(StateKey, StateValue)>) -> Result<()> {
        {
            let mut set = self.set.lock();
            for (key, _) in &entries {
                set.record_write(key);
            }
        }
        self.inner.write_some(entries)
    }

    fn remove_some(&self, keys: &[StateKey]) -> Result<()> {
        {
            let mut set = self.set.lock();
            for key in keys {
                set.record_write(key);
            }
        }
        self.inner.remove_some(keys)
    }
}
