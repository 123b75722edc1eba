// Copyright © Parallax Contributors
// SPDX-License-Identifier: Apache-2.0

//! A concurrent map sharded into a fixed number of buckets, each guarded by
//! its own reader/writer lock.
//!
//! Single-key operations lock exactly one bucket. Batch operations partition
//! their keys by bucket, sort the partitions so that every bucket is visited
//! at most once, and fan the per-bucket groups out on rayon. Each group
//! costs one lock acquisition, and a worker holds at most one lock at a
//! time, which keeps the structure deadlock-free without any cross-bucket
//! ordering.

use crossbeam::utils::CachePadded;
use parking_lot::RwLock;
use rand::Rng;
use rayon::prelude::*;
use std::{
    collections::{hash_map::RandomState, HashMap},
    hash::{BuildHasher, Hash},
};

#[derive(Debug)]
struct Bucket<K, V> {
    entries: RwLock<HashMap<K, V>>,
}

impl<K, V> Default for Bucket<K, V> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

/// Lock-striped concurrent map from `K` to `V`.
///
/// The bucket count is fixed at construction; a key hashes to the same bucket
/// for the lifetime of the map. Values are returned by clone, so `V` is
/// expected to be cheap to copy (e.g. `Bytes`-backed).
#[derive(Debug)]
pub struct BucketMap<K, V> {
    buckets: Vec<CachePadded<Bucket<K, V>>>,
    hasher: RandomState,
}

impl<K, V> BucketMap<K, V>
where
    K: Eq + Hash,
{
    pub fn new(bucket_count: usize) -> Self {
        assert!(bucket_count > 0, "BucketMap requires at least one bucket");
        Self {
            buckets: (0..bucket_count).map(|_| CachePadded::new(Bucket::default())).collect(),
            hasher: RandomState::new(),
        }
    }

    /// One bucket per hardware thread, the right default for maps shared
    /// across the worker pool.
    pub fn with_default_buckets() -> Self {
        Self::new(num_cpus::get())
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    fn bucket_index(&self, key: &K) -> usize {
        self.hasher.hash_one(key) as usize % self.buckets.len()
    }

    /// Tags each key with `(bucket_index, original_index)` and sorts by
    /// bucket, so consecutive runs share a bucket and original indices
    /// survive for scattering results back into caller order. The sort is
    /// stable: duplicate keys keep input order within their bucket, which
    /// makes batch removal of duplicates behave like sequential removal.
    fn tag_by_bucket(&self, keys: &[K]) -> Vec<(usize, usize)> {
        let mut tagged: Vec<(usize, usize)> = keys
            .iter()
            .enumerate()
            .map(|(index, key)| (self.bucket_index(key), index))
            .collect();
        tagged.sort_by_key(|&(bucket, _)| bucket);
        tagged
    }

    pub fn contains(&self, key: &K) -> bool {
        self.buckets[self.bucket_index(key)].entries.read().contains_key(key)
    }

    /// Sum of the bucket sizes. Buckets are counted one at a time, so the
    /// result is approximate under concurrent mutation.
    pub fn len(&self) -> usize {
        self.buckets.iter().map(|bucket| bucket.entries.read().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.iter().all(|bucket| bucket.entries.read().is_empty())
    }

    pub fn clear(&self) {
        for bucket in &self.buckets {
            bucket.entries.write().clear();
        }
    }
}

impl<K, V> BucketMap<K, V>
where
    K: Eq + Hash + Clone + Send + Sync,
    V: Clone + Send + Sync,
{
    pub fn find(&self, key: &K) -> Option<V> {
        self.buckets[self.bucket_index(key)].entries.read().get(key).cloned()
    }

    /// Stores `value` under `key`, replacing any previous value. Returns
    /// `true` iff the key was absent.
    pub fn insert(&self, key: K, value: V) -> bool {
        self.buckets[self.bucket_index(&key)]
            .entries
            .write()
            .insert(key, value)
            .is_none()
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.buckets[self.bucket_index(key)].entries.write().remove(key)
    }

    /// Looks up every key, preserving caller order in the result. Each bucket
    /// is visited once under a single shared lock; distinct buckets are
    /// processed in parallel.
    pub fn batch_find(&self, keys: &[K]) -> Vec<Option<V>> {
        if keys.is_empty() {
            return Vec::new();
        }
        let tagged = self.tag_by_bucket(keys);
        let found: Vec<Vec<(usize, Option<V>)>> = tagged
            .par_chunk_by(|a, b| a.0 == b.0)
            .map(|group| {
                let entries = self.buckets[group[0].0].entries.read();
                group
                    .iter()
                    .map(|&(_, index)| (index, entries.get(&keys[index]).cloned()))
                    .collect()
            })
            .collect();

        let mut results = vec![None; keys.len()];
        for (index, value) in found.into_iter().flatten() {
            results[index] = value;
        }
        results
    }

    /// Stores every pair, replacing existing values. Pairs that share a key
    /// apply in input order, so the last occurrence wins.
    pub fn batch_insert(&self, kvs: Vec<(K, V)>) {
        if kvs.is_empty() {
            return;
        }
        let mut tagged: Vec<(usize, (K, V))> =
            kvs.into_iter().map(|kv| (self.bucket_index(&kv.0), kv)).collect();
        // Stable sort: input order within a bucket is what makes duplicate
        // keys deterministic.
        tagged.sort_by_key(|entry| entry.0);

        let mut groups: Vec<(usize, Vec<(K, V)>)> = Vec::new();
        for (bucket, kv) in tagged {
            match groups.last_mut() {
                Some((current, items)) if *current == bucket => items.push(kv),
                _ => groups.push((bucket, vec![kv])),
            }
        }

        groups.into_par_iter().for_each(|(bucket, items)| {
            let mut entries = self.buckets[bucket].entries.write();
            for (key, value) in items {
                entries.insert(key, value);
            }
        });
    }

    /// Removes every key, returning the removed values in caller order.
    /// Callers that do not need the values simply drop the result.
    pub fn batch_remove(&self, keys: &[K]) -> Vec<Option<V>> {
        if keys.is_empty() {
            return Vec::new();
        }
        let tagged = self.tag_by_bucket(keys);
        let removed: Vec<Vec<(usize, Option<V>)>> = tagged
            .par_chunk_by(|a, b| a.0 == b.0)
            .map(|group| {
                let mut entries = self.buckets[group[0].0].entries.write();
                group
                    .iter()
                    .map(|&(_, index)| (index, entries.remove(&keys[index])))
                    .collect()
            })
            .collect();

        let mut results = vec![None; keys.len()];
        for (index, value) in removed.into_iter().flatten() {
            results[index] = value;
        }
        results
    }
}

impl<K, V> BucketMap<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Iterates the whole map, walking buckets cyclically from
    /// `start_bucket` (random when absent). Each bucket's lock is held only
    /// while that bucket's entries are snapshotted, so the iterator never
    /// borrows into a locked shard.
    pub fn scan(&self, start_bucket: Option<usize>) -> Scan<'_, K, V> {
        let start = start_bucket
            .map(|index| index % self.buckets.len())
            .unwrap_or_else(|| rand::thread_rng().gen_range(0..self.buckets.len()));
        Scan {
            map: self,
            next_bucket: start,
            visited: 0,
            current: Vec::new().into_iter(),
        }
    }

    /// Cyclic scan starting at the bucket that owns `key`.
    pub fn scan_from_key(&self, key: &K) -> Scan<'_, K, V> {
        self.scan(Some(self.bucket_index(key)))
    }
}

/// Cyclic bucket iterator, see [`BucketMap::scan`].
pub struct Scan<'a, K, V> {
    map: &'a BucketMap<K, V>,
    next_bucket: usize,
    visited: usize,
    current: std::vec::IntoIter<(K, V)>,
}

impl<K, V> Iterator for Scan<'_, K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    type Item = (K, V);

    fn next(&mut self) -> Option<(K, V)> {
        loop {
            if let Some(item) = self.current.next() {
                return Some(item);
            }
            if self.visited == self.map.buckets.len() {
                return None;
            }
            let bucket = &self.map.buckets[self.next_bucket];
            self.next_bucket = (self.next_bucket + 1) % self.map.buckets.len();
            self.visited += 1;

            let entries = bucket.entries.read();
            self.current = entries
                .iter()
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect::<Vec<_>>()
                .into_iter();
        }
    }
}
