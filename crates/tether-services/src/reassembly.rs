//! Reassembly store: chunks buffered per base file until its end marker.
//!
//! One map, one lock. The lock is held only for a single insert or take;
//! joining and writing to disk happen after `take` has released it.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use bytes::Bytes;

type Entries = HashMap<String, BTreeMap<u64, Bytes>>;

#[derive(Default)]
pub struct ReassemblyStore {
    entries: Mutex<Entries>,
}

impl ReassemblyStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Buffer chunk `index` of `base`, creating the entry on first use.
    /// A repeated index overwrites the earlier bytes. Returns the number
    /// of chunks now buffered for `base`.
    pub fn insert(&self, base: &str, index: u64, bytes: Bytes) -> usize {
        let mut entries = self.lock();
        let entry = entries.entry(base.to_string()).or_default();
        entry.insert(index, bytes);
        entry.len()
    }

    /// Remove the entry for `base` and return its chunks in ascending index
    /// order. After this the entry no longer exists; a later chunk for the
    /// same base starts a fresh one.
    pub fn take(&self, base: &str) -> Option<BTreeMap<u64, Bytes>> {
        self.lock().remove(base)
    }

    /// Put back chunks from a `take` whose file could not be written, so a
    /// repeated end marker can try again. Chunks buffered since the take
    /// are newer and keep their place.
    pub fn restore(&self, base: &str, chunks: BTreeMap<u64, Bytes>) {
        let mut entries = self.lock();
        let entry = entries.entry(base.to_string()).or_default();
        for (index, bytes) in chunks {
            entry.entry(index).or_insert(bytes);
        }
    }

    /// Base files with chunks currently buffered.
    pub fn in_progress(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Indices buffered for `base`, ascending.
    pub fn buffered_indices(&self, base: &str) -> Option<Vec<u64>> {
        self.lock()
            .get(base)
            .map(|chunks| chunks.keys().copied().collect())
    }
}

/// First index missing from a dense `0..N` run, if any.
pub fn first_gap(chunks: &BTreeMap<u64, Bytes>) -> Option<u64> {
    chunks
        .keys()
        .enumerate()
        .find(|(expected, index)| *expected as u64 != **index)
        .map(|(expected, _)| expected as u64)
}
