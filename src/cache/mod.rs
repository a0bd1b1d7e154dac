//! Directory listing cache
//!
//! Maps a normalized absolute directory path to the entries last fetched
//! for it. A path is in one of three states:
//!
//! - absent: never fetched
//! - fresh: the stored listing may be served without a round trip
//! - stale: invalidated since it was fetched; the next lookup misses
//!
//! There is no TTL. Mutating operations invalidate what they touch, and
//! callers that need a live view of a busy directory must invalidate it
//! themselves or run with caching disabled.
//!
//! The busy counter tracks how many guarded operations are in flight.
//! It is bookkeeping only; no lookup decision depends on it.

pub mod stats;

use std::collections::HashMap;

use tracing::{debug, trace};

use crate::listing::Listing;
use crate::path;

pub use stats::CacheStats;

#[derive(Debug, Clone)]
enum Slot {
    Fresh(Listing),
    Stale,
}

/// Result of a cache lookup that does not record statistics
#[derive(Debug, Clone, Copy)]
pub enum Lookup<'a> {
    Hit(&'a Listing),
    Stale,
    Miss,
}

/// Per-directory listing cache owned by the filesystem adapter
#[derive(Debug, Default)]
pub struct DirCache {
    slots: HashMap<String, Slot>,
    busy: usize,
    stats: CacheStats,
}

impl DirCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the start of a guarded operation, returning the new busy count
    pub fn enter(&mut self) -> usize {
        self.busy += 1;
        self.busy
    }

    /// Mark the end of a guarded operation, returning the new busy count
    ///
    /// # Panics
    ///
    /// Panics if called more often than [`DirCache::enter`]; an unbalanced
    /// `leave` is a bug in the caller.
    pub fn leave(&mut self) -> usize {
        assert!(self.busy > 0, "dircache busy count should never be negative");
        self.busy -= 1;
        self.busy
    }

    /// Number of guarded operations currently in flight
    pub fn busy(&self) -> usize {
        self.busy
    }

    /// Fetch a fresh listing, recording a hit or miss
    pub fn get(&mut self, dir: &str) -> Option<&Listing> {
        let key = path::abspath(dir);
        match self.slots.get(&key) {
            Some(Slot::Fresh(listing)) => {
                self.stats.hits += 1;
                trace!("dircache hit: {}", key);
                Some(listing)
            }
            Some(Slot::Stale) => {
                self.stats.stale_misses += 1;
                trace!("dircache stale: {}", key);
                None
            }
            None => {
                self.stats.misses += 1;
                trace!("dircache miss: {}", key);
                None
            }
        }
    }

    /// Inspect the state of a directory without touching the statistics
    pub fn lookup(&self, dir: &str) -> Lookup<'_> {
        match self.slots.get(&path::abspath(dir)) {
            Some(Slot::Fresh(listing)) => Lookup::Hit(listing),
            Some(Slot::Stale) => Lookup::Stale,
            None => Lookup::Miss,
        }
    }

    /// Store the listing for a directory, replacing whatever was there
    pub fn put(&mut self, dir: &str, listing: Listing) {
        let key = path::abspath(dir);
        debug!("dircache fill: {} ({} entries)", key, listing.len());
        self.stats.fills += 1;
        self.slots.insert(key, Slot::Fresh(listing));
    }

    /// Mark one directory stale. Returns true if a fresh listing was dropped.
    pub fn invalidate(&mut self, dir: &str) -> bool {
        let key = path::abspath(dir);
        self.stats.invalidations += 1;
        match self.slots.get_mut(&key) {
            Some(slot @ Slot::Fresh(_)) => {
                debug!("dircache invalidate: {}", key);
                *slot = Slot::Stale;
                true
            }
            _ => false,
        }
    }

    /// Mark every cached directory equal to or beneath any of `dirs` stale.
    /// Returns the number of fresh listings dropped.
    pub fn invalidate_prefix<S: AsRef<str>>(&mut self, dirs: &[S]) -> usize {
        let bases: Vec<String> = dirs.iter().map(|d| path::abspath(d.as_ref())).collect();
        self.stats.invalidations += bases.len() as u64;

        let mut dropped = 0;
        for (key, slot) in self.slots.iter_mut() {
            if matches!(slot, Slot::Fresh(_)) && bases.iter().any(|b| path::isbase(key, b)) {
                debug!("dircache invalidate (prefix): {}", key);
                *slot = Slot::Stale;
                dropped += 1;
            }
        }
        dropped
    }

    /// Forget everything, including which directories were ever fetched
    pub fn clear(&mut self) {
        if !self.slots.is_empty() {
            debug!("dircache clear ({} directories)", self.slots.len());
        }
        self.slots.clear();
    }

    /// Load many directories at once, e.g. from one recursive listing
    pub fn prepopulate<I>(&mut self, groups: I) -> usize
    where
        I: IntoIterator<Item = (String, Listing)>,
    {
        let mut count = 0;
        for (dir, listing) in groups {
            self.put(&dir, listing);
            count += 1;
        }
        debug!("dircache prepopulated {} directories", count);
        count
    }

    /// True if the directory has a listing that would be served
    pub fn is_fresh(&self, dir: &str) -> bool {
        matches!(self.lookup(dir), Lookup::Hit(_))
    }

    /// Number of directories with a fresh listing
    pub fn len(&self) -> usize {
        self.slots
            .values()
            .filter(|s| matches!(s, Slot::Fresh(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }
}
