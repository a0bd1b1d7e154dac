//! Counters describing how the directory cache has been used

use std::fmt;

/// Snapshot of directory cache activity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups served from a fresh listing
    pub hits: u64,
    /// Lookups for directories never fetched
    pub misses: u64,
    /// Lookups for directories invalidated since their last fetch
    pub stale_misses: u64,
    /// Listings stored (individual fetches and pre-population)
    pub fills: u64,
    /// Invalidation requests, one per directory named
    pub invalidations: u64,
}

impl CacheStats {
    /// Fraction of lookups served from cache
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses + self.stale_misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "hits={} misses={} stale={} fills={} invalidations={}",
            self.hits, self.misses, self.stale_misses, self.fills, self.invalidations
        )
    }
}
