//! Block cache statistics
//!
//! Lock-free atomic counters, read through a plain snapshot.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    caching_hits: AtomicU64,
    misses: AtomicU64,
    caching_misses: AtomicU64,
    eviction_runs: AtomicU64,
    evicted_blocks: AtomicU64,
    refused_blocks: AtomicU64,
}

impl CacheStats {
    pub fn hit(&self, caching: bool) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        if caching {
            self.caching_hits.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn miss(&self, caching: bool) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        if caching {
            self.caching_misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn eviction_run(&self) {
        self.eviction_runs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn evicted(&self) {
        self.evicted_blocks.fetch_add(1, Ordering::Relaxed);
    }

    /// A block was not cached because it would exceed the capacity
    pub fn refused(&self) {
        self.refused_blocks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            caching_hits: self.caching_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            caching_misses: self.caching_misses.load(Ordering::Relaxed),
            eviction_runs: self.eviction_runs.load(Ordering::Relaxed),
            evicted_blocks: self.evicted_blocks.load(Ordering::Relaxed),
            refused_blocks: self.refused_blocks.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub caching_hits: u64,
    pub misses: u64,
    pub caching_misses: u64,
    pub eviction_runs: u64,
    pub evicted_blocks: u64,
    pub refused_blocks: u64,
}

impl CacheStatsSnapshot {
    pub fn requests(&self) -> u64 {
        self.hits + self.misses
    }

    /// Fraction of lookups that hit (0.0 with no lookups)
    pub fn hit_ratio(&self) -> f64 {
        match self.requests() {
            0 => 0.0,
            total => self.hits as f64 / total as f64,
        }
    }
}
