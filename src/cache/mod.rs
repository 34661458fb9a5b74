//! Block Cache Module
//!
//! Capacity-bounded, priority-aware LRU cache of decoded sorted-file blocks,
//! shared by every store file in the process.
//!
//! ## Responsibilities
//! - Map `(file, block)` identities to decoded block buffers
//! - Track three priority tiers: single-access, multi-access, in-memory
//! - Evict on a background worker once occupancy crosses the acceptable mark
//! - Keep hit/miss/eviction statistics
//!
//! ## Concurrency
//! - Lookups take a shared lock on the block map and bump atomics only
//! - Insertions take the exclusive lock briefly
//! - Eviction is guarded by a try-lock, so overlapping triggers collapse
//!   into a single run; callers never wait for it

mod block;
mod id_lock;
mod lru;
mod stats;

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

use crate::error::Result;

pub use block::{BlockPriority, CachedBlock};
pub use id_lock::{IdLock, IdLockGuard};
pub use lru::LruBlockCache;
pub use stats::{CacheStats, CacheStatsSnapshot};

/// Which block of a file a cache entry holds
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BlockId {
    /// Data block by ordinal
    Data(usize),
    /// Meta block by name
    Meta(String),
}

/// Identity of a cached block
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlockCacheKey {
    pub file: Arc<str>,
    pub block: BlockId,
}

impl BlockCacheKey {
    pub fn data(file: Arc<str>, ordinal: usize) -> Self {
        Self {
            file,
            block: BlockId::Data(ordinal),
        }
    }

    pub fn meta(file: Arc<str>, name: &str) -> Self {
        Self {
            file,
            block: BlockId::Meta(name.to_string()),
        }
    }
}

impl fmt::Display for BlockCacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.block {
            BlockId::Data(ordinal) => write!(f, "{}#{}", self.file, ordinal),
            BlockId::Meta(name) => write!(f, "{}#{}", self.file, name),
        }
    }
}

/// Cache of decoded blocks. The cache is an optimization only: every caller
/// must fall back to a physical read when it returns nothing.
pub trait BlockCache: Send + Sync {
    /// Insert a block. Inserting a key that is already present is a caller
    /// race and fails with `AlreadyCached`.
    fn cache_block(&self, key: BlockCacheKey, buf: Bytes, in_memory: bool) -> Result<()>;

    /// Look a block up; `caching` records whether the caller would have
    /// cached the block on a miss (kept apart in the statistics)
    fn get_block(&self, key: &BlockCacheKey, caching: bool) -> Option<Bytes>;

    /// Drop one block; returns whether it was present
    fn evict_block(&self, key: &BlockCacheKey) -> bool;

    /// Drop every block of a file; returns how many were dropped
    fn evict_blocks_by_file(&self, file: &str) -> usize;

    /// Bytes currently held
    fn size(&self) -> usize;

    /// Number of blocks currently held
    fn block_count(&self) -> usize;

    fn stats(&self) -> CacheStatsSnapshot;
}
