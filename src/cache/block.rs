//! Cached block entry

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

use bytes::Bytes;

use super::BlockCacheKey;

/// Key and bookkeeping overhead charged per cached block
const BLOCK_OVERHEAD: usize = 96;

/// Priority tier of a cached block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BlockPriority {
    /// Read once so far
    Single = 0,
    /// Read more than once
    Multi = 1,
    /// Belongs to an in-memory family
    Memory = 2,
}

impl BlockPriority {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => BlockPriority::Multi,
            2 => BlockPriority::Memory,
            _ => BlockPriority::Single,
        }
    }
}

/// A decoded block plus its access bookkeeping
#[derive(Debug)]
pub struct CachedBlock {
    key: BlockCacheKey,
    buf: Bytes,
    access_time: AtomicU64,
    priority: AtomicU8,
    heap_size: usize,
}

impl CachedBlock {
    pub fn new(key: BlockCacheKey, buf: Bytes, access_time: u64, in_memory: bool) -> Self {
        let priority = if in_memory {
            BlockPriority::Memory
        } else {
            BlockPriority::Single
        };
        let heap_size = buf.len() + key.file.len() + BLOCK_OVERHEAD;
        Self {
            key,
            buf,
            access_time: AtomicU64::new(access_time),
            priority: AtomicU8::new(priority as u8),
            heap_size,
        }
    }

    /// Record a hit: refresh recency and promote single-access blocks
    pub fn access(&self, access_time: u64) {
        self.access_time.store(access_time, Ordering::Relaxed);
        let _ = self.priority.compare_exchange(
            BlockPriority::Single as u8,
            BlockPriority::Multi as u8,
            Ordering::Relaxed,
            Ordering::Relaxed,
        );
    }

    pub fn key(&self) -> &BlockCacheKey {
        &self.key
    }

    pub fn buffer(&self) -> &Bytes {
        &self.buf
    }

    pub fn access_time(&self) -> u64 {
        self.access_time.load(Ordering::Relaxed)
    }

    pub fn priority(&self) -> BlockPriority {
        BlockPriority::from_u8(self.priority.load(Ordering::Relaxed))
    }

    /// Bytes charged against the cache capacity
    pub fn heap_size(&self) -> usize {
        self.heap_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_repeat_access_promotes_single_to_multi() {
        let key = BlockCacheKey::data(Arc::from("f"), 0);
        let block = CachedBlock::new(key, Bytes::from_static(b"abc"), 1, false);
        assert_eq!(block.priority(), BlockPriority::Single);
        block.access(2);
        assert_eq!(block.priority(), BlockPriority::Multi);
        assert_eq!(block.access_time(), 2);
    }

    #[test]
    fn test_in_memory_block_stays_pinned() {
        let key = BlockCacheKey::data(Arc::from("f"), 0);
        let block = CachedBlock::new(key, Bytes::from_static(b"abc"), 1, true);
        block.access(2);
        assert_eq!(block.priority(), BlockPriority::Memory);
    }
}
