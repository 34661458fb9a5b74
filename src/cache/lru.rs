//! LRU block cache with single / multi / in-memory tiers
//!
//! ## Sizing
//! ```text
//! acceptable = max_size * acceptable_factor   (eviction trigger)
//! minimum    = max_size * min_factor          (eviction goal)
//! tier target = max_size * tier_factor * min_factor
//! ```
//!
//! ## Eviction
//! 1. Try-lock; a run already in progress absorbs this trigger
//! 2. `bytes_to_free = size - minimum`
//! 3. Bucket every block by tier, oldest access first
//! 4. Visit tiers in ascending overflow (`tier_total - tier_target`) order,
//!    freeing `min(overflow, remaining_to_free / remaining_tiers)` from each

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

use bytes::Bytes;
use crossbeam::channel::{self, Sender, TrySendError};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::config::CacheConfig;
use crate::error::{CellStoreError, Result};

use super::block::{BlockPriority, CachedBlock};
use super::stats::{CacheStats, CacheStatsSnapshot};
use super::{BlockCache, BlockCacheKey};

/// Process-wide block cache
pub struct LruBlockCache {
    inner: Arc<CacheInner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

struct CacheInner {
    config: CacheConfig,
    map: RwLock<HashMap<BlockCacheKey, Arc<CachedBlock>>>,
    /// Bytes charged by all cached blocks
    size: AtomicUsize,
    /// Logical clock for recency
    access_clock: AtomicU64,
    eviction_lock: Mutex<()>,
    eviction_in_progress: AtomicBool,
    /// Wakes the eviction worker; `None` when eviction runs inline
    wakeup: Mutex<Option<Sender<()>>>,
    stats: CacheStats,
}

impl LruBlockCache {
    /// Create a cache, spawning the eviction worker if configured
    pub fn new(config: CacheConfig) -> Result<Self> {
        config.validate()?;
        let eviction_thread = config.eviction_thread;

        let inner = Arc::new(CacheInner {
            config,
            map: RwLock::new(HashMap::new()),
            size: AtomicUsize::new(0),
            access_clock: AtomicU64::new(0),
            eviction_lock: Mutex::new(()),
            eviction_in_progress: AtomicBool::new(false),
            wakeup: Mutex::new(None),
            stats: CacheStats::default(),
        });

        let worker = if eviction_thread {
            Some(spawn_eviction_worker(&inner)?)
        } else {
            None
        };

        Ok(Self {
            inner,
            worker: Mutex::new(worker),
        })
    }

    /// Run an eviction pass on the calling thread
    pub fn evict(&self) {
        self.inner.evict();
    }

    pub fn max_size(&self) -> usize {
        self.inner.config.max_size
    }

    /// Occupancy that triggers eviction
    pub fn acceptable_size(&self) -> usize {
        self.inner.acceptable_size()
    }

    /// Occupancy an eviction pass frees down to
    pub fn min_size(&self) -> usize {
        self.inner.min_size()
    }

    pub fn free_size(&self) -> usize {
        self.max_size().saturating_sub(self.size())
    }

    /// Bytes held in one priority tier
    pub fn tier_size(&self, priority: BlockPriority) -> usize {
        self.inner
            .map
            .read()
            .values()
            .filter(|block| block.priority() == priority)
            .map(|block| block.heap_size())
            .sum()
    }

    /// Stop the eviction worker and wait for it
    pub fn shutdown(&self) {
        self.inner.wakeup.lock().take();
        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                warn!("block cache eviction worker panicked");
            }
        }
    }
}

impl Drop for LruBlockCache {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl BlockCache for LruBlockCache {
    fn cache_block(&self, key: BlockCacheKey, buf: Bytes, in_memory: bool) -> Result<()> {
        self.inner.cache_block(key, buf, in_memory)
    }

    fn get_block(&self, key: &BlockCacheKey, caching: bool) -> Option<Bytes> {
        self.inner.get_block(key, caching)
    }

    fn evict_block(&self, key: &BlockCacheKey) -> bool {
        let removed = self.inner.map.write().remove(key);
        match removed {
            Some(block) => {
                self.inner.size.fetch_sub(block.heap_size(), Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    fn evict_blocks_by_file(&self, file: &str) -> usize {
        let mut map = self.inner.map.write();
        let before = map.len();
        let mut freed = 0usize;
        map.retain(|key, block| {
            if key.file.as_ref() == file {
                freed += block.heap_size();
                false
            } else {
                true
            }
        });
        self.inner.size.fetch_sub(freed, Ordering::SeqCst);
        before - map.len()
    }

    fn size(&self) -> usize {
        self.inner.size.load(Ordering::SeqCst)
    }

    fn block_count(&self) -> usize {
        self.inner.map.read().len()
    }

    fn stats(&self) -> CacheStatsSnapshot {
        self.inner.stats.snapshot()
    }
}

impl CacheInner {
    fn acceptable_size(&self) -> usize {
        (self.config.max_size as f64 * self.config.acceptable_factor as f64) as usize
    }

    fn min_size(&self) -> usize {
        (self.config.max_size as f64 * self.config.min_factor as f64) as usize
    }

    fn tier_target(&self, factor: f32) -> usize {
        (self.config.max_size as f64 * factor as f64 * self.config.min_factor as f64) as usize
    }

    fn tick(&self) -> u64 {
        self.access_clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn cache_block(&self, key: BlockCacheKey, buf: Bytes, in_memory: bool) -> Result<()> {
        let block = CachedBlock::new(key.clone(), buf, self.tick(), in_memory);
        let charge = block.heap_size();

        let new_size = {
            let mut map = self.map.write();
            if map.contains_key(&key) {
                return Err(CellStoreError::AlreadyCached(key.to_string()));
            }
            let current = self.size.load(Ordering::SeqCst);
            if current + charge > self.config.max_size {
                // Caching it would break the capacity bound; skip and make room
                drop(map);
                self.stats.refused();
                self.request_eviction();
                return Ok(());
            }
            map.insert(key, Arc::new(block));
            self.size.fetch_add(charge, Ordering::SeqCst) + charge
        };

        if new_size > self.acceptable_size() && !self.eviction_in_progress.load(Ordering::SeqCst) {
            self.request_eviction();
        }
        Ok(())
    }

    fn get_block(&self, key: &BlockCacheKey, caching: bool) -> Option<Bytes> {
        let found = self.map.read().get(key).cloned();
        match found {
            Some(block) => {
                self.stats.hit(caching);
                block.access(self.tick());
                Some(block.buffer().clone())
            }
            None => {
                self.stats.miss(caching);
                None
            }
        }
    }

    /// Signal the worker, or evict inline when there is none
    fn request_eviction(&self) {
        let wakeup = self.wakeup.lock().clone();
        match wakeup {
            Some(tx) => match tx.try_send(()) {
                // Full means a wakeup is already pending
                Ok(()) | Err(TrySendError::Full(())) => {}
                Err(TrySendError::Disconnected(())) => self.evict(),
            },
            None => self.evict(),
        }
    }

    fn evict(&self) {
        let Some(_guard) = self.eviction_lock.try_lock() else {
            return;
        };
        self.eviction_in_progress.store(true, Ordering::SeqCst);

        let size = self.size.load(Ordering::SeqCst);
        let bytes_to_free = size.saturating_sub(self.min_size());
        if bytes_to_free == 0 {
            self.eviction_in_progress.store(false, Ordering::SeqCst);
            return;
        }
        self.stats.eviction_run();

        let mut single = EvictionBucket::new(self.tier_target(self.config.single_factor));
        let mut multi = EvictionBucket::new(self.tier_target(self.config.multi_factor));
        let mut memory = EvictionBucket::new(self.tier_target(self.config.memory_factor));
        for block in self.map.read().values() {
            match block.priority() {
                BlockPriority::Single => single.add(Arc::clone(block)),
                BlockPriority::Multi => multi.add(Arc::clone(block)),
                BlockPriority::Memory => memory.add(Arc::clone(block)),
            }
        }

        let mut buckets = vec![single, multi, memory];
        buckets.sort_by_key(|bucket| bucket.overflow());

        let mut freed = 0usize;
        let mut remaining = buckets.len();
        for mut bucket in buckets {
            let overflow = bucket.overflow();
            if overflow > 0 {
                let share = bytes_to_free.saturating_sub(freed) / remaining;
                let goal = (overflow as usize).min(share);
                freed += bucket.free(goal, self);
            }
            remaining -= 1;
        }

        debug!(
            size_before = size,
            bytes_to_free,
            freed,
            size_after = self.size.load(Ordering::SeqCst),
            "block cache eviction run"
        );
        self.eviction_in_progress.store(false, Ordering::SeqCst);
    }

    /// Remove a block only if it is still the exact entry that was bucketed
    fn evict_entry(&self, block: &Arc<CachedBlock>) -> usize {
        let mut map = self.map.write();
        match map.get(block.key()) {
            Some(current) if Arc::ptr_eq(current, block) => {
                map.remove(block.key());
                self.size.fetch_sub(block.heap_size(), Ordering::SeqCst);
                self.stats.evicted();
                block.heap_size()
            }
            _ => 0,
        }
    }
}

/// Eviction candidates of one tier
struct EvictionBucket {
    blocks: Vec<Arc<CachedBlock>>,
    total: usize,
    target: usize,
}

impl EvictionBucket {
    fn new(target: usize) -> Self {
        Self {
            blocks: Vec::new(),
            total: 0,
            target,
        }
    }

    fn add(&mut self, block: Arc<CachedBlock>) {
        self.total += block.heap_size();
        self.blocks.push(block);
    }

    fn overflow(&self) -> i64 {
        self.total as i64 - self.target as i64
    }

    /// Evict least recently used blocks until `goal` bytes are freed
    fn free(&mut self, goal: usize, cache: &CacheInner) -> usize {
        self.blocks.sort_by_key(|block| block.access_time());
        let mut freed = 0usize;
        for block in &self.blocks {
            if freed >= goal {
                break;
            }
            freed += cache.evict_entry(block);
        }
        freed
    }
}

fn spawn_eviction_worker(inner: &Arc<CacheInner>) -> Result<JoinHandle<()>> {
    let (tx, rx) = channel::bounded::<()>(1);
    let weak: Weak<CacheInner> = Arc::downgrade(inner);

    let handle = thread::Builder::new()
        .name("block-cache-evictor".to_string())
        .spawn(move || {
            while rx.recv().is_ok() {
                match weak.upgrade() {
                    Some(cache) => cache.evict(),
                    None => break,
                }
            }
        })?;

    *inner.wakeup.lock() = Some(tx);
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inline_cache(max_size: usize) -> LruBlockCache {
        let config = CacheConfig::builder()
            .max_size(max_size)
            .eviction_thread(false)
            .build();
        LruBlockCache::new(config).unwrap()
    }

    fn key(n: usize) -> BlockCacheKey {
        BlockCacheKey::data(Arc::from("file"), n)
    }

    fn block(len: usize) -> Bytes {
        Bytes::from(vec![7u8; len])
    }

    #[test]
    fn test_get_on_miss_counts_miss() {
        let cache = inline_cache(100_000);
        assert!(cache.get_block(&key(1), true).is_none());
        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.caching_misses, 1);
    }

    #[test]
    fn test_double_insert_is_rejected() {
        let cache = inline_cache(100_000);
        cache.cache_block(key(1), block(10), false).unwrap();
        let err = cache.cache_block(key(1), block(10), false);
        assert!(matches!(err, Err(CellStoreError::AlreadyCached(_))));
    }

    #[test]
    fn test_size_never_exceeds_max() {
        let cache = inline_cache(10_000);
        for n in 0..500 {
            cache.cache_block(key(n), block(400), false).unwrap();
            assert!(cache.size() <= cache.max_size());
        }
    }

    #[test]
    fn test_eviction_frees_to_min_size() {
        let cache = inline_cache(100_000);
        for n in 0..300 {
            cache.cache_block(key(n), block(1000), false).unwrap();
        }
        cache.evict();
        assert!(cache.size() <= cache.min_size());
        assert!(cache.stats().eviction_runs > 0);
    }

    #[test]
    fn test_eviction_prefers_single_access_blocks() {
        let cache = inline_cache(100_000);
        for n in 0..60 {
            cache.cache_block(key(n), block(1000), false).unwrap();
            // Touch the first half twice so they move to the multi tier
            if n < 30 {
                cache.get_block(&key(n), true);
            }
        }
        for n in 60..90 {
            cache.cache_block(key(n), block(1000), false).unwrap();
        }
        cache.evict();

        let multi_left = (0..30).filter(|n| cache.get_block(&key(*n), true).is_some()).count();
        let single_left = (30..90).filter(|n| cache.get_block(&key(*n), true).is_some()).count();
        assert!(multi_left > 0);
        assert!(single_left < 60);
    }

    #[test]
    fn test_evict_blocks_by_file() {
        let cache = inline_cache(100_000);
        cache.cache_block(key(1), block(10), false).unwrap();
        cache.cache_block(key(2), block(10), false).unwrap();
        cache
            .cache_block(BlockCacheKey::data(Arc::from("other"), 1), block(10), false)
            .unwrap();
        assert_eq!(cache.evict_blocks_by_file("file"), 2);
        assert_eq!(cache.block_count(), 1);
    }
}
