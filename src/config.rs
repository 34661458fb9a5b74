//! Configuration for cellstore
//!
//! Centralized configuration with sensible defaults. Three layers:
//! - [`CacheConfig`]: the process-wide block cache
//! - [`FamilyConfig`]: per column family settings that shape store files
//! - [`StoreConfig`]: flush, compaction and split thresholds of a store

use std::time::Duration;

use crate::bloom::BloomType;
use crate::error::{CellStoreError, Result};
use crate::sfile::Compression;

// =============================================================================
// Block Cache Configuration
// =============================================================================

/// Sizing of the shared block cache
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum bytes of decoded blocks held by the cache
    pub max_size: usize,

    /// Share of the cache targeted at blocks read once
    pub single_factor: f32,

    /// Share of the cache targeted at blocks read more than once
    pub multi_factor: f32,

    /// Share of the cache targeted at in-memory families
    pub memory_factor: f32,

    /// Eviction frees down to `max_size * min_factor`
    pub min_factor: f32,

    /// Eviction is triggered above `max_size * acceptable_factor`
    pub acceptable_factor: f32,

    /// Run eviction on a dedicated worker thread
    pub eviction_thread: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: 256 * 1024 * 1024, // 256 MB
            single_factor: 0.25,
            multi_factor: 0.50,
            memory_factor: 0.25,
            min_factor: 0.75,
            acceptable_factor: 0.85,
            eviction_thread: true,
        }
    }
}

impl CacheConfig {
    /// Create a new config builder
    pub fn builder() -> CacheConfigBuilder {
        CacheConfigBuilder::default()
    }

    /// Reject factor combinations the eviction algorithm cannot honour
    pub fn validate(&self) -> Result<()> {
        if self.max_size == 0 {
            return Err(CellStoreError::Config("cache max_size must be > 0".into()));
        }
        let sum = self.single_factor + self.multi_factor + self.memory_factor;
        if (sum - 1.0).abs() > 0.001 {
            return Err(CellStoreError::Config(format!(
                "single + multi + memory factors must total 1.0, got {}",
                sum
            )));
        }
        if self.min_factor > self.acceptable_factor {
            return Err(CellStoreError::Config(
                "min_factor must not exceed acceptable_factor".into(),
            ));
        }
        if self.acceptable_factor > 1.0 || self.min_factor <= 0.0 {
            return Err(CellStoreError::Config(
                "min/acceptable factors must lie in (0, 1]".into(),
            ));
        }
        Ok(())
    }
}

/// Builder for CacheConfig
#[derive(Default)]
pub struct CacheConfigBuilder {
    config: CacheConfig,
}

impl CacheConfigBuilder {
    /// Set the maximum cache size (in bytes)
    pub fn max_size(mut self, size: usize) -> Self {
        self.config.max_size = size;
        self
    }

    /// Set the single/multi/memory tier shares
    pub fn tier_factors(mut self, single: f32, multi: f32, memory: f32) -> Self {
        self.config.single_factor = single;
        self.config.multi_factor = multi;
        self.config.memory_factor = memory;
        self
    }

    /// Set the minimum occupancy factor
    pub fn min_factor(mut self, factor: f32) -> Self {
        self.config.min_factor = factor;
        self
    }

    /// Set the acceptable occupancy factor
    pub fn acceptable_factor(mut self, factor: f32) -> Self {
        self.config.acceptable_factor = factor;
        self
    }

    /// Enable or disable the background eviction worker
    pub fn eviction_thread(mut self, enabled: bool) -> Self {
        self.config.eviction_thread = enabled;
        self
    }

    pub fn build(self) -> CacheConfig {
        self.config
    }
}

// =============================================================================
// Column Family Configuration
// =============================================================================

/// Settings of one column family
#[derive(Debug, Clone)]
pub struct FamilyConfig {
    /// Family name; every cell written to the store carries it
    pub name: Vec<u8>,

    /// Versions kept per column by reads and major compaction
    pub max_versions: usize,

    /// Age after which cells expire (`None` = forever)
    pub ttl: Option<Duration>,

    /// Target uncompressed data block size (in bytes)
    pub block_size: usize,

    /// Per-block compression codec
    pub compression: Compression,

    /// Bloom filter keyed by row, row+qualifier, or disabled
    pub bloom_type: BloomType,

    /// Target bloom false positive rate
    pub bloom_error_rate: f64,

    /// Pin this family's blocks in the in-memory cache tier
    pub in_memory: bool,

    /// Route data block reads through the block cache
    pub block_cache_enabled: bool,

    /// Insert blocks into the cache as they are written
    pub cache_on_write: bool,
}

impl Default for FamilyConfig {
    fn default() -> Self {
        Self {
            name: b"f".to_vec(),
            max_versions: 3,
            ttl: None,
            block_size: 64 * 1024, // 64 KB
            compression: Compression::None,
            bloom_type: BloomType::None,
            bloom_error_rate: 0.01,
            in_memory: false,
            block_cache_enabled: true,
            cache_on_write: false,
        }
    }
}

impl FamilyConfig {
    /// Create a new config builder for the named family
    pub fn builder(name: impl Into<Vec<u8>>) -> FamilyConfigBuilder {
        FamilyConfigBuilder {
            config: FamilyConfig {
                name: name.into(),
                ..Default::default()
            },
        }
    }

    /// TTL in milliseconds, `i64::MAX` when cells never expire
    pub fn ttl_millis(&self) -> i64 {
        self.ttl
            .map(|ttl| i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX))
            .unwrap_or(i64::MAX)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() || self.name.len() > u8::MAX as usize {
            return Err(CellStoreError::Config(
                "family name must be 1..=255 bytes".into(),
            ));
        }
        if self.max_versions == 0 {
            return Err(CellStoreError::Config("max_versions must be > 0".into()));
        }
        if self.block_size == 0 {
            return Err(CellStoreError::Config("block_size must be > 0".into()));
        }
        if !(self.bloom_error_rate > 0.0 && self.bloom_error_rate < 1.0) {
            return Err(CellStoreError::Config(
                "bloom_error_rate must lie in (0, 1)".into(),
            ));
        }
        Ok(())
    }
}

/// Builder for FamilyConfig
pub struct FamilyConfigBuilder {
    config: FamilyConfig,
}

impl FamilyConfigBuilder {
    /// Set the number of versions kept per column
    pub fn max_versions(mut self, versions: usize) -> Self {
        self.config.max_versions = versions;
        self
    }

    /// Set the cell time-to-live
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.config.ttl = Some(ttl);
        self
    }

    /// Set the target data block size (in bytes)
    pub fn block_size(mut self, size: usize) -> Self {
        self.config.block_size = size;
        self
    }

    /// Set the block compression codec
    pub fn compression(mut self, compression: Compression) -> Self {
        self.config.compression = compression;
        self
    }

    /// Set the bloom filter type
    pub fn bloom_type(mut self, bloom_type: BloomType) -> Self {
        self.config.bloom_type = bloom_type;
        self
    }

    /// Set the bloom filter false positive rate
    pub fn bloom_error_rate(mut self, rate: f64) -> Self {
        self.config.bloom_error_rate = rate;
        self
    }

    /// Keep this family's blocks in the in-memory cache tier
    pub fn in_memory(mut self, in_memory: bool) -> Self {
        self.config.in_memory = in_memory;
        self
    }

    /// Enable or disable block caching on reads
    pub fn block_cache_enabled(mut self, enabled: bool) -> Self {
        self.config.block_cache_enabled = enabled;
        self
    }

    /// Cache data blocks as they are written
    pub fn cache_on_write(mut self, enabled: bool) -> Self {
        self.config.cache_on_write = enabled;
        self
    }

    pub fn build(self) -> FamilyConfig {
        self.config
    }
}

// =============================================================================
// Store Configuration
// =============================================================================

/// Flush, compaction and split thresholds of a store
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Memtable size (in bytes) that triggers a flush
    pub flush_size: usize,

    /// Writes are refused while the memtable exceeds `flush_size * blocking_multiplier`
    pub blocking_multiplier: usize,

    /// Minimum store file count before a minor compaction is considered
    pub compaction_threshold: usize,

    /// Upper bound on files merged by one minor compaction
    pub max_files_to_compact: usize,

    /// Age of the oldest file that triggers a major compaction (`None` = never)
    pub major_compaction_period: Option<Duration>,

    /// Aggregate store size (in bytes) above which a split point is offered
    pub max_file_size: u64,

    /// Refuse writes
    pub read_only: bool,

    /// Skip unreadable store files on open instead of failing
    pub skip_corrupt_files: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            flush_size: 64 * 1024 * 1024, // 64 MB
            blocking_multiplier: 2,
            compaction_threshold: 3,
            max_files_to_compact: 10,
            major_compaction_period: Some(Duration::from_secs(24 * 60 * 60)),
            max_file_size: 256 * 1024 * 1024, // 256 MB
            read_only: false,
            skip_corrupt_files: false,
        }
    }
}

impl StoreConfig {
    /// Create a new config builder
    pub fn builder() -> StoreConfigBuilder {
        StoreConfigBuilder::default()
    }

    /// Memtable size above which writes are refused
    pub fn blocking_size(&self) -> usize {
        self.flush_size.saturating_mul(self.blocking_multiplier.max(1))
    }

    pub fn validate(&self) -> Result<()> {
        if self.flush_size == 0 {
            return Err(CellStoreError::Config("flush_size must be > 0".into()));
        }
        if self.max_files_to_compact < 2 {
            return Err(CellStoreError::Config(
                "max_files_to_compact must be >= 2".into(),
            ));
        }
        Ok(())
    }
}

/// Builder for StoreConfig
#[derive(Default)]
pub struct StoreConfigBuilder {
    config: StoreConfig,
}

impl StoreConfigBuilder {
    /// Set the memtable flush size (in bytes)
    pub fn flush_size(mut self, size: usize) -> Self {
        self.config.flush_size = size;
        self
    }

    /// Set the blocking multiplier
    pub fn blocking_multiplier(mut self, multiplier: usize) -> Self {
        self.config.blocking_multiplier = multiplier;
        self
    }

    /// Set the minor compaction file-count threshold
    pub fn compaction_threshold(mut self, count: usize) -> Self {
        self.config.compaction_threshold = count;
        self
    }

    /// Set the maximum files merged by a minor compaction
    pub fn max_files_to_compact(mut self, count: usize) -> Self {
        self.config.max_files_to_compact = count;
        self
    }

    /// Set (or clear) the periodic major compaction interval
    pub fn major_compaction_period(mut self, period: Option<Duration>) -> Self {
        self.config.major_compaction_period = period;
        self
    }

    /// Set the split threshold (in bytes)
    pub fn max_file_size(mut self, size: u64) -> Self {
        self.config.max_file_size = size;
        self
    }

    /// Open the store read-only
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.config.read_only = read_only;
        self
    }

    /// Skip unreadable store files on open
    pub fn skip_corrupt_files(mut self, skip: bool) -> Self {
        self.config.skip_corrupt_files = skip;
        self
    }

    pub fn build(self) -> StoreConfig {
        self.config
    }
}
