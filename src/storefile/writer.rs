//! Store File Writer
//!
//! Writes cells into a sorted file while building the bloom filter and the
//! timestamp range, then records both with the caller's metadata on close.

use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use tracing::debug;

use crate::bloom::{BloomFilter, BloomType};
use crate::cache::BlockCache;
use crate::cell::{Cell, CellType};
use crate::config::FamilyConfig;
use crate::error::Result;
use crate::sfile::{SortedFileWriter, WriterSummary};

use super::reader::encode_time_range;
use super::{
    BLOOM_FILTER_DATA, BLOOM_FILTER_META, BLOOM_FILTER_TYPE_KEY, MAJOR_COMPACTION_KEY,
    MAX_SEQ_ID_KEY, MAX_WRITE_NUMBER_KEY, TIMERANGE_KEY,
};

pub struct StoreFileWriter {
    inner: SortedFileWriter,
    bloom_type: BloomType,
    bloom: Option<BloomFilter>,
    /// Consecutive cells of one row (or column) add a single bloom key
    last_bloom_key: Option<Vec<u8>>,
    time_range: Option<(i64, i64)>,
    /// Highest MVCC write number among the cells written
    max_write_number: u64,
}

impl StoreFileWriter {
    /// Create a writer for a family; `max_keys` sizes the bloom filter
    pub fn create(
        path: &Path,
        family: &FamilyConfig,
        max_keys: usize,
        cache: Option<Arc<dyn BlockCache>>,
    ) -> Result<Self> {
        let mut inner = SortedFileWriter::create(path, family.block_size, family.compression)?;
        if family.cache_on_write && family.block_cache_enabled {
            if let Some(cache) = cache {
                inner = inner.with_cache_on_write(cache, family.in_memory);
            }
        }

        let bloom = match family.bloom_type {
            BloomType::None => None,
            _ if max_keys == 0 => None,
            _ => Some(BloomFilter::new(max_keys, family.bloom_error_rate)?),
        };

        Ok(Self {
            inner,
            bloom_type: family.bloom_type,
            bloom,
            last_bloom_key: None,
            time_range: None,
            max_write_number: 0,
        })
    }

    pub fn path(&self) -> &Path {
        self.inner.path()
    }

    pub fn entry_count(&self) -> u64 {
        self.inner.entry_count()
    }

    /// Append one cell; cells must arrive in key order
    pub fn append(&mut self, cell: &Cell) -> Result<()> {
        self.inner.append(cell.key(), cell.value())?;

        if let Some(bloom) = &mut self.bloom {
            // Family delete markers are keyed by the row alone
            let qualifier = match cell.cell_type() {
                CellType::DeleteFamily => &[][..],
                _ => cell.qualifier(),
            };
            if let Some(key) = self.bloom_type.bloom_key(cell.row(), qualifier) {
                if self.last_bloom_key.as_deref() != Some(key.as_slice()) {
                    bloom.add(&key);
                    self.last_bloom_key = Some(key);
                }
            }
        }

        let ts = cell.timestamp();
        self.time_range = Some(match self.time_range {
            Some((lo, hi)) => (lo.min(ts), hi.max(ts)),
            None => (ts, ts),
        });
        self.max_write_number = self.max_write_number.max(cell.seq());
        Ok(())
    }

    /// Carry the write number of cells merged from other files, whose
    /// cells no longer hold one
    pub fn raise_max_write_number(&mut self, write_number: u64) {
        self.max_write_number = self.max_write_number.max(write_number);
    }

    /// Record the flushed sequence id, the highest write number and whether
    /// a major compaction wrote the file
    pub fn append_metadata(&mut self, max_seq_id: i64, major_compaction: bool) -> Result<()> {
        self.inner
            .append_file_info(MAX_SEQ_ID_KEY, &max_seq_id.to_be_bytes())?;
        self.inner
            .append_file_info(MAX_WRITE_NUMBER_KEY, &self.max_write_number.to_be_bytes())?;
        self.inner
            .append_file_info(MAJOR_COMPACTION_KEY, &[major_compaction as u8])
    }

    pub fn append_file_info(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.inner.append_file_info(key, value)
    }

    pub fn close(mut self) -> Result<WriterSummary> {
        if let Some((lo, hi)) = self.time_range {
            self.inner
                .append_file_info(TIMERANGE_KEY, &encode_time_range(lo, hi))?;
        }

        let mut written_type = BloomType::None;
        if let Some(mut bloom) = self.bloom.take() {
            if bloom.key_count() > 0 {
                let provisioned = bloom.byte_size();
                bloom.compact();
                debug!(
                    path = %self.inner.path().display(),
                    keys = bloom.key_count(),
                    bytes = bloom.byte_size(),
                    provisioned,
                    "Bloom filter written"
                );
                self.inner
                    .append_meta_block(BLOOM_FILTER_META, bloom.meta().encode());
                self.inner
                    .append_meta_block(BLOOM_FILTER_DATA, Bytes::copy_from_slice(bloom.data()));
                written_type = self.bloom_type;
            }
        }
        self.inner
            .append_file_info(BLOOM_FILTER_TYPE_KEY, written_type.name().as_bytes())?;

        self.inner.close()
    }
}
