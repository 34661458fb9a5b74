//! Sorted File Writer
//!
//! Streams sorted key/value pairs into data blocks, then writes meta blocks,
//! file info, both indexes and the trailer on `close()`.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use tracing::{debug, warn};

use crate::cache::{BlockCache, BlockCacheKey};
use crate::cell::KeyComparator;
use crate::error::{CellStoreError, Result};

use super::block_index::{BlockIndex, IndexEntry};
use super::file_info::{FileInfo, AVG_KEY_LEN, AVG_VALUE_LEN, COMPARATOR, LASTKEY};
use super::trailer::Trailer;
use super::{Compression, DATA_MAGIC, ENTRY_HEADER_SIZE, FORMAT_VERSION, INDEX_MAGIC, META_MAGIC};

/// What a finished file looks like
#[derive(Debug, Clone)]
pub struct WriterSummary {
    pub path: PathBuf,
    pub entry_count: u64,
    pub file_size: u64,
    pub data_block_count: usize,
    pub first_key: Option<Bytes>,
    pub last_key: Option<Bytes>,
}

/// Writes one sorted file. Keys must be appended in non-decreasing order.
pub struct SortedFileWriter {
    path: PathBuf,
    /// File name, used as the cache key namespace
    name: Arc<str>,
    out: BufWriter<File>,
    block_size: usize,
    compression: Compression,
    comparator: KeyComparator,

    /// Current write position
    offset: u64,
    /// Uncompressed bytes of the open block, magic included
    block: Option<BytesMut>,
    block_first_key: Option<Bytes>,
    last_key: Option<Bytes>,

    data_index: Vec<IndexEntry>,
    meta_blocks: BTreeMap<String, Bytes>,
    file_info: FileInfo,

    entry_count: u64,
    total_key_len: u64,
    total_value_len: u64,
    total_uncompressed: u64,

    /// Cache-on-write target and whether blocks are pinned in memory
    cache: Option<(Arc<dyn BlockCache>, bool)>,
}

impl SortedFileWriter {
    /// Create (or truncate) `path` and start writing
    pub fn create(path: &Path, block_size: usize, compression: Compression) -> Result<Self> {
        if block_size == 0 {
            return Err(CellStoreError::Config("block_size must be > 0".into()));
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        let name: Arc<str> = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
            .into();

        Ok(Self {
            path: path.to_path_buf(),
            name,
            out: BufWriter::new(file),
            block_size,
            compression,
            comparator: KeyComparator,
            offset: 0,
            block: None,
            block_first_key: None,
            last_key: None,
            data_index: Vec::new(),
            meta_blocks: BTreeMap::new(),
            file_info: FileInfo::new(),
            entry_count: 0,
            total_key_len: 0,
            total_value_len: 0,
            total_uncompressed: 0,
            cache: None,
        })
    }

    /// Insert every finished data block into `cache`
    pub fn with_cache_on_write(mut self, cache: Arc<dyn BlockCache>, in_memory: bool) -> Self {
        self.cache = Some((cache, in_memory));
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    pub fn last_key(&self) -> Option<&Bytes> {
        self.last_key.as_ref()
    }

    /// Append one entry
    ///
    /// A key equal to the previous one stays in the same block even when the
    /// block is full.
    pub fn append(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(CellStoreError::OutOfOrderKey("empty key".into()));
        }

        let duplicate = match &self.last_key {
            Some(last) => match self.comparator.compare(last, key) {
                Ordering::Greater => {
                    return Err(CellStoreError::OutOfOrderKey(format!(
                        "{} bytes key sorts before the previous key in {}",
                        key.len(),
                        self.path.display()
                    )))
                }
                Ordering::Equal => true,
                Ordering::Less => false,
            },
            None => false,
        };

        let full = self
            .block
            .as_ref()
            .is_some_and(|block| block.len() >= self.block_size);
        if full && !duplicate {
            self.finish_block()?;
        }

        let key = Bytes::copy_from_slice(key);
        let block = self.block.get_or_insert_with(|| {
            let mut buf = BytesMut::with_capacity(self.block_size + ENTRY_HEADER_SIZE);
            buf.put_slice(DATA_MAGIC);
            buf
        });
        if self.block_first_key.is_none() {
            self.block_first_key = Some(key.clone());
        }

        block.put_i32(key.len() as i32);
        block.put_i32(value.len() as i32);
        block.put_slice(&key);
        block.put_slice(value);

        self.entry_count += 1;
        self.total_key_len += key.len() as u64;
        self.total_value_len += value.len() as u64;
        self.last_key = Some(key);
        Ok(())
    }

    /// Attach a named meta block; payloads are written on close
    pub fn append_meta_block(&mut self, name: &str, payload: Bytes) {
        self.meta_blocks.insert(name.to_string(), payload);
    }

    /// Attach a file info entry; `hfile.` keys are reserved
    pub fn append_file_info(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.file_info.append(key, value)
    }

    /// Flush the open block, write the trailing sections and sync
    pub fn close(mut self) -> Result<WriterSummary> {
        self.finish_block()?;

        // Meta blocks, sorted by name
        let mut meta_entries = Vec::with_capacity(self.meta_blocks.len());
        let meta_blocks = std::mem::take(&mut self.meta_blocks);
        for (name, payload) in &meta_blocks {
            let mut raw = BytesMut::with_capacity(META_MAGIC.len() + payload.len());
            raw.put_slice(META_MAGIC);
            raw.put_slice(payload);
            let decoded_size = raw.len();
            let packed = self.compression.compress(&raw)?;
            meta_entries.push(IndexEntry {
                first_key: Bytes::copy_from_slice(name.as_bytes()),
                offset: self.offset,
                decoded_size: decoded_size as u32,
            });
            self.write_raw(&packed)?;
            self.total_uncompressed += decoded_size as u64;
        }

        // File info
        let file_info_offset = self.offset;
        if let Some(last) = &self.last_key {
            self.file_info.insert_reserved(LASTKEY, last);
        }
        let (avg_key, avg_value) = if self.entry_count == 0 {
            (0, 0)
        } else {
            (
                (self.total_key_len / self.entry_count) as i32,
                (self.total_value_len / self.entry_count) as i32,
            )
        };
        self.file_info.insert_reserved(AVG_KEY_LEN, &avg_key.to_be_bytes());
        self.file_info.insert_reserved(AVG_VALUE_LEN, &avg_value.to_be_bytes());
        self.file_info
            .insert_reserved(COMPARATOR, KeyComparator::NAME.as_bytes());
        let info = self.file_info.encode();
        self.write_raw(&info)?;

        // Indexes
        let data_index_offset = self.offset;
        let data_index = BlockIndex::new(std::mem::take(&mut self.data_index));
        self.write_raw(&data_index.encode(INDEX_MAGIC))?;

        let meta_index_offset = self.offset;
        let meta_index = BlockIndex::new(meta_entries);
        self.write_raw(&meta_index.encode(INDEX_MAGIC))?;

        let trailer = Trailer {
            file_info_offset,
            data_index_offset,
            data_index_count: data_index.len() as u32,
            meta_index_offset,
            meta_index_count: meta_index.len() as u32,
            total_uncompressed_bytes: self.total_uncompressed,
            entry_count: self.entry_count as u32,
            compression_codec: self.compression.codec_id(),
            version: FORMAT_VERSION,
        };
        self.write_raw(&trailer.encode())?;

        self.out.flush()?;
        self.out.get_ref().sync_all()?;

        debug!(
            path = %self.path.display(),
            entries = self.entry_count,
            blocks = data_index.len(),
            bytes = self.offset,
            "Sorted file closed"
        );

        Ok(WriterSummary {
            path: self.path.clone(),
            entry_count: self.entry_count,
            file_size: self.offset,
            data_block_count: data_index.len(),
            first_key: data_index.get(0).map(|e| e.first_key.clone()),
            last_key: self.last_key.clone(),
        })
    }

    // =========================================================================
    // Internal
    // =========================================================================

    fn finish_block(&mut self) -> Result<()> {
        let Some(block) = self.block.take() else {
            return Ok(());
        };
        let first_key = self.block_first_key.take().unwrap_or_default();

        let raw = block.freeze();
        let packed = self.compression.compress(&raw)?;
        let ordinal = self.data_index.len();
        self.data_index.push(IndexEntry {
            first_key,
            offset: self.offset,
            decoded_size: raw.len() as u32,
        });
        self.write_raw(&packed)?;
        self.total_uncompressed += raw.len() as u64;

        if let Some((cache, in_memory)) = &self.cache {
            let key = BlockCacheKey::data(self.name.clone(), ordinal);
            if let Err(e) = cache.cache_block(key, raw.slice(DATA_MAGIC.len()..), *in_memory) {
                warn!(file = %self.name, ordinal, error = %e, "Cache-on-write skipped block");
            }
        }
        Ok(())
    }

    fn write_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.out.write_all(bytes)?;
        self.offset += bytes.len() as u64;
        Ok(())
    }
}
