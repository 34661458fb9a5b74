//! Sorted File Reader
//!
//! Opens a sorted file by reading its trailer, file info and both indexes,
//! then loads data and meta blocks on demand through the block cache.
//!
//! ## Block loading
//! 1. Take the per-block id lock so concurrent misses on one block perform
//!    a single physical read
//! 2. Look the block up in the cache
//! 3. On a miss: read, decompress, verify the magic, strip it, cache it

use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::cache::{BlockCache, BlockCacheKey, IdLock};
use crate::cell::KeyComparator;
use crate::error::{CellStoreError, Result};

use super::block_index::BlockIndex;
use super::file_info::{FileInfo, AVG_KEY_LEN, AVG_VALUE_LEN, COMPARATOR, LASTKEY};
use super::trailer::Trailer;
use super::{Compression, DATA_MAGIC, INDEX_MAGIC, META_MAGIC};

/// Id-lock namespace bit separating meta blocks from data blocks
const META_LOCK_BIT: u64 = 1 << 63;

/// Random-access reader over one sorted file
pub struct SortedFileReader {
    path: PathBuf,
    name: Arc<str>,
    file: Mutex<File>,
    file_len: u64,
    trailer: Trailer,
    compression: Compression,
    file_info: FileInfo,
    data_index: BlockIndex,
    meta_index: BlockIndex,
    comparator: KeyComparator,
    cache: Option<Arc<dyn BlockCache>>,
    in_memory: bool,
    block_locks: IdLock,
}

impl SortedFileReader {
    /// Open a file and load its trailer, file info and indexes
    ///
    /// `cache` is `None` when block caching is disabled for the family.
    pub fn open(
        path: &Path,
        cache: Option<Arc<dyn BlockCache>>,
        in_memory: bool,
    ) -> Result<Self> {
        let mut file = File::open(path)?;
        let file_len = file.metadata()?.len();
        if file_len < Trailer::SIZE as u64 {
            return Err(CellStoreError::Corruption(format!(
                "{}: {} bytes is too short for a trailer",
                path.display(),
                file_len
            )));
        }

        let trailer_bytes = read_exact_at(&mut file, file_len - Trailer::SIZE as u64, Trailer::SIZE)?;
        let trailer = Trailer::decode(&trailer_bytes)?;
        let compression = Compression::from_codec_id(trailer.compression_codec)?;

        let trailer_offset = file_len - Trailer::SIZE as u64;
        let ordered = trailer.file_info_offset <= trailer.data_index_offset
            && trailer.data_index_offset <= trailer.meta_index_offset
            && trailer.meta_index_offset <= trailer_offset;
        if !ordered {
            return Err(CellStoreError::Corruption(format!(
                "{}: trailer offsets out of order",
                path.display()
            )));
        }

        let info_bytes = read_range(&mut file, trailer.file_info_offset, trailer.data_index_offset)?;
        let file_info = FileInfo::decode(info_bytes)?;

        let comparator_name = file_info.get(COMPARATOR).cloned().unwrap_or_default();
        if comparator_name.as_ref() != KeyComparator::NAME.as_bytes() {
            return Err(CellStoreError::Corruption(format!(
                "{}: written with comparator {:?}, expected {}",
                path.display(),
                String::from_utf8_lossy(&comparator_name),
                KeyComparator::NAME
            )));
        }

        let data_index = BlockIndex::decode(
            read_range(&mut file, trailer.data_index_offset, trailer.meta_index_offset)?,
            trailer.data_index_count as usize,
            INDEX_MAGIC,
        )?;
        let meta_index = BlockIndex::decode(
            read_range(&mut file, trailer.meta_index_offset, trailer_offset)?,
            trailer.meta_index_count as usize,
            INDEX_MAGIC,
        )?;

        let name: Arc<str> = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
            .into();

        debug!(
            path = %path.display(),
            entries = trailer.entry_count,
            blocks = data_index.len(),
            compression = compression.name(),
            "Opened sorted file"
        );

        Ok(Self {
            path: path.to_path_buf(),
            name,
            file: Mutex::new(file),
            file_len,
            trailer,
            compression,
            file_info,
            data_index,
            meta_index,
            comparator: KeyComparator,
            cache,
            in_memory,
            block_locks: IdLock::new(),
        })
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name; the namespace of this file's cache keys
    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    pub fn len(&self) -> u64 {
        self.file_len
    }

    pub fn is_empty(&self) -> bool {
        self.trailer.entry_count == 0
    }

    pub fn entry_count(&self) -> u64 {
        self.trailer.entry_count as u64
    }

    pub fn trailer(&self) -> &Trailer {
        &self.trailer
    }

    pub fn compression(&self) -> Compression {
        self.compression
    }

    pub fn file_info(&self) -> &FileInfo {
        &self.file_info
    }

    pub fn data_index(&self) -> &BlockIndex {
        &self.data_index
    }

    pub fn meta_index(&self) -> &BlockIndex {
        &self.meta_index
    }

    pub fn comparator(&self) -> &KeyComparator {
        &self.comparator
    }

    pub fn first_key(&self) -> Option<&Bytes> {
        self.data_index.get(0).map(|e| &e.first_key)
    }

    pub fn last_key(&self) -> Option<&Bytes> {
        self.file_info.get(LASTKEY)
    }

    /// Approximate middle key, the first key of the middle block
    pub fn midkey(&self) -> Option<&Bytes> {
        self.data_index.midkey()
    }

    pub fn avg_key_len(&self) -> i32 {
        self.file_info.get_i32(AVG_KEY_LEN).unwrap_or(0)
    }

    pub fn avg_value_len(&self) -> i32 {
        self.file_info.get_i32(AVG_VALUE_LEN).unwrap_or(0)
    }

    /// Memory held by both indexes
    pub fn index_size(&self) -> usize {
        self.data_index.heap_size() + self.meta_index.heap_size()
    }

    pub fn data_block_count(&self) -> usize {
        self.data_index.len()
    }

    // =========================================================================
    // Block Loading
    // =========================================================================

    /// Load a data block, magic stripped
    pub fn read_data_block(&self, ordinal: usize, cache_block: bool) -> Result<Bytes> {
        let entry = self.data_index.get(ordinal).ok_or_else(|| {
            CellStoreError::Corruption(format!(
                "{}: data block {} out of range ({} blocks)",
                self.path.display(),
                ordinal,
                self.data_index.len()
            ))
        })?;

        let end = match self.data_index.get(ordinal + 1) {
            Some(next) => next.offset,
            None => self
                .meta_index
                .get(0)
                .map(|m| m.offset)
                .unwrap_or(self.trailer.file_info_offset),
        };

        self.load_block(
            BlockCacheKey::data(self.name.clone(), ordinal),
            ordinal as u64,
            entry.offset,
            end,
            entry.decoded_size as usize,
            DATA_MAGIC,
            cache_block,
        )
    }

    /// Load a named meta block, magic stripped; `None` if absent
    pub fn read_meta_block(&self, name: &str, cache_block: bool) -> Result<Option<Bytes>> {
        let Some(position) = self
            .meta_index
            .entries()
            .iter()
            .position(|e| e.first_key.as_ref() == name.as_bytes())
        else {
            return Ok(None);
        };

        let entry = &self.meta_index.entries()[position];
        let end = self
            .meta_index
            .get(position + 1)
            .map(|next| next.offset)
            .unwrap_or(self.trailer.file_info_offset);

        self.load_block(
            BlockCacheKey::meta(self.name.clone(), name),
            META_LOCK_BIT | position as u64,
            entry.offset,
            end,
            entry.decoded_size as usize,
            META_MAGIC,
            cache_block,
        )
        .map(Some)
    }

    #[allow(clippy::too_many_arguments)]
    fn load_block(
        &self,
        key: BlockCacheKey,
        lock_id: u64,
        offset: u64,
        end: u64,
        decoded_size: usize,
        magic: &[u8; 8],
        cache_block: bool,
    ) -> Result<Bytes> {
        let _guard = self.block_locks.lock(lock_id);

        if let Some(cache) = &self.cache {
            if let Some(buf) = cache.get_block(&key, cache_block) {
                return Ok(buf);
            }
        }

        if end < offset {
            return Err(CellStoreError::Corruption(format!(
                "{}: block {} ends before it starts",
                self.path.display(),
                key
            )));
        }
        let on_disk = {
            let mut file = self.file.lock();
            read_exact_at(&mut file, offset, (end - offset) as usize)?
        };
        let decoded = self.compression.decompress(&on_disk, decoded_size)?;
        if decoded.len() < magic.len() || &decoded[..magic.len()] != magic {
            return Err(CellStoreError::Corruption(format!(
                "{}: bad magic in block {}",
                self.path.display(),
                key
            )));
        }
        let buf = Bytes::from(decoded).slice(magic.len()..);

        if cache_block {
            if let Some(cache) = &self.cache {
                match cache.cache_block(key.clone(), buf.clone(), self.in_memory) {
                    Ok(()) => {}
                    Err(CellStoreError::AlreadyCached(_)) => {
                        warn!(block = %key, "Block loaded twice, keeping cached copy");
                    }
                    Err(e) => warn!(block = %key, error = %e, "Failed to cache block"),
                }
            }
        }
        Ok(buf)
    }
}

impl std::fmt::Debug for SortedFileReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SortedFileReader")
            .field("path", &self.path)
            .field("entries", &self.trailer.entry_count)
            .field("blocks", &self.data_index.len())
            .field("compression", &self.compression)
            .finish()
    }
}

// =============================================================================
// Raw I/O
// =============================================================================

/// Read `len` bytes at `offset`; a short file is corruption, not I/O failure
fn read_exact_at(file: &mut File, offset: u64, len: usize) -> Result<Vec<u8>> {
    file.seek(SeekFrom::Start(offset))?;
    let mut buf = vec![0u8; len];
    file.read_exact(&mut buf).map_err(|e| {
        if e.kind() == ErrorKind::UnexpectedEof {
            CellStoreError::Corruption(format!(
                "truncated read of {} bytes at offset {}",
                len, offset
            ))
        } else {
            CellStoreError::Io(e)
        }
    })?;
    Ok(buf)
}

fn read_range(file: &mut File, start: u64, end: u64) -> Result<Bytes> {
    Ok(Bytes::from(read_exact_at(file, start, (end - start) as usize)?))
}
