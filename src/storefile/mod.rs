//! Store File Module
//!
//! Logical wrapper around a sorted file: cell semantics, a bloom filter,
//! typed metadata and split references.
//!
//! ## Responsibilities
//! - Write cells with their bloom keys, time range and metadata
//! - Read metadata eagerly on open, load the bloom bit array lazily
//! - Decide cheaply whether a file can hold anything a scan asks for
//! - Order files for file-list bookkeeping
//!
//! ## Variants
//! A store file either owns its sorted file or is a reference to the top
//! or bottom half of a parent store's file left behind by a split.
//!
//! ## Metadata (file info keys)
//! ```text
//! MAX_SEQ_ID_KEY        i64   highest log sequence number flushed into the file
//! MAX_WRITE_NUMBER_KEY  u64   highest MVCC write number of the cells it holds
//! MAJOR_COMPACTION_KEY  u8    1 if written by a major compaction
//! TIMERANGE             2*i64 min and max cell timestamp
//! BULKLOAD_TIME_KEY     i64   load time of a bulk-loaded file
//! BLOOM_FILTER_TYPE     str   NONE | ROW | ROWCOL
//! ```

mod reader;
mod reference;
mod scanner;
mod writer;

use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::debug;

use crate::cache::BlockCache;
use crate::config::FamilyConfig;
use crate::error::{CellStoreError, Result};
use crate::sfile::SortedFileReader;

pub use reader::StoreFileReader;
pub use reference::{parse_reference_name, reference_name, resolve_target, Half, Reference};
pub use scanner::StoreFileScanner;
pub use writer::StoreFileWriter;

pub const MAX_SEQ_ID_KEY: &[u8] = b"MAX_SEQ_ID_KEY";
pub const MAX_WRITE_NUMBER_KEY: &[u8] = b"MAX_WRITE_NUMBER_KEY";
pub const MAJOR_COMPACTION_KEY: &[u8] = b"MAJOR_COMPACTION_KEY";
pub const TIMERANGE_KEY: &[u8] = b"TIMERANGE";
pub const BULKLOAD_TIME_KEY: &[u8] = b"BULKLOAD_TIME_KEY";
pub const BLOOM_FILTER_TYPE_KEY: &[u8] = b"BLOOM_FILTER_TYPE";

/// Meta block names of the bloom filter
pub const BLOOM_FILTER_META: &str = "BLOOM_FILTER_META";
pub const BLOOM_FILTER_DATA: &str = "BLOOM_FILTER_DATA";

/// Whether a store file owns its data
#[derive(Debug, Clone)]
pub enum StoreFileKind {
    Owned,
    Reference { target: PathBuf, reference: Reference },
}

/// One immutable file of a store
pub struct StoreFile {
    path: PathBuf,
    kind: StoreFileKind,
    reader: Arc<StoreFileReader>,
    /// Ordering time of a bulk-loaded file (millis)
    bulk_load_time: Option<i64>,
    modified: SystemTime,
}

impl StoreFile {
    /// Open a store file or reference found at `path`
    pub fn open(
        path: &Path,
        family: &FamilyConfig,
        cache: Option<Arc<dyn BlockCache>>,
    ) -> Result<Self> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| CellStoreError::Config(format!("{} has no file name", path.display())))?;
        let cache = if family.block_cache_enabled { cache } else { None };

        let (kind, sfile, reference) = match parse_reference_name(&name) {
            Some(_) => {
                let dir = path.parent().unwrap_or_else(|| Path::new("."));
                let target = resolve_target(dir, &name).ok_or_else(|| {
                    CellStoreError::Corruption(format!("{}: unresolvable reference", path.display()))
                })?;
                let reference = Reference::read(path)?;
                let sfile = SortedFileReader::open(&target, cache, family.in_memory)?;
                let kind = StoreFileKind::Reference {
                    target,
                    reference: reference.clone(),
                };
                (kind, sfile, Some(reference))
            }
            None => (
                StoreFileKind::Owned,
                SortedFileReader::open(path, cache, family.in_memory)?,
                None,
            ),
        };

        let modified = fs::metadata(path)?.modified()?;
        let reader = StoreFileReader::new(Arc::new(sfile), reference);

        // Files without a sequence id came from outside the write path
        let bulk_load_time = match (reader.bulk_load_time(), reader.max_sequence_id()) {
            (Some(ts), _) => Some(ts),
            (None, None) => Some(millis_since_epoch(modified)),
            (None, Some(_)) => None,
        };

        debug!(
            path = %path.display(),
            reference = reader.reference().is_some(),
            max_seq_id = ?reader.max_sequence_id(),
            bloom = reader.bloom_type().name(),
            "Opened store file"
        );

        Ok(Self {
            path: path.to_path_buf(),
            kind,
            reader: Arc::new(reader),
            bulk_load_time,
            modified,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn kind(&self) -> &StoreFileKind {
        &self.kind
    }

    pub fn reader(&self) -> &Arc<StoreFileReader> {
        &self.reader
    }

    pub fn is_reference(&self) -> bool {
        matches!(self.kind, StoreFileKind::Reference { .. })
    }

    /// Sorted file backing this store file (the target for references)
    pub fn data_path(&self) -> &Path {
        match &self.kind {
            StoreFileKind::Owned => &self.path,
            StoreFileKind::Reference { target, .. } => target,
        }
    }

    /// Highest flushed log sequence number, -1 when the file has none
    pub fn max_sequence_id(&self) -> i64 {
        self.reader.max_sequence_id().unwrap_or(-1)
    }

    /// Highest MVCC write number of the file's cells, 0 for files written
    /// outside the write path
    pub fn max_write_number(&self) -> u64 {
        self.reader.max_write_number()
    }

    pub fn is_major_compaction(&self) -> bool {
        self.reader.is_major_compaction()
    }

    pub fn is_bulk_loaded(&self) -> bool {
        self.bulk_load_time.is_some()
    }

    pub fn bulk_load_time(&self) -> Option<i64> {
        self.bulk_load_time
    }

    pub fn modified(&self) -> SystemTime {
        self.modified
    }

    /// Size of the backing sorted file in bytes
    pub fn len(&self) -> u64 {
        self.reader.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reader.entry_count() == 0
    }

    /// Scanner over this file; `sequence_id` orders it against other sources
    pub fn scanner(&self, cache_blocks: bool, sequence_id: u64) -> StoreFileScanner {
        StoreFileScanner::new(self.reader.clone(), cache_blocks, sequence_id)
    }

    /// File-list order: native files by max sequence id, then bulk-loaded
    /// files by load time; ties broken by path
    pub fn compare_order(&self, other: &StoreFile) -> Ordering {
        match (self.bulk_load_time, other.bulk_load_time) {
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some(a), Some(b)) => a.cmp(&b),
            (None, None) => self.max_sequence_id().cmp(&other.max_sequence_id()),
        }
        .then_with(|| self.path.cmp(&other.path))
    }
}

impl std::fmt::Debug for StoreFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreFile")
            .field("path", &self.path)
            .field("reference", &self.is_reference())
            .field("max_seq_id", &self.max_sequence_id())
            .field("bulk_load_time", &self.bulk_load_time)
            .field("len", &self.len())
            .finish()
    }
}

/// Sort a file list into bookkeeping order
pub fn sort_store_files(files: &mut [Arc<StoreFile>]) {
    files.sort_by(|a, b| a.compare_order(b));
}

/// Random hex file name for a new store file
pub fn unique_file_name() -> String {
    format!("{:016x}", rand::random::<u64>())
}

pub(crate) fn millis_since_epoch(time: SystemTime) -> i64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
