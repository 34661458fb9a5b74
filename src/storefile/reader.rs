//! Store File Reader
//!
//! Typed metadata, bloom filter probing and scan pre-filtering over a
//! sorted file. Bloom failures never fail a read: the filter is disabled for
//! the file and every lookup answers "maybe present".

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::warn;

use crate::bloom::{contains_in, BloomMeta, BloomType};
use crate::cell::Cell;
use crate::error::Result;
use crate::sfile::{SortedFileReader, SortedFileScanner};
use crate::store::Scan;

use super::{
    Half, Reference, BLOOM_FILTER_DATA, BLOOM_FILTER_META, BLOOM_FILTER_TYPE_KEY,
    BULKLOAD_TIME_KEY, MAJOR_COMPACTION_KEY, MAX_SEQ_ID_KEY, MAX_WRITE_NUMBER_KEY, TIMERANGE_KEY,
};

enum BloomState {
    /// The file carries no bloom filter
    Absent,
    /// Meta read on open, bit array not loaded yet
    Unloaded(BloomMeta),
    Loaded(BloomMeta, Bytes),
    /// A bloom block was unreadable; lookups always pass
    Disabled,
}

/// Reader side of one store file (or one half of a referenced file)
pub struct StoreFileReader {
    sfile: Arc<SortedFileReader>,
    reference: Option<Reference>,
    bloom_type: BloomType,
    bloom: Mutex<BloomState>,
    time_range: Option<(i64, i64)>,
    max_seq_id: Option<i64>,
    max_write_number: u64,
    major_compaction: bool,
    bulk_load_time: Option<i64>,
}

impl StoreFileReader {
    pub fn new(sfile: Arc<SortedFileReader>, reference: Option<Reference>) -> Self {
        let info = sfile.file_info();
        let max_seq_id = info.get_i64(MAX_SEQ_ID_KEY);
        let max_write_number = info.get_i64(MAX_WRITE_NUMBER_KEY).map_or(0, |n| n.max(0) as u64);
        let major_compaction = info
            .get(MAJOR_COMPACTION_KEY)
            .is_some_and(|v| v.first() == Some(&1));
        let bulk_load_time = info.get_i64(BULKLOAD_TIME_KEY);
        let time_range = info.get(TIMERANGE_KEY).and_then(|v| decode_time_range(v));

        let bloom_type = info
            .get(BLOOM_FILTER_TYPE_KEY)
            .and_then(|name| BloomType::from_name(name))
            .unwrap_or(BloomType::None);

        let bloom = if bloom_type == BloomType::None {
            BloomState::Absent
        } else {
            match sfile.read_meta_block(BLOOM_FILTER_META, true) {
                Ok(Some(meta)) => match BloomMeta::decode(&meta) {
                    Ok(meta) => BloomState::Unloaded(meta),
                    Err(e) => {
                        warn!(file = %sfile.name(), error = %e, "Bad bloom meta, disabling bloom filter");
                        BloomState::Disabled
                    }
                },
                Ok(None) => BloomState::Absent,
                Err(e) => {
                    warn!(file = %sfile.name(), error = %e, "Unreadable bloom meta, disabling bloom filter");
                    BloomState::Disabled
                }
            }
        };

        Self {
            sfile,
            reference,
            bloom_type,
            bloom: Mutex::new(bloom),
            time_range,
            max_seq_id,
            max_write_number,
            major_compaction,
            bulk_load_time,
        }
    }

    // =========================================================================
    // Metadata
    // =========================================================================

    pub fn sorted_file(&self) -> &Arc<SortedFileReader> {
        &self.sfile
    }

    pub fn reference(&self) -> Option<&Reference> {
        self.reference.as_ref()
    }

    pub fn max_sequence_id(&self) -> Option<i64> {
        self.max_seq_id
    }

    pub fn max_write_number(&self) -> u64 {
        self.max_write_number
    }

    pub fn is_major_compaction(&self) -> bool {
        self.major_compaction
    }

    pub fn bulk_load_time(&self) -> Option<i64> {
        self.bulk_load_time
    }

    /// Closed `[min, max]` interval of cell timestamps, if recorded
    pub fn time_range(&self) -> Option<(i64, i64)> {
        self.time_range
    }

    pub fn bloom_type(&self) -> BloomType {
        self.bloom_type
    }

    /// Bytes of the bloom bit array (0 when there is none)
    pub fn bloom_size(&self) -> usize {
        match &*self.bloom.lock() {
            BloomState::Unloaded(meta) | BloomState::Loaded(meta, _) => meta.byte_size.max(0) as usize,
            BloomState::Absent | BloomState::Disabled => 0,
        }
    }

    pub fn is_bloom_disabled(&self) -> bool {
        matches!(&*self.bloom.lock(), BloomState::Disabled)
    }

    pub fn len(&self) -> u64 {
        self.sfile.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sfile.is_empty()
    }

    pub fn entry_count(&self) -> u64 {
        self.sfile.entry_count()
    }

    pub fn index_size(&self) -> usize {
        self.sfile.index_size()
    }

    // =========================================================================
    // Pre-filtering
    // =========================================================================

    /// Whether a scanner over this file could return anything for `scan`
    pub fn should_use_scanner(&self, scan: &Scan) -> bool {
        if let Some((lo, hi)) = self.time_range {
            if !scan.time_range().overlaps_closed(lo, hi) {
                return false;
            }
        }

        if scan.is_get() {
            let qualifier = match scan.columns().len() {
                1 => scan.columns().iter().next().map(|q| q.as_slice()),
                _ => None,
            };
            return self.passes_bloom(scan.start_row(), qualifier);
        }

        self.overlaps_rows(scan.start_row(), scan.stop_row())
    }

    /// Bloom check for a row, or a row and qualifier for row+column filters
    pub fn passes_bloom(&self, row: &[u8], qualifier: Option<&[u8]>) -> bool {
        if let Some(reference) = &self.reference {
            if !reference.covers_row(row) {
                return false;
            }
        }

        let keys: Vec<Vec<u8>> = match (self.bloom_type, qualifier) {
            (BloomType::None, _) | (BloomType::RowCol, None) => return true,
            (BloomType::Row, _) => self.bloom_type.bloom_key(row, &[]).into_iter().collect(),
            // A family delete marker is keyed by the row alone and covers
            // every column
            (BloomType::RowCol, Some(qualifier)) => [qualifier, &[][..]]
                .iter()
                .filter_map(|q| self.bloom_type.bloom_key(row, q))
                .collect(),
        };

        let mut state = self.bloom.lock();
        if let BloomState::Unloaded(meta) = &*state {
            let meta = *meta;
            *state = match self.sfile.read_meta_block(BLOOM_FILTER_DATA, true) {
                Ok(Some(data)) if data.len() == meta.byte_size as usize => BloomState::Loaded(meta, data),
                Ok(Some(data)) => {
                    warn!(
                        file = %self.sfile.name(),
                        bytes = data.len(),
                        expected = meta.byte_size,
                        "Bloom data size mismatch, disabling bloom filter"
                    );
                    BloomState::Disabled
                }
                Ok(None) => {
                    warn!(file = %self.sfile.name(), "Bloom data block missing, disabling bloom filter");
                    BloomState::Disabled
                }
                Err(e) => {
                    warn!(file = %self.sfile.name(), error = %e, "Unreadable bloom data, disabling bloom filter");
                    BloomState::Disabled
                }
            };
        }

        match &*state {
            BloomState::Loaded(meta, data) => keys
                .iter()
                .any(|key| contains_in(data, meta.hash_count as u32, key)),
            _ => true,
        }
    }

    fn overlaps_rows(&self, start_row: &[u8], stop_row: &[u8]) -> bool {
        let first = self.sfile.first_key().and_then(|k| row_of(k));
        let last = self.sfile.last_key().and_then(|k| row_of(k));
        match (first, last) {
            (Some(first), Some(last)) => {
                let before_stop = stop_row.is_empty() || first.as_slice() < stop_row;
                before_stop && last.as_slice() >= start_row
            }
            _ => !self.sfile.is_empty(),
        }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Row of the greatest cell sorting strictly before `key` in this file
    /// (or half)
    pub fn row_before(&self, key: &Cell) -> Result<Option<Vec<u8>>> {
        let mut target = key.key().clone();
        if let Some(reference) = &self.reference {
            match reference.half {
                Half::Top if !reference.covers(&target) => return Ok(None),
                Half::Bottom if !reference.covers(&target) => {
                    target = Bytes::from(reference.split_key.clone());
                }
                _ => {}
            }
        }

        let mut scanner = SortedFileScanner::new(self.sfile.clone(), true);
        if !scanner.seek_before(&target)? {
            return Ok(None);
        }
        let Some(found) = scanner.key() else {
            return Ok(None);
        };
        if let Some(reference) = &self.reference {
            if !reference.covers(found) {
                return Ok(None);
            }
        }
        Ok(row_of(found))
    }
}

fn row_of(key: &Bytes) -> Option<Vec<u8>> {
    Cell::from_parts(key.clone(), Bytes::new())
        .ok()
        .map(|cell| cell.row().to_vec())
}

fn decode_time_range(value: &[u8]) -> Option<(i64, i64)> {
    if value.len() != 16 {
        return None;
    }
    let min = i64::from_be_bytes(value[..8].try_into().ok()?);
    let max = i64::from_be_bytes(value[8..].try_into().ok()?);
    Some((min, max))
}

pub(crate) fn encode_time_range(min: i64, max: i64) -> [u8; 16] {
    let mut out = [0u8; 16];
    out[..8].copy_from_slice(&min.to_be_bytes());
    out[8..].copy_from_slice(&max.to_be_bytes());
    out
}
