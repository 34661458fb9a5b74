//! Store File Scanner
//!
//! Adapts a sorted-file scanner to the `KeyValueScanner` contract. Scanners
//! over a reference see only their half: the top half starts at the split
//! key, the bottom half ends before it.

use std::cmp::Ordering;
use std::sync::Arc;

use bytes::Bytes;

use crate::cell::Cell;
use crate::error::Result;
use crate::sfile::{SeekResult, SortedFileScanner};
use crate::store::KeyValueScanner;

use super::reader::StoreFileReader;
use super::Half;

pub struct StoreFileScanner {
    reader: Arc<StoreFileReader>,
    inner: SortedFileScanner,
    current: Option<Cell>,
    sequence_id: u64,
}

impl StoreFileScanner {
    pub fn new(reader: Arc<StoreFileReader>, cache_blocks: bool, sequence_id: u64) -> Self {
        let inner = SortedFileScanner::new(reader.sorted_file().clone(), cache_blocks);
        Self {
            reader,
            inner,
            current: None,
            sequence_id,
        }
    }

    pub fn reader(&self) -> &Arc<StoreFileReader> {
        &self.reader
    }

    /// Turn a positioning outcome into "at or after the target"
    fn settle(&mut self, result: SeekResult) -> Result<()> {
        let positioned = match result {
            SeekResult::BeforeFirst => self.inner.seek_to_first()?,
            SeekResult::Exact => true,
            SeekResult::Inexact => self.inner.next()?,
        };
        self.load_current(positioned)
    }

    fn load_current(&mut self, positioned: bool) -> Result<()> {
        self.current = None;
        if !positioned {
            return Ok(());
        }
        let (Some(key), Some(value)) = (self.inner.key(), self.inner.value()) else {
            return Ok(());
        };

        // The bottom half ends at the split key
        if let Some(reference) = self.reader.reference() {
            if reference.half == Half::Bottom && !reference.covers(key) {
                return Ok(());
            }
        }
        self.current = Some(Cell::from_parts(key.clone(), value.clone())?);
        Ok(())
    }

    /// Clamp a seek target into the top half
    fn clamp(&self, key: &Cell) -> Bytes {
        if let Some(reference) = self.reader.reference() {
            if reference.half == Half::Top && !reference.covers(key.key()) {
                return Bytes::from(reference.split_key.clone());
            }
        }
        key.key().clone()
    }
}

impl KeyValueScanner for StoreFileScanner {
    fn peek(&self) -> Option<&Cell> {
        self.current.as_ref()
    }

    fn next(&mut self) -> Result<Option<Cell>> {
        let Some(cell) = self.current.take() else {
            return Ok(None);
        };
        let positioned = self.inner.next()?;
        self.load_current(positioned)?;
        Ok(Some(cell))
    }

    fn seek(&mut self, key: &Cell) -> Result<bool> {
        let target = self.clamp(key);
        let result = self.inner.seek_to(&target)?;
        self.settle(result)?;
        Ok(self.current.is_some())
    }

    fn reseek(&mut self, key: &Cell) -> Result<bool> {
        let Some(current) = &self.current else {
            return Ok(false);
        };
        if current.compare_key(key) != Ordering::Less {
            return Ok(true);
        }
        let target = self.clamp(key);
        let result = self.inner.reseek_to(&target)?;
        self.settle(result)?;
        Ok(self.current.is_some())
    }

    fn sequence_id(&self) -> u64 {
        self.sequence_id
    }

    fn close(&mut self) {
        self.current = None;
    }
}
