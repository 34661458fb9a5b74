//! Sorted File Scanner
//!
//! Positions within one sorted file by binary-searching the block index and
//! then scanning the chosen block linearly.

use std::cmp::Ordering;
use std::sync::Arc;

use bytes::Bytes;

use crate::error::{CellStoreError, Result};

use super::reader::SortedFileReader;
use super::ENTRY_HEADER_SIZE;

/// Outcome of a positioning call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekResult {
    /// Every key in the file sorts after the target; the scanner is unpositioned
    BeforeFirst,
    /// Positioned on a key equal to the target
    Exact,
    /// Positioned on the greatest key below the target
    Inexact,
}

/// One decoded entry and where the next one starts
#[derive(Debug, Clone)]
struct Entry {
    key: Bytes,
    value: Bytes,
    next: usize,
}

/// Cursor over the entries of one sorted file
pub struct SortedFileScanner {
    reader: Arc<SortedFileReader>,
    cache_blocks: bool,
    block: Option<Bytes>,
    ordinal: usize,
    /// Start of the current entry within `block`
    pos: usize,
    current: Option<Entry>,
}

impl SortedFileScanner {
    /// `cache_blocks` controls whether blocks loaded on a miss are cached
    pub fn new(reader: Arc<SortedFileReader>, cache_blocks: bool) -> Self {
        Self {
            reader,
            cache_blocks,
            block: None,
            ordinal: 0,
            pos: 0,
            current: None,
        }
    }

    pub fn reader(&self) -> &Arc<SortedFileReader> {
        &self.reader
    }

    pub fn is_seeked(&self) -> bool {
        self.current.is_some()
    }

    pub fn key(&self) -> Option<&Bytes> {
        self.current.as_ref().map(|e| &e.key)
    }

    pub fn value(&self) -> Option<&Bytes> {
        self.current.as_ref().map(|e| &e.value)
    }

    /// Position on the first entry; `false` for an empty file
    pub fn seek_to_first(&mut self) -> Result<bool> {
        if self.reader.data_block_count() == 0 {
            self.unposition();
            return Ok(false);
        }
        self.load(0)?;
        self.position_at(0)?;
        Ok(self.current.is_some())
    }

    /// Position on `key`, or on the greatest key below it
    pub fn seek_to(&mut self, key: &[u8]) -> Result<SeekResult> {
        let comparator = *self.reader.comparator();
        let Some(ordinal) = self
            .reader
            .data_index()
            .block_containing_key(key, |a, b| comparator.compare(a, b))
        else {
            self.unposition();
            return Ok(SeekResult::BeforeFirst);
        };

        self.load(ordinal)?;
        self.block_seek(key, 0, false)
    }

    /// Like `seek_to`, but only moves forward from the current position
    pub fn reseek_to(&mut self, key: &[u8]) -> Result<SeekResult> {
        let Some(current) = &self.current else {
            return self.seek_to(key);
        };
        let comparator = *self.reader.comparator();
        match comparator.compare(key, &current.key) {
            Ordering::Equal => return Ok(SeekResult::Exact),
            Ordering::Less => return Ok(SeekResult::Inexact),
            Ordering::Greater => {}
        }

        // Stay in the current block unless the target lies beyond it
        let beyond = self
            .reader
            .data_index()
            .get(self.ordinal + 1)
            .is_some_and(|next| comparator.compare(key, &next.first_key) != Ordering::Less);
        if beyond {
            return self.seek_to(key);
        }
        self.block_seek(key, self.pos, false)
    }

    /// Position on the greatest key strictly below `key`; `false` if none
    pub fn seek_before(&mut self, key: &[u8]) -> Result<bool> {
        let comparator = *self.reader.comparator();
        let index = self.reader.data_index();
        let Some(mut ordinal) = index.block_containing_key(key, |a, b| comparator.compare(a, b))
        else {
            return Ok(false);
        };

        let starts_at_or_after = index
            .get(ordinal)
            .is_some_and(|e| comparator.compare(&e.first_key, key) != Ordering::Less);
        if starts_at_or_after {
            if ordinal == 0 {
                return Ok(false);
            }
            ordinal -= 1;
        }

        self.load(ordinal)?;
        self.block_seek(key, 0, true)?;
        Ok(self.current.is_some())
    }

    /// Advance one entry, crossing into the next block as needed
    pub fn next(&mut self) -> Result<bool> {
        let Some(current) = &self.current else {
            return Ok(false);
        };
        let next = current.next;
        let block_len = self.block.as_ref().map(|b| b.len()).unwrap_or(0);

        if next < block_len {
            self.position_at(next)?;
            return Ok(true);
        }

        if self.ordinal + 1 < self.reader.data_block_count() {
            self.load(self.ordinal + 1)?;
            self.position_at(0)?;
            return Ok(self.current.is_some());
        }

        self.current = None;
        Ok(false)
    }

    // =========================================================================
    // Internal
    // =========================================================================

    fn load(&mut self, ordinal: usize) -> Result<()> {
        if self.block.is_none() || self.ordinal != ordinal {
            self.block = Some(self.reader.read_data_block(ordinal, self.cache_blocks)?);
            self.ordinal = ordinal;
        }
        Ok(())
    }

    fn unposition(&mut self) {
        self.current = None;
        self.pos = 0;
    }

    fn position_at(&mut self, pos: usize) -> Result<()> {
        let block = self
            .block
            .as_ref()
            .ok_or_else(|| CellStoreError::Corruption("scanner has no block loaded".into()))?;
        if pos >= block.len() {
            self.current = None;
            return Ok(());
        }
        self.current = Some(parse_entry(block, pos)?);
        self.pos = pos;
        Ok(())
    }

    /// Scan the loaded block from `start` for `key`
    ///
    /// Lands on the key itself (`Exact`) or on the entry before the first
    /// greater key (`Inexact`). With `seek_before` an exact hit also steps
    /// back one entry.
    fn block_seek(&mut self, key: &[u8], start: usize, seek_before: bool) -> Result<SeekResult> {
        let comparator = *self.reader.comparator();
        let block = self
            .block
            .clone()
            .ok_or_else(|| CellStoreError::Corruption("scanner has no block loaded".into()))?;

        let mut previous: Option<(usize, Entry)> = None;
        let mut pos = start;
        while pos < block.len() {
            let entry = parse_entry(&block, pos)?;
            match comparator.compare(key, &entry.key) {
                Ordering::Equal if !seek_before => {
                    self.pos = pos;
                    self.current = Some(entry);
                    return Ok(SeekResult::Exact);
                }
                Ordering::Equal | Ordering::Less => {
                    return Ok(match previous {
                        Some((prev_pos, prev)) => {
                            self.pos = prev_pos;
                            self.current = Some(prev);
                            SeekResult::Inexact
                        }
                        None => {
                            // The block starts past the target
                            self.pos = pos;
                            self.current = Some(entry);
                            SeekResult::Inexact
                        }
                    });
                }
                Ordering::Greater => {
                    let next = entry.next;
                    previous = Some((pos, entry));
                    pos = next;
                }
            }
        }

        // Every entry of the block sorts below the target
        match previous {
            Some((prev_pos, prev)) => {
                self.pos = prev_pos;
                self.current = Some(prev);
                Ok(SeekResult::Inexact)
            }
            None => {
                self.current = None;
                Ok(SeekResult::Inexact)
            }
        }
    }
}

fn parse_entry(block: &Bytes, pos: usize) -> Result<Entry> {
    if pos + ENTRY_HEADER_SIZE > block.len() {
        return Err(CellStoreError::Corruption(format!(
            "entry header at {} overruns block of {} bytes",
            pos,
            block.len()
        )));
    }
    let key_len = i32::from_be_bytes([block[pos], block[pos + 1], block[pos + 2], block[pos + 3]]);
    let value_len =
        i32::from_be_bytes([block[pos + 4], block[pos + 5], block[pos + 6], block[pos + 7]]);
    if key_len < 0 || value_len < 0 {
        return Err(CellStoreError::Corruption(format!(
            "negative entry lengths {} / {} at {}",
            key_len, value_len, pos
        )));
    }

    let key_start = pos + ENTRY_HEADER_SIZE;
    let value_start = key_start + key_len as usize;
    let next = value_start + value_len as usize;
    if next > block.len() {
        return Err(CellStoreError::Corruption(format!(
            "entry at {} overruns block of {} bytes",
            pos,
            block.len()
        )));
    }

    Ok(Entry {
        key: block.slice(key_start..value_start),
        value: block.slice(value_start..next),
        next,
    })
}
