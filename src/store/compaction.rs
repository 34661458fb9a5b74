//! Compaction and split point selection
//!
//! ## Selection
//! A major compaction merges every file and is chosen when forced, when any
//! file is a split reference, or when the oldest file is older than the
//! major compaction period. Otherwise a minor compaction walks the list
//! oldest to newest, leaving out files more than twice the size of their
//! successor until few enough remain; the newest two files are always
//! included.
//!
//! ## Publish
//! The output is written to the temporary directory, renamed into the store
//! and swapped into the file list in one step. Input files are deleted only
//! after the swap.

use std::fs;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use bytes::Bytes;
use tracing::{debug, error, info, warn};

use crate::cell::Cell;
use crate::error::{CellStoreError, Result};
use crate::sfile::WriterSummary;
use crate::storefile::{unique_file_name, StoreFile, StoreFileWriter};

use super::kv_scanner::{KeyValueHeap, KeyValueScanner};
use super::matcher::ScanQueryMatcher;
use super::scanner::StoreScanner;
use super::{now_millis, Store};

/// Files picked for one compaction
#[derive(Debug, Clone)]
pub struct CompactionSelection {
    /// Inputs in file list order (oldest first)
    pub files: Vec<Arc<StoreFile>>,
    pub major: bool,
}

impl CompactionSelection {
    pub fn total_size(&self) -> u64 {
        self.files.iter().map(|f| f.len()).sum()
    }
}

impl Store {
    /// Compact if anything qualifies, then offer a split row if the store
    /// has grown past its maximum size
    pub fn compact(&self, force_major: bool) -> Result<Option<Vec<u8>>> {
        let _compaction = self.compaction_lock.lock();
        self.check_open()?;

        let files = self.store_files();
        if let Some(selection) = self.select_compaction(&files, force_major) {
            self.run_compaction(selection)?;
        }
        Ok(self.check_split())
    }

    /// Pick the files of the next compaction, if any
    pub fn select_compaction(&self, files: &[Arc<StoreFile>], force_major: bool) -> Option<CompactionSelection> {
        if files.is_empty() {
            return None;
        }

        let has_references = files.iter().any(|f| f.is_reference());
        if force_major || has_references || self.is_major_compaction_due(files) {
            return Some(CompactionSelection {
                files: files.to_vec(),
                major: true,
            });
        }

        let count = files.len();
        if count < self.config.compaction_threshold {
            return None;
        }

        let tail = count.min(2);
        let mut point = 0;
        while point < count - tail {
            let size = files[point].len();
            let next = files[point + 1].len();
            if size < next.saturating_mul(2) && count - point <= self.config.max_files_to_compact {
                break;
            }
            point += 1;
        }

        let selected = &files[point..];
        if selected.len() < 2 {
            return None;
        }
        debug!(
            skipped = point,
            selected = selected.len(),
            "Selected files for minor compaction"
        );
        Some(CompactionSelection {
            files: selected.to_vec(),
            major: false,
        })
    }

    /// Whether the oldest file has outlived the major compaction period
    pub fn is_major_compaction_due(&self, files: &[Arc<StoreFile>]) -> bool {
        let Some(period) = self.config.major_compaction_period else {
            return false;
        };
        let Some(oldest) = files.iter().map(|f| f.modified()).min() else {
            return false;
        };
        let age = SystemTime::now().duration_since(oldest).unwrap_or_default();
        if age <= period {
            return false;
        }

        if let [only] = files {
            let within_ttl = self.family.ttl.map_or(true, |ttl| age < ttl);
            if only.is_major_compaction() && within_ttl {
                debug!(file = %only.name(), "Skipping major compaction of already major-compacted file");
                return false;
            }
        }
        true
    }

    fn run_compaction(&self, selection: CompactionSelection) -> Result<()> {
        let started = Instant::now();
        let input_bytes = selection.total_size();
        let tmp_path = self.tmp_dir.join(unique_file_name());

        let output = match self.write_compaction(&selection, &tmp_path) {
            Ok(summary) if summary.entry_count == 0 => {
                let _ = fs::remove_file(&tmp_path);
                None
            }
            Ok(_) => match self.commit_file(&tmp_path) {
                Ok(file) => Some(file),
                Err(e) => return Err(self.compaction_failed(&selection, e)),
            },
            Err(e) => {
                let _ = fs::remove_file(&tmp_path);
                return Err(self.compaction_failed(&selection, e));
            }
        };

        if let Err(e) = self.replace_files(&selection.files, output.clone(), || Ok(())) {
            if let Some(file) = &output {
                let _ = fs::remove_file(file.path());
            }
            return Err(self.compaction_failed(&selection, e));
        }

        // Superseded files go only after the new list is in place
        for file in &selection.files {
            if let Err(e) = fs::remove_file(file.path()) {
                warn!(file = %file.name(), error = %e, "Failed to delete compacted store file");
            }
            if !file.is_reference() {
                if let Some(cache) = &self.cache {
                    cache.evict_blocks_by_file(file.reader().sorted_file().name());
                }
            }
        }
        self.last_compaction_size.store(input_bytes, Ordering::SeqCst);

        info!(
            major = selection.major,
            inputs = selection.files.len(),
            input_bytes,
            output = ?output.as_ref().map(|f| f.name()),
            output_bytes = output.as_ref().map_or(0, |f| f.len()),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Compaction completed"
        );
        Ok(())
    }

    fn compaction_failed(&self, selection: &CompactionSelection, e: CellStoreError) -> CellStoreError {
        error!(
            dir = %self.dir.display(),
            major = selection.major,
            inputs = selection.files.len(),
            error = %e,
            "Compaction failed; keeping the previous file list"
        );
        CellStoreError::Compaction(e.to_string())
    }

    fn write_compaction(&self, selection: &CompactionSelection, tmp_path: &Path) -> Result<WriterSummary> {
        let max_keys: u64 = selection.files.iter().map(|f| f.reader().entry_count()).sum();
        let max_seq_id = selection
            .files
            .iter()
            .map(|f| f.max_sequence_id())
            .max()
            .unwrap_or(-1);

        let mut scanners: Vec<Box<dyn KeyValueScanner>> = Vec::with_capacity(selection.files.len());
        let start = Cell::first_on_row(&[]);
        for (index, file) in selection.files.iter().enumerate() {
            let mut scanner = file.scanner(false, index as u64 + 1);
            scanner.seek(&start)?;
            scanners.push(Box::new(scanner));
        }

        let mut writer = StoreFileWriter::create(
            tmp_path,
            &self.family,
            usize::try_from(max_keys).unwrap_or(usize::MAX),
            self.cache.clone(),
        )?;

        if selection.major {
            let matcher = ScanQueryMatcher::for_compaction(
                self.family.max_versions,
                self.family.ttl_millis(),
                now_millis(),
            );
            let mut scanner = StoreScanner::over(scanners, matcher);
            while let Some(row) = scanner.next_row()? {
                for cell in &row {
                    writer.append(cell)?;
                }
            }
        } else {
            let mut heap = KeyValueHeap::new(scanners);
            let mut last: Option<Cell> = None;
            while let Some(cell) = heap.next()? {
                // Equal keys in several files: the newest file's copy comes first
                if last.as_ref().is_some_and(|prev| prev.compare_key(&cell).is_eq()) {
                    continue;
                }
                writer.append(&cell)?;
                last = Some(cell);
            }
        }

        if let Some(write_number) = selection.files.iter().map(|f| f.max_write_number()).max() {
            writer.raise_max_write_number(write_number);
        }
        writer.append_metadata(max_seq_id, selection.major)?;
        writer.close()
    }

    /// Row to split the store at, if it has grown past the maximum size
    ///
    /// The row of the largest file's block index midkey. `None` while any
    /// reference remains or when the midkey row is the file's first or last
    /// row.
    pub fn check_split(&self) -> Option<Vec<u8>> {
        let files = self.store_files();
        if files.is_empty() {
            return None;
        }
        if files.iter().any(|f| f.is_reference()) {
            debug!(dir = %self.dir.display(), "Not splittable; references present");
            return None;
        }

        let total: u64 = files.iter().map(|f| f.len()).sum();
        if total <= self.config.max_file_size {
            return None;
        }

        let largest = files.iter().max_by_key(|f| f.len())?;
        let sfile = largest.reader().sorted_file();
        let mid = row_of(sfile.midkey()?)?;
        let first = row_of(sfile.first_key()?)?;
        let last = row_of(sfile.last_key()?)?;
        if mid == first || mid == last {
            debug!(
                file = %largest.name(),
                "Not splittable; midkey is the first or last row"
            );
            return None;
        }
        Some(mid)
    }
}

fn row_of(key: &Bytes) -> Option<Vec<u8>> {
    Cell::from_parts(key.clone(), Bytes::new())
        .ok()
        .map(|cell| cell.row().to_vec())
}
