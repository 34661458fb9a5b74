//! Store Scanner
//!
//! Merges the memtable and store file scanners through a `KeyValueHeap` and
//! runs every cell through the query matcher, returning one row at a time.
//!
//! When the store's file list changes (flush, compaction, bulk load), the
//! scanner rebuilds its sources at the next row boundary. It keeps reading
//! the memtable generations it opened with and leaves out files holding
//! writes above its read point: every cell it may return from such a file
//! is still in those generations.

use std::sync::Arc;

use tracing::debug;

use crate::cell::Cell;
use crate::error::Result;
use crate::memtable::MemTableScanner;
use crate::storefile::StoreFile;

use super::kv_scanner::{KeyValueHeap, KeyValueScanner};
use super::matcher::{MatchCode, ScanQueryMatcher};
use super::scan::Scan;
use super::{Store, StoreFiles};

pub struct StoreScanner<'a> {
    /// Source of reader-change notifications; `None` for compactions
    store: Option<&'a Store>,
    scan: Option<Scan>,
    heap: KeyValueHeap,
    matcher: ScanQueryMatcher,
    /// Memtable generations seen at open; `None` for compactions
    memtable: Option<MemTableScanner>,
    /// Files the current sources were opened over
    files: StoreFiles,
    read_point: u64,
    files_version: u64,
    /// Last cell consumed; an equal key from an older source is dropped
    last: Option<Cell>,
    closed: bool,
}

impl<'a> StoreScanner<'a> {
    /// Scanner for a user scan; cells written after the read point stay
    /// hidden (`None` takes the store's current one)
    pub(crate) fn new(store: &'a Store, scan: Scan, read_point: Option<u64>, now: i64) -> Result<Self> {
        let family = store.family();
        let matcher = ScanQueryMatcher::for_scan(&scan, family.max_versions, family.ttl_millis(), now);
        let view = store.read_view(read_point);
        let seek_key = Cell::first_on_row(scan.start_row());
        let scanners = store.open_scanners(&scan, view.memtable.reopen(), &view.files, &seek_key)?;

        Ok(Self {
            store: Some(store),
            scan: Some(scan),
            heap: KeyValueHeap::new(scanners),
            matcher,
            memtable: Some(view.memtable),
            files: view.files,
            read_point: view.read_point,
            files_version: view.files_version,
            last: None,
            closed: false,
        })
    }

    /// Scanner over a fixed set of already positioned sources
    pub(crate) fn over(scanners: Vec<Box<dyn KeyValueScanner>>, matcher: ScanQueryMatcher) -> Self {
        Self {
            store: None,
            scan: None,
            heap: KeyValueHeap::new(scanners),
            matcher,
            memtable: None,
            files: Arc::new(Vec::new()),
            read_point: u64::MAX,
            files_version: 0,
            last: None,
            closed: false,
        }
    }

    /// Cells of the next row with at least one visible cell; `None` once the
    /// scan is exhausted
    pub fn next_row(&mut self) -> Result<Option<Vec<Cell>>> {
        loop {
            let mut row = Vec::new();
            let more = self.next_internal(&mut row)?;
            if !row.is_empty() {
                return Ok(Some(row));
            }
            if !more {
                return Ok(None);
            }
        }
    }

    /// Match the cells of one row into `out`; returns whether more rows may
    /// follow
    fn next_internal(&mut self, out: &mut Vec<Cell>) -> Result<bool> {
        if self.closed {
            return Ok(false);
        }
        self.check_readers()?;

        let Some(peeked) = self.heap.peek() else {
            self.close();
            return Ok(false);
        };
        if self.matcher.row() != Some(peeked.row()) {
            let row = peeked.row().to_vec();
            self.matcher.set_row(&row);
        }

        while let Some(cell) = self.heap.peek().cloned() {
            if self.last.as_ref().is_some_and(|prev| prev.compare_key(&cell).is_eq()) {
                self.heap.next()?;
                continue;
            }
            match self.matcher.match_cell(&cell) {
                MatchCode::Include => {
                    self.heap.next()?;
                    self.last = Some(cell.clone());
                    out.push(cell);
                }
                MatchCode::Skip => {
                    self.heap.next()?;
                    self.last = Some(cell);
                }
                MatchCode::SeekNextColumn => {
                    let key = self.matcher.key_for_next_column(&cell);
                    self.heap.reseek(&key)?;
                }
                MatchCode::SeekNextRow => {
                    let key = self.matcher.key_for_next_row(&cell);
                    self.heap.reseek(&key)?;
                }
                MatchCode::Done => return Ok(true),
                MatchCode::DoneScan => {
                    self.close();
                    return Ok(false);
                }
            }
        }

        self.close();
        Ok(false)
    }

    /// Rebuild the sources if the store's file list changed since they were
    /// opened
    fn check_readers(&mut self) -> Result<()> {
        let (Some(store), Some(scan), Some(memtable)) = (self.store, &self.scan, &self.memtable) else {
            return Ok(());
        };
        if store.files_version() == self.files_version {
            return Ok(());
        }
        let (files, files_version) = store.files_with_version();
        self.files_version = files_version;
        if store.is_closing() {
            return Ok(());
        }

        let read_point = self.read_point;
        let admitted: Vec<Arc<StoreFile>> = files
            .iter()
            .filter(|file| file.max_write_number() <= read_point)
            .cloned()
            .collect();
        let replaced = self
            .files
            .iter()
            .any(|old| !files.iter().any(|file| Arc::ptr_eq(old, file)));
        if replaced && admitted.len() < files.len() {
            // A compaction merged files of ours into an output that also holds
            // newer writes; only the current sources still show those cells
            debug!(files_version, "Store scanner keeps its sources across file list change");
            return Ok(());
        }

        let Some(top) = self.heap.peek() else {
            return Ok(());
        };
        let seek_key = Cell::first_on_row(top.row());
        let scanners = store.open_scanners(scan, memtable.reopen(), &admitted, &seek_key)?;
        self.heap.close();
        self.heap = KeyValueHeap::new(scanners);
        self.files = Arc::new(admitted);
        debug!(files_version, files = self.files.len(), "Store scanner reopened after file list change");
        Ok(())
    }

    pub fn close(&mut self) {
        if !self.closed {
            self.heap.close();
            self.closed = true;
        }
    }
}

impl Iterator for StoreScanner<'_> {
    type Item = Result<Vec<Cell>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_row().transpose()
    }
}

impl Drop for StoreScanner<'_> {
    fn drop(&mut self) {
        self.close();
    }
}
