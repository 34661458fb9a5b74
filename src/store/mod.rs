//! Store Module
//!
//! The per-column-family engine: one memtable, an immutable list of store
//! files, and the flush, compaction and read paths over them.
//!
//! ## Write Path
//! ```text
//! put/delete ──► MVCC begin ──► WAL append ──► MemTable insert ──► MVCC complete
//! ```
//!
//! ## Flush
//! ```text
//! snapshot memtable ──► .tmp/<name> ──► rename into store dir ──► swap file list
//!                                                               + clear snapshot
//! ```
//!
//! ## Read Path
//! ```text
//! Scan ──► MemTableScanner ─┐
//!          StoreFileScanner ├─► KeyValueHeap ──► ScanQueryMatcher ──► rows
//!          StoreFileScanner ┘
//! ```
//!
//! The file list is copy-on-write: flush, compaction and bulk load install a
//! new list under a short write lock, and scanners holding the old list keep
//! reading it until they notice the change at the next row.

mod column_tracker;
mod compaction;
mod delete_tracker;
mod flush;
mod kv_scanner;
mod matcher;
mod scan;
mod scanner;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::cache::BlockCache;
use crate::cell::{Cell, LATEST_TIMESTAMP};
use crate::config::{FamilyConfig, StoreConfig};
use crate::error::{CellStoreError, Result};
use crate::memtable::{MemTable, MemTableScanner};
use crate::mvcc::MvccController;
use crate::sfile::SortedFileReader;
use crate::storefile::{
    millis_since_epoch, reference_name, sort_store_files, unique_file_name, Reference, StoreFile,
};
use crate::wal::WriteAheadLog;

pub use compaction::CompactionSelection;
pub use column_tracker::{ColumnTracker, ExplicitColumnTracker, WildcardColumnTracker};
pub use delete_tracker::DeleteTracker;
pub use kv_scanner::{KeyValueHeap, KeyValueScanner, VecScanner};
pub use matcher::{MatchCode, ScanQueryMatcher};
pub use scan::{CellFilter, FilterDecision, Scan, TimeRange};
pub use scanner::StoreScanner;

/// Directory inside the store where new files are written before publish
pub const TMP_DIR: &str = ".tmp";

/// Immutable, shared store file list
pub type StoreFiles = Arc<Vec<Arc<StoreFile>>>;

/// Sources of a scan captured in one step
pub(crate) struct ReadView {
    pub memtable: MemTableScanner,
    pub files: StoreFiles,
    pub files_version: u64,
    pub read_point: u64,
}

/// One column family's storage
pub struct Store {
    dir: PathBuf,
    tmp_dir: PathBuf,
    family: FamilyConfig,
    config: StoreConfig,
    cache: Option<Arc<dyn BlockCache>>,
    wal: Arc<dyn WriteAheadLog>,

    memtable: MemTable,
    mvcc: MvccController,

    files: RwLock<StoreFiles>,
    /// Bumped on every file list swap so open scanners can reopen
    files_version: AtomicU64,

    /// Writes hold it shared; the flush snapshot holds it exclusively
    update_lock: RwLock<()>,
    flush_lock: Mutex<()>,
    compaction_lock: Mutex<()>,
    /// Serializes read-modify-write counter updates
    increment_lock: Mutex<()>,

    closing: AtomicBool,
    /// Set once a flush dropped its snapshot
    aborted: AtomicBool,
    last_compaction_size: AtomicU64,
}

impl Store {
    /// Open (or create) the store rooted at `dir`
    ///
    /// Leftovers in the temporary directory are deleted and every store and
    /// reference file is opened. Call [`max_sequence_id`](Self::max_sequence_id)
    /// afterwards to find where log replay has to start.
    pub fn open(
        dir: impl AsRef<Path>,
        family: FamilyConfig,
        config: StoreConfig,
        cache: Option<Arc<dyn BlockCache>>,
        wal: Arc<dyn WriteAheadLog>,
    ) -> Result<Self> {
        family.validate()?;
        config.validate()?;

        let dir = dir.as_ref().to_path_buf();
        let tmp_dir = dir.join(TMP_DIR);
        fs::create_dir_all(&dir)?;
        if tmp_dir.exists() {
            fs::remove_dir_all(&tmp_dir)?;
        }
        fs::create_dir_all(&tmp_dir)?;

        let mut files = load_store_files(&dir, &family, &config, cache.clone())?;
        sort_store_files(&mut files);
        // New writes must number above everything already in a file
        let max_write_number = files.iter().map(|f| f.max_write_number()).max().unwrap_or(0);

        let store = Self {
            dir,
            tmp_dir,
            family,
            config,
            cache,
            wal,
            memtable: MemTable::new(),
            mvcc: MvccController::new(max_write_number),
            files: RwLock::new(Arc::new(files)),
            files_version: AtomicU64::new(0),
            update_lock: RwLock::new(()),
            flush_lock: Mutex::new(()),
            compaction_lock: Mutex::new(()),
            increment_lock: Mutex::new(()),
            closing: AtomicBool::new(false),
            aborted: AtomicBool::new(false),
            last_compaction_size: AtomicU64::new(0),
        };

        info!(
            dir = %store.dir.display(),
            family = %String::from_utf8_lossy(&store.family.name),
            files = store.storefile_count(),
            max_seq_id = store.max_sequence_id(),
            "Store opened"
        );
        Ok(store)
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Apply a batch of puts
    ///
    /// Cells stamped with `LATEST_TIMESTAMP` get the current time.
    pub fn put(&self, cells: &[Cell]) -> Result<()> {
        self.apply(cells)
    }

    /// Apply a batch of delete markers
    pub fn delete(&self, cells: &[Cell]) -> Result<()> {
        if let Some(cell) = cells.iter().find(|c| !c.is_delete()) {
            return Err(CellStoreError::Config(format!(
                "delete batch holds a {:?} cell",
                cell.cell_type()
            )));
        }
        self.apply(cells)
    }

    /// Re-apply cells recovered from the log after a restart; they are not
    /// appended to the log again
    pub fn replay(&self, cells: &[Cell]) -> Result<()> {
        self.check_open()?;
        self.check_family(cells)?;
        let _updates = self.update_lock.read();
        let entry = self.mvcc.begin_write();
        for cell in cells {
            self.memtable.add(cell.clone().with_seq(entry.write_number()));
        }
        self.mvcc.complete_and_wait(entry);
        Ok(())
    }

    fn apply(&self, cells: &[Cell]) -> Result<()> {
        self.check_writable()?;
        self.check_family(cells)?;

        let _updates = self.update_lock.read();
        let entry = self.mvcc.begin_write();
        let now = now_millis();
        let stamped: Vec<Cell> = cells
            .iter()
            .map(|cell| {
                let cell = if cell.timestamp() == LATEST_TIMESTAMP {
                    cell.with_timestamp_and_value(now, cell.value())
                } else {
                    cell.clone()
                };
                cell.with_seq(entry.write_number())
            })
            .collect();

        // Durable before visible
        if let Err(e) = self.wal.append(&stamped) {
            self.mvcc.complete(entry);
            return Err(e);
        }
        for cell in stamped {
            if cell.is_delete() {
                self.memtable.delete(cell);
            } else {
                self.memtable.add(cell);
            }
        }
        self.mvcc.complete_and_wait(entry);
        Ok(())
    }

    /// Add `amount` to the 8-byte big-endian counter at `(row, qualifier)`
    /// and return the new value
    pub fn increment_column_value(&self, row: &[u8], qualifier: &[u8], amount: i64) -> Result<i64> {
        self.check_writable()?;
        let _increment = self.increment_lock.lock();

        let scan = Scan::get(self.family.name.clone(), row).add_column(qualifier);
        let current = match self.get_at(scan, Some(u64::MAX))?.first() {
            Some(cell) => decode_counter(cell)?,
            None => 0,
        };
        let value = current.wrapping_add(amount);

        let _updates = self.update_lock.read();
        let entry = self.mvcc.begin_write();
        let ts = self
            .memtable
            .counter_timestamp(row, &self.family.name, qualifier, now_millis());
        let cell = Cell::put(row, &self.family.name, qualifier, ts, &value.to_be_bytes())
            .with_seq(entry.write_number());
        if let Err(e) = self.wal.append(std::slice::from_ref(&cell)) {
            self.mvcc.complete(entry);
            return Err(e);
        }
        self.memtable.upsert(cell);
        self.mvcc.complete_and_wait(entry);
        Ok(value)
    }

    fn check_open(&self) -> Result<()> {
        if self.aborted.load(Ordering::SeqCst) {
            return Err(CellStoreError::StoreAborted);
        }
        if self.closing.load(Ordering::SeqCst) {
            return Err(CellStoreError::Closed);
        }
        Ok(())
    }

    fn check_writable(&self) -> Result<()> {
        self.check_open()?;
        if self.config.read_only {
            return Err(CellStoreError::ReadOnly);
        }
        let size = self.memtable.heap_size();
        let limit = self.config.blocking_size();
        if size > limit {
            return Err(CellStoreError::TooBusy { size, limit });
        }
        Ok(())
    }

    fn check_family(&self, cells: &[Cell]) -> Result<()> {
        match cells.iter().find(|c| c.family() != self.family.name.as_slice()) {
            Some(cell) => Err(CellStoreError::NoSuchFamily(
                String::from_utf8_lossy(cell.family()).into_owned(),
            )),
            None => Ok(()),
        }
    }

    /// Whether the memtable has grown past the flush threshold
    pub fn needs_flush(&self) -> bool {
        self.memtable.heap_size() > self.config.flush_size
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Open a scanner; it sees writes completed before this call
    pub fn scan(&self, scan: Scan) -> Result<StoreScanner<'_>> {
        self.check_open()?;
        self.check_scan_family(&scan)?;
        StoreScanner::new(self, scan, None, now_millis())
    }

    /// Cells of the first row matched by `scan` (a get returns its row)
    pub fn get(&self, scan: Scan) -> Result<Vec<Cell>> {
        self.check_open()?;
        self.check_scan_family(&scan)?;
        self.get_at(scan, None)
    }

    /// `None` reads at the current read point
    fn get_at(&self, scan: Scan, read_point: Option<u64>) -> Result<Vec<Cell>> {
        let mut scanner = StoreScanner::new(self, scan, read_point, now_millis())?;
        Ok(scanner.next_row()?.unwrap_or_default())
    }

    fn check_scan_family(&self, scan: &Scan) -> Result<()> {
        if scan.family() != self.family.name.as_slice() {
            return Err(CellStoreError::NoSuchFamily(
                String::from_utf8_lossy(scan.family()).into_owned(),
            ));
        }
        Ok(())
    }

    /// Cells of the greatest row at or before `row` that still has live
    /// cells
    pub fn closest_row_before(&self, row: &[u8]) -> Result<Option<Vec<Cell>>> {
        self.check_open()?;
        let oldest = oldest_timestamp(self.family.ttl_millis(), now_millis());
        let files = self.store_files();
        let mut key = Cell::last_on_row(row);

        loop {
            let mut candidate = self.memtable.row_before(&key, oldest);
            for file in files.iter() {
                if let Some(found) = file.reader().row_before(&key)? {
                    if candidate.as_ref().map_or(true, |c| found > *c) {
                        candidate = Some(found);
                    }
                }
            }
            let Some(candidate) = candidate else {
                return Ok(None);
            };

            let cells = self.get(Scan::get(self.family.name.clone(), &candidate))?;
            if !cells.is_empty() {
                return Ok(Some(cells));
            }
            // Everything in that row is deleted or expired; look further back
            key = Cell::first_on_row(&candidate);
        }
    }

    /// Memtable view, file list and read point of a new scan
    ///
    /// Taken under the list lock: a flush publishes only after every write
    /// it holds is visible, so no file in the list holds a write above the
    /// read point captured here.
    pub(crate) fn read_view(&self, read_point: Option<u64>) -> ReadView {
        let files = self.files.read();
        let read_point = read_point.unwrap_or_else(|| self.mvcc.read_point());
        ReadView {
            memtable: self.memtable.scanner(read_point),
            files: files.clone(),
            files_version: self.files_version.load(Ordering::SeqCst),
            read_point,
        }
    }

    /// Position the memtable and every file `scan` may need at `seek_key`
    pub(crate) fn open_scanners(
        &self,
        scan: &Scan,
        memtable: MemTableScanner,
        files: &[Arc<StoreFile>],
        seek_key: &Cell,
    ) -> Result<Vec<Box<dyn KeyValueScanner>>> {
        let mut scanners: Vec<Box<dyn KeyValueScanner>> = Vec::with_capacity(files.len() + 1);
        let mut memtable = memtable;
        memtable.seek(seek_key)?;
        scanners.push(Box::new(memtable));

        for (index, file) in files.iter().enumerate() {
            if !file.reader().should_use_scanner(scan) {
                continue;
            }
            let mut scanner = file.scanner(scan.cache_blocks(), index as u64 + 1);
            scanner.seek(seek_key)?;
            scanners.push(Box::new(scanner));
        }
        Ok(scanners)
    }

    // =========================================================================
    // File list
    // =========================================================================

    /// Current file list, oldest first
    pub fn store_files(&self) -> StoreFiles {
        self.files.read().clone()
    }

    pub(crate) fn files_version(&self) -> u64 {
        self.files_version.load(Ordering::SeqCst)
    }

    /// Current file list and its version, read together
    pub(crate) fn files_with_version(&self) -> (StoreFiles, u64) {
        let files = self.files.read();
        (files.clone(), self.files_version.load(Ordering::SeqCst))
    }

    pub(crate) fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    /// Install `old list - removed + added` as the new file list; `inside`
    /// runs under the list's write lock right before the swap
    fn replace_files<F>(&self, removed: &[Arc<StoreFile>], added: Option<Arc<StoreFile>>, inside: F) -> Result<()>
    where
        F: FnOnce() -> Result<()>,
    {
        let mut files = self.files.write();
        let mut next: Vec<Arc<StoreFile>> = files
            .iter()
            .filter(|file| !removed.iter().any(|r| Arc::ptr_eq(r, file)))
            .cloned()
            .collect();
        next.extend(added);
        sort_store_files(&mut next);

        inside()?;
        *files = Arc::new(next);
        self.files_version.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Move a finished file from the temporary directory into the store and
    /// open it
    fn commit_file(&self, tmp_path: &Path) -> Result<Arc<StoreFile>> {
        let name = tmp_path
            .file_name()
            .ok_or_else(|| CellStoreError::Config(format!("{} has no file name", tmp_path.display())))?;
        let dest = self.dir.join(name);
        fs::rename(tmp_path, &dest)?;
        match StoreFile::open(&dest, &self.family, self.cache.clone()) {
            Ok(file) => Ok(Arc::new(file)),
            Err(e) => {
                // Never leave an unpublished file where open would pick it up
                let _ = fs::remove_file(&dest);
                Err(e)
            }
        }
    }

    /// Adopt a sorted file written outside the write path
    ///
    /// The file is copied into the store; every key must belong to this
    /// store's family.
    pub fn bulk_load_file(&self, path: impl AsRef<Path>) -> Result<()> {
        self.check_writable()?;
        let path = path.as_ref();

        let source = SortedFileReader::open(path, None, false)?;
        for key in [source.first_key(), source.last_key()].into_iter().flatten() {
            let cell = Cell::from_parts(key.clone(), Default::default())?;
            if cell.family() != self.family.name.as_slice() {
                return Err(CellStoreError::NoSuchFamily(
                    String::from_utf8_lossy(cell.family()).into_owned(),
                ));
            }
        }
        drop(source);

        let tmp_path = self.tmp_dir.join(unique_file_name());
        fs::copy(path, &tmp_path)?;
        let file = match self.commit_file(&tmp_path) {
            Ok(file) => file,
            Err(e) => {
                let _ = fs::remove_file(&tmp_path);
                return Err(e);
            }
        };
        self.replace_files(&[], Some(file.clone()), || Ok(()))?;

        info!(
            source = %path.display(),
            file = %file.name(),
            "Bulk loaded store file"
        );
        Ok(())
    }

    /// Write top and bottom references to every store file into the two
    /// daughter store directories; both must be siblings of this store's
    /// directory
    pub fn split_references(
        &self,
        split_row: &[u8],
        top_dir: &Path,
        bottom_dir: &Path,
    ) -> Result<Vec<PathBuf>> {
        self.check_open()?;
        fs::create_dir_all(top_dir)?;
        fs::create_dir_all(bottom_dir)?;

        let mut written = Vec::new();
        for file in self.store_files().iter() {
            if file.is_reference() {
                return Err(CellStoreError::Config(format!(
                    "{} is a reference; compact before splitting",
                    file.name()
                )));
            }
            let name = reference_name(file.path(), &self.dir)?;
            for (dir, reference) in [
                (top_dir, Reference::top(split_row)),
                (bottom_dir, Reference::bottom(split_row)),
            ] {
                let path = dir.join(&name);
                reference.write(&path)?;
                written.push(path);
            }
        }

        debug!(
            split_row = %String::from_utf8_lossy(split_row),
            references = written.len(),
            "Wrote split references"
        );
        Ok(written)
    }

    /// Stop accepting work, wait for a running flush or compaction, and hand
    /// back the file list
    pub fn close(&self) -> Result<Vec<Arc<StoreFile>>> {
        self.closing.store(true, Ordering::SeqCst);
        let _flush = self.flush_lock.lock();
        let _compaction = self.compaction_lock.lock();

        let files = std::mem::take(&mut *self.files.write());
        self.files_version.fetch_add(1, Ordering::SeqCst);
        info!(dir = %self.dir.display(), files = files.len(), "Store closed");
        Ok(files.iter().cloned().collect())
    }

    // =========================================================================
    // Statistics
    // =========================================================================

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn family(&self) -> &FamilyConfig {
        &self.family
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn memtable(&self) -> &MemTable {
        &self.memtable
    }

    pub fn mvcc(&self) -> &MvccController {
        &self.mvcc
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    /// Accounted memtable size (active generation)
    pub fn memtable_size(&self) -> usize {
        self.memtable.heap_size()
    }

    /// On-disk bytes of every store file
    pub fn storefiles_size(&self) -> u64 {
        self.store_files().iter().map(|f| f.len()).sum()
    }

    pub fn storefile_count(&self) -> usize {
        self.files.read().len()
    }

    /// Bytes held by the block indexes of every store file
    pub fn storefile_index_size(&self) -> usize {
        self.store_files().iter().map(|f| f.reader().index_size()).sum()
    }

    pub fn total_bloom_size(&self) -> usize {
        self.store_files().iter().map(|f| f.reader().bloom_size()).sum()
    }

    /// Highest log sequence number already flushed into a store file, -1
    /// when no file records one
    pub fn max_sequence_id(&self) -> i64 {
        self.store_files()
            .iter()
            .map(|f| f.max_sequence_id())
            .max()
            .unwrap_or(-1)
    }

    /// Bytes read by the last completed compaction
    pub fn last_compaction_size(&self) -> u64 {
        self.last_compaction_size.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("dir", &self.dir)
            .field("family", &String::from_utf8_lossy(&self.family.name))
            .field("files", &self.storefile_count())
            .field("memtable_size", &self.memtable_size())
            .finish()
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn load_store_files(
    dir: &Path,
    family: &FamilyConfig,
    config: &StoreConfig,
    cache: Option<Arc<dyn BlockCache>>,
) -> Result<Vec<Arc<StoreFile>>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let path = entry.path();
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }

        match StoreFile::open(&path, family, cache.clone()) {
            Ok(file) => files.push(Arc::new(file)),
            Err(e) if config.skip_corrupt_files => {
                warn!(path = %path.display(), error = %e, "Skipping unreadable store file");
            }
            Err(e) => return Err(e),
        }
    }
    Ok(files)
}

fn decode_counter(cell: &Cell) -> Result<i64> {
    let bytes: [u8; 8] = cell.value().as_ref().try_into().map_err(|_| {
        CellStoreError::Config(format!(
            "counter value must be 8 bytes, found {}",
            cell.value().len()
        ))
    })?;
    Ok(i64::from_be_bytes(bytes))
}

pub(crate) fn now_millis() -> i64 {
    millis_since_epoch(SystemTime::now())
}

/// Timestamp below which cells have expired
pub(crate) fn oldest_timestamp(ttl_millis: i64, now: i64) -> i64 {
    if ttl_millis == i64::MAX {
        i64::MIN
    } else {
        now.saturating_sub(ttl_millis)
    }
}
