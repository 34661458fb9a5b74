//! MemTable Module
//!
//! In-memory write buffer of one store.
//!
//! ## Responsibilities
//! - Accept concurrent inserts of puts and delete markers
//! - Hand a frozen snapshot to the flusher without copying data
//! - Track an approximate heap size for flush triggers and backpressure
//! - Serve MVCC-filtered scanners over both generations
//!
//! ## Generations
//! - `active`: receives every insert
//! - `snapshot`: frozen, being flushed; at most one at a time
//!
//! Inserts hold the generation lock shared, so they run in parallel on the
//! concurrent skip list. Taking and clearing a snapshot hold it exclusive,
//! which only swaps two pointers.

mod scanner;

use std::ops::Bound;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use crossbeam_skiplist::SkipMap;
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::cell::{Cell, CellType};
use crate::error::{CellStoreError, Result};

pub use scanner::MemTableScanner;

/// One generation of cells
pub(crate) type CellSet = SkipMap<Cell, ()>;

/// Fixed accounting baseline of an empty memtable
pub const MEMTABLE_OVERHEAD: i64 = 256;

struct Generations {
    active: Arc<CellSet>,
    snapshot: Arc<CellSet>,
    snapshot_size: i64,
}

/// Frozen snapshot handed to a flush; must be passed back to
/// [`MemTable::clear_snapshot`]
#[derive(Clone)]
pub struct MemTableSnapshot {
    cells: Arc<CellSet>,
    size: i64,
}

impl MemTableSnapshot {
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Accounted size at the time the snapshot was taken
    pub fn size(&self) -> usize {
        self.size.max(0) as usize
    }

    /// Cells in key order
    pub fn cells(&self) -> impl Iterator<Item = Cell> + '_ {
        self.cells.iter().map(|entry| entry.key().clone())
    }
}

/// Two-generation concurrent write buffer
pub struct MemTable {
    generations: RwLock<Generations>,
    /// Accounted size of `active`, starting at `MEMTABLE_OVERHEAD`
    size: AtomicI64,
}

impl MemTable {
    pub fn new() -> Self {
        Self {
            generations: RwLock::new(Generations {
                active: Arc::new(SkipMap::new()),
                snapshot: Arc::new(SkipMap::new()),
                snapshot_size: 0,
            }),
            size: AtomicI64::new(MEMTABLE_OVERHEAD),
        }
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Insert a put; returns the accounted size delta
    pub fn add(&self, cell: Cell) -> usize {
        let generations = self.generations.read();
        self.insert(&generations.active, cell)
    }

    /// Insert a delete marker; returns the accounted size delta
    pub fn delete(&self, cell: Cell) -> usize {
        debug_assert!(cell.is_delete());
        self.add(cell)
    }

    fn insert(&self, active: &CellSet, cell: Cell) -> usize {
        let delta = cell.heap_size();
        active.insert(cell, ());
        self.size.fetch_add(delta as i64, Ordering::SeqCst);
        delta
    }

    /// Replace the counter at `(row, family, qualifier)` with `value`
    ///
    /// Returns the net change of the accounted size.
    pub fn update_column_value(
        &self,
        row: &[u8],
        family: &[u8],
        qualifier: &[u8],
        value: &[u8],
        now: i64,
    ) -> i64 {
        let ts = self.counter_timestamp(row, family, qualifier, now);
        self.upsert(Cell::put(row, family, qualifier, ts, value))
    }

    /// Timestamp for a new counter value written at `now`
    ///
    /// Bumped past a same-timestamp cell still sitting in the snapshot and
    /// raised to the newest put of the column in `active`.
    pub fn counter_timestamp(&self, row: &[u8], family: &[u8], qualifier: &[u8], now: i64) -> i64 {
        let generations = self.generations.read();
        let first = Cell::first_on_column(row, family, qualifier);
        let mut ts = now;

        if let Some(entry) = generations.snapshot.lower_bound(Bound::Included(&first)) {
            let cell = entry.key();
            if cell.matches_row(row) && cell.matches_column(family, qualifier) && cell.timestamp() == ts {
                ts += 1;
            }
        }

        let mut cursor = generations.active.lower_bound(Bound::Included(&first));
        while let Some(entry) = cursor {
            let cell = entry.key();
            if !cell.matches_row(row) || !cell.matches_column(family, qualifier) {
                break;
            }
            if cell.cell_type() == CellType::Put {
                ts = ts.max(cell.timestamp());
            }
            cursor = entry.next();
        }
        ts
    }

    /// Insert a put and drop the older puts of its column from `active`;
    /// returns the net change of the accounted size
    pub fn upsert(&self, cell: Cell) -> i64 {
        let generations = self.generations.read();
        let replaced = generations
            .active
            .get(&cell)
            .map(|entry| entry.key().heap_size() as i64)
            .unwrap_or(0);
        self.size.fetch_sub(replaced, Ordering::SeqCst);

        let mut delta = self.insert(&generations.active, cell.clone()) as i64 - replaced;
        delta -= self.remove_older_puts(&generations.active, &cell);
        delta
    }

    /// Drop every put of `cell`'s column other than `cell` itself; returns
    /// the bytes released
    fn remove_older_puts(&self, active: &CellSet, cell: &Cell) -> i64 {
        let first = Cell::first_on_column(cell.row(), cell.family(), cell.qualifier());
        let mut released = 0i64;
        let mut cursor = active.lower_bound(Bound::Included(&first));
        while let Some(entry) = cursor {
            let current = entry.key();
            if !current.matches_row(cell.row())
                || !current.matches_column(cell.family(), cell.qualifier())
            {
                break;
            }
            let next = entry.next();
            let same = current.compare_key(cell).is_eq() && current.seq() == cell.seq();
            if !same && current.cell_type() == CellType::Put && entry.remove() {
                released += current.heap_size() as i64;
            }
            cursor = next;
        }
        self.size.fetch_sub(released, Ordering::SeqCst);
        released
    }

    // =========================================================================
    // Snapshots
    // =========================================================================

    /// Freeze `active` as the snapshot and start a fresh `active`
    ///
    /// Does nothing while a previous snapshot has not been cleared.
    pub fn snapshot(&self) {
        let mut generations = self.generations.write();
        if !generations.snapshot.is_empty() {
            warn!(
                cells = generations.snapshot.len(),
                "Snapshot called again without clearing previous; doing nothing"
            );
            return;
        }
        if generations.active.is_empty() {
            return;
        }

        let frozen = std::mem::replace(&mut generations.active, Arc::new(SkipMap::new()));
        generations.snapshot = frozen;
        generations.snapshot_size = self.size.swap(MEMTABLE_OVERHEAD, Ordering::SeqCst);
        debug!(
            cells = generations.snapshot.len(),
            bytes = generations.snapshot_size,
            "MemTable snapshot taken"
        );
    }

    /// Current snapshot handle (possibly empty)
    pub fn get_snapshot(&self) -> MemTableSnapshot {
        let generations = self.generations.read();
        MemTableSnapshot {
            cells: generations.snapshot.clone(),
            size: generations.snapshot_size,
        }
    }

    /// Release a flushed snapshot; `snapshot` must be the handle returned by
    /// [`get_snapshot`](Self::get_snapshot)
    pub fn clear_snapshot(&self, snapshot: &MemTableSnapshot) -> Result<()> {
        let mut generations = self.generations.write();
        if !Arc::ptr_eq(&generations.snapshot, &snapshot.cells) {
            return Err(CellStoreError::SnapshotMismatch);
        }
        if !snapshot.cells.is_empty() {
            generations.snapshot = Arc::new(SkipMap::new());
            generations.snapshot_size = 0;
        }
        Ok(())
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Scanner over both generations, hiding cells written after `read_point`
    pub fn scanner(&self, read_point: u64) -> MemTableScanner {
        let generations = self.generations.read();
        MemTableScanner::new(
            generations.active.clone(),
            generations.snapshot.clone(),
            read_point,
        )
    }

    /// Row of the greatest cell sorting before `key`, ignoring cells older
    /// than `oldest_ts`
    ///
    /// Expired puts met on the way are removed from `active`.
    pub fn row_before(&self, key: &Cell, oldest_ts: i64) -> Option<Vec<u8>> {
        let generations = self.generations.read();
        let from_active = self.walk_back(&generations.active, key, oldest_ts, true);
        let from_snapshot = self.walk_back(&generations.snapshot, key, oldest_ts, false);
        match (from_active, from_snapshot) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }

    fn walk_back(&self, set: &CellSet, key: &Cell, oldest_ts: i64, purge: bool) -> Option<Vec<u8>> {
        let mut cursor = set.upper_bound(Bound::Excluded(key));
        while let Some(entry) = cursor {
            let cell = entry.key();
            if cell.timestamp() >= oldest_ts {
                return Some(cell.row().to_vec());
            }
            let prev = entry.prev();
            if purge && cell.cell_type() == CellType::Put && entry.remove() {
                self.size.fetch_sub(cell.heap_size() as i64, Ordering::SeqCst);
            }
            cursor = prev;
        }
        None
    }

    // =========================================================================
    // Accounting
    // =========================================================================

    /// Accounted size of `active` (includes the fixed overhead)
    pub fn heap_size(&self) -> usize {
        self.size.load(Ordering::SeqCst).max(0) as usize
    }

    /// Accounted size of the snapshot being flushed
    pub fn snapshot_size(&self) -> usize {
        self.generations.read().snapshot_size.max(0) as usize
    }

    pub fn active_len(&self) -> usize {
        self.generations.read().active.len()
    }

    pub fn snapshot_len(&self) -> usize {
        self.generations.read().snapshot.len()
    }

    pub fn is_empty(&self) -> bool {
        let generations = self.generations.read();
        generations.active.is_empty() && generations.snapshot.is_empty()
    }
}

impl Default for MemTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put(row: &str, qualifier: &str, ts: i64, value: &str) -> Cell {
        Cell::put(row.as_bytes(), b"f", qualifier.as_bytes(), ts, value.as_bytes())
    }

    #[test]
    fn test_add_accounts_size() {
        let memtable = MemTable::new();
        assert_eq!(memtable.heap_size(), MEMTABLE_OVERHEAD as usize);
        let cell = put("r", "c", 1, "v");
        let delta = memtable.add(cell.clone());
        assert_eq!(delta, cell.heap_size());
        assert_eq!(memtable.heap_size(), MEMTABLE_OVERHEAD as usize + delta);
    }

    #[test]
    fn test_snapshot_swaps_generations() {
        let memtable = MemTable::new();
        memtable.add(put("r", "c", 1, "v"));
        memtable.snapshot();
        assert_eq!(memtable.active_len(), 0);
        assert_eq!(memtable.snapshot_len(), 1);
        assert_eq!(memtable.heap_size(), MEMTABLE_OVERHEAD as usize);

        let snapshot = memtable.get_snapshot();
        memtable.clear_snapshot(&snapshot).unwrap();
        assert!(memtable.is_empty());
    }

    #[test]
    fn test_second_snapshot_is_refused() {
        let memtable = MemTable::new();
        memtable.add(put("r", "c", 1, "v"));
        memtable.snapshot();
        memtable.add(put("r", "c", 2, "w"));
        memtable.snapshot();
        assert_eq!(memtable.snapshot_len(), 1);
        assert_eq!(memtable.active_len(), 1);
    }

    #[test]
    fn test_clear_with_stale_handle_fails() {
        let memtable = MemTable::new();
        let stale = memtable.get_snapshot();
        memtable.add(put("r", "c", 1, "v"));
        memtable.snapshot();
        assert!(matches!(
            memtable.clear_snapshot(&stale),
            Err(CellStoreError::SnapshotMismatch)
        ));
    }

    #[test]
    fn test_update_column_value_replaces_older_puts() {
        let memtable = MemTable::new();
        memtable.add(put("r", "c", 10, "a"));
        memtable.add(put("r", "c", 20, "b"));
        memtable.add(put("r", "d", 20, "other"));

        memtable.update_column_value(b"r", b"f", b"c", b"x", 15);
        let cells: Vec<Cell> = memtable
            .generations
            .read()
            .active
            .iter()
            .map(|e| e.key().clone())
            .collect();
        let column: Vec<_> = cells.iter().filter(|c| c.qualifier() == b"c").collect();
        assert_eq!(column.len(), 1);
        assert_eq!(column[0].timestamp(), 20);
        assert_eq!(column[0].value().as_ref(), b"x");
        assert_eq!(cells.len(), 2);
    }

    #[test]
    fn test_update_column_value_bumps_past_snapshot() {
        let memtable = MemTable::new();
        memtable.add(put("r", "c", 100, "a"));
        memtable.snapshot();
        memtable.update_column_value(b"r", b"f", b"c", b"b", 100);
        let active: Vec<Cell> = memtable
            .generations
            .read()
            .active
            .iter()
            .map(|e| e.key().clone())
            .collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].timestamp(), 101);
    }

    #[test]
    fn test_row_before_skips_expired() {
        let memtable = MemTable::new();
        memtable.add(put("a", "c", 100, "live"));
        memtable.add(put("b", "c", 1, "expired"));
        let row = memtable.row_before(&Cell::last_on_row(b"b"), 50);
        assert_eq!(row.as_deref(), Some(&b"a"[..]));
        // The expired put was purged
        assert_eq!(memtable.active_len(), 1);
    }
}
