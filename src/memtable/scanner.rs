//! MemTable scanner
//!
//! Merges the active and snapshot generations. Each generation keeps its
//! own cursor as "last returned cell" and re-enters the skip list from
//! there, so concurrent inserts never invalidate the scanner.

use std::ops::Bound;
use std::sync::Arc;

use crate::cell::Cell;
use crate::error::Result;
use crate::store::KeyValueScanner;

use super::CellSet;

/// Cursor over one generation
struct GenerationCursor {
    set: Arc<CellSet>,
    current: Option<Cell>,
}

impl GenerationCursor {
    fn new(set: Arc<CellSet>) -> Self {
        Self { set, current: None }
    }

    /// First visible cell at or after `bound`
    fn position(&mut self, bound: Bound<&Cell>, read_point: u64) {
        let mut cursor = self.set.lower_bound(bound);
        while let Some(entry) = cursor {
            if entry.key().seq() <= read_point {
                self.current = Some(entry.key().clone());
                return;
            }
            cursor = entry.next();
        }
        self.current = None;
    }

    fn advance(&mut self, read_point: u64) {
        if let Some(last) = self.current.take() {
            self.position(Bound::Excluded(&last), read_point);
        }
    }
}

/// MVCC-filtered scanner over a memtable
pub struct MemTableScanner {
    active: GenerationCursor,
    snapshot: GenerationCursor,
    read_point: u64,
    /// Smaller of the two generation heads
    current: Option<Cell>,
}

impl MemTableScanner {
    pub(crate) fn new(active: Arc<CellSet>, snapshot: Arc<CellSet>, read_point: u64) -> Self {
        Self {
            active: GenerationCursor::new(active),
            snapshot: GenerationCursor::new(snapshot),
            read_point,
            current: None,
        }
    }

    pub fn read_point(&self) -> u64 {
        self.read_point
    }

    /// Unpositioned scanner over the same generations and read point, even
    /// after the memtable has moved on to new ones
    pub fn reopen(&self) -> Self {
        Self::new(self.active.set.clone(), self.snapshot.set.clone(), self.read_point)
    }

    fn pick(&mut self) {
        self.current = match (&self.active.current, &self.snapshot.current) {
            (Some(a), Some(s)) => Some(if a <= s { a.clone() } else { s.clone() }),
            (Some(a), None) => Some(a.clone()),
            (None, Some(s)) => Some(s.clone()),
            (None, None) => None,
        };
    }
}

impl KeyValueScanner for MemTableScanner {
    fn peek(&self) -> Option<&Cell> {
        self.current.as_ref()
    }

    fn next(&mut self) -> Result<Option<Cell>> {
        let Some(cell) = self.current.take() else {
            return Ok(None);
        };

        // Advance whichever generation produced the cell
        if self.active.current.as_ref() == Some(&cell) {
            self.active.advance(self.read_point);
        } else {
            self.snapshot.advance(self.read_point);
        }
        self.pick();
        Ok(Some(cell))
    }

    fn seek(&mut self, key: &Cell) -> Result<bool> {
        self.active.position(Bound::Included(key), self.read_point);
        self.snapshot.position(Bound::Included(key), self.read_point);
        self.pick();
        Ok(self.current.is_some())
    }

    fn reseek(&mut self, key: &Cell) -> Result<bool> {
        for generation in [&mut self.active, &mut self.snapshot] {
            let behind = generation.current.as_ref().map_or(true, |c| c < key);
            if behind {
                generation.position(Bound::Included(key), self.read_point);
            }
        }
        self.pick();
        Ok(self.current.is_some())
    }

    /// The memtable always holds the newest data
    fn sequence_id(&self) -> u64 {
        u64::MAX
    }

    fn close(&mut self) {
        self.active.current = None;
        self.snapshot.current = None;
        self.current = None;
    }
}

#[cfg(test)]
mod tests {
    use crate::cell::Cell;
    use crate::memtable::MemTable;
    use crate::store::KeyValueScanner;

    fn put(row: &str, ts: i64, seq: u64) -> Cell {
        Cell::put(row.as_bytes(), b"f", b"c", ts, b"v").with_seq(seq)
    }

    fn rows(scanner: &mut dyn KeyValueScanner) -> Vec<String> {
        let mut out = Vec::new();
        while let Some(cell) = scanner.next().unwrap() {
            out.push(String::from_utf8_lossy(cell.row()).into_owned());
        }
        out
    }

    #[test]
    fn test_scanner_merges_generations() {
        let memtable = MemTable::new();
        memtable.add(put("a", 1, 1));
        memtable.add(put("c", 1, 2));
        memtable.snapshot();
        memtable.add(put("b", 1, 3));

        let mut scanner = memtable.scanner(u64::MAX);
        scanner.seek(&Cell::first_on_row(b"")).unwrap();
        assert_eq!(rows(&mut scanner), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_scanner_hides_writes_past_read_point() {
        let memtable = MemTable::new();
        memtable.add(put("a", 1, 1));
        memtable.add(put("b", 1, 5));

        let mut scanner = memtable.scanner(3);
        scanner.seek(&Cell::first_on_row(b"")).unwrap();
        assert_eq!(rows(&mut scanner), vec!["a"]);
    }

    #[test]
    fn test_reopen_keeps_flushed_generations() {
        let memtable = MemTable::new();
        memtable.add(put("a", 1, 1));
        memtable.add(put("b", 1, 2));
        let held = memtable.scanner(2);

        memtable.snapshot();
        let snapshot = memtable.get_snapshot();
        memtable.clear_snapshot(&snapshot).unwrap();
        memtable.add(put("c", 1, 3));

        let mut scanner = held.reopen();
        scanner.seek(&Cell::first_on_row(b"")).unwrap();
        assert_eq!(rows(&mut scanner), vec!["a", "b"]);
    }

    #[test]
    fn test_scanner_sees_inserts_after_its_position() {
        let memtable = MemTable::new();
        memtable.add(put("a", 1, 1));
        let mut scanner = memtable.scanner(u64::MAX);
        scanner.seek(&Cell::first_on_row(b"")).unwrap();
        memtable.add(put("b", 1, 2));
        assert_eq!(rows(&mut scanner), vec!["a", "b"]);
    }
}
