//! Key/value scanner contract and the k-way merge heap
//!
//! Every read source (memtable, store files) is a `KeyValueScanner`. The
//! heap merges them in cell order; when two sources hold an equal key the
//! one with the higher sequence id wins, so newer sources shadow older ones.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::cell::Cell;
use crate::error::Result;

/// A positioned, forward-only cursor over cells
pub trait KeyValueScanner: Send {
    /// Current cell without advancing
    fn peek(&self) -> Option<&Cell>;

    /// Return the current cell and advance
    fn next(&mut self) -> Result<Option<Cell>>;

    /// Position on the first cell at or after `key`; `false` when exhausted
    fn seek(&mut self, key: &Cell) -> Result<bool>;

    /// Like `seek` but may assume `key` is not before the current position
    fn reseek(&mut self, key: &Cell) -> Result<bool> {
        self.seek(key)
    }

    /// Orders sources holding equal keys; higher is newer
    fn sequence_id(&self) -> u64;

    /// Release cached blocks and iterator state
    fn close(&mut self);
}

// =============================================================================
// Heap
// =============================================================================

/// Heap slot; `BinaryHeap` is a max-heap so the ordering is reversed
struct HeapEntry(Box<dyn KeyValueScanner>);

impl HeapEntry {
    fn compare(&self, other: &Self) -> Ordering {
        match (self.0.peek(), other.0.peek()) {
            (Some(a), Some(b)) => a
                .cmp(b)
                .then_with(|| other.0.sequence_id().cmp(&self.0.sequence_id())),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
    }
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.compare(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other.compare(self)
    }
}

/// Merges many scanners into one ordered stream
pub struct KeyValueHeap {
    heap: BinaryHeap<HeapEntry>,
    /// Scanner holding the smallest cell, kept out of the heap
    current: Option<HeapEntry>,
}

impl KeyValueHeap {
    /// Build from scanners that are already positioned; exhausted ones are
    /// closed and dropped
    pub fn new(scanners: Vec<Box<dyn KeyValueScanner>>) -> Self {
        let mut heap = BinaryHeap::with_capacity(scanners.len());
        for mut scanner in scanners {
            if scanner.peek().is_some() {
                heap.push(HeapEntry(scanner));
            } else {
                scanner.close();
            }
        }
        let current = heap.pop();
        Self { heap, current }
    }

    pub fn peek(&self) -> Option<&Cell> {
        self.current.as_ref().and_then(|entry| entry.0.peek())
    }

    /// Return the smallest cell across all scanners and advance past it
    pub fn next(&mut self) -> Result<Option<Cell>> {
        let Some(mut entry) = self.current.take() else {
            return Ok(None);
        };
        let cell = entry.0.next()?;

        if entry.0.peek().is_some() {
            self.heap.push(entry);
        } else {
            entry.0.close();
        }
        self.current = self.heap.pop();
        Ok(cell)
    }

    /// Seek every scanner to `key`
    pub fn seek(&mut self, key: &Cell) -> Result<bool> {
        self.reposition(key, false)
    }

    /// Forward-only seek; scanners already at or past `key` are untouched
    pub fn reseek(&mut self, key: &Cell) -> Result<bool> {
        self.reposition(key, true)
    }

    fn reposition(&mut self, key: &Cell, forward_only: bool) -> Result<bool> {
        let mut entries: Vec<HeapEntry> = self.heap.drain().collect();
        if let Some(current) = self.current.take() {
            entries.push(current);
        }

        for mut entry in entries {
            let behind = entry.0.peek().map_or(true, |cell| cell < key);
            let positioned = if forward_only && !behind {
                true
            } else if forward_only {
                entry.0.reseek(key)?
            } else {
                entry.0.seek(key)?
            };
            if positioned && entry.0.peek().is_some() {
                self.heap.push(entry);
            } else {
                entry.0.close();
            }
        }

        self.current = self.heap.pop();
        Ok(self.current.is_some())
    }

    pub fn close(&mut self) {
        for mut entry in self.heap.drain() {
            entry.0.close();
        }
        if let Some(mut current) = self.current.take() {
            current.0.close();
        }
    }
}

// =============================================================================
// Vec scanner
// =============================================================================

/// Scanner over an in-memory sorted vector of cells
pub struct VecScanner {
    cells: Vec<Cell>,
    pos: usize,
    sequence_id: u64,
}

impl VecScanner {
    pub fn new(mut cells: Vec<Cell>, sequence_id: u64) -> Self {
        cells.sort();
        Self {
            cells,
            pos: 0,
            sequence_id,
        }
    }
}

impl KeyValueScanner for VecScanner {
    fn peek(&self) -> Option<&Cell> {
        self.cells.get(self.pos)
    }

    fn next(&mut self) -> Result<Option<Cell>> {
        let cell = self.cells.get(self.pos).cloned();
        if cell.is_some() {
            self.pos += 1;
        }
        Ok(cell)
    }

    fn seek(&mut self, key: &Cell) -> Result<bool> {
        self.pos = self.cells.partition_point(|c| c < key);
        Ok(self.pos < self.cells.len())
    }

    fn sequence_id(&self) -> u64 {
        self.sequence_id
    }

    fn close(&mut self) {
        self.pos = self.cells.len();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put(row: &str, ts: i64, value: &str) -> Cell {
        Cell::put(row.as_bytes(), b"f", b"c", ts, value.as_bytes())
    }

    fn drain(heap: &mut KeyValueHeap) -> Vec<String> {
        let mut out = Vec::new();
        while let Some(cell) = heap.next().unwrap() {
            out.push(format!(
                "{}@{}={}",
                String::from_utf8_lossy(cell.row()),
                cell.timestamp(),
                String::from_utf8_lossy(cell.value())
            ));
        }
        out
    }

    #[test]
    fn test_heap_merges_in_cell_order() {
        let a = VecScanner::new(vec![put("a", 1, "x"), put("c", 1, "x")], 1);
        let b = VecScanner::new(vec![put("b", 1, "y"), put("c", 2, "y")], 2);
        let mut heap = KeyValueHeap::new(vec![Box::new(a), Box::new(b)]);
        assert_eq!(drain(&mut heap), vec!["a@1=x", "b@1=y", "c@2=y", "c@1=x"]);
    }

    #[test]
    fn test_equal_keys_prefer_higher_sequence_id() {
        let old = VecScanner::new(vec![put("r", 5, "old")], 1);
        let new = VecScanner::new(vec![put("r", 5, "new")], 9);
        let mut heap = KeyValueHeap::new(vec![Box::new(old), Box::new(new)]);
        assert_eq!(drain(&mut heap), vec!["r@5=new", "r@5=old"]);
    }

    #[test]
    fn test_seek_skips_earlier_cells() {
        let a = VecScanner::new(vec![put("a", 1, "x"), put("d", 1, "x")], 1);
        let b = VecScanner::new(vec![put("b", 1, "y"), put("e", 1, "y")], 2);
        let mut heap = KeyValueHeap::new(vec![Box::new(a), Box::new(b)]);
        assert!(heap.seek(&Cell::first_on_row(b"c")).unwrap());
        assert_eq!(drain(&mut heap), vec!["d@1=x", "e@1=y"]);
    }
}
