//! Cell Module
//!
//! A cell is one `(row, family, qualifier, timestamp, type) -> value` record.
//!
//! ## Key Encoding
//! ```text
//! ┌──────────────┬─────┬─────────────┬────────┬───────────┬───────────┬──────────┐
//! │ RowLen (u16) │ Row │ FamLen (u8) │ Family │ Qualifier │ Ts (i64)  │ Type (u8)│
//! └──────────────┴─────┴─────────────┴────────┴───────────┴───────────┴──────────┘
//! ```
//! All integers are big-endian. The qualifier length is implied by the key
//! length. Keys order by row, family, qualifier ascending, then timestamp
//! descending, then type code descending, so the newest version and the
//! delete markers of a coordinate sort first.

use std::cmp::Ordering;
use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{CellStoreError, Result};

/// Timestamp used for "latest" search keys
pub const LATEST_TIMESTAMP: i64 = i64::MAX;

/// Timestamp used for "oldest" search keys
pub const OLDEST_TIMESTAMP: i64 = i64::MIN;

/// Row length + family length + timestamp + type
const KEY_INFRASTRUCTURE_SIZE: usize = 2 + 1 + 8 + 1;

/// Approximate per-cell bookkeeping overhead used for memory accounting
const CELL_OVERHEAD: usize = 64;

// =============================================================================
// Cell Type
// =============================================================================

/// Kind of a cell. The numeric codes are part of the on-disk key format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CellType {
    /// Sorts after every real cell of a coordinate (search keys only)
    Minimum = 0,
    Put = 4,
    /// Deletes one exact version
    Delete = 8,
    /// Deletes every version at or before its timestamp in one column
    DeleteColumn = 12,
    /// Deletes every version at or before its timestamp in the whole family
    DeleteFamily = 14,
    /// Sorts before every real cell of a coordinate (search keys only)
    Maximum = 255,
}

impl CellType {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(CellType::Minimum),
            4 => Some(CellType::Put),
            8 => Some(CellType::Delete),
            12 => Some(CellType::DeleteColumn),
            14 => Some(CellType::DeleteFamily),
            255 => Some(CellType::Maximum),
            _ => None,
        }
    }

    pub fn is_delete(self) -> bool {
        matches!(
            self,
            CellType::Delete | CellType::DeleteColumn | CellType::DeleteFamily
        )
    }
}

// =============================================================================
// Key View
// =============================================================================

/// Borrowed, parsed view of an encoded key
#[derive(Debug, Clone, Copy)]
pub(crate) struct KeyView<'a> {
    pub row: &'a [u8],
    pub family: &'a [u8],
    pub qualifier: &'a [u8],
    pub timestamp: i64,
    pub type_code: u8,
}

impl<'a> KeyView<'a> {
    /// Parse an encoded key; `None` if the layout is inconsistent
    pub fn parse(key: &'a [u8]) -> Option<Self> {
        if key.len() < KEY_INFRASTRUCTURE_SIZE {
            return None;
        }
        let row_len = u16::from_be_bytes([key[0], key[1]]) as usize;
        let fam_len_pos = 2 + row_len;
        if fam_len_pos >= key.len() {
            return None;
        }
        let fam_len = key[fam_len_pos] as usize;
        let fam_start = fam_len_pos + 1;
        let tail = key.len() - 9;
        if fam_start + fam_len > tail {
            return None;
        }
        let mut ts_bytes = &key[tail..tail + 8];
        Some(Self {
            row: &key[2..fam_len_pos],
            family: &key[fam_start..fam_start + fam_len],
            qualifier: &key[fam_start + fam_len..tail],
            timestamp: ts_bytes.get_i64(),
            type_code: key[key.len() - 1],
        })
    }

    fn is_last_on_row(&self) -> bool {
        self.family.is_empty() && self.qualifier.is_empty() && self.type_code == 0
    }
}

// =============================================================================
// Comparator
// =============================================================================

/// Orders encoded keys. Its name is recorded in every sorted file so a
/// reader refuses files written with a different ordering.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyComparator;

impl KeyComparator {
    pub const NAME: &'static str = "cellstore.KeyComparator";

    /// Compare two encoded keys
    pub fn compare(&self, left: &[u8], right: &[u8]) -> Ordering {
        match (KeyView::parse(left), KeyView::parse(right)) {
            (Some(l), Some(r)) => Self::compare_views(&l, &r),
            _ => left.cmp(right),
        }
    }

    /// Compare only the rows of two encoded keys
    pub fn compare_rows(&self, left: &[u8], right: &[u8]) -> Ordering {
        match (KeyView::parse(left), KeyView::parse(right)) {
            (Some(l), Some(r)) => l.row.cmp(r.row),
            _ => left.cmp(right),
        }
    }

    fn compare_views(l: &KeyView<'_>, r: &KeyView<'_>) -> Ordering {
        let ord = l.row.cmp(r.row);
        if ord != Ordering::Equal {
            return ord;
        }

        // An empty column with the minimum type is "last on row"
        match (l.is_last_on_row(), r.is_last_on_row()) {
            (true, false) => return Ordering::Greater,
            (false, true) => return Ordering::Less,
            _ => {}
        }

        l.family
            .cmp(r.family)
            .then_with(|| l.qualifier.cmp(r.qualifier))
            .then_with(|| r.timestamp.cmp(&l.timestamp))
            .then_with(|| r.type_code.cmp(&l.type_code))
    }
}

// =============================================================================
// Cell
// =============================================================================

/// An immutable cell: encoded key, value and the write sequence number that
/// made it visible. Cells read back from sorted files carry sequence 0.
#[derive(Clone)]
pub struct Cell {
    key: Bytes,
    value: Bytes,
    seq: u64,
}

impl Cell {
    /// Build a cell from its coordinates
    ///
    /// # Panics
    /// Panics if the row is longer than `u16::MAX` or the family longer than
    /// `u8::MAX` bytes; both are caller contract violations.
    pub fn new(
        row: &[u8],
        family: &[u8],
        qualifier: &[u8],
        timestamp: i64,
        cell_type: CellType,
        value: &[u8],
    ) -> Self {
        Self {
            key: encode_key(row, family, qualifier, timestamp, cell_type),
            value: Bytes::copy_from_slice(value),
            seq: 0,
        }
    }

    /// Convenience constructor for a put
    pub fn put(row: &[u8], family: &[u8], qualifier: &[u8], timestamp: i64, value: &[u8]) -> Self {
        Self::new(row, family, qualifier, timestamp, CellType::Put, value)
    }

    /// Convenience constructor for a delete marker
    pub fn delete(
        row: &[u8],
        family: &[u8],
        qualifier: &[u8],
        timestamp: i64,
        cell_type: CellType,
    ) -> Self {
        Self::new(row, family, qualifier, timestamp, cell_type, &[])
    }

    /// Rebuild a cell from an encoded key and value read off disk
    pub fn from_parts(key: Bytes, value: Bytes) -> Result<Self> {
        let view = KeyView::parse(&key)
            .ok_or_else(|| CellStoreError::Corruption(format!("malformed cell key ({} bytes)", key.len())))?;
        if CellType::from_code(view.type_code).is_none() {
            return Err(CellStoreError::Corruption(format!(
                "unknown cell type code {}",
                view.type_code
            )));
        }
        Ok(Self { key, value, seq: 0 })
    }

    // -------------------------------------------------------------------------
    // Search keys
    // -------------------------------------------------------------------------

    /// Sorts before every cell of `row`
    pub fn first_on_row(row: &[u8]) -> Self {
        Self::search_key(row, &[], &[], LATEST_TIMESTAMP, CellType::Maximum)
    }

    /// Sorts after every cell of `row`
    pub fn last_on_row(row: &[u8]) -> Self {
        Self::search_key(row, &[], &[], OLDEST_TIMESTAMP, CellType::Minimum)
    }

    /// Sorts before every version of one column
    pub fn first_on_column(row: &[u8], family: &[u8], qualifier: &[u8]) -> Self {
        Self::search_key(row, family, qualifier, LATEST_TIMESTAMP, CellType::Maximum)
    }

    /// Sorts after every version of one column
    pub fn last_on_column(row: &[u8], family: &[u8], qualifier: &[u8]) -> Self {
        Self::search_key(row, family, qualifier, OLDEST_TIMESTAMP, CellType::Minimum)
    }

    fn search_key(
        row: &[u8],
        family: &[u8],
        qualifier: &[u8],
        timestamp: i64,
        cell_type: CellType,
    ) -> Self {
        // Search keys sort ahead of every sequence number of the same key
        Self {
            key: encode_key(row, family, qualifier, timestamp, cell_type),
            value: Bytes::new(),
            seq: u64::MAX,
        }
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    fn view(&self) -> KeyView<'_> {
        // Every constructor validates the layout
        KeyView::parse(&self.key).unwrap_or(KeyView {
            row: &[],
            family: &[],
            qualifier: &[],
            timestamp: 0,
            type_code: 0,
        })
    }

    /// Encoded key bytes
    pub fn key(&self) -> &Bytes {
        &self.key
    }

    pub fn value(&self) -> &Bytes {
        &self.value
    }

    pub fn row(&self) -> &[u8] {
        self.view().row
    }

    pub fn family(&self) -> &[u8] {
        self.view().family
    }

    pub fn qualifier(&self) -> &[u8] {
        self.view().qualifier
    }

    pub fn timestamp(&self) -> i64 {
        self.view().timestamp
    }

    pub fn cell_type(&self) -> CellType {
        CellType::from_code(self.view().type_code).unwrap_or(CellType::Minimum)
    }

    pub fn is_delete(&self) -> bool {
        self.cell_type().is_delete()
    }

    /// Write sequence number (0 for cells read from sorted files)
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Same cell stamped with a write sequence number
    pub fn with_seq(mut self, seq: u64) -> Self {
        self.seq = seq;
        self
    }

    /// Same coordinates with a different timestamp and value
    pub fn with_timestamp_and_value(&self, timestamp: i64, value: &[u8]) -> Self {
        let view = self.view();
        let cell_type = CellType::from_code(view.type_code).unwrap_or(CellType::Put);
        Self::new(view.row, view.family, view.qualifier, timestamp, cell_type, value)
    }

    pub fn matches_row(&self, row: &[u8]) -> bool {
        self.row() == row
    }

    pub fn matches_column(&self, family: &[u8], qualifier: &[u8]) -> bool {
        let view = self.view();
        view.family == family && view.qualifier == qualifier
    }

    /// Approximate memory footprint used for memtable accounting
    pub fn heap_size(&self) -> usize {
        self.key.len() + self.value.len() + CELL_OVERHEAD
    }

    /// Compare keys only, ignoring sequence numbers
    pub fn compare_key(&self, other: &Cell) -> Ordering {
        KeyComparator.compare(&self.key, &other.key)
    }
}

impl PartialEq for Cell {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Cell {}

impl PartialOrd for Cell {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Cell {
    /// Key order, then newest sequence number first
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare_key(other)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl fmt::Debug for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let view = self.view();
        write!(
            f,
            "{}/{}:{}/{}/{:?}/seq={} vlen={}",
            String::from_utf8_lossy(view.row),
            String::from_utf8_lossy(view.family),
            String::from_utf8_lossy(view.qualifier),
            view.timestamp,
            CellType::from_code(view.type_code),
            self.seq,
            self.value.len()
        )
    }
}

fn encode_key(
    row: &[u8],
    family: &[u8],
    qualifier: &[u8],
    timestamp: i64,
    cell_type: CellType,
) -> Bytes {
    assert!(row.len() <= u16::MAX as usize, "row longer than {} bytes", u16::MAX);
    assert!(family.len() <= u8::MAX as usize, "family longer than {} bytes", u8::MAX);

    let mut buf =
        BytesMut::with_capacity(KEY_INFRASTRUCTURE_SIZE + row.len() + family.len() + qualifier.len());
    buf.put_u16(row.len() as u16);
    buf.put_slice(row);
    buf.put_u8(family.len() as u8);
    buf.put_slice(family);
    buf.put_slice(qualifier);
    buf.put_i64(timestamp);
    buf.put_u8(cell_type.code());
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accessors() {
        let cell = Cell::put(b"row1", b"fam", b"qual", 42, b"value");
        assert_eq!(cell.row(), b"row1");
        assert_eq!(cell.family(), b"fam");
        assert_eq!(cell.qualifier(), b"qual");
        assert_eq!(cell.timestamp(), 42);
        assert_eq!(cell.cell_type(), CellType::Put);
        assert_eq!(cell.value().as_ref(), b"value");
    }

    #[test]
    fn test_newer_timestamp_sorts_first() {
        let old = Cell::put(b"r", b"f", b"q", 100, b"a");
        let new = Cell::put(b"r", b"f", b"q", 200, b"b");
        assert!(new < old);
    }

    #[test]
    fn test_delete_sorts_before_put_at_same_timestamp() {
        let put = Cell::put(b"r", b"f", b"q", 100, b"a");
        let del = Cell::delete(b"r", b"f", b"q", 100, CellType::Delete);
        let fam_del = Cell::delete(b"r", b"f", b"q", 100, CellType::DeleteFamily);
        assert!(del < put);
        assert!(fam_del < del);
    }

    #[test]
    fn test_row_search_keys_bracket_row() {
        let cell = Cell::put(b"r2", b"f", b"q", 5, b"v");
        assert!(Cell::first_on_row(b"r2") < cell);
        assert!(Cell::last_on_row(b"r2") > cell);
        assert!(Cell::last_on_row(b"r1") < Cell::first_on_row(b"r2"));
        assert!(Cell::last_on_row(b"r2") < Cell::first_on_row(b"r3"));
    }

    #[test]
    fn test_column_search_keys_bracket_versions() {
        let v1 = Cell::put(b"r", b"f", b"q", 1, b"v");
        let v9 = Cell::put(b"r", b"f", b"q", 9, b"v");
        let next_col = Cell::put(b"r", b"f", b"r", 9, b"v");
        assert!(Cell::first_on_column(b"r", b"f", b"q") < v9);
        assert!(Cell::last_on_column(b"r", b"f", b"q") > v1);
        assert!(Cell::last_on_column(b"r", b"f", b"q") < next_col);
    }

    #[test]
    fn test_higher_sequence_sorts_first_for_equal_keys() {
        let a = Cell::put(b"r", b"f", b"q", 1, b"a").with_seq(5);
        let b = Cell::put(b"r", b"f", b"q", 1, b"b").with_seq(9);
        assert!(b < a);
        assert_eq!(a.compare_key(&b), Ordering::Equal);
    }

    #[test]
    fn test_from_parts_rejects_garbage() {
        let err = Cell::from_parts(Bytes::from_static(b"xx"), Bytes::new());
        assert!(matches!(err, Err(CellStoreError::Corruption(_))));
    }

    #[test]
    fn test_from_parts_round_trips_key() {
        let cell = Cell::put(b"row", b"f", b"q", 7, b"v");
        let rebuilt = Cell::from_parts(cell.key().clone(), cell.value().clone()).unwrap();
        assert_eq!(rebuilt.row(), b"row");
        assert_eq!(rebuilt.timestamp(), 7);
    }
}
