//! Delete tracking within one row
//!
//! Delete markers sort ahead of the cells they cover (newest timestamp and
//! highest type code first), so the tracker only needs to remember the
//! family-wide delete stamp plus the most recent column delete.

use crate::cell::CellType;

#[derive(Debug, Default)]
pub struct DeleteTracker {
    /// Every cell at or before this timestamp is deleted
    family_stamp: Option<i64>,
    /// Qualifier, timestamp and type of the last column-level delete
    column: Option<(Vec<u8>, i64, CellType)>,
}

impl DeleteTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a delete marker
    pub fn add(&mut self, qualifier: &[u8], timestamp: i64, cell_type: CellType) {
        if self.family_stamp.is_some_and(|stamp| timestamp <= stamp) {
            return;
        }

        if cell_type == CellType::DeleteFamily {
            self.family_stamp = Some(timestamp);
            return;
        }

        // A version delete does not narrow a column delete of the same column
        if let Some((buffered, _, buffered_type)) = &self.column {
            if cell_type.code() < buffered_type.code() && buffered.as_slice() == qualifier {
                return;
            }
        }
        self.column = Some((qualifier.to_vec(), timestamp, cell_type));
    }

    /// Whether a put at `(qualifier, timestamp)` is covered by a delete seen
    /// earlier in the row
    pub fn is_deleted(&mut self, qualifier: &[u8], timestamp: i64) -> bool {
        if self.family_stamp.is_some_and(|stamp| timestamp <= stamp) {
            return true;
        }

        let Some((buffered, delete_ts, delete_type)) = &self.column else {
            return false;
        };
        if buffered.as_slice() != qualifier {
            // Moved on to a later column
            self.column = None;
            return false;
        }

        match delete_type {
            CellType::DeleteColumn => timestamp <= *delete_ts,
            _ if timestamp == *delete_ts => true,
            _ => {
                // Older versions are not covered by a version delete
                self.column = None;
                false
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.family_stamp.is_none() && self.column.is_none()
    }

    pub fn reset(&mut self) {
        self.family_stamp = None;
        self.column = None;
    }
}
