//! Reference files
//!
//! After a split each daughter store holds, per parent file, a small
//! reference file pointing at the top or bottom half of the parent's file
//! instead of a copy of the data. References live until a compaction
//! rewrites the daughter's data into real files.
//!
//! A reference is named `<target file>.<parent store dir>` and holds a
//! bincode record of the split key and the half.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::cell::{Cell, KeyComparator};
use crate::error::{CellStoreError, Result};

/// Which side of the split key a reference covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Half {
    /// Keys at or after the split key
    Top,
    /// Keys before the split key
    Bottom,
}

/// Persisted body of a reference file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    /// Encoded first-on-row key of the split row
    pub split_key: Vec<u8>,
    pub half: Half,
}

impl Reference {
    pub fn new(split_row: &[u8], half: Half) -> Self {
        Self {
            split_key: Cell::first_on_row(split_row).key().to_vec(),
            half,
        }
    }

    pub fn top(split_row: &[u8]) -> Self {
        Self::new(split_row, Half::Top)
    }

    pub fn bottom(split_row: &[u8]) -> Self {
        Self::new(split_row, Half::Bottom)
    }

    /// Whether an encoded key falls on this reference's side of the split
    pub fn covers(&self, key: &[u8]) -> bool {
        let before_split = KeyComparator.compare(key, &self.split_key).is_lt();
        match self.half {
            Half::Top => !before_split,
            Half::Bottom => before_split,
        }
    }

    /// Whether `row` falls on this reference's side of the split
    pub fn covers_row(&self, row: &[u8]) -> bool {
        self.covers(Cell::first_on_row(row).key())
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let encoded = bincode::serialize(self)?;
        fs::write(path, encoded)?;
        Ok(())
    }

    pub fn read(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)?;
        bincode::deserialize(&bytes).map_err(|e| {
            CellStoreError::Corruption(format!("{}: bad reference file: {}", path.display(), e))
        })
    }
}

/// File name of a reference to `target` written on behalf of `parent_dir`
pub fn reference_name(target: &Path, parent_dir: &Path) -> Result<String> {
    let target_name = file_name(target)?;
    let parent_name = file_name(parent_dir)?;
    Ok(format!("{}.{}", target_name, parent_name))
}

/// Split a store file name into `(target, parent)` when it names a reference
pub fn parse_reference_name(name: &str) -> Option<(&str, &str)> {
    let (target, parent) = name.split_once('.')?;
    if target.is_empty() || parent.is_empty() {
        return None;
    }
    Some((target, parent))
}

/// Location of the file a reference in `store_dir` points at: the parent
/// store is a sibling directory of the daughter
pub fn resolve_target(store_dir: &Path, name: &str) -> Option<PathBuf> {
    let (target, parent) = parse_reference_name(name)?;
    Some(store_dir.parent()?.join(parent).join(target))
}

fn file_name(path: &Path) -> Result<String> {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| CellStoreError::Config(format!("{} has no file name", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_halves_partition_rows() {
        let top = Reference::top(b"m");
        let bottom = Reference::bottom(b"m");
        for row in [&b"a"[..], b"l", b"m", b"ma", b"z"] {
            assert_ne!(top.covers_row(row), bottom.covers_row(row));
        }
        assert!(top.covers_row(b"m"));
        assert!(bottom.covers_row(b"l"));
    }

    #[test]
    fn test_reference_file_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("abc.parent");
        let reference = Reference::bottom(b"row-5");
        reference.write(&path).unwrap();
        assert_eq!(Reference::read(&path).unwrap(), reference);
    }

    #[test]
    fn test_resolve_target() {
        let store_dir = Path::new("/table/daughter");
        assert_eq!(
            resolve_target(store_dir, "0123abcd.parent"),
            Some(PathBuf::from("/table/parent/0123abcd"))
        );
        assert_eq!(resolve_target(store_dir, "0123abcd"), None);
    }
}
