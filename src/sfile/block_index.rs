//! Block index
//!
//! One entry per block: the block's first key, its file offset, and its
//! decoded (uncompressed, magic included) size. Serialized as the index
//! magic followed by `(i64 offset, i32 decoded size, vlong-prefixed key)`.

use std::cmp::Ordering;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{CellStoreError, Result};

use super::codec::{get_byte_array, get_i32, get_i64, put_byte_array};

/// Offset, size and a one-byte key length
const MIN_ENTRY_SIZE: usize = 13;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub first_key: Bytes,
    pub offset: u64,
    pub decoded_size: u32,
}

#[derive(Debug, Clone, Default)]
pub struct BlockIndex {
    entries: Vec<IndexEntry>,
}

impl BlockIndex {
    pub fn new(entries: Vec<IndexEntry>) -> Self {
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn get(&self, ordinal: usize) -> Option<&IndexEntry> {
        self.entries.get(ordinal)
    }

    /// Last block whose first key is <= `key`; `None` if `key` sorts before
    /// the first block
    pub fn block_containing_key<F>(&self, key: &[u8], compare: F) -> Option<usize>
    where
        F: Fn(&[u8], &[u8]) -> Ordering,
    {
        let at_or_before = self
            .entries
            .partition_point(|entry| compare(&entry.first_key, key) != Ordering::Greater);
        at_or_before.checked_sub(1)
    }

    /// First key of the middle block, an approximate split point
    pub fn midkey(&self) -> Option<&Bytes> {
        if self.entries.is_empty() {
            return None;
        }
        Some(&self.entries[(self.entries.len() - 1) / 2].first_key)
    }

    /// Approximate memory held by the index
    pub fn heap_size(&self) -> usize {
        self.entries
            .iter()
            .map(|entry| entry.first_key.len() + std::mem::size_of::<IndexEntry>())
            .sum()
    }

    pub fn encode(&self, magic: &[u8]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_slice(magic);
        for entry in &self.entries {
            buf.put_i64(entry.offset as i64);
            buf.put_i32(entry.decoded_size as i32);
            put_byte_array(&mut buf, &entry.first_key);
        }
        buf.to_vec()
    }

    pub fn decode(data: Bytes, count: usize, magic: &[u8]) -> Result<Self> {
        if data.len() < magic.len() || &data[..magic.len()] != magic {
            return Err(CellStoreError::Corruption("bad block index magic".into()));
        }

        let mut buf: &[u8] = &data[magic.len()..];
        // The count comes from the trailer; never reserve more entries than
        // the block could hold
        let mut entries = Vec::with_capacity(count.min(buf.len() / MIN_ENTRY_SIZE));
        for _ in 0..count {
            let offset = get_i64(&mut buf, "index offset")?;
            let decoded_size = get_i32(&mut buf, "index block size")?;
            let first_key = get_byte_array(&data, &mut buf, "index key")?;
            if offset < 0 || decoded_size < 0 {
                return Err(CellStoreError::Corruption(format!(
                    "negative index entry: offset {}, size {}",
                    offset, decoded_size
                )));
            }
            entries.push(IndexEntry {
                first_key,
                offset: offset as u64,
                decoded_size: decoded_size as u32,
            });
        }
        Ok(Self { entries })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAGIC: &[u8; 8] = b"IDXBLK)+";

    fn index() -> BlockIndex {
        BlockIndex::new(vec![
            IndexEntry { first_key: Bytes::from_static(b"b"), offset: 0, decoded_size: 10 },
            IndexEntry { first_key: Bytes::from_static(b"f"), offset: 10, decoded_size: 10 },
            IndexEntry { first_key: Bytes::from_static(b"m"), offset: 20, decoded_size: 10 },
        ])
    }

    #[test]
    fn test_block_containing_key() {
        let idx = index();
        let cmp = |a: &[u8], b: &[u8]| a.cmp(b);
        assert_eq!(idx.block_containing_key(b"a", cmp), None);
        assert_eq!(idx.block_containing_key(b"b", cmp), Some(0));
        assert_eq!(idx.block_containing_key(b"c", cmp), Some(0));
        assert_eq!(idx.block_containing_key(b"f", cmp), Some(1));
        assert_eq!(idx.block_containing_key(b"z", cmp), Some(2));
    }

    #[test]
    fn test_midkey() {
        assert_eq!(index().midkey().unwrap().as_ref(), b"f");
        assert!(BlockIndex::default().midkey().is_none());
    }

    #[test]
    fn test_decode_reads_encoded_entries() {
        let idx = index();
        let decoded = BlockIndex::decode(Bytes::from(idx.encode(MAGIC)), 3, MAGIC).unwrap();
        assert_eq!(decoded.entries(), idx.entries());
    }

    #[test]
    fn test_decode_with_absurd_count_is_corruption() {
        let encoded = Bytes::from(index().encode(MAGIC));
        let result = BlockIndex::decode(encoded, usize::MAX / 2, MAGIC);
        assert!(matches!(result, Err(CellStoreError::Corruption(_))));
    }

    #[test]
    fn test_decode_with_too_many_entries_is_corruption() {
        let encoded = Bytes::from(index().encode(MAGIC));
        assert!(BlockIndex::decode(encoded, 4, MAGIC).is_err());
    }
}
