//! Bloom Filter Module
//!
//! Probabilistic "definitely absent / maybe present" test attached to every
//! store file that enables it.
//!
//! ## Responsibilities
//! - Size a bit array from (max keys, target false positive rate)
//! - Double hashing over two xxh3 base hashes
//! - Fold an under-filled filter to reclaim space
//! - Serialize as a meta block plus a raw data block
//!
//! ## Serialized Form
//! ```text
//! Meta block (20 bytes, big-endian):
//! ┌─────────────┬───────────────┬────────────────┬───────────────┬───────────────┐
//! │ Version i32 │ ByteSize i32  │ HashCount i32  │ HashType i32  │ KeyCount i32  │
//! └─────────────┴───────────────┴────────────────┴───────────────┴───────────────┘
//! Data block: ByteSize raw bytes of the bit array
//! ```

mod filter;

pub use filter::{contains_in, BloomFilter, BloomMeta};

/// What a store file's bloom filter is keyed by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BloomType {
    /// No bloom filter
    #[default]
    None,
    /// Keyed by row
    Row,
    /// Keyed by row followed by qualifier
    RowCol,
}

impl BloomType {
    /// Name stored in store file metadata
    pub fn name(self) -> &'static str {
        match self {
            BloomType::None => "NONE",
            BloomType::Row => "ROW",
            BloomType::RowCol => "ROWCOL",
        }
    }

    pub fn from_name(name: &[u8]) -> Option<Self> {
        match name {
            b"NONE" => Some(BloomType::None),
            b"ROW" => Some(BloomType::Row),
            b"ROWCOL" => Some(BloomType::RowCol),
            _ => None,
        }
    }

    /// Build the bloom key for a cell coordinate
    pub fn bloom_key(self, row: &[u8], qualifier: &[u8]) -> Option<Vec<u8>> {
        match self {
            BloomType::None => None,
            BloomType::Row => Some(row.to_vec()),
            BloomType::RowCol => {
                let mut key = Vec::with_capacity(row.len() + qualifier.len());
                key.extend_from_slice(row);
                key.extend_from_slice(qualifier);
                Some(key)
            }
        }
    }
}
