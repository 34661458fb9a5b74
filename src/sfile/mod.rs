//! Sorted File Module
//!
//! Immutable, block-structured file of sorted key/value pairs. This is the
//! physical format; `storefile` layers cell semantics, bloom filters and
//! metadata on top of it.
//!
//! ## File Format
//! ```text
//! ┌─────────────────────────────────────────┐
//! │ Data Block 0   "DATABLK*" (klen vlen k v)*│
//! │ Data Block 1                             │
//! │ ...                                      │
//! ├─────────────────────────────────────────┤
//! │ Meta Blocks    "METABLKc" payload        │  (sorted by name)
//! ├─────────────────────────────────────────┤
//! │ File Info      i32 count, (key, value)*  │
//! ├─────────────────────────────────────────┤
//! │ Data Index     "IDXBLK)+" entries        │
//! ├─────────────────────────────────────────┤
//! │ Meta Index     "IDXBLK)+" entries        │
//! ├─────────────────────────────────────────┤
//! │ Trailer        "TRABLK\"$" (60 bytes)    │
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Conventions
//! - Every integer is big-endian
//! - Each data and meta block is compressed on its own, magic included
//! - Index entries record the decoded size; the on-disk size is the distance
//!   to the next section
//! - Blocks handed to the cache and to scanners have the magic stripped

mod block_index;
mod codec;
mod compression;
mod file_info;
mod reader;
mod scanner;
mod trailer;
mod writer;

pub use block_index::{BlockIndex, IndexEntry};
pub use compression::Compression;
pub use file_info::FileInfo;
pub use reader::SortedFileReader;
pub use scanner::{SeekResult, SortedFileScanner};
pub use trailer::Trailer;
pub use writer::{SortedFileWriter, WriterSummary};

/// Reserved file info keys written by every writer
pub mod reserved {
    pub use super::file_info::{AVG_KEY_LEN, AVG_VALUE_LEN, COMPARATOR, LASTKEY, RESERVED_PREFIX};
}

pub const DATA_MAGIC: &[u8; 8] = b"DATABLK*";
pub const META_MAGIC: &[u8; 8] = b"METABLKc";
pub const INDEX_MAGIC: &[u8; 8] = b"IDXBLK)+";
pub const TRAILER_MAGIC: &[u8; 8] = b"TRABLK\"$";

/// Sorted file format version; any other value fails closed
pub const FORMAT_VERSION: i32 = 1;

/// Bytes of framing in front of every data block entry
pub(crate) const ENTRY_HEADER_SIZE: usize = 8;
