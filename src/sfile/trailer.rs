//! Fixed-size file trailer
//!
//! The trailer is the only section located without a known offset: it is
//! read from `file_len - Trailer::SIZE`.
//!
//! ```text
//! ┌────────────┬──────────────────┬───────────────────┬──────────────────┐
//! │ Magic (8)  │ FileInfoOff i64  │ DataIndexOff i64  │ DataIndexCnt i32 │
//! ├────────────┴───┬──────────────┴───┬───────────────┴┬─────────────────┤
//! │ MetaIndexOff i64│ MetaIndexCnt i32 │ TotalUncomp i64│ EntryCount i32  │
//! ├─────────────────┴┬─────────────────┴───────────────┴─────────────────┤
//! │ Codec i32        │ Version i32                                       │
//! └──────────────────┴───────────────────────────────────────────────────┘
//! ```

use bytes::{BufMut, BytesMut};

use crate::error::{CellStoreError, Result};

use super::codec::{get_i32, get_i64};
use super::{FORMAT_VERSION, TRAILER_MAGIC};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trailer {
    pub file_info_offset: u64,
    pub data_index_offset: u64,
    pub data_index_count: u32,
    pub meta_index_offset: u64,
    pub meta_index_count: u32,
    pub total_uncompressed_bytes: u64,
    pub entry_count: u32,
    pub compression_codec: i32,
    pub version: i32,
}

impl Trailer {
    /// Magic (8) + 4 longs (32) + 5 ints (20)
    pub const SIZE: usize = 8 + 8 * 4 + 4 * 5;

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(Self::SIZE);
        buf.put_slice(TRAILER_MAGIC);
        buf.put_i64(self.file_info_offset as i64);
        buf.put_i64(self.data_index_offset as i64);
        buf.put_i32(self.data_index_count as i32);
        buf.put_i64(self.meta_index_offset as i64);
        buf.put_i32(self.meta_index_count as i32);
        buf.put_i64(self.total_uncompressed_bytes as i64);
        buf.put_i32(self.entry_count as i32);
        buf.put_i32(self.compression_codec);
        buf.put_i32(self.version);
        buf.to_vec()
    }

    /// Decode and fail closed on bad magic or an unknown version
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(CellStoreError::Corruption(format!(
                "trailer too short: {} bytes",
                data.len()
            )));
        }
        if &data[..8] != TRAILER_MAGIC {
            return Err(CellStoreError::Corruption(format!(
                "bad trailer magic: {:?}",
                &data[..8]
            )));
        }

        let mut buf = &data[8..Self::SIZE];
        let file_info_offset = non_negative(get_i64(&mut buf, "trailer")?, "file info offset")?;
        let data_index_offset = non_negative(get_i64(&mut buf, "trailer")?, "data index offset")?;
        let data_index_count = non_negative(get_i32(&mut buf, "trailer")? as i64, "data index count")?;
        let meta_index_offset = non_negative(get_i64(&mut buf, "trailer")?, "meta index offset")?;
        let meta_index_count = non_negative(get_i32(&mut buf, "trailer")? as i64, "meta index count")?;
        let total_uncompressed_bytes = non_negative(get_i64(&mut buf, "trailer")?, "total bytes")?;
        let entry_count = non_negative(get_i32(&mut buf, "trailer")? as i64, "entry count")?;
        let compression_codec = get_i32(&mut buf, "trailer")?;
        let version = get_i32(&mut buf, "trailer")?;

        if version != FORMAT_VERSION {
            return Err(CellStoreError::UnsupportedVersion {
                found: version,
                expected: FORMAT_VERSION,
            });
        }

        Ok(Self {
            file_info_offset,
            data_index_offset,
            data_index_count: data_index_count as u32,
            meta_index_offset,
            meta_index_count: meta_index_count as u32,
            total_uncompressed_bytes,
            entry_count: entry_count as u32,
            compression_codec,
            version,
        })
    }
}

fn non_negative(value: i64, what: &str) -> Result<u64> {
    u64::try_from(value)
        .map_err(|_| CellStoreError::Corruption(format!("negative {} in trailer: {}", what, value)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Trailer {
        Trailer {
            file_info_offset: 4096,
            data_index_offset: 5000,
            data_index_count: 3,
            meta_index_offset: 5100,
            meta_index_count: 1,
            total_uncompressed_bytes: 9000,
            entry_count: 42,
            compression_codec: 2,
            version: FORMAT_VERSION,
        }
    }

    #[test]
    fn test_encoded_size_is_fixed() {
        assert_eq!(sample().encode().len(), Trailer::SIZE);
    }

    #[test]
    fn test_decode_matches_encode() {
        assert_eq!(Trailer::decode(&sample().encode()).unwrap(), sample());
    }

    #[test]
    fn test_version_mismatch_fails_closed() {
        let mut trailer = sample();
        trailer.version = FORMAT_VERSION + 1;
        let err = Trailer::decode(&trailer.encode()).unwrap_err();
        assert!(matches!(err, CellStoreError::UnsupportedVersion { .. }));
    }

    #[test]
    fn test_bad_magic() {
        let mut encoded = sample().encode();
        encoded[0] = b'X';
        assert!(matches!(
            Trailer::decode(&encoded),
            Err(CellStoreError::Corruption(_))
        ));
    }
}
