//! Per-block compression codecs
//!
//! Every block is compressed on its own so it can be decoded independently.

use crate::error::{CellStoreError, Result};

/// Block compression codec. The ids are recorded in the trailer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    #[default]
    None,
    Snappy,
}

impl Compression {
    pub fn codec_id(self) -> i32 {
        match self {
            Compression::None => 2,
            Compression::Snappy => 3,
        }
    }

    pub fn from_codec_id(id: i32) -> Result<Self> {
        match id {
            2 => Ok(Compression::None),
            3 => Ok(Compression::Snappy),
            other => Err(CellStoreError::Corruption(format!(
                "unknown compression codec id {}",
                other
            ))),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Compression::None => "none",
            Compression::Snappy => "snappy",
        }
    }

    pub fn compress(self, raw: &[u8]) -> Result<Vec<u8>> {
        match self {
            Compression::None => Ok(raw.to_vec()),
            Compression::Snappy => snap::raw::Encoder::new()
                .compress_vec(raw)
                .map_err(|e| CellStoreError::Corruption(format!("snappy compression failed: {}", e))),
        }
    }

    /// Decode a block and check it expands to exactly `decoded_size` bytes
    pub fn decompress(self, data: &[u8], decoded_size: usize) -> Result<Vec<u8>> {
        let decoded = match self {
            Compression::None => data.to_vec(),
            Compression::Snappy => snap::raw::Decoder::new()
                .decompress_vec(data)
                .map_err(|e| CellStoreError::Corruption(format!("snappy decompression failed: {}", e)))?,
        };
        if decoded.len() != decoded_size {
            return Err(CellStoreError::Corruption(format!(
                "block decoded to {} bytes, index says {}",
                decoded.len(),
                decoded_size
            )));
        }
        Ok(decoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snappy_shrinks_repetitive_block() {
        let raw = vec![b'a'; 4096];
        let packed = Compression::Snappy.compress(&raw).unwrap();
        assert!(packed.len() < raw.len());
        assert_eq!(Compression::Snappy.decompress(&packed, raw.len()).unwrap(), raw);
    }

    #[test]
    fn test_size_mismatch_is_corruption() {
        let raw = vec![1u8; 10];
        assert!(Compression::None.decompress(&raw, 11).is_err());
    }

    #[test]
    fn test_unknown_codec_id() {
        assert!(Compression::from_codec_id(0).is_err());
        assert_eq!(Compression::from_codec_id(3).unwrap(), Compression::Snappy);
    }
}
