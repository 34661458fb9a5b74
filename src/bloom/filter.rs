//! Byte-array bloom filter
//!
//! Sizing:
//!   bits   = ceil(n * ln(p) / ln(0.6185))
//!   hashes = ceil(ln(2) * bits / n)
//!
//! The byte size is rounded up to a multiple of `2^MAX_FOLD` so the filter
//! can later be folded in half up to `MAX_FOLD` times. Hash `i` checks bit
//! `(h1 + i * h2) mod (byte_size * 8)`. Because every folded size divides the
//! original one, folding by OR-ing halves keeps every set bit reachable.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use xxhash_rust::xxh3::xxh3_128;

use crate::error::{CellStoreError, Result};

/// Serialized meta format version
const VERSION: i32 = 1;

/// Hash type id for the split xxh3-128 hash
const HASH_TYPE_XXH3: i32 = 1;

/// Maximum number of times a filter may be halved
const MAX_FOLD: u32 = 7;

/// Size of the encoded meta block
pub const META_SIZE: usize = 4 * 5;

/// Parameters needed to query a serialized bit array
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BloomMeta {
    pub version: i32,
    pub byte_size: i32,
    pub hash_count: i32,
    pub hash_type: i32,
    pub key_count: i32,
}

impl BloomMeta {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(META_SIZE);
        buf.put_i32(self.version);
        buf.put_i32(self.byte_size);
        buf.put_i32(self.hash_count);
        buf.put_i32(self.hash_type);
        buf.put_i32(self.key_count);
        buf.freeze()
    }

    pub fn decode(mut data: &[u8]) -> Result<Self> {
        if data.len() < META_SIZE {
            return Err(CellStoreError::Corruption(format!(
                "bloom meta too short: {} bytes",
                data.len()
            )));
        }
        let meta = Self {
            version: data.get_i32(),
            byte_size: data.get_i32(),
            hash_count: data.get_i32(),
            hash_type: data.get_i32(),
            key_count: data.get_i32(),
        };
        if meta.version != VERSION {
            return Err(CellStoreError::Corruption(format!(
                "unsupported bloom version {}",
                meta.version
            )));
        }
        if meta.hash_type != HASH_TYPE_XXH3 {
            return Err(CellStoreError::Corruption(format!(
                "unsupported bloom hash type {}",
                meta.hash_type
            )));
        }
        if meta.byte_size <= 0 || meta.hash_count <= 0 {
            return Err(CellStoreError::Corruption(format!(
                "invalid bloom geometry: {} bytes, {} hashes",
                meta.byte_size, meta.hash_count
            )));
        }
        Ok(meta)
    }
}

/// Bloom filter over a plain byte array
#[derive(Debug, Clone)]
pub struct BloomFilter {
    bits: Vec<u8>,
    hash_count: u32,
    max_keys: usize,
    key_count: usize,
}

impl BloomFilter {
    /// Create a filter provisioned for `max_keys` at `error_rate`
    pub fn new(max_keys: usize, error_rate: f64) -> Result<Self> {
        if max_keys == 0 {
            return Err(CellStoreError::Config("bloom max_keys must be > 0".into()));
        }
        if !(error_rate > 0.0 && error_rate < 1.0) {
            return Err(CellStoreError::Config(format!(
                "bloom error rate must lie in (0, 1), got {}",
                error_rate
            )));
        }

        let (bit_size, hash_count) = Self::compute_geometry(max_keys, error_rate);

        // Round up so the array can be folded MAX_FOLD times
        let fold_unit = 1usize << MAX_FOLD;
        let mut byte_size = bit_size.div_ceil(8);
        if byte_size % fold_unit != 0 {
            byte_size = (byte_size / fold_unit + 1) * fold_unit;
        }

        Ok(Self {
            bits: vec![0u8; byte_size],
            hash_count,
            max_keys,
            key_count: 0,
        })
    }

    /// Bit count and hash-function count for the given parameters
    pub fn compute_geometry(max_keys: usize, error_rate: f64) -> (usize, u32) {
        let n = max_keys as f64;
        let bit_size = (n * (error_rate.ln() / 0.6185f64.ln())).ceil().max(8.0);
        let hash_count = (std::f64::consts::LN_2 * (bit_size / n)).ceil().max(1.0);
        (bit_size as usize, hash_count as u32)
    }

    /// Rebuild a filter from its serialized meta and data blocks
    pub fn from_parts(meta: &BloomMeta, data: &[u8]) -> Result<Self> {
        if data.len() != meta.byte_size as usize {
            return Err(CellStoreError::Corruption(format!(
                "bloom data is {} bytes, meta says {}",
                data.len(),
                meta.byte_size
            )));
        }
        Ok(Self {
            bits: data.to_vec(),
            hash_count: meta.hash_count as u32,
            max_keys: meta.key_count.max(1) as usize,
            key_count: meta.key_count as usize,
        })
    }

    /// Add a key; every hashed bit is set
    pub fn add(&mut self, key: &[u8]) {
        let (h1, h2) = hash_key(key);
        let bit_count = self.bit_count();
        for i in 0..self.hash_count {
            let pos = bit_position(h1, h2, i, bit_count);
            self.bits[(pos / 8) as usize] |= 1 << (pos % 8);
        }
        self.key_count += 1;
    }

    /// `false` means the key was definitely never added
    pub fn contains(&self, key: &[u8]) -> bool {
        contains_in(&self.bits, self.hash_count, key)
    }

    /// Fold the array in half, at most `MAX_FOLD` times, while it is evenly
    /// sized and less than half of the provisioned keys were added
    pub fn compact(&mut self) {
        if self.key_count == 0 {
            return;
        }

        let mut pieces = 1usize;
        let mut new_byte_size = self.bits.len();
        let mut new_max_keys = self.max_keys;
        while pieces < (1 << MAX_FOLD)
            && new_byte_size % 2 == 0
            && new_max_keys > (self.key_count << 1)
        {
            pieces <<= 1;
            new_byte_size >>= 1;
            new_max_keys >>= 1;
        }

        if pieces > 1 {
            let (head, tail) = self.bits.split_at_mut(new_byte_size);
            for piece in tail.chunks(new_byte_size) {
                for (dst, src) in head.iter_mut().zip(piece) {
                    *dst |= *src;
                }
            }
            self.bits.truncate(new_byte_size);
            self.max_keys = new_max_keys;
        }
    }

    pub fn meta(&self) -> BloomMeta {
        BloomMeta {
            version: VERSION,
            byte_size: self.bits.len() as i32,
            hash_count: self.hash_count as i32,
            hash_type: HASH_TYPE_XXH3,
            key_count: self.key_count as i32,
        }
    }

    /// Raw bit array (the data block)
    pub fn data(&self) -> &[u8] {
        &self.bits
    }

    pub fn byte_size(&self) -> usize {
        self.bits.len()
    }

    pub fn hash_count(&self) -> u32 {
        self.hash_count
    }

    pub fn key_count(&self) -> usize {
        self.key_count
    }

    pub fn max_keys(&self) -> usize {
        self.max_keys
    }

    fn bit_count(&self) -> u64 {
        self.bits.len() as u64 * 8
    }
}

/// Query a serialized bit array without materializing a filter
pub fn contains_in(bits: &[u8], hash_count: u32, key: &[u8]) -> bool {
    if bits.is_empty() {
        return true;
    }
    let (h1, h2) = hash_key(key);
    let bit_count = bits.len() as u64 * 8;
    (0..hash_count).all(|i| {
        let pos = bit_position(h1, h2, i, bit_count);
        bits[(pos / 8) as usize] & (1 << (pos % 8)) != 0
    })
}

/// Split a 128-bit hash into the two base hashes
fn hash_key(key: &[u8]) -> (u64, u64) {
    let hash = xxh3_128(key);
    (hash as u64, (hash >> 64) as u64)
}

fn bit_position(h1: u64, h2: u64, i: u32, bit_count: u64) -> u64 {
    h1.wrapping_add((i as u64).wrapping_mul(h2)) % bit_count
}
