//! File info block
//!
//! A sorted map of byte keys to byte values. Serialized as an i32 entry
//! count followed by vlong-prefixed key and value pairs. Keys starting with
//! `hfile.` are reserved for the writer itself.

use std::collections::BTreeMap;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{CellStoreError, Result};

use super::codec::{get_byte_array, get_i32, put_byte_array};

pub const RESERVED_PREFIX: &[u8] = b"hfile.";
pub const LASTKEY: &[u8] = b"hfile.LASTKEY";
pub const AVG_KEY_LEN: &[u8] = b"hfile.AVG_KEY_LEN";
pub const AVG_VALUE_LEN: &[u8] = b"hfile.AVG_VALUE_LEN";
pub const COMPARATOR: &[u8] = b"hfile.COMPARATOR";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileInfo {
    entries: BTreeMap<Bytes, Bytes>,
}

impl FileInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &[u8]) -> Option<&Bytes> {
        self.entries.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Bytes, &Bytes)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Add a caller entry; reserved keys are refused
    pub fn append(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(CellStoreError::Config("file info key must not be empty".into()));
        }
        if key.starts_with(RESERVED_PREFIX) {
            return Err(CellStoreError::Config(format!(
                "file info key {} uses the reserved prefix",
                String::from_utf8_lossy(key)
            )));
        }
        self.insert_reserved(key, value);
        Ok(())
    }

    pub(crate) fn insert_reserved(&mut self, key: &[u8], value: &[u8]) {
        self.entries
            .insert(Bytes::copy_from_slice(key), Bytes::copy_from_slice(value));
    }

    /// Read a big-endian i32 value
    pub fn get_i32(&self, key: &[u8]) -> Option<i32> {
        let value = self.entries.get(key)?;
        let bytes: [u8; 4] = value.as_ref().try_into().ok()?;
        Some(i32::from_be_bytes(bytes))
    }

    /// Read a big-endian i64 value
    pub fn get_i64(&self, key: &[u8]) -> Option<i64> {
        let value = self.entries.get(key)?;
        let bytes: [u8; 8] = value.as_ref().try_into().ok()?;
        Some(i64::from_be_bytes(bytes))
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_i32(self.entries.len() as i32);
        for (key, value) in &self.entries {
            put_byte_array(&mut buf, key);
            put_byte_array(&mut buf, value);
        }
        buf.to_vec()
    }

    pub fn decode(data: Bytes) -> Result<Self> {
        let mut buf: &[u8] = &data;
        let count = get_i32(&mut buf, "file info count")?;
        if count < 0 {
            return Err(CellStoreError::Corruption(format!(
                "negative file info count {}",
                count
            )));
        }
        let mut entries = BTreeMap::new();
        for _ in 0..count {
            let key = get_byte_array(&data, &mut buf, "file info key")?;
            let value = get_byte_array(&data, &mut buf, "file info value")?;
            entries.insert(key, value);
        }
        Ok(Self { entries })
    }
}
