//! Checked big-endian primitives and variable-length integers
//!
//! `bytes::Buf` getters panic on short input; these wrappers turn a short
//! buffer into a corruption error instead.

use bytes::{Buf, BufMut, Bytes};

use crate::error::{CellStoreError, Result};

fn need(buf: &[u8], n: usize, what: &str) -> Result<()> {
    if buf.remaining() < n {
        return Err(CellStoreError::Corruption(format!(
            "truncated {}: need {} bytes, have {}",
            what,
            n,
            buf.remaining()
        )));
    }
    Ok(())
}

pub(crate) fn get_i32(buf: &mut &[u8], what: &str) -> Result<i32> {
    need(buf, 4, what)?;
    Ok(buf.get_i32())
}

pub(crate) fn get_i64(buf: &mut &[u8], what: &str) -> Result<i64> {
    need(buf, 8, what)?;
    Ok(buf.get_i64())
}

pub(crate) fn get_u8(buf: &mut &[u8], what: &str) -> Result<u8> {
    need(buf, 1, what)?;
    Ok(buf.get_u8())
}

/// Write a variable-length signed integer (1 to 9 bytes)
pub(crate) fn put_vlong(buf: &mut impl BufMut, value: i64) {
    if (-112..=127).contains(&value) {
        buf.put_i8(value as i8);
        return;
    }

    let mut v = value;
    let mut len: i32 = -112;
    if v < 0 {
        v ^= -1;
        len = -120;
    }
    let mut tmp = v;
    while tmp != 0 {
        tmp >>= 8;
        len -= 1;
    }
    buf.put_i8(len as i8);

    let bytes = if len < -120 { -(len + 120) } else { -(len + 112) };
    for idx in (1..=bytes).rev() {
        let shift = (idx - 1) * 8;
        buf.put_u8(((v >> shift) & 0xFF) as u8);
    }
}

/// Read a variable-length signed integer
pub(crate) fn get_vlong(buf: &mut &[u8], what: &str) -> Result<i64> {
    let first = get_u8(buf, what)? as i8;
    if first >= -112 {
        return Ok(first as i64);
    }

    let negative = first < -120;
    let len: i32 = if negative {
        -120 - first as i32
    } else {
        -112 - first as i32
    };
    let len = len as usize;
    need(buf, len, what)?;

    let mut v: i64 = 0;
    for _ in 0..len {
        v = (v << 8) | buf.get_u8() as i64;
    }
    Ok(if negative { v ^ -1 } else { v })
}

/// Write a vlong length prefix followed by the bytes
pub(crate) fn put_byte_array(buf: &mut impl BufMut, bytes: &[u8]) {
    put_vlong(buf, bytes.len() as i64);
    buf.put_slice(bytes);
}

/// Read a vlong-length-prefixed byte array, sharing the source buffer
pub(crate) fn get_byte_array(source: &Bytes, buf: &mut &[u8], what: &str) -> Result<Bytes> {
    let len = get_vlong(buf, what)?;
    if len < 0 {
        return Err(CellStoreError::Corruption(format!(
            "negative length {} for {}",
            len, what
        )));
    }
    let len = len as usize;
    need(buf, len, what)?;
    let start = source.len() - buf.remaining();
    let out = source.slice(start..start + len);
    buf.advance(len);
    Ok(out)
}
