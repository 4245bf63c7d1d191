//! MySQL wire protocol encoding and decoding primitives.
//!
//! MySQL uses little-endian for all fixed-width integers, plus a
//! "length-encoded" integer format for counts and string lengths.

use crate::error::{Error, Result};
use zerocopy::FromBytes;
use zerocopy::byteorder::little_endian::{U16 as U16LE, U32 as U32LE, U64 as U64LE};

/// Marker byte for a NULL value in text rows (a length-encoded "null").
pub const NULL_MARKER: u8 = 0xFB;

/// Read 1-byte unsigned integer.
#[inline]
pub fn read_u8(data: &[u8]) -> Result<(u8, &[u8])> {
    match data.split_first() {
        Some((&b, rest)) => Ok((b, rest)),
        None => Err(Error::Protocol("read_u8: empty buffer".into())),
    }
}

/// Read 2-byte little-endian unsigned integer.
#[inline]
pub fn read_u16(data: &[u8]) -> Result<(u16, &[u8])> {
    if data.len() < 2 {
        return Err(Error::Protocol(format!(
            "read_u16: buffer too short: {} < 2",
            data.len()
        )));
    }
    let value = U16LE::ref_from_bytes(&data[..2])?.get();
    Ok((value, &data[2..]))
}

/// Read 3-byte little-endian unsigned integer.
#[inline]
pub fn read_u24(data: &[u8]) -> Result<(u32, &[u8])> {
    if data.len() < 3 {
        return Err(Error::Protocol(format!(
            "read_u24: buffer too short: {} < 3",
            data.len()
        )));
    }
    let value = u32::from(data[0]) | (u32::from(data[1]) << 8) | (u32::from(data[2]) << 16);
    Ok((value, &data[3..]))
}

/// Read 4-byte little-endian unsigned integer.
#[inline]
pub fn read_u32(data: &[u8]) -> Result<(u32, &[u8])> {
    if data.len() < 4 {
        return Err(Error::Protocol(format!(
            "read_u32: buffer too short: {} < 4",
            data.len()
        )));
    }
    let value = U32LE::ref_from_bytes(&data[..4])?.get();
    Ok((value, &data[4..]))
}

/// Read 8-byte little-endian unsigned integer.
#[inline]
pub fn read_u64(data: &[u8]) -> Result<(u64, &[u8])> {
    if data.len() < 8 {
        return Err(Error::Protocol(format!(
            "read_u64: buffer too short: {} < 8",
            data.len()
        )));
    }
    let value = U64LE::ref_from_bytes(&data[..8])?.get();
    Ok((value, &data[8..]))
}

/// Read fixed-length bytes.
#[inline]
pub fn read_bytes(data: &[u8], len: usize) -> Result<(&[u8], &[u8])> {
    if data.len() < len {
        return Err(Error::Protocol(format!(
            "read_bytes: buffer too short: {} < {}",
            data.len(),
            len
        )));
    }
    Ok(data.split_at(len))
}

/// Read null-terminated string.
/// Returns the string bytes (without the null terminator) and remaining data.
#[inline]
pub fn read_cstring(data: &[u8]) -> Result<(&[u8], &[u8])> {
    match memchr::memchr(0, data) {
        Some(pos) => Ok((&data[..pos], &data[pos + 1..])),
        None => Err(Error::Protocol(
            "read_cstring: no null terminator found".into(),
        )),
    }
}

/// Read null-terminated string as &str.
#[inline]
pub fn read_cstr(data: &[u8]) -> Result<(&str, &[u8])> {
    let (bytes, rest) = read_cstring(data)?;
    let s = simdutf8::compat::from_utf8(bytes)
        .map_err(|e| Error::Protocol(format!("read_cstr: invalid UTF-8: {e}")))?;
    Ok((s, rest))
}

/// Read a length-encoded integer that may be the NULL marker.
///
/// Returns `None` for `0xFB`.
#[inline]
pub fn read_lenenc_int_nullable(data: &[u8]) -> Result<(Option<u64>, &[u8])> {
    let (first, rest) = read_u8(data)?;
    match first {
        0x00..=0xFA => Ok((Some(u64::from(first)), rest)),
        0xFB => Ok((None, rest)),
        0xFC => {
            let (v, rest) = read_u16(rest)?;
            Ok((Some(u64::from(v)), rest))
        }
        0xFD => {
            let (v, rest) = read_u24(rest)?;
            Ok((Some(u64::from(v)), rest))
        }
        0xFE => {
            let (v, rest) = read_u64(rest)?;
            Ok((Some(v), rest))
        }
        0xFF => Err(Error::Protocol(
            "read_lenenc_int: 0xFF is not a valid length prefix".into(),
        )),
    }
}

/// Read a length-encoded integer.
#[inline]
pub fn read_lenenc_int(data: &[u8]) -> Result<(u64, &[u8])> {
    match read_lenenc_int_nullable(data)? {
        (Some(v), rest) => Ok((v, rest)),
        (None, _) => Err(Error::Protocol(
            "read_lenenc_int: unexpected NULL marker".into(),
        )),
    }
}

/// Read a length-encoded byte string.
#[inline]
pub fn read_lenenc_bytes(data: &[u8]) -> Result<(&[u8], &[u8])> {
    let (len, rest) = read_lenenc_int(data)?;
    let len = usize::try_from(len)
        .map_err(|_| Error::Protocol(format!("read_lenenc_bytes: length {len} too large")))?;
    read_bytes(rest, len)
}

/// Read a length-encoded byte string that may be NULL (text row values).
#[inline]
pub fn read_lenenc_bytes_nullable(data: &[u8]) -> Result<(Option<&[u8]>, &[u8])> {
    match read_lenenc_int_nullable(data)? {
        (None, rest) => Ok((None, rest)),
        (Some(len), rest) => {
            let len = usize::try_from(len).map_err(|_| {
                Error::Protocol(format!("read_lenenc_bytes: length {len} too large"))
            })?;
            let (bytes, rest) = read_bytes(rest, len)?;
            Ok((Some(bytes), rest))
        }
    }
}

/// Write 1-byte unsigned integer.
#[inline]
pub fn write_u8(out: &mut Vec<u8>, value: u8) {
    out.push(value);
}

/// Write 2-byte little-endian unsigned integer.
#[inline]
pub fn write_u16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_le_bytes());
}

/// Write 3-byte little-endian unsigned integer.
#[inline]
pub fn write_u24(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes()[..3]);
}

/// Write 4-byte little-endian unsigned integer.
#[inline]
pub fn write_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

/// Write 8-byte little-endian unsigned integer.
#[inline]
pub fn write_u64(out: &mut Vec<u8>, value: u64) {
    out.extend_from_slice(&value.to_le_bytes());
}

/// Write raw bytes.
#[inline]
pub fn write_bytes(out: &mut Vec<u8>, data: &[u8]) {
    out.extend_from_slice(data);
}

/// Write null-terminated string.
#[inline]
pub fn write_cstring(out: &mut Vec<u8>, s: &[u8]) {
    out.extend_from_slice(s);
    out.push(0);
}

/// Write a length-encoded integer.
#[inline]
pub fn write_lenenc_int(out: &mut Vec<u8>, value: u64) {
    if value < 0xFB {
        out.push(value as u8);
    } else if value <= 0xFFFF {
        out.push(0xFC);
        write_u16(out, value as u16);
    } else if value <= 0xFF_FFFF {
        out.push(0xFD);
        write_u24(out, value as u32);
    } else {
        out.push(0xFE);
        write_u64(out, value);
    }
}

/// Write a length-encoded byte string.
#[inline]
pub fn write_lenenc_bytes(out: &mut Vec<u8>, data: &[u8]) {
    write_lenenc_int(out, data.len() as u64);
    out.extend_from_slice(data);
}
