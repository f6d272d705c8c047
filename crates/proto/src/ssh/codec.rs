//! Serialization primitives for the binary packet protocol.
//!
//! Every protocol message is built from a small set of field types
//! (RFC 4251 Section 5):
//!
//! - `byte`, `boolean`
//! - `uint32`, `uint64` (big-endian)
//! - `string` (uint32 length prefix + bytes)
//! - `name-list` (a `string` holding comma-separated names)
//! - `mpint` (a `string` holding a minimally-encoded signed big integer)
//!
//! Nested sub-packets are stored as a `string` whose body is itself an
//! encoded message, so they need no dedicated primitive.
//!
//! All read functions take `(data, &mut offset)`, bounds-check every
//! access, and return [`ScribeError::Protocol`] instead of reading out
//! of range.
//!
//! # Example
//!
//! ```rust
//! use scribe_proto::ssh::codec;
//!
//! let mut buf = Vec::new();
//! codec::write_u32(&mut buf, 42);
//! codec::write_string(&mut buf, b"session");
//!
//! let mut offset = 0;
//! assert_eq!(codec::read_u32(&buf, &mut offset).unwrap(), 42);
//! assert_eq!(codec::read_string(&buf, &mut offset).unwrap(), b"session");
//! ```

use scribe_platform::{ScribeError, ScribeResult};

fn malformed(what: &str) -> ScribeError {
    ScribeError::Protocol(format!("malformed packet: truncated {}", what))
}

/// Writes a single byte.
pub fn write_u8(buf: &mut Vec<u8>, value: u8) {
    buf.push(value);
}

/// Writes a boolean as a single byte (0 or 1).
pub fn write_boolean(buf: &mut Vec<u8>, value: bool) {
    buf.push(u8::from(value));
}

/// Writes a big-endian uint32.
pub fn write_u32(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&value.to_be_bytes());
}

/// Writes a big-endian uint64.
pub fn write_u64(buf: &mut Vec<u8>, value: u64) {
    buf.extend_from_slice(&value.to_be_bytes());
}

/// Writes a length-prefixed byte string.
pub fn write_string(buf: &mut Vec<u8>, value: &[u8]) {
    write_u32(buf, value.len() as u32);
    buf.extend_from_slice(value);
}

/// Writes a comma-separated name-list.
pub fn write_name_list(buf: &mut Vec<u8>, names: &[String]) {
    write_string(buf, names.join(",").as_bytes());
}

/// Writes a minimally-encoded signed mpint from an unsigned magnitude.
///
/// Leading zero bytes are stripped; a `0x00` byte is prepended when the
/// high bit of the first magnitude byte is set, so the value always
/// parses as non-negative. Zero encodes as the empty string.
pub fn write_mpint(buf: &mut Vec<u8>, magnitude: &[u8]) {
    let first = magnitude.iter().position(|&b| b != 0);
    match first {
        None => write_u32(buf, 0),
        Some(start) => {
            let trimmed = &magnitude[start..];
            let pad = (trimmed[0] & 0x80) != 0;
            write_u32(buf, (trimmed.len() + usize::from(pad)) as u32);
            if pad {
                buf.push(0);
            }
            buf.extend_from_slice(trimmed);
        }
    }
}

/// Reads a single byte.
pub fn read_u8(data: &[u8], offset: &mut usize) -> ScribeResult<u8> {
    let value = *data.get(*offset).ok_or_else(|| malformed("byte"))?;
    *offset += 1;
    Ok(value)
}

/// Reads a boolean (any non-zero byte is `true`).
pub fn read_boolean(data: &[u8], offset: &mut usize) -> ScribeResult<bool> {
    Ok(read_u8(data, offset)? != 0)
}

/// Reads a big-endian uint32.
pub fn read_u32(data: &[u8], offset: &mut usize) -> ScribeResult<u32> {
    let end = offset
        .checked_add(4)
        .filter(|&end| end <= data.len())
        .ok_or_else(|| malformed("uint32"))?;
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&data[*offset..end]);
    *offset = end;
    Ok(u32::from_be_bytes(bytes))
}

/// Reads a big-endian uint64.
pub fn read_u64(data: &[u8], offset: &mut usize) -> ScribeResult<u64> {
    let end = offset
        .checked_add(8)
        .filter(|&end| end <= data.len())
        .ok_or_else(|| malformed("uint64"))?;
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&data[*offset..end]);
    *offset = end;
    Ok(u64::from_be_bytes(bytes))
}

/// Reads a length-prefixed byte string.
pub fn read_string(data: &[u8], offset: &mut usize) -> ScribeResult<Vec<u8>> {
    let len = read_u32(data, offset)? as usize;
    let end = offset
        .checked_add(len)
        .filter(|&end| end <= data.len())
        .ok_or_else(|| malformed("string body"))?;
    let value = data[*offset..end].to_vec();
    *offset = end;
    Ok(value)
}

/// Reads a length-prefixed UTF-8 string.
pub fn read_utf8_string(data: &[u8], offset: &mut usize) -> ScribeResult<String> {
    let bytes = read_string(data, offset)?;
    String::from_utf8(bytes)
        .map_err(|_| ScribeError::Protocol("malformed packet: invalid UTF-8 string".to_string()))
}

/// Reads a comma-separated name-list.
pub fn read_name_list(data: &[u8], offset: &mut usize) -> ScribeResult<Vec<String>> {
    let text = read_utf8_string(data, offset)?;
    if text.is_empty() {
        return Ok(Vec::new());
    }
    Ok(text.split(',').map(String::from).collect())
}

/// Reads an mpint, returning the unsigned magnitude with the sign
/// padding byte removed.
///
/// Negative values never appear in this protocol's key-exchange fields,
/// so a set sign bit without padding is rejected.
pub fn read_mpint(data: &[u8], offset: &mut usize) -> ScribeResult<Vec<u8>> {
    let bytes = read_string(data, offset)?;
    if bytes.is_empty() {
        return Ok(Vec::new());
    }
    if bytes[0] & 0x80 != 0 {
        return Err(ScribeError::Protocol(
            "malformed packet: negative mpint".to_string(),
        ));
    }
    let start = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
    Ok(bytes[start..].to_vec())
}
