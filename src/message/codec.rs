//! Binary encoding primitives
//!
//! Little-endian integers, length-prefixed byte strings (`-1` is null) and
//! OPC UA DateTime values (100 ns ticks since 1601-01-01 UTC). Every reader
//! checks the remaining length first and fails with `BadDecodingError`
//! instead of panicking on a short buffer.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use chrono::{DateTime, Utc};

use crate::status::{Error, Result};

/// Ticks between 1601-01-01 and 1970-01-01
const UNIX_EPOCH_TICKS: i64 = 116_444_736_000_000_000;
const TICKS_PER_SECOND: i64 = 10_000_000;

/// Longest byte string accepted while decoding
pub const MAX_BYTE_STRING_LENGTH: usize = 16 * 1024 * 1024;

fn ensure(buf: &Bytes, needed: usize, what: &str) -> Result<()> {
    if buf.remaining() < needed {
        return Err(Error::decoding(format!(
            "{} needs {} bytes, {} left",
            what,
            needed,
            buf.remaining()
        )));
    }
    Ok(())
}

pub fn read_u8(buf: &mut Bytes) -> Result<u8> {
    ensure(buf, 1, "byte")?;
    Ok(buf.get_u8())
}

pub fn read_u32(buf: &mut Bytes) -> Result<u32> {
    ensure(buf, 4, "uint32")?;
    Ok(buf.get_u32_le())
}

pub fn read_i32(buf: &mut Bytes) -> Result<i32> {
    ensure(buf, 4, "int32")?;
    Ok(buf.get_i32_le())
}

pub fn read_i64(buf: &mut Bytes) -> Result<i64> {
    ensure(buf, 8, "int64")?;
    Ok(buf.get_i64_le())
}

/// Write a nullable byte string
pub fn write_byte_string(buf: &mut BytesMut, value: Option<&[u8]>) {
    match value {
        Some(bytes) => {
            buf.put_i32_le(bytes.len() as i32);
            buf.put_slice(bytes);
        }
        None => buf.put_i32_le(-1),
    }
}

/// Read a nullable byte string
pub fn read_byte_string(buf: &mut Bytes) -> Result<Option<Bytes>> {
    let length = read_i32(buf)?;
    if length < 0 {
        return Ok(None);
    }
    let length = length as usize;
    if length > MAX_BYTE_STRING_LENGTH {
        return Err(Error::decoding(format!("byte string of {} bytes", length)));
    }
    ensure(buf, length, "byte string")?;
    Ok(Some(buf.split_to(length)))
}

/// Encoded length of a nullable byte string
pub fn byte_string_len(value: Option<&[u8]>) -> usize {
    4 + value.map_or(0, <[u8]>::len)
}

pub fn write_string(buf: &mut BytesMut, value: &str) {
    write_byte_string(buf, Some(value.as_bytes()));
}

/// Read a string; null decodes as empty
pub fn read_string(buf: &mut Bytes) -> Result<String> {
    match read_byte_string(buf)? {
        Some(bytes) => String::from_utf8(bytes.to_vec())
            .map_err(|_| Error::decoding("string is not valid UTF-8")),
        None => Ok(String::new()),
    }
}

/// Convert a timestamp to OPC UA ticks
pub fn to_ticks(time: DateTime<Utc>) -> i64 {
    time.timestamp() * TICKS_PER_SECOND
        + i64::from(time.timestamp_subsec_nanos() / 100)
        + UNIX_EPOCH_TICKS
}

/// Convert OPC UA ticks to a timestamp
pub fn from_ticks(ticks: i64) -> Result<DateTime<Utc>> {
    let unix_ticks = ticks - UNIX_EPOCH_TICKS;
    let seconds = unix_ticks.div_euclid(TICKS_PER_SECOND);
    let nanos = (unix_ticks.rem_euclid(TICKS_PER_SECOND) * 100) as u32;
    DateTime::from_timestamp(seconds, nanos)
        .ok_or_else(|| Error::decoding(format!("DateTime {} out of range", ticks)))
}

pub fn write_date_time(buf: &mut BytesMut, time: DateTime<Utc>) {
    buf.put_i64_le(to_ticks(time));
}

pub fn read_date_time(buf: &mut Bytes) -> Result<DateTime<Utc>> {
    from_ticks(read_i64(buf)?)
}
