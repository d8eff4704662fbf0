//! Primitive payload encoding helpers.
//!
//! Strings are a `u32` little-endian byte length followed by UTF-8 bytes;
//! optional values are a presence byte followed by the value; maps are a
//! `u32` entry count followed by key/value string pairs. Truncated or
//! malformed input surfaces as [`AppError::Protocol`], never as a panic.

use std::collections::BTreeMap;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{AppError, Result};

/// Append a length-prefixed UTF-8 string.
pub fn put_str(buf: &mut BytesMut, value: &str) {
    put_len(buf, value.len());
    buf.put_slice(value.as_bytes());
}

/// Append a presence-flagged optional string.
pub fn put_opt_str(buf: &mut BytesMut, value: Option<&str>) {
    match value {
        Some(value) => {
            buf.put_u8(1);
            put_str(buf, value);
        }
        None => buf.put_u8(0),
    }
}

/// Append a counted string map in key order.
pub fn put_map(buf: &mut BytesMut, map: &BTreeMap<String, String>) {
    put_len(buf, map.len());
    for (key, value) in map {
        put_str(buf, key);
        put_str(buf, value);
    }
}

/// Append a presence-flagged optional string map.
pub fn put_opt_map(buf: &mut BytesMut, map: Option<&BTreeMap<String, String>>) {
    match map {
        Some(map) => {
            buf.put_u8(1);
            put_map(buf, map);
        }
        None => buf.put_u8(0),
    }
}

fn put_len(buf: &mut BytesMut, len: usize) {
    // Payloads are bounded well below u32::MAX by the framing layer; a
    // single oversized string would be rejected there as well.
    let len = u32::try_from(len).unwrap_or(u32::MAX);
    buf.put_u32_le(len);
}

/// Checked sequential reader over a frame payload.
#[derive(Debug)]
pub struct Reader {
    buf: Bytes,
}

impl Reader {
    /// Wrap a payload for sequential decoding.
    #[must_use]
    pub fn new(buf: Bytes) -> Self {
        Self { buf }
    }

    /// Read one byte.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Protocol`] on truncated input.
    pub fn u8(&mut self) -> Result<u8> {
        self.take(1).map(|b| b[0])
    }

    /// Read a little-endian `u16`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Protocol`] on truncated input.
    pub fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    /// Read a little-endian `u32`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Protocol`] on truncated input.
    pub fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Read a little-endian `i32`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Protocol`] on truncated input.
    pub fn i32(&mut self) -> Result<i32> {
        let b = self.take(4)?;
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Read a presence byte.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Protocol`] on truncated input or a flag byte
    /// other than 0 or 1.
    pub fn bool(&mut self) -> Result<bool> {
        match self.u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(AppError::Protocol(format!("invalid presence byte {other}"))),
        }
    }

    /// Read a length-prefixed UTF-8 string.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Protocol`] on truncated input or invalid UTF-8.
    pub fn str(&mut self) -> Result<String> {
        let len = self.len_prefix()?;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|err| AppError::Protocol(format!("invalid utf-8 string: {err}")))
    }

    /// Read a presence-flagged optional string.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Protocol`] on truncated or malformed input.
    pub fn opt_str(&mut self) -> Result<Option<String>> {
        if self.bool()? {
            Ok(Some(self.str()?))
        } else {
            Ok(None)
        }
    }

    /// Read a counted string map.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Protocol`] on truncated or malformed input.
    pub fn map(&mut self) -> Result<BTreeMap<String, String>> {
        let count = self.len_prefix()?;
        let mut map = BTreeMap::new();
        for _ in 0..count {
            let key = self.str()?;
            let value = self.str()?;
            map.insert(key, value);
        }
        Ok(map)
    }

    /// Read a presence-flagged optional string map.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Protocol`] on truncated or malformed input.
    pub fn opt_map(&mut self) -> Result<Option<BTreeMap<String, String>>> {
        if self.bool()? {
            Ok(Some(self.map()?))
        } else {
            Ok(None)
        }
    }

    /// Assert the payload was consumed exactly.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Protocol`] when trailing bytes remain.
    pub fn finish(self) -> Result<()> {
        if self.buf.is_empty() {
            Ok(())
        } else {
            Err(AppError::Protocol(format!(
                "{} trailing bytes after payload",
                self.buf.len()
            )))
        }
    }

    fn len_prefix(&mut self) -> Result<usize> {
        let len = self.u32()?;
        usize::try_from(len)
            .map_err(|_| AppError::Protocol(format!("length prefix {len} overflows this platform")))
    }

    fn take(&mut self, len: usize) -> Result<Bytes> {
        if self.buf.remaining() < len {
            return Err(AppError::Protocol(format!(
                "payload truncated: wanted {len} bytes, {} remain",
                self.buf.remaining()
            )));
        }
        Ok(self.buf.split_to(len))
    }
}
