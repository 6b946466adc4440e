//! Data input traits and implementations for Geode's binary format.

use crate::error::{GeodeError, Result};
use crate::serialization::{modified_utf8, DsCode};
use bytes::Buf;
use std::io::Cursor;

/// Trait for reading primitive values from Geode's binary format.
///
/// All multi-byte values are read in big-endian byte order.
pub trait DataInput {
    /// Reads a single byte (i8).
    fn read_byte(&mut self) -> Result<i8>;

    /// Reads a boolean from a single byte.
    fn read_bool(&mut self) -> Result<bool>;

    /// Reads a 16-bit signed integer in big-endian order.
    fn read_short(&mut self) -> Result<i16>;

    /// Reads a 32-bit signed integer in big-endian order.
    fn read_int(&mut self) -> Result<i32>;

    /// Reads a 64-bit signed integer in big-endian order.
    fn read_long(&mut self) -> Result<i64>;

    /// Reads a 32-bit floating point in big-endian order.
    fn read_float(&mut self) -> Result<f32>;

    /// Reads a 64-bit floating point in big-endian order.
    fn read_double(&mut self) -> Result<f64>;

    /// Reads the specified number of raw bytes.
    fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>>;

    /// Reads a single unsigned byte.
    fn read_unsigned_byte(&mut self) -> Result<u8> {
        Ok(self.read_byte()? as u8)
    }

    /// Reads an unsigned 16-bit integer.
    fn read_unsigned_short(&mut self) -> Result<u16> {
        Ok(self.read_short()? as u16)
    }

    /// Skips `len` bytes.
    fn skip(&mut self, len: usize) -> Result<()> {
        self.read_bytes(len).map(|_| ())
    }

    /// Reads a variable-width array length; `-1` denotes a null array.
    fn read_array_len(&mut self) -> Result<i32> {
        match self.read_unsigned_byte()? {
            0xFF => Ok(-1),
            0xFE => Ok(self.read_unsigned_short()? as i32),
            0xFD => self.read_int(),
            n => Ok(n as i32),
        }
    }

    /// Reads an unsigned variable-length integer, seven bits per byte with
    /// the low group first.
    fn read_unsigned_vl(&mut self) -> Result<u64> {
        let mut result = 0u64;
        let mut shift = 0;
        while shift < 64 {
            let b = self.read_unsigned_byte()?;
            result |= u64::from(b & 0x7F) << shift;
            if b & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
        }
        Err(GeodeError::Serialization(
            "malformed variable length integer".to_string(),
        ))
    }

    /// Reads a length-prefixed byte array, `None` for a null array.
    fn read_byte_array(&mut self) -> Result<Option<Vec<u8>>> {
        let len = self.read_array_len()?;
        if len < 0 {
            return Ok(None);
        }
        self.read_bytes(len as usize).map(Some)
    }

    /// Reads a `u16` length-prefixed modified UTF-8 string.
    fn read_utf(&mut self) -> Result<String> {
        let len = self.read_unsigned_short()? as usize;
        let bytes = self.read_bytes(len)?;
        modified_utf8::decode(&bytes)
    }

    /// Reads a string preceded by its type code, `None` for a null string.
    fn read_nullable_string(&mut self) -> Result<Option<String>> {
        let code = self.read_unsigned_byte()?;
        match DsCode::try_from(code) {
            Ok(DsCode::NullString) | Ok(DsCode::NullObj) => Ok(None),
            Ok(DsCode::AsciiString) => {
                let len = self.read_unsigned_short()? as usize;
                ascii(self.read_bytes(len)?).map(Some)
            }
            Ok(DsCode::AsciiStringHuge) => {
                let len = non_negative(self.read_int()?)?;
                ascii(self.read_bytes(len)?).map(Some)
            }
            Ok(DsCode::CacheableString) => self.read_utf().map(Some),
            Ok(DsCode::StringHuge) => {
                let len = non_negative(self.read_int()?)?;
                let mut units = Vec::with_capacity(len);
                for _ in 0..len {
                    units.push(self.read_unsigned_short()?);
                }
                String::from_utf16(&units).map(Some).map_err(|e| {
                    GeodeError::Serialization(format!("invalid UTF-16 string: {}", e))
                })
            }
            _ => Err(GeodeError::Serialization(format!(
                "expected a string type code, got {}",
                code
            ))),
        }
    }

    /// Reads a typed string; a null string reads as empty.
    fn read_string(&mut self) -> Result<String> {
        Ok(self.read_nullable_string()?.unwrap_or_default())
    }
}

fn non_negative(len: i32) -> Result<usize> {
    if len < 0 {
        return Err(GeodeError::Serialization(format!(
            "invalid string length: {}",
            len
        )));
    }
    Ok(len as usize)
}

fn ascii(bytes: Vec<u8>) -> Result<String> {
    String::from_utf8(bytes)
        .map_err(|e| GeodeError::Serialization(format!("invalid ASCII string: {}", e)))
}

/// A buffer-based implementation of `DataInput`.
#[derive(Debug)]
pub struct ObjectDataInput<'a> {
    cursor: Cursor<&'a [u8]>,
}

impl<'a> ObjectDataInput<'a> {
    /// Creates a new `ObjectDataInput` from the given byte slice.
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            cursor: Cursor::new(data),
        }
    }

    /// Returns the number of bytes remaining to be read.
    pub fn remaining(&self) -> usize {
        self.cursor.remaining()
    }

    /// Returns the current position in the buffer.
    pub fn position(&self) -> u64 {
        self.cursor.position()
    }

    /// Returns the unread bytes without consuming them.
    pub fn remaining_slice(&self) -> &'a [u8] {
        let data: &'a [u8] = *self.cursor.get_ref();
        &data[self.cursor.position() as usize..]
    }

    fn ensure_remaining(&self, n: usize) -> Result<()> {
        if self.cursor.remaining() < n {
            Err(GeodeError::Serialization(format!(
                "insufficient data: need {} bytes, have {}",
                n,
                self.cursor.remaining()
            )))
        } else {
            Ok(())
        }
    }
}

impl DataInput for ObjectDataInput<'_> {
    fn read_byte(&mut self) -> Result<i8> {
        self.ensure_remaining(1)?;
        Ok(self.cursor.get_i8())
    }

    fn read_bool(&mut self) -> Result<bool> {
        self.ensure_remaining(1)?;
        Ok(self.cursor.get_u8() != 0)
    }

    fn read_short(&mut self) -> Result<i16> {
        self.ensure_remaining(2)?;
        Ok(self.cursor.get_i16())
    }

    fn read_int(&mut self) -> Result<i32> {
        self.ensure_remaining(4)?;
        Ok(self.cursor.get_i32())
    }

    fn read_long(&mut self) -> Result<i64> {
        self.ensure_remaining(8)?;
        Ok(self.cursor.get_i64())
    }

    fn read_float(&mut self) -> Result<f32> {
        self.ensure_remaining(4)?;
        Ok(self.cursor.get_f32())
    }

    fn read_double(&mut self) -> Result<f64> {
        self.ensure_remaining(8)?;
        Ok(self.cursor.get_f64())
    }

    fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        self.ensure_remaining(len)?;
        let mut buf = vec![0u8; len];
        self.cursor.copy_to_slice(&mut buf);
        Ok(buf)
    }

    fn skip(&mut self, len: usize) -> Result<()> {
        self.ensure_remaining(len)?;
        self.cursor.advance(len);
        Ok(())
    }
}
