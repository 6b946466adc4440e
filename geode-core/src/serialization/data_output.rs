//! Data output traits and implementations for Geode's binary format.

use crate::error::Result;
use crate::serialization::{modified_utf8, DsCode};
use bytes::{BufMut, Bytes, BytesMut};

/// Trait for writing primitive values in Geode's binary format.
///
/// All multi-byte values are written in big-endian byte order.
pub trait DataOutput {
    /// Writes a single byte (i8).
    fn write_byte(&mut self, v: i8) -> Result<()>;

    /// Writes a boolean as a single byte (0 for false, 1 for true).
    fn write_bool(&mut self, v: bool) -> Result<()>;

    /// Writes a 16-bit signed integer in big-endian order.
    fn write_short(&mut self, v: i16) -> Result<()>;

    /// Writes a 32-bit signed integer in big-endian order.
    fn write_int(&mut self, v: i32) -> Result<()>;

    /// Writes a 64-bit signed integer in big-endian order.
    fn write_long(&mut self, v: i64) -> Result<()>;

    /// Writes a 32-bit floating point in big-endian order.
    fn write_float(&mut self, v: f32) -> Result<()>;

    /// Writes a 64-bit floating point in big-endian order.
    fn write_double(&mut self, v: f64) -> Result<()>;

    /// Writes raw bytes without length prefix.
    fn write_bytes(&mut self, v: &[u8]) -> Result<()>;

    /// Writes a single unsigned byte.
    fn write_unsigned_byte(&mut self, v: u8) -> Result<()> {
        self.write_byte(v as i8)
    }

    /// Writes a variable-width array length; negative lengths mean null.
    fn write_array_len(&mut self, len: i32) -> Result<()> {
        if len < 0 {
            self.write_unsigned_byte(0xFF)
        } else if len <= 252 {
            self.write_unsigned_byte(len as u8)
        } else if len <= 0xFFFF {
            self.write_unsigned_byte(0xFE)?;
            self.write_short(len as u16 as i16)
        } else {
            self.write_unsigned_byte(0xFD)?;
            self.write_int(len)
        }
    }

    /// Writes an unsigned variable-length integer, seven bits per byte with
    /// the low group first.
    fn write_unsigned_vl(&mut self, mut v: u64) -> Result<()> {
        while v >= 0x80 {
            self.write_unsigned_byte((v as u8 & 0x7F) | 0x80)?;
            v >>= 7;
        }
        self.write_unsigned_byte(v as u8)
    }

    /// Writes a length-prefixed byte array; `None` writes a null array.
    fn write_byte_array(&mut self, v: Option<&[u8]>) -> Result<()> {
        match v {
            Some(bytes) => {
                self.write_array_len(bytes.len() as i32)?;
                self.write_bytes(bytes)
            }
            None => self.write_array_len(-1),
        }
    }

    /// Writes a `u16` length-prefixed modified UTF-8 string.
    fn write_utf(&mut self, v: &str) -> Result<()> {
        let encoded = modified_utf8::encode(v);
        self.write_short(encoded.len() as u16 as i16)?;
        self.write_bytes(&encoded)
    }

    /// Writes a string preceded by the narrowest type code that fits it.
    fn write_string(&mut self, v: &str) -> Result<()> {
        if v.is_ascii() {
            if v.len() <= u16::MAX as usize {
                self.write_unsigned_byte(DsCode::AsciiString as u8)?;
                self.write_short(v.len() as u16 as i16)?;
            } else {
                self.write_unsigned_byte(DsCode::AsciiStringHuge as u8)?;
                self.write_int(v.len() as i32)?;
            }
            return self.write_bytes(v.as_bytes());
        }

        if modified_utf8::encoded_len(v) <= u16::MAX as usize {
            self.write_unsigned_byte(DsCode::CacheableString as u8)?;
            self.write_utf(v)
        } else {
            let units: Vec<u16> = v.encode_utf16().collect();
            self.write_unsigned_byte(DsCode::StringHuge as u8)?;
            self.write_int(units.len() as i32)?;
            for unit in units {
                self.write_short(unit as i16)?;
            }
            Ok(())
        }
    }

    /// Writes a null string marker.
    fn write_null_string(&mut self) -> Result<()> {
        self.write_unsigned_byte(DsCode::NullString as u8)
    }
}

/// A buffer-based implementation of `DataOutput`.
#[derive(Debug)]
pub struct ObjectDataOutput {
    buffer: BytesMut,
}

impl ObjectDataOutput {
    /// Creates a new `ObjectDataOutput` with default capacity.
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(256),
        }
    }

    /// Creates a new `ObjectDataOutput` with the specified capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(capacity),
        }
    }

    /// Returns the written bytes as a slice.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Consumes the output and returns the written bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer.to_vec()
    }

    /// Consumes the output and returns an immutable buffer.
    pub fn freeze(self) -> Bytes {
        self.buffer.freeze()
    }

    /// Returns the number of bytes written.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Returns true if no bytes have been written.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Overwrites four bytes at `offset` with `v`.
    ///
    /// # Panics
    ///
    /// Panics if `offset + 4` exceeds the number of bytes written.
    pub fn put_int_at(&mut self, offset: usize, v: i32) {
        self.buffer[offset..offset + 4].copy_from_slice(&v.to_be_bytes());
    }

    /// Returns a mutable reference to the byte at `offset`.
    pub fn byte_at_mut(&mut self, offset: usize) -> Option<&mut u8> {
        self.buffer.get_mut(offset)
    }

    /// Clears the buffer, removing all written data.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for ObjectDataOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl DataOutput for ObjectDataOutput {
    fn write_byte(&mut self, v: i8) -> Result<()> {
        self.buffer.put_i8(v);
        Ok(())
    }

    fn write_bool(&mut self, v: bool) -> Result<()> {
        self.buffer.put_u8(if v { 1 } else { 0 });
        Ok(())
    }

    fn write_short(&mut self, v: i16) -> Result<()> {
        self.buffer.put_i16(v);
        Ok(())
    }

    fn write_int(&mut self, v: i32) -> Result<()> {
        self.buffer.put_i32(v);
        Ok(())
    }

    fn write_long(&mut self, v: i64) -> Result<()> {
        self.buffer.put_i64(v);
        Ok(())
    }

    fn write_float(&mut self, v: f32) -> Result<()> {
        self.buffer.put_f32(v);
        Ok(())
    }

    fn write_double(&mut self, v: f64) -> Result<()> {
        self.buffer.put_f64(v);
        Ok(())
    }

    fn write_bytes(&mut self, v: &[u8]) -> Result<()> {
        self.buffer.put_slice(v);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serialization::{DataInput, ObjectDataInput};

    #[test]
    fn test_write_int_big_endian() {
        let mut output = ObjectDataOutput::new();
        output.write_int(0x01020304).unwrap();
        assert_eq!(output.as_bytes(), &[0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn test_write_bool() {
        let mut output = ObjectDataOutput::new();
        output.write_bool(true).unwrap();
        output.write_bool(false).unwrap();
        assert_eq!(output.as_bytes(), &[1, 0]);
    }

    #[test]
    fn test_array_len_boundaries() {
        let mut output = ObjectDataOutput::new();
        output.write_array_len(-1).unwrap();
        output.write_array_len(252).unwrap();
        output.write_array_len(253).unwrap();
        output.write_array_len(70_000).unwrap();
        assert_eq!(
            output.as_bytes(),
            &[0xFF, 252, 0xFE, 0x00, 0xFD, 0xFD, 0x00, 0x01, 0x11, 0x70]
        );
    }

    #[test]
    fn test_ascii_string_uses_ascii_code() {
        let mut output = ObjectDataOutput::new();
        output.write_string("ab").unwrap();
        assert_eq!(output.as_bytes(), &[87, 0, 2, b'a', b'b']);
    }

    #[test]
    fn test_non_ascii_string_uses_modified_utf8() {
        let mut output = ObjectDataOutput::new();
        output.write_string("é").unwrap();
        assert_eq!(output.as_bytes(), &[42, 0, 2, 0xC3, 0xA9]);
    }

    #[test]
    fn test_string_readback_through_input() {
        let mut output = ObjectDataOutput::new();
        output.write_string("/Portfolios").unwrap();
        output.write_null_string().unwrap();
        let bytes = output.into_bytes();
        let mut input = ObjectDataInput::new(&bytes);
        assert_eq!(input.read_string().unwrap(), "/Portfolios");
        assert_eq!(input.read_nullable_string().unwrap(), None);
    }

    #[test]
    fn test_unsigned_vl_encoding() {
        let mut out = ObjectDataOutput::new();
        out.write_unsigned_vl(5).unwrap();
        out.write_unsigned_vl(300).unwrap();
        assert_eq!(out.as_bytes(), &[0x05, 0xAC, 0x02]);
    }

    #[test]
    fn test_put_int_at_backpatches() {
        let mut output = ObjectDataOutput::new();
        output.write_int(0).unwrap();
        output.write_byte(7).unwrap();
        output.put_int_at(0, 1);
        assert_eq!(output.as_bytes(), &[0, 0, 0, 1, 7]);
    }

    #[test]
    fn test_byte_array_null_and_present() {
        let mut output = ObjectDataOutput::new();
        output.write_byte_array(Some(&[9, 8])).unwrap();
        output.write_byte_array(None).unwrap();
        assert_eq!(output.as_bytes(), &[2, 9, 8, 0xFF]);
    }
}
