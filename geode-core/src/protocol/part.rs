//! One length-prefixed part of a protocol message.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::constants::*;
use crate::error::{GeodeError, Result};
use crate::serialization::{modified_utf8, CacheableValue, DsCode};

/// A single part of a message body.
///
/// On the wire a part is:
/// - a 4-byte big-endian payload length
/// - a 1-byte flag (`0` raw bytes, `1` serialized object, `2` empty byte array)
/// - the payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Part {
    flag: u8,
    payload: Bytes,
}

impl Part {
    /// Creates a part with the given flag and payload.
    pub fn new(flag: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            flag,
            payload: payload.into(),
        }
    }

    /// Creates a raw-bytes part.
    pub fn bytes(payload: impl Into<Bytes>) -> Self {
        Self::new(PART_BYTES, payload)
    }

    /// Creates a serialized-object part.
    pub fn object(payload: impl Into<Bytes>) -> Self {
        Self::new(PART_OBJECT, payload)
    }

    /// Creates a 4-byte integer part.
    pub fn int(v: i32) -> Self {
        Self::bytes(Bytes::copy_from_slice(&v.to_be_bytes()))
    }

    /// Creates a 1-byte part.
    pub fn byte(v: i8) -> Self {
        Self::bytes(Bytes::copy_from_slice(&[v as u8]))
    }

    /// Creates a part holding a modified UTF-8 string.
    pub fn string(s: &str) -> Self {
        Self::bytes(modified_utf8::encode(s))
    }

    /// Returns the part flag.
    pub fn flag(&self) -> u8 {
        self.flag
    }

    /// Returns true if the payload is a serialized object.
    pub fn is_object(&self) -> bool {
        self.flag == PART_OBJECT
    }

    /// Returns the payload.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Returns the payload length.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Returns true if the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Returns the size of this part on the wire.
    pub fn wire_size(&self) -> usize {
        PART_HEADER_SIZE + self.payload.len()
    }

    /// Writes this part to the given buffer.
    pub fn write_to(&self, dst: &mut BytesMut) {
        dst.reserve(self.wire_size());
        dst.put_i32(self.payload.len() as i32);
        dst.put_u8(self.flag);
        dst.put_slice(&self.payload);
    }

    /// Reads one part from the front of `src`.
    ///
    /// The buffer must hold the whole part; a short buffer or a negative
    /// length is a protocol error.
    pub fn read_from(src: &mut Bytes) -> Result<Self> {
        if src.remaining() < PART_HEADER_SIZE {
            return Err(GeodeError::Protocol(format!(
                "truncated part header: {} bytes left",
                src.remaining()
            )));
        }
        let len = src.get_i32();
        let flag = src.get_u8();
        if len < 0 {
            return Err(GeodeError::Protocol(format!("negative part length {}", len)));
        }
        let len = len as usize;
        if src.remaining() < len {
            return Err(GeodeError::Protocol(format!(
                "truncated part: need {} bytes, have {}",
                len,
                src.remaining()
            )));
        }
        Ok(Self::new(flag, src.split_to(len)))
    }

    /// Reads the part as a 4-byte integer.
    pub fn as_int(&self) -> Result<i32> {
        if self.payload.len() != 4 {
            return Err(GeodeError::Protocol(format!(
                "int part has length {}",
                self.payload.len()
            )));
        }
        if self.flag != PART_BYTES {
            return Err(GeodeError::Protocol("int part is flagged as an object".into()));
        }
        Ok(i32::from_be_bytes([
            self.payload[0],
            self.payload[1],
            self.payload[2],
            self.payload[3],
        ]))
    }

    /// Reads the part as a single byte.
    pub fn as_byte(&self) -> Result<i8> {
        match self.payload.first() {
            Some(b) => Ok(*b as i8),
            None => Err(GeodeError::Protocol("byte part is empty".into())),
        }
    }

    /// Reads an integer written as a serialized object (type code then `i32`).
    pub fn as_native_int(&self) -> Result<i32> {
        if self.payload.len() < 5 {
            return Err(GeodeError::Protocol(format!(
                "native int part has length {}",
                self.payload.len()
            )));
        }
        Ok(i32::from_be_bytes([
            self.payload[1],
            self.payload[2],
            self.payload[3],
            self.payload[4],
        ]))
    }

    /// Reads a boolean written as a serialized object; an empty or raw part
    /// reads as false.
    pub fn as_bool_object(&self) -> bool {
        self.is_object() && self.payload.len() > 1 && self.payload[1] != 0
    }

    /// Reads the part as a string.
    ///
    /// Raw parts hold modified UTF-8; object parts hold a typed string.
    pub fn as_string(&self) -> Result<String> {
        match self.flag {
            PART_OBJECT => match CacheableValue::from_object_payload(&self.payload)? {
                CacheableValue::String(s) => Ok(s),
                CacheableValue::Null => Ok(String::new()),
                other => Err(GeodeError::Protocol(format!(
                    "expected a string part, got {}",
                    other
                ))),
            },
            _ => modified_utf8::decode(&self.payload),
        }
    }

    /// Decodes the part as a cacheable value.
    ///
    /// An empty raw part is null, an empty-byte-array part is an empty
    /// `byte[]`, any other raw part is a `byte[]`.
    pub fn as_object(&self) -> Result<CacheableValue> {
        match self.flag {
            PART_EMPTY_BYTE_ARRAY => Ok(CacheableValue::Bytes(Vec::new())),
            PART_OBJECT => CacheableValue::from_object_payload(&self.payload),
            _ if self.payload.is_empty() => Ok(CacheableValue::Null),
            _ => Ok(CacheableValue::Bytes(self.payload.to_vec())),
        }
    }

    /// Returns true if the payload starts with a Java-serialized object,
    /// the marker of an exception part inside a chunk.
    pub fn is_java_serialized(&self) -> bool {
        self.is_object() && self.payload.first() == Some(&(DsCode::JavaSerializable as u8))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_part_layout() {
        let part = Part::int(0x0102_0304);
        let mut buf = BytesMut::new();
        part.write_to(&mut buf);
        assert_eq!(&buf[..], &[0, 0, 0, 4, 0, 1, 2, 3, 4]);
        assert_eq!(part.wire_size(), 9);
    }

    #[test]
    fn test_write_and_read_part() {
        let original = Part::object(vec![57u8, 0, 0, 0, 7]);
        let mut buf = BytesMut::new();
        original.write_to(&mut buf);
        let mut bytes = buf.freeze();
        let decoded = Part::read_from(&mut bytes).unwrap();
        assert_eq!(decoded, original);
        assert!(bytes.is_empty());
        assert_eq!(decoded.as_object().unwrap(), CacheableValue::Int(7));
        assert_eq!(decoded.as_native_int().unwrap(), 7);
    }

    #[test]
    fn test_read_truncated_part() {
        let mut bytes = Bytes::from_static(&[0, 0, 0, 9, 0, 1, 2]);
        assert!(Part::read_from(&mut bytes).is_err());
        let mut bytes = Bytes::from_static(&[0, 0]);
        assert!(Part::read_from(&mut bytes).is_err());
        let mut bytes = Bytes::from_static(&[0xFF, 0xFF, 0xFF, 0xFF, 0]);
        assert!(Part::read_from(&mut bytes).is_err());
    }

    #[test]
    fn test_as_int_rejects_wrong_shape() {
        assert!(Part::bytes(vec![1u8, 2]).as_int().is_err());
        assert!(Part::object(vec![0u8, 0, 0, 1]).as_int().is_err());
    }

    #[test]
    fn test_string_parts() {
        let part = Part::string("région");
        assert_eq!(part.as_string().unwrap(), "région");
        let typed = Part::object(vec![87u8, 0, 2, b'o', b'k']);
        assert_eq!(typed.as_string().unwrap(), "ok");
    }

    #[test]
    fn test_object_flags() {
        assert_eq!(
            Part::new(PART_EMPTY_BYTE_ARRAY, Bytes::new()).as_object().unwrap(),
            CacheableValue::Bytes(vec![])
        );
        assert_eq!(Part::bytes(Bytes::new()).as_object().unwrap(), CacheableValue::Null);
        assert_eq!(
            Part::bytes(vec![9u8]).as_object().unwrap(),
            CacheableValue::Bytes(vec![9])
        );
    }

    #[test]
    fn test_bool_object() {
        assert!(Part::object(vec![53u8, 1]).as_bool_object());
        assert!(!Part::object(vec![53u8, 0]).as_bool_object());
        assert!(!Part::bytes(vec![1u8, 1]).as_bool_object());
        assert!(!Part::object(Bytes::new()).as_bool_object());
    }

    #[test]
    fn test_java_serialized_marker() {
        assert!(Part::object(vec![44u8, 0xAC, 0xED]).is_java_serialized());
        assert!(!Part::bytes(vec![44u8]).is_java_serialized());
    }
}
