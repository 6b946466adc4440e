//! Serialization traits and implementations for primitive types.

use super::{DataInput, DataOutput};
use crate::error::Result;

/// Trait for types that can be written in Geode's binary format.
pub trait Serializable {
    /// Serializes this value to the given output.
    fn serialize<W: DataOutput>(&self, output: &mut W) -> Result<()>;

    /// Convenience method: serializes this value to a byte vector.
    fn to_bytes(&self) -> Result<Vec<u8>>
    where
        Self: Sized,
    {
        let mut output = super::ObjectDataOutput::new();
        self.serialize(&mut output)?;
        Ok(output.into_bytes())
    }
}

/// Trait for types that can be read from Geode's binary format.
pub trait Deserializable: Sized {
    /// Deserializes a value from the given input.
    fn deserialize<R: DataInput>(input: &mut R) -> Result<Self>;

    /// Convenience method: deserializes a value from a byte slice.
    fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut input = super::ObjectDataInput::new(data);
        Self::deserialize(&mut input)
    }
}

macro_rules! primitive_serializable {
    ($ty:ty, $write:ident, $read:ident) => {
        impl Serializable for $ty {
            fn serialize<W: DataOutput>(&self, output: &mut W) -> Result<()> {
                output.$write(*self)
            }
        }

        impl Deserializable for $ty {
            fn deserialize<R: DataInput>(input: &mut R) -> Result<Self> {
                input.$read()
            }
        }
    };
}

primitive_serializable!(i8, write_byte, read_byte);
primitive_serializable!(i16, write_short, read_short);
primitive_serializable!(i32, write_int, read_int);
primitive_serializable!(i64, write_long, read_long);
primitive_serializable!(f32, write_float, read_float);
primitive_serializable!(f64, write_double, read_double);
primitive_serializable!(bool, write_bool, read_bool);

impl Serializable for String {
    fn serialize<W: DataOutput>(&self, output: &mut W) -> Result<()> {
        output.write_string(self)
    }
}

impl Deserializable for String {
    fn deserialize<R: DataInput>(input: &mut R) -> Result<Self> {
        input.read_string()
    }
}

impl Serializable for str {
    fn serialize<W: DataOutput>(&self, output: &mut W) -> Result<()> {
        output.write_string(self)
    }
}

impl Serializable for [u8] {
    fn serialize<W: DataOutput>(&self, output: &mut W) -> Result<()> {
        output.write_byte_array(Some(self))
    }
}

impl Serializable for Vec<u8> {
    fn serialize<W: DataOutput>(&self, output: &mut W) -> Result<()> {
        output.write_byte_array(Some(self))
    }
}

impl Deserializable for Vec<u8> {
    fn deserialize<R: DataInput>(input: &mut R) -> Result<Self> {
        Ok(input.read_byte_array()?.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_i32_round_trip() {
        let bytes = 42i32.to_bytes().unwrap();
        assert_eq!(bytes, vec![0, 0, 0, 42]);
        assert_eq!(i32::from_bytes(&bytes).unwrap(), 42);
    }

    #[test]
    fn test_i64_big_endian() {
        let bytes = 0x0102030405060708i64.to_bytes().unwrap();
        assert_eq!(bytes, vec![1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_bool_round_trip() {
        assert!(bool::from_bytes(&true.to_bytes().unwrap()).unwrap());
        assert!(!bool::from_bytes(&false.to_bytes().unwrap()).unwrap());
    }

    #[test]
    fn test_string_round_trip() {
        let s = "java.lang.Object".to_string();
        let bytes = s.to_bytes().unwrap();
        assert_eq!(bytes[0], 87);
        assert_eq!(String::from_bytes(&bytes).unwrap(), s);
    }

    #[test]
    fn test_byte_vec_uses_array_length() {
        let bytes = vec![7u8, 8, 9].to_bytes().unwrap();
        assert_eq!(bytes, vec![3, 7, 8, 9]);
        assert_eq!(Vec::<u8>::from_bytes(&bytes).unwrap(), vec![7, 8, 9]);
    }

    #[test]
    fn test_insufficient_data_error() {
        assert!(i64::from_bytes(&[0, 1]).is_err());
    }
}
