//! Builtin cacheable values and their type codes.
//!
//! The set covers what the protocol itself exchanges: keys, routing objects,
//! callback arguments, credentials and the collection wrappers used by bulk
//! requests. Anything else travels as [`CacheableValue::Serialized`], whose
//! bytes are produced and consumed by an application-level serializer.

use std::fmt;
use std::hash::{Hash, Hasher};

use super::{DataInput, DataOutput, Deserializable, ObjectDataInput, Serializable};
use crate::error::{GeodeError, Result};

/// Wire type codes for builtin serializable types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum DsCode {
    FixedIdDefault = 0,
    FixedIdByte = 1,
    FixedIdShort = 2,
    FixedIdInt = 3,
    FixedIdNone = 4,
    Properties = 11,
    NullObj = 41,
    CacheableString = 42,
    Class = 43,
    JavaSerializable = 44,
    DataSerializable = 45,
    Bytes = 46,
    ObjectArray = 52,
    Boolean = 53,
    Character = 54,
    Byte = 55,
    Int16 = 56,
    Int32 = 57,
    Int64 = 58,
    Float = 59,
    Double = 60,
    Date = 61,
    StringArray = 64,
    ArrayList = 65,
    HashSet = 66,
    HashMap = 67,
    NullString = 69,
    AsciiString = 87,
    AsciiStringHuge = 88,
    StringHuge = 89,
    Pdx = 93,
}

impl TryFrom<u8> for DsCode {
    type Error = GeodeError;

    fn try_from(code: u8) -> Result<Self> {
        use DsCode::*;
        Ok(match code {
            0 => FixedIdDefault,
            1 => FixedIdByte,
            2 => FixedIdShort,
            3 => FixedIdInt,
            4 => FixedIdNone,
            11 => Properties,
            41 => NullObj,
            42 => CacheableString,
            43 => Class,
            44 => JavaSerializable,
            45 => DataSerializable,
            46 => Bytes,
            52 => ObjectArray,
            53 => Boolean,
            54 => Character,
            55 => Byte,
            56 => Int16,
            57 => Int32,
            58 => Int64,
            59 => Float,
            60 => Double,
            61 => Date,
            64 => StringArray,
            65 => ArrayList,
            66 => HashSet,
            67 => HashMap,
            69 => NullString,
            87 => AsciiString,
            88 => AsciiStringHuge,
            89 => StringHuge,
            93 => Pdx,
            other => {
                return Err(GeodeError::Serialization(format!(
                    "unknown type code {}",
                    other
                )))
            }
        })
    }
}

/// Fixed id of the client membership identity inside a `FixedIdByte` header.
pub const CLIENT_PROXY_MEMBERSHIP_ID: u8 = 38;

/// Element class written ahead of every object array.
pub const OBJECT_ARRAY_ELEMENT_CLASS: &str = "java.lang.Object";

/// A value of one of the builtin cacheable types.
#[derive(Debug, Clone)]
pub enum CacheableValue {
    /// The null object.
    Null,
    /// `java.lang.Boolean`.
    Bool(bool),
    /// `java.lang.Byte`.
    Byte(i8),
    /// `java.lang.Character`, as a UTF-16 unit.
    Char(u16),
    /// `java.lang.Short`.
    Short(i16),
    /// `java.lang.Integer`.
    Int(i32),
    /// `java.lang.Long`.
    Long(i64),
    /// `java.lang.Float`.
    Float(f32),
    /// `java.lang.Double`.
    Double(f64),
    /// `java.util.Date` as epoch milliseconds.
    Date(i64),
    /// `java.lang.String`.
    String(String),
    /// `byte[]`.
    Bytes(Vec<u8>),
    /// `String[]`.
    StringArray(Vec<String>),
    /// `Object[]`.
    ObjectArray(Vec<CacheableValue>),
    /// `java.util.ArrayList`.
    ArrayList(Vec<CacheableValue>),
    /// `java.util.HashSet`.
    HashSet(Vec<CacheableValue>),
    /// `java.util.HashMap`.
    HashMap(Vec<(CacheableValue, CacheableValue)>),
    /// `java.util.Properties` with string entries.
    Properties(Vec<(String, String)>),
    /// A `java.lang.Class` reference by name.
    Class(String),
    /// A pre-serialized object, type code included.
    Serialized(Vec<u8>),
}

impl CacheableValue {
    /// Returns the type code this value is written with.
    pub fn ds_code(&self) -> Option<DsCode> {
        Some(match self {
            CacheableValue::Null => DsCode::NullObj,
            CacheableValue::Bool(_) => DsCode::Boolean,
            CacheableValue::Byte(_) => DsCode::Byte,
            CacheableValue::Char(_) => DsCode::Character,
            CacheableValue::Short(_) => DsCode::Int16,
            CacheableValue::Int(_) => DsCode::Int32,
            CacheableValue::Long(_) => DsCode::Int64,
            CacheableValue::Float(_) => DsCode::Float,
            CacheableValue::Double(_) => DsCode::Double,
            CacheableValue::Date(_) => DsCode::Date,
            CacheableValue::String(s) if s.is_ascii() => DsCode::AsciiString,
            CacheableValue::String(_) => DsCode::CacheableString,
            CacheableValue::Bytes(_) => DsCode::Bytes,
            CacheableValue::StringArray(_) => DsCode::StringArray,
            CacheableValue::ObjectArray(_) => DsCode::ObjectArray,
            CacheableValue::ArrayList(_) => DsCode::ArrayList,
            CacheableValue::HashSet(_) => DsCode::HashSet,
            CacheableValue::HashMap(_) => DsCode::HashMap,
            CacheableValue::Properties(_) => DsCode::Properties,
            CacheableValue::Class(_) => DsCode::Class,
            CacheableValue::Serialized(_) => return None,
        })
    }

    /// Returns true for [`CacheableValue::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, CacheableValue::Null)
    }

    /// Returns the string content of a string value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            CacheableValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the value of any integral value that fits in an `i32`.
    pub fn as_int(&self) -> Option<i32> {
        match self {
            CacheableValue::Byte(v) => Some(*v as i32),
            CacheableValue::Short(v) => Some(*v as i32),
            CacheableValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the value of a boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            CacheableValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the raw bytes of a byte array or pre-serialized value.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            CacheableValue::Bytes(b) | CacheableValue::Serialized(b) => Some(b),
            _ => None,
        }
    }

    /// Returns the elements of any list-like collection.
    pub fn as_list(&self) -> Option<&[CacheableValue]> {
        match self {
            CacheableValue::ObjectArray(v)
            | CacheableValue::ArrayList(v)
            | CacheableValue::HashSet(v) => Some(v),
            _ => None,
        }
    }

    /// Computes the same hash code the server computes for the Java object.
    ///
    /// Bucket placement depends on it, so it must match `Object.hashCode` of
    /// the corresponding Java type bit for bit.
    pub fn java_hash_code(&self) -> i32 {
        match self {
            CacheableValue::Null => 0,
            CacheableValue::Bool(true) => 1231,
            CacheableValue::Bool(false) => 1237,
            CacheableValue::Byte(v) => *v as i32,
            CacheableValue::Char(v) => *v as i32,
            CacheableValue::Short(v) => *v as i32,
            CacheableValue::Int(v) => *v,
            CacheableValue::Long(v) | CacheableValue::Date(v) => long_hash(*v),
            CacheableValue::Float(v) => v.to_bits() as i32,
            CacheableValue::Double(v) => long_hash(v.to_bits() as i64),
            CacheableValue::String(s) | CacheableValue::Class(s) => string_hash(s),
            CacheableValue::Bytes(b) | CacheableValue::Serialized(b) => b
                .iter()
                .fold(1i32, |h, b| h.wrapping_mul(31).wrapping_add(*b as i8 as i32)),
            CacheableValue::StringArray(items) => items
                .iter()
                .fold(1i32, |h, s| h.wrapping_mul(31).wrapping_add(string_hash(s))),
            CacheableValue::ObjectArray(items) | CacheableValue::ArrayList(items) => {
                items.iter().fold(1i32, |h, v| {
                    h.wrapping_mul(31).wrapping_add(v.java_hash_code())
                })
            }
            CacheableValue::HashSet(items) => items
                .iter()
                .fold(0i32, |h, v| h.wrapping_add(v.java_hash_code())),
            CacheableValue::HashMap(entries) => entries.iter().fold(0i32, |h, (k, v)| {
                h.wrapping_add(k.java_hash_code() ^ v.java_hash_code())
            }),
            CacheableValue::Properties(entries) => entries
                .iter()
                .fold(0i32, |h, (k, v)| h.wrapping_add(string_hash(k) ^ string_hash(v))),
        }
    }

    /// Decodes the payload of an object part.
    ///
    /// Payloads that start with a type code outside the builtin set are kept
    /// whole as [`CacheableValue::Serialized`].
    pub fn from_object_payload(payload: &[u8]) -> Result<Self> {
        let Some(&code) = payload.first() else {
            return Ok(CacheableValue::Null);
        };
        let opaque = match DsCode::try_from(code) {
            Err(_) => true,
            Ok(c) => matches!(
                c,
                DsCode::FixedIdDefault
                    | DsCode::FixedIdByte
                    | DsCode::FixedIdShort
                    | DsCode::FixedIdInt
                    | DsCode::FixedIdNone
                    | DsCode::JavaSerializable
                    | DsCode::DataSerializable
                    | DsCode::Pdx
            ),
        };
        if opaque {
            return Ok(CacheableValue::Serialized(payload.to_vec()));
        }
        let mut input = ObjectDataInput::new(payload);
        let value = Self::deserialize(&mut input)?;
        if input.remaining() > 0 {
            return Ok(CacheableValue::Serialized(payload.to_vec()));
        }
        Ok(value)
    }

    fn write_list<W: DataOutput>(items: &[CacheableValue], output: &mut W) -> Result<()> {
        output.write_array_len(items.len() as i32)?;
        for item in items {
            item.serialize(output)?;
        }
        Ok(())
    }

    fn read_list<R: DataInput>(input: &mut R) -> Result<Vec<CacheableValue>> {
        let len = input.read_array_len()?;
        let mut items = Vec::with_capacity(len.max(0) as usize);
        for _ in 0..len.max(0) {
            items.push(Self::deserialize(input)?);
        }
        Ok(items)
    }
}

fn long_hash(v: i64) -> i32 {
    (v ^ ((v as u64) >> 32) as i64) as i32
}

fn string_hash(s: &str) -> i32 {
    s.encode_utf16()
        .fold(0i32, |h, unit| h.wrapping_mul(31).wrapping_add(unit as i32))
}

impl Serializable for CacheableValue {
    fn serialize<W: DataOutput>(&self, output: &mut W) -> Result<()> {
        if let CacheableValue::Serialized(bytes) = self {
            return output.write_bytes(bytes);
        }
        if let CacheableValue::String(s) = self {
            return output.write_string(s);
        }
        if let Some(code) = self.ds_code() {
            output.write_unsigned_byte(code as u8)?;
        }
        match self {
            CacheableValue::Null | CacheableValue::String(_) | CacheableValue::Serialized(_) => {
                Ok(())
            }
            CacheableValue::Bool(v) => output.write_bool(*v),
            CacheableValue::Byte(v) => output.write_byte(*v),
            CacheableValue::Char(v) => output.write_short(*v as i16),
            CacheableValue::Short(v) => output.write_short(*v),
            CacheableValue::Int(v) => output.write_int(*v),
            CacheableValue::Long(v) | CacheableValue::Date(v) => output.write_long(*v),
            CacheableValue::Float(v) => output.write_float(*v),
            CacheableValue::Double(v) => output.write_double(*v),
            CacheableValue::Bytes(b) => output.write_byte_array(Some(b)),
            CacheableValue::StringArray(items) => {
                output.write_array_len(items.len() as i32)?;
                for s in items {
                    output.write_string(s)?;
                }
                Ok(())
            }
            CacheableValue::ObjectArray(items) => {
                output.write_array_len(items.len() as i32)?;
                output.write_unsigned_byte(DsCode::Class as u8)?;
                output.write_string(OBJECT_ARRAY_ELEMENT_CLASS)?;
                for item in items {
                    item.serialize(output)?;
                }
                Ok(())
            }
            CacheableValue::ArrayList(items) | CacheableValue::HashSet(items) => {
                Self::write_list(items, output)
            }
            CacheableValue::HashMap(entries) => {
                output.write_array_len(entries.len() as i32)?;
                for (k, v) in entries {
                    k.serialize(output)?;
                    v.serialize(output)?;
                }
                Ok(())
            }
            CacheableValue::Properties(entries) => {
                output.write_array_len(entries.len() as i32)?;
                for (k, v) in entries {
                    output.write_string(k)?;
                    output.write_string(v)?;
                }
                Ok(())
            }
            CacheableValue::Class(name) => output.write_string(name),
        }
    }
}

impl Deserializable for CacheableValue {
    fn deserialize<R: DataInput>(input: &mut R) -> Result<Self> {
        let code = DsCode::try_from(input.read_unsigned_byte()?)?;
        Ok(match code {
            DsCode::NullObj | DsCode::NullString => CacheableValue::Null,
            DsCode::Boolean => CacheableValue::Bool(input.read_bool()?),
            DsCode::Byte => CacheableValue::Byte(input.read_byte()?),
            DsCode::Character => CacheableValue::Char(input.read_unsigned_short()?),
            DsCode::Int16 => CacheableValue::Short(input.read_short()?),
            DsCode::Int32 => CacheableValue::Int(input.read_int()?),
            DsCode::Int64 => CacheableValue::Long(input.read_long()?),
            DsCode::Float => CacheableValue::Float(input.read_float()?),
            DsCode::Double => CacheableValue::Double(input.read_double()?),
            DsCode::Date => CacheableValue::Date(input.read_long()?),
            DsCode::AsciiString => {
                let len = input.read_unsigned_short()? as usize;
                CacheableValue::String(String::from_utf8_lossy(&input.read_bytes(len)?).into())
            }
            DsCode::AsciiStringHuge => {
                let len = input.read_int()?.max(0) as usize;
                CacheableValue::String(String::from_utf8_lossy(&input.read_bytes(len)?).into())
            }
            DsCode::CacheableString => CacheableValue::String(input.read_utf()?),
            DsCode::StringHuge => {
                let len = input.read_int()?.max(0) as usize;
                let mut units = Vec::with_capacity(len);
                for _ in 0..len {
                    units.push(input.read_unsigned_short()?);
                }
                CacheableValue::String(String::from_utf16_lossy(&units))
            }
            DsCode::Bytes => CacheableValue::Bytes(input.read_byte_array()?.unwrap_or_default()),
            DsCode::StringArray => {
                let len = input.read_array_len()?;
                let mut items = Vec::with_capacity(len.max(0) as usize);
                for _ in 0..len.max(0) {
                    items.push(input.read_string()?);
                }
                CacheableValue::StringArray(items)
            }
            DsCode::ObjectArray => {
                let len = input.read_array_len()?;
                if input.read_unsigned_byte()? != DsCode::Class as u8 {
                    return Err(GeodeError::Serialization(
                        "object array without element class".to_string(),
                    ));
                }
                input.read_string()?;
                let mut items = Vec::with_capacity(len.max(0) as usize);
                for _ in 0..len.max(0) {
                    items.push(Self::deserialize(input)?);
                }
                CacheableValue::ObjectArray(items)
            }
            DsCode::ArrayList => CacheableValue::ArrayList(Self::read_list(input)?),
            DsCode::HashSet => CacheableValue::HashSet(Self::read_list(input)?),
            DsCode::HashMap => {
                let len = input.read_array_len()?;
                let mut entries = Vec::with_capacity(len.max(0) as usize);
                for _ in 0..len.max(0) {
                    let k = Self::deserialize(input)?;
                    let v = Self::deserialize(input)?;
                    entries.push((k, v));
                }
                CacheableValue::HashMap(entries)
            }
            DsCode::Properties => {
                let len = input.read_array_len()?;
                let mut entries = Vec::with_capacity(len.max(0) as usize);
                for _ in 0..len.max(0) {
                    let k = input.read_string()?;
                    let v = input.read_string()?;
                    entries.push((k, v));
                }
                CacheableValue::Properties(entries)
            }
            DsCode::Class => CacheableValue::Class(input.read_string()?),
            DsCode::Pdx => {
                let len = input.read_int()?;
                let type_id = input.read_int()?;
                if len < 0 {
                    return Err(GeodeError::Serialization(format!(
                        "negative PDX length {}",
                        len
                    )));
                }
                let body = input.read_bytes(len as usize)?;
                let mut bytes = Vec::with_capacity(9 + body.len());
                bytes.push(DsCode::Pdx as u8);
                bytes.extend_from_slice(&len.to_be_bytes());
                bytes.extend_from_slice(&type_id.to_be_bytes());
                bytes.extend_from_slice(&body);
                CacheableValue::Serialized(bytes)
            }
            other => {
                return Err(GeodeError::Serialization(format!(
                    "type code {:?} is not a builtin cacheable",
                    other
                )))
            }
        })
    }
}

impl PartialEq for CacheableValue {
    fn eq(&self, other: &Self) -> bool {
        use CacheableValue::*;
        match (self, other) {
            (Null, Null) => true,
            (Bool(a), Bool(b)) => a == b,
            (Byte(a), Byte(b)) => a == b,
            (Char(a), Char(b)) => a == b,
            (Short(a), Short(b)) => a == b,
            (Int(a), Int(b)) => a == b,
            (Long(a), Long(b)) | (Date(a), Date(b)) => a == b,
            (Float(a), Float(b)) => a.to_bits() == b.to_bits(),
            (Double(a), Double(b)) => a.to_bits() == b.to_bits(),
            (String(a), String(b)) | (Class(a), Class(b)) => a == b,
            (Bytes(a), Bytes(b)) | (Serialized(a), Serialized(b)) => a == b,
            (StringArray(a), StringArray(b)) => a == b,
            (ObjectArray(a), ObjectArray(b))
            | (ArrayList(a), ArrayList(b))
            | (HashSet(a), HashSet(b)) => a == b,
            (HashMap(a), HashMap(b)) => a == b,
            (Properties(a), Properties(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for CacheableValue {}

impl Hash for CacheableValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        self.java_hash_code().hash(state);
    }
}

impl fmt::Display for CacheableValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheableValue::Null => write!(f, "null"),
            CacheableValue::Bool(v) => write!(f, "{}", v),
            CacheableValue::Byte(v) => write!(f, "{}", v),
            CacheableValue::Char(v) => write!(f, "{}", char::from_u32(*v as u32).unwrap_or('?')),
            CacheableValue::Short(v) => write!(f, "{}", v),
            CacheableValue::Int(v) => write!(f, "{}", v),
            CacheableValue::Long(v) => write!(f, "{}", v),
            CacheableValue::Float(v) => write!(f, "{}", v),
            CacheableValue::Double(v) => write!(f, "{}", v),
            CacheableValue::Date(v) => write!(f, "date({})", v),
            CacheableValue::String(s) => write!(f, "{}", s),
            CacheableValue::Class(s) => write!(f, "class {}", s),
            CacheableValue::Bytes(b) => write!(f, "bytes[{}]", b.len()),
            CacheableValue::Serialized(b) => write!(f, "serialized[{}]", b.len()),
            CacheableValue::StringArray(v) => write!(f, "{:?}", v),
            CacheableValue::ObjectArray(v)
            | CacheableValue::ArrayList(v)
            | CacheableValue::HashSet(v) => {
                write!(f, "[")?;
                for (i, item) in v.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            CacheableValue::HashMap(entries) => write!(f, "map[{}]", entries.len()),
            CacheableValue::Properties(entries) => write!(f, "properties[{}]", entries.len()),
        }
    }
}

impl From<&str> for CacheableValue {
    fn from(v: &str) -> Self {
        CacheableValue::String(v.to_string())
    }
}

impl From<String> for CacheableValue {
    fn from(v: String) -> Self {
        CacheableValue::String(v)
    }
}

impl From<i32> for CacheableValue {
    fn from(v: i32) -> Self {
        CacheableValue::Int(v)
    }
}

impl From<i64> for CacheableValue {
    fn from(v: i64) -> Self {
        CacheableValue::Long(v)
    }
}

impl From<bool> for CacheableValue {
    fn from(v: bool) -> Self {
        CacheableValue::Bool(v)
    }
}

impl From<Vec<u8>> for CacheableValue {
    fn from(v: Vec<u8>) -> Self {
        CacheableValue::Bytes(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_hash_matches_java() {
        assert_eq!(CacheableValue::from("").java_hash_code(), 0);
        assert_eq!(CacheableValue::from("a").java_hash_code(), 97);
        assert_eq!(CacheableValue::from("hello").java_hash_code(), 99162322);
        assert_eq!(
            CacheableValue::from("Portfolios").java_hash_code(),
            "Portfolios"
                .encode_utf16()
                .fold(0i32, |h, c| h.wrapping_mul(31).wrapping_add(c as i32))
        );
    }

    #[test]
    fn test_numeric_hashes_match_java() {
        assert_eq!(CacheableValue::Int(-7).java_hash_code(), -7);
        assert_eq!(CacheableValue::Long(1).java_hash_code(), 1);
        assert_eq!(CacheableValue::Long(-1).java_hash_code(), 0);
        assert_eq!(CacheableValue::Long(1 << 32).java_hash_code(), 1);
        assert_eq!(CacheableValue::Bool(true).java_hash_code(), 1231);
        assert_eq!(CacheableValue::Bool(false).java_hash_code(), 1237);
        assert_eq!(CacheableValue::Double(1.0).java_hash_code(), 1072693248);
    }

    #[test]
    fn test_int_serialization() {
        let bytes = CacheableValue::Int(5).to_bytes().unwrap();
        assert_eq!(bytes, vec![57, 0, 0, 0, 5]);
        assert_eq!(
            CacheableValue::from_bytes(&bytes).unwrap(),
            CacheableValue::Int(5)
        );
    }

    #[test]
    fn test_null_serialization() {
        let bytes = CacheableValue::Null.to_bytes().unwrap();
        assert_eq!(bytes, vec![41]);
    }

    #[test]
    fn test_object_array_writes_element_class() {
        let keys = CacheableValue::ObjectArray(vec!["k0".into()]);
        let bytes = keys.to_bytes().unwrap();
        assert_eq!(bytes[0], 52);
        assert_eq!(bytes[1], 1);
        assert_eq!(bytes[2], 43);
        assert_eq!(bytes[3], 87);
        assert_eq!(CacheableValue::from_bytes(&bytes).unwrap(), keys);
    }

    #[test]
    fn test_collections_decode() {
        let set = CacheableValue::HashSet(vec![CacheableValue::Int(1), "x".into()]);
        let map = CacheableValue::HashMap(vec![("k".into(), CacheableValue::Long(9))]);
        assert_eq!(CacheableValue::from_bytes(&set.to_bytes().unwrap()).unwrap(), set);
        assert_eq!(CacheableValue::from_bytes(&map.to_bytes().unwrap()).unwrap(), map);
    }

    #[test]
    fn test_properties_layout() {
        let props = CacheableValue::Properties(vec![("user".into(), "admin".into())]);
        let bytes = props.to_bytes().unwrap();
        assert_eq!(&bytes[..2], &[11, 1]);
        assert_eq!(CacheableValue::from_bytes(&bytes).unwrap(), props);
    }

    #[test]
    fn test_unknown_payload_kept_serialized() {
        let payload = vec![0xF0, 1, 2, 3];
        assert_eq!(
            CacheableValue::from_object_payload(&payload).unwrap(),
            CacheableValue::Serialized(payload)
        );
    }

    #[test]
    fn test_serialized_written_verbatim() {
        let raw = vec![45, 1, 2];
        let bytes = CacheableValue::Serialized(raw.clone()).to_bytes().unwrap();
        assert_eq!(bytes, raw);
    }

    #[test]
    fn test_empty_object_payload_is_null() {
        assert!(CacheableValue::from_object_payload(&[]).unwrap().is_null());
    }

    #[test]
    fn test_equal_values_hash_equal() {
        use std::collections::HashSet;
        let mut set = HashSet::new();
        set.insert(CacheableValue::from("k1"));
        assert!(set.contains(&CacheableValue::from("k1")));
        assert!(!set.contains(&CacheableValue::from("k2")));
    }
}
