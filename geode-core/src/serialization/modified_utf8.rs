//! Java "modified UTF-8" as produced by `DataOutput.writeUTF`.
//!
//! Differs from standard UTF-8 in two ways: U+0000 is written as the two-byte
//! sequence `C0 80`, and supplementary characters are written as two
//! three-byte surrogate encodings instead of one four-byte sequence.

use crate::error::{GeodeError, Result};

/// Returns the number of bytes `s` occupies once encoded.
pub fn encoded_len(s: &str) -> usize {
    s.encode_utf16()
        .map(|unit| match unit {
            0x0001..=0x007F => 1,
            0x0000 | 0x0080..=0x07FF => 2,
            _ => 3,
        })
        .sum()
}

/// Encodes `s` as modified UTF-8.
pub fn encode(s: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(encoded_len(s));
    for unit in s.encode_utf16() {
        match unit {
            0x0001..=0x007F => out.push(unit as u8),
            0x0000 | 0x0080..=0x07FF => {
                out.push(0xC0 | ((unit >> 6) & 0x1F) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
            _ => {
                out.push(0xE0 | ((unit >> 12) & 0x0F) as u8);
                out.push(0x80 | ((unit >> 6) & 0x3F) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
        }
    }
    out
}

/// Decodes modified UTF-8 bytes into a `String`.
pub fn decode(bytes: &[u8]) -> Result<String> {
    let mut units = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if b & 0x80 == 0 {
            units.push(b as u16);
            i += 1;
        } else if b & 0xE0 == 0xC0 {
            let b2 = continuation(bytes, i + 1)?;
            units.push((((b & 0x1F) as u16) << 6) | b2);
            i += 2;
        } else if b & 0xF0 == 0xE0 {
            let b2 = continuation(bytes, i + 1)?;
            let b3 = continuation(bytes, i + 2)?;
            units.push((((b & 0x0F) as u16) << 12) | (b2 << 6) | b3);
            i += 3;
        } else {
            return Err(GeodeError::Serialization(format!(
                "malformed modified UTF-8 lead byte 0x{:02X} at offset {}",
                b, i
            )));
        }
    }
    String::from_utf16(&units)
        .map_err(|e| GeodeError::Serialization(format!("invalid UTF-16 sequence: {}", e)))
}

fn continuation(bytes: &[u8], at: usize) -> Result<u16> {
    match bytes.get(at) {
        Some(b) if b & 0xC0 == 0x80 => Ok((b & 0x3F) as u16),
        Some(b) => Err(GeodeError::Serialization(format!(
            "malformed modified UTF-8 continuation byte 0x{:02X} at offset {}",
            b, at
        ))),
        None => Err(GeodeError::Serialization(
            "truncated modified UTF-8 sequence".to_string(),
        )),
    }
}
