//! Request encoding and raw reply framing.

use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::constants::*;
use super::event_id::EventId;
use super::part::Part;
use crate::error::{GeodeError, Result};
use crate::serialization::{
    modified_utf8, CacheableValue, DataOutput, DsCode, Serializable, OBJECT_ARRAY_ELEMENT_CLASS,
};

/// Per-request header settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderOptions {
    /// The target endpoint expects a per-user security part.
    pub security_on: bool,
    /// Transaction id, [`NO_TRANSACTION`] outside transactions.
    pub transaction_id: i32,
    /// The region is an internal metadata region exempt from security.
    pub is_meta_region: bool,
}

impl Default for HeaderOptions {
    fn default() -> Self {
        Self {
            security_on: false,
            transaction_id: NO_TRANSACTION,
            is_meta_region: false,
        }
    }
}

/// The fixed 17-byte message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    /// Raw message type tag.
    pub message_type: i32,
    /// Body length, header excluded.
    pub body_length: i32,
    /// Declared number of parts.
    pub num_parts: i32,
    /// Transaction id.
    pub transaction_id: i32,
    /// Early-ack / security / retry flags.
    pub flags: u8,
}

impl MessageHeader {
    /// Reads a header from the first [`HEADER_SIZE`] bytes of `src`.
    pub fn parse(src: &[u8]) -> Result<Self> {
        if src.len() < HEADER_SIZE {
            return Err(GeodeError::Protocol(format!(
                "truncated message header: {} bytes",
                src.len()
            )));
        }
        let mut buf = &src[..HEADER_SIZE];
        Ok(Self {
            message_type: buf.get_i32(),
            body_length: buf.get_i32(),
            num_parts: buf.get_i32(),
            transaction_id: buf.get_i32(),
            flags: buf.get_u8(),
        })
    }

    /// Writes this header.
    pub fn write_to(&self, dst: &mut BytesMut) {
        dst.put_i32(self.message_type);
        dst.put_i32(self.body_length);
        dst.put_i32(self.num_parts);
        dst.put_i32(self.transaction_id);
        dst.put_u8(self.flags);
    }

    /// Returns the decoded message type.
    pub fn kind(&self) -> Result<MessageType> {
        MessageType::try_from(self.message_type)
    }

    /// Returns true if a trailing security part follows the declared parts.
    pub fn has_secure_part(&self) -> bool {
        self.flags & EARLY_ACK_SECURE_PART != 0
    }
}

/// A fully encoded request, ready for the socket.
#[derive(Debug, Clone)]
pub struct RequestMessage {
    message_type: MessageType,
    data: BytesMut,
    reply_timeout: Option<Duration>,
    region: Option<String>,
    routing_key: Option<CacheableValue>,
    callback_argument: Option<CacheableValue>,
}

impl RequestMessage {
    /// Returns the message type.
    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    /// Returns the encoded frame.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Returns the frame length.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if nothing has been encoded.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns the parsed header.
    pub fn header(&self) -> Result<MessageHeader> {
        MessageHeader::parse(&self.data)
    }

    /// Marks the request as a re-send so the server can detect duplicates.
    pub fn update_header_for_retry(&mut self) {
        if let Some(flags) = self.data.get_mut(EARLY_ACK_OFFSET) {
            *flags |= EARLY_ACK_RETRY;
        }
    }

    /// Returns true if the retry bit is set.
    pub fn is_retry(&self) -> bool {
        self.data
            .get(EARLY_ACK_OFFSET)
            .map_or(false, |f| f & EARLY_ACK_RETRY != 0)
    }

    /// Returns the operation-specific reply timeout, if the type uses one.
    pub fn reply_timeout(&self) -> Option<Duration> {
        self.reply_timeout
    }

    /// Overrides the reply timeout.
    pub fn set_reply_timeout(&mut self, timeout: Duration) {
        self.reply_timeout = Some(timeout);
    }

    /// Returns the region path the request targets.
    pub fn region(&self) -> Option<&str> {
        self.region.as_deref()
    }

    /// Returns the key used for single-hop routing.
    pub fn routing_key(&self) -> Option<&CacheableValue> {
        self.routing_key.as_ref()
    }

    /// Returns the callback argument, consulted by partition resolvers.
    pub fn callback_argument(&self) -> Option<&CacheableValue> {
        self.callback_argument.as_ref()
    }

    /// Splits the frame back into its header and parts.
    pub fn to_raw(&self) -> Result<RawMessage> {
        RawMessage::parse(Bytes::copy_from_slice(&self.data))
    }
}

/// Incremental writer for one request frame.
///
/// The header is written up front with a zero body length, parts are
/// appended in order and [`MessageWriter::finish`] backpatches the length.
#[derive(Debug)]
pub struct MessageWriter {
    message_type: MessageType,
    declared_parts: usize,
    written_parts: usize,
    buf: BytesMut,
    reply_timeout: Option<Duration>,
    region: Option<String>,
    routing_key: Option<CacheableValue>,
    callback_argument: Option<CacheableValue>,
}

impl MessageWriter {
    /// Starts a frame of `num_parts` parts.
    pub fn new(message_type: MessageType, num_parts: usize, options: HeaderOptions) -> Self {
        let mut flags = 0u8;
        if options.security_on && message_type.is_user_initiated() && !options.is_meta_region {
            flags |= EARLY_ACK_SECURE_PART;
        }
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + 64);
        MessageHeader {
            message_type: message_type.code(),
            body_length: 0,
            num_parts: num_parts as i32,
            transaction_id: options.transaction_id,
            flags,
        }
        .write_to(&mut buf);
        Self {
            message_type,
            declared_parts: num_parts,
            written_parts: 0,
            buf,
            reply_timeout: None,
            region: None,
            routing_key: None,
            callback_argument: None,
        }
    }

    /// Records the reply timeout the connection should honour.
    pub fn set_reply_timeout(&mut self, timeout: Duration) {
        self.reply_timeout = Some(timeout);
    }

    /// Records routing information carried alongside the frame.
    pub fn set_routing(
        &mut self,
        region: &str,
        key: Option<&CacheableValue>,
        callback_argument: Option<&CacheableValue>,
    ) {
        self.region = Some(region.to_string());
        self.routing_key = key.cloned();
        self.callback_argument = callback_argument.cloned();
    }

    /// Appends a prebuilt part.
    pub fn write_part(&mut self, part: &Part) {
        part.write_to(&mut self.buf);
        self.written_parts += 1;
    }

    /// Writes a 4-byte integer part.
    pub fn write_int_part(&mut self, v: i32) {
        self.buf.put_i32(4);
        self.buf.put_u8(PART_BYTES);
        self.buf.put_i32(v);
        self.written_parts += 1;
    }

    /// Writes a 1-byte part.
    pub fn write_byte_part(&mut self, v: i8) {
        self.buf.put_i32(1);
        self.buf.put_u8(PART_BYTES);
        self.buf.put_i8(v);
        self.written_parts += 1;
    }

    /// Writes a 1-byte boolean part.
    pub fn write_bool_part(&mut self, v: bool) {
        self.write_byte_part(v as i8);
    }

    /// Writes a byte followed by a millisecond timeout in one 5-byte part.
    pub fn write_byte_and_timeout_part(&mut self, v: i8, timeout: Duration) {
        self.buf.put_i32(5);
        self.buf.put_u8(PART_BYTES);
        self.buf.put_i8(v);
        self.buf.put_i32(duration_millis(timeout));
        self.written_parts += 1;
    }

    /// Writes a timeout as an integer millisecond part.
    pub fn write_milliseconds_part(&mut self, timeout: Duration) {
        self.write_int_part(duration_millis(timeout));
    }

    /// Writes a region path as raw bytes.
    pub fn write_region_part(&mut self, region: &str) {
        self.buf.put_i32(region.len() as i32);
        self.buf.put_u8(PART_BYTES);
        self.buf.put_slice(region.as_bytes());
        self.written_parts += 1;
    }

    /// Writes a modified UTF-8 string part.
    pub fn write_string_part(&mut self, s: &str) {
        let encoded = modified_utf8::encode(s);
        self.buf.put_i32(encoded.len() as i32);
        self.buf.put_u8(PART_BYTES);
        self.buf.put_slice(&encoded);
        self.written_parts += 1;
    }

    /// Writes raw bytes as a non-object part.
    pub fn write_bytes_part(&mut self, bytes: &[u8]) {
        self.buf.put_i32(bytes.len() as i32);
        self.buf.put_u8(PART_BYTES);
        self.buf.put_slice(bytes);
        self.written_parts += 1;
    }

    /// Writes delta bytes produced by the application's delta encoder.
    pub fn write_delta_part(&mut self, delta: &[u8]) {
        self.write_bytes_part(delta);
    }

    /// Writes a value part.
    ///
    /// An empty `byte[]` is flagged as an empty byte array, any other
    /// `byte[]` travels raw, everything else is serialized with its type code.
    /// The part length is patched once the value has been written.
    pub fn write_object_part(&mut self, value: &CacheableValue) -> Result<()> {
        let len_offset = self.buf.len();
        self.buf.put_i32(0);
        match value {
            CacheableValue::Bytes(bytes) if bytes.is_empty() => {
                self.buf.put_u8(PART_EMPTY_BYTE_ARRAY);
            }
            CacheableValue::Bytes(bytes) => {
                self.buf.put_u8(PART_BYTES);
                self.buf.put_slice(bytes);
            }
            other => {
                self.buf.put_u8(PART_OBJECT);
                other.serialize(&mut BufOutput(&mut self.buf))?;
            }
        }
        self.patch_part_length(len_offset);
        self.written_parts += 1;
        Ok(())
    }

    /// Writes the key list of a bulk get as an `Object[]` part.
    pub fn write_key_list_part(&mut self, keys: &[CacheableValue]) -> Result<()> {
        let len_offset = self.buf.len();
        self.buf.put_i32(0);
        self.buf.put_u8(PART_OBJECT);
        {
            let mut out = BufOutput(&mut self.buf);
            out.write_unsigned_byte(DsCode::ObjectArray as u8)?;
            out.write_array_len(keys.len() as i32)?;
            out.write_unsigned_byte(DsCode::Class as u8)?;
            out.write_string(OBJECT_ARRAY_ELEMENT_CLASS)?;
            for key in keys {
                key.serialize(&mut out)?;
            }
        }
        self.patch_part_length(len_offset);
        self.written_parts += 1;
        Ok(())
    }

    /// Writes an event id part.
    pub fn write_event_id_part(&mut self, id: &EventId) {
        id.write_part(&mut self.buf);
        self.written_parts += 1;
    }

    /// Returns the number of parts written so far.
    pub fn written_parts(&self) -> usize {
        self.written_parts
    }

    /// Backpatches the body length and returns the finished request.
    ///
    /// Fails if the number of parts written differs from the declared count.
    pub fn finish(mut self) -> Result<RequestMessage> {
        if self.written_parts != self.declared_parts {
            return Err(GeodeError::Protocol(format!(
                "{} declared {} parts but wrote {}",
                self.message_type, self.declared_parts, self.written_parts
            )));
        }
        let body_length = (self.buf.len() - HEADER_SIZE) as i32;
        self.buf[BODY_LENGTH_OFFSET..BODY_LENGTH_OFFSET + 4]
            .copy_from_slice(&body_length.to_be_bytes());
        Ok(RequestMessage {
            message_type: self.message_type,
            data: self.buf,
            reply_timeout: self.reply_timeout,
            region: self.region,
            routing_key: self.routing_key,
            callback_argument: self.callback_argument,
        })
    }

    fn patch_part_length(&mut self, len_offset: usize) {
        let written = (self.buf.len() - len_offset - PART_HEADER_SIZE) as i32;
        self.buf[len_offset..len_offset + 4].copy_from_slice(&written.to_be_bytes());
    }
}

fn duration_millis(d: Duration) -> i32 {
    d.as_millis().min(i32::MAX as u128) as i32
}

struct BufOutput<'a>(&'a mut BytesMut);

impl DataOutput for BufOutput<'_> {
    fn write_byte(&mut self, v: i8) -> Result<()> {
        self.0.put_i8(v);
        Ok(())
    }

    fn write_bool(&mut self, v: bool) -> Result<()> {
        self.0.put_u8(v as u8);
        Ok(())
    }

    fn write_short(&mut self, v: i16) -> Result<()> {
        self.0.put_i16(v);
        Ok(())
    }

    fn write_int(&mut self, v: i32) -> Result<()> {
        self.0.put_i32(v);
        Ok(())
    }

    fn write_long(&mut self, v: i64) -> Result<()> {
        self.0.put_i64(v);
        Ok(())
    }

    fn write_float(&mut self, v: f32) -> Result<()> {
        self.0.put_f32(v);
        Ok(())
    }

    fn write_double(&mut self, v: f64) -> Result<()> {
        self.0.put_f64(v);
        Ok(())
    }

    fn write_bytes(&mut self, v: &[u8]) -> Result<()> {
        self.0.put_slice(v);
        Ok(())
    }
}

/// A decoded frame: header plus the parts found in its body.
#[derive(Debug, Clone)]
pub struct RawMessage {
    header: MessageHeader,
    parts: Vec<Part>,
    secure_part: Option<Part>,
}

impl RawMessage {
    /// Builds a message from already separated parts.
    pub fn new(header: MessageHeader, parts: Vec<Part>) -> Self {
        Self {
            header,
            parts,
            secure_part: None,
        }
    }

    /// Parses a complete frame.
    ///
    /// Parts are read until the body is exhausted. At most the declared
    /// number of parts is kept; one extra part is accepted as the trailing
    /// security part when the header flags announce it.
    pub fn parse(mut frame: Bytes) -> Result<Self> {
        let header = MessageHeader::parse(&frame)?;
        frame.advance(HEADER_SIZE);
        if header.body_length < 0 || frame.len() != header.body_length as usize {
            return Err(GeodeError::Protocol(format!(
                "body length {} does not match {} received bytes",
                header.body_length,
                frame.len()
            )));
        }
        let declared = header.num_parts.max(0) as usize;
        let mut parts = Vec::with_capacity(declared);
        let mut secure_part = None;
        while frame.has_remaining() {
            let part = Part::read_from(&mut frame)?;
            if parts.len() < declared {
                parts.push(part);
            } else if secure_part.is_none() && header.has_secure_part() {
                secure_part = Some(part);
            } else {
                return Err(GeodeError::Protocol(format!(
                    "message type {} carries more than {} parts",
                    header.message_type, declared
                )));
            }
        }
        Ok(Self {
            header,
            parts,
            secure_part,
        })
    }

    /// Returns the header.
    pub fn header(&self) -> &MessageHeader {
        &self.header
    }

    /// Returns the raw message type.
    pub fn message_type(&self) -> i32 {
        self.header.message_type
    }

    /// Returns the parts that were present in the body.
    pub fn parts(&self) -> &[Part] {
        &self.parts
    }

    /// Returns the trailing security part, if any.
    pub fn secure_part(&self) -> Option<&Part> {
        self.secure_part.as_ref()
    }

    /// Returns a strict in-order reader over the parts.
    pub fn reader(&self) -> PartReader<'_> {
        PartReader::new(&self.parts)
    }
}

/// Reads parts strictly in declaration order.
#[derive(Debug, Clone)]
pub struct PartReader<'a> {
    parts: &'a [Part],
    index: usize,
}

impl<'a> PartReader<'a> {
    /// Creates a reader over `parts`.
    pub fn new(parts: &'a [Part]) -> Self {
        Self { parts, index: 0 }
    }

    /// Returns the next part; a missing part is a protocol error naming `what`.
    pub fn next(&mut self, what: &str) -> Result<&'a Part> {
        let part = self.parts.get(self.index).ok_or_else(|| {
            GeodeError::Protocol(format!(
                "missing {} part at position {}",
                what, self.index
            ))
        })?;
        self.index += 1;
        Ok(part)
    }

    /// Returns the next part if one is left.
    pub fn next_optional(&mut self) -> Option<&'a Part> {
        let part = self.parts.get(self.index)?;
        self.index += 1;
        Some(part)
    }

    /// Skips `n` parts.
    pub fn skip(&mut self, n: usize) -> Result<()> {
        for _ in 0..n {
            self.next("skipped")?;
        }
        Ok(())
    }

    /// Returns the number of parts consumed.
    pub fn consumed(&self) -> usize {
        self.index
    }

    /// Returns the number of parts left.
    pub fn remaining(&self) -> usize {
        self.parts.len() - self.index
    }
}
