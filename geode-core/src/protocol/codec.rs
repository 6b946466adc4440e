//! Codecs for framing requests, replies and reply chunks.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use super::chunk::{Chunk, ChunkHeader, ChunkedResponseHeader};
use super::constants::*;
use super::message::{MessageHeader, RawMessage, RequestMessage};
use crate::error::{GeodeError, Result};

/// Codec for whole messages: encodes requests and decodes unchunked replies
/// and server pushes.
///
/// Implements the `tokio_util::codec::{Encoder, Decoder}` traits for use
/// with tokio's framed I/O.
#[derive(Debug, Default)]
pub struct MessageCodec;

impl MessageCodec {
    /// Creates a new codec instance.
    pub fn new() -> Self {
        Self
    }
}

impl Encoder<RequestMessage> for MessageCodec {
    type Error = GeodeError;

    fn encode(&mut self, item: RequestMessage, dst: &mut BytesMut) -> Result<()> {
        <Self as Encoder<&RequestMessage>>::encode(self, &item, dst)
    }
}

impl<'a> Encoder<&'a RequestMessage> for MessageCodec {
    type Error = GeodeError;

    fn encode(&mut self, item: &'a RequestMessage, dst: &mut BytesMut) -> Result<()> {
        if item.len() < HEADER_SIZE {
            return Err(GeodeError::Protocol(
                "cannot encode a message without header".to_string(),
            ));
        }
        dst.extend_from_slice(item.as_bytes());
        Ok(())
    }
}

impl Decoder for MessageCodec {
    type Item = RawMessage;
    type Error = GeodeError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }
        let header = MessageHeader::parse(src)?;
        if header.body_length < 0 {
            return Err(GeodeError::Protocol(format!(
                "negative body length {}",
                header.body_length
            )));
        }
        let total = HEADER_SIZE + header.body_length as usize;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }
        let frame = src.split_to(total).freeze();
        RawMessage::parse(frame).map(Some)
    }
}

/// Position of a [`ChunkCodec`] inside a chunked reply.
#[derive(Debug, Clone, Copy)]
struct ReplyInProgress {
    message_type: i32,
    num_parts: i32,
    transaction_id: i32,
}

/// Codec for the chunks of one chunked reply.
///
/// The first chunk is read with the full chunked-response header; later
/// chunks inherit its message type. After the last chunk the codec expects
/// the first chunk of a new reply.
#[derive(Debug, Default)]
pub struct ChunkCodec {
    current: Option<ReplyInProgress>,
}

impl ChunkCodec {
    /// Creates a new codec instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true while a reply has been started but not finished.
    pub fn in_reply(&self) -> bool {
        self.current.is_some()
    }

    /// Forgets a partially read reply.
    pub fn reset(&mut self) {
        self.current = None;
    }
}

fn take_body(src: &mut BytesMut, header_len: usize, body_len: usize) -> Option<bytes::Bytes> {
    let total = header_len + body_len;
    if src.len() < total {
        src.reserve(total - src.len());
        return None;
    }
    let mut frame = src.split_to(total);
    let _ = frame.split_to(header_len);
    Some(frame.freeze())
}

impl Decoder for ChunkCodec {
    type Item = Chunk;
    type Error = GeodeError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        let chunk = match self.current {
            None => {
                if src.len() < CHUNKED_RESPONSE_HEADER_SIZE {
                    return Ok(None);
                }
                let header = ChunkedResponseHeader::parse(src)?;
                let Some(body) = take_body(
                    src,
                    CHUNKED_RESPONSE_HEADER_SIZE,
                    header.chunk.length as usize,
                ) else {
                    return Ok(None);
                };
                Chunk::new(
                    header.message_type,
                    header.num_parts,
                    header.transaction_id,
                    header.chunk.flags,
                    body,
                )
            }
            Some(reply) => {
                if src.len() < CHUNK_HEADER_SIZE {
                    return Ok(None);
                }
                let header = ChunkHeader::parse(src)?;
                let Some(body) = take_body(src, CHUNK_HEADER_SIZE, header.length as usize) else {
                    return Ok(None);
                };
                Chunk::new(
                    reply.message_type,
                    reply.num_parts,
                    reply.transaction_id,
                    header.flags,
                    body,
                )
            }
        };
        self.current = if chunk.is_last() {
            None
        } else {
            Some(ReplyInProgress {
                message_type: chunk.message_type(),
                num_parts: chunk.num_parts(),
                transaction_id: chunk.transaction_id(),
            })
        };
        Ok(Some(chunk))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::chunk::{ChunkedReply, QueryResultCollector, QueryResults};
    use crate::protocol::part::Part;
    use crate::protocol::requests;
    use crate::protocol::HeaderOptions;
    use crate::serialization::{CacheableValue, DataOutput, DsCode, ObjectDataOutput, Serializable};

    fn encode_chunks(message_type: MessageType, chunks: &[Vec<Part>]) -> BytesMut {
        let mut buf = BytesMut::new();
        for (i, parts) in chunks.iter().enumerate() {
            let mut body = BytesMut::new();
            for part in parts {
                part.write_to(&mut body);
            }
            let flags = if i + 1 == chunks.len() { CHUNK_LAST } else { 0 };
            let chunk = ChunkHeader {
                length: body.len() as i32,
                flags,
            };
            if i == 0 {
                ChunkedResponseHeader {
                    message_type: message_type.code(),
                    num_parts: parts.len() as i32,
                    transaction_id: NO_TRANSACTION,
                    chunk,
                }
                .write_to(&mut buf);
            } else {
                chunk.write_to(&mut buf);
            }
            buf.extend_from_slice(&body);
        }
        buf
    }

    fn decode_all(codec: &mut ChunkCodec, bytes: &[u8], step: usize) -> Vec<Chunk> {
        let mut src = BytesMut::new();
        let mut out = Vec::new();
        for piece in bytes.chunks(step) {
            src.extend_from_slice(piece);
            while let Some(chunk) = codec.decode(&mut src).unwrap() {
                out.push(chunk);
            }
        }
        assert!(src.is_empty());
        out
    }

    fn query_chunk(values: &[CacheableValue]) -> Vec<Part> {
        let mut header = ObjectDataOutput::new();
        header.write_unsigned_byte(DsCode::FixedIdByte as u8).unwrap();
        header.write_unsigned_byte(59).unwrap();
        header.write_unsigned_byte(DsCode::Class as u8).unwrap();
        header.write_string("CollectionTypeImpl").unwrap();
        header.write_bytes(&[1, 45, 43]).unwrap();
        header.write_string("java.lang.Object").unwrap();

        let mut body = ObjectDataOutput::new();
        body.write_unsigned_byte(DsCode::ObjectArray as u8).unwrap();
        body.write_array_len(values.len() as i32).unwrap();
        body.write_unsigned_byte(DsCode::Class as u8).unwrap();
        body.write_string("java.lang.Object").unwrap();
        for v in values {
            v.serialize(&mut body).unwrap();
        }
        vec![
            Part::object(header.into_bytes()),
            Part::object(body.into_bytes()),
        ]
    }

    #[test]
    fn test_encode_decode_request_frame() {
        let mut codec = MessageCodec::new();
        let request = requests::ping(HeaderOptions::default()).unwrap();
        let mut buf = BytesMut::new();
        codec.encode(&request, &mut buf).unwrap();
        assert_eq!(&buf[..], request.as_bytes());

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.message_type(), MessageType::Ping.code());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_incomplete_message() {
        let mut codec = MessageCodec::new();
        let request = requests::ping(HeaderOptions::default()).unwrap();
        let bytes = request.as_bytes();
        let mut buf = BytesMut::from(&bytes[..HEADER_SIZE - 1]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(&bytes[HEADER_SIZE - 1..bytes.len() - 1]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(&bytes[bytes.len() - 1..]);
        assert!(codec.decode(&mut buf).unwrap().is_some());
    }

    #[test]
    fn test_decode_back_to_back_messages() {
        let mut codec = MessageCodec::new();
        let mut buf = BytesMut::new();
        for _ in 0..3 {
            codec
                .encode(requests::ping(HeaderOptions::default()).unwrap(), &mut buf)
                .unwrap();
        }
        let mut count = 0;
        while codec.decode(&mut buf).unwrap().is_some() {
            count += 1;
        }
        assert_eq!(count, 3);
    }

    #[test]
    fn test_decode_negative_body_length() {
        let mut codec = MessageCodec::new();
        let mut buf = BytesMut::new();
        MessageHeader {
            message_type: MessageType::Reply.code(),
            body_length: -1,
            num_parts: 0,
            transaction_id: NO_TRANSACTION,
            flags: 0,
        }
        .write_to(&mut buf);
        assert!(codec.decode(&mut buf).is_err());
    }

    #[test]
    fn test_chunks_inherit_first_header() {
        let bytes = encode_chunks(
            MessageType::ExecuteFunctionResult,
            &[vec![Part::int(1)], vec![Part::int(2)], vec![]],
        );
        let mut codec = ChunkCodec::new();
        let chunks = decode_all(&mut codec, &bytes, bytes.len());
        assert_eq!(chunks.len(), 3);
        assert!(chunks
            .iter()
            .all(|c| c.message_type() == MessageType::ExecuteFunctionResult.code()));
        assert!(!chunks[0].is_last());
        assert!(chunks[2].is_last());
        assert!(chunks[2].body().is_empty());
        assert!(!codec.in_reply());
    }

    #[test]
    fn test_chunk_decoding_is_independent_of_read_sizes() {
        let bytes = encode_chunks(
            MessageType::Response,
            &[vec![Part::int(1), Part::string("a")], vec![Part::int(2)]],
        );
        let whole = decode_all(&mut ChunkCodec::new(), &bytes, bytes.len());
        for step in [1, 3, 7, 16] {
            assert_eq!(decode_all(&mut ChunkCodec::new(), &bytes, step), whole);
        }
    }

    #[test]
    fn test_chunk_boundaries_do_not_change_results() {
        let values: Vec<CacheableValue> = (0..6).map(CacheableValue::Int).collect();
        let layouts: [&[usize]; 3] = [&[6], &[2, 2, 2], &[1, 5]];
        let mut outcomes = Vec::new();
        for layout in layouts {
            let mut start = 0;
            let mut chunks = Vec::new();
            for len in layout {
                chunks.push(query_chunk(&values[start..start + len]));
                start += len;
            }
            let bytes = encode_chunks(MessageType::Response, &chunks);
            let decoded = decode_all(&mut ChunkCodec::new(), &bytes, 5);
            let mut reply = ChunkedReply::new(MessageType::Query, QueryResultCollector::new());
            reply.reset();
            for chunk in &decoded {
                reply.process(chunk);
            }
            outcomes.push(reply.finish().unwrap().into_results().unwrap());
        }
        assert!(outcomes.iter().all(|o| *o == QueryResults::ResultSet(values.clone())));
    }

    #[test]
    fn test_codec_ready_for_next_reply() {
        let mut bytes = encode_chunks(MessageType::Response, &[vec![Part::int(1)]]);
        bytes.extend_from_slice(&encode_chunks(
            MessageType::ExecuteFunctionResult,
            &[vec![Part::int(2)]],
        ));
        let chunks = decode_all(&mut ChunkCodec::new(), &bytes, 4);
        assert_eq!(chunks[0].message_type(), MessageType::Response.code());
        assert_eq!(
            chunks[1].message_type(),
            MessageType::ExecuteFunctionResult.code()
        );
    }
}
