//! Scripted Geode server for integration tests.
//!
//! A [`MockServer`] accepts connections on an ephemeral port, reads the
//! client handshake, answers with a scripted acceptance code and then serves
//! every request frame through a responder closure. Notifications queued
//! with [`MockServer::push`] are written to the subscription channel.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use geode_client::core::protocol::chunk::{ChunkHeader, ChunkedResponseHeader};
use geode_client::core::protocol::{
    MessageHeader, MessageType, Part, RawMessage, CHUNK_LAST, HEADER_SIZE, NO_TRANSACTION,
};
use geode_client::core::serialization::{
    DataInput, DataOutput, Deserializable, DsCode, ObjectDataInput, ObjectDataOutput, Serializable,
};
use geode_client::core::{CacheableValue, ServerLocation};
use geode_client::ClientConfig;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub const DATA_CHANNEL: u8 = 100;
pub const ENTRY_VALUE: u8 = 0;
pub const ENTRY_EXCEPTION: u8 = 2;
pub const ENTRY_NOT_FOUND: u8 = 3;
pub const REPLY_OK: u8 = 58;
pub const SUCCESSFUL_SERVER_TO_CLIENT: u8 = 105;

/// Routes client logs to the test output, filtered by `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Builds the reply frame for one request; `None` sends nothing.
pub type Responder = Arc<dyn Fn(&RawMessage) -> Option<Bytes> + Send + Sync>;

pub struct MockServer {
    pub location: ServerLocation,
    requests: Arc<Mutex<Vec<RawMessage>>>,
    handshakes: Arc<Mutex<Vec<u8>>>,
    pushes: mpsc::UnboundedSender<Bytes>,
    task: JoinHandle<()>,
}

impl MockServer {
    /// Starts a server that accepts every handshake.
    pub async fn start(responder: Responder) -> Self {
        Self::start_with_code(REPLY_OK, "", responder).await
    }

    /// Starts a server answering data-channel handshakes with `code`.
    pub async fn start_with_code(code: u8, message: &str, responder: Responder) -> Self {
        init_tracing();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let handshakes = Arc::new(Mutex::new(Vec::new()));
        let (pushes, push_rx) = mpsc::unbounded_channel();
        let push_rx = Arc::new(tokio::sync::Mutex::new(push_rx));

        let message = message.to_string();
        let task = {
            let requests = Arc::clone(&requests);
            let handshakes = Arc::clone(&handshakes);
            tokio::spawn(async move {
                loop {
                    let Ok((stream, _)) = listener.accept().await else {
                        return;
                    };
                    let conn = Session {
                        code,
                        message: message.clone(),
                        responder: Arc::clone(&responder),
                        requests: Arc::clone(&requests),
                        handshakes: Arc::clone(&handshakes),
                        pushes: Arc::clone(&push_rx),
                    };
                    tokio::spawn(conn.run(stream));
                }
            })
        };

        Self {
            location: ServerLocation::new("127.0.0.1", port),
            requests,
            handshakes,
            pushes,
            task,
        }
    }

    /// Returns the requests served so far.
    pub fn requests(&self) -> Vec<RawMessage> {
        self.requests.lock().unwrap().clone()
    }

    /// Returns the requests of the given type.
    pub fn requests_of(&self, kind: MessageType) -> Vec<RawMessage> {
        self.requests()
            .into_iter()
            .filter(|r| r.message_type() == kind.code())
            .collect()
    }

    /// Returns the direction byte of every handshake received.
    pub fn handshakes(&self) -> Vec<u8> {
        self.handshakes.lock().unwrap().clone()
    }

    /// Queues a frame for the subscription channel.
    pub fn push(&self, frame: Bytes) {
        self.pushes.send(frame).unwrap();
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct Session {
    code: u8,
    message: String,
    responder: Responder,
    requests: Arc<Mutex<Vec<RawMessage>>>,
    handshakes: Arc<Mutex<Vec<u8>>>,
    pushes: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Bytes>>>,
}

impl Session {
    async fn run(self, mut stream: TcpStream) {
        let Ok(direction) = read_handshake(&mut stream).await else {
            return;
        };
        self.handshakes.lock().unwrap().push(direction);

        if direction != DATA_CHANNEL {
            let reply = notification_handshake_reply(SUCCESSFUL_SERVER_TO_CLIENT);
            if stream.write_all(&reply).await.is_err() {
                return;
            }
            let mut pushes = self.pushes.lock().await;
            while let Some(frame) = pushes.recv().await {
                if stream.write_all(&frame).await.is_err() {
                    return;
                }
            }
            return;
        }

        let reply = data_handshake_reply(self.code, &self.message);
        if stream.write_all(&reply).await.is_err() || self.code != REPLY_OK {
            return;
        }

        loop {
            let mut header = [0u8; HEADER_SIZE];
            if stream.read_exact(&mut header).await.is_err() {
                return;
            }
            let parsed = MessageHeader::parse(&header).unwrap();
            let mut frame = BytesMut::with_capacity(HEADER_SIZE + parsed.body_length as usize);
            frame.extend_from_slice(&header);
            frame.resize(HEADER_SIZE + parsed.body_length as usize, 0);
            if stream.read_exact(&mut frame[HEADER_SIZE..]).await.is_err() {
                return;
            }
            let request = RawMessage::parse(frame.freeze()).unwrap();
            let reply = (self.responder)(&request);
            self.requests.lock().unwrap().push(request);
            if let Some(reply) = reply {
                if stream.write_all(&reply).await.is_err() {
                    return;
                }
            }
        }
    }
}

async fn read_array_len(stream: &mut TcpStream) -> std::io::Result<usize> {
    Ok(match stream.read_u8().await? {
        0xFE => stream.read_u16().await? as usize,
        0xFD => stream.read_i32().await? as usize,
        0xFF => 0,
        n => n as usize,
    })
}

/// Drains a handshake request sent without credentials and returns its
/// direction byte.
async fn read_handshake(stream: &mut TcpStream) -> std::io::Result<u8> {
    let mut head = [0u8; 3];
    stream.read_exact(&mut head).await?;
    if head[0] == DATA_CHANNEL {
        stream.read_i32().await?;
    } else {
        let ports = stream.read_i32().await?;
        for _ in 0..ports {
            stream.read_i32().await?;
        }
    }
    let mut ids = [0u8; 2];
    stream.read_exact(&mut ids).await?;
    let len = read_array_len(stream).await?;
    let mut membership = vec![0u8; len];
    stream.read_exact(&mut membership).await?;
    stream.read_i32().await?;
    stream.read_u8().await?;
    stream.read_u8().await?;
    Ok(head[0])
}

pub fn data_handshake_reply(code: u8, message: &str) -> Vec<u8> {
    let mut out = vec![code];
    if code == 21 {
        return out;
    }
    out.push(0);
    out.extend_from_slice(&0i32.to_be_bytes());
    let member = b"mock-server";
    out.push(member.len() as u8);
    out.extend_from_slice(member);
    out.extend_from_slice(&(message.len() as u16).to_be_bytes());
    out.extend_from_slice(message.as_bytes());
    out.push(0);
    out
}

pub fn notification_handshake_reply(code: u8) -> Vec<u8> {
    let mut out = vec![code, 0];
    out.extend_from_slice(&0i32.to_be_bytes());
    out.extend_from_slice(&0u16.to_be_bytes());
    // no instantiators, serializers or data-serializer classes
    out.extend_from_slice(&[0, 0, 0]);
    out
}

pub fn object(value: &CacheableValue) -> Part {
    let mut out = ObjectDataOutput::new();
    value.serialize(&mut out).unwrap();
    Part::object(out.into_bytes())
}

pub fn bool_object(v: bool) -> Part {
    object(&CacheableValue::Bool(v))
}

/// Encodes an unchunked message.
pub fn message(kind: MessageType, parts: &[Part]) -> Bytes {
    let body_length = parts.iter().map(Part::wire_size).sum::<usize>() as i32;
    let mut buf = BytesMut::new();
    MessageHeader {
        message_type: kind.code(),
        body_length,
        num_parts: parts.len() as i32,
        transaction_id: NO_TRANSACTION,
        flags: 0,
    }
    .write_to(&mut buf);
    for part in parts {
        part.write_to(&mut buf);
    }
    buf.freeze()
}

/// Encodes a reply made of a single last chunk.
pub fn single_chunk(kind: MessageType, parts: &[Part]) -> Bytes {
    let length = parts.iter().map(Part::wire_size).sum::<usize>() as i32;
    let mut buf = BytesMut::new();
    ChunkedResponseHeader {
        message_type: kind.code(),
        num_parts: parts.len() as i32,
        transaction_id: NO_TRANSACTION,
        chunk: ChunkHeader {
            length,
            flags: CHUNK_LAST,
        },
    }
    .write_to(&mut buf);
    for part in parts {
        part.write_to(&mut buf);
    }
    buf.freeze()
}

/// Reply to a get carrying `value`.
pub fn get_reply(value: &CacheableValue) -> Bytes {
    message(MessageType::Response, &[object(value), Part::int(0)])
}

/// Reply to a put without an old value.
pub fn put_reply() -> Bytes {
    message(MessageType::Reply, &[Part::bytes(Bytes::new()), Part::int(0)])
}

/// Reply to a partition attributes request.
pub fn partition_attributes_reply(total_buckets: i32) -> Bytes {
    message(
        MessageType::ResponseClientPartitionAttributes,
        &[object(&CacheableValue::Int(total_buckets)), Part::bytes(Bytes::new())],
    )
}

/// Returns the key of a get, put or destroy request.
pub fn request_key(request: &RawMessage) -> CacheableValue {
    let index = if request.message_type() == MessageType::Put.code() {
        3
    } else {
        1
    };
    request.parts()[index].as_object().unwrap()
}

/// Returns the keys named by a getAll request.
pub fn get_all_keys(request: &RawMessage) -> Vec<CacheableValue> {
    let part = &request.parts()[1];
    let mut input = ObjectDataInput::new(part.payload());
    input.read_unsigned_byte().unwrap();
    let count = input.read_array_len().unwrap();
    input.read_unsigned_byte().unwrap();
    input.read_string().unwrap();
    (0..count)
        .map(|_| CacheableValue::deserialize(&mut input).unwrap())
        .collect()
}

/// Returns the keys of a putAll or removeAll request.
pub fn bulk_keys(request: &RawMessage) -> Vec<CacheableValue> {
    let step = if request.message_type() == MessageType::PutAll.code() {
        2
    } else {
        1
    };
    let parts = request.parts();
    let count = parts[4].as_int().unwrap() as usize;
    (0..count)
        .map(|i| parts[5 + i * step].as_object().unwrap())
        .collect()
}

/// Encodes a versioned object list without keys. Exception entries carry
/// their message as the value.
pub fn versioned_list(entries: &[(u8, CacheableValue)]) -> Part {
    let mut out = ObjectDataOutput::new();
    out.write_unsigned_byte(DsCode::FixedIdByte as u8).unwrap();
    out.write_unsigned_byte(7).unwrap();
    if entries.is_empty() {
        out.write_unsigned_byte(0).unwrap();
        return Part::object(out.into_bytes());
    }
    // has objects
    out.write_unsigned_byte(0x02).unwrap();
    out.write_unsigned_vl(entries.len() as u64).unwrap();
    for (entry_type, value) in entries {
        out.write_unsigned_byte(*entry_type).unwrap();
        if *entry_type == ENTRY_EXCEPTION {
            out.write_byte_array(Some(&[0xAC, 0xED])).unwrap();
            out.write_string(&value.to_string()).unwrap();
        } else {
            value.serialize(&mut out).unwrap();
        }
    }
    Part::object(out.into_bytes())
}

/// Chunk reporting a server exception with `message`.
pub fn exception_chunk(message: &str) -> Bytes {
    single_chunk(
        MessageType::Exception,
        &[
            Part::object(vec![DsCode::JavaSerializable as u8, 0xAC, 0xED]),
            Part::string(message),
        ],
    )
}

/// Chunk carrying one function result.
pub fn function_result(kind: MessageType, value: &CacheableValue) -> Bytes {
    let mut out = ObjectDataOutput::new();
    out.write_unsigned_byte(DsCode::ArrayList as u8).unwrap();
    out.write_array_len(2).unwrap();
    value.serialize(&mut out).unwrap();
    CacheableValue::from("mock-member").serialize(&mut out).unwrap();
    single_chunk(kind, &[Part::object(out.into_bytes())])
}

pub fn config_for(servers: &[&MockServer]) -> ClientConfig {
    ClientConfig::builder()
        .pool(|p| {
            p.servers(servers.iter().map(|s| s.location.clone()))
                .connect_timeout(Duration::from_secs(2))
                .read_timeout(Duration::from_secs(2))
        })
        .build()
        .unwrap()
}

/// Polls `condition` until it holds or two seconds pass.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}
