//! Single connection to a Geode server.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use bytes::BytesMut;
use geode_core::protocol::{
    requests, ChunkCodec, ChunkHandler, ChunkedReply, HeaderOptions, MessageCodec, RawMessage,
    RequestMessage, ServerHandshake, ServerQueueStatus, DEFAULT_TIMEOUT_RETRIES,
};
use geode_core::{GeodeError, Result, ServerLocation};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::codec::{Decoder, Encoder};

use super::chunk_processor::ChunkProcessor;
use super::handshake::{self, HandshakeSettings};

/// Bound on the close-connection notice sent to the server.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generates a new unique connection ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw ID value.
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Who currently owns a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    /// Free to be claimed.
    Idle,
    /// Claimed by one operation.
    InUse,
    /// Claimed by a transaction until it ends.
    InTransaction(i32),
}

const FLAG_IDLE: i64 = 0;
const FLAG_IN_USE: i64 = -1;

/// Atomic claim on a connection.
///
/// An operation claims an idle connection for itself; a transaction claims
/// it for all of its operations and may claim it again while it holds it.
#[derive(Debug, Default)]
pub struct OwnershipFlag(AtomicI64);

impl OwnershipFlag {
    /// Creates an idle flag.
    pub fn new() -> Self {
        Self(AtomicI64::new(FLAG_IDLE))
    }

    /// Claims the connection for one operation.
    pub fn try_claim(&self) -> bool {
        self.0
            .compare_exchange(FLAG_IDLE, FLAG_IN_USE, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Claims the connection for a transaction. Succeeds again while the
    /// same transaction holds it.
    pub fn try_claim_for_transaction(&self, transaction_id: i32) -> bool {
        if transaction_id < 0 {
            return self.try_claim();
        }
        let tx = i64::from(transaction_id) + 1;
        match self
            .0
            .compare_exchange(FLAG_IDLE, tx, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => true,
            Err(current) => current == tx,
        }
    }

    /// Releases an operation claim. A transaction claim is kept.
    pub fn release(&self) {
        let _ = self.0.compare_exchange(
            FLAG_IN_USE,
            FLAG_IDLE,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Releases the claim of `transaction_id`. Returns false if the
    /// transaction did not hold the connection.
    pub fn release_transaction(&self, transaction_id: i32) -> bool {
        if transaction_id < 0 {
            return false;
        }
        let tx = i64::from(transaction_id) + 1;
        self.0
            .compare_exchange(tx, FLAG_IDLE, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Returns the current owner.
    pub fn state(&self) -> Ownership {
        match self.0.load(Ordering::Acquire) {
            FLAG_IDLE => Ownership::Idle,
            FLAG_IN_USE => Ownership::InUse,
            tx => Ownership::InTransaction((tx - 1) as i32),
        }
    }
}

/// Reply timeouts of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionTimeouts {
    /// Bound on opening the socket and the handshake.
    pub connect: Duration,
    /// Default bound on writing a request and reading its reply.
    pub read: Duration,
}

/// A handshaken connection to one server.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    server: ServerLocation,
    stream: TcpStream,
    codec: MessageCodec,
    chunk_codec: ChunkCodec,
    read_buffer: BytesMut,
    timeouts: ConnectionTimeouts,
    created_at: Instant,
    last_accessed_at: Instant,
    last_read_at: Instant,
    last_write_at: Instant,
    queue_status: ServerQueueStatus,
    queue_size: i32,
    ownership: OwnershipFlag,
    broken: bool,
}

impl Connection {
    /// Opens a socket to `server` and performs the handshake.
    ///
    /// Returns the connection and the server's handshake reply. A failed
    /// handshake discards the socket.
    pub async fn connect(
        server: &ServerLocation,
        settings: &HandshakeSettings,
        timeouts: ConnectionTimeouts,
    ) -> Result<(Self, ServerHandshake)> {
        let address = server.address();
        let mut stream = tokio::time::timeout(timeouts.connect, TcpStream::connect(&address))
            .await
            .map_err(|_| {
                GeodeError::Timeout(format!(
                    "connection to {} timed out after {:?}",
                    server, timeouts.connect
                ))
            })?
            .map_err(|e| GeodeError::Connection(format!("failed to connect to {}: {}", server, e)))?;

        stream.set_nodelay(true).map_err(|e| {
            GeodeError::Connection(format!("failed to set TCP_NODELAY: {}", e))
        })?;

        let (reply, leftover) = handshake::perform(&mut stream, server, settings).await?;

        let now = Instant::now();
        let connection = Self {
            id: ConnectionId::new(),
            server: server.clone(),
            stream,
            codec: MessageCodec::new(),
            chunk_codec: ChunkCodec::new(),
            read_buffer: leftover,
            timeouts,
            created_at: now,
            last_accessed_at: now,
            last_read_at: now,
            last_write_at: now,
            queue_status: reply.queue_status,
            queue_size: reply.queue_size,
            ownership: OwnershipFlag::new(),
            broken: false,
        };
        tracing::debug!(id = %connection.id, address = %server, "established connection");
        Ok((connection, reply))
    }

    /// Returns the connection's unique identifier.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Returns the server this connection is bound to.
    pub fn server(&self) -> &ServerLocation {
        &self.server
    }

    /// Returns the local port of the socket.
    pub fn local_port(&self) -> Option<u16> {
        self.stream.local_addr().ok().map(|a| a.port())
    }

    /// Returns when this connection was created.
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Returns when data was last read from this connection.
    pub fn last_read_at(&self) -> Instant {
        self.last_read_at
    }

    /// Returns when data was last written to this connection.
    pub fn last_write_at(&self) -> Instant {
        self.last_write_at
    }

    /// Returns the server's subscription queue role reported in the handshake.
    pub fn queue_status(&self) -> ServerQueueStatus {
        self.queue_status
    }

    /// Returns the subscription queue size reported in the handshake.
    pub fn queue_size(&self) -> i32 {
        self.queue_size
    }

    /// Returns the ownership flag.
    pub fn ownership(&self) -> &OwnershipFlag {
        &self.ownership
    }

    /// Returns true once a failure left the stream at an unknown position.
    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// Marks the connection as unusable.
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }

    /// Returns true if the connection is older than `max_age`. A zero age
    /// never expires.
    pub fn has_expired(&self, max_age: Duration) -> bool {
        !max_age.is_zero() && self.created_at.elapsed() > max_age
    }

    /// Returns true if the connection was not used for `max_idle`. A zero
    /// idle time never triggers.
    pub fn is_idle(&self, max_idle: Duration) -> bool {
        !max_idle.is_zero() && self.last_accessed_at.elapsed() > max_idle
    }

    /// Records a use of the connection.
    pub fn touch(&mut self) {
        self.last_accessed_at = Instant::now();
    }

    /// Restarts the age of the connection.
    pub fn update_creation_time(&mut self) {
        self.created_at = Instant::now();
        self.touch();
    }

    /// Sends a message over this connection.
    pub async fn send(&mut self, message: &RequestMessage) -> Result<()> {
        self.ensure_usable()?;
        let mut buf = BytesMut::with_capacity(message.len());
        self.codec.encode(message, &mut buf)?;

        match tokio::time::timeout(self.timeouts.read, self.stream.write_all(&buf)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                self.broken = true;
                return Err(GeodeError::Connection(format!(
                    "failed to write to {}: {}",
                    self.server, e
                )));
            }
            Err(_) => {
                self.broken = true;
                return Err(GeodeError::Timeout(format!(
                    "write to {} timed out after {:?}",
                    self.server, self.timeouts.read
                )));
            }
        }

        self.last_write_at = Instant::now();
        self.touch();
        Ok(())
    }

    /// Receives a message from this connection.
    ///
    /// Returns `None` if the connection is closed cleanly.
    pub async fn receive(&mut self) -> Result<Option<RawMessage>> {
        loop {
            if let Some(message) = self.decode_message()? {
                return Ok(Some(message));
            }

            let bytes_read = match self.stream.read_buf(&mut self.read_buffer).await {
                Ok(n) => n,
                Err(e) => {
                    self.broken = true;
                    return Err(GeodeError::Connection(format!(
                        "failed to read from {}: {}",
                        self.server, e
                    )));
                }
            };

            if bytes_read == 0 {
                self.broken = true;
                if self.read_buffer.is_empty() {
                    return Ok(None);
                }
                return Err(GeodeError::Connection(format!(
                    "connection to {} closed unexpectedly",
                    self.server
                )));
            }
        }
    }

    /// Reads one unchunked reply within `timeout`.
    pub async fn receive_reply(&mut self, timeout: Duration) -> Result<RawMessage> {
        let deadline = Instant::now() + timeout;
        let slices = if timeout == self.timeouts.read {
            DEFAULT_TIMEOUT_RETRIES
        } else {
            1
        };
        loop {
            if let Some(message) = self.decode_message()? {
                return Ok(message);
            }
            self.fill_read_buffer(deadline, timeout, slices).await?;
        }
    }

    /// Sends a request and reads its unchunked reply.
    ///
    /// The request's own reply timeout overrides the connection default.
    pub async fn send_request(&mut self, request: &RequestMessage) -> Result<RawMessage> {
        let timeout = request.reply_timeout().unwrap_or(self.timeouts.read);
        self.send(request).await?;
        self.receive_reply(timeout).await
    }

    /// Sends a request and feeds every chunk of the reply to `reply`.
    ///
    /// Chunks are decoded on a separate task; this returns once the last
    /// chunk has been processed. Failures raised while processing are kept
    /// on the reply and do not stop the remaining chunks from being read.
    pub async fn send_request_chunked<H>(
        &mut self,
        request: &RequestMessage,
        reply: ChunkedReply<H>,
    ) -> Result<ChunkedReply<H>>
    where
        H: ChunkHandler + 'static,
    {
        let timeout = request.reply_timeout().unwrap_or(self.timeouts.read);
        self.send(request).await?;

        let deadline = Instant::now() + timeout;
        let processor = ChunkProcessor::spawn(reply);
        loop {
            let decoded = self.chunk_codec.decode(&mut self.read_buffer);
            match decoded {
                Ok(Some(chunk)) => {
                    self.last_read_at = Instant::now();
                    let last = chunk.is_last();
                    processor.submit(chunk).await?;
                    if last {
                        break;
                    }
                }
                Ok(None) => self.fill_read_buffer(deadline, timeout, 1).await?,
                Err(e) => {
                    self.broken = true;
                    self.chunk_codec.reset();
                    return Err(e);
                }
            }
        }
        processor.finish().await
    }

    /// Sends a ping and waits for the acknowledgement.
    pub async fn ping(&mut self) -> Result<()> {
        let request = requests::ping(HeaderOptions::default())?;
        self.send_request(&request).await.map(|_| ())
    }

    /// Closes this connection.
    ///
    /// Unless `grid_client` is set the server is told first, asking it to
    /// keep the durable queue when `keep_alive` is set. Failures are logged.
    pub async fn close(mut self, keep_alive: bool, grid_client: bool) {
        if !grid_client && !self.broken {
            if let Err(e) = self.send_close(keep_alive).await {
                tracing::warn!(
                    id = %self.id,
                    address = %self.server,
                    error = %e,
                    "failed to send close connection message"
                );
            }
        }
        let _ = self.stream.shutdown().await;
        tracing::debug!(id = %self.id, address = %self.server, "connection closed");
    }

    async fn send_close(&mut self, keep_alive: bool) -> Result<()> {
        let request = requests::close_connection(keep_alive, HeaderOptions::default())?;
        tokio::time::timeout(CLOSE_TIMEOUT, self.send(&request))
            .await
            .map_err(|_| GeodeError::Timeout("close connection message timed out".to_string()))?
    }

    fn ensure_usable(&self) -> Result<()> {
        if self.broken {
            return Err(GeodeError::Connection(format!(
                "connection {} to {} is no longer usable",
                self.id, self.server
            )));
        }
        Ok(())
    }

    fn decode_message(&mut self) -> Result<Option<RawMessage>> {
        match self.codec.decode(&mut self.read_buffer) {
            Ok(Some(message)) => {
                self.last_read_at = Instant::now();
                Ok(Some(message))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                self.broken = true;
                Err(e)
            }
        }
    }

    /// Reads more bytes before `deadline`.
    ///
    /// While nothing of the reply has arrived the wait is split into
    /// `slices` shorter waits.
    async fn fill_read_buffer(
        &mut self,
        deadline: Instant,
        timeout: Duration,
        slices: u32,
    ) -> Result<()> {
        let slice = if self.read_buffer.is_empty() && slices > 1 {
            timeout / slices
        } else {
            timeout
        };
        let mut attempt = 0u32;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                self.broken = true;
                return Err(GeodeError::Timeout(format!(
                    "no reply from {} within {:?}",
                    self.server, timeout
                )));
            }
            let wait = slice.min(remaining);
            match tokio::time::timeout(wait, self.stream.read_buf(&mut self.read_buffer)).await {
                Ok(Ok(0)) => {
                    self.broken = true;
                    return Err(GeodeError::Connection(format!(
                        "connection to {} closed unexpectedly",
                        self.server
                    )));
                }
                Ok(Ok(_)) => return Ok(()),
                Ok(Err(e)) => {
                    self.broken = true;
                    return Err(GeodeError::Connection(format!(
                        "failed to read from {}: {}",
                        self.server, e
                    )));
                }
                Err(_) => {
                    attempt += 1;
                    tracing::trace!(
                        id = %self.id,
                        address = %self.server,
                        attempt = attempt,
                        "still waiting for reply"
                    );
                }
            }
        }
    }
}
