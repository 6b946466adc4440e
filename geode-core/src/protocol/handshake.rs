//! Connection handshake encoding and decoding.
//!
//! A handshake is a single request written by the client followed by a
//! variable-length reply. When Diffie-Hellman credentials are negotiated the
//! reply is interrupted by a key-exchange round trip, so the reply side is a
//! [`Decoder`] that yields [`HandshakeEvent`]s as soon as enough bytes have
//! arrived.

use bytes::{Buf, BytesMut};
use tokio_util::codec::Decoder;

use crate::error::{GeodeError, Result};
use crate::serialization::{
    modified_utf8, DataOutput, DsCode, ObjectDataOutput, CLIENT_PROXY_MEMBERSHIP_ID,
};

/// Direction byte of a data connection.
pub const CLIENT_TO_SERVER: u8 = 100;
/// Direction byte of a primary subscription channel.
pub const PRIMARY_SERVER_TO_CLIENT: u8 = 101;
/// Direction byte of a secondary subscription channel.
pub const SECONDARY_SERVER_TO_CLIENT: u8 = 102;
/// Acceptance code of a successful subscription handshake.
pub const SUCCESSFUL_SERVER_TO_CLIENT: u8 = 105;
/// Acceptance code of a failed subscription handshake.
pub const UNSUCCESSFUL_SERVER_TO_CLIENT: u8 = 106;

/// Handshake accepted.
pub const REPLY_OK: u8 = 58;
/// Handshake refused.
pub const REPLY_REFUSED: u8 = 60;
/// Handshake bytes were not understood.
pub const REPLY_INVALID: u8 = 61;
/// The server requires credentials.
pub const REPLY_AUTHENTICATION_REQUIRED: u8 = 62;
/// The server rejected the credentials.
pub const REPLY_AUTHENTICATION_FAILED: u8 = 63;
/// A durable client with the same id is connected.
pub const REPLY_DUPLICATE_DURABLE_CLIENT: u8 = 64;
/// The server only accepts TLS connections.
pub const REPLY_SSL_ENABLED: u8 = 21;

/// Read timeout advertised on data connections.
pub const HANDSHAKE_READ_TIMEOUT: i32 = i32::MAX - 10_000;

/// Length of the random challenge sent when the server must authenticate.
pub const SERVER_CHALLENGE_LEN: usize = 64;

/// Queue status byte meaning the server hosts a redundant queue.
const QUEUE_STATUS_REDUNDANT: u8 = 1;
/// Queue status byte meaning the server hosts the primary queue.
const QUEUE_STATUS_PRIMARY: u8 = 2;

/// The role of a connection, which selects the direction byte and the
/// optional handshake sections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    /// A request/reply connection.
    Data,
    /// A subscription channel on which the server pushes events.
    Notification {
        /// True when this server hosts the primary subscription queue.
        primary: bool,
    },
}

impl ChannelKind {
    /// Returns the direction byte sent first in the handshake.
    pub fn direction(&self) -> u8 {
        match self {
            ChannelKind::Data => CLIENT_TO_SERVER,
            ChannelKind::Notification { primary: true } => PRIMARY_SERVER_TO_CLIENT,
            ChannelKind::Notification { primary: false } => SECONDARY_SERVER_TO_CLIENT,
        }
    }

    /// Returns true for subscription channels.
    pub fn is_notification(&self) -> bool {
        matches!(self, ChannelKind::Notification { .. })
    }
}

/// Credential mode announced by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SecurityMode {
    /// No credentials.
    None = 0,
    /// Plain credentials sent in the handshake or per user.
    Normal = 1,
    /// Credentials encrypted with a Diffie-Hellman negotiated key.
    DhEncrypt = 2,
    /// Subscription channel of a multi-user pool.
    MultiUserNotificationChannel = 3,
}

/// Client override of the server's event conflation setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflationOverride {
    /// Use the server's setting.
    #[default]
    Server,
    /// Conflate events.
    Enabled,
    /// Deliver every event.
    Disabled,
}

impl ConflationOverride {
    /// Returns the override byte written in the handshake.
    pub fn as_byte(&self) -> u8 {
        match self {
            ConflationOverride::Server => 0,
            ConflationOverride::Enabled => 1,
            ConflationOverride::Disabled => 2,
        }
    }
}

impl From<Option<bool>> for ConflationOverride {
    fn from(value: Option<bool>) -> Self {
        match value {
            None => ConflationOverride::Server,
            Some(true) => ConflationOverride::Enabled,
            Some(false) => ConflationOverride::Disabled,
        }
    }
}

/// Subscription queue role reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServerQueueStatus {
    /// The server hosts no redundant copy of the queue.
    #[default]
    NonRedundant,
    /// The server hosts a redundant copy.
    Redundant,
    /// The server hosts the primary queue.
    Primary,
}

impl ServerQueueStatus {
    /// Maps the status byte of the handshake reply.
    pub fn from_byte(b: u8) -> Self {
        match b {
            QUEUE_STATUS_REDUNDANT => ServerQueueStatus::Redundant,
            QUEUE_STATUS_PRIMARY => ServerQueueStatus::Primary,
            _ => ServerQueueStatus::NonRedundant,
        }
    }

    /// Returns true if this server's queue size should be reported to the pool.
    pub fn reports_queue_size(&self) -> bool {
        !matches!(self, ServerQueueStatus::Redundant)
    }
}

/// The acceptance code that opens the handshake reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptanceCode {
    /// `REPLY_OK` on a data connection.
    Ok,
    /// Success code of a subscription channel.
    SuccessfulServerToClient,
    /// Refused, invalid or unsuccessful.
    Rejected(u8),
    /// Credentials are required.
    AuthenticationRequired,
    /// Credentials were rejected.
    AuthenticationFailed,
    /// A durable client with the same id is connected.
    DuplicateDurableClient,
    /// The server only accepts TLS connections.
    SslEnabled,
    /// A code this client does not know.
    Unknown(u8),
}

impl AcceptanceCode {
    /// Returns the wire value.
    pub fn as_byte(&self) -> u8 {
        match self {
            AcceptanceCode::Ok => REPLY_OK,
            AcceptanceCode::SuccessfulServerToClient => SUCCESSFUL_SERVER_TO_CLIENT,
            AcceptanceCode::Rejected(b) | AcceptanceCode::Unknown(b) => *b,
            AcceptanceCode::AuthenticationRequired => REPLY_AUTHENTICATION_REQUIRED,
            AcceptanceCode::AuthenticationFailed => REPLY_AUTHENTICATION_FAILED,
            AcceptanceCode::DuplicateDurableClient => REPLY_DUPLICATE_DURABLE_CLIENT,
            AcceptanceCode::SslEnabled => REPLY_SSL_ENABLED,
        }
    }

    /// Returns true if the server accepted the connection.
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            AcceptanceCode::Ok | AcceptanceCode::SuccessfulServerToClient
        )
    }

    /// Converts a failure code and the server's message into an error.
    pub fn to_error(&self, message: &str) -> Option<GeodeError> {
        let err = match self {
            AcceptanceCode::Ok | AcceptanceCode::SuccessfulServerToClient => return None,
            AcceptanceCode::AuthenticationRequired => {
                GeodeError::AuthenticationRequired(message.to_string())
            }
            AcceptanceCode::AuthenticationFailed => {
                GeodeError::AuthenticationFailed(message.to_string())
            }
            AcceptanceCode::DuplicateDurableClient => {
                GeodeError::DuplicateDurableClient(message.to_string())
            }
            AcceptanceCode::Rejected(_) => GeodeError::HandshakeRejected(format!(
                "Handshake rejected by server: {}",
                message
            )),
            AcceptanceCode::SslEnabled => GeodeError::SslRequired(
                "SSL is enabled on server, enable SSL in client as well".to_string(),
            ),
            AcceptanceCode::Unknown(code) => GeodeError::Protocol(format!(
                "Unknown error received from server in handshake: code {}: {}",
                code, message
            )),
        };
        Some(err)
    }
}

impl From<u8> for AcceptanceCode {
    fn from(b: u8) -> Self {
        match b {
            REPLY_OK => AcceptanceCode::Ok,
            SUCCESSFUL_SERVER_TO_CLIENT => AcceptanceCode::SuccessfulServerToClient,
            REPLY_REFUSED | REPLY_INVALID | UNSUCCESSFUL_SERVER_TO_CLIENT => {
                AcceptanceCode::Rejected(b)
            }
            REPLY_AUTHENTICATION_REQUIRED => AcceptanceCode::AuthenticationRequired,
            REPLY_AUTHENTICATION_FAILED => AcceptanceCode::AuthenticationFailed,
            REPLY_DUPLICATE_DURABLE_CLIENT => AcceptanceCode::DuplicateDurableClient,
            REPLY_SSL_ENABLED => AcceptanceCode::SslEnabled,
            other => AcceptanceCode::Unknown(other),
        }
    }
}

/// Diffie-Hellman parameters offered by the client.
#[derive(Debug, Clone)]
pub struct DhOffer {
    /// Symmetric cipher name, e.g. `AES:128`.
    pub algorithm: String,
    /// Client public key.
    pub public_key: Vec<u8>,
    /// Challenge the server must sign; present when the server must
    /// authenticate itself.
    pub server_challenge: Option<Vec<u8>>,
}

/// The bytes a client writes to open a connection.
#[derive(Debug, Clone)]
pub struct HandshakeRequest {
    /// Channel role.
    pub channel: ChannelKind,
    /// Client protocol version ordinal.
    pub version_ordinal: u8,
    /// Local ports of earlier data connections, sent on subscription channels.
    pub bound_ports: Vec<u16>,
    /// Serialized client membership identity.
    pub membership_id: Vec<u8>,
    /// Conflation override byte.
    pub conflation: ConflationOverride,
    /// Announced credential mode.
    pub security_mode: SecurityMode,
    /// Plain credentials, written on subscription channels without DH.
    pub credentials: Option<Vec<(String, String)>>,
    /// Key exchange parameters when credentials are encrypted.
    pub dh: Option<DhOffer>,
}

impl HandshakeRequest {
    /// Encodes the request.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = ObjectDataOutput::with_capacity(64 + self.membership_id.len());
        out.write_unsigned_byte(self.channel.direction())?;
        out.write_unsigned_byte(self.version_ordinal)?;
        out.write_unsigned_byte(REPLY_OK)?;

        match self.channel {
            ChannelKind::Notification { .. } => {
                out.write_int(self.bound_ports.len() as i32)?;
                for port in &self.bound_ports {
                    out.write_int(*port as i32)?;
                }
            }
            ChannelKind::Data => out.write_int(HANDSHAKE_READ_TIMEOUT)?,
        }

        out.write_unsigned_byte(DsCode::FixedIdByte as u8)?;
        out.write_unsigned_byte(CLIENT_PROXY_MEMBERSHIP_ID)?;
        out.write_byte_array(Some(&self.membership_id))?;
        out.write_int(1)?;
        out.write_unsigned_byte(self.conflation.as_byte())?;
        out.write_unsigned_byte(self.security_mode as u8)?;

        if self.security_mode != SecurityMode::None {
            match &self.dh {
                Some(dh) => {
                    out.write_bool(dh.server_challenge.is_some())?;
                    out.write_string(&dh.algorithm)?;
                    out.write_byte_array(Some(&dh.public_key))?;
                    if let Some(challenge) = &dh.server_challenge {
                        out.write_byte_array(Some(challenge))?;
                    }
                }
                None if self.channel.is_notification() => {
                    write_properties(&mut out, self.credentials.as_deref().unwrap_or(&[]))?;
                }
                None => {}
            }
        }

        Ok(out.into_bytes())
    }
}

/// Writes credential properties as a count followed by string pairs.
pub fn write_properties<W: DataOutput>(out: &mut W, entries: &[(String, String)]) -> Result<()> {
    out.write_array_len(entries.len() as i32)?;
    for (key, value) in entries {
        out.write_string(key)?;
        out.write_string(value)?;
    }
    Ok(())
}

/// Key exchange data sent by the server after an accepting code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhServerHello {
    /// Server public key.
    pub public_key: Vec<u8>,
    /// Subject of the server certificate, when the server signed our challenge.
    pub subject_name: Option<String>,
    /// Signature over our challenge.
    pub signature: Option<Vec<u8>>,
    /// Challenge the client must encrypt and send back.
    pub challenge: Vec<u8>,
}

/// The decoded tail of a handshake reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerHandshake {
    /// Acceptance code.
    pub code: AcceptanceCode,
    /// Subscription queue role.
    pub queue_status: ServerQueueStatus,
    /// Subscription queue size, never negative.
    pub queue_size: i32,
    /// Serialized distributed member id of the server (data channels).
    pub member_id: Option<Vec<u8>>,
    /// Free-form server message, empty when absent.
    pub message: String,
    /// Whether the server applies deltas (data channels).
    pub delta_enabled: Option<bool>,
}

impl ServerHandshake {
    /// Turns a failure code into an error.
    pub fn into_result(self) -> Result<Self> {
        match self.code.to_error(&self.message) {
            Some(err) => Err(err),
            None => Ok(self),
        }
    }
}

/// Progress of a handshake reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeEvent {
    /// The server sent its key; the client must answer with the encrypted
    /// challenge before decoding continues.
    KeyExchange(DhServerHello),
    /// The reply is complete.
    Completed(ServerHandshake),
}

/// Incremental decoder for handshake replies.
#[derive(Debug)]
pub struct HandshakeCodec {
    channel: ChannelKind,
    dh_pending: bool,
    server_auth: bool,
}

impl HandshakeCodec {
    /// Creates a decoder for the given channel.
    ///
    /// `dh` selects whether an accepting code is followed by the key exchange;
    /// `server_auth` whether the server signs the client challenge.
    pub fn new(channel: ChannelKind, dh: bool, server_auth: bool) -> Self {
        Self {
            channel,
            dh_pending: dh,
            server_auth,
        }
    }

    fn decode_reply(&mut self, scan: &mut Scan<'_>) -> Step<HandshakeEvent> {
        let code = AcceptanceCode::from(scan.u8()?);
        if code == AcceptanceCode::SslEnabled {
            return Err(Stop::Invalid(code.to_error("").unwrap_or_else(|| {
                GeodeError::Protocol("unexpected handshake code".to_string())
            })));
        }

        if self.dh_pending && code == AcceptanceCode::Ok {
            let public_key = scan.handshake_bytes()?;
            let (subject_name, signature) = if self.server_auth {
                let subject = scan.handshake_string()?;
                (subject, Some(scan.handshake_bytes()?))
            } else {
                (None, None)
            };
            let challenge = scan.handshake_bytes()?;
            self.dh_pending = false;
            return Ok(HandshakeEvent::KeyExchange(DhServerHello {
                public_key,
                subject_name,
                signature,
                challenge,
            }));
        }

        let queue_status = ServerQueueStatus::from_byte(scan.u8()?);
        let queue_size = scan.i32()?.max(0);

        let member_id = match self.channel {
            ChannelKind::Data => Some(scan.handshake_bytes()?),
            ChannelKind::Notification { .. } => None,
        };

        let len = scan.u16()? as usize;
        let message = modified_utf8::decode(scan.take(len)?).map_err(Stop::Invalid)?;

        let delta_enabled = match self.channel {
            ChannelKind::Data => Some(scan.u8()? != 0),
            ChannelKind::Notification { .. } => None,
        };

        if self.channel.is_notification() && code.is_success() {
            scan.skip_instantiators()?;
        }

        Ok(HandshakeEvent::Completed(ServerHandshake {
            code,
            queue_status,
            queue_size,
            member_id,
            message,
            delta_enabled,
        }))
    }
}

impl Decoder for HandshakeCodec {
    type Item = HandshakeEvent;
    type Error = GeodeError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        let mut scan = Scan::new(&src[..]);
        match self.decode_reply(&mut scan) {
            Ok(event) => {
                let consumed = scan.pos;
                src.advance(consumed);
                Ok(Some(event))
            }
            Err(Stop::Incomplete) => Ok(None),
            Err(Stop::Invalid(err)) => Err(err),
        }
    }
}

enum Stop {
    Incomplete,
    Invalid(GeodeError),
}

type Step<T> = std::result::Result<T, Stop>;

/// Bounds-checked reader that tells "not yet received" apart from malformed
/// input.
struct Scan<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Scan<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Step<&'a [u8]> {
        let end = self.pos.checked_add(n).ok_or(Stop::Incomplete)?;
        if end > self.buf.len() {
            return Err(Stop::Incomplete);
        }
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Step<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Step<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn i32(&mut self) -> Step<i32> {
        let b = self.take(4)?;
        Ok(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Array size with the `0xFE` short and `0xFD` int escapes.
    fn array_size(&mut self) -> Step<usize> {
        let size = match self.u8()? {
            0xFE => self.u16()? as i32,
            0xFD => self.i32()?,
            n => n as i32,
        };
        if size < 0 {
            return Err(Stop::Invalid(GeodeError::Protocol(format!(
                "negative handshake array size {}",
                size
            ))));
        }
        Ok(size as usize)
    }

    fn handshake_bytes(&mut self) -> Step<Vec<u8>> {
        let len = self.array_size()?;
        Ok(self.take(len)?.to_vec())
    }

    /// A null or ASCII string; an empty string reads as `None`.
    fn handshake_string(&mut self) -> Step<Option<String>> {
        let code = self.u8()?;
        match DsCode::try_from(code) {
            Ok(DsCode::NullString) => Ok(None),
            Ok(DsCode::AsciiString) => {
                let len = self.u16()? as usize;
                if len == 0 {
                    return Ok(None);
                }
                let bytes = self.take(len)?;
                String::from_utf8(bytes.to_vec())
                    .map(Some)
                    .map_err(|e| Stop::Invalid(GeodeError::Serialization(e.to_string())))
            }
            _ => Err(Stop::Invalid(GeodeError::Protocol(format!(
                "unexpected string type id {} in handshake",
                code
            )))),
        }
    }

    /// Skips the data-serializer and instantiator registrations pushed on a
    /// subscription channel.
    fn skip_instantiators(&mut self) -> Step<()> {
        for _ in 0..self.array_size()? {
            self.take(6)?;
            for _ in 0..self.array_size()? {
                self.handshake_string()?;
            }
        }
        for _ in 0..self.array_size()? {
            self.take(5)?;
            self.handshake_string()?;
        }
        for _ in 0..self.array_size()? {
            self.take(6)?;
            for _ in 0..self.array_size()? {
                self.handshake_string()?;
            }
        }
        Ok(())
    }
}
