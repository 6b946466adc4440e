//! Client side of the connection handshake.

use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use geode_core::protocol::handshake::write_properties;
use geode_core::protocol::{
    ChannelKind, ConflationOverride, DhOffer, DhServerHello, HandshakeCodec, HandshakeEvent,
    HandshakeRequest, SecurityMode, ServerHandshake,
};
use geode_core::serialization::{DataOutput, ObjectDataOutput};
use geode_core::{GeodeError, Result, ServerLocation};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::codec::Decoder;

use super::membership::{ClientMembershipId, CLIENT_VERSION_ORDINAL};
use crate::security::{server_challenge, AuthInitialize, DhKeyExchange, DhSession};

/// Credential settings applied to handshakes.
#[derive(Clone, Default)]
pub struct HandshakeSecurity {
    /// Supplies credentials for subscription channels.
    pub auth: Option<Arc<dyn AuthInitialize>>,
    /// Key exchange and cipher name used to encrypt credentials.
    pub dh: Option<(Arc<dyn DhKeyExchange>, String)>,
    /// The server must sign a client challenge.
    pub server_auth: bool,
    /// Each user authenticates separately after the handshake.
    pub multi_user: bool,
}

impl std::fmt::Debug for HandshakeSecurity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandshakeSecurity")
            .field("auth", &self.auth.is_some())
            .field("dh", &self.dh.as_ref().map(|(_, algorithm)| algorithm))
            .field("server_auth", &self.server_auth)
            .field("multi_user", &self.multi_user)
            .finish()
    }
}

impl HandshakeSecurity {
    /// Returns the credential mode announced on `channel`.
    pub fn mode(&self, channel: ChannelKind) -> SecurityMode {
        let security_on = self.auth.is_some() || self.multi_user;
        if channel.is_notification() && self.multi_user {
            SecurityMode::MultiUserNotificationChannel
        } else if security_on && self.dh.is_some() {
            SecurityMode::DhEncrypt
        } else if security_on {
            SecurityMode::Normal
        } else {
            SecurityMode::None
        }
    }
}

/// Everything a handshake needs besides the socket.
#[derive(Debug, Clone)]
pub struct HandshakeSettings {
    /// Channel role.
    pub channel: ChannelKind,
    /// Identity shared by all connections of the pool.
    pub membership: ClientMembershipId,
    /// Local ports of the pool's data connections.
    pub bound_ports: Vec<u16>,
    /// Conflation override.
    pub conflation: ConflationOverride,
    /// Credentials.
    pub security: HandshakeSecurity,
    /// Bound on the whole exchange.
    pub timeout: Duration,
}

impl HandshakeSettings {
    /// Creates settings for a data channel without credentials.
    pub fn data(membership: ClientMembershipId, timeout: Duration) -> Self {
        Self {
            channel: ChannelKind::Data,
            membership,
            bound_ports: Vec::new(),
            conflation: ConflationOverride::Server,
            security: HandshakeSecurity::default(),
            timeout,
        }
    }
}

/// Runs the handshake on a freshly opened socket.
///
/// Returns the server's reply and any bytes read past its end. Any failure
/// leaves the socket unusable.
pub(crate) async fn perform(
    stream: &mut TcpStream,
    server: &ServerLocation,
    settings: &HandshakeSettings,
) -> Result<(ServerHandshake, BytesMut)> {
    match tokio::time::timeout(settings.timeout, exchange(stream, server, settings)).await {
        Ok(result) => result,
        Err(_) => Err(GeodeError::Timeout(format!(
            "handshake with {} timed out after {:?}",
            server, settings.timeout
        ))),
    }
}

async fn exchange(
    stream: &mut TcpStream,
    server: &ServerLocation,
    settings: &HandshakeSettings,
) -> Result<(ServerHandshake, BytesMut)> {
    let channel = settings.channel;
    let security = &settings.security;
    let mode = security.mode(channel);

    let credentials = match (mode, &security.auth) {
        (SecurityMode::Normal | SecurityMode::DhEncrypt, Some(auth))
            if channel.is_notification() =>
        {
            Some(auth.credentials(server)?)
        }
        _ => None,
    };

    let mut session: Option<Box<dyn DhSession>> = None;
    let mut challenge_sent = None;
    let dh = match (mode, &security.dh) {
        (SecurityMode::DhEncrypt, Some((key_exchange, algorithm))) => {
            let s = key_exchange.begin(algorithm)?;
            let challenge = security.server_auth.then(server_challenge);
            let offer = DhOffer {
                algorithm: algorithm.clone(),
                public_key: s.public_key(),
                server_challenge: challenge.clone(),
            };
            session = Some(s);
            challenge_sent = challenge;
            Some(offer)
        }
        _ => None,
    };

    let request = HandshakeRequest {
        channel,
        version_ordinal: CLIENT_VERSION_ORDINAL,
        bound_ports: settings.bound_ports.clone(),
        membership_id: settings.membership.as_bytes().to_vec(),
        conflation: settings.conflation,
        security_mode: mode,
        credentials: credentials.clone(),
        dh,
    };

    tracing::debug!(
        address = %server,
        channel = ?channel,
        mode = ?mode,
        "attempting handshake"
    );
    write(stream, server, &request.encode()?).await?;

    let mut codec = HandshakeCodec::new(channel, session.is_some(), security.server_auth);
    let mut buffer = BytesMut::with_capacity(256);
    loop {
        match codec.decode(&mut buffer)? {
            Some(HandshakeEvent::KeyExchange(hello)) => {
                let session = session.as_mut().ok_or_else(|| {
                    GeodeError::Protocol("unexpected key exchange in handshake".to_string())
                })?;
                let reply = encrypt_credentials(
                    session.as_mut(),
                    &hello,
                    challenge_sent.as_deref(),
                    credentials.as_deref().filter(|_| channel.is_notification()),
                )?;
                write(stream, server, &reply).await?;
            }
            Some(HandshakeEvent::Completed(reply)) => {
                let code = reply.code;
                let reply = reply.into_result().map_err(|e| {
                    tracing::error!(
                        address = %server,
                        code = code.as_byte(),
                        error = %e,
                        "handshake failed"
                    );
                    e
                })?;
                tracing::debug!(
                    address = %server,
                    queue_status = ?reply.queue_status,
                    queue_size = reply.queue_size,
                    "handshake completed"
                );
                return Ok((reply, buffer));
            }
            None => {
                let n = stream.read_buf(&mut buffer).await.map_err(|e| {
                    GeodeError::Connection(format!(
                        "failed to read handshake from {}: {}",
                        server, e
                    ))
                })?;
                if n == 0 {
                    return Err(GeodeError::Connection(format!(
                        "{} closed the connection during handshake",
                        server
                    )));
                }
            }
        }
    }
}

fn encrypt_credentials(
    session: &mut dyn DhSession,
    hello: &DhServerHello,
    challenge_sent: Option<&[u8]>,
    credentials: Option<&[(String, String)]>,
) -> Result<Vec<u8>> {
    session.compute_shared_secret(&hello.public_key)?;

    if let Some(challenge) = challenge_sent {
        let subject = hello.subject_name.as_deref().unwrap_or_default();
        let signature = hello.signature.as_deref().unwrap_or_default();
        if !session.verify_server(subject, challenge, signature)? {
            return Err(GeodeError::AuthenticationFailed(
                "Handshake: failed to verify server challenge response".to_string(),
            ));
        }
        tracing::debug!(subject = %subject, "verified server challenge response");
    }

    let mut cleartext = ObjectDataOutput::new();
    if let Some(credentials) = credentials {
        write_properties(&mut cleartext, credentials)?;
    }
    cleartext.write_byte_array(Some(&hello.challenge))?;
    let ciphertext = session.encrypt(&cleartext.into_bytes())?;

    let mut out = ObjectDataOutput::with_capacity(ciphertext.len() + 5);
    out.write_byte_array(Some(&ciphertext))?;
    Ok(out.into_bytes())
}

async fn write(stream: &mut TcpStream, server: &ServerLocation, bytes: &[u8]) -> Result<()> {
    stream.write_all(bytes).await.map_err(|e| {
        GeodeError::Connection(format!("failed to write handshake to {}: {}", server, e))
    })
}
