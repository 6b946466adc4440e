//! Diffie-Hellman encryption of handshake credentials.
//!
//! The key agreement and cipher are supplied by the application; the client
//! only drives the exchange.

use geode_core::protocol::handshake::SERVER_CHALLENGE_LEN;
use geode_core::Result;
use rand::RngCore;

/// Starts key exchanges for new connections.
pub trait DhKeyExchange: Send + Sync {
    /// Creates a key pair for one handshake using the named cipher.
    fn begin(&self, algorithm: &str) -> Result<Box<dyn DhSession>>;
}

impl std::fmt::Debug for dyn DhKeyExchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DhKeyExchange")
    }
}

/// One side of a key exchange.
pub trait DhSession: Send {
    /// Returns the local public key sent to the server.
    fn public_key(&self) -> Vec<u8>;

    /// Derives the shared secret from the server's public key.
    fn compute_shared_secret(&mut self, server_public_key: &[u8]) -> Result<()>;

    /// Checks the server's signature over the challenge the client sent.
    fn verify_server(&self, subject_name: &str, challenge: &[u8], signature: &[u8])
        -> Result<bool>;

    /// Encrypts with the shared secret.
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>>;
}

/// Generates the random challenge a server must sign.
pub fn server_challenge() -> Vec<u8> {
    let mut challenge = vec![0u8; SERVER_CHALLENGE_LEN];
    rand::thread_rng().fill_bytes(&mut challenge);
    challenge
}
