//! Credentials and credential encryption used during the handshake.

mod auth_initialize;
mod key_exchange;

pub use auth_initialize::{
    AuthInitialize, PropertiesAuthInitialize, SECURITY_PASSWORD, SECURITY_USERNAME,
};
pub use key_exchange::{server_challenge, DhKeyExchange, DhSession};
