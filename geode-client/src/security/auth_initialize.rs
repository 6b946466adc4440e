//! Supplies the credentials a connection presents to a server.

use geode_core::{Result, ServerLocation};

use crate::config::SecurityConfig;

/// Property carrying the user name.
pub const SECURITY_USERNAME: &str = "security-username";
/// Property carrying the password.
pub const SECURITY_PASSWORD: &str = "security-password";

/// Produces credentials for a server.
///
/// Called once per subscription channel handshake, and once per user in
/// multi-user mode. An error aborts the handshake.
pub trait AuthInitialize: Send + Sync {
    /// Returns the credential properties to present to `server`.
    fn credentials(&self, server: &ServerLocation) -> Result<Vec<(String, String)>>;

    /// Releases resources held by the initializer.
    fn close(&self) {}
}

impl std::fmt::Debug for dyn AuthInitialize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AuthInitialize")
    }
}

/// Presents a fixed set of properties to every server.
#[derive(Debug, Clone, Default)]
pub struct PropertiesAuthInitialize {
    properties: Vec<(String, String)>,
}

impl PropertiesAuthInitialize {
    /// Creates an initializer presenting `properties`.
    pub fn new(properties: Vec<(String, String)>) -> Self {
        Self { properties }
    }

    /// Creates an initializer from the configured credentials, `None` when
    /// nothing is configured.
    pub fn from_config(config: &SecurityConfig) -> Option<Self> {
        config
            .has_credentials()
            .then(|| Self::new(config.credentials().to_vec()))
    }

    /// Returns the user name, if one is set.
    pub fn username(&self) -> Option<&str> {
        self.properties
            .iter()
            .find(|(k, _)| k == SECURITY_USERNAME)
            .map(|(_, v)| v.as_str())
    }
}

impl AuthInitialize for PropertiesAuthInitialize {
    fn credentials(&self, _server: &ServerLocation) -> Result<Vec<(String, String)>> {
        Ok(self.properties.clone())
    }
}
