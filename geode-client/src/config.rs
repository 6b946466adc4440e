//! Client configuration types and builders.

use std::path::{Path, PathBuf};
use std::time::Duration;

use geode_core::{GeodeError, ServerLocation};

use crate::security::{SECURITY_PASSWORD, SECURITY_USERNAME};

/// Default server when none is configured.
const DEFAULT_SERVER: (&str, u16) = ("localhost", 40404);
/// Default connect timeout.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Default reply timeout.
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(10);
/// Default minimum number of pooled connections per server.
const DEFAULT_MIN_CONNECTIONS: usize = 1;
/// Default idle time after which a pooled connection is closed.
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(5);
/// Default socket buffer size.
const DEFAULT_SOCKET_BUFFER_SIZE: usize = 32 * 1024;
/// Default window during which a timed-out primary bucket is avoided.
const DEFAULT_BUCKET_WAIT_TIMEOUT: Duration = Duration::ZERO;
/// Default cipher used for encrypted credentials.
const DEFAULT_DH_ALGORITHM: &str = "AES:128";
/// Default durable queue timeout.
const DEFAULT_DURABLE_TIMEOUT: Duration = Duration::from_secs(300);
/// Default initial retry backoff.
const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(100);
/// Default maximum retry backoff.
const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(30);
/// Default retry multiplier.
const DEFAULT_RETRY_MULTIPLIER: f64 = 2.0;
/// Default retry jitter.
const DEFAULT_RETRY_JITTER: f64 = 0.0;

/// Configuration error returned when validation fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    message: String,
}

impl ConfigError {
    pub(crate) fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "configuration error: {}", self.message)
    }
}

impl std::error::Error for ConfigError {}

impl From<ConfigError> for GeodeError {
    fn from(err: ConfigError) -> Self {
        GeodeError::Configuration(err.message)
    }
}

/// Connection pool settings.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    servers: Vec<ServerLocation>,
    connect_timeout: Duration,
    read_timeout: Duration,
    retry_attempts: Option<u32>,
    min_connections: usize,
    max_connections: Option<usize>,
    idle_timeout: Duration,
    max_connection_lifetime: Duration,
    subscription_enabled: bool,
    server_group: Option<String>,
    single_hop_enabled: bool,
    bucket_wait_timeout: Duration,
    multi_user_mode: bool,
    socket_buffer_size: usize,
}

impl PoolConfig {
    /// Returns the configured servers.
    pub fn servers(&self) -> &[ServerLocation] {
        &self.servers
    }

    /// Returns the timeout for establishing a connection including the
    /// handshake.
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Returns the timeout for a reply.
    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    /// Returns how many other servers a failed request is retried on.
    ///
    /// `None` means every server is tried once.
    pub fn retry_attempts(&self) -> Option<u32> {
        self.retry_attempts
    }

    /// Returns the number of connections kept open per server.
    pub fn min_connections(&self) -> usize {
        self.min_connections
    }

    /// Returns the connection limit per server, `None` for unlimited.
    pub fn max_connections(&self) -> Option<usize> {
        self.max_connections
    }

    /// Returns the idle time after which surplus connections are closed.
    /// Zero disables idle eviction.
    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// Returns the maximum connection age. Zero disables expiry.
    pub fn max_connection_lifetime(&self) -> Duration {
        self.max_connection_lifetime
    }

    /// Returns true if the pool opens subscription channels.
    pub fn subscription_enabled(&self) -> bool {
        self.subscription_enabled
    }

    /// Returns the server group this pool is restricted to.
    pub fn server_group(&self) -> Option<&str> {
        self.server_group.as_deref()
    }

    /// Returns true if requests are routed to the bucket's server.
    pub fn single_hop_enabled(&self) -> bool {
        self.single_hop_enabled
    }

    /// Returns how long a bucket whose primary timed out is routed to
    /// secondaries. Zero disables bucket timeout tracking.
    pub fn bucket_wait_timeout(&self) -> Duration {
        self.bucket_wait_timeout
    }

    /// Returns true if each user authenticates separately.
    pub fn multi_user_mode(&self) -> bool {
        self.multi_user_mode
    }

    /// Returns the socket buffer size.
    pub fn socket_buffer_size(&self) -> usize {
        self.socket_buffer_size
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            servers: vec![ServerLocation::new(DEFAULT_SERVER.0, DEFAULT_SERVER.1)],
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            retry_attempts: None,
            min_connections: DEFAULT_MIN_CONNECTIONS,
            max_connections: None,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            max_connection_lifetime: Duration::ZERO,
            subscription_enabled: false,
            server_group: None,
            single_hop_enabled: true,
            bucket_wait_timeout: DEFAULT_BUCKET_WAIT_TIMEOUT,
            multi_user_mode: false,
            socket_buffer_size: DEFAULT_SOCKET_BUFFER_SIZE,
        }
    }
}

/// Builder for `PoolConfig`.
#[derive(Debug, Clone, Default)]
pub struct PoolConfigBuilder {
    servers: Vec<ServerLocation>,
    connect_timeout: Option<Duration>,
    read_timeout: Option<Duration>,
    retry_attempts: Option<u32>,
    min_connections: Option<usize>,
    max_connections: Option<usize>,
    idle_timeout: Option<Duration>,
    max_connection_lifetime: Option<Duration>,
    subscription_enabled: Option<bool>,
    server_group: Option<String>,
    single_hop_enabled: Option<bool>,
    bucket_wait_timeout: Option<Duration>,
    multi_user_mode: Option<bool>,
    socket_buffer_size: Option<usize>,
}

impl PoolConfigBuilder {
    /// Creates a new pool configuration builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a server.
    pub fn add_server(mut self, server: ServerLocation) -> Self {
        self.servers.push(server);
        self
    }

    /// Sets the servers, replacing any previously configured.
    pub fn servers(mut self, servers: impl IntoIterator<Item = ServerLocation>) -> Self {
        self.servers = servers.into_iter().collect();
        self
    }

    /// Sets the connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Sets the reply timeout.
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    /// Sets how many other servers a failed request is retried on.
    pub fn retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = Some(attempts);
        self
    }

    /// Sets the number of connections kept open per server.
    pub fn min_connections(mut self, n: usize) -> Self {
        self.min_connections = Some(n);
        self
    }

    /// Sets the connection limit per server.
    pub fn max_connections(mut self, n: usize) -> Self {
        self.max_connections = Some(n);
        self
    }

    /// Sets the idle eviction timeout.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    /// Sets the maximum connection age.
    pub fn max_connection_lifetime(mut self, lifetime: Duration) -> Self {
        self.max_connection_lifetime = Some(lifetime);
        self
    }

    /// Enables or disables subscription channels.
    pub fn subscription_enabled(mut self, enabled: bool) -> Self {
        self.subscription_enabled = Some(enabled);
        self
    }

    /// Restricts the pool to a server group.
    pub fn server_group(mut self, group: impl Into<String>) -> Self {
        self.server_group = Some(group.into());
        self
    }

    /// Enables or disables single-hop routing.
    pub fn single_hop_enabled(mut self, enabled: bool) -> Self {
        self.single_hop_enabled = Some(enabled);
        self
    }

    /// Sets how long a bucket whose primary timed out is avoided.
    pub fn bucket_wait_timeout(mut self, timeout: Duration) -> Self {
        self.bucket_wait_timeout = Some(timeout);
        self
    }

    /// Enables per-user authentication.
    pub fn multi_user_mode(mut self, enabled: bool) -> Self {
        self.multi_user_mode = Some(enabled);
        self
    }

    /// Sets the socket buffer size.
    pub fn socket_buffer_size(mut self, size: usize) -> Self {
        self.socket_buffer_size = Some(size);
        self
    }

    /// Builds the pool configuration, returning an error if validation fails.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - a server has an empty host or port zero
    /// - `min_connections` exceeds `max_connections`
    /// - the connect or read timeout is zero
    /// - the server group is empty
    pub fn build(self) -> Result<PoolConfig, ConfigError> {
        let defaults = PoolConfig::default();
        let servers = if self.servers.is_empty() {
            defaults.servers
        } else {
            self.servers
        };

        if let Some(bad) = servers.iter().find(|s| !s.is_valid()) {
            return Err(ConfigError::new(format!("invalid server address '{}'", bad)));
        }

        let min_connections = self.min_connections.unwrap_or(DEFAULT_MIN_CONNECTIONS);
        if let Some(max) = self.max_connections {
            if max == 0 {
                return Err(ConfigError::new("max_connections must be at least 1"));
            }
            if min_connections > max {
                return Err(ConfigError::new(
                    "min_connections must not exceed max_connections",
                ));
            }
        }

        let connect_timeout = self.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT);
        let read_timeout = self.read_timeout.unwrap_or(DEFAULT_READ_TIMEOUT);
        if connect_timeout.is_zero() || read_timeout.is_zero() {
            return Err(ConfigError::new("timeouts must be greater than zero"));
        }

        if matches!(self.server_group.as_deref(), Some("")) {
            return Err(ConfigError::new("server_group must not be empty"));
        }

        Ok(PoolConfig {
            servers,
            connect_timeout,
            read_timeout,
            retry_attempts: self.retry_attempts,
            min_connections,
            max_connections: self.max_connections,
            idle_timeout: self.idle_timeout.unwrap_or(DEFAULT_IDLE_TIMEOUT),
            max_connection_lifetime: self.max_connection_lifetime.unwrap_or(Duration::ZERO),
            subscription_enabled: self.subscription_enabled.unwrap_or(false),
            server_group: self.server_group,
            single_hop_enabled: self.single_hop_enabled.unwrap_or(true),
            bucket_wait_timeout: self
                .bucket_wait_timeout
                .unwrap_or(DEFAULT_BUCKET_WAIT_TIMEOUT),
            multi_user_mode: self.multi_user_mode.unwrap_or(false),
            socket_buffer_size: self
                .socket_buffer_size
                .unwrap_or(DEFAULT_SOCKET_BUFFER_SIZE),
        })
    }
}

/// Retry backoff between attempts on different servers.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    initial_backoff: Duration,
    max_backoff: Duration,
    multiplier: f64,
    jitter: f64,
}

impl RetryConfig {
    /// Returns the initial backoff duration.
    pub fn initial_backoff(&self) -> Duration {
        self.initial_backoff
    }

    /// Returns the maximum backoff duration.
    pub fn max_backoff(&self) -> Duration {
        self.max_backoff
    }

    /// Returns the backoff multiplier.
    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    /// Returns the jitter factor in `[0, 1]`.
    pub fn jitter(&self) -> f64 {
        self.jitter
    }

    /// Returns the backoff before retry number `attempt` (starting at 0).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base = self.initial_backoff.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let capped = base.min(self.max_backoff.as_secs_f64());
        let spread = if self.jitter > 0.0 {
            1.0 - self.jitter + rand::random::<f64>() * 2.0 * self.jitter
        } else {
            1.0
        };
        Duration::from_secs_f64((capped * spread).max(0.0))
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
            multiplier: DEFAULT_RETRY_MULTIPLIER,
            jitter: DEFAULT_RETRY_JITTER,
        }
    }
}

/// Builder for `RetryConfig`.
#[derive(Debug, Clone, Default)]
pub struct RetryConfigBuilder {
    initial_backoff: Option<Duration>,
    max_backoff: Option<Duration>,
    multiplier: Option<f64>,
    jitter: Option<f64>,
}

impl RetryConfigBuilder {
    /// Creates a new retry configuration builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the initial backoff duration.
    pub fn initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = Some(backoff);
        self
    }

    /// Sets the maximum backoff duration.
    pub fn max_backoff(mut self, backoff: Duration) -> Self {
        self.max_backoff = Some(backoff);
        self
    }

    /// Sets the backoff multiplier.
    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = Some(multiplier);
        self
    }

    /// Sets the jitter factor.
    pub fn jitter(mut self, jitter: f64) -> Self {
        self.jitter = Some(jitter);
        self
    }

    /// Builds the retry configuration, returning an error if validation fails.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - `initial_backoff` exceeds `max_backoff`
    /// - `multiplier` is less than 1.0
    /// - `jitter` is outside `[0, 1]`
    pub fn build(self) -> Result<RetryConfig, ConfigError> {
        let initial_backoff = self.initial_backoff.unwrap_or(DEFAULT_INITIAL_BACKOFF);
        let max_backoff = self.max_backoff.unwrap_or(DEFAULT_MAX_BACKOFF);
        let multiplier = self.multiplier.unwrap_or(DEFAULT_RETRY_MULTIPLIER);
        let jitter = self.jitter.unwrap_or(DEFAULT_RETRY_JITTER);

        if initial_backoff > max_backoff {
            return Err(ConfigError::new(
                "initial_backoff must not exceed max_backoff",
            ));
        }

        if multiplier < 1.0 {
            return Err(ConfigError::new("multiplier must be at least 1.0"));
        }

        if !(0.0..=1.0).contains(&jitter) {
            return Err(ConfigError::new("jitter must be between 0.0 and 1.0"));
        }

        Ok(RetryConfig {
            initial_backoff,
            max_backoff,
            multiplier,
            jitter,
        })
    }
}

/// Credentials and key-exchange settings.
#[derive(Debug, Clone, Default)]
pub struct SecurityConfig {
    credentials: Vec<(String, String)>,
    dh_algorithm: Option<String>,
    server_keystore_path: Option<PathBuf>,
}

impl SecurityConfig {
    /// Returns the credential properties.
    pub fn credentials(&self) -> &[(String, String)] {
        &self.credentials
    }

    /// Returns true if credentials are configured.
    pub fn has_credentials(&self) -> bool {
        !self.credentials.is_empty()
    }

    /// Returns the cipher used to encrypt credentials, when enabled.
    pub fn dh_algorithm(&self) -> Option<&str> {
        self.dh_algorithm.as_deref()
    }

    /// Returns true if credentials are encrypted with a negotiated key.
    pub fn is_dh_enabled(&self) -> bool {
        self.dh_algorithm.is_some()
    }

    /// Returns the key store holding the server's public certificate.
    pub fn server_keystore_path(&self) -> Option<&Path> {
        self.server_keystore_path.as_deref()
    }

    /// Returns true if the server must prove its identity.
    pub fn requires_server_auth(&self) -> bool {
        self.server_keystore_path.is_some()
    }
}

/// Builder for `SecurityConfig`.
#[derive(Debug, Clone, Default)]
pub struct SecurityConfigBuilder {
    credentials: Vec<(String, String)>,
    dh_algorithm: Option<String>,
    server_keystore_path: Option<PathBuf>,
}

impl SecurityConfigBuilder {
    /// Creates a new security configuration builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a credential property.
    pub fn property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.credentials.push((key.into(), value.into()));
        self
    }

    /// Sets the `security-username` and `security-password` properties.
    pub fn credentials(self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.property(SECURITY_USERNAME, username)
            .property(SECURITY_PASSWORD, password)
    }

    /// Encrypts credentials with a negotiated key using `algorithm`.
    pub fn dh_algorithm(mut self, algorithm: impl Into<String>) -> Self {
        self.dh_algorithm = Some(algorithm.into());
        self
    }

    /// Encrypts credentials with the default cipher.
    pub fn enable_dh(self) -> Self {
        self.dh_algorithm(DEFAULT_DH_ALGORITHM)
    }

    /// Requires the server to sign a challenge verifiable with the given key store.
    pub fn server_keystore_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.server_keystore_path = Some(path.into());
        self
    }

    /// Builds the security configuration, returning an error if validation fails.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - a property key is empty
    /// - the algorithm name is empty
    /// - a key store is configured without key exchange
    pub fn build(self) -> Result<SecurityConfig, ConfigError> {
        if self.credentials.iter().any(|(k, _)| k.is_empty()) {
            return Err(ConfigError::new("credential property keys must not be empty"));
        }

        if matches!(self.dh_algorithm.as_deref(), Some("")) {
            return Err(ConfigError::new("dh_algorithm must not be empty"));
        }

        if self.server_keystore_path.is_some() && self.dh_algorithm.is_none() {
            return Err(ConfigError::new(
                "server_keystore_path requires dh_algorithm",
            ));
        }

        Ok(SecurityConfig {
            credentials: self.credentials,
            dh_algorithm: self.dh_algorithm,
            server_keystore_path: self.server_keystore_path,
        })
    }
}

/// Durable subscription settings.
#[derive(Debug, Clone)]
pub struct DurableClientConfig {
    id: Option<String>,
    timeout: Duration,
    keep_alive: bool,
}

impl DurableClientConfig {
    /// Returns the durable client id, `None` for a non-durable client.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Returns true if this client is durable.
    pub fn is_durable(&self) -> bool {
        self.id.is_some()
    }

    /// Returns how long the server keeps the queue after a disconnect.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Returns true if the server keeps the queue when the client closes.
    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }
}

impl Default for DurableClientConfig {
    fn default() -> Self {
        Self {
            id: None,
            timeout: DEFAULT_DURABLE_TIMEOUT,
            keep_alive: false,
        }
    }
}

/// Builder for `DurableClientConfig`.
#[derive(Debug, Clone, Default)]
pub struct DurableClientConfigBuilder {
    id: Option<String>,
    timeout: Option<Duration>,
    keep_alive: Option<bool>,
}

impl DurableClientConfigBuilder {
    /// Creates a new durable client configuration builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the durable client id.
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Sets the durable queue timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Keeps the durable queue when the client closes.
    pub fn keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = Some(keep_alive);
        self
    }

    /// Builds the durable client configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the id is empty or `keep_alive` is set on a
    /// non-durable client.
    pub fn build(self) -> Result<DurableClientConfig, ConfigError> {
        if matches!(self.id.as_deref(), Some("")) {
            return Err(ConfigError::new("durable client id must not be empty"));
        }
        let keep_alive = self.keep_alive.unwrap_or(false);
        if keep_alive && self.id.is_none() {
            return Err(ConfigError::new("keep_alive requires a durable client id"));
        }
        Ok(DurableClientConfig {
            id: self.id,
            timeout: self.timeout.unwrap_or(DEFAULT_DURABLE_TIMEOUT),
            keep_alive,
        })
    }
}

/// Main client configuration.
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pool: PoolConfig,
    retry: RetryConfig,
    security: SecurityConfig,
    durable: DurableClientConfig,
    conflate_events: Option<bool>,
    grid_client: bool,
}

impl ClientConfig {
    /// Creates a new client configuration builder.
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::new()
    }

    /// Returns the pool configuration.
    pub fn pool(&self) -> &PoolConfig {
        &self.pool
    }

    /// Returns the retry configuration.
    pub fn retry(&self) -> &RetryConfig {
        &self.retry
    }

    /// Returns the security configuration.
    pub fn security(&self) -> &SecurityConfig {
        &self.security
    }

    /// Returns the durable client configuration.
    pub fn durable(&self) -> &DurableClientConfig {
        &self.durable
    }

    /// Returns the conflation override, `None` to use the server's setting.
    pub fn conflate_events(&self) -> Option<bool> {
        self.conflate_events
    }

    /// Returns true if connections are dropped without a close message.
    pub fn grid_client(&self) -> bool {
        self.grid_client
    }
}

/// Builder for `ClientConfig`.
#[derive(Debug, Clone, Default)]
pub struct ClientConfigBuilder {
    pool: PoolConfigBuilder,
    retry: RetryConfigBuilder,
    security: SecurityConfigBuilder,
    durable: DurableClientConfigBuilder,
    conflate_events: Option<bool>,
    grid_client: Option<bool>,
}

impl ClientConfigBuilder {
    /// Creates a new client configuration builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures pool settings using a builder function.
    pub fn pool<F>(mut self, f: F) -> Self
    where
        F: FnOnce(PoolConfigBuilder) -> PoolConfigBuilder,
    {
        self.pool = f(self.pool);
        self
    }

    /// Configures retry settings using a builder function.
    pub fn retry<F>(mut self, f: F) -> Self
    where
        F: FnOnce(RetryConfigBuilder) -> RetryConfigBuilder,
    {
        self.retry = f(self.retry);
        self
    }

    /// Configures security settings using a builder function.
    pub fn security<F>(mut self, f: F) -> Self
    where
        F: FnOnce(SecurityConfigBuilder) -> SecurityConfigBuilder,
    {
        self.security = f(self.security);
        self
    }

    /// Configures durable subscription settings using a builder function.
    pub fn durable<F>(mut self, f: F) -> Self
    where
        F: FnOnce(DurableClientConfigBuilder) -> DurableClientConfigBuilder,
    {
        self.durable = f(self.durable);
        self
    }

    /// Adds a server.
    pub fn add_server(mut self, server: ServerLocation) -> Self {
        self.pool = self.pool.add_server(server);
        self
    }

    /// Sets username/password credentials.
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.security = self.security.credentials(username, password);
        self
    }

    /// Overrides the server's event conflation setting.
    pub fn conflate_events(mut self, conflate: bool) -> Self {
        self.conflate_events = Some(conflate);
        self
    }

    /// Drops connections without sending a close message.
    pub fn grid_client(mut self, grid_client: bool) -> Self {
        self.grid_client = Some(grid_client);
        self
    }

    /// Builds the client configuration, returning an error if validation fails.
    pub fn build(self) -> Result<ClientConfig, ConfigError> {
        let pool = self.pool.build()?;
        let retry = self.retry.build()?;
        let security = self.security.build()?;
        let durable = self.durable.build()?;

        if durable.is_durable() && !pool.subscription_enabled() {
            return Err(ConfigError::new(
                "a durable client requires subscription_enabled",
            ));
        }

        Ok(ClientConfig {
            pool,
            retry,
            security,
            durable,
            conflate_events: self.conflate_events,
            grid_client: self.grid_client.unwrap_or(false),
        })
    }
}
