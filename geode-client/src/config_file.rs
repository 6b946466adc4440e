//! Declarative configuration loading from YAML, TOML, and environment variables.
//!
//! File-based configuration is read into serde mirror structs, which are then
//! converted into the programmatic [`ClientConfig`](crate::config::ClientConfig)
//! through the builder API so that the same validation applies.
//!
//! # Supported Formats
//!
//! - **YAML** (requires `config-file` feature): `ClientConfig::from_yaml("client.yaml")`
//! - **TOML** (requires `config-file` feature): `ClientConfig::from_toml("client.toml")`
//! - **JSON** (always available): `ClientConfig::from_json_str(text)`
//! - **Environment Variables** (always available): `ClientConfig::from_env()`
//!
//! # Example YAML
//!
//! ```yaml
//! pool:
//!   servers:
//!     - "10.0.0.1:40404"
//!     - "10.0.0.2:40404"
//!   read-timeout-ms: 10000
//!   retry-attempts: 2
//!   subscription-enabled: true
//!   server-group: east
//! security:
//!   properties:
//!     security-username: admin
//!     security-password: secret
//!   dh-algorithm: "AES:128"
//! durable:
//!   id: order-feed
//!   timeout-seconds: 300
//! conflate-events: false
//! ```

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{ClientConfig, ClientConfigBuilder, ConfigError};
use crate::security::{SECURITY_PASSWORD, SECURITY_USERNAME};
use geode_core::ServerLocation;

/// Top-level file-based configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case", default)]
pub struct FileConfig {
    /// Pool configuration.
    pub pool: Option<FilePoolConfig>,
    /// Retry backoff configuration.
    pub retry: Option<FileRetryConfig>,
    /// Credentials and key exchange.
    pub security: Option<FileSecurityConfig>,
    /// Durable subscription settings.
    pub durable: Option<FileDurableConfig>,
    /// Conflation override.
    pub conflate_events: Option<bool>,
    /// Drop connections without a close message.
    pub grid_client: Option<bool>,
}

/// File-based pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case", default)]
pub struct FilePoolConfig {
    /// Server addresses as `host:port`.
    pub servers: Option<Vec<String>>,
    /// Connect timeout in milliseconds.
    pub connect_timeout_ms: Option<u64>,
    /// Reply timeout in milliseconds.
    pub read_timeout_ms: Option<u64>,
    /// Number of other servers a failed request is retried on.
    pub retry_attempts: Option<u32>,
    /// Connections kept open per server.
    pub min_connections: Option<usize>,
    /// Connection limit per server.
    pub max_connections: Option<usize>,
    /// Idle eviction timeout in milliseconds.
    pub idle_timeout_ms: Option<u64>,
    /// Maximum connection age in milliseconds.
    pub max_connection_lifetime_ms: Option<u64>,
    /// Open subscription channels.
    pub subscription_enabled: Option<bool>,
    /// Restrict the pool to a server group.
    pub server_group: Option<String>,
    /// Route keyed requests to the bucket's server.
    pub single_hop_enabled: Option<bool>,
    /// Window during which a timed-out primary bucket is avoided, in milliseconds.
    pub bucket_wait_timeout_ms: Option<u64>,
    /// Authenticate each user separately.
    pub multi_user_mode: Option<bool>,
    /// Socket buffer size in bytes.
    pub socket_buffer_size: Option<usize>,
}

/// File-based retry configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case", default)]
pub struct FileRetryConfig {
    /// Initial backoff duration in milliseconds.
    pub initial_backoff_ms: Option<u64>,
    /// Maximum backoff duration in milliseconds.
    pub max_backoff_ms: Option<u64>,
    /// Backoff multiplier.
    pub multiplier: Option<f64>,
    /// Jitter factor (0.0 to 1.0).
    pub jitter: Option<f64>,
}

/// File-based security configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case", default)]
pub struct FileSecurityConfig {
    /// Credential properties.
    pub properties: Option<BTreeMap<String, String>>,
    /// Cipher for encrypted credentials.
    pub dh_algorithm: Option<String>,
    /// Key store with the server certificate.
    pub server_keystore_path: Option<String>,
}

/// File-based durable client configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case", default)]
pub struct FileDurableConfig {
    /// Durable client id.
    pub id: Option<String>,
    /// Durable queue timeout in seconds.
    pub timeout_seconds: Option<u64>,
    /// Keep the queue when the client closes.
    pub keep_alive: Option<bool>,
}

impl TryFrom<FileConfig> for ClientConfig {
    type Error = ConfigError;

    fn try_from(file: FileConfig) -> Result<Self, Self::Error> {
        let mut builder = ClientConfigBuilder::new();

        if let Some(pool) = file.pool {
            let servers = pool
                .servers
                .unwrap_or_default()
                .iter()
                .map(|s| {
                    s.parse::<ServerLocation>()
                        .map_err(|e| ConfigError::new(e.to_string()))
                })
                .collect::<Result<Vec<_>, _>>()?;

            builder = builder.pool(|mut p| {
                if !servers.is_empty() {
                    p = p.servers(servers);
                }
                if let Some(ms) = pool.connect_timeout_ms {
                    p = p.connect_timeout(Duration::from_millis(ms));
                }
                if let Some(ms) = pool.read_timeout_ms {
                    p = p.read_timeout(Duration::from_millis(ms));
                }
                if let Some(n) = pool.retry_attempts {
                    p = p.retry_attempts(n);
                }
                if let Some(n) = pool.min_connections {
                    p = p.min_connections(n);
                }
                if let Some(n) = pool.max_connections {
                    p = p.max_connections(n);
                }
                if let Some(ms) = pool.idle_timeout_ms {
                    p = p.idle_timeout(Duration::from_millis(ms));
                }
                if let Some(ms) = pool.max_connection_lifetime_ms {
                    p = p.max_connection_lifetime(Duration::from_millis(ms));
                }
                if let Some(v) = pool.subscription_enabled {
                    p = p.subscription_enabled(v);
                }
                if let Some(group) = pool.server_group {
                    p = p.server_group(group);
                }
                if let Some(v) = pool.single_hop_enabled {
                    p = p.single_hop_enabled(v);
                }
                if let Some(ms) = pool.bucket_wait_timeout_ms {
                    p = p.bucket_wait_timeout(Duration::from_millis(ms));
                }
                if let Some(v) = pool.multi_user_mode {
                    p = p.multi_user_mode(v);
                }
                if let Some(size) = pool.socket_buffer_size {
                    p = p.socket_buffer_size(size);
                }
                p
            });
        }

        if let Some(retry) = file.retry {
            builder = builder.retry(|mut r| {
                if let Some(ms) = retry.initial_backoff_ms {
                    r = r.initial_backoff(Duration::from_millis(ms));
                }
                if let Some(ms) = retry.max_backoff_ms {
                    r = r.max_backoff(Duration::from_millis(ms));
                }
                if let Some(m) = retry.multiplier {
                    r = r.multiplier(m);
                }
                if let Some(j) = retry.jitter {
                    r = r.jitter(j);
                }
                r
            });
        }

        if let Some(security) = file.security {
            builder = builder.security(|mut s| {
                for (key, value) in security.properties.unwrap_or_default() {
                    s = s.property(key, value);
                }
                if let Some(alg) = security.dh_algorithm {
                    s = s.dh_algorithm(alg);
                }
                if let Some(path) = security.server_keystore_path {
                    s = s.server_keystore_path(path);
                }
                s
            });
        }

        if let Some(durable) = file.durable {
            builder = builder.durable(|mut d| {
                if let Some(id) = durable.id {
                    d = d.id(id);
                }
                if let Some(secs) = durable.timeout_seconds {
                    d = d.timeout(Duration::from_secs(secs));
                }
                if let Some(v) = durable.keep_alive {
                    d = d.keep_alive(v);
                }
                d
            });
        }

        if let Some(v) = file.conflate_events {
            builder = builder.conflate_events(v);
        }

        if let Some(v) = file.grid_client {
            builder = builder.grid_client(v);
        }

        builder.build()
    }
}

impl ClientConfig {
    /// Loads configuration from a YAML file.
    ///
    /// Requires the `config-file` feature.
    #[cfg(feature = "config-file")]
    pub fn from_yaml<P: AsRef<std::path::Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            ConfigError::new(format!("failed to read YAML config file: {e}"))
        })?;
        let file_config: FileConfig = serde_yaml::from_str(&content).map_err(|e| {
            ConfigError::new(format!("failed to parse YAML config: {e}"))
        })?;
        file_config.try_into()
    }

    /// Loads configuration from a TOML file.
    ///
    /// Requires the `config-file` feature.
    #[cfg(feature = "config-file")]
    pub fn from_toml<P: AsRef<std::path::Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            ConfigError::new(format!("failed to read TOML config file: {e}"))
        })?;
        let file_config: FileConfig = toml_crate::from_str(&content).map_err(|e| {
            ConfigError::new(format!("failed to parse TOML config: {e}"))
        })?;
        file_config.try_into()
    }

    /// Parses configuration from a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let file_config: FileConfig = serde_json::from_str(json)
            .map_err(|e| ConfigError::new(format!("failed to parse JSON config: {e}")))?;
        file_config.try_into()
    }

    /// Loads configuration from environment variables.
    ///
    /// # Supported Environment Variables
    ///
    /// | Variable | Maps to |
    /// |----------|---------|
    /// | `GEODE_SERVERS` | Comma-separated `host:port` list |
    /// | `GEODE_READ_TIMEOUT_MS` | Reply timeout in milliseconds |
    /// | `GEODE_RETRY_ATTEMPTS` | Retry attempts on other servers |
    /// | `GEODE_SUBSCRIPTION_ENABLED` | `"true"` or `"false"` |
    /// | `GEODE_SERVER_GROUP` | Server group name |
    /// | `GEODE_SINGLE_HOP_ENABLED` | `"true"` or `"false"` |
    /// | `GEODE_USERNAME` / `GEODE_PASSWORD` | Credential properties |
    /// | `GEODE_DURABLE_CLIENT_ID` | Durable client id |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut file_config = FileConfig::default();

        if let Some(val) = var("GEODE_SERVERS") {
            file_config.pool.get_or_insert_with(Default::default).servers = Some(
                val.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
            );
        }

        if let Some(ms) = var("GEODE_READ_TIMEOUT_MS").and_then(|v| v.parse::<u64>().ok()) {
            file_config.pool.get_or_insert_with(Default::default).read_timeout_ms = Some(ms);
        }

        if let Some(n) = var("GEODE_RETRY_ATTEMPTS").and_then(|v| v.parse::<u32>().ok()) {
            file_config.pool.get_or_insert_with(Default::default).retry_attempts = Some(n);
        }

        if let Some(val) = var("GEODE_SUBSCRIPTION_ENABLED") {
            file_config
                .pool
                .get_or_insert_with(Default::default)
                .subscription_enabled = Some(val.eq_ignore_ascii_case("true"));
        }

        if let Some(val) = var("GEODE_SERVER_GROUP") {
            file_config.pool.get_or_insert_with(Default::default).server_group = Some(val);
        }

        if let Some(val) = var("GEODE_SINGLE_HOP_ENABLED") {
            file_config
                .pool
                .get_or_insert_with(Default::default)
                .single_hop_enabled = Some(val.eq_ignore_ascii_case("true"));
        }

        if let (Some(user), Some(password)) = (var("GEODE_USERNAME"), var("GEODE_PASSWORD")) {
            let props = file_config
                .security
                .get_or_insert_with(Default::default)
                .properties
                .get_or_insert_with(Default::default);
            props.insert(SECURITY_USERNAME.to_string(), user);
            props.insert(SECURITY_PASSWORD.to_string(), password);
        }

        if let Some(id) = var("GEODE_DURABLE_CLIENT_ID") {
            file_config.durable.get_or_insert_with(Default::default).id = Some(id);
        }

        file_config.try_into()
    }
}

/// Loads a configuration file, detecting the format from its extension.
///
/// Supports `.yaml`, `.yml`, and `.toml` extensions.
/// Requires the `config-file` feature.
#[cfg(feature = "config-file")]
pub fn load_config<P: AsRef<std::path::Path>>(path: P) -> Result<ClientConfig, ConfigError> {
    let path = path.as_ref();
    match path.extension().and_then(|e| e.to_str()) {
        Some("yaml" | "yml") => ClientConfig::from_yaml(path),
        Some("toml") => ClientConfig::from_toml(path),
        Some(ext) => Err(ConfigError::new(format!(
            "unsupported config file extension: .{ext} (expected .yaml, .yml, or .toml)"
        ))),
        None => Err(ConfigError::new(
            "config file has no extension; expected .yaml, .yml, or .toml",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_file_config_defaults_produce_valid_client_config() {
        let config: ClientConfig = FileConfig::default().try_into().unwrap();
        assert_eq!(config.pool().servers()[0].address(), "localhost:40404");
    }

    #[test]
    fn test_file_config_with_pool() {
        let file_config = FileConfig {
            pool: Some(FilePoolConfig {
                servers: Some(vec!["10.0.0.1:40404".into(), "10.0.0.2:40405".into()]),
                read_timeout_ms: Some(2_500),
                retry_attempts: Some(3),
                server_group: Some("east".into()),
                single_hop_enabled: Some(false),
                ..Default::default()
            }),
            ..Default::default()
        };
        let config: ClientConfig = file_config.try_into().unwrap();
        assert_eq!(config.pool().servers().len(), 2);
        assert_eq!(config.pool().read_timeout(), Duration::from_millis(2_500));
        assert_eq!(config.pool().retry_attempts(), Some(3));
        assert_eq!(config.pool().server_group(), Some("east"));
        assert!(!config.pool().single_hop_enabled());
    }

    #[test]
    fn test_from_json_str() {
        let config = ClientConfig::from_json_str(
            r#"{
                "pool": {
                    "servers": ["10.0.0.1:40404"],
                    "subscription-enabled": true,
                    "bucket-wait-timeout-ms": 500
                },
                "durable": { "id": "feed", "timeout-seconds": 60 },
                "conflate-events": false
            }"#,
        )
        .unwrap();
        assert!(config.pool().subscription_enabled());
        assert_eq!(config.pool().bucket_wait_timeout(), Duration::from_millis(500));
        assert_eq!(config.conflate_events(), Some(false));
    }

    #[test]
    fn test_from_json_str_rejects_garbage() {
        assert!(ClientConfig::from_json_str("{ not json").is_err());
    }

    #[test]
    fn test_file_config_bad_server_is_error() {
        let file_config = FileConfig {
            pool: Some(FilePoolConfig {
                servers: Some(vec!["no-port".into()]),
                ..Default::default()
            }),
            ..Default::default()
        };
        let result: Result<ClientConfig, _> = file_config.try_into();
        assert!(result.unwrap_err().to_string().contains("no-port"));
    }

    #[test]
    fn test_file_config_with_security_and_durable() {
        let mut props = BTreeMap::new();
        props.insert("security-username".to_string(), "admin".to_string());
        let file_config = FileConfig {
            pool: Some(FilePoolConfig {
                subscription_enabled: Some(true),
                ..Default::default()
            }),
            security: Some(FileSecurityConfig {
                properties: Some(props),
                dh_algorithm: Some("AES:256".into()),
                server_keystore_path: None,
            }),
            durable: Some(FileDurableConfig {
                id: Some("feed".into()),
                timeout_seconds: Some(60),
                keep_alive: Some(true),
            }),
            conflate_events: Some(true),
            ..Default::default()
        };
        let config: ClientConfig = file_config.try_into().unwrap();
        assert_eq!(config.security().credentials().len(), 1);
        assert_eq!(config.security().dh_algorithm(), Some("AES:256"));
        assert_eq!(config.durable().id(), Some("feed"));
        assert_eq!(config.durable().timeout(), Duration::from_secs(60));
        assert_eq!(config.conflate_events(), Some(true));
    }

    #[test]
    fn test_file_config_with_retry() {
        let file_config = FileConfig {
            retry: Some(FileRetryConfig {
                initial_backoff_ms: Some(200),
                max_backoff_ms: Some(60_000),
                multiplier: Some(3.0),
                jitter: Some(0.2),
            }),
            ..Default::default()
        };
        let config: ClientConfig = file_config.try_into().unwrap();
        assert_eq!(config.retry().initial_backoff(), Duration::from_millis(200));
        assert_eq!(config.retry().max_backoff(), Duration::from_secs(60));
        assert_eq!(config.retry().multiplier(), 3.0);
        assert_eq!(config.retry().jitter(), 0.2);
    }

    #[test]
    fn test_from_vars() {
        let vars: HashMap<&str, &str> = [
            ("GEODE_SERVERS", "a:1, b:2"),
            ("GEODE_RETRY_ATTEMPTS", "4"),
            ("GEODE_USERNAME", "u"),
            ("GEODE_PASSWORD", "p"),
        ]
        .into_iter()
        .collect();
        let config = ClientConfig::from_vars(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.pool().servers().len(), 2);
        assert_eq!(config.pool().servers()[1].host(), "b");
        assert_eq!(config.pool().retry_attempts(), Some(4));
        assert_eq!(config.security().credentials().len(), 2);
    }

    #[cfg(feature = "config-file")]
    #[test]
    fn test_yaml_round_trip() {
        let file_config = FileConfig {
            conflate_events: Some(false),
            pool: Some(FilePoolConfig {
                servers: Some(vec!["h:40404".into()]),
                ..Default::default()
            }),
            ..Default::default()
        };
        let yaml = serde_yaml::to_string(&file_config).unwrap();
        let parsed: FileConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.conflate_events, Some(false));
        assert!(yaml.contains("conflate-events"));
    }

    #[cfg(feature = "config-file")]
    #[test]
    fn test_toml_round_trip() {
        let file_config = FileConfig {
            grid_client: Some(true),
            ..Default::default()
        };
        let toml_str = toml_crate::to_string(&file_config).unwrap();
        let parsed: FileConfig = toml_crate::from_str(&toml_str).unwrap();
        assert_eq!(parsed.grid_client, Some(true));
    }
}
