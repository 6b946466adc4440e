//! Async client engine for [Apache Geode](https://geode.apache.org/) data-grid
//! clusters.
//!
//! The crate speaks the Geode client/server protocol over Tokio: it performs
//! the connection handshake, pools connections per server, routes single-key
//! and bulk operations straight to the server hosting a key's bucket
//! (single-hop), and registers continuous queries whose events arrive on a
//! subscription channel.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use geode_client::{ClientConfig, GeodeClient};
//! use geode_client::core::{CacheableValue, ServerLocation};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::builder()
//!         .pool(|p| p.add_server(ServerLocation::new("localhost", 40404)))
//!         .build()?;
//!     let client = GeodeClient::connect(config).await?;
//!
//!     let key = CacheableValue::String("AAPL".into());
//!     client.put("/Portfolios", &key, &CacheableValue::Int(100)).await?;
//!     println!("{:?}", client.get("/Portfolios", &key).await?);
//!
//!     client.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! # Continuous Queries
//!
//! Continuous queries need a pool with subscriptions enabled:
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use geode_client::{CqAttributes, FnCqListener};
//!
//! let listener = FnCqListener::builder()
//!     .on_event(|event| println!("{:?} {}", event.query_operation(), event.key()))
//!     .build();
//! let attributes = CqAttributes::builder().add_listener(Arc::new(listener)).build();
//!
//! let cq = client.cq_service().new_cq(
//!     "active-portfolios",
//!     "SELECT * FROM /Portfolios p WHERE p.status = 'active'",
//!     attributes,
//!     false,
//! )?;
//! let initial = cq.execute_with_initial_results(Duration::from_secs(30)).await?;
//! ```
//!
//! # Feature Flags
//!
//! | Flag | Purpose |
//! |------|---------|
//! | `config-file` | Load [`ClientConfig`] from YAML or TOML files |

#![warn(missing_docs)]

mod client;
pub mod config;
pub mod config_file;
pub mod connection;
pub mod cq;
pub mod listener;
pub mod metadata;
pub mod security;

pub use client::{BulkResult, FunctionOptions, GeodeClient, GetAllResult};
pub use config::{
    ClientConfig, ClientConfigBuilder, ConfigError, DurableClientConfig,
    DurableClientConfigBuilder, PoolConfig, PoolConfigBuilder, RetryConfig, RetryConfigBuilder,
    SecurityConfig, SecurityConfigBuilder,
};
pub use connection::{
    Connection, ConnectionId, LoadBalancer, NotificationHandler, Pool, PoolBuilder,
    PooledConnection, SubscriptionChannel,
};
pub use cq::{
    CqAttributes, CqAttributesBuilder, CqAttributesMutator, CqEvent, CqOperation, CqQuery,
    CqResults, CqService, CqServiceStatistics, CqState, CqStatistics, CqTransport,
};
pub use geode_core as core;
pub use listener::{
    BoxedCqListener, CqListener, CqStatusListener, FnCqListener, FnCqListenerBuilder, ListenerId,
};
pub use metadata::{ClientMetadata, ClientMetadataService, MetadataFetcher};
pub use security::{
    AuthInitialize, DhKeyExchange, PropertiesAuthInitialize, SECURITY_PASSWORD, SECURITY_USERNAME,
};
