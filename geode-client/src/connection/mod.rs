//! Connections to cache servers.
//!
//! A [`Connection`] owns one socket past its handshake. The [`Pool`] keeps
//! idle connections per server, retries requests on other servers and
//! fetches partition metadata. Subscription connections are handed to a
//! [`SubscriptionChannel`], which reads server pushes on its own task.

mod chunk_processor;
mod connection;
mod endpoint;
mod handshake;
mod load_balancer;
mod membership;
mod pool;
mod subscription;

pub use chunk_processor::ChunkProcessor;
pub use connection::{Connection, ConnectionId, ConnectionTimeouts, Ownership, OwnershipFlag};
pub use endpoint::Endpoint;
pub use handshake::{HandshakeSecurity, HandshakeSettings};
pub use load_balancer::{
    default_load_balancer, LoadBalancer, RandomLoadBalancer, RoundRobinLoadBalancer,
};
pub use membership::{ClientMembershipId, CLIENT_VERSION_ORDINAL};
pub use pool::{Pool, PoolBuilder, PooledConnection};
pub use subscription::{NotificationHandler, SubscriptionChannel};
