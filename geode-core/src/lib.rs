//! Core types and protocols for the Geode client.
//!
//! This crate has no I/O of its own: it defines the error taxonomy, the
//! serialization primitives, server and bucket locations, partition resolver
//! hooks and the wire protocol. The async client in `geode-client` drives
//! sockets with the codecs defined here.

#![warn(missing_docs)]

pub mod error;
pub mod location;
pub mod partition_resolver;
pub mod protocol;
pub mod serialization;

pub use error::{GeodeError, Result};
pub use location::{BucketServerLocation, FixedPartitionAttributes, ServerLocation};
pub use partition_resolver::{FixedPartitionResolver, PartitionResolver, RoutingContext};
pub use serialization::{
    CacheableValue, DataInput, DataOutput, Deserializable, ObjectDataInput, ObjectDataOutput,
    Serializable,
};
