//! Custom routing of keys to buckets.
//!
//! A [`PartitionResolver`] maps an entry to a routing object whose hash picks
//! the bucket, so that related entries land together. A
//! [`FixedPartitionResolver`] additionally names the fixed partition an entry
//! belongs to; the bucket is then chosen inside that partition's range.
//!
//! # Example
//!
//! ```ignore
//! use geode_core::{CacheableValue, PartitionResolver, RoutingContext};
//!
//! struct ByCustomer;
//!
//! impl PartitionResolver for ByCustomer {
//!     fn name(&self) -> &str {
//!         "ByCustomer"
//!     }
//!
//!     fn routing_object(&self, ctx: &RoutingContext<'_>) -> Option<CacheableValue> {
//!         // keys look like "<customer>|<order>"
//!         let key = ctx.key.as_str()?;
//!         key.split('|').next().map(CacheableValue::from)
//!     }
//! }
//! ```

use crate::error::{GeodeError, Result};
use crate::serialization::CacheableValue;

/// The entry being routed.
#[derive(Debug, Clone, Copy)]
pub struct RoutingContext<'a> {
    /// Full path of the region.
    pub region: &'a str,
    /// The entry key.
    pub key: &'a CacheableValue,
    /// The operation's callback argument, if any.
    pub callback_argument: Option<&'a CacheableValue>,
}

impl<'a> RoutingContext<'a> {
    /// Creates a context for `key` in `region`.
    pub fn new(region: &'a str, key: &'a CacheableValue) -> Self {
        Self {
            region,
            key,
            callback_argument: None,
        }
    }

    /// Attaches a callback argument.
    pub fn with_callback_argument(mut self, arg: Option<&'a CacheableValue>) -> Self {
        self.callback_argument = arg;
        self
    }
}

/// Maps an entry to the object whose hash decides its bucket.
pub trait PartitionResolver: Send + Sync {
    /// Returns the resolver's name as configured on the server.
    fn name(&self) -> &str;

    /// Returns the routing object for the entry, `None` if it cannot decide.
    fn routing_object(&self, ctx: &RoutingContext<'_>) -> Option<CacheableValue>;

    /// Returns this resolver as a fixed-partition resolver, if it is one.
    fn as_fixed(&self) -> Option<&dyn FixedPartitionResolver> {
        None
    }
}

/// A resolver that also names the fixed partition of each entry.
pub trait FixedPartitionResolver: PartitionResolver {
    /// Returns the partition name for the entry among `target_partitions`.
    fn partition_name(
        &self,
        ctx: &RoutingContext<'_>,
        target_partitions: &[String],
    ) -> Option<String>;
}

/// Returns the routing object for `ctx`, falling back to the key itself.
///
/// A resolver that declines to produce one is a configuration error.
pub fn resolve_routing_object(
    resolver: Option<&dyn PartitionResolver>,
    ctx: &RoutingContext<'_>,
) -> Result<CacheableValue> {
    match resolver {
        None => Ok(ctx.key.clone()),
        Some(r) => r.routing_object(ctx).ok_or_else(|| {
            GeodeError::IllegalState(format!(
                "partition resolver '{}' returned no routing object for key {} in {}",
                r.name(),
                ctx.key,
                ctx.region
            ))
        }),
    }
}

/// Returns the fixed partition name for `ctx`.
///
/// A fixed-partition resolver that declines to name a partition is a
/// configuration error.
pub fn resolve_partition_name(
    resolver: &dyn FixedPartitionResolver,
    ctx: &RoutingContext<'_>,
    target_partitions: &[String],
) -> Result<String> {
    resolver
        .partition_name(ctx, target_partitions)
        .ok_or_else(|| {
            GeodeError::IllegalState(format!(
                "fixed partition resolver '{}' returned no partition name for key {} in {}",
                resolver.name(),
                ctx.key,
                ctx.region
            ))
        })
}
