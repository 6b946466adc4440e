//! Partition metadata and single-hop routing.
//!
//! [`ClientMetadataService`] keeps one [`ClientMetadata`] snapshot per
//! partitioned region and answers routing questions from it. Snapshots are
//! fetched through a [`MetadataFetcher`], which the connection pool
//! implements.

mod bucket_status;
mod client_metadata;
mod service;

use std::time::Duration;

use async_trait::async_trait;
use geode_core::protocol::PartitionAttributes;
use geode_core::{BucketServerLocation, Result};

pub use bucket_status::PrBucketStatus;
pub use client_metadata::{bucket_for_hash, ClientMetadata};
pub use service::{ClientMetadataService, ServerToBuckets, ServerToKeys};

/// Source of partition metadata.
#[async_trait]
pub trait MetadataFetcher: Send + Sync {
    /// Fetches the partition attributes of `region`.
    ///
    /// Returns `None` if the region is not partitioned.
    async fn fetch_partition_attributes(&self, region: &str) -> Result<Option<PartitionAttributes>>;

    /// Fetches the bucket locations of `region`, one list per bucket.
    async fn fetch_pr_metadata(&self, region: &str) -> Result<Vec<Vec<BucketServerLocation>>>;

    /// Returns the server group the client is bound to.
    fn server_group(&self) -> Option<String>;

    /// Returns how long a bucket stays marked after its primary timed out.
    /// Zero disables bucket timeouts.
    fn bucket_wait_timeout(&self) -> Duration;
}

impl std::fmt::Debug for dyn MetadataFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MetadataFetcher")
    }
}
