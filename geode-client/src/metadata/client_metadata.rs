//! Bucket locations of one partitioned region.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use geode_core::protocol::PartitionAttributes;
use geode_core::{BucketServerLocation, ServerLocation};
use rand::seq::SliceRandom;
use rand::Rng;

/// Maps a routing hash to a bucket of a region with `total_buckets` buckets.
///
/// The hash is reinterpreted as unsigned before the modulo so that every
/// hash, `i32::MIN` included, lands in `0..total_buckets`.
pub fn bucket_for_hash(hash: i32, total_buckets: i32) -> i32 {
    if total_buckets <= 0 {
        return 0;
    }
    ((hash as u32) % (total_buckets as u32)) as i32
}

/// First bucket and bucket count of a fixed partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FixedRange {
    start: i32,
    count: i32,
}

/// A snapshot of where the buckets of a region live.
///
/// Snapshots are never modified once published; a refresh copies the current
/// snapshot, applies the server's answer and replaces it. The replaced
/// snapshot stays reachable from its successor until the next refresh.
#[derive(Debug)]
pub struct ClientMetadata {
    total_buckets: i32,
    colocated_with: Option<String>,
    fixed_partitions: HashMap<String, FixedRange>,
    server_group: Option<String>,
    buckets: Vec<Vec<BucketServerLocation>>,
    previous: Mutex<Option<Arc<ClientMetadata>>>,
}

impl ClientMetadata {
    /// Creates an empty snapshot from a region's partition attributes.
    pub fn new(attributes: &PartitionAttributes, server_group: Option<String>) -> Self {
        let total_buckets = attributes.total_buckets.max(0);
        let fixed_partitions = attributes
            .fixed_partitions
            .iter()
            .map(|fpa| {
                (
                    fpa.name.clone(),
                    FixedRange {
                        start: fpa.starting_bucket_id,
                        count: fpa.num_buckets,
                    },
                )
            })
            .collect();
        Self {
            total_buckets,
            colocated_with: attributes.colocated_with.clone().filter(|c| !c.is_empty()),
            fixed_partitions,
            server_group,
            buckets: vec![Vec::new(); total_buckets as usize],
            previous: Mutex::new(None),
        }
    }

    /// Copies `other`; the copy has no previous snapshot.
    pub fn copy_of(other: &ClientMetadata) -> Self {
        Self {
            total_buckets: other.total_buckets,
            colocated_with: other.colocated_with.clone(),
            fixed_partitions: other.fixed_partitions.clone(),
            server_group: other.server_group.clone(),
            buckets: other.buckets.clone(),
            previous: Mutex::new(None),
        }
    }

    /// Returns the number of buckets.
    pub fn total_buckets(&self) -> i32 {
        self.total_buckets
    }

    /// Returns the region this region is colocated with.
    pub fn colocated_with(&self) -> Option<&str> {
        self.colocated_with.as_deref()
    }

    /// Returns the names of the fixed partitions.
    pub fn partition_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.fixed_partitions.keys().cloned().collect();
        names.sort();
        names
    }

    /// Returns true if the region uses fixed partitions.
    pub fn is_fixed_partitioned(&self) -> bool {
        !self.fixed_partitions.is_empty()
    }

    /// Returns the snapshot this one replaced.
    pub fn previous(&self) -> Option<Arc<ClientMetadata>> {
        self.previous
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn set_previous(&self, previous: Option<Arc<ClientMetadata>>) {
        *self.previous.lock().unwrap_or_else(PoisonError::into_inner) = previous;
    }

    fn in_range(&self, bucket_id: i32) -> bool {
        bucket_id >= 0 && bucket_id < self.total_buckets
    }

    /// Replaces the locations of `bucket_id`.
    ///
    /// Primaries come first, then secondaries, each group in random order.
    /// With a server group configured, locations in that group lead their
    /// group, locations advertising other groups follow, and locations
    /// advertising no group at all are dropped.
    pub fn update_bucket_server_locations(
        &mut self,
        bucket_id: i32,
        locations: Vec<BucketServerLocation>,
    ) {
        if !self.in_range(bucket_id) {
            tracing::debug!(
                bucket = bucket_id,
                total = self.total_buckets,
                "ignoring locations of unknown bucket"
            );
            return;
        }

        let mut rng = rand::thread_rng();
        let mut ordered = Vec::with_capacity(locations.len());
        let (mut primaries, mut secondaries): (Vec<_>, Vec<_>) =
            locations.into_iter().partition(|l| l.is_primary());

        match &self.server_group {
            Some(group) => {
                for tier in [&mut primaries, &mut secondaries] {
                    tier.retain(|l| !l.server_groups().is_empty());
                    let (mut matching, mut others): (Vec<_>, Vec<_>) =
                        tier.drain(..).partition(|l| l.in_server_group(group));
                    matching.shuffle(&mut rng);
                    others.shuffle(&mut rng);
                    ordered.extend(matching);
                    ordered.extend(others);
                }
            }
            None => {
                primaries.shuffle(&mut rng);
                secondaries.shuffle(&mut rng);
                ordered.extend(primaries);
                ordered.extend(secondaries);
            }
        }

        self.buckets[bucket_id as usize] = ordered;
    }

    /// Removes `server` from every bucket.
    pub fn remove_bucket_server_location(&mut self, server: &ServerLocation) {
        for locations in &mut self.buckets {
            locations.retain(|l| l.server_location() != server);
        }
    }

    /// Returns a location of `bucket_id`: the first one when `primary` is
    /// set, a random one otherwise.
    pub fn server_location(&self, bucket_id: i32, primary: bool) -> Option<&BucketServerLocation> {
        let locations = self.advise_server_locations(bucket_id);
        if primary {
            locations.first()
        } else {
            locations.choose(&mut rand::thread_rng())
        }
    }

    /// Returns every known location of `bucket_id`.
    pub fn advise_server_locations(&self, bucket_id: i32) -> &[BucketServerLocation] {
        if !self.in_range(bucket_id) {
            return &[];
        }
        &self.buckets[bucket_id as usize]
    }

    /// Returns the primary location of `bucket_id`, if known.
    pub fn advise_primary_server_location(&self, bucket_id: i32) -> Option<&BucketServerLocation> {
        self.advise_server_locations(bucket_id)
            .iter()
            .find(|l| l.is_primary())
    }

    /// Returns the first location of a random bucket.
    pub fn advise_random_server_location(&self) -> Option<&BucketServerLocation> {
        if self.total_buckets == 0 {
            return None;
        }
        let bucket = rand::thread_rng().gen_range(0..self.total_buckets);
        self.advise_server_locations(bucket).first()
    }

    /// Returns the bucket of a routing hash inside the named fixed
    /// partition, `None` if the partition is unknown.
    pub fn assign_fixed_bucket_id(&self, partition: &str, hash: i32) -> Option<i32> {
        let range = self.fixed_partitions.get(partition)?;
        if range.count <= 0 {
            return None;
        }
        Some(range.start + bucket_for_hash(hash, range.count))
    }

    /// Returns the number of buckets with at least one known location.
    pub fn located_buckets(&self) -> usize {
        self.buckets.iter().filter(|l| !l.is_empty()).count()
    }
}

impl std::fmt::Display for ClientMetadata {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for locations in &self.buckets {
            for location in locations {
                write!(f, "{}|", location)?;
            }
            f.write_str("$")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geode_core::FixedPartitionAttributes;

    fn server(port: u16) -> ServerLocation {
        ServerLocation::new("127.0.0.1", port)
    }

    fn location(port: u16, bucket: i32, primary: bool, groups: &[&str]) -> BucketServerLocation {
        BucketServerLocation::new(
            server(port),
            bucket,
            primary,
            1,
            groups.iter().map(|g| g.to_string()).collect(),
        )
    }

    fn attributes(total: i32) -> PartitionAttributes {
        PartitionAttributes {
            total_buckets: total,
            ..PartitionAttributes::default()
        }
    }

    #[test]
    fn test_bucket_for_hash_is_in_range() {
        for hash in [0, 1, -1, 113, i32::MAX, i32::MIN, -7] {
            let bucket = bucket_for_hash(hash, 113);
            assert!((0..113).contains(&bucket), "{} -> {}", hash, bucket);
        }
        assert_eq!(bucket_for_hash(10, 4), 2);
        assert_eq!(bucket_for_hash(5, 0), 0);
    }

    #[test]
    fn test_primaries_before_secondaries() {
        let mut metadata = ClientMetadata::new(&attributes(4), None);
        for _ in 0..10 {
            metadata.update_bucket_server_locations(
                1,
                vec![
                    location(1, 1, false, &[]),
                    location(2, 1, true, &[]),
                    location(3, 1, false, &[]),
                ],
            );
            let locations = metadata.advise_server_locations(1);
            assert_eq!(locations.len(), 3);
            assert!(locations[0].is_primary());
            assert_eq!(locations[0].server_location(), &server(2));
            assert_eq!(metadata.server_location(1, true), Some(&locations[0]));
        }
        assert_eq!(metadata.located_buckets(), 1);
    }

    #[test]
    fn test_server_group_ordering() {
        let mut metadata = ClientMetadata::new(&attributes(2), Some("east".to_string()));
        metadata.update_bucket_server_locations(
            0,
            vec![
                location(1, 0, false, &["west"]),
                location(2, 0, false, &["east"]),
                location(3, 0, true, &["west"]),
                location(4, 0, false, &[]),
            ],
        );
        let ports: Vec<u16> = metadata
            .advise_server_locations(0)
            .iter()
            .map(|l| l.server_location().port())
            .collect();
        assert_eq!(ports, vec![3, 2, 1]);
    }

    #[test]
    fn test_out_of_range_bucket_ignored() {
        let mut metadata = ClientMetadata::new(&attributes(2), None);
        metadata.update_bucket_server_locations(5, vec![location(1, 5, true, &[])]);
        assert!(metadata.advise_server_locations(5).is_empty());
        assert!(metadata.advise_server_locations(-1).is_empty());
        assert!(metadata.server_location(5, true).is_none());
    }

    #[test]
    fn test_remove_server_from_all_buckets() {
        let mut metadata = ClientMetadata::new(&attributes(3), None);
        for bucket in 0..3 {
            metadata.update_bucket_server_locations(
                bucket,
                vec![location(1, bucket, true, &[]), location(2, bucket, false, &[])],
            );
        }
        metadata.remove_bucket_server_location(&server(1));
        for bucket in 0..3 {
            let locations = metadata.advise_server_locations(bucket);
            assert_eq!(locations.len(), 1);
            assert_eq!(locations[0].server_location(), &server(2));
            assert!(metadata.advise_primary_server_location(bucket).is_none());
        }
    }

    #[test]
    fn test_copy_keeps_locations_not_history() {
        let mut original = ClientMetadata::new(&attributes(2), None);
        original.update_bucket_server_locations(0, vec![location(1, 0, true, &[])]);
        let original = Arc::new(original);

        let copy = ClientMetadata::copy_of(&original);
        copy.set_previous(Some(Arc::clone(&original)));
        assert_eq!(copy.advise_server_locations(0).len(), 1);
        assert!(Arc::ptr_eq(&copy.previous().unwrap(), &original));
        assert!(ClientMetadata::copy_of(&copy).previous().is_none());
    }

    #[test]
    fn test_fixed_bucket_assignment() {
        let attributes = PartitionAttributes {
            total_buckets: 12,
            fixed_partitions: vec![
                FixedPartitionAttributes {
                    name: "Q1".to_string(),
                    is_primary: true,
                    num_buckets: 3,
                    starting_bucket_id: 0,
                },
                FixedPartitionAttributes {
                    name: "Q2".to_string(),
                    is_primary: true,
                    num_buckets: 3,
                    starting_bucket_id: 3,
                },
            ],
            ..PartitionAttributes::default()
        };
        let metadata = ClientMetadata::new(&attributes, None);
        assert!(metadata.is_fixed_partitioned());
        assert_eq!(metadata.partition_names(), vec!["Q1", "Q2"]);
        assert_eq!(metadata.assign_fixed_bucket_id("Q2", 7), Some(4));
        assert_eq!(metadata.assign_fixed_bucket_id("Q1", -1), Some(0));
        assert_eq!(metadata.assign_fixed_bucket_id("Q9", 7), None);
    }

    #[test]
    fn test_random_location_of_empty_metadata() {
        let metadata = ClientMetadata::new(&attributes(0), None);
        assert!(metadata.advise_random_server_location().is_none());

        let mut metadata = ClientMetadata::new(&attributes(1), None);
        metadata.update_bucket_server_locations(0, vec![location(9, 0, true, &[])]);
        assert_eq!(
            metadata.advise_random_server_location().map(|l| l.server_location().port()),
            Some(9)
        );
    }
}
