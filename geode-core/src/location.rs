//! Server and bucket locations as reported by partition metadata replies.

use std::fmt;
use std::hash::{Hash, Hasher};

use crate::error::{GeodeError, Result};
use crate::serialization::{DataInput, DataOutput};

/// The host and port of one cache server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServerLocation {
    host: String,
    port: u16,
}

impl ServerLocation {
    /// Creates a location for `host:port`.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Returns the host name.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Returns the `host:port` string used to open a socket.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Returns false for the placeholder location servers send for unknown hosts.
    pub fn is_valid(&self) -> bool {
        !self.host.is_empty() && self.port != 0
    }

    /// Reads a location written as a typed string followed by an `i32` port.
    pub fn from_data<R: DataInput>(input: &mut R) -> Result<Self> {
        let host = input.read_string()?;
        let port = input.read_int()?;
        let port = u16::try_from(port).map_err(|_| {
            GeodeError::Serialization(format!("invalid port {} for host {}", port, host))
        })?;
        Ok(Self { host, port })
    }

    /// Writes this location in the layout read by [`ServerLocation::from_data`].
    pub fn to_data<W: DataOutput>(&self, output: &mut W) -> Result<()> {
        output.write_string(&self.host)?;
        output.write_int(self.port as i32)
    }
}

impl fmt::Display for ServerLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl std::str::FromStr for ServerLocation {
    type Err = GeodeError;

    fn from_str(s: &str) -> Result<Self> {
        let (host, port) = s.rsplit_once(':').ok_or_else(|| {
            GeodeError::Configuration(format!("server address '{}' has no port", s))
        })?;
        let port = port.parse::<u16>().map_err(|e| {
            GeodeError::Configuration(format!("invalid port in '{}': {}", s, e))
        })?;
        if host.is_empty() {
            return Err(GeodeError::Configuration(format!(
                "server address '{}' has no host",
                s
            )));
        }
        Ok(Self::new(host, port))
    }
}

/// One replica of one bucket.
///
/// Equality and hashing consider only host, port and bucket id.
#[derive(Debug, Clone)]
pub struct BucketServerLocation {
    location: ServerLocation,
    bucket_id: i32,
    is_primary: bool,
    version: i8,
    server_groups: Vec<String>,
}

impl BucketServerLocation {
    /// Creates a bucket location.
    pub fn new(
        location: ServerLocation,
        bucket_id: i32,
        is_primary: bool,
        version: i8,
        server_groups: Vec<String>,
    ) -> Self {
        Self {
            location,
            bucket_id,
            is_primary,
            version,
            server_groups,
        }
    }

    /// Returns the server hosting this replica.
    pub fn server_location(&self) -> &ServerLocation {
        &self.location
    }

    /// Returns the bucket id.
    pub fn bucket_id(&self) -> i32 {
        self.bucket_id
    }

    /// Returns true if this replica is the bucket's primary.
    pub fn is_primary(&self) -> bool {
        self.is_primary
    }

    /// Returns the metadata version that produced this entry.
    pub fn version(&self) -> i8 {
        self.version
    }

    /// Returns the server groups the hosting server belongs to.
    pub fn server_groups(&self) -> &[String] {
        &self.server_groups
    }

    /// Returns true if the hosting server advertises `group`.
    pub fn in_server_group(&self, group: &str) -> bool {
        self.server_groups.iter().any(|g| g == group)
    }

    /// Returns true if the location names a reachable server.
    pub fn is_valid(&self) -> bool {
        self.location.is_valid()
    }

    /// Reads the serialized form that follows the class header in metadata replies.
    pub fn from_data<R: DataInput>(input: &mut R) -> Result<Self> {
        let location = ServerLocation::from_data(input)?;
        let bucket_id = input.read_int()?;
        let is_primary = input.read_bool()?;
        let version = input.read_byte()?;
        let group_count = input.read_byte()?;
        let mut server_groups = Vec::with_capacity(group_count.max(0) as usize);
        for _ in 0..group_count.max(0) {
            server_groups.push(input.read_string()?);
        }
        Ok(Self {
            location,
            bucket_id,
            is_primary,
            version,
            server_groups,
        })
    }

    /// Writes the form read by [`BucketServerLocation::from_data`].
    pub fn to_data<W: DataOutput>(&self, output: &mut W) -> Result<()> {
        self.location.to_data(output)?;
        output.write_int(self.bucket_id)?;
        output.write_bool(self.is_primary)?;
        output.write_byte(self.version)?;
        output.write_byte(self.server_groups.len() as i8)?;
        for group in &self.server_groups {
            output.write_string(group)?;
        }
        Ok(())
    }
}

impl PartialEq for BucketServerLocation {
    fn eq(&self, other: &Self) -> bool {
        self.location == other.location && self.bucket_id == other.bucket_id
    }
}

impl Eq for BucketServerLocation {}

impl Hash for BucketServerLocation {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.location.hash(state);
        self.bucket_id.hash(state);
    }
}

impl fmt::Display for BucketServerLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "bucket {} on {}{}",
            self.bucket_id,
            self.location,
            if self.is_primary { " (primary)" } else { "" }
        )
    }
}

/// A named range of buckets of a fixed-partitioned region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedPartitionAttributes {
    /// Partition name.
    pub name: String,
    /// Whether the reporting server is primary for the partition.
    pub is_primary: bool,
    /// Number of buckets in the partition.
    pub num_buckets: i32,
    /// First bucket id of the partition.
    pub starting_bucket_id: i32,
}

impl FixedPartitionAttributes {
    /// Returns true if `bucket_id` falls inside this partition.
    pub fn has_bucket(&self, bucket_id: i32) -> bool {
        bucket_id >= self.starting_bucket_id
            && bucket_id < self.starting_bucket_id + self.num_buckets
    }

    /// Reads the serialized form that follows the class header.
    pub fn from_data<R: DataInput>(input: &mut R) -> Result<Self> {
        Ok(Self {
            name: input.read_string()?,
            is_primary: input.read_bool()?,
            num_buckets: input.read_int()?,
            starting_bucket_id: input.read_int()?,
        })
    }

    /// Writes the form read by [`FixedPartitionAttributes::from_data`].
    pub fn to_data<W: DataOutput>(&self, output: &mut W) -> Result<()> {
        output.write_string(&self.name)?;
        output.write_bool(self.is_primary)?;
        output.write_int(self.num_buckets)?;
        output.write_int(self.starting_bucket_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serialization::{ObjectDataInput, ObjectDataOutput};
    use std::collections::HashSet;

    #[test]
    fn test_parse_server_location() {
        let loc: ServerLocation = "cache-a.example:40404".parse().unwrap();
        assert_eq!(loc.host(), "cache-a.example");
        assert_eq!(loc.port(), 40404);
        assert_eq!(loc.to_string(), "cache-a.example:40404");
        assert!("no-port".parse::<ServerLocation>().is_err());
        assert!(":40404".parse::<ServerLocation>().is_err());
    }

    #[test]
    fn test_bucket_location_identity_ignores_primary_flag() {
        let a = BucketServerLocation::new(ServerLocation::new("a", 1), 3, true, 1, vec![]);
        let b = BucketServerLocation::new(ServerLocation::new("a", 1), 3, false, 2, vec![]);
        let c = BucketServerLocation::new(ServerLocation::new("a", 1), 4, true, 1, vec![]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        let set: HashSet<_> = [a, b, c].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_bucket_location_from_data() {
        let loc = BucketServerLocation::new(
            ServerLocation::new("server-1", 40404),
            7,
            true,
            3,
            vec!["east".into()],
        );
        let mut out = ObjectDataOutput::new();
        loc.to_data(&mut out).unwrap();
        let bytes = out.into_bytes();
        let mut input = ObjectDataInput::new(&bytes);
        let read = BucketServerLocation::from_data(&mut input).unwrap();
        assert_eq!(read, loc);
        assert!(read.is_primary());
        assert_eq!(read.version(), 3);
        assert!(read.in_server_group("east"));
        assert_eq!(input.remaining(), 0);
    }

    #[test]
    fn test_invalid_location() {
        let loc = ServerLocation::new("", 0);
        assert!(!loc.is_valid());
    }

    #[test]
    fn test_fixed_partition_range() {
        let fpa = FixedPartitionAttributes {
            name: "Q1".into(),
            is_primary: true,
            num_buckets: 3,
            starting_bucket_id: 6,
        };
        assert!(!fpa.has_bucket(5));
        assert!(fpa.has_bucket(6));
        assert!(fpa.has_bucket(8));
        assert!(!fpa.has_bucket(9));
    }
}
