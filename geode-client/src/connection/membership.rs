//! The identity a client presents in every handshake.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use geode_core::serialization::{DataOutput, DsCode, ObjectDataOutput};
use geode_core::Result;
use uuid::Uuid;

/// Fixed id of a distributed member inside a `FixedIdByte` header.
const INTERNAL_DISTRIBUTED_MEMBER: u8 = 92;
/// Member kind of a client without a distributed system.
const VM_KIND_LONER: u8 = 13;
/// Direct-channel port advertised by loner clients.
const DIRECT_CHANNEL_PORT: i32 = 12334;
/// View id advertised by loner clients.
const SYNC_COUNTER: i32 = 2;
/// Protocol version ordinal of this client.
pub const CLIENT_VERSION_ORDINAL: u8 = 45;

/// Client membership identity.
///
/// All connections of a pool share one identity so that the servers can
/// associate data and subscription channels with the same client.
#[derive(Debug, Clone)]
pub struct ClientMembershipId {
    hostname: String,
    address: IpAddr,
    process_id: u32,
    ds_name: String,
    unique_tag: String,
    durable: Option<(String, Duration)>,
    bytes: Arc<Vec<u8>>,
}

impl ClientMembershipId {
    /// Creates an identity for this process with a random unique tag.
    pub fn new(
        hostname: impl Into<String>,
        ds_name: impl Into<String>,
        durable: Option<(String, Duration)>,
    ) -> Result<Self> {
        Self::with_details(
            hostname,
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            std::process::id(),
            ds_name,
            Uuid::new_v4().to_string(),
            durable,
        )
    }

    /// Creates an identity from explicit values.
    pub fn with_details(
        hostname: impl Into<String>,
        address: IpAddr,
        process_id: u32,
        ds_name: impl Into<String>,
        unique_tag: impl Into<String>,
        durable: Option<(String, Duration)>,
    ) -> Result<Self> {
        let mut id = Self {
            hostname: hostname.into(),
            address,
            process_id,
            ds_name: ds_name.into(),
            unique_tag: unique_tag.into(),
            durable,
            bytes: Arc::new(Vec::new()),
        };
        id.bytes = Arc::new(id.encode()?);
        Ok(id)
    }

    /// Returns the serialized identity sent in handshakes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Returns the unique tag distinguishing clients on the same host.
    pub fn unique_tag(&self) -> &str {
        &self.unique_tag
    }

    /// Returns the durable client id, if this is a durable client.
    pub fn durable_id(&self) -> Option<&str> {
        self.durable.as_ref().map(|(id, _)| id.as_str())
    }

    fn encode(&self) -> Result<Vec<u8>> {
        let mut out = ObjectDataOutput::with_capacity(128);
        out.write_unsigned_byte(DsCode::FixedIdByte as u8)?;
        out.write_unsigned_byte(INTERNAL_DISTRIBUTED_MEMBER)?;
        let addr = match self.address {
            IpAddr::V4(a) => a.octets().to_vec(),
            IpAddr::V6(a) => a.octets().to_vec(),
        };
        out.write_byte_array(Some(&addr))?;
        out.write_int(SYNC_COUNTER)?;
        out.write_string(&self.hostname)?;
        // split brain flag
        out.write_byte(0)?;
        out.write_int(DIRECT_CHANNEL_PORT)?;
        out.write_int(self.process_id as i32)?;
        out.write_unsigned_byte(VM_KIND_LONER)?;
        // no roles
        out.write_array_len(0)?;
        out.write_string(&self.ds_name)?;
        out.write_string(&self.unique_tag)?;
        if let Some((id, timeout)) = &self.durable {
            if !id.is_empty() && !timeout.is_zero() {
                out.write_string(id)?;
                out.write_unsigned_byte(DsCode::Int32 as u8)?;
                out.write_int(timeout.as_secs().min(i32::MAX as u64) as i32)?;
            }
        }
        out.write_unsigned_byte(CLIENT_VERSION_ORDINAL)?;
        Ok(out.into_bytes())
    }
}

impl std::fmt::Display for ClientMembershipId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}({}:loner):{}:{}:{}",
            self.hostname, self.process_id, SYNC_COUNTER, self.unique_tag, self.ds_name
        )
    }
}
