//! Per-server state shared by every connection to that server.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU8, Ordering};
use std::sync::OnceLock;

use geode_core::protocol::{ServerHandshake, ServerQueueStatus};
use geode_core::ServerLocation;

const STATUS_NON_REDUNDANT: u8 = 0;
const STATUS_REDUNDANT: u8 = 1;
const STATUS_PRIMARY: u8 = 2;

/// What the client knows about one server.
#[derive(Debug)]
pub struct Endpoint {
    server: ServerLocation,
    member_id: OnceLock<Vec<u8>>,
    queue_status: AtomicU8,
    queue_size: AtomicI32,
    connected: AtomicBool,
}

impl Endpoint {
    /// Creates the state of a server the client has not reached yet.
    pub fn new(server: ServerLocation) -> Self {
        Self {
            server,
            member_id: OnceLock::new(),
            queue_status: AtomicU8::new(STATUS_NON_REDUNDANT),
            queue_size: AtomicI32::new(0),
            connected: AtomicBool::new(false),
        }
    }

    /// Returns the server location.
    pub fn server(&self) -> &ServerLocation {
        &self.server
    }

    /// Records a successful handshake.
    ///
    /// The server's member id is kept from the first handshake that carries
    /// one; later handshakes never replace it.
    pub fn record_handshake(&self, reply: &ServerHandshake) {
        if let Some(member_id) = &reply.member_id {
            if self.member_id.set(member_id.clone()).is_ok() {
                tracing::debug!(
                    address = %self.server,
                    len = member_id.len(),
                    "recorded server member id"
                );
            }
        }
        let status = match reply.queue_status {
            ServerQueueStatus::NonRedundant => STATUS_NON_REDUNDANT,
            ServerQueueStatus::Redundant => STATUS_REDUNDANT,
            ServerQueueStatus::Primary => STATUS_PRIMARY,
        };
        self.queue_status.store(status, Ordering::Release);
        self.queue_size.store(reply.queue_size, Ordering::Release);
        self.connected.store(true, Ordering::Release);
    }

    /// Returns the serialized member id of the server, once known.
    pub fn member_id(&self) -> Option<&[u8]> {
        self.member_id.get().map(Vec::as_slice)
    }

    /// Returns the subscription queue role from the latest handshake.
    pub fn queue_status(&self) -> ServerQueueStatus {
        match self.queue_status.load(Ordering::Acquire) {
            STATUS_REDUNDANT => ServerQueueStatus::Redundant,
            STATUS_PRIMARY => ServerQueueStatus::Primary,
            _ => ServerQueueStatus::NonRedundant,
        }
    }

    /// Returns the subscription queue size from the latest handshake.
    pub fn queue_size(&self) -> i32 {
        self.queue_size.load(Ordering::Acquire)
    }

    /// Returns true while the server is considered reachable.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Marks the server unreachable.
    pub fn set_disconnected(&self) {
        if self.connected.swap(false, Ordering::AcqRel) {
            tracing::debug!(address = %self.server, "endpoint disconnected");
        }
    }
}
