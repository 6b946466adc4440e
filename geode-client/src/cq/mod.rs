//! Continuous queries.
//!
//! A [`CqService`] owns every [`CqQuery`] created through it. Queries start
//! stopped, run once executed on the servers, and are closed for good by
//! [`CqQuery::close`]. Events pushed on the subscription channel are handed
//! to [`CqService::invoke_cq_listeners`], which builds a [`CqEvent`] for each
//! running query named in the push and calls its listeners.

mod attributes;
mod event;
mod query;
mod service;
mod statistics;

use async_trait::async_trait;
use geode_core::protocol::{HeaderOptions, MessageType, QueryResults, RequestMessage};
use geode_core::{Result, ServerLocation};

pub use attributes::{CqAttributes, CqAttributesBuilder, CqAttributesMutator};
pub use event::CqEvent;
pub use query::CqQuery;
pub use service::CqService;
pub use statistics::{CqServiceStatistics, CqStatistics};

/// Initial results of a continuous query.
pub type CqResults = QueryResults;

/// Lifecycle state of a continuous query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CqState {
    /// Registered locally, not receiving events.
    Stopped,
    /// Executing on the servers.
    Running,
    /// Closed; the query cannot be used again.
    Closed,
    /// Being closed.
    Closing,
}

impl CqState {
    /// Returns the code sent to the server in execute requests.
    pub fn code(self) -> i32 {
        match self {
            CqState::Stopped => 0,
            CqState::Running => 1,
            CqState::Closed => 2,
            CqState::Closing => 3,
        }
    }
}

impl std::fmt::Display for CqState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CqState::Stopped => "STOPPED",
            CqState::Running => "RUNNING",
            CqState::Closed => "CLOSED",
            CqState::Closing => "CLOSING",
        };
        f.write_str(name)
    }
}

/// Kind of change reported by a CQ event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CqOperation {
    /// An entry was created or started matching the query.
    Create,
    /// A matching entry was updated.
    Update,
    /// An entry was destroyed or stopped matching the query.
    Destroy,
    /// A matching entry was invalidated.
    Invalidate,
    /// The region was cleared.
    RegionClear,
    /// The region was destroyed.
    RegionDestroy,
    /// The server sent an operation code the client does not know.
    Invalid,
}

impl CqOperation {
    /// Maps the message type code carried by a notification.
    pub fn from_message_type(code: i32) -> Self {
        match MessageType::try_from(code) {
            Ok(MessageType::LocalCreate) => CqOperation::Create,
            Ok(MessageType::LocalUpdate) => CqOperation::Update,
            Ok(MessageType::LocalDestroy) => CqOperation::Destroy,
            Ok(MessageType::LocalInvalidate) => CqOperation::Invalidate,
            Ok(MessageType::ClearRegion) => CqOperation::RegionClear,
            Ok(MessageType::DestroyRegion) | Ok(MessageType::LocalDestroyRegion) => {
                CqOperation::RegionDestroy
            }
            _ => CqOperation::Invalid,
        }
    }
}

/// How the CQ layer reaches the servers.
///
/// The connection pool implements this; tests substitute a scripted one.
#[async_trait]
pub trait CqTransport: Send + Sync {
    /// Returns the pool name, used to match status listeners.
    fn pool_name(&self) -> &str;

    /// Returns true if the pool keeps subscription channels.
    fn subscription_enabled(&self) -> bool;

    /// Returns the durable client id, if the client is durable.
    fn durable_client_id(&self) -> Option<String>;

    /// Returns the header options for CQ requests.
    fn header_options(&self) -> HeaderOptions;

    /// Forgets `server` as a subscription endpoint once its channel closed.
    fn subscription_lost(&self, server: &ServerLocation) {
        let _ = server;
    }

    /// Sends a control request (execute, stop, close) and waits for the
    /// acknowledgement. Without `server` the request goes to every
    /// subscription endpoint, the primary first.
    async fn send_cq_request(
        &self,
        request: RequestMessage,
        server: Option<&ServerLocation>,
    ) -> Result<()>;

    /// Sends an execute-with-initial-results request and collects the
    /// result set.
    async fn send_cq_request_with_results(&self, request: RequestMessage) -> Result<CqResults>;

    /// Sends a durable CQ listing request and returns the names.
    async fn fetch_durable_cqs(&self, request: RequestMessage) -> Result<Vec<String>>;
}

impl std::fmt::Debug for dyn CqTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CqTransport({})", self.pool_name())
    }
}
