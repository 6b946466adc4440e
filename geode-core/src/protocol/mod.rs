//! Geode client/server wire protocol.
//!
//! Requests are built by the constructors in [`requests`] and framed by
//! [`MessageCodec`]. Single-message replies are decoded with
//! [`decode_reply`]; chunked replies are framed by [`ChunkCodec`] and fed to a
//! [`ChunkedReply`]. Connections open with the exchange in [`handshake`].

pub mod chunk;
mod codec;
pub mod constants;
mod event_id;
pub mod handshake;
mod message;
pub mod part;
pub mod reply;
pub mod requests;

pub use chunk::{
    BulkEntry, BulkOpCollector, Chunk, ChunkDisposition, ChunkHandler, ChunkedReply,
    DurableCqListCollector, FunctionResult, FunctionResultCollector, GetAllCollector,
    NoResultHandler, QueryResultCollector, QueryResults,
};
pub use codec::{ChunkCodec, MessageCodec};
pub use constants::*;
pub use event_id::{EventId, EventIdSource, EVENT_ID_PART_LENGTH};
pub use handshake::{
    AcceptanceCode, ChannelKind, ConflationOverride, DhOffer, DhServerHello, HandshakeCodec,
    HandshakeEvent, HandshakeRequest, SecurityMode, ServerHandshake, ServerQueueStatus,
};
pub use message::{HeaderOptions, MessageHeader, MessageWriter, PartReader, RawMessage, RequestMessage};
pub use part::Part;
pub use reply::{
    decode_reply, CqOperations, EntryNotification, EntryOpResponse, GetResponse, GetValue,
    PartitionAttributes, PrMetadataHint, PutResponse, RegionNotification, Reply, ServerException,
};
