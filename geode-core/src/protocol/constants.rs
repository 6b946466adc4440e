//! Protocol constants: message types, header layout and flag bits.

use crate::error::{GeodeError, Result};

/// Size of the fixed message header in bytes.
pub const HEADER_SIZE: usize = 17;

/// Offset of the body length field inside the header.
pub const BODY_LENGTH_OFFSET: usize = 4;

/// Offset of the early-ack flag byte inside the header.
pub const EARLY_ACK_OFFSET: usize = 16;

/// Size of a part header (`i32` length plus one flag byte).
pub const PART_HEADER_SIZE: usize = 5;

/// Size of the header preceding every chunk after the first.
pub const CHUNK_HEADER_SIZE: usize = 5;

/// Size of the header of the first chunk of a chunked reply.
pub const CHUNKED_RESPONSE_HEADER_SIZE: usize = 17;

/// Transaction id written when the request is outside a transaction.
pub const NO_TRANSACTION: i32 = -1;

/// Early-ack bit: a security part follows the message.
pub const EARLY_ACK_SECURE_PART: u8 = 0x02;

/// Early-ack bit: this request is a retry of an earlier attempt.
pub const EARLY_ACK_RETRY: u8 = 0x04;

/// Chunk flag bit: this is the last chunk of the reply.
pub const CHUNK_LAST: u8 = 0x01;

/// Chunk flag bit: a security part trails this chunk.
pub const CHUNK_SECURE_PART: u8 = 0x02;

/// Part flag: payload is raw bytes.
pub const PART_BYTES: u8 = 0;

/// Part flag: payload is a serialized object.
pub const PART_OBJECT: u8 = 1;

/// Part flag: payload is an empty byte array.
pub const PART_EMPTY_BYTE_ARRAY: u8 = 2;

/// Number of sub-timeouts a header read is split into under the default timeout.
pub const DEFAULT_TIMEOUT_RETRIES: u32 = 12;

/// Compile timeout sent with parameterised queries, in seconds.
pub const COMPILE_QUERY_CLEAR_TIMEOUT: i32 = 15;

/// Operation byte the server uses for a conditional destroy.
pub const OP_TYPE_DESTROY: i8 = 8;

/// Bulk-request flag: the region keeps no local data.
pub const BULK_FLAG_EMPTY: i32 = 0x01;

/// Bulk-request flag: the region has concurrency checks enabled.
pub const BULK_FLAG_CONCURRENCY_CHECKS: i32 = 0x02;

/// Function flag: the caller collects results.
pub const FUNCTION_HAS_RESULT: u8 = 0x01;

/// Function flag: the function may be re-executed after a member failure.
pub const FUNCTION_IS_HA: u8 = 0x02;

/// Function flag: the function writes and must run on primaries.
pub const FUNCTION_OPTIMIZE_FOR_WRITE: u8 = 0x04;

macro_rules! message_types {
    ($($(#[$doc:meta])* $name:ident = $value:literal,)+) => {
        /// Message type tags of the client/server protocol.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(i32)]
        pub enum MessageType {
            $($(#[$doc])* $name = $value,)+
        }

        impl MessageType {
            /// Returns the tag written on the wire.
            pub fn code(self) -> i32 {
                self as i32
            }

            /// Returns the protocol name of this message type.
            pub fn name(self) -> &'static str {
                match self {
                    $(MessageType::$name => stringify!($name),)+
                }
            }
        }

        impl TryFrom<i32> for MessageType {
            type Error = GeodeError;

            fn try_from(code: i32) -> Result<Self> {
                match code {
                    $($value => Ok(MessageType::$name),)+
                    other => Err(GeodeError::Protocol(format!(
                        "unknown message type {}",
                        other
                    ))),
                }
            }
        }
    };
}

message_types! {
    /// Placeholder for a reply that has not been decoded.
    Invalid = -1,
    /// Single-key get.
    Request = 0,
    /// Generic successful reply.
    Response = 1,
    /// Server-side exception.
    Exception = 2,
    /// Get failed.
    RequestDataError = 3,
    /// Unused.
    DataNotFoundError = 4,
    /// Keep-alive.
    Ping = 5,
    /// Generic acknowledgement.
    Reply = 6,
    /// Single-key put.
    Put = 7,
    /// Put failed.
    PutDataError = 8,
    /// Single-key destroy.
    Destroy = 9,
    /// Destroy failed.
    DestroyDataError = 10,
    /// Region destroy.
    DestroyRegion = 11,
    /// Region destroy failed.
    DestroyRegionDataError = 12,
    /// Server push.
    ClientNotification = 13,
    /// Server push.
    UpdateClientNotification = 14,
    /// Entry invalidated notification.
    LocalInvalidate = 15,
    /// Entry destroyed notification.
    LocalDestroy = 16,
    /// Region destroyed notification.
    LocalDestroyRegion = 17,
    /// Connection teardown.
    CloseConnection = 18,
    /// Gateway batch.
    ProcessBatch = 19,
    /// Register interest in keys.
    RegisterInterest = 20,
    /// Register interest failed.
    RegisterInterestDataError = 21,
    /// Unregister interest.
    UnregisterInterest = 22,
    /// Unregister interest failed.
    UnregisterInterestDataError = 23,
    /// Register interest in a key list.
    RegisterInterestList = 24,
    /// Unregister interest in a key list.
    UnregisterInterestList = 25,
    /// Server did not understand the request.
    UnknownMessageTypeError = 26,
    /// Entry created notification.
    LocalCreate = 27,
    /// Entry updated notification.
    LocalUpdate = 28,
    /// Region creation.
    CreateRegion = 29,
    /// Region creation failed.
    CreateRegionDataError = 30,
    /// Promote a subscription queue to primary.
    MakePrimary = 31,
    /// Reply from the primary queue.
    ResponseFromPrimary = 32,
    /// Reply from a secondary queue.
    ResponseFromSecondary = 33,
    /// Query.
    Query = 34,
    /// Query failed.
    QueryDataError = 35,
    /// Region cleared notification or request.
    ClearRegion = 36,
    /// Region clear failed.
    ClearRegionDataError = 37,
    /// Key presence check.
    ContainsKey = 38,
    /// Key presence check failed.
    ContainsKeyDataError = 39,
    /// Key set.
    KeySet = 40,
    /// Key set failed.
    KeySetDataError = 41,
    /// Register and run a continuous query.
    ExecuteCq = 42,
    /// Register and run a continuous query, returning initial results.
    ExecuteCqWithIr = 43,
    /// Stop a continuous query.
    StopCq = 44,
    /// Close a continuous query.
    CloseCq = 45,
    /// Close all continuous queries of this client.
    CloseClientCqs = 46,
    /// Continuous query request failed.
    CqDataError = 47,
    /// Continuous query statistics.
    GetCqStats = 48,
    /// Continuous query monitoring.
    MonitorCq = 49,
    /// Continuous query exception.
    CqExceptionType = 50,
    /// Instantiator registration push.
    RegisterInstantiators = 51,
    /// Subscription acknowledgement.
    PeriodicAck = 52,
    /// Client ready for events.
    ClientReady = 53,
    /// Subscription marker.
    ClientMarker = 54,
    /// Region invalidation.
    InvalidateRegion = 55,
    /// Bulk put.
    PutAll = 56,
    /// Bulk get failed.
    GetAllDataError = 58,
    /// Region function execution.
    ExecuteRegionFunction = 59,
    /// Region function result.
    ExecuteRegionFunctionResult = 60,
    /// Region function failed.
    ExecuteRegionFunctionError = 61,
    /// Member function execution.
    ExecuteFunction = 62,
    /// Member function result.
    ExecuteFunctionResult = 63,
    /// Member function failed.
    ExecuteFunctionError = 64,
    /// Interest registration push.
    ClientRegisterInterest = 65,
    /// Interest unregistration push.
    ClientUnregisterInterest = 66,
    /// Data serializer registration push.
    RegisterDataSerializers = 67,
    /// Fetch the value of an event.
    RequestEventValue = 68,
    /// Event value fetch failed.
    RequestEventValueError = 69,
    /// Delta put failed.
    PutDeltaError = 70,
    /// Fetch bucket locations of a region.
    GetClientPrMetadata = 71,
    /// Bucket locations of a region.
    ResponseClientPrMetadata = 72,
    /// Fetch partition attributes of a region.
    GetClientPartitionAttributes = 73,
    /// Partition attributes of a region.
    ResponseClientPartitionAttributes = 74,
    /// Bucket location fetch failed.
    GetClientPrMetadataError = 75,
    /// Partition attribute fetch failed.
    GetClientPartitionAttributesError = 76,
    /// Per-user credentials.
    UserCredentialMessage = 77,
    /// Remove per-user credentials.
    RemoveUserAuth = 78,
    /// Region function execution routed to the bucket owner.
    ExecuteRegionFunctionSingleHop = 79,
    /// Query with bind parameters.
    QueryWithParameters = 80,
    /// Region size.
    Size = 81,
    /// Region size failed.
    SizeError = 82,
    /// Single-key invalidate.
    Invalidate = 83,
    /// Invalidate failed.
    InvalidateError = 84,
    /// Transaction commit.
    Commit = 85,
    /// Commit failed.
    CommitError = 86,
    /// Transaction rollback.
    Rollback = 87,
    /// Transaction failover.
    TxFailover = 88,
    /// Fetch an entry.
    GetEntry = 89,
    /// Transaction synchronization.
    TxSynchronization = 90,
    /// Fetch function attributes.
    GetFunctionAttributes = 91,
    /// Fetch a PDX type.
    GetPdxTypeById = 92,
    /// Fetch a PDX type id.
    GetPdxIdForType = 93,
    /// Register a PDX type.
    AddPdxType = 94,
    /// Register a PDX enum.
    AddPdxEnum = 96,
    /// Fetch a PDX enum id.
    GetPdxIdForEnum = 97,
    /// Fetch a PDX enum.
    GetPdxEnumById = 98,
    /// Server keep-alive push.
    ServerToClientPing = 99,
    /// Bulk get.
    GetAll70 = 100,
    /// Tombstone expiry push.
    TombstoneOperation = 103,
    /// List durable continuous queries.
    GetDurableCqs = 105,
    /// Durable query listing failed.
    GetDurableCqsDataError = 106,
    /// Bulk get with callback argument.
    GetAllWithCallback = 107,
    /// Bulk put with callback argument.
    PutAllWithCallback = 108,
    /// Bulk destroy.
    RemoveAll = 109,
}

impl MessageType {
    /// Returns true if the request carries a per-user security part when
    /// security is on.
    ///
    /// Connection housekeeping, metadata fetches, PDX registry traffic and
    /// transaction control are exempt.
    pub fn is_user_initiated(self) -> bool {
        use MessageType::*;
        !matches!(
            self,
            Ping | PeriodicAck
                | MakePrimary
                | CloseConnection
                | ClientReady
                | Invalid
                | MonitorCq
                | GetCqStats
                | RequestEventValue
                | GetClientPrMetadata
                | GetClientPartitionAttributes
                | GetPdxIdForType
                | GetPdxTypeById
                | AddPdxType
                | Size
                | TxFailover
                | GetEntry
                | TxSynchronization
                | GetFunctionAttributes
                | AddPdxEnum
                | GetPdxEnumById
                | GetPdxIdForEnum
                | Commit
                | Rollback
        )
    }

    /// Returns true if the request must reach the bucket's primary.
    pub fn is_for_primary(self) -> bool {
        matches!(
            self,
            MessageType::Put | MessageType::Destroy | MessageType::ExecuteRegionFunction
        )
    }

    /// Returns true if the request can be routed straight to a bucket owner.
    pub fn is_for_single_hop(self) -> bool {
        use MessageType::*;
        matches!(
            self,
            Put | Destroy
                | Request
                | GetAll70
                | GetAllWithCallback
                | ExecuteRegionFunction
                | PutAll
                | PutAllWithCallback
        )
    }

    /// Returns true if the reply is awaited with the request's own timeout
    /// rather than the connection default.
    pub fn uses_reply_timeout(self) -> bool {
        use MessageType::*;
        matches!(
            self,
            Query
                | QueryWithParameters
                | ExecuteCqWithIr
                | GetDurableCqs
                | ExecuteFunction
                | ExecuteRegionFunction
                | ExecuteRegionFunctionSingleHop
        )
    }

    /// Returns true if the reply to this request arrives in chunks.
    pub fn has_chunked_reply(self) -> bool {
        use MessageType::*;
        matches!(
            self,
            RegisterInterest
                | RegisterInterestList
                | Query
                | QueryWithParameters
                | ExecuteFunction
                | ExecuteRegionFunction
                | ExecuteRegionFunctionSingleHop
                | ExecuteCqWithIr
                | GetDurableCqs
                | KeySet
                | GetAll70
                | GetAllWithCallback
                | PutAll
                | PutAllWithCallback
                | RemoveAll
        ) || self.is_cq_control()
    }

    /// Returns true for continuous query control requests whose chunked
    /// reply carries no result collector.
    pub fn is_cq_control(self) -> bool {
        use MessageType::*;
        matches!(
            self,
            ExecuteCq | StopCq | CloseCq | CloseClientCqs | GetCqStats | MonitorCq
        )
    }

    /// Returns true if a retried attempt must start from a fresh result
    /// collector, discarding what the failed attempt accumulated.
    pub fn resets_chunk_handler(self) -> bool {
        self.has_chunked_reply() && !self.is_cq_control()
    }

    /// Returns true for server pushes that carry nothing the client acts on.
    pub fn is_ignored_push(self) -> bool {
        use MessageType::*;
        matches!(
            self,
            ClientRegisterInterest
                | ClientUnregisterInterest
                | ServerToClientPing
                | RegisterInstantiators
        )
    }

    /// Returns true for the `*_DATA_ERROR` family of replies.
    pub fn is_data_error(self) -> bool {
        use MessageType::*;
        matches!(
            self,
            RequestDataError
                | PutDataError
                | DestroyDataError
                | DestroyRegionDataError
                | RegisterInterestDataError
                | UnregisterInterestDataError
                | CreateRegionDataError
                | QueryDataError
                | ClearRegionDataError
                | ContainsKeyDataError
                | KeySetDataError
                | CqDataError
                | GetAllDataError
                | RequestEventValueError
                | PutDeltaError
                | GetClientPrMetadataError
                | GetClientPartitionAttributesError
                | SizeError
                | InvalidateError
                | CommitError
                | GetDurableCqsDataError
                | ExecuteRegionFunctionError
                | ExecuteFunctionError
        )
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.name(), self.code())
    }
}
