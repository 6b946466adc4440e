//! Decoding of non-chunked replies and server pushes.
//!
//! The shape of a reply depends on both its own message type and the type of
//! the request it answers, so [`decode_reply`] takes both. Parts are read in
//! declaration order; a missing or malformed part is a protocol error for
//! this reply only.

use bytes::Bytes;

use super::constants::*;
use super::message::{PartReader, RawMessage};
use super::part::Part;
use crate::error::{GeodeError, Result};
use crate::location::{BucketServerLocation, FixedPartitionAttributes};
use crate::serialization::{CacheableValue, DataInput, DsCode, ObjectDataInput};

const GET_HAS_CALLBACK: i32 = 0x01;
const GET_HAS_VERSION_TAG: i32 = 0x02;
const GET_KEY_NOT_PRESENT: i32 = 0x04;
const GET_VALUE_IS_INVALID: i32 = 0x08;

const PUT_HAS_OLD_VALUE: i32 = 0x01;
const PUT_HAS_VERSION_TAG: i32 = 0x04;

const HAS_VERSION_TAG: i32 = 0x01;

/// Single-hop hint piggybacked on data replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PrMetadataHint {
    /// Non-zero when the server had to forward the request.
    pub version: i8,
    /// Server-group flag, present on newer servers.
    pub server_group_flag: Option<i8>,
}

impl PrMetadataHint {
    /// Server-group flag meaning the target shares this client's server group.
    pub const SAME_SERVER_GROUP: i8 = 2;

    /// Reads a hint part: the version byte, optionally the server-group byte.
    pub fn from_part(part: &Part) -> Self {
        let payload = part.payload();
        Self {
            version: payload.first().map_or(0, |b| *b as i8),
            server_group_flag: if payload.len() == 2 {
                Some(payload[1] as i8)
            } else {
                None
            },
        }
    }

    /// Returns true if the reply signals stale routing metadata.
    pub fn is_network_hop(&self) -> bool {
        self.version != 0
    }
}

/// Value of a single-key get.
#[derive(Debug, Clone, PartialEq)]
pub enum GetValue {
    /// The entry's value.
    Value(CacheableValue),
    /// The entry exists but its value was invalidated.
    Invalid,
    /// The key has been destroyed; the server keeps a tombstone.
    NotPresent,
}

/// Decoded reply to a get.
#[derive(Debug, Clone, PartialEq)]
pub struct GetResponse {
    /// The value or its absence.
    pub value: GetValue,
    /// Callback argument stored with the entry.
    pub callback_argument: Option<CacheableValue>,
    /// Serialized version tag, kept opaque.
    pub version_tag: Option<Bytes>,
    /// Single-hop hint.
    pub metadata: Option<PrMetadataHint>,
}

/// Decoded reply to a put.
#[derive(Debug, Clone, PartialEq)]
pub struct PutResponse {
    /// Single-hop hint.
    pub metadata: PrMetadataHint,
    /// Previous value, when the server returned it.
    pub old_value: Option<CacheableValue>,
    /// Serialized version tag.
    pub version_tag: Option<Bytes>,
}

/// Decoded reply to a destroy or an invalidate.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryOpResponse {
    /// Single-hop hint.
    pub metadata: PrMetadataHint,
    /// Serialized version tag.
    pub version_tag: Option<Bytes>,
    /// The key did not exist (destroy only).
    pub entry_not_found: bool,
}

/// An exception raised on the server.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerException {
    /// `"<class name>: <message>"` as sent by the server.
    pub message: String,
    /// Members that failed while executing a function.
    pub failed_nodes: Option<CacheableValue>,
}

impl ServerException {
    /// Reads an exception from parts: an opaque serialized Java exception,
    /// then the message, then the failed-node set. Trailing parts are
    /// optional and read while present.
    pub fn from_parts(reader: &mut PartReader<'_>) -> Result<Self> {
        reader.next("exception")?;
        let message = match reader.next_optional() {
            Some(part) => part.as_string()?,
            None => String::new(),
        };
        let failed_nodes = match reader.next_optional() {
            Some(part) => Some(part.as_object()?),
            None => None,
        };
        Ok(Self {
            message,
            failed_nodes,
        })
    }

    /// Converts the exception into a typed error.
    pub fn to_error(&self) -> GeodeError {
        GeodeError::from_server_exception(&self.message)
    }
}

/// Partition attributes of a region.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PartitionAttributes {
    /// Total number of buckets.
    pub total_buckets: i32,
    /// Region this region is colocated with.
    pub colocated_with: Option<String>,
    /// Server-side partition resolver class.
    pub resolver_name: Option<String>,
    /// Fixed partitions, empty for ordinary partitioned regions.
    pub fixed_partitions: Vec<FixedPartitionAttributes>,
}

/// CQ names and operations carried by a notification.
pub type CqOperations = Vec<(String, i32)>;

/// An entry change pushed on a subscription channel.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryNotification {
    /// LOCAL_CREATE, LOCAL_UPDATE, LOCAL_INVALIDATE or LOCAL_DESTROY.
    pub kind: MessageType,
    /// Full region path.
    pub region: String,
    /// Key of the entry.
    pub key: CacheableValue,
    /// New value for creates and full updates.
    pub value: Option<CacheableValue>,
    /// Delta bytes for delta updates.
    pub delta: Option<Bytes>,
    /// Callback argument of the originating operation.
    pub callback_argument: CacheableValue,
    /// Serialized version tag.
    pub version_tag: Option<Bytes>,
    /// The event matched this client's interest list.
    pub interest_list_passed: bool,
    /// Message type the CQ layer should use; differs from `kind` for
    /// invalidates.
    pub cq_message_type: Option<i32>,
    /// CQs affected by the event with their operation codes.
    pub cqs: CqOperations,
    /// Serialized event id.
    pub event_id: Bytes,
}

impl EntryNotification {
    /// Returns true if the notification carries CQ information.
    pub fn has_cqs(&self) -> bool {
        self.cq_message_type.is_some()
    }
}

/// A region-level change pushed on a subscription channel.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionNotification {
    /// LOCAL_DESTROY_REGION or CLEAR_REGION.
    pub kind: MessageType,
    /// Full region path.
    pub region: String,
    /// Callback argument of the originating operation.
    pub callback_argument: CacheableValue,
    /// Affected CQs with their operation codes.
    pub cqs: CqOperations,
    /// Serialized event id.
    pub event_id: Bytes,
}

/// A decoded reply.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Reply to a get.
    Get(GetResponse),
    /// Reply to a contains-key check.
    ContainsKey(bool),
    /// Generic object reply.
    Object {
        /// The returned value.
        value: CacheableValue,
        /// Single-hop hint.
        metadata: Option<PrMetadataHint>,
    },
    /// Reply to a put.
    Put(PutResponse),
    /// Reply to a destroy.
    Destroy(EntryOpResponse),
    /// Reply to an invalidate.
    Invalidate(EntryOpResponse),
    /// Plain acknowledgement.
    Ack(Option<PrMetadataHint>),
    /// Server-side exception.
    Exception(ServerException),
    /// A `*_DATA_ERROR` reply.
    DataError {
        /// The error message type.
        kind: MessageType,
        /// Server message.
        message: String,
    },
    /// A push the client does not act on.
    Ignored(MessageType),
    /// Bucket locations, one list per reply part. Empty when the server has
    /// no metadata for the region.
    PrMetadata(Vec<Vec<BucketServerLocation>>),
    /// Partition attributes of a region.
    PartitionAttributes(PartitionAttributes),
    /// Entry change notification.
    Entry(EntryNotification),
    /// Region change notification.
    Region(RegionNotification),
    /// Subscription queue marker.
    Marker {
        /// Serialized event id.
        event_id: Bytes,
    },
    /// Tombstone garbage collection push; the payload is not interpreted.
    Tombstone {
        /// Full region path.
        region: String,
        /// Tombstone operation code.
        operation: i32,
    },
    /// The server replied with an INVALID message.
    Invalid(String),
}

impl Reply {
    /// Converts error replies into errors and passes everything else through.
    pub fn into_result(self) -> Result<Reply> {
        match self {
            Reply::Exception(e) => Err(e.to_error()),
            Reply::DataError { kind, message } => Err(match kind {
                MessageType::CqDataError => GeodeError::CqQuery(message),
                _ => GeodeError::Server {
                    class_name: None,
                    message: format!("{}: {}", kind.name(), message),
                },
            }),
            Reply::Invalid(message) => Err(GeodeError::Protocol(format!(
                "server answered with an invalid message: {}",
                message
            ))),
            other => Ok(other),
        }
    }

    /// Returns the single-hop hint carried by the reply, if any.
    pub fn metadata_hint(&self) -> Option<PrMetadataHint> {
        match self {
            Reply::Get(r) => r.metadata,
            Reply::Object { metadata, .. } => *metadata,
            Reply::Put(r) => Some(r.metadata),
            Reply::Destroy(r) | Reply::Invalidate(r) => Some(r.metadata),
            Reply::Ack(m) => *m,
            _ => None,
        }
    }
}

/// Decodes a reply to `request`.
pub fn decode_reply(request: MessageType, msg: &RawMessage) -> Result<Reply> {
    let kind = msg.header().kind()?;
    let mut reader = msg.reader();
    let num_parts = msg.header().num_parts.max(0) as usize;

    if kind.is_ignored_push() {
        return Ok(Reply::Ignored(kind));
    }
    if kind.is_data_error() {
        let message = match reader.next_optional() {
            Some(part) => part.as_string()?,
            None => String::new(),
        };
        return Ok(Reply::DataError { kind, message });
    }

    match kind {
        MessageType::Response => decode_response(request, num_parts, &mut reader),
        MessageType::Reply => decode_ack(request, &mut reader),
        MessageType::Exception => Ok(Reply::Exception(ServerException::from_parts(&mut reader)?)),
        MessageType::Invalid => {
            let message = match reader.next_optional() {
                Some(part) => part.as_string()?,
                None => String::new(),
            };
            Ok(Reply::Invalid(message))
        }
        MessageType::LocalInvalidate
        | MessageType::LocalDestroy
        | MessageType::LocalCreate
        | MessageType::LocalUpdate => Ok(Reply::Entry(decode_entry_notification(kind, &mut reader)?)),
        MessageType::LocalDestroyRegion | MessageType::ClearRegion => {
            Ok(Reply::Region(decode_region_notification(kind, &mut reader)?))
        }
        MessageType::ClientMarker => Ok(Reply::Marker {
            event_id: reader.next("event id")?.payload().clone(),
        }),
        MessageType::ResponseClientPrMetadata => {
            Ok(Reply::PrMetadata(decode_pr_metadata(msg.parts())?))
        }
        MessageType::ResponseClientPartitionAttributes => Ok(Reply::PartitionAttributes(
            decode_partition_attributes(num_parts, &mut reader)?,
        )),
        MessageType::TombstoneOperation => {
            let region = region_name(reader.next("region")?)?;
            let operation = reader.next("tombstone operation")?.as_int()?;
            Ok(Reply::Tombstone { region, operation })
        }
        MessageType::UnknownMessageTypeError => Err(GeodeError::Protocol(format!(
            "server did not understand {}",
            request
        ))),
        other => Err(GeodeError::Protocol(format!(
            "unexpected reply {} to {}",
            other, request
        ))),
    }
}

fn decode_response(
    request: MessageType,
    num_parts: usize,
    reader: &mut PartReader<'_>,
) -> Result<Reply> {
    match request {
        MessageType::ContainsKey => Ok(Reply::ContainsKey(
            reader.next("contains key result")?.as_bool_object(),
        )),
        MessageType::Request => {
            let value = reader.next("value")?.as_object()?;
            let flags = reader.next("flags")?.as_int()?;
            let mut read = 2;
            let callback_argument = if flags & GET_HAS_CALLBACK != 0 {
                read += 1;
                Some(reader.next("callback argument")?.as_object()?)
            } else {
                None
            };
            let version_tag = if flags & GET_HAS_VERSION_TAG != 0 {
                read += 1;
                version_tag(reader.next("version tag")?)
            } else {
                None
            };
            let value = if flags & GET_KEY_NOT_PRESENT != 0 {
                GetValue::NotPresent
            } else if value.is_null() && flags & GET_VALUE_IS_INVALID != 0 {
                GetValue::Invalid
            } else {
                GetValue::Value(value)
            };
            let metadata = if num_parts > read {
                Some(PrMetadataHint::from_part(reader.next("metadata")?))
            } else {
                None
            };
            Ok(Reply::Get(GetResponse {
                value,
                callback_argument,
                version_tag,
                metadata,
            }))
        }
        _ => {
            let value = match reader.next_optional() {
                Some(part) => part.as_object()?,
                None => CacheableValue::Null,
            };
            let metadata = match num_parts {
                0 | 1 => None,
                2 => Some(PrMetadataHint::from_part(reader.next("metadata")?)),
                _ => {
                    reader.skip(1)?;
                    Some(PrMetadataHint::from_part(reader.next("metadata")?))
                }
            };
            Ok(Reply::Object { value, metadata })
        }
    }
}

fn decode_ack(request: MessageType, reader: &mut PartReader<'_>) -> Result<Reply> {
    match request {
        MessageType::Put => {
            let metadata = PrMetadataHint::from_part(reader.next("metadata")?);
            let flags = reader.next("flags")?.as_int()?;
            let old_value = if flags & PUT_HAS_OLD_VALUE != 0 {
                Some(reader.next("old value")?.as_object()?)
            } else {
                None
            };
            let version_tag = if flags & PUT_HAS_VERSION_TAG != 0 {
                version_tag(reader.next("version tag")?)
            } else {
                None
            };
            Ok(Reply::Put(PutResponse {
                metadata,
                old_value,
                version_tag,
            }))
        }
        MessageType::Invalidate | MessageType::Destroy => {
            let flags = reader.next("flags")?.as_int()?;
            let version_tag = if flags & HAS_VERSION_TAG != 0 {
                version_tag(reader.next("version tag")?)
            } else {
                None
            };
            let metadata = PrMetadataHint::from_part(reader.next("metadata")?);
            if request == MessageType::Invalidate {
                return Ok(Reply::Invalidate(EntryOpResponse {
                    metadata,
                    version_tag,
                    entry_not_found: false,
                }));
            }
            let entry_not_found = reader.next("entry not found")?.as_int()? != 0;
            Ok(Reply::Destroy(EntryOpResponse {
                metadata,
                version_tag,
                entry_not_found,
            }))
        }
        _ => Ok(Reply::Ack(
            reader.next_optional().map(PrMetadataHint::from_part),
        )),
    }
}

fn version_tag(part: &Part) -> Option<Bytes> {
    match part.payload().first() {
        None => None,
        Some(code) if *code == DsCode::NullObj as u8 => None,
        Some(_) => Some(part.payload().clone()),
    }
}

fn region_name(part: &Part) -> Result<String> {
    String::from_utf8(part.payload().to_vec())
        .map_err(|e| GeodeError::Protocol(format!("region name is not valid UTF-8: {}", e)))
}

/// Keys travel as objects, or as raw modified UTF-8 for string keys.
fn key_part(part: &Part) -> Result<CacheableValue> {
    if part.is_object() || part.is_empty() {
        part.as_object()
    } else {
        part.as_string().map(CacheableValue::String)
    }
}

fn cq_operations(reader: &mut PartReader<'_>) -> Result<CqOperations> {
    let count = reader.next("cq count")?.as_int()?;
    if count < 0 || count % 2 != 0 {
        return Err(GeodeError::Protocol(format!(
            "invalid cq part count {}",
            count
        )));
    }
    let mut cqs = Vec::with_capacity(count as usize / 2);
    for _ in 0..count / 2 {
        let name = reader.next("cq name")?.as_string()?;
        let op = reader.next("cq operation")?.as_int()?;
        cqs.push((name, op));
    }
    Ok(cqs)
}

fn decode_entry_notification(
    kind: MessageType,
    reader: &mut PartReader<'_>,
) -> Result<EntryNotification> {
    let region = region_name(reader.next("region")?)?;
    let key = key_part(reader.next("key")?)?;

    let mut value = None;
    let mut delta = None;
    if matches!(kind, MessageType::LocalCreate | MessageType::LocalUpdate) {
        let is_delta = reader.next("delta flag")?.as_bool_object();
        let part = reader.next("value")?;
        if is_delta {
            delta = Some(part.payload().clone());
        } else {
            value = Some(part.as_object()?);
        }
    }

    let callback_argument = reader.next("callback argument")?.as_object()?;
    let version_tag = version_tag(reader.next("version tag")?);
    let interest_list_passed = reader.next("interest list flag")?.as_bool_object();
    let has_cqs = reader.next("cq flag")?.as_bool_object();

    let mut cq_message_type = None;
    let mut cqs = Vec::new();
    if has_cqs {
        cq_message_type = Some(if kind == MessageType::LocalInvalidate {
            reader.next("cq message type")?.as_int()?
        } else {
            kind.code()
        });
        cqs = cq_operations(reader)?;
    }
    let event_id = reader.next("event id")?.payload().clone();

    Ok(EntryNotification {
        kind,
        region,
        key,
        value,
        delta,
        callback_argument,
        version_tag,
        interest_list_passed,
        cq_message_type,
        cqs,
        event_id,
    })
}

fn decode_region_notification(
    kind: MessageType,
    reader: &mut PartReader<'_>,
) -> Result<RegionNotification> {
    let region = region_name(reader.next("region")?)?;
    let callback_argument = reader.next("callback argument")?.as_object()?;
    let has_cqs = reader.next("cq flag")?.as_bool_object();
    let cqs = if has_cqs {
        cq_operations(reader)?
    } else {
        Vec::new()
    };
    let event_id = reader.next("event id")?.payload().clone();
    Ok(RegionNotification {
        kind,
        region,
        callback_argument,
        cqs,
        event_id,
    })
}

/// Skips the data-serializable class header that precedes each element of
/// metadata collections: three type bytes and a `u16`-prefixed class name.
pub(crate) fn skip_class_header<R: DataInput>(input: &mut R) -> Result<()> {
    input.skip(3)?;
    let class_len = input.read_unsigned_short()? as usize;
    input.skip(class_len)
}

fn decode_pr_metadata(parts: &[Part]) -> Result<Vec<Vec<BucketServerLocation>>> {
    let mut metadata = Vec::with_capacity(parts.len());
    for part in parts {
        let mut input = ObjectDataInput::new(part.payload());
        // array list type id
        input.skip(1)?;
        let len = input.read_array_len()?;
        if len <= 0 {
            continue;
        }
        let mut locations = Vec::with_capacity(len as usize);
        for _ in 0..len {
            skip_class_header(&mut input)?;
            locations.push(BucketServerLocation::from_data(&mut input)?);
        }
        metadata.push(locations);
    }
    Ok(metadata)
}

fn optional_typed_string(part: &Part) -> Result<Option<String>> {
    if part.is_empty() {
        return Ok(None);
    }
    let mut input = ObjectDataInput::new(part.payload());
    input.read_nullable_string()
}

fn decode_partition_attributes(
    num_parts: usize,
    reader: &mut PartReader<'_>,
) -> Result<PartitionAttributes> {
    let total_buckets = reader.next("bucket count")?.as_native_int()?;
    let colocated_with = optional_typed_string(reader.next("colocated with")?)?;
    let mut attributes = PartitionAttributes {
        total_buckets,
        colocated_with,
        ..PartitionAttributes::default()
    };
    if num_parts == 4 {
        attributes.resolver_name = optional_typed_string(reader.next("resolver")?)?;
        let part = reader.next("fixed partitions")?;
        let mut input = ObjectDataInput::new(part.payload());
        // hash set type id
        input.skip(1)?;
        let len = input.read_array_len()?;
        for _ in 0..len.max(0) {
            skip_class_header(&mut input)?;
            attributes
                .fixed_partitions
                .push(FixedPartitionAttributes::from_data(&mut input)?);
        }
    }
    Ok(attributes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::ServerLocation;
    use crate::protocol::message::MessageHeader;
    use crate::serialization::{DataOutput, ObjectDataOutput, Serializable};

    fn raw(kind: MessageType, parts: Vec<Part>) -> RawMessage {
        let body_length = parts.iter().map(Part::wire_size).sum::<usize>() as i32;
        RawMessage::new(
            MessageHeader {
                message_type: kind.code(),
                body_length,
                num_parts: parts.len() as i32,
                transaction_id: NO_TRANSACTION,
                flags: 0,
            },
            parts,
        )
    }

    fn object(value: &CacheableValue) -> Part {
        let mut out = ObjectDataOutput::new();
        value.serialize(&mut out).unwrap();
        Part::object(out.into_bytes())
    }

    fn class_header(out: &mut ObjectDataOutput, class: &str) {
        out.write_bytes(&[1, 43, 87]).unwrap();
        out.write_short(class.len() as i16).unwrap();
        out.write_bytes(class.as_bytes()).unwrap();
    }

    #[test]
    fn test_get_with_callback_and_metadata() {
        let msg = raw(
            MessageType::Response,
            vec![
                object(&CacheableValue::Int(10)),
                Part::int(GET_HAS_CALLBACK),
                object(&CacheableValue::from("cb")),
                Part::bytes(vec![1u8]),
            ],
        );
        let reply = decode_reply(MessageType::Request, &msg).unwrap();
        let Reply::Get(get) = reply else {
            panic!("expected a get reply");
        };
        assert_eq!(get.value, GetValue::Value(CacheableValue::Int(10)));
        assert_eq!(get.callback_argument, Some(CacheableValue::from("cb")));
        assert!(get.metadata.unwrap().is_network_hop());
    }

    #[test]
    fn test_get_invalid_and_not_present() {
        let msg = raw(
            MessageType::Response,
            vec![Part::bytes(Bytes::new()), Part::int(GET_VALUE_IS_INVALID)],
        );
        let Reply::Get(get) = decode_reply(MessageType::Request, &msg).unwrap() else {
            panic!("expected a get reply");
        };
        assert_eq!(get.value, GetValue::Invalid);
        assert!(get.metadata.is_none());

        let msg = raw(
            MessageType::Response,
            vec![Part::bytes(Bytes::new()), Part::int(GET_KEY_NOT_PRESENT)],
        );
        let Reply::Get(get) = decode_reply(MessageType::Request, &msg).unwrap() else {
            panic!("expected a get reply");
        };
        assert_eq!(get.value, GetValue::NotPresent);
    }

    #[test]
    fn test_get_missing_flags_is_protocol_error() {
        let msg = raw(MessageType::Response, vec![object(&CacheableValue::Int(1))]);
        let err = decode_reply(MessageType::Request, &msg).unwrap_err();
        assert!(matches!(err, GeodeError::Protocol(_)));
    }

    #[test]
    fn test_contains_key() {
        let msg = raw(MessageType::Response, vec![Part::object(vec![53u8, 1])]);
        assert_eq!(
            decode_reply(MessageType::ContainsKey, &msg).unwrap(),
            Reply::ContainsKey(true)
        );
    }

    #[test]
    fn test_put_reply_with_old_value() {
        let msg = raw(
            MessageType::Reply,
            vec![
                Part::bytes(vec![0u8, 2]),
                Part::int(PUT_HAS_OLD_VALUE),
                object(&CacheableValue::Long(7)),
            ],
        );
        let Reply::Put(put) = decode_reply(MessageType::Put, &msg).unwrap() else {
            panic!("expected a put reply");
        };
        assert_eq!(put.old_value, Some(CacheableValue::Long(7)));
        assert!(!put.metadata.is_network_hop());
        assert_eq!(
            put.metadata.server_group_flag,
            Some(PrMetadataHint::SAME_SERVER_GROUP)
        );
    }

    #[test]
    fn test_destroy_reply_entry_not_found() {
        let msg = raw(
            MessageType::Reply,
            vec![Part::int(0), Part::bytes(vec![0u8]), Part::int(1)],
        );
        let Reply::Destroy(d) = decode_reply(MessageType::Destroy, &msg).unwrap() else {
            panic!("expected a destroy reply");
        };
        assert!(d.entry_not_found);
        assert!(d.version_tag.is_none());
    }

    #[test]
    fn test_exception_reads_parts_greedily() {
        let msg = raw(
            MessageType::Exception,
            vec![
                Part::object(vec![44u8, 0xAC, 0xED]),
                Part::string("org.apache.geode.security.NotAuthorizedException: denied"),
            ],
        );
        let reply = decode_reply(MessageType::Put, &msg).unwrap();
        let Reply::Exception(e) = &reply else {
            panic!("expected an exception");
        };
        assert!(e.failed_nodes.is_none());
        assert!(matches!(
            reply.into_result().unwrap_err(),
            GeodeError::NotAuthorized(m) if m == "denied"
        ));

        let msg = raw(
            MessageType::Exception,
            vec![
                Part::object(vec![44u8]),
                Part::string("boom"),
                object(&CacheableValue::HashSet(vec![CacheableValue::from("m1")])),
            ],
        );
        let Reply::Exception(e) = decode_reply(MessageType::ExecuteFunction, &msg).unwrap() else {
            panic!("expected an exception");
        };
        assert_eq!(e.message, "boom");
        assert!(e.failed_nodes.is_some());
    }

    #[test]
    fn test_data_error() {
        let msg = raw(MessageType::PutDataError, vec![Part::string("no region")]);
        let reply = decode_reply(MessageType::Put, &msg).unwrap();
        assert_eq!(
            reply,
            Reply::DataError {
                kind: MessageType::PutDataError,
                message: "no region".into()
            }
        );
        assert!(reply.into_result().is_err());
    }

    #[test]
    fn test_ignored_pushes() {
        let msg = raw(MessageType::ServerToClientPing, vec![]);
        assert_eq!(
            decode_reply(MessageType::Invalid, &msg).unwrap(),
            Reply::Ignored(MessageType::ServerToClientPing)
        );
    }

    #[test]
    fn test_empty_pr_metadata() {
        let msg = raw(MessageType::ResponseClientPrMetadata, vec![]);
        assert_eq!(
            decode_reply(MessageType::GetClientPrMetadata, &msg).unwrap(),
            Reply::PrMetadata(vec![])
        );
    }

    #[test]
    fn test_pr_metadata() {
        let location = BucketServerLocation::new(
            ServerLocation::new("server-a", 40404),
            3,
            true,
            1,
            vec!["g1".into()],
        );
        let mut out = ObjectDataOutput::new();
        out.write_unsigned_byte(DsCode::ArrayList as u8).unwrap();
        out.write_array_len(1).unwrap();
        class_header(&mut out, "org.apache.geode.internal.cache.BucketServerLocation66");
        location.to_data(&mut out).unwrap();

        let mut empty = ObjectDataOutput::new();
        empty.write_unsigned_byte(DsCode::ArrayList as u8).unwrap();
        empty.write_array_len(0).unwrap();

        let msg = raw(
            MessageType::ResponseClientPrMetadata,
            vec![Part::object(out.into_bytes()), Part::object(empty.into_bytes())],
        );
        let Reply::PrMetadata(metadata) =
            decode_reply(MessageType::GetClientPrMetadata, &msg).unwrap()
        else {
            panic!("expected metadata");
        };
        assert_eq!(metadata.len(), 1);
        assert_eq!(metadata[0][0], location);
        assert!(metadata[0][0].is_primary());
        assert_eq!(metadata[0][0].server_groups(), &["g1".to_string()]);
    }

    #[test]
    fn test_partition_attributes_with_fixed_partitions() {
        let fpa = FixedPartitionAttributes {
            name: "Q1".into(),
            is_primary: true,
            num_buckets: 3,
            starting_bucket_id: 0,
        };
        let mut set = ObjectDataOutput::new();
        set.write_unsigned_byte(DsCode::HashSet as u8).unwrap();
        set.write_array_len(1).unwrap();
        class_header(&mut set, "FixedPartitionAttributesImpl");
        fpa.to_data(&mut set).unwrap();

        let msg = raw(
            MessageType::ResponseClientPartitionAttributes,
            vec![
                Part::object(vec![57u8, 0, 0, 0, 113]),
                Part::object(vec![87u8, 0, 2, b'/', b'p']),
                Part::object(Bytes::new()),
                Part::object(set.into_bytes()),
            ],
        );
        let Reply::PartitionAttributes(attrs) =
            decode_reply(MessageType::GetClientPartitionAttributes, &msg).unwrap()
        else {
            panic!("expected partition attributes");
        };
        assert_eq!(attrs.total_buckets, 113);
        assert_eq!(attrs.colocated_with.as_deref(), Some("/p"));
        assert!(attrs.resolver_name.is_none());
        assert_eq!(attrs.fixed_partitions, vec![fpa]);
    }

    #[test]
    fn test_local_update_with_cqs() {
        let msg = raw(
            MessageType::LocalUpdate,
            vec![
                Part::bytes(b"/Portfolios".to_vec()),
                Part::string("k1"),
                Part::object(vec![53u8, 0]),
                object(&CacheableValue::Int(4)),
                Part::bytes(Bytes::new()),
                Part::bytes(Bytes::new()),
                Part::object(vec![53u8, 1]),
                Part::object(vec![53u8, 1]),
                Part::int(2),
                Part::string("cq1"),
                Part::int(2),
                Part::bytes(vec![0u8; 18]),
            ],
        );
        let Reply::Entry(event) = decode_reply(MessageType::Invalid, &msg).unwrap() else {
            panic!("expected an entry notification");
        };
        assert_eq!(event.region, "/Portfolios");
        assert_eq!(event.key, CacheableValue::from("k1"));
        assert_eq!(event.value, Some(CacheableValue::Int(4)));
        assert!(event.interest_list_passed);
        assert_eq!(event.cq_message_type, Some(MessageType::LocalUpdate.code()));
        assert_eq!(event.cqs, vec![("cq1".to_string(), 2)]);
        assert_eq!(event.event_id.len(), 18);
    }

    #[test]
    fn test_local_invalidate_reads_cq_message_type() {
        let msg = raw(
            MessageType::LocalInvalidate,
            vec![
                Part::bytes(b"/r".to_vec()),
                object(&CacheableValue::Int(1)),
                Part::bytes(Bytes::new()),
                Part::bytes(Bytes::new()),
                Part::object(vec![53u8, 0]),
                Part::object(vec![53u8, 1]),
                Part::int(MessageType::LocalUpdate.code()),
                Part::int(2),
                Part::string("cq1"),
                Part::int(3),
                Part::bytes(vec![0u8; 18]),
            ],
        );
        let Reply::Entry(event) = decode_reply(MessageType::Invalid, &msg).unwrap() else {
            panic!("expected an entry notification");
        };
        assert_eq!(event.cq_message_type, Some(MessageType::LocalUpdate.code()));
        assert!(event.value.is_none());
        assert_eq!(event.cqs.len(), 1);
    }

    #[test]
    fn test_delta_update() {
        let msg = raw(
            MessageType::LocalUpdate,
            vec![
                Part::bytes(b"/r".to_vec()),
                Part::string("k"),
                Part::object(vec![53u8, 1]),
                Part::bytes(vec![9u8, 9]),
                Part::bytes(Bytes::new()),
                Part::bytes(Bytes::new()),
                Part::object(vec![53u8, 0]),
                Part::object(vec![53u8, 0]),
                Part::bytes(vec![0u8; 18]),
            ],
        );
        let Reply::Entry(event) = decode_reply(MessageType::Invalid, &msg).unwrap() else {
            panic!("expected an entry notification");
        };
        assert_eq!(event.delta.as_deref(), Some(&[9u8, 9][..]));
        assert!(!event.has_cqs());
    }

    #[test]
    fn test_region_destroy_and_marker() {
        let msg = raw(
            MessageType::LocalDestroyRegion,
            vec![
                Part::bytes(b"/r".to_vec()),
                Part::bytes(Bytes::new()),
                Part::object(vec![53u8, 1]),
                Part::int(2),
                Part::string("cq9"),
                Part::int(5),
                Part::bytes(vec![0u8; 18]),
            ],
        );
        let Reply::Region(event) = decode_reply(MessageType::Invalid, &msg).unwrap() else {
            panic!("expected a region notification");
        };
        assert_eq!(event.cqs, vec![("cq9".to_string(), 5)]);

        let msg = raw(MessageType::ClientMarker, vec![Part::bytes(vec![0u8; 18])]);
        assert!(matches!(
            decode_reply(MessageType::Invalid, &msg).unwrap(),
            Reply::Marker { .. }
        ));
    }

    #[test]
    fn test_unexpected_type_is_protocol_error() {
        let msg = raw(MessageType::Put, vec![]);
        assert!(matches!(
            decode_reply(MessageType::Put, &msg),
            Err(GeodeError::Protocol(_))
        ));
    }
}
