//! Chunked replies.
//!
//! Replies whose size is not known up front arrive as a run of chunks. The
//! first chunk carries a 17-byte header (message type, part count,
//! transaction id, chunk length, flags); every later chunk carries only the
//! chunk length and flags. Bit `0x01` of the flags marks the last chunk and
//! bit `0x02` announces a trailing security part.
//!
//! A [`ChunkedReply`] drives a [`ChunkHandler`] over the chunks of one reply,
//! routing each chunk by its message type and capturing the first failure so
//! the remaining chunks can still be drained from the socket.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::constants::*;
use super::message::PartReader;
use super::part::Part;
use super::reply::ServerException;
use crate::error::{GeodeError, Result};
use crate::serialization::{
    CacheableValue, DataInput, Deserializable, DsCode, ObjectDataInput,
};

/// Fixed id of the collection type descriptor heading a query result chunk.
pub const COLLECTION_TYPE_IMPL: u8 = 59;

/// Fixed id of an object part list.
pub const OBJECT_PART_LIST: u8 = 25;

/// Element class name announcing a struct set.
pub const STRUCT_CLASS: &str = "org.apache.geode.cache.query.Struct";

/// Result substituted when a function exception carries no message part.
pub const FUNCTION_EXCEPTION_RESULT: &str = "Function exception result.";

/// Fixed id of a versioned object part list, the entry list of bulk replies.
pub const VERSIONED_OBJECT_PART_LIST: u8 = 7;

/// Class name the server reports for an authorization failure of one key.
pub const NOT_AUTHORIZED_EXCEPTION: &str = "org.apache.geode.security.NotAuthorizedException";

const OBJECT_PART_LIST_EXCEPTION: i8 = 2;

const BULK_ENTRY_EXCEPTION: u8 = 2;
const BULK_ENTRY_KEY_NOT_AT_SERVER: u8 = 3;

const VERSIONED_HAS_KEYS: u8 = 0x01;
const VERSIONED_HAS_OBJECTS: u8 = 0x02;
const VERSIONED_SERIALIZE_VALUES: u8 = 0x10;

/// Header preceding every chunk after the first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    /// Length of the chunk body.
    pub length: i32,
    /// Last-chunk and security flags.
    pub flags: u8,
}

impl ChunkHeader {
    /// Reads a header from the first [`CHUNK_HEADER_SIZE`] bytes of `src`.
    pub fn parse(src: &[u8]) -> Result<Self> {
        if src.len() < CHUNK_HEADER_SIZE {
            return Err(GeodeError::Protocol(format!(
                "truncated chunk header: {} bytes",
                src.len()
            )));
        }
        let mut buf = &src[..CHUNK_HEADER_SIZE];
        let length = buf.get_i32();
        let flags = buf.get_u8();
        if length < 0 {
            return Err(GeodeError::Protocol(format!(
                "negative chunk length {}",
                length
            )));
        }
        Ok(Self { length, flags })
    }

    /// Writes this header.
    pub fn write_to(&self, dst: &mut BytesMut) {
        dst.put_i32(self.length);
        dst.put_u8(self.flags);
    }

    /// Returns true if this is the last chunk of the reply.
    pub fn is_last(&self) -> bool {
        self.flags & CHUNK_LAST != 0
    }

    /// Returns true if a security part trails the chunk body.
    pub fn has_secure_part(&self) -> bool {
        self.flags & CHUNK_SECURE_PART != 0
    }
}

/// Header of the first chunk of a chunked reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkedResponseHeader {
    /// Raw message type tag of the reply.
    pub message_type: i32,
    /// Number of parts per chunk.
    pub num_parts: i32,
    /// Transaction id.
    pub transaction_id: i32,
    /// Length and flags of the first chunk.
    pub chunk: ChunkHeader,
}

impl ChunkedResponseHeader {
    /// Reads a header from the first [`CHUNKED_RESPONSE_HEADER_SIZE`] bytes of `src`.
    pub fn parse(src: &[u8]) -> Result<Self> {
        if src.len() < CHUNKED_RESPONSE_HEADER_SIZE {
            return Err(GeodeError::Protocol(format!(
                "truncated chunked response header: {} bytes",
                src.len()
            )));
        }
        let mut buf = &src[..12];
        let message_type = buf.get_i32();
        let num_parts = buf.get_i32();
        let transaction_id = buf.get_i32();
        let chunk = ChunkHeader::parse(&src[12..CHUNKED_RESPONSE_HEADER_SIZE])?;
        Ok(Self {
            message_type,
            num_parts,
            transaction_id,
            chunk,
        })
    }

    /// Writes this header.
    pub fn write_to(&self, dst: &mut BytesMut) {
        dst.put_i32(self.message_type);
        dst.put_i32(self.num_parts);
        dst.put_i32(self.transaction_id);
        self.chunk.write_to(dst);
    }
}

/// One chunk of a chunked reply.
///
/// Chunks after the first inherit the message type, part count and
/// transaction id announced by the first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    message_type: i32,
    num_parts: i32,
    transaction_id: i32,
    flags: u8,
    body: Bytes,
}

impl Chunk {
    /// Creates a chunk.
    pub fn new(
        message_type: i32,
        num_parts: i32,
        transaction_id: i32,
        flags: u8,
        body: impl Into<Bytes>,
    ) -> Self {
        Self {
            message_type,
            num_parts,
            transaction_id,
            flags,
            body: body.into(),
        }
    }

    /// Builds a chunk body from parts and wraps it.
    pub fn from_parts(message_type: MessageType, flags: u8, parts: &[Part]) -> Self {
        let mut body = BytesMut::new();
        for part in parts {
            part.write_to(&mut body);
        }
        Self::new(
            message_type.code(),
            parts.len() as i32,
            NO_TRANSACTION,
            flags,
            body.freeze(),
        )
    }

    /// Returns the raw message type.
    pub fn message_type(&self) -> i32 {
        self.message_type
    }

    /// Returns the decoded message type.
    pub fn kind(&self) -> Result<MessageType> {
        MessageType::try_from(self.message_type)
    }

    /// Returns the part count announced by the first chunk.
    pub fn num_parts(&self) -> i32 {
        self.num_parts
    }

    /// Returns the transaction id.
    pub fn transaction_id(&self) -> i32 {
        self.transaction_id
    }

    /// Returns the flag byte.
    pub fn flags(&self) -> u8 {
        self.flags
    }

    /// Returns the chunk body.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Returns true if this is the last chunk of the reply.
    pub fn is_last(&self) -> bool {
        self.flags & CHUNK_LAST != 0
    }

    /// Returns true if a security part trails the chunk body.
    pub fn has_secure_part(&self) -> bool {
        self.flags & CHUNK_SECURE_PART != 0
    }

    /// Splits the body into parts, leaving out the trailing security part.
    pub fn parts(&self) -> Result<Vec<Part>> {
        let mut parts = self.all_parts()?;
        if self.has_secure_part() {
            parts.pop();
        }
        Ok(parts)
    }

    /// Returns the trailing security part, if the flags announce one.
    pub fn secure_part(&self) -> Result<Option<Part>> {
        if !self.has_secure_part() {
            return Ok(None);
        }
        Ok(self.all_parts()?.pop())
    }

    fn all_parts(&self) -> Result<Vec<Part>> {
        let mut body = self.body.clone();
        let mut parts = Vec::with_capacity(self.num_parts.max(0) as usize + 1);
        while body.has_remaining() {
            parts.push(Part::read_from(&mut body)?);
        }
        Ok(parts)
    }
}

/// What a [`ChunkedReply`] does with one chunk.
#[derive(Debug)]
pub enum ChunkDisposition {
    /// Hand the chunk to the result collector.
    Collect,
    /// The chunk carries nothing for the collector.
    Skip,
    /// The chunk reports a failure.
    Failed(GeodeError),
}

/// Routes one chunk of the reply to `request` by the chunk's message type.
pub fn dispatch(request: MessageType, chunk: &Chunk) -> ChunkDisposition {
    let kind = match chunk.kind() {
        Ok(kind) => kind,
        Err(e) => return ChunkDisposition::Failed(e),
    };
    match kind {
        MessageType::Response if request.is_cq_control() => ChunkDisposition::Skip,
        MessageType::Response
        | MessageType::ExecuteFunctionResult
        | MessageType::ExecuteRegionFunctionResult
        | MessageType::ResponseFromPrimary => ChunkDisposition::Collect,
        MessageType::Reply | MessageType::ResponseFromSecondary => ChunkDisposition::Skip,
        MessageType::CqExceptionType | MessageType::CqDataError => {
            ChunkDisposition::Failed(GeodeError::CqQuery(first_string(chunk)))
        }
        MessageType::Exception => ChunkDisposition::Failed(exception_error(chunk)),
        other if other.is_data_error() => {
            let text = first_string(chunk);
            if text.is_empty() {
                ChunkDisposition::Failed(GeodeError::Server {
                    class_name: None,
                    message: format!("{} in reply to {}", other, request),
                })
            } else {
                ChunkDisposition::Failed(GeodeError::from_server_exception(text.trim_start()))
            }
        }
        other => ChunkDisposition::Failed(GeodeError::Protocol(format!(
            "unexpected chunk of type {} in reply to {}",
            other, request
        ))),
    }
}

fn first_string(chunk: &Chunk) -> String {
    chunk
        .parts()
        .ok()
        .and_then(|parts| parts.first().map(Part::as_string))
        .and_then(Result::ok)
        .unwrap_or_default()
}

fn exception_error(chunk: &Chunk) -> GeodeError {
    match chunk.parts() {
        Ok(parts) => match ServerException::from_parts(&mut PartReader::new(&parts)) {
            Ok(exception) => exception.to_error(),
            Err(e) => e,
        },
        Err(e) => e,
    }
}

/// Consumes the chunks of one reply.
pub trait ChunkHandler: Send {
    /// Discards everything gathered so far, ahead of a retried attempt.
    fn reset(&mut self);

    /// Processes one chunk routed to the collector.
    fn handle_chunk(&mut self, chunk: &Chunk) -> Result<()>;
}

/// Drives a [`ChunkHandler`] over the chunks of one reply.
///
/// The first failure, whether reported by the server or raised by the
/// handler, is kept and every later chunk is skipped. The failure surfaces
/// from [`ChunkedReply::finish`] once the whole reply has been drained.
#[derive(Debug)]
pub struct ChunkedReply<H> {
    request: MessageType,
    handler: H,
    error: Option<GeodeError>,
    chunks: usize,
}

impl<H: ChunkHandler> ChunkedReply<H> {
    /// Creates a driver for the reply to `request`.
    pub fn new(request: MessageType, handler: H) -> Self {
        Self {
            request,
            handler,
            error: None,
            chunks: 0,
        }
    }

    /// Returns the request type this reply answers.
    pub fn request(&self) -> MessageType {
        self.request
    }

    /// Resets the handler and forgets any captured failure.
    pub fn reset(&mut self) {
        self.handler.reset();
        self.error = None;
        self.chunks = 0;
    }

    /// Processes one chunk.
    pub fn process(&mut self, chunk: &Chunk) {
        self.chunks += 1;
        if self.error.is_some() {
            return;
        }
        match dispatch(self.request, chunk) {
            ChunkDisposition::Collect => {
                if let Err(e) = self.handler.handle_chunk(chunk) {
                    tracing::debug!(request = %self.request, error = %e, "chunk handler failed");
                    self.error = Some(e);
                }
            }
            ChunkDisposition::Skip => {}
            ChunkDisposition::Failed(e) => {
                tracing::debug!(request = %self.request, error = %e, "chunk reported failure");
                self.error = Some(e);
            }
        }
    }

    /// Returns the number of chunks seen since creation or the last reset.
    pub fn chunks(&self) -> usize {
        self.chunks
    }

    /// Returns the captured failure, if any.
    pub fn error(&self) -> Option<&GeodeError> {
        self.error.as_ref()
    }

    /// Returns the handler without consuming the reply.
    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Ends the reply, returning the handler or the first failure.
    pub fn finish(self) -> Result<H> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.handler),
        }
    }
}

/// Shape of the first part of a result chunk.
enum ChunkObject {
    Object,
    Null,
}

/// Classifies the first part of a result chunk.
///
/// An empty part or a null object marks a scalar or empty result. A part
/// starting with a Java-serialized object is an exception, read together
/// with the message part that follows it.
fn chunk_part_header(parts: &[Part], what: &str) -> Result<ChunkObject> {
    let first = parts
        .first()
        .ok_or_else(|| GeodeError::Protocol(format!("{} chunk has no parts", what)))?;
    if first.is_empty() {
        return Ok(ChunkObject::Null);
    }
    if !first.is_object() {
        return Err(GeodeError::Protocol(format!("{} part is not an object", what)));
    }
    if first.is_java_serialized() {
        let exception = ServerException::from_parts(&mut PartReader::new(parts))?;
        return Err(exception.to_error());
    }
    if first.payload()[0] == DsCode::NullObj as u8 {
        return Ok(ChunkObject::Null);
    }
    Ok(ChunkObject::Object)
}

fn skip_class<R: DataInput>(input: &mut R) -> Result<()> {
    let code = input.read_unsigned_byte()?;
    if code != DsCode::Class as u8 {
        return Err(GeodeError::Protocol(format!(
            "expected a class descriptor, got type code {}",
            code
        )));
    }
    // string type byte
    input.skip(1)?;
    let len = input.read_unsigned_short()? as usize;
    input.skip(len)
}

fn expect_byte<R: DataInput>(input: &mut R, expected: u8, what: &str) -> Result<()> {
    let got = input.read_unsigned_byte()?;
    if got != expected {
        return Err(GeodeError::Protocol(format!(
            "{}: expected type {}, got {}",
            what, expected, got
        )));
    }
    Ok(())
}

/// Results of a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryResults {
    /// One value per matching object.
    ResultSet(Vec<CacheableValue>),
    /// Projected rows; each row holds one value per field.
    StructSet {
        /// Names of the projected fields.
        field_names: Vec<String>,
        /// Rows, each as long as `field_names`.
        rows: Vec<Vec<CacheableValue>>,
    },
}

impl QueryResults {
    /// Returns the number of results.
    pub fn len(&self) -> usize {
        match self {
            QueryResults::ResultSet(values) => values.len(),
            QueryResults::StructSet { rows, .. } => rows.len(),
        }
    }

    /// Returns true if the query matched nothing.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the struct field names, empty for a result set.
    pub fn field_names(&self) -> &[String] {
        match self {
            QueryResults::ResultSet(_) => &[],
            QueryResults::StructSet { field_names, .. } => field_names,
        }
    }
}

/// Collects the chunks of a query reply.
///
/// The first part of every chunk describes the collection type, naming the
/// struct fields when the query projects several values; the second part
/// holds the values, either as an object array or an object part list.
#[derive(Debug, Default)]
pub struct QueryResultCollector {
    values: Vec<CacheableValue>,
    field_names: Vec<String>,
}

impl QueryResultCollector {
    /// Creates an empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of values gathered so far.
    pub fn value_count(&self) -> usize {
        self.values.len()
    }

    /// Assembles the results.
    ///
    /// Struct values are gathered flat, so their count must be a multiple
    /// of the field count.
    pub fn into_results(self) -> Result<QueryResults> {
        if self.field_names.is_empty() {
            return Ok(QueryResults::ResultSet(self.values));
        }
        let width = self.field_names.len();
        if self.values.len() % width != 0 {
            return Err(GeodeError::Protocol(format!(
                "struct set holds {} values for {} fields",
                self.values.len(),
                width
            )));
        }
        let mut rows = Vec::with_capacity(self.values.len() / width);
        let mut values = self.values.into_iter();
        loop {
            let row: Vec<CacheableValue> = values.by_ref().take(width).collect();
            if row.is_empty() {
                break;
            }
            rows.push(row);
        }
        Ok(QueryResults::StructSet {
            field_names: self.field_names,
            rows,
        })
    }

    fn read_collection_type(&mut self, part: &Part) -> Result<()> {
        let mut input = ObjectDataInput::new(part.payload());
        expect_byte(&mut input, DsCode::FixedIdByte as u8, "query collection type")?;
        expect_byte(&mut input, COLLECTION_TYPE_IMPL, "query collection type")?;
        skip_class(&mut input)?;
        // fixed id byte, data serializable, class
        input.skip(3)?;
        let element_class = input.read_string()?;
        if element_class == STRUCT_CLASS {
            let count = input.read_array_len()?;
            let keep = self.field_names.is_empty();
            for _ in 0..count.max(0) {
                let name = input.read_string()?;
                if keep {
                    self.field_names.push(name);
                }
            }
        }
        Ok(())
    }

    fn read_values(&mut self, part: &Part) -> Result<()> {
        if !part.is_object() {
            return Err(GeodeError::Protocol(
                "query result part is not an object".to_string(),
            ));
        }
        let is_result_set = self.field_names.is_empty();
        let mut input = ObjectDataInput::new(part.payload());
        let code = input.read_unsigned_byte()?;
        if code == DsCode::ObjectArray as u8 {
            let count = input.read_array_len()?;
            skip_class(&mut input)?;
            for _ in 0..count.max(0) {
                if is_result_set {
                    self.values.push(CacheableValue::deserialize(&mut input)?);
                } else {
                    // object array type code of the row
                    input.skip(1)?;
                    let width = input.read_array_len()?;
                    skip_class(&mut input)?;
                    for _ in 0..width.max(0) {
                        self.values.push(CacheableValue::deserialize(&mut input)?);
                    }
                }
            }
            Ok(())
        } else if code == DsCode::FixedIdByte as u8 {
            expect_byte(&mut input, OBJECT_PART_LIST, "query object part list")?;
            self.read_object_part_list(&mut input, is_result_set)
        } else {
            Err(GeodeError::Protocol(format!(
                "unhandled query result format {}",
                code
            )))
        }
    }

    fn read_object_part_list<R: DataInput>(
        &mut self,
        input: &mut R,
        is_result_set: bool,
    ) -> Result<()> {
        if input.read_bool()? {
            return Err(GeodeError::IllegalState(
                "query response has keys".to_string(),
            ));
        }
        let len = input.read_int()?;
        for _ in 0..len.max(0) {
            if input.read_byte()? == OBJECT_PART_LIST_EXCEPTION {
                let skip = input.read_array_len()?;
                input.skip(skip.max(0) as usize)?;
                let message = input.read_string()?;
                return Err(GeodeError::from_server_exception(&message));
            }
            if is_result_set {
                self.values.push(CacheableValue::deserialize(input)?);
            } else {
                expect_byte(input, DsCode::FixedIdByte as u8, "struct set part list")?;
                expect_byte(input, OBJECT_PART_LIST, "struct set part list")?;
                self.read_object_part_list(input, true)?;
            }
        }
        Ok(())
    }
}

impl ChunkHandler for QueryResultCollector {
    fn reset(&mut self) {
        self.values.clear();
        self.field_names.clear();
    }

    fn handle_chunk(&mut self, chunk: &Chunk) -> Result<()> {
        let parts = chunk.parts()?;
        let mut reader = PartReader::new(&parts);
        match chunk_part_header(&parts, "query")? {
            ChunkObject::Null => {
                reader.next("collection type")?;
                if let Some(scalar) = reader.next_optional() {
                    self.values.push(scalar.as_object()?);
                }
                Ok(())
            }
            ChunkObject::Object => {
                self.read_collection_type(reader.next("collection type")?)?;
                self.read_values(reader.next("query results")?)
            }
        }
    }
}

/// Collects the names of durable continuous queries.
#[derive(Debug, Default)]
pub struct DurableCqListCollector {
    names: Vec<String>,
}

impl DurableCqListCollector {
    /// Creates an empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the names gathered so far.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Returns the gathered names.
    pub fn into_names(self) -> Vec<String> {
        self.names
    }
}

impl ChunkHandler for DurableCqListCollector {
    fn reset(&mut self) {
        self.names.clear();
    }

    fn handle_chunk(&mut self, chunk: &Chunk) -> Result<()> {
        let parts = chunk.parts()?;
        let part = PartReader::new(&parts).next("durable cq list")?;
        if !part.is_object() {
            return Err(GeodeError::Protocol(
                "durable cq list part is not an object".to_string(),
            ));
        }
        let mut input = ObjectDataInput::new(part.payload());
        // array list type code
        input.skip(1)?;
        let count = input.read_unsigned_byte()?;
        for _ in 0..count {
            match CacheableValue::deserialize(&mut input)? {
                CacheableValue::String(name) => self.names.push(name),
                other => {
                    return Err(GeodeError::Protocol(format!(
                        "durable cq name is not a string: {}",
                        other
                    )))
                }
            }
        }
        Ok(())
    }
}

/// One result sent by a function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FunctionResult {
    /// A value sent with `sendResult` or `lastResult`.
    Value(CacheableValue),
    /// An exception sent with `sendException`, by message.
    Exception(String),
}

/// Collects the results of a function execution.
#[derive(Debug)]
pub struct FunctionResultCollector {
    has_result: bool,
    results: Vec<FunctionResult>,
}

impl FunctionResultCollector {
    /// Creates a collector; with `has_result` false every value chunk is
    /// dropped and only failures are reported.
    pub fn new(has_result: bool) -> Self {
        Self {
            has_result,
            results: Vec::new(),
        }
    }

    /// Returns the results gathered so far.
    pub fn results(&self) -> &[FunctionResult] {
        &self.results
    }

    /// Returns the gathered results.
    pub fn into_results(self) -> Vec<FunctionResult> {
        self.results
    }
}

impl ChunkHandler for FunctionResultCollector {
    fn reset(&mut self) {
        self.results.clear();
    }

    fn handle_chunk(&mut self, chunk: &Chunk) -> Result<()> {
        let parts = chunk.parts()?;
        let object = chunk_part_header(&parts, "function result")?;
        if !self.has_result {
            return Ok(());
        }
        if let ChunkObject::Null = object {
            return Ok(());
        }
        let mut reader = PartReader::new(&parts);
        let first = reader.next("function result")?;
        let mut input = ObjectDataInput::new(first.payload());
        // array list type code, then its length
        input.skip(1)?;
        input.read_array_len()?;
        if input.remaining_slice().first() == Some(&(DsCode::JavaSerializable as u8)) {
            let message = match reader.next_optional() {
                Some(part) => {
                    let mut input = ObjectDataInput::new(part.payload());
                    input.skip(1)?;
                    input.read_array_len()?;
                    match CacheableValue::deserialize(&mut input)? {
                        CacheableValue::String(s) => s,
                        other => other.to_string(),
                    }
                }
                None => FUNCTION_EXCEPTION_RESULT.to_string(),
            };
            self.results.push(FunctionResult::Exception(message));
            return Ok(());
        }
        // the value is followed by the sending member's id, which is ignored
        let rest = input.remaining_slice();
        let value = match CacheableValue::deserialize(&mut input) {
            Ok(value) => value,
            Err(_) => CacheableValue::Serialized(rest.to_vec()),
        };
        self.results.push(FunctionResult::Value(value));
        Ok(())
    }
}

/// Outcome for one key of a bulk get.
#[derive(Debug)]
pub enum BulkEntry {
    /// The server returned a value, possibly null.
    Value(CacheableValue),
    /// The key does not exist on the server.
    NotFound,
    /// The server failed to read this key.
    Failed(GeodeError),
}

/// Entries of one versioned object part list.
struct VersionedPartList {
    keys: Option<Vec<CacheableValue>>,
    entries: Vec<BulkEntry>,
}

fn read_versioned_part_list<R: DataInput>(input: &mut R) -> Result<VersionedPartList> {
    expect_byte(input, DsCode::FixedIdByte as u8, "versioned object part list")?;
    expect_byte(input, VERSIONED_OBJECT_PART_LIST, "versioned object part list")?;
    let flags = input.read_unsigned_byte()?;
    let serialize_values = flags & VERSIONED_SERIALIZE_VALUES != 0;

    let keys = if flags & VERSIONED_HAS_KEYS != 0 {
        let count = input.read_unsigned_vl()?;
        let mut keys = Vec::with_capacity(count.min(1024) as usize);
        for _ in 0..count {
            keys.push(CacheableValue::deserialize(input)?);
        }
        Some(keys)
    } else {
        None
    };

    let mut entries = Vec::new();
    if flags & VERSIONED_HAS_OBJECTS != 0 {
        let count = input.read_unsigned_vl()?;
        for _ in 0..count {
            entries.push(read_bulk_entry(input, serialize_values)?);
        }
    }
    // version tags follow; the part length bounds them
    Ok(VersionedPartList { keys, entries })
}

fn read_bulk_entry<R: DataInput>(input: &mut R, serialize_values: bool) -> Result<BulkEntry> {
    let entry_type = input.read_unsigned_byte()?;
    if entry_type == BULK_ENTRY_EXCEPTION {
        let skip = input.read_array_len()?;
        input.skip(skip.max(0) as usize)?;
        let message = input.read_string()?;
        let error = if message == NOT_AUTHORIZED_EXCEPTION {
            GeodeError::NotAuthorized(format!("Authorization exception at server: {}", message))
        } else {
            GeodeError::Server {
                class_name: None,
                message: format!("Exception at remote server: {}", message),
            }
        };
        return Ok(BulkEntry::Failed(error));
    }
    let value = if serialize_values {
        match input.read_byte_array()? {
            Some(bytes) => CacheableValue::from_object_payload(&bytes)?,
            None => CacheableValue::Null,
        }
    } else {
        CacheableValue::deserialize(input)?
    };
    if entry_type == BULK_ENTRY_KEY_NOT_AT_SERVER {
        return Ok(BulkEntry::NotFound);
    }
    Ok(BulkEntry::Value(value))
}

/// Collects the reply to a bulk get.
///
/// Servers usually omit the keys from the entry lists; entries are then
/// matched to the requested keys in order, continuing across chunks.
#[derive(Debug)]
pub struct GetAllCollector {
    keys: Vec<CacheableValue>,
    offset: usize,
    entries: Vec<(CacheableValue, BulkEntry)>,
}

impl GetAllCollector {
    /// Creates a collector for a request naming `keys`.
    pub fn new(keys: Vec<CacheableValue>) -> Self {
        Self {
            keys,
            offset: 0,
            entries: Vec::new(),
        }
    }

    /// Returns the entries gathered so far.
    pub fn entries(&self) -> &[(CacheableValue, BulkEntry)] {
        &self.entries
    }

    /// Returns the gathered entries.
    pub fn into_entries(self) -> Vec<(CacheableValue, BulkEntry)> {
        self.entries
    }
}

impl ChunkHandler for GetAllCollector {
    fn reset(&mut self) {
        self.offset = 0;
        self.entries.clear();
    }

    fn handle_chunk(&mut self, chunk: &Chunk) -> Result<()> {
        let parts = chunk.parts()?;
        if let ChunkObject::Null = chunk_part_header(&parts, "getAll")? {
            return Ok(());
        }
        let mut input = ObjectDataInput::new(parts[0].payload());
        let list = read_versioned_part_list(&mut input)?;
        let count = list.entries.len();
        let keys = match list.keys {
            Some(keys) if keys.len() == count => keys,
            Some(keys) => {
                return Err(GeodeError::Protocol(format!(
                    "getAll chunk has {} keys for {} values",
                    keys.len(),
                    count
                )))
            }
            None => {
                let end = self.offset + count;
                let keys = self.keys.get(self.offset..end).ok_or_else(|| {
                    GeodeError::Protocol(format!(
                        "getAll reply has more than the {} requested entries",
                        self.keys.len()
                    ))
                })?;
                self.offset = end;
                keys.to_vec()
            }
        };
        self.entries.extend(keys.into_iter().zip(list.entries));
        Ok(())
    }
}

/// Collects the reply to a bulk put or bulk destroy.
///
/// Besides the version list of the applied entries, a server may answer with
/// a two-byte part whose first byte reports that the request needed an extra
/// hop and whose second byte is the server group flag to refresh metadata
/// with.
#[derive(Debug, Default)]
pub struct BulkOpCollector {
    applied: Vec<CacheableValue>,
    metadata_refresh: Option<i8>,
}

impl BulkOpCollector {
    /// Creates an empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the keys the server reported as applied.
    pub fn applied(&self) -> &[CacheableValue] {
        &self.applied
    }

    /// Returns the server group flag when the region metadata is stale.
    pub fn metadata_refresh(&self) -> Option<i8> {
        self.metadata_refresh
    }
}

impl ChunkHandler for BulkOpCollector {
    fn reset(&mut self) {
        self.applied.clear();
        self.metadata_refresh = None;
    }

    fn handle_chunk(&mut self, chunk: &Chunk) -> Result<()> {
        let parts = chunk.parts()?;
        if let Some(first) = parts.first() {
            if !first.is_object() && first.payload().len() == 2 {
                let flags = first.payload();
                if flags[0] != 0 {
                    self.metadata_refresh = Some(flags[1] as i8);
                }
                return Ok(());
            }
        }
        if let ChunkObject::Null = chunk_part_header(&parts, "bulk operation")? {
            return Ok(());
        }
        let mut input = ObjectDataInput::new(parts[0].payload());
        let list = read_versioned_part_list(&mut input)?;
        self.applied.extend(list.keys.unwrap_or_default());
        Ok(())
    }
}

/// Handler for replies that carry no results, such as continuous query
/// control requests.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoResultHandler;

impl ChunkHandler for NoResultHandler {
    fn reset(&mut self) {}

    fn handle_chunk(&mut self, _chunk: &Chunk) -> Result<()> {
        Ok(())
    }
}
