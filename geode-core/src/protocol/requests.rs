//! Request constructors, one per client operation.
//!
//! Each function returns a finished [`RequestMessage`] whose part layout is
//! what the server expects for that operation. Routing information (region,
//! key, callback argument) is recorded on the message for the single-hop
//! layer; it does not affect the encoded bytes.

use std::time::Duration;

use super::constants::*;
use super::event_id::EventId;
use super::message::{HeaderOptions, MessageWriter, RequestMessage};
use crate::error::{GeodeError, Result};
use crate::serialization::CacheableValue;

/// Payload of a single-key put.
#[derive(Debug, Clone, Copy)]
pub enum PutPayload<'a> {
    /// A full value.
    Value(&'a CacheableValue),
    /// Delta bytes produced by the application's delta encoder.
    Delta(&'a [u8]),
}

impl PutPayload<'_> {
    fn is_delta(&self) -> bool {
        matches!(self, PutPayload::Delta(_))
    }
}

/// Parameters shared by the function execution requests.
#[derive(Debug, Clone)]
pub struct FunctionCall<'a> {
    /// Registered function id.
    pub function_id: &'a str,
    /// Function arguments.
    pub arguments: Option<&'a CacheableValue>,
    /// Result-collection flags sent with the timeout.
    pub has_result: u8,
    /// Server-side execution timeout.
    pub timeout: Duration,
    /// Members that failed a previous attempt.
    pub failed_nodes: Option<&'a CacheableValue>,
}

fn writer(message_type: MessageType, num_parts: usize, options: HeaderOptions) -> MessageWriter {
    let mut w = MessageWriter::new(message_type, num_parts, options);
    if message_type.uses_reply_timeout() {
        w.set_reply_timeout(DEFAULT_REPLY_TIMEOUT);
    }
    w
}

/// Reply timeout recorded when the caller supplies none.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(15);

fn require_key(key: &CacheableValue) -> Result<()> {
    if key.is_null() {
        return Err(GeodeError::IllegalArgument("key must not be null".into()));
    }
    Ok(())
}

fn optional_object(w: &mut MessageWriter, value: Option<&CacheableValue>) -> Result<()> {
    w.write_object_part(value.unwrap_or(&CacheableValue::Null))
}

/// Keep-alive ping.
pub fn ping(options: HeaderOptions) -> Result<RequestMessage> {
    writer(MessageType::Ping, 0, options).finish()
}

/// Tells the server the connection is going away.
///
/// `keep_alive` asks a durable client's queue to survive the disconnect.
pub fn close_connection(keep_alive: bool, options: HeaderOptions) -> Result<RequestMessage> {
    let mut w = writer(MessageType::CloseConnection, 1, options);
    w.write_bool_part(keep_alive);
    w.finish()
}

/// Single-key get.
pub fn get(
    region: &str,
    key: &CacheableValue,
    callback_argument: Option<&CacheableValue>,
    options: HeaderOptions,
) -> Result<RequestMessage> {
    require_key(key)?;
    let mut w = writer(
        MessageType::Request,
        2 + callback_argument.is_some() as usize,
        options,
    );
    w.set_routing(region, Some(key), callback_argument);
    w.write_region_part(region);
    w.write_object_part(key)?;
    if let Some(cb) = callback_argument {
        w.write_object_part(cb)?;
    }
    w.finish()
}

/// Single-key put of a full value or a delta.
pub fn put(
    region: &str,
    key: &CacheableValue,
    payload: PutPayload<'_>,
    callback_argument: Option<&CacheableValue>,
    event_id: &EventId,
    options: HeaderOptions,
) -> Result<RequestMessage> {
    require_key(key)?;
    let mut w = writer(
        MessageType::Put,
        7 + callback_argument.is_some() as usize,
        options,
    );
    w.set_routing(region, Some(key), callback_argument);
    w.write_region_part(region);
    // operation
    w.write_object_part(&CacheableValue::Null)?;
    // flags
    w.write_int_part(0);
    w.write_object_part(key)?;
    w.write_object_part(&CacheableValue::Bool(payload.is_delta()))?;
    match payload {
        PutPayload::Value(value) => w.write_object_part(value)?,
        PutPayload::Delta(delta) => w.write_delta_part(delta),
    }
    w.write_event_id_part(event_id);
    if let Some(cb) = callback_argument {
        w.write_object_part(cb)?;
    }
    w.finish()
}

/// Single-key destroy; with `expected_old_value` the destroy is conditional.
pub fn destroy(
    region: &str,
    key: &CacheableValue,
    expected_old_value: Option<&CacheableValue>,
    callback_argument: Option<&CacheableValue>,
    event_id: &EventId,
    options: HeaderOptions,
) -> Result<RequestMessage> {
    require_key(key)?;
    let mut w = writer(
        MessageType::Destroy,
        5 + callback_argument.is_some() as usize,
        options,
    );
    w.set_routing(region, Some(key), callback_argument);
    w.write_region_part(region);
    w.write_object_part(key)?;
    match expected_old_value {
        Some(value) => {
            w.write_object_part(value)?;
            w.write_object_part(&CacheableValue::Byte(OP_TYPE_DESTROY))?;
        }
        None => {
            w.write_object_part(&CacheableValue::Null)?;
            w.write_object_part(&CacheableValue::Null)?;
        }
    }
    w.write_event_id_part(event_id);
    if let Some(cb) = callback_argument {
        w.write_object_part(cb)?;
    }
    w.finish()
}

/// Single-key invalidate.
pub fn invalidate(
    region: &str,
    key: &CacheableValue,
    callback_argument: Option<&CacheableValue>,
    event_id: &EventId,
    options: HeaderOptions,
) -> Result<RequestMessage> {
    require_key(key)?;
    let mut w = writer(
        MessageType::Invalidate,
        3 + callback_argument.is_some() as usize,
        options,
    );
    w.set_routing(region, Some(key), callback_argument);
    w.write_region_part(region);
    w.write_object_part(key)?;
    w.write_event_id_part(event_id);
    if let Some(cb) = callback_argument {
        w.write_object_part(cb)?;
    }
    w.finish()
}

/// Key presence check; with `value_for_key` the server also requires a
/// non-null value.
pub fn contains_key(
    region: &str,
    key: &CacheableValue,
    value_for_key: bool,
    callback_argument: Option<&CacheableValue>,
    options: HeaderOptions,
) -> Result<RequestMessage> {
    require_key(key)?;
    let mut w = writer(
        MessageType::ContainsKey,
        3 + callback_argument.is_some() as usize,
        options,
    );
    w.set_routing(region, Some(key), callback_argument);
    w.write_region_part(region);
    w.write_object_part(key)?;
    w.write_int_part(value_for_key as i32);
    if let Some(cb) = callback_argument {
        w.write_object_part(cb)?;
    }
    w.finish()
}

/// Server-side region size.
pub fn size(region: &str, options: HeaderOptions) -> Result<RequestMessage> {
    let mut w = writer(MessageType::Size, 1, options);
    w.set_routing(region, None, None);
    w.write_region_part(region);
    w.finish()
}

/// Destroys a whole region on the server.
pub fn destroy_region(
    region: &str,
    callback_argument: Option<&CacheableValue>,
    timeout: Option<Duration>,
    event_id: &EventId,
    options: HeaderOptions,
) -> Result<RequestMessage> {
    region_operation(
        MessageType::DestroyRegion,
        region,
        callback_argument,
        timeout,
        event_id,
        options,
    )
}

/// Clears a region on the server.
pub fn clear_region(
    region: &str,
    callback_argument: Option<&CacheableValue>,
    timeout: Option<Duration>,
    event_id: &EventId,
    options: HeaderOptions,
) -> Result<RequestMessage> {
    region_operation(
        MessageType::ClearRegion,
        region,
        callback_argument,
        timeout,
        event_id,
        options,
    )
}

fn region_operation(
    message_type: MessageType,
    region: &str,
    callback_argument: Option<&CacheableValue>,
    timeout: Option<Duration>,
    event_id: &EventId,
    options: HeaderOptions,
) -> Result<RequestMessage> {
    let parts = 2 + callback_argument.is_some() as usize + timeout.is_some() as usize;
    let mut w = writer(message_type, parts, options);
    w.set_routing(region, None, callback_argument);
    w.write_region_part(region);
    w.write_event_id_part(event_id);
    if let Some(cb) = callback_argument {
        w.write_object_part(cb)?;
    }
    if let Some(timeout) = timeout {
        w.write_milliseconds_part(timeout);
    }
    w.finish()
}

/// Query or continuous-query control message: the text (or CQ name), an
/// event id, and the optional server-side timeout.
fn text_with_event_id(
    message_type: MessageType,
    text: &str,
    timeout: Option<Duration>,
    event_id: &EventId,
    options: HeaderOptions,
) -> Result<RequestMessage> {
    let mut w = writer(message_type, 2 + timeout.is_some() as usize, options);
    w.write_region_part(text);
    w.write_event_id_part(event_id);
    if let Some(timeout) = timeout {
        w.set_reply_timeout(timeout);
        w.write_milliseconds_part(timeout);
    }
    w.finish()
}

/// One-shot query.
pub fn query(
    query_text: &str,
    timeout: Option<Duration>,
    event_id: &EventId,
    options: HeaderOptions,
) -> Result<RequestMessage> {
    text_with_event_id(MessageType::Query, query_text, timeout, event_id, options)
}

/// Query with bind parameters.
pub fn query_with_parameters(
    query_text: &str,
    parameters: &[CacheableValue],
    timeout: Duration,
    options: HeaderOptions,
) -> Result<RequestMessage> {
    let mut w = writer(
        MessageType::QueryWithParameters,
        4 + parameters.len(),
        options,
    );
    w.set_reply_timeout(timeout);
    w.write_region_part(query_text);
    w.write_int_part(parameters.len() as i32);
    w.write_int_part(COMPILE_QUERY_CLEAR_TIMEOUT);
    w.write_milliseconds_part(timeout);
    for parameter in parameters {
        w.write_object_part(parameter)?;
    }
    w.finish()
}

fn execute_cq_message(
    message_type: MessageType,
    name: &str,
    query_text: &str,
    state: i32,
    durable: bool,
    options: HeaderOptions,
) -> Result<RequestMessage> {
    let mut w = writer(message_type, 5, options);
    w.write_string_part(name);
    w.write_string_part(query_text);
    w.write_int_part(state);
    w.write_bool_part(durable);
    // region data policy, always 1
    w.write_byte_part(1);
    w.finish()
}

/// Registers and starts a continuous query. `state` is the state the CQ
/// will be in once the server accepts it.
pub fn execute_cq(
    name: &str,
    query_text: &str,
    state: i32,
    durable: bool,
    options: HeaderOptions,
) -> Result<RequestMessage> {
    execute_cq_message(MessageType::ExecuteCq, name, query_text, state, durable, options)
}

/// Registers a continuous query and streams its initial result set.
pub fn execute_cq_with_initial_results(
    name: &str,
    query_text: &str,
    state: i32,
    durable: bool,
    timeout: Duration,
    options: HeaderOptions,
) -> Result<RequestMessage> {
    let mut msg = execute_cq_message(
        MessageType::ExecuteCqWithIr,
        name,
        query_text,
        state,
        durable,
        options,
    )?;
    msg.set_reply_timeout(timeout);
    Ok(msg)
}

/// Stops a running continuous query.
pub fn stop_cq(
    name: &str,
    timeout: Option<Duration>,
    event_id: &EventId,
    options: HeaderOptions,
) -> Result<RequestMessage> {
    text_with_event_id(MessageType::StopCq, name, timeout, event_id, options)
}

/// Closes a continuous query on the server.
pub fn close_cq(
    name: &str,
    timeout: Option<Duration>,
    event_id: &EventId,
    options: HeaderOptions,
) -> Result<RequestMessage> {
    text_with_event_id(MessageType::CloseCq, name, timeout, event_id, options)
}

/// Lists the durable continuous queries registered for this client.
pub fn get_durable_cqs(options: HeaderOptions) -> Result<RequestMessage> {
    let mut w = writer(MessageType::GetDurableCqs, 1, options);
    // the server expects at least one part
    w.write_byte_part(0);
    w.finish()
}

/// Fetches bucket count, colocation and resolver names of a region.
pub fn get_client_partition_attributes(
    region: &str,
    options: HeaderOptions,
) -> Result<RequestMessage> {
    let mut w = writer(MessageType::GetClientPartitionAttributes, 1, options);
    w.set_routing(region, None, None);
    w.write_region_part(region);
    w.finish()
}

/// Fetches bucket locations of a region.
pub fn get_client_pr_metadata(region: &str, options: HeaderOptions) -> Result<RequestMessage> {
    let mut w = writer(MessageType::GetClientPrMetadata, 1, options);
    w.set_routing(region, None, None);
    w.write_region_part(region);
    w.finish()
}

/// Bulk put. `first_event_id` must come from a reservation covering every
/// entry (see [`super::EventIdSource::reserve`]).
#[allow(clippy::too_many_arguments)]
pub fn put_all(
    region: &str,
    entries: &[(CacheableValue, CacheableValue)],
    bulk_flags: i32,
    callback_argument: Option<&CacheableValue>,
    timeout: Option<Duration>,
    first_event_id: &EventId,
    options: HeaderOptions,
) -> Result<RequestMessage> {
    if entries.is_empty() {
        return Err(GeodeError::IllegalArgument("putAll with no entries".into()));
    }
    let message_type = if callback_argument.is_some() {
        MessageType::PutAllWithCallback
    } else {
        MessageType::PutAll
    };
    let parts = 5
        + callback_argument.is_some() as usize
        + entries.len() * 2
        + timeout.is_some() as usize;
    let mut w = writer(message_type, parts, options);
    w.set_routing(region, None, callback_argument);
    w.write_region_part(region);
    w.write_event_id_part(first_event_id);
    // skip callbacks
    w.write_int_part(0);
    w.write_int_part(bulk_flags);
    w.write_int_part(entries.len() as i32);
    if let Some(cb) = callback_argument {
        w.write_object_part(cb)?;
    }
    for (key, value) in entries {
        require_key(key)?;
        w.write_object_part(key)?;
        w.write_object_part(value)?;
    }
    if let Some(timeout) = timeout {
        w.set_reply_timeout(timeout);
        w.write_milliseconds_part(timeout);
    }
    w.finish()
}

/// Bulk destroy.
pub fn remove_all(
    region: &str,
    keys: &[CacheableValue],
    bulk_flags: i32,
    callback_argument: Option<&CacheableValue>,
    first_event_id: &EventId,
    options: HeaderOptions,
) -> Result<RequestMessage> {
    if keys.is_empty() {
        return Err(GeodeError::IllegalArgument("removeAll with no keys".into()));
    }
    let mut w = writer(MessageType::RemoveAll, 5 + keys.len(), options);
    w.set_routing(region, None, callback_argument);
    w.write_region_part(region);
    w.write_event_id_part(first_event_id);
    w.write_int_part(bulk_flags);
    optional_object(&mut w, callback_argument)?;
    w.write_int_part(keys.len() as i32);
    for key in keys {
        require_key(key)?;
        w.write_object_part(key)?;
    }
    w.finish()
}

/// Bulk get.
pub fn get_all(
    region: &str,
    keys: &[CacheableValue],
    callback_argument: Option<&CacheableValue>,
    options: HeaderOptions,
) -> Result<RequestMessage> {
    let message_type = if callback_argument.is_some() {
        MessageType::GetAllWithCallback
    } else {
        MessageType::GetAll70
    };
    let mut w = writer(message_type, 3, options);
    w.set_routing(region, None, callback_argument);
    w.write_region_part(region);
    w.write_key_list_part(keys)?;
    match callback_argument {
        Some(cb) => w.write_object_part(cb)?,
        None => w.write_int_part(0),
    }
    w.finish()
}

/// Executes a function on a server (member execution).
pub fn execute_function(call: &FunctionCall<'_>, options: HeaderOptions) -> Result<RequestMessage> {
    let mut w = writer(MessageType::ExecuteFunction, 3, options);
    w.set_reply_timeout(call.timeout);
    w.write_byte_and_timeout_part(call.has_result as i8, call.timeout);
    w.write_region_part(call.function_id);
    optional_object(&mut w, call.arguments)?;
    w.finish()
}

fn write_failed_nodes(w: &mut MessageWriter, failed_nodes: Option<&CacheableValue>) -> Result<()> {
    match failed_nodes {
        Some(nodes) => {
            let count = nodes.as_list().map_or(0, |l| l.len());
            w.write_int_part(count as i32);
            w.write_object_part(nodes)
        }
        None => {
            w.write_int_part(0);
            Ok(())
        }
    }
}

/// Executes a function on the data of a region, optionally filtered by
/// routing keys. `re_execute` marks a retry after a member failed.
pub fn execute_region_function(
    region: &str,
    call: &FunctionCall<'_>,
    routing_keys: &[CacheableValue],
    re_execute: bool,
    options: HeaderOptions,
) -> Result<RequestMessage> {
    let parts = 8 + routing_keys.len() + call.failed_nodes.is_some() as usize;
    let mut w = writer(MessageType::ExecuteRegionFunction, parts, options);
    w.set_reply_timeout(call.timeout);
    let single_key = if routing_keys.len() == 1 {
        routing_keys.first()
    } else {
        None
    };
    w.set_routing(region, single_key, None);
    w.write_byte_and_timeout_part(call.has_result as i8, call.timeout);
    w.write_region_part(region);
    w.write_region_part(call.function_id);
    optional_object(&mut w, call.arguments)?;
    // member mapped arguments
    w.write_object_part(&CacheableValue::Null)?;
    w.write_bool_part(re_execute);
    w.write_int_part(routing_keys.len() as i32);
    for key in routing_keys {
        w.write_object_part(key)?;
    }
    write_failed_nodes(&mut w, call.failed_nodes)?;
    w.finish()
}

/// Filter of a single-hop region function execution.
#[derive(Debug, Clone, Copy)]
pub enum FunctionFilter<'a> {
    /// Routing keys owned by the target server.
    Keys(&'a [CacheableValue]),
    /// Bucket ids owned by the target server.
    Buckets(&'a [i32]),
}

/// Executes a region function on one server, restricted to the keys or
/// buckets that server owns.
pub fn execute_region_function_single_hop(
    region: &str,
    call: &FunctionCall<'_>,
    filter: FunctionFilter<'_>,
    options: HeaderOptions,
) -> Result<RequestMessage> {
    let filter_len = match filter {
        FunctionFilter::Keys(keys) => keys.len(),
        FunctionFilter::Buckets(buckets) => buckets.len(),
    };
    let parts = 8 + filter_len + call.failed_nodes.is_some() as usize;
    let mut w = writer(MessageType::ExecuteRegionFunctionSingleHop, parts, options);
    w.set_reply_timeout(call.timeout);
    w.set_routing(region, None, None);
    w.write_byte_and_timeout_part(call.has_result as i8, call.timeout);
    w.write_region_part(region);
    w.write_region_part(call.function_id);
    optional_object(&mut w, call.arguments)?;
    w.write_object_part(&CacheableValue::Null)?;
    w.write_bool_part(matches!(filter, FunctionFilter::Buckets(_)));
    w.write_int_part(filter_len as i32);
    match filter {
        FunctionFilter::Keys(keys) => {
            for key in keys {
                w.write_object_part(key)?;
            }
        }
        FunctionFilter::Buckets(buckets) => {
            for bucket in buckets {
                w.write_int_part(*bucket);
            }
        }
    }
    write_failed_nodes(&mut w, call.failed_nodes)?;
    w.finish()
}
