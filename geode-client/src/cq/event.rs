//! Events delivered to CQ listeners.

use bytes::Bytes;
use geode_core::CacheableValue;

use super::CqOperation;

/// One change seen by a continuous query.
#[derive(Debug, Clone, PartialEq)]
pub struct CqEvent {
    cq_name: String,
    base_operation: CqOperation,
    query_operation: CqOperation,
    key: CacheableValue,
    new_value: Option<CacheableValue>,
    delta: Option<Bytes>,
    event_id: Bytes,
}

impl CqEvent {
    pub(crate) fn new(
        cq_name: impl Into<String>,
        base_operation: CqOperation,
        query_operation: CqOperation,
        key: CacheableValue,
        new_value: Option<CacheableValue>,
        delta: Option<Bytes>,
        event_id: Bytes,
    ) -> Self {
        Self {
            cq_name: cq_name.into(),
            base_operation,
            query_operation,
            key,
            new_value,
            delta,
            event_id,
        }
    }

    /// Returns the name of the query the event belongs to.
    pub fn cq_name(&self) -> &str {
        &self.cq_name
    }

    /// Returns the operation applied to the entry in the region.
    pub fn base_operation(&self) -> CqOperation {
        self.base_operation
    }

    /// Returns the operation from the query's point of view. An update that
    /// makes an entry start matching is a create here.
    pub fn query_operation(&self) -> CqOperation {
        self.query_operation
    }

    /// Returns the entry key.
    pub fn key(&self) -> &CacheableValue {
        &self.key
    }

    /// Returns the new value, absent for destroys and delta updates.
    pub fn new_value(&self) -> Option<&CacheableValue> {
        self.new_value.as_ref()
    }

    /// Returns the delta bytes of a delta update.
    pub fn delta_value(&self) -> Option<&Bytes> {
        self.delta.as_ref()
    }

    /// Returns the serialized event id.
    pub fn event_id(&self) -> &Bytes {
        &self.event_id
    }

    /// Returns true if the server sent an operation the client cannot map.
    pub fn is_error(&self) -> bool {
        self.query_operation == CqOperation::Invalid
    }
}
