//! Client event identifiers.
//!
//! Every mutating request carries the id of the "thread" that issued it and a
//! per-thread sequence number, which lets servers drop replayed events after a
//! failover. Bulk requests reserve one sequence number per entry.

use std::sync::atomic::{AtomicI64, Ordering};

use bytes::{BufMut, BytesMut};

use super::constants::PART_BYTES;

static THREAD_ID_COUNTER: AtomicI64 = AtomicI64::new(1);

/// Type code written ahead of each long in the event id part.
const LONG_CODE: u8 = 3;

/// Payload length of an event id part.
pub const EVENT_ID_PART_LENGTH: i32 = 18;

/// One event identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventId {
    /// Id of the issuing source.
    pub thread_id: i64,
    /// Sequence number within the source.
    pub sequence_id: i64,
}

impl EventId {
    /// Writes this id as a complete part.
    pub fn write_part(&self, dst: &mut BytesMut) {
        dst.put_i32(EVENT_ID_PART_LENGTH);
        dst.put_u8(PART_BYTES);
        dst.put_u8(LONG_CODE);
        dst.put_i64(self.thread_id);
        dst.put_u8(LONG_CODE);
        dst.put_i64(self.sequence_id);
    }
}

/// Hands out event ids for one logical issuer.
///
/// Each source gets a process-unique thread id; sequence numbers start at zero.
#[derive(Debug)]
pub struct EventIdSource {
    thread_id: i64,
    sequence: AtomicI64,
}

impl EventIdSource {
    /// Creates a source with a fresh thread id.
    pub fn new() -> Self {
        Self {
            thread_id: THREAD_ID_COUNTER.fetch_add(1, Ordering::Relaxed),
            sequence: AtomicI64::new(0),
        }
    }

    /// Returns this source's thread id.
    pub fn thread_id(&self) -> i64 {
        self.thread_id
    }

    /// Returns the next id.
    pub fn next_id(&self) -> EventId {
        self.reserve(0)
    }

    /// Returns the next id and skips `additional` sequence numbers after it,
    /// so a bulk request of `additional + 1` entries owns a contiguous range.
    pub fn reserve(&self, additional: usize) -> EventId {
        let step = 1 + additional as i64;
        EventId {
            thread_id: self.thread_id,
            sequence_id: self.sequence.fetch_add(step, Ordering::Relaxed),
        }
    }
}

impl Default for EventIdSource {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_part_layout() {
        let id = EventId {
            thread_id: 1,
            sequence_id: 2,
        };
        let mut buf = BytesMut::new();
        id.write_part(&mut buf);
        assert_eq!(buf.len(), 5 + EVENT_ID_PART_LENGTH as usize);
        assert_eq!(&buf[..6], &[0, 0, 0, 18, 0, 3]);
        assert_eq!(buf[14], 3);
        assert_eq!(buf[22], 2);
    }

    #[test]
    fn test_sources_have_distinct_threads() {
        let a = EventIdSource::new();
        let b = EventIdSource::new();
        assert_ne!(a.thread_id(), b.thread_id());
    }

    #[test]
    fn test_reserve_skips_sequence_numbers() {
        let source = EventIdSource::new();
        assert_eq!(source.next_id().sequence_id, 0);
        assert_eq!(source.reserve(4).sequence_id, 1);
        assert_eq!(source.next_id().sequence_id, 6);
    }
}
