//! Counters for continuous queries.

use std::sync::atomic::{AtomicU64, Ordering};

use super::{CqEvent, CqOperation};

/// Event counters of one continuous query.
#[derive(Debug, Default)]
pub struct CqStatistics {
    events: AtomicU64,
    inserts: AtomicU64,
    updates: AtomicU64,
    deletes: AtomicU64,
}

impl CqStatistics {
    /// Returns the number of events received.
    pub fn num_events(&self) -> u64 {
        self.events.load(Ordering::Relaxed)
    }

    /// Returns the number of create events.
    pub fn num_inserts(&self) -> u64 {
        self.inserts.load(Ordering::Relaxed)
    }

    /// Returns the number of update events.
    pub fn num_updates(&self) -> u64 {
        self.updates.load(Ordering::Relaxed)
    }

    /// Returns the number of destroy events.
    pub fn num_deletes(&self) -> u64 {
        self.deletes.load(Ordering::Relaxed)
    }

    pub(crate) fn record(&self, event: &CqEvent) {
        self.events.fetch_add(1, Ordering::Relaxed);
        let counter = match event.query_operation() {
            CqOperation::Create => &self.inserts,
            CqOperation::Update => &self.updates,
            CqOperation::Destroy => &self.deletes,
            _ => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Counters across every query of a [`CqService`](super::CqService).
#[derive(Debug, Default)]
pub struct CqServiceStatistics {
    created: AtomicU64,
    closed: AtomicU64,
    active: AtomicU64,
    stopped: AtomicU64,
    on_client: AtomicU64,
}

impl CqServiceStatistics {
    /// Returns the number of queries created.
    pub fn num_cqs_created(&self) -> u64 {
        self.created.load(Ordering::Relaxed)
    }

    /// Returns the number of queries closed.
    pub fn num_cqs_closed(&self) -> u64 {
        self.closed.load(Ordering::Relaxed)
    }

    /// Returns the number of running queries.
    pub fn num_cqs_active(&self) -> u64 {
        self.active.load(Ordering::Relaxed)
    }

    /// Returns the number of stopped queries.
    pub fn num_cqs_stopped(&self) -> u64 {
        self.stopped.load(Ordering::Relaxed)
    }

    /// Returns the number of queries registered on this client.
    pub fn num_cqs_on_client(&self) -> u64 {
        self.on_client.load(Ordering::Relaxed)
    }

    pub(crate) fn cq_created(&self) {
        self.created.fetch_add(1, Ordering::Relaxed);
        self.stopped.fetch_add(1, Ordering::Relaxed);
        self.on_client.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn cq_started(&self) {
        decrement(&self.stopped);
        self.active.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn cq_stopped(&self) {
        decrement(&self.active);
        self.stopped.fetch_add(1, Ordering::Relaxed);
    }

    /// `was_running` selects which gauge the query leaves.
    pub(crate) fn cq_closed(&self, was_running: bool) {
        self.closed.fetch_add(1, Ordering::Relaxed);
        decrement(&self.on_client);
        if was_running {
            decrement(&self.active);
        } else {
            decrement(&self.stopped);
        }
    }
}

fn decrement(counter: &AtomicU64) {
    let _ = counter.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| v.checked_sub(1));
}
