//! Listener traits for continuous query events.

use std::sync::Arc;

use crate::cq::CqEvent;

/// Receives the events of one continuous query.
///
/// Callbacks run on the task reading the subscription channel. A panicking
/// callback is logged and does not stop delivery to other listeners.
///
/// # Example
///
/// ```ignore
/// struct PrintListener;
///
/// impl CqListener for PrintListener {
///     fn on_event(&self, event: &CqEvent) {
///         println!("{:?} {}", event.query_operation(), event.key());
///     }
/// }
/// ```
pub trait CqListener: Send + Sync {
    /// Called for every event matching the query.
    fn on_event(&self, event: &CqEvent);

    /// Called for an event the server flagged as failed.
    fn on_error(&self, event: &CqEvent) {
        let _ = event;
    }

    /// Called once when the query is closed.
    fn close(&self) {}

    /// Returns this listener as a status listener, if it is one.
    fn as_status_listener(&self) -> Option<&dyn CqStatusListener> {
        None
    }
}

/// A listener that is also told when the query's subscription connects or
/// disconnects.
pub trait CqStatusListener: CqListener {
    /// Called when the subscription to the pool's servers is established.
    fn on_cq_connected(&self);

    /// Called when the subscription is lost.
    fn on_cq_disconnected(&self);
}

impl std::fmt::Debug for dyn CqListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CqListener")
    }
}

/// A shared CQ listener.
pub type BoxedCqListener = Arc<dyn CqListener>;

type EventFn = Box<dyn Fn(&CqEvent) + Send + Sync>;

/// A CQ listener built from closures.
///
/// Use [`FnCqListener::builder`] to create one.
pub struct FnCqListener {
    on_event: Option<EventFn>,
    on_error: Option<EventFn>,
    on_close: Option<Box<dyn Fn() + Send + Sync>>,
}

impl FnCqListener {
    /// Creates a builder.
    pub fn builder() -> FnCqListenerBuilder {
        FnCqListenerBuilder::default()
    }
}

impl CqListener for FnCqListener {
    fn on_event(&self, event: &CqEvent) {
        if let Some(ref f) = self.on_event {
            f(event);
        }
    }

    fn on_error(&self, event: &CqEvent) {
        if let Some(ref f) = self.on_error {
            f(event);
        }
    }

    fn close(&self) {
        if let Some(ref f) = self.on_close {
            f();
        }
    }
}

impl std::fmt::Debug for FnCqListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnCqListener")
            .field("on_event", &self.on_event.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_close", &self.on_close.is_some())
            .finish()
    }
}

/// Builder for [`FnCqListener`].
#[derive(Default)]
pub struct FnCqListenerBuilder {
    on_event: Option<EventFn>,
    on_error: Option<EventFn>,
    on_close: Option<Box<dyn Fn() + Send + Sync>>,
}

impl FnCqListenerBuilder {
    /// Sets the event callback.
    pub fn on_event<F>(mut self, f: F) -> Self
    where
        F: Fn(&CqEvent) + Send + Sync + 'static,
    {
        self.on_event = Some(Box::new(f));
        self
    }

    /// Sets the error callback.
    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: Fn(&CqEvent) + Send + Sync + 'static,
    {
        self.on_error = Some(Box::new(f));
        self
    }

    /// Sets the close callback.
    pub fn on_close<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_close = Some(Box::new(f));
        self
    }

    /// Builds the listener.
    pub fn build(self) -> FnCqListener {
        FnCqListener {
            on_event: self.on_event,
            on_error: self.on_error,
            on_close: self.on_close,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_fn_listener_close() {
        let closed = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&closed);
        let listener = FnCqListener::builder()
            .on_close(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .build();
        listener.close();
        assert_eq!(closed.load(Ordering::SeqCst), 1);
        assert!(listener.as_status_listener().is_none());
    }

    #[test]
    fn test_fn_listener_debug() {
        let listener = FnCqListener::builder().on_event(|_| {}).build();
        let debug = format!("{:?}", listener);
        assert!(debug.contains("on_event: true"));
        assert!(debug.contains("on_error: false"));
    }
}
