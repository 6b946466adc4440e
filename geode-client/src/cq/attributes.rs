//! Listener lists of continuous queries.

use std::sync::{Arc, PoisonError, RwLock};

use crate::listener::{CqListener, ListenerId};

/// The listeners attached to a continuous query.
///
/// A query shares its attributes with the [`CqAttributesMutator`] handed
/// out for it, so listeners may be changed while the query runs.
#[derive(Debug, Default)]
pub struct CqAttributes {
    listeners: RwLock<Vec<(ListenerId, Arc<dyn CqListener>)>>,
}

impl CqAttributes {
    /// Creates a builder.
    pub fn builder() -> CqAttributesBuilder {
        CqAttributesBuilder::default()
    }

    /// Returns the listeners in registration order.
    pub fn listeners(&self) -> Vec<Arc<dyn CqListener>> {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect()
    }

    /// Returns the number of listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn add(&self, listener: Arc<dyn CqListener>) -> ListenerId {
        let id = ListenerId::new();
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, listener));
        id
    }

    /// Copies the listener list into fresh attributes.
    pub(crate) fn snapshot(&self) -> CqAttributes {
        CqAttributes {
            listeners: RwLock::new(
                self.listeners
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone(),
            ),
        }
    }
}

/// Builder for [`CqAttributes`].
#[derive(Default)]
pub struct CqAttributesBuilder {
    listeners: Vec<Arc<dyn CqListener>>,
}

impl CqAttributesBuilder {
    /// Adds a listener.
    pub fn add_listener(mut self, listener: Arc<dyn CqListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Replaces the listener list.
    pub fn listeners(mut self, listeners: impl IntoIterator<Item = Arc<dyn CqListener>>) -> Self {
        self.listeners = listeners.into_iter().collect();
        self
    }

    /// Builds the attributes.
    pub fn build(self) -> CqAttributes {
        let attributes = CqAttributes::default();
        for listener in self.listeners {
            attributes.add(listener);
        }
        attributes
    }
}

impl std::fmt::Debug for CqAttributesBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CqAttributesBuilder")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

/// Changes the listeners of a live query.
#[derive(Debug, Clone)]
pub struct CqAttributesMutator {
    attributes: Arc<CqAttributes>,
}

impl CqAttributesMutator {
    pub(crate) fn new(attributes: Arc<CqAttributes>) -> Self {
        Self { attributes }
    }

    /// Adds a listener and returns its registration id.
    pub fn add_listener(&self, listener: Arc<dyn CqListener>) -> ListenerId {
        self.attributes.add(listener)
    }

    /// Removes a listener, calling its `close`. Returns false if `id` is not
    /// registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let removed = {
            let mut listeners = self
                .attributes
                .listeners
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            let position = listeners.iter().position(|(lid, _)| *lid == id);
            position.map(|p| listeners.remove(p).1)
        };
        match removed {
            Some(listener) => {
                listener.close();
                true
            }
            None => false,
        }
    }

    /// Replaces every listener, calling `close` on the ones removed.
    pub fn set_listeners(&self, listeners: Vec<Arc<dyn CqListener>>) -> Vec<ListenerId> {
        let fresh: Vec<(ListenerId, Arc<dyn CqListener>)> = listeners
            .into_iter()
            .map(|l| (ListenerId::new(), l))
            .collect();
        let ids = fresh.iter().map(|(id, _)| *id).collect();
        let old = std::mem::replace(
            &mut *self
                .attributes
                .listeners
                .write()
                .unwrap_or_else(PoisonError::into_inner),
            fresh,
        );
        for (_, listener) in old {
            listener.close();
        }
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cq::CqEvent;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counting {
        closed: AtomicUsize,
    }

    impl CqListener for Counting {
        fn on_event(&self, _event: &CqEvent) {}

        fn close(&self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_builder_keeps_order() {
        let a: Arc<dyn CqListener> = Arc::new(Counting::default());
        let b: Arc<dyn CqListener> = Arc::new(Counting::default());
        let attributes = CqAttributes::builder()
            .add_listener(Arc::clone(&a))
            .add_listener(Arc::clone(&b))
            .build();
        let listeners = attributes.listeners();
        assert_eq!(listeners.len(), 2);
        assert!(Arc::ptr_eq(&listeners[0], &a));
        assert!(Arc::ptr_eq(&listeners[1], &b));
    }

    #[test]
    fn test_mutator_add_and_remove() {
        let attributes = Arc::new(CqAttributes::default());
        let mutator = CqAttributesMutator::new(Arc::clone(&attributes));
        let listener = Arc::new(Counting::default());

        let id = mutator.add_listener(listener.clone());
        assert_eq!(attributes.listener_count(), 1);
        assert!(mutator.remove_listener(id));
        assert!(!mutator.remove_listener(id));
        assert_eq!(attributes.listener_count(), 0);
        assert_eq!(listener.closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_mutator_set_listeners_closes_old() {
        let old = Arc::new(Counting::default());
        let attributes = Arc::new(CqAttributes::builder().add_listener(old.clone()).build());
        let mutator = CqAttributesMutator::new(Arc::clone(&attributes));

        let ids = mutator.set_listeners(vec![
            Arc::new(Counting::default()),
            Arc::new(Counting::default()),
        ]);
        assert_eq!(ids.len(), 2);
        assert_eq!(attributes.listener_count(), 2);
        assert_eq!(old.closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_snapshot_is_independent() {
        let attributes = CqAttributes::builder()
            .add_listener(Arc::new(Counting::default()))
            .build();
        let copy = attributes.snapshot();
        attributes.add(Arc::new(Counting::default()));
        assert_eq!(copy.listener_count(), 1);
        assert_eq!(attributes.listener_count(), 2);
    }
}
