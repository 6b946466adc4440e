//! The registry of continuous queries.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use geode_core::protocol::{requests, EventIdSource, MessageType, Reply};
use geode_core::{CacheableValue, GeodeError, Result, ServerLocation};
use tracing::{debug, info, warn};

use super::{CqAttributes, CqEvent, CqOperation, CqQuery, CqServiceStatistics, CqTransport};
use crate::connection::NotificationHandler;

pub(crate) struct CqServiceInner {
    pub(super) transport: Arc<dyn CqTransport>,
    pub(super) event_ids: EventIdSource,
    pub(super) stats: CqServiceStatistics,
    queries: Mutex<HashMap<String, Arc<CqQuery>>>,
    running: AtomicBool,
    generated_names: AtomicU64,
}

impl CqServiceInner {
    fn queries(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<CqQuery>>> {
        self.queries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(super) fn remove_cq(&self, name: &str) {
        self.queries().remove(name);
    }
}

/// Creates, tracks and dispatches events to the continuous queries of one
/// pool.
///
/// Cloning is cheap; every clone shares the same registry.
#[derive(Clone)]
pub struct CqService {
    inner: Arc<CqServiceInner>,
}

impl std::fmt::Debug for CqService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CqService")
            .field("pool", &self.inner.transport.pool_name())
            .field("cqs", &self.inner.queries().len())
            .field("running", &self.is_running())
            .finish()
    }
}

impl CqService {
    /// Creates a service sending its requests through `transport`.
    pub fn new(transport: Arc<dyn CqTransport>) -> Self {
        Self {
            inner: Arc::new(CqServiceInner {
                transport,
                event_ids: EventIdSource::new(),
                stats: CqServiceStatistics::default(),
                queries: Mutex::new(HashMap::new()),
                running: AtomicBool::new(true),
                generated_names: AtomicU64::new(0),
            }),
        }
    }

    /// Returns false once [`close_cq_service`](Self::close_cq_service) ran.
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// Returns the service counters.
    pub fn statistics(&self) -> &CqServiceStatistics {
        &self.inner.stats
    }

    /// Creates a stopped query and registers it.
    ///
    /// An empty `name` gets a generated one. Fails when the query text is
    /// empty, the pool has no subscription, a durable query is requested by
    /// a non-durable client, or the name is taken.
    #[tracing::instrument(skip(self, query, attributes), fields(cq = %name))]
    pub fn new_cq(
        &self,
        name: &str,
        query: &str,
        attributes: CqAttributes,
        durable: bool,
    ) -> Result<Arc<CqQuery>> {
        if query.trim().is_empty() {
            return Err(GeodeError::IllegalArgument(
                "CQ query text is empty".to_string(),
            ));
        }
        if !self.is_running() {
            return Err(GeodeError::IllegalState("CQ service is closed".to_string()));
        }
        let transport = &self.inner.transport;
        if !transport.subscription_enabled() {
            return Err(GeodeError::IllegalState(format!(
                "cannot create CQ: subscription is not enabled on pool {}",
                transport.pool_name()
            )));
        }
        if durable && transport.durable_client_id().is_none() {
            return Err(GeodeError::IllegalState(
                "cannot create durable CQ: client is not durable".to_string(),
            ));
        }

        let mut queries = self.inner.queries();
        let name = if name.is_empty() {
            self.generate_name(&queries)
        } else {
            name.to_string()
        };
        if queries.contains_key(&name) {
            return Err(GeodeError::CqExists(name));
        }
        let cq = Arc::new(CqQuery::new(
            name.clone(),
            query.to_string(),
            attributes.snapshot(),
            durable,
            Arc::downgrade(&self.inner),
        ));
        queries.insert(name, Arc::clone(&cq));
        drop(queries);

        self.inner.stats.cq_created();
        debug!("CQ created");
        Ok(cq)
    }

    fn generate_name(&self, queries: &HashMap<String, Arc<CqQuery>>) -> String {
        loop {
            let n = self.inner.generated_names.fetch_add(1, Ordering::Relaxed);
            let candidate = format!("CQ_{}", n);
            if !queries.contains_key(&candidate) {
                return candidate;
            }
        }
    }

    /// Looks up a registered query.
    pub fn get_cq(&self, name: &str) -> Option<Arc<CqQuery>> {
        self.inner.queries().get(name).cloned()
    }

    /// Returns true if a query named `name` is registered.
    pub fn contains_cq(&self, name: &str) -> bool {
        self.inner.queries().contains_key(name)
    }

    /// Returns every registered query.
    pub fn get_all_cqs(&self) -> Vec<Arc<CqQuery>> {
        self.inner.queries().values().cloned().collect()
    }

    /// Executes registered queries. With `after_failover`, running queries
    /// are sent again; otherwise stopped queries are started. Failures are
    /// logged per query.
    #[tracing::instrument(skip(self))]
    pub async fn execute_all_client_cqs(&self, after_failover: bool) {
        for cq in self.get_all_cqs() {
            if cq.is_closed() || !(after_failover || cq.is_stopped()) {
                continue;
            }
            let outcome = if after_failover {
                cq.execute_after_failover().await
            } else {
                cq.execute().await
            };
            if let Err(e) = outcome {
                warn!(cq = %cq.name(), error = %e, "failed to execute CQ");
            }
        }
    }

    /// Registers every running query on `server`, as needed when a new
    /// subscription endpoint comes up. Failures are logged per query and
    /// the remaining queries are still sent; returns the number that failed.
    #[tracing::instrument(skip(self), fields(server = %server))]
    pub async fn execute_on_endpoint(&self, server: &ServerLocation) -> usize {
        let mut failed = 0;
        for cq in self.get_all_cqs() {
            if let Err(e) = cq.execute_on(server).await {
                warn!(cq = %cq.name(), error = %e, "failed to execute CQ on endpoint");
                failed += 1;
            }
        }
        failed
    }

    /// Stops every running query. Failures are logged per query.
    pub async fn stop_all(&self) {
        for cq in self.get_all_cqs() {
            if !cq.is_running() {
                continue;
            }
            if let Err(e) = cq.stop().await {
                debug!(cq = %cq.name(), error = %e, "failed to stop CQ");
            }
        }
    }

    /// Closes every query. With `keep_alive`, durable queries are closed
    /// locally only so the server keeps their events for the next session.
    pub async fn close_all(&self, keep_alive: bool) {
        for cq in self.get_all_cqs() {
            let send_to_server = !(keep_alive && cq.is_durable());
            if let Err(e) = cq.close_with(send_to_server).await {
                debug!(cq = %cq.name(), error = %e, "failed to close CQ");
            }
        }
    }

    /// Closes every query and empties the registry. Later calls do nothing.
    #[tracing::instrument(skip(self))]
    pub async fn close_cq_service(&self, keep_alive: bool) {
        if !self.inner.running.swap(false, Ordering::AcqRel) {
            return;
        }
        self.close_all(keep_alive).await;
        self.inner.queries().clear();
        info!("CQ service closed");
    }

    /// Lists the durable queries the server holds for this client.
    pub async fn get_all_durable_cqs_from_server(&self) -> Result<Vec<String>> {
        let transport = &self.inner.transport;
        let request = requests::get_durable_cqs(transport.header_options())?;
        transport.fetch_durable_cqs(request).await
    }

    /// Dispatches a subscription push to the queries it names. Pushes
    /// without CQ information are ignored.
    pub async fn receive_notification(&self, notification: Reply) {
        match notification {
            Reply::Entry(entry) => {
                let Some(message_type) = entry.cq_message_type else {
                    return;
                };
                self.invoke_cq_listeners(
                    &entry.cqs,
                    message_type,
                    entry.key,
                    entry.value,
                    entry.delta,
                    entry.event_id,
                )
                .await;
            }
            Reply::Region(region) if !region.cqs.is_empty() => {
                self.invoke_cq_listeners(
                    &region.cqs,
                    region.kind.code(),
                    CacheableValue::Null,
                    None,
                    None,
                    region.event_id,
                )
                .await;
            }
            _ => {}
        }
    }

    /// Delivers one change to the listeners of every running query named in
    /// `cqs`. A query whose operation is a region destroy is closed instead.
    /// Listener panics are logged and do not stop delivery.
    pub async fn invoke_cq_listeners(
        &self,
        cqs: &[(String, i32)],
        message_type: i32,
        key: CacheableValue,
        value: Option<CacheableValue>,
        delta: Option<Bytes>,
        event_id: Bytes,
    ) {
        let base_operation = CqOperation::from_message_type(message_type);
        for (name, operation) in cqs {
            let cq = match self.get_cq(name) {
                Some(cq) if cq.is_running() => cq,
                Some(_) => {
                    debug!(cq = %name, "CQ is not running; dropping event");
                    continue;
                }
                None => {
                    debug!(cq = %name, "CQ not found; dropping event");
                    continue;
                }
            };

            if *operation == MessageType::DestroyRegion.code() {
                if let Err(e) = cq.close_with(false).await {
                    debug!(cq = %name, error = %e, "failed to close CQ on region destroy");
                }
                continue;
            }

            let event = CqEvent::new(
                name.clone(),
                base_operation,
                CqOperation::from_message_type(*operation),
                key.clone(),
                value.clone(),
                delta.clone(),
                event_id.clone(),
            );
            cq.record_event(&event);

            for listener in cq.attributes().listeners() {
                let delivered = catch_unwind(AssertUnwindSafe(|| {
                    if event.is_error() {
                        listener.on_error(&event);
                    } else {
                        listener.on_event(&event);
                    }
                }));
                if delivered.is_err() {
                    warn!(cq = %name, "CQ listener panicked");
                }
            }
        }
    }

    /// Tells the status listeners of running queries that the subscription
    /// of `pool_name` connected or disconnected.
    pub fn invoke_cq_connected_listeners(&self, pool_name: &str, connected: bool) {
        if pool_name != self.inner.transport.pool_name() {
            return;
        }
        for cq in self.get_all_cqs() {
            if !cq.is_running() {
                continue;
            }
            for listener in cq.attributes().listeners() {
                let Some(status) = listener.as_status_listener() else {
                    continue;
                };
                let notified = catch_unwind(AssertUnwindSafe(|| {
                    if connected {
                        status.on_cq_connected();
                    } else {
                        status.on_cq_disconnected();
                    }
                }));
                if notified.is_err() {
                    warn!(cq = %cq.name(), "CQ status listener panicked");
                }
            }
        }
    }
}

#[async_trait]
impl NotificationHandler for CqService {
    async fn on_notification(&self, _server: &ServerLocation, notification: Reply) {
        self.receive_notification(notification).await;
    }

    async fn on_channel_closed(&self, server: &ServerLocation) {
        debug!(server = %server, "subscription channel closed");
        self.inner.transport.subscription_lost(server);
        let pool = self.inner.transport.pool_name().to_string();
        self.invoke_cq_connected_listeners(&pool, false);
    }
}
