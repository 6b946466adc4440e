//! A single continuous query and its state machine.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use geode_core::protocol::requests;
use geode_core::{GeodeError, Result, ServerLocation};
use tracing::{debug, warn};

use super::service::CqServiceInner;
use super::{CqAttributes, CqAttributesMutator, CqEvent, CqResults, CqState, CqStatistics};

/// A continuous query registered with a [`CqService`](super::CqService).
///
/// Queries start stopped. [`execute`](Self::execute) registers them on the
/// servers; [`stop`](Self::stop) pauses event delivery; [`close`](Self::close)
/// ends the query for good and removes it from its service.
pub struct CqQuery {
    name: String,
    query: String,
    attributes: Arc<CqAttributes>,
    durable: bool,
    state: Mutex<CqState>,
    // serializes execute, stop and close against each other
    transition: tokio::sync::Mutex<()>,
    stats: CqStatistics,
    service: Weak<CqServiceInner>,
}

impl CqQuery {
    pub(super) fn new(
        name: String,
        query: String,
        attributes: CqAttributes,
        durable: bool,
        service: Weak<CqServiceInner>,
    ) -> Self {
        Self {
            name,
            query,
            attributes: Arc::new(attributes),
            durable,
            state: Mutex::new(CqState::Stopped),
            transition: tokio::sync::Mutex::new(()),
            stats: CqStatistics::default(),
            service,
        }
    }

    /// Returns the query name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the query text.
    pub fn query_string(&self) -> &str {
        &self.query
    }

    /// Returns true if the server keeps this query's events while the
    /// durable client is away.
    pub fn is_durable(&self) -> bool {
        self.durable
    }

    /// Returns the current state.
    pub fn state(&self) -> CqState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns true if the query is running.
    pub fn is_running(&self) -> bool {
        self.state() == CqState::Running
    }

    /// Returns true if the query is stopped.
    pub fn is_stopped(&self) -> bool {
        self.state() == CqState::Stopped
    }

    /// Returns true if the query is closed or being closed.
    pub fn is_closed(&self) -> bool {
        matches!(self.state(), CqState::Closed | CqState::Closing)
    }

    /// Returns the event counters of this query.
    pub fn statistics(&self) -> &CqStatistics {
        &self.stats
    }

    /// Returns the listeners of this query.
    pub fn attributes(&self) -> &CqAttributes {
        &self.attributes
    }

    /// Returns a handle that changes this query's listeners.
    pub fn attributes_mutator(&self) -> CqAttributesMutator {
        CqAttributesMutator::new(Arc::clone(&self.attributes))
    }

    fn set_state(&self, state: CqState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    fn service(&self) -> Result<Arc<CqServiceInner>> {
        self.service
            .upgrade()
            .ok_or_else(|| GeodeError::IllegalState("CQ service is closed".to_string()))
    }

    fn ensure_executable(&self) -> Result<()> {
        match self.state() {
            CqState::Closed | CqState::Closing => Err(GeodeError::CqClosed(self.name.clone())),
            CqState::Running => Err(GeodeError::IllegalState(format!(
                "CQ {} is already running",
                self.name
            ))),
            CqState::Stopped => Ok(()),
        }
    }

    fn mark_running(&self, service: &CqServiceInner) {
        self.set_state(CqState::Running);
        service.stats.cq_started();
    }

    /// Registers the query on the servers and starts event delivery.
    ///
    /// Fails with [`GeodeError::CqClosed`] on a closed query and
    /// [`GeodeError::IllegalState`] on a running one.
    #[tracing::instrument(skip(self), fields(cq = %self.name))]
    pub async fn execute(&self) -> Result<()> {
        let _transition = self.transition.lock().await;
        self.ensure_executable()?;
        let service = self.service()?;
        let transport = &service.transport;
        let request = requests::execute_cq(
            &self.name,
            &self.query,
            CqState::Running.code(),
            self.durable,
            transport.header_options(),
        )?;
        transport.send_cq_request(request, None).await?;
        self.mark_running(&service);
        debug!("CQ executing");
        Ok(())
    }

    /// Registers the query and returns the entries that already match it.
    #[tracing::instrument(skip(self), fields(cq = %self.name))]
    pub async fn execute_with_initial_results(&self, timeout: Duration) -> Result<CqResults> {
        let _transition = self.transition.lock().await;
        self.ensure_executable()?;
        let service = self.service()?;
        let transport = &service.transport;
        let request = requests::execute_cq_with_initial_results(
            &self.name,
            &self.query,
            CqState::Running.code(),
            self.durable,
            timeout,
            transport.header_options(),
        )?;
        let results = transport.send_cq_request_with_results(request).await?;
        self.mark_running(&service);
        debug!(initial = results.len(), "CQ executing");
        Ok(results)
    }

    /// Registers a running query again after the client failed over.
    /// Does nothing unless the query is running.
    pub(crate) async fn execute_after_failover(&self) -> Result<()> {
        let _transition = self.transition.lock().await;
        if !self.is_running() {
            return Ok(());
        }
        self.send_execute(None).await
    }

    /// Registers a running query on one server.
    pub(crate) async fn execute_on(&self, server: &ServerLocation) -> Result<()> {
        let _transition = self.transition.lock().await;
        if !self.is_running() {
            return Ok(());
        }
        self.send_execute(Some(server)).await
    }

    async fn send_execute(&self, server: Option<&ServerLocation>) -> Result<()> {
        let service = self.service()?;
        let request = requests::execute_cq(
            &self.name,
            &self.query,
            CqState::Running.code(),
            self.durable,
            service.transport.header_options(),
        )?;
        service.transport.send_cq_request(request, server).await
    }

    /// Stops event delivery. The query stays registered and may be executed
    /// again.
    ///
    /// Fails with [`GeodeError::CqClosed`] on a closed query and
    /// [`GeodeError::CqNotRunning`] on a stopped one.
    #[tracing::instrument(skip(self), fields(cq = %self.name))]
    pub async fn stop(&self) -> Result<()> {
        let _transition = self.transition.lock().await;
        match self.state() {
            CqState::Closed | CqState::Closing => {
                return Err(GeodeError::CqClosed(self.name.clone()))
            }
            CqState::Stopped => return Err(GeodeError::CqNotRunning(self.name.clone())),
            CqState::Running => {}
        }
        let service = self.service()?;
        let request = requests::stop_cq(
            &self.name,
            None,
            &service.event_ids.next_id(),
            service.transport.header_options(),
        )?;
        service.transport.send_cq_request(request, None).await?;
        self.set_state(CqState::Stopped);
        service.stats.cq_stopped();
        debug!("CQ stopped");
        Ok(())
    }

    /// Closes the query, telling the servers to drop it.
    ///
    /// Closing a closed query does nothing.
    pub async fn close(&self) -> Result<()> {
        self.close_with(true).await
    }

    /// Closes the query, notifying the servers only when `send_to_server`.
    ///
    /// Server errors are logged and ignored; the query always ends closed.
    #[tracing::instrument(skip(self), fields(cq = %self.name))]
    pub(crate) async fn close_with(&self, send_to_server: bool) -> Result<()> {
        let _transition = self.transition.lock().await;
        let was_running = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if matches!(*state, CqState::Closed | CqState::Closing) {
                return Ok(());
            }
            let was_running = *state == CqState::Running;
            *state = CqState::Closing;
            was_running
        };

        let service = self.service.upgrade();
        if send_to_server {
            if let Some(service) = &service {
                if let Err(e) = self.send_close(service).await {
                    debug!(error = %e, "ignoring close failure from server");
                }
            }
        }

        self.set_state(CqState::Closed);
        self.close_listeners();
        if let Some(service) = &service {
            service.remove_cq(&self.name);
            service.stats.cq_closed(was_running);
        }
        debug!("CQ closed");
        Ok(())
    }

    async fn send_close(&self, service: &CqServiceInner) -> Result<()> {
        let request = requests::close_cq(
            &self.name,
            None,
            &service.event_ids.next_id(),
            service.transport.header_options(),
        )?;
        service.transport.send_cq_request(request, None).await
    }

    fn close_listeners(&self) {
        for listener in self.attributes.listeners() {
            if catch_unwind(AssertUnwindSafe(|| listener.close())).is_err() {
                warn!(cq = %self.name, "CQ listener panicked in close");
            }
        }
    }

    pub(super) fn record_event(&self, event: &CqEvent) {
        self.stats.record(event);
    }
}

impl std::fmt::Debug for CqQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CqQuery")
            .field("name", &self.name)
            .field("query", &self.query)
            .field("durable", &self.durable)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cq::testing::ScriptedTransport;
    use crate::cq::CqService;
    use crate::listener::{CqListener, FnCqListener};
    use geode_core::protocol::MessageType;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const QUERY: &str = "SELECT * FROM /Portfolios p WHERE p.status = 'active'";

    fn service(transport: &Arc<ScriptedTransport>) -> CqService {
        CqService::new(transport.clone())
    }

    #[tokio::test]
    async fn test_execute_then_stop() {
        let transport = Arc::new(ScriptedTransport::default());
        let service = service(&transport);
        let cq = service
            .new_cq("cq1", QUERY, CqAttributes::default(), false)
            .unwrap();
        assert!(cq.is_stopped());

        cq.execute().await.unwrap();
        assert!(cq.is_running());
        assert_eq!(service.statistics().num_cqs_active(), 1);

        cq.stop().await.unwrap();
        assert!(cq.is_stopped());
        assert_eq!(
            transport.sent_types(),
            vec![MessageType::ExecuteCq, MessageType::StopCq]
        );
        assert_eq!(service.statistics().num_cqs_stopped(), 1);
    }

    #[tokio::test]
    async fn test_execute_twice_is_illegal() {
        let transport = Arc::new(ScriptedTransport::default());
        let service = service(&transport);
        let cq = service
            .new_cq("cq1", QUERY, CqAttributes::default(), false)
            .unwrap();
        cq.execute().await.unwrap();
        assert!(matches!(
            cq.execute().await,
            Err(GeodeError::IllegalState(_))
        ));
    }

    #[tokio::test]
    async fn test_stop_on_stopped_query() {
        let transport = Arc::new(ScriptedTransport::default());
        let service = service(&transport);
        let cq = service
            .new_cq("cq1", QUERY, CqAttributes::default(), false)
            .unwrap();
        assert!(matches!(cq.stop().await, Err(GeodeError::CqNotRunning(_))));
        assert!(transport.sent_types().is_empty());
    }

    #[tokio::test]
    async fn test_closed_query_rejects_execute_and_stop() {
        let transport = Arc::new(ScriptedTransport::default());
        let service = service(&transport);
        let cq = service
            .new_cq("cq1", QUERY, CqAttributes::default(), false)
            .unwrap();
        cq.close().await.unwrap();
        assert!(matches!(cq.execute().await, Err(GeodeError::CqClosed(_))));
        assert!(matches!(cq.stop().await, Err(GeodeError::CqClosed(_))));
        assert!(matches!(
            cq.execute_with_initial_results(Duration::from_secs(1)).await,
            Err(GeodeError::CqClosed(_))
        ));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let closes = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&closes);
        let listener: Arc<dyn CqListener> = Arc::new(
            FnCqListener::builder()
                .on_close(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
                .build(),
        );
        let transport = Arc::new(ScriptedTransport::default());
        let service = service(&transport);
        let cq = service
            .new_cq(
                "cq1",
                QUERY,
                CqAttributes::builder().add_listener(listener).build(),
                false,
            )
            .unwrap();
        cq.execute().await.unwrap();

        cq.close().await.unwrap();
        cq.close().await.unwrap();

        assert!(cq.is_closed());
        assert_eq!(cq.state(), CqState::Closed);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert!(service.get_cq("cq1").is_none());
        assert_eq!(
            transport.sent_types(),
            vec![MessageType::ExecuteCq, MessageType::CloseCq]
        );
        assert_eq!(service.statistics().num_cqs_closed(), 1);
        assert_eq!(service.statistics().num_cqs_active(), 0);
    }

    #[tokio::test]
    async fn test_close_ignores_server_failure() {
        let transport = Arc::new(ScriptedTransport::default());
        let service = service(&transport);
        let cq = service
            .new_cq("cq1", QUERY, CqAttributes::default(), false)
            .unwrap();
        transport.fail_next("server gone");
        cq.close().await.unwrap();
        assert!(cq.is_closed());
    }

    #[tokio::test]
    async fn test_close_survives_panicking_listener() {
        let listener: Arc<dyn CqListener> = Arc::new(
            FnCqListener::builder()
                .on_close(|| panic!("listener failure"))
                .build(),
        );
        let transport = Arc::new(ScriptedTransport::default());
        let service = service(&transport);
        let cq = service
            .new_cq(
                "cq1",
                QUERY,
                CqAttributes::builder().add_listener(listener).build(),
                false,
            )
            .unwrap();
        cq.close_with(false).await.unwrap();
        assert!(cq.is_closed());
        assert!(transport.sent_types().is_empty());
    }

    #[tokio::test]
    async fn test_failed_execute_leaves_query_stopped() {
        let transport = Arc::new(ScriptedTransport::default());
        let service = service(&transport);
        let cq = service
            .new_cq("cq1", QUERY, CqAttributes::default(), false)
            .unwrap();
        transport.fail_next("bad query");
        assert!(matches!(cq.execute().await, Err(GeodeError::CqQuery(_))));
        assert!(cq.is_stopped());
    }

    #[tokio::test]
    async fn test_execute_with_initial_results() {
        let transport = Arc::new(ScriptedTransport::default());
        *transport.results.lock().unwrap() = Some(CqResults::StructSet {
            field_names: vec!["id".into(), "status".into()],
            rows: vec![vec![
                geode_core::CacheableValue::Int(1),
                geode_core::CacheableValue::String("active".into()),
            ]],
        });
        let service = service(&transport);
        let cq = service
            .new_cq("cq1", QUERY, CqAttributes::default(), false)
            .unwrap();
        let results = cq
            .execute_with_initial_results(Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results.field_names(), ["id", "status"]);
        assert!(cq.is_running());
        assert_eq!(transport.sent_types(), vec![MessageType::ExecuteCqWithIr]);
    }

    #[tokio::test]
    async fn test_failover_reexecutes_only_running() {
        let transport = Arc::new(ScriptedTransport::default());
        let service = service(&transport);
        let cq = service
            .new_cq("cq1", QUERY, CqAttributes::default(), false)
            .unwrap();
        cq.execute_after_failover().await.unwrap();
        assert!(transport.sent_types().is_empty());

        cq.execute().await.unwrap();
        let server = ServerLocation::new("server-b", 40404);
        cq.execute_on(&server).await.unwrap();
        let sent = transport.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].1.as_ref(), Some(&server));
    }

    #[test]
    fn test_query_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<CqQuery>();
    }
}
