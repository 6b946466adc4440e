//! Connection pool with per-server idle queues.

use std::collections::{HashMap, HashSet, VecDeque};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use geode_core::protocol::{
    decode_reply, requests, ChannelKind, ChunkHandler, ChunkedReply, ConflationOverride,
    DurableCqListCollector, HeaderOptions, MessageType, NoResultHandler, PartitionAttributes,
    QueryResultCollector, RawMessage, Reply, RequestMessage, ServerHandshake,
};
use geode_core::{BucketServerLocation, GeodeError, Result, ServerLocation};
use tokio::sync::watch;
use tokio::time::interval;
use tracing::instrument;

use super::connection::{Connection, ConnectionTimeouts};
use super::endpoint::Endpoint;
use super::handshake::{HandshakeSecurity, HandshakeSettings};
use super::load_balancer::{default_load_balancer, LoadBalancer};
use super::membership::ClientMembershipId;
use crate::config::ClientConfig;
use crate::cq::{CqResults, CqTransport};
use crate::metadata::MetadataFetcher;
use crate::security::{AuthInitialize, DhKeyExchange, PropertiesAuthInitialize};

/// Distributed system name presented by pool connections.
const DEFAULT_DS_NAME: &str = "";

/// Builder for [`Pool`].
#[derive(Debug)]
pub struct PoolBuilder {
    name: Option<String>,
    config: Arc<ClientConfig>,
    auth: Option<Arc<dyn AuthInitialize>>,
    key_exchange: Option<Arc<dyn DhKeyExchange>>,
    load_balancer: Option<Arc<dyn LoadBalancer>>,
}

impl PoolBuilder {
    /// Sets the pool name used in logs.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Supplies credentials, replacing the configured properties.
    pub fn auth_initialize(mut self, auth: Arc<dyn AuthInitialize>) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Supplies the key exchange used when credential encryption is on.
    pub fn key_exchange(mut self, key_exchange: Arc<dyn DhKeyExchange>) -> Self {
        self.key_exchange = Some(key_exchange);
        self
    }

    /// Sets the strategy for requests without a routed server.
    pub fn load_balancer(mut self, load_balancer: Arc<dyn LoadBalancer>) -> Self {
        self.load_balancer = Some(load_balancer);
        self
    }

    /// Builds the pool. No connection is opened until the first request.
    ///
    /// # Errors
    ///
    /// Returns `GeodeError::Configuration` if credential encryption is
    /// configured without a key exchange.
    pub fn build(self) -> Result<Pool> {
        let config = self.config;
        let security_config = config.security();

        let auth = self.auth.or_else(|| {
            PropertiesAuthInitialize::from_config(security_config)
                .map(|a| Arc::new(a) as Arc<dyn AuthInitialize>)
        });

        let dh = match (security_config.dh_algorithm(), self.key_exchange) {
            (Some(algorithm), Some(exchange)) => Some((exchange, algorithm.to_string())),
            (Some(_), None) => {
                return Err(GeodeError::Configuration(
                    "credential encryption is configured but no key exchange was supplied"
                        .to_string(),
                ))
            }
            (None, _) => None,
        };

        let security = HandshakeSecurity {
            auth,
            dh,
            server_auth: security_config.requires_server_auth(),
            multi_user: config.pool().multi_user_mode(),
        };

        let durable = config
            .durable()
            .id()
            .map(|id| (id.to_string(), config.durable().timeout()));
        let membership = ClientMembershipId::new(local_hostname(), DEFAULT_DS_NAME, durable)?;

        let endpoints = config
            .pool()
            .servers()
            .iter()
            .map(|s| (s.clone(), Arc::new(Endpoint::new(s.clone()))))
            .collect();

        let (shutdown, _) = watch::channel(false);

        Ok(Pool {
            inner: Arc::new(PoolInner {
                name: self.name.unwrap_or_else(|| "default".to_string()),
                config,
                membership,
                security,
                load_balancer: self.load_balancer.unwrap_or_else(default_load_balancer),
                idle: Mutex::new(HashMap::new()),
                open: Mutex::new(HashMap::new()),
                endpoints: RwLock::new(endpoints),
                bound_ports: Mutex::new(Vec::new()),
                subscription_endpoints: RwLock::new(Vec::new()),
                primary_queue_size: AtomicI32::new(-1),
                total: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
                shutdown,
            }),
        })
    }
}

fn local_hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string())
}

#[derive(Debug)]
struct PoolInner {
    name: String,
    config: Arc<ClientConfig>,
    membership: ClientMembershipId,
    security: HandshakeSecurity,
    load_balancer: Arc<dyn LoadBalancer>,
    idle: Mutex<HashMap<ServerLocation, VecDeque<Connection>>>,
    open: Mutex<HashMap<ServerLocation, usize>>,
    endpoints: RwLock<HashMap<ServerLocation, Arc<Endpoint>>>,
    bound_ports: Mutex<Vec<u16>>,
    // primary first
    subscription_endpoints: RwLock<Vec<ServerLocation>>,
    primary_queue_size: AtomicI32,
    total: AtomicUsize,
    closed: AtomicBool,
    shutdown: watch::Sender<bool>,
}

impl PoolInner {
    fn checkin(&self, mut connection: Connection) {
        connection.ownership().release();
        let server = connection.server().clone();
        let max_age = self.config.pool().max_connection_lifetime();
        if self.closed.load(Ordering::Acquire)
            || connection.is_broken()
            || connection.has_expired(max_age)
        {
            tracing::debug!(
                pool = %self.name,
                id = %connection.id(),
                address = %server,
                broken = connection.is_broken(),
                "discarding connection"
            );
            self.forget(&server);
            if connection.is_broken() {
                if let Some(endpoint) = self.endpoint_if_known(&server) {
                    endpoint.set_disconnected();
                }
            }
            return;
        }
        connection.touch();
        if let Ok(mut idle) = self.idle.lock() {
            idle.entry(server).or_default().push_back(connection);
        }
    }

    fn forget(&self, server: &ServerLocation) {
        self.total.fetch_sub(1, Ordering::AcqRel);
        if let Ok(mut open) = self.open.lock() {
            if let Some(count) = open.get_mut(server) {
                *count = count.saturating_sub(1);
            }
        }
    }

    fn endpoint_if_known(&self, server: &ServerLocation) -> Option<Arc<Endpoint>> {
        self.endpoints.read().ok()?.get(server).cloned()
    }
}

/// A connection checked out of the pool.
///
/// Dropping the guard returns the connection to its server's idle queue,
/// or discards it if it was marked broken.
#[derive(Debug)]
pub struct PooledConnection {
    connection: Option<Connection>,
    pool: Arc<PoolInner>,
}

impl PooledConnection {
    /// Discards the connection instead of returning it to the pool.
    pub fn discard(mut self) {
        if let Some(connection) = self.connection.as_mut() {
            connection.mark_broken();
        }
    }
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        match &self.connection {
            Some(c) => c,
            None => unreachable!("connection is present until drop"),
        }
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Connection {
        match &mut self.connection {
            Some(c) => c,
            None => unreachable!("connection is present until drop"),
        }
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            self.pool.checkin(connection);
        }
    }
}

/// Connections to the servers of one cluster.
///
/// Cloning is cheap; clones share the same connections.
#[derive(Debug, Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

impl Pool {
    /// Creates a builder for a pool using `config`.
    pub fn builder(config: Arc<ClientConfig>) -> PoolBuilder {
        PoolBuilder {
            name: None,
            config,
            auth: None,
            key_exchange: None,
            load_balancer: None,
        }
    }

    /// Returns the pool name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Returns the configured servers.
    pub fn servers(&self) -> &[ServerLocation] {
        self.inner.config.pool().servers()
    }

    /// Returns the identity shared by every connection of the pool.
    pub fn membership(&self) -> &ClientMembershipId {
        &self.inner.membership
    }

    /// Returns true if requests carry a per-user security part.
    pub fn is_multi_user(&self) -> bool {
        self.inner.security.multi_user
    }

    /// Returns header options for requests sent through this pool.
    pub fn header_options(&self) -> HeaderOptions {
        HeaderOptions {
            security_on: self.inner.security.multi_user,
            ..HeaderOptions::default()
        }
    }

    /// Returns the state of `server`, creating it for a server learned from
    /// routing metadata.
    pub fn endpoint(&self, server: &ServerLocation) -> Arc<Endpoint> {
        if let Some(endpoint) = self.inner.endpoint_if_known(server) {
            return endpoint;
        }
        match self.inner.endpoints.write() {
            Ok(mut endpoints) => Arc::clone(
                endpoints
                    .entry(server.clone())
                    .or_insert_with(|| Arc::new(Endpoint::new(server.clone()))),
            ),
            Err(_) => Arc::new(Endpoint::new(server.clone())),
        }
    }

    /// Returns every server the pool has state for.
    pub fn endpoints(&self) -> Vec<Arc<Endpoint>> {
        self.inner
            .endpoints
            .read()
            .map(|e| e.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns the local ports of the data connections opened so far.
    pub fn bound_ports(&self) -> Vec<u16> {
        self.inner
            .bound_ports
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }

    /// Returns the subscription queue size reported by a primary or
    /// non-redundant server, `-1` before any was reported.
    pub fn primary_queue_size(&self) -> i32 {
        self.inner.primary_queue_size.load(Ordering::Acquire)
    }

    /// Returns the number of open connections, idle or checked out.
    pub fn connection_count(&self) -> usize {
        self.inner.total.load(Ordering::Acquire)
    }

    /// Returns the number of idle connections to `server`.
    pub fn idle_count(&self, server: &ServerLocation) -> usize {
        self.inner
            .idle
            .lock()
            .map(|idle| idle.get(server).map_or(0, VecDeque::len))
            .unwrap_or(0)
    }

    /// Returns true once [`Pool::close`] was called.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(GeodeError::IllegalState(format!(
                "pool {} is closed",
                self.inner.name
            )));
        }
        Ok(())
    }

    fn timeouts(&self) -> ConnectionTimeouts {
        let pool = self.inner.config.pool();
        ConnectionTimeouts {
            connect: pool.connect_timeout(),
            read: pool.read_timeout(),
        }
    }

    /// Checks out a connection to `server`, opening one if none is idle.
    #[instrument(
        name = "pool.acquire",
        skip(self),
        fields(pool = %self.inner.name, address = %server),
        level = "debug"
    )]
    pub async fn acquire(&self, server: &ServerLocation) -> Result<PooledConnection> {
        self.ensure_open()?;
        if let Some(connection) = self.take_idle(server) {
            return Ok(PooledConnection {
                connection: Some(connection),
                pool: Arc::clone(&self.inner),
            });
        }

        self.reserve_slot(server)?;
        match self.open_connection(server).await {
            Ok(connection) => {
                if !connection.ownership().try_claim() {
                    return Err(GeodeError::IllegalState(format!(
                        "new connection {} is already claimed",
                        connection.id()
                    )));
                }
                Ok(PooledConnection {
                    connection: Some(connection),
                    pool: Arc::clone(&self.inner),
                })
            }
            Err(e) => {
                self.inner.forget(server);
                self.endpoint(server).set_disconnected();
                Err(e)
            }
        }
    }

    fn take_idle(&self, server: &ServerLocation) -> Option<Connection> {
        let pool = self.inner.config.pool();
        let mut discarded = Vec::new();
        let found = {
            let mut idle = self.inner.idle.lock().ok()?;
            let queue = idle.get_mut(server)?;
            let mut found = None;
            while let Some(connection) = queue.pop_front() {
                if connection.is_broken() || connection.has_expired(pool.max_connection_lifetime())
                {
                    discarded.push(connection);
                    continue;
                }
                if connection.ownership().try_claim() {
                    found = Some(connection);
                    break;
                }
                // held by a transaction
                queue.push_back(connection);
                break;
            }
            found
        };
        for connection in discarded {
            tracing::debug!(id = %connection.id(), address = %server, "dropping expired connection");
            self.inner.forget(server);
        }
        found
    }

    fn reserve_slot(&self, server: &ServerLocation) -> Result<()> {
        let mut open = self
            .inner
            .open
            .lock()
            .map_err(|_| GeodeError::IllegalState("pool state is poisoned".to_string()))?;
        let count = open.entry(server.clone()).or_insert(0);
        if let Some(max) = self.inner.config.pool().max_connections() {
            if *count >= max {
                return Err(GeodeError::Connection(format!(
                    "pool {} has no free connection to {} (max {})",
                    self.inner.name, server, max
                )));
            }
        }
        *count += 1;
        self.inner.total.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    async fn open_connection(&self, server: &ServerLocation) -> Result<Connection> {
        let mut settings = HandshakeSettings::data(
            self.inner.membership.clone(),
            self.inner.config.pool().connect_timeout(),
        );
        settings.conflation = ConflationOverride::from(self.inner.config.conflate_events());
        settings.security = self.inner.security.clone();

        let (connection, reply) = Connection::connect(server, &settings, self.timeouts()).await?;
        self.after_handshake(server, &reply);
        if let Some(port) = connection.local_port() {
            if let Ok(mut ports) = self.inner.bound_ports.lock() {
                if !ports.contains(&port) {
                    ports.push(port);
                }
            }
        }
        tracing::info!(
            pool = %self.inner.name,
            id = %connection.id(),
            address = %server,
            "opened pool connection"
        );
        Ok(connection)
    }

    fn after_handshake(&self, server: &ServerLocation, reply: &ServerHandshake) {
        self.endpoint(server).record_handshake(reply);
        if reply.queue_status.reports_queue_size() {
            self.inner
                .primary_queue_size
                .store(reply.queue_size, Ordering::Release);
        }
    }

    /// Opens a subscription channel to `server`.
    ///
    /// The channel is not pooled; the caller owns it for as long as it reads
    /// notifications.
    #[instrument(
        name = "pool.connect_subscription",
        skip(self),
        fields(pool = %self.inner.name, address = %server)
    )]
    pub async fn connect_subscription(
        &self,
        server: &ServerLocation,
        primary: bool,
    ) -> Result<Connection> {
        self.ensure_open()?;
        if !self.inner.config.pool().subscription_enabled() {
            return Err(GeodeError::IllegalState(format!(
                "subscriptions are not enabled on pool {}",
                self.inner.name
            )));
        }
        let settings = HandshakeSettings {
            channel: ChannelKind::Notification { primary },
            membership: self.inner.membership.clone(),
            bound_ports: self.bound_ports(),
            conflation: ConflationOverride::from(self.inner.config.conflate_events()),
            security: self.inner.security.clone(),
            timeout: self.inner.config.pool().connect_timeout(),
        };
        let (connection, reply) = Connection::connect(server, &settings, self.timeouts()).await?;
        self.after_handshake(server, &reply);
        self.add_subscription_endpoint(server, primary);
        Ok(connection)
    }

    fn add_subscription_endpoint(&self, server: &ServerLocation, primary: bool) {
        if let Ok(mut endpoints) = self.inner.subscription_endpoints.write() {
            endpoints.retain(|s| s != server);
            if primary {
                endpoints.insert(0, server.clone());
            } else {
                endpoints.push(server.clone());
            }
        }
    }

    /// Forgets `server` as a subscription endpoint.
    pub fn remove_subscription_endpoint(&self, server: &ServerLocation) {
        if let Ok(mut endpoints) = self.inner.subscription_endpoints.write() {
            endpoints.retain(|s| s != server);
        }
    }

    /// Returns the servers holding a subscription channel, primary first.
    pub fn subscription_endpoints(&self) -> Vec<ServerLocation> {
        self.inner
            .subscription_endpoints
            .read()
            .map(|endpoints| endpoints.clone())
            .unwrap_or_default()
    }

    fn primary_subscription_endpoint(&self) -> Result<ServerLocation> {
        self.subscription_endpoints().into_iter().next().ok_or_else(|| {
            GeodeError::IllegalState(format!(
                "pool {} has no subscription endpoint",
                self.inner.name
            ))
        })
    }

    async fn send_cq_to<H>(
        &self,
        request: &RequestMessage,
        server: &ServerLocation,
        handler: H,
    ) -> Result<H>
    where
        H: ChunkHandler + 'static,
    {
        let reply = ChunkedReply::new(request.message_type(), handler);
        self.send_chunked_to_server(request, server, reply)
            .await?
            .finish()
    }

    fn max_attempts(&self) -> usize {
        match self.inner.config.pool().retry_attempts() {
            Some(retries) => retries as usize + 1,
            None => self.servers().len().max(1),
        }
    }

    fn next_server(
        &self,
        attempt: usize,
        pinned: Option<&ServerLocation>,
        tried: &HashSet<ServerLocation>,
    ) -> Option<ServerLocation> {
        if attempt == 0 {
            if let Some(server) = pinned {
                return Some(server.clone());
            }
        }
        let candidates: Vec<ServerLocation> = self
            .servers()
            .iter()
            .filter(|s| !tried.contains(*s))
            .cloned()
            .collect();
        if candidates.is_empty() {
            return self.inner.load_balancer.select(self.servers()).cloned();
        }
        self.inner.load_balancer.select(&candidates).cloned()
    }

    async fn before_retry(&self, request: &mut RequestMessage, attempt: usize) {
        request.update_header_for_retry();
        let backoff = self.inner.config.retry().backoff(attempt as u32 - 1);
        if !backoff.is_zero() {
            tokio::time::sleep(backoff).await;
        }
    }

    /// Sends a request and reads its unchunked reply.
    ///
    /// The first attempt goes to `server` when given, otherwise to the load
    /// balancer's pick. Connection failures and timeouts are retried on
    /// servers not tried yet, with the retry bit set, up to the configured
    /// attempt count.
    #[instrument(
        name = "pool.send_sync_request",
        skip(self, request),
        fields(pool = %self.inner.name, request = %request.message_type()),
        level = "debug"
    )]
    pub async fn send_sync_request(
        &self,
        mut request: RequestMessage,
        server: Option<&ServerLocation>,
    ) -> Result<RawMessage> {
        let attempts = self.max_attempts();
        let mut tried = HashSet::new();
        let mut last_error = None;

        for attempt in 0..attempts {
            let Some(target) = self.next_server(attempt, server, &tried) else {
                break;
            };
            if attempt > 0 {
                self.before_retry(&mut request, attempt).await;
            }
            match self.send_request_to_server(&request, &target).await {
                Ok(reply) => return Ok(reply),
                Err(e) if e.is_retryable() => {
                    tracing::warn!(
                        address = %target,
                        attempt = attempt + 1,
                        error = %e,
                        "request failed, trying another server"
                    );
                    tried.insert(target);
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| {
            GeodeError::Connection(format!("pool {} has no servers", self.inner.name))
        }))
    }

    /// Sends a request to `server` only and reads its unchunked reply.
    pub async fn send_request_to_server(
        &self,
        request: &RequestMessage,
        server: &ServerLocation,
    ) -> Result<RawMessage> {
        let mut connection = self.acquire(server).await?;
        connection.send_request(request).await
    }

    /// Sends a request whose reply arrives in chunks.
    ///
    /// Each attempt feeds a fresh handler from `make_handler`, so a retried
    /// request never mixes results of a failed attempt into its own.
    #[instrument(
        name = "pool.send_sync_request_chunked",
        skip(self, request, make_handler),
        fields(pool = %self.inner.name, request = %request.message_type()),
        level = "debug"
    )]
    pub async fn send_sync_request_chunked<H, F>(
        &self,
        mut request: RequestMessage,
        server: Option<&ServerLocation>,
        make_handler: F,
    ) -> Result<ChunkedReply<H>>
    where
        H: ChunkHandler + 'static,
        F: Fn() -> H + Send,
    {
        let attempts = self.max_attempts();
        let kind = request.message_type();
        let mut tried = HashSet::new();
        let mut last_error = None;

        for attempt in 0..attempts {
            let Some(target) = self.next_server(attempt, server, &tried) else {
                break;
            };
            if attempt > 0 {
                self.before_retry(&mut request, attempt).await;
                if kind.resets_chunk_handler() {
                    tracing::debug!(request = %kind, "discarding results of the failed attempt");
                }
            }
            let reply = ChunkedReply::new(kind, make_handler());
            match self.send_chunked_to_server(&request, &target, reply).await {
                Ok(reply) => return Ok(reply),
                Err(e) if e.is_retryable() => {
                    tracing::warn!(
                        address = %target,
                        attempt = attempt + 1,
                        error = %e,
                        "chunked request failed, trying another server"
                    );
                    tried.insert(target);
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| {
            GeodeError::Connection(format!("pool {} has no servers", self.inner.name))
        }))
    }

    /// Sends a chunked request to `server` only.
    pub async fn send_chunked_to_server<H>(
        &self,
        request: &RequestMessage,
        server: &ServerLocation,
        reply: ChunkedReply<H>,
    ) -> Result<ChunkedReply<H>>
    where
        H: ChunkHandler + 'static,
    {
        let mut connection = self.acquire(server).await?;
        connection.send_request_chunked(request, reply).await
    }

    /// Closes idle connections that expired or sat unused for longer than
    /// the idle timeout, keeping `min_connections` per server.
    ///
    /// Returns the number of connections closed.
    #[instrument(name = "pool.evict", skip(self), fields(pool = %self.inner.name), level = "debug")]
    pub async fn evict_idle(&self) -> usize {
        let pool = self.inner.config.pool();
        let keep = pool.min_connections();
        let mut evicted = Vec::new();

        if let Ok(mut idle) = self.inner.idle.lock() {
            for queue in idle.values_mut() {
                let mut retained = VecDeque::with_capacity(queue.len());
                while let Some(connection) = queue.pop_front() {
                    let expired = connection.has_expired(pool.max_connection_lifetime());
                    let surplus = retained.len() >= keep && connection.is_idle(pool.idle_timeout());
                    if expired || surplus {
                        evicted.push(connection);
                    } else {
                        retained.push_back(connection);
                    }
                }
                *queue = retained;
            }
        }

        let count = evicted.len();
        for connection in &evicted {
            self.inner.forget(connection.server());
        }
        let grid_client = self.inner.config.grid_client();
        join_all(evicted.into_iter().map(|c| c.close(false, grid_client))).await;
        if count > 0 {
            tracing::debug!(count = count, "evicted idle connections");
        }
        count
    }

    /// Starts the background task that evicts idle connections.
    ///
    /// Does nothing when both the idle timeout and the connection lifetime
    /// are disabled.
    pub fn start_maintenance(&self) {
        let pool = self.inner.config.pool();
        let period = [pool.idle_timeout(), pool.max_connection_lifetime()]
            .into_iter()
            .filter(|d| !d.is_zero())
            .min();
        let Some(period) = period else {
            return;
        };
        let period = period.max(Duration::from_millis(100));

        let this = self.clone();
        let mut shutdown_rx = self.inner.shutdown.subscribe();
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        this.evict_idle().await;
                    }
                    _ = shutdown_rx.changed() => {
                        tracing::debug!(pool = %this.inner.name, "pool maintenance stopped");
                        break;
                    }
                }
            }
        });
    }

    /// Closes every idle connection and refuses further checkouts.
    ///
    /// Checked-out connections are discarded when their guards drop.
    #[instrument(name = "pool.close", skip(self), fields(pool = %self.inner.name))]
    pub async fn close(&self, keep_alive: bool) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.inner.shutdown.send(true);

        let connections: Vec<Connection> = match self.inner.idle.lock() {
            Ok(mut idle) => idle.drain().flat_map(|(_, q)| q.into_iter()).collect(),
            Err(_) => Vec::new(),
        };
        for connection in &connections {
            self.inner.forget(connection.server());
        }
        let grid_client = self.inner.config.grid_client();
        let count = connections.len();
        join_all(connections.into_iter().map(|c| c.close(keep_alive, grid_client))).await;
        tracing::info!(pool = %self.inner.name, closed = count, "pool closed");
    }
}

#[async_trait]
impl MetadataFetcher for Pool {
    async fn fetch_partition_attributes(&self, region: &str) -> Result<Option<PartitionAttributes>> {
        let request = requests::get_client_partition_attributes(region, HeaderOptions::default())?;
        let raw = self.send_sync_request(request, None).await?;
        match decode_reply(MessageType::GetClientPartitionAttributes, &raw)?.into_result()? {
            Reply::PartitionAttributes(attributes) if attributes.total_buckets > 0 => {
                Ok(Some(attributes))
            }
            Reply::PartitionAttributes(_) => Ok(None),
            other => Err(GeodeError::Protocol(format!(
                "unexpected reply to partition attributes request: {:?}",
                other
            ))),
        }
    }

    async fn fetch_pr_metadata(&self, region: &str) -> Result<Vec<Vec<BucketServerLocation>>> {
        let request = requests::get_client_pr_metadata(region, HeaderOptions::default())?;
        let raw = self.send_sync_request(request, None).await?;
        match decode_reply(MessageType::GetClientPrMetadata, &raw)?.into_result()? {
            Reply::PrMetadata(locations) => Ok(locations),
            other => Err(GeodeError::Protocol(format!(
                "unexpected reply to metadata request: {:?}",
                other
            ))),
        }
    }

    fn server_group(&self) -> Option<String> {
        self.inner.config.pool().server_group().map(str::to_string)
    }

    fn bucket_wait_timeout(&self) -> Duration {
        self.inner.config.pool().bucket_wait_timeout()
    }
}

#[async_trait]
impl CqTransport for Pool {
    fn pool_name(&self) -> &str {
        self.name()
    }

    fn subscription_enabled(&self) -> bool {
        self.inner.config.pool().subscription_enabled()
    }

    fn durable_client_id(&self) -> Option<String> {
        self.inner.config.durable().id().map(str::to_string)
    }

    fn header_options(&self) -> HeaderOptions {
        Pool::header_options(self)
    }

    fn subscription_lost(&self, server: &ServerLocation) {
        self.remove_subscription_endpoint(server);
    }

    async fn send_cq_request(
        &self,
        request: RequestMessage,
        server: Option<&ServerLocation>,
    ) -> Result<()> {
        if let Some(server) = server {
            return self.send_cq_to(&request, server, NoResultHandler).await.map(|_| ());
        }
        let endpoints = self.subscription_endpoints();
        let Some((primary, secondaries)) = endpoints.split_first() else {
            return Err(GeodeError::IllegalState(format!(
                "pool {} has no subscription endpoint for {}",
                self.inner.name,
                request.message_type()
            )));
        };
        self.send_cq_to(&request, primary, NoResultHandler).await?;
        for secondary in secondaries {
            if let Err(e) = self.send_cq_to(&request, secondary, NoResultHandler).await {
                tracing::warn!(
                    address = %secondary,
                    request = %request.message_type(),
                    error = %e,
                    "cq request failed on secondary subscription endpoint"
                );
            }
        }
        Ok(())
    }

    async fn send_cq_request_with_results(&self, request: RequestMessage) -> Result<CqResults> {
        let primary = self.primary_subscription_endpoint()?;
        self.send_cq_to(&request, &primary, QueryResultCollector::new())
            .await?
            .into_results()
    }

    async fn fetch_durable_cqs(&self, request: RequestMessage) -> Result<Vec<String>> {
        let primary = self.primary_subscription_endpoint()?;
        Ok(self
            .send_cq_to(&request, &primary, DurableCqListCollector::new())
            .await?
            .into_names())
    }
}
