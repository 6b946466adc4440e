//! Geode client entry point.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::future::join_all;
use geode_core::protocol::{
    decode_reply, requests,
    requests::{FunctionCall, FunctionFilter, PutPayload, DEFAULT_REPLY_TIMEOUT},
    BulkEntry, BulkOpCollector, EventIdSource, FunctionResult, FunctionResultCollector,
    GetAllCollector, GetValue, QueryResultCollector, QueryResults, Reply, RequestMessage,
    BULK_FLAG_EMPTY, FUNCTION_HAS_RESULT, FUNCTION_OPTIMIZE_FOR_WRITE,
};
use geode_core::{
    BucketServerLocation, CacheableValue, GeodeError, PartitionResolver, Result, ServerLocation,
};

use crate::config::ClientConfig;
use crate::connection::{NotificationHandler, Pool, SubscriptionChannel};
use crate::cq::CqService;
use crate::metadata::{ClientMetadataService, MetadataFetcher};

/// Outcome of a bulk get.
///
/// Keys that failed are reported next to the values that were fetched
/// instead of failing the whole call.
#[derive(Debug, Default)]
pub struct GetAllResult {
    /// Fetched entries; `None` for keys without a value.
    pub values: Vec<(CacheableValue, Option<CacheableValue>)>,
    /// Keys whose fetch failed, with the error.
    pub failures: HashMap<CacheableValue, GeodeError>,
}

/// Outcome of a bulk put or bulk destroy.
#[derive(Debug, Default)]
pub struct BulkResult {
    /// Keys whose server request was applied.
    pub succeeded: Vec<CacheableValue>,
    /// Keys whose server request failed, with the error.
    pub failures: HashMap<CacheableValue, GeodeError>,
}

/// How a function runs on the servers.
#[derive(Debug, Clone, Copy)]
pub struct FunctionOptions {
    /// Collect the values the function sends back.
    pub has_result: bool,
    /// Run on the primary copy of each bucket.
    pub optimize_for_write: bool,
    /// Server-side execution timeout.
    pub timeout: Duration,
}

impl Default for FunctionOptions {
    fn default() -> Self {
        Self {
            has_result: true,
            optimize_for_write: false,
            timeout: DEFAULT_REPLY_TIMEOUT,
        }
    }
}

impl FunctionOptions {
    fn flags(&self) -> u8 {
        let mut flags = 0;
        if self.has_result {
            flags |= FUNCTION_HAS_RESULT;
        }
        if self.optimize_for_write {
            flags |= FUNCTION_OPTIMIZE_FOR_WRITE;
        }
        flags
    }
}

/// Work assigned to one server by a single-hop function execution.
enum FunctionTarget {
    Keys(Vec<CacheableValue>),
    Buckets(Vec<i32>),
}

type KeyGroups = Vec<(Option<ServerLocation>, Vec<CacheableValue>)>;

/// A connection to a Geode distributed system.
///
/// The client owns one connection pool, the partition metadata service
/// used for single-hop routing, and the continuous query service. When the
/// pool has subscriptions enabled, a subscription channel to the first
/// reachable server feeds CQ events.
///
/// # Example
///
/// ```ignore
/// use geode_client::{ClientConfig, GeodeClient};
/// use geode_client::core::{CacheableValue, ServerLocation};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = ClientConfig::builder()
///         .pool(|p| p.add_server(ServerLocation::new("localhost", 40404)))
///         .build()?;
///
///     let client = GeodeClient::connect(config).await?;
///     let key = CacheableValue::String("k1".into());
///     client.put("/Portfolios", &key, &CacheableValue::Int(7)).await?;
///     let value = client.get("/Portfolios", &key).await?;
///
///     client.shutdown().await;
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct GeodeClient {
    pool: Pool,
    metadata: Arc<ClientMetadataService>,
    cq_service: CqService,
    subscription: Mutex<Option<Arc<SubscriptionChannel>>>,
    event_ids: EventIdSource,
}

impl GeodeClient {
    /// Creates a pool from `config` and connects.
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        let pool = Pool::builder(Arc::new(config)).build()?;
        Self::with_pool(pool).await
    }

    /// Connects through an already built pool.
    ///
    /// Starts pool maintenance and the metadata refresh worker. With
    /// subscriptions enabled, opens the subscription channel, failing if no
    /// server accepts it.
    pub async fn with_pool(pool: Pool) -> Result<Self> {
        pool.start_maintenance();

        let fetcher: Arc<dyn MetadataFetcher> = Arc::new(pool.clone());
        let metadata = Arc::new(ClientMetadataService::new(fetcher));
        metadata.start();

        let cq_service = CqService::new(Arc::new(pool.clone()));
        let client = Self {
            pool,
            metadata,
            cq_service,
            subscription: Mutex::new(None),
            event_ids: EventIdSource::new(),
        };

        if client.pool.config().pool().subscription_enabled() {
            client.open_subscription().await?;
        }

        tracing::info!(
            pool = %client.pool.name(),
            servers = client.pool.servers().len(),
            "connected to Geode distributed system"
        );
        Ok(client)
    }

    async fn open_subscription(&self) -> Result<ServerLocation> {
        let mut last_error = None;
        for server in self.pool.servers().to_vec() {
            match self.pool.connect_subscription(&server, true).await {
                Ok(connection) => {
                    let handler: Arc<dyn NotificationHandler> = Arc::new(self.cq_service.clone());
                    let channel = SubscriptionChannel::spawn(connection, handler);
                    *self.subscription.lock().unwrap_or_else(PoisonError::into_inner) =
                        Some(Arc::new(channel));
                    self.cq_service
                        .invoke_cq_connected_listeners(self.pool.name(), true);
                    tracing::info!(address = %server, "subscription channel open");
                    return Ok(server);
                }
                Err(e) => {
                    tracing::warn!(address = %server, error = %e, "subscription connect failed");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| {
            GeodeError::Connection("no server accepted the subscription channel".to_string())
        }))
    }

    /// Returns the client configuration.
    pub fn config(&self) -> &ClientConfig {
        self.pool.config()
    }

    /// Returns the connection pool.
    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Returns the partition metadata service.
    pub fn metadata_service(&self) -> &ClientMetadataService {
        &self.metadata
    }

    /// Returns the continuous query service.
    pub fn cq_service(&self) -> &CqService {
        &self.cq_service
    }

    /// Installs the partition resolver used to route keys of `region`.
    pub fn set_partition_resolver(&self, region: &str, resolver: Arc<dyn PartitionResolver>) {
        self.metadata.set_partition_resolver(region, resolver);
    }

    fn single_hop(&self) -> bool {
        self.pool.config().pool().single_hop_enabled()
    }

    /// Returns the server to send a single-key request to, if the region's
    /// metadata knows one.
    ///
    /// Missing metadata and buckets marked for timeout fall back to the
    /// load balancer. A partition resolver that cannot route the key fails
    /// the request.
    fn route(
        &self,
        region: &str,
        key: &CacheableValue,
        primary: bool,
    ) -> Result<Option<BucketServerLocation>> {
        if !self.single_hop() {
            return Ok(None);
        }
        match self.metadata.server_for_key(region, key, None, primary)? {
            Some(location)
                if self
                    .metadata
                    .is_bucket_marked_for_timeout(region, location.bucket_id()) =>
            {
                tracing::debug!(
                    region = %region,
                    bucket = location.bucket_id(),
                    "bucket marked for timeout, using load balancer"
                );
                Ok(None)
            }
            location => Ok(location),
        }
    }

    fn mark_timed_out(&self, region: &str, key: &CacheableValue, primary: bool) {
        let marked = if primary {
            self.metadata.mark_primary_bucket_for_timeout(region, key, None)
        } else {
            self.metadata
                .mark_primary_bucket_for_timeout_but_look_secondary(region, key, None)
        };
        if let Err(e) = marked {
            tracing::warn!(region = %region, error = %e, "cannot mark bucket for timeout");
        }
    }

    async fn send_routed(
        &self,
        region: &str,
        key: &CacheableValue,
        request: RequestMessage,
    ) -> Result<Reply> {
        let kind = request.message_type();
        let target = self.route(region, key, kind.is_for_primary())?;
        let server = target.as_ref().map(BucketServerLocation::server_location);
        let raw = match self.pool.send_sync_request(request, server).await {
            Ok(raw) => raw,
            Err(e @ GeodeError::Timeout(_)) if target.is_some() => {
                self.mark_timed_out(region, key, kind.is_for_primary());
                return Err(e);
            }
            Err(e) => return Err(e),
        };
        let reply = decode_reply(kind, &raw)?.into_result()?;
        self.metadata.on_metadata_hint(region, reply.metadata_hint());
        Ok(reply)
    }

    async fn send_unrouted(&self, request: RequestMessage) -> Result<Reply> {
        let kind = request.message_type();
        let raw = self.pool.send_sync_request(request, None).await?;
        decode_reply(kind, &raw)?.into_result()
    }

    /// Fetches the value of `key`.
    #[tracing::instrument(skip(self, key), fields(region = %region))]
    pub async fn get(&self, region: &str, key: &CacheableValue) -> Result<Option<CacheableValue>> {
        let request = requests::get(region, key, None, self.pool.header_options())?;
        get_value(self.send_routed(region, key, request).await?)
    }

    /// Stores `value` under `key` and returns the previous value when the
    /// server sends it.
    #[tracing::instrument(skip(self, key, value), fields(region = %region))]
    pub async fn put(
        &self,
        region: &str,
        key: &CacheableValue,
        value: &CacheableValue,
    ) -> Result<Option<CacheableValue>> {
        let request = requests::put(
            region,
            key,
            PutPayload::Value(value),
            None,
            &self.event_ids.next_id(),
            self.pool.header_options(),
        )?;
        match self.send_routed(region, key, request).await? {
            Reply::Put(response) => Ok(response.old_value),
            other => Err(unexpected("put", &other)),
        }
    }

    /// Removes `key`. Returns false if the entry did not exist.
    #[tracing::instrument(skip(self, key), fields(region = %region))]
    pub async fn destroy(&self, region: &str, key: &CacheableValue) -> Result<bool> {
        let request = requests::destroy(
            region,
            key,
            None,
            None,
            &self.event_ids.next_id(),
            self.pool.header_options(),
        )?;
        match self.send_routed(region, key, request).await? {
            Reply::Destroy(response) => Ok(!response.entry_not_found),
            other => Err(unexpected("destroy", &other)),
        }
    }

    /// Marks `key` invalid on the server.
    #[tracing::instrument(skip(self, key), fields(region = %region))]
    pub async fn invalidate(&self, region: &str, key: &CacheableValue) -> Result<()> {
        let request = requests::invalidate(
            region,
            key,
            None,
            &self.event_ids.next_id(),
            self.pool.header_options(),
        )?;
        match self.send_routed(region, key, request).await? {
            Reply::Invalidate(_) => Ok(()),
            other => Err(unexpected("invalidate", &other)),
        }
    }

    /// Returns true if the server holds an entry for `key`.
    pub async fn contains_key(&self, region: &str, key: &CacheableValue) -> Result<bool> {
        self.contains(region, key, false).await
    }

    /// Returns true if the server holds a non-null value for `key`.
    pub async fn contains_value_for_key(
        &self,
        region: &str,
        key: &CacheableValue,
    ) -> Result<bool> {
        self.contains(region, key, true).await
    }

    async fn contains(
        &self,
        region: &str,
        key: &CacheableValue,
        value_for_key: bool,
    ) -> Result<bool> {
        let request =
            requests::contains_key(region, key, value_for_key, None, self.pool.header_options())?;
        match self.send_routed(region, key, request).await? {
            Reply::ContainsKey(found) => Ok(found),
            other => Err(unexpected("containsKey", &other)),
        }
    }

    /// Returns the number of entries the servers hold for `region`.
    pub async fn size(&self, region: &str) -> Result<i32> {
        let request = requests::size(region, self.pool.header_options())?;
        match self.send_unrouted(request).await? {
            Reply::Object {
                value: CacheableValue::Int(size),
                ..
            } => Ok(size),
            other => Err(unexpected("size", &other)),
        }
    }

    /// Removes every entry of `region` on the servers.
    #[tracing::instrument(skip(self))]
    pub async fn clear(&self, region: &str) -> Result<()> {
        let request = requests::clear_region(
            region,
            None,
            None,
            &self.event_ids.next_id(),
            self.pool.header_options(),
        )?;
        self.send_unrouted(request).await.map(|_| ())
    }

    /// Destroys `region` on the servers.
    #[tracing::instrument(skip(self))]
    pub async fn destroy_region(&self, region: &str) -> Result<()> {
        let request = requests::destroy_region(
            region,
            None,
            None,
            &self.event_ids.next_id(),
            self.pool.header_options(),
        )?;
        self.send_unrouted(request).await.map(|_| ())
    }

    /// Splits `keys` into one group per hosting server.
    ///
    /// Keys without a known location are spread over the servers found;
    /// without metadata every key lands in one group for the load balancer.
    fn group_keys(
        &self,
        region: &str,
        keys: &[CacheableValue],
        primary: bool,
    ) -> Result<KeyGroups> {
        if !self.single_hop() {
            return Ok(vec![(None, keys.to_vec())]);
        }
        Ok(match self.metadata.servers_for_keys(region, keys, primary)? {
            Some(by_server) => by_server
                .into_iter()
                .map(|(server, keys)| (Some(server), keys))
                .collect(),
            None => vec![(None, keys.to_vec())],
        })
    }

    /// Fetches several keys with one request per hosting server.
    ///
    /// A key the server could not read is reported in
    /// [`GetAllResult::failures`]; when a whole server request fails, each
    /// of its keys carries that error.
    #[tracing::instrument(skip(self, keys), fields(region = %region, keys = keys.len()))]
    pub async fn get_all(&self, region: &str, keys: &[CacheableValue]) -> Result<GetAllResult> {
        let mut result = GetAllResult::default();
        if keys.is_empty() {
            return Ok(result);
        }
        let groups = self.group_keys(region, keys, false)?;
        let fetches = groups.into_iter().map(|(server, keys)| async move {
            let outcome = self.get_all_from(region, &keys, server.as_ref()).await;
            (keys, outcome)
        });

        for (keys, outcome) in join_all(fetches).await {
            match outcome {
                Ok(entries) => {
                    for (key, entry) in entries {
                        match entry {
                            BulkEntry::Value(CacheableValue::Null) | BulkEntry::NotFound => {
                                result.values.push((key, None));
                            }
                            BulkEntry::Value(value) => result.values.push((key, Some(value))),
                            BulkEntry::Failed(e) => {
                                result.failures.insert(key, e);
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(region = %region, keys = keys.len(), error = %e, "getAll request failed");
                    for key in keys {
                        result.failures.insert(key, e.clone());
                    }
                }
            }
        }
        Ok(result)
    }

    async fn get_all_from(
        &self,
        region: &str,
        keys: &[CacheableValue],
        server: Option<&ServerLocation>,
    ) -> Result<Vec<(CacheableValue, BulkEntry)>> {
        let request = requests::get_all(region, keys, None, self.pool.header_options())?;
        let requested = keys.to_vec();
        let reply = self
            .pool
            .send_sync_request_chunked(request, server, move || {
                GetAllCollector::new(requested.clone())
            })
            .await?;
        Ok(reply.finish()?.into_entries())
    }

    /// Stores several entries with one request per primary server.
    #[tracing::instrument(skip(self, entries), fields(region = %region, entries = entries.len()))]
    pub async fn put_all(
        &self,
        region: &str,
        entries: &[(CacheableValue, CacheableValue)],
    ) -> Result<BulkResult> {
        if entries.is_empty() {
            return Err(GeodeError::IllegalArgument("putAll with no entries".into()));
        }
        let values: HashMap<&CacheableValue, &CacheableValue> =
            entries.iter().map(|(k, v)| (k, v)).collect();
        let keys: Vec<CacheableValue> = entries.iter().map(|(k, _)| k.clone()).collect();
        let groups = self.group_keys(region, &keys, true)?;

        let writes = groups.into_iter().map(|(server, keys)| {
            let group: Vec<(CacheableValue, CacheableValue)> = keys
                .iter()
                .filter_map(|k| values.get(k).map(|v| (k.clone(), (*v).clone())))
                .collect();
            async move {
                let first_event_id = self.event_ids.reserve(group.len().saturating_sub(1));
                let outcome = match requests::put_all(
                    region,
                    &group,
                    BULK_FLAG_EMPTY,
                    None,
                    None,
                    &first_event_id,
                    self.pool.header_options(),
                ) {
                    Ok(request) => self.send_bulk(region, request, server.as_ref()).await,
                    Err(e) => Err(e),
                };
                (keys, outcome)
            }
        });
        Ok(collect_bulk("putAll", region, join_all(writes).await))
    }

    /// Destroys several keys with one request per primary server.
    #[tracing::instrument(skip(self, keys), fields(region = %region, keys = keys.len()))]
    pub async fn remove_all(&self, region: &str, keys: &[CacheableValue]) -> Result<BulkResult> {
        if keys.is_empty() {
            return Err(GeodeError::IllegalArgument("removeAll with no keys".into()));
        }
        let groups = self.group_keys(region, keys, true)?;
        let removals = groups.into_iter().map(|(server, keys)| async move {
            let first_event_id = self.event_ids.reserve(keys.len().saturating_sub(1));
            let outcome = match requests::remove_all(
                region,
                &keys,
                BULK_FLAG_EMPTY,
                None,
                &first_event_id,
                self.pool.header_options(),
            ) {
                Ok(request) => self.send_bulk(region, request, server.as_ref()).await,
                Err(e) => Err(e),
            };
            (keys, outcome)
        });
        Ok(collect_bulk("removeAll", region, join_all(removals).await))
    }

    async fn send_bulk(
        &self,
        region: &str,
        request: RequestMessage,
        server: Option<&ServerLocation>,
    ) -> Result<()> {
        let reply = self
            .pool
            .send_sync_request_chunked(request, server, BulkOpCollector::new)
            .await?;
        if let Some(server_group_flag) = reply.finish()?.metadata_refresh() {
            self.metadata
                .enqueue_for_metadata_refresh(region, server_group_flag);
        }
        Ok(())
    }

    /// Runs a one-shot query.
    #[tracing::instrument(skip(self))]
    pub async fn query(&self, query_text: &str, timeout: Option<Duration>) -> Result<QueryResults> {
        let request = requests::query(
            query_text,
            timeout,
            &self.event_ids.next_id(),
            self.pool.header_options(),
        )?;
        let reply = self
            .pool
            .send_sync_request_chunked(request, None, QueryResultCollector::new)
            .await?;
        reply.finish()?.into_results()
    }

    /// Runs a query with bind parameters `$1`, `$2`, ...
    #[tracing::instrument(skip(self, parameters), fields(parameters = parameters.len()))]
    pub async fn query_with_parameters(
        &self,
        query_text: &str,
        parameters: &[CacheableValue],
        timeout: Option<Duration>,
    ) -> Result<QueryResults> {
        let request = requests::query_with_parameters(
            query_text,
            parameters,
            timeout.unwrap_or(DEFAULT_REPLY_TIMEOUT),
            self.pool.header_options(),
        )?;
        let reply = self
            .pool
            .send_sync_request_chunked(request, None, QueryResultCollector::new)
            .await?;
        reply.finish()?.into_results()
    }

    /// Runs a registered function on one server.
    #[tracing::instrument(skip(self, arguments))]
    pub async fn execute_function(
        &self,
        function_id: &str,
        arguments: Option<&CacheableValue>,
        options: FunctionOptions,
    ) -> Result<Vec<FunctionResult>> {
        let call = FunctionCall {
            function_id,
            arguments,
            has_result: options.flags(),
            timeout: options.timeout,
            failed_nodes: None,
        };
        let request = requests::execute_function(&call, self.pool.header_options())?;
        self.collect_function_results(request, None, options.has_result)
            .await
    }

    /// Runs a registered function on the data of `region`.
    ///
    /// A non-empty `filter` restricts the run to those routing keys. When
    /// the region's metadata is known, each hosting server gets one request
    /// limited to the keys or buckets it owns; otherwise a single server
    /// spreads the execution.
    #[tracing::instrument(skip(self, arguments, filter), fields(filter = filter.len()))]
    pub async fn execute_region_function(
        &self,
        region: &str,
        function_id: &str,
        arguments: Option<&CacheableValue>,
        filter: &[CacheableValue],
        options: FunctionOptions,
    ) -> Result<Vec<FunctionResult>> {
        let call = FunctionCall {
            function_id,
            arguments,
            has_result: options.flags(),
            timeout: options.timeout,
            failed_nodes: None,
        };

        if self.single_hop() {
            let targets: Option<Vec<(ServerLocation, FunctionTarget)>> = if filter.is_empty() {
                self.metadata
                    .servers_for_all_buckets(region, options.optimize_for_write)
                    .map(|by_server| {
                        by_server
                            .into_iter()
                            .map(|(server, buckets)| (server, bucket_target(buckets)))
                            .collect()
                    })
            } else {
                self.metadata
                    .servers_for_routing_keys(region, filter, options.optimize_for_write)?
                    .map(|by_server| {
                        by_server
                            .into_iter()
                            .map(|(server, keys)| (server, FunctionTarget::Keys(keys)))
                            .collect()
                    })
            };
            if let Some(targets) = targets {
                return self
                    .execute_single_hop(region, &call, targets, options.has_result)
                    .await;
            }
        }

        let request = requests::execute_region_function(
            region,
            &call,
            filter,
            false,
            self.pool.header_options(),
        )?;
        self.collect_function_results(request, None, options.has_result)
            .await
    }

    async fn execute_single_hop(
        &self,
        region: &str,
        call: &FunctionCall<'_>,
        targets: Vec<(ServerLocation, FunctionTarget)>,
        has_result: bool,
    ) -> Result<Vec<FunctionResult>> {
        tracing::debug!(region = %region, servers = targets.len(), "single-hop function execution");
        let runs = targets.into_iter().map(|(server, target)| async move {
            let filter = match &target {
                FunctionTarget::Keys(keys) => FunctionFilter::Keys(keys),
                FunctionTarget::Buckets(buckets) => FunctionFilter::Buckets(buckets),
            };
            let request = requests::execute_region_function_single_hop(
                region,
                call,
                filter,
                self.pool.header_options(),
            )?;
            self.collect_function_results(request, Some(&server), has_result)
                .await
        });

        let mut results = Vec::new();
        for outcome in join_all(runs).await {
            results.extend(outcome?);
        }
        Ok(results)
    }

    async fn collect_function_results(
        &self,
        request: RequestMessage,
        server: Option<&ServerLocation>,
        has_result: bool,
    ) -> Result<Vec<FunctionResult>> {
        let reply = self
            .pool
            .send_sync_request_chunked(request, server, move || {
                FunctionResultCollector::new(has_result)
            })
            .await?;
        Ok(reply.finish()?.into_results())
    }

    /// Reopens the subscription channel if it stopped and registers the
    /// running continuous queries on the server that accepted it.
    ///
    /// Does nothing while the current channel is reading.
    pub async fn recover_subscription(&self) -> Result<()> {
        if !self.pool.config().pool().subscription_enabled() {
            return Err(GeodeError::IllegalState(
                "subscriptions are not enabled".to_string(),
            ));
        }
        let running = self
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|channel| channel.is_running());
        if running {
            return Ok(());
        }
        let server = self.open_subscription().await?;
        let failed = self.cq_service.execute_on_endpoint(&server).await;
        if failed > 0 {
            tracing::warn!(address = %server, failed = failed, "continuous queries not registered");
        }
        Ok(())
    }

    /// Registers the running continuous queries on the servers again, as
    /// needed after the subscription failed over.
    pub async fn execute_cqs_after_failover(&self) {
        self.cq_service.execute_all_client_cqs(true).await;
    }

    /// Closes continuous queries, the subscription channel, the metadata
    /// worker and the pool.
    ///
    /// A durable client configured to keep its queue alive closes durable
    /// queries locally and asks the server to keep its queue.
    pub async fn shutdown(&self) {
        let keep_alive = self.pool.config().durable().keep_alive();
        self.cq_service.close_cq_service(keep_alive).await;

        let channel = self
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(channel) = channel {
            channel.stop(keep_alive).await;
        }

        self.metadata.close().await;
        self.pool.close(keep_alive).await;
        tracing::info!(pool = %self.pool.name(), "client shut down");
    }
}

fn get_value(reply: Reply) -> Result<Option<CacheableValue>> {
    match reply {
        Reply::Get(response) => Ok(match response.value {
            GetValue::Value(value) => Some(value),
            GetValue::Invalid | GetValue::NotPresent => None,
        }),
        Reply::Object { value, .. } => Ok(Some(value)),
        other => Err(unexpected("get", &other)),
    }
}

fn collect_bulk(
    operation: &str,
    region: &str,
    outcomes: Vec<(Vec<CacheableValue>, Result<()>)>,
) -> BulkResult {
    let mut result = BulkResult::default();
    for (keys, outcome) in outcomes {
        match outcome {
            Ok(()) => result.succeeded.extend(keys),
            Err(e) => {
                tracing::warn!(
                    operation = operation,
                    region = %region,
                    keys = keys.len(),
                    error = %e,
                    "bulk request failed"
                );
                for key in keys {
                    result.failures.insert(key, e.clone());
                }
            }
        }
    }
    result
}

fn bucket_target(buckets: BTreeSet<i32>) -> FunctionTarget {
    FunctionTarget::Buckets(buckets.into_iter().collect())
}

fn unexpected(operation: &str, reply: &Reply) -> GeodeError {
    GeodeError::Protocol(format!("unexpected reply to {}: {:?}", operation, reply))
}
