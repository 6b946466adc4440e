//! Per-region routing metadata and its background refresh.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use geode_core::partition_resolver::{resolve_partition_name, resolve_routing_object};
use geode_core::protocol::PrMetadataHint;
use geode_core::{
    BucketServerLocation, CacheableValue, PartitionResolver, Result, RoutingContext,
    ServerLocation,
};
use rand::seq::SliceRandom;
use rand::Rng;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::instrument;

use super::bucket_status::PrBucketStatus;
use super::client_metadata::{bucket_for_hash, ClientMetadata};
use super::MetadataFetcher;

/// Keys grouped by the server that hosts them.
pub type ServerToKeys = HashMap<ServerLocation, Vec<CacheableValue>>;

/// Buckets grouped by the server chosen to serve them.
pub type ServerToBuckets = HashMap<ServerLocation, BTreeSet<i32>>;

struct ServiceInner {
    fetcher: Arc<dyn MetadataFetcher>,
    regions: RwLock<HashMap<String, Arc<ClientMetadata>>>,
    bucket_status: RwLock<HashMap<String, Arc<PrBucketStatus>>>,
    resolvers: RwLock<HashMap<String, Arc<dyn PartitionResolver>>>,
    pending: Mutex<HashSet<String>>,
    queue: mpsc::UnboundedSender<String>,
    shutdown: watch::Sender<bool>,
}

/// Tracks where the buckets of partitioned regions live and routes keys to
/// the servers hosting them.
///
/// Routing lookups read the current snapshot of a region under a shared
/// lock; refreshes build a new snapshot and swap it in under the exclusive
/// lock. A region without metadata routes nowhere and schedules a refresh,
/// which a single background worker performs.
pub struct ClientMetadataService {
    inner: Arc<ServiceInner>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for ClientMetadataService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientMetadataService")
            .field("regions", &self.regions())
            .finish()
    }
}

impl ClientMetadataService {
    /// Creates a service fetching metadata through `fetcher`.
    ///
    /// Refresh requests queue up until [`start`](Self::start) is called.
    pub fn new(fetcher: Arc<dyn MetadataFetcher>) -> Self {
        let (queue, receiver) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(ServiceInner {
                fetcher,
                regions: RwLock::new(HashMap::new()),
                bucket_status: RwLock::new(HashMap::new()),
                resolvers: RwLock::new(HashMap::new()),
                pending: Mutex::new(HashSet::new()),
                queue,
                shutdown,
            }),
            receiver: Mutex::new(Some(receiver)),
            worker: Mutex::new(None),
        }
    }

    /// Spawns the refresh worker. Calling it again has no effect.
    pub fn start(&self) {
        let receiver = self
            .receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(mut receiver) = receiver else {
            return;
        };

        let inner = Arc::clone(&self.inner);
        let mut shutdown_rx = self.inner.shutdown.subscribe();
        let handle = tokio::spawn(async move {
            tracing::info!("metadata refresh worker started");
            loop {
                tokio::select! {
                    next = receiver.recv() => {
                        let Some(first) = next else {
                            break;
                        };
                        let mut batch = vec![first];
                        while let Ok(region) = receiver.try_recv() {
                            batch.push(region);
                        }
                        batch.dedup();
                        for region in batch {
                            inner
                                .pending
                                .lock()
                                .unwrap_or_else(PoisonError::into_inner)
                                .remove(&region);
                            if let Err(e) = inner.refresh(&region).await {
                                tracing::warn!(
                                    region = %region,
                                    error = %e,
                                    "metadata refresh failed"
                                );
                            }
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        break;
                    }
                }
            }
            tracing::info!("metadata refresh worker stopped");
        });
        *self.worker.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }

    /// Stops the refresh worker and waits for it to finish.
    pub async fn close(&self) {
        let _ = self.inner.shutdown.send(true);
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Installs the partition resolver used to route keys of `region`.
    pub fn set_partition_resolver(&self, region: &str, resolver: Arc<dyn PartitionResolver>) {
        self.inner
            .resolvers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(region.to_string(), resolver);
    }

    /// Returns the current snapshot of `region`.
    pub fn metadata_for(&self, region: &str) -> Option<Arc<ClientMetadata>> {
        self.inner.metadata(region)
    }

    /// Returns the regions with metadata, sorted.
    pub fn regions(&self) -> Vec<String> {
        let mut regions: Vec<String> = self
            .inner
            .regions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        regions.sort();
        regions
    }

    /// Schedules a refresh of `region`.
    ///
    /// A region already waiting for a refresh is not queued twice. A reply
    /// flagged as coming from this client's own server group does not
    /// trigger a refresh when the pool is bound to a server group.
    pub fn enqueue_for_metadata_refresh(&self, region: &str, server_group_flag: i8) {
        self.inner.enqueue(region, server_group_flag);
    }

    /// Schedules a refresh if `hint` reports a network hop.
    pub fn on_metadata_hint(&self, region: &str, hint: Option<PrMetadataHint>) {
        if let Some(hint) = hint.filter(PrMetadataHint::is_network_hop) {
            self.enqueue_for_metadata_refresh(region, hint.server_group_flag.unwrap_or(0));
        }
    }

    /// Fetches fresh metadata for `region` and replaces its snapshot.
    pub async fn refresh_metadata(&self, region: &str) -> Result<()> {
        self.inner.refresh(region).await
    }

    /// Returns the server hosting the bucket of `key`.
    ///
    /// With `primary` set the bucket's primary is returned, unless the
    /// bucket recently timed out on its primary, in which case a secondary
    /// is preferred. Without metadata the region is scheduled for refresh
    /// and `None` is returned.
    ///
    /// # Errors
    ///
    /// Returns `IllegalState` if the region's partition resolver declines to
    /// route the key.
    #[instrument(name = "metadata.server_for_key", skip(self, key, callback_argument), fields(region = %region), level = "debug")]
    pub fn server_for_key(
        &self,
        region: &str,
        key: &CacheableValue,
        callback_argument: Option<&CacheableValue>,
        primary: bool,
    ) -> Result<Option<BucketServerLocation>> {
        let Some(metadata) = self.inner.metadata(region) else {
            self.inner.enqueue(region, 0);
            return Ok(None);
        };
        let Some(bucket) = self.inner.bucket_for_key(&metadata, region, key, callback_argument)? else {
            return Ok(None);
        };

        let prefer_secondary = primary && self.is_bucket_marked_for_timeout(region, bucket);
        let location = if prefer_secondary {
            let secondaries: Vec<&BucketServerLocation> = metadata
                .advise_server_locations(bucket)
                .iter()
                .filter(|l| !l.is_primary())
                .collect();
            secondaries
                .choose(&mut rand::thread_rng())
                .copied()
                .or_else(|| metadata.server_location(bucket, true))
        } else {
            metadata.server_location(bucket, primary)
        };
        Ok(location.filter(|l| l.is_valid()).cloned())
    }

    /// Groups `keys` by the server hosting each key's bucket.
    ///
    /// Keys whose bucket has no known server are spread round-robin over
    /// the servers that were found, so every key appears exactly once.
    /// Returns `None` if no key could be routed.
    ///
    /// # Errors
    ///
    /// Returns `IllegalState` if the region's partition resolver declines to
    /// route a key.
    #[instrument(name = "metadata.servers_for_keys", skip(self, keys), fields(region = %region, keys = keys.len()), level = "debug")]
    pub fn servers_for_keys(
        &self,
        region: &str,
        keys: &[CacheableValue],
        primary: bool,
    ) -> Result<Option<ServerToKeys>> {
        let Some(metadata) = self.inner.metadata(region) else {
            self.inner.enqueue(region, 0);
            return Ok(None);
        };

        let by_bucket = self.inner.group_by_bucket(&metadata, region, keys)?;
        let mut by_server = ServerToKeys::new();
        let mut unrouted = Vec::new();
        for (bucket, bucket_keys) in by_bucket {
            let location = bucket
                .and_then(|b| metadata.server_location(b, primary))
                .filter(|l| l.is_valid());
            match location {
                Some(location) => by_server
                    .entry(location.server_location().clone())
                    .or_default()
                    .extend(bucket_keys),
                None => unrouted.extend(bucket_keys),
            }
        }

        if by_server.is_empty() {
            return Ok(None);
        }
        if !unrouted.is_empty() {
            let mut servers: Vec<ServerLocation> = by_server.keys().cloned().collect();
            servers.sort();
            tracing::debug!(
                unrouted = unrouted.len(),
                servers = servers.len(),
                "spreading keys without a known server"
            );
            for (i, key) in unrouted.into_iter().enumerate() {
                if let Some(keys) = by_server.get_mut(&servers[i % servers.len()]) {
                    keys.push(key);
                }
            }
        }
        Ok(Some(by_server))
    }

    /// Groups the routing keys of a function execution by server.
    ///
    /// Buckets are assigned to servers the same way as
    /// [`servers_for_all_buckets`](Self::servers_for_all_buckets), so keys
    /// of buckets without a known server travel with the first server's
    /// keys. Returns `None` when nothing can be routed.
    ///
    /// # Errors
    ///
    /// Returns `IllegalState` if the region's partition resolver declines to
    /// route a key.
    pub fn servers_for_routing_keys(
        &self,
        region: &str,
        routing_keys: &[CacheableValue],
        optimize_for_write: bool,
    ) -> Result<Option<ServerToKeys>> {
        let Some(metadata) = self.inner.metadata(region) else {
            self.inner.enqueue(region, 0);
            return Ok(None);
        };

        let by_bucket = self.inner.group_by_bucket(&metadata, region, routing_keys)?;
        let buckets: BTreeSet<i32> = by_bucket.keys().map(|b| b.unwrap_or(-1)).collect();
        let Some(by_server) = group_by_server(&metadata, &buckets, optimize_for_write) else {
            return Ok(None);
        };

        let mut keys_by_bucket: HashMap<i32, Vec<CacheableValue>> = by_bucket
            .into_iter()
            .map(|(b, keys)| (b.unwrap_or(-1), keys))
            .collect();
        let mut result = ServerToKeys::new();
        for (server, buckets) in by_server {
            let keys = result.entry(server).or_default();
            for bucket in buckets {
                if let Some(bucket_keys) = keys_by_bucket.remove(&bucket) {
                    keys.extend(bucket_keys);
                }
            }
        }
        Ok(Some(result))
    }

    /// Assigns every bucket of `region` to exactly one server.
    ///
    /// With `optimize_for_write` each bucket goes to its primary. Otherwise
    /// the fewest servers that together host every bucket are chosen.
    /// Buckets without a known server are added to one of the chosen
    /// servers. Returns `None` if no server is known.
    #[instrument(name = "metadata.servers_for_all_buckets", skip(self), fields(region = %region), level = "debug")]
    pub fn servers_for_all_buckets(
        &self,
        region: &str,
        optimize_for_write: bool,
    ) -> Option<ServerToBuckets> {
        let Some(metadata) = self.inner.metadata(region) else {
            self.inner.enqueue(region, 0);
            return None;
        };
        let buckets: BTreeSet<i32> = (0..metadata.total_buckets()).collect();
        group_by_server(&metadata, &buckets, optimize_for_write)
    }

    /// Marks the bucket of `key` as timed out on its primary and returns a
    /// location to try instead.
    ///
    /// Does nothing when the bucket wait timeout is zero.
    pub fn mark_primary_bucket_for_timeout(
        &self,
        region: &str,
        key: &CacheableValue,
        callback_argument: Option<&CacheableValue>,
    ) -> Result<Option<BucketServerLocation>> {
        if self.inner.fetcher.bucket_wait_timeout().is_zero() {
            return Ok(None);
        }
        let location = self.server_for_key(region, key, callback_argument, false)?;
        if let Some(location) = &location {
            if let Some(status) = self.inner.bucket_status(region) {
                status.set_timeout(location.bucket_id());
                tracing::debug!(
                    region = %region,
                    bucket = location.bucket_id(),
                    "marked bucket timed out"
                );
            }
        }
        Ok(location)
    }

    /// Marks every bucket whose primary lives on the primary server of
    /// `key`'s bucket as timed out, and returns that primary.
    ///
    /// Does nothing when the bucket wait timeout is zero.
    pub fn mark_primary_bucket_for_timeout_but_look_secondary(
        &self,
        region: &str,
        key: &CacheableValue,
        callback_argument: Option<&CacheableValue>,
    ) -> Result<Option<BucketServerLocation>> {
        if self.inner.fetcher.bucket_wait_timeout().is_zero() {
            return Ok(None);
        }
        let Some(status) = self.inner.bucket_status(region) else {
            return Ok(None);
        };
        let location = self.server_for_key(region, key, callback_argument, true)?;
        let (Some(location), Some(metadata)) = (location, self.inner.metadata(region)) else {
            return Ok(None);
        };

        let server = location.server_location();
        let mut marked = 0;
        for bucket in 0..metadata.total_buckets() {
            let hosted = metadata
                .server_location(bucket, true)
                .is_some_and(|l| l.server_location() == server);
            if hosted {
                status.set_timeout(bucket);
                marked += 1;
            }
        }
        tracing::debug!(region = %region, address = %server, marked, "marked buckets timed out");
        Ok(Some(location))
    }

    /// Returns true if `bucket_id` of `region` timed out on its primary
    /// within the bucket wait timeout.
    pub fn is_bucket_marked_for_timeout(&self, region: &str, bucket_id: i32) -> bool {
        let window = self.inner.fetcher.bucket_wait_timeout();
        if window.is_zero() {
            return false;
        }
        self.inner
            .bucket_status(region)
            .is_some_and(|status| status.is_timed_out(bucket_id, window))
    }
}

impl ServiceInner {
    fn metadata(&self, region: &str) -> Option<Arc<ClientMetadata>> {
        self.regions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(region)
            .cloned()
    }

    fn bucket_status(&self, region: &str) -> Option<Arc<PrBucketStatus>> {
        self.bucket_status
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(region)
            .cloned()
    }

    fn resolver(&self, region: &str) -> Option<Arc<dyn PartitionResolver>> {
        self.resolvers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(region)
            .cloned()
    }

    fn enqueue(&self, region: &str, server_group_flag: i8) {
        if self.fetcher.server_group().is_some()
            && server_group_flag == PrMetadataHint::SAME_SERVER_GROUP
        {
            return;
        }
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if !pending.insert(region.to_string()) {
            return;
        }
        if self.queue.send(region.to_string()).is_err() {
            pending.remove(region);
            return;
        }
        tracing::debug!(region = %region, "queued metadata refresh");
    }

    async fn refresh(&self, region: &str) -> Result<()> {
        let mut current = self.metadata(region);
        if current.is_none() {
            let Some(attributes) = self.fetcher.fetch_partition_attributes(region).await? else {
                tracing::debug!(region = %region, "region is not partitioned");
                return Ok(());
            };
            if attributes.total_buckets <= 0 {
                return Ok(());
            }
            let wait = self.fetcher.bucket_wait_timeout();
            if !wait.is_zero() {
                self.bucket_status
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .entry(region.to_string())
                    .or_insert_with(|| Arc::new(PrBucketStatus::new(attributes.total_buckets)));
            }
            current = Some(Arc::new(ClientMetadata::new(
                &attributes,
                self.fetcher.server_group(),
            )));
        }
        let Some(current) = current else {
            return Ok(());
        };

        let colocated_with = current.colocated_with().map(str::to_string);
        let target = colocated_with.as_deref().unwrap_or(region);
        let buckets = self.fetcher.fetch_pr_metadata(target).await?;
        if buckets.is_empty() {
            tracing::debug!(region = %region, "server returned no bucket locations");
            return Ok(());
        }

        let mut fresh = ClientMetadata::copy_of(&current);
        for locations in buckets {
            let Some(bucket_id) = locations.first().map(BucketServerLocation::bucket_id) else {
                continue;
            };
            fresh.update_bucket_server_locations(bucket_id, locations);
        }
        current.set_previous(None);
        fresh.set_previous(Some(current));
        let fresh = Arc::new(fresh);

        {
            let mut regions = self.regions.write().unwrap_or_else(PoisonError::into_inner);
            regions.insert(region.to_string(), Arc::clone(&fresh));
            if let Some(parent) = colocated_with {
                regions.insert(parent, Arc::clone(&fresh));
            }
        }
        tracing::info!(
            region = %region,
            buckets = fresh.total_buckets(),
            located = fresh.located_buckets(),
            "updated client metadata"
        );
        Ok(())
    }

    fn bucket_for_key(
        &self,
        metadata: &ClientMetadata,
        region: &str,
        key: &CacheableValue,
        callback_argument: Option<&CacheableValue>,
    ) -> Result<Option<i32>> {
        let resolver = self.resolver(region);
        let ctx = RoutingContext::new(region, key).with_callback_argument(callback_argument);
        let routing_object = resolve_routing_object(resolver.as_deref(), &ctx)?;
        let hash = routing_object.java_hash_code();

        if let Some(fixed) = resolver.as_deref().and_then(|r| r.as_fixed()) {
            let partition = resolve_partition_name(fixed, &ctx, &metadata.partition_names())?;
            let bucket = metadata.assign_fixed_bucket_id(&partition, hash);
            if bucket.is_none() {
                tracing::debug!(
                    region = %region,
                    partition = %partition,
                    "unknown fixed partition"
                );
                self.enqueue(region, 0);
            }
            return Ok(bucket);
        }

        if metadata.total_buckets() <= 0 {
            return Ok(None);
        }
        Ok(Some(bucket_for_hash(hash, metadata.total_buckets())))
    }

    fn group_by_bucket(
        &self,
        metadata: &ClientMetadata,
        region: &str,
        keys: &[CacheableValue],
    ) -> Result<BTreeMap<Option<i32>, Vec<CacheableValue>>> {
        let mut by_bucket: BTreeMap<Option<i32>, Vec<CacheableValue>> = BTreeMap::new();
        for key in keys {
            let bucket = self.bucket_for_key(metadata, region, key, None)?;
            by_bucket.entry(bucket).or_default().push(key.clone());
        }
        Ok(by_bucket)
    }
}

fn group_by_server(
    metadata: &ClientMetadata,
    buckets: &BTreeSet<i32>,
    optimize_for_write: bool,
) -> Option<ServerToBuckets> {
    if optimize_for_write {
        group_by_primary(metadata, buckets)
    } else {
        prune(metadata, buckets)
    }
}

fn group_by_primary(metadata: &ClientMetadata, buckets: &BTreeSet<i32>) -> Option<ServerToBuckets> {
    let mut by_server: BTreeMap<ServerLocation, BTreeSet<i32>> = BTreeMap::new();
    let mut without_server = Vec::new();
    for &bucket in buckets {
        match metadata
            .advise_primary_server_location(bucket)
            .filter(|l| l.is_valid())
        {
            Some(location) => {
                by_server
                    .entry(location.server_location().clone())
                    .or_default()
                    .insert(bucket);
            }
            None => without_server.push(bucket),
        }
    }
    if let Some(first) = by_server.values_mut().next() {
        first.extend(without_server);
    }
    if by_server.is_empty() {
        return None;
    }
    Some(by_server.into_iter().collect())
}

/// Picks the fewest servers covering `buckets`: a random first server, then
/// repeatedly the server adding the most uncovered buckets.
fn prune(metadata: &ClientMetadata, buckets: &BTreeSet<i32>) -> Option<ServerToBuckets> {
    let mut candidates: BTreeMap<ServerLocation, BTreeSet<i32>> = BTreeMap::new();
    let mut without_server = Vec::new();
    for &bucket in buckets {
        let locations = metadata.advise_server_locations(bucket);
        if locations.is_empty() {
            without_server.push(bucket);
            continue;
        }
        for location in locations {
            candidates
                .entry(location.server_location().clone())
                .or_default()
                .insert(bucket);
        }
    }
    if candidates.is_empty() {
        tracing::debug!("no server hosts any bucket");
        return None;
    }

    let mut candidates: Vec<(ServerLocation, BTreeSet<i32>)> = candidates.into_iter().collect();
    let mut rng = rand::thread_rng();
    let first = candidates.swap_remove(rng.gen_range(0..candidates.len()));
    let mut covered = first.1.clone();
    let mut pruned = vec![first];

    while covered.len() + without_server.len() < buckets.len() {
        let gains: Vec<usize> = candidates
            .iter()
            .map(|(_, b)| b.difference(&covered).count())
            .collect();
        let best = gains.iter().copied().max().unwrap_or(0);
        if best == 0 {
            break;
        }
        let ties: Vec<usize> = gains
            .iter()
            .enumerate()
            .filter(|(_, g)| **g == best)
            .map(|(i, _)| i)
            .collect();
        let Some(&pick) = ties.choose(&mut rng) else {
            break;
        };
        let (server, hosted) = candidates.swap_remove(pick);
        let added: BTreeSet<i32> = hosted.difference(&covered).copied().collect();
        covered.extend(added.iter().copied());
        pruned.push((server, added));
    }

    pruned[0].1.extend(without_server);
    Some(pruned.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use geode_core::protocol::PartitionAttributes;
    use geode_core::{FixedPartitionAttributes, FixedPartitionResolver, GeodeError};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn server(port: u16) -> ServerLocation {
        ServerLocation::new("127.0.0.1", port)
    }

    fn location(port: u16, bucket: i32, primary: bool) -> BucketServerLocation {
        BucketServerLocation::new(server(port), bucket, primary, 1, Vec::new())
    }

    struct MockFetcher {
        attributes: Option<PartitionAttributes>,
        buckets: Vec<Vec<BucketServerLocation>>,
        server_group: Option<String>,
        wait: Duration,
        fetches: AtomicUsize,
    }

    impl MockFetcher {
        fn new(total: i32, buckets: Vec<Vec<BucketServerLocation>>) -> Self {
            Self {
                attributes: Some(PartitionAttributes {
                    total_buckets: total,
                    ..PartitionAttributes::default()
                }),
                buckets,
                server_group: None,
                wait: Duration::ZERO,
                fetches: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl MetadataFetcher for MockFetcher {
        async fn fetch_partition_attributes(
            &self,
            _region: &str,
        ) -> Result<Option<PartitionAttributes>> {
            Ok(self.attributes.clone())
        }

        async fn fetch_pr_metadata(&self, _region: &str) -> Result<Vec<Vec<BucketServerLocation>>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(self.buckets.clone())
        }

        fn server_group(&self) -> Option<String> {
            self.server_group.clone()
        }

        fn bucket_wait_timeout(&self) -> Duration {
            self.wait
        }
    }

    /// Four buckets: 0 on A, 1 on B, 2 and 3 unknown.
    fn portfolios() -> MockFetcher {
        MockFetcher::new(4, vec![vec![location(1, 0, true)], vec![location(2, 1, true)]])
    }

    /// Key whose hash lands in `bucket` of a four-bucket region.
    fn key_in_bucket(bucket: i32) -> CacheableValue {
        CacheableValue::Int(bucket)
    }

    async fn service_with(fetcher: MockFetcher) -> ClientMetadataService {
        let service = ClientMetadataService::new(Arc::new(fetcher));
        service.refresh_metadata("/Portfolios").await.unwrap();
        service
    }

    #[tokio::test]
    async fn test_refresh_installs_snapshot() {
        let service = service_with(portfolios()).await;
        let metadata = service.metadata_for("/Portfolios").unwrap();
        assert_eq!(metadata.total_buckets(), 4);
        assert_eq!(metadata.located_buckets(), 2);
        assert_eq!(service.regions(), vec!["/Portfolios"]);

        service.refresh_metadata("/Portfolios").await.unwrap();
        let refreshed = service.metadata_for("/Portfolios").unwrap();
        assert!(Arc::ptr_eq(&refreshed.previous().unwrap(), &metadata));
        assert!(metadata.previous().is_none());
    }

    #[tokio::test]
    async fn test_unpartitioned_region_has_no_metadata() {
        let mut fetcher = portfolios();
        fetcher.attributes = None;
        let service = service_with(fetcher).await;
        assert!(service.metadata_for("/Portfolios").is_none());
    }

    #[tokio::test]
    async fn test_server_for_key_is_deterministic() {
        let service = service_with(portfolios()).await;
        let key = key_in_bucket(1);
        let first = service.server_for_key("/Portfolios", &key, None, true).unwrap();
        let second = service.server_for_key("/Portfolios", &key, None, true).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.unwrap().server_location(), &server(2));

        let unknown = service
            .server_for_key("/Portfolios", &key_in_bucket(2), None, true)
            .unwrap();
        assert!(unknown.is_none());
    }

    #[tokio::test]
    async fn test_missing_metadata_queues_refresh_once() {
        let fetcher = Arc::new(portfolios());
        let service = ClientMetadataService::new(fetcher.clone());
        let key = key_in_bucket(0);
        assert!(service.server_for_key("/Portfolios", &key, None, true).unwrap().is_none());
        assert!(service.server_for_key("/Portfolios", &key, None, true).unwrap().is_none());
        assert_eq!(service.inner.pending.lock().unwrap().len(), 1);

        service.start();
        for _ in 0..100 {
            if service.metadata_for("/Portfolios").is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(service.metadata_for("/Portfolios").is_some());
        assert_eq!(fetcher.fetches.load(Ordering::SeqCst), 1);
        service.close().await;
    }

    #[tokio::test]
    async fn test_same_server_group_skips_refresh() {
        let mut fetcher = portfolios();
        fetcher.server_group = Some("east".to_string());
        let service = ClientMetadataService::new(Arc::new(fetcher));
        service.enqueue_for_metadata_refresh("/Portfolios", PrMetadataHint::SAME_SERVER_GROUP);
        assert!(service.inner.pending.lock().unwrap().is_empty());
        service.on_metadata_hint(
            "/Portfolios",
            Some(PrMetadataHint {
                version: 1,
                server_group_flag: Some(1),
            }),
        );
        assert_eq!(service.inner.pending.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_servers_for_keys_partitions_input() {
        let service = service_with(portfolios()).await;
        let keys: Vec<CacheableValue> = (0..4).map(key_in_bucket).collect();
        let groups = service
            .servers_for_keys("/Portfolios", &keys, true)
            .unwrap()
            .unwrap();
        assert_eq!(groups.len(), 2);

        let a = &groups[&server(1)];
        let b = &groups[&server(2)];
        assert!(a.contains(&keys[0]));
        assert!(b.contains(&keys[1]));
        assert_eq!(a.len() + b.len(), 4);

        let mut all: Vec<CacheableValue> = groups.into_values().flatten().collect();
        all.sort_by_key(|k| k.java_hash_code());
        assert_eq!(all, keys);
    }

    #[tokio::test]
    async fn test_servers_for_keys_without_any_route() {
        let service = service_with(MockFetcher::new(4, vec![vec![location(1, 0, true)]])).await;
        let keys = vec![key_in_bucket(2), key_in_bucket(3)];
        assert!(service.servers_for_keys("/Portfolios", &keys, true).unwrap().is_none());
    }

    fn assert_covers(groups: &ServerToBuckets, total: i32) {
        let mut seen = BTreeSet::new();
        for buckets in groups.values() {
            for bucket in buckets {
                assert!(seen.insert(*bucket), "bucket {} assigned twice", bucket);
            }
        }
        assert_eq!(seen, (0..total).collect::<BTreeSet<_>>());
    }

    fn replicated() -> MockFetcher {
        let buckets = (0..6)
            .map(|b| {
                vec![
                    location(1 + (b % 3) as u16, b, true),
                    location(1 + ((b + 1) % 3) as u16, b, false),
                ]
            })
            .collect();
        MockFetcher::new(8, buckets)
    }

    #[tokio::test]
    async fn test_all_buckets_write_optimized() {
        let service = service_with(replicated()).await;
        let groups = service.servers_for_all_buckets("/Portfolios", true).unwrap();
        assert_covers(&groups, 8);
        assert_eq!(groups.len(), 3);
        assert!(groups[&server(1)].contains(&0));
        assert!(groups[&server(2)].contains(&1));
    }

    #[tokio::test]
    async fn test_all_buckets_pruned() {
        let service = service_with(replicated()).await;
        for _ in 0..20 {
            let groups = service.servers_for_all_buckets("/Portfolios", false).unwrap();
            assert_covers(&groups, 8);
            assert!(groups.len() <= 3);
        }
    }

    #[tokio::test]
    async fn test_all_buckets_without_metadata() {
        let service = ClientMetadataService::new(Arc::new(portfolios()));
        assert!(service.servers_for_all_buckets("/Portfolios", true).is_none());
    }

    #[tokio::test]
    async fn test_routing_keys_follow_bucket_assignment() {
        let service = service_with(replicated()).await;
        let keys: Vec<CacheableValue> = (0..8).map(CacheableValue::Int).collect();
        let groups = service
            .servers_for_routing_keys("/Portfolios", &keys, true)
            .unwrap()
            .unwrap();
        let total: usize = groups.values().map(Vec::len).sum();
        assert_eq!(total, 8);
        assert!(groups[&server(1)].contains(&CacheableValue::Int(0)));
    }

    struct NoRoute;

    impl PartitionResolver for NoRoute {
        fn name(&self) -> &str {
            "NoRoute"
        }

        fn routing_object(&self, _ctx: &RoutingContext<'_>) -> Option<CacheableValue> {
            None
        }
    }

    #[tokio::test]
    async fn test_resolver_without_routing_object_is_illegal_state() {
        let service = service_with(portfolios()).await;
        service.set_partition_resolver("/Portfolios", Arc::new(NoRoute));
        let err = service
            .server_for_key("/Portfolios", &key_in_bucket(0), None, true)
            .unwrap_err();
        assert!(matches!(err, GeodeError::IllegalState(_)));
    }

    struct ByQuarter;

    impl PartitionResolver for ByQuarter {
        fn name(&self) -> &str {
            "ByQuarter"
        }

        fn routing_object(&self, ctx: &RoutingContext<'_>) -> Option<CacheableValue> {
            Some(ctx.key.clone())
        }

        fn as_fixed(&self) -> Option<&dyn FixedPartitionResolver> {
            Some(self)
        }
    }

    impl FixedPartitionResolver for ByQuarter {
        fn partition_name(
            &self,
            ctx: &RoutingContext<'_>,
            _target_partitions: &[String],
        ) -> Option<String> {
            match ctx.key {
                CacheableValue::Int(m) if *m < 3 => Some("Q1".to_string()),
                CacheableValue::Int(m) if *m < 6 => Some("Q2".to_string()),
                _ => Some("Q9".to_string()),
            }
        }
    }

    #[tokio::test]
    async fn test_fixed_partition_routing() {
        let mut fetcher = MockFetcher::new(
            4,
            vec![
                vec![location(1, 0, true)],
                vec![location(1, 1, true)],
                vec![location(2, 2, true)],
                vec![location(2, 3, true)],
            ],
        );
        fetcher.attributes = Some(PartitionAttributes {
            total_buckets: 4,
            fixed_partitions: vec![
                FixedPartitionAttributes {
                    name: "Q1".to_string(),
                    is_primary: true,
                    num_buckets: 2,
                    starting_bucket_id: 0,
                },
                FixedPartitionAttributes {
                    name: "Q2".to_string(),
                    is_primary: true,
                    num_buckets: 2,
                    starting_bucket_id: 2,
                },
            ],
            ..PartitionAttributes::default()
        });
        let service = service_with(fetcher).await;
        service.set_partition_resolver("/Portfolios", Arc::new(ByQuarter));

        let q1 = service
            .server_for_key("/Portfolios", &CacheableValue::Int(1), None, true)
            .unwrap()
            .unwrap();
        assert_eq!(q1.server_location(), &server(1));
        let q2 = service
            .server_for_key("/Portfolios", &CacheableValue::Int(4), None, true)
            .unwrap()
            .unwrap();
        assert_eq!(q2.server_location(), &server(2));

        let unknown = service
            .server_for_key("/Portfolios", &CacheableValue::Int(11), None, true)
            .unwrap();
        assert!(unknown.is_none());
        assert_eq!(service.inner.pending.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_bucket_timeouts() {
        let mut fetcher = replicated();
        fetcher.wait = Duration::from_secs(60);
        let service = service_with(fetcher).await;
        let key = CacheableValue::Int(0);

        assert!(!service.is_bucket_marked_for_timeout("/Portfolios", 0));
        let primary = service
            .mark_primary_bucket_for_timeout_but_look_secondary("/Portfolios", &key, None)
            .unwrap()
            .unwrap();
        assert_eq!(primary.server_location(), &server(1));
        assert!(service.is_bucket_marked_for_timeout("/Portfolios", 0));
        assert!(service.is_bucket_marked_for_timeout("/Portfolios", 3));
        assert!(!service.is_bucket_marked_for_timeout("/Portfolios", 1));

        let routed = service
            .server_for_key("/Portfolios", &key, None, true)
            .unwrap()
            .unwrap();
        assert!(!routed.is_primary());
    }

    #[tokio::test]
    async fn test_timeouts_disabled_without_wait() {
        let service = service_with(replicated()).await;
        let key = CacheableValue::Int(0);
        assert!(service
            .mark_primary_bucket_for_timeout("/Portfolios", &key, None)
            .unwrap()
            .is_none());
        assert!(!service.is_bucket_marked_for_timeout("/Portfolios", 0));
    }
}
