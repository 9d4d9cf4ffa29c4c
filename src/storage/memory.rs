use super::partitioner::PartitionManager;
use super::protocol::*;
use super::write_behind::WriteBehindQueue;
use crate::membership::{service::MembershipService, types::NodeId};
use crate::persistence::MapStore;

use anyhow::{Context, Result, anyhow};
use dashmap::DashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::hash::Hash;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

const REMOTE_TIMEOUT: Duration = Duration::from_millis(500);
const REMOTE_ATTEMPTS: usize = 3;
const MAX_TRACKED_OPS: usize = 10_000;

/// Persistence attached to a map: the adapter, plus a queue when writes are deferred.
pub struct MapPersistence {
    pub store: Arc<dyn MapStore>,
    pub write_behind: Option<Arc<WriteBehindQueue>>,
}

/// Holds the per-key lock of a primary until dropped, then forgets the lock
/// when nobody else is waiting on it.
struct KeyGuard<'a, K: Hash + Eq> {
    locks: &'a DashMap<K, Arc<Mutex<()>>>,
    key: K,
    guard: Option<OwnedMutexGuard<()>>,
}

impl<K: Hash + Eq> Drop for KeyGuard<'_, K> {
    fn drop(&mut self) {
        self.guard.take();
        self.locks
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// A named, partitioned map spread over the cluster.
///
/// Every key has one primary owner and one backup. Only the primary talks to the
/// attached `MapStore`: it reads through on a miss, and persists a mutation before
/// applying it in memory and replicating it to the backup. Read-through and
/// mutations of the same key are serialised on the primary.
pub struct DistributedMap<K, V> {
    name: String,
    local_data: DashMap<u32, DashMap<K, V>>,
    processed_ops: DashMap<String, u64>,
    key_locks: DashMap<K, Arc<Mutex<()>>>,
    membership: Arc<MembershipService>,
    partitioner: Arc<PartitionManager>,
    http_client: reqwest::Client,
    base_path: String,
    persistence: Option<MapPersistence>,
}

impl<K, V> DistributedMap<K, V>
where
    K: ToString + FromStr + Clone + Hash + Eq + Send + Sync,
    <K as FromStr>::Err: std::fmt::Display,
    V: Clone + Serialize + DeserializeOwned + Send + Sync,
{
    pub fn new(
        name: &str,
        membership: Arc<MembershipService>,
        partitioner: Arc<PartitionManager>,
    ) -> Self {
        Self::new_with_base(name, membership, partitioner, "")
    }

    pub fn new_with_base(
        name: &str,
        membership: Arc<MembershipService>,
        partitioner: Arc<PartitionManager>,
        base_path: &str,
    ) -> Self {
        let cleaned = base_path.trim_matches('/');
        Self {
            name: name.to_string(),
            local_data: DashMap::new(),
            processed_ops: DashMap::new(),
            key_locks: DashMap::new(),
            membership,
            partitioner,
            http_client: reqwest::Client::new(),
            base_path: cleaned.to_string(),
            persistence: None,
        }
    }

    pub fn with_persistence(mut self, persistence: MapPersistence) -> Self {
        self.persistence = Some(persistence);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn store(&self) -> Option<&Arc<dyn MapStore>> {
        self.persistence.as_ref().map(|p| &p.store)
    }

    pub fn write_behind(&self) -> Option<&Arc<WriteBehindQueue>> {
        self.persistence.as_ref().and_then(|p| p.write_behind.as_ref())
    }

    fn should_process(&self, op_id: &str) -> bool {
        if self.processed_ops.contains_key(op_id) {
            return false;
        }
        if self.processed_ops.len() > MAX_TRACKED_OPS {
            self.processed_ops.clear();
        }
        self.processed_ops.insert(op_id.to_string(), now_ms());
        true
    }

    /// Lets a failed operation be retried with the same id.
    fn forget_op(&self, op_id: &str) {
        self.processed_ops.remove(op_id);
    }

    async fn lock_key(&self, key: &K) -> KeyGuard<'_, K> {
        let lock = self.key_locks.entry(key.clone()).or_default().value().clone();
        KeyGuard {
            locks: &self.key_locks,
            key: key.clone(),
            guard: Some(lock.lock_owned().await),
        }
    }

    fn node_url(&self, node_id: &NodeId, endpoint: &str, params: &[&str]) -> Result<reqwest::Url> {
        let node = self
            .membership
            .get_member(node_id)
            .ok_or_else(|| anyhow!("Node not found: {}", node_id))?;

        let mut url = reqwest::Url::parse(&format!("http://{}", node.http_addr))?;
        url.path_segments_mut()
            .map_err(|_| anyhow!("Address of {} cannot carry a path", node_id))?
            .extend(self.base_path.split('/').filter(|s| !s.is_empty()))
            .extend(endpoint.split('/').filter(|s| !s.is_empty()))
            .extend(params);
        Ok(url)
    }

    async fn send_with_retry<F>(&self, request: F) -> Result<reqwest::Response>
    where
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    {
        let mut delay_ms = 150u64;
        let mut attempt = 0;

        loop {
            attempt += 1;
            match request(&self.http_client).timeout(REMOTE_TIMEOUT).send().await {
                Ok(resp) => return Ok(resp),
                Err(e) if attempt >= REMOTE_ATTEMPTS => return Err(e.into()),
                Err(e) => {
                    tracing::debug!("Request attempt {} failed: {}", attempt, e);
                    let jitter = rand::random::<u64>() % 50;
                    tokio::time::sleep(Duration::from_millis(delay_ms + jitter)).await;
                    delay_ms = (delay_ms * 2).min(1200);
                }
            }
        }
    }

    async fn post_json<T: Serialize>(&self, url: reqwest::Url, payload: &T) -> Result<reqwest::Response> {
        let response = self
            .send_with_retry(|client| client.post(url.clone()).json(payload))
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("{} returned {}: {}", url.path(), status, body));
        }
        Ok(response)
    }

    fn encode(&self, value: &V) -> Result<String> {
        serde_json::to_string(value).context("Failed to encode value")
    }

    fn decode(&self, key: &str, json: &str) -> Result<V> {
        serde_json::from_str(json)
            .with_context(|| format!("Failed to decode value of key [{}] in map {}", key, self.name))
    }

    // --- persistence hooks (primary only) ---

    async fn persist_store(&self, key: &K, value: &V) -> Result<()> {
        let Some(persistence) = &self.persistence else {
            return Ok(());
        };
        let key = key.to_string();
        let json = self.encode(value)?;

        match &persistence.write_behind {
            Some(queue) => queue.enqueue_store(key, json),
            None => persistence
                .store
                .store(&key, &json)
                .await
                .with_context(|| format!("Failed to persist key [{}] of map {}", key, self.name))?,
        }
        Ok(())
    }

    async fn persist_delete(&self, key: &K) -> Result<()> {
        let Some(persistence) = &self.persistence else {
            return Ok(());
        };
        let key = key.to_string();

        match &persistence.write_behind {
            Some(queue) => queue.enqueue_delete(key),
            None => persistence
                .store
                .delete(&key)
                .await
                .with_context(|| format!("Failed to delete key [{}] of map {}", key, self.name))?,
        }
        Ok(())
    }

    async fn load_from_store(&self, key: &K) -> Result<Option<V>> {
        let Some(persistence) = &self.persistence else {
            return Ok(None);
        };
        let key = key.to_string();
        if let Some(queue) = &persistence.write_behind
            && !queue.is_loadable(&key)
        {
            return Ok(None);
        }

        let loaded = persistence
            .store
            .load(&key)
            .await
            .with_context(|| format!("Failed to load key [{}] of map {}", key, self.name))?;
        loaded.map(|json| self.decode(&key, &json)).transpose()
    }

    /// Loads a missing key and caches it. Holds the key lock, so a removal
    /// cannot land between the load and the cache write.
    async fn read_through(&self, partition: u32, key: &K) -> Result<Option<V>> {
        let _guard = self.lock_key(key).await;
        if let Some(value) = self.get_local(key) {
            return Ok(Some(value));
        }
        self.load_and_cache(partition, key).await
    }

    /// Caller holds the key lock.
    async fn load_and_cache(&self, partition: u32, key: &K) -> Result<Option<V>> {
        let Some(value) = self.load_from_store(key).await? else {
            return Ok(None);
        };
        tracing::debug!("Loaded key [{}] of map {} from store", key.to_string(), self.name);
        Ok(Some(self.cache_if_absent(partition, key.clone(), value)))
    }

    fn cache_if_absent(&self, partition: u32, key: K, value: V) -> V {
        let partition_map = self.local_data.entry(partition).or_default();
        partition_map.entry(key).or_insert(value).value().clone()
    }

    // --- writes ---

    pub async fn put(&self, key: K, value: V) -> Result<()> {
        self.put_with_op(key, value, Uuid::new_v4().to_string()).await
    }

    pub async fn put_with_op(&self, key: K, value: V, op_id: String) -> Result<()> {
        let partition = self.partitioner.get_partition(&key.to_string());
        let owners = self.partitioner.get_owners(partition);

        match owners.first() {
            Some(primary) if primary != &self.membership.local_node.id => {
                if !self.should_process(&op_id) {
                    return Ok(());
                }
                let result = self.forward_put(primary, partition, op_id.clone(), key, value).await;
                if result.is_err() {
                    self.forget_op(&op_id);
                }
                result
            }
            _ => self.store_as_primary(partition, op_id, key, value).await,
        }
    }

    async fn forward_put(
        &self,
        primary: &NodeId,
        partition: u32,
        op_id: String,
        key: K,
        value: V,
    ) -> Result<()> {
        let payload = ForwardPutRequest {
            map: self.name.clone(),
            partition,
            op_id,
            key: key.to_string(),
            value_json: self.encode(&value)?,
        };
        let url = self.node_url(primary, ENDPOINT_FORWARD_PUT, &[])?;
        self.post_json(url, &payload)
            .await
            .with_context(|| format!("Forwarding put of [{}] to {} failed", payload.key, primary))?;
        Ok(())
    }

    /// Applies a write on the primary: persist, then cache, then replicate.
    ///
    /// A persistence failure leaves the in-memory copy untouched.
    pub async fn store_as_primary(
        &self,
        partition: u32,
        op_id: String,
        key: K,
        value: V,
    ) -> Result<()> {
        if !self.should_process(&op_id) {
            return Ok(());
        }
        {
            let _guard = self.lock_key(&key).await;
            if let Err(e) = self.persist_store(&key, &value).await {
                self.forget_op(&op_id);
                return Err(e);
            }
            self.store_local(partition, key.clone(), value.clone());
        }

        for backup in self.backups(partition) {
            self.replicate_to_backup(&backup, partition, op_id.clone(), &key, &value)
                .await?;
        }
        Ok(())
    }

    fn backups(&self, partition: u32) -> Vec<NodeId> {
        self.partitioner
            .get_owners(partition)
            .into_iter()
            .skip(1)
            .filter(|id| id != &self.membership.local_node.id)
            .collect()
    }

    async fn replicate_to_backup(
        &self,
        backup: &NodeId,
        partition: u32,
        op_id: String,
        key: &K,
        value: &V,
    ) -> Result<()> {
        let payload = ReplicateRequest {
            map: self.name.clone(),
            partition,
            op_id,
            key: key.to_string(),
            value_json: self.encode(value)?,
        };
        let url = self.node_url(backup, ENDPOINT_REPLICATE, &[])?;
        self.post_json(url, &payload)
            .await
            .with_context(|| format!("Replication of [{}] to {} failed", payload.key, backup))?;
        Ok(())
    }

    /// Backup side of a write. Never touches the store.
    pub fn store_replica(&self, partition: u32, op_id: String, key: K, value: V) {
        if self.should_process(&op_id) {
            self.store_local(partition, key, value);
        }
    }

    pub fn store_local(&self, partition: u32, key: K, value: V) {
        self.local_data
            .entry(partition)
            .or_default()
            .insert(key, value);
    }

    // --- removals ---

    /// Removes `key` everywhere, returning the value cached before the removal.
    pub async fn remove(&self, key: &K) -> Result<Option<V>> {
        self.remove_with_op(key, Uuid::new_v4().to_string()).await
    }

    pub async fn remove_with_op(&self, key: &K, op_id: String) -> Result<Option<V>> {
        let partition = self.partitioner.get_partition(&key.to_string());
        let owners = self.partitioner.get_owners(partition);

        match owners.first() {
            Some(primary) if primary != &self.membership.local_node.id => {
                if !self.should_process(&op_id) {
                    return Ok(None);
                }
                let result = self.forward_remove(primary, partition, op_id.clone(), key).await;
                if result.is_err() {
                    self.forget_op(&op_id);
                }
                result
            }
            _ => self.remove_as_primary(partition, op_id, key).await,
        }
    }

    async fn forward_remove(
        &self,
        primary: &NodeId,
        partition: u32,
        op_id: String,
        key: &K,
    ) -> Result<Option<V>> {
        let payload = ForwardRemoveRequest {
            map: self.name.clone(),
            partition,
            op_id,
            key: key.to_string(),
        };
        let url = self.node_url(primary, ENDPOINT_FORWARD_REMOVE, &[])?;
        let response: GetResponse = self
            .post_json(url, &payload)
            .await
            .with_context(|| format!("Forwarding remove of [{}] to {} failed", payload.key, primary))?
            .json()
            .await?;
        response
            .value_json
            .map(|json| self.decode(&payload.key, &json))
            .transpose()
    }

    /// Applies a removal on the primary: delete from the store, then drop the
    /// cached copy and tell the backup.
    pub async fn remove_as_primary(&self, partition: u32, op_id: String, key: &K) -> Result<Option<V>> {
        if !self.should_process(&op_id) {
            return Ok(None);
        }
        let previous = {
            let _guard = self.lock_key(key).await;
            if let Err(e) = self.persist_delete(key).await {
                self.forget_op(&op_id);
                return Err(e);
            }
            self.remove_local(partition, key)
        };

        for backup in self.backups(partition) {
            let payload = ReplicateRemoveRequest {
                map: self.name.clone(),
                partition,
                op_id: op_id.clone(),
                key: key.to_string(),
            };
            let url = self.node_url(&backup, ENDPOINT_REPLICATE_REMOVE, &[])?;
            self.post_json(url, &payload)
                .await
                .with_context(|| format!("Replicating remove of [{}] to {} failed", payload.key, backup))?;
        }
        Ok(previous)
    }

    pub fn remove_replica(&self, partition: u32, op_id: String, key: &K) {
        if self.should_process(&op_id) {
            self.remove_local(partition, key);
        }
    }

    pub fn remove_local(&self, partition: u32, key: &K) -> Option<V> {
        self.local_data
            .get(&partition)
            .and_then(|partition_map| partition_map.remove(key))
            .map(|(_, value)| value)
    }

    // --- reads ---

    pub fn get_local(&self, key: &K) -> Option<V> {
        let partition = self.partitioner.get_partition(&key.to_string());
        self.local_data
            .get(&partition)
            .and_then(|partition_map| partition_map.get(key).map(|v| v.value().clone()))
    }

    /// Owner-side read: the cached value, read through from the store when this node
    /// is the primary of the key.
    pub async fn get_or_load_local(&self, key: &K) -> Result<Option<V>> {
        if let Some(value) = self.get_local(key) {
            return Ok(Some(value));
        }
        let partition = self.partitioner.get_partition(&key.to_string());
        if self.partitioner.is_local_primary(partition) {
            return self.read_through(partition, key).await;
        }
        Ok(None)
    }

    pub async fn get(&self, key: &K) -> Result<Option<V>> {
        let partition = self.partitioner.get_partition(&key.to_string());

        if let Some(value) = self.get_local(key) {
            tracing::debug!("GET: Found key locally in partition {}", partition);
            return Ok(Some(value));
        }

        let owners = self.partitioner.get_owners(partition);
        let local_id = &self.membership.local_node.id;

        let Some(primary) = owners.first().filter(|primary| *primary != local_id) else {
            // This node owns the key: a backup may still hold it after a failover,
            // otherwise the store is the source of truth.
            let _guard = self.lock_key(key).await;
            if let Some(value) = self.get_local(key) {
                return Ok(Some(value));
            }
            for backup in owners.iter().skip(1) {
                if let Ok(Some(value)) = self.fetch_remote(backup, key).await {
                    return Ok(Some(self.cache_if_absent(partition, key.clone(), value)));
                }
            }
            return self.load_and_cache(partition, key).await;
        };

        match self.fetch_remote(primary, key).await {
            Ok(value) => return Ok(value),
            Err(e) => tracing::error!("GET: Failed to fetch from owner {}: {:#}", primary, e),
        }

        for backup in owners.iter().skip(1).filter(|id| *id != local_id) {
            if let Ok(Some(value)) = self.fetch_remote(backup, key).await {
                return Ok(Some(value));
            }
        }

        // Primary unreachable: the store can still answer, without caching.
        self.load_from_store(key).await
    }

    pub async fn fetch_remote(&self, owner_id: &NodeId, key: &K) -> Result<Option<V>> {
        let key_str = key.to_string();
        let url = self.node_url(owner_id, ENDPOINT_GET_INTERNAL, &[&self.name, &key_str])?;
        let response = self
            .send_with_retry(|client| client.get(url.clone()))
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(anyhow!("GET request failed {}", response.status()));
        }

        let get_response: GetResponse = response.json().await?;
        get_response
            .value_json
            .map(|json| self.decode(&key_str, &json))
            .transpose()
    }

    // --- lifecycle ---

    /// Seeds the primary-owned entries from the store, when it can enumerate its keys.
    pub async fn preload(&self) -> Result<usize> {
        let Some(persistence) = &self.persistence else {
            return Ok(0);
        };
        let keys: HashSet<String> = match persistence.store.load_all_keys().await? {
            Some(keys) => keys,
            None => {
                tracing::info!("Store of map {} cannot list its keys, skipping preload", self.name);
                return Ok(0);
            }
        };

        let owned: Vec<String> = keys
            .into_iter()
            .filter(|key| self.partitioner.is_local_primary(self.partitioner.get_partition(key)))
            .collect();
        let loaded = persistence.store.load_all(&owned).await?;

        let mut count = 0;
        for (key_str, json) in loaded {
            let key: K = key_str
                .parse()
                .map_err(|e: <K as FromStr>::Err| anyhow!("Invalid key [{}]: {}", key_str, e))?;
            let value = self.decode(&key_str, &json)?;
            self.cache_if_absent(self.partitioner.get_partition(&key_str), key, value);
            count += 1;
        }
        tracing::info!("Preloaded {} entries into map {}", count, self.name);
        Ok(count)
    }

    /// Writes out everything queued for deferred persistence.
    pub async fn flush(&self) -> Result<()> {
        match self.write_behind() {
            Some(queue) => queue.flush().await,
            None => Ok(()),
        }
    }

    pub async fn shutdown(&self) -> Result<()> {
        match self.write_behind() {
            Some(queue) => queue.stop().await,
            None => Ok(()),
        }
    }

    // --- introspection ---

    pub fn dump_partition(&self, partition: u32) -> Vec<(K, V)> {
        self.local_data
            .get(&partition)
            .map(|partition_map| {
                partition_map
                    .iter()
                    .map(|entry| (entry.key().clone(), entry.value().clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn local_entry_count(&self) -> usize {
        self.local_data
            .iter()
            .map(|entry| entry.value().len())
            .sum()
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
