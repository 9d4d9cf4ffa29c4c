//! Deferred persistence for maps configured with a write delay.
//!
//! Mutations are coalesced per key, the latest one wins, and flushed in batches
//! through `store_all` / `delete_all`. An entry leaves the queue only once the
//! store has confirmed it, so failed keys stay queued and a newer mutation of
//! the same key is never dropped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, bail};
use dashmap::DashMap;
use tokio::task::JoinHandle;

use crate::persistence::{MapStore, StoreError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingWrite {
    Store(String),
    Delete,
}

pub struct WriteBehindQueue {
    map_name: String,
    store: Arc<dyn MapStore>,
    pending: DashMap<String, (u64, PendingWrite)>,
    sequence: AtomicU64,
    batch_size: usize,
    delay: Duration,
    flusher: Mutex<Option<JoinHandle<()>>>,
    flush_lock: tokio::sync::Mutex<()>,
}

impl WriteBehindQueue {
    pub fn new(
        map_name: &str,
        store: Arc<dyn MapStore>,
        delay: Duration,
        batch_size: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            map_name: map_name.to_string(),
            store,
            pending: DashMap::new(),
            sequence: AtomicU64::new(0),
            batch_size: batch_size.max(1),
            delay,
            flusher: Mutex::new(None),
            flush_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Spawns the periodic flusher.
    pub fn start(self: &Arc<Self>) {
        let queue = self.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(queue.delay);
            interval.tick().await;
            loop {
                interval.tick().await;
                if let Err(e) = queue.flush().await {
                    tracing::error!("Write-behind flush for map {} failed: {:#}", queue.map_name, e);
                }
            }
        });

        let mut flusher = match self.flusher.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(previous) = flusher.replace(handle) {
            previous.abort();
        }
        tracing::info!(
            "Write-behind for map {} every {:?}, batches of {}",
            self.map_name,
            self.delay,
            self.batch_size
        );
    }

    pub fn enqueue_store(&self, key: String, value: String) {
        self.enqueue(key, PendingWrite::Store(value));
    }

    pub fn enqueue_delete(&self, key: String) {
        self.enqueue(key, PendingWrite::Delete);
    }

    fn enqueue(&self, key: String, write: PendingWrite) {
        let seq = self.sequence.fetch_add(1, Ordering::AcqRel) + 1;
        self.pending.insert(key, (seq, write));
    }

    /// A key with a queued delete must not be read back from the store.
    pub fn is_loadable(&self, key: &str) -> bool {
        !matches!(
            self.pending.get(key).map(|entry| entry.value().1.clone()),
            Some(PendingWrite::Delete)
        )
    }

    pub fn pending(&self, key: &str) -> Option<PendingWrite> {
        self.pending.get(key).map(|entry| entry.value().1.clone())
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Writes every queued mutation to the store.
    pub async fn flush(&self) -> Result<()> {
        let _guard = self.flush_lock.lock().await;

        let mut snapshot: Vec<(String, u64, PendingWrite)> = self
            .pending
            .iter()
            .map(|entry| {
                let (seq, write) = entry.value();
                (entry.key().clone(), *seq, write.clone())
            })
            .collect();
        if snapshot.is_empty() {
            return Ok(());
        }
        snapshot.sort_by_key(|(_, seq, _)| *seq);

        // Entries stay queued until the store confirms them, so a key with a
        // delete in flight is still not loadable.
        let mut stores = Vec::new();
        let mut deletes = Vec::new();
        for (key, seq, write) in snapshot {
            match write {
                PendingWrite::Store(value) => stores.push((key, seq, value)),
                PendingWrite::Delete => deletes.push((key, seq)),
            }
        }
        tracing::debug!(
            "Flushing {} store(s) and {} delete(s) for map {}",
            stores.len(),
            deletes.len(),
            self.map_name
        );

        let mut failed = 0;
        for chunk in stores.chunks(self.batch_size) {
            let entries: HashMap<String, String> = chunk
                .iter()
                .map(|(key, _, value)| (key.clone(), value.clone()))
                .collect();
            let outcome = self.store.store_all(&entries).await;
            if let Err(e) = &outcome {
                tracing::warn!("storeAll for map {} failed: {}", self.map_name, e);
            }
            failed += self.settle(chunk.iter().map(|(key, seq, _)| (key, *seq)), outcome.err());
        }

        for chunk in deletes.chunks(self.batch_size) {
            let keys: Vec<String> = chunk.iter().map(|(key, _)| key.clone()).collect();
            let outcome = self.store.delete_all(&keys).await;
            if let Err(e) = &outcome {
                tracing::warn!("deleteAll for map {} failed: {}", self.map_name, e);
            }
            failed += self.settle(chunk.iter().map(|(key, seq)| (key, *seq)), outcome.err());
        }

        if failed > 0 {
            bail!(
                "Write-behind flush for map {} incomplete, {} key(s) requeued",
                self.map_name,
                failed
            );
        }
        Ok(())
    }

    /// Dequeues the confirmed keys of a batch and returns how many stay queued.
    ///
    /// Only the version that was sent leaves the queue; a newer mutation of the
    /// same key is kept either way.
    fn settle<'a>(
        &self,
        sent: impl Iterator<Item = (&'a String, u64)>,
        error: Option<StoreError>,
    ) -> usize {
        let failed_keys: Vec<&str> = error.as_ref().map(|e| e.failed_keys()).unwrap_or_default();
        let mut kept = 0;
        for (key, seq) in sent {
            let confirmed = match &error {
                None => true,
                // A batch error without per-key detail failed as a whole.
                Some(_) => !failed_keys.is_empty() && !failed_keys.contains(&key.as_str()),
            };
            if confirmed {
                self.pending.remove_if(key, |_, (current, _)| *current == seq);
            } else {
                kept += 1;
            }
        }
        kept
    }

    /// Stops the flusher and writes what is still queued.
    pub async fn stop(&self) -> Result<()> {
        let handle = match self.flusher.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            handle.abort();
        }
        self.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::table::{MemoryTableClient, TableStore, TableStoreOptions};
    use crate::persistence::StoreProperties;

    async fn queue_over(client: &Arc<MemoryTableClient>, batch: usize) -> Arc<WriteBehindQueue> {
        client.create_table("events", "key");
        let store = TableStore::new(client.clone(), TableStoreOptions::default());
        store.initialize("events", &StoreProperties::new()).await.unwrap();
        WriteBehindQueue::new("events", Arc::new(store), Duration::from_secs(3600), batch)
    }

    #[tokio::test]
    async fn test_coalesces_per_key() {
        let client = MemoryTableClient::new();
        let queue = queue_over(&client, 10).await;

        queue.enqueue_store("a".into(), "1".into());
        queue.enqueue_store("a".into(), "2".into());
        queue.enqueue_store("b".into(), "1".into());
        queue.enqueue_delete("b".into());
        assert_eq!(queue.pending_count(), 2);
        assert!(!queue.is_loadable("b"));
        assert_eq!(queue.pending("a"), Some(PendingWrite::Store("2".into())));

        queue.flush().await.unwrap();
        assert_eq!(queue.pending_count(), 0);
        assert_eq!(client.item_count("events"), 1);
        assert!(queue.is_loadable("b"));
    }

    #[tokio::test]
    async fn test_failed_keys_are_requeued() {
        let client = MemoryTableClient::new();
        let queue = queue_over(&client, 2).await;
        client.fail_writes_for("bad");

        queue.enqueue_store("bad".into(), "x".into());
        queue.enqueue_store("c".into(), "y".into());
        queue.enqueue_store("d".into(), "z".into());

        assert!(queue.flush().await.is_err());
        // "bad" and "c" share the first batch.
        assert_eq!(queue.pending_count(), 2);
        assert_eq!(client.item_count("events"), 1);
    }

    #[tokio::test]
    async fn test_newer_write_survives_failed_flush() {
        let client = MemoryTableClient::new();
        let queue = queue_over(&client, 10).await;
        client.fail_writes_for("k");

        queue.enqueue_store("k".into(), "old".into());
        assert!(queue.flush().await.is_err());
        queue.enqueue_store("k".into(), "new".into());
        assert_eq!(queue.pending("k"), Some(PendingWrite::Store("new".into())));
    }

    #[tokio::test]
    async fn test_stop_flushes() {
        let client = MemoryTableClient::new();
        let queue = queue_over(&client, 10).await;
        queue.start();
        queue.enqueue_store("a".into(), "1".into());
        queue.stop().await.unwrap();
        assert_eq!(client.item_count("events"), 1);
    }
}
