//! In-process table service used for local development and tests.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::client::{AttributeValue, Item, TableClient, TableDescription, WriteRequest};
use crate::persistence::error::ClientError;

struct Table {
    key_attribute: String,
    items: DashMap<String, Item>,
}

#[derive(Default)]
pub struct MemoryTableClient {
    tables: DashMap<String, Arc<Table>>,
    poisoned_keys: DashMap<String, ()>,
    requests: AtomicUsize,
    shutdowns: AtomicUsize,
}

impl MemoryTableClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn create_table(&self, table: &str, key_attribute: &str) {
        self.tables
            .entry(table.to_string())
            .or_insert_with(|| {
                Arc::new(Table {
                    key_attribute: key_attribute.to_string(),
                    items: DashMap::new(),
                })
            });
    }

    pub fn item_count(&self, table: &str) -> usize {
        self.tables
            .get(table)
            .map(|t| t.items.len())
            .unwrap_or(0)
    }

    /// Makes every later write touching `key` fail with a transport error.
    pub fn fail_writes_for(&self, key: &str) {
        self.poisoned_keys.insert(key.to_string(), ());
    }

    fn check_writable(&self, t: &Table, item: &Item) -> Result<String, ClientError> {
        let hash_key = t.hash_key(item)?;
        if self.poisoned_keys.contains_key(&hash_key) {
            return Err(ClientError::Transport(format!(
                "connection reset writing [{}]",
                hash_key
            )));
        }
        Ok(hash_key)
    }

    /// Number of requests served, batch requests counting once.
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::Relaxed)
    }

    /// The handle is shared by every adapter of a connector, so shutdown only counts.
    pub fn shutdown_count(&self) -> usize {
        self.shutdowns.load(Ordering::Acquire)
    }

    fn table(&self, table: &str) -> Result<Arc<Table>, ClientError> {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.tables
            .get(table)
            .map(|t| t.value().clone())
            .ok_or_else(|| ClientError::ResourceNotFound(table.to_string()))
    }
}

impl Table {
    fn hash_key(&self, key: &Item) -> Result<String, ClientError> {
        match key.get(&self.key_attribute) {
            Some(AttributeValue::S(s)) | Some(AttributeValue::N(s)) => Ok(s.clone()),
            None => Err(ClientError::Status {
                status: 400,
                body: format!("missing key attribute [{}]", self.key_attribute),
            }),
        }
    }
}

#[async_trait]
impl TableClient for MemoryTableClient {
    async fn describe_table(&self, table: &str) -> Result<TableDescription, ClientError> {
        let t = self.table(table)?;
        Ok(TableDescription {
            table_name: table.to_string(),
            key_attribute: t.key_attribute.clone(),
            item_count: t.items.len() as u64,
        })
    }

    async fn get_item(&self, table: &str, key: &Item) -> Result<Option<Item>, ClientError> {
        let t = self.table(table)?;
        let hash_key = t.hash_key(key)?;
        Ok(t.items.get(&hash_key).map(|item| item.value().clone()))
    }

    async fn batch_get_item(&self, table: &str, keys: &[Item]) -> Result<Vec<Item>, ClientError> {
        let t = self.table(table)?;
        let mut found = Vec::new();
        for key in keys {
            if let Some(item) = t.items.get(&t.hash_key(key)?) {
                found.push(item.value().clone());
            }
        }
        Ok(found)
    }

    async fn put_item(&self, table: &str, item: Item) -> Result<(), ClientError> {
        let t = self.table(table)?;
        let hash_key = self.check_writable(&t, &item)?;
        t.items.insert(hash_key, item);
        Ok(())
    }

    async fn delete_item(&self, table: &str, key: &Item) -> Result<(), ClientError> {
        let t = self.table(table)?;
        t.items.remove(&self.check_writable(&t, key)?);
        Ok(())
    }

    async fn batch_write_item(
        &self,
        table: &str,
        writes: Vec<WriteRequest>,
    ) -> Result<(), ClientError> {
        let t = self.table(table)?;
        // A batch is rejected as a whole.
        let mut keyed = Vec::with_capacity(writes.len());
        for write in writes {
            let hash_key = match &write {
                WriteRequest::Put(item) | WriteRequest::Delete(item) => {
                    self.check_writable(&t, item)?
                }
            };
            keyed.push((hash_key, write));
        }
        for (hash_key, write) in keyed {
            match write {
                WriteRequest::Put(item) => {
                    t.items.insert(hash_key, item);
                }
                WriteRequest::Delete(_) => {
                    t.items.remove(&hash_key);
                }
            }
        }
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), ClientError> {
        self.shutdowns.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}
