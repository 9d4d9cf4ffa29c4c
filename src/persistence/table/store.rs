use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use super::client::{AttributeValue, Item, TableClient, WriteRequest};
use super::{MAX_BATCH_GET, MAX_BATCH_WRITE};
use crate::persistence::error::{ClientError, StoreError};
use crate::persistence::store::{MapStore, batch_outcome};
use crate::persistence::types::{AccessLevel, StoreProperties, StoreState, resource_name_for};

pub const PROP_KEY_ATTRIBUTE: &str = "key_attribute";
pub const PROP_VALUE_ATTRIBUTE: &str = "value_attribute";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableStoreOptions {
    pub key_attribute: String,
    pub value_attribute: String,
}

impl Default for TableStoreOptions {
    fn default() -> Self {
        Self {
            key_attribute: "key".to_string(),
            value_attribute: "value".to_string(),
        }
    }
}

impl TableStoreOptions {
    pub fn from_properties(properties: &StoreProperties) -> Self {
        let defaults = Self::default();
        Self {
            key_attribute: properties
                .get(PROP_KEY_ATTRIBUTE)
                .map(str::to_string)
                .unwrap_or(defaults.key_attribute),
            value_attribute: properties
                .get(PROP_VALUE_ATTRIBUTE)
                .map(str::to_string)
                .unwrap_or(defaults.value_attribute),
        }
    }
}

/// `MapStore` backed by one table of a managed NoSQL service.
pub struct TableStore {
    client: Arc<dyn TableClient>,
    options: TableStoreOptions,
    state: StoreState,
}

impl TableStore {
    pub fn new(client: Arc<dyn TableClient>, options: TableStoreOptions) -> Self {
        tracing::debug!("Creating table store with {:?}", options);
        Self {
            client,
            options,
            state: StoreState::new(),
        }
    }

    fn table(&self) -> &str {
        self.state.resource_name()
    }

    fn key_item(&self, key: &str) -> Item {
        Item::from([(
            self.options.key_attribute.clone(),
            AttributeValue::S(key.to_string()),
        )])
    }

    fn entry_item(&self, key: &str, value: &str) -> Item {
        let mut item = self.key_item(key);
        item.insert(
            self.options.value_attribute.clone(),
            AttributeValue::S(value.to_string()),
        );
        item
    }

    fn item_key(&self, item: &Item) -> Option<String> {
        item.get(&self.options.key_attribute)
            .and_then(AttributeValue::as_s)
            .map(str::to_string)
    }

    fn item_value(&self, item: &Item) -> Option<String> {
        item.get(&self.options.value_attribute)
            .and_then(AttributeValue::as_s)
            .map(str::to_string)
    }

    fn transient(&self, source: ClientError) -> StoreError {
        StoreError::Transient {
            resource: self.table().to_string(),
            source,
        }
    }

    async fn write_batches(
        &self,
        op: &'static str,
        writes: Vec<(String, WriteRequest)>,
    ) -> Result<(), StoreError> {
        let mut failures = Vec::new();
        let mut pending = writes.into_iter().peekable();

        while pending.peek().is_some() {
            let (keys, requests): (Vec<String>, Vec<WriteRequest>) =
                pending.by_ref().take(MAX_BATCH_WRITE).unzip();

            match self.client.batch_write_item(self.table(), requests).await {
                Ok(()) => {}
                Err(ClientError::ResourceNotFound(_)) if op == "deleteAll" => {}
                Err(e) => {
                    tracing::warn!(
                        "{} batch of {} on table [{}] failed: {}",
                        op,
                        keys.len(),
                        self.table(),
                        e
                    );
                    let message = e.to_string();
                    failures.extend(keys.into_iter().map(|key| (key, message.clone())));
                }
            }
        }

        batch_outcome(op, self.table().to_string(), failures)
    }
}

#[async_trait]
impl MapStore for TableStore {
    async fn initialize(
        &self,
        map_name: &str,
        properties: &StoreProperties,
    ) -> Result<(), StoreError> {
        tracing::info!(
            "Initializing the persistence for map {}. Additional props: {:?}",
            map_name,
            properties
        );
        let requested = properties.access(map_name)?;
        let table = resource_name_for(map_name);
        self.state.bind(map_name, table)?;

        match self.client.describe_table(table).await {
            Ok(description) => {
                if description.key_attribute != self.options.key_attribute {
                    return Err(StoreError::InvalidProperty {
                        map: map_name.to_string(),
                        property: PROP_KEY_ATTRIBUTE.to_string(),
                        value: self.options.key_attribute.clone(),
                    });
                }
                tracing::debug!(
                    "Table [{}] holds {} item(s)",
                    table,
                    description.item_count
                );
            }
            Err(ClientError::ResourceNotFound(_)) => {
                tracing::error!("Failed to find a table named [{}] for map {}", table, map_name);
                return Err(StoreError::ResourceNotFound {
                    map: map_name.to_string(),
                    resource: table.to_string(),
                });
            }
            Err(e) => return Err(self.transient(e)),
        }

        self.state.grant(requested);
        tracing::info!("Map {} bound to table [{}], access [{}]", map_name, table, requested);
        Ok(())
    }

    async fn load(&self, key: &str) -> Result<Option<String>, StoreError> {
        tracing::debug!("Loading document, table [{}], key [{}]", self.table(), key);

        match self.client.get_item(self.table(), &self.key_item(key)).await {
            Ok(Some(item)) => Ok(self.item_value(&item)),
            Ok(None) => Ok(None),
            Err(ClientError::ResourceNotFound(_)) => {
                tracing::warn!(
                    "Failed to load a record from table [{}] and key [{}]",
                    self.table(),
                    key
                );
                Ok(None)
            }
            Err(e) => Err(self.transient(e)),
        }
    }

    async fn load_all(&self, keys: &[String]) -> Result<HashMap<String, String>, StoreError> {
        let unique: Vec<&String> = keys.iter().collect::<HashSet<_>>().into_iter().collect();
        let mut result = HashMap::with_capacity(unique.len());

        for chunk in unique.chunks(MAX_BATCH_GET) {
            let key_items: Vec<Item> = chunk.iter().map(|key| self.key_item(key)).collect();
            match self.client.batch_get_item(self.table(), &key_items).await {
                Ok(items) => {
                    for item in items {
                        if let (Some(key), Some(value)) = (self.item_key(&item), self.item_value(&item)) {
                            result.insert(key, value);
                        }
                    }
                }
                Err(ClientError::ResourceNotFound(_)) => {
                    tracing::warn!("Table [{}] vanished during loadAll", self.table());
                }
                Err(e) => return Err(self.transient(e)),
            }
        }

        tracing::debug!(
            "Loaded {} of {} key(s) from table [{}]",
            result.len(),
            keys.len(),
            self.table()
        );
        Ok(result)
    }

    async fn store(&self, key: &str, value: &str) -> Result<(), StoreError> {
        if !self.state.permits("inserting or updating document", key) {
            return Ok(());
        }
        tracing::debug!("Storing document, table [{}], key [{}]", self.table(), key);

        self.client
            .put_item(self.table(), self.entry_item(key, value))
            .await
            .map_err(|e| self.transient(e))
    }

    async fn store_all(&self, entries: &HashMap<String, String>) -> Result<(), StoreError> {
        if !self.state.access().allows_writes() {
            tracing::warn!(
                "Readonly permission prevents storing {} document(s), table [{}]",
                entries.len(),
                self.table()
            );
            return Ok(());
        }

        let ordered: BTreeMap<&String, &String> = entries.iter().collect();
        let writes = ordered
            .into_iter()
            .map(|(key, value)| (key.clone(), WriteRequest::Put(self.entry_item(key, value))))
            .collect();
        self.write_batches("storeAll", writes).await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        if !self.state.permits("deleting document", key) {
            return Ok(());
        }
        tracing::debug!("Deleting document, table [{}], key [{}]", self.table(), key);

        match self.client.delete_item(self.table(), &self.key_item(key)).await {
            Ok(()) | Err(ClientError::ResourceNotFound(_)) => Ok(()),
            Err(e) => Err(self.transient(e)),
        }
    }

    async fn delete_all(&self, keys: &[String]) -> Result<(), StoreError> {
        if !self.state.access().allows_writes() {
            tracing::warn!(
                "Readonly permission prevents deleting {} document(s), table [{}]",
                keys.len(),
                self.table()
            );
            return Ok(());
        }

        let writes = keys
            .iter()
            .map(|key| (key.clone(), WriteRequest::Delete(self.key_item(key))))
            .collect();
        self.write_batches("deleteAll", writes).await
    }

    async fn teardown(&self) {
        self.state.revoke();
        if let Err(e) = self.client.shutdown().await {
            tracing::error!("Failure attempting to stop table client for [{}]: {}", self.table(), e);
        }
    }

    fn access_level(&self) -> AccessLevel {
        self.state.access()
    }

    fn resource_name(&self) -> String {
        self.table().to_string()
    }
}
