use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use super::MAX_BATCH_ITEMS;
use super::client::{Attribute, DomainClient, ReplaceableItem};
use crate::persistence::error::{ClientError, StoreError};
use crate::persistence::props::{self, DEFAULT_DELIMITER};
use crate::persistence::store::{MapStore, batch_outcome};
use crate::persistence::types::{AccessLevel, StoreProperties, StoreState, resource_name_for};

pub const PROP_VALUE_ATTRIBUTE: &str = "value_attribute";
pub const PROP_INDEX_ATTRIBUTES: &str = "index_attributes";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainStoreOptions {
    pub value_attribute: String,
    /// Also write documents as flattened, queryable attributes.
    pub index_attributes: bool,
}

impl Default for DomainStoreOptions {
    fn default() -> Self {
        Self {
            value_attribute: "value".to_string(),
            index_attributes: false,
        }
    }
}

impl DomainStoreOptions {
    pub fn from_properties(properties: &StoreProperties) -> Self {
        Self {
            value_attribute: properties
                .get(PROP_VALUE_ATTRIBUTE)
                .unwrap_or("value")
                .to_string(),
            index_attributes: properties.flag(PROP_INDEX_ATTRIBUTES),
        }
    }
}

/// `MapStore` backed by one domain of a distributed attribute store.
pub struct DomainStore {
    client: Arc<dyn DomainClient>,
    options: DomainStoreOptions,
    state: StoreState,
}

impl DomainStore {
    pub fn new(client: Arc<dyn DomainClient>, options: DomainStoreOptions) -> Self {
        tracing::debug!("Creating domain store with {:?}", options);
        Self {
            client,
            options,
            state: StoreState::new(),
        }
    }

    fn domain(&self) -> &str {
        self.state.resource_name()
    }

    fn transient(&self, source: ClientError) -> StoreError {
        StoreError::Transient {
            resource: self.domain().to_string(),
            source,
        }
    }

    fn to_item(&self, key: &str, value: &str) -> ReplaceableItem {
        let mut attributes = vec![Attribute::new(&self.options.value_attribute, value)];

        if self.options.index_attributes {
            match serde_json::from_str::<Value>(value) {
                Ok(document) => {
                    for (name, scalar) in props::json_to_props(&document, DEFAULT_DELIMITER) {
                        if name == self.options.value_attribute {
                            tracing::warn!(
                                "Skipping attribute [{}] of key [{}], it shadows the value attribute",
                                name,
                                key
                            );
                            continue;
                        }
                        attributes.push(Attribute::new(&name, &props::scalar_to_string(&scalar)));
                    }
                }
                Err(e) => {
                    tracing::debug!("Value of key [{}] is not a JSON document, not indexed: {}", key, e);
                }
            }
        }

        ReplaceableItem {
            name: key.to_string(),
            attributes,
        }
    }

    /// Raw value attribute, or a document rebuilt from the item's attributes when
    /// the item was written without one.
    fn from_attributes(&self, attributes: Vec<Attribute>) -> Option<String> {
        if attributes.is_empty() {
            return None;
        }
        if let Some(raw) = attributes
            .iter()
            .find(|a| a.name == self.options.value_attribute)
        {
            return Some(raw.value.clone());
        }

        let flattened: BTreeMap<String, Value> = attributes
            .into_iter()
            .map(|a| (a.name, Value::String(a.value)))
            .collect();
        Some(props::props_to_json(&flattened, DEFAULT_DELIMITER).to_string())
    }
}

#[async_trait]
impl MapStore for DomainStore {
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
        let domain = resource_name_for(map_name);
        self.state.bind(map_name, domain)?;

        match self.client.domain_metadata(domain).await {
            Ok(metadata) => {
                tracing::debug!("Domain [{}] holds {} item(s)", domain, metadata.item_count);
            }
            Err(ClientError::ResourceNotFound(_)) => {
                tracing::error!("Failed to find a domain named [{}] for map {}", domain, map_name);
                return Err(StoreError::ResourceNotFound {
                    map: map_name.to_string(),
                    resource: domain.to_string(),
                });
            }
            Err(e) => return Err(self.transient(e)),
        }

        self.state.grant(requested);
        tracing::info!("Map {} bound to domain [{}], access [{}]", map_name, domain, requested);
        Ok(())
    }

    async fn load(&self, key: &str) -> Result<Option<String>, StoreError> {
        tracing::debug!("Loading item, domain [{}], key [{}]", self.domain(), key);

        match self.client.get_attributes(self.domain(), key).await {
            Ok(attributes) => Ok(self.from_attributes(attributes)),
            Err(ClientError::ResourceNotFound(_)) => {
                tracing::warn!(
                    "Failed to load a record from domain [{}] and key [{}]",
                    self.domain(),
                    key
                );
                Ok(None)
            }
            Err(e) => Err(self.transient(e)),
        }
    }

    async fn load_all_keys(&self) -> Result<Option<HashSet<String>>, StoreError> {
        let mut keys = HashSet::new();
        let mut next_token = None;

        loop {
            let page = self
                .client
                .list_item_names(self.domain(), next_token)
                .await
                .map_err(|e| self.transient(e))?;
            keys.extend(page.names);
            match page.next_token {
                Some(token) => next_token = Some(token),
                None => break,
            }
        }

        tracing::debug!("Domain [{}] lists {} key(s)", self.domain(), keys.len());
        Ok(Some(keys))
    }

    async fn store(&self, key: &str, value: &str) -> Result<(), StoreError> {
        if !self.state.permits("inserting or updating item", key) {
            return Ok(());
        }
        tracing::debug!("Storing item, domain [{}], key [{}]", self.domain(), key);

        self.client
            .put_attributes(self.domain(), self.to_item(key, value))
            .await
            .map_err(|e| self.transient(e))
    }

    async fn store_all(&self, entries: &HashMap<String, String>) -> Result<(), StoreError> {
        if !self.state.access().allows_writes() {
            tracing::warn!(
                "Readonly permission prevents storing {} item(s), domain [{}]",
                entries.len(),
                self.domain()
            );
            return Ok(());
        }

        let ordered: Vec<(&String, &String)> = entries
            .iter()
            .collect::<BTreeMap<_, _>>()
            .into_iter()
            .collect();
        let mut failures = Vec::new();

        for chunk in ordered.chunks(MAX_BATCH_ITEMS) {
            let items = chunk
                .iter()
                .map(|(key, value)| self.to_item(key, value))
                .collect();
            if let Err(e) = self.client.batch_put_attributes(self.domain(), items).await {
                tracing::warn!("storeAll batch on domain [{}] failed: {}", self.domain(), e);
                let message = e.to_string();
                failures.extend(chunk.iter().map(|(key, _)| ((*key).clone(), message.clone())));
            }
        }

        batch_outcome("storeAll", self.domain().to_string(), failures)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        if !self.state.permits("deleting item", key) {
            return Ok(());
        }
        tracing::debug!("Deleting item, domain [{}], key [{}]", self.domain(), key);

        match self.client.delete_attributes(self.domain(), key).await {
            Ok(()) | Err(ClientError::ResourceNotFound(_)) => Ok(()),
            Err(e) => Err(self.transient(e)),
        }
    }

    async fn delete_all(&self, keys: &[String]) -> Result<(), StoreError> {
        if !self.state.access().allows_writes() {
            tracing::warn!(
                "Readonly permission prevents deleting {} item(s), domain [{}]",
                keys.len(),
                self.domain()
            );
            return Ok(());
        }

        let mut failures = Vec::new();
        for chunk in keys.chunks(MAX_BATCH_ITEMS) {
            match self
                .client
                .batch_delete_attributes(self.domain(), chunk.to_vec())
                .await
            {
                Ok(()) | Err(ClientError::ResourceNotFound(_)) => {}
                Err(e) => {
                    tracing::warn!("deleteAll batch on domain [{}] failed: {}", self.domain(), e);
                    let message = e.to_string();
                    failures.extend(chunk.iter().map(|key| (key.clone(), message.clone())));
                }
            }
        }

        batch_outcome("deleteAll", self.domain().to_string(), failures)
    }

    async fn teardown(&self) {
        self.state.revoke();
        if let Err(e) = self.client.shutdown().await {
            tracing::error!(
                "Failure attempting to stop attribute store client for [{}]: {}",
                self.domain(),
                e
            );
        }
    }

    fn access_level(&self) -> AccessLevel {
        self.state.access()
    }

    fn resource_name(&self) -> String {
        self.domain().to_string()
    }
}
