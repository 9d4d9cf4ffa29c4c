//! Resolution of map names to their persistence adapters.
//!
//! The factory owns every adapter it creates. The first lookup for a map name
//! constructs and initializes the adapter; every later lookup, concurrent or not,
//! returns the same instance.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::OnceCell;

use super::domain::{
    DomainClient, DomainStore, DomainStoreOptions, HttpDomainClient, MemoryDomainClient,
};
use super::error::StoreError;
use super::store::MapStore;
use super::table::{HttpTableClient, MemoryTableClient, TableClient, TableStore, TableStoreOptions};
use super::types::{
    PROP_ACCESS_KEY, PROP_ENDPOINT, PROP_SECRET_KEY, StoreProperties, resource_name_for,
};
use crate::config::types::{MapStoreConfig, StoreEngine};

/// Hook the cache runtime uses to obtain the adapter for a map.
#[async_trait]
pub trait MapStoreFactory: Send + Sync {
    /// Returns the adapter serving `map_name`, creating and initializing it on first use.
    async fn new_map_store(
        &self,
        map_name: &str,
        config: &MapStoreConfig,
    ) -> Result<Arc<dyn MapStore>, StoreError>;

    /// Tears down every adapter handed out so far.
    async fn shutdown(&self);
}

/// Produces backing-store clients from a map's declared properties.
pub trait StoreConnector: Send + Sync {
    fn table_client(
        &self,
        map_name: &str,
        properties: &StoreProperties,
    ) -> Result<Arc<dyn TableClient>, StoreError>;

    fn domain_client(
        &self,
        map_name: &str,
        properties: &StoreProperties,
    ) -> Result<Arc<dyn DomainClient>, StoreError>;
}

/// Connects to remote services over REST, one client per adapter.
#[derive(Debug, Default)]
pub struct HttpConnector;

struct Credentials<'a> {
    endpoint: &'a str,
    access_key: &'a str,
    secret_key: &'a str,
}

impl HttpConnector {
    fn credentials<'a>(
        map_name: &str,
        properties: &'a StoreProperties,
    ) -> Result<Credentials<'a>, StoreError> {
        Ok(Credentials {
            endpoint: properties.require(map_name, PROP_ENDPOINT)?,
            access_key: properties.require(map_name, PROP_ACCESS_KEY)?,
            secret_key: properties.require(map_name, PROP_SECRET_KEY)?,
        })
    }
}

impl StoreConnector for HttpConnector {
    fn table_client(
        &self,
        map_name: &str,
        properties: &StoreProperties,
    ) -> Result<Arc<dyn TableClient>, StoreError> {
        let c = Self::credentials(map_name, properties)?;
        let client = HttpTableClient::new(c.endpoint, c.access_key, c.secret_key).map_err(|e| {
            StoreError::Transient {
                resource: c.endpoint.to_string(),
                source: e,
            }
        })?;
        Ok(Arc::new(client))
    }

    fn domain_client(
        &self,
        map_name: &str,
        properties: &StoreProperties,
    ) -> Result<Arc<dyn DomainClient>, StoreError> {
        let c = Self::credentials(map_name, properties)?;
        let client = HttpDomainClient::new(c.endpoint, c.access_key, c.secret_key).map_err(|e| {
            StoreError::Transient {
                resource: c.endpoint.to_string(),
                source: e,
            }
        })?;
        Ok(Arc::new(client))
    }
}

/// Serves every map from shared in-process backends.
///
/// With `auto_create` the table or domain of a map is created on first use,
/// which is what a single developer node wants; tests leave it off to exercise
/// missing-resource handling.
pub struct MemoryConnector {
    tables: Arc<MemoryTableClient>,
    domains: Arc<MemoryDomainClient>,
    auto_create: bool,
}

impl MemoryConnector {
    pub fn new(
        tables: Arc<MemoryTableClient>,
        domains: Arc<MemoryDomainClient>,
        auto_create: bool,
    ) -> Self {
        Self {
            tables,
            domains,
            auto_create,
        }
    }

    pub fn tables(&self) -> &Arc<MemoryTableClient> {
        &self.tables
    }

    pub fn domains(&self) -> &Arc<MemoryDomainClient> {
        &self.domains
    }
}

impl StoreConnector for MemoryConnector {
    fn table_client(
        &self,
        map_name: &str,
        properties: &StoreProperties,
    ) -> Result<Arc<dyn TableClient>, StoreError> {
        if self.auto_create {
            let options = TableStoreOptions::from_properties(properties);
            self.tables
                .create_table(resource_name_for(map_name), &options.key_attribute);
        }
        Ok(self.tables.clone())
    }

    fn domain_client(
        &self,
        map_name: &str,
        _properties: &StoreProperties,
    ) -> Result<Arc<dyn DomainClient>, StoreError> {
        if self.auto_create {
            self.domains.create_domain(resource_name_for(map_name));
        }
        Ok(self.domains.clone())
    }
}

/// Factory delegating to the backing technology declared for each map.
pub struct DelegatingStoreFactory {
    stores: DashMap<String, Arc<OnceCell<Arc<dyn MapStore>>>>,
    connector: Arc<dyn StoreConnector>,
    constructed: AtomicUsize,
    shut_down: AtomicBool,
}

impl DelegatingStoreFactory {
    pub fn new(connector: Arc<dyn StoreConnector>) -> Arc<Self> {
        tracing::info!("DelegatingStoreFactory::init");
        Arc::new(Self {
            stores: DashMap::new(),
            connector,
            constructed: AtomicUsize::new(0),
            shut_down: AtomicBool::new(false),
        })
    }

    /// Number of adapters constructed, including ones whose initialize failed.
    pub fn constructed_count(&self) -> usize {
        self.constructed.load(Ordering::Acquire)
    }

    /// Adapters currently published.
    pub fn store_count(&self) -> usize {
        self.stores
            .iter()
            .filter(|entry| entry.value().initialized())
            .count()
    }

    async fn create(
        &self,
        map_name: &str,
        config: &MapStoreConfig,
    ) -> Result<Arc<dyn MapStore>, StoreError> {
        tracing::debug!(
            "DelegatingStoreFactory::create map {} with engine {:?}",
            map_name,
            config.engine
        );
        self.constructed.fetch_add(1, Ordering::AcqRel);

        let store: Arc<dyn MapStore> = match config.engine {
            StoreEngine::Table => {
                let client = self.connector.table_client(map_name, &config.properties)?;
                Arc::new(TableStore::new(
                    client,
                    TableStoreOptions::from_properties(&config.properties),
                ))
            }
            StoreEngine::Domain => {
                let client = self.connector.domain_client(map_name, &config.properties)?;
                Arc::new(DomainStore::new(
                    client,
                    DomainStoreOptions::from_properties(&config.properties),
                ))
            }
        };

        if let Err(e) = store.initialize(map_name, &config.properties).await {
            tracing::error!("Persistence for map {} failed to initialize: {}", map_name, e);
            store.teardown().await;
            return Err(e);
        }
        // Shutdown may have swept the registry while this adapter was initializing.
        if self.shut_down.load(Ordering::Acquire) {
            store.teardown().await;
            return Err(self.closed(map_name));
        }
        Ok(store)
    }

    fn closed(&self, map_name: &str) -> StoreError {
        StoreError::FactoryClosed {
            map: map_name.to_string(),
        }
    }
}

#[async_trait]
impl MapStoreFactory for DelegatingStoreFactory {
    async fn new_map_store(
        &self,
        map_name: &str,
        config: &MapStoreConfig,
    ) -> Result<Arc<dyn MapStore>, StoreError> {
        let name = resource_name_for(map_name).to_string();
        tracing::debug!("DelegatingStoreFactory::new_map_store {}", name);
        if self.shut_down.load(Ordering::Acquire) {
            return Err(self.closed(map_name));
        }

        let cell = self.stores.entry(name).or_default().value().clone();
        let store = cell
            .get_or_try_init(|| self.create(map_name, config))
            .await?;
        Ok(store.clone())
    }

    async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let stores: Vec<(String, Arc<dyn MapStore>)> = self
            .stores
            .iter()
            .filter_map(|entry| {
                entry
                    .value()
                    .get()
                    .map(|store| (entry.key().clone(), store.clone()))
            })
            .collect();

        for (name, store) in stores {
            tracing::info!("Tearing down persistence for map {}", name);
            store.teardown().await;
        }
    }
}
