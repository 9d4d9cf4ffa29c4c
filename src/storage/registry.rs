//! Named maps of one node, created on first access.

use anyhow::{Context, Result};
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::OnceCell;

use super::MapValue;
use super::memory::{DistributedMap, MapPersistence};
use super::partitioner::PartitionManager;
use super::write_behind::WriteBehindQueue;
use crate::config::types::{DEFAULT_MAP_CONFIG, InitialLoad, MapConfig, MapStoreConfig};
use crate::membership::service::MembershipService;
use crate::persistence::MapStoreFactory;

pub type StringMap<V> = DistributedMap<String, V>;

pub struct MapRegistry<V> {
    maps: DashMap<String, Arc<OnceCell<Arc<StringMap<V>>>>>,
    configs: BTreeMap<String, MapConfig>,
    membership: Arc<MembershipService>,
    partitioner: Arc<PartitionManager>,
    base_path: String,
}

impl<V: MapValue> MapRegistry<V> {
    pub fn new(
        membership: Arc<MembershipService>,
        partitioner: Arc<PartitionManager>,
        configs: BTreeMap<String, MapConfig>,
    ) -> Self {
        Self {
            maps: DashMap::new(),
            configs,
            membership,
            partitioner,
            base_path: String::new(),
        }
    }

    pub fn with_base_path(mut self, base_path: &str) -> Self {
        self.base_path = base_path.to_string();
        self
    }

    /// Store declaration for `name`, falling back to the `default` map declaration.
    fn store_config(&self, name: &str) -> Option<&MapStoreConfig> {
        self.configs
            .get(name)
            .or_else(|| self.configs.get(DEFAULT_MAP_CONFIG))
            .and_then(MapConfig::active_store)
    }

    /// Returns the map called `name`, creating it on first access.
    ///
    /// Concurrent first accesses share one creation. A map whose persistence fails
    /// to initialize is not registered, so the next access tries again.
    pub async fn get_map(&self, name: &str) -> Result<Arc<StringMap<V>>> {
        let cell = self.maps.entry(name.to_string()).or_default().value().clone();
        let map = cell.get_or_try_init(|| self.create_map(name)).await?;
        Ok(map.clone())
    }

    pub fn existing(&self, name: &str) -> Option<Arc<StringMap<V>>> {
        self.maps
            .get(name)
            .and_then(|cell| cell.value().get().cloned())
    }

    pub fn map_names(&self) -> Vec<String> {
        self.maps
            .iter()
            .filter(|entry| entry.value().initialized())
            .map(|entry| entry.key().clone())
            .collect()
    }

    async fn create_map(&self, name: &str) -> Result<Arc<StringMap<V>>> {
        let map = StringMap::new_with_base(
            name,
            self.membership.clone(),
            self.partitioner.clone(),
            &self.base_path,
        );

        let Some(config) = self.store_config(name) else {
            tracing::info!("Map {} created without persistence", name);
            return Ok(Arc::new(map));
        };
        let Some(factory) = config.factory.get() else {
            tracing::warn!("Map {} declares a store but no factory is installed", name);
            return Ok(Arc::new(map));
        };

        let store = factory
            .new_map_store(name, config)
            .await
            .with_context(|| format!("Failed to initialize persistence for map {}", name))?;

        let write_behind = config.is_write_behind().then(|| {
            WriteBehindQueue::new(name, store.clone(), config.write_delay(), config.write_batch_size)
        });
        let map = Arc::new(map.with_persistence(MapPersistence {
            store,
            write_behind,
        }));

        if config.initial_load == InitialLoad::Eager {
            map.preload()
                .await
                .with_context(|| format!("Initial load of map {} failed", name))?;
        }
        // The flusher starts only once the map is going to be published.
        if let Some(queue) = map.write_behind() {
            queue.start();
        }
        tracing::info!(
            "Map {} created with {:?} persistence on [{}]",
            name,
            config.engine,
            map.store().map(|s| s.resource_name()).unwrap_or_default()
        );
        Ok(map)
    }

    /// Opens every explicitly declared map that loads eagerly.
    pub async fn open_eager_maps(&self) -> Result<()> {
        let eager: Vec<String> = self
            .configs
            .iter()
            .filter(|(name, config)| {
                name.as_str() != DEFAULT_MAP_CONFIG
                    && config
                        .active_store()
                        .is_some_and(|store| store.initial_load == InitialLoad::Eager)
            })
            .map(|(name, _)| name.clone())
            .collect();

        for name in eager {
            self.get_map(&name).await?;
        }
        Ok(())
    }

    /// Distinct factories bound to the declared maps.
    pub fn factories(&self) -> Vec<Arc<dyn MapStoreFactory>> {
        let mut factories: Vec<Arc<dyn MapStoreFactory>> = Vec::new();
        for config in self.configs.values() {
            if let Some(factory) = config.store.as_ref().and_then(|s| s.factory.get())
                && !factories
                    .iter()
                    .any(|known| std::ptr::addr_eq(Arc::as_ptr(known), Arc::as_ptr(factory)))
            {
                factories.push(factory.clone());
            }
        }
        factories
    }

    /// Flushes deferred writes of every open map.
    pub async fn shutdown(&self) {
        let maps: Vec<Arc<StringMap<V>>> = self
            .maps
            .iter()
            .filter_map(|entry| entry.value().get().cloned())
            .collect();

        for map in maps {
            if let Err(e) = map.shutdown().await {
                tracing::error!("Shutdown of map {} lost writes: {:#}", map.name(), e);
            }
        }
    }
}
