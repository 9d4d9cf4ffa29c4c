use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::persistence::{MapStoreFactory, StoreProperties};

/// Name of the map declaration used when a map has no declaration of its own.
pub const DEFAULT_MAP_CONFIG: &str = "default";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Node name reported in membership logs.
    pub name: String,
    /// Gossip (UDP) bind address.
    pub bind: SocketAddr,
    /// HTTP bind address. Derived from `bind` when absent.
    pub http_bind: Option<SocketAddr>,
    pub seeds: Vec<SocketAddr>,
    pub join_timeout_ms: u64,
    pub logging: LoggingConfig,
    pub maps: BTreeMap<String, MapConfig>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            name: "mapstore".to_string(),
            bind: SocketAddr::from(([127, 0, 0, 1], 5000)),
            http_bind: None,
            seeds: Vec::new(),
            join_timeout_ms: 10_000,
            logging: LoggingConfig::default(),
            maps: BTreeMap::new(),
        }
    }
}

impl ClusterConfig {
    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    /// HTTP address to listen on: explicit, or the gossip port + 1000 on the same host.
    /// An ephemeral gossip port keeps the HTTP port ephemeral too.
    pub fn http_addr(&self) -> SocketAddr {
        if let Some(addr) = self.http_bind {
            return addr;
        }
        let port = match self.bind.port() {
            0 => 0,
            p => p.saturating_add(1000),
        };
        SocketAddr::new(self.bind.ip(), port)
    }

    /// Declaration for `map_name`, falling back to the `default` declaration.
    pub fn map_config(&self, map_name: &str) -> Option<&MapConfig> {
        self.maps
            .get(map_name)
            .or_else(|| self.maps.get(DEFAULT_MAP_CONFIG))
    }

    pub fn with_map(mut self, map_name: &str, map: MapConfig) -> Self {
        self.maps.insert(map_name.to_string(), map);
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MapConfig {
    pub store: Option<MapStoreConfig>,
}

impl MapConfig {
    pub fn with_store(store: MapStoreConfig) -> Self {
        Self { store: Some(store) }
    }

    /// Store declaration that should be wired to a factory.
    pub fn active_store(&self) -> Option<&MapStoreConfig> {
        self.store.as_ref().filter(|s| s.enabled)
    }
}

/// Backing technology of a map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreEngine {
    /// Managed NoSQL table, one item per entry.
    #[serde(alias = "dynamo")]
    Table,
    /// Distributed attribute store.
    #[serde(alias = "simpledb")]
    Domain,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InitialLoad {
    #[default]
    Lazy,
    Eager,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapStoreConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub engine: StoreEngine,
    /// Zero means write-through; otherwise mutations are flushed every N seconds.
    #[serde(default)]
    pub write_delay_seconds: u64,
    #[serde(default = "default_write_batch_size")]
    pub write_batch_size: usize,
    #[serde(default)]
    pub initial_load: InitialLoad,
    #[serde(default)]
    pub properties: StoreProperties,
    #[serde(skip)]
    pub factory: FactoryBinding,
}

fn default_enabled() -> bool {
    true
}

fn default_write_batch_size() -> usize {
    100
}

impl MapStoreConfig {
    pub fn new(engine: StoreEngine) -> Self {
        Self {
            enabled: true,
            engine,
            write_delay_seconds: 0,
            write_batch_size: default_write_batch_size(),
            initial_load: InitialLoad::Lazy,
            properties: StoreProperties::new(),
            factory: FactoryBinding::default(),
        }
    }

    pub fn with_properties(mut self, properties: StoreProperties) -> Self {
        self.properties = properties;
        self
    }

    pub fn with_write_delay(mut self, seconds: u64) -> Self {
        self.write_delay_seconds = seconds;
        self
    }

    pub fn with_initial_load(mut self, mode: InitialLoad) -> Self {
        self.initial_load = mode;
        self
    }

    pub fn is_write_behind(&self) -> bool {
        self.write_delay_seconds > 0
    }

    pub fn write_delay(&self) -> Duration {
        Duration::from_secs(self.write_delay_seconds)
    }
}

/// Factory installed into a store declaration at startup. Never serialized.
#[derive(Clone, Default)]
pub struct FactoryBinding(Option<Arc<dyn MapStoreFactory>>);

impl FactoryBinding {
    pub fn bind(&mut self, factory: Arc<dyn MapStoreFactory>) {
        self.0 = Some(factory);
    }

    pub fn get(&self) -> Option<&Arc<dyn MapStoreFactory>> {
        self.0.as_ref()
    }

    pub fn is_bound(&self) -> bool {
        self.0.is_some()
    }
}

impl fmt::Debug for FactoryBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(if self.is_bound() { "bound" } else { "unbound" })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}
