//! Node Configuration Module
//!
//! Static declaration of the cluster node and of the persistence wiring of each map.
//! Loaded with figment from defaults, an optional TOML file and `MAPSTORE_*`
//! environment variables (`__` separates nested keys, e.g.
//! `MAPSTORE_MAPS__users__STORE__ENGINE=table`).

pub mod loader;
pub mod types;

pub use loader::{ConfigError, ConfigLoader};
pub use types::{
    ClusterConfig, FactoryBinding, InitialLoad, LogFormat, LoggingConfig, MapConfig,
    MapStoreConfig, StoreEngine,
};

#[cfg(test)]
mod tests;
