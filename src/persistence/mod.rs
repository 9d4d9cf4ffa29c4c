//! Persistence Bridge Module
//!
//! Connects a `DistributedMap` to an external durable store so that the cluster can
//! read through on cache misses and write through (or behind) on mutations.
//!
//! ## Core Concepts
//! - **MapStore**: The capability every backing technology implements
//!   (`load`, `load_all`, `load_all_keys`, `store`, `store_all`, `delete`, `delete_all`).
//! - **Lifecycle**: `initialize` binds an adapter to the map's backing resource exactly once
//!   and grants write access; `teardown` releases the client handle at shutdown.
//! - **Access Level**: Read-only adapters drop mutations with a warning instead of failing.
//! - **Factory**: `DelegatingStoreFactory` resolves a map name to a single adapter instance,
//!   choosing the technology from the map's static configuration.
//!
//! ## Backing Technologies
//! - **`table`**: A managed NoSQL table, one item per entry (`key` / `value` attributes).
//! - **`domain`**: A distributed attribute store, one item per entry with optional
//!   flattened document attributes (see `props`).

pub mod error;
pub mod factory;
pub mod props;
pub mod rest;
pub mod store;
pub mod types;

pub mod domain;
pub mod table;

pub use error::{ClientError, StoreError};
pub use factory::{
    DelegatingStoreFactory, HttpConnector, MapStoreFactory, MemoryConnector, StoreConnector,
};
pub use store::MapStore;
pub use types::{AccessLevel, StoreProperties};

#[cfg(test)]
mod tests;
