//! Distributed Map Persistence Library
//!
//! A clustered in-memory map whose named maps can be backed by external durable
//! stores. Reads miss through to the store, mutations are written through (or
//! behind) before they are applied in memory.
//!
//! ## Architecture Modules
//! - **`persistence`**: The bridge to backing stores. Defines the `MapStore` adapter
//!   capability, its table and attribute-store implementations, and the factory that
//!   resolves a map name to exactly one adapter.
//! - **`storage`**: The partitioned, replicated `DistributedMap` and the registry that
//!   creates named maps with their persistence.
//! - **`membership`**: UDP gossip membership (SWIM-like) for discovery and failure detection.
//! - **`cluster`**: Node bootstrap: persistence installation, start and stop.
//! - **`config`**: figment-based configuration of the node and its maps.
//! - **`logging`**: tracing subscriber setup.

pub mod cluster;
pub mod config;
pub mod logging;
pub mod membership;
pub mod persistence;
pub mod storage;
