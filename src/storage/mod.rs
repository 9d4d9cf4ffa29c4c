//! Distributed Storage Module
//!
//! A sharded, replicated in-memory key-value store with pluggable persistence.
//!
//! ## Core Concepts
//! - **Partitioning**: Keys hash into fixed partitions; `PartitionManager` assigns each
//!   partition a primary and a backup node.
//! - **Replication**: The primary applies a mutation and pushes it to the backup.
//! - **Persistence**: A map with a configured `MapStore` reads through on a primary miss
//!   and writes through (or behind, via `WriteBehindQueue`) before applying mutations.
//! - **Registry**: `MapRegistry` creates named maps on first access and wires their stores.

use serde::Serialize;
use serde::de::DeserializeOwned;

pub mod handlers;
pub mod memory;
pub mod partitioner;
pub mod protocol;
pub mod registry;
pub mod write_behind;

/// Values a map can hold and ship between nodes.
pub trait MapValue: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> MapValue for T where T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}
