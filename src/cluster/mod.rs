//! Cluster Bootstrap Module
//!
//! Brings a node up with persistence wired into its maps and takes it down again.
//!
//! - `install_persistence` binds a store factory to every map that declares a store.
//! - `start` joins (or forms) the cluster, serves the storage endpoints and returns a
//!   `ClusterHandle`.
//! - `stop` flushes deferred writes, tears the adapters down and leaves the cluster.

pub mod bootstrap;

pub use bootstrap::{ClusterHandle, install_persistence, start, stop};
