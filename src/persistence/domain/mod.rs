//! Distributed attribute store backing technology.
//!
//! Each map entry is one item in a domain named after the map. The serialized value
//! lives in a single attribute; documents can additionally be flattened into
//! path-named attributes so the store can query them.

pub mod client;
pub mod http;
pub mod memory;
pub mod store;

pub use client::{Attribute, DomainClient, DomainMetadata, ItemNamesPage, ReplaceableItem};
pub use http::HttpDomainClient;
pub use memory::MemoryDomainClient;
pub use store::{DomainStore, DomainStoreOptions};

/// Maximum items per batch put/delete request.
pub const MAX_BATCH_ITEMS: usize = 25;
