//! Managed NoSQL table backing technology.
//!
//! Each map entry is one item in a table named after the map: the key in the
//! table's hash-key attribute and the serialized value in a string attribute.

pub mod client;
pub mod http;
pub mod memory;
pub mod store;

pub use client::{AttributeValue, Item, TableClient, TableDescription, WriteRequest};
pub use http::HttpTableClient;
pub use memory::MemoryTableClient;
pub use store::{TableStore, TableStoreOptions};

/// Maximum keys per batch-get request.
pub const MAX_BATCH_GET: usize = 100;
/// Maximum writes per batch-write request.
pub const MAX_BATCH_WRITE: usize = 25;
