use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::persistence::error::ClientError;

/// A typed attribute value, encoded as `{"S": "..."}` / `{"N": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttributeValue {
    S(String),
    N(String),
}

impl AttributeValue {
    pub fn as_s(&self) -> Option<&str> {
        match self {
            AttributeValue::S(s) => Some(s),
            AttributeValue::N(_) => None,
        }
    }
}

pub type Item = HashMap<String, AttributeValue>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDescription {
    pub table_name: String,
    pub key_attribute: String,
    #[serde(default)]
    pub item_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteRequest {
    Put(Item),
    Delete(Item),
}

/// Client handle for a managed table service.
///
/// A single handle is shared by every task using an adapter, so implementations
/// must be thread-safe. Operations against a missing table fail with
/// `ClientError::ResourceNotFound`.
#[async_trait]
pub trait TableClient: Send + Sync {
    async fn describe_table(&self, table: &str) -> Result<TableDescription, ClientError>;

    async fn get_item(&self, table: &str, key: &Item) -> Result<Option<Item>, ClientError>;

    /// Returns the items found among `keys` in no particular order.
    async fn batch_get_item(&self, table: &str, keys: &[Item]) -> Result<Vec<Item>, ClientError>;

    /// Inserts or replaces the item with the same key.
    async fn put_item(&self, table: &str, item: Item) -> Result<(), ClientError>;

    /// Removes the item with the given key. Missing items are not an error.
    async fn delete_item(&self, table: &str, key: &Item) -> Result<(), ClientError>;

    /// Applies puts and deletes in submission order.
    async fn batch_write_item(
        &self,
        table: &str,
        writes: Vec<WriteRequest>,
    ) -> Result<(), ClientError>;

    async fn shutdown(&self) -> Result<(), ClientError>;
}
