use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::persistence::error::ClientError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    pub value: String,
}

impl Attribute {
    pub fn new(name: &str, value: &str) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainMetadata {
    pub item_count: u64,
    pub attribute_name_count: u64,
}

/// An item whose attribute set replaces whatever the store held under the same name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplaceableItem {
    pub name: String,
    pub attributes: Vec<Attribute>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemNamesPage {
    pub names: Vec<String>,
    pub next_token: Option<String>,
}

/// Client handle for an attribute store organised in domains of named items.
///
/// Operations against a missing domain fail with `ClientError::ResourceNotFound`.
#[async_trait]
pub trait DomainClient: Send + Sync {
    async fn domain_metadata(&self, domain: &str) -> Result<DomainMetadata, ClientError>;

    /// Attributes of an item; empty when the item does not exist.
    async fn get_attributes(&self, domain: &str, item_name: &str)
    -> Result<Vec<Attribute>, ClientError>;

    async fn put_attributes(&self, domain: &str, item: ReplaceableItem) -> Result<(), ClientError>;

    async fn batch_put_attributes(
        &self,
        domain: &str,
        items: Vec<ReplaceableItem>,
    ) -> Result<(), ClientError>;

    /// Removes an item. Missing items are not an error.
    async fn delete_attributes(&self, domain: &str, item_name: &str) -> Result<(), ClientError>;

    async fn batch_delete_attributes(
        &self,
        domain: &str,
        item_names: Vec<String>,
    ) -> Result<(), ClientError>;

    /// One page of item names; pass the returned token to fetch the next page.
    async fn list_item_names(
        &self,
        domain: &str,
        next_token: Option<String>,
    ) -> Result<ItemNamesPage, ClientError>;

    async fn shutdown(&self) -> Result<(), ClientError>;
}
