//! In-process attribute store used for local development and tests.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::client::{Attribute, DomainClient, DomainMetadata, ItemNamesPage, ReplaceableItem};
use crate::persistence::error::ClientError;

const PAGE_SIZE: usize = 100;

type Domain = DashMap<String, Vec<Attribute>>;

#[derive(Default)]
pub struct MemoryDomainClient {
    domains: DashMap<String, Arc<Domain>>,
    shutdowns: AtomicUsize,
}

impl MemoryDomainClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn create_domain(&self, domain: &str) {
        self.domains
            .entry(domain.to_string())
            .or_insert_with(|| Arc::new(DashMap::new()));
    }

    pub fn item_count(&self, domain: &str) -> usize {
        self.domains.get(domain).map(|d| d.len()).unwrap_or(0)
    }

    /// Writes an item directly, bypassing any adapter.
    pub fn insert_raw(&self, domain: &str, item_name: &str, attributes: Vec<Attribute>) {
        self.create_domain(domain);
        if let Some(d) = self.domains.get(domain) {
            d.insert(item_name.to_string(), attributes);
        }
    }

    pub fn shutdown_count(&self) -> usize {
        self.shutdowns.load(Ordering::Acquire)
    }

    fn domain(&self, domain: &str) -> Result<Arc<Domain>, ClientError> {
        self.domains
            .get(domain)
            .map(|d| d.value().clone())
            .ok_or_else(|| ClientError::ResourceNotFound(domain.to_string()))
    }
}

#[async_trait]
impl DomainClient for MemoryDomainClient {
    async fn domain_metadata(&self, domain: &str) -> Result<DomainMetadata, ClientError> {
        let d = self.domain(domain)?;
        let attribute_names: HashSet<String> = d
            .iter()
            .flat_map(|item| {
                item.value()
                    .iter()
                    .map(|a| a.name.clone())
                    .collect::<Vec<_>>()
            })
            .collect();
        Ok(DomainMetadata {
            item_count: d.len() as u64,
            attribute_name_count: attribute_names.len() as u64,
        })
    }

    async fn get_attributes(
        &self,
        domain: &str,
        item_name: &str,
    ) -> Result<Vec<Attribute>, ClientError> {
        let d = self.domain(domain)?;
        Ok(d.get(item_name).map(|a| a.value().clone()).unwrap_or_default())
    }

    async fn put_attributes(&self, domain: &str, item: ReplaceableItem) -> Result<(), ClientError> {
        let d = self.domain(domain)?;
        d.insert(item.name, item.attributes);
        Ok(())
    }

    async fn batch_put_attributes(
        &self,
        domain: &str,
        items: Vec<ReplaceableItem>,
    ) -> Result<(), ClientError> {
        let d = self.domain(domain)?;
        for item in items {
            d.insert(item.name, item.attributes);
        }
        Ok(())
    }

    async fn delete_attributes(&self, domain: &str, item_name: &str) -> Result<(), ClientError> {
        let d = self.domain(domain)?;
        d.remove(item_name);
        Ok(())
    }

    async fn batch_delete_attributes(
        &self,
        domain: &str,
        item_names: Vec<String>,
    ) -> Result<(), ClientError> {
        let d = self.domain(domain)?;
        for name in item_names {
            d.remove(&name);
        }
        Ok(())
    }

    async fn list_item_names(
        &self,
        domain: &str,
        next_token: Option<String>,
    ) -> Result<ItemNamesPage, ClientError> {
        let d = self.domain(domain)?;
        let offset = match next_token {
            Some(token) => token
                .parse::<usize>()
                .map_err(|_| ClientError::Status {
                    status: 400,
                    body: format!("invalid next token '{}'", token),
                })?,
            None => 0,
        };

        let mut names: Vec<String> = d.iter().map(|item| item.key().clone()).collect();
        names.sort();

        let page: Vec<String> = names.iter().skip(offset).take(PAGE_SIZE).cloned().collect();
        let end = offset + page.len();
        let next_token = (end < names.len()).then(|| end.to_string());

        Ok(ItemNamesPage {
            names: page,
            next_token,
        })
    }

    async fn shutdown(&self) -> Result<(), ClientError> {
        self.shutdowns.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}
