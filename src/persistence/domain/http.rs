//! REST/JSON client for a remote attribute store (`{endpoint}/domains/{domain}/...`).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::client::{Attribute, DomainClient, DomainMetadata, ItemNamesPage, ReplaceableItem};
use crate::persistence::error::ClientError;
use crate::persistence::rest::{Ack, RestTransport};

pub struct HttpDomainClient {
    transport: RestTransport,
}

#[derive(Serialize)]
struct ItemNameBody<'a> {
    item_name: &'a str,
}

#[derive(Serialize)]
struct ItemNamesBody {
    item_names: Vec<String>,
}

#[derive(Serialize)]
struct ItemBody {
    item: ReplaceableItem,
}

#[derive(Serialize)]
struct ItemsBody {
    items: Vec<ReplaceableItem>,
}

#[derive(Serialize)]
struct PageRequest {
    next_token: Option<String>,
}

#[derive(Deserialize)]
struct AttributesResponse {
    #[serde(default)]
    attributes: Vec<Attribute>,
}

impl HttpDomainClient {
    pub fn new(endpoint: &str, access_key: &str, secret_key: &str) -> Result<Self, ClientError> {
        Ok(Self {
            transport: RestTransport::new(endpoint, access_key, secret_key)?,
        })
    }

    fn path<'a>(domain: &'a str, action: &'a str) -> [&'a str; 3] {
        ["domains", domain, action]
    }
}

#[async_trait]
impl DomainClient for HttpDomainClient {
    async fn domain_metadata(&self, domain: &str) -> Result<DomainMetadata, ClientError> {
        self.transport.get(domain, &["domains", domain]).await
    }

    async fn get_attributes(
        &self,
        domain: &str,
        item_name: &str,
    ) -> Result<Vec<Attribute>, ClientError> {
        let response: AttributesResponse = self
            .transport
            .post(domain, &Self::path(domain, "get"), &ItemNameBody { item_name })
            .await?;
        Ok(response.attributes)
    }

    async fn put_attributes(&self, domain: &str, item: ReplaceableItem) -> Result<(), ClientError> {
        let _: Ack = self
            .transport
            .post(domain, &Self::path(domain, "put"), &ItemBody { item })
            .await?;
        Ok(())
    }

    async fn batch_put_attributes(
        &self,
        domain: &str,
        items: Vec<ReplaceableItem>,
    ) -> Result<(), ClientError> {
        let _: Ack = self
            .transport
            .post(domain, &Self::path(domain, "batch-put"), &ItemsBody { items })
            .await?;
        Ok(())
    }

    async fn delete_attributes(&self, domain: &str, item_name: &str) -> Result<(), ClientError> {
        let _: Ack = self
            .transport
            .post(domain, &Self::path(domain, "delete"), &ItemNameBody { item_name })
            .await?;
        Ok(())
    }

    async fn batch_delete_attributes(
        &self,
        domain: &str,
        item_names: Vec<String>,
    ) -> Result<(), ClientError> {
        let _: Ack = self
            .transport
            .post(domain, &Self::path(domain, "batch-delete"), &ItemNamesBody { item_names })
            .await?;
        Ok(())
    }

    async fn list_item_names(
        &self,
        domain: &str,
        next_token: Option<String>,
    ) -> Result<ItemNamesPage, ClientError> {
        self.transport
            .post(domain, &Self::path(domain, "item-names"), &PageRequest { next_token })
            .await
    }

    async fn shutdown(&self) -> Result<(), ClientError> {
        self.transport.close();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_attributes() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/domains/dev-users/get")
            .match_body(mockito::Matcher::Json(serde_json::json!({"item_name": "u1"})))
            .with_status(200)
            .with_body(r#"{"attributes": [{"name": "value", "value": "{}"}]}"#)
            .create_async()
            .await;

        let client = HttpDomainClient::new(&server.url(), "AKID", "secret").unwrap();
        let attributes = client.get_attributes("dev-users", "u1").await.unwrap();

        mock.assert_async().await;
        assert_eq!(attributes, vec![Attribute::new("value", "{}")]);
    }

    #[tokio::test]
    async fn test_missing_domain() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/domains/dev-users")
            .with_status(404)
            .create_async()
            .await;

        let client = HttpDomainClient::new(&server.url(), "AKID", "secret").unwrap();
        let result = client.domain_metadata("dev-users").await;
        assert!(matches!(result, Err(ClientError::ResourceNotFound(_))));
    }

    #[tokio::test]
    async fn test_domain_name_with_slash_stays_in_its_segment() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/domains/dev%2Fusers")
            .with_status(404)
            .create_async()
            .await;

        let client = HttpDomainClient::new(&server.url(), "AKID", "secret").unwrap();
        let result = client.domain_metadata("dev/users").await;

        mock.assert_async().await;
        assert!(matches!(result, Err(ClientError::ResourceNotFound(d)) if d == "dev/users"));
    }

    #[tokio::test]
    async fn test_item_name_paging() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/domains/dev-users/item-names")
            .match_body(mockito::Matcher::Json(serde_json::json!({"next_token": "2"})))
            .with_status(200)
            .with_body(r#"{"names": ["c"], "next_token": null}"#)
            .create_async()
            .await;

        let client = HttpDomainClient::new(&server.url(), "AKID", "secret").unwrap();
        let page = client
            .list_item_names("dev-users", Some("2".to_string()))
            .await
            .unwrap();

        assert_eq!(page.names, vec!["c".to_string()]);
        assert!(page.next_token.is_none());
    }
}
