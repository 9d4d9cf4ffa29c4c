//! REST/JSON client for a remote table service.
//!
//! Every operation is a `POST {endpoint}/tables/{table}/{action}` (describe is a `GET`)
//! authenticated with the configured access key pair. A `404` means the table
//! does not exist.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::client::{Item, TableClient, TableDescription, WriteRequest};
use crate::persistence::error::ClientError;
use crate::persistence::rest::{Ack, RestTransport};

pub struct HttpTableClient {
    transport: RestTransport,
}

#[derive(Serialize)]
struct KeyBody<'a> {
    key: &'a Item,
}

#[derive(Serialize)]
struct KeysBody<'a> {
    keys: &'a [Item],
}

#[derive(Serialize)]
struct ItemBody {
    item: Item,
}

#[derive(Serialize)]
struct WritesBody {
    writes: Vec<WriteRequest>,
}

#[derive(Deserialize)]
struct GetItemResponse {
    item: Option<Item>,
}

#[derive(Deserialize)]
struct BatchGetResponse {
    #[serde(default)]
    items: Vec<Item>,
}

impl HttpTableClient {
    pub fn new(endpoint: &str, access_key: &str, secret_key: &str) -> Result<Self, ClientError> {
        Ok(Self {
            transport: RestTransport::new(endpoint, access_key, secret_key)?,
        })
    }

    fn path<'a>(table: &'a str, action: &'a str) -> [&'a str; 3] {
        ["tables", table, action]
    }
}

#[async_trait]
impl TableClient for HttpTableClient {
    async fn describe_table(&self, table: &str) -> Result<TableDescription, ClientError> {
        self.transport.get(table, &["tables", table]).await
    }

    async fn get_item(&self, table: &str, key: &Item) -> Result<Option<Item>, ClientError> {
        let response: GetItemResponse = self
            .transport
            .post(table, &Self::path(table, "get"), &KeyBody { key })
            .await?;
        Ok(response.item)
    }

    async fn batch_get_item(&self, table: &str, keys: &[Item]) -> Result<Vec<Item>, ClientError> {
        let response: BatchGetResponse = self
            .transport
            .post(table, &Self::path(table, "batch-get"), &KeysBody { keys })
            .await?;
        Ok(response.items)
    }

    async fn put_item(&self, table: &str, item: Item) -> Result<(), ClientError> {
        let _: Ack = self
            .transport
            .post(table, &Self::path(table, "put"), &ItemBody { item })
            .await?;
        Ok(())
    }

    async fn delete_item(&self, table: &str, key: &Item) -> Result<(), ClientError> {
        let _: Ack = self
            .transport
            .post(table, &Self::path(table, "delete"), &KeyBody { key })
            .await?;
        Ok(())
    }

    async fn batch_write_item(
        &self,
        table: &str,
        writes: Vec<WriteRequest>,
    ) -> Result<(), ClientError> {
        let _: Ack = self
            .transport
            .post(table, &Self::path(table, "batch-write"), &WritesBody { writes })
            .await?;
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), ClientError> {
        self.transport.close();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::table::AttributeValue;

    fn key_item(key: &str) -> Item {
        Item::from([("key".to_string(), AttributeValue::S(key.to_string()))])
    }

    #[tokio::test]
    async fn test_describe_missing_table_is_resource_not_found() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/tables/users")
            .with_status(404)
            .create_async()
            .await;

        let client = HttpTableClient::new(&server.url(), "AKID", "secret").unwrap();
        let result = client.describe_table("users").await;

        mock.assert_async().await;
        assert!(matches!(result, Err(ClientError::ResourceNotFound(t)) if t == "users"));
    }

    #[tokio::test]
    async fn test_get_item_parses_typed_attributes() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/tables/users/get")
            .match_header("authorization", mockito::Matcher::Regex("^Basic ".to_string()))
            .match_body(mockito::Matcher::Json(serde_json::json!({
                "key": {"key": {"S": "u1"}}
            })))
            .with_status(200)
            .with_body(r#"{"item": {"key": {"S": "u1"}, "value": {"S": "{\"name\":\"a\"}"}}}"#)
            .create_async()
            .await;

        let client = HttpTableClient::new(&server.url(), "AKID", "secret").unwrap();
        let item = client.get_item("users", &key_item("u1")).await.unwrap().unwrap();

        mock.assert_async().await;
        assert_eq!(
            item.get("value"),
            Some(&AttributeValue::S("{\"name\":\"a\"}".to_string()))
        );
    }

    #[tokio::test]
    async fn test_table_name_is_one_encoded_segment() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/tables/team%2Fusers%3Fx/get")
            .with_status(200)
            .with_body(r#"{"item": null}"#)
            .create_async()
            .await;

        let client = HttpTableClient::new(&format!("{}/", server.url()), "AKID", "secret").unwrap();
        let item = client.get_item("team/users?x", &key_item("u1")).await.unwrap();

        mock.assert_async().await;
        assert!(item.is_none());
    }

    #[test]
    fn test_rejects_unusable_endpoint() {
        assert!(HttpTableClient::new("not a url", "AKID", "secret").is_err());
    }

    #[tokio::test]
    async fn test_get_item_absent() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/tables/users/get")
            .with_status(200)
            .with_body(r#"{"item": null}"#)
            .create_async()
            .await;

        let client = HttpTableClient::new(&server.url(), "AKID", "secret").unwrap();
        let item = client.get_item("users", &key_item("nope")).await.unwrap();
        assert!(item.is_none());
    }

    #[tokio::test]
    async fn test_server_error_is_reported_with_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/tables/users/put")
            .with_status(503)
            .with_body("throttled")
            .create_async()
            .await;

        let client = HttpTableClient::new(&server.url(), "AKID", "secret").unwrap();
        let result = client.put_item("users", key_item("u1")).await;

        match result {
            Err(ClientError::Status { status, body }) => {
                assert_eq!(status, 503);
                assert_eq!(body, "throttled");
            }
            other => panic!("expected status error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_batch_write_encodes_puts_and_deletes() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/tables/users/batch-write")
            .match_body(mockito::Matcher::Json(serde_json::json!({
                "writes": [
                    {"put": {"key": {"S": "a"}}},
                    {"delete": {"key": {"S": "b"}}}
                ]
            })))
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        let client = HttpTableClient::new(&server.url(), "AKID", "secret").unwrap();
        client
            .batch_write_item(
                "users",
                vec![
                    WriteRequest::Put(key_item("a")),
                    WriteRequest::Delete(key_item("b")),
                ],
            )
            .await
            .unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_calls_after_shutdown_fail() {
        let client = HttpTableClient::new("http://127.0.0.1:9", "AKID", "secret").unwrap();
        client.shutdown().await.unwrap();

        let result = client.describe_table("users").await;
        assert!(matches!(result, Err(ClientError::Transport(_))));
    }
}
