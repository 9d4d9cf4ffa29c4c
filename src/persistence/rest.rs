//! Shared REST/JSON transport for the remote store clients.
//!
//! Requests are authenticated with the configured access key pair. A `404` is
//! reported as `ClientError::ResourceNotFound` for the addressed resource.
//! Paths are built from segments, each one percent-encoded.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use super::error::ClientError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub struct RestTransport {
    http_client: reqwest::Client,
    endpoint: reqwest::Url,
    access_key: String,
    secret_key: String,
    closed: AtomicBool,
}

impl RestTransport {
    pub fn new(endpoint: &str, access_key: &str, secret_key: &str) -> Result<Self, ClientError> {
        tracing::debug!(
            "Authenticating to {} using access key: {}, secret key: <secret>",
            endpoint,
            access_key
        );
        let endpoint = reqwest::Url::parse(endpoint)
            .ok()
            .filter(|url| !url.cannot_be_a_base())
            .ok_or_else(|| ClientError::Transport(format!("invalid endpoint {}", endpoint)))?;
        let http_client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            http_client,
            endpoint,
            access_key: access_key.to_string(),
            secret_key: secret_key.to_string(),
            closed: AtomicBool::new(false),
        })
    }

    fn url(&self, segments: &[&str]) -> Result<reqwest::Url, ClientError> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| ClientError::Transport(format!("invalid endpoint {}", self.endpoint)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    pub async fn get<R: DeserializeOwned>(
        &self,
        resource: &str,
        segments: &[&str],
    ) -> Result<R, ClientError> {
        let request = self.http_client.get(self.url(segments)?);
        self.send(resource, request).await
    }

    pub async fn post<B: Serialize, R: DeserializeOwned>(
        &self,
        resource: &str,
        segments: &[&str],
        body: &B,
    ) -> Result<R, ClientError> {
        let request = self.http_client.post(self.url(segments)?).json(body);
        self.send(resource, request).await
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    async fn send<R: DeserializeOwned>(
        &self,
        resource: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<R, ClientError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ClientError::Transport("client has been shut down".to_string()));
        }
        let response = request
            .basic_auth(&self.access_key, Some(&self.secret_key))
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ClientError::ResourceNotFound(resource.to_string()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json().await?)
    }
}

/// Empty acknowledgement body (`{}`).
#[derive(serde::Deserialize)]
pub struct Ack {}
