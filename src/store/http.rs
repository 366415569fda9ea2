//! HTTP object store: `PUT {base}/{key}` and `GET {base}/{key}`.

use super::{ObjectStore, StoreError, validate_key};
use bytes::Bytes;
use reqwest::StatusCode;
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone)]
pub struct HttpObjectStore {
    client: reqwest::Client,
    base_url: Url,
    token: Option<String>,
}

impl HttpObjectStore {
    pub fn new(
        base_url: Url,
        token: Option<String>,
        request_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|source| StoreError::Request {
                key: base_url.to_string(),
                source,
            })?;
        Ok(Self {
            client,
            base_url,
            token,
        })
    }

    /// Absolute URL of `key`.
    pub fn url_for(&self, key: &str) -> Result<Url, StoreError> {
        validate_key(key)?;
        let url = format!("{}/{}", self.base_url.as_str().trim_end_matches('/'), key);
        Url::parse(&url).map_err(|_| StoreError::InvalidKey {
            key: key.to_string(),
        })
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

impl ObjectStore for HttpObjectStore {
    async fn put(&self, key: &str, bytes: Bytes) -> Result<(), StoreError> {
        let url = self.url_for(key)?;
        log::debug!("PUT {} ({} bytes)", url, bytes.len());

        let response = self
            .authorize(self.client.put(url))
            .body(bytes)
            .send()
            .await
            .map_err(|source| StoreError::Request {
                key: key.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(StoreError::Status {
                key: key.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Bytes, StoreError> {
        let url = self.url_for(key)?;
        log::debug!("GET {}", url);

        let response = self
            .authorize(self.client.get(url))
            .send()
            .await
            .map_err(|source| StoreError::Request {
                key: key.to_string(),
                source,
            })?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(StoreError::NotFound {
                key: key.to_string(),
            }),
            status if !status.is_success() => Err(StoreError::Status {
                key: key.to_string(),
                status: status.as_u16(),
            }),
            _ => response.bytes().await.map_err(|source| StoreError::Request {
                key: key.to_string(),
                source,
            }),
        }
    }
}
