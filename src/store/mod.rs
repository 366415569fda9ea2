//! Object store used to hand bundles to the signing service and to publish
//! releases.
//!
//! The store is addressed by `/`-separated keys. Every key the pipeline
//! writes is prefixed with the run id so concurrent runs never collide.

mod fs;
mod http;

pub use fs::FsObjectStore;
pub use http::HttpObjectStore;

use crate::config::StoreConfig;
use bytes::Bytes;
use std::future::Future;
use thiserror::Error;

/// Object store errors
#[derive(Error, Debug)]
pub enum StoreError {
    /// Key is empty, absolute or escapes the store
    #[error("invalid object key `{key}`")]
    InvalidKey { key: String },

    /// Nothing is stored under the key
    #[error("object `{key}` not found")]
    NotFound { key: String },

    /// The remote store answered with an unexpected status
    #[error("store returned HTTP {status} for `{key}`")]
    Status { key: String, status: u16 },

    /// The remote store could not be reached
    #[error("request for `{key}` failed: {source}")]
    Request {
        key: String,
        source: reqwest::Error,
    },

    /// Local storage failed
    #[error("IO error for `{key}`: {source}")]
    Io {
        key: String,
        source: std::io::Error,
    },
}

/// Key/value blob storage.
///
/// `put` overwrites whatever is stored under the key.
pub trait ObjectStore {
    fn put(&self, key: &str, bytes: Bytes) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn get(&self, key: &str) -> impl Future<Output = Result<Bytes, StoreError>> + Send;
}

/// Store selected by configuration.
#[derive(Debug, Clone)]
pub enum Store {
    Fs(FsObjectStore),
    Http(HttpObjectStore),
}

impl Store {
    pub fn from_config(config: &StoreConfig) -> Result<Self, StoreError> {
        Ok(match config {
            StoreConfig::Fs { root } => Store::Fs(FsObjectStore::new(root)),
            StoreConfig::Http {
                base_url,
                token,
                request_timeout,
            } => Store::Http(HttpObjectStore::new(
                base_url.clone(),
                token.clone(),
                *request_timeout,
            )?),
        })
    }
}

impl ObjectStore for Store {
    async fn put(&self, key: &str, bytes: Bytes) -> Result<(), StoreError> {
        match self {
            Store::Fs(store) => store.put(key, bytes).await,
            Store::Http(store) => store.put(key, bytes).await,
        }
    }

    async fn get(&self, key: &str) -> Result<Bytes, StoreError> {
        match self {
            Store::Fs(store) => store.get(key).await,
            Store::Http(store) => store.get(key).await,
        }
    }
}

/// Key an unsigned bundle is uploaded under for signing.
///
/// The content hash keeps re-submissions of a changed bundle apart within
/// one run.
pub fn unsigned_key(run_id: &str, sha256: &str, file_name: &str) -> String {
    let short = sha256.get(..16).unwrap_or(sha256);
    format!("unsigned/{run_id}/{short}/{file_name}")
}

/// Key a published release is uploaded under.
pub fn release_key(run_id: &str, file_name: &str) -> String {
    format!("releases/{run_id}/{file_name}")
}

/// Rejects keys that are empty, absolute, or contain `..`/empty segments.
pub fn validate_key(key: &str) -> Result<(), StoreError> {
    let valid = !key.is_empty()
        && !key.contains('\\')
        && key
            .split('/')
            .all(|segment| !segment.is_empty() && segment != "." && segment != "..");
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidKey {
            key: key.to_string(),
        })
    }
}
