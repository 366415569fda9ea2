//! Directory-backed object store for dry runs and local testing.

use super::{ObjectStore, StoreError, validate_key};
use crate::utils::fs::write_atomic;
use bytes::Bytes;
use std::io;
use std::path::{Path, PathBuf};

/// Stores each object as a file under `root`, mirroring the key's path.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    /// File backing `key`.
    pub fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }
}

impl ObjectStore for FsObjectStore {
    async fn put(&self, key: &str, bytes: Bytes) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        let io_err = |source| StoreError::Io {
            key: key.to_string(),
            source,
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        write_atomic(&path, &bytes).await.map_err(io_err)?;
        log::debug!("Stored {} bytes at {}", bytes.len(), path.display());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Bytes, StoreError> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(contents) => Ok(Bytes::from(contents)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(StoreError::NotFound {
                key: key.to_string(),
            }),
            Err(source) => Err(StoreError::Io {
                key: key.to_string(),
                source,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_overwrites_and_get_reads_back() {
        let root = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(root.path());

        store
            .put("unsigned/run/abc/App.zip", Bytes::from_static(b"first"))
            .await
            .unwrap();
        store
            .put("unsigned/run/abc/App.zip", Bytes::from_static(b"second"))
            .await
            .unwrap();

        let bytes = store.get("unsigned/run/abc/App.zip").await.unwrap();
        assert_eq!(&bytes[..], b"second");
        assert!(root.path().join("unsigned/run/abc/App.zip").is_file());
    }

    #[tokio::test]
    async fn missing_key_is_not_found() {
        let root = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(root.path());
        assert!(matches!(
            store.get("signed/none.zip").await,
            Err(StoreError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn escaping_key_is_rejected() {
        let root = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(&root.path().join("store"));
        assert!(matches!(
            store.put("../outside", Bytes::new()).await,
            Err(StoreError::InvalidKey { .. })
        ));
        assert!(!root.path().join("outside").exists());
    }
}
