//! Publishing: final artifact placement, checksum file, optional upload, and
//! the post-publish smoke test.

mod smoke;

pub use smoke::{SmokeReport, SmokeTest};

use crate::cli::RuntimeConfig;
use crate::config::PublishConfig;
use crate::store::{ObjectStore, StoreError, release_key};
use crate::utils::{checksum, fs as fs_utils};
use bytes::Bytes;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Publish and smoke test errors
#[derive(Error, Debug)]
pub enum PublishError {
    /// The artifact could not be copied into the output directory
    #[error("failed to copy {from} to {to}: {source}")]
    Copy {
        from: PathBuf,
        to: PathBuf,
        source: io::Error,
    },

    /// The release upload failed
    #[error("failed to upload {key}: {source}")]
    Upload { key: String, source: StoreError },

    /// The published bundle did not launch or did not stay alive
    #[error("smoke test failed: {reason}")]
    SmokeTest { reason: String },

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// The final, published artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedArtifact {
    pub path: PathBuf,
    pub sha256: String,
    /// Object-store key when the artifact was uploaded
    pub remote_key: Option<String>,
}

/// Places the final artifact in the output directory.
#[derive(Debug, Clone)]
pub struct Publisher<O> {
    store: O,
    config: PublishConfig,
    run_id: String,
    runtime_config: RuntimeConfig,
}

impl<O: ObjectStore + Sync> Publisher<O> {
    pub fn new(
        store: O,
        config: &PublishConfig,
        run_id: &str,
        runtime_config: &RuntimeConfig,
    ) -> Self {
        Self {
            store,
            config: config.clone(),
            run_id: run_id.to_string(),
            runtime_config: runtime_config.clone(),
        }
    }

    /// Copies `artifact` into the output directory, writes `<name>.sha256`
    /// next to it and uploads it when configured.
    pub async fn publish(&self, artifact: &Path) -> Result<PublishedArtifact, PublishError> {
        self.runtime_config.section("Publishing");

        let name = artifact
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("{} has no file name", artifact.display()),
                )
            })?;
        let dest = self.config.output_dir.join(&name);

        if !same_file(artifact, &dest).await {
            fs_utils::copy_file(artifact, &dest)
                .await
                .map_err(|source| PublishError::Copy {
                    from: artifact.to_path_buf(),
                    to: dest.clone(),
                    source,
                })?;
        }

        let sha256 = checksum::calculate_sha256(&dest).await?;
        let checksum_path = self.config.output_dir.join(format!("{}.sha256", name));
        tokio::fs::write(&checksum_path, format!("{}  {}\n", sha256, name)).await?;
        self.runtime_config
            .success(&format!("Published {} (sha256 {})", dest.display(), sha256));

        let remote_key = if self.config.upload {
            let key = release_key(&self.run_id, &name);
            let bytes = tokio::fs::read(&dest).await?;
            self.store
                .put(&key, Bytes::from(bytes))
                .await
                .map_err(|source| PublishError::Upload {
                    key: key.clone(),
                    source,
                })?;
            self.runtime_config.success(&format!("Uploaded to {}", key));
            Some(key)
        } else {
            None
        };

        Ok(PublishedArtifact {
            path: dest,
            sha256,
            remote_key,
        })
    }
}

async fn same_file(a: &Path, b: &Path) -> bool {
    match (tokio::fs::canonicalize(a).await, tokio::fs::canonicalize(b).await) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FsObjectStore;

    fn publisher(store: &Path, output_dir: &Path, upload: bool) -> Publisher<FsObjectStore> {
        Publisher::new(
            FsObjectStore::new(store),
            &PublishConfig {
                output_dir: output_dir.to_path_buf(),
                upload,
            },
            "run-7",
            &RuntimeConfig::quiet(),
        )
    }

    #[tokio::test]
    async fn copies_artifact_and_writes_checksum_file() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("build/Goose.zip");
        std::fs::create_dir_all(artifact.parent().unwrap()).unwrap();
        std::fs::write(&artifact, b"abc").unwrap();

        let published = publisher(&dir.path().join("store"), &dir.path().join("dist"), false)
            .publish(&artifact)
            .await
            .unwrap();

        assert_eq!(published.path, dir.path().join("dist/Goose.zip"));
        assert_eq!(
            published.sha256,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(
            std::fs::read_to_string(dir.path().join("dist/Goose.zip.sha256")).unwrap(),
            format!("{}  Goose.zip\n", published.sha256)
        );
        assert!(published.remote_key.is_none());
    }

    #[tokio::test]
    async fn uploads_under_run_scoped_key() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("Goose.zip");
        std::fs::write(&artifact, b"signed").unwrap();

        let published = publisher(&dir.path().join("store"), &dir.path().join("dist"), true)
            .publish(&artifact)
            .await
            .unwrap();

        assert_eq!(published.remote_key.as_deref(), Some("releases/run-7/Goose.zip"));
        assert_eq!(
            std::fs::read(dir.path().join("store/releases/run-7/Goose.zip")).unwrap(),
            b"signed"
        );
    }

    #[tokio::test]
    async fn artifact_already_in_output_dir_is_not_copied_over_itself() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("Goose.zip");
        std::fs::write(&artifact, b"abc").unwrap();

        let published = publisher(&dir.path().join("store"), dir.path(), false)
            .publish(&artifact)
            .await
            .unwrap();

        assert_eq!(std::fs::read(&published.path).unwrap(), b"abc");
    }
}
