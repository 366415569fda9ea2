//! Release pipeline orchestration.
//!
//! Stages run strictly in order and the first fatal error aborts the run:
//!
//! ```text
//! reclaim(before-build) → build → reclaim(after-build) → bundle
//!   → sign (when enabled) → reclaim(before-publish) → publish → smoke test
//! ```

use crate::builder::{ArtifactBuilder, BinaryOutput};
use crate::bundle::{BundleAssembler, UnsignedArtifact};
use crate::cli::RuntimeConfig;
use crate::config::{ConfigError, PipelineConfig};
use crate::disk::{DiskGuard, ReclaimScope};
use crate::error::Result;
use crate::publish::{PublishedArtifact, Publisher, SmokeReport, SmokeTest};
use crate::signing::{HttpSigningService, SignedArtifact, SigningClient, TokioClock};
use crate::store::Store;
use std::fmt::Display;

/// Everything a successful run produced.
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub run_id: String,
    pub binaries: Vec<BinaryOutput>,
    pub unsigned: UnsignedArtifact,
    /// `None` when signing is disabled
    pub signed: Option<SignedArtifact>,
    pub published: PublishedArtifact,
    /// `None` when the smoke test is skipped
    pub smoke: Option<SmokeReport>,
    /// Bytes freed by the disk guard across all scopes
    pub reclaimed_bytes: u64,
}

/// One release pipeline run over a resolved configuration.
#[derive(Debug, Clone)]
pub struct Pipeline {
    config: PipelineConfig,
    runtime_config: RuntimeConfig,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, runtime_config: RuntimeConfig) -> Self {
        Self {
            config,
            runtime_config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Runs every stage in order.
    pub async fn run(&self) -> Result<PipelineReport> {
        let config = &self.config;
        let rc = &self.runtime_config;
        log::info!(
            "Starting release run {} for {} {} ({})",
            config.run_id(),
            config.product_name(),
            config.build().version(),
            config.build().target()
        );

        let guard = DiskGuard::new(config.workspace(), config.disk());
        let mut reclaimed_bytes = guard.reclaim(ReclaimScope::BeforeBuild, rc).await.freed_bytes;

        let binaries = ArtifactBuilder::new(config.workspace(), config.builder(), rc)
            .build(config.build())
            .await
            .inspect_err(|e| self.report_failure("Build", e))?;

        reclaimed_bytes += guard.reclaim(ReclaimScope::AfterBuild, rc).await.freed_bytes;

        let unsigned = BundleAssembler::new(config.workspace(), config.bundle(), rc)
            .assemble(&binaries, config.build())
            .await
            .inspect_err(|e| self.report_failure("Bundle", e))?;

        let signed = if config.signing().is_some() {
            Some(self.sign(&unsigned).await?)
        } else {
            rc.progress("Signing disabled, publishing the unsigned bundle");
            None
        };

        reclaimed_bytes += guard
            .reclaim(ReclaimScope::BeforePublish, rc)
            .await
            .freed_bytes;

        let published = self.publish(&unsigned).await?;

        let smoke = match config.smoke() {
            Some(smoke_config) => Some(
                SmokeTest::new(smoke_config, rc)
                    .run(&published.path)
                    .await
                    .inspect_err(|e| self.report_failure("Smoke test", e))?,
            ),
            None => {
                rc.progress("Smoke test skipped");
                None
            }
        };

        rc.section("Summary");
        rc.indent(&format!("run id:    {}", config.run_id()));
        rc.indent(&format!("artifact:  {}", published.path.display()));
        rc.indent(&format!("sha256:    {}", published.sha256));
        if let Some(key) = &published.remote_key {
            rc.indent(&format!("uploaded:  {}", key));
        }

        Ok(PipelineReport {
            run_id: config.run_id().to_string(),
            binaries,
            unsigned,
            signed,
            published,
            smoke,
            reclaimed_bytes,
        })
    }

    /// Signs `unsigned` in place through the configured signing service.
    pub async fn sign(&self, unsigned: &UnsignedArtifact) -> Result<SignedArtifact> {
        let signing = self.config.signing().ok_or(ConfigError::Missing {
            field: "signing.endpoint",
        })?;

        let service = HttpSigningService::new(signing)
            .map_err(|e| setup_error("signing.endpoint", "signing client", e))?;
        let store = self.store()?;

        let signed = SigningClient::new(
            service,
            store,
            TokioClock,
            signing,
            self.config.run_id(),
            &self.runtime_config,
        )
        .sign(unsigned)
        .await
        .inspect_err(|e| self.report_failure("Signing", e))?;
        Ok(signed)
    }

    async fn publish(&self, unsigned: &UnsignedArtifact) -> Result<PublishedArtifact> {
        let store = self.store()?;
        // Signing overwrote the bundle in place, so the path is the same either way
        let published = Publisher::new(
            store,
            self.config.publish(),
            self.config.run_id(),
            &self.runtime_config,
        )
        .publish(&unsigned.path)
        .await
        .inspect_err(|e| self.report_failure("Publish", e))?;
        Ok(published)
    }

    fn store(&self) -> Result<Store> {
        Ok(Store::from_config(self.config.store())
            .map_err(|e| setup_error("store", "object store client", e))?)
    }

    fn report_failure(&self, stage: &str, error: &dyn Display) {
        log::error!("{} failed: {}", stage, error);
        self.runtime_config
            .error(&format!("{} failed: {}", stage, error));
    }
}

/// A client that could not be constructed from the resolved settings.
fn setup_error(field: &'static str, client: &str, error: impl Display) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: format!("cannot create the {}: {}", client, error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;

    #[test]
    fn client_setup_failures_are_configuration_errors() {
        let err = PipelineError::from(setup_error("store", "object store client", "no TLS backend"));

        assert_eq!(err.exit_code(), 1);
        assert_eq!(err.stage(), "config");
        assert!(err.to_string().contains("cannot create the object store client"));
    }

    #[tokio::test]
    async fn signing_without_configuration_is_rejected() {
        let file = crate::config::ConfigFile::from_toml_str(
            r#"
            product_name = "Goose"
            version = "1.4.0"
            target = "aarch64-apple-darwin"

            [build]
            binaries = ["goosed"]

            [bundle]
            command = ["true"]
            output = "out/Goose.zip"
            "#,
        )
        .unwrap();
        let config = crate::config::PipelineConfigBuilder::new(file, "/work")
            .build()
            .unwrap();
        let unsigned = UnsignedArtifact {
            path: "/work/out/Goose.zip".into(),
            size: 0,
            sha256: String::new(),
        };

        let err = Pipeline::new(config, RuntimeConfig::quiet())
            .sign(&unsigned)
            .await
            .unwrap_err();
        assert_eq!(err.exit_code(), 1);
    }
}
