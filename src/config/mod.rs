//! Pipeline configuration.
//!
//! `release.toml` is parsed into a [`ConfigFile`], merged with command-line
//! overrides through [`PipelineConfigBuilder`] and resolved exactly once into
//! the immutable [`PipelineConfig`] every stage reads from. Secrets are read
//! from the environment during resolution, never ad hoc by later stages.

mod arch;
mod builder;
pub mod file;

pub use arch::Arch;
pub use builder::PipelineConfigBuilder;
pub use file::{ConfigFile, ResourceEntry};

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Config file is not valid TOML or has unknown keys
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    /// A required setting is absent
    #[error("missing required setting `{field}`")]
    Missing { field: &'static str },

    /// A setting has an unusable value
    #[error("invalid setting `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },

    /// Version is not valid semver
    #[error("invalid version `{version}`: {source}")]
    Version {
        version: String,
        source: semver::Error,
    },

    /// A secret referenced by name is not present in the environment
    #[error("environment variable `{name}` (from `{field}`) is not set")]
    MissingSecret { field: &'static str, name: String },
}

/// What to build: immutable once resolved.
#[derive(Debug, Clone)]
pub struct BuildSpec {
    target: String,
    arch: Arch,
    version: semver::Version,
    flags: Vec<String>,
    binaries: Vec<String>,
    profile: String,
}

impl BuildSpec {
    /// Creates a build spec; the architecture is derived from `target`.
    pub fn new(
        target: impl Into<String>,
        version: semver::Version,
        flags: Vec<String>,
        binaries: Vec<String>,
        profile: impl Into<String>,
    ) -> Self {
        let target = target.into();
        Self {
            arch: Arch::from_target(&target),
            target,
            version,
            flags,
            binaries,
            profile: profile.into(),
        }
    }

    /// Rust target triple (e.g., "aarch64-apple-darwin").
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Architecture detected from the target triple.
    pub fn arch(&self) -> Arch {
        self.arch
    }

    pub fn version(&self) -> &semver::Version {
        &self.version
    }

    /// Extra toolchain flags appended to the build command.
    pub fn flags(&self) -> &[String] {
        &self.flags
    }

    /// Names of the binaries the bundle requires.
    pub fn binaries(&self) -> &[String] {
        &self.binaries
    }

    /// Cargo profile name (`release` by default).
    pub fn profile(&self) -> &str {
        &self.profile
    }

    /// Directory cargo writes this profile's outputs to (`dev` builds land in `debug`).
    pub fn profile_dir(&self) -> &str {
        if self.profile == "dev" {
            "debug"
        } else {
            &self.profile
        }
    }

    /// Whether binaries carry the `.exe` suffix.
    pub fn is_windows(&self) -> bool {
        self.target.contains("windows")
    }
}

/// Toolchain invocation settings.
#[derive(Debug, Clone)]
pub struct BuilderConfig {
    pub cargo: String,
    pub rustup: String,
    /// Parallel jobs passed to cargo; defaults to the CPU count
    pub jobs: usize,
    pub timeout: Duration,
}

/// Bundle assembly settings. Paths are absolute after resolution.
#[derive(Debug, Clone)]
pub struct BundleConfig {
    /// Directory the packaging tool runs in
    pub workdir: PathBuf,
    /// Where binaries are copied so the packaging tool picks them up
    pub binaries_dir: PathBuf,
    /// Packaging configuration patched with the architecture selector
    pub config_file: Option<PathBuf>,
    /// Dotted key path of the architecture selector
    pub arch_field: Option<String>,
    /// Program followed by arguments; `{arch}`, `{version}`, `{target}` are expanded
    pub command: Vec<String>,
    /// Output template relative to `workdir`
    pub output: String,
    /// Wiped before every attempt
    pub clean_dir: Option<PathBuf>,
    pub resources: Vec<ResourceEntry>,
    pub env: BTreeMap<String, String>,
    /// Total packaging attempts, including the first
    pub attempts: u32,
    pub retry_delay: Duration,
    pub timeout: Duration,
}

/// Remote signing service settings.
#[derive(Debug, Clone)]
pub struct SigningConfig {
    pub endpoint: Url,
    pub token: Option<String>,
    /// Callback/origin reference passed on submission
    pub origin: String,
    pub expected_submit_status: u16,
    pub poll_interval: Duration,
    /// Ceiling on time from submission to completion
    pub deadline: Duration,
    pub request_timeout: Duration,
}

/// Object store backend.
#[derive(Debug, Clone)]
pub enum StoreConfig {
    /// Directory-backed store
    Fs { root: PathBuf },
    /// HTTP PUT/GET store
    Http {
        base_url: Url,
        token: Option<String>,
        request_timeout: Duration,
    },
}

/// Disk guard targets per scope.
#[derive(Debug, Clone)]
pub struct DiskConfig {
    pub before_build: Vec<String>,
    pub after_build: Vec<String>,
    pub before_publish: Vec<String>,
}

impl Default for DiskConfig {
    fn default() -> Self {
        Self {
            before_build: vec![
                "target/debug".into(),
                "target/*/incremental".into(),
                "~/.npm/_cacache".into(),
                "~/.cache/yarn".into(),
            ],
            after_build: vec![
                "target/*/*/incremental".into(),
                "target/*/*/deps".into(),
                "target/*/*/build".into(),
            ],
            before_publish: vec![
                "target/*/*/deps".into(),
                "target/*/*/build".into(),
                "~/.npm/_cacache".into(),
            ],
        }
    }
}

/// Artifact output settings.
#[derive(Debug, Clone)]
pub struct PublishConfig {
    pub output_dir: PathBuf,
    /// Also upload the final artifact to the object store
    pub upload: bool,
}

/// Smoke test settings.
#[derive(Debug, Clone)]
pub struct SmokeConfig {
    /// Executable inside an extracted `.zip` bundle
    pub executable: Option<PathBuf>,
    /// Process name used for liveness and termination; defaults to the executable name
    pub process_name: Option<String>,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub grace: Duration,
    /// Accept a launcher that exits after starting a detached process
    /// with the same name
    pub allow_detach: bool,
}

impl Default for SmokeConfig {
    fn default() -> Self {
        Self {
            executable: None,
            process_name: None,
            args: Vec::new(),
            env: BTreeMap::new(),
            grace: Duration::from_secs(5),
            allow_detach: false,
        }
    }
}

/// Fully resolved pipeline configuration.
///
/// Constructed once at pipeline start via [`PipelineConfigBuilder`].
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    run_id: String,
    workspace: PathBuf,
    product_name: String,
    build: BuildSpec,
    builder: BuilderConfig,
    bundle: BundleConfig,
    signing: Option<SigningConfig>,
    store: StoreConfig,
    disk: DiskConfig,
    publish: PublishConfig,
    smoke: SmokeConfig,
    smoke_enabled: bool,
}

impl PipelineConfig {
    /// Loads `path` and resolves it without command-line overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        PipelineConfigBuilder::from_path(path)?.build()
    }

    /// Identifier of this pipeline run; prefixes every remote object key.
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    pub fn product_name(&self) -> &str {
        &self.product_name
    }

    pub fn build(&self) -> &BuildSpec {
        &self.build
    }

    pub fn builder(&self) -> &BuilderConfig {
        &self.builder
    }

    pub fn bundle(&self) -> &BundleConfig {
        &self.bundle
    }

    /// Signing settings, `None` when signing is disabled.
    pub fn signing(&self) -> Option<&SigningConfig> {
        self.signing.as_ref()
    }

    pub fn store(&self) -> &StoreConfig {
        &self.store
    }

    pub fn disk(&self) -> &DiskConfig {
        &self.disk
    }

    pub fn publish(&self) -> &PublishConfig {
        &self.publish
    }

    /// Smoke test settings, `None` when the smoke test is skipped.
    pub fn smoke(&self) -> Option<&SmokeConfig> {
        self.smoke_enabled.then_some(&self.smoke)
    }

    /// Smoke test settings regardless of whether the pipeline runs the stage.
    pub fn smoke_settings(&self) -> &SmokeConfig {
        &self.smoke
    }
}
