//! On-disk `release.toml` schema.
//!
//! Every field is optional here; defaults and validation are applied by
//! [`PipelineConfigBuilder`](super::PipelineConfigBuilder).

use super::ConfigError;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Parsed `release.toml`.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    /// Human-readable product name
    pub product_name: Option<String>,
    /// Release version (semver)
    pub version: Option<String>,
    /// Rust target triple
    pub target: Option<String>,
    /// Workspace root, relative to the config file
    pub workspace: Option<PathBuf>,
    #[serde(default)]
    pub build: BuildSection,
    #[serde(default)]
    pub bundle: BundleSection,
    #[serde(default)]
    pub signing: SigningSection,
    #[serde(default)]
    pub store: StoreSection,
    #[serde(default)]
    pub disk: DiskSection,
    #[serde(default)]
    pub publish: PublishSection,
    #[serde(default)]
    pub smoke: SmokeSection,
}

/// `[build]`
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildSection {
    /// Binaries the bundle requires, one per executable component
    #[serde(default)]
    pub binaries: Vec<String>,
    /// Extra flags appended to `cargo build`
    #[serde(default)]
    pub flags: Vec<String>,
    pub profile: Option<String>,
    pub cargo: Option<String>,
    pub rustup: Option<String>,
    pub jobs: Option<usize>,
    pub timeout_secs: Option<u64>,
}

/// `[bundle]`
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BundleSection {
    pub workdir: Option<PathBuf>,
    pub binaries_dir: Option<PathBuf>,
    pub config_file: Option<PathBuf>,
    /// Dotted key path of the architecture selector, e.g. `build.arch`
    pub arch_field: Option<String>,
    /// Packaging command: program followed by arguments
    #[serde(default)]
    pub command: Vec<String>,
    /// Output path of the packaged bundle, relative to `workdir`
    pub output: Option<String>,
    /// Directory wiped before every packaging attempt, relative to `workdir`
    pub clean_dir: Option<PathBuf>,
    #[serde(default)]
    pub resources: Vec<ResourceEntry>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    pub attempts: Option<u32>,
    pub retry_delay_secs: Option<u64>,
    pub timeout_secs: Option<u64>,
}

/// A fixed resource copied into the bundle tree.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ResourceEntry {
    /// Source path, relative to the workspace
    pub from: PathBuf,
    /// Destination path, relative to the bundle workdir
    pub to: PathBuf,
}

/// `[signing]`
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SigningSection {
    pub enabled: Option<bool>,
    pub endpoint: Option<String>,
    /// Name of the environment variable holding the bearer token
    pub token_env: Option<String>,
    pub origin: Option<String>,
    pub expected_submit_status: Option<u16>,
    pub poll_interval_secs: Option<u64>,
    pub poll_interval_ms: Option<u64>,
    pub deadline_secs: Option<u64>,
    pub request_timeout_secs: Option<u64>,
}

/// `[store]`
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreSection {
    /// `fs` (default) or `http`
    pub kind: Option<String>,
    pub root: Option<PathBuf>,
    pub base_url: Option<String>,
    pub token_env: Option<String>,
}

/// `[disk]` - path patterns reclaimed at each scope
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DiskSection {
    pub before_build: Option<Vec<String>>,
    pub after_build: Option<Vec<String>>,
    pub before_publish: Option<Vec<String>>,
}

/// `[publish]`
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PublishSection {
    pub output_dir: Option<PathBuf>,
    pub upload: Option<bool>,
}

/// `[smoke]`
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SmokeSection {
    pub enabled: Option<bool>,
    /// Executable inside an extracted `.zip` bundle
    pub executable: Option<PathBuf>,
    pub process_name: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    pub grace_secs: Option<u64>,
    /// The launched program may exit once it has started a detached app
    pub allow_detach: Option<bool>,
}

impl ConfigFile {
    /// Reads and parses a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Parses config text that did not come from a file.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            source,
        })
    }
}
