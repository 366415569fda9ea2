//! Builder for constructing [`PipelineConfig`].

use super::{
    BuildSpec, BuilderConfig, BundleConfig, ConfigError, ConfigFile, DiskConfig, PipelineConfig,
    PublishConfig, SigningConfig, SmokeConfig, StoreConfig,
};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

const DEFAULT_BUILD_TIMEOUT: Duration = Duration::from_secs(3600);
const DEFAULT_BUNDLE_TIMEOUT: Duration = Duration::from_secs(1800);
const DEFAULT_BUNDLE_ATTEMPTS: u32 = 2;
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);
const DEFAULT_SIGNING_DEADLINE: Duration = Duration::from_secs(15 * 60);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Builder for constructing [`PipelineConfig`].
///
/// Starts from a parsed [`ConfigFile`], applies command-line overrides, and
/// validates everything in [`build`](Self::build).
///
/// # Examples
///
/// ```no_run
/// use kodegen_release_pipeline::config::PipelineConfigBuilder;
/// use std::path::Path;
///
/// # fn example() -> Result<(), kodegen_release_pipeline::config::ConfigError> {
/// let config = PipelineConfigBuilder::from_path(Path::new("release.toml"))?
///     .target("x86_64-unknown-linux-gnu")
///     .signing_enabled(false)
///     .build()?;
/// println!("run {}", config.run_id());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct PipelineConfigBuilder {
    file: ConfigFile,
    base_dir: PathBuf,
    workspace: Option<PathBuf>,
    run_id: Option<String>,
    target: Option<String>,
    version: Option<String>,
    signing_enabled: Option<bool>,
    skip_smoke_test: bool,
    poll_interval: Option<Duration>,
    signing_deadline: Option<Duration>,
    retry_delay: Option<Duration>,
    smoke_grace: Option<Duration>,
    signing_token: Option<String>,
}

impl PipelineConfigBuilder {
    /// Creates a builder from an already parsed file.
    ///
    /// Relative paths in the file resolve against `base_dir`.
    pub fn new(file: ConfigFile, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            file,
            base_dir: base_dir.into(),
            ..Default::default()
        }
    }

    /// Reads `path` and uses its parent directory as the base directory.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let file = ConfigFile::load(path)?;
        let base_dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Ok(Self::new(file, base_dir))
    }

    /// Overrides the workspace root.
    pub fn workspace(mut self, workspace: impl Into<PathBuf>) -> Self {
        self.workspace = Some(workspace.into());
        self
    }

    /// Sets the run identifier. Default: a fresh UUIDv4.
    pub fn run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    /// Overrides the target triple.
    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Overrides the release version.
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Forces signing on or off regardless of `[signing].enabled`.
    pub fn signing_enabled(mut self, enabled: bool) -> Self {
        self.signing_enabled = Some(enabled);
        self
    }

    /// Skips the post-publish smoke test.
    pub fn skip_smoke_test(mut self, skip: bool) -> Self {
        self.skip_smoke_test = skip;
        self
    }

    /// Overrides the signing poll interval.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    /// Overrides the signing deadline.
    pub fn signing_deadline(mut self, deadline: Duration) -> Self {
        self.signing_deadline = Some(deadline);
        self
    }

    /// Overrides the delay between packaging attempts.
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = Some(delay);
        self
    }

    /// Overrides the smoke test grace period.
    pub fn smoke_grace(mut self, grace: Duration) -> Self {
        self.smoke_grace = Some(grace);
        self
    }

    /// Supplies the signing token directly instead of via `token_env`.
    pub fn signing_token(mut self, token: impl Into<String>) -> Self {
        self.signing_token = Some(token.into());
        self
    }

    /// Validates and resolves the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if required settings are missing or invalid, or if a
    /// referenced secret is absent from the environment.
    pub fn build(self) -> Result<PipelineConfig, ConfigError> {
        let file = &self.file;

        let workspace = match self.workspace.clone().or_else(|| file.workspace.clone()) {
            Some(ws) if ws.is_absolute() => ws,
            Some(ws) => self.base_dir.join(ws),
            None => self.base_dir.clone(),
        };

        let product_name = file
            .product_name
            .clone()
            .ok_or(ConfigError::Missing {
                field: "product_name",
            })?;

        let run_id = self
            .run_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        if run_id.is_empty() || run_id.contains('/') {
            return Err(ConfigError::Invalid {
                field: "run_id",
                reason: "must be non-empty and contain no '/'".into(),
            });
        }

        let build = self.resolve_build_spec()?;
        let builder = self.resolve_builder();
        let bundle = self.resolve_bundle(&workspace)?;
        let signing = self.resolve_signing(&product_name)?;
        let store = self.resolve_store(&workspace)?;
        let disk = self.resolve_disk();

        let publish = PublishConfig {
            output_dir: resolve(&workspace, file.publish.output_dir.as_deref(), "dist"),
            upload: file.publish.upload.unwrap_or(false),
        };

        let smoke_enabled = file.smoke.enabled.unwrap_or(true) && !self.skip_smoke_test;
        let smoke = SmokeConfig {
            executable: file.smoke.executable.clone(),
            process_name: file.smoke.process_name.clone(),
            args: file.smoke.args.clone(),
            env: file.smoke.env.clone(),
            grace: self
                .smoke_grace
                .or(file.smoke.grace_secs.map(Duration::from_secs))
                .unwrap_or(SmokeConfig::default().grace),
            allow_detach: file.smoke.allow_detach.unwrap_or(false),
        };

        Ok(PipelineConfig {
            run_id,
            workspace,
            product_name,
            build,
            builder,
            bundle,
            signing,
            store,
            disk,
            publish,
            smoke,
            smoke_enabled,
        })
    }

    fn resolve_build_spec(&self) -> Result<BuildSpec, ConfigError> {
        let file = &self.file;

        let target = self
            .target
            .clone()
            .or_else(|| file.target.clone())
            .ok_or(ConfigError::Missing { field: "target" })?;

        let version_str = self
            .version
            .clone()
            .or_else(|| file.version.clone())
            .ok_or(ConfigError::Missing { field: "version" })?;
        let version = semver::Version::parse(version_str.trim_start_matches('v')).map_err(
            |source| ConfigError::Version {
                version: version_str.clone(),
                source,
            },
        )?;

        if file.build.binaries.is_empty() {
            return Err(ConfigError::Missing {
                field: "build.binaries",
            });
        }

        Ok(BuildSpec::new(
            target,
            version,
            file.build.flags.clone(),
            file.build.binaries.clone(),
            file.build.profile.clone().unwrap_or_else(|| "release".into()),
        ))
    }

    fn resolve_builder(&self) -> BuilderConfig {
        let build = &self.file.build;
        BuilderConfig {
            cargo: build.cargo.clone().unwrap_or_else(|| "cargo".into()),
            rustup: build.rustup.clone().unwrap_or_else(|| "rustup".into()),
            jobs: build.jobs.unwrap_or_else(num_cpus::get),
            timeout: build
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_BUILD_TIMEOUT),
        }
    }

    fn resolve_bundle(&self, workspace: &Path) -> Result<BundleConfig, ConfigError> {
        let bundle = &self.file.bundle;

        if bundle.command.is_empty() {
            return Err(ConfigError::Missing {
                field: "bundle.command",
            });
        }
        let output = bundle.output.clone().ok_or(ConfigError::Missing {
            field: "bundle.output",
        })?;

        let attempts = bundle.attempts.unwrap_or(DEFAULT_BUNDLE_ATTEMPTS);
        if attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "bundle.attempts",
                reason: "at least one attempt is required".into(),
            });
        }

        if bundle.arch_field.is_some() != bundle.config_file.is_some() {
            return Err(ConfigError::Invalid {
                field: "bundle.arch_field",
                reason: "`arch_field` and `config_file` must be set together".into(),
            });
        }

        let workdir = resolve(workspace, bundle.workdir.as_deref(), ".");
        let config_file = bundle.config_file.as_ref().map(|p| workdir.join(p));
        let clean_dir = bundle.clean_dir.as_ref().map(|p| workdir.join(p));

        // Staged inputs are restored after each reset; the packaging config is not
        if let (Some(config_file), Some(clean_dir)) = (&config_file, &clean_dir) {
            if config_file.starts_with(clean_dir) {
                return Err(ConfigError::Invalid {
                    field: "bundle.config_file",
                    reason: format!(
                        "{} lies inside `clean_dir` {}, which is removed before every attempt",
                        config_file.display(),
                        clean_dir.display()
                    ),
                });
            }
        }

        Ok(BundleConfig {
            binaries_dir: resolve(&workdir, bundle.binaries_dir.as_deref(), "bin"),
            config_file,
            arch_field: bundle.arch_field.clone(),
            command: bundle.command.clone(),
            output,
            clean_dir,
            resources: bundle.resources.clone(),
            env: bundle.env.clone(),
            attempts,
            retry_delay: self
                .retry_delay
                .or(bundle.retry_delay_secs.map(Duration::from_secs))
                .unwrap_or(DEFAULT_RETRY_DELAY),
            timeout: bundle
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_BUNDLE_TIMEOUT),
            workdir,
        })
    }

    fn resolve_signing(&self, product_name: &str) -> Result<Option<SigningConfig>, ConfigError> {
        let signing = &self.file.signing;

        let enabled = self
            .signing_enabled
            .or(signing.enabled)
            .unwrap_or(false);
        if !enabled {
            return Ok(None);
        }

        let endpoint = signing.endpoint.as_deref().ok_or(ConfigError::Missing {
            field: "signing.endpoint",
        })?;
        let endpoint = parse_url("signing.endpoint", endpoint)?;

        let token = match (&self.signing_token, &signing.token_env) {
            (Some(token), _) => Some(token.clone()),
            (None, Some(name)) => Some(read_secret("signing.token_env", name)?),
            (None, None) => None,
        };

        let poll_interval = self
            .poll_interval
            .or(signing.poll_interval_ms.map(Duration::from_millis))
            .or(signing.poll_interval_secs.map(Duration::from_secs))
            .unwrap_or(DEFAULT_POLL_INTERVAL);
        if poll_interval.is_zero() {
            return Err(ConfigError::Invalid {
                field: "signing.poll_interval_secs",
                reason: "poll interval must be positive".into(),
            });
        }

        Ok(Some(SigningConfig {
            endpoint,
            token,
            origin: signing
                .origin
                .clone()
                .unwrap_or_else(|| product_name.to_string()),
            expected_submit_status: signing.expected_submit_status.unwrap_or(200),
            poll_interval,
            deadline: self
                .signing_deadline
                .or(signing.deadline_secs.map(Duration::from_secs))
                .unwrap_or(DEFAULT_SIGNING_DEADLINE),
            request_timeout: signing
                .request_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT),
        }))
    }

    fn resolve_store(&self, workspace: &Path) -> Result<StoreConfig, ConfigError> {
        let store = &self.file.store;
        match store.kind.as_deref().unwrap_or("fs") {
            "fs" => Ok(StoreConfig::Fs {
                root: resolve(workspace, store.root.as_deref(), ".release-store"),
            }),
            "http" => {
                let base_url = store.base_url.as_deref().ok_or(ConfigError::Missing {
                    field: "store.base_url",
                })?;
                let token = store
                    .token_env
                    .as_deref()
                    .map(|name| read_secret("store.token_env", name))
                    .transpose()?;
                Ok(StoreConfig::Http {
                    base_url: parse_url("store.base_url", base_url)?,
                    token,
                    request_timeout: DEFAULT_REQUEST_TIMEOUT,
                })
            }
            other => Err(ConfigError::Invalid {
                field: "store.kind",
                reason: format!("unknown store kind `{other}` (expected `fs` or `http`)"),
            }),
        }
    }

    fn resolve_disk(&self) -> DiskConfig {
        let disk = &self.file.disk;
        let defaults = DiskConfig::default();
        DiskConfig {
            before_build: disk.before_build.clone().unwrap_or(defaults.before_build),
            after_build: disk.after_build.clone().unwrap_or(defaults.after_build),
            before_publish: disk.before_publish.clone().unwrap_or(defaults.before_publish),
        }
    }
}

fn resolve(base: &Path, path: Option<&Path>, default: &str) -> PathBuf {
    let path = path.unwrap_or_else(|| Path::new(default));
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn parse_url(field: &'static str, value: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(value).map_err(|e| ConfigError::Invalid {
        field,
        reason: format!("`{value}` is not a valid URL: {e}"),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::Invalid {
            field,
            reason: format!("unsupported scheme `{}`", url.scheme()),
        });
    }
    Ok(url)
}

fn read_secret(field: &'static str, name: &str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::MissingSecret {
        field,
        name: name.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        product_name = "Goose"
        version = "1.4.0"
        target = "aarch64-apple-darwin"

        [build]
        binaries = ["goosed"]

        [bundle]
        workdir = "ui/desktop"
        command = ["npm", "run", "make"]
        output = "out/Goose.zip"
    "#;

    fn builder(text: &str) -> PipelineConfigBuilder {
        PipelineConfigBuilder::new(ConfigFile::from_toml_str(text).unwrap(), "/work")
    }

    #[test]
    fn applies_defaults() {
        let config = builder(MINIMAL).run_id("run-1").build().unwrap();

        assert_eq!(config.run_id(), "run-1");
        assert_eq!(config.workspace(), Path::new("/work"));
        assert_eq!(config.build().profile(), "release");
        assert_eq!(config.bundle().workdir, PathBuf::from("/work/ui/desktop"));
        assert_eq!(config.bundle().binaries_dir, PathBuf::from("/work/ui/desktop/bin"));
        assert_eq!(config.bundle().attempts, 2);
        assert_eq!(config.bundle().retry_delay, Duration::from_secs(5));
        assert!(config.signing().is_none());
        assert!(config.smoke().is_some());
        assert!(matches!(config.store(), StoreConfig::Fs { .. }));
    }

    #[test]
    fn command_line_overrides_win() {
        let config = builder(MINIMAL)
            .target("x86_64-pc-windows-gnu")
            .version("v2.0.0-rc.1")
            .skip_smoke_test(true)
            .build()
            .unwrap();

        assert_eq!(config.build().target(), "x86_64-pc-windows-gnu");
        assert_eq!(config.build().version().to_string(), "2.0.0-rc.1");
        assert!(config.build().is_windows());
        assert!(config.smoke().is_none());
    }

    #[test]
    fn signing_requires_endpoint() {
        let err = builder(MINIMAL).signing_enabled(true).build().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Missing {
                field: "signing.endpoint"
            }
        ));
    }

    #[test]
    fn signing_uses_source_timing_defaults() {
        let text = format!("{MINIMAL}\n[signing]\nenabled = true\nendpoint = \"https://signer.example.com\"\n");
        let config = builder(&text).build().unwrap();
        let signing = config.signing().unwrap();

        assert_eq!(signing.poll_interval, Duration::from_secs(30));
        assert_eq!(signing.deadline, Duration::from_secs(900));
        assert_eq!(signing.expected_submit_status, 200);
        assert_eq!(signing.origin, "Goose");
    }

    #[test]
    fn missing_secret_is_reported_by_name() {
        let text = format!(
            "{MINIMAL}\n[signing]\nenabled = true\nendpoint = \"https://signer.example.com\"\ntoken_env = \"KODEGEN_TEST_TOKEN_THAT_IS_NEVER_SET\"\n"
        );
        let err = builder(&text).build().unwrap_err();
        assert!(matches!(err, ConfigError::MissingSecret { .. }));
    }

    #[test]
    fn rejects_invalid_version_and_zero_attempts() {
        let err = builder(MINIMAL).version("one-point-oh").build().unwrap_err();
        assert!(matches!(err, ConfigError::Version { .. }));

        let text = MINIMAL.replace("output = \"out/Goose.zip\"", "output = \"out/Goose.zip\"\nattempts = 0");
        let err = builder(&text).build().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "bundle.attempts", .. }));
    }

    #[test]
    fn rejects_packaging_config_inside_clean_dir() {
        let text = MINIMAL.replace(
            "output = \"out/Goose.zip\"",
            "output = \"out/Goose.zip\"\nclean_dir = \"out\"\nconfig_file = \"out/forge.config.json\"\narch_field = \"arch\"",
        );
        let err = builder(&text).build().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "bundle.config_file", .. }));

        let text = MINIMAL.replace(
            "output = \"out/Goose.zip\"",
            "output = \"out/Goose.zip\"\nclean_dir = \"out\"\nbinaries_dir = \"out/bin\"",
        );
        let config = builder(&text).build().unwrap();
        assert_eq!(config.bundle().binaries_dir, PathBuf::from("/work/ui/desktop/out/bin"));
    }

    #[test]
    fn smoke_detach_is_opt_in() {
        let config = builder(MINIMAL).build().unwrap();
        assert!(!config.smoke_settings().allow_detach);

        let text = format!("{MINIMAL}\n[smoke]\nallow_detach = true\n");
        let config = builder(&text).build().unwrap();
        assert!(config.smoke_settings().allow_detach);
    }

    #[test]
    fn rejects_non_http_store() {
        let text = format!("{MINIMAL}\n[store]\nkind = \"http\"\nbase_url = \"ftp://objects.example.com\"\n");
        let err = builder(&text).build().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "store.base_url", .. }));
    }
}
