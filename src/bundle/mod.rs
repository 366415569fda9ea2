//! Bundle assembly: stages binaries and resources, patches the packaging
//! configuration and runs the packaging tool under a bounded retry.

mod packaging_config;
pub mod retry;

pub use packaging_config::patch_field;
pub use retry::{AttemptOutcome, RetryDecision, RetryPolicy};

use crate::builder::BinaryOutput;
use crate::cli::RuntimeConfig;
use crate::config::{BuildSpec, BundleConfig};
use crate::utils::{checksum, fs as fs_utils, process};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::process::Command;

/// Number of packager stderr lines kept for failure reasons.
const STDERR_TAIL_LINES: usize = 10;

/// Bundle assembly errors
#[derive(Error, Debug)]
pub enum BundleError {
    /// A binary or resource could not be staged
    #[error("failed to stage {path}: {source}")]
    Stage { path: PathBuf, source: io::Error },

    /// The packaging configuration could not be patched
    #[error("failed to patch {path}: {reason}")]
    Patch { path: PathBuf, reason: String },

    /// Every packaging attempt failed
    #[error("packaging failed after {attempts} attempt(s): {last_failure}")]
    AttemptsExhausted { attempts: u32, last_failure: String },

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// The assembled, not yet signed bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedArtifact {
    pub path: PathBuf,
    pub size: u64,
    /// Lowercase hex SHA-256 of the bundle bytes
    pub sha256: String,
}

impl UnsignedArtifact {
    /// Describes an existing bundle file.
    pub async fn from_path(path: &Path) -> io::Result<Self> {
        let metadata = tokio::fs::metadata(path).await?;
        if !metadata.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a file", path.display()),
            ));
        }
        Ok(Self {
            path: path.to_path_buf(),
            size: metadata.len(),
            sha256: checksum::calculate_sha256(path).await?,
        })
    }

    /// File name of the bundle, used to derive remote keys.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "bundle".to_string())
    }
}

/// Assembles binaries and resources into an unsigned bundle.
#[derive(Debug, Clone)]
pub struct BundleAssembler {
    workspace: PathBuf,
    config: BundleConfig,
    runtime_config: RuntimeConfig,
}

impl BundleAssembler {
    /// Resource sources resolve against `workspace`.
    pub fn new(workspace: &Path, config: &BundleConfig, runtime_config: &RuntimeConfig) -> Self {
        Self {
            workspace: workspace.to_path_buf(),
            config: config.clone(),
            runtime_config: runtime_config.clone(),
        }
    }

    /// Stages everything and runs the packaging tool until it produces the
    /// output or the retry policy gives up.
    pub async fn assemble(
        &self,
        binaries: &[BinaryOutput],
        spec: &BuildSpec,
    ) -> Result<UnsignedArtifact, BundleError> {
        self.runtime_config.section(&format!(
            "Assembling bundle ({}, {})",
            spec.arch(),
            spec.arch().packaging_name()
        ));

        let output = self.output_path(spec);
        let policy = RetryPolicy::new(self.config.attempts, self.config.retry_delay);
        let mut attempt = 0;

        loop {
            attempt += 1;
            self.runtime_config.progress(&format!(
                "Packaging attempt {}/{}",
                attempt,
                policy.attempts()
            ));

            self.reset(&output).await?;
            self.prepare(binaries, spec).await?;
            let (outcome, failure) = match self.run_packager(spec, &output).await {
                Ok(()) => (AttemptOutcome::Succeeded, None),
                Err(reason) => {
                    self.runtime_config
                        .warn(&format!("Packaging attempt {} failed: {}", attempt, reason));
                    (AttemptOutcome::Failed, Some(reason))
                }
            };

            match policy.decide(attempt, outcome) {
                RetryDecision::Done => break,
                RetryDecision::RetryAfter(delay) => {
                    log::info!("Retrying packaging in {:?}", delay);
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::GiveUp => {
                    return Err(BundleError::AttemptsExhausted {
                        attempts: attempt,
                        last_failure: failure.unwrap_or_default(),
                    });
                }
            }
        }

        let artifact = UnsignedArtifact::from_path(&output).await?;
        self.runtime_config.success(&format!(
            "Bundle ready: {} ({} bytes, sha256 {})",
            artifact.path.display(),
            artifact.size,
            artifact.sha256
        ));
        Ok(artifact)
    }

    /// Bundle path with placeholders expanded.
    pub fn output_path(&self, spec: &BuildSpec) -> PathBuf {
        self.config.workdir.join(expand(&self.config.output, spec))
    }

    /// Stages binaries and resources and patches the packaging config.
    ///
    /// Runs after every reset, so inputs living under `clean_dir` are
    /// restored for each attempt.
    async fn prepare(&self, binaries: &[BinaryOutput], spec: &BuildSpec) -> Result<(), BundleError> {
        self.stage_binaries(binaries).await?;
        self.stage_resources().await?;

        if let (Some(config_file), Some(field)) = (&self.config.config_file, &self.config.arch_field)
        {
            let arch = spec.arch().packaging_name();
            let changed = patch_field(config_file, field, arch)
                .await
                .map_err(|reason| BundleError::Patch {
                    path: config_file.clone(),
                    reason,
                })?;
            if changed {
                self.runtime_config
                    .progress(&format!("Set {} = {} in {}", field, arch, config_file.display()));
            }
        }
        Ok(())
    }

    async fn stage_binaries(&self, binaries: &[BinaryOutput]) -> Result<(), BundleError> {
        let dir = &self.config.binaries_dir;
        for binary in binaries {
            let Some(file_name) = binary.path.file_name() else {
                continue;
            };
            let dest = dir.join(file_name);
            fs_utils::copy_file(&binary.path, &dest)
                .await
                .map_err(|source| BundleError::Stage {
                    path: binary.path.clone(),
                    source,
                })?;
            fs_utils::make_executable(&dest).await?;
            self.runtime_config
                .verbose_println(&format!("Staged {} → {}", binary.name, dest.display()));
        }
        Ok(())
    }

    async fn stage_resources(&self) -> Result<(), BundleError> {
        for resource in &self.config.resources {
            let from = self.workspace.join(&resource.from);
            let to = self.config.workdir.join(&resource.to);
            fs_utils::copy_path(&from, &to)
                .await
                .map_err(|source| BundleError::Stage {
                    path: from.clone(),
                    source,
                })?;
            self.runtime_config
                .verbose_println(&format!("Copied {} → {}", from.display(), to.display()));
        }
        Ok(())
    }

    /// Clears what a previous attempt may have left behind.
    async fn reset(&self, output: &Path) -> Result<(), BundleError> {
        if let Some(clean_dir) = &self.config.clean_dir {
            fs_utils::remove_dir_all(clean_dir).await?;
        }
        match tokio::fs::remove_file(output).await {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    /// One packaging attempt. `Err` carries the failure reason.
    async fn run_packager(&self, spec: &BuildSpec, output: &Path) -> Result<(), String> {
        let expanded: Vec<String> = self
            .config
            .command
            .iter()
            .map(|part| expand(part, spec))
            .collect();
        let Some((program, args)) = expanded.split_first() else {
            return Err("packaging command is empty".into());
        };
        let command_line = process::describe(program, args);
        log::info!("Packaging command: {}", command_line);

        let mut command = Command::new(program);
        command
            .args(args)
            .current_dir(&self.config.workdir)
            .env("RELEASE_BINARIES_DIR", &self.config.binaries_dir)
            .env("RELEASE_ARCH", spec.arch().packaging_name())
            .env("RELEASE_VERSION", spec.version().to_string())
            .env("RELEASE_TARGET", spec.target())
            .envs(&self.config.env);

        let outcome =
            process::run_streaming(&mut command, self.config.timeout, &self.runtime_config)
                .await
                .map_err(|e| format!("`{}`: {}", command_line, e))?;

        if !outcome.success() {
            return Err(format!(
                "`{}` exited with code {}: {}",
                command_line,
                outcome.code(),
                outcome.stderr_tail(STDERR_TAIL_LINES)
            ));
        }
        if !output.is_file() {
            return Err(format!(
                "`{}` succeeded but {} was not produced",
                command_line,
                output.display()
            ));
        }
        Ok(())
    }
}

/// Expands `{arch}`, `{version}` and `{target}`.
fn expand(template: &str, spec: &BuildSpec) -> String {
    template
        .replace("{arch}", spec.arch().packaging_name())
        .replace("{version}", &spec.version().to_string())
        .replace("{target}", spec.target())
}
