//! Artifact builder: compiles the platform binaries with the Rust toolchain.
//!
//! The builder ensures the target triple is installed, runs `cargo build`
//! with output streamed to the status lines, and verifies every required
//! binary landed at its deterministic path. Build failures are fatal and
//! never retried.

mod tool_detection;

pub use tool_detection::find_tool;

use crate::cli::RuntimeConfig;
use crate::config::{BuildSpec, BuilderConfig};
use crate::utils::process::{self, CommandOutcome};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;

/// Number of stderr lines kept in compile errors.
const STDERR_TAIL_LINES: usize = 20;

/// Build errors
#[derive(Error, Debug)]
pub enum BuildError {
    /// The target triple could not be installed
    #[error("failed to install target {target}: {reason}")]
    TargetInstall { target: String, reason: String },

    /// The compiler exited non-zero
    #[error("`{command}` failed with exit code {code}:\n{stderr}")]
    Compile {
        command: String,
        code: i32,
        stderr: String,
    },

    /// The build succeeded but a required binary is absent
    #[error("binary `{binary}` not found at {path}")]
    MissingOutput { binary: String, path: PathBuf },

    /// A toolchain command exceeded its timeout
    #[error("`{command}` timed out after {}s", .timeout.as_secs())]
    Timeout { command: String, timeout: Duration },

    /// A toolchain command could not be run
    #[error("failed to run `{command}`: {source}")]
    Io {
        command: String,
        source: io::Error,
    },
}

/// One compiled binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryOutput {
    pub name: String,
    pub path: PathBuf,
}

/// Whether the target triple had to be installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetStatus {
    AlreadyInstalled,
    Installed,
    /// `rustup` is not available; the toolchain is trusted to have the target
    Unmanaged,
}

/// Builds platform binaries for one [`BuildSpec`].
#[derive(Debug, Clone)]
pub struct ArtifactBuilder {
    workspace: PathBuf,
    config: BuilderConfig,
    runtime_config: RuntimeConfig,
}

impl ArtifactBuilder {
    pub fn new(workspace: &Path, config: &BuilderConfig, runtime_config: &RuntimeConfig) -> Self {
        Self {
            workspace: workspace.to_path_buf(),
            config: config.clone(),
            runtime_config: runtime_config.clone(),
        }
    }

    /// Ensures the target is installed, compiles, and verifies the outputs.
    ///
    /// # Errors
    ///
    /// Any [`BuildError`]; none of them is retried.
    pub async fn build(&self, spec: &BuildSpec) -> Result<Vec<BinaryOutput>, BuildError> {
        self.runtime_config.section(&format!(
            "Building {} for {}",
            spec.binaries().join(", "),
            spec.target()
        ));

        self.ensure_target(spec.target()).await?;

        let args = self.cargo_args(spec);
        let command_line = process::describe(&self.config.cargo, &args);
        self.runtime_config.progress(&format!("Running {}", command_line));
        log::info!("Build command: {}", command_line);

        let mut command = Command::new(&self.config.cargo);
        command.args(&args).current_dir(&self.workspace);
        let outcome = self.run(&mut command, &command_line).await?;
        if !outcome.success() {
            return Err(BuildError::Compile {
                command: command_line,
                code: outcome.code(),
                stderr: outcome.stderr_tail(STDERR_TAIL_LINES),
            });
        }

        let outputs = self.verify_outputs(spec)?;
        for output in &outputs {
            self.runtime_config
                .success(&format!("Built {} → {}", output.name, output.path.display()));
        }
        Ok(outputs)
    }

    /// Installs `target` through rustup unless it is already present.
    pub async fn ensure_target(&self, target: &str) -> Result<TargetStatus, BuildError> {
        let Some(rustup) = find_tool(&self.config.rustup) else {
            self.runtime_config.warn(&format!(
                "{} not found, assuming the toolchain provides {}",
                self.config.rustup, target
            ));
            return Ok(TargetStatus::Unmanaged);
        };

        let list_args = ["target", "list", "--installed"].map(String::from);
        let list_line = process::describe(&self.config.rustup, &list_args);
        let mut list = Command::new(&rustup);
        list.args(&list_args);
        let output = process::run_captured(&mut list, self.config.timeout)
            .await
            .map_err(|e| self.map_io(&list_line, e))?;

        if !output.status.success() {
            return Err(BuildError::TargetInstall {
                target: target.to_string(),
                reason: format!(
                    "`{}` failed: {}",
                    list_line,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        let installed = String::from_utf8_lossy(&output.stdout);
        if installed.lines().any(|line| line.trim() == target) {
            log::debug!("Target {} already installed", target);
            return Ok(TargetStatus::AlreadyInstalled);
        }

        self.runtime_config
            .progress(&format!("Installing target {}", target));
        let add_args = vec!["target".to_string(), "add".to_string(), target.to_string()];
        let add_line = process::describe(&self.config.rustup, &add_args);
        let mut command = Command::new(&rustup);
        command.args(&add_args);
        let outcome = self.run(&mut command, &add_line).await?;
        if !outcome.success() {
            return Err(BuildError::TargetInstall {
                target: target.to_string(),
                reason: outcome.stderr_tail(STDERR_TAIL_LINES),
            });
        }

        Ok(TargetStatus::Installed)
    }

    /// Arguments passed to cargo for `spec`.
    pub fn cargo_args(&self, spec: &BuildSpec) -> Vec<String> {
        let mut args = vec![
            "build".to_string(),
            "--target".to_string(),
            spec.target().to_string(),
        ];

        if spec.profile() == "release" {
            args.push("--release".to_string());
        } else {
            args.push("--profile".to_string());
            args.push(spec.profile().to_string());
        }

        for binary in spec.binaries() {
            args.push("--bin".to_string());
            args.push(binary.clone());
        }

        args.push("--jobs".to_string());
        args.push(self.config.jobs.to_string());
        args.extend(spec.flags().iter().cloned());
        args
    }

    /// Deterministic location of binary `name` after a successful build.
    pub fn output_path(&self, spec: &BuildSpec, name: &str) -> PathBuf {
        let file_name = if spec.is_windows() {
            format!("{}.exe", name)
        } else {
            name.to_string()
        };
        self.workspace
            .join("target")
            .join(spec.target())
            .join(spec.profile_dir())
            .join(file_name)
    }

    fn verify_outputs(&self, spec: &BuildSpec) -> Result<Vec<BinaryOutput>, BuildError> {
        spec.binaries()
            .iter()
            .map(|name| {
                let path = self.output_path(spec, name);
                if path.is_file() {
                    Ok(BinaryOutput {
                        name: name.clone(),
                        path,
                    })
                } else {
                    Err(BuildError::MissingOutput {
                        binary: name.clone(),
                        path,
                    })
                }
            })
            .collect()
    }

    async fn run(
        &self,
        command: &mut Command,
        command_line: &str,
    ) -> Result<CommandOutcome, BuildError> {
        process::run_streaming(command, self.config.timeout, &self.runtime_config)
            .await
            .map_err(|e| self.map_io(command_line, e))
    }

    fn map_io(&self, command_line: &str, e: io::Error) -> BuildError {
        if e.kind() == io::ErrorKind::TimedOut {
            BuildError::Timeout {
                command: command_line.to_string(),
                timeout: self.config.timeout,
            }
        } else {
            BuildError::Io {
                command: command_line.to_string(),
                source: e,
            }
        }
    }
}
