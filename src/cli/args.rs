//! Command line argument parsing and validation.
//!
//! This module provides CLI argument parsing using clap, with validation and
//! the mapping from arguments onto configuration overrides.

use crate::config::PipelineConfigBuilder;
use crate::disk::ReclaimScope;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Release orchestrator for desktop bundles
#[derive(Parser, Debug)]
#[command(
    name = "kodegen_release_pipeline",
    version,
    about = "Release orchestrator for desktop bundles",
    long_about = "Builds platform binaries, assembles the desktop bundle, optionally signs it through
a remote signing service, publishes it and smoke-tests the result.

Usage:
  kodegen_release_pipeline run --config release.toml --target aarch64-apple-darwin --sign
  kodegen_release_pipeline reclaim --scope before-build
  kodegen_release_pipeline sign --artifact out/Goose.zip
  kodegen_release_pipeline smoke-test --artifact dist/Goose.zip

Exit code 0 = every stage succeeded. Each fatal stage has its own non-zero exit code."
)]
pub struct Args {
    /// Path to the release configuration
    #[arg(
        short = 'c',
        long,
        global = true,
        value_name = "PATH",
        default_value = "release.toml",
        env = "RELEASE_CONFIG"
    )]
    pub config: PathBuf,

    /// Show streamed tool output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only print warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Pipeline subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the full pipeline: reclaim, build, bundle, sign, publish, smoke test
    Run(RunArgs),

    /// Reclaim disk space for one pipeline scope
    Reclaim {
        /// Which pipeline point's targets to reclaim
        #[arg(long, value_enum)]
        scope: ScopeArg,

        #[command(flatten)]
        overrides: Overrides,
    },

    /// Sign an existing bundle in place through the remote signing service
    Sign {
        /// Unsigned bundle; overwritten with the signed bytes
        #[arg(short, long, value_name = "PATH")]
        artifact: PathBuf,

        #[command(flatten)]
        overrides: Overrides,
    },

    /// Launch a bundle and check that it stays alive
    SmokeTest {
        /// Bundle (`.zip` or executable) to launch
        #[arg(short, long, value_name = "PATH")]
        artifact: PathBuf,

        #[command(flatten)]
        overrides: Overrides,
    },
}

/// Arguments for `run`
#[derive(clap::Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub overrides: Overrides,

    /// Force remote signing on
    #[arg(long, conflicts_with = "no_sign")]
    pub sign: bool,

    /// Force remote signing off
    #[arg(long)]
    pub no_sign: bool,

    /// Skip launching the published bundle
    #[arg(long)]
    pub skip_smoke_test: bool,
}

/// Configuration overrides shared by every subcommand
#[derive(clap::Args, Debug, Default)]
pub struct Overrides {
    /// Workspace root (default: `workspace` from the config, else its directory)
    #[arg(short, long, value_name = "DIR")]
    pub workspace: Option<PathBuf>,

    /// Unique identifier of this run; prefixes remote object keys
    #[arg(long, value_name = "ID", env = "RELEASE_RUN_ID")]
    pub run_id: Option<String>,

    /// Rust target triple
    #[arg(short, long, value_name = "TRIPLE")]
    pub target: Option<String>,

    /// Release version (semver)
    #[arg(long = "release-version", value_name = "VERSION")]
    pub version: Option<String>,
}

/// Disk guard scope as accepted on the command line
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScopeArg {
    BeforeBuild,
    AfterBuild,
    BeforePublish,
}

impl From<ScopeArg> for ReclaimScope {
    fn from(scope: ScopeArg) -> Self {
        match scope {
            ScopeArg::BeforeBuild => ReclaimScope::BeforeBuild,
            ScopeArg::AfterBuild => ReclaimScope::AfterBuild,
            ScopeArg::BeforePublish => ReclaimScope::BeforePublish,
        }
    }
}

impl Overrides {
    /// Applies the overrides that were given onto a config builder.
    pub fn apply(&self, mut builder: PipelineConfigBuilder) -> PipelineConfigBuilder {
        if let Some(workspace) = &self.workspace {
            builder = builder.workspace(workspace.clone());
        }
        if let Some(run_id) = &self.run_id {
            builder = builder.run_id(run_id.clone());
        }
        if let Some(target) = &self.target {
            builder = builder.target(target.clone());
        }
        if let Some(version) = &self.version {
            builder = builder.version(version.clone());
        }
        builder
    }
}

impl Args {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate arguments for consistency
    pub fn validate(&self) -> Result<(), String> {
        match &self.command {
            Command::Sign { artifact, .. } | Command::SmokeTest { artifact, .. }
                if !artifact.is_file() =>
            {
                Err(format!("Artifact not found: {}", artifact.display()))
            }
            _ => Ok(()),
        }
    }
}

/// Configuration derived from command line arguments
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Output manager for terminal status lines
    output: super::OutputManager,
}

impl From<&Args> for RuntimeConfig {
    fn from(args: &Args) -> Self {
        Self {
            output: super::OutputManager::new(args.verbose, args.quiet),
        }
    }
}

impl RuntimeConfig {
    /// Creates a runtime config around an output manager.
    pub fn new(output: super::OutputManager) -> Self {
        Self { output }
    }

    /// Runtime config that prints only warnings and errors.
    pub fn quiet() -> Self {
        Self::new(super::OutputManager::new(false, true))
    }

    /// Get a reference to the output manager
    pub fn output(&self) -> &super::OutputManager {
        &self.output
    }

    /// Print verbose message if in verbose mode
    pub fn verbose_println(&self, message: &str) {
        self.output.verbose(message)
    }

    /// Print success message if not in quiet mode
    pub fn success(&self, message: &str) {
        self.output.success(message)
    }

    /// Print warning message
    pub fn warn(&self, message: &str) {
        self.output.warn(message)
    }

    /// Print error message
    pub fn error(&self, message: &str) {
        self.output.error(message)
    }

    /// Print progress message
    pub fn progress(&self, message: &str) {
        self.output.progress(message)
    }

    /// Print section header
    pub fn section(&self, title: &str) {
        self.output.section(title)
    }

    /// Print indented text
    pub fn indent(&self, message: &str) {
        self.output.indent(message)
    }
}
