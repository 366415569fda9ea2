//! Comprehensive error types for release pipeline operations.
//!
//! Every stage owns its error enum; [`PipelineError`] wraps them and maps each
//! fatal condition to the process exit code surfaced to the invoker.

use crate::builder::BuildError;
use crate::bundle::BundleError;
use crate::config::ConfigError;
use crate::publish::PublishError;
use crate::signing::SigningError;
use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Main error type for all pipeline operations
#[derive(Error, Debug)]
pub enum PipelineError {
    /// CLI argument errors
    #[error("CLI error: {0}")]
    Cli(#[from] CliError),

    /// Configuration could not be loaded or validated
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Toolchain build failed
    #[error("Build failed: {0}")]
    Build(#[from] BuildError),

    /// Packaging failed
    #[error("Bundle failed: {0}")]
    Bundle(#[from] BundleError),

    /// Remote signing failed
    #[error("Signing failed: {0}")]
    Signing(#[from] SigningError),

    /// Publishing or smoke test failed
    #[error("Publish failed: {0}")]
    Publish(#[from] PublishError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// CLI-specific errors
#[derive(Error, Debug)]
pub enum CliError {
    /// Invalid command line arguments
    #[error("Invalid arguments: {reason}")]
    InvalidArguments {
        /// Reason for the error
        reason: String,
    },

    /// Command execution failed
    #[error("Command execution failed: {command} - {reason}")]
    ExecutionFailed {
        /// Command that failed
        command: String,
        /// Reason for the error
        reason: String,
    },
}

impl PipelineError {
    /// Process exit code for this error.
    ///
    /// 0 is reserved for success; each fatal stage condition has its own code.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Cli(_) | Self::Config(_) | Self::Io(_) => 1,
            Self::Build(_) => 2,
            Self::Bundle(_) => 3,
            Self::Signing(e) => match e {
                SigningError::SubmitRejected { .. }
                | SigningError::SubmitUnreachable { .. }
                | SigningError::MissingJobId => 4,
                SigningError::PollRejected { .. } | SigningError::PollUnreachable { .. } => 5,
                SigningError::JobFailed { .. } => 6,
                SigningError::TimedOut { .. } => 7,
                SigningError::Upload { .. }
                | SigningError::Download { .. }
                | SigningError::MissingDestination { .. }
                | SigningError::Io { .. }
                | SigningError::Transition(_) => 8,
            },
            Self::Publish(PublishError::SmokeTest { .. }) => 10,
            Self::Publish(_) => 9,
        }
    }

    /// Name of the stage that produced this error, for status lines.
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Cli(_) => "cli",
            Self::Config(_) => "config",
            Self::Io(_) => "io",
            Self::Build(_) => "build",
            Self::Bundle(_) => "bundle",
            Self::Signing(_) => "signing",
            Self::Publish(PublishError::SmokeTest { .. }) => "smoke-test",
            Self::Publish(_) => "publish",
        }
    }
}
