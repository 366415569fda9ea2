//! Command line interface for the release pipeline.
//!
//! This module parses arguments, resolves the configuration once, and
//! dispatches to the pipeline or to a single stage.

mod args;
mod output;

pub use args::{Args, Command, Overrides, RunArgs, RuntimeConfig, ScopeArg};
pub use output::OutputManager;

use crate::bundle::UnsignedArtifact;
use crate::config::{PipelineConfig, PipelineConfigBuilder};
use crate::disk::DiskGuard;
use crate::error::{CliError, Result};
use crate::pipeline::Pipeline;
use crate::publish::SmokeTest;
use std::path::Path;

/// Main CLI entry point
///
/// Returns the process exit code on success; errors carry their own code via
/// [`PipelineError::exit_code`](crate::error::PipelineError::exit_code).
pub async fn run() -> Result<i32> {
    let args = Args::parse_args();
    let runtime_config = RuntimeConfig::from(&args);

    args.validate()
        .map_err(|reason| CliError::InvalidArguments { reason })?;

    execute(&args, &runtime_config).await?;
    Ok(0)
}

/// Executes parsed arguments.
pub async fn execute(args: &Args, runtime_config: &RuntimeConfig) -> Result<()> {
    match &args.command {
        Command::Run(run) => {
            let mut builder = load(&args.config, &run.overrides)?;
            if run.sign {
                builder = builder.signing_enabled(true);
            } else if run.no_sign {
                builder = builder.signing_enabled(false);
            }
            let config = builder.skip_smoke_test(run.skip_smoke_test).build()?;

            let report = Pipeline::new(config, runtime_config.clone()).run().await?;
            runtime_config.success(&format!(
                "Release complete: {} (sha256 {})",
                report.published.path.display(),
                report.published.sha256
            ));
        }
        Command::Reclaim { scope, overrides } => {
            let config = load(&args.config, overrides)?.build()?;
            DiskGuard::new(config.workspace(), config.disk())
                .reclaim((*scope).into(), runtime_config)
                .await;
        }
        Command::Sign {
            artifact,
            overrides,
        } => {
            let config = load(&args.config, overrides)?
                .signing_enabled(true)
                .build()?;
            let unsigned = UnsignedArtifact::from_path(artifact)
                .await
                .map_err(crate::bundle::BundleError::from)?;
            let signed = Pipeline::new(config, runtime_config.clone())
                .sign(&unsigned)
                .await?;
            runtime_config.success(&format!(
                "Signed {} (job {})",
                signed.path.display(),
                signed.job_id
            ));
        }
        Command::SmokeTest {
            artifact,
            overrides,
        } => {
            let config = load(&args.config, overrides)?.build()?;
            smoke_test(&config, artifact, runtime_config).await?;
        }
    }
    Ok(())
}

fn load(config_path: &Path, overrides: &Overrides) -> Result<PipelineConfigBuilder> {
    Ok(overrides.apply(PipelineConfigBuilder::from_path(config_path)?))
}

async fn smoke_test(
    config: &PipelineConfig,
    artifact: &Path,
    runtime_config: &RuntimeConfig,
) -> Result<()> {
    // The subcommand runs even when `[smoke].enabled = false`
    SmokeTest::new(config.smoke_settings(), runtime_config)
        .run(artifact)
        .await?;
    Ok(())
}
