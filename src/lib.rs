//! Release orchestration for desktop bundles
//!
//! One pipeline run takes a Rust workspace from source to a published,
//! smoke-tested desktop bundle:
//! - reclaims build-host disk space at fixed points
//! - builds the platform binaries with the Rust toolchain
//! - assembles them into a bundle with a bounded retry
//! - optionally signs the bundle through an asynchronous remote service
//! - publishes the result and launches it once
//!
//! It can be used both as a CLI tool and as a library dependency.

pub mod builder;
pub mod bundle;
pub mod cli;
pub mod config;
pub mod disk;
pub mod error;
pub mod pipeline;
pub mod publish;
pub mod signing;
pub mod store;
pub mod utils;

// Re-export commonly used types
pub use error::{CliError, PipelineError, Result};
