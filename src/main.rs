//! Kodegen Release Pipeline - build, bundle, sign and publish desktop releases.
//!
//! This binary drives the release pipeline and maps the first fatal stage
//! failure to a distinct process exit code.

use std::process;

#[tokio::main]
async fn main() {
    // Initialize logging
    env_logger::init();

    // Run CLI and get exit code
    let exit_code = match kodegen_release_pipeline::cli::run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error [{}]: {}", e.stage(), e);
            e.exit_code()
        }
    };

    process::exit(exit_code);
}
