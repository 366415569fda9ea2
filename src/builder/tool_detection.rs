//! External tool detection.
//!
//! Resolves configured program names (`cargo`, `rustup`, ...) against `PATH`
//! so a missing optional tool can be skipped with a warning instead of
//! failing at spawn time.

use std::path::PathBuf;

/// Locates `program` on `PATH`, or checks it directly when it is a path.
pub fn find_tool(program: &str) -> Option<PathBuf> {
    match which::which(program) {
        Ok(path) => {
            log::debug!("Found {} at: {}", program, path.display());
            Some(path)
        }
        Err(e) => {
            log::debug!("{} not found in PATH: {}", program, e);
            None
        }
    }
}
