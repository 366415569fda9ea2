//! Shared helpers for filesystem, hashing and process execution.

pub mod checksum;
pub mod fs;
pub mod process;

#[cfg(all(test, unix))]
pub mod testing;
