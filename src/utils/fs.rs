//! File system utilities for the pipeline.
//!
//! Provides idempotent directory operations, copies that create parent
//! directories, and atomic file replacement.

use std::{
    io::{self},
    path::Path,
};
use tokio::fs;

/// Removes the directory and its contents if it exists.
pub async fn remove_dir_all(path: &Path) -> io::Result<()> {
    match fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()), // Idempotent
        Err(e) => Err(e),
    }
}

/// Copies a regular file from one path to another, creating any parent
/// directories of the destination path as necessary.
///
/// Fails if the source path is a directory or doesn't exist.
pub async fn copy_file(from: &Path, to: &Path) -> io::Result<()> {
    let metadata = fs::metadata(from).await?;
    if !metadata.is_file() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} is not a file", from.display()),
        ));
    }
    if let Some(dest_dir) = to.parent() {
        fs::create_dir_all(dest_dir).await?;
    }
    fs::copy(from, to).await?;
    Ok(())
}

/// Recursively copies a directory from one path to another, creating any
/// parent directories of the destination path as necessary.
///
/// Existing files at the destination are overwritten.
pub async fn copy_dir(from: &Path, to: &Path) -> io::Result<()> {
    if !from.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} is not a directory", from.display()),
        ));
    }

    let from = from.to_path_buf();
    let to = to.to_path_buf();

    // Offload blocking traversal to dedicated thread pool
    tokio::task::spawn_blocking(move || {
        for entry in walkdir::WalkDir::new(&from) {
            let entry = entry?;
            let rel_path = entry
                .path()
                .strip_prefix(&from)
                .map_err(|e| io::Error::other(e.to_string()))?;
            let dest_path = to.join(rel_path);

            if entry.file_type().is_dir() {
                std::fs::create_dir_all(dest_path)?;
            } else {
                if let Some(parent) = dest_path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::copy(entry.path(), dest_path)?;
            }
        }
        Ok(())
    })
    .await
    .map_err(|e| io::Error::other(format!("Directory copy task panicked: {}", e)))?
}

/// Copies a file or directory, whichever `from` is.
pub async fn copy_path(from: &Path, to: &Path) -> io::Result<()> {
    if fs::metadata(from).await?.is_dir() {
        copy_dir(from, to).await
    } else {
        copy_file(from, to).await
    }
}

/// Marks a file executable (0755). No-op off unix.
pub async fn make_executable(path: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).await?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}

/// Replaces `path` with `contents` via a sibling temp file and rename, so a
/// reader never observes a partially written file.
pub async fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let file_name = path
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;
    let tmp = path.with_file_name(format!(
        ".{}.{}.tmp",
        file_name.to_string_lossy(),
        uuid::Uuid::new_v4().simple()
    ));

    fs::write(&tmp, contents).await?;

    // Keep the permissions of the file being replaced (executables stay executable)
    if let Ok(metadata) = fs::metadata(path).await {
        fs::set_permissions(&tmp, metadata.permissions()).await?;
    }

    if let Err(e) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e);
    }
    Ok(())
}
