//! Build-host disk space reclamation.
//!
//! The guard runs at fixed pipeline points and removes the targets configured
//! for that point. It is best-effort: missing targets are counted, removal
//! failures are collected and warned about, and [`DiskGuard::reclaim`] never
//! fails the pipeline.

use crate::cli::RuntimeConfig;
use crate::config::DiskConfig;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

/// Pipeline point at which the guard runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReclaimScope {
    BeforeBuild,
    AfterBuild,
    BeforePublish,
}

impl ReclaimScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BeforeBuild => "before-build",
            Self::AfterBuild => "after-build",
            Self::BeforePublish => "before-publish",
        }
    }
}

impl fmt::Display for ReclaimScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one reclaim pass.
#[derive(Debug, Clone)]
pub struct ReclaimReport {
    pub scope: ReclaimScope,
    /// Paths that were removed
    pub removed: Vec<PathBuf>,
    /// Bytes freed by the removals, as measured before deleting
    pub freed_bytes: u64,
    /// Patterns that matched nothing
    pub missing: usize,
    /// Targets that could not be removed, with the reason
    pub errors: Vec<(PathBuf, String)>,
    /// Available bytes on the workspace filesystem before the pass
    pub free_before: Option<u64>,
    /// Available bytes on the workspace filesystem after the pass
    pub free_after: Option<u64>,
}

impl ReclaimReport {
    fn new(scope: ReclaimScope) -> Self {
        Self {
            scope,
            removed: Vec::new(),
            freed_bytes: 0,
            missing: 0,
            errors: Vec::new(),
            free_before: None,
            free_after: None,
        }
    }
}

/// Removes configured build-host targets to keep disk usage in budget.
#[derive(Debug, Clone)]
pub struct DiskGuard {
    workspace: PathBuf,
    targets: DiskConfig,
}

impl DiskGuard {
    /// Creates a guard. Relative target patterns resolve against `workspace`.
    pub fn new(workspace: &Path, disk: &DiskConfig) -> Self {
        Self {
            workspace: workspace.to_path_buf(),
            targets: disk.clone(),
        }
    }

    /// Target patterns configured for `scope`.
    pub fn patterns(&self, scope: ReclaimScope) -> &[String] {
        match scope {
            ReclaimScope::BeforeBuild => &self.targets.before_build,
            ReclaimScope::AfterBuild => &self.targets.after_build,
            ReclaimScope::BeforePublish => &self.targets.before_publish,
        }
    }

    /// Removes every target configured for `scope`.
    ///
    /// Idempotent: a second call finds nothing left and frees zero bytes.
    pub async fn reclaim(
        &self,
        scope: ReclaimScope,
        runtime_config: &RuntimeConfig,
    ) -> ReclaimReport {
        runtime_config.section(&format!("Reclaiming disk space ({scope})"));

        let mut report = ReclaimReport::new(scope);
        report.free_before = available_space(&self.workspace);

        for pattern in self.patterns(scope) {
            let matches = match self.expand(pattern) {
                Ok(matches) => matches,
                Err(reason) => {
                    report.errors.push((PathBuf::from(pattern), reason));
                    continue;
                }
            };

            if matches.is_empty() {
                log::debug!("No match for disk target {}", pattern);
                report.missing += 1;
                continue;
            }

            for path in matches {
                if self.is_protected(&path).await {
                    report
                        .errors
                        .push((path, "refusing to remove a protected directory".into()));
                    continue;
                }

                let size = measure(&path).await;
                match remove(&path).await {
                    Ok(()) => {
                        log::info!("Removed {} ({})", path.display(), format_bytes(size));
                        runtime_config.verbose_println(&format!(
                            "Removed {} ({})",
                            path.display(),
                            format_bytes(size)
                        ));
                        report.freed_bytes += size;
                        report.removed.push(path);
                    }
                    // Raced with another removal; nothing left to free
                    Err(e) if e.kind() == io::ErrorKind::NotFound => report.missing += 1,
                    Err(e) => report.errors.push((path, e.to_string())),
                }
            }
        }

        report.free_after = available_space(&self.workspace);

        for (path, reason) in &report.errors {
            log::warn!("Could not reclaim {}: {}", path.display(), reason);
            runtime_config.warn(&format!("Could not reclaim {}: {}", path.display(), reason));
        }

        match (report.free_before, report.free_after) {
            (Some(before), Some(after)) => log::info!(
                "Disk space on workspace filesystem: {} -> {} available",
                format_bytes(before),
                format_bytes(after)
            ),
            _ => log::debug!("Workspace filesystem not found in disk list"),
        }

        runtime_config.success(&format!(
            "Reclaimed {} from {} target(s) ({} missing)",
            format_bytes(report.freed_bytes),
            report.removed.len(),
            report.missing
        ));

        report
    }

    /// Expands one pattern into the existing paths it matches.
    fn expand(&self, pattern: &str) -> Result<Vec<PathBuf>, String> {
        let full = if let Some(rest) = pattern.strip_prefix("~/") {
            let home = dirs::home_dir().ok_or("home directory is unknown")?;
            format!(
                "{}/{}",
                glob::Pattern::escape(&home.to_string_lossy()),
                rest
            )
        } else if Path::new(pattern).is_absolute() {
            pattern.to_string()
        } else {
            format!(
                "{}/{}",
                glob::Pattern::escape(&self.workspace.to_string_lossy()),
                pattern
            )
        };

        let paths = glob::glob(&full).map_err(|e| format!("invalid pattern: {e}"))?;
        let mut matches = Vec::new();
        for entry in paths {
            match entry {
                Ok(path) => matches.push(path),
                Err(e) => log::debug!("Skipping unreadable path: {}", e),
            }
        }
        Ok(matches)
    }

    async fn is_protected(&self, path: &Path) -> bool {
        let resolved = canonical(path).await;
        resolved.parent().is_none() || resolved == canonical(&self.workspace).await
    }
}

async fn canonical(path: &Path) -> PathBuf {
    tokio::fs::canonicalize(path)
        .await
        .unwrap_or_else(|_| path.to_path_buf())
}

/// Total size of the files under `path`; 0 if it cannot be read.
async fn measure(path: &Path) -> u64 {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        walkdir::WalkDir::new(&path)
            .into_iter()
            .filter_map(Result::ok)
            .filter_map(|entry| entry.metadata().ok())
            .filter(|metadata| metadata.is_file())
            .map(|metadata| metadata.len())
            .sum()
    })
    .await
    .unwrap_or(0)
}

async fn remove(path: &Path) -> io::Result<()> {
    let metadata = tokio::fs::symlink_metadata(path).await?;
    if metadata.is_dir() {
        tokio::fs::remove_dir_all(path).await
    } else {
        tokio::fs::remove_file(path).await
    }
}

/// Available bytes on the filesystem holding `path` (longest mount point wins).
fn available_space(path: &Path) -> Option<u64> {
    let path = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    let disks = sysinfo::Disks::new_with_refreshed_list();
    disks
        .list()
        .iter()
        .filter(|disk| path.starts_with(disk.mount_point()))
        .max_by_key(|disk| disk.mount_point().components().count())
        .map(|disk| disk.available_space())
}

fn format_bytes(bytes: u64) -> String {
    const MIB: f64 = 1024.0 * 1024.0;
    if bytes >= 1024 * 1024 * 1024 {
        format!("{:.2} GiB", bytes as f64 / (MIB * 1024.0))
    } else {
        format!("{:.1} MiB", bytes as f64 / MIB)
    }
}
