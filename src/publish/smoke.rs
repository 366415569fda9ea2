//! Post-publish smoke test: launch the bundle, check it stays alive, then
//! terminate it.

use super::PublishError;
use crate::cli::RuntimeConfig;
use crate::config::SmokeConfig;
use crate::utils::{fs as fs_utils, process};
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use sysinfo::{Pid, ProcessStatus, ProcessesToUpdate, System};
use tokio::process::Command;

/// Linux truncates process names (`comm`) to this many bytes.
const COMM_LEN: usize = 15;

/// How long terminated processes get to disappear.
const TERMINATION_TIMEOUT: Duration = Duration::from_secs(5);

/// Outcome of a passed smoke test.
#[derive(Debug, Clone)]
pub struct SmokeReport {
    /// Executable that was launched (inside the staging directory)
    pub executable: PathBuf,
    pub process_name: String,
    /// Matching processes found alive after the grace period
    pub alive: usize,
}

/// Launches a bundle and checks that it stays alive for the grace period.
#[derive(Debug, Clone)]
pub struct SmokeTest {
    config: SmokeConfig,
    runtime_config: RuntimeConfig,
}

impl SmokeTest {
    pub fn new(config: &SmokeConfig, runtime_config: &RuntimeConfig) -> Self {
        Self {
            config: config.clone(),
            runtime_config: runtime_config.clone(),
        }
    }

    /// Stages `artifact`, launches it, waits the grace period and checks for
    /// a live process by name. Processes that were already running under
    /// that name are left alone; every launched one is terminated before
    /// returning, whether the test passed or not.
    pub async fn run(&self, artifact: &Path) -> Result<SmokeReport, PublishError> {
        self.runtime_config
            .section(&format!("Smoke testing {}", artifact.display()));

        let staging = tempfile::tempdir()?;
        let executable = self.stage(artifact, staging.path()).await?;
        let process_name = match &self.config.process_name {
            Some(name) => name.clone(),
            None => executable
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        };

        // Same-named processes that predate the launch are not ours
        let bystanders: HashSet<Pid> = find_processes(&process_name).into_iter().collect();
        if !bystanders.is_empty() {
            log::warn!(
                "{} process(es) named {} already running, ignoring them",
                bystanders.len(),
                process_name
            );
        }

        let mut command = Command::new(&executable);
        command
            .args(&self.config.args)
            .envs(&self.config.env)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        if let Some(dir) = executable.parent() {
            command.current_dir(dir);
        }

        let mut child =
            process::spawn(&mut command)
                .await
                .map_err(|e| PublishError::SmokeTest {
                    reason: format!("failed to launch {}: {}", executable.display(), e),
                })?;
        self.runtime_config.progress(&format!(
            "Launched {} (pid {}), waiting {}s",
            process_name,
            child.id().unwrap_or_default(),
            self.config.grace.as_secs_f32()
        ));

        tokio::time::sleep(self.config.grace).await;

        // Reap the direct child so an early exit does not linger as a zombie
        let exit_status = match child.try_wait() {
            Ok(status) => status,
            Err(e) => {
                log::warn!("Failed to query smoke test process: {}", e);
                None
            }
        };

        let alive = launched_processes(&process_name, &bystanders);
        log::info!(
            "{} launched process(es) named {} alive after grace period",
            alive.len(),
            process_name
        );

        // Cleanup happens whether or not the test passed
        for pid in &alive {
            kill(*pid);
        }
        if exit_status.is_none() {
            if let Err(e) = child.kill().await {
                log::debug!("Smoke test child already gone: {}", e);
            }
        }
        let survivors = wait_for_exit(&process_name, &bystanders).await;

        let failure = match exit_status {
            Some(status) if !self.config.allow_detach => Some(format!(
                "{} exited within the {}s grace period ({})",
                process_name,
                self.config.grace.as_secs_f32(),
                status
            )),
            _ if alive.is_empty() => Some(format!("no running process named {}", process_name)),
            _ => None,
        };
        if let Some(reason) = failure {
            self.runtime_config.error(&reason);
            return Err(PublishError::SmokeTest { reason });
        }

        if survivors > 0 {
            return Err(PublishError::SmokeTest {
                reason: format!(
                    "{} process(es) named {} still running after termination",
                    survivors, process_name
                ),
            });
        }

        self.runtime_config
            .success(&format!("{} stayed alive and was terminated", process_name));
        Ok(SmokeReport {
            executable,
            process_name,
            alive: alive.len(),
        })
    }

    /// Copies or extracts the artifact into `staging` and returns the
    /// executable to launch.
    async fn stage(&self, artifact: &Path, staging: &Path) -> Result<PathBuf, PublishError> {
        let is_zip = artifact
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("zip"));

        let executable = if is_zip {
            let relative = self
                .config
                .executable
                .clone()
                .ok_or_else(|| PublishError::SmokeTest {
                    reason: "`smoke.executable` is required to launch a .zip bundle".into(),
                })?;
            extract_zip(artifact, staging).await?;
            let executable = staging.join(relative);
            if !executable.is_file() {
                return Err(PublishError::SmokeTest {
                    reason: format!("{} not found in the bundle", executable.display()),
                });
            }
            executable
        } else {
            let file_name = artifact.file_name().ok_or_else(|| PublishError::SmokeTest {
                reason: format!("{} has no file name", artifact.display()),
            })?;
            let executable = staging.join(file_name);
            fs_utils::copy_file(artifact, &executable).await?;
            executable
        };

        fs_utils::make_executable(&executable).await?;
        Ok(executable)
    }
}

async fn extract_zip(archive: &Path, dest: &Path) -> io::Result<()> {
    let archive = archive.to_path_buf();
    let dest = dest.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let file = std::fs::File::open(&archive)?;
        let mut zip = zip::ZipArchive::new(file).map_err(io::Error::other)?;
        zip.extract(&dest).map_err(io::Error::other)
    })
    .await
    .map_err(|e| io::Error::other(format!("Extraction task panicked: {}", e)))?
}

fn name_matches(actual: &str, expected: &str) -> bool {
    actual == expected
        || (expected.len() > COMM_LEN && expected.get(..COMM_LEN) == Some(actual))
}

/// Live (non-zombie) processes whose name matches `name`.
fn find_processes(name: &str) -> Vec<Pid> {
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::All, true);
    system
        .processes()
        .iter()
        .filter(|(_, process)| process.status() != ProcessStatus::Zombie)
        .filter(|(_, process)| name_matches(&process.name().to_string_lossy(), name))
        .map(|(pid, _)| *pid)
        .collect()
}

fn kill(pid: Pid) {
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    match system.process(pid) {
        Some(process) if process.kill() => log::debug!("Killed pid {}", pid),
        Some(_) => log::warn!("Failed to kill pid {}", pid),
        None => log::debug!("pid {} already exited", pid),
    }
}

/// Matching processes minus those that were running before the launch.
fn launched_processes(name: &str, bystanders: &HashSet<Pid>) -> Vec<Pid> {
    find_processes(name)
        .into_iter()
        .filter(|pid| !bystanders.contains(pid))
        .collect()
}

/// Waits until no launched process named `name` remains; returns how many
/// survived.
async fn wait_for_exit(name: &str, bystanders: &HashSet<Pid>) -> usize {
    let deadline = tokio::time::Instant::now() + TERMINATION_TIMEOUT;
    loop {
        let remaining = launched_processes(name, bystanders).len();
        if remaining == 0 || tokio::time::Instant::now() >= deadline {
            return remaining;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
