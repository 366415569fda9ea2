//! External command execution with streamed output and timeouts.

use crate::cli::RuntimeConfig;
use std::io;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};

/// How many times a spawn hitting ETXTBSY is retried.
const BUSY_SPAWN_RETRIES: u32 = 5;

/// Result of a streamed command execution
#[derive(Debug)]
pub struct CommandOutcome {
    /// Exit status of the command
    pub status: ExitStatus,
    /// Captured stderr lines
    pub stderr_lines: Vec<String>,
}

impl CommandOutcome {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Exit code, or -1 if terminated by signal.
    pub fn code(&self) -> i32 {
        self.status.code().unwrap_or(-1)
    }

    /// Last `n` stderr lines joined for error messages.
    pub fn stderr_tail(&self, n: usize) -> String {
        let start = self.stderr_lines.len().saturating_sub(n);
        self.stderr_lines[start..].join("\n")
    }
}

/// Renders a command line for messages.
pub fn describe(program: &str, args: &[String]) -> String {
    std::iter::once(program)
        .chain(args.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Spawns `command`, retrying briefly when the executable is still busy.
///
/// A freshly written executable can report ETXTBSY while another thread's
/// fork still holds the write descriptor.
pub async fn spawn(command: &mut Command) -> io::Result<Child> {
    let mut retries = 0;
    loop {
        match command.spawn() {
            Err(e) if is_text_file_busy(&e) && retries < BUSY_SPAWN_RETRIES => {
                retries += 1;
                log::debug!("executable busy, retrying spawn ({retries}/{BUSY_SPAWN_RETRIES})");
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            other => return other,
        }
    }
}

fn is_text_file_busy(e: &io::Error) -> bool {
    #[cfg(unix)]
    {
        e.raw_os_error() == Some(26)
    }
    #[cfg(not(unix))]
    {
        let _ = e;
        false
    }
}

/// Runs a command, streaming stdout and stderr to the status output while
/// capturing stderr for error reporting.
///
/// The whole execution (including draining output) is bounded by `timeout`;
/// on expiry the process is killed and an [`io::ErrorKind::TimedOut`] error
/// is returned.
pub async fn run_streaming(
    command: &mut Command,
    timeout: Duration,
    runtime_config: &RuntimeConfig,
) -> io::Result<CommandOutcome> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = spawn(command).await?;
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let run = async {
        // Both streams must complete before we check exit status
        let (_, stderr_lines) = tokio::join!(
            async {
                if let Some(stdout) = stdout {
                    let mut lines = BufReader::new(stdout).lines();
                    while let Ok(Some(line)) = lines.next_line().await {
                        runtime_config.indent(&line);
                    }
                }
            },
            async {
                let mut captured = Vec::new();
                if let Some(stderr) = stderr {
                    let mut lines = BufReader::new(stderr).lines();
                    while let Ok(Some(line)) = lines.next_line().await {
                        runtime_config.indent(&line);
                        captured.push(line);
                    }
                }
                captured
            }
        );
        let status = child.wait().await?;
        Ok::<_, io::Error>(CommandOutcome {
            status,
            stderr_lines,
        })
    };

    let result = tokio::time::timeout(timeout, run).await;
    match result {
        Ok(result) => result,
        Err(_elapsed) => {
            runtime_config.warn(&format!(
                "Command timed out after {}s, terminating...",
                timeout.as_secs()
            ));
            if let Err(e) = child.kill().await {
                log::warn!("Failed to kill timed out process: {}", e);
            }
            Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("timed out after {}s", timeout.as_secs()),
            ))
        }
    }
}

/// Runs a command to completion and captures its output.
pub async fn run_captured(
    command: &mut Command,
    timeout: Duration,
) -> io::Result<std::process::Output> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = spawn(command).await?;
    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(output) => output,
        Err(_elapsed) => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("timed out after {}s", timeout.as_secs()),
        )),
    }
}
