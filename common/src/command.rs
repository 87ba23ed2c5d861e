//! Command execution utilities
//!
//! Provides consistent command execution with proper error handling and logging.
//! PostgreSQL connection variables from the caller's environment are never
//! inherited by child processes; callers pass what they need explicitly.

use anyhow::{anyhow, Context, Result};
use std::io::ErrorKind;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, instrument};

/// libpq variables stripped from every child environment.
pub const CLEARED_PG_VARS: &[&str] = &[
    "PGPASSWORD",
    "PGUSER",
    "PGHOST",
    "PGPORT",
    "PGDATABASE",
    "PGSERVICE",
];

/// Result of a command execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
    pub code: Option<i32>,
}

impl CommandOutput {
    /// Exit code as text, or "signal" when the process was killed.
    pub fn exit_label(&self) -> String {
        self.code
            .map(|c| c.to_string())
            .unwrap_or_else(|| "signal".to_string())
    }

    /// One-line description of a failed run, preferring stderr.
    pub fn failure_message(&self, cmd: &str) -> String {
        let detail = if self.stderr.is_empty() {
            &self.stdout
        } else {
            &self.stderr
        };
        format!("{} failed (exit {}): {}", cmd, self.exit_label(), detail)
    }
}

fn base_command(cmd: &str, args: &[&str]) -> Command {
    let mut command = Command::new(cmd);
    command.args(args);
    for var in CLEARED_PG_VARS {
        command.env_remove(var);
    }
    command
}

/// Run a command and return its output.
///
/// This is a low-level function that returns both stdout and stderr.
/// Use `run_checked` if you want to treat non-zero exit as an error.
#[instrument(skip_all, fields(cmd = %cmd))]
pub async fn run(cmd: &str, args: &[&str]) -> Result<CommandOutput> {
    debug!(args = ?args, "Running command");

    let output = base_command(cmd, args)
        .stdin(Stdio::null())
        .output()
        .await
        .context(format!("Failed to execute {}", cmd))?;

    Ok(CommandOutput {
        stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        success: output.status.success(),
        code: output.status.code(),
    })
}

/// Run a command with `input` written to its stdin and extra environment.
///
/// Used for SQL scripts so that statements (and the secrets inside them)
/// never show up in the process list.
#[instrument(skip_all, fields(cmd = %cmd))]
pub async fn run_with_input(
    cmd: &str,
    args: &[&str],
    input: &str,
    env: &[(&str, &str)],
) -> Result<CommandOutput> {
    debug!(args = ?args, bytes = input.len(), "Running command with stdin");

    let mut command = base_command(cmd, args);
    for (key, value) in env {
        command.env(key, value);
    }

    let mut child = command
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .context(format!("Failed to spawn {}", cmd))?;

    if let Some(mut stdin) = child.stdin.take() {
        // A child that exits without reading reports through its exit status.
        match stdin.write_all(input.as_bytes()).await {
            Err(e) if e.kind() == ErrorKind::BrokenPipe => {
                debug!("Child closed stdin early");
            }
            other => other.context(format!("Failed to write stdin of {}", cmd))?,
        }
    }

    let output = child
        .wait_with_output()
        .await
        .context(format!("Failed to wait for {}", cmd))?;

    Ok(CommandOutput {
        stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        success: output.status.success(),
        code: output.status.code(),
    })
}

/// Run a command and return stdout if successful, error otherwise.
///
/// # Example
/// ```ignore
/// let version = run_checked("psql", &["--version"]).await?;
/// ```
pub async fn run_checked(cmd: &str, args: &[&str]) -> Result<String> {
    let output = run(cmd, args).await?;
    if output.success {
        Ok(output.stdout)
    } else {
        Err(anyhow!(output.failure_message(cmd)))
    }
}

/// Check whether `bin` can be spawned from the search path.
///
/// Only a missing executable counts as "not installed": a tool that starts
/// but rejects `--version` is still present.
pub async fn is_installed(bin: &str) -> bool {
    let result = base_command(bin, &["--version"])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;

    match result {
        Ok(_) => true,
        Err(e) if e.kind() == ErrorKind::NotFound => false,
        Err(e) => {
            debug!(bin, error = %e, "Spawn failed");
            false
        }
    }
}
