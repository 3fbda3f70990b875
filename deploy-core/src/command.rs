//! External command execution.
//!
//! Every collaborator the orchestrator drives through a CLI (the container
//! runtime, the ACME client) goes through [`CommandRunner`], which captures
//! stdout/stderr separately and bounds each invocation with a timeout.

use crate::error::{DeployError, Result};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// Captured result of a finished command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `None` when terminated by a signal
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// stdout followed by stderr, trimmed, for diagnostics.
    pub fn combined(&self) -> String {
        let stdout = self.stdout.trim();
        let stderr = self.stderr.trim();
        match (stdout.is_empty(), stderr.is_empty()) {
            (true, _) => stderr.to_string(),
            (false, true) => stdout.to_string(),
            (false, false) => format!("{}\n{}", stdout, stderr),
        }
    }

    /// stderr when present, else stdout. Runtimes report failures on stderr.
    pub fn diagnostic(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim().to_string()
        } else {
            stderr.to_string()
        }
    }
}

/// Runs external programs with a per-invocation timeout.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    timeout: Duration,
}

impl CommandRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Run `program` with `args` and capture its output.
    ///
    /// A non-zero exit is not an error here; callers decide what it means.
    /// Spawn failures and timeouts are.
    pub async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        debug!(program, args = args.len(), "Running command");

        let mut command = Command::new(program);
        command.args(args).stdout(Stdio::piped()).stderr(Stdio::piped()).kill_on_drop(true);

        let child = command.spawn().map_err(|e| DeployError::Command {
            program: program.to_string(),
            reason: format!("failed to spawn: {}", e),
        })?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| DeployError::Command {
                program: program.to_string(),
                reason: format!("failed to wait: {}", e),
            })?,
            Err(_) => {
                warn!(program, timeout_secs = self.timeout.as_secs(), "Command timed out");
                return Err(DeployError::Command {
                    program: program.to_string(),
                    reason: format!("timed out after {:?}", self.timeout),
                });
            }
        };

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
