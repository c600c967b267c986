//! Command execution for the engine and bus adapters
//!
//! This module provides the `Executor` abstraction for running external
//! commands with a timeout, plus template rendering for the configured
//! command lines.

use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, instrument};

use crate::{BusError, EngineError};

/// Command execution errors
#[derive(Error, Debug)]
pub enum ExecError {
    #[error("Failed to start command: {0}")]
    Spawn(String),

    #[error("Command failed with exit code {exit_code}: {stderr}")]
    Failed { exit_code: i32, stderr: String },

    #[error("Timeout after {0:?}")]
    Timeout(Duration),
}

impl From<ExecError> for EngineError {
    fn from(err: ExecError) -> Self {
        match err {
            ExecError::Spawn(msg) => EngineError::Unreachable(msg),
            ExecError::Timeout(timeout) => EngineError::Timeout(timeout),
            failed @ ExecError::Failed { .. } => EngineError::ExecutionError(failed.to_string()),
        }
    }
}

impl From<ExecError> for BusError {
    fn from(err: ExecError) -> Self {
        match err {
            ExecError::Timeout(timeout) => BusError::Timeout(timeout),
            other => BusError::Transport(other.to_string()),
        }
    }
}

/// Output from command execution
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    /// Check if the command succeeded (exit code 0)
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs shell command lines with a timeout
#[derive(Debug, Clone)]
pub struct Executor {
    shell: String,
}

impl Default for Executor {
    fn default() -> Self {
        Self::local()
    }
}

impl Executor {
    /// Create an executor using `sh`
    #[must_use]
    pub fn local() -> Self {
        Self {
            shell: "sh".to_string(),
        }
    }

    /// Use a different POSIX shell
    #[must_use]
    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    /// Run a command with timeout
    ///
    /// The child is killed if the returned future is dropped, so a shutdown
    /// in the middle of a long engine call does not leave it running.
    ///
    /// # Errors
    ///
    /// Returns [`ExecError`] when the command cannot be started or times out.
    #[instrument(skip(self))]
    pub async fn run(&self, cmd: &str, timeout: Duration) -> Result<CommandOutput, ExecError> {
        debug!(cmd = %cmd, "Running command");

        let child = Command::new(&self.shell)
            .arg("-c")
            .arg(cmd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ExecError::Spawn(e.to_string()))?;

        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => Ok(CommandOutput {
                stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                exit_code: output.status.code().unwrap_or(-1),
            }),
            Ok(Err(e)) => Err(ExecError::Spawn(e.to_string())),
            Err(_) => Err(ExecError::Timeout(timeout)),
        }
    }

    /// Run a command with timeout, returning stdout on success
    ///
    /// # Errors
    ///
    /// Returns [`ExecError`] when execution fails, times out, or the command exits non-zero.
    pub async fn run_timeout(&self, cmd: &str, timeout: Duration) -> Result<String, ExecError> {
        let output = self.run(cmd, timeout).await?;
        if !output.success() {
            return Err(ExecError::Failed {
                exit_code: output.exit_code,
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(output.stdout)
    }
}

/// Shell-escape a string for safe use in commands
#[must_use]
pub fn shell_escape(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}

/// Substitute `{key}` placeholders in a command template.
///
/// Values are inserted verbatim; callers escape them first.
#[must_use]
pub fn render_template(template: &str, vars: &[(&str, String)]) -> String {
    vars.iter().fold(template.to_string(), |acc, (key, value)| {
        acc.replace(&format!("{{{key}}}"), value)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_local_executor() {
        let executor = Executor::local();
        let output = executor
            .run("echo hello", Duration::from_secs(5))
            .await
            .unwrap();
        assert!(output.success());
        assert_eq!(output.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn test_run_timeout_success() {
        let executor = Executor::local();
        let stdout = executor
            .run_timeout("echo success", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(stdout.trim(), "success");
    }

    #[tokio::test]
    async fn test_run_timeout_failure() {
        let executor = Executor::local();
        let result = executor
            .run_timeout("echo broken >&2; exit 3", Duration::from_secs(5))
            .await;
        match result {
            Err(ExecError::Failed { exit_code, stderr }) => {
                assert_eq!(exit_code, 3);
                assert_eq!(stderr, "broken");
            }
            other => panic!("Expected Failed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_run_times_out() {
        let executor = Executor::local();
        let result = executor.run("sleep 5", Duration::from_millis(100)).await;
        assert!(matches!(result, Err(ExecError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_missing_shell_is_spawn_error() {
        let executor = Executor::local().with_shell("/nonexistent/shell");
        let result = executor.run("true", Duration::from_secs(1)).await;
        assert!(matches!(result, Err(ExecError::Spawn(_))));
    }

    #[test]
    fn test_shell_escape() {
        assert_eq!(shell_escape("simple"), "'simple'");
        assert_eq!(shell_escape("with spaces"), "'with spaces'");
        assert_eq!(shell_escape("with'quote"), "'with'\\''quote'");
    }

    #[test]
    fn test_render_template() {
        let rendered = render_template(
            "pvput {pv} {value}",
            &[("pv", shell_escape("A:B")), ("value", "3".to_string())],
        );
        assert_eq!(rendered, "pvput 'A:B' 3");
    }

    #[test]
    fn test_render_template_leaves_unknown_placeholders() {
        let rendered = render_template("cmd {other}", &[("pv", "x".to_string())]);
        assert_eq!(rendered, "cmd {other}");
    }

    #[test]
    fn test_exec_error_mapping() {
        let engine: EngineError = ExecError::Spawn("no such file".into()).into();
        assert!(matches!(engine, EngineError::Unreachable(_)));

        let bus: BusError = ExecError::Timeout(Duration::from_secs(1)).into();
        assert!(matches!(bus, BusError::Timeout(_)));

        let bus: BusError = ExecError::Failed {
            exit_code: 1,
            stderr: "channel disconnected".into(),
        }
        .into();
        assert!(matches!(bus, BusError::Transport(_)));
    }
}
