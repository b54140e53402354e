//! `sh -c` command runner.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::domain::{Artifact, Outcome};
use crate::ports::CommandRunner;

/// Runs each command through `/bin/sh -c` with stdout/stderr captured.
///
/// The child is killed when the timeout elapses (`kill_on_drop`), so a hung
/// command never outlives its attempt.
#[derive(Debug, Clone)]
pub struct ShellRunner {
    shell: String,
}

impl ShellRunner {
    pub fn new() -> Self {
        Self {
            shell: "sh".to_string(),
        }
    }

    /// Use another POSIX shell (must accept `-c <command>`).
    pub fn with_shell(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }

    fn process_output(output: std::process::Output) -> Outcome {
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        let exit_code = output.status.code();

        let outcome = if output.status.success() {
            Outcome::success()
        } else {
            let reason = if stderr.trim().is_empty() {
                match exit_code {
                    Some(code) => format!("exit code {code}"),
                    None => "terminated by signal".to_string(),
                }
            } else {
                stderr.trim_end().to_string()
            };
            Outcome::failure(reason)
        };

        let mut outcome = outcome.with_exit_code(exit_code);
        if !stdout.is_empty() {
            outcome = outcome.with_artifact(Artifact::Stdout(stdout));
        }
        if !stderr.is_empty() {
            outcome = outcome.with_artifact(Artifact::Stderr(stderr));
        }
        outcome
    }
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(&self, command: &str, timeout: Duration) -> Outcome {
        debug!(command, timeout_secs = timeout.as_secs_f64(), "spawning command");

        let child = Command::new(&self.shell)
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let child = match child {
            Ok(child) => child,
            Err(e) => {
                warn!(command, error = %e, "failed to spawn command");
                return Outcome::failure(format!("failed to spawn command: {e}"));
            }
        };

        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => Self::process_output(output),
            Ok(Err(e)) => Outcome::failure(format!("failed to wait for command: {e}")),
            Err(_) => {
                warn!(command, timeout_secs = timeout.as_secs_f64(), "command timed out");
                Outcome::failure(format!(
                    "command timed out after {}s",
                    timeout.as_secs_f64()
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::OutcomeKind;

    const LONG: Duration = Duration::from_secs(10);

    #[tokio::test]
    async fn zero_exit_is_success_with_stdout() {
        let outcome = ShellRunner::new().run("echo hello", LONG).await;
        assert!(outcome.is_success());
        assert_eq!(outcome.exit_code, Some(0));
        assert_eq!(outcome.stdout(), Some("hello\n"));
    }

    #[tokio::test]
    async fn non_zero_exit_without_stderr_reports_exit_code() {
        let outcome = ShellRunner::new().run("exit 3", LONG).await;
        assert_eq!(outcome.kind, OutcomeKind::Failure);
        assert_eq!(outcome.exit_code, Some(3));
        assert_eq!(outcome.error_text(), "exit code 3");
    }

    #[tokio::test]
    async fn stderr_becomes_the_error_text() {
        let outcome = ShellRunner::new().run("echo boom >&2; exit 1", LONG).await;
        assert!(!outcome.is_success());
        assert_eq!(outcome.error_text(), "boom");
    }

    #[tokio::test]
    async fn timeout_is_a_failure() {
        let outcome = ShellRunner::new()
            .run("sleep 5", Duration::from_millis(100))
            .await;
        assert!(!outcome.is_success());
        assert!(outcome.error_text().contains("timed out"));
    }

    #[tokio::test]
    async fn missing_shell_is_a_failure_not_a_panic() {
        let outcome = ShellRunner::with_shell("/nonexistent/shell")
            .run("true", LONG)
            .await;
        assert!(!outcome.is_success());
        assert!(outcome.error_text().starts_with("failed to spawn"));
    }
}
