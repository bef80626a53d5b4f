//! Shell command execution with timeouts and captured output

use std::process::Stdio;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, warn};

/// Captured result of one shell command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandOutput {
    pub command: String,
    /// None when the process was killed by the timeout
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0) && !self.timed_out
    }
}

/// Run a command through the shell, killing it at the timeout
///
/// The child is killed when the timeout future drops it, so a hung
/// command cannot outlive its action.
pub async fn run_shell(command: &str, timeout: Duration) -> Result<CommandOutput, std::io::Error> {
    debug!(%command, ?timeout, "run_shell: called");
    let started = Instant::now();

    let child = Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(output) => {
            let output = output?;
            let result = CommandOutput {
                command: command.to_string(),
                exit_code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                duration_ms: started.elapsed().as_millis() as u64,
                timed_out: false,
            };
            debug!(exit_code = ?result.exit_code, duration_ms = result.duration_ms, "run_shell: completed");
            Ok(result)
        }
        Err(_) => {
            warn!(%command, ?timeout, "run_shell: command timed out");
            Ok(CommandOutput {
                command: command.to_string(),
                exit_code: None,
                stdout: String::new(),
                stderr: format!("timed out after {:?}", timeout),
                duration_ms: started.elapsed().as_millis() as u64,
                timed_out: true,
            })
        }
    }
}

/// Probe a service's active state via the service manager
///
/// Returns None when the probe itself cannot run.
pub async fn service_active(service: &str) -> Option<bool> {
    let output = run_shell(&format!("systemctl is-active {}", service), Duration::from_secs(10))
        .await
        .ok()?;
    if output.timed_out {
        return None;
    }
    Some(output.stdout.trim() == "active")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_captures_stdout_and_exit_code() {
        let output = run_shell("echo hello", Duration::from_secs(5)).await.unwrap();
        assert!(output.success());
        assert_eq!(output.stdout.trim(), "hello");
        assert_eq!(output.exit_code, Some(0));
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_failure() {
        let output = run_shell("exit 3", Duration::from_secs(5)).await.unwrap();
        assert!(!output.success());
        assert_eq!(output.exit_code, Some(3));
    }

    #[tokio::test]
    async fn test_captures_stderr() {
        let output = run_shell("echo oops >&2; exit 1", Duration::from_secs(5)).await.unwrap();
        assert_eq!(output.stderr.trim(), "oops");
    }

    #[tokio::test]
    async fn test_timeout_kills_command() {
        let started = Instant::now();
        let output = run_shell("sleep 30", Duration::from_millis(200)).await.unwrap();

        assert!(output.timed_out);
        assert!(!output.success());
        assert!(output.exit_code.is_none());
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
