//! Daemon process management
//!
//! PID-file bookkeeping and background process control for `wd start`,
//! `wd stop`, and `wd status`.

use std::fs;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use eyre::{Context, Result};
use tracing::{debug, info, warn};

/// Default PID file location
fn default_pid_path() -> PathBuf {
    debug!("default_pid_path: called");
    let path = dirs::runtime_dir()
        .or_else(dirs::data_local_dir)
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("warden")
        .join("warden.pid");
    debug!(?path, "default_pid_path: returning path");
    path
}

/// Daemon process manager
#[derive(Debug)]
pub struct DaemonManager {
    pid_file: PathBuf,
}

/// Daemon status information
#[derive(Debug)]
pub struct DaemonStatus {
    pub running: bool,
    pub pid: Option<u32>,
    pub pid_file: PathBuf,
}

impl Default for DaemonManager {
    fn default() -> Self {
        Self::new()
    }
}

impl DaemonManager {
    pub fn new() -> Self {
        debug!("DaemonManager::new: called");
        Self {
            pid_file: default_pid_path(),
        }
    }

    pub fn with_pid_file(pid_file: PathBuf) -> Self {
        debug!(?pid_file, "DaemonManager::with_pid_file: called");
        Self { pid_file }
    }

    pub fn is_running(&self) -> bool {
        debug!("DaemonManager::is_running: called");
        let result = self.running_pid().is_some();
        debug!(result, "DaemonManager::is_running: returning");
        result
    }

    pub fn running_pid(&self) -> Option<u32> {
        debug!("DaemonManager::running_pid: called");
        let result = self.read_pid().filter(|&pid| is_process_running(pid));
        debug!(?result, "DaemonManager::running_pid: returning");
        result
    }

    fn read_pid(&self) -> Option<u32> {
        debug!(?self.pid_file, "DaemonManager::read_pid: called");
        if !self.pid_file.exists() {
            debug!("DaemonManager::read_pid: pid file does not exist");
            return None;
        }
        let pid = fs::read_to_string(&self.pid_file).ok()?.trim().parse().ok();
        debug!(?pid, "DaemonManager::read_pid: returning");
        pid
    }

    fn write_pid(&self, pid: u32) -> Result<()> {
        debug!(pid, ?self.pid_file, "DaemonManager::write_pid: called");
        if let Some(parent) = self.pid_file.parent() {
            fs::create_dir_all(parent).context("Failed to create PID file directory")?;
        }
        fs::write(&self.pid_file, pid.to_string()).context("Failed to write PID file")?;
        debug!(pid, path = %self.pid_file.display(), "Wrote PID file");
        Ok(())
    }

    fn remove_pid_file(&self) -> Result<()> {
        debug!(?self.pid_file, "DaemonManager::remove_pid_file: called");
        if self.pid_file.exists() {
            debug!("DaemonManager::remove_pid_file: removing file");
            fs::remove_file(&self.pid_file).context("Failed to remove PID file")?;
        } else {
            debug!("DaemonManager::remove_pid_file: file does not exist");
        }
        Ok(())
    }

    /// Spawn the daemon process in the background
    pub fn start(&self) -> Result<u32> {
        debug!("DaemonManager::start: called");
        if let Some(pid) = self.running_pid() {
            debug!(pid, "DaemonManager::start: daemon already running");
            return Err(eyre::eyre!("Daemon already running with PID {}", pid));
        }

        let exe = std::env::current_exe().context("Failed to get current executable")?;
        debug!(?exe, "DaemonManager::start: spawning daemon process");
        let child = Command::new(&exe)
            .arg("run-daemon")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .context("Failed to spawn daemon process")?;

        let pid = child.id();
        debug!(pid, "DaemonManager::start: daemon spawned");
        self.write_pid(pid)?;
        info!(pid, "Daemon started");
        Ok(pid)
    }

    /// Stop the daemon: SIGTERM, then SIGKILL if it lingers
    pub fn stop(&self) -> Result<()> {
        debug!("DaemonManager::stop: called");
        let pid = self.running_pid().ok_or_else(|| {
            debug!("DaemonManager::stop: daemon is not running");
            eyre::eyre!("Daemon is not running")
        })?;
        info!(pid, "Stopping daemon");

        #[cfg(unix)]
        {
            use nix::sys::signal::{Signal, kill};
            use nix::unistd::Pid;
            debug!(pid, "DaemonManager::stop: sending SIGTERM");
            kill(Pid::from_raw(pid as i32), Signal::SIGTERM).context("Failed to send SIGTERM")?;
        }

        debug!("DaemonManager::stop: waiting for process to exit");
        let mut attempts = 0;
        while is_process_running(pid) && attempts < 50 {
            std::thread::sleep(std::time::Duration::from_millis(100));
            attempts += 1;
        }
        debug!(attempts, "DaemonManager::stop: waited for process");

        if is_process_running(pid) {
            debug!(pid, "DaemonManager::stop: process still running, sending SIGKILL");
            warn!(pid, "Daemon did not stop gracefully, sending SIGKILL");
            #[cfg(unix)]
            {
                use nix::sys::signal::{Signal, kill};
                use nix::unistd::Pid;
                let _ = kill(Pid::from_raw(pid as i32), Signal::SIGKILL);
            }
        } else {
            debug!("DaemonManager::stop: process exited gracefully");
        }

        self.remove_pid_file()?;
        info!(pid, "Daemon stopped");
        debug!("DaemonManager::stop: done");
        Ok(())
    }

    /// Record the current process as the daemon
    pub fn register_self(&self) -> Result<()> {
        debug!("DaemonManager::register_self: called");
        let pid = std::process::id();
        self.write_pid(pid)?;
        info!(pid, "Daemon registered");
        Ok(())
    }

    pub fn status(&self) -> DaemonStatus {
        debug!("DaemonManager::status: called");
        let pid = self.running_pid();
        let status = DaemonStatus {
            running: pid.is_some(),
            pid,
            pid_file: self.pid_file.clone(),
        };
        debug!(?status, "DaemonManager::status: returning");
        status
    }

    pub fn pid_file(&self) -> &PathBuf {
        debug!(?self.pid_file, "DaemonManager::pid_file: called");
        &self.pid_file
    }
}

/// Check if a process with the given PID is running
fn is_process_running(pid: u32) -> bool {
    debug!(pid, "is_process_running: called");
    #[cfg(unix)]
    {
        use nix::sys::signal::kill;
        use nix::unistd::Pid;
        // Signal 0 probes existence without affecting the process
        let result = kill(Pid::from_raw(pid as i32), None).is_ok();
        debug!(pid, result, "is_process_running: unix check");
        result
    }

    #[cfg(not(unix))]
    {
        debug!(pid, "is_process_running: unknown platform, assuming running");
        let _ = pid;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_not_running_without_pid_file() {
        let dir = TempDir::new().unwrap();
        let manager = DaemonManager::with_pid_file(dir.path().join("missing.pid"));
        assert!(!manager.is_running());
        assert!(manager.running_pid().is_none());
    }

    #[test]
    fn test_write_and_read_pid() {
        let dir = TempDir::new().unwrap();
        let manager = DaemonManager::with_pid_file(dir.path().join("test.pid"));

        manager.write_pid(12345).unwrap();
        assert_eq!(manager.read_pid(), Some(12345));

        manager.remove_pid_file().unwrap();
        assert_eq!(manager.read_pid(), None);
    }

    #[test]
    fn test_register_self_reports_running() {
        let dir = TempDir::new().unwrap();
        let manager = DaemonManager::with_pid_file(dir.path().join("self.pid"));

        manager.register_self().unwrap();
        // Our own PID certainly exists
        assert!(manager.is_running());
        assert_eq!(manager.running_pid(), Some(std::process::id()));
    }

    #[test]
    fn test_status_reflects_pid_file() {
        let dir = TempDir::new().unwrap();
        let pid_file = dir.path().join("status.pid");
        let manager = DaemonManager::with_pid_file(pid_file.clone());

        let status = manager.status();
        assert!(!status.running);
        assert_eq!(status.pid_file, pid_file);
    }

    #[test]
    fn test_stale_pid_not_reported_running() {
        let dir = TempDir::new().unwrap();
        let manager = DaemonManager::with_pid_file(dir.path().join("stale.pid"));

        // A PID far beyond pid_max cannot exist
        manager.write_pid(u32::MAX - 1).unwrap();
        assert!(!manager.is_running());
    }
}
