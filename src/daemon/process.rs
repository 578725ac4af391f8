// PID and lock file management for the daemon process

use crate::error::{KnowError, Result};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

fn io_error(context: String) -> impl FnOnce(std::io::Error) -> KnowError {
    move |source| KnowError::Io { source, context }
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(io_error(format!("Failed to create directory: {:?}", parent)))?;
    }
    Ok(())
}

fn remove_if_exists(path: &Path, what: &str) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(io_error(format!("Failed to remove {}: {:?}", what, path))(e)),
    }
}

/// Owns the daemon's PID file and its companion `.lock` file
#[derive(Debug, Clone)]
pub struct ProcessManager {
    pid_file: PathBuf,
    lock_file: PathBuf,
}

impl ProcessManager {
    pub fn new(pid_file: PathBuf) -> Self {
        let lock_file = pid_file.with_extension("lock");
        Self {
            pid_file,
            lock_file,
        }
    }

    /// Whether the process named in the PID file is alive
    pub fn is_running(&self) -> bool {
        self.read_pid()
            .map(|pid| kill(Pid::from_raw(pid), None).is_ok())
            .unwrap_or(false)
    }

    /// Claim the lock and record this process id
    ///
    /// Files left behind by a daemon that died without cleaning up are replaced.
    pub fn acquire(&self) -> Result<()> {
        if self.is_running() {
            return Err(KnowError::Daemon("Daemon is already running".to_string()));
        }

        if self.lock_file.exists() {
            tracing::warn!("Removing stale lock file {:?}", self.lock_file);
            remove_if_exists(&self.lock_file, "stale lock file")?;
        }

        ensure_parent(&self.lock_file)?;
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.lock_file)
            .map_err(|_| {
                KnowError::Daemon(
                    "Failed to acquire lock - daemon may already be running".to_string(),
                )
            })?;

        ensure_parent(&self.pid_file)?;
        std::fs::write(&self.pid_file, std::process::id().to_string())
            .map_err(io_error(format!("Failed to write PID file: {:?}", self.pid_file)))?;

        Ok(())
    }

    /// Remove the PID and lock files
    pub fn release(&self) -> Result<()> {
        remove_if_exists(&self.pid_file, "PID file")?;
        remove_if_exists(&self.lock_file, "lock file")
    }

    pub fn read_pid(&self) -> Result<i32> {
        let contents = std::fs::read_to_string(&self.pid_file).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                KnowError::DaemonNotRunning
            } else {
                io_error(format!("Failed to read PID file: {:?}", self.pid_file))(e)
            }
        })?;

        contents
            .trim()
            .parse()
            .map_err(|_| KnowError::Daemon(format!("Invalid PID in {:?}", self.pid_file)))
    }

    /// Send a signal to the running daemon
    pub fn signal(&self, sig: Signal) -> Result<()> {
        let pid = self.read_pid()?;
        kill(Pid::from_raw(pid), sig)
            .map_err(|e| KnowError::Daemon(format!("Failed to signal process {}: {}", pid, e)))
    }

    pub fn pid_file(&self) -> &Path {
        &self.pid_file
    }

    pub fn lock_file(&self) -> &Path {
        &self.lock_file
    }
}
