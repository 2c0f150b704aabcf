//! Advisory single-instance lock based on a pid file.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use log::{info, warn};

/// Answers whether a process id is currently alive.
#[cfg_attr(test, mockall::automock)]
pub trait ProcessProbe: Send + Sync {
    fn is_alive(&self, pid: u32) -> bool;
}

/// Liveness check through the `/proc` file system.
#[derive(Debug, Clone)]
pub struct ProcFs {
    root: PathBuf,
}

impl ProcFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Default for ProcFs {
    fn default() -> Self {
        Self::new("/proc")
    }
}

impl ProcessProbe for ProcFs {
    fn is_alive(&self, pid: u32) -> bool {
        self.root.join(pid.to_string()).exists()
    }
}

/// Held pid file. Dropping it leaves the file in place; call
/// [`PidFile::release`] on orderly shutdown.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
    pid: u32,
}

impl PidFile {
    /// Takes the lock for the current process.
    ///
    /// Fails when the pid file names another live process, or when its
    /// directory cannot be created or the file cannot be written.
    pub fn acquire(path: &Path, probe: &dyn ProcessProbe) -> Result<Self> {
        Self::acquire_as(path, probe, std::process::id())
    }

    pub fn acquire_as(path: &Path, probe: &dyn ProcessProbe, pid: u32) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("unable to create {}", parent.display()))?;
        }

        if let Some(holder) = running_holder(path, probe, pid) {
            bail!(
                "unable to start, there is another gpu_thermald process running (pid {holder})"
            );
        }

        fs::write(path, pid.to_string())
            .with_context(|| format!("Failed to write pid file {}", path.display()))?;
        info!("PID {} written to {}", pid, path.display());

        Ok(Self {
            path: path.to_path_buf(),
            pid,
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Removes the pid file if it still names this process.
    pub fn release(self) {
        match fs::read_to_string(&self.path) {
            Ok(content) if content.trim() == self.pid.to_string() => {
                if let Err(e) = fs::remove_file(&self.path) {
                    warn!("Failed to remove pid file {}: {e}", self.path.display());
                }
            }
            _ => {}
        }
    }
}

/// Pid recorded in `path` if it belongs to a different, live process.
fn running_holder(path: &Path, probe: &dyn ProcessProbe, own_pid: u32) -> Option<u32> {
    let content = fs::read_to_string(path).ok()?;
    let recorded = content.trim();
    if recorded.is_empty() || !recorded.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let pid = recorded.parse::<u32>().ok()?;
    (pid != own_pid && probe.is_alive(pid)).then_some(pid)
}
