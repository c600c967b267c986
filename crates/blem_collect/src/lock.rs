//! Single-instance guard per PV namespace
//!
//! Two services writing the same namespace would interleave their table
//! writes. Startup takes an exclusive lock file holding the owner PID; a
//! lock left behind by a dead process is replaced.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum LockError {
    #[error("Another instance (pid {pid}) already publishes this namespace; lock {path}")]
    AlreadyRunning { pid: u32, path: PathBuf },

    #[error("Lock file error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Held for the life of the service; the lock file is removed on drop
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    /// Lock file path for a namespace
    pub fn lock_path(lock_dir: &Path, namespace: &str) -> PathBuf {
        lock_dir.join(format!("{}.lock", namespace.replace(':', "_")))
    }

    /// Take the lock for `namespace`.
    ///
    /// # Errors
    ///
    /// [`LockError::AlreadyRunning`] when a live process holds it,
    /// [`LockError::Io`] when the lock file cannot be created.
    pub fn acquire(lock_dir: &Path, namespace: &str) -> Result<Self, LockError> {
        let io_err = |source| LockError::Io {
            path: lock_dir.to_path_buf(),
            source,
        };
        fs::create_dir_all(lock_dir).map_err(io_err)?;

        let path = Self::lock_path(lock_dir, namespace);
        match Self::create(&path) {
            Ok(lock) => Ok(lock),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                match read_pid(&path) {
                    Some(pid) if pid_alive(pid) => Err(LockError::AlreadyRunning { pid, path }),
                    stale => {
                        warn!(path = %path.display(), pid = ?stale, "Replacing stale lock");
                        fs::remove_file(&path).map_err(|source| LockError::Io {
                            path: path.clone(),
                            source,
                        })?;
                        Self::create(&path).map_err(|source| match source.kind() {
                            // Lost a race with another starting instance
                            io::ErrorKind::AlreadyExists => LockError::AlreadyRunning {
                                pid: read_pid(&path).unwrap_or(0),
                                path: path.clone(),
                            },
                            _ => LockError::Io {
                                path: path.clone(),
                                source,
                            },
                        })
                    }
                }
            }
            Err(source) => Err(LockError::Io { path, source }),
        }
    }

    fn create(path: &Path) -> io::Result<Self> {
        let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
        writeln!(file, "{}", std::process::id())?;
        info!(path = %path.display(), "Run lock acquired");
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Run lock released"),
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to remove run lock"),
        }
    }
}

fn read_pid(path: &Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

#[cfg(target_os = "linux")]
fn pid_alive(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}

/// Without a process table to consult, any recorded PID counts as alive
#[cfg(not(target_os = "linux"))]
fn pid_alive(_pid: u32) -> bool {
    true
}
