//! Single-instance guard.
//!
//! A lock file holding the owner's PID is created when a long-running command
//! starts and removed when the [`InstanceLock`] is dropped. A lock file left behind
//! by a process that no longer exists is treated as stale and taken over.
//!
//! The owner creates the file before writing its PID, so a file without a PID
//! may belong to a process that is still starting up. Such a file is only
//! considered stale once it is older than [`FRESH_LOCK`].

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, SystemTime};
use sysinfo::{Pid, ProcessesToUpdate, System};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Name of the lock file.
pub const LOCK_FILE_NAME: &str = "smartsort.lock";

/// Age below which a lock file without a PID is assumed to be mid-creation.
pub const FRESH_LOCK: Duration = Duration::from_secs(2);

/// How long to wait for a starting owner to write its PID.
const PID_WAIT: Duration = Duration::from_millis(200);

#[derive(Debug, Error)]
pub enum LockError {
    /// Another live process holds the lock.
    #[error("smartsort is already running (pid {pid})")]
    AlreadyRunning { pid: u32 },
    /// Another process is creating the lock right now.
    #[error("Lock file {} is being created by another process", path.display())]
    Busy { path: PathBuf },
    #[error("Failed to create lock file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Held for as long as this process is the running instance.
#[derive(Debug)]
pub struct InstanceLock {
    path: PathBuf,
}

impl InstanceLock {
    /// Default lock location in the system temp directory.
    pub fn default_path() -> PathBuf {
        std::env::temp_dir().join(LOCK_FILE_NAME)
    }

    /// Acquires the lock at `path`, failing fast if a live process holds it.
    pub fn acquire(path: &Path) -> Result<Self, LockError> {
        let io_err = |source| LockError::Io {
            path: path.to_path_buf(),
            source,
        };

        // Second attempt only after a stale lock was removed.
        for _ in 0..2 {
            match OpenOptions::new().write(true).create_new(true).open(path) {
                Ok(mut file) => {
                    write!(file, "{}", std::process::id()).map_err(io_err)?;
                    info!("Acquired instance lock {}", path.display());
                    return Ok(Self {
                        path: path.to_path_buf(),
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    match wait_for_pid(path) {
                        Some(pid) if pid != std::process::id() && is_process_alive(pid) => {
                            return Err(LockError::AlreadyRunning { pid });
                        }
                        None if is_fresh(path) => {
                            return Err(LockError::Busy {
                                path: path.to_path_buf(),
                            });
                        }
                        _ => {}
                    }
                    warn!("Removing stale lock file {}", path.display());
                    match fs::remove_file(path) {
                        Ok(()) => {}
                        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                        Err(e) => return Err(io_err(e)),
                    }
                }
                Err(e) => return Err(io_err(e)),
            }
        }

        // Lost a race with another process that grabbed the lock in between.
        match read_pid(path) {
            Some(pid) => Err(LockError::AlreadyRunning { pid }),
            None => Err(LockError::Busy {
                path: path.to_path_buf(),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Releases the lock. Same as dropping it.
    pub fn release(self) {}
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        // Only remove the file if it is still ours.
        if read_pid(&self.path) == Some(std::process::id()) {
            if let Err(e) = fs::remove_file(&self.path) {
                warn!("Failed to remove lock file {}: {}", self.path.display(), e);
            } else {
                debug!("Released instance lock {}", self.path.display());
            }
        }
    }
}

fn read_pid(path: &Path) -> Option<u32> {
    fs::read_to_string(path)
        .ok()
        .and_then(|s| s.trim().parse().ok())
}

/// Reads the PID, giving a freshly created file a moment to receive it.
fn wait_for_pid(path: &Path) -> Option<u32> {
    let step = Duration::from_millis(10);
    let mut waited = Duration::ZERO;
    loop {
        let pid = read_pid(path);
        if pid.is_some() || waited >= PID_WAIT || !is_fresh(path) {
            return pid;
        }
        thread::sleep(step);
        waited += step;
    }
}

/// True if the file at `path` was modified within [`FRESH_LOCK`].
fn is_fresh(path: &Path) -> bool {
    fs::metadata(path)
        .and_then(|meta| meta.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .is_some_and(|age| age < FRESH_LOCK)
}

fn is_process_alive(pid: u32) -> bool {
    let pid = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]));
    system.process(pid).is_some()
}
