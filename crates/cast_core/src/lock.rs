//! Advisory exclusive vault locking.
//!
//! Each vault has one lock (`.cast/.lock`) held for the duration of any
//! mutating operation. Acquisition retries with a bounded timeout; the lock
//! file records the holder's PID so a leftover file from a crashed process
//! can be recognized. The OS releases a dead holder's advisory lock, so
//! takeover is automatic.

use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use fs4::FileExt;
use tracing::{debug, warn};

use crate::error::{CastError, Result};

/// Default bound on lock acquisition.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// An acquired exclusive vault lock. Released on drop.
#[derive(Debug)]
pub struct VaultLock {
    file: std::fs::File,
    path: PathBuf,
}

impl VaultLock {
    /// Acquire the lock at `path`, retrying until `timeout` elapses.
    pub fn acquire(path: &Path, timeout: Duration) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        if let Some(pid) = stale_holder(path) {
            debug!(path = %path.display(), pid, "reclaiming lock file left by dead process");
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| CastError::FileWrite {
                path: path.to_path_buf(),
                source: e,
            })?;

        let deadline = Instant::now() + timeout;
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => break,
                Err(err) if err.kind() == ErrorKind::WouldBlock => {
                    if Instant::now() >= deadline {
                        warn!(path = %path.display(), "lock acquisition timed out");
                        return Err(CastError::LockTimeout {
                            path: path.to_path_buf(),
                            seconds: timeout.as_secs(),
                        });
                    }
                    std::thread::sleep(RETRY_INTERVAL);
                }
                Err(err) => return Err(CastError::Io(err)),
            }
        }

        let mut lock = Self {
            file,
            path: path.to_path_buf(),
        };
        lock.record_holder();
        Ok(lock)
    }

    /// The lock file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn record_holder(&mut self) {
        use std::io::Seek as _;
        let _ = self.file.set_len(0);
        let _ = self.file.seek(std::io::SeekFrom::Start(0));
        let _ = writeln!(self.file, "{}", std::process::id());
        let _ = self.file.sync_all();
    }
}

impl Drop for VaultLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

/// If the lock file records a PID that no longer exists, return it.
fn stale_holder(path: &Path) -> Option<u32> {
    let content = std::fs::read_to_string(path).ok()?;
    let pid: u32 = content.trim().parse().ok()?;
    if pid == std::process::id() {
        return None;
    }
    (!process_alive(pid)).then_some(pid)
}

#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    Path::new(&format!("/proc/{pid}")).exists()
}

#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    // No cheap portable probe; assume alive and let the advisory lock decide.
    true
}
