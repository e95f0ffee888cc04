//! Exclusive lock on a worktree cache entry
//!
//! Advisory `flock` on `<cache>/.lock`, polled until a timeout. Concurrent
//! processes syncing the same repository serialize on it. The lock is
//! released when the handle is dropped.

use crate::error::{StagehandError, StagehandResult};
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const LOCK_FILENAME: &str = ".lock";
const POLL_INTERVAL: Duration = Duration::from_millis(50);
const CONTENTION_WARNING_AFTER: Duration = Duration::from_millis(500);

/// Held lock on a worktree cache directory
#[derive(Debug)]
pub struct WorktreeLock {
    path: PathBuf,
    file: File,
}

impl WorktreeLock {
    /// Acquire the lock, creating the cache directory if needed.
    ///
    /// Blocks the calling thread; async callers use [`WorktreeLock::acquire_async`].
    pub fn acquire(cache_dir: &Path, timeout: Duration) -> StagehandResult<Self> {
        fs::create_dir_all(cache_dir)
            .map_err(|e| StagehandError::io(format!("creating {}", cache_dir.display()), e))?;

        let path = cache_dir.join(LOCK_FILENAME);
        let start = Instant::now();
        let mut warned = false;

        loop {
            match try_lock(&path) {
                Ok(file) => {
                    if warned {
                        debug!(
                            "Worktree lock acquired after {:.1}s: {}",
                            start.elapsed().as_secs_f64(),
                            path.display()
                        );
                    }
                    return Ok(Self { path, file });
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if !warned && start.elapsed() > CONTENTION_WARNING_AFTER {
                        warn!("Waiting for worktree lock {}", path.display());
                        warned = true;
                    }
                }
                Err(e) => {
                    return Err(StagehandError::io(format!("locking {}", path.display()), e))
                }
            }

            if start.elapsed() >= timeout {
                return Err(StagehandError::LockTimeout { path, timeout });
            }

            std::thread::sleep(POLL_INTERVAL);
        }
    }

    /// Acquire the lock on the blocking thread pool
    pub async fn acquire_async(cache_dir: &Path, timeout: Duration) -> StagehandResult<Self> {
        let cache_dir = cache_dir.to_path_buf();
        tokio::task::spawn_blocking(move || Self::acquire(&cache_dir, timeout))
            .await
            .map_err(|e| StagehandError::Internal(format!("worktree lock task failed: {}", e)))?
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(unix)]
fn try_lock(path: &Path) -> io::Result<File> {
    use std::os::unix::io::AsRawFd;

    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?;

    // SAFETY: the descriptor is owned by `file` and stays open for the call
    let result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if result == 0 {
        return Ok(file);
    }

    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::EWOULDBLOCK) {
        Err(io::Error::new(io::ErrorKind::WouldBlock, "lock held"))
    } else {
        Err(err)
    }
}

#[cfg(not(unix))]
fn try_lock(path: &Path) -> io::Result<File> {
    match OpenOptions::new().write(true).create_new(true).open(path) {
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            Err(io::Error::new(io::ErrorKind::WouldBlock, "lock held"))
        }
        other => other,
    }
}

impl Drop for WorktreeLock {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            // SAFETY: the descriptor is still owned by `self.file`
            unsafe {
                libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
            }
        }
        #[cfg(not(unix))]
        {
            let _ = fs::remove_file(&self.path);
        }
    }
}
