//! Advisory file lock guarding a fail store directory
//!
//! [`FileLock`] wraps an OS-level exclusive lock on a lock file. Each value
//! opens its own file description, so two values on the same path exclude each
//! other whether they live in one process or in two.
//!
//! - **Unix:** `flock(LOCK_EX | LOCK_NB)`
//! - **Windows:** `LockFileEx` with `LOCKFILE_FAIL_IMMEDIATELY`

use crate::error::{FailStoreError, Result};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Non-blocking exclusive lock on a file
#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
    /// Lock file handle while the OS lock is held
    held: Mutex<Option<File>>,
}

impl FileLock {
    /// Create a lock for `path`; the file is created on first acquire
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            held: Mutex::new(None),
        }
    }

    /// Path of the lock file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Try to take the lock without blocking
    ///
    /// Returns `Ok(false)` when the lock is held elsewhere or already held by
    /// this value.
    pub fn try_lock(&self) -> Result<bool> {
        let mut held = self.state();
        if held.is_some() {
            return Ok(false);
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)?;

        if sys::try_lock_exclusive(&file)? {
            *held = Some(file);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Release the lock if this value holds it
    pub fn release(&self) -> Result<()> {
        let Some(file) = self.state().take() else {
            return Ok(());
        };
        sys::unlock(&file)
    }

    /// Whether this value currently holds the lock
    pub fn is_held(&self) -> bool {
        self.state().is_some()
    }

    fn state(&self) -> MutexGuard<'_, Option<File>> {
        // The guarded value is a plain handle; a panic elsewhere cannot leave it half-written.
        self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to release file lock on drop");
        }
    }
}

#[cfg(unix)]
mod sys {
    use super::{FailStoreError, Result};
    use std::fs::File;
    use std::os::unix::io::AsRawFd;

    pub(super) fn try_lock_exclusive(file: &File) -> Result<bool> {
        // SAFETY: the descriptor is owned by `file`, which outlives the call.
        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if rc == 0 {
            return Ok(true);
        }
        let err = std::io::Error::last_os_error();
        match err.raw_os_error() {
            Some(code) if code == libc::EWOULDBLOCK || code == libc::EAGAIN => Ok(false),
            // Interrupted by a signal: report contention so the caller polls again
            Some(libc::EINTR) => Ok(false),
            _ => Err(FailStoreError::Lock(format!("flock failed: {}", err)).into()),
        }
    }

    pub(super) fn unlock(file: &File) -> Result<()> {
        // SAFETY: the descriptor is owned by `file`, which outlives the call.
        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_UN) };
        if rc == 0 {
            Ok(())
        } else {
            let err = std::io::Error::last_os_error();
            Err(FailStoreError::Lock(format!("unlock failed: {}", err)).into())
        }
    }
}

#[cfg(windows)]
mod sys {
    use super::{FailStoreError, Result};
    use std::fs::File;
    use std::os::windows::io::AsRawHandle;
    use winapi::shared::winerror::ERROR_LOCK_VIOLATION;
    use winapi::um::fileapi::{LockFileEx, UnlockFile};
    use winapi::um::minwinbase::{LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY, OVERLAPPED};

    pub(super) fn try_lock_exclusive(file: &File) -> Result<bool> {
        // SAFETY: the handle is owned by `file` and the OVERLAPPED struct is
        // zero-initialised as LockFileEx requires for synchronous handles.
        let ok = unsafe {
            let mut overlapped: OVERLAPPED = std::mem::zeroed();
            LockFileEx(
                file.as_raw_handle() as _,
                LOCKFILE_EXCLUSIVE_LOCK | LOCKFILE_FAIL_IMMEDIATELY,
                0,
                u32::MAX,
                u32::MAX,
                &mut overlapped,
            )
        };
        if ok != 0 {
            return Ok(true);
        }
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(ERROR_LOCK_VIOLATION as i32) {
            Ok(false)
        } else {
            Err(FailStoreError::Lock(format!("LockFileEx failed: {}", err)).into())
        }
    }

    pub(super) fn unlock(file: &File) -> Result<()> {
        // SAFETY: the handle is owned by `file`; the range matches the one locked.
        let ok = unsafe { UnlockFile(file.as_raw_handle() as _, 0, 0, u32::MAX, u32::MAX) };
        if ok != 0 {
            Ok(())
        } else {
            let err = std::io::Error::last_os_error();
            Err(FailStoreError::Lock(format!("UnlockFile failed: {}", err)).into())
        }
    }
}
