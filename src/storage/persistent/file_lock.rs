//! Exclusive lock on a store directory.
//!
//! Two ingestion runs against one store would interleave ledger sequences
//! and each replay the other's log entries on the next open, so opening a
//! store takes a non-blocking exclusive lock on `<store>/.lock` and holds
//! it until the store is dropped.
//!
//! # Behavior
//! - The lock file is created on first use and never deleted
//! - The holder writes its process id into the file after locking, so a
//!   refused open can say who has the store
//! - The OS releases the lock when the file handle closes, including when
//!   the holder crashes

use std::fs::{self, File, OpenOptions};
use std::io::{Error as IoError, ErrorKind, Result as IoResult, Write};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = ".lock";

/// Held for the lifetime of an open store; released when dropped.
#[derive(Debug)]
pub struct FileLock {
    _file: File,
    path: PathBuf,
}

impl FileLock {
    /// Locks the store directory `dir`.
    ///
    /// # Errors
    ///
    /// - `ErrorKind::WouldBlock` if another process holds the lock
    /// - `ErrorKind::PermissionDenied` if the lock file cannot be created
    /// - `ErrorKind::Unsupported` on platforms without advisory locks
    pub fn acquire(dir: &Path) -> IoResult<Self> {
        let path = dir.join(LOCK_FILE);
        // Not truncated on open: until the lock is ours the contents belong
        // to the current holder.
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        Self::try_lock(&file)?;

        file.set_len(0)?;
        write!(file, "{}", std::process::id())?;
        file.flush()?;
        Ok(Self { _file: file, path })
    }

    /// Process id recorded by whoever last locked `dir`, if readable.
    ///
    /// A stale id survives a crash; it only names a live holder when
    /// [`FileLock::acquire`] has just failed with `WouldBlock`.
    #[must_use]
    pub fn holder(dir: &Path) -> Option<u32> {
        fs::read_to_string(dir.join(LOCK_FILE))
            .ok()
            .and_then(|pid| pid.trim().parse().ok())
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[cfg(unix)]
    fn try_lock(file: &File) -> IoResult<()> {
        use std::os::unix::io::AsRawFd;

        // SAFETY: the descriptor is owned by `file` and stays open for the call.
        let result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if result != 0 {
            let err = IoError::last_os_error();
            if err.raw_os_error() == Some(libc::EWOULDBLOCK) {
                return Err(IoError::new(ErrorKind::WouldBlock, "store is locked by another process"));
            }
            return Err(err);
        }
        Ok(())
    }

    /// Locks the first byte. Other processes cannot read the pid while it
    /// is held, so `holder` reports `None` there.
    #[cfg(windows)]
    fn try_lock(file: &File) -> IoResult<()> {
        use std::os::windows::io::AsRawHandle;
        use windows_sys::Win32::Foundation::HANDLE;
        use windows_sys::Win32::Storage::FileSystem::{
            LockFileEx, LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY,
        };

        let handle = file.as_raw_handle() as HANDLE;
        // SAFETY: the handle is owned by `file`; OVERLAPPED is plain data.
        let result = unsafe {
            let mut overlapped = std::mem::zeroed::<windows_sys::Win32::System::IO::OVERLAPPED>();
            LockFileEx(
                handle,
                LOCKFILE_EXCLUSIVE_LOCK | LOCKFILE_FAIL_IMMEDIATELY,
                0,
                1,
                0,
                &mut overlapped,
            )
        };
        if result == 0 {
            return Err(IoError::new(
                ErrorKind::WouldBlock,
                format!("store is locked by another process: {}", IoError::last_os_error()),
            ));
        }
        Ok(())
    }

    #[cfg(not(any(unix, windows)))]
    fn try_lock(_file: &File) -> IoResult<()> {
        Err(IoError::new(ErrorKind::Unsupported, "file locking not supported on this platform"))
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn test_lock_released_on_drop() {
        let dir = tempdir().unwrap();
        {
            let lock = FileLock::acquire(dir.path()).unwrap();
            assert!(lock.path().exists());
        }
        assert!(FileLock::acquire(dir.path()).is_ok());
    }

    #[test]
    fn test_second_acquire_would_block() {
        let dir = tempdir().unwrap();
        let _held = FileLock::acquire(dir.path()).unwrap();

        let err = FileLock::acquire(dir.path()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WouldBlock);
    }

    #[cfg(unix)]
    #[test]
    fn test_holder_pid_survives_refused_acquire() {
        let dir = tempdir().unwrap();
        let _held = FileLock::acquire(dir.path()).unwrap();
        assert_eq!(FileLock::holder(dir.path()), Some(std::process::id()));

        assert!(FileLock::acquire(dir.path()).is_err());
        assert_eq!(FileLock::holder(dir.path()), Some(std::process::id()));
    }

    #[test]
    fn test_no_holder_without_lock_file() {
        let dir = tempdir().unwrap();
        assert_eq!(FileLock::holder(dir.path()), None);
    }
}
