//! # PID-file singleton lock.
//!
//! An exclusive advisory lock held for the daemon's lifetime enforces
//! single-instance operation. The file contains the daemon's decimal PID
//! for operators and init scripts; the *lock* (not the content) is the
//! actual mutual exclusion, so a stale file from a crashed daemon never
//! blocks a new one.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::error::RuntimeError;

/// Held exclusive lock on the PID file.
#[derive(Debug)]
pub(crate) struct PidFileLock {
    file: File,
    path: PathBuf,
}

impl PidFileLock {
    /// Opens, locks, and stamps the PID file.
    ///
    /// Fails with [`RuntimeError::PidFileBusy`] when another instance
    /// holds the lock.
    pub fn acquire(path: &Path) -> Result<Self, RuntimeError> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|source| RuntimeError::PidFile {
                path: path.to_path_buf(),
                source,
            })?;

        file.try_lock_exclusive()
            .map_err(|_| RuntimeError::PidFileBusy {
                path: path.to_path_buf(),
            })?;

        file.set_len(0)
            .and_then(|_| writeln!(file, "{}", std::process::id()))
            .and_then(|_| file.flush())
            .map_err(|source| RuntimeError::PidFile {
                path: path.to_path_buf(),
                source,
            })?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Releases the lock and removes the file (best effort).
    pub fn release(self) {
        let _ = fs2::FileExt::unlock(&self.file);
        let _ = std::fs::remove_file(&self.path);
    }
}
