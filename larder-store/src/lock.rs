//! Exclusive ownership of a store directory.

use crate::error::{StoreError, StoreResult};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";

/// Advisory lock on a store directory, released on drop.
#[derive(Debug)]
pub(crate) struct DirectoryLock {
    file: File,
    path: PathBuf,
}

impl DirectoryLock {
    /// Try to take the lock without blocking.
    pub fn try_acquire(directory: &Path) -> StoreResult<Self> {
        let path = directory.join(LOCK_FILE);
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| StoreError::io(&path, e))?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                file.set_len(0).map_err(|e| StoreError::io(&path, e))?;
                writeln!(file, "{}", std::process::id()).map_err(|e| StoreError::io(&path, e))?;
                Ok(Self { file, path })
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock || is_contended(&e) => {
                Err(StoreError::Locked(directory.to_path_buf()))
            }
            Err(e) => Err(StoreError::io(&path, e)),
        }
    }
}

fn is_contended(err: &io::Error) -> bool {
    err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

impl Drop for DirectoryLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
        tracing::trace!(path = %self.path.display(), "Released store directory lock");
    }
}
