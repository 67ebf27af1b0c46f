//! Advisory filesystem locks
//!
//! Independent worker processes serialize on the same key through a lock
//! file created with `create_new`. Acquisition polls; the search and model
//! locks wait unconditionally so that duplicate requests queue up instead
//! of redoing work. The lock file is removed when the guard drops.

use crate::error::{PipelineError, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Held lock on a path; released on drop.
#[derive(Debug)]
pub struct PathLock {
    path: PathBuf,
}

impl PathLock {
    /// Acquire the lock, waiting as long as it takes.
    pub async fn acquire(path: impl AsRef<Path>) -> Result<PathLock> {
        let path = path.as_ref().to_path_buf();
        loop {
            match Self::try_acquire(&path)? {
                Some(lock) => return Ok(lock),
                None => tokio::time::sleep(POLL_INTERVAL).await,
            }
        }
    }

    /// Acquire the lock, giving up after `timeout`.
    pub async fn acquire_timeout(
        path: impl AsRef<Path>,
        timeout: Duration,
    ) -> Result<Option<PathLock>> {
        let path = path.as_ref().to_path_buf();
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(lock) = Self::try_acquire(&path)? {
                return Ok(Some(lock));
            }
            if tokio::time::Instant::now() >= deadline {
                debug!(path = %path.display(), "lock acquisition timed out");
                return Ok(None);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    fn try_acquire(path: &Path) -> Result<Option<PathLock>> {
        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
        {
            Ok(_) => Ok(Some(PathLock {
                path: path.to_path_buf(),
            })),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(PipelineError::Init(
                format!("lock directory does not exist: {}", path.display()),
            )),
            Err(e) => Err(e.into()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PathLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}
