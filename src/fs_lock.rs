//! Filesystem-based locking for cross-process coordination
//!
//! A service holds an exclusive flock() on `<store>/.lock` from initialize to dispose, so
//! two processes (or two services in one process) never open the same shard directories.

use crate::error::StoreError;
use anyhow::{Context, Result};
use fs2::FileExt;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

pub const LOCK_FILE: &str = ".lock";

/// Guard that holds an exclusive filesystem lock on a store directory
///
/// The lock is released when this guard is dropped. If the process crashes, the OS
/// releases the flock.
pub struct StoreLock {
    _file: File,
    path: PathBuf,
}

impl StoreLock {
    /// Try to acquire the lock, non-blocking
    ///
    /// Returns:
    /// - `Ok(Some(guard))` if the lock was acquired
    /// - `Ok(None)` if another holder has it
    /// - `Err(...)` on IO errors
    pub fn try_acquire(store_dir: &Path) -> Result<Option<Self>> {
        let lock_path = store_dir.join(LOCK_FILE);

        tracing::debug!("Attempting to acquire store lock {:?}", lock_path);

        fs::create_dir_all(store_dir).context("Failed to create store directory")?;
        let file = File::create(&lock_path).context("Failed to create lock file")?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                tracing::debug!("Acquired store lock {:?}", lock_path);
                Ok(Some(Self {
                    _file: file,
                    path: lock_path,
                }))
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                tracing::debug!("Store lock {:?} is held elsewhere", lock_path);
                Ok(None)
            }
            Err(e) => Err(e).context("Failed to acquire store lock"),
        }
    }

    /// Acquire the lock or fail with [`StoreError::Locked`]
    pub fn acquire(store_dir: &Path) -> Result<Self> {
        Self::try_acquire(store_dir)?
            .ok_or_else(|| StoreError::Locked(store_dir.display().to_string()).into())
    }

    /// Acquire the lock, polling until `timeout` expires
    pub fn acquire_blocking(store_dir: &Path, timeout: Duration) -> Result<Option<Self>> {
        let start = Instant::now();
        let sleep_interval = Duration::from_millis(100);

        tracing::info!(
            "Waiting for store lock on {} (timeout: {:?})",
            store_dir.display(),
            timeout
        );

        loop {
            if let Some(guard) = Self::try_acquire(store_dir)? {
                tracing::info!("Acquired store lock after {:?}", start.elapsed());
                return Ok(Some(guard));
            }
            if start.elapsed() >= timeout {
                tracing::warn!(
                    "Timeout waiting for store lock on {} after {:?}",
                    store_dir.display(),
                    timeout
                );
                return Ok(None);
            }
            std::thread::sleep(sleep_interval);
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        // The file is kept for reuse; closing it releases the flock
        tracing::debug!("Releasing store lock {:?}", self.path);
    }
}
