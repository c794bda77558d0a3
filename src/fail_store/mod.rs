//! Durable fail store
//!
//! Payloads that could not be delivered are written here and drained later by
//! the retry scheduler. The store is a single-table SQLite database guarded by
//! an advisory [`FileLock`], so only one holder (thread or OS process) has it
//! open at a time.
//!
//! ## Submodules
//!
//! - [`migrations`]: schema setup, run on every open
//! - [`session`]: [`StoreSession`], the scoped handle all reads and writes go through
//!
//! Every access follows the same shape: [`FailStore::open`] acquires the lock
//! and connects, the returned session does the work, and [`StoreSession::close`]
//! (or dropping the session) releases the lock again.

use crate::config::FailStoreConfig;
use crate::error::{FailStoreError, Result};
use crate::file_lock::FileLock;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{LazyLock, Mutex, PoisonError};
use std::time::Instant;

mod migrations;
mod session;

pub use session::StoreSession;

/// Name of the lock file inside the store directory
pub const LOCK_FILE_NAME: &str = "__db.lock";

/// Name of the SQLite database inside the store directory
pub const DB_FILE_NAME: &str = "failstore.db";

/// Store directories owned by a live [`FailStore`] in this process
static OWNED_PATHS: LazyLock<Mutex<HashSet<PathBuf>>> =
    LazyLock::new(|| Mutex::new(HashSet::new()));

/// Crash-durable, process-exclusive key/value log
///
/// A store is bound to one directory for its whole life, and at most one live
/// `FailStore` per directory may exist in a process.
#[derive(Debug)]
pub struct FailStore {
    path: PathBuf,
    /// Registry key, the absolute form of `path`
    owned_path: PathBuf,
    lock: FileLock,
    config: FailStoreConfig,
}

impl FailStore {
    /// Bind a store to `path`
    ///
    /// Nothing is created on disk until the first [`open`](Self::open).
    ///
    /// # Errors
    ///
    /// Returns [`FailStoreError::PathInUse`] if another `FailStore` in this
    /// process already owns the directory.
    pub fn new(path: impl Into<PathBuf>, config: FailStoreConfig) -> Result<Self> {
        let path = path.into();
        let owned_path = std::path::absolute(&path)?;

        let mut owned = OWNED_PATHS.lock().unwrap_or_else(PoisonError::into_inner);
        if !owned.insert(owned_path.clone()) {
            return Err(FailStoreError::PathInUse(path).into());
        }
        drop(owned);

        let lock = FileLock::new(path.join(LOCK_FILE_NAME));
        Ok(Self {
            path,
            owned_path,
            lock,
            config,
        })
    }

    /// Store directory
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the SQLite database file
    pub fn db_path(&self) -> PathBuf {
        self.path.join(DB_FILE_NAME)
    }

    /// Acquire exclusive access and connect
    ///
    /// Waits up to `lock_timeout` for the store lock, polling every
    /// `lock_poll_interval`.
    ///
    /// # Errors
    ///
    /// - [`FailStoreError::LockTimeout`] if the lock stays held elsewhere
    /// - [`FailStoreError::ConnectionFailed`] / [`FailStoreError::MigrationFailed`]
    ///   if the database cannot be opened; the lock is released before returning
    pub async fn open(&self) -> Result<StoreSession<'_>> {
        tokio::fs::create_dir_all(&self.path).await.map_err(|e| {
            FailStoreError::ConnectionFailed(format!(
                "Failed to create fail store directory {}: {}",
                self.path.display(),
                e
            ))
        })?;

        let lock = self.acquire_lock().await?;
        let pool = self.connect().await?;

        tracing::trace!(path = %self.path.display(), "Fail store opened");
        Ok(StoreSession::new(lock, pool))
    }

    /// Remove all stored data
    ///
    /// Takes the store lock first, so this fails with
    /// [`FailStoreError::LockTimeout`] while a session is open anywhere. The
    /// directory and lock file are left in place for later holders.
    pub async fn destroy(&self) -> Result<()> {
        let lock = self.acquire_lock().await?;

        let db = self.db_path();
        let mut db_files = vec![db.clone()];
        for suffix in ["-wal", "-shm"] {
            let mut name = db.clone().into_os_string();
            name.push(suffix);
            db_files.push(PathBuf::from(name));
        }

        for file in db_files {
            match tokio::fs::remove_file(&file).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        tracing::info!(path = %self.path.display(), "Fail store destroyed");
        lock.release()
    }

    async fn acquire_lock(&self) -> Result<HeldLock<'_>> {
        let started = Instant::now();
        loop {
            if self.lock.try_lock()? {
                return Ok(HeldLock::new(&self.lock));
            }

            let waited = started.elapsed();
            if waited >= self.config.lock_timeout {
                return Err(FailStoreError::LockTimeout {
                    path: self.lock.path().to_path_buf(),
                    waited,
                }
                .into());
            }
            tokio::time::sleep(self.config.lock_poll_interval).await;
        }
    }

    async fn connect(&self) -> Result<SqlitePool> {
        let options = SqliteConnectOptions::new()
            .filename(self.db_path())
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(self.config.lock_timeout);

        // One connection: a session is a single serial writer
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| {
                FailStoreError::ConnectionFailed(format!(
                    "Failed to connect to fail store database: {}",
                    e
                ))
            })?;

        if let Err(e) = migrations::run(&pool).await {
            pool.close().await;
            return Err(e);
        }

        Ok(pool)
    }
}

impl Drop for FailStore {
    fn drop(&mut self) {
        OWNED_PATHS
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.owned_path);
    }
}

/// Store lock held for the lifetime of a session; released on drop
#[derive(Debug)]
pub(crate) struct HeldLock<'a> {
    lock: &'a FileLock,
    released: bool,
}

impl<'a> HeldLock<'a> {
    fn new(lock: &'a FileLock) -> Self {
        Self {
            lock,
            released: false,
        }
    }

    /// Release now and report OS errors instead of logging them
    pub(crate) fn release(mut self) -> Result<()> {
        self.released = true;
        self.lock.release()
    }
}

impl Drop for HeldLock<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.lock.release() {
            tracing::warn!(
                path = %self.lock.path().display(),
                error = %e,
                "Failed to release fail store lock"
            );
        }
    }
}
