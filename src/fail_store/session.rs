//! Scoped store access: put, fetch, delete.

use super::HeldLock;
use crate::error::{FailStoreError, Result};
use crate::types::Entry;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::FromRow;
use sqlx::sqlite::SqlitePool;

/// Raw entry row; `value` is the JSON-encoded payload
#[derive(Debug, FromRow)]
struct EntryRow {
    key: String,
    value: String,
}

/// Open handle on a [`FailStore`](super::FailStore)
///
/// Holds the store lock until [`close`](Self::close) is called or the session
/// is dropped. Dropping without closing still releases the lock, which keeps
/// early returns and cancelled futures from leaving the store held.
#[derive(Debug)]
pub struct StoreSession<'a> {
    pool: SqlitePool,
    lock: HeldLock<'a>,
}

impl<'a> StoreSession<'a> {
    pub(super) fn new(lock: HeldLock<'a>, pool: SqlitePool) -> Self {
        Self { pool, lock }
    }

    /// Durably insert or replace the payload stored under `key`
    ///
    /// Replacing keeps the entry's original position in fetch order.
    pub async fn put<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let encoded = serde_json::to_string(value)?;
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO fail_entries (key, value, created_at, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(encoded)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| FailStoreError::QueryFailed(format!("Failed to put entry {}: {}", key, e)))?;

        Ok(())
    }

    /// Up to `n` oldest entries, oldest first
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serialization`](crate::Error::Serialization) if a stored
    /// payload does not decode as `T`.
    pub async fn fetch_top<T: DeserializeOwned>(&self, n: usize) -> Result<Vec<Entry<T>>> {
        if n == 0 {
            return Ok(Vec::new());
        }
        let limit = i64::try_from(n).unwrap_or(i64::MAX);

        let rows: Vec<EntryRow> =
            sqlx::query_as("SELECT key, value FROM fail_entries ORDER BY seq ASC LIMIT ?")
                .bind(limit)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| {
                    FailStoreError::QueryFailed(format!("Failed to fetch entries: {}", e))
                })?;

        rows.into_iter()
            .map(|row| -> Result<Entry<T>> {
                let value = serde_json::from_str(&row.value)?;
                Ok(Entry {
                    key: row.key,
                    value,
                })
            })
            .collect()
    }

    /// Remove the given keys in one transaction; absent keys are ignored
    pub async fn delete(&self, keys: &[String]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for key in keys {
            sqlx::query("DELETE FROM fail_entries WHERE key = ?")
                .bind(key)
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    FailStoreError::QueryFailed(format!("Failed to delete entry {}: {}", key, e))
                })?;
        }
        tx.commit().await?;

        Ok(())
    }

    /// Number of pending entries
    pub async fn count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM fail_entries")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| FailStoreError::QueryFailed(format!("Failed to count entries: {}", e)))?;

        Ok(count.max(0) as u64)
    }

    /// Close the connection and release the store lock
    ///
    /// Closing the pool cannot fail; the returned error is the OS unlock
    /// failure, if any.
    pub async fn close(self) -> Result<()> {
        let Self { pool, lock } = self;
        pool.close().await;
        tracing::trace!("Fail store closed");
        lock.release()
    }
}
