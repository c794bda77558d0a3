//! Fail store schema migrations.

use crate::error::{FailStoreError, Result};
use sqlx::SqliteConnection;
use sqlx::sqlite::SqlitePool;

/// Bring the schema up to date; safe to call on every open
pub(super) async fn run(pool: &SqlitePool) -> Result<()> {
    let mut conn = pool.acquire().await.map_err(|e| {
        FailStoreError::ConnectionFailed(format!("Failed to acquire connection: {}", e))
    })?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(&mut *conn)
    .await
    .map_err(|e| {
        FailStoreError::MigrationFailed(format!(
            "Failed to create schema_version table: {}",
            e
        ))
    })?;

    let current_version: Option<i64> =
        sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
            .fetch_one(&mut *conn)
            .await
            .map_err(|e| {
                FailStoreError::QueryFailed(format!("Failed to query schema version: {}", e))
            })?;

    if current_version.unwrap_or(0) < 1 {
        migrate_v1(&mut conn).await?;
    }

    Ok(())
}

/// Migration v1: entries table
///
/// `seq` is the queue position. Upserts keep the original row, so a key that
/// is re-put stays where it was first queued.
async fn migrate_v1(conn: &mut SqliteConnection) -> Result<()> {
    tracing::info!("Applying fail store migration v1");

    sqlx::query("BEGIN")
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            FailStoreError::MigrationFailed(format!("Failed to begin transaction: {}", e))
        })?;

    let result = async {
        sqlx::query(
            r#"
            CREATE TABLE fail_entries (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                key TEXT NOT NULL UNIQUE,
                value TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            FailStoreError::MigrationFailed(format!("Failed to create fail_entries table: {}", e))
        })?;

        sqlx::query("INSERT INTO schema_version (version, applied_at) VALUES (1, ?)")
            .bind(chrono::Utc::now().timestamp())
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                FailStoreError::MigrationFailed(format!("Failed to record migration v1: {}", e))
            })?;

        Ok::<(), crate::Error>(())
    }
    .await;

    match result {
        Ok(()) => {
            sqlx::query("COMMIT")
                .execute(&mut *conn)
                .await
                .map_err(|e| {
                    FailStoreError::MigrationFailed(format!(
                        "Failed to commit migration v1: {}",
                        e
                    ))
                })?;
        }
        Err(e) => {
            let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
            return Err(e);
        }
    }

    tracing::info!("Fail store migration v1 complete");
    Ok(())
}
