use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use crate::DbPool;

const RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Cross-process mutex stored as a row keyed by `lock_key`.
///
/// Acquiring inserts the row only if it is absent; releasing deletes it only if the stored
/// holder matches, so a process can never release a lock it does not own.
#[derive(Debug)]
pub struct SqlLock {
    pool: DbPool,
    table: String,
    key: String,
    holder: String,
}

impl SqlLock {
    pub fn new(
        pool: DbPool,
        table: impl Into<String>,
        key: impl Into<String>,
        holder: impl Into<String>,
    ) -> Self {
        Self { pool, table: table.into(), key: key.into(), holder: holder.into() }
    }

    pub async fn ensure_table(&self) -> Result<(), sqlx::Error> {
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                lock_key TEXT PRIMARY KEY NOT NULL,
                holder TEXT NOT NULL,
                acquired_at INTEGER NOT NULL
            )",
            self.table
        ))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn try_acquire(&self) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(&format!(
            "INSERT INTO {} (lock_key, holder, acquired_at) VALUES (?, ?, ?)
             ON CONFLICT(lock_key) DO NOTHING",
            self.table
        ))
        .bind(&self.key)
        .bind(&self.holder)
        .bind(chrono::Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Retries [`Self::try_acquire`] until it succeeds or `timeout` elapses.
    /// Returns `false` on timeout.
    pub async fn acquire(&self, timeout: Duration) -> Result<bool, sqlx::Error> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.try_acquire().await? {
                debug!(event_name = "db.lock.acquired", key = %self.key, holder = %self.holder);
                return Ok(true);
            }
            if Instant::now() >= deadline {
                warn!(
                    event_name = "db.lock.timeout",
                    key = %self.key,
                    waited_ms = timeout.as_millis() as u64,
                    "gave up waiting for lock"
                );
                return Ok(false);
            }
            sleep(RETRY_INTERVAL).await;
        }
    }

    pub async fn release(&self) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(&format!(
            "DELETE FROM {} WHERE lock_key = ? AND holder = ?",
            self.table
        ))
        .bind(&self.key)
        .bind(&self.holder)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}
