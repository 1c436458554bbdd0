use std::collections::BTreeSet;
use std::time::Duration;

use sqlx::Row;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use wabridge_core::ids::new_id;

use super::ddl::{DdlError, Dialect, RenderContext};
use super::lock::SqlLock;
use super::{Migration, MIGRATION_LOCK_KEY};
use crate::DbPool;

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("database error during migration: {0}")]
    Database(#[from] sqlx::Error),
    #[error("could not render migration: {0}")]
    Render(#[from] DdlError),
    #[error("timed out after {waited:?} waiting for migration lock `{key}`")]
    LockTimeout { key: String, waited: Duration },
    #[error("migration {label} failed: {source}")]
    Apply { label: String, source: sqlx::Error },
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub applied: Vec<u32>,
    pub removed_orphans: Vec<i64>,
    pub already_applied: usize,
}

/// Applies migrations to the SQLite store, recording each in `{prefix}schema_migrations`.
pub struct MigrationRunner {
    pool: DbPool,
    table_prefix: String,
    lock_timeout: Duration,
}

impl MigrationRunner {
    pub fn new(pool: DbPool, table_prefix: impl Into<String>) -> Self {
        Self { pool, table_prefix: table_prefix.into(), lock_timeout: DEFAULT_LOCK_TIMEOUT }
    }

    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    pub fn tracking_table(&self) -> String {
        format!("{}schema_migrations", self.table_prefix)
    }

    pub fn lock_table(&self) -> String {
        format!("{}migration_lock", self.table_prefix)
    }

    pub async fn run(&self, migrations: &[Migration]) -> Result<MigrationReport, MigrationError> {
        self.ensure_tracking_table().await?;

        let lock =
            SqlLock::new(self.pool.clone(), self.lock_table(), MIGRATION_LOCK_KEY, new_id());
        lock.ensure_table().await?;
        if !lock.acquire(self.lock_timeout).await? {
            return Err(MigrationError::LockTimeout {
                key: lock.key().to_owned(),
                waited: self.lock_timeout,
            });
        }

        let result = self.apply_locked(migrations).await;

        match lock.release().await {
            Ok(true) => debug!(event_name = "db.migrations.lock_released"),
            Ok(false) => warn!(
                event_name = "db.migrations.lock_missing",
                "migration lock was no longer held at release"
            ),
            Err(release_error) => error!(
                event_name = "db.migrations.lock_release_failed",
                error = %release_error,
                "failed to release migration lock"
            ),
        }

        result
    }

    pub async fn applied_versions(&self) -> Result<Vec<i64>, MigrationError> {
        self.ensure_tracking_table().await?;
        let rows = sqlx::query(&format!(
            "SELECT version FROM {} ORDER BY version",
            self.tracking_table()
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| row.try_get::<i64, _>("version").map_err(MigrationError::from))
            .collect()
    }

    async fn ensure_tracking_table(&self) -> Result<(), MigrationError> {
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                version INTEGER PRIMARY KEY NOT NULL,
                name TEXT NOT NULL,
                applied_at INTEGER NOT NULL
            )",
            self.tracking_table()
        ))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn apply_locked(
        &self,
        migrations: &[Migration],
    ) -> Result<MigrationReport, MigrationError> {
        let mut report = MigrationReport::default();
        let defined: BTreeSet<i64> =
            migrations.iter().map(|migration| i64::from(migration.version)).collect();
        let applied = self.applied_versions().await?;

        let orphans: Vec<i64> =
            applied.iter().copied().filter(|version| !defined.contains(version)).collect();
        if !orphans.is_empty() {
            warn!(
                event_name = "db.migrations.orphans",
                orphaned = ?orphans,
                "found orphaned migrations, cleaning up"
            );
            for version in &orphans {
                sqlx::query(&format!("DELETE FROM {} WHERE version = ?", self.tracking_table()))
                    .bind(version)
                    .execute(&self.pool)
                    .await?;
            }
        }
        report.removed_orphans = orphans;

        let applied: BTreeSet<i64> = applied.into_iter().filter(|v| defined.contains(v)).collect();
        report.already_applied = applied.len();

        let mut pending: Vec<&Migration> = migrations
            .iter()
            .filter(|migration| !applied.contains(&i64::from(migration.version)))
            .collect();
        pending.sort_by_key(|migration| migration.version);

        debug!(
            event_name = "db.migrations.pending",
            current_version = report.already_applied,
            pending = pending.len(),
            "applying remaining migrations"
        );

        let ctx = RenderContext::new(Dialect::Sqlite, self.table_prefix.clone());
        for migration in pending {
            self.apply_one(&ctx, migration).await?;
            info!(
                event_name = "db.migrations.applied",
                version = migration.version,
                name = migration.name,
                "applied migration"
            );
            report.applied.push(migration.version);
        }

        Ok(report)
    }

    async fn apply_one(
        &self,
        ctx: &RenderContext,
        migration: &Migration,
    ) -> Result<(), MigrationError> {
        let statements = migration.render(ctx)?;
        let label = migration.label();
        let apply_error =
            |source: sqlx::Error| MigrationError::Apply { label: label.clone(), source };

        let mut tx = self.pool.begin().await?;
        for statement in &statements {
            if let Some(guard) = &statement.guard {
                let count: i64 = sqlx::query_scalar(&guard.check)
                    .fetch_one(&mut *tx)
                    .await
                    .map_err(apply_error)?;
                if !guard.should_apply(count) {
                    debug!(
                        event_name = "db.migrations.step_skipped",
                        migration = %label,
                        sql = %statement.sql
                    );
                    continue;
                }
            }
            sqlx::query(&statement.sql).execute(&mut *tx).await.map_err(apply_error)?;
        }

        sqlx::query(&format!(
            "INSERT INTO {} (version, name, applied_at) VALUES (?, ?, ?)",
            self.tracking_table()
        ))
        .bind(i64::from(migration.version))
        .bind(migration.name)
        .bind(chrono::Utc::now().timestamp_millis())
        .execute(&mut *tx)
        .await
        .map_err(apply_error)?;

        tx.commit().await.map_err(apply_error)?;
        Ok(())
    }
}
