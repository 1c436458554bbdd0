use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use wabridge_core::domain::session::{now_millis, Session, SessionId};

use super::{session_not_found, RepositoryError, SessionRepository, TableNames};
use crate::DbPool;

pub struct SqlSessionRepository {
    pool: DbPool,
    table: String,
}

impl SqlSessionRepository {
    pub fn new(pool: DbPool, tables: &TableNames) -> Self {
        Self { pool, table: tables.session.clone() }
    }

    async fn find(&self, id: &str) -> Result<Option<Session>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT id, user_id, create_at, closed_at FROM {} WHERE id = ?",
            self.table
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_session(r)?)),
            None => Ok(None),
        }
    }
}

fn millis_to_datetime(column: &str, millis: i64) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| RepositoryError::Decode(format!("{column} out of range: {millis}")))
}

fn row_to_session(row: &SqliteRow) -> Result<Session, RepositoryError> {
    let id: String = row.try_get("id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let user_id: String =
        row.try_get("user_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let create_at: i64 =
        row.try_get("create_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let closed_at: Option<i64> =
        row.try_get("closed_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    Ok(Session {
        id: SessionId(id),
        user_id,
        created_at: millis_to_datetime("create_at", create_at)?,
        closed_at: closed_at.map(|millis| millis_to_datetime("closed_at", millis)).transpose()?,
    })
}

#[async_trait::async_trait]
impl SessionRepository for SqlSessionRepository {
    async fn get(&self, id: &SessionId) -> Result<Session, RepositoryError> {
        self.find(&id.0).await?.ok_or_else(|| session_not_found(&id.0))
    }

    async fn create(&self, user_id: &str) -> Result<Session, RepositoryError> {
        let session = Session::open(user_id)?;

        sqlx::query(&format!(
            "INSERT INTO {} (id, user_id, create_at, closed_at) VALUES (?, ?, ?, NULL)",
            self.table
        ))
        .bind(&session.id.0)
        .bind(&session.user_id)
        .bind(session.created_at.timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(session)
    }

    async fn close(&self, id: &SessionId) -> Result<Session, RepositoryError> {
        let closed_at = now_millis();
        let result = sqlx::query(&format!(
            "UPDATE {} SET closed_at = ? WHERE id = ? AND closed_at IS NULL",
            self.table
        ))
        .bind(closed_at.timestamp_millis())
        .bind(&id.0)
        .execute(&self.pool)
        .await?;

        let session = self.find(&id.0).await?.ok_or_else(|| session_not_found(&id.0))?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::AlreadyClosed(id.0.clone()));
        }
        Ok(session)
    }

    async fn get_by_user(&self, user_id: &str) -> Result<Session, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT id, user_id, create_at, closed_at FROM {}
             WHERE user_id = ? AND closed_at IS NULL
             ORDER BY create_at DESC, id DESC
             LIMIT 1",
            self.table
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => row_to_session(r),
            None => Err(RepositoryError::NotFound {
                entity: "open session for user",
                id: user_id.to_owned(),
            }),
        }
    }

    async fn list_unclosed(&self) -> Result<Vec<Session>, RepositoryError> {
        let rows: Vec<SqliteRow> = sqlx::query(&format!(
            "SELECT id, user_id, create_at, closed_at FROM {}
             WHERE closed_at IS NULL
             ORDER BY create_at ASC, id ASC",
            self.table
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_session).collect::<Result<Vec<_>, _>>()
    }

    async fn update(&self, session: &Session) -> Result<(), RepositoryError> {
        session.validate()?;

        let result = sqlx::query(&format!(
            "UPDATE {} SET user_id = ?, create_at = ?, closed_at = ? WHERE id = ?",
            self.table
        ))
        .bind(&session.user_id)
        .bind(session.created_at.timestamp_millis())
        .bind(session.closed_at.map(|closed_at| closed_at.timestamp_millis()))
        .bind(&session.id.0)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(session_not_found(&session.id.0));
        }
        Ok(())
    }

    async fn close_all_for_user(
        &self,
        user_id: &str,
        closed_at: DateTime<Utc>,
    ) -> Result<u64, RepositoryError> {
        let result = sqlx::query(&format!(
            "UPDATE {} SET closed_at = ? WHERE user_id = ? AND closed_at IS NULL",
            self.table
        ))
        .bind(closed_at.timestamp_millis())
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn list_active_user_ids(&self) -> Result<Vec<String>, RepositoryError> {
        let rows: Vec<SqliteRow> = sqlx::query(&format!(
            "SELECT DISTINCT user_id FROM {} WHERE closed_at IS NULL ORDER BY user_id",
            self.table
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                row.try_get::<String, _>("user_id")
                    .map_err(|e| RepositoryError::Decode(e.to_string()))
            })
            .collect()
    }

    async fn delete(&self, id: &SessionId) -> Result<(), RepositoryError> {
        let result = sqlx::query(&format!("DELETE FROM {} WHERE id = ?", self.table))
            .bind(&id.0)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(session_not_found(&id.0));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use chrono::Utc;

    use wabridge_core::domain::session::{now_millis, SessionId};

    use super::SqlSessionRepository;
    use crate::repositories::{RepositoryError, SessionRepository, TableNames};
    use crate::{connect_with_settings, migrations, DbPool};

    async fn setup() -> (DbPool, SqlSessionRepository) {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool, "demo_plugin_").await.expect("migrations");
        let repo =
            SqlSessionRepository::new(pool.clone(), &TableNames::with_prefix("demo_plugin_"));
        (pool, repo)
    }

    #[tokio::test]
    async fn create_then_get_returns_the_same_session() {
        let (_pool, repo) = setup().await;
        let before = Utc::now().timestamp_millis();

        let created = repo.create("U1").await.expect("create");
        assert_eq!(created.id.as_str().len(), 26);
        assert!(created.created_at.timestamp_millis() >= before);
        assert!(created.closed_at.is_none());

        let fetched = repo.get(&created.id).await.expect("get");
        assert_eq!(fetched, created);
    }

    #[tokio::test]
    async fn get_missing_session_is_not_found() {
        let (_pool, repo) = setup().await;
        let error = repo.get(&SessionId("missing".to_owned())).await.expect_err("missing");
        assert!(matches!(error, RepositoryError::NotFound { entity: "session", .. }));
    }

    #[tokio::test]
    async fn create_rejects_empty_user() {
        let (_pool, repo) = setup().await;
        let error = repo.create("").await.expect_err("empty user");
        assert!(matches!(error, RepositoryError::Invalid(_)));
    }

    #[tokio::test]
    async fn close_stamps_closed_at_once() {
        let (_pool, repo) = setup().await;
        let created = repo.create("U1").await.expect("create");

        let closed = repo.close(&created.id).await.expect("close");
        assert!(closed.closed_at.is_some());
        assert_eq!(closed.created_at, created.created_at);

        let error = repo.close(&created.id).await.expect_err("second close");
        assert!(matches!(
            error,
            RepositoryError::AlreadyClosed(ref id) if id == created.id.as_str()
        ));

        let still_closed = repo.get(&created.id).await.expect("get");
        assert_eq!(still_closed.closed_at, closed.closed_at);
    }

    #[tokio::test]
    async fn close_missing_session_is_not_found() {
        let (_pool, repo) = setup().await;
        let error = repo.close(&SessionId("missing".to_owned())).await.expect_err("missing");
        assert!(matches!(error, RepositoryError::NotFound { .. }));
    }

    #[tokio::test]
    async fn get_by_user_skips_closed_sessions() {
        let (_pool, repo) = setup().await;
        let first = repo.create("U1").await.expect("create first");
        repo.close(&first.id).await.expect("close first");

        let error = repo.get_by_user("U1").await.expect_err("no open session");
        assert!(matches!(error, RepositoryError::NotFound { .. }));

        let second = repo.create("U1").await.expect("create second");
        let found = repo.get_by_user("U1").await.expect("open session");
        assert_eq!(found.id, second.id);
    }

    #[tokio::test]
    async fn get_by_user_prefers_most_recent_open_session() {
        let (_pool, repo) = setup().await;
        let older = repo.create("U1").await.expect("older");
        let mut newer = repo.create("U1").await.expect("newer");
        newer.created_at = older.created_at + chrono::Duration::seconds(5);
        repo.update(&newer).await.expect("update");

        let found = repo.get_by_user("U1").await.expect("open session");
        assert_eq!(found.id, newer.id);
    }

    #[tokio::test]
    async fn list_unclosed_and_active_users() {
        let (_pool, repo) = setup().await;
        let a = repo.create("U1").await.expect("a");
        repo.create("U1").await.expect("b");
        let c = repo.create("U2").await.expect("c");
        repo.close(&c.id).await.expect("close c");

        let open = repo.list_unclosed().await.expect("list");
        assert_eq!(open.len(), 2);
        assert!(open.iter().all(|session| session.closed_at.is_none()));
        assert!(open.iter().any(|session| session.id == a.id));

        let users = repo.list_active_user_ids().await.expect("users");
        assert_eq!(users, vec!["U1".to_owned()]);

        let stamp = now_millis();
        let closed = repo.close_all_for_user("U1", stamp).await.expect("close all");
        assert_eq!(closed, 2);
        assert!(repo.list_unclosed().await.expect("list").is_empty());
        assert_eq!(repo.get(&a.id).await.expect("a").closed_at, Some(stamp));
    }

    #[tokio::test]
    async fn delete_removes_the_row() {
        let (_pool, repo) = setup().await;
        let created = repo.create("U1").await.expect("create");

        repo.delete(&created.id).await.expect("delete");
        assert!(matches!(repo.get(&created.id).await, Err(RepositoryError::NotFound { .. })));
        assert!(matches!(repo.delete(&created.id).await, Err(RepositoryError::NotFound { .. })));
    }

    #[tokio::test]
    async fn concurrent_creates_produce_distinct_rows() {
        let (_pool, repo) = setup().await;
        let repo = Arc::new(repo);

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let repo = Arc::clone(&repo);
                tokio::spawn(async move { repo.create("U-shared").await })
            })
            .collect();

        let mut ids = HashSet::new();
        for handle in handles {
            let session = handle.await.expect("join").expect("create");
            ids.insert(session.id.0);
        }

        assert_eq!(ids.len(), 16);
        assert_eq!(repo.list_unclosed().await.expect("list").len(), 16);
    }
}
