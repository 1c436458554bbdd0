use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use wabridge_core::domain::channel::Channel;

use super::{channel_not_found, ChannelRepository, RepositoryError, TableNames};
use crate::DbPool;

pub struct SqlChannelRepository {
    pool: DbPool,
    table: String,
}

impl SqlChannelRepository {
    pub fn new(pool: DbPool, tables: &TableNames) -> Self {
        Self { pool, table: tables.channel.clone() }
    }
}

fn row_to_channel(row: &SqliteRow) -> Result<Channel, RepositoryError> {
    let id: String = row.try_get("id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let channel_id: String =
        row.try_get("channel_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let phone_number: Option<String> =
        row.try_get("phone_number").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let phone_number_id: Option<String> =
        row.try_get("phone_number_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    Ok(Channel {
        id,
        channel_id,
        phone_number: phone_number.filter(|value| !value.is_empty()),
        phone_number_id: phone_number_id.filter(|value| !value.is_empty()),
    })
}

fn map_write_error(error: sqlx::Error, channel_id: &str) -> RepositoryError {
    match error {
        sqlx::Error::Database(ref db) if db.is_unique_violation() => {
            RepositoryError::Conflict(format!("channel `{channel_id}` already exists"))
        }
        other => RepositoryError::Database(other),
    }
}

#[async_trait::async_trait]
impl ChannelRepository for SqlChannelRepository {
    async fn list(&self) -> Result<Vec<Channel>, RepositoryError> {
        let rows: Vec<SqliteRow> = sqlx::query(&format!(
            "SELECT id, channel_id, phone_number, phone_number_id FROM {} ORDER BY rowid",
            self.table
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_channel).collect::<Result<Vec<_>, _>>()
    }

    async fn create(&self, channel_id: &str) -> Result<Channel, RepositoryError> {
        let channel = Channel::new(channel_id)?;

        sqlx::query(&format!(
            "INSERT INTO {} (id, channel_id, phone_number, phone_number_id)
             VALUES (?, ?, NULL, NULL)",
            self.table
        ))
        .bind(&channel.id)
        .bind(&channel.channel_id)
        .execute(&self.pool)
        .await
        .map_err(|error| map_write_error(error, channel_id))?;

        Ok(channel)
    }

    async fn find_by_channel_id(
        &self,
        channel_id: &str,
    ) -> Result<Option<Channel>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT id, channel_id, phone_number, phone_number_id FROM {} WHERE channel_id = ?",
            self.table
        ))
        .bind(channel_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_channel(r)?)),
            None => Ok(None),
        }
    }

    async fn update(&self, channel: &Channel) -> Result<(), RepositoryError> {
        channel.validate()?;

        let result = sqlx::query(&format!(
            "UPDATE {} SET channel_id = ?, phone_number = ?, phone_number_id = ? WHERE id = ?",
            self.table
        ))
        .bind(&channel.channel_id)
        .bind(&channel.phone_number)
        .bind(&channel.phone_number_id)
        .bind(&channel.id)
        .execute(&self.pool)
        .await
        .map_err(|error| map_write_error(error, &channel.channel_id))?;

        if result.rows_affected() == 0 {
            return Err(channel_not_found(&channel.id));
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), RepositoryError> {
        let result = sqlx::query(&format!("DELETE FROM {} WHERE id = ?", self.table))
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(channel_not_found(id));
        }
        Ok(())
    }
}
