use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use wabridge_core::domain::channel::Channel;
use wabridge_core::domain::session::{Session, SessionId};
use wabridge_core::errors::{ApplicationError, DomainError};

pub mod channel;
pub mod memory;
pub mod session;

pub use channel::SqlChannelRepository;
pub use memory::{InMemoryChannelRepository, InMemorySessionRepository};
pub use session::SqlSessionRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("{entity} `{id}` not found")]
    NotFound { entity: &'static str, id: String },
    #[error("session `{0}` is already closed")]
    AlreadyClosed(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("invalid record: {0}")]
    Invalid(String),
}

impl From<DomainError> for RepositoryError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(message) => Self::Invalid(message),
            DomainError::NotFound { entity, id } => Self::NotFound { entity, id },
            DomainError::SessionAlreadyClosed(id) => Self::AlreadyClosed(id),
        }
    }
}

impl From<RepositoryError> for ApplicationError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::NotFound { entity, id } => {
                ApplicationError::Domain(DomainError::NotFound { entity, id })
            }
            RepositoryError::AlreadyClosed(id) => {
                ApplicationError::Domain(DomainError::SessionAlreadyClosed(id))
            }
            RepositoryError::Invalid(message) => {
                ApplicationError::Domain(DomainError::Validation(message))
            }
            other => ApplicationError::Persistence(other.to_string()),
        }
    }
}

/// Physical table names after applying the configured prefix.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TableNames {
    pub session: String,
    pub channel: String,
}

impl TableNames {
    pub fn with_prefix(prefix: &str) -> Self {
        Self { session: format!("{prefix}session"), channel: format!("{prefix}channel") }
    }
}

impl Default for TableNames {
    fn default() -> Self {
        Self::with_prefix(crate::migrations::DEFAULT_TABLE_PREFIX)
    }
}

#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn get(&self, id: &SessionId) -> Result<Session, RepositoryError>;

    /// Generates an id and creation time for a new open session.
    async fn create(&self, user_id: &str) -> Result<Session, RepositoryError>;

    /// Stamps `closed_at` in one conditional write. A session that is already closed
    /// yields `AlreadyClosed`; a missing one yields `NotFound`.
    async fn close(&self, id: &SessionId) -> Result<Session, RepositoryError>;

    /// Most recently created open session for `user_id`.
    async fn get_by_user(&self, user_id: &str) -> Result<Session, RepositoryError>;

    async fn list_unclosed(&self) -> Result<Vec<Session>, RepositoryError>;

    async fn update(&self, session: &Session) -> Result<(), RepositoryError>;

    /// Stamps `closed_at` on every open session of `user_id` and returns how many changed.
    async fn close_all_for_user(
        &self,
        user_id: &str,
        closed_at: DateTime<Utc>,
    ) -> Result<u64, RepositoryError>;

    async fn list_active_user_ids(&self) -> Result<Vec<String>, RepositoryError>;

    async fn delete(&self, id: &SessionId) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait ChannelRepository: Send + Sync {
    async fn list(&self) -> Result<Vec<Channel>, RepositoryError>;

    async fn create(&self, channel_id: &str) -> Result<Channel, RepositoryError>;

    async fn find_by_channel_id(&self, channel_id: &str)
        -> Result<Option<Channel>, RepositoryError>;

    async fn update(&self, channel: &Channel) -> Result<(), RepositoryError>;

    async fn delete(&self, id: &str) -> Result<(), RepositoryError>;
}

pub(crate) fn session_not_found(id: &str) -> RepositoryError {
    RepositoryError::NotFound { entity: "session", id: id.to_owned() }
}

pub(crate) fn channel_not_found(id: &str) -> RepositoryError {
    RepositoryError::NotFound { entity: "channel", id: id.to_owned() }
}
