use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use wabridge_core::domain::channel::Channel;
use wabridge_core::domain::session::{now_millis, Session, SessionId};

use super::{
    channel_not_found, session_not_found, ChannelRepository, RepositoryError, SessionRepository,
};

#[derive(Default)]
pub struct InMemorySessionRepository {
    sessions: RwLock<HashMap<String, Session>>,
}

#[async_trait::async_trait]
impl SessionRepository for InMemorySessionRepository {
    async fn get(&self, id: &SessionId) -> Result<Session, RepositoryError> {
        let sessions = self.sessions.read().await;
        sessions.get(&id.0).cloned().ok_or_else(|| session_not_found(&id.0))
    }

    async fn create(&self, user_id: &str) -> Result<Session, RepositoryError> {
        let session = Session::open(user_id)?;
        let mut sessions = self.sessions.write().await;
        sessions.insert(session.id.0.clone(), session.clone());
        Ok(session)
    }

    async fn close(&self, id: &SessionId) -> Result<Session, RepositoryError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(&id.0).ok_or_else(|| session_not_found(&id.0))?;
        let closed = session.close_at(now_millis())?;
        *session = closed.clone();
        Ok(closed)
    }

    async fn get_by_user(&self, user_id: &str) -> Result<Session, RepositoryError> {
        let sessions = self.sessions.read().await;
        sessions
            .values()
            .filter(|session| session.user_id == user_id && session.is_open())
            .max_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)))
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound {
                entity: "open session for user",
                id: user_id.to_owned(),
            })
    }

    async fn list_unclosed(&self) -> Result<Vec<Session>, RepositoryError> {
        let sessions = self.sessions.read().await;
        let mut open: Vec<Session> =
            sessions.values().filter(|session| session.is_open()).cloned().collect();
        open.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(open)
    }

    async fn update(&self, session: &Session) -> Result<(), RepositoryError> {
        session.validate()?;
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(&session.id.0) {
            Some(existing) => {
                *existing = session.clone();
                Ok(())
            }
            None => Err(session_not_found(&session.id.0)),
        }
    }

    async fn close_all_for_user(
        &self,
        user_id: &str,
        closed_at: DateTime<Utc>,
    ) -> Result<u64, RepositoryError> {
        let mut sessions = self.sessions.write().await;
        let mut closed = 0;
        for session in sessions.values_mut() {
            if session.user_id == user_id && session.is_open() {
                session.closed_at = Some(closed_at);
                closed += 1;
            }
        }
        Ok(closed)
    }

    async fn list_active_user_ids(&self) -> Result<Vec<String>, RepositoryError> {
        let sessions = self.sessions.read().await;
        let users: BTreeSet<String> = sessions
            .values()
            .filter(|session| session.is_open())
            .map(|session| session.user_id.clone())
            .collect();
        Ok(users.into_iter().collect())
    }

    async fn delete(&self, id: &SessionId) -> Result<(), RepositoryError> {
        let mut sessions = self.sessions.write().await;
        sessions.remove(&id.0).map(|_| ()).ok_or_else(|| session_not_found(&id.0))
    }
}

#[derive(Default)]
pub struct InMemoryChannelRepository {
    channels: RwLock<Vec<Channel>>,
}

#[async_trait::async_trait]
impl ChannelRepository for InMemoryChannelRepository {
    async fn list(&self) -> Result<Vec<Channel>, RepositoryError> {
        Ok(self.channels.read().await.clone())
    }

    async fn create(&self, channel_id: &str) -> Result<Channel, RepositoryError> {
        let channel = Channel::new(channel_id)?;
        let mut channels = self.channels.write().await;
        if channels.iter().any(|existing| existing.channel_id == channel_id) {
            return Err(RepositoryError::Conflict(format!("channel `{channel_id}` already exists")));
        }
        channels.push(channel.clone());
        Ok(channel)
    }

    async fn find_by_channel_id(
        &self,
        channel_id: &str,
    ) -> Result<Option<Channel>, RepositoryError> {
        let channels = self.channels.read().await;
        Ok(channels.iter().find(|channel| channel.channel_id == channel_id).cloned())
    }

    async fn update(&self, channel: &Channel) -> Result<(), RepositoryError> {
        channel.validate()?;
        let mut channels = self.channels.write().await;
        if channels
            .iter()
            .any(|existing| existing.id != channel.id && existing.channel_id == channel.channel_id)
        {
            return Err(RepositoryError::Conflict(format!(
                "channel `{}` already exists",
                channel.channel_id
            )));
        }
        match channels.iter_mut().find(|existing| existing.id == channel.id) {
            Some(existing) => {
                *existing = channel.clone();
                Ok(())
            }
            None => Err(channel_not_found(&channel.id)),
        }
    }

    async fn delete(&self, id: &str) -> Result<(), RepositoryError> {
        let mut channels = self.channels.write().await;
        let before = channels.len();
        channels.retain(|channel| channel.id != id);
        if channels.len() == before {
            return Err(channel_not_found(id));
        }
        Ok(())
    }
}
