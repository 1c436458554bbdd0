use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tracing::{info, warn};

use wabridge_core::domain::channel::Channel;
use wabridge_core::domain::session::{now_millis, Session, SessionId, SessionPatch};
use wabridge_core::errors::{ApplicationError, DomainError};
use wabridge_core::plugin_config::ConfigurationStore;
use wabridge_db::{ChannelRepository, SessionRepository};

use crate::host::{HostApi, User, WebsocketBroadcast};

pub const WEBSOCKET_EVENT_SESSION_UPDATED: &str = "whatsapp_session_updated";
pub const WEBSOCKET_EVENT_PREFERENCE_UPDATED: &str = "whatsapp_preference_updated";

/// Outcome of closing every open session of one user.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UserSessionsClosed {
    pub closed: u64,
    /// Stamp written to the closed rows; `None` when the user had no open session.
    pub closed_at: Option<DateTime<Utc>>,
}

/// Application layer over the session and channel stores plus the host API.
pub struct WhatsappApp {
    host: Arc<dyn HostApi>,
    sessions: Arc<dyn SessionRepository>,
    channels: Arc<dyn ChannelRepository>,
    configuration: Arc<ConfigurationStore>,
}

impl WhatsappApp {
    pub fn new(
        host: Arc<dyn HostApi>,
        sessions: Arc<dyn SessionRepository>,
        channels: Arc<dyn ChannelRepository>,
        configuration: Arc<ConfigurationStore>,
    ) -> Self {
        Self { host, sessions, channels, configuration }
    }

    pub fn host(&self) -> &Arc<dyn HostApi> {
        &self.host
    }

    pub fn configuration(&self) -> &Arc<ConfigurationStore> {
        &self.configuration
    }

    pub fn bot_id(&self) -> String {
        self.configuration.get().bot_user_id.clone()
    }

    pub async fn create_session(&self, user_id: &str) -> Result<Session, ApplicationError> {
        if user_id.trim().is_empty() {
            return Err(DomainError::Validation("user_id is required".to_owned()).into());
        }

        let session = self
            .sessions
            .create(user_id)
            .await
            .map_err(|error| ApplicationError::from(error).context("create_session"))?;
        info!(
            event_name = "app.session.created",
            session_id = %session.id,
            user_id = %session.user_id,
            "whatsapp session created"
        );
        Ok(session)
    }

    pub async fn get_session(&self, id: &SessionId) -> Result<Session, ApplicationError> {
        self.sessions
            .get(id)
            .await
            .map_err(|error| ApplicationError::from(error).context("get_session"))
    }

    pub async fn close_session(&self, id: &SessionId) -> Result<Session, ApplicationError> {
        let session = self
            .sessions
            .close(id)
            .await
            .map_err(|error| ApplicationError::from(error).context("close_session"))?;
        info!(
            event_name = "app.session.closed",
            session_id = %session.id,
            user_id = %session.user_id,
            "whatsapp session closed"
        );
        Ok(session)
    }

    pub async fn get_session_by_user(&self, user_id: &str) -> Result<Session, ApplicationError> {
        self.sessions
            .get_by_user(user_id)
            .await
            .map_err(|error| ApplicationError::from(error).context("get_session_by_user"))
    }

    pub async fn list_unclosed_sessions(&self) -> Result<Vec<Session>, ApplicationError> {
        self.sessions
            .list_unclosed()
            .await
            .map_err(|error| ApplicationError::from(error).context("list_unclosed_sessions"))
    }

    /// Applies `patch` to the stored session and returns the updated record.
    pub async fn update_session(
        &self,
        id: &SessionId,
        patch: SessionPatch,
    ) -> Result<Session, ApplicationError> {
        let current = self.get_session(id).await?;
        let updated = current.apply(patch)?;
        self.sessions
            .update(&updated)
            .await
            .map_err(|error| ApplicationError::from(error).context("update_session"))?;
        info!(
            event_name = "app.session.updated",
            session_id = %updated.id,
            user_id = %updated.user_id,
            "whatsapp session updated"
        );
        Ok(updated)
    }

    pub async fn close_sessions_for_user(
        &self,
        user_id: &str,
    ) -> Result<UserSessionsClosed, ApplicationError> {
        if user_id.trim().is_empty() {
            return Err(DomainError::Validation("user_id is required".to_owned()).into());
        }

        let closed_at = now_millis();
        let closed = self
            .sessions
            .close_all_for_user(user_id, closed_at)
            .await
            .map_err(|error| ApplicationError::from(error).context("close_sessions_for_user"))?;
        info!(
            event_name = "app.session.closed_for_user",
            user_id,
            closed,
            "closed open whatsapp sessions for user"
        );
        Ok(UserSessionsClosed { closed, closed_at: (closed > 0).then_some(closed_at) })
    }

    /// Removes the session row and returns what was stored.
    pub async fn delete_session(&self, id: &SessionId) -> Result<Session, ApplicationError> {
        let session = self.get_session(id).await?;
        self.sessions
            .delete(id)
            .await
            .map_err(|error| ApplicationError::from(error).context("delete_session"))?;
        info!(
            event_name = "app.session.deleted",
            session_id = %session.id,
            user_id = %session.user_id,
            "whatsapp session deleted"
        );
        Ok(session)
    }

    /// Host users that currently hold an open session. Users the host no longer knows
    /// are skipped.
    pub async fn list_active_users(&self) -> Result<Vec<User>, ApplicationError> {
        let user_ids = self
            .sessions
            .list_active_user_ids()
            .await
            .map_err(|error| ApplicationError::from(error).context("list_active_users"))?;

        let mut users = Vec::with_capacity(user_ids.len());
        for user_id in user_ids {
            match self.host.get_user(&user_id).await {
                Ok(user) => users.push(user),
                Err(lookup_error) => warn!(
                    event_name = "app.session.active_user_missing",
                    user_id = %user_id,
                    error = %lookup_error,
                    "skipping active session owner unknown to the host"
                ),
            }
        }
        Ok(users)
    }

    pub async fn list_channels(&self) -> Result<Vec<Channel>, ApplicationError> {
        self.channels
            .list()
            .await
            .map_err(|error| ApplicationError::from(error).context("list_channels"))
    }

    pub async fn create_channel(&self, channel_id: &str) -> Result<Channel, ApplicationError> {
        if channel_id.trim().is_empty() {
            return Err(DomainError::Validation("channel_id is required".to_owned()).into());
        }
        self.channels
            .create(channel_id)
            .await
            .map_err(|error| ApplicationError::from(error).context("create_channel"))
    }

    /// Records a host channel in the channel store, attaching its phone metadata.
    pub async fn record_whatsapp_channel(
        &self,
        channel_id: &str,
        phone_number: &str,
        phone_number_id: &str,
    ) -> Result<Channel, ApplicationError> {
        let existing = self
            .channels
            .find_by_channel_id(channel_id)
            .await
            .map_err(|error| ApplicationError::from(error).context("record_whatsapp_channel"))?;
        let channel = match existing {
            Some(channel) => channel,
            None => self.create_channel(channel_id).await?,
        };

        let channel = channel.with_phone(phone_number, phone_number_id);
        self.channels
            .update(&channel)
            .await
            .map_err(|error| ApplicationError::from(error).context("record_whatsapp_channel"))?;
        Ok(channel)
    }

    /// Takes the host KV mutex `key` when it is free.
    pub async fn try_lock(&self, key: &str, value: &[u8]) -> Result<bool, ApplicationError> {
        self.host
            .kv_compare_and_set(key, None, value)
            .await
            .map_err(|error| ApplicationError::from(error).context("try_lock"))
    }

    /// Releases `key` if it is still held with `value`.
    pub async fn unlock(&self, key: &str, value: &[u8]) -> Result<bool, ApplicationError> {
        self.host
            .kv_compare_and_delete(key, value)
            .await
            .map_err(|error| ApplicationError::from(error).context("unlock"))
    }

    /// Tells `user_id`'s clients about their current open session, or that they have none.
    pub async fn publish_session_update(&self, user_id: &str) -> Result<(), ApplicationError> {
        let payload = match self.sessions.get_by_user(user_id).await {
            Ok(session) => serde_json::to_value(&session).map_err(|error| {
                ApplicationError::Integration(format!("failed to encode session: {error}"))
            })?,
            Err(_) => json!({ "session": Value::Null, "user_id": user_id }),
        };

        self.host
            .publish_websocket_event(
                WEBSOCKET_EVENT_SESSION_UPDATED,
                payload,
                WebsocketBroadcast { user_id: Some(user_id.to_owned()) },
            )
            .await;
        Ok(())
    }

    /// Broadcasts the users holding open sessions to every client.
    pub async fn publish_preference_update(&self) -> Result<(), ApplicationError> {
        let active_users = self.list_active_users().await?;
        let payload = json!({ "active_users": active_users });
        self.host
            .publish_websocket_event(
                WEBSOCKET_EVENT_PREFERENCE_UPDATED,
                payload,
                WebsocketBroadcast::default(),
            )
            .await;
        Ok(())
    }
}
