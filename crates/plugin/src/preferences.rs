use serde::{Deserialize, Serialize};
use tracing::info;

use wabridge_core::errors::{ApplicationError, DomainError};

use crate::app::WhatsappApp;

pub const PREFERENCE_KEY_PREFIX: &str = "whatsapp_pref_";

pub fn preference_key(user_id: &str) -> String {
    format!("{PREFERENCE_KEY_PREFIX}{user_id}")
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WhatsappPreference {
    pub receive_notifications: bool,
    pub user_id: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPreferences {
    pub whatsapp_pref: bool,
}

impl WhatsappApp {
    /// Opts a user in or out of WhatsApp notifications and tells every client.
    pub async fn set_whatsapp_preference(
        &self,
        preference: &WhatsappPreference,
    ) -> Result<(), ApplicationError> {
        if preference.user_id.trim().is_empty() {
            return Err(DomainError::Validation("user_id is required".to_owned()).into());
        }

        if preference.receive_notifications {
            let user = self
                .host()
                .get_user(&preference.user_id)
                .await
                .map_err(|error| ApplicationError::from(error).context("set_preference"))?;
            self.configuration().enable_user(&user.id, &user.username);
        } else {
            self.configuration().disable_user(&preference.user_id);
        }

        let value = preference.receive_notifications.to_string().into_bytes();
        self.host()
            .kv_set(&preference_key(&preference.user_id), value)
            .await
            .map_err(|error| ApplicationError::from(error).context("set_preference"))?;

        info!(
            event_name = "app.preference.updated",
            user_id = %preference.user_id,
            receive_notifications = preference.receive_notifications,
            "whatsapp preference updated"
        );
        self.publish_preference_update().await
    }

    /// Stored preference for `user_id`; anything unreadable counts as opted out.
    pub async fn whatsapp_preference(
        &self,
        user_id: &str,
    ) -> Result<UserPreferences, ApplicationError> {
        if user_id.trim().is_empty() {
            return Err(DomainError::Validation("user_id is required".to_owned()).into());
        }

        let stored = self
            .host()
            .kv_get(&preference_key(user_id))
            .await
            .map_err(|error| ApplicationError::from(error).context("get_preference"))?;
        let whatsapp_pref = stored
            .and_then(|value| String::from_utf8(value).ok())
            .and_then(|value| value.trim().parse::<bool>().ok())
            .unwrap_or(false);
        Ok(UserPreferences { whatsapp_pref })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use wabridge_core::errors::{ApplicationError, DomainError};
    use wabridge_core::plugin_config::{ConfigurationStore, PluginSettings};
    use wabridge_db::{InMemoryChannelRepository, InMemorySessionRepository};

    use super::{preference_key, WhatsappPreference};
    use crate::app::{WhatsappApp, WEBSOCKET_EVENT_PREFERENCE_UPDATED};
    use crate::host::{HostApi, InMemoryHost, ServerSettings, User};

    fn app() -> (WhatsappApp, Arc<InMemoryHost>) {
        let host =
            Arc::new(InMemoryHost::new(ServerSettings::default(), PluginSettings::default()));
        let app = WhatsappApp::new(
            host.clone(),
            Arc::new(InMemorySessionRepository::default()),
            Arc::new(InMemoryChannelRepository::default()),
            Arc::new(ConfigurationStore::new()),
        );
        (app, host)
    }

    #[tokio::test]
    async fn unknown_or_garbage_values_read_as_false() {
        let (app, host) = app();
        assert!(!app.whatsapp_preference("u1").await.expect("missing").whatsapp_pref);

        host.kv_set(&preference_key("u1"), b"maybe".to_vec()).await.expect("seed");
        assert!(!app.whatsapp_preference("u1").await.expect("garbage").whatsapp_pref);
    }

    #[tokio::test]
    async fn opting_in_enables_the_user_and_broadcasts() {
        let (app, host) = app();
        let alice = host
            .add_user(User { username: "alice".to_owned(), ..User::default() })
            .await;

        app.set_whatsapp_preference(&WhatsappPreference {
            receive_notifications: true,
            user_id: alice.id.clone(),
        })
        .await
        .expect("opt in");

        assert!(app.whatsapp_preference(&alice.id).await.expect("read").whatsapp_pref);
        assert_eq!(
            app.configuration().get().enabled_users.get(&alice.id).map(String::as_str),
            Some("alice")
        );
        let events = host.events().await;
        let last_event = events.last().map(|event| event.event.as_str());
        assert_eq!(last_event, Some(WEBSOCKET_EVENT_PREFERENCE_UPDATED));

        app.set_whatsapp_preference(&WhatsappPreference {
            receive_notifications: false,
            user_id: alice.id.clone(),
        })
        .await
        .expect("opt out");
        assert!(!app.whatsapp_preference(&alice.id).await.expect("read").whatsapp_pref);
        assert!(app.configuration().get().enabled_users.is_empty());
    }

    #[tokio::test]
    async fn empty_user_id_is_rejected() {
        let (app, _) = app();
        let error = app.whatsapp_preference("").await.expect_err("must fail");
        assert!(matches!(error, ApplicationError::Domain(DomainError::Validation(_))));
    }
}
