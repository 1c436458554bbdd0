//! Host-provided plugin settings and the immutable runtime snapshot built from them.
//!
//! A [`PluginConfiguration`] is never mutated once installed. Writers clone the current
//! snapshot, change the clone, and swap it into the [`ConfigurationStore`].

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::ArcSwapOption;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::error;

/// Settings an administrator edits through the host's plugin settings page.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginSettings {
    #[serde(alias = "Username")]
    pub username: String,
    #[serde(alias = "channelname", alias = "ChannelName")]
    pub channel_name: String,
    #[serde(alias = "lastname", alias = "LastName")]
    pub last_name: String,
    #[serde(alias = "textstyle", alias = "TextStyle")]
    pub text_style: String,
    #[serde(alias = "randomsecret", alias = "RandomSecret")]
    pub random_secret: String,
    #[serde(alias = "secretmessage", alias = "SecretMessage")]
    pub secret_message: String,
    #[serde(alias = "enablementionuser", alias = "EnableMentionUser")]
    pub enable_mention_user: bool,
    #[serde(alias = "mentionuser", alias = "MentionUser")]
    pub mention_user: String,
    #[serde(alias = "secretnumber", alias = "SecretNumber")]
    pub secret_number: i64,
    #[serde(alias = "integrationrequestdelay", alias = "IntegrationRequestDelay")]
    pub integration_request_delay: u64,
    #[serde(alias = "webhookurl", alias = "WebhookURL")]
    pub webhook_url: String,
    #[serde(alias = "rejectallfiledownloads", alias = "RejectAllFileDownloads")]
    pub reject_all_file_downloads: bool,
}

impl PluginSettings {
    /// Settings shipped with a fresh install.
    pub fn with_defaults() -> Self {
        Self {
            username: "demo_plugin".to_owned(),
            channel_name: "demo_plugin".to_owned(),
            last_name: "Plugin User".to_owned(),
            text_style: String::new(),
            random_secret: String::new(),
            secret_message: "Hello from the WhatsApp bridge!".to_owned(),
            enable_mention_user: false,
            mention_user: String::new(),
            secret_number: 0,
            integration_request_delay: 0,
            webhook_url: String::new(),
            reject_all_file_downloads: false,
        }
    }

    pub fn has_valid_webhook_url(&self) -> bool {
        is_valid_webhook_url(&self.webhook_url)
    }
}

pub fn is_valid_webhook_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// Immutable runtime configuration: host settings plus values computed during activation.
#[derive(Clone, Debug, Default)]
pub struct PluginConfiguration {
    pub settings: PluginSettings,
    pub disabled: bool,
    pub demo_user_id: String,
    pub bot_user_id: String,
    /// team id -> demo channel id
    pub demo_channel_ids: BTreeMap<String, String>,
    pub whatsapp_access_token: Option<SecretString>,
    /// user id -> username
    pub enabled_users: BTreeMap<String, String>,
}

impl PluginConfiguration {
    pub fn from_settings(settings: PluginSettings) -> Self {
        Self { settings, ..Self::default() }
    }

    pub fn demo_channel_for_team(&self, team_id: &str) -> Option<&str> {
        self.demo_channel_ids.get(team_id).map(String::as_str)
    }

    pub fn is_demo_channel(&self, channel_id: &str) -> bool {
        self.demo_channel_ids.values().any(|id| id == channel_id)
    }

    /// Changed fields between `previous` and `self`, keyed the way the host displays them.
    /// The random secret is never revealed.
    pub fn diff(&self, previous: &Self) -> Map<String, Value> {
        let old = &previous.settings;
        let new = &self.settings;
        let mut diff = Map::new();

        if new.username != old.username {
            diff.insert("username".to_owned(), json!(new.username));
        }
        if new.channel_name != old.channel_name {
            diff.insert("channel_name".to_owned(), json!(new.channel_name));
        }
        if new.last_name != old.last_name {
            diff.insert("lastname".to_owned(), json!(new.last_name));
        }
        if new.text_style != old.text_style {
            diff.insert("text_style".to_owned(), json!(new.text_style));
        }
        if new.random_secret != old.random_secret {
            diff.insert("random_secret".to_owned(), json!("<HIDDEN>"));
        }
        if new.secret_message != old.secret_message {
            diff.insert("secret_message".to_owned(), json!(new.secret_message));
        }
        if new.enable_mention_user != old.enable_mention_user {
            diff.insert("enable_mention_user".to_owned(), json!(new.enable_mention_user));
        }
        if new.mention_user != old.mention_user {
            diff.insert("mention_user".to_owned(), json!(new.mention_user));
        }
        if new.secret_number != old.secret_number {
            diff.insert("secret_number".to_owned(), json!(new.secret_number));
        }
        if new.webhook_url != old.webhook_url {
            diff.insert("webhook_url".to_owned(), json!(new.webhook_url));
        }

        diff
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("configuration store was given the configuration it already holds")]
    SameInstance,
}

/// Holds the active [`PluginConfiguration`] behind an atomic pointer.
///
/// Readers never block. Writers are serialized so that read-modify-write updates do not
/// lose each other's changes.
#[derive(Debug, Default)]
pub struct ConfigurationStore {
    current: ArcSwapOption<PluginConfiguration>,
    writer: Mutex<()>,
}

impl ConfigurationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the active snapshot, or an empty default before anything is installed.
    pub fn get(&self) -> Arc<PluginConfiguration> {
        self.current.load_full().unwrap_or_default()
    }

    pub fn is_installed(&self) -> bool {
        self.current.load().is_some()
    }

    /// Replaces the active snapshot. `None` clears the store and is always accepted.
    pub fn install(
        &self,
        configuration: Option<Arc<PluginConfiguration>>,
    ) -> Result<(), ConfigurationError> {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);

        let current = self.current.load_full();
        if let (Some(next), Some(current)) = (&configuration, &current) {
            if Arc::ptr_eq(next, current) {
                error!(
                    event_name = "plugin.configuration.same_instance",
                    "configuration install called with the existing configuration"
                );
                return Err(ConfigurationError::SameInstance);
            }
        }

        self.current.store(configuration);
        Ok(())
    }

    /// Clones the active snapshot, applies `change`, and installs the result.
    pub fn update<F>(&self, change: F) -> Arc<PluginConfiguration>
    where
        F: FnOnce(&mut PluginConfiguration),
    {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);

        let mut next =
            self.current.load_full().map(|current| (*current).clone()).unwrap_or_default();
        change(&mut next);
        let next = Arc::new(next);
        self.current.store(Some(next.clone()));
        next
    }

    pub fn set_enabled(&self, enabled: bool) -> Arc<PluginConfiguration> {
        self.update(|configuration| configuration.disabled = !enabled)
    }

    pub fn enable_user(&self, user_id: &str, username: &str) -> Arc<PluginConfiguration> {
        self.update(|configuration| {
            configuration.enabled_users.insert(user_id.to_owned(), username.to_owned());
        })
    }

    pub fn disable_user(&self, user_id: &str) -> Arc<PluginConfiguration> {
        self.update(|configuration| {
            configuration.enabled_users.remove(user_id);
        })
    }
}
