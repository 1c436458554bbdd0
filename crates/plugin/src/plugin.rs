//! The plugin object the host drives: shared state, configuration loading, and the
//! notice channel every hook reports through.

use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;
use serde_json::{json, Map, Value};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use wabridge_core::config::AppConfig;
use wabridge_core::plugin_config::{
    ConfigurationError, ConfigurationStore, PluginConfiguration, PluginSettings,
};

use crate::app::WhatsappApp;
use crate::host::{BotSpec, ChannelType, HostApi, HostChannel, HostError, Post, User};
use crate::job::{JobHandle, BACKGROUND_JOB_INTERVAL};
use crate::reaction_webhook::ReactionNotifier;
use crate::session_track::SessionTracker;

pub const DEFAULT_PLUGIN_ID: &str = "com.mattermost.whatsapp-bridge";
pub const DEMO_POST_TYPE: &str = "custom_demo_plugin";
pub const STATUS_CHANGE_EVENT: &str = "status_change";
pub const CONFIGURATION_FILENAME: &str = "configuration.json";
const BOT_ACCESS_TOKEN_DESCRIPTION: &str = "whatsapp-bot-token";

#[derive(Debug, Error)]
pub enum PluginError {
    #[error("server configuration is not compatible: {0}")]
    IncompatibleServer(String),
    #[error(transparent)]
    Host(#[from] HostError),
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error("{0}")]
    ConfigurationRejected(String),
    #[error("failed to build reaction webhook client: {0}")]
    ReactionClient(#[from] reqwest::Error),
}

#[derive(Clone, Debug)]
pub struct PluginOptions {
    pub plugin_id: String,
    pub require_gif_picker: bool,
    pub require_public_links: bool,
    pub job_interval: Duration,
    /// Used instead of minting a bot token when set.
    pub whatsapp_access_token: Option<SecretString>,
}

impl Default for PluginOptions {
    fn default() -> Self {
        Self {
            plugin_id: DEFAULT_PLUGIN_ID.to_owned(),
            require_gif_picker: true,
            require_public_links: true,
            job_interval: BACKGROUND_JOB_INTERVAL,
            whatsapp_access_token: None,
        }
    }
}

impl PluginOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            plugin_id: config.host.plugin_id.clone(),
            require_gif_picker: config.host.require_gif_picker,
            require_public_links: config.host.require_public_links,
            job_interval: BACKGROUND_JOB_INTERVAL,
            whatsapp_access_token: config.whatsapp.access_token.clone(),
        }
    }
}

pub struct Plugin {
    pub(crate) host: Arc<dyn HostApi>,
    pub(crate) app: Arc<WhatsappApp>,
    pub(crate) configuration: Arc<ConfigurationStore>,
    pub(crate) options: PluginOptions,
    pub(crate) sessions: SessionTracker,
    pub(crate) notifier: ReactionNotifier,
    pub(crate) job: Mutex<Option<JobHandle>>,
}

impl Plugin {
    pub fn new(app: Arc<WhatsappApp>, options: PluginOptions) -> Result<Self, PluginError> {
        Ok(Self {
            host: app.host().clone(),
            configuration: app.configuration().clone(),
            app,
            options,
            sessions: SessionTracker::default(),
            notifier: ReactionNotifier::new()?,
            job: Mutex::new(None),
        })
    }

    pub fn app(&self) -> &Arc<WhatsappApp> {
        &self.app
    }

    pub fn configuration(&self) -> Arc<PluginConfiguration> {
        self.configuration.get()
    }

    pub fn options(&self) -> &PluginOptions {
        &self.options
    }

    pub fn sessions(&self) -> &SessionTracker {
        &self.sessions
    }

    pub fn is_enabled(&self) -> bool {
        !self.configuration.get().disabled
    }

    pub(crate) async fn site_url(&self) -> String {
        match self.host.server_settings().await {
            Ok(settings) => settings.site_url,
            Err(settings_error) => {
                warn!(
                    event_name = "plugin.server_settings.unavailable",
                    error = %settings_error,
                    "failed to read server settings"
                );
                String::new()
            }
        }
    }

    /// Posts `message` as the demo user into the team's demo channel. Does nothing while the
    /// hooks are disabled.
    pub async fn post_plugin_message(&self, team_id: &str, message: &str) -> Result<(), HostError> {
        let configuration = self.configuration.get();
        if configuration.disabled {
            return Ok(());
        }

        let channel_id = configuration.demo_channel_for_team(team_id).ok_or_else(|| {
            HostError::NotFound { entity: "demo channel for team", key: team_id.to_owned() }
        })?;
        let settings = &configuration.settings;
        let message = if settings.enable_mention_user {
            format!("tag @{} | {message}", settings.mention_user)
        } else {
            message.to_owned()
        };
        let message = format!("{style}{message}{style}", style = settings.text_style);

        self.host
            .create_post(Post::new(configuration.demo_user_id.clone(), channel_id, message))
            .await?;
        Ok(())
    }

    /// Posts a notice to every team, logging failures.
    pub(crate) async fn broadcast_plugin_message(&self, hook: &str, message: &str) {
        let teams = match self.host.get_teams().await {
            Ok(teams) => teams,
            Err(teams_error) => {
                error!(
                    event_name = "plugin.hook.teams_failed",
                    hook,
                    error = %teams_error,
                    "failed to query teams"
                );
                return;
            }
        };

        for team in teams {
            if let Err(post_error) = self.post_plugin_message(&team.id, message).await {
                error!(
                    event_name = "plugin.hook.notice_failed",
                    hook,
                    team_id = %team.id,
                    error = %post_error,
                    "failed to post plugin message"
                );
            }
        }
    }

    pub(crate) async fn send_ephemeral_notice(&self, user_id: &str, channel_id: &str, text: &str) {
        let post = Post::new(self.configuration.get().bot_user_id.clone(), channel_id, text);
        self.host.send_ephemeral_post(user_id, post).await;
    }

    pub(crate) async fn emit_status_change(&self) {
        let enabled = self.is_enabled();
        self.host
            .publish_websocket_event(
                STATUS_CHANGE_EVENT,
                json!({ "enabled": enabled }),
                Default::default(),
            )
            .await;
    }

    pub(crate) async fn check_required_server_configuration(&self) -> Result<(), PluginError> {
        let settings = self.host.server_settings().await?;
        if self.options.require_gif_picker && !settings.enable_gif_picker {
            return Err(PluginError::IncompatibleServer(
                "ServiceSettings.EnableGifPicker must be enabled".to_owned(),
            ));
        }
        if self.options.require_public_links && !settings.enable_public_link {
            return Err(PluginError::IncompatibleServer(
                "FileSettings.EnablePublicLink must be enabled".to_owned(),
            ));
        }
        Ok(())
    }

    /// Rebuilds the configuration snapshot from the host's plugin settings, making sure the
    /// demo user, the bot, and one demo channel per team exist.
    pub async fn on_configuration_change(&self) -> Result<(), PluginError> {
        let previous = self.configuration.get();
        let mut next = (*previous).clone();
        next.settings = self.host.load_plugin_settings().await?;

        next.demo_user_id = self.ensure_demo_user(&next.settings).await?;
        next.bot_user_id = self
            .host
            .ensure_bot(BotSpec {
                username: "whatsapp".to_owned(),
                display_name: "WhatsApp Bot".to_owned(),
                description: "The WhatsApp Bot".to_owned(),
            })
            .await?;

        if next.whatsapp_access_token.is_none() {
            next.whatsapp_access_token = match &self.options.whatsapp_access_token {
                Some(token) => Some(token.clone()),
                None => Some(
                    self.host
                        .create_user_access_token(&next.bot_user_id, BOT_ACCESS_TOKEN_DESCRIPTION)
                        .await?
                        .into(),
                ),
            };
        }

        next.demo_channel_ids = self.ensure_demo_channels(&next.settings).await?;

        self.announce_configuration(&next, &previous).await;
        self.configuration.install(Some(Arc::new(next)))?;
        info!(event_name = "plugin.configuration.installed", "plugin configuration loaded");
        Ok(())
    }

    async fn ensure_demo_user(&self, settings: &PluginSettings) -> Result<String, PluginError> {
        let user = match self.host.get_user_by_username(&settings.username).await {
            Ok(user) => user,
            Err(lookup_error) if lookup_error.is_not_found() => {
                info!(
                    event_name = "plugin.demo_user.create",
                    username = %settings.username,
                    "demo user does not exist, creating it"
                );
                self.host
                    .create_user(User {
                        username: settings.username.clone(),
                        email: format!("{}@example.com", settings.username),
                        nickname: "WhatsApp Day".to_owned(),
                        first_name: "WhatsApp".to_owned(),
                        last_name: settings.last_name.clone(),
                        position: "Bot".to_owned(),
                        ..User::default()
                    })
                    .await?
            }
            Err(lookup_error) => return Err(lookup_error.into()),
        };

        let user = if user.last_name != settings.last_name {
            self.host.update_user(User { last_name: settings.last_name.clone(), ..user }).await?
        } else {
            user
        };

        for team in self.host.get_teams().await? {
            if let Err(member_error) = self.host.create_team_member(&team.id, &user.id).await {
                error!(
                    event_name = "plugin.demo_user.team_failed",
                    team_id = %team.id,
                    error = %member_error,
                    "failed to add demo user to team"
                );
            }
        }
        Ok(user.id)
    }

    async fn ensure_demo_channels(
        &self,
        settings: &PluginSettings,
    ) -> Result<std::collections::BTreeMap<String, String>, PluginError> {
        let mut demo_channel_ids = std::collections::BTreeMap::new();
        for team in self.host.get_teams().await? {
            let existing = self.host.get_channel_by_name(&team.id, &settings.channel_name).await;
            let channel = match existing {
                Ok(channel) => channel,
                Err(_) => {
                    self.host
                        .create_channel(HostChannel {
                            team_id: team.id.clone(),
                            channel_type: ChannelType::Open,
                            display_name: "Demo Plugin".to_owned(),
                            name: settings.channel_name.clone(),
                            header: "The channel used by the demo plugin.".to_owned(),
                            purpose: "This channel was created by a plugin for testing.".to_owned(),
                            ..HostChannel::default()
                        })
                        .await?
                }
            };
            demo_channel_ids.insert(team.id, channel.id);
        }
        Ok(demo_channel_ids)
    }

    /// Posts the settings diff, with the new settings attached, into every demo channel.
    async fn announce_configuration(
        &self,
        next: &PluginConfiguration,
        previous: &PluginConfiguration,
    ) {
        let diff = next.diff(previous);
        if diff.is_empty() {
            return;
        }

        let teams = match self.host.get_teams().await {
            Ok(teams) => teams,
            Err(teams_error) => {
                warn!(
                    event_name = "plugin.configuration.teams_failed",
                    error = %teams_error,
                    "failed to query teams on configuration change"
                );
                return;
            }
        };

        let mut uploaded = next.settings.clone();
        if !uploaded.random_secret.is_empty() {
            uploaded.random_secret = "<HIDDEN>".to_owned();
        }
        let document = match serde_json::to_vec_pretty(&uploaded) {
            Ok(document) => document,
            Err(encode_error) => {
                warn!(
                    event_name = "plugin.configuration.encode_failed",
                    error = %encode_error,
                    "failed to encode new configuration"
                );
                return;
            }
        };

        for team in teams {
            let Some(channel_id) = next.demo_channel_for_team(&team.id) else {
                warn!(
                    event_name = "plugin.configuration.no_demo_channel",
                    team_id = %team.id,
                    "no demo channel for team"
                );
                continue;
            };

            let file = match self
                .host
                .upload_file(document.clone(), channel_id, CONFIGURATION_FILENAME)
                .await
            {
                Ok(file) => file,
                Err(upload_error) => {
                    warn!(
                        event_name = "plugin.configuration.upload_failed",
                        error = %upload_error,
                        "failed to attach new configuration"
                    );
                    return;
                }
            };

            let mut post = Post::new(
                next.bot_user_id.clone(),
                channel_id,
                "OnConfigChange: loading new configuration",
            )
            .with_type(DEMO_POST_TYPE)
            .with_props(diff.clone());
            post.file_ids = vec![file.id];
            if let Err(post_error) = self.host.create_post(post).await {
                warn!(
                    event_name = "plugin.configuration.post_failed",
                    error = %post_error,
                    "failed to post configuration change"
                );
                return;
            }
        }
    }

    /// Inspects plugin settings about to be saved. Returns replacement settings when they
    /// need rewriting, or an error to block the save.
    pub async fn configuration_will_be_saved(
        &self,
        mut new_settings: Map<String, Value>,
    ) -> Result<Option<Map<String, Value>>, PluginError> {
        if self.configuration.get().disabled {
            return Ok(None);
        }

        let teams = match self.host.get_teams().await {
            Ok(teams) => teams,
            Err(teams_error) => {
                error!(
                    event_name = "plugin.configuration.teams_failed",
                    error = %teams_error,
                    "failed to query teams before configuration save"
                );
                return Ok(None);
            }
        };

        let settings: PluginSettings =
            match serde_json::from_value(Value::Object(new_settings.clone())) {
                Ok(settings) => settings,
                Err(decode_error) => {
                    error!(
                        event_name = "plugin.configuration.decode_failed",
                        error = %decode_error,
                        "failed to decode settings about to be saved"
                    );
                    return Ok(None);
                }
            };

        let invalid_username = settings.username == "invalid";
        let replace_username = settings.username == "replaceme";
        let message = if invalid_username {
            "Configuration won't be saved, invalid Username value used"
        } else if replace_username {
            "Configuration will be save, replacing Username value"
        } else {
            "Configuration will be saved"
        };

        for team in teams {
            if let Err(post_error) = self.post_plugin_message(&team.id, message).await {
                error!(
                    event_name = "plugin.configuration.notice_failed",
                    team_id = %team.id,
                    error = %post_error,
                    "failed to post configuration save notice"
                );
            }
        }

        if invalid_username {
            return Err(PluginError::ConfigurationRejected(message.to_owned()));
        }
        if replace_username {
            new_settings.remove("Username");
            new_settings.insert("username".to_owned(), json!("replaced"));
            return Ok(Some(new_settings));
        }
        Ok(None)
    }

    /// Stops the background job if one is running.
    pub(crate) async fn stop_job(&self) {
        if let Some(handle) = self.job.lock().await.take() {
            handle.close().await;
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use wabridge_core::plugin_config::{ConfigurationStore, PluginSettings};
    use wabridge_db::{InMemoryChannelRepository, InMemorySessionRepository};

    use super::{Plugin, PluginOptions};
    use crate::app::WhatsappApp;
    use crate::host::{InMemoryHost, ServerSettings, Team};

    pub(crate) struct Fixture {
        pub host: Arc<InMemoryHost>,
        pub plugin: Plugin,
        pub team: Team,
    }

    /// One team, default settings, configuration loaded.
    pub(crate) async fn configured() -> Fixture {
        let fixture = unconfigured().await;
        fixture.plugin.on_configuration_change().await.expect("configure");
        fixture
    }

    pub(crate) async fn unconfigured() -> Fixture {
        let host = Arc::new(InMemoryHost::new(
            ServerSettings::default(),
            PluginSettings::with_defaults(),
        ));
        let team = host.add_team("alpha", "Alpha").await;
        let app = Arc::new(WhatsappApp::new(
            host.clone(),
            Arc::new(InMemorySessionRepository::default()),
            Arc::new(InMemoryChannelRepository::default()),
            Arc::new(ConfigurationStore::new()),
        ));
        let plugin = Plugin::new(app, PluginOptions::default()).expect("plugin");
        Fixture { host, plugin, team }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Map, Value};

    use wabridge_core::plugin_config::PluginSettings;

    use super::testing::{configured, unconfigured};
    use super::{PluginError, CONFIGURATION_FILENAME, DEMO_POST_TYPE};
    use crate::host::{HostApi, HostError};

    #[tokio::test]
    async fn configuration_change_provisions_user_bot_and_channel() {
        let fixture = configured().await;
        let configuration = fixture.plugin.configuration();

        let demo_user = fixture.host.get_user(&configuration.demo_user_id).await.expect("user");
        assert_eq!(demo_user.username, "demo_plugin");
        assert_eq!(demo_user.email, "demo_plugin@example.com");
        assert_eq!(demo_user.last_name, "Plugin User");
        assert!(fixture.host.is_team_member(&fixture.team.id, &demo_user.id).await);

        let bot = fixture.host.get_user(&configuration.bot_user_id).await.expect("bot");
        assert!(bot.is_bot);
        assert!(configuration.whatsapp_access_token.is_some());

        let channel_id = configuration.demo_channel_for_team(&fixture.team.id).expect("channel");
        let channel = fixture.host.get_channel(channel_id).await.expect("channel");
        assert_eq!(channel.display_name, "Demo Plugin");

        let posts = fixture.host.posts_in(channel_id).await;
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].message, "OnConfigChange: loading new configuration");
        assert_eq!(posts[0].post_type, DEMO_POST_TYPE);
        assert_eq!(posts[0].props["username"], "demo_plugin");
        assert_eq!(posts[0].file_ids.len(), 1);
        let files = fixture.host.files().await;
        assert_eq!(files[0].0.name, CONFIGURATION_FILENAME);
    }

    #[tokio::test]
    async fn unchanged_settings_post_nothing_and_keep_ids() {
        let fixture = configured().await;
        let before = fixture.plugin.configuration();
        fixture.plugin.on_configuration_change().await.expect("reload");
        let after = fixture.plugin.configuration();

        assert_eq!(before.demo_user_id, after.demo_user_id);
        assert_eq!(before.demo_channel_ids, after.demo_channel_ids);
        assert_eq!(fixture.host.posts().await.len(), 1);
    }

    #[tokio::test]
    async fn last_name_change_updates_the_demo_user() {
        let fixture = configured().await;
        fixture
            .host
            .set_plugin_settings(PluginSettings {
                last_name: "Renamed".to_owned(),
                ..PluginSettings::with_defaults()
            })
            .await;
        fixture.plugin.on_configuration_change().await.expect("reload");

        let user = fixture
            .host
            .get_user(&fixture.plugin.configuration().demo_user_id)
            .await
            .expect("user");
        assert_eq!(user.last_name, "Renamed");
        let posts = fixture.host.posts().await;
        assert_eq!(posts.last().expect("diff post").props["lastname"], "Renamed");
    }

    #[tokio::test]
    async fn plugin_messages_are_styled_and_tagged() {
        let fixture = configured().await;
        fixture.plugin.configuration.update(|configuration| {
            configuration.settings.text_style = "_".to_owned();
            configuration.settings.enable_mention_user = true;
            configuration.settings.mention_user = "ops".to_owned();
        });

        fixture.plugin.post_plugin_message(&fixture.team.id, "hello").await.expect("post");
        let last = fixture.host.posts().await.pop().expect("post");
        assert_eq!(last.message, "_tag @ops | hello_");
        assert_eq!(last.user_id, fixture.plugin.configuration().demo_user_id);
    }

    #[tokio::test]
    async fn plugin_messages_need_a_demo_channel_and_skip_when_disabled() {
        let fixture = configured().await;
        let missing = fixture.plugin.post_plugin_message("no-team", "hello").await;
        assert!(matches!(missing, Err(HostError::NotFound { .. })));

        fixture.plugin.configuration.set_enabled(false);
        let before = fixture.host.posts().await.len();
        fixture.plugin.post_plugin_message("no-team", "hello").await.expect("no-op");
        assert_eq!(fixture.host.posts().await.len(), before);
    }

    fn settings(username: &str) -> Map<String, Value> {
        match json!({"Username": username, "ChannelName": "demo_plugin"}) {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn configuration_save_rejects_and_rewrites_usernames() {
        let fixture = configured().await;

        let rejected = fixture.plugin.configuration_will_be_saved(settings("invalid")).await;
        assert!(matches!(rejected, Err(PluginError::ConfigurationRejected(_))));

        let rewritten = fixture
            .plugin
            .configuration_will_be_saved(settings("replaceme"))
            .await
            .expect("rewrite")
            .expect("replacement");
        assert_eq!(rewritten["username"], "replaced");
        assert!(!rewritten.contains_key("Username"));

        let untouched = fixture.plugin.configuration_will_be_saved(settings("someone")).await;
        assert!(untouched.expect("accepted").is_none());

        let notices: Vec<_> =
            fixture.host.posts().await.into_iter().map(|post| post.message).collect();
        assert!(notices.contains(&"Configuration will be saved".to_owned()));
        assert!(notices
            .contains(&"Configuration won't be saved, invalid Username value used".to_owned()));
    }

    #[tokio::test]
    async fn missing_username_fails_configuration() {
        let fixture = unconfigured().await;
        fixture.host.set_plugin_settings(PluginSettings::default()).await;
        let error = fixture.plugin.on_configuration_change().await.expect_err("must fail");
        assert!(matches!(error, PluginError::Host(_)));
        assert!(!fixture.plugin.configuration.is_installed());
    }
}
