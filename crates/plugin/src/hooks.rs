//! The event surface the host drives. One method per host event; [`Plugin`] is the only
//! implementation.

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use crate::host::{CommandArgs, CommandResponse, FileInfo, HostChannel, Post, Reaction, User};
use crate::job::BackgroundJob;
use crate::plugin::{Plugin, PluginError};
use crate::reaction_webhook::{ReactionAction, ReactionWebhookPayload};
use crate::session_track::WebSocketRequest;
use crate::support::{support_packet, SupportFile};

/// Outcome of a hook that may let an object through, block it with a reason, or drop it
/// silently.
#[derive(Clone, Debug, PartialEq)]
pub enum HookVerdict<T> {
    Allow(T),
    Reject(String),
    Dismiss,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChannelMember {
    pub channel_id: String,
    pub user_id: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TeamMember {
    pub team_id: String,
    pub user_id: String,
}

#[async_trait]
pub trait PluginHooks: Send + Sync {
    async fn on_activate(&self) -> Result<(), PluginError>;
    async fn on_deactivate(&self) -> Result<(), PluginError>;
    async fn on_configuration_change(&self) -> Result<(), PluginError>;
    async fn configuration_will_be_saved(
        &self,
        settings: Map<String, Value>,
    ) -> Result<Option<Map<String, Value>>, PluginError>;

    async fn message_will_be_posted(&self, post: Post) -> HookVerdict<Post>;
    async fn message_will_be_updated(&self, new_post: Post, old_post: &Post) -> HookVerdict<Post>;
    async fn message_has_been_posted(&self, post: &Post);
    async fn message_has_been_updated(&self, new_post: &Post, old_post: &Post);

    async fn channel_has_been_created(&self, channel: &HostChannel);
    async fn user_has_joined_channel(&self, member: &ChannelMember, actor: Option<&User>);
    async fn user_has_left_channel(&self, member: &ChannelMember, actor: Option<&User>);
    async fn user_has_joined_team(&self, member: &TeamMember, actor: Option<&User>);
    async fn user_has_left_team(&self, member: &TeamMember, actor: Option<&User>);
    async fn user_has_been_created(&self, user: &User);
    async fn user_has_been_deactivated(&self, user: &User);

    async fn reaction_has_been_added(&self, reaction: &Reaction);
    async fn reaction_has_been_removed(&self, reaction: &Reaction);

    /// Returns a rejection reason to block the login.
    async fn user_will_log_in(&self, user: &User) -> Option<String>;
    async fn user_has_logged_in(&self, user: &User);

    /// Returns a rejection reason to block the upload.
    async fn file_will_be_uploaded(&self, info: &FileInfo, data: &[u8]) -> Option<String>;
    /// Returns a rejection reason to block the download.
    async fn file_will_be_downloaded(&self, info: &FileInfo, user_id: &str) -> Option<String>;

    async fn execute_command(&self, args: CommandArgs) -> CommandResponse;
    fn generate_support_data(&self) -> Vec<SupportFile>;

    fn web_socket_message_has_been_posted(
        &self,
        conn_id: &str,
        user_id: &str,
        request: &WebSocketRequest,
    );
    fn on_web_socket_disconnect(&self, conn_id: &str, user_id: &str);
}

impl Plugin {
    async fn notice_for_channel(&self, hook: &str, channel: &HostChannel, message: &str) {
        if let Err(post_error) = self.post_plugin_message(&channel.team_id, message).await {
            error!(
                event_name = "plugin.hook.notice_failed",
                hook,
                channel_id = %channel.id,
                error = %post_error,
                "failed to post plugin message"
            );
        }
    }

    async fn user_and_channel(
        &self,
        hook: &str,
        user_id: &str,
        channel_id: &str,
    ) -> Option<(User, HostChannel)> {
        let user = match self.host.get_user(user_id).await {
            Ok(user) => user,
            Err(lookup_error) => {
                error!(
                    event_name = "plugin.hook.user_failed",
                    hook,
                    user_id,
                    error = %lookup_error,
                    "failed to query user"
                );
                return None;
            }
        };
        match self.host.get_channel(channel_id).await {
            Ok(channel) => Some((user, channel)),
            Err(lookup_error) => {
                error!(
                    event_name = "plugin.hook.channel_failed",
                    hook,
                    channel_id,
                    error = %lookup_error,
                    "failed to query channel"
                );
                None
            }
        }
    }

    async fn membership_notice(&self, hook: &str, member: &ChannelMember) {
        if !self.is_enabled() {
            return;
        }
        if let Some((user, channel)) =
            self.user_and_channel(hook, &member.user_id, &member.channel_id).await
        {
            let message = format!("{hook}: @{}, ~{}", user.username, channel.name);
            self.notice_for_channel(hook, &channel, &message).await;
        }
    }

    async fn team_notice(&self, hook: &str, member: &TeamMember) {
        if !self.is_enabled() {
            return;
        }
        let user = match self.host.get_user(&member.user_id).await {
            Ok(user) => user,
            Err(lookup_error) => {
                error!(
                    event_name = "plugin.hook.user_failed",
                    hook,
                    user_id = %member.user_id,
                    error = %lookup_error,
                    "failed to query user"
                );
                return;
            }
        };
        let message = format!("{hook}: @{}", user.username);
        if let Err(post_error) = self.post_plugin_message(&member.team_id, &message).await {
            error!(
                event_name = "plugin.hook.notice_failed",
                hook,
                team_id = %member.team_id,
                error = %post_error,
                "failed to post plugin message"
            );
        }
    }

    /// Posts the secret notices for a message containing the configured secrets. Only new
    /// posts are checked for the secret number.
    async fn secret_notices(
        &self,
        hook: &str,
        message: &str,
        user: &User,
        channel: &HostChannel,
        check_number: bool,
    ) {
        let configuration = self.configuration.get();
        let settings = &configuration.settings;
        if !settings.random_secret.is_empty() && message.contains(&settings.random_secret) {
            let notice = format!(
                "The random secret {:?} has been entered by @{}!\n{}",
                settings.random_secret, user.username, settings.secret_message
            );
            self.notice_for_channel(hook, channel, &notice).await;
        }

        let number = settings.secret_number.to_string();
        if check_number && settings.secret_number != 0 && message.contains(&number) {
            let notice =
                format!("The random number {number} has been entered by @{}!", user.username);
            self.notice_for_channel(hook, channel, &notice).await;
        }
    }

    async fn reaction_changed(&self, action: ReactionAction, reaction: &Reaction) {
        if !self.is_enabled() {
            return;
        }
        let hook = action.hook_name();

        let post = match self.host.get_post(&reaction.post_id).await {
            Ok(post) => post,
            Err(lookup_error) => {
                error!(
                    event_name = "plugin.hook.post_failed",
                    hook,
                    post_id = %reaction.post_id,
                    error = %lookup_error,
                    "failed to query post"
                );
                return;
            }
        };
        let Some((user, channel)) =
            self.user_and_channel(hook, &reaction.user_id, &post.channel_id).await
        else {
            return;
        };

        let site_url = self.site_url().await;
        let message = format!(
            "{hook}: @{}, :{}:, [<jump to convo>]({site_url}/_redirect/pl/{})",
            user.username, reaction.emoji_name, reaction.post_id
        );
        self.notice_for_channel(hook, &channel, &message).await;

        let configuration = self.configuration.get();
        let settings = &configuration.settings;
        if !settings.has_valid_webhook_url() {
            if !settings.webhook_url.is_empty() {
                warn!(
                    event_name = "plugin.reaction_webhook.invalid_url",
                    "invalid reaction webhook URL configured"
                );
            }
            return;
        }
        match self.host.get_team(&channel.team_id).await {
            Ok(team) => {
                let payload = ReactionWebhookPayload::new(action, reaction, &user, &channel, &team);
                self.notifier.dispatch(settings.webhook_url.clone(), payload);
            }
            Err(lookup_error) => error!(
                event_name = "plugin.reaction_webhook.team_failed",
                team_id = %channel.team_id,
                error = %lookup_error,
                "failed to query team for reaction webhook"
            ),
        }
    }

    async fn post_lifecycle_message(&self, message: &str) -> Result<(), PluginError> {
        let configuration = self.configuration.get();
        for team in self.host.get_teams().await? {
            if configuration.demo_channel_for_team(&team.id).is_none() {
                warn!(
                    event_name = "plugin.lifecycle.no_demo_channel",
                    team_id = %team.id,
                    "no demo channel id for team"
                );
                continue;
            }
            self.post_plugin_message(&team.id, message).await?;
        }
        Ok(())
    }

    async fn reject_download(&self, info: &FileInfo, user_id: &str, notice: String) {
        warn!(
            event_name = "plugin.file.download_rejected",
            file_name = %info.name,
            user_id,
            "file download rejected"
        );
        self.send_ephemeral_notice(user_id, &info.channel_id, &notice).await;
    }
}

#[async_trait]
impl PluginHooks for Plugin {
    async fn on_activate(&self) -> Result<(), PluginError> {
        self.check_required_server_configuration().await?;
        Plugin::on_configuration_change(self).await?;
        self.register_commands().await?;

        self.post_lifecycle_message(&format!("OnActivate: {}", self.options.plugin_id)).await?;

        let job = BackgroundJob::new(self.host.clone(), self.configuration.clone())
            .schedule(self.options.job_interval);
        if let Some(previous) = self.job.lock().await.replace(job) {
            previous.close().await;
        }
        info!(
            event_name = "plugin.activated",
            plugin_id = %self.options.plugin_id,
            "plugin activated"
        );
        Ok(())
    }

    async fn on_deactivate(&self) -> Result<(), PluginError> {
        self.stop_job().await;
        self.post_lifecycle_message(&format!("OnDeactivate: {}", self.options.plugin_id)).await?;
        info!(
            event_name = "plugin.deactivated",
            plugin_id = %self.options.plugin_id,
            "plugin deactivated"
        );
        Ok(())
    }

    async fn on_configuration_change(&self) -> Result<(), PluginError> {
        Plugin::on_configuration_change(self).await
    }

    async fn configuration_will_be_saved(
        &self,
        settings: Map<String, Value>,
    ) -> Result<Option<Map<String, Value>>, PluginError> {
        Plugin::configuration_will_be_saved(self, settings).await
    }

    async fn message_will_be_posted(&self, post: Post) -> HookVerdict<Post> {
        let configuration = self.configuration.get();
        if configuration.disabled {
            return HookVerdict::Allow(post);
        }
        if post.user_id == configuration.bot_user_id || post.user_id == configuration.demo_user_id
        {
            return HookVerdict::Allow(post);
        }

        if configuration.is_demo_channel(&post.channel_id) {
            let notice = Post::new(
                configuration.demo_user_id.clone(),
                post.channel_id.clone(),
                "Posting is not allowed in this channel.",
            );
            self.host.send_ephemeral_post(&post.user_id, notice).await;
            return HookVerdict::Reject("disallowing post in demo channel".to_owned());
        }

        let username = &configuration.settings.username;
        if !username.is_empty() && post.message.contains(&format!("@{username}")) {
            let notice = Post::new(
                configuration.demo_user_id.clone(),
                post.channel_id.clone(),
                "Shh! You must not talk about the demo plugin user.",
            );
            self.host.send_ephemeral_post(&post.user_id, notice).await;
            return HookVerdict::Dismiss;
        }

        HookVerdict::Allow(post)
    }

    async fn message_will_be_updated(&self, new_post: Post, _old_post: &Post) -> HookVerdict<Post> {
        let configuration = self.configuration.get();
        if configuration.disabled {
            return HookVerdict::Allow(new_post);
        }

        let username = &configuration.settings.username;
        if !username.is_empty() && new_post.message.contains(&format!("@{username}")) {
            let notice = Post::new(
                configuration.demo_user_id.clone(),
                new_post.channel_id.clone(),
                "You must not talk about the demo plugin user.",
            );
            self.host.send_ephemeral_post(&new_post.user_id, notice).await;
            return HookVerdict::Reject("disallowing mention of demo plugin user".to_owned());
        }

        HookVerdict::Allow(new_post)
    }

    async fn message_has_been_posted(&self, post: &Post) {
        let configuration = self.configuration.get();
        if configuration.disabled
            || post.user_id == configuration.bot_user_id
            || post.user_id == configuration.demo_user_id
        {
            return;
        }

        let hook = "MessageHasBeenPosted";
        let Some((user, channel)) =
            self.user_and_channel(hook, &post.user_id, &post.channel_id).await
        else {
            return;
        };
        let message = format!("{hook}: @{}, ~{}", user.username, channel.name);
        self.notice_for_channel(hook, &channel, &message).await;
        self.secret_notices(hook, &post.message, &user, &channel, true).await;
    }

    async fn message_has_been_updated(&self, new_post: &Post, _old_post: &Post) {
        let configuration = self.configuration.get();
        if configuration.disabled || new_post.user_id == configuration.demo_user_id {
            return;
        }

        let hook = "MessageHasBeenUpdated";
        let Some((user, channel)) =
            self.user_and_channel(hook, &new_post.user_id, &new_post.channel_id).await
        else {
            return;
        };
        let message = format!("{hook}: @{}, ~{}", user.username, channel.name);
        self.notice_for_channel(hook, &channel, &message).await;
        self.secret_notices(hook, &new_post.message, &user, &channel, false).await;
    }

    async fn channel_has_been_created(&self, channel: &HostChannel) {
        if !self.is_enabled() {
            return;
        }
        let hook = "ChannelHasBeenCreated";
        self.notice_for_channel(hook, channel, &format!("{hook}: ~{}", channel.name)).await;
    }

    async fn user_has_joined_channel(&self, member: &ChannelMember, _actor: Option<&User>) {
        self.membership_notice("UserHasJoinedChannel", member).await;
    }

    async fn user_has_left_channel(&self, member: &ChannelMember, _actor: Option<&User>) {
        self.membership_notice("UserHasLeftChannel", member).await;
    }

    async fn user_has_joined_team(&self, member: &TeamMember, _actor: Option<&User>) {
        self.team_notice("UserHasJoinedTeam", member).await;
    }

    async fn user_has_left_team(&self, member: &TeamMember, _actor: Option<&User>) {
        self.team_notice("UserHasLeftTeam", member).await;
    }

    async fn user_has_been_created(&self, user: &User) {
        if !self.is_enabled() {
            return;
        }
        let message = format!("User_ID @{} has been created in", user.id);
        self.broadcast_plugin_message("UserHasBeenCreated", &message).await;
    }

    async fn user_has_been_deactivated(&self, user: &User) {
        if !self.is_enabled() {
            return;
        }
        let message = format!("UserHasBeenDeactivated: @{}", user.username);
        self.broadcast_plugin_message("UserHasBeenDeactivated", &message).await;
    }

    async fn reaction_has_been_added(&self, reaction: &Reaction) {
        self.reaction_changed(ReactionAction::Added, reaction).await;
    }

    async fn reaction_has_been_removed(&self, reaction: &Reaction) {
        self.reaction_changed(ReactionAction::Removed, reaction).await;
    }

    async fn user_will_log_in(&self, user: &User) -> Option<String> {
        let configuration = self.configuration.get();
        if !configuration.settings.username.is_empty()
            && user.username == configuration.settings.username
        {
            return Some("the demo user is not allowed to login".to_owned());
        }
        None
    }

    async fn user_has_logged_in(&self, user: &User) {
        let configuration = self.configuration.get();
        let teams = match self.host.get_teams().await {
            Ok(teams) => teams,
            Err(teams_error) => {
                error!(
                    event_name = "plugin.hook.teams_failed",
                    hook = "UserHasLoggedIn",
                    error = %teams_error,
                    "failed to query teams"
                );
                return;
            }
        };

        for team in teams {
            let Some(channel_id) = configuration.demo_channel_for_team(&team.id) else {
                continue;
            };
            let post = Post::new(
                configuration.demo_user_id.clone(),
                channel_id,
                format!("User @{} has logged in", user.username),
            );
            if let Err(post_error) = self.host.create_post(post).await {
                error!(
                    event_name = "plugin.hook.notice_failed",
                    hook = "UserHasLoggedIn",
                    team_id = %team.id,
                    error = %post_error,
                    "failed to post login message"
                );
            }
        }
    }

    async fn file_will_be_uploaded(&self, info: &FileInfo, data: &[u8]) -> Option<String> {
        if !self.is_enabled() {
            return Some("Configuration is disabled".to_owned());
        }

        let teams = match self.host.get_teams().await {
            Ok(teams) => teams,
            Err(teams_error) => {
                error!(
                    event_name = "plugin.hook.teams_failed",
                    hook = "FileWillBeUploaded",
                    error = %teams_error,
                    "failed to query teams"
                );
                return Some("Failed to query teams".to_owned());
            }
        };

        if data.is_empty() {
            error!(
                event_name = "plugin.file.empty_upload",
                file_name = %info.name,
                "uploaded file has zero size"
            );
            return Some("Upload Failed as file has zero size".to_owned());
        }

        let message = format!("FileName @{} has been created in", info.name);
        for team in teams {
            if let Err(post_error) = self.post_plugin_message(&team.id, &message).await {
                error!(
                    event_name = "plugin.hook.notice_failed",
                    hook = "FileWillBeUploaded",
                    team_id = %team.id,
                    error = %post_error,
                    "failed to post plugin message"
                );
            }
        }
        None
    }

    async fn file_will_be_downloaded(&self, info: &FileInfo, user_id: &str) -> Option<String> {
        let configuration = self.configuration.get();
        if configuration.disabled {
            return None;
        }

        info!(
            event_name = "plugin.file.download_attempted",
            file_name = %info.name,
            file_id = %info.id,
            user_id,
            "file download attempted"
        );

        if configuration.settings.reject_all_file_downloads {
            let notice = format!(
                "Download of file '{}' was rejected. All file downloads are currently disabled \
                 for testing purposes.",
                info.name
            );
            self.reject_download(info, user_id, notice).await;
            return Some("All file downloads are currently disabled for testing".to_owned());
        }

        if info.name.to_lowercase().ends_with(".mp4") {
            let notice = format!(
                "Download of file '{}' was rejected. MP4 files are not allowed to be downloaded.",
                info.name
            );
            self.reject_download(info, user_id, notice).await;
            return Some("Downloading MP4 files is not allowed".to_owned());
        }

        None
    }

    async fn execute_command(&self, args: CommandArgs) -> CommandResponse {
        Plugin::execute_command(self, args).await
    }

    fn generate_support_data(&self) -> Vec<SupportFile> {
        support_packet()
    }

    fn web_socket_message_has_been_posted(
        &self,
        conn_id: &str,
        user_id: &str,
        request: &WebSocketRequest,
    ) {
        if request.session_id.is_empty() {
            return;
        }
        debug!(event_name = "plugin.websocket.track", conn_id, user_id, action = %request.action);
        self.sessions.track(&request.session_id, conn_id);
    }

    fn on_web_socket_disconnect(&self, conn_id: &str, user_id: &str) {
        let removed = self.sessions.disconnect(conn_id);
        debug!(event_name = "plugin.websocket.disconnect", conn_id, user_id, removed);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::extract::State;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::Value;
    use tokio::sync::Mutex;

    use super::{ChannelMember, HookVerdict, PluginHooks, TeamMember};
    use crate::host::{FileInfo, HostApi, HostChannel, Post, Reaction, ServerSettings, User};
    use crate::plugin::testing::{configured, unconfigured, Fixture};
    use crate::plugin::PluginError;
    use crate::session_track::WebSocketRequest;

    async fn demo_channel(fixture: &Fixture) -> String {
        fixture
            .plugin
            .configuration()
            .demo_channel_for_team(&fixture.team.id)
            .map(str::to_owned)
            .expect("demo channel")
    }

    async fn town_square(fixture: &Fixture) -> HostChannel {
        fixture
            .host
            .create_channel(HostChannel {
                team_id: fixture.team.id.clone(),
                name: "town-square".to_owned(),
                display_name: "Town Square".to_owned(),
                ..HostChannel::default()
            })
            .await
            .expect("channel")
    }

    async fn last_message(fixture: &Fixture) -> String {
        fixture.host.posts().await.pop().map(|post| post.message).unwrap_or_default()
    }

    async fn alice(fixture: &Fixture) -> User {
        fixture.host.add_user(User { username: "alice".to_owned(), ..User::default() }).await
    }

    #[tokio::test]
    async fn activation_announces_registers_and_schedules() {
        let fixture = unconfigured().await;
        fixture.plugin.on_activate().await.expect("activate");

        let channel_id = demo_channel(&fixture).await;
        let messages: Vec<_> = fixture
            .host
            .posts_in(&channel_id)
            .await
            .into_iter()
            .map(|post| post.message)
            .collect();
        assert_eq!(
            messages.last().map(String::as_str),
            Some("OnActivate: com.mattermost.whatsapp-bridge")
        );
        assert!(fixture.host.commands().await.iter().any(|command| command.trigger == "dialog"));
        assert!(fixture.plugin.job.lock().await.is_some());

        fixture.plugin.on_deactivate().await.expect("deactivate");
        assert_eq!(last_message(&fixture).await, "OnDeactivate: com.mattermost.whatsapp-bridge");
        assert!(fixture.plugin.job.lock().await.is_none());
    }

    #[tokio::test]
    async fn activation_requires_gif_picker_and_public_links() {
        let fixture = unconfigured().await;
        fixture
            .host
            .set_server_settings(ServerSettings {
                enable_public_link: false,
                ..ServerSettings::default()
            })
            .await;

        let error = fixture.plugin.on_activate().await.expect_err("must fail");
        assert!(matches!(error, PluginError::IncompatibleServer(_)));
        assert!(fixture.host.posts().await.is_empty());
    }

    #[tokio::test]
    async fn posts_in_demo_channel_are_rejected_and_mentions_dismissed() {
        let fixture = configured().await;
        let demo = demo_channel(&fixture).await;
        let square = town_square(&fixture).await;

        let verdict =
            fixture.plugin.message_will_be_posted(Post::new("u1", demo.clone(), "hello")).await;
        assert_eq!(verdict, HookVerdict::Reject("disallowing post in demo channel".to_owned()));

        let verdict = fixture
            .plugin
            .message_will_be_posted(Post::new("u1", square.id.clone(), "hey @demo_plugin"))
            .await;
        assert_eq!(verdict, HookVerdict::Dismiss);

        let ordinary = Post::new("u1", square.id.clone(), "hello");
        let verdict = fixture.plugin.message_will_be_posted(ordinary.clone()).await;
        assert_eq!(verdict, HookVerdict::Allow(ordinary));

        let bot_id = fixture.plugin.configuration().bot_user_id.clone();
        let from_bot = Post::new(bot_id, demo, "hello");
        let verdict = fixture.plugin.message_will_be_posted(from_bot.clone()).await;
        assert_eq!(verdict, HookVerdict::Allow(from_bot));

        let notices: Vec<_> = fixture
            .host
            .ephemeral_posts()
            .await
            .into_iter()
            .map(|(user, post)| (user, post.message))
            .collect();
        assert_eq!(
            notices,
            vec![
                ("u1".to_owned(), "Posting is not allowed in this channel.".to_owned()),
                ("u1".to_owned(), "Shh! You must not talk about the demo plugin user.".to_owned()),
            ]
        );
    }

    #[tokio::test]
    async fn edits_mentioning_the_demo_user_are_rejected() {
        let fixture = configured().await;
        let old = Post::new("u1", "c1", "hi");
        let mention = Post::new("u1", "c1", "@demo_plugin");
        let verdict = fixture.plugin.message_will_be_updated(mention, &old).await;
        assert_eq!(
            verdict,
            HookVerdict::Reject("disallowing mention of demo plugin user".to_owned())
        );

        fixture.plugin.configuration.set_enabled(false);
        let edited = Post::new("u1", "c1", "@demo_plugin");
        let verdict = fixture.plugin.message_will_be_updated(edited.clone(), &old).await;
        assert_eq!(verdict, HookVerdict::Allow(edited));
    }

    #[tokio::test]
    async fn posted_messages_announce_secrets() {
        let fixture = configured().await;
        fixture.plugin.configuration.update(|configuration| {
            configuration.settings.random_secret = "sesame".to_owned();
            configuration.settings.secret_message = "open".to_owned();
            configuration.settings.secret_number = 7;
        });
        let alice = alice(&fixture).await;
        let square = town_square(&fixture).await;

        fixture
            .plugin
            .message_has_been_posted(&Post::new(alice.id.clone(), square.id.clone(), "sesame 7"))
            .await;

        let messages: Vec<_> =
            fixture.host.posts().await.into_iter().map(|post| post.message).collect();
        let tail = &messages[messages.len() - 3..];
        assert_eq!(tail[0], "MessageHasBeenPosted: @alice, ~town-square");
        assert_eq!(tail[1], "The random secret \"sesame\" has been entered by @alice!\nopen");
        assert_eq!(tail[2], "The random number 7 has been entered by @alice!");

        fixture
            .plugin
            .message_has_been_updated(
                &Post::new(alice.id, square.id, "7 only"),
                &Post::default(),
            )
            .await;
        assert_eq!(last_message(&fixture).await, "MessageHasBeenUpdated: @alice, ~town-square");
    }

    #[tokio::test]
    async fn membership_hooks_post_notices() {
        let fixture = configured().await;
        let alice = alice(&fixture).await;
        let square = town_square(&fixture).await;

        fixture.plugin.channel_has_been_created(&square).await;
        assert_eq!(last_message(&fixture).await, "ChannelHasBeenCreated: ~town-square");

        let member = ChannelMember { channel_id: square.id.clone(), user_id: alice.id.clone() };
        fixture.plugin.user_has_joined_channel(&member, None).await;
        assert_eq!(last_message(&fixture).await, "UserHasJoinedChannel: @alice, ~town-square");
        fixture.plugin.user_has_left_channel(&member, None).await;
        assert_eq!(last_message(&fixture).await, "UserHasLeftChannel: @alice, ~town-square");

        let member = TeamMember { team_id: fixture.team.id.clone(), user_id: alice.id.clone() };
        fixture.plugin.user_has_joined_team(&member, None).await;
        assert_eq!(last_message(&fixture).await, "UserHasJoinedTeam: @alice");
        fixture.plugin.user_has_left_team(&member, None).await;
        assert_eq!(last_message(&fixture).await, "UserHasLeftTeam: @alice");

        fixture.plugin.user_has_been_created(&alice).await;
        let created = format!("User_ID @{} has been created in", alice.id);
        assert_eq!(last_message(&fixture).await, created);
        fixture.plugin.user_has_been_deactivated(&alice).await;
        assert_eq!(last_message(&fixture).await, "UserHasBeenDeactivated: @alice");
    }

    #[tokio::test]
    async fn disabled_plugin_stays_quiet() {
        let fixture = configured().await;
        fixture.plugin.configuration.set_enabled(false);
        let before = fixture.host.posts().await.len();
        let square = town_square(&fixture).await;

        fixture.plugin.channel_has_been_created(&square).await;
        let alice = alice(&fixture).await;
        fixture.plugin.user_has_been_created(&alice).await;

        assert_eq!(fixture.host.posts().await.len(), before);
    }

    type Received = Arc<Mutex<Vec<Value>>>;

    async fn record(State(received): State<Received>, Json(body): Json<Value>) {
        received.lock().await.push(body);
    }

    async fn capture_server() -> (String, Received) {
        let received = Received::default();
        let app = Router::new().route("/hook", post(record)).with_state(received.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let address = listener.local_addr().expect("address");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve");
        });
        (format!("http://{address}/hook"), received)
    }

    #[tokio::test]
    async fn reactions_post_a_jump_link_and_call_the_webhook() {
        let fixture = configured().await;
        let (url, received) = capture_server().await;
        fixture.plugin.configuration.update(|configuration| {
            configuration.settings.webhook_url = url.clone();
        });
        let alice = alice(&fixture).await;
        let square = town_square(&fixture).await;
        let target =
            fixture.host.create_post(Post::new(alice.id.clone(), square.id, "nice")).await;
        let target = target.expect("post");

        let reaction = Reaction {
            user_id: alice.id.clone(),
            post_id: target.id.clone(),
            emoji_name: "tada".to_owned(),
            create_at: 42,
        };
        fixture.plugin.reaction_has_been_added(&reaction).await;
        let jump = format!("http://localhost:8065/_redirect/pl/{}", target.id);
        assert_eq!(
            last_message(&fixture).await,
            format!("ReactionHasBeenAdded: @alice, :tada:, [<jump to convo>]({jump})")
        );

        for _ in 0..50 {
            if !received.lock().await.is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        let received = received.lock().await;
        assert_eq!(received.len(), 1);
        assert_eq!(received[0]["action"], "reaction_added");
        assert_eq!(received[0]["team_name"], "alpha");
        assert_eq!(received[0]["channel_name"], "town-square");
        assert_eq!(received[0]["timestamp"], 42);
    }

    #[tokio::test]
    async fn the_demo_user_cannot_log_in() {
        let fixture = configured().await;
        let demo = User { username: "demo_plugin".to_owned(), ..User::default() };
        assert_eq!(
            fixture.plugin.user_will_log_in(&demo).await.as_deref(),
            Some("the demo user is not allowed to login")
        );
        let alice = alice(&fixture).await;
        assert!(fixture.plugin.user_will_log_in(&alice).await.is_none());

        fixture.plugin.user_has_logged_in(&alice).await;
        let post = fixture.host.posts().await.pop().expect("post");
        assert_eq!(post.message, "User @alice has logged in");
        assert_eq!(post.user_id, fixture.plugin.configuration().demo_user_id);
    }

    #[tokio::test]
    async fn uploads_need_content_and_an_enabled_plugin() {
        let fixture = configured().await;
        let info = FileInfo { name: "notes.txt".to_owned(), ..FileInfo::default() };

        assert_eq!(
            fixture.plugin.file_will_be_uploaded(&info, b"").await.as_deref(),
            Some("Upload Failed as file has zero size")
        );
        assert!(fixture.plugin.file_will_be_uploaded(&info, b"data").await.is_none());
        assert_eq!(last_message(&fixture).await, "FileName @notes.txt has been created in");

        fixture.plugin.configuration.set_enabled(false);
        assert_eq!(
            fixture.plugin.file_will_be_uploaded(&info, b"data").await.as_deref(),
            Some("Configuration is disabled")
        );
    }

    #[tokio::test]
    async fn downloads_reject_mp4_or_everything() {
        let fixture = configured().await;
        let clip = FileInfo {
            name: "Clip.MP4".to_owned(),
            channel_id: "c1".to_owned(),
            ..FileInfo::default()
        };
        let text = FileInfo { name: "a.txt".to_owned(), ..FileInfo::default() };

        assert_eq!(
            fixture.plugin.file_will_be_downloaded(&clip, "u1").await.as_deref(),
            Some("Downloading MP4 files is not allowed")
        );
        assert!(fixture.plugin.file_will_be_downloaded(&text, "u1").await.is_none());

        fixture.plugin.configuration.update(|configuration| {
            configuration.settings.reject_all_file_downloads = true;
        });
        assert_eq!(
            fixture.plugin.file_will_be_downloaded(&text, "u1").await.as_deref(),
            Some("All file downloads are currently disabled for testing")
        );

        let notices = fixture.host.ephemeral_posts().await;
        assert_eq!(
            notices[0].1.message,
            "Download of file 'Clip.MP4' was rejected. MP4 files are not allowed to be downloaded."
        );
        assert!(notices[1].1.message.ends_with("disabled for testing purposes."));
    }

    #[tokio::test]
    async fn websocket_hooks_track_sessions() {
        let fixture = configured().await;
        let request = WebSocketRequest {
            seq: 1,
            action: "user_typing".to_owned(),
            session_id: "s1".to_owned(),
        };
        fixture.plugin.web_socket_message_has_been_posted("conn-1", "u1", &request);
        fixture.plugin.web_socket_message_has_been_posted(
            "conn-2",
            "u1",
            &WebSocketRequest { session_id: String::new(), ..request.clone() },
        );
        assert_eq!(fixture.plugin.sessions().connection_for("s1").as_deref(), Some("conn-1"));
        assert_eq!(fixture.plugin.sessions().len(), 1);

        fixture.plugin.on_web_socket_disconnect("conn-1", "u1");
        assert!(fixture.plugin.sessions().is_empty());

        let files = fixture.plugin.generate_support_data();
        assert_eq!(files[0].filename, "demo_plugin_support_packet.txt");
    }
}
