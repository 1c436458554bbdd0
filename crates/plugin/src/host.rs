//! The slice of the chat host's plugin API this bridge depends on.
//!
//! [`HostApi`] is the seam between the plugin and whatever runtime hosts it. The
//! [`InMemoryHost`] implementation keeps every entity in process memory and is used by the
//! standalone server and by tests.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::RwLock;

use wabridge_core::errors::ApplicationError;
use wabridge_core::ids::new_id;
use wabridge_core::plugin_config::PluginSettings;

use crate::autocomplete::AutocompleteData;
use crate::dialogs::OpenDialogRequest;

pub const SYSTEM_ADMIN_ROLE: &str = "system_admin";
pub const SYSTEM_GUEST_ROLE: &str = "system_guest";
pub const SYSTEM_USER_ROLE: &str = "system_user";

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum HostError {
    #[error("{entity} `{key}` not found")]
    NotFound { entity: &'static str, key: String },
    #[error("{0} already exists")]
    AlreadyExists(String),
    #[error("host rejected request: {0}")]
    Rejected(String),
}

impl HostError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    fn not_found(entity: &'static str, key: &str) -> Self {
        Self::NotFound { entity, key: key.to_owned() }
    }
}

impl From<HostError> for ApplicationError {
    fn from(value: HostError) -> Self {
        match value {
            HostError::NotFound { entity, key } => ApplicationError::Domain(
                wabridge_core::errors::DomainError::NotFound { entity, id: key },
            ),
            other => ApplicationError::Integration(other.to_string()),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    pub nickname: String,
    pub first_name: String,
    pub last_name: String,
    pub position: String,
    /// Space separated role names, as the host stores them.
    pub roles: String,
    pub is_bot: bool,
}

impl User {
    fn has_role(&self, role: &str) -> bool {
        self.roles.split_whitespace().any(|candidate| candidate == role)
    }

    pub fn is_guest(&self) -> bool {
        self.has_role(SYSTEM_GUEST_ROLE)
    }

    pub fn is_system_admin(&self) -> bool {
        self.has_role(SYSTEM_ADMIN_ROLE)
    }

    /// First and last name joined by a space, skipping whichever is empty.
    pub fn full_name(&self) -> String {
        [self.first_name.as_str(), self.last_name.as_str()]
            .into_iter()
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    pub id: String,
    pub name: String,
    pub display_name: String,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelType {
    #[default]
    #[serde(rename = "O")]
    Open,
    #[serde(rename = "P")]
    Private,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HostChannel {
    pub id: String,
    pub team_id: String,
    pub name: String,
    pub display_name: String,
    pub header: String,
    pub purpose: String,
    #[serde(rename = "type")]
    pub channel_type: ChannelType,
    pub props: Map<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub user_id: String,
    pub channel_id: String,
    pub root_id: String,
    pub message: String,
    #[serde(rename = "type")]
    pub post_type: String,
    pub props: Map<String, Value>,
    pub file_ids: Vec<String>,
    pub create_at: i64,
}

impl Post {
    pub fn new(
        user_id: impl Into<String>,
        channel_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            channel_id: channel_id.into(),
            message: message.into(),
            ..Self::default()
        }
    }

    pub fn with_root(mut self, root_id: impl Into<String>) -> Self {
        self.root_id = root_id.into();
        self
    }

    pub fn with_type(mut self, post_type: impl Into<String>) -> Self {
        self.post_type = post_type.into();
        self
    }

    pub fn with_props(mut self, props: Map<String, Value>) -> Self {
        self.props = props;
        self
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reaction {
    pub user_id: String,
    pub post_id: String,
    pub emoji_name: String,
    pub create_at: i64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub id: String,
    pub channel_id: String,
    pub name: String,
    pub size: u64,
}

/// Host-wide settings the plugin inspects.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSettings {
    pub site_url: String,
    pub enable_gif_picker: bool,
    pub enable_public_link: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            site_url: "http://localhost:8065".to_owned(),
            enable_gif_picker: true,
            enable_public_link: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BotSpec {
    pub username: String,
    pub display_name: String,
    pub description: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub trigger: String,
    pub auto_complete: bool,
    pub auto_complete_hint: String,
    pub auto_complete_desc: String,
    pub display_name: String,
    pub autocomplete_data: Option<AutocompleteData>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandArgs {
    pub command: String,
    pub user_id: String,
    pub channel_id: String,
    pub team_id: String,
    pub root_id: String,
    pub trigger_id: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseType {
    Ephemeral,
    InChannel,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_type: Option<ResponseType>,
    pub text: String,
}

impl CommandResponse {
    pub fn ephemeral(text: impl Into<String>) -> Self {
        Self { response_type: Some(ResponseType::Ephemeral), text: text.into() }
    }

    pub fn empty() -> Self {
        Self::default()
    }
}

/// Restricts a websocket event to one user; `None` broadcasts to everyone.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebsocketBroadcast {
    pub user_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WebsocketEvent {
    pub event: String,
    pub payload: Value,
    pub broadcast: WebsocketBroadcast,
}

#[async_trait]
pub trait HostApi: Send + Sync {
    async fn server_settings(&self) -> Result<ServerSettings, HostError>;

    /// Current values of the plugin's settings page.
    async fn load_plugin_settings(&self) -> Result<PluginSettings, HostError>;

    async fn get_user(&self, user_id: &str) -> Result<User, HostError>;
    async fn get_user_by_username(&self, username: &str) -> Result<User, HostError>;
    async fn create_user(&self, user: User) -> Result<User, HostError>;
    async fn update_user(&self, user: User) -> Result<User, HostError>;

    /// Returns the id of the bot with the given username, creating it when missing.
    async fn ensure_bot(&self, bot: BotSpec) -> Result<String, HostError>;
    async fn create_user_access_token(
        &self,
        user_id: &str,
        description: &str,
    ) -> Result<String, HostError>;

    async fn get_teams(&self) -> Result<Vec<Team>, HostError>;
    async fn get_team(&self, team_id: &str) -> Result<Team, HostError>;
    async fn create_team_member(&self, team_id: &str, user_id: &str) -> Result<(), HostError>;

    async fn get_channel(&self, channel_id: &str) -> Result<HostChannel, HostError>;
    async fn get_channel_by_name(
        &self,
        team_id: &str,
        name: &str,
    ) -> Result<HostChannel, HostError>;
    async fn create_channel(&self, channel: HostChannel) -> Result<HostChannel, HostError>;

    async fn create_post(&self, post: Post) -> Result<Post, HostError>;
    async fn get_post(&self, post_id: &str) -> Result<Post, HostError>;
    async fn send_ephemeral_post(&self, user_id: &str, post: Post) -> Post;
    async fn update_ephemeral_post(&self, user_id: &str, post: Post) -> Post;
    async fn delete_ephemeral_post(&self, user_id: &str, post_id: &str);

    async fn upload_file(
        &self,
        data: Vec<u8>,
        channel_id: &str,
        filename: &str,
    ) -> Result<FileInfo, HostError>;

    async fn publish_websocket_event(
        &self,
        event: &str,
        payload: Value,
        broadcast: WebsocketBroadcast,
    );

    async fn register_command(&self, command: Command) -> Result<(), HostError>;
    async fn open_interactive_dialog(&self, request: OpenDialogRequest) -> Result<(), HostError>;

    async fn kv_get(&self, key: &str) -> Result<Option<Vec<u8>>, HostError>;
    async fn kv_set(&self, key: &str, value: Vec<u8>) -> Result<(), HostError>;
    async fn kv_delete(&self, key: &str) -> Result<(), HostError>;

    /// Writes `new` only when the stored value equals `old` (`None` meaning absent).
    async fn kv_compare_and_set(
        &self,
        key: &str,
        old: Option<&[u8]>,
        new: &[u8],
    ) -> Result<bool, HostError>;

    /// Deletes `key` only when the stored value equals `old`.
    async fn kv_compare_and_delete(&self, key: &str, old: &[u8]) -> Result<bool, HostError>;
}

#[derive(Default)]
struct HostState {
    server_settings: ServerSettings,
    plugin_settings: PluginSettings,
    users: HashMap<String, User>,
    teams: Vec<Team>,
    team_members: BTreeSet<(String, String)>,
    channels: HashMap<String, HostChannel>,
    posts: Vec<Post>,
    ephemeral_posts: Vec<(String, Post)>,
    files: Vec<(FileInfo, Vec<u8>)>,
    events: Vec<WebsocketEvent>,
    commands: Vec<Command>,
    dialogs: Vec<OpenDialogRequest>,
    kv: HashMap<String, Vec<u8>>,
    access_tokens: Vec<(String, String)>,
}

/// A process-local host. Everything lives behind one lock, so each call observes a
/// consistent state.
#[derive(Default)]
pub struct InMemoryHost {
    state: RwLock<HostState>,
    reject_posts: AtomicBool,
}

impl InMemoryHost {
    pub fn new(server_settings: ServerSettings, plugin_settings: PluginSettings) -> Self {
        Self {
            state: RwLock::new(HostState {
                server_settings,
                plugin_settings,
                ..HostState::default()
            }),
            reject_posts: AtomicBool::new(false),
        }
    }

    pub async fn add_team(&self, name: &str, display_name: &str) -> Team {
        let team =
            Team { id: new_id(), name: name.to_owned(), display_name: display_name.to_owned() };
        self.state.write().await.teams.push(team.clone());
        team
    }

    /// Registers `user`, assigning an id when it has none.
    pub async fn add_user(&self, mut user: User) -> User {
        if user.id.is_empty() {
            user.id = new_id();
        }
        self.state.write().await.users.insert(user.id.clone(), user.clone());
        user
    }

    pub async fn set_server_settings(&self, settings: ServerSettings) {
        self.state.write().await.server_settings = settings;
    }

    pub async fn set_plugin_settings(&self, settings: PluginSettings) {
        self.state.write().await.plugin_settings = settings;
    }

    /// Makes every subsequent `create_post` fail until switched back off.
    pub fn set_reject_posts(&self, reject: bool) {
        self.reject_posts.store(reject, Ordering::SeqCst);
    }

    pub async fn posts(&self) -> Vec<Post> {
        self.state.read().await.posts.clone()
    }

    pub async fn posts_in(&self, channel_id: &str) -> Vec<Post> {
        self.state
            .read()
            .await
            .posts
            .iter()
            .filter(|post| post.channel_id == channel_id)
            .cloned()
            .collect()
    }

    pub async fn ephemeral_posts(&self) -> Vec<(String, Post)> {
        self.state.read().await.ephemeral_posts.clone()
    }

    pub async fn channels(&self) -> Vec<HostChannel> {
        self.state.read().await.channels.values().cloned().collect()
    }

    pub async fn events(&self) -> Vec<WebsocketEvent> {
        self.state.read().await.events.clone()
    }

    pub async fn commands(&self) -> Vec<Command> {
        self.state.read().await.commands.clone()
    }

    pub async fn dialogs(&self) -> Vec<OpenDialogRequest> {
        self.state.read().await.dialogs.clone()
    }

    pub async fn files(&self) -> Vec<(FileInfo, Vec<u8>)> {
        self.state.read().await.files.clone()
    }

    pub async fn is_team_member(&self, team_id: &str, user_id: &str) -> bool {
        self.state.read().await.team_members.contains(&(team_id.to_owned(), user_id.to_owned()))
    }

    pub async fn users(&self) -> Vec<User> {
        self.state.read().await.users.values().cloned().collect()
    }
}

#[async_trait]
impl HostApi for InMemoryHost {
    async fn server_settings(&self) -> Result<ServerSettings, HostError> {
        Ok(self.state.read().await.server_settings.clone())
    }

    async fn load_plugin_settings(&self) -> Result<PluginSettings, HostError> {
        Ok(self.state.read().await.plugin_settings.clone())
    }

    async fn get_user(&self, user_id: &str) -> Result<User, HostError> {
        self.state
            .read()
            .await
            .users
            .get(user_id)
            .cloned()
            .ok_or_else(|| HostError::not_found("user", user_id))
    }

    async fn get_user_by_username(&self, username: &str) -> Result<User, HostError> {
        self.state
            .read()
            .await
            .users
            .values()
            .find(|user| user.username == username)
            .cloned()
            .ok_or_else(|| HostError::not_found("user", username))
    }

    async fn create_user(&self, mut user: User) -> Result<User, HostError> {
        if user.username.is_empty() {
            return Err(HostError::Rejected("username is required".to_owned()));
        }

        let mut state = self.state.write().await;
        if state.users.values().any(|existing| existing.username == user.username) {
            return Err(HostError::AlreadyExists(format!("user `{}`", user.username)));
        }
        if user.id.is_empty() {
            user.id = new_id();
        }
        if user.roles.is_empty() {
            user.roles = SYSTEM_USER_ROLE.to_owned();
        }
        state.users.insert(user.id.clone(), user.clone());
        Ok(user)
    }

    async fn update_user(&self, user: User) -> Result<User, HostError> {
        let mut state = self.state.write().await;
        let existing =
            state.users.get_mut(&user.id).ok_or_else(|| HostError::not_found("user", &user.id))?;
        *existing = user.clone();
        Ok(user)
    }

    async fn ensure_bot(&self, bot: BotSpec) -> Result<String, HostError> {
        let mut state = self.state.write().await;
        if let Some(existing) = state.users.values().find(|user| user.username == bot.username) {
            if !existing.is_bot {
                return Err(HostError::AlreadyExists(format!(
                    "non-bot user `{}`",
                    existing.username
                )));
            }
            return Ok(existing.id.clone());
        }

        let user = User {
            id: new_id(),
            username: bot.username,
            nickname: bot.display_name,
            position: bot.description,
            roles: SYSTEM_USER_ROLE.to_owned(),
            is_bot: true,
            ..User::default()
        };
        let id = user.id.clone();
        state.users.insert(id.clone(), user);
        Ok(id)
    }

    async fn create_user_access_token(
        &self,
        user_id: &str,
        _description: &str,
    ) -> Result<String, HostError> {
        let mut state = self.state.write().await;
        if !state.users.contains_key(user_id) {
            return Err(HostError::not_found("user", user_id));
        }
        let token = new_id();
        state.access_tokens.push((user_id.to_owned(), token.clone()));
        Ok(token)
    }

    async fn get_teams(&self) -> Result<Vec<Team>, HostError> {
        Ok(self.state.read().await.teams.clone())
    }

    async fn get_team(&self, team_id: &str) -> Result<Team, HostError> {
        self.state
            .read()
            .await
            .teams
            .iter()
            .find(|team| team.id == team_id)
            .cloned()
            .ok_or_else(|| HostError::not_found("team", team_id))
    }

    async fn create_team_member(&self, team_id: &str, user_id: &str) -> Result<(), HostError> {
        let mut state = self.state.write().await;
        if !state.teams.iter().any(|team| team.id == team_id) {
            return Err(HostError::not_found("team", team_id));
        }
        if !state.users.contains_key(user_id) {
            return Err(HostError::not_found("user", user_id));
        }
        state.team_members.insert((team_id.to_owned(), user_id.to_owned()));
        Ok(())
    }

    async fn get_channel(&self, channel_id: &str) -> Result<HostChannel, HostError> {
        self.state
            .read()
            .await
            .channels
            .get(channel_id)
            .cloned()
            .ok_or_else(|| HostError::not_found("channel", channel_id))
    }

    async fn get_channel_by_name(
        &self,
        team_id: &str,
        name: &str,
    ) -> Result<HostChannel, HostError> {
        self.state
            .read()
            .await
            .channels
            .values()
            .find(|channel| channel.team_id == team_id && channel.name == name)
            .cloned()
            .ok_or_else(|| HostError::not_found("channel", name))
    }

    async fn create_channel(&self, mut channel: HostChannel) -> Result<HostChannel, HostError> {
        if channel.name.is_empty() {
            return Err(HostError::Rejected("channel name is required".to_owned()));
        }

        let mut state = self.state.write().await;
        if !state.teams.iter().any(|team| team.id == channel.team_id) {
            return Err(HostError::not_found("team", &channel.team_id));
        }
        if state
            .channels
            .values()
            .any(|existing| existing.team_id == channel.team_id && existing.name == channel.name)
        {
            return Err(HostError::AlreadyExists(format!("channel `{}`", channel.name)));
        }
        if channel.id.is_empty() {
            channel.id = new_id();
        }
        state.channels.insert(channel.id.clone(), channel.clone());
        Ok(channel)
    }

    async fn create_post(&self, mut post: Post) -> Result<Post, HostError> {
        if self.reject_posts.load(Ordering::SeqCst) {
            return Err(HostError::Rejected("post creation is disabled".to_owned()));
        }

        let mut state = self.state.write().await;
        if !state.channels.contains_key(&post.channel_id) {
            return Err(HostError::not_found("channel", &post.channel_id));
        }
        post.id = new_id();
        post.create_at = chrono::Utc::now().timestamp_millis();
        state.posts.push(post.clone());
        Ok(post)
    }

    async fn get_post(&self, post_id: &str) -> Result<Post, HostError> {
        self.state
            .read()
            .await
            .posts
            .iter()
            .find(|post| post.id == post_id)
            .cloned()
            .ok_or_else(|| HostError::not_found("post", post_id))
    }

    async fn send_ephemeral_post(&self, user_id: &str, mut post: Post) -> Post {
        if post.id.is_empty() {
            post.id = new_id();
        }
        post.create_at = chrono::Utc::now().timestamp_millis();
        self.state.write().await.ephemeral_posts.push((user_id.to_owned(), post.clone()));
        post
    }

    async fn update_ephemeral_post(&self, user_id: &str, post: Post) -> Post {
        let mut state = self.state.write().await;
        match state
            .ephemeral_posts
            .iter_mut()
            .find(|(owner, existing)| owner == user_id && existing.id == post.id)
        {
            Some((_, existing)) => *existing = post.clone(),
            None => state.ephemeral_posts.push((user_id.to_owned(), post.clone())),
        }
        post
    }

    async fn delete_ephemeral_post(&self, user_id: &str, post_id: &str) {
        self.state
            .write()
            .await
            .ephemeral_posts
            .retain(|(owner, post)| !(owner == user_id && post.id == post_id));
    }

    async fn upload_file(
        &self,
        data: Vec<u8>,
        channel_id: &str,
        filename: &str,
    ) -> Result<FileInfo, HostError> {
        let mut state = self.state.write().await;
        if !state.channels.contains_key(channel_id) {
            return Err(HostError::not_found("channel", channel_id));
        }
        let info = FileInfo {
            id: new_id(),
            channel_id: channel_id.to_owned(),
            name: filename.to_owned(),
            size: data.len() as u64,
        };
        state.files.push((info.clone(), data));
        Ok(info)
    }

    async fn publish_websocket_event(
        &self,
        event: &str,
        payload: Value,
        broadcast: WebsocketBroadcast,
    ) {
        self.state.write().await.events.push(WebsocketEvent {
            event: event.to_owned(),
            payload,
            broadcast,
        });
    }

    async fn register_command(&self, command: Command) -> Result<(), HostError> {
        let mut state = self.state.write().await;
        state.commands.retain(|existing| existing.trigger != command.trigger);
        state.commands.push(command);
        Ok(())
    }

    async fn open_interactive_dialog(&self, request: OpenDialogRequest) -> Result<(), HostError> {
        if request.trigger_id.is_empty() {
            return Err(HostError::Rejected("trigger id is required".to_owned()));
        }
        self.state.write().await.dialogs.push(request);
        Ok(())
    }

    async fn kv_get(&self, key: &str) -> Result<Option<Vec<u8>>, HostError> {
        Ok(self.state.read().await.kv.get(key).cloned())
    }

    async fn kv_set(&self, key: &str, value: Vec<u8>) -> Result<(), HostError> {
        self.state.write().await.kv.insert(key.to_owned(), value);
        Ok(())
    }

    async fn kv_delete(&self, key: &str) -> Result<(), HostError> {
        self.state.write().await.kv.remove(key);
        Ok(())
    }

    async fn kv_compare_and_set(
        &self,
        key: &str,
        old: Option<&[u8]>,
        new: &[u8],
    ) -> Result<bool, HostError> {
        let mut state = self.state.write().await;
        if state.kv.get(key).map(Vec::as_slice) != old {
            return Ok(false);
        }
        state.kv.insert(key.to_owned(), new.to_vec());
        Ok(true)
    }

    async fn kv_compare_and_delete(&self, key: &str, old: &[u8]) -> Result<bool, HostError> {
        let mut state = self.state.write().await;
        if state.kv.get(key).map(Vec::as_slice) != Some(old) {
            return Ok(false);
        }
        state.kv.remove(key);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::{
        BotSpec, HostApi, HostChannel, HostError, InMemoryHost, Post, ServerSettings, User,
    };
    use wabridge_core::plugin_config::PluginSettings;

    fn host() -> InMemoryHost {
        InMemoryHost::new(ServerSettings::default(), PluginSettings::with_defaults())
    }

    #[test]
    fn roles_drive_guest_and_admin_checks() {
        let admin = User { roles: "system_user system_admin".to_owned(), ..User::default() };
        let guest = User { roles: "system_guest".to_owned(), ..User::default() };

        assert!(admin.is_system_admin());
        assert!(!admin.is_guest());
        assert!(guest.is_guest());
        assert!(!guest.is_system_admin());
    }

    #[tokio::test]
    async fn channel_names_are_unique_per_team() {
        let host = host();
        let team = host.add_team("alpha", "Alpha").await;
        let channel = HostChannel {
            team_id: team.id.clone(),
            name: "whatsapp_1_555".to_owned(),
            ..HostChannel::default()
        };

        let created = host.create_channel(channel.clone()).await.expect("create");
        assert_eq!(created.id.len(), 26);
        assert!(matches!(
            host.create_channel(channel).await,
            Err(HostError::AlreadyExists(_))
        ));
        let found = host.get_channel_by_name(&team.id, "whatsapp_1_555").await.expect("by name");
        assert_eq!(found.id, created.id);
    }

    #[tokio::test]
    async fn posts_require_an_existing_channel() {
        let host = host();
        let missing = host.create_post(Post::new("u1", "nope", "hi")).await;
        assert!(missing.expect_err("must fail").is_not_found());

        let team = host.add_team("alpha", "Alpha").await;
        let channel = host
            .create_channel(HostChannel {
                team_id: team.id,
                name: "town-square".to_owned(),
                ..HostChannel::default()
            })
            .await
            .expect("channel");
        let post = host.create_post(Post::new("u1", &channel.id, "hi")).await.expect("post");
        assert_eq!(host.get_post(&post.id).await.expect("get").message, "hi");

        host.set_reject_posts(true);
        assert!(matches!(
            host.create_post(Post::new("u1", &channel.id, "again")).await,
            Err(HostError::Rejected(_))
        ));
    }

    #[tokio::test]
    async fn ensure_bot_is_idempotent() {
        let host = host();
        let spec = BotSpec {
            username: "whatsapp".to_owned(),
            display_name: "WhatsApp Bot".to_owned(),
            description: "The WhatsApp Bot".to_owned(),
        };
        let first = host.ensure_bot(spec.clone()).await.expect("first");
        let second = host.ensure_bot(spec).await.expect("second");
        assert_eq!(first, second);
        assert!(host.get_user(&first).await.expect("bot").is_bot);
    }

    #[tokio::test]
    async fn kv_compare_and_set_only_writes_expected_values() {
        let host = host();
        assert!(host.kv_compare_and_set("lock", None, b"a").await.expect("acquire"));
        assert!(!host.kv_compare_and_set("lock", None, b"b").await.expect("contended"));
        assert!(!host.kv_compare_and_delete("lock", b"b").await.expect("wrong holder"));
        assert!(host.kv_compare_and_delete("lock", b"a").await.expect("release"));
        assert_eq!(host.kv_get("lock").await.expect("get"), None);
    }
}
