//! Outbound notification of emoji reactions to an operator-configured URL.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::host::{HostChannel, Reaction, Team, User};

pub const REACTION_WEBHOOK_USER_AGENT: &str = "Mattermost-Reactions-Plugin/1.0";
pub const REACTION_WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReactionAction {
    Added,
    Removed,
}

impl ReactionAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Added => "reaction_added",
            Self::Removed => "reaction_removed",
        }
    }

    pub(crate) fn hook_name(&self) -> &'static str {
        match self {
            Self::Added => "ReactionHasBeenAdded",
            Self::Removed => "ReactionHasBeenRemoved",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionWebhookPayload {
    pub action: String,
    pub user_id: String,
    pub username: String,
    pub post_id: String,
    pub channel_id: String,
    pub channel_name: String,
    pub team_id: String,
    pub team_name: String,
    pub emoji_name: String,
    pub timestamp: i64,
}

impl ReactionWebhookPayload {
    pub fn new(
        action: ReactionAction,
        reaction: &Reaction,
        user: &User,
        channel: &HostChannel,
        team: &Team,
    ) -> Self {
        Self {
            action: action.as_str().to_owned(),
            user_id: reaction.user_id.clone(),
            username: user.username.clone(),
            post_id: reaction.post_id.clone(),
            channel_id: channel.id.clone(),
            channel_name: channel.name.clone(),
            team_id: channel.team_id.clone(),
            team_name: team.name.clone(),
            emoji_name: reaction.emoji_name.clone(),
            timestamp: reaction.create_at,
        }
    }
}

/// Posts [`ReactionWebhookPayload`]s as JSON with a bounded request timeout.
#[derive(Clone, Debug)]
pub struct ReactionNotifier {
    client: Client,
}

impl ReactionNotifier {
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(REACTION_WEBHOOK_TIMEOUT)
            .user_agent(REACTION_WEBHOOK_USER_AGENT)
            .build()?;
        Ok(Self { client })
    }

    pub async fn send(
        &self,
        url: &str,
        payload: &ReactionWebhookPayload,
    ) -> Result<StatusCode, reqwest::Error> {
        debug!(
            event_name = "plugin.reaction_webhook.send",
            url,
            action = %payload.action,
            "sending reaction webhook"
        );
        let status = self.client.post(url).json(payload).send().await?.status();

        if status.is_success() {
            debug!(
                event_name = "plugin.reaction_webhook.delivered",
                url,
                status = status.as_u16(),
                action = %payload.action,
                emoji = %payload.emoji_name,
                "reaction webhook delivered"
            );
        } else {
            warn!(
                event_name = "plugin.reaction_webhook.rejected",
                url,
                status = status.as_u16(),
                action = %payload.action,
                emoji = %payload.emoji_name,
                "reaction webhook endpoint returned a non-success status"
            );
        }
        Ok(status)
    }

    /// Sends in the background so hook callers never wait on the remote endpoint.
    pub fn dispatch(&self, url: String, payload: ReactionWebhookPayload) -> JoinHandle<()> {
        let notifier = self.clone();
        tokio::spawn(async move {
            if let Err(send_error) = notifier.send(&url, &payload).await {
                error!(
                    event_name = "plugin.reaction_webhook.failed",
                    url = %url,
                    error = %send_error,
                    "failed to send reaction webhook"
                );
            }
        })
    }
}
