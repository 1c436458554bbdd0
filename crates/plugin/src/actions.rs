//! Callbacks for interactive dialogs and message buttons, reached through the plugin's
//! HTTP routes.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{error, warn};

use wabridge_core::errors::ApplicationError;

use crate::dialogs::{
    attachment_props, plugin_url, PostAction, PostActionIntegrationRequest,
    PostActionIntegrationResponse, SubmitDialogRequest, SubmitDialogResponse,
    DIALOG_ELEMENT_NAME_EMAIL, DIALOG_ELEMENT_NAME_NUMBER, DIALOG_STATE_RELATIVE_CALLBACK_URL,
};
use crate::host::Post;
use crate::plugin::{Plugin, DEMO_POST_TYPE};

const MASKED_EMAIL: &str = "xxxxxxxxxxx";

/// Update and Delete buttons for the ephemeral demo post, carrying the click count.
pub(crate) fn ephemeral_actions(site_url: &str, plugin_id: &str, count: i64) -> Map<String, Value> {
    let mut context = Map::new();
    context.insert("count".to_owned(), json!(count));
    let update_name = if count == 0 { "Update".to_owned() } else { format!("Update {count}") };
    attachment_props(vec![
        PostAction::button(update_name, plugin_url(Some(site_url), plugin_id, "/ephemeral/update"))
            .with_context(context),
        PostAction::button("Delete", plugin_url(Some(site_url), plugin_id, "/ephemeral/delete")),
    ])
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingWebhookResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// Answers an outgoing webhook by echoing its payload back as a code block.
pub fn echo_outgoing_webhook(
    payload: &Value,
) -> Result<OutgoingWebhookResponse, serde_json::Error> {
    let pretty = serde_json::to_string_pretty(payload)?;
    Ok(OutgoingWebhookResponse { text: Some(format!("```\n{pretty}\n```")) })
}

impl Plugin {
    /// Sleeps for the configured integration delay before an integration callback runs.
    pub async fn integration_delay(&self) {
        let seconds = self.configuration.get().settings.integration_request_delay;
        if seconds > 0 {
            tokio::time::sleep(Duration::from_secs(seconds)).await;
        }
    }

    pub async fn submit_dialog_1(&self, mut request: SubmitDialogRequest) -> SubmitDialogResponse {
        if !request.cancelled {
            let Some(number) =
                request.submission.get(DIALOG_ELEMENT_NAME_NUMBER).and_then(Value::as_f64)
            else {
                error!(
                    event_name = "plugin.dialog.missing_field",
                    field = DIALOG_ELEMENT_NAME_NUMBER,
                    "dialog submission is missing field"
                );
                return SubmitDialogResponse::default();
            };
            if number != 42.0 {
                return SubmitDialogResponse::field_error(
                    DIALOG_ELEMENT_NAME_NUMBER,
                    "This must be 42",
                );
            }
        }

        let user = match self.host.get_user(&request.user_id).await {
            Ok(user) => user,
            Err(lookup_error) => {
                error!(
                    event_name = "plugin.dialog.user_failed",
                    user_id = %request.user_id,
                    error = %lookup_error,
                    "failed to get user for dialog"
                );
                return SubmitDialogResponse::default();
            }
        };

        let verb = if request.cancelled { "canceled" } else { "submitted" };
        let bot_id = self.configuration.get().bot_user_id.clone();
        let root = Post::new(
            bot_id.clone(),
            request.channel_id.clone(),
            format!("@{} {verb} an Interactive Dialog", user.username),
        );
        let root = match self.host.create_post(root).await {
            Ok(root) => root,
            Err(post_error) => {
                error!(
                    event_name = "plugin.dialog.post_failed",
                    error = %post_error,
                    "failed to post dialog submission"
                );
                return SubmitDialogResponse::default();
            }
        };

        if !request.cancelled {
            request.submission.insert(DIALOG_ELEMENT_NAME_EMAIL.to_owned(), json!(MASKED_EMAIL));
            let data = Post::new(bot_id, request.channel_id, "Data:")
                .with_root(root.id)
                .with_type(DEMO_POST_TYPE)
                .with_props(request.submission);
            if let Err(post_error) = self.host.create_post(data).await {
                error!(
                    event_name = "plugin.dialog.post_failed",
                    error = %post_error,
                    "failed to post dialog data"
                );
            }
        }
        SubmitDialogResponse::default()
    }

    pub async fn submit_dialog_2(&self, request: SubmitDialogRequest) -> SubmitDialogResponse {
        let user = match self.host.get_user(&request.user_id).await {
            Ok(user) => user,
            Err(lookup_error) => {
                error!(
                    event_name = "plugin.dialog.user_failed",
                    user_id = %request.user_id,
                    error = %lookup_error,
                    "failed to get user for dialog"
                );
                return SubmitDialogResponse::default();
            }
        };

        let mut message = format!("@{} confirmed an Interactive Dialog", user.username);
        if request.state == DIALOG_STATE_RELATIVE_CALLBACK_URL {
            message.push_str(" from relative callback URL");
        }
        let bot_id = self.configuration.get().bot_user_id.clone();
        let post = Post::new(bot_id, request.channel_id, message);
        if let Err(post_error) = self.host.create_post(post).await {
            error!(
                event_name = "plugin.dialog.post_failed",
                error = %post_error,
                "failed to post dialog confirmation"
            );
        }
        SubmitDialogResponse::default()
    }

    pub fn submit_dialog_error(&self) -> SubmitDialogResponse {
        SubmitDialogResponse::error("some error")
    }

    /// Echoes a button click back into the thread it came from.
    pub async fn interactive_button(
        &self,
        request: PostActionIntegrationRequest,
    ) -> Result<PostActionIntegrationResponse, ApplicationError> {
        let user = self
            .host
            .get_user(&request.user_id)
            .await
            .map_err(|error| ApplicationError::from(error).context("interactive_button"))?;
        let post = self
            .host
            .get_post(&request.post_id)
            .await
            .map_err(|error| ApplicationError::from(error).context("interactive_button"))?;
        let root_id = if post.root_id.is_empty() { post.id } else { post.root_id };

        let request_json = serde_json::to_string_pretty(&request).map_err(|error| {
            ApplicationError::Integration(format!("failed to encode action request: {error}"))
        })?;
        let message = format!(
            "@{} clicked an interactive button.\n```json\n{request_json}\n```",
            user.username
        );
        self.host
            .create_post(
                Post::new(self.configuration.get().bot_user_id.clone(), request.channel_id, message)
                    .with_root(root_id),
            )
            .await
            .map_err(|error| ApplicationError::from(error).context("interactive_button"))?;
        Ok(PostActionIntegrationResponse::default())
    }

    pub async fn ephemeral_update(
        &self,
        request: PostActionIntegrationRequest,
    ) -> PostActionIntegrationResponse {
        let count = match request.context.get("count") {
            Some(value) => value.as_f64().unwrap_or_default() as i64 + 1,
            None => {
                warn!(
                    event_name = "plugin.ephemeral.missing_count",
                    post_id = %request.post_id,
                    "ephemeral update without a count"
                );
                1
            }
        };

        let site_url = self.site_url().await;
        let post = Post {
            id: request.post_id,
            channel_id: request.channel_id,
            message: "updated ephemeral action".to_owned(),
            props: ephemeral_actions(&site_url, &self.options.plugin_id, count),
            ..Post::default()
        };
        self.host.update_ephemeral_post(&request.user_id, post).await;
        PostActionIntegrationResponse::default()
    }

    pub async fn ephemeral_delete(
        &self,
        request: PostActionIntegrationRequest,
    ) -> PostActionIntegrationResponse {
        self.host.delete_ephemeral_post(&request.user_id, &request.post_id).await;
        PostActionIntegrationResponse::default()
    }
}
