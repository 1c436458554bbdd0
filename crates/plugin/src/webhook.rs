//! Inbound WhatsApp Business webhook: payload shape and ingestion into host channels.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map};
use tracing::{info, warn};

use wabridge_core::errors::ApplicationError;

use crate::app::WhatsappApp;
use crate::host::{ChannelType, HostChannel, HostError, Post};

pub const WHATSAPP_CHANNEL_PREFIX: &str = "whatsapp_";

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookPayload {
    pub message: MessageParent,
}

impl WebhookPayload {
    pub fn from_slice(body: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(body)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageParent {
    pub messaging_product: String,
    pub metadata: Metadata,
    pub contacts: Vec<Contact>,
    pub messages: Vec<Message>,
    pub field: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Metadata {
    pub display_phone_number: String,
    pub phone_number_id: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Contact {
    pub profile: Profile,
    pub wa_id: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Profile {
    pub name: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Message {
    pub from: String,
    pub id: String,
    pub timestamp: String,
    #[serde(rename = "type")]
    pub message_type: String,
    pub text: Option<Text>,
    pub image: Option<Image>,
}

impl Message {
    /// Text to post for this message, or `None` for unsupported types.
    pub fn post_text(&self) -> Option<String> {
        match self.message_type.as_str() {
            "text" => Some(self.text.as_ref().map(|text| text.body.clone()).unwrap_or_default()),
            "image" => {
                Some(self.image.as_ref().map(|image| image.caption.clone()).unwrap_or_default())
            }
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Text {
    pub body: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Image {
    pub caption: String,
    pub mime_type: String,
    pub sha256: String,
    pub id: String,
}

pub fn channel_name(phone_number_id: &str, display_phone_number: &str) -> String {
    format!("{WHATSAPP_CHANNEL_PREFIX}{phone_number_id}_{display_phone_number}")
}

/// Outcome of one webhook delivery.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IngestReport {
    pub channel_id: String,
    pub channel_created: bool,
    pub posted: usize,
    pub skipped: usize,
}

impl WhatsappApp {
    /// Mirrors the messages of one webhook delivery into the conversation's private channel,
    /// creating the channel on first contact.
    pub async fn ingest_webhook(
        &self,
        payload: WebhookPayload,
    ) -> Result<IngestReport, ApplicationError> {
        let parent = payload.message;
        let phone_number = parent.metadata.display_phone_number.clone();
        let phone_number_id = parent.metadata.phone_number_id.clone();
        let contact_name = parent
            .contacts
            .first()
            .map(|contact| contact.profile.name.clone())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| phone_number.clone());
        let name = channel_name(&phone_number_id, &phone_number);

        let teams = self
            .host()
            .get_teams()
            .await
            .map_err(|error| ApplicationError::from(error).context("ingest_webhook"))?;
        let team = teams.first().ok_or_else(|| {
            ApplicationError::Integration("no teams found on the chat server".to_owned())
        })?;

        let (channel, channel_created) =
            self.whatsapp_channel(&team.id, &name, &contact_name, &phone_number, &phone_number_id)
                .await?;

        if channel_created {
            if let Err(record_error) =
                self.record_whatsapp_channel(&channel.id, &phone_number, &phone_number_id).await
            {
                warn!(
                    event_name = "webhook.channel.record_failed",
                    channel_id = %channel.id,
                    error = %record_error,
                    "failed to record whatsapp channel"
                );
            }
        }

        let bot_id = self.bot_id();
        let mut report =
            IngestReport { channel_id: channel.id.clone(), channel_created, posted: 0, skipped: 0 };
        for message in &parent.messages {
            let Some(text) = message.post_text() else {
                warn!(
                    event_name = "webhook.message.unsupported",
                    message_id = %message.id,
                    message_type = %message.message_type,
                    "skipping unsupported whatsapp message type"
                );
                report.skipped += 1;
                continue;
            };

            self.host()
                .create_post(Post::new(bot_id.clone(), channel.id.clone(), text))
                .await
                .map_err(|error| {
                    ApplicationError::Integration(format!(
                        "failed to create post for message {} in channel {}: {error}",
                        message.id, channel.name
                    ))
                })?;
            report.posted += 1;
        }

        info!(
            event_name = "webhook.ingested",
            channel_id = %report.channel_id,
            channel_created = report.channel_created,
            posted = report.posted,
            skipped = report.skipped,
            "whatsapp webhook ingested"
        );
        Ok(report)
    }

    async fn whatsapp_channel(
        &self,
        team_id: &str,
        name: &str,
        contact_name: &str,
        phone_number: &str,
        phone_number_id: &str,
    ) -> Result<(HostChannel, bool), ApplicationError> {
        match self.host().get_channel_by_name(team_id, name).await {
            Ok(channel) => return Ok((channel, false)),
            Err(error) if !error.is_not_found() => {
                return Err(ApplicationError::from(error).context("ingest_webhook"));
            }
            Err(_) => {}
        }

        let mut props = Map::new();
        props.insert("phone_number".to_owned(), json!(phone_number));
        props.insert("phone_number_id".to_owned(), json!(phone_number_id));
        props.insert("channel_type".to_owned(), json!("whatsapp"));
        let channel = HostChannel {
            team_id: team_id.to_owned(),
            name: name.to_owned(),
            display_name: contact_name.to_owned(),
            header: format!("WhatsApp Chat with {contact_name}"),
            channel_type: ChannelType::Private,
            props,
            ..HostChannel::default()
        };

        match self.host().create_channel(channel).await {
            Ok(created) => {
                info!(
                    event_name = "webhook.channel.created",
                    channel_id = %created.id,
                    channel_name = %created.name,
                    "created whatsapp channel"
                );
                Ok((created, true))
            }
            // A concurrent delivery created it first.
            Err(HostError::AlreadyExists(_)) => self
                .host()
                .get_channel_by_name(team_id, name)
                .await
                .map(|channel| (channel, false))
                .map_err(|error| ApplicationError::from(error).context("ingest_webhook")),
            Err(error) => Err(ApplicationError::Integration(format!(
                "failed to create channel '{name}' for {contact_name}: {error}"
            ))),
        }
    }
}
