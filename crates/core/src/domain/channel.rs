use serde::{Deserialize, Serialize};

use crate::errors::DomainError;
use crate::ids::new_id;

/// Maps an external WhatsApp conversation onto a chat channel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: String,
    pub channel_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number_id: Option<String>,
}

impl Channel {
    pub fn new(channel_id: impl Into<String>) -> Result<Self, DomainError> {
        let channel = Self {
            id: new_id(),
            channel_id: channel_id.into(),
            phone_number: None,
            phone_number_id: None,
        };
        channel.validate()?;
        Ok(channel)
    }

    pub fn with_phone(
        mut self,
        phone_number: impl Into<String>,
        phone_number_id: impl Into<String>,
    ) -> Self {
        self.phone_number = Some(phone_number.into());
        self.phone_number_id = Some(phone_number_id.into());
        self
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        if self.id.trim().is_empty() {
            return Err(DomainError::Validation("channel id cannot be empty".to_owned()));
        }
        if self.channel_id.trim().is_empty() {
            return Err(DomainError::Validation("channel_id cannot be empty".to_owned()));
        }
        Ok(())
    }
}
