use chrono::{DateTime, SecondsFormat, Utc};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::errors::DomainError;
use crate::ids::new_id;

/// Wire value used for an unset `ClosedAt`.
pub const ZERO_TIME: &str = "0001-01-01T00:00:00Z";

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A WhatsApp conversation session owned by a chat user.
///
/// Sessions are opened explicitly and closed explicitly. A closed session keeps
/// its row; `closed_at` is the only thing that changes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    #[serde(rename = "ID")]
    pub id: SessionId,
    #[serde(rename = "UserID")]
    pub user_id: String,
    #[serde(rename = "CreatedAt", with = "wire_time")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "ClosedAt", with = "wire_optional_time", default)]
    pub closed_at: Option<DateTime<Utc>>,
}

impl Session {
    /// Builds a new open session for `user_id`, stamped with the current time.
    pub fn open(user_id: impl Into<String>) -> Result<Self, DomainError> {
        let session = Self {
            id: SessionId(new_id()),
            user_id: user_id.into(),
            created_at: now_millis(),
            closed_at: None,
        };
        session.validate()?;
        Ok(session)
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        if self.id.0.trim().is_empty() {
            return Err(DomainError::Validation("session id cannot be empty".to_owned()));
        }
        if self.user_id.trim().is_empty() {
            return Err(DomainError::Validation("session user id cannot be empty".to_owned()));
        }
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.closed_at.is_none()
    }

    /// Returns a closed copy of this session, or `SessionAlreadyClosed`.
    pub fn close_at(&self, at: DateTime<Utc>) -> Result<Self, DomainError> {
        if !self.is_open() {
            return Err(DomainError::SessionAlreadyClosed(self.id.0.clone()));
        }
        Ok(Self { closed_at: Some(at), ..self.clone() })
    }
}

/// Partial update of a session. Absent fields keep their stored value; a `ClosedAt`
/// of `null` or the zero time reopens the session.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct SessionPatch {
    #[serde(rename = "UserID", alias = "user_id", default)]
    pub user_id: Option<String>,
    #[serde(
        rename = "ClosedAt",
        alias = "closed_at",
        default,
        deserialize_with = "wire_patch_time::deserialize"
    )]
    pub closed_at: Option<Option<DateTime<Utc>>>,
}

impl Session {
    pub fn apply(&self, patch: SessionPatch) -> Result<Self, DomainError> {
        let mut updated = self.clone();
        if let Some(user_id) = patch.user_id {
            updated.user_id = user_id;
        }
        if let Some(closed_at) = patch.closed_at {
            updated.closed_at = closed_at;
        }
        updated.validate()?;
        Ok(updated)
    }
}

/// Current time truncated to the millisecond precision used by storage.
pub fn now_millis() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}

pub fn format_wire_time(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn parse_wire_time<E: de::Error>(raw: &str) -> Result<DateTime<Utc>, E> {
    DateTime::parse_from_rfc3339(raw).map(|value| value.with_timezone(&Utc)).map_err(E::custom)
}

mod wire_time {
    use super::*;

    pub fn serialize<S: Serializer>(
        value: &DateTime<Utc>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_wire_time(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse_wire_time(&raw)
    }
}

mod wire_optional_time {
    use super::*;

    pub fn serialize<S: Serializer>(
        value: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(value) => serializer.serialize_str(&format_wire_time(value)),
            None => serializer.serialize_str(ZERO_TIME),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        match raw.as_deref() {
            None | Some("") | Some(ZERO_TIME) => Ok(None),
            Some(raw) => parse_wire_time(raw).map(Some),
        }
    }
}

mod wire_patch_time {
    use super::*;

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Option<DateTime<Utc>>>, D::Error> {
        super::wire_optional_time::deserialize(deserializer).map(Some)
    }
}
