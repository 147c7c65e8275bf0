use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::types::{Identity, MessageId, MessageType, OutboundFrame, SenderType};

/// Prefix marking a locally generated, unconfirmed message id.
pub const TEMP_ID_PREFIX: &str = "temp-";

/// A server-confirmed chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Server-issued id, unique within a room
    pub id: MessageId,
    /// Room this message belongs to
    pub room_id: String,
    /// Which side sent the message
    pub sender_type: SenderType,
    /// Artist or client id of the sender
    #[serde(default)]
    pub sender_id: String,
    /// Message content
    pub content: String,
    /// Type of message
    #[serde(default)]
    pub message_type: MessageType,
    /// Read flag; the REST API reports it as 0/1
    #[serde(default, deserialize_with = "flexible_bool")]
    pub is_read: bool,
    /// Creation timestamp
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    /// Whether this record is a local placeholder rather than a server record.
    pub fn is_temporary(&self) -> bool {
        self.id.starts_with(TEMP_ID_PREFIX)
    }
}

/// A locally sent message that has not been confirmed by the server yet.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingMessage {
    /// Placeholder id shown until confirmation
    pub temp_id: MessageId,
    /// Client idempotency token sent alongside the draft
    pub token: Uuid,
    pub room_id: String,
    pub sender_type: SenderType,
    pub sender_id: String,
    pub content: String,
    pub message_type: MessageType,
    pub created_at: DateTime<Utc>,
}

impl PendingMessage {
    /// Create a draft for `content` stamped with the current time.
    pub fn new(
        room_id: impl Into<String>,
        identity: &Identity,
        content: impl Into<String>,
        message_type: MessageType,
    ) -> Self {
        Self::at(room_id, identity, content, message_type, Utc::now())
    }

    pub fn at(
        room_id: impl Into<String>,
        identity: &Identity,
        content: impl Into<String>,
        message_type: MessageType,
        created_at: DateTime<Utc>,
    ) -> Self {
        let token = Uuid::new_v4();
        Self {
            temp_id: temp_id_for(token),
            token,
            room_id: room_id.into(),
            sender_type: identity.sender_type,
            sender_id: identity.sender_id.clone(),
            content: content.into(),
            message_type,
            created_at,
        }
    }

    /// The placeholder as it is displayed before confirmation.
    pub fn as_message(&self) -> ChatMessage {
        ChatMessage {
            id: self.temp_id.clone(),
            room_id: self.room_id.clone(),
            sender_type: self.sender_type,
            sender_id: self.sender_id.clone(),
            content: self.content.clone(),
            message_type: self.message_type,
            is_read: false,
            created_at: self.created_at,
        }
    }

    /// The outbound frame carrying this draft.
    pub fn to_frame(&self) -> OutboundFrame {
        OutboundFrame::Message {
            content: self.content.clone(),
            message_type: self.message_type,
            client_token: Some(self.token),
        }
    }
}

pub fn temp_id_for(token: Uuid) -> MessageId {
    format!("{TEMP_ID_PREFIX}{token}")
}

/// Parse a server timestamp: RFC 3339, or `YYYY-MM-DD HH:MM:SS` taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .map(|naive| Utc.from_utc_datetime(&naive))
}

fn flexible_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(i64),
    }

    Ok(match Option::<Flag>::deserialize(deserializer)? {
        Some(Flag::Bool(value)) => value,
        Some(Flag::Int(value)) => value != 0,
        None => false,
    })
}

mod timestamp {
    use super::*;

    pub fn serialize<S>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse_timestamp(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {raw}")))
    }
}
