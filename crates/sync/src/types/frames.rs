//! Wire frames exchanged over the live channel.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{MessageId, MessageType, SenderType, SyncError, SyncResult};
use crate::entities::{parse_timestamp, ChatMessage};

/// Tag of an inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FrameKind {
    Message,
    Typing,
    #[serde(alias = "connected")]
    PresenceConnected,
    #[serde(alias = "disconnected")]
    PresenceDisconnected,
    Read,
    Error,
}

/// Loosely typed payload as the server sends it; every field is optional on the wire.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FramePayload {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub room_id: Option<String>,
    #[serde(default)]
    pub sender_type: Option<SenderType>,
    #[serde(default)]
    pub sender_id: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub message_type: Option<MessageType>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub client_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    kind: FrameKind,
    #[serde(default)]
    payload: Option<FramePayload>,
}

/// A validated inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// A confirmed message, possibly the echo of one of our own sends
    Message {
        message: ChatMessage,
        client_token: Option<Uuid>,
    },
    /// The remote side is typing
    Typing { sender_type: SenderType },
    /// A participant joined or left the live channel
    Presence { sender_type: SenderType, online: bool },
    /// A message was read by the other side
    Read { message_id: MessageId },
    /// The server reported a problem with one of our frames
    Error { message: String },
}

impl InboundFrame {
    /// Parse and validate a text frame. `room_id` fills in a missing room.
    pub fn parse(text: &str, room_id: &str) -> SyncResult<Self> {
        let raw: RawFrame = serde_json::from_str(text)?;
        let payload = raw.payload.unwrap_or_default();

        match raw.kind {
            FrameKind::Message => {
                let id = non_empty(payload.id, "id")?;
                let content = non_empty(payload.content, "content")?;
                let sender_type = required(payload.sender_type, "sender_type")?;
                let created_at = payload
                    .timestamp
                    .as_deref()
                    .and_then(parse_timestamp)
                    .unwrap_or_else(Utc::now);
                let client_token = payload
                    .client_token
                    .as_deref()
                    .and_then(|token| Uuid::parse_str(token).ok());

                Ok(InboundFrame::Message {
                    message: ChatMessage {
                        id,
                        room_id: payload
                            .room_id
                            .filter(|room| !room.is_empty())
                            .unwrap_or_else(|| room_id.to_string()),
                        sender_type,
                        sender_id: payload.sender_id.unwrap_or_default(),
                        content,
                        message_type: payload.message_type.unwrap_or_default(),
                        is_read: false,
                        created_at,
                    },
                    client_token,
                })
            }
            FrameKind::Typing => Ok(InboundFrame::Typing {
                sender_type: required(payload.sender_type, "sender_type")?,
            }),
            FrameKind::PresenceConnected | FrameKind::PresenceDisconnected => {
                Ok(InboundFrame::Presence {
                    sender_type: required(payload.sender_type, "sender_type")?,
                    online: raw.kind == FrameKind::PresenceConnected,
                })
            }
            FrameKind::Read => Ok(InboundFrame::Read {
                message_id: non_empty(payload.message_id, "message_id")?,
            }),
            FrameKind::Error => Ok(InboundFrame::Error {
                message: payload
                    .message
                    .unwrap_or_else(|| "unspecified server error".to_string()),
            }),
        }
    }

    pub fn kind(&self) -> FrameKind {
        match self {
            InboundFrame::Message { .. } => FrameKind::Message,
            InboundFrame::Typing { .. } => FrameKind::Typing,
            InboundFrame::Presence { online: true, .. } => FrameKind::PresenceConnected,
            InboundFrame::Presence { online: false, .. } => FrameKind::PresenceDisconnected,
            InboundFrame::Read { .. } => FrameKind::Read,
            InboundFrame::Error { .. } => FrameKind::Error,
        }
    }
}

fn required<T>(value: Option<T>, field: &str) -> SyncResult<T> {
    value.ok_or_else(|| SyncError::validation(format!("frame is missing {field}")))
}

fn non_empty(value: Option<String>, field: &str) -> SyncResult<String> {
    required(value.filter(|value| !value.is_empty()), field)
}

/// Frames we send over the live channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundFrame {
    Message {
        content: String,
        message_type: MessageType,
        #[serde(skip_serializing_if = "Option::is_none")]
        client_token: Option<Uuid>,
    },
    Typing,
    Read {
        message_id: MessageId,
    },
}

impl OutboundFrame {
    pub fn kind_name(&self) -> &'static str {
        match self {
            OutboundFrame::Message { .. } => "message",
            OutboundFrame::Typing => "typing",
            OutboundFrame::Read { .. } => "read",
        }
    }
}
