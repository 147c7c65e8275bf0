//! Shared types for the synchronization layer.
//!
//! This module contains the participant and status enums, the wire frame
//! definitions and the error type used across the crate.

pub mod errors;
pub mod frames;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub use errors::{SyncError, SyncResult};
pub use frames::{FrameKind, FramePayload, InboundFrame, OutboundFrame};

// Common type aliases
pub type RoomId = String;
pub type MessageId = String;

/// Which side of a conversation a participant is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SenderType {
    Artist,
    Client,
}

impl SenderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SenderType::Artist => "artist",
            SenderType::Client => "client",
        }
    }
}

impl fmt::Display for SenderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SenderType {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "artist" => Ok(SenderType::Artist),
            "client" => Ok(SenderType::Client),
            other => Err(SyncError::validation(format!(
                "sender type must be \"artist\" or \"client\", got \"{other}\""
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    #[default]
    Text,
    Image,
    #[serde(alias = "bookingLink")]
    BookingLink,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Text => "text",
            MessageType::Image => "image",
            MessageType::BookingLink => "booking_link",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The local participant of a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity {
    pub sender_type: SenderType,
    pub sender_id: String,
}

impl Identity {
    pub fn new(sender_type: SenderType, sender_id: impl Into<String>) -> Self {
        Self {
            sender_type,
            sender_id: sender_id.into(),
        }
    }

    pub fn client(sender_id: impl Into<String>) -> Self {
        Self::new(SenderType::Client, sender_id)
    }

    pub fn artist(sender_id: impl Into<String>) -> Self {
        Self::new(SenderType::Artist, sender_id)
    }
}

/// Connection status shown to the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Reconnecting,
    Disconnected,
    Polling,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Reconnecting => "reconnecting",
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Polling => "polling",
        }
    }

    /// Whether a manual reconnect makes sense from this status.
    pub fn offers_reconnect(&self) -> bool {
        matches!(
            self,
            ConnectionStatus::Disconnected | ConnectionStatus::Polling
        )
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionState {
    pub status: ConnectionStatus,
    pub reconnect_attempts: u32,
}

impl ConnectionState {
    pub fn initial() -> Self {
        Self {
            status: ConnectionStatus::Connecting,
            reconnect_attempts: 0,
        }
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::initial()
    }
}
