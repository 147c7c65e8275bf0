//! REST client for the chat message endpoints.

use std::time::Duration;

use reqwest::{Client, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use studio_chat_config::ServerConfig;

use crate::entities::{ChatMessage, PendingMessage};
use crate::types::{MessageType, SenderType, SyncError, SyncResult};

const MESSAGES_PATH: &str = "api/chat/messages";

/// Body of a one-shot send.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewMessage {
    pub room_id: String,
    pub sender_type: SenderType,
    pub sender_id: String,
    pub content: String,
    pub message_type: MessageType,
}

impl From<&PendingMessage> for NewMessage {
    fn from(pending: &PendingMessage) -> Self {
        Self {
            room_id: pending.room_id.clone(),
            sender_type: pending.sender_type,
            sender_id: pending.sender_id.clone(),
            content: pending.content.clone(),
            message_type: pending.message_type,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    success: bool,
    data: Option<T>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageWindow {
    #[serde(default)]
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Clone)]
pub struct MessagesApi {
    client: Client,
    base_url: Url,
}

impl MessagesApi {
    pub fn new(base_url: &str, timeout: Duration) -> SyncResult<Self> {
        let mut base_url = Url::parse(base_url).map_err(|error| {
            SyncError::configuration(format!("invalid base url {base_url:?}: {error}"))
        })?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = Client::builder()
            .timeout(timeout)
            .user_agent("studio-chat")
            .build()?;

        Ok(Self { client, base_url })
    }

    pub fn from_config(config: &ServerConfig) -> SyncResult<Self> {
        Self::new(
            &config.base_url,
            Duration::from_secs(config.request_timeout_seconds),
        )
    }

    /// Base URL with a trailing slash; the live channel derives its endpoint from it.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Fetch the most recent `per_page` messages of a room.
    pub async fn fetch_recent(&self, room_id: &str, per_page: u32) -> SyncResult<Vec<ChatMessage>> {
        let mut url = self.endpoint()?;
        url.query_pairs_mut()
            .append_pair("room_id", room_id)
            .append_pair("per_page", &per_page.to_string());

        let response = self.client.get(url).send().await?;
        let window: MessageWindow = decode(response).await?;

        debug!(room_id, count = window.messages.len(), "fetched message window");
        Ok(window.messages)
    }

    /// Persist a message and return the stored record.
    pub async fn post_message(&self, message: &NewMessage) -> SyncResult<ChatMessage> {
        let response = self.client.post(self.endpoint()?).json(message).send().await?;
        let stored: ChatMessage = decode(response).await?;

        debug!(room_id = %message.room_id, id = %stored.id, "posted message");
        Ok(stored)
    }

    fn endpoint(&self) -> SyncResult<Url> {
        self.base_url
            .join(MESSAGES_PATH)
            .map_err(|error| SyncError::configuration(format!("invalid messages url: {error}")))
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> SyncResult<T> {
    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        let reason = serde_json::from_str::<ErrorBody>(&body)
            .unwrap_or_default()
            .error
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string());

        return Err(if status == StatusCode::FORBIDDEN {
            SyncError::room_inactive(reason)
        } else {
            SyncError::api(status.as_u16(), reason)
        });
    }

    let envelope: Envelope<T> = serde_json::from_str(&body)?;
    if !envelope.success {
        return Err(SyncError::rejected(
            envelope
                .error
                .unwrap_or_else(|| "request was not successful".to_string()),
        ));
    }

    envelope
        .data
        .ok_or_else(|| SyncError::rejected("response carried no data"))
}
