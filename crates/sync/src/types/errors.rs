//! Error types for the synchronization layer.

use thiserror::Error;

/// Result type alias for synchronization operations
pub type SyncResult<T> = Result<T, SyncError>;

/// Main error type for the synchronization layer
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("no transport is active")]
    NotConnected,

    #[error("{operation} is not supported by the {transport} transport")]
    Unsupported {
        operation: &'static str,
        transport: &'static str,
    },

    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("request rejected: {message}")]
    Rejected { message: String },

    #[error("room is no longer active: {message}")]
    RoomInactive { message: String },

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("send was not confirmed within {timeout_ms}ms")]
    UnconfirmedTimeout { timeout_ms: u64 },

    #[error("session has been disposed")]
    Disposed,
}

impl SyncError {
    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an error for a non-2xx response
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Create an error for a `success: false` response
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected {
            message: message.into(),
        }
    }

    pub fn room_inactive(message: impl Into<String>) -> Self {
        Self::RoomInactive {
            message: message.into(),
        }
    }

    pub fn unsupported(operation: &'static str, transport: &'static str) -> Self {
        Self::Unsupported {
            operation,
            transport,
        }
    }

    /// Whether retrying the same request later can succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::NotConnected
            | SyncError::Http(_)
            | SyncError::WebSocket(_)
            | SyncError::UnconfirmedTimeout { .. } => true,
            SyncError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }
}
