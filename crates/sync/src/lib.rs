//! Real-time synchronization for studio chat rooms.
//!
//! A [`ChatSession`] keeps one room's message list consistent over an
//! unreliable live channel, falls back to polling when that channel stays
//! down, reconciles optimistic sends with server-confirmed records, and
//! throttles typing signals.
//!
//! ```no_run
//! use studio_chat_sync::{ChatSession, Identity, MessagesApi, SyncSettings};
//! use std::time::Duration;
//!
//! # async fn demo() -> studio_chat_sync::SyncResult<()> {
//! let api = MessagesApi::new("https://studio.example", Duration::from_secs(10))?;
//! let session = ChatSession::connect("room-1", Identity::client("c-1"), SyncSettings::default(), api)?;
//! session.send("Hi!").await?;
//! session.dispose().await;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod connection;
pub mod entities;
pub mod presence;
pub mod session;
pub mod settings;
pub mod store;
pub mod timer;
pub mod transport;
pub mod types;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use api::{MessagesApi, NewMessage};
pub use connection::{ConnectionManager, Delivery};
pub use entities::{ChatMessage, PendingMessage};
pub use presence::{PresenceSignaler, PresenceState};
pub use session::{ChatSession, SendOutcome, SessionEvent};
pub use settings::SyncSettings;
pub use store::{Entry, MergeOutcome, MessageStore, SnapshotSummary};
pub use transport::{
    Connector, HttpConnector, LiveTransport, PollTransport, Transport, TransportKind,
};
pub use types::{
    ConnectionState, ConnectionStatus, Identity, MessageType, SenderType, SyncError, SyncResult,
};
