//! Message records handled by the synchronization layer.

pub mod message;

pub use message::{parse_timestamp, temp_id_for, ChatMessage, PendingMessage, TEMP_ID_PREFIX};
