//! Matching confirmed records against pending drafts.

use uuid::Uuid;

use super::Entry;
use crate::entities::{ChatMessage, PendingMessage};

/// Result of merging one confirmed record into the store.
#[derive(Debug, Clone, PartialEq)]
pub enum MergeOutcome {
    /// The record was new and has been inserted.
    Inserted,
    /// The record confirmed a pending draft, which it replaced.
    Replaced(PendingMessage),
    /// A record with the same id is already present.
    Duplicate,
    /// The record belongs to another room.
    Ignored,
}

impl MergeOutcome {
    /// Whether the visible message list changed.
    pub fn changed(&self) -> bool {
        matches!(self, MergeOutcome::Inserted | MergeOutcome::Replaced(_))
    }
}

/// Whether `confirmed` is the server's copy of `pending`.
///
/// A token identifies exactly one draft. Without one, the draft must have
/// the same sender and content; a confirmation that omits the sender id
/// still matches on sender type.
pub fn corresponds(pending: &PendingMessage, confirmed: &ChatMessage, token: Option<Uuid>) -> bool {
    match token {
        Some(token) => pending.token == token,
        None => {
            pending.sender_type == confirmed.sender_type
                && pending.content == confirmed.content
                && (confirmed.sender_id.is_empty() || pending.sender_id == confirmed.sender_id)
        }
    }
}

impl PendingMessage {
    /// Resolve this draft against a confirmation: the confirmed record if it
    /// corresponds, otherwise the draft unchanged.
    pub fn reconcile(self, confirmed: &ChatMessage, token: Option<Uuid>) -> Entry {
        if corresponds(&self, confirmed, token) {
            Entry::Confirmed(confirmed.clone())
        } else {
            Entry::Pending(self)
        }
    }
}
