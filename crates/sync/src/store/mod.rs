//! Ordered, deduplicated message list for one room.
//!
//! Entries are either confirmed server records or pending local drafts.
//! The list is kept sorted ascending by creation time; entries with equal
//! timestamps keep their arrival order. Ids are unique.

pub mod reconciler;

use chrono::{DateTime, Utc};
use uuid::Uuid;

pub use reconciler::{corresponds, MergeOutcome};

use crate::entities::{ChatMessage, PendingMessage};
use crate::types::{MessageId, RoomId};

/// One row of the message list.
#[derive(Debug, Clone, PartialEq)]
pub enum Entry {
    Confirmed(ChatMessage),
    Pending(PendingMessage),
}

impl Entry {
    pub fn id(&self) -> &str {
        match self {
            Entry::Confirmed(message) => &message.id,
            Entry::Pending(pending) => &pending.temp_id,
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        match self {
            Entry::Confirmed(message) => message.created_at,
            Entry::Pending(pending) => pending.created_at,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Entry::Pending(_))
    }

    pub fn pending(&self) -> Option<&PendingMessage> {
        match self {
            Entry::Pending(pending) => Some(pending),
            Entry::Confirmed(_) => None,
        }
    }

    /// The entry as displayed; pending drafts show their temp id.
    pub fn as_message(&self) -> ChatMessage {
        match self {
            Entry::Confirmed(message) => message.clone(),
            Entry::Pending(pending) => pending.as_message(),
        }
    }
}

/// What a snapshot merge changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SnapshotSummary {
    pub inserted: usize,
    pub replaced: Vec<PendingMessage>,
    pub updated: usize,
}

impl SnapshotSummary {
    pub fn changed(&self) -> bool {
        self.inserted > 0 || !self.replaced.is_empty() || self.updated > 0
    }
}

#[derive(Debug, Clone)]
pub struct MessageStore {
    room_id: RoomId,
    entries: Vec<Entry>,
}

impl MessageStore {
    pub fn new(room_id: impl Into<RoomId>) -> Self {
        Self {
            room_id: room_id.into(),
            entries: Vec::new(),
        }
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Show a draft immediately, in sorted position.
    pub fn insert_optimistic(&mut self, pending: PendingMessage) {
        self.insert_sorted(Entry::Pending(pending));
    }

    /// Merge a confirmed record.
    ///
    /// A record whose id is already present is a no-op, so the same record
    /// arriving over the live channel and a poll is stored once. Otherwise
    /// the oldest corresponding draft is replaced, or the record is inserted.
    pub fn reconcile_confirmed(
        &mut self,
        message: ChatMessage,
        token: Option<Uuid>,
    ) -> MergeOutcome {
        if message.room_id != self.room_id {
            return MergeOutcome::Ignored;
        }
        if self.contains(&message.id) {
            return MergeOutcome::Duplicate;
        }

        let matching = self
            .entries
            .iter()
            .position(|entry| {
                entry
                    .pending()
                    .is_some_and(|pending| corresponds(pending, &message, token))
            });

        let Some(index) = matching else {
            self.insert_sorted(Entry::Confirmed(message));
            return MergeOutcome::Inserted;
        };

        match self.entries.remove(index) {
            Entry::Pending(pending) => {
                let draft = pending.clone();
                self.insert_sorted(pending.reconcile(&message, token));
                MergeOutcome::Replaced(draft)
            }
            confirmed => {
                self.insert_sorted(confirmed);
                self.insert_sorted(Entry::Confirmed(message));
                MergeOutcome::Inserted
            }
        }
    }

    /// Replace the draft `temp_id` with the record a one-shot send returned.
    ///
    /// The draft is removed whatever the outcome; a record for another room
    /// is not stored.
    pub fn confirm_pending(&mut self, temp_id: &str, message: ChatMessage) -> MergeOutcome {
        let removed = self.remove_optimistic(temp_id);
        if message.room_id != self.room_id {
            return MergeOutcome::Ignored;
        }
        if self.contains(&message.id) {
            return MergeOutcome::Duplicate;
        }

        self.insert_sorted(Entry::Confirmed(message));
        match removed {
            Some(pending) => MergeOutcome::Replaced(pending),
            None => MergeOutcome::Inserted,
        }
    }

    /// Merge a fetched window. Known records only have their read flag
    /// refreshed; nothing already displayed moves.
    pub fn merge_snapshot(&mut self, messages: Vec<ChatMessage>) -> SnapshotSummary {
        let mut summary = SnapshotSummary::default();

        for message in messages {
            if let Some(Entry::Confirmed(existing)) = self.find_mut(&message.id) {
                if existing.is_read != message.is_read {
                    existing.is_read = message.is_read;
                    summary.updated += 1;
                }
                continue;
            }

            match self.reconcile_confirmed(message, None) {
                MergeOutcome::Inserted => summary.inserted += 1,
                MergeOutcome::Replaced(pending) => summary.replaced.push(pending),
                MergeOutcome::Duplicate | MergeOutcome::Ignored => {}
            }
        }

        summary
    }

    /// Roll back a draft whose send failed.
    pub fn remove_optimistic(&mut self, temp_id: &str) -> Option<PendingMessage> {
        let index = self
            .entries
            .iter()
            .position(|entry| entry.is_pending() && entry.id() == temp_id)?;
        match self.entries.remove(index) {
            Entry::Pending(pending) => Some(pending),
            Entry::Confirmed(_) => None,
        }
    }

    pub fn remove_pending_by_token(&mut self, token: Uuid) -> Option<PendingMessage> {
        let temp_id = self
            .entries
            .iter()
            .filter_map(Entry::pending)
            .find(|pending| pending.token == token)?
            .temp_id
            .clone();
        self.remove_optimistic(&temp_id)
    }

    pub fn has_pending(&self, token: Uuid) -> bool {
        self.entries
            .iter()
            .filter_map(Entry::pending)
            .any(|pending| pending.token == token)
    }

    /// Returns whether the flag changed.
    pub fn mark_read(&mut self, id: &str) -> bool {
        match self.find_mut(id) {
            Some(Entry::Confirmed(message)) if !message.is_read => {
                message.is_read = true;
                true
            }
            _ => false,
        }
    }

    /// The displayed list, in order.
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.entries.iter().map(Entry::as_message).collect()
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn get(&self, id: &str) -> Option<&Entry> {
        self.entries.iter().find(|entry| entry.id() == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.entries.iter().filter(|entry| entry.is_pending()).count()
    }

    fn find_mut(&mut self, id: &str) -> Option<&mut Entry> {
        self.entries.iter_mut().find(|entry| entry.id() == id)
    }

    fn insert_sorted(&mut self, entry: Entry) {
        let created_at = entry.created_at();
        let index = self
            .entries
            .partition_point(|existing| existing.created_at() <= created_at);
        self.entries.insert(index, entry);
    }
}
