//! Typing and online indicators.
//!
//! Outgoing typing signals are throttled on the leading edge: the first call
//! in a window is sent, the rest of the window is swallowed. Incoming typing
//! indicators expire on their own unless refreshed.

use std::collections::BTreeSet;

use tokio::time::{Duration, Instant};

use crate::settings::SyncSettings;
use crate::timer::Deadlines;
use crate::types::SenderType;

/// What the UI shows about the other participants.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresenceState {
    pub typing: BTreeSet<SenderType>,
    pub online: BTreeSet<SenderType>,
}

impl PresenceState {
    pub fn is_typing(&self, sender_type: SenderType) -> bool {
        self.typing.contains(&sender_type)
    }

    pub fn is_online(&self, sender_type: SenderType) -> bool {
        self.online.contains(&sender_type)
    }
}

#[derive(Debug)]
pub struct PresenceSignaler {
    local: SenderType,
    throttle: Duration,
    clear_after: Duration,
    last_sent: Option<Instant>,
    state: PresenceState,
    expiries: Deadlines<SenderType>,
}

impl PresenceSignaler {
    pub fn new(local: SenderType, settings: &SyncSettings) -> Self {
        Self::with_timing(local, settings.typing_throttle, settings.typing_clear)
    }

    pub fn with_timing(local: SenderType, throttle: Duration, clear_after: Duration) -> Self {
        Self {
            local,
            throttle,
            clear_after,
            last_sent: None,
            state: PresenceState::default(),
            expiries: Deadlines::new(),
        }
    }

    /// Returns whether a typing frame should go out now.
    pub fn notify_typing(&mut self) -> bool {
        let now = Instant::now();
        let open = self
            .last_sent
            .map_or(true, |sent| now.duration_since(sent) >= self.throttle);
        if open {
            self.last_sent = Some(now);
        }
        open
    }

    /// Record a typing signal. Returns whether the indicator became visible.
    pub fn on_remote_typing(&mut self, sender_type: SenderType) -> bool {
        if sender_type == self.local {
            return false;
        }
        self.expiries.schedule(sender_type, self.clear_after);
        self.state.typing.insert(sender_type)
    }

    /// Record a join or leave. Returns whether the state changed.
    pub fn on_presence(&mut self, sender_type: SenderType, online: bool) -> bool {
        if sender_type == self.local {
            return false;
        }
        if online {
            return self.state.online.insert(sender_type);
        }

        let was_online = self.state.online.remove(&sender_type);
        self.expiries.cancel(&sender_type);
        let was_typing = self.state.typing.remove(&sender_type);
        was_online || was_typing
    }

    /// Resolves when a typing indicator expires; the indicator is already
    /// cleared when this returns.
    pub async fn next_expiry(&mut self) -> SenderType {
        let sender_type = self.expiries.expired().await;
        self.state.typing.remove(&sender_type);
        sender_type
    }

    pub fn state(&self) -> &PresenceState {
        &self.state
    }

    /// Drop every indicator and pending expiry.
    pub fn clear(&mut self) {
        self.expiries.clear();
        self.state = PresenceState::default();
    }
}
