use std::time::Duration;

use studio_chat_config::SyncConfig;

/// Timing knobs of a chat session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    /// Fixed delay before retrying the live channel
    pub reconnect_delay: Duration,
    /// Consecutive live failures before falling back to polling
    pub max_reconnect_attempts: u32,
    pub poll_interval: Duration,
    /// Size of the window fetched by each poll and by the history load
    pub poll_page_size: u32,
    /// Minimum spacing of outgoing typing signals
    pub typing_throttle: Duration,
    /// How long a remote typing indicator stays up without a new signal
    pub typing_clear: Duration,
    /// How long a live send may wait for its echo before it is rolled back
    pub unconfirmed_timeout: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self::from(&SyncConfig::default())
    }
}

impl From<&SyncConfig> for SyncSettings {
    fn from(config: &SyncConfig) -> Self {
        Self {
            reconnect_delay: Duration::from_millis(config.reconnect_delay_ms),
            max_reconnect_attempts: config.max_reconnect_attempts,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            poll_page_size: config.poll_page_size.max(1),
            typing_throttle: Duration::from_millis(config.typing_throttle_ms),
            typing_clear: Duration::from_millis(config.typing_clear_ms),
            unconfirmed_timeout: Duration::from_millis(config.unconfirmed_timeout_ms),
        }
    }
}
