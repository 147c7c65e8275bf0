use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::debug;

const DEFAULT_CONFIG_FILES: &[&str] = &[
    "studio-chat.toml",
    "config/studio-chat.toml",
    "crates/config/studio-chat.toml",
    "../studio-chat.toml",
    "../config/studio-chat.toml",
];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub base_url: String,
    #[serde(default = "ServerConfig::default_request_timeout")]
    pub request_timeout_seconds: u64,
}

impl ServerConfig {
    const fn default_request_timeout() -> u64 {
        10
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:4321".to_string(),
            request_timeout_seconds: Self::default_request_timeout(),
        }
    }
}

/// Who the local participant is when no command-line override is given.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "SessionConfig::default_sender_type")]
    pub sender_type: String,
    #[serde(default)]
    pub sender_id: Option<String>,
}

impl SessionConfig {
    fn default_sender_type() -> String {
        "client".to_string()
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            sender_type: Self::default_sender_type(),
            sender_id: None,
        }
    }
}

/// Timing and sizing knobs for the synchronization layer.
///
/// ```
/// use studio_chat_config::SyncConfig;
///
/// let sync = SyncConfig::default();
/// assert_eq!(sync.reconnect_delay_ms, 3_000);
/// assert_eq!(sync.max_reconnect_attempts, 5);
/// assert_eq!(sync.poll_interval_ms, 5_000);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "SyncConfig::default_reconnect_delay")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "SyncConfig::default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    #[serde(default = "SyncConfig::default_poll_interval")]
    pub poll_interval_ms: u64,
    #[serde(default = "SyncConfig::default_poll_page_size")]
    pub poll_page_size: u32,
    #[serde(default = "SyncConfig::default_typing_throttle")]
    pub typing_throttle_ms: u64,
    #[serde(default = "SyncConfig::default_typing_clear")]
    pub typing_clear_ms: u64,
    #[serde(default = "SyncConfig::default_unconfirmed_timeout")]
    pub unconfirmed_timeout_ms: u64,
}

impl SyncConfig {
    const fn default_reconnect_delay() -> u64 {
        3_000
    }

    const fn default_max_reconnect_attempts() -> u32 {
        5
    }

    const fn default_poll_interval() -> u64 {
        5_000
    }

    const fn default_poll_page_size() -> u32 {
        100
    }

    const fn default_typing_throttle() -> u64 {
        2_000
    }

    const fn default_typing_clear() -> u64 {
        3_000
    }

    const fn default_unconfirmed_timeout() -> u64 {
        15_000
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: Self::default_reconnect_delay(),
            max_reconnect_attempts: Self::default_max_reconnect_attempts(),
            poll_interval_ms: Self::default_poll_interval(),
            poll_page_size: Self::default_poll_page_size(),
            typing_throttle_ms: Self::default_typing_throttle(),
            typing_clear_ms: Self::default_typing_clear(),
            unconfirmed_timeout_ms: Self::default_unconfirmed_timeout(),
        }
    }
}

fn as_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Load the client configuration by combining defaults, files, and environment overrides.
///
/// ```
/// use studio_chat_config::load;
///
/// std::env::remove_var("STUDIO_CHAT_CONFIG");
///
/// let config = load().expect("configuration should load with defaults");
/// assert!(!config.server.base_url.is_empty());
/// ```
pub fn load() -> anyhow::Result<AppConfig> {
    let defaults = AppConfig::default();

    let mut builder = config::Config::builder()
        .set_default("server.base_url", defaults.server.base_url.clone())?
        .set_default(
            "server.request_timeout_seconds",
            as_i64(defaults.server.request_timeout_seconds),
        )?
        .set_default("session.sender_type", defaults.session.sender_type.clone())?
        .set_default("sync.reconnect_delay_ms", as_i64(defaults.sync.reconnect_delay_ms))?
        .set_default(
            "sync.max_reconnect_attempts",
            i64::from(defaults.sync.max_reconnect_attempts),
        )?
        .set_default("sync.poll_interval_ms", as_i64(defaults.sync.poll_interval_ms))?
        .set_default("sync.poll_page_size", i64::from(defaults.sync.poll_page_size))?
        .set_default("sync.typing_throttle_ms", as_i64(defaults.sync.typing_throttle_ms))?
        .set_default("sync.typing_clear_ms", as_i64(defaults.sync.typing_clear_ms))?
        .set_default(
            "sync.unconfirmed_timeout_ms",
            as_i64(defaults.sync.unconfirmed_timeout_ms),
        )?;

    let environment_overrides = config::Environment::with_prefix("STUDIO_CHAT").separator("__");

    let mut config_file_attached = false;

    if let Ok(path) = std::env::var("STUDIO_CHAT_CONFIG") {
        builder = builder.add_source(config::File::from(PathBuf::from(&path)));
        config_file_attached = true;
        debug!(path, "loading configuration via STUDIO_CHAT_CONFIG");
    } else if let Ok(cwd) = std::env::current_dir() {
        let fallback = DEFAULT_CONFIG_FILES
            .iter()
            .map(|candidate| cwd.join(candidate))
            .find(|path| path.exists());

        if let Some(path) = fallback {
            debug!(path = %path.display(), "loading configuration file");
            builder = builder.add_source(config::File::from(path));
            config_file_attached = true;
        }
    }

    if !config_file_attached {
        debug!("no configuration file found, relying on defaults and environment overrides");
    }

    builder = builder.add_source(environment_overrides);

    let cfg = builder.build().context("unable to build configuration")?;

    let mut config = cfg
        .try_deserialize::<AppConfig>()
        .context("invalid configuration")?;

    if config.sync.poll_page_size == 0 {
        config.sync.poll_page_size = SyncConfig::default_poll_page_size();
    }

    debug!(?config, "loaded client configuration");
    Ok(config)
}
