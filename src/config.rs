//! Runtime configuration.
//!
//! Loaded once at startup from a TOML file and passed around by reference.
//! Everything except `[transport]` and `[[feeds]]` has a default, so a minimal
//! file only names where to send notifications and what to watch.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default capacity of the notification queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 50_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Folder holding the per-feed seen files and, by default, the queue file.
    #[serde(default = "default_data_folder")]
    pub data_folder: PathBuf,
    /// When false, seen items are only tracked in memory.
    #[serde(default = "default_true")]
    pub save_feeds: bool,
    /// Where the queue is persisted at shutdown.
    #[serde(default)]
    pub queue_file: Option<PathBuf>,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default)]
    pub watch: WatchConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    pub transport: TransportConfig,
    #[serde(default)]
    pub feeds: Vec<FeedConfig>,
}

/// A single watched feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedConfig {
    pub url: String,
    /// Regular expressions matched against item titles. Empty means `.*`.
    #[serde(default)]
    pub filters: Vec<String>,
    /// Free-form category label, copied into every notification.
    #[serde(default)]
    pub folder: String,
    /// Also match filters against the item content.
    #[serde(default)]
    pub match_content: bool,
}

/// Scheduling knobs shared by every feed watcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Linear backoff step applied per consecutive fetch failure.
    pub backoff_unit_secs: u64,
    /// Consecutive failures after which a feed is disabled.
    pub disable_threshold: u32,
    pub jitter_min_ms: u64,
    pub jitter_max_ms: u64,
    /// Refresh interval used when a feed does not advertise one.
    pub default_refresh_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            backoff_unit_secs: 60,
            disable_threshold: 100,
            jitter_min_ms: 1_000,
            jitter_max_ms: 10_000,
            default_refresh_secs: 600,
            request_timeout_secs: 30,
        }
    }
}

impl WatchConfig {
    pub fn backoff_unit(&self) -> Duration {
        Duration::from_secs(self.backoff_unit_secs)
    }

    pub fn default_refresh(&self) -> Duration {
        Duration::from_secs(self.default_refresh_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Pacing of the delivery worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Pause after every successful send.
    pub send_delay_ms: u64,
    /// Pause after a failed send before the next attempt.
    pub failure_cooldown_ms: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            send_delay_ms: 100,
            failure_cooldown_ms: 2_000,
        }
    }
}

impl DeliveryConfig {
    pub fn send_delay(&self) -> Duration {
        Duration::from_millis(self.send_delay_ms)
    }

    pub fn failure_cooldown(&self) -> Duration {
        Duration::from_millis(self.failure_cooldown_ms)
    }
}

/// Where notifications go.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TransportConfig {
    Mail(MailConfig),
    Telegram(TelegramConfig),
}

impl TransportConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Mail(_) => "mail",
            Self::Telegram(_) => "telegram",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailConfig {
    /// SMTP server as `host` or `host:port`.
    pub server: String,
    pub sender: String,
    pub destination: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: String,
    /// Chat id the messages are posted to.
    pub destination: String,
    #[serde(default = "default_telegram_api")]
    pub api_base: String,
}

fn default_data_folder() -> PathBuf {
    PathBuf::from("feeds")
}

fn default_true() -> bool {
    true
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

fn default_telegram_api() -> String {
    "https://api.telegram.org".to_string()
}

impl Config {
    /// Read and validate the configuration file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::io("Failed to read config file", path, e))?;
        let config = Self::from_toml(&content)?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that apply to the whole process. Per-feed problems (bad url,
    /// bad filter) are left to the feed's own watcher so they only take that
    /// feed down.
    pub fn validate(&self) -> Result<()> {
        if self.feeds.is_empty() {
            return Err(Error::config("no feeds configured"));
        }
        if self.queue_capacity == 0 {
            return Err(Error::config("queue_capacity must be greater than zero"));
        }
        if self.watch.disable_threshold == 0 {
            return Err(Error::config("watch.disable_threshold must be greater than zero"));
        }
        if self.watch.jitter_min_ms > self.watch.jitter_max_ms {
            return Err(Error::config(
                "watch.jitter_min_ms must not exceed watch.jitter_max_ms",
            ));
        }
        match &self.transport {
            TransportConfig::Mail(mail) => {
                if mail.server.is_empty() || mail.sender.is_empty() || mail.destination.is_empty()
                {
                    return Err(Error::config(
                        "mail transport needs server, sender and destination",
                    ));
                }
            }
            TransportConfig::Telegram(tg) => {
                if tg.bot_token.is_empty() || tg.destination.is_empty() {
                    return Err(Error::config(
                        "telegram transport needs bot_token and destination",
                    ));
                }
            }
        }
        Ok(())
    }

    pub fn queue_file(&self) -> PathBuf {
        self.queue_file
            .clone()
            .unwrap_or_else(|| self.data_folder.join("queue.json"))
    }
}
