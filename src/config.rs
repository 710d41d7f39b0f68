use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Source-topic id → destination-topic id. Compiled in; [`TopicMap`]
/// construction fails on duplicate source keys, so every entry here is
/// reachable.
///
/// [`TopicMap`]: crate::mirror::topics::TopicMap
pub const TOPIC_TABLE: &[(i64, i64)] = &[
    (5, 8),
    (6, 9),
    (7, 15),
    (8, 6),
    (9, 7),
    (10, 4),
    (11, 11),
    (12, 19),
    (14, 10),
    (15, 14),
    (16, 13),
    (17, 16),
    (18, 17),
    (19, 12),
    (20, 20),
    (21, 18),
];

#[derive(Debug, Clone)]
pub struct Config {
    pub bot_token: String,
    /// Numeric id of the forum chat being mirrored
    pub source_chat: i64,
    /// Numeric id of the forum chat receiving the mirror
    pub target_chat: i64,
    pub pacing: Pacing,
}

/// Sweep pacing and backoff tunables. Loaded from the optional TOML file
/// named by `MIRROR_CONFIG`; every field has a default.
#[derive(Debug, Clone, Deserialize)]
pub struct Pacing {
    /// Pause between full reconciliation sweeps
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    /// Pause between consecutive forwards within one topic scan
    #[serde(default = "default_message_delay")]
    pub message_delay_secs: u64,
    /// Pause after a single topic's scan fails
    #[serde(default = "default_topic_backoff")]
    pub topic_backoff_secs: u64,
    /// Pause after a whole sweep fails
    #[serde(default = "default_sweep_backoff")]
    pub sweep_backoff_secs: u64,
    /// Messages fetched per topic per sweep
    #[serde(default = "default_sweep_fetch_limit")]
    pub sweep_fetch_limit: usize,
    /// Messages fetched per topic when seeding cursors at startup
    #[serde(default = "default_init_fetch_limit")]
    pub init_fetch_limit: usize,
    /// Cap on send attempts for a rate-limited message. Unset retries for
    /// as long as the server keeps asking to wait.
    #[serde(default)]
    pub max_send_attempts: Option<u32>,
}

fn default_sweep_interval() -> u64 {
    30
}

fn default_message_delay() -> u64 {
    1
}

fn default_topic_backoff() -> u64 {
    5
}

fn default_sweep_backoff() -> u64 {
    60
}

fn default_sweep_fetch_limit() -> usize {
    10
}

fn default_init_fetch_limit() -> usize {
    3
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval(),
            message_delay_secs: default_message_delay(),
            topic_backoff_secs: default_topic_backoff(),
            sweep_backoff_secs: default_sweep_backoff(),
            sweep_fetch_limit: default_sweep_fetch_limit(),
            init_fetch_limit: default_init_fetch_limit(),
            max_send_attempts: None,
        }
    }
}

impl Pacing {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }
}

impl Config {
    /// Read process-boundary settings from the environment:
    /// `TELOXIDE_TOKEN`, `SOURCE_CHAT`, `TARGET_CHAT`, and the optional
    /// `MIRROR_CONFIG` path to a pacing TOML file.
    pub fn load() -> Result<Self> {
        let bot_token = required_env("TELOXIDE_TOKEN")?;
        let source_chat = required_env("SOURCE_CHAT")?
            .parse()
            .context("SOURCE_CHAT must be a numeric chat id")?;
        let target_chat = required_env("TARGET_CHAT")?
            .parse()
            .context("TARGET_CHAT must be a numeric chat id")?;

        let pacing = match std::env::var("MIRROR_CONFIG") {
            Ok(path) => Pacing::load(Path::new(&path))?,
            Err(_) => Pacing::default(),
        };

        Ok(Self {
            bot_token,
            source_chat,
            target_chat,
            pacing,
        })
    }
}

fn required_env(name: &str) -> Result<String> {
    std::env::var(name).with_context(|| format!("Missing required environment variable: {name}"))
}
