//! Synchronizer configuration.
//!
//! Resolved from: explicit flags > `OPSDECK_*` env > `<data_dir>/config.toml` > defaults.
//! The data dir itself comes from `--data-dir` > `OPSDECK_DATA_DIR` > `~/.opsdeck`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::scroll::DEFAULT_SCROLL_THRESHOLD;
use opsdeck_protocol::frame::DEFAULT_ERROR_SENTINEL;

/// Close code the server uses when the conversation identifier is missing or invalid
pub const DEFAULT_MISSING_IDENTIFIER_CLOSE_CODE: u16 = 4400;

const DEFAULT_HISTORY_URL: &str = "http://localhost:9000/bbkernos";
const DEFAULT_CHANNEL_URL: &str = "ws://localhost:9000/bbkernos/ws/chat";
const DEFAULT_EVENT_BUFFER: usize = 256;

pub const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Base URL of the history service; `/conversations/{id}` is appended
    pub history_url: String,
    /// WebSocket endpoint; `conversation_id` is passed as a query parameter
    pub channel_url: String,
    /// Distance from the bottom (in viewport units) beyond which the view is pinned
    pub scroll_threshold: f64,
    /// No timeout when unset
    pub history_timeout_ms: Option<u64>,
    /// No timeout when unset
    pub handshake_timeout_ms: Option<u64>,
    /// Prefix marking an upstream error frame; empty disables error routing
    pub error_sentinel: String,
    pub missing_identifier_close_code: u16,
    /// Shown as the first message of a conversation without history
    pub greeting: Option<String>,
    /// Capacity of the per-session event and update queues
    pub event_buffer: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            history_url: DEFAULT_HISTORY_URL.to_string(),
            channel_url: DEFAULT_CHANNEL_URL.to_string(),
            scroll_threshold: DEFAULT_SCROLL_THRESHOLD,
            history_timeout_ms: None,
            handshake_timeout_ms: None,
            error_sentinel: DEFAULT_ERROR_SENTINEL.to_string(),
            missing_identifier_close_code: DEFAULT_MISSING_IDENTIFIER_CLOSE_CODE,
            greeting: None,
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

impl SyncConfig {
    /// Load from a TOML file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.display().to_string(),
                    source,
                })
            }
        };
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Apply `OPSDECK_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(url) = lookup("OPSDECK_HISTORY_URL") {
            self.history_url = url;
        }
        if let Some(url) = lookup("OPSDECK_CHANNEL_URL") {
            self.channel_url = url;
        }
        if let Some(raw) = lookup("OPSDECK_HISTORY_TIMEOUT_MS") {
            self.history_timeout_ms = Some(parse_override("OPSDECK_HISTORY_TIMEOUT_MS", &raw)?);
        }
        if let Some(raw) = lookup("OPSDECK_HANDSHAKE_TIMEOUT_MS") {
            self.handshake_timeout_ms =
                Some(parse_override("OPSDECK_HANDSHAKE_TIMEOUT_MS", &raw)?);
        }
        if let Some(greeting) = lookup("OPSDECK_GREETING") {
            self.greeting = Some(greeting).filter(|g| !g.trim().is_empty());
        }
        Ok(())
    }

    /// Check that both endpoints parse and use the expected schemes.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let history = parse_url("history", &self.history_url)?;
        if !matches!(history.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidUrl {
                field: "history",
                value: self.history_url.clone(),
                detail: "expected http or https".to_string(),
            });
        }
        let channel = parse_url("channel", &self.channel_url)?;
        if !matches!(channel.scheme(), "ws" | "wss") {
            return Err(ConfigError::InvalidUrl {
                field: "channel",
                value: self.channel_url.clone(),
                detail: "expected ws or wss".to_string(),
            });
        }
        Ok(())
    }

    pub fn history_timeout(&self) -> Option<Duration> {
        self.history_timeout_ms.map(Duration::from_millis)
    }

    pub fn handshake_timeout(&self) -> Option<Duration> {
        self.handshake_timeout_ms.map(Duration::from_millis)
    }
}

/// Resolve the data directory. Priority: `explicit` > `OPSDECK_DATA_DIR` > `~/.opsdeck`.
pub fn resolve_data_dir(explicit: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(p) = explicit {
        return Ok(p.to_path_buf());
    }
    if let Ok(env_val) = std::env::var("OPSDECK_DATA_DIR") {
        if !env_val.is_empty() {
            return Ok(PathBuf::from(env_val));
        }
    }
    dirs::home_dir()
        .map(|home| home.join(".opsdeck"))
        .ok_or(ConfigError::NoDataDir)
}

pub(crate) fn parse_url(field: &'static str, value: &str) -> Result<Url, ConfigError> {
    Url::parse(value).map_err(|e| ConfigError::InvalidUrl {
        field,
        value: value.to_string(),
        detail: e.to_string(),
    })
}

fn parse_override(key: &'static str, raw: &str) -> Result<u64, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::InvalidOverride {
            key,
            value: raw.to_string(),
        })
}
