//! Configuration loading
//!
//! Reads the bot configuration once at startup. Any failure here is fatal.

pub mod types;

pub use types::{BotConfig, BotSettings};

use serde_json::Value;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Config file used when no path is given
pub const DEFAULT_CONFIG_PATH: &str = "config.json";

/// Placeholder printed instead of secrets
const REDACTED: &str = "[REDACTED]";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Load and validate the configuration file
pub fn load_config(path: &Path) -> Result<BotConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let config = parse_config(&raw).map_err(|message| ConfigError::Parse {
        path: path.to_path_buf(),
        message,
    })?;
    config.validate()?;
    Ok(config)
}

/// Parse configuration text; accepts JSON and JSON5
pub fn parse_config(raw: &str) -> Result<BotConfig, String> {
    json5::from_str(raw).map_err(|e| e.to_string())
}

impl BotConfig {
    /// Check values that deserialization cannot
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (key, value) in [
            ("mattermostServer", &self.mattermost_server),
            ("mattermostToken", &self.mattermost_token),
            ("mattermostTeamName", &self.mattermost_team_name),
            ("mattermostChannel", &self.mattermost_channel),
            ("bot.mention", &self.bot.mention),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("{key} must not be empty")));
            }
        }

        let server = url::Url::parse(&self.mattermost_server)
            .map_err(|e| ConfigError::Invalid(format!("mattermostServer: {e}")))?;
        if !matches!(server.scheme(), "http" | "https") {
            return Err(ConfigError::Invalid(format!(
                "mattermostServer must be an http or https URL, got '{}'",
                server.scheme()
            )));
        }

        if self.bot.reconnect_delay_secs == 0 {
            return Err(ConfigError::Invalid(
                "bot.reconnectDelaySecs must be at least 1".to_string(),
            ));
        }
        if self.bot.max_in_flight == Some(0) {
            return Err(ConfigError::Invalid(
                "bot.maxInFlight must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// JSON view with secrets replaced
    pub fn redacted(&self) -> Value {
        let mut value = serde_json::to_value(self).unwrap_or(Value::Null);
        if let Some(token) = value.get_mut("mattermostToken") {
            *token = Value::String(REDACTED.to_string());
        }
        value
    }
}
