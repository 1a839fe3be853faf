//! Typed configuration structures
//!
//! Provides strongly-typed access to configuration values with validation
//! and default values. Top-level keys keep the camelCase names of existing
//! `config.json` files.

use crate::commands::DEFAULT_MENTION;
use crate::dispatch::DeletePolicy;
use crate::supervisor::{SupervisorConfig, DEFAULT_RECONNECT_DELAY};
use crate::tracing::TracingConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotConfig {
    /// Server base URL, e.g. `http://chat.local:8065`
    pub mattermost_server: String,

    /// Bot access token
    pub mattermost_token: String,

    /// Team the channel belongs to
    pub mattermost_team_name: String,

    /// Channel the bot listens and replies in
    pub mattermost_channel: String,

    /// Bot behavior
    #[serde(default)]
    pub bot: BotSettings,

    /// Logging configuration
    #[serde(default)]
    pub logging: TracingConfig,
}

/// Bot behavior settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotSettings {
    /// Mention token that addresses the bot
    #[serde(default = "default_mention")]
    pub mention: String,

    /// Seconds to wait after a failed connection attempt
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,

    /// Cap on concurrently handled messages (unbounded when absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_in_flight: Option<usize>,

    /// Require the creator for delete, like close
    #[serde(default)]
    pub restrict_delete_to_creator: bool,
}

fn default_mention() -> String {
    DEFAULT_MENTION.to_string()
}

fn default_reconnect_delay_secs() -> u64 {
    DEFAULT_RECONNECT_DELAY.as_secs()
}

impl Default for BotSettings {
    fn default() -> Self {
        Self {
            mention: default_mention(),
            reconnect_delay_secs: default_reconnect_delay_secs(),
            max_in_flight: None,
            restrict_delete_to_creator: false,
        }
    }
}

impl BotSettings {
    pub fn delete_policy(&self) -> DeletePolicy {
        if self.restrict_delete_to_creator {
            DeletePolicy::CreatorOnly
        } else {
            DeletePolicy::Anyone
        }
    }

    pub fn supervisor(&self) -> SupervisorConfig {
        SupervisorConfig {
            reconnect_delay: Duration::from_secs(self.reconnect_delay_secs),
            max_in_flight: self.max_in_flight,
        }
    }
}
