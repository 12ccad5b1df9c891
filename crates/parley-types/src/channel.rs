//! Per-channel chat configuration.
//!
//! A [`ChannelConfig`] exists for every channel an administrator has
//! activated. The coordinator only ever reads it (through a cached
//! snapshot); administration commands own all writes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Default system prompt for freshly activated channels.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";

/// Default idle interval before a session resets (one hour).
pub const DEFAULT_RESET_DELTA_SECS: u32 = 3600;

/// Default number of assistant replies before a session resets.
pub const DEFAULT_MAX_TURNS: u32 = 10;

/// Completion model selectable per channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChatModel {
    #[default]
    #[serde(rename = "gpt-4o-mini")]
    Gpt4oMini,
    #[serde(rename = "gpt-4o")]
    Gpt4o,
    #[serde(rename = "gpt-4.1-mini")]
    Gpt41Mini,
    #[serde(rename = "gpt-4.1")]
    Gpt41,
}

impl ChatModel {
    /// All selectable models, in the order they are offered to users.
    pub const ALL: [ChatModel; 4] = [
        ChatModel::Gpt4oMini,
        ChatModel::Gpt4o,
        ChatModel::Gpt41Mini,
        ChatModel::Gpt41,
    ];

    /// Model identifier sent to the completion endpoint.
    pub fn api_name(&self) -> &'static str {
        match self {
            ChatModel::Gpt4oMini => "gpt-4o-mini",
            ChatModel::Gpt4o => "gpt-4o",
            ChatModel::Gpt41Mini => "gpt-4.1-mini",
            ChatModel::Gpt41 => "gpt-4.1",
        }
    }
}

impl fmt::Display for ChatModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.api_name())
    }
}

impl FromStr for ChatModel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "gpt-4o-mini" => Ok(ChatModel::Gpt4oMini),
            "gpt-4o" => Ok(ChatModel::Gpt4o),
            "gpt-4.1-mini" => Ok(ChatModel::Gpt41Mini),
            "gpt-4.1" => Ok(ChatModel::Gpt41),
            other => Err(format!("invalid chat model: '{other}'")),
        }
    }
}

/// Boolean channel settings flipped by the `toggle` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelToggle {
    Enabled,
    InheritOnReset,
}

impl fmt::Display for ChannelToggle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelToggle::Enabled => write!(f, "enabled"),
            ChannelToggle::InheritOnReset => write!(f, "inherit_on_reset"),
        }
    }
}

impl FromStr for ChannelToggle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "enabled" => Ok(ChannelToggle::Enabled),
            "inherit_on_reset" => Ok(ChannelToggle::InheritOnReset),
            other => Err(format!("invalid channel setting: '{other}'")),
        }
    }
}

/// Settings for one activated channel. At most one exists per `(guild_id, channel_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub guild_id: u64,
    pub channel_id: u64,
    pub enabled: bool,
    pub system_prompt: String,
    pub model: ChatModel,
    pub reset_delta_secs: u32,
    pub max_turns: u32,
    pub inherit_on_reset: bool,
    /// Reaction applied to the reply once an exchange finishes.
    pub completion_marker: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChannelConfig {
    /// A freshly activated channel with default settings.
    pub fn new(guild_id: u64, channel_id: u64, completion_marker: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            guild_id,
            channel_id,
            enabled: true,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            model: ChatModel::default(),
            reset_delta_secs: DEFAULT_RESET_DELTA_SECS,
            max_turns: DEFAULT_MAX_TURNS,
            inherit_on_reset: false,
            completion_marker: completion_marker.into(),
            created_at: now,
            updated_at: now,
        }
    }
}
