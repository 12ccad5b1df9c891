//! Global configuration types for Parley.
//!
//! `GlobalConfig` represents the top-level `config.toml` that controls the
//! Discord connection, provider endpoint, streaming timings, and vault key
//! source.

use serde::{Deserialize, Serialize};

/// Top-level configuration for a Parley installation.
///
/// Loaded from `~/.parley/config.toml`. All fields have sensible defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Discord bot token. `PARLEY_DISCORD_TOKEN` takes precedence when set.
    #[serde(default)]
    pub discord_token: String,

    /// Register slash commands on this guild only (instant propagation).
    /// When unset, commands are registered globally.
    #[serde(default)]
    pub command_guild_id: Option<u64>,

    /// Base URL of the OpenAI-compatible completion endpoint.
    #[serde(default = "default_openai_base_url")]
    pub openai_base_url: String,

    #[serde(default)]
    pub chat: ChatSettings,

    #[serde(default)]
    pub vault: VaultSettings,

    #[serde(default)]
    pub telemetry: TelemetrySettings,
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            discord_token: String::new(),
            command_guild_id: None,
            openai_base_url: default_openai_base_url(),
            chat: ChatSettings::default(),
            vault: VaultSettings::default(),
            telemetry: TelemetrySettings::default(),
        }
    }
}

/// Timings and limits for the streaming coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSettings {
    /// Seconds to wait for the first fragment before retrying.
    #[serde(default = "default_watchdog_secs")]
    pub watchdog_secs: u64,

    /// Seconds the "retrying" notice stays up before the next attempt.
    #[serde(default = "default_retry_pause_secs")]
    pub retry_pause_secs: u64,

    /// Stalled attempts allowed before the exchange is abandoned.
    #[serde(default = "default_max_stall_retries")]
    pub max_stall_retries: u32,

    /// Fragments accumulated before an edit is forced.
    #[serde(default = "default_flush_fragment_threshold")]
    pub flush_fragment_threshold: usize,

    /// Non-system turns carried over by an inheriting reset.
    #[serde(default = "default_inherit_tail_turns")]
    pub inherit_tail_turns: usize,

    /// Reaction used when a channel's configured marker cannot be applied.
    #[serde(default = "default_completion_marker")]
    pub default_completion_marker: String,
}

fn default_watchdog_secs() -> u64 {
    10
}

fn default_retry_pause_secs() -> u64 {
    3
}

fn default_max_stall_retries() -> u32 {
    5
}

fn default_flush_fragment_threshold() -> usize {
    200
}

fn default_inherit_tail_turns() -> usize {
    6
}

fn default_completion_marker() -> String {
    "🆗".to_string()
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            watchdog_secs: default_watchdog_secs(),
            retry_pause_secs: default_retry_pause_secs(),
            max_stall_retries: default_max_stall_retries(),
            flush_fragment_threshold: default_flush_fragment_threshold(),
            inherit_tail_turns: default_inherit_tail_turns(),
            default_completion_marker: default_completion_marker(),
        }
    }
}

/// Where the vault master key comes from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VaultKeySource {
    /// `vault.key` in the data directory, generated on first use.
    #[default]
    File,
    /// The OS keychain.
    Keychain,
    /// Argon2id derivation from `PARLEY_VAULT_PASSWORD`.
    Password,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VaultSettings {
    #[serde(default)]
    pub key_source: VaultKeySource,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelemetrySettings {
    /// Export spans to stdout through OpenTelemetry.
    #[serde(default)]
    pub otel_stdout: bool,
}
