//! Channel activation and per-channel settings.

use chrono::Utc;
use tracing::info;

use parley_types::channel::{ChannelConfig, ChannelToggle, ChatModel};

use crate::repository::channel::ChannelConfigRepository;

use super::AdminError;

/// Service managing which channels the bot answers in, and how.
pub struct ChannelService<C: ChannelConfigRepository> {
    repo: C,
    default_marker: String,
}

impl<C: ChannelConfigRepository> ChannelService<C> {
    /// `default_marker` is the completion marker given to newly activated channels.
    pub fn new(repo: C, default_marker: impl Into<String>) -> Self {
        Self {
            repo,
            default_marker: default_marker.into(),
        }
    }

    /// Start answering in a channel, optionally with a custom system prompt.
    pub async fn activate(
        &self,
        guild_id: u64,
        channel_id: u64,
        system_prompt: Option<String>,
    ) -> Result<ChannelConfig, AdminError> {
        if self.repo.get(guild_id, channel_id).await?.is_some() {
            return Err(AdminError::AlreadyActive);
        }

        let mut config = ChannelConfig::new(guild_id, channel_id, self.default_marker.clone());
        if let Some(prompt) = system_prompt {
            config.system_prompt = validate_prompt(&prompt)?;
        }
        self.repo.upsert(&config).await?;

        info!(guild_id, channel_id, "channel activated");
        Ok(config)
    }

    /// Stop answering in a channel and forget its settings.
    pub async fn deactivate(&self, guild_id: u64, channel_id: u64) -> Result<(), AdminError> {
        if !self.repo.delete(guild_id, channel_id).await? {
            return Err(AdminError::NotActive);
        }
        info!(guild_id, channel_id, "channel deactivated");
        Ok(())
    }

    pub async fn show(&self, guild_id: u64, channel_id: u64) -> Result<ChannelConfig, AdminError> {
        self.repo
            .get(guild_id, channel_id)
            .await?
            .ok_or(AdminError::NotActive)
    }

    /// Every active channel, across guilds.
    pub async fn list(&self) -> Result<Vec<ChannelConfig>, AdminError> {
        let mut configs = self.repo.list_all().await?;
        configs.sort_by_key(|c| (c.guild_id, c.channel_id));
        Ok(configs)
    }

    pub async fn set_system_prompt(
        &self,
        guild_id: u64,
        channel_id: u64,
        prompt: &str,
    ) -> Result<ChannelConfig, AdminError> {
        let prompt = validate_prompt(prompt)?;
        self.update(guild_id, channel_id, |c| c.system_prompt = prompt)
            .await
    }

    pub async fn set_model(
        &self,
        guild_id: u64,
        channel_id: u64,
        model: ChatModel,
    ) -> Result<ChannelConfig, AdminError> {
        self.update(guild_id, channel_id, |c| c.model = model).await
    }

    /// Set the reaction applied to finished replies (unicode or custom emoji).
    pub async fn set_completion_marker(
        &self,
        guild_id: u64,
        channel_id: u64,
        marker: &str,
    ) -> Result<ChannelConfig, AdminError> {
        let marker = marker.trim();
        if marker.is_empty() || marker.chars().any(char::is_whitespace) {
            return Err(AdminError::InvalidValue(
                "completion marker must be a single emoji".to_string(),
            ));
        }
        let marker = marker.to_string();
        self.update(guild_id, channel_id, |c| c.completion_marker = marker)
            .await
    }

    /// Assistant replies kept before the history resets. Must be at least 1.
    pub async fn set_max_turns(
        &self,
        guild_id: u64,
        channel_id: u64,
        max_turns: u32,
    ) -> Result<ChannelConfig, AdminError> {
        if max_turns == 0 {
            return Err(AdminError::InvalidValue(
                "max turns must be at least 1".to_string(),
            ));
        }
        self.update(guild_id, channel_id, |c| c.max_turns = max_turns)
            .await
    }

    /// Idle seconds before the history resets. Must be at least 1.
    pub async fn set_reset_delta(
        &self,
        guild_id: u64,
        channel_id: u64,
        seconds: u32,
    ) -> Result<ChannelConfig, AdminError> {
        if seconds == 0 {
            return Err(AdminError::InvalidValue(
                "reset delta must be at least 1 second".to_string(),
            ));
        }
        self.update(guild_id, channel_id, |c| c.reset_delta_secs = seconds)
            .await
    }

    /// Flip a boolean setting. Returns its new value.
    pub async fn toggle(
        &self,
        guild_id: u64,
        channel_id: u64,
        setting: ChannelToggle,
    ) -> Result<bool, AdminError> {
        let config = self
            .update(guild_id, channel_id, |c| match setting {
                ChannelToggle::Enabled => c.enabled = !c.enabled,
                ChannelToggle::InheritOnReset => c.inherit_on_reset = !c.inherit_on_reset,
            })
            .await?;

        let value = match setting {
            ChannelToggle::Enabled => config.enabled,
            ChannelToggle::InheritOnReset => config.inherit_on_reset,
        };
        info!(guild_id, channel_id, %setting, value, "channel setting toggled");
        Ok(value)
    }

    async fn update(
        &self,
        guild_id: u64,
        channel_id: u64,
        apply: impl FnOnce(&mut ChannelConfig),
    ) -> Result<ChannelConfig, AdminError> {
        let mut config = self.show(guild_id, channel_id).await?;
        apply(&mut config);
        config.updated_at = Utc::now();
        self.repo.upsert(&config).await?;
        Ok(config)
    }
}

fn validate_prompt(prompt: &str) -> Result<String, AdminError> {
    let prompt = prompt.trim();
    if prompt.is_empty() {
        return Err(AdminError::InvalidValue(
            "system prompt cannot be empty".to_string(),
        ));
    }
    Ok(prompt.to_string())
}
