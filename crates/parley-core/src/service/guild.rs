//! Per-guild API key management.

use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};
use tracing::{info, warn};

use parley_types::credential::CredentialStatus;

use crate::repository::channel::ChannelConfigRepository;
use crate::repository::credential::{CredentialCipher, CredentialRepository, is_plausible_api_key};

use super::AdminError;

/// What a revoke removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RevokeSummary {
    pub had_key: bool,
    pub channels_removed: u64,
}

/// Service storing each guild's provider API key, encrypted at rest.
pub struct GuildService<K: CredentialRepository, C: ChannelConfigRepository> {
    credentials: K,
    channels: C,
    cipher: Arc<dyn CredentialCipher>,
}

impl<K: CredentialRepository, C: ChannelConfigRepository> GuildService<K, C> {
    pub fn new(credentials: K, channels: C, cipher: Arc<dyn CredentialCipher>) -> Self {
        Self {
            credentials,
            channels,
            cipher,
        }
    }

    /// Validate, encrypt, and store a guild's API key, replacing any previous one.
    pub async fn set_api_key(&self, guild_id: u64, api_key: &SecretString) -> Result<(), AdminError> {
        let key = api_key.expose_secret().trim();
        if !is_plausible_api_key(key) {
            warn!(guild_id, "rejected API key with unexpected shape");
            return Err(AdminError::InvalidApiKey);
        }

        let encrypted = self.cipher.encrypt(key)?;
        self.credentials.set(guild_id, &encrypted).await?;

        info!(guild_id, "guild API key stored");
        Ok(())
    }

    /// Remove the guild's key and every active channel in the guild.
    pub async fn revoke(&self, guild_id: u64) -> Result<RevokeSummary, AdminError> {
        let had_key = self.credentials.delete(guild_id).await?;
        let channels_removed = self.channels.delete_guild(guild_id).await?;

        info!(guild_id, had_key, channels_removed, "guild access revoked");
        Ok(RevokeSummary {
            had_key,
            channels_removed,
        })
    }

    pub async fn is_initialized(&self, guild_id: u64) -> Result<bool, AdminError> {
        Ok(self.credentials.get(guild_id).await?.is_some())
    }

    /// Guilds with a stored key, without the key material.
    pub async fn list(&self) -> Result<Vec<CredentialStatus>, AdminError> {
        let mut statuses: Vec<CredentialStatus> = self
            .credentials
            .list_all()
            .await?
            .iter()
            .map(CredentialStatus::from)
            .collect();
        statuses.sort_by_key(|s| s.guild_id);
        Ok(statuses)
    }
}
