//! Stored guild credentials.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// A guild's provider API key, encrypted with the vault cipher.
///
/// Not `Serialize`; ciphertext never leaves the process as JSON.
#[derive(Clone)]
pub struct GuildCredential {
    pub guild_id: u64,
    pub encrypted_key: Vec<u8>,
    pub updated_at: DateTime<Utc>,
}

impl std::fmt::Debug for GuildCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuildCredential")
            .field("guild_id", &self.guild_id)
            .field("encrypted_key", &"[redacted]")
            .field("updated_at", &self.updated_at)
            .finish()
    }
}

/// Metadata about a guild credential, safe to display.
#[derive(Debug, Clone, Serialize)]
pub struct CredentialStatus {
    pub guild_id: u64,
    pub updated_at: DateTime<Utc>,
}

impl From<&GuildCredential> for CredentialStatus {
    fn from(credential: &GuildCredential) -> Self {
        Self {
            guild_id: credential.guild_id,
            updated_at: credential.updated_at,
        }
    }
}
