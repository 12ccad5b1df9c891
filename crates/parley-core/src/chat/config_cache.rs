//! Read-mostly snapshots of channel configuration and guild credentials.
//!
//! Both caches are replaced wholesale by a refresh and read without locking.
//! Readers may see a slightly stale snapshot between a write and the next
//! refresh; every configuration command triggers a refresh after writing.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;

use parley_types::channel::ChannelConfig;
use parley_types::credential::GuildCredential;

/// Snapshot of every activated channel, keyed by channel id.
pub struct ChannelConfigCache {
    snapshot: ArcSwap<HashMap<u64, ChannelConfig>>,
}

impl ChannelConfigCache {
    pub fn new() -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(HashMap::new()),
        }
    }

    /// Configuration for a channel, if it has been activated.
    pub fn lookup(&self, channel_id: u64) -> Option<ChannelConfig> {
        self.snapshot.load().get(&channel_id).cloned()
    }

    /// Like [`lookup`](Self::lookup) but also requires the channel to belong to `guild_id`.
    pub fn lookup_in(&self, guild_id: u64, channel_id: u64) -> Option<ChannelConfig> {
        self.lookup(channel_id).filter(|c| c.guild_id == guild_id)
    }

    /// Atomically replace the whole snapshot.
    pub fn replace(&self, configs: Vec<ChannelConfig>) {
        let next: HashMap<u64, ChannelConfig> =
            configs.into_iter().map(|c| (c.channel_id, c)).collect();
        self.snapshot.store(Arc::new(next));
    }

    pub fn len(&self) -> usize {
        self.snapshot.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ChannelConfigCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of encrypted guild API keys, keyed by guild id.
pub struct CredentialCache {
    snapshot: ArcSwap<HashMap<u64, Vec<u8>>>,
}

impl CredentialCache {
    pub fn new() -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(HashMap::new()),
        }
    }

    /// Encrypted key for a guild.
    pub fn lookup(&self, guild_id: u64) -> Option<Vec<u8>> {
        self.snapshot.load().get(&guild_id).cloned()
    }

    pub fn replace(&self, credentials: Vec<GuildCredential>) {
        let next: HashMap<u64, Vec<u8>> = credentials
            .into_iter()
            .map(|c| (c.guild_id, c.encrypted_key))
            .collect();
        self.snapshot.store(Arc::new(next));
    }

    pub fn len(&self) -> usize {
        self.snapshot.load().len()
    }
}

impl Default for CredentialCache {
    fn default() -> Self {
        Self::new()
    }
}
