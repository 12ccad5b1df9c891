//! Channel configuration repository trait definition.

use parley_types::channel::ChannelConfig;
use parley_types::error::RepositoryError;

/// Persistent storage for per-channel settings.
pub trait ChannelConfigRepository: Send + Sync {
    /// Every stored configuration, used to refresh the in-memory cache.
    fn list_all(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<ChannelConfig>, RepositoryError>> + Send;

    fn get(
        &self,
        guild_id: u64,
        channel_id: u64,
    ) -> impl std::future::Future<Output = Result<Option<ChannelConfig>, RepositoryError>> + Send;

    /// Insert or replace the configuration for `(guild_id, channel_id)`.
    fn upsert(
        &self,
        config: &ChannelConfig,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Returns whether a configuration was removed.
    fn delete(
        &self,
        guild_id: u64,
        channel_id: u64,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// Remove every channel of a guild. Returns the number removed.
    fn delete_guild(
        &self,
        guild_id: u64,
    ) -> impl std::future::Future<Output = Result<u64, RepositoryError>> + Send;
}
