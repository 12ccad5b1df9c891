//! Application state wiring all services together.
//!
//! AppState holds the concrete service instances used by the CLI commands and
//! the Discord adapter. Services are generic over repository traits; AppState
//! pins them to the SQLite implementations.

use std::path::PathBuf;
use std::sync::Arc;

use parley_core::chat::coordinator::{ChatCoordinator, CoordinatorSettings};
use parley_core::service::channel::ChannelService;
use parley_core::service::guild::GuildService;
use parley_infra::crypto::vault::VaultCrypto;
use parley_infra::llm::openai_compat::OpenAiProviderFactory;
use parley_infra::sqlite::channel::SqliteChannelConfigRepository;
use parley_infra::sqlite::credential::SqliteCredentialRepository;
use parley_infra::sqlite::pool::{DatabasePool, database_url};
use parley_infra::sqlite::usage::SqliteUsageRepository;
use parley_types::config::GlobalConfig;
use serenity::http::Http;

use crate::discord::sink::DiscordSink;

/// Concrete type aliases for the service generics pinned to infra implementations.
pub type ConcreteChannelService = ChannelService<SqliteChannelConfigRepository>;

pub type ConcreteGuildService = GuildService<SqliteCredentialRepository, SqliteChannelConfigRepository>;

pub type ConcreteCoordinator = ChatCoordinator<
    DiscordSink,
    OpenAiProviderFactory,
    SqliteChannelConfigRepository,
    SqliteCredentialRepository,
    SqliteUsageRepository,
>;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: GlobalConfig,
    pub channel_service: Arc<ConcreteChannelService>,
    pub guild_service: Arc<ConcreteGuildService>,
    pub usage_repo: SqliteUsageRepository,
    pub data_dir: PathBuf,
    pub db_pool: DatabasePool,
    vault: Arc<VaultCrypto>,
}

impl AppState {
    /// Initialize the application state: open the DB and unlock the vault.
    pub async fn init(data_dir: PathBuf, config: GlobalConfig) -> anyhow::Result<Self> {
        let db_pool = DatabasePool::new(&database_url(&data_dir)).await?;
        let vault = Arc::new(VaultCrypto::from_source(config.vault.key_source, &data_dir)?);

        let channel_repo = SqliteChannelConfigRepository::new(db_pool.clone());
        let credential_repo = SqliteCredentialRepository::new(db_pool.clone());

        let channel_service = ChannelService::new(
            channel_repo.clone(),
            config.chat.default_completion_marker.clone(),
        );
        let guild_service = GuildService::new(credential_repo, channel_repo, vault.clone());

        Ok(Self {
            usage_repo: SqliteUsageRepository::new(db_pool.clone()),
            channel_service: Arc::new(channel_service),
            guild_service: Arc::new(guild_service),
            config,
            data_dir,
            db_pool,
            vault,
        })
    }

    /// Build the chat coordinator writing through `http` and load its caches.
    pub async fn coordinator(&self, http: Arc<Http>) -> anyhow::Result<ConcreteCoordinator> {
        let coordinator = ChatCoordinator::new(
            DiscordSink::new(http),
            OpenAiProviderFactory::new(self.config.openai_base_url.clone()),
            SqliteChannelConfigRepository::new(self.db_pool.clone()),
            SqliteCredentialRepository::new(self.db_pool.clone()),
            self.usage_repo.clone(),
            self.vault.clone(),
            CoordinatorSettings::from(&self.config.chat),
        );

        coordinator.refresh_channel_config().await?;
        coordinator.refresh_credentials().await?;
        Ok(coordinator)
    }
}
