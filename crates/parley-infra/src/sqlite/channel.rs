//! SQLite channel configuration repository.
//!
//! Implements `ChannelConfigRepository` from `parley-core` using sqlx with split read/write pools.

use parley_core::repository::channel::ChannelConfigRepository;
use parley_types::channel::{ChannelConfig, ChatModel};
use parley_types::error::RepositoryError;
use sqlx::Row;

use super::pool::DatabasePool;
use super::{format_datetime, parse_datetime, parse_id};

const SELECT_COLUMNS: &str = "SELECT guild_id, channel_id, enabled, system_prompt, model, reset_delta_secs, max_turns, inherit_on_reset, completion_marker, created_at, updated_at FROM channel_configs";

/// SQLite-backed implementation of `ChannelConfigRepository`.
#[derive(Clone)]
pub struct SqliteChannelConfigRepository {
    pool: DatabasePool,
}

impl SqliteChannelConfigRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

/// Internal row type for mapping SQLite rows to domain ChannelConfig.
struct ChannelConfigRow {
    guild_id: String,
    channel_id: String,
    enabled: bool,
    system_prompt: String,
    model: String,
    reset_delta_secs: i64,
    max_turns: i64,
    inherit_on_reset: bool,
    completion_marker: String,
    created_at: String,
    updated_at: String,
}

impl ChannelConfigRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            guild_id: row.try_get("guild_id")?,
            channel_id: row.try_get("channel_id")?,
            enabled: row.try_get("enabled")?,
            system_prompt: row.try_get("system_prompt")?,
            model: row.try_get("model")?,
            reset_delta_secs: row.try_get("reset_delta_secs")?,
            max_turns: row.try_get("max_turns")?,
            inherit_on_reset: row.try_get("inherit_on_reset")?,
            completion_marker: row.try_get("completion_marker")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn into_config(self) -> Result<ChannelConfig, RepositoryError> {
        let model: ChatModel = self
            .model
            .parse()
            .map_err(|e: String| RepositoryError::Query(e))?;

        Ok(ChannelConfig {
            guild_id: parse_id("guild_id", &self.guild_id)?,
            channel_id: parse_id("channel_id", &self.channel_id)?,
            enabled: self.enabled,
            system_prompt: self.system_prompt,
            model,
            reset_delta_secs: to_u32("reset_delta_secs", self.reset_delta_secs)?,
            max_turns: to_u32("max_turns", self.max_turns)?,
            inherit_on_reset: self.inherit_on_reset,
            completion_marker: self.completion_marker,
            created_at: parse_datetime(&self.created_at)?,
            updated_at: parse_datetime(&self.updated_at)?,
        })
    }
}

fn to_u32(column: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| RepositoryError::Query(format!("{column} out of range: {value}")))
}

fn map_write_error(e: sqlx::Error) -> RepositoryError {
    match e.as_database_error() {
        Some(db) if db.is_unique_violation() => {
            RepositoryError::Conflict("channel is already configured in another guild".to_string())
        }
        _ => RepositoryError::Query(e.to_string()),
    }
}

impl ChannelConfigRepository for SqliteChannelConfigRepository {
    async fn list_all(&self) -> Result<Vec<ChannelConfig>, RepositoryError> {
        let rows = sqlx::query(SELECT_COLUMNS)
            .fetch_all(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        rows.iter()
            .map(|row| {
                ChannelConfigRow::from_row(row)
                    .map_err(|e| RepositoryError::Query(e.to_string()))?
                    .into_config()
            })
            .collect()
    }

    async fn get(
        &self,
        guild_id: u64,
        channel_id: u64,
    ) -> Result<Option<ChannelConfig>, RepositoryError> {
        let row = sqlx::query(&format!(
            "{SELECT_COLUMNS} WHERE guild_id = ? AND channel_id = ?"
        ))
        .bind(guild_id.to_string())
        .bind(channel_id.to_string())
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let config_row = ChannelConfigRow::from_row(&row)
                    .map_err(|e| RepositoryError::Query(e.to_string()))?;
                Ok(Some(config_row.into_config()?))
            }
            None => Ok(None),
        }
    }

    async fn upsert(&self, config: &ChannelConfig) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO channel_configs (guild_id, channel_id, enabled, system_prompt, model, reset_delta_secs, max_turns, inherit_on_reset, completion_marker, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(guild_id, channel_id) DO UPDATE SET
                enabled = excluded.enabled,
                system_prompt = excluded.system_prompt,
                model = excluded.model,
                reset_delta_secs = excluded.reset_delta_secs,
                max_turns = excluded.max_turns,
                inherit_on_reset = excluded.inherit_on_reset,
                completion_marker = excluded.completion_marker,
                updated_at = excluded.updated_at",
        )
        .bind(config.guild_id.to_string())
        .bind(config.channel_id.to_string())
        .bind(config.enabled)
        .bind(&config.system_prompt)
        .bind(config.model.api_name())
        .bind(i64::from(config.reset_delta_secs))
        .bind(i64::from(config.max_turns))
        .bind(config.inherit_on_reset)
        .bind(&config.completion_marker)
        .bind(format_datetime(&config.created_at))
        .bind(format_datetime(&config.updated_at))
        .execute(&self.pool.writer)
        .await
        .map_err(map_write_error)?;

        Ok(())
    }

    async fn delete(&self, guild_id: u64, channel_id: u64) -> Result<bool, RepositoryError> {
        let result =
            sqlx::query("DELETE FROM channel_configs WHERE guild_id = ? AND channel_id = ?")
                .bind(guild_id.to_string())
                .bind(channel_id.to_string())
                .execute(&self.pool.writer)
                .await
                .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_guild(&self, guild_id: u64) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM channel_configs WHERE guild_id = ?")
            .bind(guild_id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::pool::tests::test_pool;

    async fn repo() -> SqliteChannelConfigRepository {
        SqliteChannelConfigRepository::new(test_pool().await)
    }

    #[tokio::test]
    async fn test_upsert_and_get() {
        let repo = repo().await;
        // Snowflakes above i64::MAX survive the TEXT encoding.
        let mut config = ChannelConfig::new(u64::MAX - 1, 1_234_567_890_123_456_789, "🆗");
        config.model = ChatModel::Gpt41Mini;
        config.inherit_on_reset = true;

        repo.upsert(&config).await.unwrap();
        let loaded = repo
            .get(config.guild_id, config.channel_id)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(loaded.guild_id, config.guild_id);
        assert_eq!(loaded.model, ChatModel::Gpt41Mini);
        assert!(loaded.inherit_on_reset);
        assert_eq!(loaded.completion_marker, "🆗");
        assert_eq!(loaded.created_at, config.created_at);
    }

    #[tokio::test]
    async fn test_upsert_replaces_settings() {
        let repo = repo().await;
        let mut config = ChannelConfig::new(1, 10, "🆗");
        repo.upsert(&config).await.unwrap();

        config.system_prompt = "Be terse.".to_string();
        config.max_turns = 3;
        config.enabled = false;
        repo.upsert(&config).await.unwrap();

        let all = repo.list_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].system_prompt, "Be terse.");
        assert_eq!(all[0].max_turns, 3);
        assert!(!all[0].enabled);
    }

    #[tokio::test]
    async fn test_channel_cannot_move_between_guilds() {
        let repo = repo().await;
        repo.upsert(&ChannelConfig::new(1, 10, "🆗")).await.unwrap();

        let err = repo
            .upsert(&ChannelConfig::new(2, 10, "🆗"))
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_delete_and_delete_guild() {
        let repo = repo().await;
        for (guild, channel) in [(1, 10), (1, 11), (2, 20)] {
            repo.upsert(&ChannelConfig::new(guild, channel, "🆗"))
                .await
                .unwrap();
        }

        assert!(repo.delete(1, 10).await.unwrap());
        assert!(!repo.delete(1, 10).await.unwrap());
        assert_eq!(repo.delete_guild(1).await.unwrap(), 1);
        assert!(repo.get(1, 11).await.unwrap().is_none());
        assert_eq!(repo.list_all().await.unwrap().len(), 1);
    }
}
