//! SQLite guild credential repository.
//!
//! Stores encrypted API keys as BLOB. Encryption and decryption happen in the
//! caller; this repository only moves raw bytes and never logs them.

use chrono::Utc;
use parley_core::repository::credential::CredentialRepository;
use parley_types::credential::GuildCredential;
use parley_types::error::RepositoryError;
use sqlx::Row;

use super::pool::DatabasePool;
use super::{format_datetime, parse_datetime, parse_id};

/// SQLite-backed implementation of `CredentialRepository`.
#[derive(Clone)]
pub struct SqliteCredentialRepository {
    pool: DatabasePool,
}

impl SqliteCredentialRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

fn credential_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<GuildCredential, RepositoryError> {
    let guild_id: String = row
        .try_get("guild_id")
        .map_err(|e| RepositoryError::Query(e.to_string()))?;
    let encrypted_key: Vec<u8> = row
        .try_get("encrypted_key")
        .map_err(|e| RepositoryError::Query(e.to_string()))?;
    let updated_at: String = row
        .try_get("updated_at")
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

    Ok(GuildCredential {
        guild_id: parse_id("guild_id", &guild_id)?,
        encrypted_key,
        updated_at: parse_datetime(&updated_at)?,
    })
}

impl CredentialRepository for SqliteCredentialRepository {
    async fn list_all(&self) -> Result<Vec<GuildCredential>, RepositoryError> {
        let rows = sqlx::query("SELECT guild_id, encrypted_key, updated_at FROM guild_credentials")
            .fetch_all(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        rows.iter().map(credential_from_row).collect()
    }

    async fn get(&self, guild_id: u64) -> Result<Option<GuildCredential>, RepositoryError> {
        let row = sqlx::query(
            "SELECT guild_id, encrypted_key, updated_at FROM guild_credentials WHERE guild_id = ?",
        )
        .bind(guild_id.to_string())
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        row.as_ref().map(credential_from_row).transpose()
    }

    async fn set(&self, guild_id: u64, encrypted_key: &[u8]) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO guild_credentials (guild_id, encrypted_key, updated_at)
             VALUES (?, ?, ?)
             ON CONFLICT(guild_id) DO UPDATE SET encrypted_key = excluded.encrypted_key, updated_at = excluded.updated_at",
        )
        .bind(guild_id.to_string())
        .bind(encrypted_key)
        .bind(format_datetime(&Utc::now()))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }

    async fn delete(&self, guild_id: u64) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM guild_credentials WHERE guild_id = ?")
            .bind(guild_id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }
}
