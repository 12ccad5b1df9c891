//! SQLite usage ledger.

use parley_core::repository::usage::UsageRepository;
use parley_types::error::RepositoryError;
use parley_types::usage::{UsageRecord, UsageSummary};
use sqlx::Row;

use super::format_datetime;
use super::pool::DatabasePool;

const SUMMARY_COLUMNS: &str = "SELECT COUNT(*) AS exchanges,
        COALESCE(SUM(input_tokens), 0) AS input_tokens,
        COALESCE(SUM(output_tokens), 0) AS output_tokens,
        COALESCE(SUM(total_tokens), 0) AS total_tokens
    FROM usage_records";

/// SQLite-backed implementation of `UsageRepository`. Append-only.
#[derive(Clone)]
pub struct SqliteUsageRepository {
    pool: DatabasePool,
}

impl SqliteUsageRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

fn summary_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<UsageSummary, sqlx::Error> {
    let get = |column: &str| -> Result<u64, sqlx::Error> {
        let value: i64 = row.try_get(column)?;
        Ok(value.max(0) as u64)
    };
    Ok(UsageSummary {
        exchanges: get("exchanges")?,
        input_tokens: get("input_tokens")?,
        output_tokens: get("output_tokens")?,
        total_tokens: get("total_tokens")?,
    })
}

impl UsageRepository for SqliteUsageRepository {
    async fn record(&self, record: &UsageRecord) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO usage_records (id, guild_id, channel_id, user_id, system_prompt, user_prompt, input_tokens, output_tokens, total_tokens, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(record.id.to_string())
        .bind(record.guild_id.to_string())
        .bind(record.channel_id.to_string())
        .bind(record.user_id.to_string())
        .bind(&record.system_prompt)
        .bind(&record.user_prompt)
        .bind(i64::from(record.input_tokens))
        .bind(i64::from(record.output_tokens))
        .bind(i64::from(record.total_tokens))
        .bind(format_datetime(&record.created_at))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }

    async fn guild_summary(&self, guild_id: u64) -> Result<UsageSummary, RepositoryError> {
        let row = sqlx::query(&format!("{SUMMARY_COLUMNS} WHERE guild_id = ?"))
            .bind(guild_id.to_string())
            .fetch_one(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        summary_from_row(&row).map_err(|e| RepositoryError::Query(e.to_string()))
    }

    async fn total_summary(&self) -> Result<UsageSummary, RepositoryError> {
        let row = sqlx::query(SUMMARY_COLUMNS)
            .fetch_one(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        summary_from_row(&row).map_err(|e| RepositoryError::Query(e.to_string()))
    }
}
