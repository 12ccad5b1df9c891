//! Usage accounting types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::llm::TokenUsage;

/// One completed exchange. Write-once, append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub id: Uuid,
    pub guild_id: u64,
    pub channel_id: u64,
    pub user_id: u64,
    /// System prompt in effect when the exchange ran.
    pub system_prompt: String,
    pub user_prompt: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
    pub created_at: DateTime<Utc>,
}

impl UsageRecord {
    pub fn new(
        guild_id: u64,
        channel_id: u64,
        user_id: u64,
        system_prompt: impl Into<String>,
        user_prompt: impl Into<String>,
        usage: TokenUsage,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            guild_id,
            channel_id,
            user_id,
            system_prompt: system_prompt.into(),
            user_prompt: user_prompt.into(),
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            total_tokens: usage.total_tokens,
            created_at: Utc::now(),
        }
    }
}

/// Aggregate of usage records for a guild or for the whole installation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSummary {
    pub exchanges: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}
