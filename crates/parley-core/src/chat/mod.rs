//! Channel conversation management.
//!
//! Session state per channel, the reset policy, cancellation plumbing, the
//! single-flight gate, and the streaming coordinator that drives one
//! exchange from inbound message to completion marker.

pub mod attachments;
pub mod cancellation;
pub mod config_cache;
pub mod coordinator;
pub mod inflight;
pub mod notice;
pub mod reset;
pub mod session;
pub mod stream_buffer;

use parley_types::error::RepositoryError;
use parley_types::llm::LlmError;

use crate::sink::SinkError;

/// Precondition failures that prevent an exchange from starting.
///
/// Provider failures during an exchange are not errors at this level; they
/// are reported to the user and surface as an [`coordinator::ExchangeOutcome`].
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("channel {channel_id} is not active")]
    ConfigMissing { channel_id: u64 },

    #[error("chat is disabled in channel {channel_id}")]
    ChannelDisabled { channel_id: u64 },

    #[error("no API key configured for guild {guild_id}")]
    CredentialMissing { guild_id: u64 },

    #[error("stored API key for guild {guild_id} is unusable")]
    CredentialInvalid { guild_id: u64 },

    #[error("provider setup failed: {0}")]
    Provider(#[from] LlmError),

    #[error("sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
}
