//! Administration services (use cases).
//!
//! Services validate admin input and orchestrate repository calls. They
//! depend on traits (ports) -- never on concrete infrastructure. Refreshing
//! the coordinator's caches afterwards is the caller's job.

pub mod channel;
pub mod guild;

use parley_types::error::{CredentialError, RepositoryError};

/// Errors from administration operations.
#[derive(Debug, thiserror::Error)]
pub enum AdminError {
    #[error("channel is already active")]
    AlreadyActive,

    #[error("channel is not active")]
    NotActive,

    #[error("API key is not in the expected format")]
    InvalidApiKey,

    #[error("invalid value: {0}")]
    InvalidValue(String),

    #[error("credential error: {0}")]
    Crypto(#[from] CredentialError),

    #[error("storage error: {0}")]
    Repository(#[from] RepositoryError),
}
