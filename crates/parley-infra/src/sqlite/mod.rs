//! SQLite storage layer.
//!
//! Repository implementations backed by SQLite with WAL mode and split
//! read/write connection pools.

pub mod channel;
pub mod credential;
pub mod pool;
pub mod usage;

use chrono::{DateTime, Utc};
use parley_types::error::RepositoryError;

pub(crate) fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

pub(crate) fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

/// Discord ids are stored as TEXT.
pub(crate) fn parse_id(column: &str, s: &str) -> Result<u64, RepositoryError> {
    s.parse::<u64>()
        .map_err(|e| RepositoryError::Query(format!("invalid {column}: {e}")))
}
