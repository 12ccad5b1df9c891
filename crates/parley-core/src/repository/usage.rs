//! Usage record repository trait definition.

use parley_types::error::RepositoryError;
use parley_types::usage::{UsageRecord, UsageSummary};

/// Append-only storage for completed exchanges.
pub trait UsageRepository: Send + Sync {
    fn record(
        &self,
        record: &UsageRecord,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn guild_summary(
        &self,
        guild_id: u64,
    ) -> impl std::future::Future<Output = Result<UsageSummary, RepositoryError>> + Send;

    fn total_summary(
        &self,
    ) -> impl std::future::Future<Output = Result<UsageSummary, RepositoryError>> + Send;
}
