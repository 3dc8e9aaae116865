//! Backup Usage Ledger
//!
//! A usage-accrual ledger for billable VM backup consumption, with support for:
//! - Metrics updates that overwrite the size fields of the active record
//!   for an (account, zone, backup) triple
//! - Hard retraction of voided usage
//! - Interval-overlap billing queries returning every record whose lifetime
//!   intersects a time window, active records included
//!
//! Storage is pluggable (PostgreSQL or in-memory); all timestamps are
//! carried and compared in UTC.

pub mod config;
pub mod domain;
pub mod infrastructure;

pub use config::AppConfig;
pub use domain::{BackupUsageKey, BackupUsageRecord, DomainError, NewBackupUsage};
pub use infrastructure::usage::UsageLedger;

use infrastructure::usage::UsageStorageFactory;
use tracing::info;

/// Create a usage ledger wired from the given configuration
pub async fn create_ledger(config: &AppConfig) -> Result<UsageLedger, DomainError> {
    let storage_config = config.storage.to_storage_config()?;
    let storage_type = storage_config.storage_type();

    let repository = UsageStorageFactory::create(&storage_config).await?;

    info!("Usage ledger initialized with {:?} storage", storage_type);

    Ok(UsageLedger::new(repository))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_ledger_with_in_memory_backend() {
        let mut config = AppConfig::default();
        config.storage.backend = "memory".to_string();

        let ledger = create_ledger(&config).await.unwrap();

        let records = ledger
            .usage_records(1, chrono::DateTime::UNIX_EPOCH, chrono::Utc::now())
            .await;
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn test_create_ledger_rejects_unknown_backend() {
        let mut config = AppConfig::default();
        config.storage.backend = "sqlite".to_string();

        let result = create_ledger(&config).await;
        assert!(matches!(result, Err(DomainError::Configuration { .. })));
    }
}
