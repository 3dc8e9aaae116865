//! Domain layer - Core entities and contracts

pub mod error;
pub mod usage;

pub use error::DomainError;
pub use usage::{BackupUsageKey, BackupUsageRecord, BackupUsageRepository, NewBackupUsage};
