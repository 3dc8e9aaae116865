//! Usage ledger infrastructure implementations

mod factory;
mod in_memory;
mod postgres;
mod service;

pub use factory::{StorageType, UsageStorageConfig, UsageStorageFactory};
pub use in_memory::InMemoryBackupUsageRepository;
pub use postgres::{PostgresBackupUsageRepository, PostgresConfig};
pub use service::UsageLedger;
