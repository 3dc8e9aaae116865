//! Storage factory for runtime backend selection

use std::sync::Arc;

use crate::domain::DomainError;
use crate::domain::usage::BackupUsageRepository;

use super::in_memory::InMemoryBackupUsageRepository;
use super::postgres::{PostgresBackupUsageRepository, PostgresConfig};

/// Supported storage backends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageType {
    /// In-memory storage (for testing/development)
    InMemory,
    /// PostgreSQL storage
    Postgres,
}

impl StorageType {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "memory" | "inmemory" | "in-memory" | "in_memory" => Some(Self::InMemory),
            "postgres" | "postgresql" | "pg" => Some(Self::Postgres),
            _ => None,
        }
    }
}

/// Usage storage configuration
#[derive(Debug, Clone)]
pub enum UsageStorageConfig {
    /// In-memory storage configuration
    InMemory,
    /// PostgreSQL storage configuration
    Postgres(PostgresConfig),
}

impl UsageStorageConfig {
    /// Creates an in-memory storage configuration
    pub fn in_memory() -> Self {
        Self::InMemory
    }

    /// Creates a PostgreSQL storage configuration
    pub fn postgres(config: PostgresConfig) -> Self {
        Self::Postgres(config)
    }

    /// Creates a PostgreSQL configuration from a URL
    pub fn postgres_url(url: impl Into<String>) -> Self {
        Self::Postgres(PostgresConfig::new(url))
    }

    /// Returns the storage type
    pub fn storage_type(&self) -> StorageType {
        match self {
            Self::InMemory => StorageType::InMemory,
            Self::Postgres(_) => StorageType::Postgres,
        }
    }
}

/// Factory for creating usage repositories
#[derive(Debug)]
pub struct UsageStorageFactory;

impl UsageStorageFactory {
    /// Creates a repository based on the configuration.
    ///
    /// The PostgreSQL backend bootstraps its schema before it is handed out.
    pub async fn create(
        config: &UsageStorageConfig,
    ) -> Result<Arc<dyn BackupUsageRepository>, DomainError> {
        match config {
            UsageStorageConfig::InMemory => Ok(Arc::new(InMemoryBackupUsageRepository::new())),
            UsageStorageConfig::Postgres(pg_config) => {
                let repository = PostgresBackupUsageRepository::connect(pg_config).await?;
                repository.ensure_schema().await?;
                Ok(Arc::new(repository))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_type_from_str() {
        assert_eq!(StorageType::from_str("memory"), Some(StorageType::InMemory));
        assert_eq!(
            StorageType::from_str("in-memory"),
            Some(StorageType::InMemory)
        );
        assert_eq!(
            StorageType::from_str("postgres"),
            Some(StorageType::Postgres)
        );
        assert_eq!(
            StorageType::from_str("postgresql"),
            Some(StorageType::Postgres)
        );
        assert_eq!(StorageType::from_str("pg"), Some(StorageType::Postgres));
        assert_eq!(StorageType::from_str("unknown"), None);
    }

    #[test]
    fn test_storage_config_types() {
        let in_memory = UsageStorageConfig::in_memory();
        assert_eq!(in_memory.storage_type(), StorageType::InMemory);

        let postgres = UsageStorageConfig::postgres_url("postgres://localhost/usage_test");
        assert_eq!(postgres.storage_type(), StorageType::Postgres);
    }

    #[tokio::test]
    async fn test_factory_creates_in_memory_backend() {
        let repository = UsageStorageFactory::create(&UsageStorageConfig::in_memory())
            .await
            .unwrap();

        let records = repository
            .usage_records(
                1,
                chrono::DateTime::UNIX_EPOCH,
                chrono::Utc::now(),
            )
            .await
            .unwrap();
        assert!(records.is_empty());
    }
}
