use serde::Deserialize;

use crate::domain::DomainError;
use crate::infrastructure::usage::{PostgresConfig, StorageType, UsageStorageConfig};

/// Application configuration
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub storage: StorageSettings,
    pub logging: LoggingConfig,
}

/// Usage storage settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Backend name, "postgres" or "memory"
    pub backend: String,
    /// Database connection URL (postgres backend)
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
    pub idle_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: "postgres".to_string(),
            url: "postgres://localhost/usage_ledger".to_string(),
            max_connections: 10,
            min_connections: 1,
            connect_timeout_secs: 30,
            idle_timeout_secs: 600,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
        }
    }
}

impl StorageSettings {
    /// Resolve the settings into a concrete storage configuration
    pub fn to_storage_config(&self) -> Result<UsageStorageConfig, DomainError> {
        match StorageType::from_str(&self.backend) {
            Some(StorageType::InMemory) => Ok(UsageStorageConfig::in_memory()),
            Some(StorageType::Postgres) => Ok(UsageStorageConfig::postgres(
                PostgresConfig::new(self.url.as_str())
                    .with_max_connections(self.max_connections)
                    .with_min_connections(self.min_connections)
                    .with_connect_timeout(self.connect_timeout_secs)
                    .with_idle_timeout(self.idle_timeout_secs),
            )),
            None => Err(DomainError::configuration(format!(
                "unknown storage backend '{}'",
                self.backend
            ))),
        }
    }
}

impl AppConfig {
    /// Load configuration from `config/default`, `config/local`, and
    /// `LEDGER__`-prefixed environment variables, in that precedence order
    pub fn load() -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(
                config::Environment::with_prefix("LEDGER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}
