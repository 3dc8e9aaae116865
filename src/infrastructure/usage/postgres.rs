//! PostgreSQL-backed backup usage repository with connection pooling

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};

use crate::domain::DomainError;
use crate::domain::usage::{
    BackupUsageKey, BackupUsageRecord, BackupUsageRepository, NewBackupUsage,
};

/// PostgreSQL connection configuration
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    /// Database connection URL
    pub url: String,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Minimum number of connections to maintain
    pub min_connections: u32,
    /// Connection timeout in seconds
    pub connect_timeout_secs: u64,
    /// Idle timeout in seconds
    pub idle_timeout_secs: u64,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/usage_ledger".to_string(),
            max_connections: 10,
            min_connections: 1,
            connect_timeout_secs: 30,
            idle_timeout_secs: 600,
        }
    }
}

impl PostgresConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    pub fn with_min_connections(mut self, min: u32) -> Self {
        self.min_connections = min;
        self
    }

    pub fn with_connect_timeout(mut self, secs: u64) -> Self {
        self.connect_timeout_secs = secs;
        self
    }

    pub fn with_idle_timeout(mut self, secs: u64) -> Self {
        self.idle_timeout_secs = secs;
        self
    }
}

/// PostgreSQL implementation of `BackupUsageRepository`
///
/// One row in `usage_vm_backup` per billable lifetime. The read-then-write
/// operations run inside a single transaction with the active row locked;
/// any path that does not reach `commit` rolls back when the transaction
/// guard drops. Concurrency control beyond that is left to the database.
#[derive(Debug, Clone)]
pub struct PostgresBackupUsageRepository {
    pool: PgPool,
}

impl PostgresBackupUsageRepository {
    /// Create a new repository with the given connection pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a new repository with its own connection pool
    pub async fn connect(config: &PostgresConfig) -> Result<Self, DomainError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(std::time::Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(std::time::Duration::from_secs(config.idle_timeout_secs))
            .connect(&config.url)
            .await
            .map_err(|e| DomainError::storage(format!("Failed to connect to PostgreSQL: {}", e)))?;

        Ok(Self::new(pool))
    }

    /// Returns a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Ensures the usage table and its query index exist
    pub async fn ensure_schema(&self) -> Result<(), DomainError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS usage_vm_backup (
                id BIGSERIAL PRIMARY KEY,
                zone_id BIGINT NOT NULL,
                account_id BIGINT NOT NULL,
                domain_id BIGINT NOT NULL,
                backup_id BIGINT NOT NULL,
                vm_id BIGINT NOT NULL,
                size BIGINT NOT NULL DEFAULT 0,
                protected_size BIGINT NOT NULL DEFAULT 0,
                created TIMESTAMPTZ NOT NULL,
                removed TIMESTAMPTZ
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| DomainError::storage(format!("Failed to create usage table: {}", e)))?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_usage_vm_backup_account_window
            ON usage_vm_backup (account_id, created, removed)
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| DomainError::storage(format!("Failed to create usage index: {}", e)))?;

        Ok(())
    }
}

#[async_trait]
impl BackupUsageRepository for PostgresBackupUsageRepository {
    async fn open_usage(&self, usage: NewBackupUsage) -> Result<BackupUsageRecord, DomainError> {
        usage.validate()?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DomainError::storage(format!("Failed to begin transaction: {}", e)))?;

        let active: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM usage_vm_backup
            WHERE account_id = $1 AND zone_id = $2 AND backup_id = $3 AND removed IS NULL
            "#,
        )
        .bind(usage.account_id)
        .bind(usage.zone_id)
        .bind(usage.backup_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| DomainError::storage(format!("Failed to check for active record: {}", e)))?;

        if active > 0 {
            return Err(DomainError::conflict(format!(
                "an active usage record already exists for {}",
                usage.key()
            )));
        }

        let row = sqlx::query(
            r#"
            INSERT INTO usage_vm_backup
                (zone_id, account_id, domain_id, backup_id, vm_id, size, protected_size, created)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id, zone_id, account_id, domain_id, backup_id, vm_id,
                      size, protected_size, created, removed
            "#,
        )
        .bind(usage.zone_id)
        .bind(usage.account_id)
        .bind(usage.domain_id)
        .bind(usage.backup_id)
        .bind(usage.vm_id)
        .bind(usage.size)
        .bind(usage.protected_size)
        .bind(usage.created)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| DomainError::storage(format!("Failed to insert usage record: {}", e)))?;

        tx.commit()
            .await
            .map_err(|e| DomainError::storage(format!("Failed to commit usage record: {}", e)))?;

        Ok(row_to_record(&row))
    }

    async fn update_metrics(
        &self,
        key: &BackupUsageKey,
        size: i64,
        protected_size: i64,
    ) -> Result<(), DomainError> {
        if size < 0 || protected_size < 0 {
            return Err(DomainError::validation(format!(
                "backup sizes must be non-negative, got size {} protected_size {}",
                size, protected_size
            )));
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DomainError::storage(format!("Failed to begin transaction: {}", e)))?;

        let rows = sqlx::query(
            r#"
            SELECT id FROM usage_vm_backup
            WHERE account_id = $1 AND zone_id = $2 AND backup_id = $3 AND removed IS NULL
            FOR UPDATE
            "#,
        )
        .bind(key.account_id)
        .bind(key.zone_id)
        .bind(key.backup_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| DomainError::storage(format!("Failed to look up usage record: {}", e)))?;

        let id: i64 = match rows.len() {
            0 => {
                return Err(DomainError::not_found(format!(
                    "no active usage record for {}",
                    key
                )));
            }
            1 => rows[0].get("id"),
            n => {
                return Err(DomainError::ambiguous_state(format!(
                    "{} active usage records for {}",
                    n, key
                )));
            }
        };

        sqlx::query("UPDATE usage_vm_backup SET size = $2, protected_size = $3 WHERE id = $1")
            .bind(id)
            .bind(size)
            .bind(protected_size)
            .execute(&mut *tx)
            .await
            .map_err(|e| DomainError::storage(format!("Failed to update usage metrics: {}", e)))?;

        tx.commit()
            .await
            .map_err(|e| DomainError::storage(format!("Failed to commit metrics update: {}", e)))?;

        Ok(())
    }

    async fn mark_removed(
        &self,
        key: &BackupUsageKey,
        removed_at: DateTime<Utc>,
    ) -> Result<bool, DomainError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DomainError::storage(format!("Failed to begin transaction: {}", e)))?;

        let rows = sqlx::query(
            r#"
            SELECT created FROM usage_vm_backup
            WHERE account_id = $1 AND zone_id = $2 AND backup_id = $3 AND removed IS NULL
            FOR UPDATE
            "#,
        )
        .bind(key.account_id)
        .bind(key.zone_id)
        .bind(key.backup_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| DomainError::storage(format!("Failed to look up usage record: {}", e)))?;

        if rows.is_empty() {
            return Ok(false);
        }

        for row in &rows {
            let created: DateTime<Utc> = row.get("created");
            if removed_at < created {
                return Err(DomainError::validation(format!(
                    "removal time {} precedes creation time {} for {}",
                    removed_at, created, key
                )));
            }
        }

        sqlx::query(
            r#"
            UPDATE usage_vm_backup SET removed = $4
            WHERE account_id = $1 AND zone_id = $2 AND backup_id = $3 AND removed IS NULL
            "#,
        )
        .bind(key.account_id)
        .bind(key.zone_id)
        .bind(key.backup_id)
        .bind(removed_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| DomainError::storage(format!("Failed to end usage record: {}", e)))?;

        tx.commit()
            .await
            .map_err(|e| DomainError::storage(format!("Failed to commit usage removal: {}", e)))?;

        Ok(true)
    }

    async fn remove_usage(&self, key: &BackupUsageKey) -> Result<bool, DomainError> {
        let result = sqlx::query(
            "DELETE FROM usage_vm_backup WHERE account_id = $1 AND zone_id = $2 AND backup_id = $3",
        )
        .bind(key.account_id)
        .bind(key.zone_id)
        .bind(key.backup_id)
        .execute(&self.pool)
        .await
        .map_err(|e| DomainError::storage(format!("Failed to delete usage record: {}", e)))?;

        Ok(result.rows_affected() > 0)
    }

    async fn usage_records(
        &self,
        account_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<BackupUsageRecord>, DomainError> {
        let rows = sqlx::query(
            r#"
            SELECT id, zone_id, account_id, domain_id, backup_id, vm_id,
                   size, protected_size, created, removed
            FROM usage_vm_backup
            WHERE account_id = $1
              AND ((removed IS NULL AND created <= $3)
                OR (created BETWEEN $2 AND $3)
                OR (removed BETWEEN $2 AND $3)
                OR (created <= $2 AND removed >= $3))
            "#,
        )
        .bind(account_id)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DomainError::storage(format!("Failed to query usage records: {}", e)))?;

        Ok(rows.iter().map(row_to_record).collect())
    }
}

fn row_to_record(row: &PgRow) -> BackupUsageRecord {
    BackupUsageRecord {
        id: row.get("id"),
        zone_id: row.get("zone_id"),
        account_id: row.get("account_id"),
        domain_id: row.get("domain_id"),
        backup_id: row.get("backup_id"),
        vm_id: row.get("vm_id"),
        size: row.get("size"),
        protected_size: row.get("protected_size"),
        created: row.get("created"),
        removed: row.get("removed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_postgres_config_default() {
        let config = PostgresConfig::default();

        assert_eq!(config.max_connections, 10);
        assert_eq!(config.min_connections, 1);
        assert_eq!(config.connect_timeout_secs, 30);
        assert_eq!(config.idle_timeout_secs, 600);
    }

    #[test]
    fn test_postgres_config_builder() {
        let config = PostgresConfig::new("postgres://localhost/usage_test")
            .with_max_connections(20)
            .with_min_connections(5)
            .with_connect_timeout(60)
            .with_idle_timeout(300);

        assert_eq!(config.url, "postgres://localhost/usage_test");
        assert_eq!(config.max_connections, 20);
        assert_eq!(config.min_connections, 5);
        assert_eq!(config.connect_timeout_secs, 60);
        assert_eq!(config.idle_timeout_secs, 300);
    }
}
