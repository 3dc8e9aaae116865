//! In-memory backup usage repository

use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::DomainError;
use crate::domain::usage::{
    BackupUsageKey, BackupUsageRecord, BackupUsageRepository, NewBackupUsage,
};

/// In-memory implementation of `BackupUsageRepository`, for tests and
/// development. Shares the overlap predicate with the domain record so the
/// two backends select the same rows.
#[derive(Debug)]
pub struct InMemoryBackupUsageRepository {
    records: RwLock<HashMap<i64, BackupUsageRecord>>,
    next_id: AtomicI64,
}

impl Default for InMemoryBackupUsageRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBackupUsageRepository {
    /// Create a new empty repository
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            next_id: AtomicI64::new(1),
        }
    }
}

#[async_trait]
impl BackupUsageRepository for InMemoryBackupUsageRepository {
    async fn open_usage(&self, usage: NewBackupUsage) -> Result<BackupUsageRecord, DomainError> {
        usage.validate()?;

        let mut records = self
            .records
            .write()
            .map_err(|e| DomainError::internal(format!("Failed to acquire write lock: {}", e)))?;

        let key = usage.key();

        if records.values().any(|r| r.key() == key && r.is_active()) {
            return Err(DomainError::conflict(format!(
                "an active usage record already exists for {}",
                key
            )));
        }

        let record = BackupUsageRecord {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            zone_id: usage.zone_id,
            account_id: usage.account_id,
            domain_id: usage.domain_id,
            backup_id: usage.backup_id,
            vm_id: usage.vm_id,
            size: usage.size,
            protected_size: usage.protected_size,
            created: usage.created,
            removed: None,
        };

        records.insert(record.id, record.clone());
        Ok(record)
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

        let mut records = self
            .records
            .write()
            .map_err(|e| DomainError::internal(format!("Failed to acquire write lock: {}", e)))?;

        let ids: Vec<i64> = records
            .values()
            .filter(|r| r.key() == *key && r.is_active())
            .map(|r| r.id)
            .collect();

        let id = match ids.len() {
            0 => {
                return Err(DomainError::not_found(format!(
                    "no active usage record for {}",
                    key
                )));
            }
            1 => ids[0],
            n => {
                return Err(DomainError::ambiguous_state(format!(
                    "{} active usage records for {}",
                    n, key
                )));
            }
        };

        let record = records
            .get_mut(&id)
            .ok_or_else(|| DomainError::internal(format!("usage record {} disappeared", id)))?;
        record.size = size;
        record.protected_size = protected_size;

        Ok(())
    }

    async fn mark_removed(
        &self,
        key: &BackupUsageKey,
        removed_at: DateTime<Utc>,
    ) -> Result<bool, DomainError> {
        let mut records = self
            .records
            .write()
            .map_err(|e| DomainError::internal(format!("Failed to acquire write lock: {}", e)))?;

        let ids: Vec<i64> = records
            .values()
            .filter(|r| r.key() == *key && r.is_active())
            .map(|r| r.id)
            .collect();

        if ids.is_empty() {
            return Ok(false);
        }

        for id in &ids {
            if removed_at < records[id].created {
                return Err(DomainError::validation(format!(
                    "removal time {} precedes creation time {} for {}",
                    removed_at, records[id].created, key
                )));
            }
        }

        for id in ids {
            if let Some(record) = records.get_mut(&id) {
                record.removed = Some(removed_at);
            }
        }

        Ok(true)
    }

    async fn remove_usage(&self, key: &BackupUsageKey) -> Result<bool, DomainError> {
        let mut records = self
            .records
            .write()
            .map_err(|e| DomainError::internal(format!("Failed to acquire write lock: {}", e)))?;

        let before = records.len();
        records.retain(|_, r| r.key() != *key);

        Ok(records.len() < before)
    }

    async fn usage_records(
        &self,
        account_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<BackupUsageRecord>, DomainError> {
        let records = self
            .records
            .read()
            .map_err(|e| DomainError::internal(format!("Failed to acquire read lock: {}", e)))?;

        Ok(records
            .values()
            .filter(|r| r.account_id == account_id && r.overlaps_window(start, end))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn date(year: i32, month: u32, day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(year, month, day, 0, 0, 0).unwrap()
    }

    fn key() -> BackupUsageKey {
        BackupUsageKey::new(2, 1, 10)
    }

    fn new_usage() -> NewBackupUsage {
        NewBackupUsage::new(key(), date(2024, 1, 10))
            .with_domain(3)
            .with_vm(100)
            .with_sizes(4096, 2048)
    }

    #[tokio::test]
    async fn test_open_and_query_round_trip() {
        let repo = InMemoryBackupUsageRepository::new();
        let opened = repo.open_usage(new_usage()).await.unwrap();

        let records = repo
            .usage_records(2, date(2024, 1, 1), date(2024, 2, 1))
            .await
            .unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0], opened);
        assert_eq!(records[0].zone_id, 1);
        assert_eq!(records[0].domain_id, 3);
        assert_eq!(records[0].vm_id, 100);
        assert_eq!(records[0].size, 4096);
        assert_eq!(records[0].protected_size, 2048);
        assert_eq!(records[0].created, date(2024, 1, 10));
        assert!(records[0].removed.is_none());
    }

    #[tokio::test]
    async fn test_update_metrics_mutates_existing_row() {
        let repo = InMemoryBackupUsageRepository::new();
        let opened = repo.open_usage(new_usage()).await.unwrap();

        repo.update_metrics(&key(), 8192, 4096).await.unwrap();
        repo.update_metrics(&key(), 16384, 8192).await.unwrap();

        let records = repo
            .usage_records(2, date(2024, 1, 1), date(2024, 2, 1))
            .await
            .unwrap();

        // Two updates never create a second active row
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, opened.id);
        assert_eq!(records[0].size, 16384);
        assert_eq!(records[0].protected_size, 8192);
    }

    #[tokio::test]
    async fn test_update_metrics_missing_record() {
        let repo = InMemoryBackupUsageRepository::new();

        let err = repo.update_metrics(&key(), 8192, 4096).await.unwrap_err();
        assert!(matches!(err, DomainError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_update_metrics_rejects_negative_sizes() {
        let repo = InMemoryBackupUsageRepository::new();
        repo.open_usage(new_usage()).await.unwrap();

        let err = repo.update_metrics(&key(), -1, 4096).await.unwrap_err();
        assert!(matches!(err, DomainError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_update_metrics_ambiguous_state() {
        let repo = InMemoryBackupUsageRepository::new();
        let opened = repo.open_usage(new_usage()).await.unwrap();

        // Force a duplicate active row past the open-time invariant check
        let mut duplicate = opened.clone();
        duplicate.id = 999;
        repo.records.write().unwrap().insert(999, duplicate);

        let err = repo.update_metrics(&key(), 8192, 4096).await.unwrap_err();
        assert!(matches!(err, DomainError::AmbiguousState { .. }));
    }

    #[tokio::test]
    async fn test_open_usage_conflict_on_second_active() {
        let repo = InMemoryBackupUsageRepository::new();
        repo.open_usage(new_usage()).await.unwrap();

        let err = repo.open_usage(new_usage()).await.unwrap_err();
        assert!(matches!(err, DomainError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_open_usage_after_previous_lifetime_ended() {
        let repo = InMemoryBackupUsageRepository::new();
        repo.open_usage(new_usage()).await.unwrap();
        repo.mark_removed(&key(), date(2024, 1, 20)).await.unwrap();

        let mut reopened = new_usage();
        reopened.created = date(2024, 2, 1);
        let second = repo.open_usage(reopened).await.unwrap();

        assert!(second.is_active());

        let records = repo
            .usage_records(2, date(2024, 1, 1), date(2024, 3, 1))
            .await
            .unwrap();
        assert_eq!(records.len(), 2);
    }

    #[tokio::test]
    async fn test_mark_removed_then_noop() {
        let repo = InMemoryBackupUsageRepository::new();
        repo.open_usage(new_usage()).await.unwrap();

        assert!(repo.mark_removed(&key(), date(2024, 1, 20)).await.unwrap());
        assert!(!repo.mark_removed(&key(), date(2024, 1, 21)).await.unwrap());

        let records = repo
            .usage_records(2, date(2024, 1, 1), date(2024, 2, 1))
            .await
            .unwrap();
        assert_eq!(records[0].removed, Some(date(2024, 1, 20)));
    }

    #[tokio::test]
    async fn test_mark_removed_before_created() {
        let repo = InMemoryBackupUsageRepository::new();
        repo.open_usage(new_usage()).await.unwrap();

        let err = repo
            .mark_removed(&key(), date(2024, 1, 5))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_remove_usage_then_noop() {
        let repo = InMemoryBackupUsageRepository::new();
        repo.open_usage(new_usage()).await.unwrap();

        assert!(repo.remove_usage(&key()).await.unwrap());
        assert!(!repo.remove_usage(&key()).await.unwrap());

        let records = repo
            .usage_records(2, date(2024, 1, 1), date(2024, 2, 1))
            .await
            .unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn test_usage_records_window_selection() {
        let repo = InMemoryBackupUsageRepository::new();
        repo.open_usage(new_usage()).await.unwrap();
        repo.mark_removed(&key(), date(2024, 1, 20)).await.unwrap();

        // Ended partway through the window
        let hit = repo
            .usage_records(2, date(2024, 1, 15), date(2024, 1, 25))
            .await
            .unwrap();
        assert_eq!(hit.len(), 1);

        // Window entirely before the lifetime
        let miss = repo
            .usage_records(2, date(2024, 1, 1), date(2024, 1, 5))
            .await
            .unwrap();
        assert!(miss.is_empty());

        // Lifetime fully spans the window
        let spanned = repo
            .usage_records(2, date(2024, 1, 12), date(2024, 1, 18))
            .await
            .unwrap();
        assert_eq!(spanned.len(), 1);
    }

    #[tokio::test]
    async fn test_usage_records_active_record_charges_through_window() {
        let repo = InMemoryBackupUsageRepository::new();
        let mut usage = new_usage();
        usage.created = date(2024, 1, 1);
        repo.open_usage(usage).await.unwrap();

        let records = repo
            .usage_records(2, date(2024, 2, 1), date(2024, 2, 28))
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].is_active());
    }

    #[tokio::test]
    async fn test_usage_records_filters_by_account() {
        let repo = InMemoryBackupUsageRepository::new();
        repo.open_usage(new_usage()).await.unwrap();

        let mut other = new_usage();
        other.account_id = 7;
        repo.open_usage(other).await.unwrap();

        let records = repo
            .usage_records(2, date(2024, 1, 1), date(2024, 2, 1))
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].account_id, 2);
    }
}
