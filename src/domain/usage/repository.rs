//! Backup usage repository trait

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{BackupUsageKey, BackupUsageRecord, NewBackupUsage};
use crate::domain::DomainError;

#[cfg(test)]
use mockall::automock;

/// Repository for backup usage records
///
/// Implementations return typed errors and leave diagnostics to the caller;
/// the ledger service converts these results into the boundary contract the
/// billing side sees.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BackupUsageRepository: Send + Sync {
    /// Opens a new billable lifetime for the entry's key triple.
    ///
    /// Fails with `Conflict` if an active record already exists for the
    /// triple, keeping the one-active-record invariant in place.
    async fn open_usage(&self, usage: NewBackupUsage) -> Result<BackupUsageRecord, DomainError>;

    /// Overwrites both size fields of the active record for the key triple.
    ///
    /// Fails with `NotFound` when no active record exists and with
    /// `AmbiguousState` when more than one does.
    async fn update_metrics(
        &self,
        key: &BackupUsageKey,
        size: i64,
        protected_size: i64,
    ) -> Result<(), DomainError>;

    /// Ends the active lifetime for the key triple by setting `removed`.
    ///
    /// Returns `Ok(false)` when no active record exists. Fails with
    /// `Validation` when `removed_at` precedes the record's `created`.
    async fn mark_removed(
        &self,
        key: &BackupUsageKey,
        removed_at: DateTime<Utc>,
    ) -> Result<bool, DomainError>;

    /// Hard-deletes the record(s) for the key triple.
    ///
    /// Returns whether at least one row was removed.
    async fn remove_usage(&self, key: &BackupUsageKey) -> Result<bool, DomainError>;

    /// Returns every record for the account whose lifetime intersects the
    /// `[start, end]` window, active records included. No ordering contract.
    async fn usage_records(
        &self,
        account_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<BackupUsageRecord>, DomainError>;
}
