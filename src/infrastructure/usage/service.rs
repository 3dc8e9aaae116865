//! Usage ledger boundary service

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::domain::DomainError;
use crate::domain::usage::{
    BackupUsageKey, BackupUsageRecord, BackupUsageRepository, NewBackupUsage,
};

/// Boundary service over a backup usage repository.
///
/// The billing-facing operations report failure as a boolean or an empty
/// result and log one diagnostic per failure; callers decide whether a
/// failure warrants a re-run, an alert, or skip-and-continue. The lifecycle
/// writes used by the orchestration side keep their typed results.
#[derive(Clone)]
pub struct UsageLedger {
    repository: Arc<dyn BackupUsageRepository>,
}

impl std::fmt::Debug for UsageLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsageLedger").finish()
    }
}

impl UsageLedger {
    /// Create a new ledger over the given repository
    pub fn new(repository: Arc<dyn BackupUsageRepository>) -> Self {
        Self { repository }
    }

    /// Overwrite both size fields of the active record for the key triple.
    ///
    /// Returns whether the update committed. A missing record and a
    /// duplicated active record are reported with distinct diagnostics;
    /// the second one means an upstream invariant was violated.
    pub async fn update_metrics(
        &self,
        key: &BackupUsageKey,
        size: i64,
        protected_size: i64,
    ) -> bool {
        match self
            .repository
            .update_metrics(key, size, protected_size)
            .await
        {
            Ok(()) => true,
            Err(e @ DomainError::NotFound { .. }) => {
                warn!("No backup usage record to update for {}: {}", key, e);
                false
            }
            Err(e @ DomainError::AmbiguousState { .. }) => {
                warn!("Backup usage records for {} are inconsistent: {}", key, e);
                false
            }
            Err(e) => {
                warn!("Failed to update backup usage metrics for {}: {}", key, e);
                false
            }
        }
    }

    /// Void the usage for the key triple with a hard delete.
    ///
    /// Returns whether at least one row was removed. Retracting an
    /// already-absent triple is a logged no-op, not an error.
    pub async fn remove_usage(&self, key: &BackupUsageKey) -> bool {
        match self.repository.remove_usage(key).await {
            Ok(true) => true,
            Ok(false) => {
                warn!("No backup usage entry to remove for {}", key);
                false
            }
            Err(e) => {
                warn!("Failed to remove backup usage entry for {}: {}", key, e);
                false
            }
        }
    }

    /// Every record for the account whose lifetime intersects `[start, end]`.
    ///
    /// A storage fault degrades to an empty result so a long-running billing
    /// batch keeps going; the fault is logged once. An empty result can
    /// therefore mean either "no usage" or "query failed"; callers needing
    /// the distinction use the repository directly.
    pub async fn usage_records(
        &self,
        account_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Vec<BackupUsageRecord> {
        match self.repository.usage_records(account_id, start, end).await {
            Ok(records) => records,
            Err(e) => {
                warn!(
                    "Error getting backup usage records for account {}: {}",
                    account_id, e
                );
                Vec::new()
            }
        }
    }

    /// Open a new billable lifetime. Lifecycle write for the orchestration side.
    pub async fn open_usage(
        &self,
        usage: NewBackupUsage,
    ) -> Result<BackupUsageRecord, DomainError> {
        self.repository.open_usage(usage).await
    }

    /// End the active lifetime for the key triple by setting its removal time.
    pub async fn mark_removed(
        &self,
        key: &BackupUsageKey,
        removed_at: DateTime<Utc>,
    ) -> Result<bool, DomainError> {
        self.repository.mark_removed(key, removed_at).await
    }
}
