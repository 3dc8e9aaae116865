//! Backup usage record entities

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::DomainError;

/// The (account, zone, backup) triple identifying one backup relationship
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BackupUsageKey {
    pub account_id: i64,
    pub zone_id: i64,
    pub backup_id: i64,
}

impl BackupUsageKey {
    /// Create a new key from the triple
    pub fn new(account_id: i64, zone_id: i64, backup_id: i64) -> Self {
        Self {
            account_id,
            zone_id,
            backup_id,
        }
    }
}

impl std::fmt::Display for BackupUsageKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "account {} zone {} backup {}",
            self.account_id, self.zone_id, self.backup_id
        )
    }
}

/// One billable lifetime interval of a VM backup relationship
///
/// A record is opened when the backup becomes billable, mutated on every
/// metrics refresh while active, and ended by setting `removed`. At most one
/// active record exists per key triple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupUsageRecord {
    /// Surrogate key assigned by storage
    pub id: i64,
    pub zone_id: i64,
    pub account_id: i64,
    pub domain_id: i64,
    pub backup_id: i64,
    pub vm_id: i64,
    /// Total backup size in bytes
    pub size: i64,
    /// Bytes of data under protection
    pub protected_size: i64,
    /// Lifetime start
    pub created: DateTime<Utc>,
    /// Lifetime end; `None` while usage is still accruing
    pub removed: Option<DateTime<Utc>>,
}

impl BackupUsageRecord {
    /// The key triple this record belongs to
    pub fn key(&self) -> BackupUsageKey {
        BackupUsageKey::new(self.account_id, self.zone_id, self.backup_id)
    }

    /// Whether usage is still accruing
    pub fn is_active(&self) -> bool {
        self.removed.is_none()
    }

    /// Whether this record's lifetime intersects the `[start, end]` window.
    ///
    /// An active record matches if it started at or before `end`. An ended
    /// record matches if it started within the window, ended within the
    /// window, or fully spans it. The clauses overlap at the boundaries;
    /// correctness requires their union. The PostgreSQL repository evaluates
    /// the same predicate in its WHERE clause.
    pub fn overlaps_window(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        match self.removed {
            None => self.created <= end,
            Some(removed) => {
                (self.created >= start && self.created <= end)
                    || (removed >= start && removed <= end)
                    || (self.created <= start && removed >= end)
            }
        }
    }
}

/// Input for opening a new billable lifetime
#[derive(Debug, Clone)]
pub struct NewBackupUsage {
    pub zone_id: i64,
    pub account_id: i64,
    pub domain_id: i64,
    pub backup_id: i64,
    pub vm_id: i64,
    pub size: i64,
    pub protected_size: i64,
    pub created: DateTime<Utc>,
}

impl NewBackupUsage {
    /// Create a new usage entry for the given key triple, starting at `created`
    pub fn new(key: BackupUsageKey, created: DateTime<Utc>) -> Self {
        Self {
            zone_id: key.zone_id,
            account_id: key.account_id,
            domain_id: 0,
            backup_id: key.backup_id,
            vm_id: 0,
            size: 0,
            protected_size: 0,
            created,
        }
    }

    /// Set the owning domain
    pub fn with_domain(mut self, domain_id: i64) -> Self {
        self.domain_id = domain_id;
        self
    }

    /// Set the backed-up VM
    pub fn with_vm(mut self, vm_id: i64) -> Self {
        self.vm_id = vm_id;
        self
    }

    /// Set both size fields in bytes
    pub fn with_sizes(mut self, size: i64, protected_size: i64) -> Self {
        self.size = size;
        self.protected_size = protected_size;
        self
    }

    /// The key triple this entry belongs to
    pub fn key(&self) -> BackupUsageKey {
        BackupUsageKey::new(self.account_id, self.zone_id, self.backup_id)
    }

    /// Validate the entry before it reaches storage
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.size < 0 || self.protected_size < 0 {
            return Err(DomainError::validation(format!(
                "backup sizes must be non-negative, got size {} protected_size {}",
                self.size, self.protected_size
            )));
        }

        Ok(())
    }
}
