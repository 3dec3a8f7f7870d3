//! Document validation, repair, and recovery
//!
//! Raw page lists arrive from storage tiers, peers, and bundles in whatever
//! shape they were written. Everything passes through here before it
//! reaches application state.

mod backup;
mod diagnose;
mod repair;

pub use backup::{checksum, Backup, BackupRing, MAX_BACKUPS};
pub use diagnose::{detect_corruption, CorruptionReport};
pub use repair::{
    reconcile_folders, repair_all, repair_entry, repair_folder, repair_page, repair_tags,
    salvage_entries, FALLBACK_BLOCK_TYPE, KNOWN_BLOCK_TYPES,
};

use serde_json::Value;

use crate::models::{Entry, Page, DEFAULT_PAGE_TITLE};

/// Where recovered data came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoverySource {
    /// The input itself, repaired
    Repaired,
    /// A backup, `index` steps back from the latest
    Backup { index: usize },
    /// Nothing usable; a single default page
    Default,
}

/// Outcome of [`DocumentValidator::attempt_auto_recovery`]
#[derive(Debug, Clone)]
pub struct Recovery {
    pub entries: Vec<Entry>,
    pub source: RecoverySource,
    /// Problems found in the input before repair
    pub issues: Vec<String>,
}

/// Validator with its own backup ring
#[derive(Debug, Default)]
pub struct DocumentValidator {
    backups: BackupRing,
}

impl DocumentValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_backups(backups: BackupRing) -> Self {
        Self { backups }
    }

    pub fn create_backup(&mut self, data: &Value) -> Backup {
        self.backups.create(data)
    }

    pub fn restore_from_backup(&self, index: usize) -> Option<Value> {
        self.backups.restore(index)
    }

    pub fn backups(&self) -> &BackupRing {
        &self.backups
    }

    /// Repair data that is about to replace the live library.
    ///
    /// The caller backs up the live entries first. If nothing in `incoming`
    /// survives repair, that latest backup is kept exactly, even when it is
    /// empty; older backups are never brought back this way.
    pub fn recover_incoming(&self, incoming: &Value) -> Recovery {
        let Some(current) = self.backups.restore(0) else {
            return self.attempt_auto_recovery(incoming);
        };
        let issues = detect_corruption(incoming).issues;

        let entries = salvage_entries(incoming);
        if !entries.is_empty() {
            return Recovery {
                entries,
                source: RecoverySource::Repaired,
                issues,
            };
        }

        tracing::warn!("Incoming data had nothing usable; keeping the current library");
        Recovery {
            entries: salvage_entries(&current),
            source: RecoverySource::Backup { index: 0 },
            issues,
        }
    }

    /// Recover usable entries from possibly corrupt data.
    ///
    /// Repair first; if nothing survives, walk the backups newest first;
    /// if none yields entries, fall back to one default page.
    pub fn attempt_auto_recovery(&self, corrupt: &Value) -> Recovery {
        let issues = detect_corruption(corrupt).issues;

        let entries = salvage_entries(corrupt);
        if !entries.is_empty() {
            return Recovery {
                entries,
                source: RecoverySource::Repaired,
                issues,
            };
        }

        for index in 0..self.backups.len() {
            let Some(data) = self.backups.restore(index) else {
                continue;
            };
            let entries = salvage_entries(&data);
            if !entries.is_empty() {
                tracing::warn!("Recovered {} entries from backup {}", entries.len(), index);
                return Recovery {
                    entries,
                    source: RecoverySource::Backup { index },
                    issues,
                };
            }
        }

        tracing::warn!("No recoverable data; starting with a default page");
        Recovery {
            entries: vec![Entry::Page(Page::new(DEFAULT_PAGE_TITLE))],
            source: RecoverySource::Default,
            issues,
        }
    }
}
