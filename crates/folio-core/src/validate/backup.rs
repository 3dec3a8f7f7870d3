//! Bounded ring of in-memory backups

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::now_millis;

/// Number of backups retained
pub const MAX_BACKUPS: usize = 5;

/// An immutable copy of a page list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Backup {
    pub timestamp: i64,
    pub data: Value,
    pub checksum: u32,
}

impl Backup {
    pub fn new(data: &Value) -> Self {
        Self {
            timestamp: now_millis(),
            data: data.clone(),
            checksum: checksum(data),
        }
    }

    /// True if the stored checksum still matches the data
    pub fn verify(&self) -> bool {
        checksum(&self.data) == self.checksum
    }
}

/// Rolling 31-multiplier hash over the serialized JSON.
///
/// Detects drift only; it is not a cryptographic digest.
pub fn checksum(data: &Value) -> u32 {
    let text = data.to_string();
    text.chars()
        .fold(0u32, |h, c| h.wrapping_mul(31).wrapping_add(c as u32))
}

/// Most recent backups, oldest evicted first
#[derive(Debug, Default, Clone)]
pub struct BackupRing {
    backups: VecDeque<Backup>,
}

impl BackupRing {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a ring from existing backups, oldest first
    pub fn from_backups(backups: impl IntoIterator<Item = Backup>) -> Self {
        let mut ring = Self::new();
        for backup in backups {
            ring.push(backup);
        }
        ring
    }

    pub fn create(&mut self, data: &Value) -> Backup {
        let backup = Backup::new(data);
        self.push(backup.clone());
        backup
    }

    fn push(&mut self, backup: Backup) {
        if self.backups.len() == MAX_BACKUPS {
            self.backups.pop_front();
        }
        self.backups.push_back(backup);
    }

    /// Data of the `index`-th most recent backup (0 = latest).
    ///
    /// A checksum mismatch is logged and the data returned anyway.
    pub fn restore(&self, index: usize) -> Option<Value> {
        let pos = self.backups.len().checked_sub(1)?.checked_sub(index)?;
        let backup = &self.backups[pos];
        if !backup.verify() {
            tracing::warn!(
                "Backup {} from {} failed checksum verification; restoring anyway",
                index,
                backup.timestamp
            );
        }
        Some(backup.data.clone())
    }

    /// Backups, newest first
    pub fn iter(&self) -> impl Iterator<Item = &Backup> {
        self.backups.iter().rev()
    }

    pub fn len(&self) -> usize {
        self.backups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backups.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn restores_latest_first() {
        let mut ring = BackupRing::new();
        ring.create(&json!([1]));
        ring.create(&json!([2]));

        assert_eq!(ring.restore(0), Some(json!([2])));
        assert_eq!(ring.restore(1), Some(json!([1])));
        assert_eq!(ring.restore(2), None);
        assert_eq!(ring.restore(usize::MAX), None);
        assert_eq!(BackupRing::new().restore(0), None);
    }

    #[test]
    fn evicts_oldest() {
        let mut ring = BackupRing::new();
        for i in 0..(MAX_BACKUPS + 2) {
            ring.create(&json!([i]));
        }
        assert_eq!(ring.len(), MAX_BACKUPS);
        assert_eq!(ring.restore(0), Some(json!([MAX_BACKUPS + 1])));
        assert_eq!(ring.restore(MAX_BACKUPS - 1), Some(json!([2])));
    }

    #[test]
    fn backup_is_a_copy() {
        let mut ring = BackupRing::new();
        let mut data = json!([{"id": "a"}]);
        ring.create(&data);
        data[0]["id"] = json!("b");
        assert_eq!(ring.restore(0), Some(json!([{"id": "a"}])));
    }

    #[test]
    fn tampered_backup_still_restores() {
        let mut backup = Backup::new(&json!([{"id": "a"}]));
        assert!(backup.verify());
        backup.data = json!([{"id": "tampered"}]);
        assert!(!backup.verify());

        let ring = BackupRing::from_backups(vec![backup]);
        assert_eq!(ring.restore(0), Some(json!([{"id": "tampered"}])));
    }

    #[test]
    fn checksum_changes_with_data() {
        assert_ne!(checksum(&json!({"a": 1})), checksum(&json!({"a": 2})));
        assert_eq!(checksum(&json!([])), checksum(&json!([])));
    }
}
