//! Key-value tier
//!
//! A directory of JSON documents, one per record set. Every write is a full
//! overwrite, done atomically, followed by a timestamped backup copy.
//!
//! Files:
//! - `pages.json` / `tags.json` - Current data
//! - `pages.backup.json` / `tags.backup.json` - `{timestamp, data}` copy of the last write

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::{json, Value};

use super::error::{StorageError, StorageResult};
use super::files::{atomic_write, dir_writable, files_size, into_records, read_json, remove_if_exists};
use super::tier::{RecordSet, StorageTier, TierKind};
use crate::models::now_millis;

pub struct KeyValueTier {
    dir: PathBuf,
}

impl KeyValueTier {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn data_path(&self, set: RecordSet) -> PathBuf {
        self.dir.join(format!("{}.json", set.name()))
    }

    pub fn backup_path(&self, set: RecordSet) -> PathBuf {
        self.dir.join(format!("{}.backup.json", set.name()))
    }

    /// Data from the backup copy, used when the main file is unreadable
    fn read_backup(&self, set: RecordSet) -> StorageResult<Vec<Value>> {
        let path = self.backup_path(set);
        let data = read_json(&path)?
            .and_then(|backup| backup.get("data").cloned())
            .unwrap_or(Value::Null);
        Ok(into_records(data, &path))
    }
}

#[async_trait]
impl StorageTier for KeyValueTier {
    fn kind(&self) -> TierKind {
        TierKind::KeyValue
    }

    async fn is_available(&self) -> bool {
        dir_writable(&self.dir)
    }

    async fn read(&self, set: RecordSet) -> StorageResult<Vec<Value>> {
        let path = self.data_path(set);
        match read_json(&path) {
            Ok(Some(value)) => Ok(into_records(value, &path)),
            Ok(None) => Ok(Vec::new()),
            Err(StorageError::Serialization(e)) => {
                tracing::warn!("Key-value: {:?} is unreadable ({}); using backup copy", path, e);
                self.read_backup(set)
            }
            Err(e) => Err(e),
        }
    }

    async fn write(&self, set: RecordSet, records: &[Value]) -> StorageResult<()> {
        let data = serde_json::to_vec(records)?;
        atomic_write(&self.data_path(set), &data)?;

        let backup = json!({ "timestamp": now_millis(), "data": records });
        if let Err(e) = atomic_write(&self.backup_path(set), &serde_json::to_vec(&backup)?) {
            tracing::warn!("Key-value: backup copy of {} failed: {}", set.name(), e);
        }

        tracing::debug!("Key-value: wrote {} {}", records.len(), set.name());
        Ok(())
    }

    async fn remove(&self, set: RecordSet) -> StorageResult<()> {
        remove_if_exists(&self.data_path(set))?;
        remove_if_exists(&self.backup_path(set))
    }

    async fn request_persistence(&self) -> bool {
        dir_writable(&self.dir)
    }

    async fn usage(&self) -> Option<u64> {
        let paths: Vec<PathBuf> = [RecordSet::Pages, RecordSet::Tags]
            .iter()
            .flat_map(|set| [self.data_path(*set), self.backup_path(*set)])
            .collect();
        let refs: Vec<&Path> = paths.iter().map(PathBuf::as_path).collect();
        Some(files_size(&refs))
    }
}
