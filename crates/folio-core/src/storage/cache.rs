//! Cache mirror tier
//!
//! A last-resort copy of the latest data. Writes are best-effort and never
//! count towards save success; reads only happen when every durable tier
//! came back empty.

use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::Value;

use super::error::StorageResult;
use super::files::{atomic_write, dir_writable, files_size, into_records, read_json, remove_if_exists};
use super::tier::{Durability, RecordSet, StorageTier, TierKind};

pub struct CacheTier {
    dir: PathBuf,
}

impl CacheTier {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, set: RecordSet) -> PathBuf {
        self.dir.join(format!("{}.mirror.json", set.name()))
    }
}

#[async_trait]
impl StorageTier for CacheTier {
    fn kind(&self) -> TierKind {
        TierKind::Cache
    }

    fn durability(&self) -> Durability {
        Durability::Advisory
    }

    async fn is_available(&self) -> bool {
        dir_writable(&self.dir)
    }

    async fn read(&self, set: RecordSet) -> StorageResult<Vec<Value>> {
        let path = self.path(set);
        Ok(read_json(&path)?
            .map(|value| into_records(value, &path))
            .unwrap_or_default())
    }

    async fn write(&self, set: RecordSet, records: &[Value]) -> StorageResult<()> {
        atomic_write(&self.path(set), &serde_json::to_vec(records)?)
    }

    async fn remove(&self, set: RecordSet) -> StorageResult<()> {
        remove_if_exists(&self.path(set))
    }

    async fn usage(&self) -> Option<u64> {
        let pages = self.path(RecordSet::Pages);
        let tags = self.path(RecordSet::Tags);
        Some(files_size(&[pages.as_path(), tags.as_path()]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_cache_never_claims_persistence() {
        let temp_dir = TempDir::new().unwrap();
        let tier = CacheTier::new(temp_dir.path());
        assert_eq!(tier.durability(), Durability::Advisory);
        assert!(!tier.request_persistence().await);
    }

    #[tokio::test]
    async fn test_mirror_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let tier = CacheTier::new(temp_dir.path());
        let pages = vec![json!({"id": "m"})];
        tier.write(RecordSet::Pages, &pages).await.unwrap();
        assert_eq!(tier.read(RecordSet::Pages).await.unwrap(), pages);
        assert!(tier.read(RecordSet::Tags).await.unwrap().is_empty());
    }
}
