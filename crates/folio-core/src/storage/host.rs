//! Host-delegated tier
//!
//! When the app runs inside a desktop wrapper, the wrapper owns durable file
//! storage and exposes it through [`HostStorage`]. If the host is reachable
//! it is authoritative and every local tier is bypassed.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::error::{StorageError, StorageResult};
use super::files::{atomic_write, into_records, read_json};
use super::tier::{RecordSet, StorageTier, TierKind};

/// Storage operations offered by a wrapping host process
#[async_trait]
pub trait HostStorage: Send + Sync {
    /// Whether the host environment is present right now
    async fn is_present(&self) -> bool;

    async fn read_pages(&self) -> StorageResult<Vec<Value>>;

    async fn save_all_pages(&self, pages: &[Value]) -> StorageResult<()>;

    async fn read_tags(&self) -> StorageResult<Vec<Value>>;

    async fn save_tags(&self, tags: &[Value]) -> StorageResult<()>;
}

/// Adapts a [`HostStorage`] collaborator into a tier
pub struct HostTier {
    host: Arc<dyn HostStorage>,
}

impl HostTier {
    pub fn new(host: Arc<dyn HostStorage>) -> Self {
        Self { host }
    }
}

#[async_trait]
impl StorageTier for HostTier {
    fn kind(&self) -> TierKind {
        TierKind::Host
    }

    async fn is_available(&self) -> bool {
        self.host.is_present().await
    }

    async fn read(&self, set: RecordSet) -> StorageResult<Vec<Value>> {
        match set {
            RecordSet::Pages => self.host.read_pages().await,
            RecordSet::Tags => self.host.read_tags().await,
        }
    }

    async fn write(&self, set: RecordSet, records: &[Value]) -> StorageResult<()> {
        match set {
            RecordSet::Pages => self.host.save_all_pages(records).await,
            RecordSet::Tags => self.host.save_tags(records).await,
        }
    }

    async fn remove(&self, set: RecordSet) -> StorageResult<()> {
        self.write(set, &[]).await
    }

    async fn request_persistence(&self) -> bool {
        self.host.is_present().await
    }
}

/// Host storage backed by a directory the wrapper shares with us
pub struct JsonDirHost {
    dir: PathBuf,
}

impl JsonDirHost {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn read_file(&self, name: &str) -> StorageResult<Vec<Value>> {
        let path = self.dir.join(name);
        Ok(read_json(&path)?
            .map(|value| into_records(value, &path))
            .unwrap_or_default())
    }

    fn write_file(&self, name: &str, records: &[Value]) -> StorageResult<()> {
        if !self.dir.is_dir() {
            return Err(StorageError::Unavailable(TierKind::Host));
        }
        atomic_write(&self.dir.join(name), &serde_json::to_vec_pretty(records)?)
    }
}

#[async_trait]
impl HostStorage for JsonDirHost {
    async fn is_present(&self) -> bool {
        self.dir.is_dir()
    }

    async fn read_pages(&self) -> StorageResult<Vec<Value>> {
        self.read_file("pages.json")
    }

    async fn save_all_pages(&self, pages: &[Value]) -> StorageResult<()> {
        self.write_file("pages.json", pages)
    }

    async fn read_tags(&self) -> StorageResult<Vec<Value>> {
        self.read_file("tags.json")
    }

    async fn save_tags(&self, tags: &[Value]) -> StorageResult<()> {
        self.write_file("tags.json", tags)
    }
}
