//! The storage tier abstraction

use std::fmt;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use super::error::StorageResult;

/// Backend kinds, in read-preference order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TierKind {
    /// Files owned by a wrapping desktop host
    Host,
    /// Transactional SQLite store
    Structured,
    /// Flat JSON files
    KeyValue,
    /// Last-resort mirror
    Cache,
}

impl TierKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TierKind::Host => "host",
            TierKind::Structured => "sqlite",
            TierKind::KeyValue => "key-value",
            TierKind::Cache => "cache",
        }
    }
}

impl fmt::Display for TierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TierKind::Host => write!(f, "Host"),
            TierKind::Structured => write!(f, "SQLite"),
            TierKind::KeyValue => write!(f, "Key-value"),
            TierKind::Cache => write!(f, "Cache"),
        }
    }
}

/// Whether a successful write counts towards save success
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Durability {
    Durable,
    /// Best-effort mirror; never a primary source
    Advisory,
}

/// The two logical record sets every tier stores
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordSet {
    /// Pages and folders, one record each
    Pages,
    /// The tag registry, stored as one aggregate
    Tags,
}

impl RecordSet {
    pub fn name(&self) -> &'static str {
        match self {
            RecordSet::Pages => "pages",
            RecordSet::Tags => "tags",
        }
    }
}

/// One persistence backend.
///
/// Records are raw JSON so that tiers never reject data; shape is the
/// validator's concern.
#[async_trait]
pub trait StorageTier: Send + Sync {
    fn kind(&self) -> TierKind;

    fn durability(&self) -> Durability {
        Durability::Durable
    }

    async fn is_available(&self) -> bool;

    /// All records of a set. Missing data is an empty list, not an error.
    async fn read(&self, set: RecordSet) -> StorageResult<Vec<Value>>;

    /// Replace the whole set
    async fn write(&self, set: RecordSet, records: &[Value]) -> StorageResult<()>;

    async fn remove(&self, set: RecordSet) -> StorageResult<()>;

    /// Ask the backend for its strongest durability mode.
    /// Returns whether the data is now considered persistent.
    async fn request_persistence(&self) -> bool {
        false
    }

    /// Bytes used, when the backend can tell
    async fn usage(&self) -> Option<u64> {
        None
    }
}
