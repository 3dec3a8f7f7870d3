//! Storage layer
//!
//! An ordered chain of persistence backends of decreasing reliability,
//! presented as one logical read/write interface.
//!
//! ## Architecture
//!
//! - **Host**: files owned by a wrapping desktop host; exclusive when reachable
//! - **SQLite**: transactional store, one row per page
//! - **Key-value**: flat JSON files with a backup copy
//! - **Cache**: best-effort mirror, read only as a last resort
//!
//! Saves go through a debounced persister that coalesces bursts of edits
//! into single writes.

pub mod cache;
pub mod diagnostics;
pub mod error;
pub(crate) mod files;
pub mod host;
pub mod kv;
pub mod manager;
pub mod persister;
pub mod sqlite;
pub mod tier;

#[cfg(test)]
pub(crate) mod testing;

pub use cache::CacheTier;
pub use diagnostics::{StorageDiagnostics, TierStatus};
pub use error::{FileOp, StorageError, StorageResult};
pub use host::{HostStorage, HostTier, JsonDirHost};
pub use kv::KeyValueTier;
pub use manager::{TierManager, TierWrite, WriteReport};
pub use persister::{spawn_persister, PersisterConfig, PersisterHandle, SaveRequest, SaveStatus};
pub use sqlite::SqliteTier;
pub use tier::{Durability, RecordSet, StorageTier, TierKind};
