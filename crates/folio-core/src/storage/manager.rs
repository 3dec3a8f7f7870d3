//! Ordered fallback chain of storage tiers
//!
//! ## Reads
//!
//! Durable tiers are queried in order and the first non-empty one wins. Data
//! found below the highest available tier is copied up and removed from
//! where it was found, so devices that only ever used a lower tier heal on
//! first read. The cache mirror is consulted only when every durable tier
//! is empty.
//!
//! ## Writes
//!
//! Every available tier is written on each save. Durable tiers run
//! concurrently and the save succeeds if any of them succeeds; the cache is
//! written on a detached task and never affects the outcome. Cache writes
//! take turns, so the mirror always ends up with the latest save.
//!
//! A reachable host tier is authoritative: all other tiers are bypassed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::future::join_all;
use serde_json::Value;
use tokio::sync::Mutex;

use super::cache::CacheTier;
use super::diagnostics::{StorageDiagnostics, TierStatus};
use super::error::{StorageError, StorageResult};
use super::host::{HostTier, JsonDirHost};
use super::kv::KeyValueTier;
use super::sqlite::SqliteTier;
use super::tier::{Durability, RecordSet, StorageTier, TierKind};
use crate::config::Config;
use crate::models::{Entry, Tag};
use crate::validate::{repair_tags, salvage_entries};

/// Outcome of one tier's part in a write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TierWrite {
    Durable,
    Failed(String),
    /// Handed to a best-effort mirror; result not awaited
    Advisory,
}

/// Per-tier results of a successful write
#[derive(Debug, Clone, Default)]
pub struct WriteReport {
    pub results: Vec<(TierKind, TierWrite)>,
}

impl WriteReport {
    /// At least one durable tier holds the data
    pub fn succeeded(&self) -> bool {
        self.results
            .iter()
            .any(|(_, result)| *result == TierWrite::Durable)
    }

    pub fn failures(&self) -> impl Iterator<Item = (TierKind, &str)> {
        self.results.iter().filter_map(|(kind, result)| match result {
            TierWrite::Failed(e) => Some((*kind, e.as_str())),
            _ => None,
        })
    }
}

pub struct TierManager {
    tiers: Vec<Arc<dyn StorageTier>>,
    persistent: AtomicBool,
    /// Held by the in-flight mirror write
    mirror_turn: Arc<Mutex<()>>,
}

impl TierManager {
    /// Build a manager over the given tiers, ordered by preference
    pub fn new(mut tiers: Vec<Arc<dyn StorageTier>>) -> Self {
        tiers.sort_by_key(|t| t.kind());
        Self {
            tiers,
            persistent: AtomicBool::new(false),
            mirror_turn: Arc::new(Mutex::new(())),
        }
    }

    /// The standard chain: host (if configured), SQLite, key-value, cache.
    ///
    /// A database that cannot be opened drops out of the chain instead of
    /// failing startup.
    pub fn from_config(config: &Config) -> Self {
        let mut tiers: Vec<Arc<dyn StorageTier>> = Vec::new();

        if let Some(ref host_dir) = config.host_dir {
            tiers.push(Arc::new(HostTier::new(Arc::new(JsonDirHost::new(
                host_dir.clone(),
            )))));
        }

        match SqliteTier::open(&config.sqlite_path()) {
            Ok(tier) => tiers.push(Arc::new(tier)),
            Err(e) => tracing::warn!("SQLite tier unavailable: {}", e),
        }

        tiers.push(Arc::new(KeyValueTier::new(config.kv_dir())));
        tiers.push(Arc::new(CacheTier::new(config.cache_dir())));

        Self::new(tiers)
    }

    /// Request persistent storage from every active tier.
    ///
    /// Returns whether the primary tier reports persistence. Absence of the
    /// guarantee is not an error.
    pub async fn init(&self) -> bool {
        let active = self.active().await;
        let mut primary = None;
        for tier in &active {
            let granted = tier.request_persistence().await;
            tracing::debug!("{} tier persistence: {}", tier.kind(), granted);
            if primary.is_none() && tier.durability() == Durability::Durable {
                primary = Some(granted);
            }
        }
        let persistent = primary.unwrap_or(false);
        if !persistent {
            tracing::warn!("Storage is not persistent; data may be lost");
        }
        self.persistent.store(persistent, Ordering::SeqCst);
        persistent
    }

    pub fn is_persistent(&self) -> bool {
        self.persistent.load(Ordering::SeqCst)
    }

    /// Tiers in use right now
    async fn active(&self) -> Vec<Arc<dyn StorageTier>> {
        for tier in self.tiers.iter().filter(|t| t.kind() == TierKind::Host) {
            if tier.is_available().await {
                return vec![tier.clone()];
            }
            tracing::debug!("Host tier configured but not reachable");
        }

        let mut active = Vec::new();
        for tier in self.tiers.iter().filter(|t| t.kind() != TierKind::Host) {
            if tier.is_available().await {
                active.push(tier.clone());
            }
        }
        active
    }

    /// Kind of the tier that currently holds the primary copy
    pub async fn primary_kind(&self) -> Option<TierKind> {
        self.active()
            .await
            .into_iter()
            .find(|t| t.durability() == Durability::Durable)
            .map(|t| t.kind())
    }

    /// Read a record set, migrating it upward if found in a lower tier
    pub async fn read(&self, set: RecordSet) -> StorageResult<Vec<Value>> {
        let active = self.active().await;
        let (durable, mirrors): (Vec<_>, Vec<_>) = active
            .into_iter()
            .partition(|t| t.durability() == Durability::Durable);

        let mut errors = Vec::new();
        for (index, tier) in durable.iter().enumerate() {
            match tier.read(set).await {
                Ok(records) if !records.is_empty() => {
                    if index > 0 {
                        self.migrate(set, &records, tier, &durable[0], true).await;
                    }
                    return Ok(records);
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!("{} tier read of {} failed: {}", tier.kind(), set.name(), e);
                    errors.push(format!("{}: {}", tier.kind(), e));
                }
            }
        }

        for mirror in &mirrors {
            match mirror.read(set).await {
                Ok(records) if !records.is_empty() => {
                    tracing::warn!(
                        "Durable tiers hold no {}; restoring {} records from the {} mirror",
                        set.name(),
                        records.len(),
                        mirror.kind()
                    );
                    if let Some(target) = durable.first() {
                        self.migrate(set, &records, mirror, target, false).await;
                    }
                    return Ok(records);
                }
                Ok(_) => {}
                Err(e) => tracing::debug!("{} mirror read failed: {}", mirror.kind(), e),
            }
        }

        if !durable.is_empty() && errors.len() == durable.len() {
            return Err(StorageError::AllTiersFailed(errors.join("; ")));
        }
        Ok(Vec::new())
    }

    async fn migrate(
        &self,
        set: RecordSet,
        records: &[Value],
        from: &Arc<dyn StorageTier>,
        to: &Arc<dyn StorageTier>,
        cleanup: bool,
    ) {
        match to.write(set, records).await {
            Ok(()) => {
                tracing::info!(
                    "Migrated {} {} from {} to {}",
                    records.len(),
                    set.name(),
                    from.kind(),
                    to.kind()
                );
                if cleanup {
                    if let Err(e) = from.remove(set).await {
                        tracing::warn!("Could not clear {} from {}: {}", set.name(), from.kind(), e);
                    }
                }
            }
            Err(e) => tracing::warn!(
                "Migration of {} into {} failed: {}",
                set.name(),
                to.kind(),
                e
            ),
        }
    }

    /// Write a record set to every active tier
    pub async fn write(&self, set: RecordSet, records: Vec<Value>) -> StorageResult<WriteReport> {
        let active = self.active().await;
        let (durable, mirrors): (Vec<_>, Vec<_>) = active
            .into_iter()
            .partition(|t| t.durability() == Durability::Durable);

        let mut report = WriteReport::default();

        for mirror in mirrors {
            let records = records.clone();
            report.results.push((mirror.kind(), TierWrite::Advisory));
            let turn = self.mirror_turn.clone().lock_owned().await;
            tokio::spawn(async move {
                let _turn = turn;
                if let Err(e) = mirror.write(set, &records).await {
                    tracing::debug!("{} mirror write failed: {}", mirror.kind(), e);
                }
            });
        }

        let results = join_all(durable.iter().map(|tier| tier.write(set, &records))).await;
        for (tier, result) in durable.iter().zip(results) {
            match result {
                Ok(()) => report.results.push((tier.kind(), TierWrite::Durable)),
                Err(e) => {
                    tracing::warn!("{} tier write of {} failed: {}", tier.kind(), set.name(), e);
                    report
                        .results
                        .push((tier.kind(), TierWrite::Failed(e.to_string())));
                }
            }
        }

        if report.succeeded() {
            Ok(report)
        } else if durable.is_empty() {
            Err(StorageError::AllTiersFailed(
                "no durable storage tier is available".to_string(),
            ))
        } else {
            let details: Vec<String> = report
                .failures()
                .map(|(kind, e)| format!("{}: {}", kind, e))
                .collect();
            Err(StorageError::AllTiersFailed(details.join("; ")))
        }
    }

    /// Pages and folders, repaired. May be empty.
    pub async fn read_pages(&self) -> StorageResult<Vec<Entry>> {
        let records = self.read(RecordSet::Pages).await?;
        Ok(salvage_entries(&Value::Array(records)))
    }

    pub async fn read_tags(&self) -> StorageResult<Vec<Tag>> {
        let records = self.read(RecordSet::Tags).await?;
        Ok(repair_tags(&Value::Array(records)))
    }

    pub async fn save_pages(&self, entries: &[Entry]) -> StorageResult<WriteReport> {
        let records = entries
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()?;
        self.write(RecordSet::Pages, records).await
    }

    pub async fn save_tags(&self, tags: &[Tag]) -> StorageResult<WriteReport> {
        let records = tags
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()?;
        self.write(RecordSet::Tags, records).await
    }

    /// Read-only description of the active storage
    pub async fn diagnostics(&self) -> StorageDiagnostics {
        let mut tiers = Vec::with_capacity(self.tiers.len());
        for tier in &self.tiers {
            tiers.push(TierStatus {
                kind: tier.kind(),
                available: tier.is_available().await,
                usage: tier.usage().await,
            });
        }

        let active = self.active().await;
        let primary = active
            .iter()
            .find(|t| t.durability() == Durability::Durable);
        let usage = match primary {
            Some(tier) => tier.usage().await,
            None => None,
        };

        StorageDiagnostics {
            kind: primary
                .map(|t| t.kind().as_str().to_string())
                .unwrap_or_else(|| "none".to_string()),
            persistent: self.is_persistent(),
            quota: None,
            usage,
            is_mobile_device: cfg!(any(target_os = "android", target_os = "ios")),
            is_standalone_app: primary.is_some_and(|t| t.kind() == TierKind::Host),
            tiers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::testing::MemoryTier;
    use serde_json::json;
    use std::time::Duration;
    use tempfile::TempDir;

    fn pages() -> Vec<Value> {
        vec![
            json!({"id": "a", "title": "Alpha"}),
            json!({"id": "b", "title": "Beta"}),
        ]
    }

    #[tokio::test]
    async fn test_migration_on_read() {
        let temp_dir = TempDir::new().unwrap();
        let sqlite = Arc::new(SqliteTier::open_in_memory().unwrap());
        let kv = Arc::new(KeyValueTier::new(temp_dir.path()));
        kv.write(RecordSet::Pages, &pages()).await.unwrap();

        let manager = TierManager::new(vec![kv.clone(), sqlite.clone()]);

        let first = manager.read(RecordSet::Pages).await.unwrap();
        assert_eq!(first, pages());
        assert_eq!(sqlite.read(RecordSet::Pages).await.unwrap(), pages());
        assert!(kv.read(RecordSet::Pages).await.unwrap().is_empty());

        let second = manager.read(RecordSet::Pages).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_write_succeeds_when_structured_tier_fails() {
        let structured = Arc::new(MemoryTier::failing(TierKind::Structured));
        let kv = Arc::new(MemoryTier::new(TierKind::KeyValue));
        let manager = TierManager::new(vec![structured.clone(), kv.clone()]);

        let report = manager.write(RecordSet::Pages, pages()).await.unwrap();

        assert!(report.succeeded());
        assert_eq!(report.failures().count(), 1);
        assert_eq!(kv.get(RecordSet::Pages), pages());
        assert_eq!(structured.writes(), 1);
    }

    #[tokio::test]
    async fn test_write_fails_when_every_durable_tier_fails() {
        let manager = TierManager::new(vec![
            Arc::new(MemoryTier::failing(TierKind::Structured)),
            Arc::new(MemoryTier::failing(TierKind::KeyValue)),
            Arc::new(MemoryTier::new(TierKind::Cache)),
        ]);

        let err = manager.write(RecordSet::Pages, pages()).await.unwrap_err();
        assert!(matches!(err, StorageError::AllTiersFailed(_)));
    }

    #[tokio::test]
    async fn test_empty_read_is_empty_list() {
        let manager = TierManager::new(vec![
            Arc::new(MemoryTier::new(TierKind::Structured)),
            Arc::new(MemoryTier::new(TierKind::KeyValue)),
        ]);
        assert!(manager.read(RecordSet::Pages).await.unwrap().is_empty());
        assert!(manager.read_pages().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_host_tier_is_exclusive() {
        let host = Arc::new(MemoryTier::new(TierKind::Host));
        let structured = Arc::new(MemoryTier::new(TierKind::Structured));
        structured.put(RecordSet::Pages, vec![json!({"id": "local"})]);
        let manager = TierManager::new(vec![structured.clone(), host.clone()]);

        assert!(manager.read(RecordSet::Pages).await.unwrap().is_empty());

        manager.write(RecordSet::Pages, pages()).await.unwrap();
        assert_eq!(host.get(RecordSet::Pages), pages());
        assert_eq!(structured.writes(), 0);
        assert_eq!(manager.primary_kind().await, Some(TierKind::Host));

        host.set_available(false);
        assert_eq!(manager.primary_kind().await, Some(TierKind::Structured));
        assert_eq!(
            manager.read(RecordSet::Pages).await.unwrap(),
            vec![json!({"id": "local"})]
        );
    }

    #[tokio::test]
    async fn test_cache_is_mirrored_and_last_resort() {
        let structured = Arc::new(MemoryTier::new(TierKind::Structured));
        let cache = Arc::new(MemoryTier::new(TierKind::Cache));
        let manager = TierManager::new(vec![structured.clone(), cache.clone()]);

        let report = manager.write(RecordSet::Tags, vec![json!({"name": "t"})]).await.unwrap();
        assert!(report
            .results
            .contains(&(TierKind::Cache, TierWrite::Advisory)));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(cache.get(RecordSet::Tags), vec![json!({"name": "t"})]);

        structured.remove(RecordSet::Tags).await.unwrap();
        let tags = manager.read(RecordSet::Tags).await.unwrap();
        assert_eq!(tags, vec![json!({"name": "t"})]);
        assert_eq!(structured.get(RecordSet::Tags), tags);
        assert_eq!(cache.get(RecordSet::Tags), tags);
    }

    #[tokio::test]
    async fn test_slow_mirror_write_cannot_overwrite_newer_one() {
        let structured = Arc::new(MemoryTier::new(TierKind::Structured));
        let cache = Arc::new(MemoryTier::new(TierKind::Cache));
        let manager = TierManager::new(vec![structured, cache.clone()]);

        cache.delay_next_write(Duration::from_millis(80));
        manager.write(RecordSet::Pages, vec![json!({"id": "old"})]).await.unwrap();
        manager.write(RecordSet::Pages, vec![json!({"id": "new"})]).await.unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(cache.get(RecordSet::Pages), vec![json!({"id": "new"})]);
        assert_eq!(cache.writes(), 2);
    }

    #[tokio::test]
    async fn test_read_pages_repairs() {
        let structured = Arc::new(MemoryTier::new(TierKind::Structured));
        structured.put(
            RecordSet::Pages,
            vec![json!({"id": 1}), json!("garbage"), Value::Null],
        );
        let manager = TierManager::new(vec![structured]);

        let entries = manager.read_pages().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id(), "1");
    }

    #[tokio::test]
    async fn test_from_config_builds_standard_chain() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::with_data_dir(temp_dir.path());
        let manager = TierManager::from_config(&config);

        assert!(manager.init().await);
        assert!(manager.is_persistent());
        assert_eq!(manager.primary_kind().await, Some(TierKind::Structured));

        let diag = manager.diagnostics().await;
        assert_eq!(diag.kind, "sqlite");
        assert!(diag.persistent);
        assert!(!diag.is_standalone_app);
        assert_eq!(diag.tiers.len(), 3);
    }

    #[tokio::test]
    async fn test_host_dir_makes_standalone_app() {
        let temp_dir = TempDir::new().unwrap();
        let host_dir = temp_dir.path().join("host");
        std::fs::create_dir_all(&host_dir).unwrap();
        let mut config = Config::with_data_dir(temp_dir.path().join("data"));
        config.host_dir = Some(host_dir.clone());

        let manager = TierManager::from_config(&config);
        manager.init().await;
        manager.save_pages(&[]).await.unwrap();

        let diag = manager.diagnostics().await;
        assert_eq!(diag.kind, "host");
        assert!(diag.is_standalone_app);
        assert!(host_dir.join("pages.json").exists());
    }
}
