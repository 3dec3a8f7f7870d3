//! In-memory tier for exercising the manager and persister

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::error::{StorageError, StorageResult};
use super::tier::{Durability, RecordSet, StorageTier, TierKind};

pub(crate) struct MemoryTier {
    kind: TierKind,
    durability: Durability,
    data: Mutex<HashMap<RecordSet, Vec<Value>>>,
    /// Upcoming writes that should fail
    failures: AtomicUsize,
    writes: AtomicUsize,
    available: AtomicBool,
    /// Stall the next write by this long before storing
    delay_next: Mutex<Option<Duration>>,
}

impl MemoryTier {
    pub fn new(kind: TierKind) -> Self {
        Self {
            kind,
            durability: if kind == TierKind::Cache {
                Durability::Advisory
            } else {
                Durability::Durable
            },
            data: Mutex::new(HashMap::new()),
            failures: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
            available: AtomicBool::new(true),
            delay_next: Mutex::new(None),
        }
    }

    pub fn failing(kind: TierKind) -> Self {
        let tier = Self::new(kind);
        tier.fail_next(usize::MAX);
        tier
    }

    pub fn fail_next(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    pub fn delay_next_write(&self, delay: Duration) {
        *self.delay_next.lock().unwrap() = Some(delay);
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn get(&self, set: RecordSet) -> Vec<Value> {
        self.data
            .lock()
            .unwrap()
            .get(&set)
            .cloned()
            .unwrap_or_default()
    }

    pub fn put(&self, set: RecordSet, records: Vec<Value>) {
        self.data.lock().unwrap().insert(set, records);
    }
}

#[async_trait]
impl StorageTier for MemoryTier {
    fn kind(&self) -> TierKind {
        self.kind
    }

    fn durability(&self) -> Durability {
        self.durability
    }

    async fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn read(&self, set: RecordSet) -> StorageResult<Vec<Value>> {
        Ok(self.get(set))
    }

    async fn write(&self, set: RecordSet, records: &[Value]) -> StorageResult<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let delay = self.delay_next.lock().unwrap().take();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let failures = self.failures.load(Ordering::SeqCst);
        if failures > 0 {
            if failures != usize::MAX {
                self.failures.store(failures - 1, Ordering::SeqCst);
            }
            return Err(StorageError::tier(self.kind, "injected failure"));
        }
        self.put(set, records.to_vec());
        Ok(())
    }

    async fn remove(&self, set: RecordSet) -> StorageResult<()> {
        self.data.lock().unwrap().remove(&set);
        Ok(())
    }

    async fn request_persistence(&self) -> bool {
        self.durability == Durability::Durable
    }
}
