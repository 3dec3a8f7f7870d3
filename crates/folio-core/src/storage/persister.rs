//! Debounced background persistence
//!
//! Save requests are coalesced: each request restarts the debounce window,
//! and when it expires only the latest pages and tags are written. A steady
//! stream of requests cannot hold a save back for longer than `max_wait`
//! after the first unsaved one. Requests are queued without waiting, so a
//! caller can enqueue while holding its own lock and the queue order is the
//! order of its state changes. A failed
//! write is retried once after a short delay before the status turns into
//! a persistent error.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;

use super::error::{StorageError, StorageResult};
use super::manager::TierManager;
use crate::models::{Entry, Tag};

/// Persistence status exposed to the UI
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveStatus {
    Idle,
    Saving,
    Saved,
    /// Both the write and its retry failed
    Error(String),
}

/// Commands sent to the persister task
#[derive(Debug)]
pub enum SaveRequest {
    Pages(Vec<Entry>),
    Tags(Vec<Tag>),
    /// Write anything pending now and report the result
    Flush(oneshot::Sender<Result<(), String>>),
    Shutdown,
}

#[derive(Debug, Clone, Copy)]
pub struct PersisterConfig {
    pub debounce: Duration,
    pub retry_delay: Duration,
    /// Upper bound on how long pending data waits for the debounce to settle
    pub max_wait: Duration,
}

impl Default for PersisterConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(150),
            retry_delay: Duration::from_millis(500),
            max_wait: Duration::from_secs(2),
        }
    }
}

/// Handle to the persister task
#[derive(Clone)]
pub struct PersisterHandle {
    command_tx: mpsc::UnboundedSender<SaveRequest>,
    status_rx: watch::Receiver<SaveStatus>,
}

impl PersisterHandle {
    pub fn save_pages(&self, entries: Vec<Entry>) {
        self.send(SaveRequest::Pages(entries));
    }

    pub fn save_tags(&self, tags: Vec<Tag>) {
        self.send(SaveRequest::Tags(tags));
    }

    /// Skip the debounce window and write pending data now
    pub async fn flush(&self) -> StorageResult<()> {
        let (tx, rx) = oneshot::channel();
        if self.command_tx.send(SaveRequest::Flush(tx)).is_err() {
            return Err(StorageError::AllTiersFailed(
                "persister has stopped".to_string(),
            ));
        }
        match rx.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(StorageError::AllTiersFailed(e)),
            Err(_) => Err(StorageError::AllTiersFailed(
                "persister has stopped".to_string(),
            )),
        }
    }

    /// Write pending data and stop the task
    pub fn shutdown(&self) {
        self.send(SaveRequest::Shutdown);
    }

    pub fn status(&self) -> SaveStatus {
        self.status_rx.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<SaveStatus> {
        self.status_rx.clone()
    }

    fn send(&self, request: SaveRequest) {
        if self.command_tx.send(request).is_err() {
            tracing::warn!("Save requested after persister stopped");
        }
    }
}

/// Spawn the persister task
pub fn spawn_persister(manager: Arc<TierManager>, config: PersisterConfig) -> PersisterHandle {
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (status_tx, status_rx) = watch::channel(SaveStatus::Idle);

    tokio::spawn(persister_loop(manager, config, command_rx, status_tx));

    PersisterHandle {
        command_tx,
        status_rx,
    }
}

#[derive(Default)]
struct Pending {
    pages: Option<Vec<Entry>>,
    tags: Option<Vec<Tag>>,
}

impl Pending {
    fn is_empty(&self) -> bool {
        self.pages.is_none() && self.tags.is_none()
    }
}

async fn persister_loop(
    manager: Arc<TierManager>,
    config: PersisterConfig,
    mut command_rx: mpsc::UnboundedReceiver<SaveRequest>,
    status_tx: watch::Sender<SaveStatus>,
) {
    let mut pending = Pending::default();
    let mut deadline: Option<Instant> = None;
    // When the oldest unsaved request arrived
    let mut first_pending: Option<Instant> = None;

    loop {
        let request = match deadline {
            Some(at) => {
                tokio::select! {
                    request = command_rx.recv() => request,
                    _ = tokio::time::sleep_until(at) => {
                        deadline = None;
                        first_pending = None;
                        let _ = write_pending(&manager, &config, &mut pending, &status_tx).await;
                        continue;
                    }
                }
            }
            None => command_rx.recv().await,
        };

        match request {
            Some(SaveRequest::Pages(entries)) => {
                pending.pages = Some(entries);
                deadline = Some(next_deadline(&config, &mut first_pending));
                let _ = status_tx.send(SaveStatus::Saving);
            }
            Some(SaveRequest::Tags(tags)) => {
                pending.tags = Some(tags);
                deadline = Some(next_deadline(&config, &mut first_pending));
                let _ = status_tx.send(SaveStatus::Saving);
            }
            Some(SaveRequest::Flush(reply)) => {
                deadline = None;
                first_pending = None;
                let result = write_pending(&manager, &config, &mut pending, &status_tx).await;
                let _ = reply.send(result);
            }
            Some(SaveRequest::Shutdown) | None => {
                let _ = write_pending(&manager, &config, &mut pending, &status_tx).await;
                break;
            }
        }
    }

    tracing::debug!("Persister stopped");
}

/// Restart the debounce window, capped at `max_wait` after the first
/// unsaved request
fn next_deadline(config: &PersisterConfig, first_pending: &mut Option<Instant>) -> Instant {
    let now = Instant::now();
    let first = *first_pending.get_or_insert(now);
    (now + config.debounce).min(first + config.max_wait)
}

/// Write whatever is pending, retrying once on failure
async fn write_pending(
    manager: &TierManager,
    config: &PersisterConfig,
    pending: &mut Pending,
    status_tx: &watch::Sender<SaveStatus>,
) -> Result<(), String> {
    if pending.is_empty() {
        return match &*status_tx.borrow() {
            SaveStatus::Error(e) => Err(e.clone()),
            _ => Ok(()),
        };
    }
    let batch = std::mem::take(pending);
    let _ = status_tx.send(SaveStatus::Saving);

    let result = match write_batch(manager, &batch).await {
        Ok(()) => Ok(()),
        Err(e) => {
            tracing::warn!("Save failed, retrying in {:?}: {}", config.retry_delay, e);
            tokio::time::sleep(config.retry_delay).await;
            write_batch(manager, &batch).await
        }
    };

    match result {
        Ok(()) => {
            let _ = status_tx.send(SaveStatus::Saved);
            Ok(())
        }
        Err(e) => {
            tracing::error!("Save failed after retry: {}", e);
            let message = e.to_string();
            let _ = status_tx.send(SaveStatus::Error(message.clone()));
            Err(message)
        }
    }
}

async fn write_batch(manager: &TierManager, batch: &Pending) -> StorageResult<()> {
    if let Some(ref pages) = batch.pages {
        manager.save_pages(pages).await?;
    }
    if let Some(ref tags) = batch.tags {
        manager.save_tags(tags).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Page;
    use crate::storage::testing::MemoryTier;
    use crate::storage::tier::{RecordSet, StorageTier, TierKind};

    fn fast_config() -> PersisterConfig {
        PersisterConfig {
            debounce: Duration::from_millis(40),
            retry_delay: Duration::from_millis(20),
            max_wait: Duration::from_millis(400),
        }
    }

    fn page(title: &str) -> Entry {
        Entry::Page(Page::new(title))
    }

    #[tokio::test]
    async fn test_bursts_are_coalesced() {
        let tier = Arc::new(MemoryTier::new(TierKind::Structured));
        let tiers: Vec<Arc<dyn StorageTier>> = vec![tier.clone()];
        let handle = spawn_persister(Arc::new(TierManager::new(tiers)), fast_config());

        for i in 0..5 {
            handle.save_pages(vec![page(&format!("draft {}", i))]);
        }
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(tier.writes(), 1);
        let stored = tier.get(RecordSet::Pages);
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0]["title"], "draft 4");
        assert_eq!(handle.status(), SaveStatus::Saved);
    }

    #[tokio::test]
    async fn test_steady_requests_still_save() {
        let tier = Arc::new(MemoryTier::new(TierKind::Structured));
        let tiers: Vec<Arc<dyn StorageTier>> = vec![tier.clone()];
        let config = PersisterConfig {
            debounce: Duration::from_millis(60),
            max_wait: Duration::from_millis(100),
            ..fast_config()
        };
        let handle = spawn_persister(Arc::new(TierManager::new(tiers)), config);

        // Each request lands well inside the previous debounce window
        for i in 0..20 {
            handle.save_pages(vec![page(&format!("typing {}", i))]);
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        assert!(tier.writes() >= 1);
        handle.flush().await.unwrap();
        assert_eq!(tier.get(RecordSet::Pages)[0]["title"], "typing 19");
    }

    #[tokio::test]
    async fn test_flush_skips_debounce() {
        let tier = Arc::new(MemoryTier::new(TierKind::Structured));
        let tiers: Vec<Arc<dyn StorageTier>> = vec![tier.clone()];
        let config = PersisterConfig {
            debounce: Duration::from_secs(60),
            ..fast_config()
        };
        let handle = spawn_persister(Arc::new(TierManager::new(tiers)), config);

        handle.save_tags(vec![Tag::new("work")]);
        handle.flush().await.unwrap();

        assert_eq!(tier.get(RecordSet::Tags).len(), 1);
        assert_eq!(handle.status(), SaveStatus::Saved);
    }

    #[tokio::test]
    async fn test_single_retry_recovers() {
        let tier = Arc::new(MemoryTier::new(TierKind::Structured));
        tier.fail_next(1);
        let tiers: Vec<Arc<dyn StorageTier>> = vec![tier.clone()];
        let handle = spawn_persister(Arc::new(TierManager::new(tiers)), fast_config());

        handle.save_pages(vec![page("retry me")]);
        handle.flush().await.unwrap();

        assert_eq!(tier.writes(), 2);
        assert_eq!(handle.status(), SaveStatus::Saved);
    }

    #[tokio::test]
    async fn test_persistent_failure_surfaces_error() {
        let tier = Arc::new(MemoryTier::failing(TierKind::Structured));
        let tiers: Vec<Arc<dyn StorageTier>> = vec![tier.clone()];
        let handle = spawn_persister(Arc::new(TierManager::new(tiers)), fast_config());

        handle.save_pages(vec![page("doomed")]);
        assert!(handle.flush().await.is_err());

        assert_eq!(tier.writes(), 2);
        assert!(matches!(handle.status(), SaveStatus::Error(_)));
    }

    #[tokio::test]
    async fn test_shutdown_writes_pending() {
        let tier = Arc::new(MemoryTier::new(TierKind::KeyValue));
        let tiers: Vec<Arc<dyn StorageTier>> = vec![tier.clone()];
        let config = PersisterConfig {
            debounce: Duration::from_secs(60),
            ..fast_config()
        };
        let handle = spawn_persister(Arc::new(TierManager::new(tiers)), config);

        handle.save_pages(vec![page("last words")]);
        handle.shutdown();

        tokio::time::timeout(Duration::from_secs(2), async {
            while tier.get(RecordSet::Pages).is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(tier.writes(), 1);
    }
}
