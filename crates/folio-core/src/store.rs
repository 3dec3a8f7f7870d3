//! Unified storage interface
//!
//! The `Store` owns the in-memory library and coordinates between:
//! - the tier manager (durable storage across backends)
//! - the debounced persister (coalesced background writes)
//! - the document validator (repair and backups for incoming data)
//!
//! Every mutation updates the in-memory library and queues a save before
//! releasing the library lock, so saves are queued in the order the library
//! changed. Pages are repaired on the way in. Reads never touch storage.
//!
//! ## Usage
//!
//! ```ignore
//! let store = Store::open(config).await?;
//! let page = store.create_page("Groceries", None).await?;
//! store.flush().await?;
//! ```

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{bail, Context, Result};
use serde_json::Value;

use crate::bundle::Bundle;
use crate::config::Config;
use crate::models::{
    normalize_label, Entry, Folder, Page, RawSnapshot, Snapshot, Tag, MAX_TAG_LEN,
};
use crate::storage::{
    spawn_persister, PersisterConfig, PersisterHandle, RecordSet, SaveStatus,
    StorageDiagnostics, TierManager,
};
use crate::validate::{
    detect_corruption, repair_page, repair_tags, salvage_entries, CorruptionReport,
    DocumentValidator, Recovery, RecoverySource,
};

/// A save is never held back longer than this many debounce windows
const MAX_WAIT_DEBOUNCES: u32 = 10;

#[derive(Debug, Default)]
struct Library {
    entries: Vec<Entry>,
    tags: Vec<Tag>,
}

/// Unified storage interface for Folio
pub struct Store {
    config: Config,
    manager: Arc<TierManager>,
    persister: PersisterHandle,
    library: Mutex<Library>,
    validator: Mutex<DocumentValidator>,
}

impl Store {
    /// Open the store with the standard tier chain for `config`
    pub async fn open(config: Config) -> Result<Self> {
        let manager = TierManager::from_config(&config);
        Self::open_with_manager(config, manager).await
    }

    /// Open the store over a specific tier manager
    pub async fn open_with_manager(config: Config, manager: TierManager) -> Result<Self> {
        let manager = Arc::new(manager);
        manager.init().await;

        let entries = manager
            .read_pages()
            .await
            .context("Failed to read pages from storage")?;
        let tags = manager
            .read_tags()
            .await
            .context("Failed to read tags from storage")?;
        tracing::info!("Loaded {} entries and {} tags", entries.len(), tags.len());

        let persister = spawn_persister(
            manager.clone(),
            PersisterConfig {
                debounce: config.save_debounce(),
                retry_delay: config.save_retry_delay(),
                max_wait: config.save_debounce() * MAX_WAIT_DEBOUNCES,
            },
        );

        let mut validator = DocumentValidator::new();
        if !entries.is_empty() {
            validator.create_backup(&to_value(&entries)?);
        }

        Ok(Self {
            config,
            manager,
            persister,
            library: Mutex::new(Library { entries, tags }),
            validator: Mutex::new(validator),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn is_empty(&self) -> bool {
        self.library().entries.is_empty()
    }

    // ==================== Queries ====================

    /// All pages and folders, in stored order
    pub fn entries(&self) -> Vec<Entry> {
        self.library().entries.clone()
    }

    pub fn pages(&self) -> Vec<Page> {
        self.library()
            .entries
            .iter()
            .filter_map(Entry::as_page)
            .cloned()
            .collect()
    }

    pub fn folders(&self) -> Vec<Folder> {
        self.library()
            .entries
            .iter()
            .filter_map(Entry::as_folder)
            .cloned()
            .collect()
    }

    pub fn tags(&self) -> Vec<Tag> {
        self.library().tags.clone()
    }

    pub fn get(&self, id: &str) -> Option<Entry> {
        self.library().entries.iter().find(|e| e.id() == id).cloned()
    }

    /// Find an entry by id or by unique id prefix
    pub fn find(&self, id_or_prefix: &str) -> Result<Entry> {
        let library = self.library();
        if let Some(entry) = library.entries.iter().find(|e| e.id() == id_or_prefix) {
            return Ok(entry.clone());
        }
        let matches: Vec<&Entry> = library
            .entries
            .iter()
            .filter(|e| e.id().starts_with(id_or_prefix))
            .collect();
        match matches.as_slice() {
            [entry] => Ok((*entry).clone()),
            [] => bail!("No page or folder matches '{}'", id_or_prefix),
            _ => bail!(
                "'{}' is ambiguous ({} matches); use more characters",
                id_or_prefix,
                matches.len()
            ),
        }
    }

    // ==================== Page and folder operations ====================

    /// Create a page, optionally inside a folder
    pub async fn create_page(&self, title: &str, folder_id: Option<&str>) -> Result<Page> {
        let mut page = Page::new(title);
        {
            let mut library = self.library();
            if let Some(folder_id) = folder_id {
                let folder = find_folder_mut(&mut library.entries, folder_id)?;
                folder.pages.push(page.id.clone());
                page.folder_id = Some(folder_id.to_string());
            }
            library.entries.push(Entry::Page(page.clone()));
            self.queue_pages(&library);
        }
        tracing::debug!("Created page {}", page.id);
        Ok(page)
    }

    /// Replace a page's title, content, and tags.
    ///
    /// The page is repaired before it is stored: unknown block types become
    /// paragraphs and blank tags are dropped. Folder membership is kept; use
    /// [`Store::move_page`] to change it.
    pub async fn update_page(&self, page: Page) -> Result<()> {
        let mut repaired = repair_page(&to_value(&page)?);
        repaired.id = page.id;

        let mut library = self.library();
        let existing = library
            .entries
            .iter_mut()
            .filter_map(Entry::as_page_mut)
            .find(|p| p.id == repaired.id)
            .with_context(|| format!("Page not found: {}", repaired.id))?;

        repaired.folder_id = existing.folder_id.take();
        *existing = repaired;
        let referenced = existing.tags.clone();
        let new_tags = register_tags(&mut library.tags, &referenced);

        self.queue_pages(&library);
        if new_tags {
            self.queue_tags(&library);
        }
        Ok(())
    }

    pub async fn create_folder(&self, title: &str) -> Result<Folder> {
        let folder = Folder::new(title);
        {
            let mut library = self.library();
            library.entries.push(Entry::Folder(folder.clone()));
            self.queue_pages(&library);
        }
        tracing::debug!("Created folder {}", folder.id);
        Ok(folder)
    }

    /// Delete a page or folder. A deleted folder's pages are kept, detached.
    pub async fn delete_entry(&self, id: &str) -> Result<Entry> {
        let removed = {
            let mut library = self.library();
            let index = library
                .entries
                .iter()
                .position(|e| e.id() == id)
                .with_context(|| format!("Entry not found: {}", id))?;
            let removed = library.entries.remove(index);
            match removed {
                Entry::Folder(ref folder) => {
                    for page in library.entries.iter_mut().filter_map(Entry::as_page_mut) {
                        if page.folder_id.as_deref() == Some(folder.id.as_str()) {
                            page.folder_id = None;
                        }
                    }
                }
                Entry::Page(ref page) => {
                    for folder in library.entries.iter_mut().filter_map(Entry::as_folder_mut) {
                        folder.pages.retain(|p| p != &page.id);
                    }
                }
            }
            self.queue_pages(&library);
            removed
        };
        Ok(removed)
    }

    /// Move a page into a folder, or out of any folder with `None`
    pub async fn move_page(&self, page_id: &str, folder_id: Option<&str>) -> Result<()> {
        {
            let mut library = self.library();
            if let Some(folder_id) = folder_id {
                find_folder_mut(&mut library.entries, folder_id)?;
            }
            let page = library
                .entries
                .iter_mut()
                .filter_map(Entry::as_page_mut)
                .find(|p| p.id == page_id)
                .with_context(|| format!("Page not found: {}", page_id))?;
            page.folder_id = folder_id.map(str::to_string);

            for folder in library.entries.iter_mut().filter_map(Entry::as_folder_mut) {
                folder.pages.retain(|p| p != page_id);
                if Some(folder.id.as_str()) == folder_id {
                    folder.pages.push(page_id.to_string());
                }
            }
            self.queue_pages(&library);
        }
        Ok(())
    }

    /// Read-modify-write over the latest entries.
    ///
    /// The result is repaired like data read from storage: entries are
    /// normalized, duplicate ids replaced and folder references reconciled.
    pub async fn update_entries<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut Vec<Entry>),
    {
        let mut library = self.library();
        let mut entries = library.entries.clone();
        f(&mut entries);
        library.entries = salvage_entries(&to_value(&entries)?);

        let referenced = referenced_tags(&library.entries);
        if register_tags(&mut library.tags, &referenced) {
            self.queue_tags(&library);
        }
        self.queue_pages(&library);
        Ok(())
    }

    // ==================== Tag operations ====================

    /// Add a tag to the registry, or update its color
    pub async fn upsert_tag(&self, tag: Tag) -> Result<()> {
        if tag.name.is_empty() {
            bail!("Tag name cannot be empty");
        }
        {
            let mut library = self.library();
            match library.tags.iter_mut().find(|t| t.name == tag.name) {
                Some(existing) => existing.color = tag.color,
                None => library.tags.push(tag),
            }
            self.queue_tags(&library);
        }
        Ok(())
    }

    /// Remove a tag from the registry and from every page.
    ///
    /// Returns false if no such tag existed anywhere.
    pub async fn remove_tag(&self, name: &str) -> Result<bool> {
        let Some(name) = normalize_label(name, MAX_TAG_LEN) else {
            return Ok(false);
        };
        let mut library = self.library();
        let before = library.tags.len();
        library.tags.retain(|t| t.name != name);
        let in_registry = library.tags.len() != before;

        let mut on_pages = false;
        for page in library.entries.iter_mut().filter_map(Entry::as_page_mut) {
            if page.tags.contains(&name) || page.tag_names.contains(&name) {
                page.remove_tag(&name);
                on_pages = true;
            }
        }

        if in_registry {
            self.queue_tags(&library);
        }
        if on_pages {
            self.queue_pages(&library);
        }
        Ok(in_registry || on_pages)
    }

    /// Attach a tag to a page, registering it if new
    pub async fn tag_page(&self, page_id: &str, tag: &str) -> Result<()> {
        let mut library = self.library();
        let page = library
            .entries
            .iter_mut()
            .filter_map(Entry::as_page_mut)
            .find(|p| p.id == page_id)
            .with_context(|| format!("Page not found: {}", page_id))?;
        page.add_tag(tag);
        let referenced = page.tags.clone();
        let new_tags = register_tags(&mut library.tags, &referenced);

        self.queue_pages(&library);
        if new_tags {
            self.queue_tags(&library);
        }
        Ok(())
    }

    // ==================== Snapshots and bundles ====================

    /// The complete library as of now
    pub fn snapshot(&self) -> Snapshot {
        let library = self.library();
        Snapshot::new(library.entries.clone(), library.tags.clone())
    }

    /// Replace the library with data from a peer or bundle.
    ///
    /// The incoming data is repaired first and the current state goes into
    /// the backup ring. If nothing in the incoming pages survives repair,
    /// the current entries and tags are kept as they are, even when empty.
    pub async fn apply_snapshot(&self, raw: &RawSnapshot) -> Result<Recovery> {
        let mut library = self.library();
        let current = to_value(&library.entries)?;
        let recovery = {
            let mut validator = self.validator();
            validator.create_backup(&current);
            validator.recover_incoming(&raw.pages)
        };
        if !recovery.issues.is_empty() {
            tracing::info!(
                "Repaired {} issues in incoming snapshot",
                recovery.issues.len()
            );
        }

        library.entries = recovery.entries.clone();
        if recovery.source == RecoverySource::Repaired {
            let referenced = referenced_tags(&library.entries);
            library.tags = repair_tags(&raw.tags);
            register_tags(&mut library.tags, &referenced);
        }
        self.queue_pages(&library);
        self.queue_tags(&library);
        Ok(recovery)
    }

    /// Write the library to an encrypted bundle file
    pub async fn export_bundle(&self, path: &Path, passphrase: &str) -> Result<()> {
        let snapshot = self.snapshot();
        let passphrase = passphrase.to_string();
        let path_buf = path.to_path_buf();
        tokio::task::spawn_blocking(move || {
            Bundle::seal(&snapshot, &passphrase)?.write_to(&path_buf)
        })
        .await
        .context("Export task failed")?
        .with_context(|| format!("Failed to export bundle to {:?}", path))?;
        tracing::info!("Exported bundle to {:?}", path);
        Ok(())
    }

    /// Replace the library with the contents of a bundle.
    ///
    /// A wrong passphrase leaves the library untouched.
    pub async fn import_bundle(&self, path: &Path, passphrase: &str) -> Result<Recovery> {
        let passphrase = passphrase.to_string();
        let path_buf = path.to_path_buf();
        let raw = tokio::task::spawn_blocking(move || {
            Bundle::read_from(&path_buf)?.open(&passphrase)
        })
        .await
        .context("Import task failed")?
        .with_context(|| format!("Failed to import bundle from {:?}", path))?;
        self.apply_snapshot(&raw).await
    }

    // ==================== Persistence ====================

    /// Write pending changes now
    pub async fn flush(&self) -> Result<()> {
        self.persister
            .flush()
            .await
            .context("Failed to save changes")
    }

    /// Flush and stop the background writer
    pub async fn close(&self) -> Result<()> {
        let result = self.flush().await;
        self.persister.shutdown();
        result
    }

    pub fn save_status(&self) -> SaveStatus {
        self.persister.status()
    }

    pub async fn diagnostics(&self) -> StorageDiagnostics {
        self.manager.diagnostics().await
    }

    /// Check the stored page list for structural problems
    pub async fn check_integrity(&self) -> Result<CorruptionReport> {
        let records = self
            .manager
            .read(RecordSet::Pages)
            .await
            .context("Failed to read pages for integrity check")?;
        Ok(detect_corruption(&Value::Array(records)))
    }

    /// Rewrite storage from the repaired in-memory library
    pub async fn repair_storage(&self) -> Result<()> {
        {
            let library = self.library();
            self.queue_pages(&library);
            self.queue_tags(&library);
        }
        self.flush().await
    }

    /// Number of snapshots held in the backup ring
    pub fn backup_count(&self) -> usize {
        self.validator().backups().len()
    }

    /// Queue a save of the pages. Called with the library lock held.
    fn queue_pages(&self, library: &Library) {
        self.persister.save_pages(library.entries.clone());
    }

    fn queue_tags(&self, library: &Library) {
        self.persister.save_tags(library.tags.clone());
    }

    fn library(&self) -> MutexGuard<'_, Library> {
        self.library.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn validator(&self) -> MutexGuard<'_, DocumentValidator> {
        self.validator.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn to_value<T: serde::Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value).context("Failed to serialize library")
}

fn find_folder_mut<'a>(entries: &'a mut [Entry], folder_id: &str) -> Result<&'a mut Folder> {
    entries
        .iter_mut()
        .filter_map(Entry::as_folder_mut)
        .find(|f| f.id == folder_id)
        .with_context(|| format!("Folder not found: {}", folder_id))
}

fn referenced_tags(entries: &[Entry]) -> Vec<String> {
    entries
        .iter()
        .filter_map(Entry::as_page)
        .flat_map(|p| p.tags.iter().cloned())
        .collect()
}

/// Add registry entries for any referenced tag names not yet known.
/// Returns whether the registry changed.
fn register_tags(registry: &mut Vec<Tag>, names: &[String]) -> bool {
    let mut changed = false;
    for name in names {
        if !registry.iter().any(|t| &t.name == name) {
            registry.push(Tag::new(name.as_str()));
            changed = true;
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::BundleError;
    use serde_json::json;
    use tempfile::tempdir;

    async fn open_store(dir: &Path) -> Store {
        let mut config = Config::with_data_dir(dir);
        config.save_debounce_ms = 10;
        config.save_retry_delay_ms = 10;
        Store::open(config).await.unwrap()
    }

    #[tokio::test]
    async fn test_changes_survive_reopen() {
        let dir = tempdir().unwrap();
        let page_id = {
            let store = open_store(dir.path()).await;
            assert!(store.is_empty());
            let page = store.create_page("Groceries", None).await.unwrap();
            store.tag_page(&page.id, "errands").await.unwrap();
            store.close().await.unwrap();
            page.id
        };

        let store = open_store(dir.path()).await;
        let pages = store.pages();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].id, page_id);
        assert_eq!(pages[0].tags, vec!["errands"]);
        assert_eq!(store.tags()[0].name, "errands");
        assert_eq!(store.save_status(), SaveStatus::Idle);
    }

    #[tokio::test]
    async fn test_folder_membership_stays_consistent() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path()).await;

        let work = store.create_folder("Work").await.unwrap();
        let home = store.create_folder("Home").await.unwrap();
        let page = store.create_page("Report", Some(&work.id)).await.unwrap();
        assert_eq!(page.folder_id.as_deref(), Some(work.id.as_str()));

        store.move_page(&page.id, Some(&home.id)).await.unwrap();
        let folders = store.folders();
        let work_now = folders.iter().find(|f| f.id == work.id).unwrap();
        let home_now = folders.iter().find(|f| f.id == home.id).unwrap();
        assert!(work_now.pages.is_empty());
        assert_eq!(home_now.pages, vec![page.id.clone()]);

        store.delete_entry(&home.id).await.unwrap();
        let moved = store.get(&page.id).unwrap();
        assert_eq!(moved.as_page().unwrap().folder_id, None);

        assert!(store.move_page(&page.id, Some("missing")).await.is_err());
        assert!(store.create_page("x", Some("missing")).await.is_err());
    }

    #[tokio::test]
    async fn test_deleting_page_removes_folder_reference() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path()).await;
        let folder = store.create_folder("Ideas").await.unwrap();
        let page = store.create_page("Idea", Some(&folder.id)).await.unwrap();

        store.delete_entry(&page.id).await.unwrap();
        assert!(store.folders()[0].pages.is_empty());
        assert!(store.delete_entry(&page.id).await.is_err());
    }

    #[tokio::test]
    async fn test_update_page_keeps_folder_and_normalizes_title() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path()).await;
        let folder = store.create_folder("F").await.unwrap();
        let page = store.create_page("Draft", Some(&folder.id)).await.unwrap();

        let mut edited = page.clone();
        edited.title = "   ".to_string();
        edited.folder_id = None;
        edited.add_tag("new-tag");
        store.update_page(edited).await.unwrap();

        let stored = store.get(&page.id).unwrap();
        let stored = stored.as_page().unwrap();
        assert_eq!(stored.title, crate::models::DEFAULT_PAGE_TITLE);
        assert_eq!(stored.folder_id.as_deref(), Some(folder.id.as_str()));
        assert!(store.tags().iter().any(|t| t.name == "new-tag"));
    }

    #[tokio::test]
    async fn test_update_page_repairs_before_saving() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path()).await;
        let page = store.create_page("Blocks", None).await.unwrap();

        let mut edited = page.clone();
        let mut data = serde_json::Map::new();
        data.insert("text".to_string(), json!("kept text"));
        edited.content.blocks.push(crate::models::Block {
            id: None,
            kind: "bogus".to_string(),
            data,
        });
        edited.tags.push("   ".to_string());
        edited.tag_names.push("   ".to_string());
        store.update_page(edited).await.unwrap();

        let stored = store.pages().remove(0);
        assert_eq!(stored.content.blocks[0].kind, "paragraph");
        assert_eq!(stored.content.blocks[0].data["text"], "kept text");
        assert!(stored.tags.is_empty());
        assert!(store.tags().is_empty());

        store.flush().await.unwrap();
        let report = store.check_integrity().await.unwrap();
        assert!(!report.is_corrupt, "{:?}", report.issues);
    }

    #[tokio::test]
    async fn test_update_entries_repairs_entries() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path()).await;
        let page = store.create_page("Original", None).await.unwrap();

        store
            .update_entries(|entries| {
                let mut copy = page.clone();
                copy.title = " ".to_string();
                copy.add_tag("copied");
                entries.push(Entry::Page(copy));
            })
            .await
            .unwrap();

        let pages = store.pages();
        assert_eq!(pages.len(), 2);
        assert_ne!(pages[0].id, pages[1].id);
        assert_eq!(pages[1].title, crate::models::DEFAULT_PAGE_TITLE);
        assert!(store.tags().iter().any(|t| t.name == "copied"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_edits_save_latest_state() {
        let dir = tempdir().unwrap();
        let store = Arc::new(open_store(dir.path()).await);

        let tasks: Vec<_> = (0..16)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    store.create_page(&format!("page {}", i), None).await.unwrap();
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }
        store.close().await.unwrap();
        drop(store);

        let reopened = open_store(dir.path()).await;
        assert_eq!(reopened.pages().len(), 16);
    }

    #[tokio::test]
    async fn test_remove_tag_strips_pages() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path()).await;
        let page = store.create_page("Tagged", None).await.unwrap();
        store.tag_page(&page.id, "old").await.unwrap();
        store.upsert_tag(Tag::with_color("old", "#ff0000")).await.unwrap();
        assert_eq!(store.tags()[0].color, "#ff0000");

        assert!(store.remove_tag("old").await.unwrap());
        assert!(store.tags().is_empty());
        assert!(store.pages()[0].tags.is_empty());
        assert!(!store.remove_tag("old").await.unwrap());
    }

    #[tokio::test]
    async fn test_update_entries_reconciles_folders() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path()).await;
        let folder = store.create_folder("F").await.unwrap();
        let page = store.create_page("P", None).await.unwrap();

        let (folder_id, page_id) = (folder.id.clone(), page.id.clone());
        store
            .update_entries(|entries| {
                for entry in entries.iter_mut() {
                    if let Some(p) = entry.as_page_mut() {
                        if p.id == page_id {
                            p.folder_id = Some(folder_id.clone());
                        }
                    }
                }
            })
            .await
            .unwrap();
        assert_eq!(store.folders()[0].pages, vec![page.id]);
    }

    #[tokio::test]
    async fn test_apply_snapshot_repairs_and_backs_up() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path()).await;
        store.create_page("Local", None).await.unwrap();

        let raw = RawSnapshot {
            pages: json!([
                {"id": "remote", "title": "Remote", "content": null, "tags": ["orphan"]},
                "junk"
            ]),
            tags: json!([{"name": "shared"}]),
            timestamp: Some(1),
        };
        let recovery = store.apply_snapshot(&raw).await.unwrap();
        assert_eq!(recovery.source, RecoverySource::Repaired);
        assert!(!recovery.issues.is_empty());

        let pages = store.pages();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].id, "remote");
        let names: Vec<String> = store.tags().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["shared", "orphan"]);
        assert_eq!(store.backup_count(), 1);
    }

    #[tokio::test]
    async fn test_empty_snapshot_keeps_current_library() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path()).await;
        let page = store.create_page("Keep me", None).await.unwrap();

        let recovery = store
            .apply_snapshot(&RawSnapshot {
                pages: json!("garbage"),
                tags: json!(null),
                timestamp: None,
            })
            .await
            .unwrap();
        assert_eq!(recovery.source, RecoverySource::Backup { index: 0 });
        assert_eq!(store.pages()[0].id, page.id);
    }

    #[tokio::test]
    async fn test_garbage_snapshot_does_not_restore_deleted_pages() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path()).await;
        let old = store.create_page("Old", None).await.unwrap();
        store
            .apply_snapshot(&RawSnapshot {
                pages: to_value(&store.entries()).unwrap(),
                tags: json!([]),
                timestamp: None,
            })
            .await
            .unwrap();
        store.delete_entry(&old.id).await.unwrap();
        assert!(store.is_empty());

        let recovery = store
            .apply_snapshot(&RawSnapshot {
                pages: json!("garbage"),
                tags: json!(null),
                timestamp: None,
            })
            .await
            .unwrap();
        assert_eq!(recovery.source, RecoverySource::Backup { index: 0 });
        assert!(recovery.entries.is_empty());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_bundle_round_trip_and_wrong_passphrase() {
        let dir = tempdir().unwrap();
        let bundle_path = dir.path().join("export.folio");

        let source = open_store(&dir.path().join("a")).await;
        source.create_page("Exported", None).await.unwrap();
        source.export_bundle(&bundle_path, "correct").await.unwrap();

        let target = open_store(&dir.path().join("b")).await;
        let err = target
            .import_bundle(&bundle_path, "wrong")
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BundleError>(),
            Some(BundleError::Authentication)
        ));
        assert!(target.pages().is_empty());

        target.import_bundle(&bundle_path, "correct").await.unwrap();
        assert_eq!(target.pages()[0].title, "Exported");
    }

    #[tokio::test]
    async fn test_integrity_of_stored_data() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path()).await;
        store.create_page("Clean", None).await.unwrap();
        store.flush().await.unwrap();

        let report = store.check_integrity().await.unwrap();
        assert!(!report.is_corrupt, "{:?}", report.issues);

        let diagnostics = store.diagnostics().await;
        assert!(!diagnostics.tiers.is_empty());
    }

    #[tokio::test]
    async fn test_find_by_prefix() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path()).await;
        let page = store.create_page("Findable", None).await.unwrap();

        assert_eq!(store.find(&page.id[..8]).unwrap().id(), page.id);
        assert!(store.find("zzzz-not-an-id").is_err());
    }
}
