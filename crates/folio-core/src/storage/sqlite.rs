//! SQLite tier
//!
//! The transactional on-device store. Pages and folders are stored one row
//! per record keyed by id; the tag registry is stored as a single aggregate.
//!
//! ## Tables
//!
//! - `records` - One row per page or folder, in list order
//! - `aggregates` - Named JSON blobs (currently only `tags`)
//! - `schema_info` - Schema version tracking

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use rusqlite::{params, Connection, Transaction};
use serde_json::Value;

use super::error::{FileOp, StorageError, StorageResult};
use super::files::into_records;
use super::tier::{RecordSet, StorageTier, TierKind};
use crate::models::now_millis;

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_info (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        -- Pages and folders
        CREATE TABLE IF NOT EXISTS records (
            id TEXT PRIMARY KEY,
            position INTEGER NOT NULL,
            kind TEXT NOT NULL,
            body TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_records_position ON records(position);
        CREATE INDEX IF NOT EXISTS idx_records_kind ON records(kind);

        -- Whole-set blobs
        CREATE TABLE IF NOT EXISTS aggregates (
            name TEXT PRIMARY KEY,
            body TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        );
        "#,
    )?;

    conn.execute(
        "INSERT OR REPLACE INTO schema_info (key, value) VALUES ('version', ?)",
        [SCHEMA_VERSION.to_string()],
    )?;

    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> rusqlite::Result<Option<i32>> {
    let mut stmt = conn.prepare("SELECT value FROM schema_info WHERE key = 'version'")?;
    let result: rusqlite::Result<String> = stmt.query_row([], |row| row.get(0));

    match result {
        Ok(version_str) => Ok(version_str.parse().ok()),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Check if schema needs initialization or migration
pub fn needs_init(conn: &Connection) -> bool {
    let table_exists: bool = conn
        .prepare("SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_info'")
        .and_then(|mut stmt| stmt.exists([]))
        .unwrap_or(false);

    if !table_exists {
        return true;
    }

    match get_schema_version(conn) {
        Ok(Some(v)) => v < SCHEMA_VERSION,
        _ => true,
    }
}

/// Transactional structured tier backed by SQLite
pub struct SqliteTier {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl SqliteTier {
    /// Open or create the database
    pub fn open(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StorageError::from_io(FileOp::CreateDir, e, parent))?;
        }

        let conn = Connection::open(path)?;
        if needs_init(&conn) {
            init_schema(&conn)?;
        }

        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StorageError::tier(TierKind::Structured, "connection lock poisoned"))
    }

    fn read_records(conn: &Connection) -> StorageResult<Vec<Value>> {
        let mut stmt = conn.prepare("SELECT id, body FROM records ORDER BY position")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut records = Vec::with_capacity(rows.len());
        for (id, body) in rows {
            match serde_json::from_str(&body) {
                Ok(value) => records.push(value),
                Err(e) => tracing::warn!("Skipping unreadable record {}: {}", id, e),
            }
        }
        Ok(records)
    }

    fn read_aggregate(conn: &Connection, name: &str) -> StorageResult<Vec<Value>> {
        let result = conn.query_row(
            "SELECT body FROM aggregates WHERE name = ?",
            params![name],
            |row| row.get::<_, String>(0),
        );
        match result {
            Ok(body) => Ok(into_records(
                serde_json::from_str(&body)?,
                Path::new(name),
            )),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Clear and repopulate the records table
fn replace_records(tx: &Transaction, records: &[Value]) -> StorageResult<()> {
    tx.execute("DELETE FROM records", [])?;

    let now = now_millis();
    let mut keys = HashSet::new();
    let mut stmt = tx.prepare(
        "INSERT INTO records (id, position, kind, body, updated_at) VALUES (?, ?, ?, ?, ?)",
    )?;

    for (position, record) in records.iter().enumerate() {
        let key = record_key(record, position, &keys);
        keys.insert(key.clone());
        let kind = if record.get("type").and_then(Value::as_str) == Some("folder") {
            "folder"
        } else {
            "page"
        };
        stmt.execute(params![
            key,
            position as i64,
            kind,
            serde_json::to_string(record)?,
            now
        ])?;
    }
    Ok(())
}

/// Row key for a record: its id, or a positional key when the id is
/// missing or already taken in this batch
fn record_key(record: &Value, position: usize, taken: &HashSet<String>) -> String {
    let id = match record.get("id") {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    };
    match id {
        Some(id) if !taken.contains(&id) => id,
        Some(id) => format!("{}#{}", id, position),
        None => format!("#{}", position),
    }
}

#[async_trait]
impl StorageTier for SqliteTier {
    fn kind(&self) -> TierKind {
        TierKind::Structured
    }

    async fn is_available(&self) -> bool {
        match self.lock() {
            Ok(conn) => conn.query_row("SELECT 1", [], |_| Ok(())).is_ok(),
            Err(_) => false,
        }
    }

    async fn read(&self, set: RecordSet) -> StorageResult<Vec<Value>> {
        let conn = self.lock()?;
        match set {
            RecordSet::Pages => Self::read_records(&conn),
            RecordSet::Tags => Self::read_aggregate(&conn, set.name()),
        }
    }

    async fn write(&self, set: RecordSet, records: &[Value]) -> StorageResult<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        match set {
            RecordSet::Pages => replace_records(&tx, records)?,
            RecordSet::Tags => {
                tx.execute(
                    "INSERT OR REPLACE INTO aggregates (name, body, updated_at) VALUES (?, ?, ?)",
                    params![set.name(), serde_json::to_string(records)?, now_millis()],
                )?;
            }
        }
        tx.commit()?;
        tracing::debug!("SQLite: wrote {} {}", records.len(), set.name());
        Ok(())
    }

    async fn remove(&self, set: RecordSet) -> StorageResult<()> {
        let conn = self.lock()?;
        match set {
            RecordSet::Pages => conn.execute("DELETE FROM records", [])?,
            RecordSet::Tags => {
                conn.execute("DELETE FROM aggregates WHERE name = ?", params![set.name()])?
            }
        };
        Ok(())
    }

    async fn request_persistence(&self) -> bool {
        let Ok(conn) = self.lock() else {
            return false;
        };
        let mode = conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
            row.get::<_, String>(0)
        });
        let synced = conn.pragma_update(None, "synchronous", "FULL").is_ok();
        match mode {
            Ok(mode) => synced && mode.eq_ignore_ascii_case("wal"),
            Err(e) => {
                tracing::warn!("SQLite: could not enable WAL: {}", e);
                false
            }
        }
    }

    async fn usage(&self) -> Option<u64> {
        let conn = self.lock().ok()?;
        conn.query_row(
            "SELECT page_count * page_size FROM pragma_page_count(), pragma_page_size()",
            [],
            |row| row.get::<_, i64>(0),
        )
        .ok()
        .map(|bytes| bytes.max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_schema_version() {
        let conn = Connection::open_in_memory().unwrap();
        assert!(needs_init(&conn));

        init_schema(&conn).unwrap();

        assert_eq!(get_schema_version(&conn).unwrap(), Some(SCHEMA_VERSION));
        assert!(!needs_init(&conn));
    }

    #[tokio::test]
    async fn test_write_and_read_pages_in_order() {
        let tier = SqliteTier::open_in_memory().unwrap();
        let pages = vec![
            json!({"id": "b", "title": "Second"}),
            json!({"id": "a", "title": "First"}),
            json!({"id": "f", "type": "folder", "title": "Folder", "pages": []}),
        ];

        tier.write(RecordSet::Pages, &pages).await.unwrap();
        assert_eq!(tier.read(RecordSet::Pages).await.unwrap(), pages);
    }

    #[tokio::test]
    async fn test_write_replaces_stale_records() {
        let tier = SqliteTier::open_in_memory().unwrap();
        tier.write(
            RecordSet::Pages,
            &[json!({"id": "old"}), json!({"id": "keep"})],
        )
        .await
        .unwrap();
        tier.write(RecordSet::Pages, &[json!({"id": "keep"})])
            .await
            .unwrap();

        let pages = tier.read(RecordSet::Pages).await.unwrap();
        assert_eq!(pages, vec![json!({"id": "keep"})]);
    }

    #[tokio::test]
    async fn test_unrepaired_records_are_kept() {
        let tier = SqliteTier::open_in_memory().unwrap();
        let raw = vec![json!({"id": "x"}), json!({"id": "x"}), json!({"title": "no id"})];
        tier.write(RecordSet::Pages, &raw).await.unwrap();
        assert_eq!(tier.read(RecordSet::Pages).await.unwrap(), raw);
    }

    #[tokio::test]
    async fn test_tags_aggregate() {
        let tier = SqliteTier::open_in_memory().unwrap();
        assert!(tier.read(RecordSet::Tags).await.unwrap().is_empty());

        let tags = vec![json!({"name": "work", "color": "#ff0000"})];
        tier.write(RecordSet::Tags, &tags).await.unwrap();
        assert_eq!(tier.read(RecordSet::Tags).await.unwrap(), tags);

        tier.remove(RecordSet::Tags).await.unwrap();
        assert!(tier.read(RecordSet::Tags).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_file_database_persists() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("folio.db");

        {
            let tier = SqliteTier::open(&path).unwrap();
            assert!(tier.is_available().await);
            assert!(tier.request_persistence().await);
            tier.write(RecordSet::Pages, &[json!({"id": "p"})])
                .await
                .unwrap();
            assert!(tier.usage().await.unwrap() > 0);
        }

        let tier = SqliteTier::open(&path).unwrap();
        assert_eq!(
            tier.read(RecordSet::Pages).await.unwrap(),
            vec![json!({"id": "p"})]
        );
    }
}
