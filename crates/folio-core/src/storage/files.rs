//! File helpers shared by the file-backed tiers

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::Path;

use serde_json::Value;
use tempfile::NamedTempFile;

use super::error::{FileOp, StorageError, StorageResult};

/// Write data to a file atomically
///
/// 1. Write to a uniquely named temporary file in the same directory
/// 2. Sync the file to disk
/// 3. Rename the temp file to the target path
///
/// Concurrent writers never share a temp file; the last rename wins.
pub(crate) fn atomic_write(path: &Path, data: &[u8]) -> StorageResult<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).map_err(|e| StorageError::from_io(FileOp::CreateDir, e, parent))?;

    let mut temp = tempfile::Builder::new()
        .prefix(".folio-")
        .suffix(".tmp")
        .tempfile_in(parent)
        .map_err(|e| StorageError::from_io(FileOp::Write, e, parent))?;
    write_synced(&mut temp, data)
        .map_err(|e| StorageError::from_io(FileOp::Write, e, temp.path()))?;

    temp.persist(path)
        .map_err(|e| StorageError::from_io(FileOp::Rename, e.error, path))?;

    Ok(())
}

fn write_synced(temp: &mut NamedTempFile, data: &[u8]) -> std::io::Result<()> {
    temp.write_all(data)?;
    temp.as_file().sync_all()
}

/// Read a JSON file. A missing file is `None`.
pub(crate) fn read_json(path: &Path) -> StorageResult<Option<Value>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StorageError::from_io(FileOp::Read, e, path)),
    };
    Ok(Some(serde_json::from_slice(&bytes)?))
}

/// Elements of a JSON array; anything else is treated as no records
pub(crate) fn into_records(value: Value, path: &Path) -> Vec<Value> {
    match value {
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        other => {
            tracing::warn!(
                "Expected a list in {:?}, found {}; ignoring",
                path,
                json_kind(&other)
            );
            Vec::new()
        }
    }
}

pub(crate) fn remove_if_exists(path: &Path) -> StorageResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StorageError::from_io(FileOp::Remove, e, path)),
    }
}

/// Total size of the given files, skipping missing ones
pub(crate) fn files_size(paths: &[&Path]) -> u64 {
    paths
        .iter()
        .filter_map(|p| fs::metadata(p).ok())
        .map(|m| m.len())
        .sum()
}

/// Whether a directory can be created and written to
pub(crate) fn dir_writable(dir: &Path) -> bool {
    if fs::create_dir_all(dir).is_err() {
        return false;
    }
    fs::metadata(dir)
        .map(|m| m.is_dir() && !m.permissions().readonly())
        .unwrap_or(false)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
