//! Storage error handling
//!
//! Tier failures are classified so the user-facing layer can tell a full
//! disk or a permissions problem apart from a tier that is simply broken.

use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

use super::tier::TierKind;

/// What a file-backed tier was doing when it failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOp {
    CreateDir,
    Read,
    Write,
    Rename,
    Remove,
}

impl fmt::Display for FileOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = match self {
            FileOp::CreateDir => "creating directory",
            FileOp::Read => "reading",
            FileOp::Write => "writing",
            FileOp::Rename => "replacing",
            FileOp::Remove => "removing",
        };
        f.write_str(verb)
    }
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O failed while {op} '{path}': {source}")]
    File {
        op: FileOp,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Permission denied while {op} '{path}'")]
    PermissionDenied {
        op: FileOp,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// No space left on the device, or the user quota is used up
    #[error("Out of space while {op} '{path}'")]
    DiskFull {
        op: FileOp,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A specific tier rejected the operation
    #[error("{tier} tier failed: {details}")]
    Tier { tier: TierKind, details: String },

    /// The tier cannot be used in this environment
    #[error("{0} tier is unavailable")]
    Unavailable(TierKind),

    /// Every durable tier failed the write
    #[error("Failed to persist to any storage tier: {0}")]
    AllTiersFailed(String),

    #[error("SQLite error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Malformed stored JSON: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl StorageError {
    /// Wrap an I/O error from a file-backed tier, classifying full disks and
    /// permission problems
    pub fn from_io(op: FileOp, error: io::Error, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        if error.kind() == io::ErrorKind::PermissionDenied {
            StorageError::PermissionDenied {
                op,
                path,
                source: error,
            }
        } else if is_out_of_space(&error) {
            StorageError::DiskFull {
                op,
                path,
                source: error,
            }
        } else {
            StorageError::File {
                op,
                path,
                source: error,
            }
        }
    }

    pub(crate) fn tier(tier: TierKind, details: impl Into<String>) -> Self {
        StorageError::Tier {
            tier,
            details: details.into(),
        }
    }

    /// Whether a later retry can succeed without the data changing
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            StorageError::DiskFull { .. }
                | StorageError::PermissionDenied { .. }
                | StorageError::Tier { .. }
                | StorageError::Unavailable(_)
        )
    }

    /// A hint for the user, when there is something they can do
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            StorageError::DiskFull { .. } => {
                Some("Free up disk space; pending changes are kept in memory.")
            }
            StorageError::PermissionDenied { .. } => {
                Some("Make sure the data directory is owned and writable by your user.")
            }
            StorageError::File {
                op: FileOp::CreateDir,
                ..
            } => Some("Check that data_dir points somewhere you can create directories."),
            StorageError::AllTiersFailed(_) => {
                Some("Your changes are still in memory. Check the data directory and run `folio doctor`.")
            }
            StorageError::Unavailable(TierKind::Host) => {
                Some("Check that the host directory exists, or unset host_dir to use local storage.")
            }
            _ => None,
        }
    }
}

const OUT_OF_SPACE_MARKERS: &[&str] = &[
    "no space left",
    "disk full",
    "quota exceeded",
    "not enough space",
];

fn is_out_of_space(error: &io::Error) -> bool {
    let msg = error.to_string().to_lowercase();
    OUT_OF_SPACE_MARKERS.iter().any(|m| msg.contains(m))
}

pub type StorageResult<T> = Result<T, StorageError>;
