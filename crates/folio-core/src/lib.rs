//! Folio Core Library
//!
//! This crate provides the persistence and device-sync engine for Folio,
//! a local-first notes app.
//!
//! # Architecture
//!
//! - **Storage tiers**: host files, SQLite, key-value files and a cache
//!   mirror, read in order of reliability and written together
//! - **Validator**: every page list from storage, a peer, or a bundle is
//!   repaired before it reaches application state
//! - **Sync**: local-network discovery and encrypted snapshot exchange
//!
//! # Quick Start
//!
//! ```text
//! let store = Store::open(Config::load()?).await?;
//!
//! let page = store.create_page("Groceries", None).await?;
//! store.tag_page(&page.id, "errands").await?;
//!
//! let pages = store.pages();
//! ```
//!
//! # Modules
//!
//! - `store`: Unified storage interface (main entry point)
//! - `models`: Pages, folders, tags and snapshots
//! - `validate`: Corruption detection, repair and backups
//! - `storage`: Storage tiers, tier manager and debounced persister
//! - `crypto`: Key derivation and authenticated encryption
//! - `bundle`: Passphrase-protected export files
//! - `sync`: Peer discovery and the sync protocol
//! - `identity`: Stable per-device id
//! - `config`: Application configuration

pub mod bundle;
pub mod config;
pub mod crypto;
pub mod identity;
pub mod models;
pub mod storage;
pub mod store;
pub mod sync;
pub mod validate;

pub use bundle::{Bundle, BundleError};
pub use config::Config;
pub use crypto::{CryptoError, EncryptedPayload, SymmetricKey};
pub use identity::DeviceIdentity;
pub use models::{Block, Content, Entry, Folder, Page, RawSnapshot, Snapshot, Tag};
pub use storage::{SaveStatus, StorageDiagnostics, StorageError, TierManager};
pub use store::Store;
pub use sync::{Peer, PeerStatus, SyncError, SyncEvent, SyncSession};
pub use validate::{CorruptionReport, DocumentValidator, Recovery, RecoverySource};
