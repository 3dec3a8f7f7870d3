//! Command handlers

pub mod bundle;
pub mod config;
pub mod doctor;
pub mod folder;
pub mod page;
pub mod status;
pub mod sync;
pub mod tag;

use anyhow::{bail, Result};

use folio_core::{Entry, Folder, Page, Store};

/// Resolve a page by ID or ID prefix
pub fn find_page(store: &Store, id: &str) -> Result<Page> {
    match store.find(id)? {
        Entry::Page(page) => Ok(page),
        Entry::Folder(folder) => bail!("'{}' is a folder, not a page", folder.title),
    }
}

/// Resolve a folder by ID or ID prefix
pub fn find_folder(store: &Store, id: &str) -> Result<Folder> {
    match store.find(id)? {
        Entry::Folder(folder) => Ok(folder),
        Entry::Page(page) => bail!("'{}' is a page, not a folder", page.title),
    }
}
