//! Folder command handlers

use anyhow::Result;

use folio_core::Store;

use super::find_folder;
use crate::output::Output;

pub async fn create(store: &Store, title: String, output: &Output) -> Result<()> {
    let folder = store.create_folder(&title).await?;
    if output.is_quiet() {
        println!("{}", folder.id);
    } else {
        output.success(&format!("Created folder: {} ({})", folder.title, folder.id));
    }
    Ok(())
}

pub fn list(store: &Store, output: &Output) -> Result<()> {
    output.print_folders(&store.folders());
    Ok(())
}

/// Delete a folder; its pages move to the top level
pub async fn delete(store: &Store, id: String, output: &Output) -> Result<()> {
    let folder = find_folder(store, &id)?;
    store.delete_entry(&folder.id).await?;
    output.success(&format!(
        "Deleted folder: {} ({} page(s) moved to the top level)",
        folder.title,
        folder.pages.len()
    ));
    Ok(())
}
