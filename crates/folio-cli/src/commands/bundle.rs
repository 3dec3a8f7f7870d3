//! Encrypted export and import

use std::path::Path;

use anyhow::{bail, Result};

use folio_core::Store;

use crate::output::Output;

pub async fn export(store: &Store, path: &Path, passphrase: &str, output: &Output) -> Result<()> {
    if passphrase.is_empty() {
        bail!("Passphrase cannot be empty");
    }
    store.export_bundle(path, passphrase).await?;
    output.success(&format!(
        "Exported {} entries to {}",
        store.entries().len(),
        path.display()
    ));
    Ok(())
}

/// Replace the library with a bundle's contents
pub async fn import(store: &Store, path: &Path, passphrase: &str, output: &Output) -> Result<()> {
    let recovery = store.import_bundle(path, passphrase).await?;
    output.print_recovery(&recovery);
    Ok(())
}
