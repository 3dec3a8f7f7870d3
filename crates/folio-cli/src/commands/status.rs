//! Status command handler

use anyhow::Result;

use folio_core::{DeviceIdentity, Store};

use crate::output::{Output, OutputFormat};

/// Show status information
pub async fn show(store: &Store, output: &Output) -> Result<()> {
    let config = store.config();
    let identity = DeviceIdentity::load_or_create(config)?;
    let diagnostics = store.diagnostics().await;
    let pages = store.pages().len();
    let folders = store.folders().len();
    let tags = store.tags().len();

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "device": {
                        "id": identity.device_id,
                        "name": config.effective_device_name()
                    },
                    "storage": diagnostics,
                    "data_dir": config.data_dir,
                    "backups": store.backup_count(),
                    "counts": {
                        "pages": pages,
                        "folders": folders,
                        "tags": tags
                    }
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", diagnostics.kind);
        }
        OutputFormat::Human => {
            println!("Folio Status");
            println!("============");
            println!();
            println!("Device:");
            println!("  ID:   {}", identity.device_id);
            println!("  Name: {}", config.effective_device_name());
            println!();
            println!("Storage:");
            println!("  Primary:    {}", diagnostics.kind);
            println!(
                "  Persistent: {}",
                if diagnostics.persistent { "yes" } else { "no" }
            );
            if let Some(usage) = diagnostics.usage {
                println!("  Usage:      {}", human_size(usage));
            }
            if diagnostics.is_standalone_app {
                println!("  Host dir:   {}", host_dir_label(store));
            } else {
                println!("  Location:   {}", config.data_dir.display());
            }
            for tier in &diagnostics.tiers {
                println!(
                    "    {:<10} {}",
                    tier.kind.to_string(),
                    if tier.available { "available" } else { "unavailable" }
                );
            }
            println!();
            println!("Contents:");
            println!("  Pages:   {}", pages);
            println!("  Folders: {}", folders);
            println!("  Tags:    {}", tags);
            println!("  Backups: {}", store.backup_count());
        }
    }

    Ok(())
}

fn host_dir_label(store: &Store) -> String {
    store
        .config()
        .host_dir
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "(not set)".to_string())
}

fn human_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}
