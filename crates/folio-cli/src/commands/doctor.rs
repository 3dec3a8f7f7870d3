//! Integrity check and repair

use anyhow::Result;

use folio_core::Store;

use crate::output::{Output, OutputFormat};

/// Report corruption in the stored page list, optionally rewriting it
pub async fn run(store: &Store, repair: bool, output: &Output) -> Result<()> {
    let report = store.check_integrity().await?;

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "is_corrupt": report.is_corrupt,
                    "issues": report.issues,
                    "repaired": repair && report.is_corrupt
                })
            );
        }
        OutputFormat::Quiet => {}
        OutputFormat::Human => {
            if report.is_corrupt {
                println!("Found {} issue(s) in stored pages:", report.issues.len());
                for issue in &report.issues {
                    println!("  - {}", issue);
                }
            } else {
                println!("✓ Stored pages are healthy");
            }
        }
    }

    if report.is_corrupt {
        if repair {
            store.repair_storage().await?;
            if !output.is_json() {
                output.success("Storage rewritten from the repaired library");
            }
        } else if output.format == OutputFormat::Human {
            println!();
            println!("Run `folio doctor --repair` to rewrite storage.");
        }
    }

    Ok(())
}
