//! Output formatting for CLI
//!
//! Provides consistent output formatting across all commands:
//! - Human-readable default output
//! - JSON output (--json flag)
//! - Quiet mode for scripting (--quiet flag)

use folio_core::sync::SyncRecord;
use folio_core::{Folder, Page, Peer, Recovery, RecoverySource, Tag};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output (default)
    Human,
    /// JSON output
    Json,
    /// Quiet mode - minimal output
    Quiet,
}

impl OutputFormat {
    /// Create format from CLI flags
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if quiet {
            OutputFormat::Quiet
        } else if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

/// Output helper for consistent formatting
pub struct Output {
    /// The output format
    pub format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Check if output is in quiet mode
    pub fn is_quiet(&self) -> bool {
        matches!(self.format, OutputFormat::Quiet)
    }

    pub fn is_json(&self) -> bool {
        matches!(self.format, OutputFormat::Json)
    }

    /// Print a single page with its text
    pub fn print_page(&self, page: &Page) {
        match self.format {
            OutputFormat::Human => {
                println!("ID:       {}", page.id);
                println!("Title:    {}", page.title);
                if let Some(ref folder) = page.folder_id {
                    println!("Folder:   {}", short_id(folder));
                }
                if !page.tag_names.is_empty() {
                    println!("Tags:     {}", page.tag_names.join(", "));
                }
                println!("Created:  {}", page.created_at.format("%Y-%m-%d %H:%M"));
                if page.is_locked() {
                    println!("Locked:   yes");
                }

                let text = page_text(page);
                if !text.is_empty() {
                    println!();
                    println!("{}", text);
                }
            }
            OutputFormat::Json => print_json(page),
            OutputFormat::Quiet => println!("{}", page.id),
        }
    }

    /// Print a list of pages
    pub fn print_pages(&self, pages: &[Page]) {
        match self.format {
            OutputFormat::Human => {
                if pages.is_empty() {
                    println!("No pages found.");
                    return;
                }
                for page in pages {
                    let tags = if page.tag_names.is_empty() {
                        String::new()
                    } else {
                        format!(" [{}]", page.tag_names.join(", "))
                    };
                    println!(
                        "{} | {}{} | {}",
                        short_id(&page.id),
                        truncate(&page.title, 40),
                        tags,
                        truncate_line(&page_text(page), 40)
                    );
                }
                println!("\n{} page(s)", pages.len());
            }
            OutputFormat::Json => print_json(pages),
            OutputFormat::Quiet => {
                for page in pages {
                    println!("{}", page.id);
                }
            }
        }
    }

    /// Print a list of folders
    pub fn print_folders(&self, folders: &[Folder]) {
        match self.format {
            OutputFormat::Human => {
                if folders.is_empty() {
                    println!("No folders found.");
                    return;
                }
                for folder in folders {
                    println!(
                        "{} | {} ({})",
                        short_id(&folder.id),
                        truncate(&folder.title, 40),
                        folder.pages.len()
                    );
                }
                println!("\n{} folder(s)", folders.len());
            }
            OutputFormat::Json => print_json(folders),
            OutputFormat::Quiet => {
                for folder in folders {
                    println!("{}", folder.id);
                }
            }
        }
    }

    /// Print the tag registry with usage counts
    pub fn print_tags(&self, tags: &[(Tag, usize)]) {
        match self.format {
            OutputFormat::Human => {
                if tags.is_empty() {
                    println!("No tags found.");
                    return;
                }
                for (tag, count) in tags {
                    println!("{} ({}) {}", tag.name, count, tag.color);
                }
                println!("\n{} tag(s)", tags.len());
            }
            OutputFormat::Json => {
                let json_tags: Vec<_> = tags
                    .iter()
                    .map(|(tag, count)| {
                        serde_json::json!({"name": tag.name, "color": tag.color, "count": count})
                    })
                    .collect();
                print_json(&json_tags);
            }
            OutputFormat::Quiet => {
                for (tag, _) in tags {
                    println!("{}", tag.name);
                }
            }
        }
    }

    /// Print known peers
    pub fn print_peers(&self, peers: &[Peer]) {
        match self.format {
            OutputFormat::Human => {
                if peers.is_empty() {
                    println!("No devices found.");
                    return;
                }
                for peer in peers {
                    println!(
                        "{} | {} | {}",
                        short_id(&peer.device_id),
                        truncate(&peer.device_name, 30),
                        peer.status
                    );
                }
                println!("\n{} device(s)", peers.len());
            }
            OutputFormat::Json => print_json(peers),
            OutputFormat::Quiet => {
                for peer in peers {
                    println!("{}", peer.device_id);
                }
            }
        }
    }

    /// Print recent sync outcomes
    pub fn print_history(&self, history: &[SyncRecord]) {
        match self.format {
            OutputFormat::Human => {
                for record in history {
                    let when = chrono::DateTime::from_timestamp_millis(record.timestamp)
                        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                        .unwrap_or_default();
                    let outcome = record.error.as_deref().unwrap_or("ok");
                    println!(
                        "{} | {} | {:?} | {}",
                        when,
                        short_id(&record.peer),
                        record.direction,
                        outcome
                    );
                }
            }
            OutputFormat::Json => print_json(history),
            OutputFormat::Quiet => {}
        }
    }

    /// Report how incoming pages were accepted
    pub fn print_recovery(&self, recovery: &Recovery) {
        let source = match recovery.source {
            RecoverySource::Repaired => "repaired".to_string(),
            RecoverySource::Backup { index } => format!("backup {}", index),
            RecoverySource::Default => "default".to_string(),
        };
        match self.format {
            OutputFormat::Human => {
                match recovery.source {
                    RecoverySource::Repaired => {
                        println!("✓ Loaded {} entries", recovery.entries.len())
                    }
                    _ => println!(
                        "! Incoming data was unusable, restored from {} ({} entries)",
                        source,
                        recovery.entries.len()
                    ),
                }
                for issue in &recovery.issues {
                    println!("  - {}", issue);
                }
            }
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({
                        "source": source,
                        "entries": recovery.entries.len(),
                        "issues": recovery.issues
                    })
                );
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        match self.format {
            OutputFormat::Human => println!("✓ {}", message),
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({"status": "success", "message": message})
                );
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Print an informational message
    pub fn message(&self, msg: &str) {
        match self.format {
            OutputFormat::Human => println!("{}", msg),
            OutputFormat::Json => {
                println!("{}", serde_json::json!({"message": msg}));
            }
            OutputFormat::Quiet => {}
        }
    }
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Failed to serialize output: {}", e),
    }
}

/// Plain text of a page, one line per text block
pub fn page_text(page: &Page) -> String {
    page.content
        .blocks
        .iter()
        .filter_map(|block| block.data.get("text").and_then(|t| t.as_str()))
        .collect::<Vec<_>>()
        .join("\n")
}

/// First eight characters of an id
pub fn short_id(id: &str) -> &str {
    match id.char_indices().nth(8) {
        Some((end, _)) => &id[..end],
        None => id,
    }
}

/// Truncate a string to max length, adding "..." if truncated
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// Truncate to first line and max length
fn truncate_line(s: &str, max_len: usize) -> String {
    let first_line = s.lines().next().unwrap_or("");
    truncate(first_line, max_len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_core::Block;

    #[test]
    fn test_format_from_flags() {
        assert_eq!(OutputFormat::from_flags(false, false), OutputFormat::Human);
        assert_eq!(OutputFormat::from_flags(true, false), OutputFormat::Json);
        assert_eq!(OutputFormat::from_flags(false, true), OutputFormat::Quiet);
        // Quiet takes precedence
        assert_eq!(OutputFormat::from_flags(true, true), OutputFormat::Quiet);
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("this is a long string", 10), "this is...");
        assert_eq!(truncate("çççççççççççç", 5), "çç...");
    }

    #[test]
    fn test_truncate_line() {
        assert_eq!(truncate_line("single line", 20), "single line");
        assert_eq!(truncate_line("line one\nline two", 20), "line one");
        assert_eq!(
            truncate_line("very long single line here", 10),
            "very lo..."
        );
    }

    #[test]
    fn test_short_id() {
        assert_eq!(short_id("0123456789abcdef"), "01234567");
        assert_eq!(short_id("abc"), "abc");
    }

    #[test]
    fn test_page_text_joins_paragraphs() {
        let mut page = Page::new("Recipe");
        page.set_blocks(vec![Block::paragraph("flour"), Block::paragraph("eggs")]);
        assert_eq!(page_text(&page), "flour\neggs");
    }
}
