//! Tag command handlers

use anyhow::{bail, Result};

use folio_core::{Store, Tag};

use crate::output::Output;

/// List all tags with usage counts
pub fn list(store: &Store, output: &Output) -> Result<()> {
    let pages = store.pages();
    let tags: Vec<(Tag, usize)> = store
        .tags()
        .into_iter()
        .map(|tag| {
            let count = pages.iter().filter(|p| p.tags.contains(&tag.name)).count();
            (tag, count)
        })
        .collect();
    output.print_tags(&tags);
    Ok(())
}

/// Register a tag or recolor an existing one
pub async fn set(store: &Store, name: String, color: Option<String>, output: &Output) -> Result<()> {
    if let Some(ref color) = color {
        if !is_hex_color(color) {
            bail!("Invalid color '{}'. Use a hex color like #3b82f6.", color);
        }
    }
    let tag = match color {
        Some(color) => Tag::with_color(name.as_str(), color),
        None => Tag::new(name.as_str()),
    };
    let name = tag.name.clone();
    store.upsert_tag(tag).await?;
    output.success(&format!("Saved tag: {}", name));
    Ok(())
}

/// Remove a tag everywhere
pub async fn delete(store: &Store, name: String, output: &Output) -> Result<()> {
    if !store.remove_tag(&name).await? {
        bail!("Tag not found: {}", name);
    }
    output.success(&format!("Removed tag: {}", name));
    Ok(())
}

fn is_hex_color(s: &str) -> bool {
    match s.strip_prefix('#') {
        Some(hex) => matches!(hex.len(), 3 | 6) && hex.chars().all(|c| c.is_ascii_hexdigit()),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_hex_color() {
        assert!(is_hex_color("#3b82f6"));
        assert!(is_hex_color("#FFF"));
        assert!(!is_hex_color("3b82f6"));
        assert!(!is_hex_color("#xyzxyz"));
        assert!(!is_hex_color("#1234"));
    }
}
