//! Page command handlers

use anyhow::Result;

use folio_core::{Block, Page, Store};

use super::{find_folder, find_page};
use crate::output::Output;

/// Create a new page
pub async fn create(
    store: &Store,
    title: String,
    body: Option<String>,
    folder: Option<String>,
    tags: Vec<String>,
    output: &Output,
) -> Result<()> {
    let folder_id = match folder {
        Some(ref id) => Some(find_folder(store, id)?.id),
        None => None,
    };

    let mut page = store.create_page(&title, folder_id.as_deref()).await?;
    if body.is_some() || !tags.is_empty() {
        if let Some(ref body) = body {
            page.set_blocks(text_blocks(body));
        }
        for tag in &tags {
            page.add_tag(tag.as_str());
        }
        store.update_page(page.clone()).await?;
    }

    if output.is_quiet() {
        println!("{}", page.id);
    } else {
        output.print_page(&page);
    }
    Ok(())
}

/// List pages, optionally filtered by tag or folder
pub fn list(
    store: &Store,
    tag: Option<String>,
    folder: Option<String>,
    output: &Output,
) -> Result<()> {
    let folder_id = match folder {
        Some(ref id) => Some(find_folder(store, id)?.id),
        None => None,
    };

    let pages: Vec<Page> = store
        .pages()
        .into_iter()
        .filter(|p| tag.as_ref().map_or(true, |t| p.tags.contains(t)))
        .filter(|p| folder_id.is_none() || p.folder_id == folder_id)
        .collect();
    output.print_pages(&pages);
    Ok(())
}

/// Show a page
pub fn show(store: &Store, id: String, output: &Output) -> Result<()> {
    let page = find_page(store, &id)?;
    output.print_page(&page);
    Ok(())
}

/// Change a page's title and/or text
pub async fn edit(
    store: &Store,
    id: String,
    title: Option<String>,
    body: Option<String>,
    output: &Output,
) -> Result<()> {
    let mut page = find_page(store, &id)?;
    if page.is_locked() {
        anyhow::bail!("Page '{}' is locked", page.title);
    }
    if title.is_none() && body.is_none() {
        output.message("Nothing to change. Use --title or --body.");
        return Ok(());
    }

    if let Some(title) = title {
        page.set_title(title);
    }
    if let Some(ref body) = body {
        page.set_blocks(text_blocks(body));
    }
    store.update_page(page.clone()).await?;
    output.success(&format!("Updated page: {}", page.title));
    Ok(())
}

/// Delete a page
pub async fn delete(store: &Store, id: String, output: &Output) -> Result<()> {
    let page = find_page(store, &id)?;
    store.delete_entry(&page.id).await?;
    output.success(&format!("Deleted page: {}", page.title));
    Ok(())
}

/// Move a page into a folder, or to the top level
pub async fn move_to(
    store: &Store,
    id: String,
    folder: Option<String>,
    output: &Output,
) -> Result<()> {
    let page = find_page(store, &id)?;
    match folder {
        Some(folder) => {
            let folder = find_folder(store, &folder)?;
            store.move_page(&page.id, Some(&folder.id)).await?;
            output.success(&format!("Moved '{}' to '{}'", page.title, folder.title));
        }
        None => {
            store.move_page(&page.id, None).await?;
            output.success(&format!("Moved '{}' to the top level", page.title));
        }
    }
    Ok(())
}

/// Tag a page
pub async fn tag(store: &Store, id: String, tag: String, output: &Output) -> Result<()> {
    let page = find_page(store, &id)?;
    store.tag_page(&page.id, &tag).await?;
    output.success(&format!("Tagged '{}' with {}", page.title, tag.trim()));
    Ok(())
}

/// One paragraph block per non-empty line
fn text_blocks(body: &str) -> Vec<Block> {
    body.lines()
        .map(str::trim_end)
        .filter(|line| !line.is_empty())
        .map(Block::paragraph)
        .collect()
}
