//! Configuration persistence using toml_edit to preserve formatting and comments.

use super::Config;
use anyhow::{Context, Result};
use std::path::Path;
use toml_edit::{DocumentMut, Item, Table};

/// Save the entire config to a TOML file.
///
/// When the file already exists the new values are merged into the existing
/// document key by key, so comments and table layout survive.
pub fn save_config(path: &Path, config: &Config) -> Result<()> {
    let new_content =
        toml::to_string_pretty(config).with_context(|| "Failed to serialize config")?;
    let new_doc: DocumentMut = new_content
        .parse()
        .with_context(|| "Failed to parse serialized config")?;

    let doc = if path.exists() {
        let mut doc = read_document(path)?;
        merge_table(doc.as_table_mut(), new_doc.as_table());
        doc
    } else {
        new_doc
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
    }

    std::fs::write(path, doc.to_string())
        .with_context(|| format!("Failed to write config file: {:?}", path))?;

    Ok(())
}

/// Update just the remote mapping URL (an empty string disables remote mappings)
pub fn update_remote_url(path: &Path, url: &str) -> Result<()> {
    let mut doc = read_document(path)?;

    if doc.get("mappings").is_none() {
        doc["mappings"] = toml_edit::table();
    }
    doc["mappings"]["remote_url"] = toml_edit::value(url);

    std::fs::write(path, doc.to_string())
        .with_context(|| format!("Failed to write config file: {:?}", path))?;

    Ok(())
}

/// Make `target` hold exactly the keys of `source`, recursing into tables.
fn merge_table(target: &mut Table, source: &Table) {
    let stale: Vec<String> = target
        .iter()
        .map(|(key, _)| key.to_string())
        .filter(|key| !source.contains_key(key))
        .collect();
    for key in stale {
        target.remove(&key);
    }

    for (key, item) in source.iter() {
        match (target.get_mut(key).and_then(Item::as_table_mut), item.as_table()) {
            (Some(existing), Some(incoming)) => merge_table(existing, incoming),
            _ => {
                target.insert(key, item.clone());
            }
        }
    }
}

fn read_document(path: &Path) -> Result<DocumentMut> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    content
        .parse()
        .with_context(|| format!("Failed to parse config file: {:?}", path))
}
