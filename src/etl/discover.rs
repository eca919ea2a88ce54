/// Discover Module
///
/// Lists the export files in an import directory.
///
/// Naming convention: `<table>[.<anything>].jsonl` or `.ndjson` (extension case-insensitive).
/// The table name is everything before the first `.`, lowercased, and must be a plain
/// identifier. `orders.jsonl` and `orders.0007.ndjson` both load into `orders`.
use crate::db::store::is_valid_table_name;
use crate::error::DiscoveryError;
use std::path::{Path, PathBuf};

const EXTENSIONS: [&str; 2] = ["jsonl", "ndjson"];

/// Return the candidate files directly inside `root`, sorted by file name.
///
/// An empty directory yields an empty list; deciding whether that is an error is up to the caller.
pub fn discover_files(root: &Path) -> Result<Vec<PathBuf>, DiscoveryError> {
    let metadata = std::fs::metadata(root).map_err(|source| match source.kind() {
        std::io::ErrorKind::NotFound => DiscoveryError::NotFound { path: root.to_path_buf() },
        _ => DiscoveryError::Io { path: root.to_path_buf(), source },
    })?;
    if !metadata.is_dir() {
        return Err(DiscoveryError::NotADirectory { path: root.to_path_buf() });
    }

    let entries = std::fs::read_dir(root).map_err(|source| DiscoveryError::Io { path: root.to_path_buf(), source })?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| DiscoveryError::Io { path: root.to_path_buf(), source })?;
        let path = entry.path();

        if !path.is_file() {
            continue;
        }
        if table_name_for(&path).is_none() {
            tracing::debug!(path = %path.display(), "skipping file outside naming convention");
            continue;
        }
        files.push(path);
    }

    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

    tracing::debug!(root = %root.display(), files = files.len(), "discovered import files");
    Ok(files)
}

/// Table name for an export file, or `None` if the name does not match the convention
pub fn table_name_for(path: &Path) -> Option<String> {
    let extension = path.extension()?.to_str()?.to_ascii_lowercase();
    if !EXTENSIONS.contains(&extension.as_str()) {
        return None;
    }

    let file_name = path.file_name()?.to_str()?;
    let table = file_name.split('.').next()?.to_ascii_lowercase();

    is_valid_table_name(&table).then_some(table)
}
