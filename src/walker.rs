use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::Result;

/// A regular file found under a store directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredFile {
    /// Path relative to the walked root, `/`-separated.
    pub relative_path: String,
    /// Fully resolved absolute path.
    pub absolute_path: PathBuf,
    pub size: u64,
}

/// Recursively walk a directory and list its regular files.
///
/// Skips hidden files/directories (names starting with `.`), which covers
/// in-flight staging files. Symlinks are not followed. A missing root yields
/// an empty list.
pub fn discover_files(root: &Path) -> Result<Vec<DiscoveredFile>> {
    if !root.try_exists()? {
        return Ok(Vec::new());
    }
    let canonical_root = root.canonicalize()?;
    let mut results = Vec::new();
    walk_dir(&canonical_root, &canonical_root, &mut results)?;
    results.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(results)
}

fn walk_dir(
    root: &Path,
    current: &Path,
    results: &mut Vec<DiscoveredFile>,
) -> Result<()> {
    let entries = std::fs::read_dir(current)?;

    for entry in entries {
        let entry = entry?;
        let file_name = entry.file_name();
        let name = file_name.to_string_lossy();

        // Skip hidden files and directories.
        if name.starts_with('.') {
            continue;
        }

        let file_type = entry.file_type()?;
        let path = entry.path();

        if file_type.is_dir() {
            walk_dir(root, &path, results)?;
        } else if file_type.is_file() {
            let size = entry.metadata()?.len();
            results.push(DiscoveredFile {
                relative_path: relative_string(root, &path),
                absolute_path: path,
                size,
            });
        } else {
            debug!(path = %path.display(), "skipping non-regular file");
        }
    }

    Ok(())
}

fn relative_string(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
