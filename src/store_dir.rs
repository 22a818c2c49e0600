use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// File name of the catalog database inside a store folder.
pub const CATALOG_FILE: &str = "duckstore.redb";

/// Name of the content root directory inside a store folder.
pub const CONTENT_DIR: &str = "store";

/// Environment variable naming the store folder.
pub const STORE_DIR_ENV: &str = "DUCKSTORE_DIR";

/// A store folder: the catalog database plus the content root holding every
/// attached file. All stored paths are relative to the content root, so the
/// folder can be moved or archived as a unit.
#[derive(Debug, Clone)]
pub struct StoreDir {
    root: PathBuf,
}

impl StoreDir {
    /// Resolve the store folder from, in order of priority:
    /// 1. An explicit path (from --folder)
    /// 2. The DUCKSTORE_DIR environment variable
    /// 3. The current directory, if it already contains a catalog
    /// 4. The XDG data directory (~/.local/share/duckstore/)
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        let root = if let Some(path) = explicit {
            path.to_path_buf()
        } else if let Ok(val) = std::env::var(STORE_DIR_ENV) {
            PathBuf::from(val)
        } else if Path::new(CATALOG_FILE).is_file() {
            std::env::current_dir()?
        } else {
            xdg::BaseDirectories::with_prefix("duckstore")
                .get_data_home()
                .ok_or_else(|| {
                    Error::Config(
                        "could not determine XDG data home directory".into(),
                    )
                })?
        };

        std::fs::create_dir_all(&root)
            .map_err(|_| Error::DataDir(root.clone()))?;

        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn catalog_db(&self) -> PathBuf {
        self.root.join(CATALOG_FILE)
    }

    pub fn has_catalog(&self) -> bool {
        self.catalog_db().is_file()
    }

    /// The content root, created on first use.
    pub fn content_root(&self) -> Result<PathBuf> {
        let path = self.root.join(CONTENT_DIR);
        std::fs::create_dir_all(&path)
            .map_err(|_| Error::DataDir(path.clone()))?;
        Ok(path)
    }
}
