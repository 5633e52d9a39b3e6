use crate::error::{ErrorKind, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Where downloaded chapters are kept.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding page and cover images, one file per blob.
    pub blob_root: PathBuf,
    /// SQLite database file holding chapter and manga records.
    pub database: PathBuf,
}
impl Default for StorageConfig {
    fn default() -> Self {
        match crate::project_dirs() {
            Some(dirs) => Self {
                blob_root: dirs.cache_dir().join("pages"),
                database: dirs.data_dir().join("cache.sqlite"),
            },
            // No home directory (containers, service accounts).
            None => {
                let root = std::env::temp_dir().join("tankobon");
                Self { blob_root: root.join("pages"), database: root.join("cache.sqlite") }
            },
        }
    }
}
impl StorageConfig {
    pub(crate) fn validate(&self) -> Result<()> {
        require_absolute("storage.blob_root", &self.blob_root)?;
        require_absolute("storage.database", &self.database)?;
        if self.database.starts_with(&self.blob_root) {
            exn::bail!(ErrorKind::Invalid("storage.database must not live inside storage.blob_root".to_string()));
        }
        Ok(())
    }
}

fn require_absolute(key: &str, path: &Path) -> Result<()> {
    if !path.is_absolute() {
        exn::bail!(ErrorKind::Invalid(format!("{key} must be an absolute path, got {}", path.display())));
    }
    Ok(())
}
