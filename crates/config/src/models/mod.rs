mod downloads;
mod storage;

pub use self::downloads::{DownloadConfig, NetworkPolicy};
pub use self::storage::StorageConfig;

use crate::error::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub downloads: DownloadConfig,
}
impl Config {
    /// Check values that deserialize fine but can't work.
    pub fn validate(&self) -> Result<()> {
        self.storage.validate()?;
        self.downloads.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use rstest::rstest;
    use std::path::PathBuf;

    fn config_in(root: &std::path::Path) -> Config {
        Config {
            storage: StorageConfig { blob_root: root.join("pages"), database: root.join("cache.sqlite") },
            downloads: DownloadConfig::default(),
        }
    }

    #[test]
    fn test_defaults_are_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn test_absolute_paths_are_valid() {
        let dir = tempfile::tempdir().unwrap();
        config_in(dir.path()).validate().unwrap();
    }

    #[rstest]
    #[case::relative_blob_root(Some("pages"), None, 3)]
    #[case::relative_database(None, Some("cache.sqlite"), 3)]
    #[case::database_inside_blob_root(None, Some("pages/cache.sqlite"), 3)]
    #[case::zero_attempts(None, None, 0)]
    fn test_invalid(#[case] blob_root: Option<&str>, #[case] database: Option<&str>, #[case] attempts: u32) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_in(dir.path());
        if let Some(blob_root) = blob_root {
            config.storage.blob_root = PathBuf::from(blob_root);
        }
        if let Some(database) = database {
            // Relative unless it's meant to collide with the blob root.
            config.storage.database = match database.starts_with("pages/") {
                true => dir.path().join(database),
                false => PathBuf::from(database),
            };
        }
        config.downloads.max_attempts = attempts;
        let err = config.validate().unwrap_err();
        assert!(matches!(&*err, ErrorKind::Invalid(_)));
    }

    #[rstest]
    #[case("online", NetworkPolicy::Online)]
    #[case("offline", NetworkPolicy::Offline)]
    fn test_network_policy_names(#[case] name: &str, #[case] expected: NetworkPolicy) {
        let parsed: NetworkPolicy = figment::Figment::from(figment::providers::Serialized::default("network", name))
            .extract_inner("network")
            .unwrap();
        assert_eq!(parsed, expected);
        assert_eq!(parsed.is_online(), name == "online");
    }
}
