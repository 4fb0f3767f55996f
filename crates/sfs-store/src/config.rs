use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

/// Configuration for a [`crate::FileStore`] and its on-disk layout.
///
/// ```toml
/// root = "/var/lib/sfs"
/// save_delay_ms = 2500
/// max_resident_bytes = 8388608
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding the blob directory and the metadata file.
    pub root: PathBuf,
    /// Name of the flat blob directory under `root`.
    pub blob_dir: String,
    /// Name of the metadata file under `root`.
    pub metadata_file: String,
    /// Debounce window for metadata saves, in milliseconds.
    pub save_delay_ms: u64,
    /// Upper bound on blob bytes kept resident in memory.
    pub max_resident_bytes: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            blob_dir: "blobs".into(),
            metadata_file: "metadata.json".into(),
            save_delay_ms: 2_500,
            max_resident_bytes: 8 * 1024 * 1024, // 8 MiB
        }
    }
}

impl StoreConfig {
    /// Default configuration rooted at `root`.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Default::default()
        }
    }

    /// Load a configuration from a TOML file. Missing keys take defaults.
    pub fn from_toml_file(path: &Path) -> StoreResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| StoreError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> StoreResult<Self> {
        let config: Self = toml::from_str(text).map_err(|e| StoreError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> StoreResult<()> {
        for (what, name) in [("blob_dir", &self.blob_dir), ("metadata_file", &self.metadata_file)] {
            if name.is_empty() || name.contains(['/', '\\']) {
                return Err(StoreError::Config(format!(
                    "{what} must be a plain file name, got {name:?}"
                )));
            }
        }
        if self.blob_dir == self.metadata_file {
            return Err(StoreError::Config(
                "blob_dir and metadata_file must differ".into(),
            ));
        }
        Ok(())
    }

    pub fn save_delay(&self) -> Duration {
        Duration::from_millis(self.save_delay_ms)
    }

    pub fn blob_path(&self) -> PathBuf {
        self.root.join(&self.blob_dir)
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.root.join(&self.metadata_file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let c = StoreConfig::default();
        assert_eq!(c.blob_dir, "blobs");
        assert_eq!(c.metadata_file, "metadata.json");
        assert_eq!(c.save_delay(), Duration::from_millis(2_500));
        assert_eq!(c.max_resident_bytes, 8 * 1024 * 1024);
    }

    #[test]
    fn paths_derive_from_root() {
        let c = StoreConfig::with_root("/tmp/sfs");
        assert_eq!(c.blob_path(), PathBuf::from("/tmp/sfs/blobs"));
        assert_eq!(c.metadata_path(), PathBuf::from("/tmp/sfs/metadata.json"));
    }

    #[test]
    fn partial_toml_takes_defaults() {
        let c = StoreConfig::from_toml_str("root = \"/data\"\nsave_delay_ms = 10\n").unwrap();
        assert_eq!(c.root, PathBuf::from("/data"));
        assert_eq!(c.save_delay(), Duration::from_millis(10));
        assert_eq!(c.blob_dir, "blobs");
    }

    #[test]
    fn nested_names_rejected() {
        let err = StoreConfig::from_toml_str("blob_dir = \"a/b\"\n").unwrap_err();
        assert!(matches!(err, StoreError::Config(_)));
    }

    #[test]
    fn clashing_names_rejected() {
        let err = StoreConfig::from_toml_str("blob_dir = \"x\"\nmetadata_file = \"x\"\n").unwrap_err();
        assert!(matches!(err, StoreError::Config(_)));
    }

    #[test]
    fn from_toml_file_reports_path() {
        let err = StoreConfig::from_toml_file(Path::new("/nonexistent/sfs.toml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/sfs.toml"));
    }
}
