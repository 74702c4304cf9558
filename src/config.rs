//! tlx configuration.
//!
//! Loaded from `~/.tlx/config.toml`. Every key is optional; a missing file
//! means all defaults.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::blob::{self, BlobStore};
use crate::export::BodyOptions;
use crate::timeline::DEFAULT_CHUNK_SIZE;

/// tlx configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Config {
    /// Storage root for blobs and job metadata.
    /// Defaults to `~/.tlx/data`.
    pub root: Option<PathBuf>,

    /// Blob backend name: `fs` or `sqlite`.
    pub blob_backend: String,

    /// Upper bound on a chunk's uncompressed size when importing entries.
    pub chunk_size: usize,

    /// Default body rendering for exports. CLI flags can only switch options
    /// on.
    pub body: BodyOptions,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root: None,
            blob_backend: "fs".to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            body: BodyOptions::default(),
        }
    }
}

impl Config {
    /// Load config from `~/.tlx/config.toml`, or defaults if it is missing.
    pub fn load() -> Result<Self, String> {
        let path = Self::path().ok_or("could not determine home directory")?;
        Self::load_from(&path)
    }

    /// Load config from a specific file, or defaults if it is missing.
    pub fn load_from(path: &Path) -> Result<Self, String> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .map_err(|e| format!("failed to read {}: {e}", path.display()))?;

        let config: Self = toml::from_str(&contents)
            .map_err(|e| format!("invalid config at {}: {e}", path.display()))?;

        if config.chunk_size == 0 {
            return Err(format!("chunk-size must be positive in {}", path.display()));
        }

        Ok(config)
    }

    /// The config file path: `~/.tlx/config.toml`.
    pub fn path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".tlx").join("config.toml"))
    }

    /// The storage root: `root` if set, otherwise `~/.tlx/data`.
    pub fn storage_root(&self) -> Result<PathBuf, String> {
        match &self.root {
            Some(root) => Ok(root.clone()),
            None => dirs::home_dir()
                .map(|h| h.join(".tlx").join("data"))
                .ok_or_else(|| "could not determine home directory".to_string()),
        }
    }

    /// Opens the configured blob backend under the storage root.
    pub fn open_blob_store(&self) -> Result<Box<dyn BlobStore>, String> {
        let root = self.storage_root()?;
        let registry = blob::backends().map_err(|e| e.to_string())?;
        registry
            .create(&self.blob_backend, root)
            .map_err(|e| {
                format!(
                    "{e} (blob-backend must be one of: {})",
                    registry.names().join(", ")
                )
            })?
            .map_err(|e| format!("failed to open {} blob store: {e}", self.blob_backend))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::TempDir;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::load_from(&dir.path().join("config.toml")).unwrap();

        assert_eq!(config, Config::default());
        assert_eq!(config.blob_backend, "fs");
        assert_eq!(config.chunk_size, DEFAULT_CHUNK_SIZE);
    }

    #[test]
    fn parses_all_keys() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "root = \"/var/lib/tlx\"\n\
             blob-backend = \"sqlite\"\n\
             chunk-size = 4096\n\
             \n\
             [body]\n\
             inode-ntfs-file-reference-format = true\n",
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.root.as_deref(), Some(Path::new("/var/lib/tlx")));
        assert_eq!(config.blob_backend, "sqlite");
        assert_eq!(config.chunk_size, 4096);
        assert!(config.body.inode_ntfs_file_reference_format);
        assert!(!config.body.backslash_escape);
    }

    #[test]
    fn zero_chunk_size_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "chunk-size = 0\n").unwrap();

        let err = Config::load_from(&path).unwrap_err();
        assert!(err.contains("chunk-size"));
    }

    #[test]
    fn invalid_toml_names_the_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "blob-backend = [").unwrap();

        let err = Config::load_from(&path).unwrap_err();
        assert!(err.contains("config.toml"));
    }

    #[test]
    fn opens_configured_backend() {
        let dir = TempDir::new().unwrap();
        let config = Config {
            root: Some(dir.path().to_path_buf()),
            blob_backend: "sqlite".into(),
            ..Config::default()
        };

        let store = config.open_blob_store().unwrap();
        let ids = store.write_blobs(&[b"x".to_vec()]).unwrap();
        assert_eq!(store.read_blob(&ids[0]).unwrap(), b"x");
        assert!(dir.path().join("blobs.sqlite").is_file());
    }

    #[test]
    fn unknown_backend_lists_choices() {
        let config = Config {
            root: Some(PathBuf::from("/nonexistent")),
            blob_backend: "s3".into(),
            ..Config::default()
        };

        let err = config.open_blob_store().err().unwrap();
        assert!(err.contains("fs, sqlite"));
    }
}
