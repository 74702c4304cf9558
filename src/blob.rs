//! Content-addressed blob storage.
//!
//! Blobs are opaque byte strings identified by the SHA-256 of their content.
//! Writing the same bytes twice yields the same id. Timeline chunks are
//! stored one frame per blob.
//!
//! Three backends are available:
//!
//! ```text
//! fs      <root>/blobs/<first two hex digits>/<hex id>
//! sqlite  <root>/blobs.sqlite
//! memory  in-process, for tests
//! ```

mod fs;
mod memory;
mod sqlite;

use std::{fmt, io, path::PathBuf, str::FromStr};

use sha2::{Digest, Sha256};

use crate::registry::{Registry, RegistryError};

pub use fs::FsBlobStore;
pub use memory::MemoryBlobStore;
pub use sqlite::SqliteBlobStore;

/// Errors that can occur during blob storage operations.
#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    #[error("blob not found: {0}")]
    NotFound(BlobId),

    #[error("invalid blob id: {0}")]
    InvalidId(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

pub type Result<T> = core::result::Result<T, BlobError>;

/// Identifier of a stored blob: the SHA-256 digest of its content.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlobId([u8; 32]);

impl BlobId {
    pub const LEN: usize = 32;

    /// Computes the id `content` is stored under.
    pub fn of(content: &[u8]) -> Self {
        Self(Sha256::digest(content).into())
    }

    pub fn as_bytes(&self) -> &[u8; Self::LEN] {
        &self.0
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let digest = <[u8; Self::LEN]>::try_from(bytes).map_err(|_| {
            BlobError::InvalidId(format!("expected {} bytes, got {}", Self::LEN, bytes.len()))
        })?;
        Ok(Self(digest))
    }
}

impl fmt::Display for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlobId({self})")
    }
}

impl FromStr for BlobId {
    type Err = BlobError;

    fn from_str(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|e| BlobError::InvalidId(format!("{s}: {e}")))?;
        Self::from_bytes(&bytes)
    }
}

/// Read and write access to a blob store.
///
/// Implementations take `&self` and may be shared between concurrent export
/// requests.
pub trait BlobStore: Send + Sync {
    /// Reads one blob. Fails with [`BlobError::NotFound`] if it is absent.
    fn read_blob(&self, id: &BlobId) -> Result<Vec<u8>>;

    /// Stores each blob under its content hash, returning the ids in order.
    fn write_blobs(&self, blobs: &[Vec<u8>]) -> Result<Vec<BlobId>>;
}

/// Constructor for a blob backend rooted at a storage directory.
pub type BackendRegistry = Registry<PathBuf, Result<Box<dyn BlobStore>>>;

/// Registry of the on-disk blob backends, keyed by config name.
pub fn backends() -> core::result::Result<BackendRegistry, RegistryError> {
    let mut registry = BackendRegistry::new();
    let builtins: [(&str, fn(PathBuf) -> Result<Box<dyn BlobStore>>); 2] = [
        ("fs", |root| Ok(Box::new(FsBlobStore::new(root.join("blobs"))?))),
        ("sqlite", |root| {
            Ok(Box::new(SqliteBlobStore::new(root.join("blobs.sqlite"))?))
        }),
    ];
    for (name, ctor) in builtins {
        registry.register(name, ctor)?;
    }
    Ok(registry)
}
