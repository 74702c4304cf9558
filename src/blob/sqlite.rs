//! SQLite blob store: a single `blobs` table keyed by content hash.

use std::path::PathBuf;

use rusqlite::{Connection, OptionalExtension};
use tracing::debug;

use super::{BlobError, BlobId, BlobStore, Result};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS blobs (
    id      BLOB PRIMARY KEY,
    content BLOB NOT NULL
)";

/// Blob store backed by one `SQLite` file.
///
/// A connection is opened per call, so the store is freely shareable.
pub struct SqliteBlobStore {
    path: PathBuf,
}

impl SqliteBlobStore {
    /// Opens (creating if needed) the database at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let store = Self { path };
        store.open()?.execute_batch(SCHEMA)?;
        Ok(store)
    }

    fn open(&self) -> Result<Connection> {
        Ok(Connection::open(&self.path)?)
    }
}

impl BlobStore for SqliteBlobStore {
    fn read_blob(&self, id: &BlobId) -> Result<Vec<u8>> {
        let conn = self.open()?;
        conn.query_row(
            "SELECT content FROM blobs WHERE id = ?1",
            [id.as_bytes().as_slice()],
            |row| row.get::<_, Vec<u8>>(0),
        )
        .optional()?
        .ok_or(BlobError::NotFound(*id))
    }

    fn write_blobs(&self, blobs: &[Vec<u8>]) -> Result<Vec<BlobId>> {
        let mut conn = self.open()?;
        let tx = conn.transaction()?;
        let mut ids = Vec::with_capacity(blobs.len());
        {
            let mut insert =
                tx.prepare("INSERT OR IGNORE INTO blobs (id, content) VALUES (?1, ?2)")?;
            for blob in blobs {
                let id = BlobId::of(blob);
                if insert.execute(rusqlite::params![id.as_bytes().as_slice(), blob])? > 0 {
                    debug!(blob = %id, len = blob.len(), "stored blob");
                }
                ids.push(id);
            }
        }
        tx.commit()?;
        Ok(ids)
    }
}
