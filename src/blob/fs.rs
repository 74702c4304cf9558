//! Filesystem blob store: one file per blob, fanned out by id prefix.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use tracing::debug;
use uuid::Uuid;

use super::{BlobError, BlobId, BlobStore, Result};

/// Blob store backed by a directory tree.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    /// Creates a store rooted at the given directory.
    ///
    /// The directory is created if it doesn't exist.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blob_path(&self, id: &BlobId) -> PathBuf {
        let hex = id.to_string();
        self.root.join(&hex[..2]).join(hex)
    }
}

impl BlobStore for FsBlobStore {
    fn read_blob(&self, id: &BlobId) -> Result<Vec<u8>> {
        match fs::read(self.blob_path(id)) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(BlobError::NotFound(*id)),
            Err(e) => Err(e.into()),
        }
    }

    fn write_blobs(&self, blobs: &[Vec<u8>]) -> Result<Vec<BlobId>> {
        let mut ids = Vec::with_capacity(blobs.len());
        for blob in blobs {
            let id = BlobId::of(blob);
            let path = self.blob_path(&id);
            if !path.exists() {
                if let Some(dir) = path.parent() {
                    fs::create_dir_all(dir)?;
                }
                // Write then rename so readers never see a partial blob. Each
                // writer gets its own temp file; the last rename wins.
                let tmp = path.with_extension(format!("{}.tmp", Uuid::new_v4().simple()));
                fs::write(&tmp, blob)?;
                fs::rename(&tmp, &path)?;
                debug!(blob = %id, len = blob.len(), "stored blob");
            }
            ids.push(id);
        }
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::TempDir;

    fn test_store() -> (TempDir, FsBlobStore) {
        let dir = TempDir::new().unwrap();
        let store = FsBlobStore::new(dir.path().join("blobs")).unwrap();
        (dir, store)
    }

    #[test]
    fn write_and_read_blob() {
        let (_dir, store) = test_store();
        let ids = store.write_blobs(&[b"chunk".to_vec()]).unwrap();

        assert_eq!(ids, vec![BlobId::of(b"chunk")]);
        assert_eq!(store.read_blob(&ids[0]).unwrap(), b"chunk");
    }

    #[test]
    fn blobs_fan_out_by_prefix() {
        let (_dir, store) = test_store();
        let ids = store.write_blobs(&[b"chunk".to_vec()]).unwrap();

        let hex = ids[0].to_string();
        assert!(store.root().join(&hex[..2]).join(&hex).is_file());
    }

    #[test]
    fn writing_same_content_twice_is_idempotent() {
        let (_dir, store) = test_store();
        let first = store.write_blobs(&[b"same".to_vec()]).unwrap();
        let second = store
            .write_blobs(&[b"same".to_vec(), b"same".to_vec()])
            .unwrap();

        assert_eq!(second, vec![first[0], first[0]]);
        assert_eq!(store.read_blob(&first[0]).unwrap(), b"same");
    }

    #[test]
    fn concurrent_writers_of_same_content_all_succeed() {
        let (_dir, store) = test_store();
        let blob = vec![b'z'; 64 << 10];

        let results: Vec<_> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| scope.spawn(|| store.write_blobs(std::slice::from_ref(&blob))))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        for ids in results {
            assert_eq!(ids.unwrap(), vec![BlobId::of(&blob)]);
        }
        assert_eq!(store.read_blob(&BlobId::of(&blob)).unwrap(), blob);

        let hex = BlobId::of(&blob).to_string();
        let leftovers: Vec<_> = fs::read_dir(store.root().join(&hex[..2]))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .filter(|name| name.to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty(), "{leftovers:?}");
    }

    #[test]
    fn read_missing_blob_fails() {
        let (_dir, store) = test_store();
        let err = store.read_blob(&BlobId::of(b"absent")).unwrap_err();

        assert!(matches!(err, BlobError::NotFound(_)));
    }
}
