//! In-memory blob store that counts reads.

use std::{
    collections::HashMap,
    sync::{
        Mutex, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
};

use super::{BlobError, BlobId, BlobStore, Result};

/// Blob store held in process memory.
///
/// Records how many reads it has served so callers can check that nothing
/// was fetched, or that fetching happened lazily.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<BlobId, Vec<u8>>>,
    reads: AtomicUsize,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `read_blob` calls so far, including failed ones.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Drops a stored blob, leaving dangling references behind.
    pub fn remove(&self, id: &BlobId) -> Option<Vec<u8>> {
        self.blobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
    }
}

impl BlobStore for MemoryBlobStore {
    fn read_blob(&self, id: &BlobId) -> Result<Vec<u8>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.blobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
            .ok_or(BlobError::NotFound(*id))
    }

    fn write_blobs(&self, blobs: &[Vec<u8>]) -> Result<Vec<BlobId>> {
        let mut stored = self.blobs.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(blobs
            .iter()
            .map(|blob| {
                let id = BlobId::of(blob);
                stored.entry(id).or_insert_with(|| blob.clone());
                id
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_every_read() {
        let store = MemoryBlobStore::new();
        let ids = store.write_blobs(&[b"x".to_vec()]).unwrap();
        assert_eq!(store.reads(), 0);

        store.read_blob(&ids[0]).unwrap();
        store.read_blob(&BlobId::of(b"y")).unwrap_err();
        assert_eq!(store.reads(), 2);
    }

    #[test]
    fn removed_blob_is_not_found() {
        let store = MemoryBlobStore::new();
        let ids = store.write_blobs(&[b"x".to_vec()]).unwrap();
        store.remove(&ids[0]);

        let err = store.read_blob(&ids[0]).unwrap_err();
        assert!(matches!(err, BlobError::NotFound(_)));
    }
}
