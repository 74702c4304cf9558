//! Walking a job's stored chunks in production order.

use std::io::Cursor;

use tracing::debug;

use crate::{
    blob::{BlobId, BlobStore},
    job::CollectionJob,
    timeline::{Chunks, DeserializeStream, deserialize_stream, read_all_chunks},
};

use super::{ExportError, Result};

/// Lazy iterator over every entry of a job.
pub type Entries<'a, S> = DeserializeStream<Payloads<'a, S>>;

pub(crate) fn ensure_timeline(job: &CollectionJob) -> Result<()> {
    if job.task.is_timeline() {
        Ok(())
    } else {
        Err(ExportError::WrongJobType {
            job: job.job_id.clone(),
            task: job.task.clone(),
        })
    }
}

/// Resolves a job into its entries.
///
/// The task type is checked up front; blobs are only read as the returned
/// iterator reaches them.
pub fn resolve_job<'a, S>(store: &'a S, job: &'a CollectionJob) -> Result<Entries<'a, S>>
where
    S: BlobStore + ?Sized,
{
    ensure_timeline(job)?;
    Ok(deserialize_stream(Payloads {
        frames: raw_frames(store, job),
        current: None,
    }))
}

/// Iterates a job's stored blobs without decoding them.
///
/// Does not check the task type; callers validate the job first.
pub fn raw_frames<'a, S>(store: &'a S, job: &'a CollectionJob) -> RawFrames<'a, S>
where
    S: BlobStore + ?Sized,
{
    RawFrames {
        store,
        refs: BlobRefs {
            job,
            result: 0,
            blob: 0,
        },
        done: false,
    }
}

/// Blob ids of a job: results in emission order, ids in list order.
struct BlobRefs<'a> {
    job: &'a CollectionJob,
    result: usize,
    blob: usize,
}

impl<'a> Iterator for BlobRefs<'a> {
    type Item = &'a BlobId;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let result = self.job.results.get(self.result)?;
            if let Some(id) = result.blob_ids.get(self.blob) {
                self.blob += 1;
                return Some(id);
            }
            self.result += 1;
            self.blob = 0;
        }
    }
}

/// Iterator returned by [`raw_frames`]. Yields nothing after a failed read.
pub struct RawFrames<'a, S: ?Sized> {
    store: &'a S,
    refs: BlobRefs<'a>,
    done: bool,
}

impl<S: BlobStore + ?Sized> Iterator for RawFrames<'_, S> {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let id = self.refs.next()?;
        match self.store.read_blob(id) {
            Ok(blob) => {
                debug!(blob = %id, len = blob.len(), "read blob");
                Some(Ok(blob))
            }
            Err(e) => {
                self.done = true;
                Some(Err(e.into()))
            }
        }
    }
}

/// Compressed chunk payloads of a job, one blob held at a time.
pub struct Payloads<'a, S: ?Sized> {
    frames: RawFrames<'a, S>,
    current: Option<Chunks<Cursor<Vec<u8>>>>,
}

impl<S: BlobStore + ?Sized> Iterator for Payloads<'_, S> {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(chunks) = &mut self.current {
                match chunks.next() {
                    Some(Ok(payload)) => return Some(Ok(payload)),
                    Some(Err(e)) => {
                        self.current = None;
                        return Some(Err(ExportError::from(e)));
                    }
                    None => self.current = None,
                }
            }
            match self.frames.next()? {
                Ok(blob) => self.current = Some(read_all_chunks(Cursor::new(blob))),
                Err(e) => return Some(Err(e)),
            }
        }
    }
}
