//! Reading timelines from files for `tlx import`.
//!
//! Both readers stream: one chunk is held in memory at a time and stored as
//! its own blob before the next is read. A failure part way through can leave
//! earlier blobs behind, but no job refers to them.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::iter;
use std::path::Path;

use serde::Deserialize;
use tracing::info;

use tlx::{
    blob::{BlobId, BlobStore},
    job::CollectionResult,
    timeline::{CodecError, Entry, deserialize_stream, read_all_chunks, serialize_stream, write_chunk},
};

/// One line of a JSONL timeline. Omitted numeric fields are zero.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct JsonEntry {
    path: String,
    #[serde(default)]
    ino: u64,
    #[serde(default)]
    mode: u32,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    atime_ns: i64,
    #[serde(default)]
    mtime_ns: i64,
    #[serde(default)]
    ctime_ns: i64,
    #[serde(default)]
    btime_ns: i64,
}

impl From<JsonEntry> for Entry {
    fn from(e: JsonEntry) -> Self {
        Self {
            path: e.path.into_bytes(),
            ino: e.ino,
            mode: e.mode,
            size: e.size,
            atime_ns: e.atime_ns,
            mtime_ns: e.mtime_ns,
            ctime_ns: e.ctime_ns,
            btime_ns: e.btime_ns,
        }
    }
}

/// Stores each chunk of a chunked timeline file as one blob.
///
/// Every chunk is decoded before it is stored, so a corrupt chunk is never
/// referenced by a result.
pub(super) fn import_chunked(blobs: &dyn BlobStore, path: &Path) -> Result<CollectionResult, String> {
    let file = File::open(path).map_err(|e| format!("failed to open {}: {e}", path.display()))?;

    let mut blob_ids = Vec::new();
    let mut entries = 0;
    for payload in read_all_chunks(BufReader::new(file)) {
        let payload = payload.map_err(|e| format!("{}: {e}", path.display()))?;
        let mut frame = Vec::with_capacity(payload.len() + 8);
        write_chunk(&mut frame, &payload).map_err(|e| format!("failed to frame chunk: {e}"))?;

        entries += count_entries(payload)
            .map_err(|e| format!("{}: chunk {}: {e}", path.display(), blob_ids.len()))?;
        blob_ids.push(store_frame(blobs, frame)?);
    }

    info!(chunks = blob_ids.len(), entries, "imported chunked timeline");
    Ok(CollectionResult { blob_ids })
}

/// Stores a JSONL timeline as blobs of at most `chunk_size` uncompressed
/// bytes each.
pub(super) fn import_jsonl(
    blobs: &dyn BlobStore,
    path: &Path,
    chunk_size: usize,
) -> Result<CollectionResult, String> {
    let file = File::open(path).map_err(|e| format!("failed to open {}: {e}", path.display()))?;

    let mut bad_line = None;
    let mut blob_ids = Vec::new();
    {
        let entries = parse_jsonl(BufReader::new(file))
            .map_while(|parsed| parsed.map_err(|e| bad_line = Some(e)).ok());
        for frame in serialize_stream(entries, chunk_size) {
            let frame = frame.map_err(|e| format!("failed to encode {}: {e}", path.display()))?;
            blob_ids.push(store_frame(blobs, frame)?);
        }
    }
    if let Some(e) = bad_line {
        return Err(format!("{}: {e}", path.display()));
    }

    info!(chunks = blob_ids.len(), "imported JSONL timeline");
    Ok(CollectionResult { blob_ids })
}

/// Parses JSONL entries line by line, skipping blank lines.
fn parse_jsonl(reader: impl BufRead) -> impl Iterator<Item = Result<Entry, String>> {
    reader.lines().enumerate().filter_map(|(idx, line)| {
        let line = match line {
            Ok(line) => line,
            Err(e) => return Some(Err(format!("line {}: {e}", idx + 1))),
        };
        if line.trim().is_empty() {
            return None;
        }
        Some(
            serde_json::from_str::<JsonEntry>(&line)
                .map(Entry::from)
                .map_err(|e| format!("line {}: {e}", idx + 1)),
        )
    })
}

fn count_entries(payload: Vec<u8>) -> Result<usize, CodecError> {
    deserialize_stream(iter::once(Ok::<_, CodecError>(payload)))
        .try_fold(0, |n, entry| entry.map(|_| n + 1))
}

fn store_frame(blobs: &dyn BlobStore, frame: Vec<u8>) -> Result<BlobId, String> {
    blobs
        .write_blobs(&[frame])
        .map_err(|e| format!("failed to store chunk: {e}"))?
        .pop()
        .ok_or_else(|| "blob store returned no id for chunk".to_string())
}
