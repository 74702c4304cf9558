//! Chunked serialization of entry streams.

use std::io::Read;

use tracing::trace;

use super::{CodecError, Entry, Result, decode_entry, encode_entry, write_chunk};

/// Default upper bound on a chunk's uncompressed payload.
pub const DEFAULT_CHUNK_SIZE: usize = 1 << 20;

/// Largest uncompressed payload a reader accepts.
pub const MAX_CHUNK_LEN: usize = 64 << 20;

/// zstd level 0 selects the library default.
const COMPRESSION_LEVEL: i32 = 0;

/// Lazily groups `entries` into compressed, framed chunks.
///
/// A chunk holds as many entries as fit in `chunk_size` uncompressed bytes;
/// an entry larger than that gets a chunk of its own. An entry that encodes
/// past [`MAX_CHUNK_LEN`] fails with [`CodecError::MalformedRecord`], since no
/// reader would accept its chunk. Empty input produces no chunks at all.
pub fn serialize_stream<I>(entries: I, chunk_size: usize) -> SerializeStream<I::IntoIter>
where
    I: IntoIterator<Item = Entry>,
{
    SerializeStream {
        entries: entries.into_iter(),
        chunk_size: chunk_size.clamp(1, MAX_CHUNK_LEN),
        carry: Vec::new(),
        done: false,
    }
}

/// Iterator returned by [`serialize_stream`]. Each item is one complete frame.
pub struct SerializeStream<I> {
    entries: I,
    chunk_size: usize,
    /// Encoded entry that overflowed the previous chunk.
    carry: Vec<u8>,
    done: bool,
}

impl<I: Iterator<Item = Entry>> Iterator for SerializeStream<I> {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut payload = std::mem::take(&mut self.carry);

        while !self.done && payload.len() < self.chunk_size {
            let Some(entry) = self.entries.next() else {
                self.done = true;
                break;
            };

            let encoded = entry.encoded_len();
            if encoded > MAX_CHUNK_LEN {
                self.done = true;
                return Some(Err(CodecError::MalformedRecord(format!(
                    "entry encodes to {encoded} bytes, past the {MAX_CHUNK_LEN} byte chunk limit"
                ))));
            }

            let start = payload.len();
            if let Err(e) = encode_entry(&entry, &mut payload) {
                self.done = true;
                return Some(Err(e));
            }
            if start > 0 && payload.len() > self.chunk_size {
                self.carry = payload.split_off(start);
                break;
            }
        }

        if payload.is_empty() {
            return None;
        }
        Some(frame(&payload))
    }
}

fn frame(payload: &[u8]) -> Result<Vec<u8>> {
    let compressed = zstd::bulk::compress(payload, COMPRESSION_LEVEL)?;
    trace!(
        uncompressed = payload.len(),
        compressed = compressed.len(),
        "sealed chunk"
    );
    let mut framed = Vec::with_capacity(compressed.len() + 8);
    write_chunk(&mut framed, &compressed)?;
    Ok(framed)
}

/// Lazily decodes entries from a sequence of compressed chunk payloads.
///
/// `chunks` yields payloads with their frame headers already stripped, as
/// [`read_all_chunks`](super::read_all_chunks) produces them. Only one chunk
/// is held decompressed at a time. The error type is the caller's, so an
/// upstream storage error flows through unchanged.
pub fn deserialize_stream<I, E>(chunks: I) -> DeserializeStream<I::IntoIter>
where
    I: IntoIterator<Item = core::result::Result<Vec<u8>, E>>,
    E: From<CodecError>,
{
    DeserializeStream {
        chunks: chunks.into_iter(),
        payload: Vec::new(),
        pos: 0,
        done: false,
    }
}

/// Iterator returned by [`deserialize_stream`]. Yields nothing after an error.
pub struct DeserializeStream<I> {
    chunks: I,
    payload: Vec<u8>,
    pos: usize,
    done: bool,
}

impl<I, E> Iterator for DeserializeStream<I>
where
    I: Iterator<Item = core::result::Result<Vec<u8>, E>>,
    E: From<CodecError>,
{
    type Item = core::result::Result<Entry, E>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            if self.pos < self.payload.len() {
                return match decode_entry(&self.payload[self.pos..]) {
                    Ok((entry, used)) => {
                        self.pos += used;
                        Some(Ok(entry))
                    }
                    Err(e) => self.fail(e.into()),
                };
            }

            match self.chunks.next() {
                Some(Ok(compressed)) => match decompress(&compressed) {
                    Ok(payload) => {
                        self.payload = payload;
                        self.pos = 0;
                    }
                    Err(e) => return self.fail(e.into()),
                },
                Some(Err(e)) => return self.fail(e),
                None => {
                    self.done = true;
                    self.payload = Vec::new();
                }
            }
        }
        None
    }
}

impl<I> DeserializeStream<I> {
    fn fail<T, E>(&mut self, err: E) -> Option<core::result::Result<T, E>> {
        self.done = true;
        self.payload = Vec::new();
        Some(Err(err))
    }
}

fn decompress(compressed: &[u8]) -> Result<Vec<u8>> {
    let decoder = zstd::stream::read::Decoder::new(compressed)?;
    let mut payload = Vec::new();
    decoder
        .take(MAX_CHUNK_LEN as u64 + 1)
        .read_to_end(&mut payload)
        .map_err(|e| CodecError::MalformedRecord(format!("chunk does not decompress: {e}")))?;
    if payload.len() > MAX_CHUNK_LEN {
        return Err(CodecError::MalformedRecord(format!(
            "chunk decompresses past the {MAX_CHUNK_LEN} byte limit"
        )));
    }
    trace!(uncompressed = payload.len(), "opened chunk");
    Ok(payload)
}
