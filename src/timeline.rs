//! Timeline records and their binary encoding.
//!
//! A timeline is an ordered stream of [`Entry`] records. On the wire and in
//! storage the stream is cut into chunks, each compressed as one unit and
//! carried in a length-prefixed frame:
//!
//! ```text
//! frame   = len:u64be payload[len]
//! payload = zstd(entry*)
//! entry   = path_len:u32be path[path_len] ino:u64be mode:u32be size:u64be
//!           atime_ns:i64be mtime_ns:i64be ctime_ns:i64be btime_ns:i64be
//! ```
//!
//! Everything here is pull-based: chunks are produced and decoded one at a
//! time as the consumer asks for them.

mod chunked;
mod entry;
mod stream;

use std::io;

pub use chunked::{Chunks, MAX_FRAME_LEN, read_all_chunks, read_chunk, write_chunk};
pub use entry::{Entry, decode_entry, encode_entry};
pub use stream::{
    DEFAULT_CHUNK_SIZE, DeserializeStream, MAX_CHUNK_LEN, SerializeStream, deserialize_stream,
    serialize_stream,
};

/// Errors raised while encoding, framing, or decoding timeline data.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("malformed record: {0}")]
    MalformedRecord(String),

    #[error("framing error: {0}")]
    Framing(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = core::result::Result<T, CodecError>;
