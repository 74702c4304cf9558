//! Length-framed chunk stream.
//!
//! Each frame is an 8-byte big-endian length followed by exactly that many
//! payload bytes. A source that ends cleanly between frames is at end of
//! stream; one that ends anywhere else is corrupt. The payload is opaque here.

use std::io::{self, Read, Write};

use super::{CodecError, Result};

const HEADER_LEN: usize = 8;

/// Largest frame a reader accepts. Guards against allocating for a garbage
/// length header.
pub const MAX_FRAME_LEN: u64 = 128 << 20;

/// Writes one frame carrying `payload`.
pub fn write_chunk(sink: &mut impl Write, payload: &[u8]) -> Result<()> {
    let len = payload.len() as u64;
    sink.write_all(&len.to_be_bytes())?;
    sink.write_all(payload)?;
    Ok(())
}

/// Reads one frame.
///
/// Returns `None` when the source is exhausted exactly at a frame boundary.
pub fn read_chunk(source: &mut impl Read) -> Result<Option<Vec<u8>>> {
    let mut header = [0u8; HEADER_LEN];
    let filled = read_full(source, &mut header)?;
    if filled == 0 {
        return Ok(None);
    }
    if filled < HEADER_LEN {
        return Err(CodecError::Framing(format!(
            "stream ended inside frame header ({filled} of {HEADER_LEN} bytes)"
        )));
    }

    let len = u64::from_be_bytes(header);
    if len > MAX_FRAME_LEN {
        return Err(CodecError::Framing(format!(
            "frame of {len} bytes exceeds the {MAX_FRAME_LEN} byte limit"
        )));
    }

    let mut payload = Vec::new();
    source.by_ref().take(len).read_to_end(&mut payload)?;
    if (payload.len() as u64) < len {
        return Err(CodecError::Framing(format!(
            "stream ended inside frame payload ({} of {len} bytes)",
            payload.len()
        )));
    }
    Ok(Some(payload))
}

/// Lazily reads every frame from `source`.
pub fn read_all_chunks<R: Read>(source: R) -> Chunks<R> {
    Chunks {
        source,
        done: false,
    }
}

/// Iterator over the frame payloads of a byte source.
///
/// Yields nothing more after the first error.
pub struct Chunks<R> {
    source: R,
    done: bool,
}

impl<R: Read> Iterator for Chunks<R> {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match read_chunk(&mut self.source) {
            Ok(Some(payload)) => Some(Ok(payload)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Reads until `buf` is full or the source is exhausted. Returns bytes read.
fn read_full(source: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
