//! A single filesystem entry and its fixed-field encoding.

use super::{CodecError, Result};

/// Width of the path length prefix.
const PATH_LEN_WIDTH: usize = 4;

/// Width of everything after the path: ino, mode, size, four timestamps.
const FIXED_WIDTH: usize = 8 + 4 + 8 + 4 * 8;

/// One filesystem metadata record as collected on an endpoint.
///
/// Timestamps are nanoseconds since the Unix epoch. Zero means the value was
/// not recorded, as does a `mode` of zero.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Entry {
    /// Raw path bytes. Usually UTF-8, but not guaranteed.
    pub path: Vec<u8>,
    /// Inode number, or an NTFS file reference on Windows endpoints.
    pub ino: u64,
    pub mode: u32,
    pub size: u64,
    pub atime_ns: i64,
    pub mtime_ns: i64,
    pub ctime_ns: i64,
    /// Creation ("birth") time.
    pub btime_ns: i64,
}

impl Entry {
    /// Number of bytes [`encode_entry`] appends for this entry.
    pub fn encoded_len(&self) -> usize {
        PATH_LEN_WIDTH + self.path.len() + FIXED_WIDTH
    }

    /// Encodes this entry into a fresh buffer.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.encoded_len());
        encode_entry(self, &mut out)?;
        Ok(out)
    }
}

/// Appends the encoding of `entry` to `out`.
///
/// The only entries that cannot be encoded are those whose path does not fit
/// the 32-bit length prefix.
pub fn encode_entry(entry: &Entry, out: &mut Vec<u8>) -> Result<()> {
    let path_len = u32::try_from(entry.path.len()).map_err(|_| {
        CodecError::MalformedRecord(format!(
            "path of {} bytes does not fit a 32-bit length",
            entry.path.len()
        ))
    })?;

    out.reserve(entry.encoded_len());
    out.extend_from_slice(&path_len.to_be_bytes());
    out.extend_from_slice(&entry.path);
    out.extend_from_slice(&entry.ino.to_be_bytes());
    out.extend_from_slice(&entry.mode.to_be_bytes());
    out.extend_from_slice(&entry.size.to_be_bytes());
    out.extend_from_slice(&entry.atime_ns.to_be_bytes());
    out.extend_from_slice(&entry.mtime_ns.to_be_bytes());
    out.extend_from_slice(&entry.ctime_ns.to_be_bytes());
    out.extend_from_slice(&entry.btime_ns.to_be_bytes());
    Ok(())
}

/// Decodes one entry from the front of `buf`.
///
/// Returns the entry and the number of bytes it occupied, so callers can walk
/// a payload of back-to-back entries.
pub fn decode_entry(buf: &[u8]) -> Result<(Entry, usize)> {
    let mut fields = Fields { buf, pos: 0 };

    let path_len = u32::from_be_bytes(fields.array()?) as usize;
    let path = fields.take(path_len)?.to_vec();
    let entry = Entry {
        path,
        ino: u64::from_be_bytes(fields.array()?),
        mode: u32::from_be_bytes(fields.array()?),
        size: u64::from_be_bytes(fields.array()?),
        atime_ns: i64::from_be_bytes(fields.array()?),
        mtime_ns: i64::from_be_bytes(fields.array()?),
        ctime_ns: i64::from_be_bytes(fields.array()?),
        btime_ns: i64::from_be_bytes(fields.array()?),
    };

    Ok((entry, fields.pos))
}

/// Cursor over an encoded entry that reports truncation instead of panicking.
struct Fields<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Fields<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let remaining = self.buf.len() - self.pos;
        if remaining < len {
            return Err(CodecError::MalformedRecord(format!(
                "truncated entry: need {len} bytes at offset {}, {remaining} left",
                self.pos
            )));
        }
        let bytes = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_entry() -> Entry {
        Entry {
            path: b"/etc/passwd".to_vec(),
            ino: 4_815_162_342,
            mode: 0o100_644,
            size: 42,
            atime_ns: 123_000_000_001,
            mtime_ns: -456_000_000_000,
            ctime_ns: 789_000_000_000,
            btime_ns: 0,
        }
    }

    #[test]
    fn decode_inverts_encode() {
        let entry = sample_entry();
        let bytes = entry.encode().unwrap();

        assert_eq!(bytes.len(), entry.encoded_len());
        let (decoded, used) = decode_entry(&bytes).unwrap();
        assert_eq!(decoded, entry);
        assert_eq!(used, bytes.len());
    }

    #[test]
    fn decode_reports_consumed_length_with_trailing_data() {
        let first = sample_entry();
        let second = Entry {
            path: b"/tmp".to_vec(),
            ..Entry::default()
        };
        let mut bytes = first.encode().unwrap();
        encode_entry(&second, &mut bytes).unwrap();

        let (decoded, used) = decode_entry(&bytes).unwrap();
        assert_eq!(decoded, first);

        let (decoded, rest) = decode_entry(&bytes[used..]).unwrap();
        assert_eq!(decoded, second);
        assert_eq!(used + rest, bytes.len());
    }

    #[test]
    fn non_utf8_path_survives() {
        let entry = Entry {
            path: vec![0xff, 0xfe, b'/', 0x00, b'x'],
            ..Entry::default()
        };
        let (decoded, _) = decode_entry(&entry.encode().unwrap()).unwrap();
        assert_eq!(decoded.path, entry.path);
    }

    #[test]
    fn every_truncation_is_malformed() {
        let bytes = sample_entry().encode().unwrap();

        for len in 0..bytes.len() {
            let err = decode_entry(&bytes[..len]).unwrap_err();
            assert!(
                matches!(err, CodecError::MalformedRecord(_)),
                "prefix of {len} bytes: {err}"
            );
        }
    }

    #[test]
    fn path_length_past_buffer_is_malformed() {
        let mut bytes = sample_entry().encode().unwrap();
        bytes[..4].copy_from_slice(&u32::MAX.to_be_bytes());

        let err = decode_entry(&bytes).unwrap_err();
        assert!(matches!(err, CodecError::MalformedRecord(_)));
    }

    #[test]
    fn path_and_inode_boundaries_do_not_collide() {
        // Same concatenated bytes, different split between path and inode.
        let a = Entry {
            path: b"ab".to_vec(),
            ino: 1,
            ..Entry::default()
        };
        let b = Entry {
            path: b"a".to_vec(),
            ino: 1,
            ..Entry::default()
        };
        assert_ne!(a.encode().unwrap(), b.encode().unwrap());
    }
}
