//! Body file rendering.
//!
//! Each entry becomes one line of eleven `|`-separated fields:
//!
//! ```text
//! checksum|path|inode|mode|uid|gid|size|atime|mtime|ctime|btime
//! ```
//!
//! Checksum, uid and gid are not collected and stay empty.

use serde::Deserialize;

use crate::timeline::Entry;

use super::{ExportError, Result};

/// Most bytes of rendered lines handed out per pull.
pub const BODY_BATCH_LEN: usize = 64 << 10;

const NS_PER_SEC: i64 = 1_000_000_000;
const NS_PER_HUNDREDTH: i64 = 10_000_000;

/// Rendering switches for body output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct BodyOptions {
    /// Render timestamps as `secs.hundredths` instead of whole seconds.
    pub timestamp_subsecond_precision: bool,
    /// Render inodes as NTFS file references: `record-sequence`.
    pub inode_ntfs_file_reference_format: bool,
    /// Double every backslash in paths.
    pub backslash_escape: bool,
}

/// Appends the body line for `entry` to `out`.
pub fn render_entry(entry: &Entry, options: &BodyOptions, out: &mut Vec<u8>) {
    let mut path = String::from_utf8_lossy(&entry.path).into_owned();
    if options.backslash_escape {
        path = path.replace('\\', "\\\\");
    }
    let inode = if options.inode_ntfs_file_reference_format {
        ntfs_file_reference(entry.ino)
    } else {
        entry.ino.to_string()
    };
    let time = |ns| timestamp(ns, options.timestamp_subsecond_precision);

    let fields = [
        String::new(),
        path,
        inode,
        file_mode(entry.mode),
        String::new(),
        String::new(),
        entry.size.to_string(),
        time(entry.atime_ns),
        time(entry.mtime_ns),
        time(entry.ctime_ns),
        time(entry.btime_ns),
    ];
    for (idx, field) in fields.iter().enumerate() {
        if idx > 0 {
            out.push(b'|');
        }
        write_field(out, field);
    }
    out.push(b'\n');
}

/// Renders entries into batches of body lines.
pub fn body_lines<I>(entries: I, options: BodyOptions) -> BodyLines<I::IntoIter>
where
    I: IntoIterator<Item = Result<Entry>>,
{
    BodyLines {
        entries: entries.into_iter(),
        options,
        pending: None,
        done: false,
    }
}

/// Iterator returned by [`body_lines`].
///
/// Lines rendered before an error are handed out first; the error follows on
/// the next pull and ends the stream.
pub struct BodyLines<I> {
    entries: I,
    options: BodyOptions,
    pending: Option<ExportError>,
    done: bool,
}

impl<I: Iterator<Item = Result<Entry>>> Iterator for BodyLines<I> {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(e) = self.pending.take() {
            return Some(Err(e));
        }
        if self.done {
            return None;
        }

        let mut batch = Vec::new();
        while batch.len() < BODY_BATCH_LEN {
            match self.entries.next() {
                Some(Ok(entry)) => render_entry(&entry, &self.options, &mut batch),
                Some(Err(e)) => {
                    self.done = true;
                    if batch.is_empty() {
                        return Some(Err(e));
                    }
                    self.pending = Some(e);
                    break;
                }
                None => {
                    self.done = true;
                    break;
                }
            }
        }

        if batch.is_empty() {
            None
        } else {
            Some(Ok(batch))
        }
    }
}

/// Quotes a field that would otherwise break the line structure.
fn write_field(out: &mut Vec<u8>, field: &str) {
    if field.contains(['|', '"', '\r', '\n']) {
        out.push(b'"');
        out.extend_from_slice(field.replace('"', "\"\"").as_bytes());
        out.push(b'"');
    } else {
        out.extend_from_slice(field.as_bytes());
    }
}

fn ntfs_file_reference(ino: u64) -> String {
    let record = ino & 0xFFFF_FFFF_FFFF;
    let sequence = ino >> 48;
    format!("{record}-{sequence}")
}

fn timestamp(ns: i64, subsecond: bool) -> String {
    if ns == 0 {
        return String::new();
    }
    let secs = ns.div_euclid(NS_PER_SEC);
    if subsecond {
        let hundredths = ns.rem_euclid(NS_PER_SEC) / NS_PER_HUNDREDTH;
        format!("{secs}.{hundredths:02}")
    } else {
        secs.to_string()
    }
}

/// `ls -l` style permission string, e.g. `-rw-r--r--`. Empty for mode 0.
fn file_mode(mode: u32) -> String {
    if mode == 0 {
        return String::new();
    }

    let kind = match mode & 0o170_000 {
        0o140_000 => 's',
        0o120_000 => 'l',
        0o060_000 => 'b',
        0o040_000 => 'd',
        0o020_000 => 'c',
        0o010_000 => 'p',
        _ => '-',
    };

    let mut out = String::with_capacity(10);
    out.push(kind);
    for (shift, special, lower, upper) in [
        (6, 0o4000, 's', 'S'),
        (3, 0o2000, 's', 'S'),
        (0, 0o1000, 't', 'T'),
    ] {
        let bits = (mode >> shift) & 0o7;
        out.push(if bits & 0o4 != 0 { 'r' } else { '-' });
        out.push(if bits & 0o2 != 0 { 'w' } else { '-' });
        let exec = bits & 0o1 != 0;
        out.push(match (mode & special != 0, exec) {
            (true, true) => lower,
            (true, false) => upper,
            (false, true) => 'x',
            (false, false) => '-',
        });
    }
    out
}
