//! Exporting collected timelines.
//!
//! A collection job's stored chunks can leave the system in one of two
//! shapes:
//!
//! ```text
//! raw-chunked  the stored frames, concatenated verbatim
//! body         one `|`-separated line per entry, for timeline tools
//! ```
//!
//! Fleet jobs are exported as a zip archive with one entry per endpoint.
//!
//! Every export is a pull-based stream of byte batches. Requests are
//! validated before the first blob is read, and each pull reads at most one
//! blob.

mod aggregate;
mod body;
mod fleet;

use std::{fmt, io, str::FromStr};

use tracing::info;

use crate::{
    blob::{BlobError, BlobStore},
    job::{CollectionJob, TaskType},
    timeline::CodecError,
};

pub use aggregate::{Entries, Payloads, RawFrames, raw_frames, resolve_job};
pub use body::{BODY_BATCH_LEN, BodyLines, BodyOptions, body_lines, render_entry};
pub use fleet::{FleetExport, archive_entry_name, export_fleet};

/// Errors that can occur while exporting.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("unspecified or unknown export format: {0:?}")]
    UnspecifiedFormat(String),

    #[error("job {job} ran task \"{task}\", not a timeline collection")]
    WrongJobType { job: String, task: TaskType },

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Blob(#[from] BlobError),

    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = core::result::Result<T, ExportError>;

/// Output format of an export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    /// Stored frames, byte for byte.
    RawChunked,
    /// Body file lines.
    Body,
}

impl ExportFormat {
    /// File extension used for exported files and archive entries.
    pub fn extension(self) -> &'static str {
        match self {
            Self::RawChunked => "gzchunked",
            Self::Body => "body",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "raw-chunked" | "gzchunked" => Ok(Self::RawChunked),
            "body" => Ok(Self::Body),
            _ => Err(ExportError::UnspecifiedFormat(s.to_string())),
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RawChunked => f.write_str("raw-chunked"),
            Self::Body => f.write_str("body"),
        }
    }
}

pub(crate) fn require_format(format: Option<ExportFormat>) -> Result<ExportFormat> {
    format.ok_or_else(|| ExportError::UnspecifiedFormat(String::new()))
}

/// Exports one collection job.
///
/// Fails with [`ExportError::UnspecifiedFormat`] or
/// [`ExportError::WrongJobType`] before any blob is read. Blob and decode
/// errors surface from the returned stream as it is consumed.
pub fn export<'a, S>(
    store: &'a S,
    job: &'a CollectionJob,
    format: Option<ExportFormat>,
    options: &BodyOptions,
) -> Result<ExportStream<'a, S>>
where
    S: BlobStore + ?Sized,
{
    let format = require_format(format)?;
    let inner = match format {
        ExportFormat::RawChunked => {
            aggregate::ensure_timeline(job)?;
            Rendered::Raw(raw_frames(store, job))
        }
        ExportFormat::Body => Rendered::Body(body_lines(resolve_job(store, job)?, *options)),
    };
    info!(job = %job.job_id, %format, blobs = job.blob_count(), "exporting timeline");
    Ok(ExportStream { format, inner })
}

/// Lazy byte stream of one job's export.
pub struct ExportStream<'a, S: ?Sized> {
    format: ExportFormat,
    inner: Rendered<'a, S>,
}

enum Rendered<'a, S: ?Sized> {
    Raw(RawFrames<'a, S>),
    Body(BodyLines<Entries<'a, S>>),
}

impl<S: BlobStore + ?Sized> Iterator for ExportStream<'_, S> {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        match &mut self.inner {
            Rendered::Raw(frames) => frames.next(),
            Rendered::Body(lines) => lines.next(),
        }
    }
}

impl<S: BlobStore + ?Sized> ExportStream<'_, S> {
    pub fn format(&self) -> ExportFormat {
        self.format
    }

    /// Drains the stream into `sink`, returning the number of bytes written.
    pub fn write_to(self, mut sink: impl io::Write) -> Result<u64> {
        let mut written = 0;
        for batch in self {
            let batch = batch?;
            sink.write_all(&batch)?;
            written += batch.len() as u64;
        }
        sink.flush()?;
        Ok(written)
    }
}
