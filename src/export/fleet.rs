//! Packaging a fleet job's exports into one zip archive.
//!
//! The archive is written in streaming mode: local headers carry data
//! descriptors, so nothing already handed to the caller is ever revisited.

use std::{
    cell::RefCell,
    io::{self, Write},
    rc::Rc,
};

use tracing::{info, warn};
use zip::{
    CompressionMethod, ZipWriter,
    write::{SimpleFileOptions, StreamWriter},
};

use crate::{
    blob::BlobStore,
    job::{FleetEndpoint, FleetJob},
};

use super::{
    BodyOptions, ExportError, ExportFormat, ExportStream, Result, aggregate::ensure_timeline,
    export, require_format,
};

/// Archive entry name for one endpoint, e.g. `C.1000000000000000_foo.body`.
pub fn archive_entry_name(endpoint: &FleetEndpoint, format: ExportFormat) -> String {
    format!(
        "{}_{}.{}",
        endpoint.endpoint_id,
        endpoint.host_name.as_deref().unwrap_or("unknown"),
        format.extension()
    )
}

/// Exports every endpoint of a fleet job into a zip archive.
///
/// The format, the fleet's task type and the task type of every endpoint
/// job are all checked before any blob is read. Each declared endpoint gets
/// exactly one entry, in declaration order; an endpoint that never reported
/// a job gets an empty one.
pub fn export_fleet<'a, S>(
    store: &'a S,
    fleet: &'a FleetJob,
    format: Option<ExportFormat>,
    options: &BodyOptions,
) -> Result<FleetExport<'a, S>>
where
    S: BlobStore + ?Sized,
{
    let format = require_format(format)?;
    if !fleet.task.is_timeline() {
        return Err(ExportError::WrongJobType {
            job: fleet.fleet_id.clone(),
            task: fleet.task.clone(),
        });
    }
    for job in fleet.endpoints.iter().filter_map(|e| e.job.as_ref()) {
        ensure_timeline(job)?;
    }

    info!(
        fleet = %fleet.fleet_id,
        %format,
        endpoints = fleet.endpoints.len(),
        "exporting fleet archive"
    );
    let sink = ArchiveSink::default();
    Ok(FleetExport {
        store,
        fleet,
        format,
        options: *options,
        archive: Some(ZipWriter::new_stream(sink.clone())),
        sink,
        next_endpoint: 0,
        current: None,
    })
}

/// Options for every archive entry.
///
/// Entry sizes are unknown when the local header goes out, so every entry
/// carries zip64 sizes; a single endpoint export can exceed 4 GiB.
fn entry_options() -> SimpleFileOptions {
    SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .large_file(true)
}

/// Lazy byte stream of a fleet archive.
///
/// Each pull feeds at most one export batch into the archive and yields what
/// the archive writer emitted, so at most one endpoint export is open at a
/// time. Yields nothing after an error.
pub struct FleetExport<'a, S: ?Sized> {
    store: &'a S,
    fleet: &'a FleetJob,
    format: ExportFormat,
    options: BodyOptions,
    /// `None` once the archive is finished or has failed.
    archive: Option<ZipWriter<StreamWriter<ArchiveSink>>>,
    sink: ArchiveSink,
    next_endpoint: usize,
    /// Export of the endpoint whose entry is currently open.
    current: Option<ExportStream<'a, S>>,
}

impl<S: BlobStore + ?Sized> FleetExport<'_, S> {
    /// Does one unit of archive work: feeds one export batch, opens the next
    /// entry, or finishes the archive.
    fn advance(&mut self) -> Result<()> {
        let fleet = self.fleet;
        let Some(archive) = self.archive.as_mut() else {
            return Ok(());
        };

        if let Some(stream) = &mut self.current {
            if let Some(batch) = stream.next() {
                archive.write_all(&batch?)?;
                return Ok(());
            }
            self.current = None;
        }

        let Some(endpoint) = fleet.endpoints.get(self.next_endpoint) else {
            if let Some(archive) = self.archive.take() {
                archive.finish()?;
            }
            info!(fleet = %fleet.fleet_id, "fleet archive complete");
            return Ok(());
        };
        self.next_endpoint += 1;

        let name = archive_entry_name(endpoint, self.format);
        archive.start_file(name.as_str(), entry_options())?;

        match &endpoint.job {
            Some(job) => {
                info!(entry = %name, job = %job.job_id, "adding archive entry");
                self.current = Some(export(self.store, job, Some(self.format), &self.options)?);
            }
            None => warn!(
                entry = %name,
                endpoint = %endpoint.endpoint_id,
                "endpoint has no collection job, adding empty entry"
            ),
        }
        Ok(())
    }

    /// Drains the archive into `sink`, returning the number of bytes written.
    pub fn write_to(self, mut sink: impl Write) -> Result<u64> {
        let mut written = 0;
        for bytes in self {
            let bytes = bytes?;
            sink.write_all(&bytes)?;
            written += bytes.len() as u64;
        }
        sink.flush()?;
        Ok(written)
    }
}

impl<S: BlobStore + ?Sized> Iterator for FleetExport<'_, S> {
    type Item = Result<Vec<u8>>;

    /// A batch may be empty while the compressor is still buffering.
    fn next(&mut self) -> Option<Self::Item> {
        if self.archive.is_none() && self.sink.is_empty() {
            return None;
        }
        if let Err(e) = self.advance() {
            self.archive = None;
            self.current = None;
            self.sink.take();
            return Some(Err(e));
        }
        Some(Ok(self.sink.take()))
    }
}

/// Shared buffer the archive writer emits into and the iterator drains.
#[derive(Clone, Default)]
struct ArchiveSink(Rc<RefCell<Vec<u8>>>);

impl ArchiveSink {
    fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    fn take(&self) -> Vec<u8> {
        std::mem::take(&mut *self.0.borrow_mut())
    }
}

impl Write for ArchiveSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::{Cursor, Read};

    use jiff::Timestamp;

    use crate::{
        blob::MemoryBlobStore,
        export::tests::{entry, timeline_job, write_timeline},
        job::{CollectionJob, TaskType},
        timeline::{CodecError, DEFAULT_CHUNK_SIZE, deserialize_stream, read_all_chunks},
    };

    fn endpoint(endpoint_id: &str, host_name: Option<&str>, job: Option<CollectionJob>) -> FleetEndpoint {
        FleetEndpoint {
            endpoint_id: endpoint_id.into(),
            host_name: host_name.map(String::from),
            job,
        }
    }

    fn fleet(endpoints: Vec<FleetEndpoint>) -> FleetJob {
        FleetJob {
            fleet_id: "ABCDEABCDE".into(),
            task: TaskType::Timeline,
            created_at: Timestamp::now(),
            endpoints,
        }
    }

    /// Two endpoints, each with its own single-path timeline.
    fn two_endpoint_fleet(store: &MemoryBlobStore) -> FleetJob {
        let job_1 = timeline_job(
            "C.1111111111111111",
            vec![write_timeline(store, vec![entry("/bar/baz/quux")], DEFAULT_CHUNK_SIZE)],
        );
        let job_2 = timeline_job(
            "C.2222222222222222",
            vec![write_timeline(store, vec![entry("/norf/thud")], DEFAULT_CHUNK_SIZE)],
        );
        fleet(vec![
            endpoint("C.1111111111111111", Some("foo.bar.baz"), Some(job_1)),
            endpoint("C.2222222222222222", Some("bar.quux.com"), Some(job_2)),
        ])
    }

    fn archive_bytes(
        store: &MemoryBlobStore,
        fleet: &FleetJob,
        format: ExportFormat,
        options: BodyOptions,
    ) -> Vec<u8> {
        let mut out = Vec::new();
        export_fleet(store, fleet, Some(format), &options)
            .unwrap()
            .write_to(&mut out)
            .unwrap();
        out
    }

    /// Entry names and contents, in archive order.
    fn read_archive(bytes: Vec<u8>) -> Vec<(String, Vec<u8>)> {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        (0..archive.len())
            .map(|idx| {
                let mut file = archive.by_index(idx).unwrap();
                let mut content = Vec::new();
                file.read_to_end(&mut content).unwrap();
                (file.name().to_string(), content)
            })
            .collect()
    }

    #[test]
    fn body_entry_per_endpoint() {
        let store = MemoryBlobStore::new();
        let fleet = two_endpoint_fleet(&store);

        let entries = read_archive(archive_bytes(
            &store,
            &fleet,
            ExportFormat::Body,
            BodyOptions::default(),
        ));

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].0, "C.1111111111111111_foo.bar.baz.body");
        assert_eq!(entries[1].0, "C.2222222222222222_bar.quux.com.body");

        let first = String::from_utf8(entries[0].1.clone()).unwrap();
        assert!(first.contains("/bar/baz/quux"));
        assert!(!first.contains("/norf/thud"));
        let second = String::from_utf8(entries[1].1.clone()).unwrap();
        assert!(second.contains("/norf/thud"));
        assert!(!second.contains("/bar/baz/quux"));
    }

    #[test]
    fn raw_entries_decode_independently() {
        let store = MemoryBlobStore::new();
        let fleet = two_endpoint_fleet(&store);

        let entries = read_archive(archive_bytes(
            &store,
            &fleet,
            ExportFormat::RawChunked,
            BodyOptions::default(),
        ));

        assert_eq!(entries[0].0, "C.1111111111111111_foo.bar.baz.gzchunked");
        assert_eq!(entries[1].0, "C.2222222222222222_bar.quux.com.gzchunked");

        let decode = |bytes: &[u8]| {
            deserialize_stream(read_all_chunks(bytes))
                .collect::<core::result::Result<Vec<_>, CodecError>>()
                .unwrap()
        };
        assert_eq!(decode(&entries[0].1), vec![entry("/bar/baz/quux")]);
        assert_eq!(decode(&entries[1].1), vec![entry("/norf/thud")]);
    }

    #[test]
    fn subsecond_option_reaches_every_entry() {
        let store = MemoryBlobStore::new();
        let timeline = |endpoint_id: &str| {
            let entry = crate::timeline::Entry {
                path: b"/foo/bar/baz".to_vec(),
                btime_ns: 1_337_420_000_000,
                ..crate::timeline::Entry::default()
            };
            timeline_job(
                endpoint_id,
                vec![write_timeline(&store, vec![entry], DEFAULT_CHUNK_SIZE)],
            )
        };
        let fleet = fleet(vec![
            endpoint("C.1", Some("a"), Some(timeline("C.1"))),
            endpoint("C.2", Some("b"), Some(timeline("C.2"))),
        ]);
        let options = BodyOptions {
            timestamp_subsecond_precision: true,
            ..BodyOptions::default()
        };

        for (_, content) in read_archive(archive_bytes(&store, &fleet, ExportFormat::Body, options)) {
            let line = String::from_utf8(content).unwrap();
            let fields: Vec<&str> = line.trim_end().split('|').collect();
            assert_eq!(fields[10], "1337.42");
        }
    }

    #[test]
    fn endpoint_without_job_gets_empty_entry() {
        let store = MemoryBlobStore::new();
        let job = timeline_job(
            "C.1",
            vec![write_timeline(&store, vec![entry("/foo")], DEFAULT_CHUNK_SIZE)],
        );
        let fleet = fleet(vec![
            endpoint("C.1", Some("host-a"), Some(job)),
            endpoint("C.2", None, None),
        ]);

        let entries = read_archive(archive_bytes(
            &store,
            &fleet,
            ExportFormat::Body,
            BodyOptions::default(),
        ));

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].0, "C.2_unknown.body");
        assert!(entries[1].1.is_empty());
    }

    #[test]
    fn endpoint_with_empty_timeline_gets_empty_entry() {
        let store = MemoryBlobStore::new();
        for format in [ExportFormat::Body, ExportFormat::RawChunked] {
            let no_entries = timeline_job(
                "C.1",
                vec![write_timeline(&store, vec![], DEFAULT_CHUNK_SIZE)],
            );
            let no_results = timeline_job("C.2", vec![]);
            let fleet = fleet(vec![
                endpoint("C.1", Some("host-a"), Some(no_entries)),
                endpoint("C.2", Some("host-b"), Some(no_results)),
            ]);

            let entries = read_archive(archive_bytes(&store, &fleet, format, BodyOptions::default()));

            let ext = format.extension();
            assert_eq!(entries.len(), 2, "{format}");
            assert_eq!(entries[0].0, format!("C.1_host-a.{ext}"));
            assert_eq!(entries[1].0, format!("C.2_host-b.{ext}"));
            assert!(entries.iter().all(|(_, content)| content.is_empty()), "{format}");
        }
    }

    #[test]
    fn every_entry_carries_zip64_sizes() {
        let store = MemoryBlobStore::new();
        let mut fleet = two_endpoint_fleet(&store);
        fleet.endpoints.push(endpoint("C.3", None, None));
        let bytes = archive_bytes(&store, &fleet, ExportFormat::Body, BodyOptions::default());

        let mut archive = zip::ZipArchive::new(Cursor::new(bytes.clone())).unwrap();
        assert_eq!(archive.len(), 3);
        for idx in 0..archive.len() {
            let start = usize::try_from(archive.by_index(idx).unwrap().header_start()).unwrap();
            let header = &bytes[start..start + 6];
            assert_eq!(&header[..4], b"PK\x03\x04");
            // Version needed to extract: 4.5 is the zip64 level.
            assert!(u16::from_le_bytes([header[4], header[5]]) >= 45);
        }
    }

    #[test]
    fn empty_fleet_is_a_valid_archive() {
        let store = MemoryBlobStore::new();
        let fleet = fleet(vec![]);

        let entries = read_archive(archive_bytes(
            &store,
            &fleet,
            ExportFormat::Body,
            BodyOptions::default(),
        ));
        assert!(entries.is_empty());
    }

    #[test]
    fn validation_happens_before_any_read() {
        let store = MemoryBlobStore::new();
        let mut fleet = two_endpoint_fleet(&store);

        let err = export_fleet(&store, &fleet, None, &BodyOptions::default())
            .err()
            .unwrap();
        assert!(matches!(err, ExportError::UnspecifiedFormat(_)));

        fleet.endpoints[1].job.as_mut().unwrap().task = TaskType::Other("interrogate".into());
        let err = export_fleet(&store, &fleet, Some(ExportFormat::Body), &BodyOptions::default())
            .err()
            .unwrap();
        assert!(matches!(err, ExportError::WrongJobType { .. }));

        fleet.task = TaskType::Other("interrogate".into());
        let err = export_fleet(&store, &fleet, Some(ExportFormat::Body), &BodyOptions::default())
            .err()
            .unwrap();
        assert!(matches!(err, ExportError::WrongJobType { .. }));

        assert_eq!(store.reads(), 0);
    }

    #[test]
    fn archive_streams_one_endpoint_at_a_time() {
        let store = MemoryBlobStore::new();
        let fleet = two_endpoint_fleet(&store);

        let mut archive =
            export_fleet(&store, &fleet, Some(ExportFormat::Body), &BodyOptions::default())
                .unwrap();
        assert_eq!(store.reads(), 0);

        // The first pull only opens the first entry.
        archive.next().unwrap().unwrap();
        assert_eq!(store.reads(), 0);

        archive.next().unwrap().unwrap();
        assert_eq!(store.reads(), 1);

        drop(archive);
        assert_eq!(store.reads(), 1);
    }

    #[test]
    fn missing_blob_ends_the_archive() {
        let store = MemoryBlobStore::new();
        let fleet = two_endpoint_fleet(&store);
        let id = fleet.endpoints[1].job.as_ref().unwrap().results[0].blob_ids[0];
        store.remove(&id);

        let mut archive =
            export_fleet(&store, &fleet, Some(ExportFormat::Body), &BodyOptions::default())
                .unwrap();
        let err = archive
            .by_ref()
            .find_map(|item| item.err())
            .unwrap();

        assert!(matches!(err, ExportError::Blob(_)));
        assert!(archive.next().is_none());
    }
}
