//! CLI interface for tlx.
//!
//! Each subcommand is non-interactive: arguments in, data or a short report
//! out. Exported bytes go to files (or stdout); reports go to stderr.
//!
//! Job and fleet arguments take a full id or an unambiguous prefix.

mod format;
mod import;

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use jiff::Timestamp;

use tlx::{
    blob::BlobStore,
    config::Config,
    export::{self, BodyOptions, ExportError, ExportFormat},
    job::{self, CollectionJob, FleetJob, JobStore, TaskType},
};

use format::{format_fleet, format_job};

/// tlx: store and export filesystem timelines.
#[derive(Debug, Parser)]
#[command(name = "tlx", after_long_help = WORKFLOW_HELP)]
pub struct Cli {
    /// Log more: `-v` info, `-vv` debug, `-vvv` trace. Overrides `TLX_LOG`.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

const WORKFLOW_HELP: &str = r"Workflow: exporting a fleet
  1. tlx new-fleet --endpoint C.1000000000000000 --endpoint C.2000000000000000
     → prints a fleet ID (e.g. A0B1D2C3E4)
  2. tlx import C1.gzchunked --endpoint C.1000000000000000 --host foo.example.com --fleet A0B
  3. tlx export-fleet A0B --format body --subsecond --out fleet.zip

Single jobs:
  tlx import entries.jsonl --from jsonl --endpoint C.3000000000000000
  tlx export 1F2 --format gzchunked --out timeline.gzchunked";

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Store a collected timeline as a new job. Prints the job ID.
    Import {
        /// Timeline file to read.
        file: PathBuf,

        /// Endpoint the timeline was collected from.
        #[arg(long)]
        endpoint: String,

        /// Host name of the endpoint, used to name fleet archive entries.
        #[arg(long)]
        host: Option<String>,

        /// Fleet job this collection belongs to (ID or unambiguous prefix).
        #[arg(long)]
        fleet: Option<String>,

        /// Input format.
        #[arg(long, value_enum, default_value_t = ImportFormat::Gzchunked)]
        from: ImportFormat,
    },

    /// Create a fleet job over the given endpoints. Prints the fleet ID.
    NewFleet {
        /// Endpoints to enumerate, in order. Can be specified multiple times.
        #[arg(long)]
        endpoint: Vec<String>,
    },

    /// List collection jobs.
    Jobs,

    /// List fleet jobs.
    Fleets,

    /// Export one job's timeline.
    ///
    /// Writes `<job id>.body` or `<job id>.gzchunked` unless `--out` is
    /// given. `--out -` writes to stdout.
    Export {
        /// Job ID or unambiguous prefix.
        job: String,

        #[command(flatten)]
        render: RenderArgs,

        /// Output path, or `-` for stdout.
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Export every endpoint of a fleet job as one zip archive.
    ExportFleet {
        /// Fleet ID or unambiguous prefix.
        fleet: String,

        #[command(flatten)]
        render: RenderArgs,

        /// Archive path. Defaults to `<fleet id>.zip`.
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

/// Input formats accepted by `import`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ImportFormat {
    /// Length-framed compressed chunks, as endpoints send them.
    Gzchunked,
    /// One JSON entry per line.
    Jsonl,
}

/// Output shape shared by `export` and `export-fleet`.
#[derive(Debug, Args)]
pub struct RenderArgs {
    /// Export format: `body` or `gzchunked` (alias `raw-chunked`).
    #[arg(long)]
    format: Option<String>,

    /// Body: render timestamps with hundredths of a second.
    #[arg(long)]
    subsecond: bool,

    /// Body: render inodes as NTFS file references.
    #[arg(long)]
    ntfs_inode: bool,

    /// Body: double every backslash in paths.
    #[arg(long)]
    backslash_escape: bool,
}

impl RenderArgs {
    fn format(&self) -> Result<Option<ExportFormat>, String> {
        self.format
            .as_deref()
            .map(str::parse::<ExportFormat>)
            .transpose()
            .map_err(|e: ExportError| e.to_string())
    }

    /// Flags switch options on over the configured defaults.
    fn options(&self, defaults: BodyOptions) -> BodyOptions {
        BodyOptions {
            timestamp_subsecond_precision: defaults.timestamp_subsecond_precision
                || self.subsecond,
            inode_ntfs_file_reference_format: defaults.inode_ntfs_file_reference_format
                || self.ntfs_inode,
            backslash_escape: defaults.backslash_escape || self.backslash_escape,
        }
    }
}

/// Run the CLI, returning an error message on failure.
pub fn run(cli: Cli, config: &Config, blobs: &dyn BlobStore, jobs: &JobStore) -> Result<(), String> {
    match cli.command {
        Command::Import {
            file,
            endpoint,
            host,
            fleet,
            from,
        } => cmd_import(
            config,
            blobs,
            jobs,
            &file,
            &endpoint,
            host.as_deref(),
            fleet.as_deref(),
            from,
        ),
        Command::NewFleet { endpoint } => cmd_new_fleet(jobs, &endpoint),
        Command::Jobs => cmd_jobs(jobs),
        Command::Fleets => cmd_fleets(jobs),
        Command::Export { job, render, out } => {
            let job = resolve_job(jobs, &job)?;
            cmd_export(config, blobs, &job, &render, out.as_deref())
        }
        Command::ExportFleet { fleet, render, out } => {
            let fleet = resolve_fleet(jobs, &fleet)?;
            cmd_export_fleet(config, blobs, &fleet, &render, out)
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn cmd_import(
    config: &Config,
    blobs: &dyn BlobStore,
    jobs: &JobStore,
    file: &Path,
    endpoint: &str,
    host: Option<&str>,
    fleet: Option<&str>,
    from: ImportFormat,
) -> Result<(), String> {
    let fleet_id = fleet
        .map(|reference| resolve_fleet(jobs, reference).map(|f| f.fleet_id))
        .transpose()?;

    let result = match from {
        ImportFormat::Gzchunked => import::import_chunked(blobs, file)?,
        ImportFormat::Jsonl => import::import_jsonl(blobs, file, config.chunk_size)?,
    };
    let chunks = result.blob_ids.len();

    let job = CollectionJob {
        job_id: job::new_job_id(),
        endpoint_id: endpoint.to_string(),
        task: TaskType::Timeline,
        fleet_id: fleet_id.clone(),
        created_at: Timestamp::now(),
        results: vec![result],
    };
    jobs.create_job(&job)
        .map_err(|e| format!("failed to create job: {e}"))?;

    if let Some(host) = host {
        jobs.set_host_name(endpoint, host)
            .map_err(|e| format!("failed to record host name: {e}"))?;
    }
    if let Some(fleet_id) = &fleet_id {
        jobs.add_fleet_endpoint(fleet_id, endpoint)
            .map_err(|e| format!("failed to add endpoint to fleet: {e}"))?;
    }

    eprintln!(
        "Imported {} chunk(s) from {} → job {}",
        chunks,
        file.display(),
        job.job_id
    );
    println!("{}", job.job_id);
    Ok(())
}

fn cmd_new_fleet(jobs: &JobStore, endpoints: &[String]) -> Result<(), String> {
    let fleet_id = job::new_fleet_id();
    jobs.create_fleet(&fleet_id, &TaskType::Timeline, Timestamp::now())
        .map_err(|e| format!("failed to create fleet: {e}"))?;
    for endpoint in endpoints {
        jobs.add_fleet_endpoint(&fleet_id, endpoint)
            .map_err(|e| format!("failed to add endpoint {endpoint}: {e}"))?;
    }

    println!("{fleet_id}");
    Ok(())
}

fn cmd_jobs(jobs: &JobStore) -> Result<(), String> {
    let all = jobs
        .list_jobs()
        .map_err(|e| format!("failed to list jobs: {e}"))?;

    if all.is_empty() {
        println!("No jobs");
        return Ok(());
    }
    for job in &all {
        println!("{}", format_job(job));
    }
    Ok(())
}

fn cmd_fleets(jobs: &JobStore) -> Result<(), String> {
    let fleets = jobs
        .list_fleets()
        .map_err(|e| format!("failed to list fleets: {e}"))?;

    if fleets.is_empty() {
        println!("No fleets");
        return Ok(());
    }
    for fleet in &fleets {
        println!("{}", format_fleet(fleet));
    }
    Ok(())
}

fn cmd_export(
    config: &Config,
    blobs: &dyn BlobStore,
    job: &CollectionJob,
    render: &RenderArgs,
    out: Option<&Path>,
) -> Result<(), String> {
    let stream = export::export(blobs, job, render.format()?, &render.options(config.body))
        .map_err(|e| format!("cannot export job {}: {e}", job.job_id))?;

    if out == Some(Path::new("-")) {
        stream
            .write_to(BufWriter::new(io::stdout().lock()))
            .map_err(|e| format!("export of job {} failed: {e}", job.job_id))?;
        return Ok(());
    }

    let path = out.map_or_else(
        || PathBuf::from(format!("{}.{}", job.job_id, stream.format().extension())),
        Path::to_path_buf,
    );
    let written = stream
        .write_to(BufWriter::new(create(&path)?))
        .map_err(|e| format!("export of job {} failed: {e}", job.job_id))?;
    eprintln!("Exported {written} bytes → {}", path.display());
    Ok(())
}

fn cmd_export_fleet(
    config: &Config,
    blobs: &dyn BlobStore,
    fleet: &FleetJob,
    render: &RenderArgs,
    out: Option<PathBuf>,
) -> Result<(), String> {
    let archive = export::export_fleet(blobs, fleet, render.format()?, &render.options(config.body))
        .map_err(|e| format!("cannot export fleet {}: {e}", fleet.fleet_id))?;

    let path = out.unwrap_or_else(|| PathBuf::from(format!("{}.zip", fleet.fleet_id)));
    let mut writer = BufWriter::new(create(&path)?);
    let written = archive
        .write_to(&mut writer)
        .map_err(|e| format!("export of fleet {} failed: {e}", fleet.fleet_id))?;
    writer
        .flush()
        .map_err(|e| format!("failed to write {}: {e}", path.display()))?;

    eprintln!(
        "Exported {} endpoint(s), {written} bytes → {}",
        fleet.endpoints.len(),
        path.display()
    );
    Ok(())
}

fn create(path: &Path) -> Result<File, String> {
    File::create(path).map_err(|e| format!("failed to create {}: {e}", path.display()))
}

/// Resolve a job reference (full ID or unambiguous prefix) to a job.
fn resolve_job(jobs: &JobStore, reference: &str) -> Result<CollectionJob, String> {
    if let Ok(job) = jobs.load_job(reference) {
        return Ok(job);
    }
    let all = jobs
        .list_jobs()
        .map_err(|e| format!("failed to list jobs: {e}"))?;
    pick_unique(all, reference, "job", |j| &j.job_id)
}

/// Resolve a fleet reference (full ID or unambiguous prefix) to a fleet job.
fn resolve_fleet(jobs: &JobStore, reference: &str) -> Result<FleetJob, String> {
    if let Ok(fleet) = jobs.load_fleet(reference) {
        return Ok(fleet);
    }
    let all = jobs
        .list_fleets()
        .map_err(|e| format!("failed to list fleets: {e}"))?;
    pick_unique(all, reference, "fleet", |f| &f.fleet_id)
}

/// Case-insensitive prefix match that must hit exactly one candidate.
fn pick_unique<T>(
    candidates: Vec<T>,
    reference: &str,
    kind: &str,
    id_of: impl Fn(&T) -> &String,
) -> Result<T, String> {
    let prefix = reference.to_ascii_uppercase();
    let mut matches: Vec<T> = candidates
        .into_iter()
        .filter(|c| id_of(c).to_ascii_uppercase().starts_with(&prefix))
        .collect();

    match matches.len() {
        0 => Err(format!("no {kind} matching '{reference}'")),
        1 => Ok(matches.remove(0)),
        n => {
            let ids: Vec<&str> = matches.iter().map(|c| id_of(c).as_str()).collect();
            Err(format!(
                "'{reference}' is ambiguous: matches {n} {kind}s: {}",
                ids.join(", ")
            ))
        }
    }
}
