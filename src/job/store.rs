//! Job metadata persistence.
//!
//! All job and fleet metadata lives in one `SQLite` file under the storage
//! root:
//!
//! ```text
//! <root>/jobs.sqlite
//!   jobs             one row per collection job
//!   results          ordered results per job, blob ids packed 32 bytes each
//!   endpoints        last known host name per endpoint
//!   fleets           one row per fleet job
//!   fleet_endpoints  ordered endpoint membership per fleet
//! ```
//!
//! Creation times are stored as whole seconds plus signed nanoseconds and
//! ordered numerically. A connection is opened per operation.

use std::{fs, io, path::PathBuf};

use jiff::Timestamp;
use rusqlite::{Connection, OptionalExtension};

use crate::blob::BlobId;

use super::{CollectionJob, CollectionResult, FleetEndpoint, FleetJob, TaskType};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS jobs (
    job_id      TEXT PRIMARY KEY,
    endpoint_id TEXT NOT NULL,
    task        TEXT NOT NULL,
    fleet_id    TEXT,
    created_s   INTEGER NOT NULL,
    created_ns  INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS results (
    job_id   TEXT NOT NULL,
    seq      INTEGER NOT NULL,
    blob_ids BLOB NOT NULL,
    PRIMARY KEY (job_id, seq)
);
CREATE TABLE IF NOT EXISTS endpoints (
    endpoint_id TEXT PRIMARY KEY,
    host_name   TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS fleets (
    fleet_id   TEXT PRIMARY KEY,
    task       TEXT NOT NULL,
    created_s  INTEGER NOT NULL,
    created_ns INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS fleet_endpoints (
    fleet_id    TEXT NOT NULL,
    position    INTEGER NOT NULL,
    endpoint_id TEXT NOT NULL,
    PRIMARY KEY (fleet_id, position),
    UNIQUE (fleet_id, endpoint_id)
);
";

/// Errors that can occur during job metadata operations.
#[derive(Debug, thiserror::Error)]
pub enum JobStoreError {
    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error("fleet job not found: {0}")]
    FleetNotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("corrupt job metadata: {0}")]
    Corrupt(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

pub type Result<T> = core::result::Result<T, JobStoreError>;

/// `SQLite`-backed store for collection and fleet job metadata.
pub struct JobStore {
    path: PathBuf,
}

impl JobStore {
    /// Opens the store under `root`, creating the directory and schema if
    /// they don't exist.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        let store = Self {
            path: root.join("jobs.sqlite"),
        };
        store.open_db()?.execute_batch(SCHEMA)?;
        Ok(store)
    }

    fn open_db(&self) -> Result<Connection> {
        Ok(Connection::open(&self.path)?)
    }

    // ── Collection jobs ──

    /// Records a new job together with any results it already carries.
    pub fn create_job(&self, job: &CollectionJob) -> Result<()> {
        let mut conn = self.open_db()?;
        let tx = conn.transaction()?;
        let rows = tx.execute(
            "INSERT INTO jobs (job_id, endpoint_id, task, fleet_id, created_s, created_ns)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT (job_id) DO NOTHING",
            rusqlite::params![
                &job.job_id,
                &job.endpoint_id,
                job.task.tag(),
                &job.fleet_id,
                job.created_at.as_second(),
                job.created_at.subsec_nanosecond(),
            ],
        )?;
        if rows == 0 {
            return Err(JobStoreError::AlreadyExists(job.job_id.clone()));
        }
        for (seq, result) in job.results.iter().enumerate() {
            tx.execute(
                "INSERT INTO results (job_id, seq, blob_ids) VALUES (?1, ?2, ?3)",
                rusqlite::params![&job.job_id, seq as i64, pack_blob_ids(result)],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Appends a result after the job's existing ones.
    pub fn append_result(&self, job_id: &str, result: &CollectionResult) -> Result<()> {
        let conn = self.open_db()?;
        if !job_exists(&conn, job_id)? {
            return Err(JobStoreError::JobNotFound(job_id.to_string()));
        }
        conn.execute(
            "INSERT INTO results (job_id, seq, blob_ids)
             SELECT ?1, COALESCE(MAX(seq) + 1, 0), ?2 FROM results WHERE job_id = ?1",
            rusqlite::params![job_id, pack_blob_ids(result)],
        )?;
        Ok(())
    }

    /// Loads a job and its results.
    pub fn load_job(&self, job_id: &str) -> Result<CollectionJob> {
        let conn = self.open_db()?;
        load_job_row(&conn, job_id)?.ok_or_else(|| JobStoreError::JobNotFound(job_id.to_string()))
    }

    /// Lists all jobs, oldest first.
    pub fn list_jobs(&self) -> Result<Vec<CollectionJob>> {
        let conn = self.open_db()?;
        let ids = {
            let mut stmt = conn.prepare("SELECT job_id FROM jobs ORDER BY created_s, created_ns, rowid")?;
            stmt.query_map([], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?
        };
        ids.iter()
            .map(|id| {
                load_job_row(&conn, id)?.ok_or_else(|| JobStoreError::JobNotFound(id.clone()))
            })
            .collect()
    }

    // ── Endpoints ──

    /// Records the latest known host name for an endpoint.
    pub fn set_host_name(&self, endpoint_id: &str, host_name: &str) -> Result<()> {
        let conn = self.open_db()?;
        conn.execute(
            "INSERT INTO endpoints (endpoint_id, host_name) VALUES (?1, ?2)
             ON CONFLICT (endpoint_id) DO UPDATE SET host_name = excluded.host_name",
            rusqlite::params![endpoint_id, host_name],
        )?;
        Ok(())
    }

    pub fn host_name(&self, endpoint_id: &str) -> Result<Option<String>> {
        let conn = self.open_db()?;
        load_host_name(&conn, endpoint_id)
    }

    // ── Fleet jobs ──

    /// Records a new, empty fleet job.
    pub fn create_fleet(&self, fleet_id: &str, task: &TaskType, created_at: Timestamp) -> Result<()> {
        let conn = self.open_db()?;
        let rows = conn.execute(
            "INSERT INTO fleets (fleet_id, task, created_s, created_ns) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (fleet_id) DO NOTHING",
            rusqlite::params![
                fleet_id,
                task.tag(),
                created_at.as_second(),
                created_at.subsec_nanosecond(),
            ],
        )?;
        if rows == 0 {
            return Err(JobStoreError::AlreadyExists(fleet_id.to_string()));
        }
        Ok(())
    }

    /// Enumerates an endpoint on a fleet job, after those already present.
    ///
    /// Adding an endpoint twice keeps its original position.
    pub fn add_fleet_endpoint(&self, fleet_id: &str, endpoint_id: &str) -> Result<()> {
        let conn = self.open_db()?;
        if load_fleet_row(&conn, fleet_id)?.is_none() {
            return Err(JobStoreError::FleetNotFound(fleet_id.to_string()));
        }
        conn.execute(
            "INSERT INTO fleet_endpoints (fleet_id, position, endpoint_id)
             SELECT ?1, COALESCE(MAX(position) + 1, 0), ?2 FROM fleet_endpoints WHERE fleet_id = ?1
             ON CONFLICT DO NOTHING",
            rusqlite::params![fleet_id, endpoint_id],
        )?;
        Ok(())
    }

    /// Loads a fleet job with its endpoints in enumeration order.
    ///
    /// Each endpoint carries its most recent job on this fleet, if any.
    pub fn load_fleet(&self, fleet_id: &str) -> Result<FleetJob> {
        let conn = self.open_db()?;
        let (task, created_at) = load_fleet_row(&conn, fleet_id)?
            .ok_or_else(|| JobStoreError::FleetNotFound(fleet_id.to_string()))?;

        let endpoint_ids = {
            let mut stmt = conn.prepare(
                "SELECT endpoint_id FROM fleet_endpoints WHERE fleet_id = ?1 ORDER BY position",
            )?;
            stmt.query_map([fleet_id], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?
        };

        let mut endpoints = Vec::with_capacity(endpoint_ids.len());
        for endpoint_id in endpoint_ids {
            let job_id: Option<String> = conn
                .query_row(
                    "SELECT job_id FROM jobs WHERE fleet_id = ?1 AND endpoint_id = ?2
                     ORDER BY created_s DESC, created_ns DESC, rowid DESC LIMIT 1",
                    rusqlite::params![fleet_id, &endpoint_id],
                    |row| row.get(0),
                )
                .optional()?;
            let job = match job_id {
                Some(id) => load_job_row(&conn, &id)?,
                None => None,
            };
            endpoints.push(FleetEndpoint {
                host_name: load_host_name(&conn, &endpoint_id)?,
                endpoint_id,
                job,
            });
        }

        Ok(FleetJob {
            fleet_id: fleet_id.to_string(),
            task,
            created_at,
            endpoints,
        })
    }

    /// Lists all fleet jobs, oldest first.
    pub fn list_fleets(&self) -> Result<Vec<FleetJob>> {
        let ids = {
            let conn = self.open_db()?;
            let mut stmt = conn.prepare("SELECT fleet_id FROM fleets ORDER BY created_s, created_ns, rowid")?;
            stmt.query_map([], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?
        };
        ids.iter().map(|id| self.load_fleet(id)).collect()
    }
}

fn job_exists(conn: &Connection, job_id: &str) -> Result<bool> {
    Ok(conn
        .query_row("SELECT 1 FROM jobs WHERE job_id = ?1", [job_id], |_| Ok(()))
        .optional()?
        .is_some())
}

/// Reads one job row and its results, or `None` if there is no such job.
fn load_job_row(conn: &Connection, job_id: &str) -> Result<Option<CollectionJob>> {
    let row = conn
        .query_row(
            "SELECT endpoint_id, task, fleet_id, created_s, created_ns FROM jobs WHERE job_id = ?1",
            [job_id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, i32>(4)?,
                ))
            },
        )
        .optional()?;
    let Some((endpoint_id, task, fleet_id, created_s, created_ns)) = row else {
        return Ok(None);
    };

    let mut stmt = conn.prepare("SELECT blob_ids FROM results WHERE job_id = ?1 ORDER BY seq")?;
    let packed = stmt
        .query_map([job_id], |row| row.get::<_, Vec<u8>>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    let results = packed
        .iter()
        .map(|bytes| unpack_blob_ids(job_id, bytes))
        .collect::<Result<Vec<_>>>()?;

    Ok(Some(CollectionJob {
        job_id: job_id.to_string(),
        endpoint_id,
        task: TaskType::from_tag(&task),
        fleet_id,
        created_at: timestamp(created_s, created_ns)?,
        results,
    }))
}

fn load_fleet_row(conn: &Connection, fleet_id: &str) -> Result<Option<(TaskType, Timestamp)>> {
    let row = conn
        .query_row(
            "SELECT task, created_s, created_ns FROM fleets WHERE fleet_id = ?1",
            [fleet_id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i32>(2)?,
                ))
            },
        )
        .optional()?;
    row.map(|(task, secs, nanos)| Ok((TaskType::from_tag(&task), timestamp(secs, nanos)?)))
        .transpose()
}

fn load_host_name(conn: &Connection, endpoint_id: &str) -> Result<Option<String>> {
    Ok(conn
        .query_row(
            "SELECT host_name FROM endpoints WHERE endpoint_id = ?1",
            [endpoint_id],
            |row| row.get(0),
        )
        .optional()?)
}

fn timestamp(secs: i64, nanos: i32) -> Result<Timestamp> {
    Timestamp::new(secs, nanos)
        .map_err(|e| JobStoreError::Corrupt(format!("invalid creation time {secs}s {nanos}ns: {e}")))
}

fn pack_blob_ids(result: &CollectionResult) -> Vec<u8> {
    result
        .blob_ids
        .iter()
        .flat_map(|id| id.as_bytes().iter().copied())
        .collect()
}

fn unpack_blob_ids(job_id: &str, packed: &[u8]) -> Result<CollectionResult> {
    if packed.len() % BlobId::LEN != 0 {
        return Err(JobStoreError::Corrupt(format!(
            "result of job {job_id} has {} bytes of blob ids",
            packed.len()
        )));
    }
    let blob_ids = packed
        .chunks_exact(BlobId::LEN)
        .map(BlobId::from_bytes)
        .collect::<core::result::Result<Vec<_>, _>>()
        .map_err(|e| JobStoreError::Corrupt(e.to_string()))?;
    Ok(CollectionResult { blob_ids })
}
