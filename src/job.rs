//! Collection jobs and fleet jobs.
//!
//! A collection job is one endpoint's run of a collection task. As the
//! endpoint streams data back, the job accumulates [`CollectionResult`]s,
//! each an ordered list of blob references. A fleet job fans one task out to
//! many endpoints.
//!
//! Jobs are produced by the scheduling side and are read-only here apart from
//! the metadata store that records them.

mod store;

use std::fmt;

use jiff::Timestamp;
use uuid::Uuid;

use crate::blob::BlobId;

pub use store::{JobStore, JobStoreError};

/// The kind of task a job ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskType {
    /// Filesystem timeline collection. The only task that can be exported.
    Timeline,
    /// Any other task, by its tag.
    Other(String),
}

impl TaskType {
    const TIMELINE_TAG: &'static str = "timeline";

    pub fn from_tag(tag: &str) -> Self {
        if tag == Self::TIMELINE_TAG {
            Self::Timeline
        } else {
            Self::Other(tag.to_string())
        }
    }

    pub fn tag(&self) -> &str {
        match self {
            Self::Timeline => Self::TIMELINE_TAG,
            Self::Other(tag) => tag,
        }
    }

    pub fn is_timeline(&self) -> bool {
        matches!(self, Self::Timeline)
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// One batch of stored chunks, in production order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectionResult {
    pub blob_ids: Vec<BlobId>,
}

/// One endpoint's execution of a collection task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionJob {
    pub job_id: String,
    pub endpoint_id: String,
    pub task: TaskType,
    /// Fleet job this run belongs to, if any.
    pub fleet_id: Option<String>,
    pub created_at: Timestamp,
    /// Results in emission order.
    pub results: Vec<CollectionResult>,
}

impl CollectionJob {
    /// Total number of blob references across all results.
    pub fn blob_count(&self) -> usize {
        self.results.iter().map(|r| r.blob_ids.len()).sum()
    }
}

/// One endpoint's slot in a fleet job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FleetEndpoint {
    pub endpoint_id: String,
    /// Last known host name, used for display.
    pub host_name: Option<String>,
    /// The endpoint's run, if it has reported one.
    pub job: Option<CollectionJob>,
}

/// A collection task fanned out to many endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FleetJob {
    pub fleet_id: String,
    pub task: TaskType,
    pub created_at: Timestamp,
    /// Endpoints in the order they were enumerated on the job.
    pub endpoints: Vec<FleetEndpoint>,
}

/// Generates a short uppercase hex job id, e.g. `A1B3C5D7`.
pub fn new_job_id() -> String {
    short_id(8)
}

/// Generates a fleet job id, e.g. `A0B1D2C3E4`.
pub fn new_fleet_id() -> String {
    short_id(10)
}

fn short_id(len: usize) -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(len);
    id.to_uppercase()
}
