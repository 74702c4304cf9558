//! Output formatting for CLI display.

use jiff::{Timestamp, tz::TimeZone};

use tlx::job::{CollectionJob, FleetJob};

/// One-line summary of a collection job.
pub(super) fn format_job(job: &CollectionJob) -> String {
    let mut line = format!(
        "{}  {}  [{}]  {}  {}",
        job.job_id,
        job.endpoint_id,
        job.task,
        format_blob_count(job.blob_count()),
        format_time(job.created_at)
    );
    if let Some(fleet_id) = &job.fleet_id {
        line.push_str(&format!("  fleet {fleet_id}"));
    }
    line
}

/// One-line summary of a fleet job.
pub(super) fn format_fleet(fleet: &FleetJob) -> String {
    let reported = fleet.endpoints.iter().filter(|e| e.job.is_some()).count();
    format!(
        "{}  [{}]  {}/{} endpoints reported  {}",
        fleet.fleet_id,
        fleet.task,
        reported,
        fleet.endpoints.len(),
        format_time(fleet.created_at)
    )
}

fn format_blob_count(n: usize) -> String {
    match n {
        1 => "1 chunk".to_string(),
        n => format!("{n} chunks"),
    }
}

/// UTC, to the minute.
fn format_time(ts: Timestamp) -> String {
    ts.to_zoned(TimeZone::UTC).strftime("%Y-%m-%d %H:%M").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    use tlx::{
        blob::BlobId,
        job::{CollectionResult, FleetEndpoint, TaskType},
    };

    fn job(blobs: usize) -> CollectionJob {
        CollectionJob {
            job_id: "A1B3C5D7".into(),
            endpoint_id: "C.1000000000000000".into(),
            task: TaskType::Timeline,
            fleet_id: None,
            created_at: Timestamp::new(1_700_000_000, 0).unwrap(),
            results: vec![CollectionResult {
                blob_ids: (0..blobs).map(|i| BlobId::of(&[i as u8])).collect(),
            }],
        }
    }

    #[test]
    fn format_job_line() {
        assert_eq!(
            format_job(&job(3)),
            "A1B3C5D7  C.1000000000000000  [timeline]  3 chunks  2023-11-14 22:13"
        );
    }

    #[test]
    fn format_job_line_with_fleet() {
        let mut j = job(1);
        j.fleet_id = Some("A0B1D2C3E4".into());
        assert!(format_job(&j).ends_with("1 chunk  2023-11-14 22:13  fleet A0B1D2C3E4"));
    }

    #[test]
    fn format_fleet_line() {
        let fleet = FleetJob {
            fleet_id: "A0B1D2C3E4".into(),
            task: TaskType::Timeline,
            created_at: Timestamp::new(1_700_000_000, 0).unwrap(),
            endpoints: vec![
                FleetEndpoint {
                    endpoint_id: "C.1".into(),
                    host_name: None,
                    job: Some(job(1)),
                },
                FleetEndpoint {
                    endpoint_id: "C.2".into(),
                    host_name: None,
                    job: None,
                },
            ],
        };
        assert_eq!(
            format_fleet(&fleet),
            "A0B1D2C3E4  [timeline]  1/2 endpoints reported  2023-11-14 22:13"
        );
    }
}
