//! Machine-readable run summary.

use std::{fs, io, path::Path, time::Duration};

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::{
    archive::PackagedMember,
    pipeline::RunOutcome,
    stages::{Stage, StageOutcome},
};

/// Per-stage result as recorded in the summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// The stage did its work.
    Completed,
    /// A guard was false; see the record's `detail`.
    Skipped,
    /// The stage failed; see the record's `detail`.
    Failed,
    /// An earlier fatal stage ended the run first.
    NotRun,
}

/// Summary entry for one stage.
#[derive(Debug, Clone, Serialize)]
pub struct StageRecord {
    /// Which stage.
    pub stage: Stage,
    /// How it ended.
    pub status: StageStatus,
    /// Skip reason or rendered error chain.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Wall-clock time, humantime formatted (`"1s 250ms"`).
    pub elapsed: String,
}

impl StageRecord {
    /// Record for a stage that ran.
    pub fn from_outcome(
        stage: Stage,
        outcome: &StageOutcome,
        elapsed: Duration,
    ) -> Self {
        let (status, detail) = match outcome {
            StageOutcome::Completed { .. } => (StageStatus::Completed, None),
            StageOutcome::Skipped { reason, .. } => {
                (StageStatus::Skipped, Some(reason.clone()))
            }
            StageOutcome::Failed(err) => {
                (StageStatus::Failed, Some(error_chain(err)))
            }
        };
        Self {
            stage,
            status,
            detail,
            elapsed: format_elapsed(elapsed),
        }
    }

    /// Record for a stage skipped after a fatal failure.
    pub fn not_run(stage: Stage) -> Self {
        Self {
            stage,
            status: StageStatus::NotRun,
            detail: None,
            elapsed: format_elapsed(Duration::ZERO),
        }
    }
}

/// Summary of a whole run, written as JSON when a summary file is set.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Identifier shown in the log header.
    pub run_id: Uuid,
    /// When the header was written.
    pub started_at: DateTime<Utc>,
    /// When the log flush returned.
    pub finished_at: DateTime<Utc>,
    /// Overall result.
    pub outcome: RunOutcome,
    /// Exit code the binary returns.
    pub exit_code: i32,
    /// One record per stage, in execution order.
    pub stages: Vec<StageRecord>,
    /// Members of the result archive written by this run.
    pub packaged: Vec<PackagedMember>,
}

impl RunReport {
    /// Status recorded for `stage`.
    pub fn status_of(&self, stage: Stage) -> Option<StageStatus> {
        self.stages
            .iter()
            .find(|record| record.stage == stage)
            .map(|record| record.status)
    }

    /// Write the report as pretty JSON, creating parent directories.
    pub fn write_json(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let mut body = serde_json::to_vec_pretty(self).map_err(io::Error::other)?;
        body.push(b'\n');
        fs::write(path, body)
    }
}

/// Millisecond precision is plenty for stage timings.
pub fn format_elapsed(elapsed: Duration) -> String {
    let millis = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
    humantime::format_duration(Duration::from_millis(millis)).to_string()
}

/// `error: cause: cause` rendering of an error and its sources.
pub fn error_chain(err: &dyn std::error::Error) -> String {
    let mut rendered = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        rendered.push_str(": ");
        rendered.push_str(&cause.to_string());
        source = cause.source();
    }
    rendered
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::stages::StageError;

    #[test]
    fn elapsed_is_truncated_to_millis() {
        assert_eq!(
            format_elapsed(Duration::from_micros(1_250_400)),
            "1s 250ms"
        );
        assert_eq!(format_elapsed(Duration::ZERO), "0s");
    }

    #[test]
    fn failed_record_carries_error_chain() {
        let outcome = StageOutcome::Failed(StageError::Io {
            path: PathBuf::from("/w"),
            source: io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        });
        let record = StageRecord::from_outcome(
            Stage::Unpack,
            &outcome,
            Duration::from_millis(3),
        );
        assert_eq!(record.status, StageStatus::Failed);
        assert_eq!(record.detail.as_deref(), Some("i/o error on /w: denied"));
        assert_eq!(record.elapsed, "3ms");
    }

    #[test]
    fn report_serializes_to_json_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let report = RunReport {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            outcome: RunOutcome::Failure,
            exit_code: 1,
            stages: vec![
                StageRecord::from_outcome(
                    Stage::ScoreFull,
                    &StageOutcome::Failed(StageError::MissingInputs {
                        missing: vec!["query_descriptors.npz".into()],
                    }),
                    Duration::ZERO,
                ),
                StageRecord::not_run(Stage::Package),
            ],
            packaged: Vec::new(),
        };
        let path = dir.path().join("reports/run.json");
        report.write_json(&path).expect("write");

        let value: serde_json::Value =
            serde_json::from_slice(&fs::read(&path).expect("read"))
                .expect("json");
        assert_eq!(value["outcome"], "failure");
        assert_eq!(value["exit_code"], 1);
        assert_eq!(value["stages"][0]["stage"], "score_full");
        assert_eq!(value["stages"][0]["status"], "failed");
        assert_eq!(value["stages"][1]["status"], "not_run");
        assert!(value["stages"][1].get("detail").is_none());
        assert_eq!(report.status_of(Stage::Package), Some(StageStatus::NotRun));
    }
}
