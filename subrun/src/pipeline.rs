//! Stage sequencing.
//!
//! [`Pipeline::run`] walks [`Stage::ALL`] in order and applies each stage's
//! [`FailurePolicy`]:
//!
//! - `Diagnostic` and `Degrade` failures are logged as `WARNING:` and the run
//!   continues.
//! - `MarkFailed` failures are logged as `ERROR:`, the outcome becomes
//!   [`RunOutcome::Failure`] and the run continues so partial results are
//!   still packaged.
//! - An `Abort` failure is logged as `ERROR:` and every remaining stage except
//!   the log flush is recorded as not run.
//!
//! The log flush always runs last. The summary file, when configured, is
//! written after it; the exit code is left to the caller.

use std::{fmt, process::ExitCode, time::Instant};

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::{
    archive::{self, PackagedMember},
    context::PipelineContext,
    log::RunLog,
    report::{RunReport, StageRecord, error_chain, format_elapsed},
    stages::{self, FailurePolicy, Stage, StageOutcome},
};

/// Success or failure of a whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Full rankings were produced and packaged.
    Success,
    /// Unpacking, full scoring or packaging failed.
    Failure,
}

impl RunOutcome {
    /// Process exit status for this outcome.
    pub fn exit_code(self) -> i32 {
        match self {
            RunOutcome::Success => 0,
            RunOutcome::Failure => 1,
        }
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Success => f.write_str("success"),
            RunOutcome::Failure => f.write_str("failure"),
        }
    }
}

impl From<RunOutcome> for ExitCode {
    fn from(outcome: RunOutcome) -> Self {
        match outcome {
            RunOutcome::Success => ExitCode::SUCCESS,
            RunOutcome::Failure => ExitCode::FAILURE,
        }
    }
}

/// One run over a resolved context, writing to `log`.
#[derive(Debug)]
pub struct Pipeline {
    ctx: PipelineContext,
    log: RunLog,
    run_id: Uuid,
}

impl Pipeline {
    /// Pipeline with a fresh run id.
    pub fn new(ctx: PipelineContext, log: RunLog) -> Self {
        Self {
            ctx,
            log,
            run_id: Uuid::new_v4(),
        }
    }

    /// Identifier recorded in the log header and summary.
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Execute every stage once and return the run summary.
    pub async fn run(self) -> RunReport {
        let started_at = Utc::now();
        self.write_header(started_at);

        let mut outcome = RunOutcome::Success;
        let mut aborted = false;
        let mut records = Vec::with_capacity(Stage::ALL.len());
        let mut packaged = Vec::new();

        for stage in Stage::ALL {
            if stage == Stage::FlushLog {
                self.log.info(&format!(
                    "== finished: {outcome} (exit code {})",
                    outcome.exit_code()
                ));
            } else if aborted {
                tracing::debug!(stage = %stage, "skipping after fatal stage");
                records.push(StageRecord::not_run(stage));
                continue;
            } else {
                self.log.info(&format!("== {stage}"));
            }

            let started = Instant::now();
            let result = stages::run(stage, &self.ctx, &self.log).await;
            let elapsed = started.elapsed();

            if stage == Stage::FlushLog {
                // Nothing more can reach the mirrored transcript.
                if let StageOutcome::Failed(err) = &result {
                    tracing::error!(
                        error = %error_chain(err),
                        "failed to persist run log"
                    );
                }
            } else {
                match self.apply_policy(stage, &result) {
                    Some(FailurePolicy::Abort) => {
                        aborted = true;
                        outcome = RunOutcome::Failure;
                    }
                    Some(FailurePolicy::MarkFailed) => {
                        outcome = RunOutcome::Failure;
                    }
                    _ => {}
                }
                self.log.info(&format!(
                    "== {stage}: {} in {}",
                    status_word(&result),
                    format_elapsed(elapsed)
                ));
            }

            if stage == Stage::Package
                && matches!(result, StageOutcome::Completed { .. })
            {
                packaged = self.packaged_members();
            }

            tracing::info!(
                stage = %stage,
                status = status_word(&result),
                elapsed = %format_elapsed(elapsed),
                "stage finished"
            );
            records.push(StageRecord::from_outcome(stage, &result, elapsed));
        }

        let report = RunReport {
            run_id: self.run_id,
            started_at,
            finished_at: Utc::now(),
            outcome,
            exit_code: outcome.exit_code(),
            stages: records,
            packaged,
        };

        if let Some(path) = &self.ctx.summary_file
            && let Err(err) = report.write_json(path)
        {
            tracing::error!(
                summary_file = %path.display(),
                error = %err,
                "failed to write run summary"
            );
        }

        report
    }

    /// Log a non-completed outcome with the marker its policy calls for.
    /// Returns the policy that applied when the stage failed.
    fn apply_policy(
        &self,
        stage: Stage,
        result: &StageOutcome,
    ) -> Option<FailurePolicy> {
        let policy = stage.policy();
        match result {
            StageOutcome::Completed { .. } => None,
            StageOutcome::Skipped { reason, .. } => {
                match policy {
                    FailurePolicy::Diagnostic => self.log.info(reason),
                    _ => self.log.warning(reason),
                }
                None
            }
            StageOutcome::Failed(err) => {
                let message = format!("{stage}: {}", error_chain(err));
                match policy {
                    FailurePolicy::Diagnostic | FailurePolicy::Degrade => {
                        self.log.warning(&message);
                        tracing::warn!(stage = %stage, "{message}");
                    }
                    FailurePolicy::Abort | FailurePolicy::MarkFailed => {
                        self.log.error(&message);
                        tracing::error!(stage = %stage, "{message}");
                    }
                }
                Some(policy)
            }
        }
    }

    fn write_header(&self, started_at: chrono::DateTime<Utc>) {
        self.log.info(&format!("== subrun run {}", self.run_id));
        self.log.info(&format!(
            "started: {}",
            started_at.to_rfc3339_opts(SecondsFormat::Secs, true)
        ));
        for (label, value) in self.ctx.describe() {
            self.log.info(&format!("{label}: {value}"));
        }
        tracing::info!(
            run_id = %self.run_id,
            submission = %self.ctx.submission.display(),
            work_dir = %self.ctx.work_dir.display(),
            "starting run"
        );
    }

    fn packaged_members(&self) -> Vec<PackagedMember> {
        match archive::read_result_archive(&self.ctx.result_archive) {
            Ok(members) => members
                .into_iter()
                .map(|(name, data)| PackagedMember::from_bytes(name, &data))
                .collect(),
            Err(err) => {
                tracing::warn!(
                    result_archive = %self.ctx.result_archive.display(),
                    error = %error_chain(&err),
                    "could not read back result archive"
                );
                Vec::new()
            }
        }
    }
}

fn status_word(result: &StageOutcome) -> &'static str {
    match result {
        StageOutcome::Completed { .. } => "completed",
        StageOutcome::Skipped { .. } => "skipped",
        StageOutcome::Failed(_) => "failed",
    }
}
