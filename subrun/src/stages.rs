//! Pipeline stages.
//!
//! One function per stage. Each inspects only the files it depends on,
//! performs at most one invocation of its external command and reports a
//! [`StageOutcome`]; the pipeline decides what a failure means through the
//! stage's [`FailurePolicy`].

use std::{
    fmt, io,
    path::{Path, PathBuf},
    process::ExitStatus,
};

use serde::Serialize;
use thiserror::Error;

use crate::{
    archive::{self, ArchiveError, ArchiveMember},
    command::{CommandSpec, run_logged},
    context::{ClearError, PipelineContext},
    log::RunLog,
    rankings,
};

/// Stages in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Record installed packages.
    ListPackages,
    /// Extract the submission.
    Unpack,
    /// Run the entry program.
    GenerateSubset,
    /// Rank subset descriptors or write the placeholder.
    ScoreSubset,
    /// Rank full descriptors.
    ScoreFull,
    /// Write the result archive.
    Package,
    /// Persist and mirror the log.
    FlushLog,
}

/// How the pipeline reacts when a stage fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Informational only; failures become warnings.
    Diagnostic,
    /// Fatal; remaining work stages are skipped and the run fails.
    Abort,
    /// Optional; failures become warnings and the run continues.
    Degrade,
    /// Mandatory; the run is marked failed but later stages still run.
    MarkFailed,
}

impl Stage {
    /// Every stage, in execution order.
    pub const ALL: [Stage; 7] = [
        Stage::ListPackages,
        Stage::Unpack,
        Stage::GenerateSubset,
        Stage::ScoreSubset,
        Stage::ScoreFull,
        Stage::Package,
        Stage::FlushLog,
    ];

    /// Snake-case name used in the log and summary.
    pub fn name(self) -> &'static str {
        match self {
            Stage::ListPackages => "list_packages",
            Stage::Unpack => "unpack",
            Stage::GenerateSubset => "generate_subset",
            Stage::ScoreSubset => "score_subset",
            Stage::ScoreFull => "score_full",
            Stage::Package => "package",
            Stage::FlushLog => "flush_log",
        }
    }

    /// What a failure of this stage means for the run.
    pub fn policy(self) -> FailurePolicy {
        match self {
            Stage::ListPackages | Stage::FlushLog => FailurePolicy::Diagnostic,
            Stage::Unpack => FailurePolicy::Abort,
            Stage::GenerateSubset | Stage::ScoreSubset => {
                FailurePolicy::Degrade
            }
            Stage::ScoreFull | Stage::Package => FailurePolicy::MarkFailed,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Why a stage failed.
#[derive(Debug, Error)]
pub enum StageError {
    /// The command could not be started.
    #[error("failed to start `{command}`")]
    Spawn {
        /// Rendered command line.
        command: String,
        /// Spawn error.
        #[source]
        source: io::Error,
    },

    /// The command ran and exited unsuccessfully.
    #[error("`{command}` exited with {status}")]
    ExitStatus {
        /// Rendered command line.
        command: String,
        /// Exit status reported by the OS.
        status: ExitStatus,
    },

    /// The command succeeded without writing its output file.
    #[error("expected output {} was not produced", path.display())]
    MissingOutput {
        /// Expected file.
        path: PathBuf,
    },

    /// Required descriptor files are absent.
    #[error("missing descriptor files: {}", missing.join(", "))]
    MissingInputs {
        /// File names that were not found.
        missing: Vec<String>,
    },

    /// Extraction or packaging failed.
    #[error(transparent)]
    Archive(#[from] ArchiveError),

    /// Files from an earlier run could not be cleared.
    #[error(transparent)]
    Clear(#[from] ClearError),

    /// Reading or writing a file failed.
    #[error("i/o error on {}", path.display())]
    Io {
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
}

/// Result of running one stage.
#[derive(Debug)]
pub enum StageOutcome {
    /// The stage did its work.
    Completed {
        /// Files the stage produced.
        artifacts: Vec<PathBuf>,
    },
    /// A guard was false.
    Skipped {
        /// Logged explanation.
        reason: String,
        /// Stand-in file written instead, if any.
        placeholder: Option<PathBuf>,
    },
    /// The stage failed; its policy decides the consequence.
    Failed(StageError),
}

impl StageOutcome {
    fn completed(artifacts: Vec<PathBuf>) -> Self {
        Self::Completed { artifacts }
    }

    fn skipped(reason: impl Into<String>) -> Self {
        Self::Skipped {
            reason: reason.into(),
            placeholder: None,
        }
    }
}

/// Run `stage` against `ctx`.
pub async fn run(
    stage: Stage,
    ctx: &PipelineContext,
    log: &RunLog,
) -> StageOutcome {
    match stage {
        Stage::ListPackages => list_packages(ctx, log).await,
        Stage::Unpack => unpack(ctx, log),
        Stage::GenerateSubset => generate_subset(ctx, log).await,
        Stage::ScoreSubset => score_subset(ctx, log).await,
        Stage::ScoreFull => score_full(ctx, log).await,
        Stage::Package => package(ctx, log),
        Stage::FlushLog => flush_log(ctx, log),
    }
}

/// Record the installed packages. Never affects the outcome.
pub async fn list_packages(
    ctx: &PipelineContext,
    log: &RunLog,
) -> StageOutcome {
    let Some(spec) = ctx.packages_command() else {
        return StageOutcome::skipped("package listing disabled");
    };
    match invoke(&spec, log).await {
        Ok(()) => StageOutcome::completed(Vec::new()),
        Err(err) => StageOutcome::Failed(err),
    }
}

/// Extract the submission into the working directory, after removing the
/// files an earlier run left there and its result archive.
pub fn unpack(ctx: &PipelineContext, log: &RunLog) -> StageOutcome {
    match ctx.clear_previous_run() {
        Ok(removed) => {
            for path in removed {
                log.info(&format!("removed stale {}", path.display()));
            }
        }
        Err(err) => return StageOutcome::Failed(err.into()),
    }

    log.info(&format!(
        "extracting {} into {}",
        ctx.submission.display(),
        ctx.work_dir.display()
    ));
    match archive::extract(&ctx.submission, &ctx.work_dir) {
        Ok(files) => {
            for file in &files {
                let shown =
                    file.strip_prefix(&ctx.work_dir).unwrap_or(file.as_path());
                log.output(&format!("  extracted: {}", shown.display()));
            }
            StageOutcome::completed(files)
        }
        Err(err) => StageOutcome::Failed(err.into()),
    }
}

/// Run the entry program, if the submission ships one.
pub async fn generate_subset(
    ctx: &PipelineContext,
    log: &RunLog,
) -> StageOutcome {
    if !ctx.entry_program.is_file() {
        return StageOutcome::skipped(format!(
            "{} not found; skipping subset descriptor generation",
            file_name(&ctx.entry_program)
        ));
    }

    if let Err(err) = invoke(&ctx.program_command(), log).await {
        return StageOutcome::Failed(err);
    }
    if !ctx.subset_query.is_file() {
        return StageOutcome::Failed(StageError::MissingOutput {
            path: ctx.subset_query.clone(),
        });
    }
    StageOutcome::completed(vec![ctx.subset_query.clone()])
}

/// Rank the subset descriptors, falling back to a header-only file.
pub async fn score_subset(
    ctx: &PipelineContext,
    log: &RunLog,
) -> StageOutcome {
    let guard = if !ctx.subset_scoring {
        Some("subset scoring disabled".to_string())
    } else if !ctx.subset_query.is_file() {
        Some(format!("{} not found", file_name(&ctx.subset_query)))
    } else if !ctx.reference.is_file() {
        Some(format!("{} not found", file_name(&ctx.reference)))
    } else {
        None
    };

    let reason = match guard {
        Some(reason) => reason,
        None => {
            let spec =
                ctx.ranking_command(&ctx.subset_query, &ctx.subset_rankings);
            match invoke(&spec, log).await.and_then(|()| {
                require_output(&ctx.subset_rankings)
            }) {
                Ok(()) => {
                    return StageOutcome::completed(vec![
                        ctx.subset_rankings.clone(),
                    ]);
                }
                Err(err) => format!("subset ranking failed: {err}"),
            }
        }
    };

    if let Err(source) = rankings::write_placeholder(&ctx.subset_rankings) {
        return StageOutcome::Failed(StageError::Io {
            path: ctx.subset_rankings.clone(),
            source,
        });
    }
    StageOutcome::Skipped {
        reason: format!(
            "{reason}; wrote header-only {}",
            file_name(&ctx.subset_rankings)
        ),
        placeholder: Some(ctx.subset_rankings.clone()),
    }
}

/// Rank the full query descriptors against the reference descriptors.
pub async fn score_full(ctx: &PipelineContext, log: &RunLog) -> StageOutcome {
    let missing: Vec<String> = [&ctx.query, &ctx.reference]
        .into_iter()
        .filter(|path| !path.is_file())
        .map(|path| file_name(path))
        .collect();
    if !missing.is_empty() {
        return StageOutcome::Failed(StageError::MissingInputs { missing });
    }

    let spec = ctx.ranking_command(&ctx.query, &ctx.full_rankings);
    match invoke(&spec, log)
        .await
        .and_then(|()| require_output(&ctx.full_rankings))
    {
        Ok(()) => StageOutcome::completed(vec![ctx.full_rankings.clone()]),
        Err(err) => StageOutcome::Failed(err),
    }
}

/// Bundle whichever rankings files exist, full first, into the result
/// archive.
pub fn package(ctx: &PipelineContext, log: &RunLog) -> StageOutcome {
    let members: Vec<ArchiveMember> = [&ctx.full_rankings, &ctx.subset_rankings]
        .into_iter()
        .filter(|path| path.is_file())
        .map(|path| ArchiveMember::from_path(path))
        .collect();
    if members.is_empty() {
        return StageOutcome::skipped("no rankings files to package");
    }

    log.info(&format!(
        "packaging {} into {}",
        members
            .iter()
            .map(|m| m.name.as_str())
            .collect::<Vec<_>>()
            .join(", "),
        ctx.result_archive.display()
    ));
    match archive::write_result_archive(&ctx.result_archive, &members) {
        Ok(packaged) => {
            for member in &packaged {
                log.output(&format!(
                    "  {} ({} bytes, sha256 {})",
                    member.name, member.bytes, member.sha256
                ));
            }
            StageOutcome::completed(vec![ctx.result_archive.clone()])
        }
        Err(err) => StageOutcome::Failed(err.into()),
    }
}

/// Persist the log and copy it to the mirror path.
pub fn flush_log(ctx: &PipelineContext, log: &RunLog) -> StageOutcome {
    if let Err(source) = log.flush() {
        return StageOutcome::Failed(StageError::Io {
            path: log.path().to_path_buf(),
            source,
        });
    }
    let mut artifacts = vec![log.path().to_path_buf()];
    if let Some(mirror) = &ctx.log_mirror {
        if let Err(source) = log.mirror_to(mirror) {
            return StageOutcome::Failed(StageError::Io {
                path: mirror.clone(),
                source,
            });
        }
        artifacts.push(mirror.clone());
    }
    StageOutcome::completed(artifacts)
}

async fn invoke(spec: &CommandSpec, log: &RunLog) -> Result<(), StageError> {
    let status = run_logged(spec, log).await.map_err(|source| {
        StageError::Spawn {
            command: spec.to_string(),
            source,
        }
    })?;
    if status.success() {
        Ok(())
    } else {
        Err(StageError::ExitStatus {
            command: spec.to_string(),
            status,
        })
    }
}

fn require_output(path: &Path) -> Result<(), StageError> {
    if path.is_file() {
        Ok(())
    } else {
        Err(StageError::MissingOutput {
            path: path.to_path_buf(),
        })
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
