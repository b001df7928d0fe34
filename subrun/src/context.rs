//! Resolved per-run paths and commands.
//!
//! [`PipelineContext`] turns a [`RunnerConfig`] into concrete paths for every
//! artifact a run reads or writes, so stages never consult the process
//! working directory.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use thiserror::Error;

use crate::{
    command::{CommandSpec, CommandTemplate},
    config::RunnerConfig,
};

/// Environment variable exported to every child with the network toggle.
pub const ALLOW_NETWORK_ENV: &str = "SUBRUN_ALLOW_NETWORK";

/// Everything a stage needs, with contract files already joined onto the
/// working directory.
#[derive(Debug, Clone)]
pub struct PipelineContext {
    /// Submission archive.
    pub submission: PathBuf,
    /// Extraction and execution directory.
    pub work_dir: PathBuf,
    /// Entry program inside `work_dir`.
    pub entry_program: PathBuf,
    /// Full query descriptors.
    pub query: PathBuf,
    /// Reference descriptors.
    pub reference: PathBuf,
    /// Subset query descriptors written by the entry program.
    pub subset_query: PathBuf,
    /// Ranking output for `query`.
    pub full_rankings: PathBuf,
    /// Ranking output for `subset_query`, or the header-only placeholder.
    pub subset_rankings: PathBuf,
    /// Packaged rankings.
    pub result_archive: PathBuf,
    /// Working copy of the run log.
    pub log_file: PathBuf,
    /// Diagnostic copy of the log, if enabled.
    pub log_mirror: Option<PathBuf>,
    /// JSON run summary, if enabled.
    pub summary_file: Option<PathBuf>,
    /// Bound to `{ground_truth}` when set.
    pub ground_truth: Option<PathBuf>,
    /// Ranking tool template.
    pub ranking_cmd: CommandTemplate,
    /// Entry program template.
    pub program_cmd: CommandTemplate,
    /// Package listing command, if enabled.
    pub packages_cmd: Option<CommandTemplate>,
    /// Whether subset descriptors are ranked at all.
    pub subset_scoring: bool,
    /// Network toggle exported to children.
    pub allow_network: bool,
}

impl PipelineContext {
    /// Resolve every path in `config`. Performs no I/O.
    pub fn from_config(config: &RunnerConfig) -> Self {
        let work_dir = config.work_dir.clone();
        let files = &config.files;
        Self {
            submission: config.submission.clone(),
            entry_program: work_dir.join(&files.entry_program),
            query: work_dir.join(&files.query),
            reference: work_dir.join(&files.reference),
            subset_query: work_dir.join(&files.subset_query),
            full_rankings: work_dir.join(&files.full_rankings),
            subset_rankings: work_dir.join(&files.subset_rankings),
            work_dir,
            result_archive: config.result_archive.clone(),
            log_file: config.log_file.clone(),
            log_mirror: config.log_mirror.clone(),
            summary_file: config.summary_file.clone(),
            ground_truth: config.ground_truth.clone(),
            ranking_cmd: config.ranking_cmd.clone(),
            program_cmd: config.program_cmd.clone(),
            packages_cmd: config.packages_cmd.clone(),
            subset_scoring: config.subset_scoring,
            allow_network: config.allow_network,
        }
    }

    /// Variables added to every child environment.
    pub fn child_env(&self) -> Vec<(String, String)> {
        vec![(ALLOW_NETWORK_ENV.to_string(), self.allow_network.to_string())]
    }

    /// Ranking tool invocation for one query file, writing to `output`.
    pub fn ranking_command(&self, query: &Path, output: &Path) -> CommandSpec {
        let mut bindings = vec![
            ("query", query),
            ("reference", self.reference.as_path()),
            ("output", output),
        ];
        if let Some(ground_truth) = &self.ground_truth {
            bindings.push(("ground_truth", ground_truth.as_path()));
        }
        self.ranking_cmd
            .render(&bindings)
            .in_dir(&self.work_dir)
            .with_env(&self.child_env())
    }

    /// Entry program invocation, run from the working directory.
    pub fn program_command(&self) -> CommandSpec {
        self.program_cmd
            .render(&[("program", self.entry_program.as_path())])
            .in_dir(&self.work_dir)
            .with_env(&self.child_env())
    }

    /// Package listing invocation, `None` when disabled.
    pub fn packages_command(&self) -> Option<CommandSpec> {
        self.packages_cmd
            .as_ref()
            .map(|template| template.render(&[]).with_env(&self.child_env()))
    }

    /// Resolved settings as `(label, value)` pairs for the log header and
    /// `subrun check`.
    pub fn describe(&self) -> Vec<(&'static str, String)> {
        let path = |p: &Path| p.display().to_string();
        let opt = |p: &Option<PathBuf>| {
            p.as_deref().map(path).unwrap_or_else(|| "-".to_string())
        };
        vec![
            ("submission", path(&self.submission)),
            ("work_dir", path(&self.work_dir)),
            ("entry_program", path(&self.entry_program)),
            ("query", path(&self.query)),
            ("reference", path(&self.reference)),
            ("subset_query", path(&self.subset_query)),
            ("result_archive", path(&self.result_archive)),
            ("log_file", path(&self.log_file)),
            ("log_mirror", opt(&self.log_mirror)),
            ("summary_file", opt(&self.summary_file)),
            ("ground_truth", opt(&self.ground_truth)),
            ("ranking_cmd", self.ranking_cmd.to_string()),
            ("program_cmd", self.program_cmd.to_string()),
            (
                "packages_cmd",
                self.packages_cmd
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_else(|| "-".to_string()),
            ),
            ("subset_scoring", self.subset_scoring.to_string()),
            ("allow_network", self.allow_network.to_string()),
        ]
    }

    /// Files an earlier run in the same working directory may have left
    /// behind: the contract inputs it extracted, both rankings files and the
    /// result archive it delivered.
    pub fn previous_run_files(&self) -> [&Path; 7] {
        [
            &self.entry_program,
            &self.query,
            &self.reference,
            &self.subset_query,
            &self.full_rankings,
            &self.subset_rankings,
            &self.result_archive,
        ]
        .map(PathBuf::as_path)
    }

    /// Remove whatever [`previous_run_files`](Self::previous_run_files)
    /// still exist. Returns the paths that were removed.
    pub fn clear_previous_run(&self) -> Result<Vec<PathBuf>, ClearError> {
        let mut removed = Vec::new();
        for path in self.previous_run_files() {
            match fs::remove_file(path) {
                Ok(()) => removed.push(path.to_path_buf()),
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(source) => {
                    return Err(ClearError {
                        path: path.to_path_buf(),
                        source,
                    });
                }
            }
        }
        Ok(removed)
    }
}

/// A leftover file could not be removed.
#[derive(Debug, Error)]
#[error("failed to remove {}", path.display())]
pub struct ClearError {
    /// File that is still in place.
    pub path: PathBuf,
    /// Underlying removal error.
    #[source]
    pub source: io::Error,
}
