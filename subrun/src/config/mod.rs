//! Environment-backed configuration.
//!
//! Every setting has a default matching the competition container layout.
//! Override with `SUBRUN_*` environment variables, optionally seeded from a
//! dotenv file, and then with CLI flags.

pub mod error;

pub use error::ConfigError;

use std::{
    env,
    path::{Path, PathBuf},
};

use crate::{
    command::CommandTemplate,
    util::{is_plain_file_name, parse_bool},
};

/// Where the platform drops the participant's archive.
pub const DEFAULT_SUBMISSION: &str =
    "/code_execution/submission/submission.zip";
/// Extraction and execution directory.
pub const DEFAULT_WORK_DIR: &str = "/code_execution/src";
/// Packaged rankings, collected by the platform after the run.
pub const DEFAULT_RESULT_ARCHIVE: &str =
    "/code_execution/submission/submission.tar.gz";
/// Working copy of the run log.
pub const DEFAULT_LOG_FILE: &str = "/code_execution/submission/log.txt";
/// Fixed diagnostic location the log is copied to.
pub const DEFAULT_LOG_MIRROR: &str = "/tmp/log";
/// Similarity-search ranking tool shipped in the container.
pub const DEFAULT_RANKING_CMD: &str = "python /code_execution/scoring/generate_rankings.py {query} {reference} {output}";
/// Interpreter for the entry program.
pub const DEFAULT_PROGRAM_CMD: &str = "python {program}";
/// Environment listing recorded at the top of the log.
pub const DEFAULT_PACKAGES_CMD: &str = "conda list";

/// Filenames agreed with the submitter, resolved inside the working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractFiles {
    /// Optional descriptor-generation entry program. Default: `main.py`.
    pub entry_program: String,
    /// Full query descriptors. Default: `query_descriptors.npz`.
    pub query: String,
    /// Reference descriptors. Default: `reference_descriptors.npz`.
    pub reference: String,
    /// Subset query descriptors written by the entry program.
    /// Default: `subset_query_descriptors.npz`.
    pub subset_query: String,
    /// Rankings for the full query set. Default: `full_rankings.csv`.
    pub full_rankings: String,
    /// Rankings for the subset. Default: `subset_rankings.csv`.
    pub subset_rankings: String,
}

impl Default for ContractFiles {
    fn default() -> Self {
        Self {
            entry_program: "main.py".into(),
            query: "query_descriptors.npz".into(),
            reference: "reference_descriptors.npz".into(),
            subset_query: "subset_query_descriptors.npz".into(),
            full_rankings: "full_rankings.csv".into(),
            subset_rankings: "subset_rankings.csv".into(),
        }
    }
}

/// Runner configuration loaded from environment variables.
///
/// Use [`RunnerConfig::from_env`] to read `SUBRUN_*` overrides on top of
/// defaults, or [`RunnerConfig::from_lookup`] to supply the variables
/// directly.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Submission archive to unpack.
    pub submission: PathBuf,
    /// Directory the submission is extracted into and stages run in.
    pub work_dir: PathBuf,
    /// Destination of the packaged rankings.
    pub result_archive: PathBuf,
    /// Working copy of the run log.
    pub log_file: PathBuf,
    /// Fixed diagnostic copy of the log. `None` disables mirroring.
    pub log_mirror: Option<PathBuf>,
    /// Optional JSON run summary destination.
    pub summary_file: Option<PathBuf>,
    /// Ranking tool invocation (`{query}`, `{reference}`, `{output}`,
    /// `{ground_truth}` placeholders).
    pub ranking_cmd: CommandTemplate,
    /// Entry program invocation (`{program}` placeholder).
    pub program_cmd: CommandTemplate,
    /// Package listing command. `None` disables the diagnostic stage.
    pub packages_cmd: Option<CommandTemplate>,
    /// Bound to `{ground_truth}` in the ranking command.
    pub ground_truth: Option<PathBuf>,
    /// Rank the subset descriptors when the entry program produces them.
    pub subset_scoring: bool,
    /// Recorded in the log and exported to child processes.
    pub allow_network: bool,
    /// Contract file names inside the working directory.
    pub files: ContractFiles,
}

impl RunnerConfig {
    const ENV_SUBMISSION: &'static str = "SUBRUN_SUBMISSION";
    const ENV_WORK_DIR: &'static str = "SUBRUN_WORK_DIR";
    const ENV_RESULT_ARCHIVE: &'static str = "SUBRUN_RESULT_ARCHIVE";
    const ENV_LOG_FILE: &'static str = "SUBRUN_LOG_FILE";
    const ENV_LOG_MIRROR: &'static str = "SUBRUN_LOG_MIRROR";
    const ENV_SUMMARY_FILE: &'static str = "SUBRUN_SUMMARY_FILE";
    const ENV_RANKING_CMD: &'static str = "SUBRUN_RANKING_CMD";
    const ENV_PROGRAM_CMD: &'static str = "SUBRUN_PROGRAM_CMD";
    const ENV_PACKAGES_CMD: &'static str = "SUBRUN_PACKAGES_CMD";
    const ENV_GROUND_TRUTH: &'static str = "SUBRUN_GROUND_TRUTH";
    const ENV_SUBSET_SCORING: &'static str = "SUBRUN_SUBSET_SCORING";
    const ENV_ALLOW_NETWORK: &'static str = "SUBRUN_ALLOW_NETWORK";
    const ENV_ENTRY_PROGRAM: &'static str = "SUBRUN_ENTRY_PROGRAM";
    const ENV_QUERY_FILE: &'static str = "SUBRUN_QUERY_FILE";
    const ENV_REFERENCE_FILE: &'static str = "SUBRUN_REFERENCE_FILE";
    const ENV_SUBSET_QUERY_FILE: &'static str = "SUBRUN_SUBSET_QUERY_FILE";

    /// Loads configuration from `SUBRUN_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Loads `env_file` into the process environment (existing variables
    /// win), then reads the configuration.
    pub fn load(env_file: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = env_file {
            dotenvy::from_path(path).map_err(|source| {
                ConfigError::EnvFile {
                    path: path.to_path_buf(),
                    source,
                }
            })?;
        }
        Self::from_env()
    }

    /// Loads configuration through `lookup` instead of the process
    /// environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = ContractFiles::default();
        let files = ContractFiles {
            entry_program: parse_file_name(
                &lookup,
                Self::ENV_ENTRY_PROGRAM,
                defaults.entry_program,
            )?,
            query: parse_file_name(
                &lookup,
                Self::ENV_QUERY_FILE,
                defaults.query,
            )?,
            reference: parse_file_name(
                &lookup,
                Self::ENV_REFERENCE_FILE,
                defaults.reference,
            )?,
            subset_query: parse_file_name(
                &lookup,
                Self::ENV_SUBSET_QUERY_FILE,
                defaults.subset_query,
            )?,
            full_rankings: defaults.full_rankings,
            subset_rankings: defaults.subset_rankings,
        };

        Ok(Self {
            submission: parse_path(
                &lookup,
                Self::ENV_SUBMISSION,
                DEFAULT_SUBMISSION,
            ),
            work_dir: parse_path(&lookup, Self::ENV_WORK_DIR, DEFAULT_WORK_DIR),
            result_archive: parse_path(
                &lookup,
                Self::ENV_RESULT_ARCHIVE,
                DEFAULT_RESULT_ARCHIVE,
            ),
            log_file: parse_path(&lookup, Self::ENV_LOG_FILE, DEFAULT_LOG_FILE),
            log_mirror: parse_optional_path(
                &lookup,
                Self::ENV_LOG_MIRROR,
                Some(DEFAULT_LOG_MIRROR),
            ),
            summary_file: parse_optional_path(
                &lookup,
                Self::ENV_SUMMARY_FILE,
                None,
            ),
            ranking_cmd: parse_command(
                &lookup,
                Self::ENV_RANKING_CMD,
                DEFAULT_RANKING_CMD,
            )?,
            program_cmd: parse_command(
                &lookup,
                Self::ENV_PROGRAM_CMD,
                DEFAULT_PROGRAM_CMD,
            )?,
            packages_cmd: parse_optional_command(
                &lookup,
                Self::ENV_PACKAGES_CMD,
                DEFAULT_PACKAGES_CMD,
            ),
            ground_truth: parse_optional_path(
                &lookup,
                Self::ENV_GROUND_TRUTH,
                None,
            ),
            subset_scoring: parse_bool_var(
                &lookup,
                Self::ENV_SUBSET_SCORING,
                true,
            )?,
            allow_network: parse_bool_var(
                &lookup,
                Self::ENV_ALLOW_NETWORK,
                false,
            )?,
            files,
        })
    }

    /// Validates paths and command wiring (does not create directories).
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.work_dir.exists() && !self.work_dir.is_dir() {
            return Err(ConfigError::NotADirectory {
                path: self.work_dir.clone(),
            });
        }

        match &self.ground_truth {
            Some(path) if !path.exists() => {
                return Err(ConfigError::PathNotFound { path: path.clone() });
            }
            None if self.ranking_cmd.references("ground_truth") => {
                return Err(ConfigError::MissingGroundTruth);
            }
            _ => {}
        }

        Ok(())
    }
}

fn parse_path<F>(lookup: &F, name: &str, default: &str) -> PathBuf
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(default))
}

/// Unset falls back to `default`; set-but-blank disables.
fn parse_optional_path<F>(
    lookup: &F,
    name: &str,
    default: Option<&str>,
) -> Option<PathBuf>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(value) => {
            let trimmed = value.trim();
            (!trimmed.is_empty()).then(|| PathBuf::from(trimmed))
        }
        None => default.map(PathBuf::from),
    }
}

fn parse_command<F>(
    lookup: &F,
    name: &'static str,
    default: &str,
) -> Result<CommandTemplate, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(name).unwrap_or_else(|| default.to_string());
    CommandTemplate::parse(&raw).ok_or(ConfigError::EmptyCommand { name })
}

fn parse_optional_command<F>(
    lookup: &F,
    name: &str,
    default: &str,
) -> Option<CommandTemplate>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(name).unwrap_or_else(|| default.to_string());
    CommandTemplate::parse(&raw)
}

fn parse_bool_var<F>(
    lookup: &F,
    name: &'static str,
    default: bool,
) -> Result<bool, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(value) if value.trim().is_empty() => Ok(default),
        Some(value) => parse_bool(&value)
            .ok_or(ConfigError::InvalidBool { name, value }),
        None => Ok(default),
    }
}

fn parse_file_name<F>(
    lookup: &F,
    name: &'static str,
    default: String,
) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(value) if is_plain_file_name(&value) => {
            Ok(value.trim().to_string())
        }
        Some(value) => Err(ConfigError::InvalidFileName { name, value }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_with(vars: &[(&str, &str)]) -> Result<RunnerConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        RunnerConfig::from_lookup(|name| map.get(name).cloned())
    }

    #[test]
    fn defaults_match_container_layout() {
        let config = config_with(&[]).expect("defaults");
        assert_eq!(config.submission, PathBuf::from(DEFAULT_SUBMISSION));
        assert_eq!(config.work_dir, PathBuf::from(DEFAULT_WORK_DIR));
        assert_eq!(config.log_mirror, Some(PathBuf::from("/tmp/log")));
        assert_eq!(config.summary_file, None);
        assert_eq!(config.ranking_cmd.program, "python");
        assert!(config.ranking_cmd.references("output"));
        assert_eq!(
            config.packages_cmd,
            Some(CommandTemplate::new("conda", ["list"]))
        );
        assert!(config.subset_scoring);
        assert!(!config.allow_network);
        assert_eq!(config.files, ContractFiles::default());
    }

    #[test]
    fn overrides_are_applied() {
        let config = config_with(&[
            ("SUBRUN_SUBMISSION", "/tmp/in/sub.tar.gz"),
            ("SUBRUN_RANKING_CMD", "rank {query} {reference} {output}"),
            ("SUBRUN_SUBSET_SCORING", "off"),
            ("SUBRUN_ALLOW_NETWORK", "1"),
            ("SUBRUN_QUERY_FILE", "q.npz"),
        ])
        .expect("config");
        assert_eq!(config.submission, PathBuf::from("/tmp/in/sub.tar.gz"));
        assert_eq!(config.ranking_cmd.program, "rank");
        assert_eq!(config.ranking_cmd.args.len(), 3);
        assert!(!config.subset_scoring);
        assert!(config.allow_network);
        assert_eq!(config.files.query, "q.npz");
    }

    #[test]
    fn blank_optional_values_disable() {
        let config = config_with(&[
            ("SUBRUN_PACKAGES_CMD", ""),
            ("SUBRUN_LOG_MIRROR", "  "),
        ])
        .expect("config");
        assert_eq!(config.packages_cmd, None);
        assert_eq!(config.log_mirror, None);
    }

    #[test]
    fn blank_ranking_command_is_rejected() {
        let err = config_with(&[("SUBRUN_RANKING_CMD", " ")])
            .expect_err("blank ranking command");
        assert!(matches!(
            err,
            ConfigError::EmptyCommand {
                name: "SUBRUN_RANKING_CMD"
            }
        ));
    }

    #[test]
    fn unknown_bool_is_rejected() {
        let err = config_with(&[("SUBRUN_SUBSET_SCORING", "sometimes")])
            .expect_err("bad bool");
        assert!(matches!(err, ConfigError::InvalidBool { .. }));
    }

    #[test]
    fn contract_names_must_be_plain() {
        let err = config_with(&[("SUBRUN_ENTRY_PROGRAM", "../evil.py")])
            .expect_err("path traversal");
        assert!(matches!(err, ConfigError::InvalidFileName { .. }));
    }

    #[test]
    fn ground_truth_placeholder_requires_path() {
        let config = config_with(&[(
            "SUBRUN_RANKING_CMD",
            "python eval.py {query} {reference} {ground_truth}",
        )])
        .expect("config");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingGroundTruth)
        ));
    }

    #[test]
    fn validate_rejects_file_as_work_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("not-a-dir");
        std::fs::write(&file, b"x").expect("write");
        let mut config = config_with(&[]).expect("config");
        config.work_dir = file;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NotADirectory { .. })
        ));
    }

    #[test]
    fn validate_rejects_missing_ground_truth_file() {
        let mut config = config_with(&[]).expect("config");
        config.ground_truth = Some(PathBuf::from("/nonexistent/gt.csv"));
        assert!(matches!(
            config.validate(),
            Err(ConfigError::PathNotFound { .. })
        ));
    }
}
