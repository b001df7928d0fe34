//! Configuration error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A boolean variable held something other than a recognised flag value.
    #[error("invalid boolean '{value}' for {name}: expected true/false/1/0")]
    InvalidBool {
        /// Variable name.
        name: &'static str,
        /// Rejected value.
        value: String,
    },

    /// A command variable that must name a program was blank.
    #[error("{name} must name a program")]
    EmptyCommand {
        /// Variable name.
        name: &'static str,
    },

    /// A contract filename was a path rather than a bare file name.
    #[error("{name} must be a plain file name, got '{value}'")]
    InvalidFileName {
        /// Variable name.
        name: &'static str,
        /// Rejected value.
        value: String,
    },

    /// The ranking command asks for `{ground_truth}` but none is configured.
    #[error(
        "ranking command references {{ground_truth}} but SUBRUN_GROUND_TRUTH is not set"
    )]
    MissingGroundTruth,

    /// Specified path does not exist on the filesystem.
    #[error("path does not exist: {path}")]
    PathNotFound {
        /// Missing path.
        path: PathBuf,
    },

    /// Path exists but is not a directory (when a directory was expected).
    #[error("path is not a directory: {path}")]
    NotADirectory {
        /// Offending path.
        path: PathBuf,
    },

    /// The dotenv file passed with `--env-file` could not be loaded.
    #[error("failed to load env file {path}")]
    EnvFile {
        /// File passed on the command line.
        path: PathBuf,
        /// Parse or read error from dotenvy.
        #[source]
        source: dotenvy::Error,
    },
}
