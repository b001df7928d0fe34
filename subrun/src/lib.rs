//! Submission pipeline runner.
//!
//! Unpacks a participant's submission, optionally runs their descriptor
//! generation program, ranks the produced descriptors with an external
//! similarity-search tool and packages the rankings into a result archive.
//! Every command and its output is recorded in a run log that is mirrored
//! to a fixed diagnostic path whatever the outcome.
//!
//! The `subrun` binary wires [`RunnerConfig`] into a [`Pipeline`]; the
//! stage functions in [`stages`] can also be driven directly.

pub mod archive;
pub mod command;
pub mod config;
pub mod context;
pub mod log;
pub mod pipeline;
pub mod rankings;
pub mod report;
pub mod stages;
pub mod util;

pub use archive::{ArchiveError, ArchiveFormat};
pub use command::{CommandSpec, CommandTemplate};
pub use config::{ConfigError, ContractFiles, RunnerConfig};
pub use context::{ClearError, PipelineContext};
pub use log::RunLog;
pub use pipeline::{Pipeline, RunOutcome};
pub use report::{RunReport, StageRecord, StageStatus};
pub use stages::{FailurePolicy, Stage, StageError, StageOutcome};
