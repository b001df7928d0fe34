//! `subrun` command-line entry point.

use std::{path::PathBuf, process::ExitCode};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use subrun::{
    Pipeline, PipelineContext, RunLog, RunnerConfig, StageOutcome,
    archive::{detect_format, list_entries},
    report::error_chain,
    stages,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "subrun",
    version,
    about = "Submission pipeline runner: unpack, generate descriptors, rank, package"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run every stage against the submission and exit with the outcome
    Run {
        /// Dotenv file loaded before reading SUBRUN_* variables
        #[arg(long)]
        env_file: Option<PathBuf>,
        #[arg(long)]
        submission: Option<PathBuf>,
        #[arg(long)]
        work_dir: Option<PathBuf>,
        #[arg(long)]
        result_archive: Option<PathBuf>,
        #[arg(long)]
        log_file: Option<PathBuf>,
        #[arg(long)]
        log_mirror: Option<PathBuf>,
        /// Always write the header-only subset rankings placeholder
        #[arg(long)]
        no_subset_scoring: bool,
        /// Write a JSON run summary here after the log flush
        #[arg(long)]
        summary_file: Option<PathBuf>,
        /// Do not echo the run log to stdout
        #[arg(long, short)]
        quiet: bool,
    },
    /// List a submission's members and the contract files it provides
    Inspect {
        #[arg(long)]
        env_file: Option<PathBuf>,
        #[arg(long)]
        submission: Option<PathBuf>,
    },
    /// Validate configuration and show the resolved settings
    Check {
        #[arg(long)]
        env_file: Option<PathBuf>,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<ExitCode> {
    // Stdout carries the run transcript; diagnostics go to stderr.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            env_file,
            submission,
            work_dir,
            result_archive,
            log_file,
            log_mirror,
            no_subset_scoring,
            summary_file,
            quiet,
        } => {
            let mut config = load_config(env_file)?;
            if let Some(path) = submission {
                config.submission = path;
            }
            if let Some(path) = work_dir {
                config.work_dir = path;
            }
            if let Some(path) = result_archive {
                config.result_archive = path;
            }
            if let Some(path) = log_file {
                config.log_file = path;
            }
            if log_mirror.is_some() {
                config.log_mirror = log_mirror;
            }
            if summary_file.is_some() {
                config.summary_file = summary_file;
            }
            if no_subset_scoring {
                config.subset_scoring = false;
            }

            let ctx = PipelineContext::from_config(&config);
            let log = RunLog::create(&ctx.log_file)
                .with_context(|| {
                    format!("failed to create run log {}", ctx.log_file.display())
                })?
                .with_echo(!quiet);

            // The log must exist even when the run cannot start.
            if let Err(err) = config.validate() {
                log.error(&format!("invalid configuration: {}", error_chain(&err)));
                if let StageOutcome::Failed(flush_err) = stages::flush_log(&ctx, &log) {
                    tracing::error!(
                        error = %error_chain(&flush_err),
                        "failed to persist run log"
                    );
                }
                return Err(err).context("invalid configuration");
            }

            let pipeline = Pipeline::new(ctx, log);
            let run_id = pipeline.run_id();
            let report = pipeline.run().await;
            tracing::info!(
                run_id = %run_id,
                outcome = %report.outcome,
                exit_code = report.exit_code,
                "run finished"
            );
            Ok(report.outcome.into())
        }
        Command::Inspect {
            env_file,
            submission,
        } => {
            let config = load_config(env_file)?;
            let submission = submission.unwrap_or(config.submission);
            let format = detect_format(&submission).with_context(|| {
                format!("cannot inspect {}", submission.display())
            })?;
            let entries = list_entries(&submission).with_context(|| {
                format!("cannot list {}", submission.display())
            })?;

            println!(
                "{} ({}, {} files)",
                submission.display(),
                format.label(),
                entries.len()
            );
            for entry in &entries {
                println!("  {entry}");
            }

            let files = &config.files;
            println!("contract files:");
            for (label, name) in [
                ("entry program", &files.entry_program),
                ("query descriptors", &files.query),
                ("reference descriptors", &files.reference),
                ("subset query descriptors", &files.subset_query),
            ] {
                let state = if entries.iter().any(|entry| entry == name) {
                    "present"
                } else {
                    "missing"
                };
                println!("  {label:<26} {name:<32} {state}");
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Check { env_file } => {
            let config = load_config(env_file)?;
            let ctx = PipelineContext::from_config(&config);
            for (label, value) in ctx.describe() {
                println!("{label:<16} {value}");
            }

            for (label, program) in [
                ("ranking tool", &config.ranking_cmd.program),
                ("entry runner", &config.program_cmd.program),
            ] {
                match which::which(program) {
                    Ok(path) => println!("{label:<16} {program} -> {}", path.display()),
                    Err(_) => {
                        tracing::warn!(program = %program, "{label} not found on PATH");
                        println!("{label:<16} {program} -> not found");
                    }
                }
            }

            config.validate().context("invalid configuration")?;
            println!("configuration ok");
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn load_config(env_file: Option<PathBuf>) -> Result<RunnerConfig> {
    RunnerConfig::load(env_file.as_deref())
        .context("failed to load configuration")
}
